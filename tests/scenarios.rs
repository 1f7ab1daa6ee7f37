//! End-to-end scenarios against `aquifer-test`'s in-memory factory — no
//! MySQL server required. Each test below corresponds to one of the six
//! concrete scenarios and the companion boundary behaviors this pool's
//! design is checked against; see the crate's top-level documentation for
//! the invariants they encode (FIFO waiters, no orphaned entries on
//! cancellation, exactly-once factory close, breaker recovery, and so on).
//!
//! Every scenario runs under `tokio::time::pause` so delays measured in
//! tens of seconds (the breaker's backoff, `maxLifetime`) execute
//! instantly and deterministically; `SystemClock` rides on
//! `tokio::time::Instant` for exactly this reason.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use aquifer::{Connection, DataSource, Error, PoolOptions};
use aquifer_test::MockFactory;

/// Scenario 1: `max=2, min=0, connectionTimeout=1s`, three simultaneous
/// acquires. Two succeed with fresh connections, the third parks; after
/// one release the third succeeds; the pool's gauges settle at
/// `active=2, idle=0` and then `active=0, idle=2` once everyone releases.
#[tokio::test(start_paused = true)]
async fn three_concurrent_acquires_one_parks_then_is_served() -> anyhow::Result<()> {
    let _ = env_logger::try_init();
    let factory = MockFactory::new();
    let pool = PoolOptions::new()
        .max_connections(2)
        .min_connections(0)
        .connection_timeout(Duration::from_secs(1))
        .connect_lazy(factory.clone())?;

    let a = pool.acquire().await?;
    let b = pool.acquire().await?;

    let parked_pool = pool.clone();
    let parked = tokio::spawn(async move { parked_pool.acquire().await.unwrap() });
    tokio::task::yield_now().await;

    let (snapshot, _) = pool.snapshot();
    assert_eq!(snapshot.active, 2);
    assert_eq!(snapshot.idle, 0);
    assert_eq!(snapshot.waiting, 1);

    a.release().await;
    let c = parked.await.unwrap();

    assert_eq!(factory.created_count(), 2, "the third acquire must reuse the handed-off entry, not create a new one");

    b.release().await;
    c.release().await;

    let (snapshot, _) = pool.snapshot();
    assert_eq!(snapshot.active, 0);
    assert_eq!(snapshot.idle, 2);
    Ok(())
}

/// Scenario 2: `max=1, maxLifetime=100ms`. Acquire, hold 50ms, release,
/// acquire again (the same LIFO entry), hold past the 100ms mark, and the
/// next release destroys it; a third acquire then creates a fresh entry.
#[tokio::test(start_paused = true)]
async fn max_lifetime_retires_an_entry_after_reuse() -> anyhow::Result<()> {
    let _ = env_logger::try_init();
    let factory = MockFactory::new();
    let pool = PoolOptions::new()
        .max_connections(1)
        .min_connections(0)
        .max_lifetime(Duration::from_millis(100))
        .keepalive_time(Duration::from_millis(10))
        .connection_timeout(Duration::from_secs(1))
        .connect_lazy(factory.clone())?;

    let first = pool.acquire().await?;
    let first_id = first.id();
    tokio::time::advance(Duration::from_millis(50)).await;
    first.release().await;

    let second = pool.acquire().await?;
    assert_eq!(second.id(), first_id, "a single-slot pool must hand back the same entry");

    tokio::time::advance(Duration::from_millis(100)).await;
    second.release().await;

    let (snapshot, _) = pool.snapshot();
    assert_eq!(snapshot.total_destroyed, 1);

    let third = pool.acquire().await?;
    assert_ne!(third.id(), first_id);
    third.release().await;

    assert_eq!(factory.created_count(), 2);
    Ok(())
}

/// Scenario 3: a factory that fails transiently five times in a row trips
/// the breaker CLOSED -> OPEN; acquires are rejected with `CircuitOpen`
/// without touching the factory until the 30s backoff elapses, at which
/// point a single probe is let through and, succeeding, resets the
/// breaker.
#[tokio::test(start_paused = true)]
async fn circuit_breaker_opens_and_recovers_after_backoff() {
    let _ = env_logger::try_init();
    let factory = MockFactory::new();
    factory.fail_next_connects(5, false);

    let pool = PoolOptions::new()
        .max_connections(2)
        .min_connections(0)
        .connection_timeout(Duration::from_secs(1))
        .failure_threshold(5)
        .connect_lazy(factory.clone())
        .unwrap();

    for _ in 0..5 {
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::CreateFailed { permanent: false, .. }));
    }

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen));
    assert_eq!(
        factory.created_count(),
        0,
        "a rejected acquire must never reach the factory"
    );

    tokio::time::advance(Duration::from_secs(30)).await;

    let conn = pool.acquire().await.unwrap();
    let (_, breaker) = pool.snapshot();
    assert_eq!(breaker.state, "CLOSED");
    assert_eq!(breaker.consecutive_failures, 0);

    conn.release().await;
}

/// Scenario 4: leak detection is diagnostic-only. Holding a lease well
/// past `leakDetectionThreshold` never forces it closed; the lease stays
/// usable and the eventual `release` still hands it back to the pool.
#[tokio::test(start_paused = true)]
async fn leak_detection_never_forcibly_reclaims_a_lease() {
    let _ = env_logger::try_init();
    let factory = MockFactory::new();
    let pool = PoolOptions::new()
        .max_connections(1)
        .min_connections(0)
        .leak_detection_threshold(Duration::from_millis(50))
        .connect_lazy(factory.clone())
        .unwrap();

    let mut conn = pool.acquire().await.unwrap();
    tokio::time::advance(Duration::from_millis(200)).await;

    // Past the leak threshold, the lease must still be a live, working
    // connection: the detector only logs, it does not reclaim.
    conn.ping().await.unwrap();

    let (snapshot, _) = pool.snapshot();
    assert_eq!(snapshot.active, 1, "leak detection must not evict the in-use entry");

    conn.release().await;

    let (snapshot, _) = pool.snapshot();
    assert_eq!(snapshot.active, 0);
    assert_eq!(snapshot.idle, 1);
    assert_eq!(factory.closed_count(), 0, "the connection was never destroyed, only leased for a long time");
}

/// Scenario 5: `close()` with 2 in-use and 3 idle entries. New acquires
/// fail `PoolClosed` immediately, even while in-use leases are still
/// draining; once every lease releases, every connection the factory ever
/// produced has been closed exactly once.
#[tokio::test(start_paused = true)]
async fn close_drains_in_use_leases_and_closes_every_connection() -> anyhow::Result<()> {
    let _ = env_logger::try_init();
    let factory = MockFactory::new();
    let pool = PoolOptions::new()
        .max_connections(5)
        .min_connections(0)
        .connect_lazy(factory.clone())?;

    let held_a = pool.acquire().await?;
    let held_b = pool.acquire().await?;
    let idle_1 = pool.acquire().await?;
    let idle_2 = pool.acquire().await?;
    let idle_3 = pool.acquire().await?;
    idle_1.release().await;
    idle_2.release().await;
    idle_3.release().await;

    assert_eq!(factory.created_count(), 5);

    let closing_pool = pool.clone();
    let closer = tokio::spawn(async move {
        closing_pool.close(Duration::from_secs(5)).await;
    });
    tokio::task::yield_now().await;

    let rejected = pool.acquire().await.unwrap_err();
    assert!(matches!(rejected, Error::PoolClosed));

    held_a.release().await;
    held_b.release().await;
    closer.await.unwrap();

    assert!(factory.all_created_were_closed());
    assert_eq!(factory.closed_count(), 5);

    let (snapshot, _) = pool.snapshot();
    assert_eq!(snapshot.total_destroyed, snapshot.total_created);
    Ok(())
}

/// Scenario 6: 20 waiters behind a `max=5` pool (5 connections already
/// leased out so every one of the 20 additional acquires parks); waiters
/// 3, 7, and 11 (1-indexed, matching the scenario as specified) are
/// cancelled before being served. The remaining 17 are granted in their
/// original enqueue order, skipping the cancelled slots, and no entry is
/// ever orphaned: the factory only ever creates 5 connections, each
/// recycled through the whole cascade.
#[tokio::test(start_paused = true)]
async fn twenty_waiters_skip_three_cancellations_and_stay_fifo() {
    let _ = env_logger::try_init();
    let factory = MockFactory::new();
    let pool = PoolOptions::new()
        .max_connections(5)
        .min_connections(0)
        .connection_timeout(Duration::from_secs(30))
        .connect_lazy(factory.clone())
        .unwrap();

    let base: Vec<_> = {
        let mut leases = Vec::with_capacity(5);
        for _ in 0..5 {
            leases.push(pool.acquire().await.unwrap());
        }
        leases
    };
    assert_eq!(factory.created_count(), 5);

    let cancelled_1indexed = [3usize, 7, 11];
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::with_capacity(20);

    for i in 1..=20usize {
        let waiting_pool = pool.clone();
        let order = Arc::clone(&order);
        let handle = tokio::spawn(async move {
            let conn = waiting_pool.acquire().await.unwrap();
            order.lock().unwrap().push(i);
            conn.release().await;
        });
        handles.push((i, handle));
        // Enqueue strictly in spawn order before starting the next waiter.
        tokio::task::yield_now().await;
    }

    for &victim in &cancelled_1indexed {
        let (_, handle) = handles
            .iter()
            .find(|(i, _)| *i == victim)
            .expect("victim index exists");
        handle.abort();
    }
    tokio::task::yield_now().await;

    // Releasing the 5 base leases kicks off a cascade: each waiter that
    // gets served releases immediately after recording its index, handing
    // the same entry to the next live waiter in the queue.
    for lease in base {
        lease.release().await;
    }

    let mut expected: Vec<usize> = (1..=20).collect();
    expected.retain(|i| !cancelled_1indexed.contains(i));

    for (i, handle) in handles {
        if cancelled_1indexed.contains(&i) {
            let _ = handle.await;
            continue;
        }
        handle.await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), expected);
    assert_eq!(
        factory.created_count(),
        5,
        "no entry may be orphaned: the same 5 connections serve every waiter"
    );

    let (snapshot, _) = pool.snapshot();
    assert_eq!(snapshot.active, 0);
    assert_eq!(snapshot.idle, 5);
}
