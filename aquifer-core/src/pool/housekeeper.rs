//! Background maintenance: idle eviction, max-lifetime retirement,
//! keepalive validation, and adaptive sizing, run on a periodic pass so
//! none of it has to happen inline with an `acquire`/`release`. Entries
//! that are `IN_USE` when their lifetime expires are marked
//! `retire_on_release` rather than touched directly, since the lease
//! currently holding the entry may still be mid-use; the pass also folds
//! in circuit-breaker-aware replenishment back up toward `min_connections`.

use super::entry::EntryState;
use super::{ConnectionFactory, EntryId, Pool};
use crate::factory::Connection;
use std::cmp::min;
use std::time::{Duration, Instant};

pub(crate) fn spawn<F>(pool: Pool<F>) -> tokio::task::JoinHandle<()>
where
    F: ConnectionFactory,
{
    tokio::spawn(async move {
        loop {
            let interval = next_interval(&pool);
            pool.clock().sleep(interval).await;
            let now = pool.clock().now();
            pool.housekeeping_pass(now);
        }
    })
}

fn next_interval<F: ConnectionFactory>(pool: &Pool<F>) -> Duration {
    let options = pool.options();
    let mut interval = options.housekeeper_interval;

    if let Some(idle_timeout) = options.idle_timeout {
        interval = min(interval, idle_timeout);
    }
    if let Some(max_lifetime) = options.max_lifetime {
        interval = min(interval, max_lifetime);
    }
    if options.adaptive_sizing {
        interval = min(interval, options.adaptive_interval);
    }

    interval.max(Duration::from_millis(100))
}

/// One maintenance sweep. Runs synchronously under the pool lock to pick
/// victims and keepalive candidates, then spawns a task to do their I/O
/// (ping, close, replenish) outside the lock — the pool's single critical
/// section never performs I/O.
pub(crate) fn run_pass<F>(pool: &Pool<F>, now: Instant)
where
    F: ConnectionFactory,
{
    let (condemned, keepalive_candidates, validation_timeout, test_query) = {
        let options = pool.options();
        let min_connections = options.min_connections;
        let max_connections = options.max_connections;
        let idle_timeout = options.idle_timeout;
        let max_lifetime = options.max_lifetime;
        let keepalive_time = options.keepalive_time;
        let adaptive_sizing = options.adaptive_sizing;
        let test_query = options.connection_test_query.clone();

        let mut state = pool.state().lock().unwrap();
        if state.closed {
            return;
        }

        let count_u32 = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
        let idle_keep_floor = if adaptive_sizing {
            let active = count_u32(
                state
                    .entries
                    .values()
                    .filter(|e| e.state == EntryState::InUse)
                    .count(),
            );
            pool.adaptive().tick(
                count_u32(state.waiters.len()),
                count_u32(state.idle.len()),
                active,
                min_connections,
                max_connections,
            )
        } else {
            min_connections
        };
        let idle_keep_floor = usize::try_from(idle_keep_floor).unwrap_or(usize::MAX);

        let mut survivors = Vec::with_capacity(state.idle.len());
        let mut condemned_ids = Vec::new();
        let mut keepalive_ids = Vec::new();

        // Front-to-back: the idle queue is LIFO for acquisition (`pop_back`
        // favors the warmest connection), so the front holds the
        // coldest/longest-idle entries — exactly what eviction should
        // prefer once the idle floor's slots are protected.
        while let Some(entry_id) = state.idle.pop_front() {
            let Some(entry) = state.entries.get(&entry_id) else {
                continue;
            };

            let lifetime_expired = max_lifetime
                .is_some_and(|max| now.saturating_duration_since(entry.created_at) >= max);
            let idle_expired = idle_timeout.is_some_and(|timeout| {
                entry
                    .last_returned_at
                    .is_some_and(|t| now.saturating_duration_since(t) >= timeout)
            });
            let senescent = lifetime_expired || idle_expired;
            let due_for_keepalive =
                now.saturating_duration_since(entry.last_validated_at) > keepalive_time;

            if senescent && survivors.len() >= idle_keep_floor {
                condemned_ids.push(entry_id);
            } else if due_for_keepalive {
                keepalive_ids.push(entry_id);
            } else {
                survivors.push(entry_id);
            }
        }
        state.idle.extend(survivors);

        let mut condemned = Vec::with_capacity(condemned_ids.len());
        for entry_id in condemned_ids {
            if let Some(mut entry) = state.entries.remove(&entry_id) {
                if let Some(conn) = entry.conn.take() {
                    condemned.push(conn);
                }
            }
        }

        let mut keepalive_candidates = Vec::with_capacity(keepalive_ids.len());
        for entry_id in keepalive_ids {
            if let Some(entry) = state.entries.get_mut(&entry_id) {
                if let Some(conn) = entry.conn.take() {
                    entry.state = EntryState::Validating;
                    keepalive_candidates.push((entry_id, conn));
                }
            }
        }

        // An IN_USE entry past its lifetime is retired on its next
        // release; we don't touch it while it's leased out.
        if let Some(max_lifetime) = max_lifetime {
            for entry in state.entries.values_mut() {
                if entry.state == EntryState::InUse
                    && now.saturating_duration_since(entry.created_at) >= max_lifetime
                {
                    entry.retire_on_release = true;
                }
            }
        }

        (
            condemned,
            keepalive_candidates,
            options.validation_timeout,
            test_query,
        )
    };

    if !condemned.is_empty() {
        log::debug!(
            "housekeeper evicting {} senescent idle connection(s)",
            condemned.len()
        );
    }

    let pool = pool.clone();
    tokio::spawn(async move {
        for conn in condemned {
            pool.finish_destroy(conn).await;
        }
        run_keepalive(
            &pool,
            keepalive_candidates,
            validation_timeout,
            test_query.as_deref(),
            now,
        )
        .await;
        pool.maybe_replenish(now).await;
    });
}

/// Pings each keepalive candidate outside the lock, destroying it on
/// failure (or timeout) and restoring it to service on success.
async fn run_keepalive<F>(
    pool: &Pool<F>,
    candidates: Vec<(EntryId, F::Connection)>,
    validation_timeout: Duration,
    test_query: Option<&str>,
    now: Instant,
) where
    F: ConnectionFactory,
{
    if candidates.is_empty() {
        return;
    }

    log::trace!("housekeeper running keepalive on {} idle connection(s)", candidates.len());

    for (entry_id, mut conn) in candidates {
        match tokio::time::timeout(validation_timeout, conn.validate(test_query)).await {
            Ok(Ok(())) => {
                let mut state = pool.state().lock().unwrap();
                if let Some(entry) = state.entries.get_mut(&entry_id) {
                    entry.conn = Some(conn);
                    entry.last_validated_at = now;
                    state.hand_off_or_idle(entry_id, now);
                }
            }
            Ok(Err(e)) => {
                log::warn!("keepalive ping failed for entry {entry_id}: {e}");
                pool.destroy_after_failed_validation(entry_id, conn).await;
            }
            Err(_elapsed) => {
                log::warn!("keepalive ping timed out for entry {entry_id}");
                pool.destroy_after_failed_validation(entry_id, conn).await;
            }
        }
    }
}
