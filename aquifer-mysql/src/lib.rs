//! A minimal MySQL [`ConnectionFactory`][aquifer_core::ConnectionFactory]:
//! TCP connect, the v10 handshake, and `mysql_native_password`
//! authentication, producing a [`Connection`][aquifer_core::Connection]
//! that can only be pinged and closed.
//!
//! Query execution, prepared statements, result-set decoding, and TLS are
//! out of scope here — this crate exists to give `aquifer-core`'s pool
//! something real to create and tear down, not to be a full MySQL driver.
//! See `DESIGN.md` at the workspace root for the reasoning.

mod connection;
mod options;
mod protocol;

pub use connection::{MySqlConnection, MySqlConnectionFactory};
pub use options::MySqlConnectOptions;
