use std::time::Duration;

use aquifer_core::{Connection, ConnectionFactory, Error};
use futures_core::future::BoxFuture;
use tokio::net::TcpStream;

use crate::options::MySqlConnectOptions;
use crate::protocol::{self, COM_PING, COM_QUERY, COM_QUIT};

/// A live MySQL connection: a TCP socket past the handshake and
/// authentication phases. Offers only what [`Connection`] requires
/// (`ping`, `close`, and a `validate` that can run a `connection_test_query`
/// via `COM_QUERY`) — there is no general query execution or result-set
/// decoding here.
pub struct MySqlConnection {
    stream: TcpStream,
    seq: u8,
}

impl MySqlConnection {
    async fn send_command(&mut self, command: u8) -> std::io::Result<()> {
        self.seq = 0;
        protocol::write_packet(&mut self.stream, self.seq, &[command]).await
    }

    async fn recv_ok(&mut self) -> aquifer_core::Result<()> {
        let (_seq, payload) = protocol::read_packet(&mut self.stream).await?;
        match protocol::parse_ok_or_err(&payload)? {
            Ok(()) => Ok(()),
            Err(e) => Err(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e))),
        }
    }

    async fn send_query(&mut self, sql: &str) -> std::io::Result<()> {
        self.seq = 0;
        let mut payload = Vec::with_capacity(1 + sql.len());
        payload.push(COM_QUERY);
        payload.extend_from_slice(sql.as_bytes());
        protocol::write_packet(&mut self.stream, self.seq, &payload).await
    }
}

impl Connection for MySqlConnection {
    fn ping(&mut self) -> BoxFuture<'_, aquifer_core::Result<()>> {
        Box::pin(async move {
            self.send_command(COM_PING).await?;
            self.recv_ok().await
        })
    }

    fn close(mut self) -> BoxFuture<'static, aquifer_core::Result<()>> {
        Box::pin(async move {
            // Best-effort: COM_QUIT gets no response, the server just hangs
            // up. A failure to even write it is not worth surfacing — the
            // entry is gone from the pool's bookkeeping either way.
            let _ = self.send_command(COM_QUIT).await;
            Ok(())
        })
    }

    fn validate(&mut self, test_query: Option<&str>) -> BoxFuture<'_, aquifer_core::Result<()>> {
        let Some(sql) = test_query else {
            return self.ping();
        };
        let sql = sql.to_owned();
        Box::pin(async move {
            self.send_query(&sql).await?;
            match protocol::drain_query_response(&mut self.stream).await? {
                Ok(()) => Ok(()),
                Err(e) => Err(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e))),
            }
        })
    }
}

/// Creates [`MySqlConnection`]s by dialing `options.host:options.port`,
/// completing the handshake, and authenticating as `options.user` via
/// `mysql_native_password`.
pub struct MySqlConnectionFactory {
    options: MySqlConnectOptions,
}

impl MySqlConnectionFactory {
    pub fn new(options: MySqlConnectOptions) -> Self {
        MySqlConnectionFactory { options }
    }
}

impl ConnectionFactory for MySqlConnectionFactory {
    type Connection = MySqlConnection;

    fn connect(&self, timeout: Duration) -> BoxFuture<'_, aquifer_core::Result<MySqlConnection>> {
        Box::pin(async move {
            match tokio::time::timeout(timeout, self.establish()).await {
                Ok(Ok(conn)) => Ok(conn),
                Ok(Err(e)) => Err(e),
                Err(_elapsed) => Err(Error::CreateFailed {
                    cause: Box::new(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "timed out establishing a MySQL connection",
                    )),
                    permanent: false,
                }),
            }
        })
    }
}

impl MySqlConnectionFactory {
    async fn establish(&self) -> aquifer_core::Result<MySqlConnection> {
        if self.options.ssl {
            log::warn!(
                "aquifer-mysql does not implement TLS; connecting to {}:{} in plaintext despite ssl=true",
                self.options.host,
                self.options.port,
            );
        }

        let transient = |cause: std::io::Error| Error::CreateFailed {
            cause: Box::new(cause),
            permanent: false,
        };

        let mut stream = TcpStream::connect((self.options.host.as_str(), self.options.port))
            .await
            .map_err(transient)?;

        let (_seq, handshake_payload) = protocol::read_packet(&mut stream)
            .await
            .map_err(transient)?;
        let handshake = protocol::parse_handshake(&handshake_payload).map_err(transient)?;

        let auth_response = self
            .options
            .password
            .as_deref()
            .map(|password| {
                protocol::scramble_native_password(
                    password.as_bytes(),
                    &handshake.auth_plugin_data,
                )
                .to_vec()
            })
            .unwrap_or_default();

        let response = protocol::build_handshake_response(
            &self.options.user,
            &auth_response,
            self.options.database.as_deref(),
        );
        protocol::write_packet(&mut stream, 1, &response)
            .await
            .map_err(transient)?;

        let (_seq, reply) = protocol::read_packet(&mut stream).await.map_err(transient)?;
        match protocol::parse_ok_or_err(&reply).map_err(transient)? {
            Ok(()) => Ok(MySqlConnection { stream, seq: 0 }),
            Err(server_err) => Err(Error::CreateFailed {
                permanent: server_err.is_permanent(),
                cause: Box::new(server_err),
            }),
        }
    }
}
