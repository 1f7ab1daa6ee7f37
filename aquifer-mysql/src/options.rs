//! Connection parameters for [`MySqlConnectionFactory`][crate::MySqlConnectionFactory],
//! built the same consuming-setter way as `aquifer-core`'s `PoolOptions`.

/// Host/port/credentials/TLS policy for a [`MySqlConnectionFactory`][crate::MySqlConnectionFactory].
#[derive(Debug, Clone)]
pub struct MySqlConnectOptions {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) user: String,
    pub(crate) password: Option<String>,
    pub(crate) database: Option<String>,
    /// Accepted for interface parity, but this driver only speaks
    /// plaintext MySQL today; see `DESIGN.md`. Setting this logs a
    /// warning at connect time rather than silently ignoring the request.
    pub(crate) ssl: bool,
}

impl Default for MySqlConnectOptions {
    fn default() -> Self {
        MySqlConnectOptions {
            host: "localhost".to_owned(),
            port: 3306,
            user: "root".to_owned(),
            password: None,
            database: None,
            ssl: false,
        }
    }
}

impl MySqlConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn ssl(mut self, enabled: bool) -> Self {
        self.ssl = enabled;
        self
    }
}
