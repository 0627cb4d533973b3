use std::time::Duration;

/// Default REST API base URL.
pub const DEFAULT_API_URL: &str = "http://localhost/api/v1";

/// Default realtime endpoint.
pub const DEFAULT_WS_URL: &str = "ws://localhost/ws";

/// Environment variable overriding the REST API base URL.
pub const API_URL_ENV: &str = "WORLDBEST_API_URL";

/// Environment variable overriding the realtime endpoint.
pub const WS_URL_ENV: &str = "WORLDBEST_WS_URL";

/// Timeout applied to every HTTP request unless overridden per call.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for the WebSocket upgrade to complete.
pub const WS_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// How often to send keepalive pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(25);

/// Read deadline: if nothing arrives within this window the connection
/// is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// Maximum inbound message size in bytes (1 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Application close code the server sends when it terminates a session
/// on purpose (forced logout, account deleted).
pub const WS_CLOSE_SESSION_TERMINATED: u16 = 4001;

/// Path of the token refresh endpoint, relative to the API base URL.
pub const REFRESH_PATH: &str = "/auth/refresh";
