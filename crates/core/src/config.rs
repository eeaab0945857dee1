use std::time::Duration;

/// Default interval between SSE `ping` events.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);

/// Default capacity of the outbound frame queue of one WebSocket.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 100;

/// Controller configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Prefix of every route, e.g. `/api` (empty for none)
    pub path_prefix: String,
    /// Idle time before an SSE subscription emits a `ping` event (None disables pings)
    pub ping_interval: Option<Duration>,
    /// Interval of server `ka` frames on WebSockets (None disables them)
    pub keep_alive: Option<Duration>,
    /// Capacity of the outbound frame queue of one WebSocket
    pub outbound_buffer: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            path_prefix: String::new(),
            ping_interval: Some(DEFAULT_PING_INTERVAL),
            keep_alive: None,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl ControllerConfig {
    pub fn with_path_prefix(mut self, path_prefix: impl Into<String>) -> Self {
        self.path_prefix = normalize_prefix(&path_prefix.into());
        self
    }

    pub fn with_ping_interval(mut self, ping_interval: Option<Duration>) -> Self {
        self.ping_interval = ping_interval;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Option<Duration>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_outbound_buffer(mut self, outbound_buffer: usize) -> Self {
        self.outbound_buffer = outbound_buffer.max(1);
        self
    }

    /// Full path of a route below the prefix.
    pub fn route(&self, path: &str) -> String {
        format!("{}{}", self.path_prefix, path)
    }
}

/// `api/` and `/api/` both become `/api`; `/` becomes empty.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}
