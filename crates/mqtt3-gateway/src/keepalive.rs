//! Keepalive timer seam.
//!
//! The timer itself lives with the socket owner; expiry is delivered to
//! the connection's event loop, which treats it like socket closure
//! (`send_will` then `close_connection`).

/// Arms the keepalive monitor for a connection.
pub trait KeepaliveTimer: Send + Sync {
    /// Start monitoring with the client's requested interval. Zero
    /// disables keepalive.
    fn start(&self, keep_alive_secs: u16);
}

/// Timer that does nothing; for embedders that monitor liveness
/// themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopKeepalive;

impl KeepaliveTimer for NoopKeepalive {
    fn start(&self, _keep_alive_secs: u16) {}
}
