//! Central place for application-wide constants and default values.

/// Default application name (used in logs and the host binary).
pub const DEFAULT_APP_NAME: &str = "pipenode";

/// Maximum size of one datagram on the wire. One JSON-encoded package
/// per datagram, UTF-8.
pub const MAX_DATAGRAM_BYTES: usize = 4096;

/// How long the writer waits for an acknowledgement before moving all
/// unacked data packages back to the send queue.
pub const RESEND_TIMEOUT_SECS: u64 = 10;

/// Content type tag expected on the first line of a node configuration file.
pub const CONFIG_CONTENT_TYPE: &str = "nodeconfiguration";

/// Payload string carried by acknowledgement packages.
pub const ACK_PAYLOAD: &str = "ack";

/// Placeholder next hop for the configuration reply writer. The real
/// destination always comes from the origin of the incoming
/// configuration request, so this address is never actually used.
pub const CONFIG_REPLY_NEXT_HOP: &str = "localhost:12345";

/// Pause after forwarding a shutdown package, letting the writer flush
/// before the node starts tearing itself down.
pub const SHUTDOWN_FLUSH_PAUSE_MS: u64 = 200;

/// Application / crate version (populated from Cargo.toml via env! macro)
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
