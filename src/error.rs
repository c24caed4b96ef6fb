use std::io;

/// Errors surfaced by the node runtime. Everything that happens after a
/// successful start is handled internally (dropped datagrams, resends,
/// observer events); only configuration and startup can fail hard.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The configuration file is corrupt. Fatal: the node does not start.
    #[error("configuration corrupt: {0}")]
    ConfigParse(String),

    /// An operation that needs a configuration ran before `configure`.
    #[error("node has no configuration")]
    NotConfigured,

    /// An address in the configuration could not be parsed or resolved.
    #[error("invalid address '{0}'")]
    BadAddress(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
