use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("type tag must not be empty")]
    EmptyTag,

    #[error("failed to serialize `{tag}`")]
    Serialize {
        tag: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse `{tag}` from {len} payload bytes")]
    Parse {
        tag: String,
        len: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The connection or bus behind the channel is gone.
    #[error("transport for channel `{channel}` is closed")]
    Closed { channel: String },
}
