use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Wire decode error: {0}")]
    WireDecode(#[from] serde_json::Error),

    #[error("Ingress channel closed")]
    ChannelClosed,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
