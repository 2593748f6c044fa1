use crate::relay::Side;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config: {0}")]
    Config(String),
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("dial {addr}: {reason}")]
    Dial { addr: String, reason: String },
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("{side} transport: {source}")]
    Transport {
        side: Side,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn is_bind(&self) -> bool {
        matches!(self, Error::Bind { .. })
    }
}
