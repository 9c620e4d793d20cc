pub mod atomic;
pub mod candle_store;
pub mod events;
pub mod paths;

pub use atomic::*;
pub use candle_store::*;
pub use events::*;
pub use paths::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error on {path}: {source}")]
    Serialize {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not acquire file lock on {path}")]
    Lock { path: String },
}
