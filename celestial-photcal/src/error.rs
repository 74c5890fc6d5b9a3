use std::path::PathBuf;

use thiserror::Error;

use crate::fetch::FetchError;
use crate::store::CatalogId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid position: ra={ra}, dec={dec}")]
    InvalidPosition { ra: f64, dec: f64 },

    #[error("invalid catalog entry {id}: {reason}")]
    InvalidEntry { id: CatalogId, reason: String },

    #[error("insufficient calibration data: need at least {required} pairs, have {available}")]
    InsufficientCalibrationData { required: usize, available: usize },

    #[error("catalog fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("no field fetcher configured for this catalog")]
    NoFetcher,

    #[error("corrupt catalog cache {path:?}: {message}")]
    StoreCorruption { path: PathBuf, message: String },

    #[error("input length mismatch: {left} catalog ids vs {right} magnitudes")]
    LengthMismatch { left: usize, right: usize },

    #[error("invalid color index '{0}' (expected e.g. \"g-r\")")]
    InvalidColorIndex(String),

    #[error("unknown band '{0}'")]
    UnknownBand(String),

    #[error("invalid region: {0}")]
    InvalidRegion(String),

    #[error("fit error: {0}")]
    Fit(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn corruption(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StoreCorruption {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn insufficient(required: usize, available: usize) -> Self {
        Self::InsufficientCalibrationData {
            required,
            available,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
