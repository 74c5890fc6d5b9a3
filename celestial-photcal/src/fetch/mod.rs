//! Field fetching: the contract between the catalog facade and a remote
//! survey.
//!
//! The facade only ever calls [`FieldFetcher::fetch`] with a region and the
//! bands it wants, and merges whatever comes back into the cache. Survey
//! specifics (tables, column names, sentinels) live in [`Provider`]; the HTTP
//! transport lives in [`TapFetcher`] behind the `tap` feature.

mod provider;
#[cfg(feature = "tap")]
mod tap;

pub use provider::{BandColumns, Provider};
#[cfg(feature = "tap")]
pub use tap::{Credentials, TapFetcher};

use thiserror::Error;

use crate::sky::Region;
use crate::store::CatalogEntry;

#[derive(Debug, Error)]
pub enum FetchError {
    #[cfg(feature = "tap")]
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: String,
        status: u16,
        body: String,
    },

    #[error("failed to parse {service} response: {message}")]
    Parse { service: String, message: String },

    #[error("{service} cannot serve this request: {message}")]
    Unsupported { service: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// What to fetch: every source inside `region`, with photometry in `bands`.
/// An empty band list asks for everything the provider offers.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRequest {
    pub region: Region,
    pub bands: Vec<String>,
}

/// A remote source of catalog entries.
pub trait FieldFetcher {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Retrieve all entries in the requested region. Blocking. An empty
    /// result is not an error.
    fn fetch(&self, request: &FieldRequest) -> Result<Vec<CatalogEntry>, FetchError>;
}

impl<F: FieldFetcher + ?Sized> FieldFetcher for Box<F> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(&self, request: &FieldRequest) -> Result<Vec<CatalogEntry>, FetchError> {
        (**self).fetch(request)
    }
}
