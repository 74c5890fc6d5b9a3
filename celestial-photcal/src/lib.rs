//! Photometric calibration against a reference catalog.
//!
//! Keeps a local, persistent cache of reference-catalog rows, matches
//! observed source positions to it, and fits the transformation from
//! instrumental to catalog magnitudes: a constant zero point, or a zero point
//! plus a linear color term, with iterative sigma clipping. Catalog rows are
//! fetched from a survey only when asked; once cached, a field is served
//! locally from then on.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`catalog`] | [`Catalog`] facade: search, fetch, match, calibrate |
//! | [`store`] | [`EntryStore`](store::EntryStore) cache with a HEALPix index and atomic file commits |
//! | [`xmatch`] | Nearest-neighbour matching with deterministic tie-breaks |
//! | [`calibrate`] | Constant and color-term fits, sigma clipping |
//! | [`fetch`] | [`FieldFetcher`](fetch::FieldFetcher) trait, survey [`Provider`](fetch::Provider)s, TAP client |
//! | [`sky`] | Positions, separations, HEALPix pixels, caps and polygons |
//! | [`config`] | [`CatalogConfig`], loadable from JSON |
//!
//! # Quick Start
//!
//! ```ignore
//! use celestial_photcal::fetch::{Provider, TapFetcher};
//! use celestial_photcal::{Catalog, CatalogConfig, SkyPosition};
//!
//! let config = CatalogConfig::default()
//!     .with_cache_path("field.pcat")
//!     .with_bands(["g", "r"]);
//! let mut catalog = Catalog::open(config)?
//!     .with_fetcher(Box::new(TapFetcher::new(Provider::PanStarrs1Dr2)));
//!
//! let positions: Vec<SkyPosition> = /* detected sources */;
//! if catalog.coverage(&positions)? < 100 {
//!     catalog.fetch_field(&positions)?;
//! }
//!
//! let (ids, _) = catalog.xmatch(&positions);
//! let result = catalog.cal_constant(&ids, &instrumental, None, "r", None, None)?;
//! println!("zp = {:.3} ± {:.3}", result.zero_point, result.uncertainty);
//! ```
//!
//! # Features
//!
//! - **`tap`** (default): [`TapFetcher`](fetch::TapFetcher) over blocking HTTP.
//! - **`cli`**: the `photcal` binary.

pub mod calibrate;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetch;
pub mod sky;
pub mod store;
pub mod xmatch;

pub use calibrate::{CalibrationResult, CalibrationSample, Calibrator, ClipConfig, ColorFitOptions};
pub use catalog::{Catalog, ColorIndex, FetchSummary};
pub use config::CatalogConfig;
pub use error::{Error, Result};
pub use sky::{Region, SkyPosition};
pub use store::{CatalogEntry, CatalogId, EntryStore, Photometry};
pub use xmatch::{Match, MatchConfig};
