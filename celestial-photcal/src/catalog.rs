//! The catalog facade: one object owning the cache, the match settings and
//! an optional fetcher, with the calls a calibration script makes in order.
//!
//! ```text
//! search / coverage   what the cache already holds around the observations
//! fetch_field         pull the field from the survey and merge it
//! xmatch              observation -> nearest catalog id
//! cal_constant        zero point from matched pairs
//! cal_color           zero point and color term from matched pairs
//! ```
//!
//! Nothing is fetched implicitly. A script decides from [`Catalog::coverage`]
//! whether the cache is good enough and calls [`Catalog::fetch_field`] if not.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::calibrate::{CalibrationResult, CalibrationSample, Calibrator, ColorFitOptions};
use crate::config::CatalogConfig;
use crate::error::{Error, Result};
use crate::fetch::{FieldFetcher, FieldRequest};
use crate::sky::{Region, SkyPosition, ARCSEC_PER_DEG};
use crate::store::{CatalogEntry, CatalogId, EntryStore, Photometry};
use crate::xmatch;

/// A catalog color such as `g-r`: magnitude in `blue` minus magnitude in `red`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColorIndex {
    pub blue: String,
    pub red: String,
}

impl ColorIndex {
    pub fn new(blue: impl Into<String>, red: impl Into<String>) -> Self {
        Self {
            blue: blue.into(),
            red: red.into(),
        }
    }

    /// Color of `entry`, if both bands have a finite magnitude.
    pub fn value(&self, entry: &CatalogEntry) -> Option<f64> {
        Some(entry.magnitude(&self.blue)? - entry.magnitude(&self.red)?)
    }
}

impl fmt::Display for ColorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.blue, self.red)
    }
}

impl FromStr for ColorIndex {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (blue, red) = s
            .split_once('-')
            .ok_or_else(|| Error::InvalidColorIndex(s.to_string()))?;
        let (blue, red) = (blue.trim(), red.trim());
        if blue.is_empty() || red.is_empty() || red.contains('-') || blue == red {
            return Err(Error::InvalidColorIndex(s.to_string()));
        }
        Ok(Self::new(blue, red))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FetchSummary {
    /// Rows returned by the fetcher.
    pub fetched: usize,
    /// Rows that were new to the cache.
    pub inserted: usize,
}

pub struct Catalog {
    store: EntryStore,
    config: CatalogConfig,
    fetcher: Option<Box<dyn FieldFetcher>>,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("store", &self.store)
            .field("config", &self.config)
            .field("fetcher", &self.fetcher.as_ref().map(|f| f.name().to_string()))
            .finish()
    }
}

impl Catalog {
    /// Open the cache named by `config.cache_path`, or an in-memory cache
    /// when it is `None`.
    pub fn open(config: CatalogConfig) -> Result<Self> {
        config.validate()?;
        let store = match &config.cache_path {
            Some(path) => EntryStore::open(path, config.index_order)?,
            None => EntryStore::in_memory(config.index_order)?,
        };
        log::debug!(
            "opened catalog cache {} with {} entries",
            store
                .path()
                .map_or_else(|| "<memory>".to_string(), |p| p.display().to_string()),
            store.len()
        );
        Ok(Self {
            store,
            config,
            fetcher: None,
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(CatalogConfig::in_memory())
    }

    pub fn with_fetcher(mut self, fetcher: Box<dyn FieldFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn fetcher_name(&self) -> Option<&str> {
        self.fetcher.as_deref().map(|f| f.name())
    }

    /// Pick up entries other processes have committed to the cache file.
    pub fn refresh(&mut self) -> Result<usize> {
        self.store.refresh()
    }

    /// Cached entries inside the region bounding `positions`, ordered by id.
    pub fn search(&self, positions: &[SkyPosition]) -> Result<(Vec<CatalogId>, Vec<SkyPosition>)> {
        if positions.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let region = Region::bounding(positions)?;
        let found = self.store.entries_within(&region);
        log::debug!("search found {} cached entries", found.len());
        Ok(found.into_iter().map(|e| (e.id.clone(), e.position())).unzip())
    }

    /// Number of cached entries in the field [`Catalog::fetch_field`] would
    /// request for `positions`.
    pub fn coverage(&self, positions: &[SkyPosition]) -> Result<usize> {
        if positions.is_empty() {
            return Ok(0);
        }
        Ok(self.store.count_region(&self.field_region(positions)?))
    }

    /// Fetch the field around `positions` and merge it into the cache. The
    /// field is the bounding region grown by the match radius, so sources
    /// just outside the hull of the observations are fetched too.
    ///
    /// # Errors
    /// [`Error::NoFetcher`] without a fetcher. A fetcher failure is returned
    /// as [`Error::Fetch`] and leaves the cache untouched.
    pub fn fetch_field(&mut self, positions: &[SkyPosition]) -> Result<FetchSummary> {
        let fetcher = self.fetcher.as_deref().ok_or(Error::NoFetcher)?;
        let request = FieldRequest {
            region: self.field_region(positions)?,
            bands: self.config.bands.clone(),
        };

        let entries = fetcher.fetch(&request)?;
        let fetched = entries.len();
        let inserted = self.store.insert_many(entries)?;
        log::info!(
            "{}: fetched {} entries, {} new (cache now {})",
            fetcher.name(),
            fetched,
            inserted,
            self.store.len()
        );
        Ok(FetchSummary { fetched, inserted })
    }

    fn field_region(&self, positions: &[SkyPosition]) -> Result<Region> {
        let margin_deg = self.config.matching.match_radius_arcsec / ARCSEC_PER_DEG;
        Ok(Region::bounding(positions)?.expanded(margin_deg))
    }

    /// Nearest cached entry for each position within the match radius.
    pub fn xmatch(&self, positions: &[SkyPosition]) -> (Vec<Option<CatalogId>>, Vec<Option<f64>>) {
        xmatch::match_positions(positions, &self.store, &self.config.matching)
            .into_iter()
            .map(|m| (m.catalog_id, m.separation_arcsec))
            .unzip()
    }

    /// Photometry per id for each band; missing ids or bands come back NaN.
    pub fn lookup(&self, ids: &[Option<CatalogId>], bands: &[&str]) -> Vec<Vec<Photometry>> {
        ids.iter()
            .map(|id| {
                let entry = id.as_ref().and_then(|id| self.store.get(id));
                bands
                    .iter()
                    .map(|band| entry.map_or(Photometry::MISSING, |e| e.photometry(band)))
                    .collect()
            })
            .collect()
    }

    /// Constant zero point in `band` from matched pairs.
    ///
    /// `ids`, `instrumental` and `instrumental_errors` (when given) are
    /// aligned; unmatched ids and entries without a magnitude in `band` are
    /// skipped. With `color_limits`, pairs whose `color` falls outside the
    /// limits are skipped as well.
    pub fn cal_constant(
        &self,
        ids: &[Option<CatalogId>],
        instrumental: &[f64],
        instrumental_errors: Option<&[f64]>,
        band: &str,
        color: Option<&ColorIndex>,
        color_limits: Option<(f64, f64)>,
    ) -> Result<CalibrationResult> {
        if color_limits.is_some() && color.is_none() {
            return Err(Error::InvalidColorIndex(
                "color limits given without a color index".into(),
            ));
        }
        let samples = self.calibration_samples(ids, instrumental, instrumental_errors, band, color)?;
        self.calibrator().constant(&samples, color_limits)
    }

    /// Zero point and color term in `band` from matched pairs. Pairs whose
    /// entry lacks either color band are dropped. With
    /// [`ColorFitOptions::weighted`], pairs are weighted by the instrumental
    /// and catalog errors together.
    pub fn cal_color(
        &self,
        ids: &[Option<CatalogId>],
        instrumental: &[f64],
        instrumental_errors: Option<&[f64]>,
        band: &str,
        color: &ColorIndex,
        options: &ColorFitOptions,
    ) -> Result<CalibrationResult> {
        let samples =
            self.calibration_samples(ids, instrumental, instrumental_errors, band, Some(color))?;
        self.calibrator().color(&samples, options)
    }

    fn calibrator(&self) -> Calibrator {
        Calibrator::new(self.config.clip).with_magnitude_limits(self.config.magnitude_limits)
    }

    fn check_band(&self, band: &str) -> Result<()> {
        if !self.store.is_empty() && !self.store.has_band(band) {
            return Err(Error::UnknownBand(band.to_string()));
        }
        Ok(())
    }

    /// Bind matched ids to catalog photometry, for callers that drive a
    /// [`Calibrator`] themselves. Unmatched rows get a NaN catalog magnitude,
    /// which the calibrator filters out.
    pub fn calibration_samples(
        &self,
        ids: &[Option<CatalogId>],
        instrumental: &[f64],
        instrumental_errors: Option<&[f64]>,
        band: &str,
        color: Option<&ColorIndex>,
    ) -> Result<Vec<CalibrationSample>> {
        if ids.len() != instrumental.len() {
            return Err(Error::LengthMismatch {
                left: ids.len(),
                right: instrumental.len(),
            });
        }
        if let Some(errors) = instrumental_errors {
            if errors.len() != instrumental.len() {
                return Err(Error::LengthMismatch {
                    left: instrumental.len(),
                    right: errors.len(),
                });
            }
        }
        self.check_band(band)?;
        if let Some(color) = color {
            self.check_band(&color.blue)?;
            self.check_band(&color.red)?;
        }

        let samples = ids
            .iter()
            .zip(instrumental)
            .enumerate()
            .map(|(i, (id, &inst))| {
                let entry = id.as_ref().and_then(|id| self.store.get(id));
                let phot = entry.map_or(Photometry::MISSING, |e| e.photometry(band));
                CalibrationSample {
                    instrumental: inst,
                    instrumental_error: instrumental_errors
                        .map(|errors| errors[i])
                        .filter(|e| e.is_finite()),
                    catalog: phot.magnitude,
                    catalog_error: Some(phot.error).filter(|e| e.is_finite()),
                    color: entry.zip(color).and_then(|(e, c)| c.value(e)),
                }
            })
            .collect();
        Ok(samples)
    }
}
