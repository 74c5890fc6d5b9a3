//! Catalog configuration, loadable from JSON. Every field has a default, so
//! a config file only needs the settings it changes.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::calibrate::ClipConfig;
use crate::error::{Error, Result};
use crate::sky::healpix::MAX_ORDER;
use crate::store::DEFAULT_INDEX_ORDER;
use crate::xmatch::MatchConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Cache file; `None` keeps the cache in memory.
    pub cache_path: Option<PathBuf>,
    /// HEALPix order of the spatial index.
    pub index_order: u32,
    /// Bands requested from the fetcher. Empty asks for all.
    pub bands: Vec<String>,
    pub matching: MatchConfig,
    pub clip: ClipConfig,
    /// Calibrate only with catalog magnitudes in `[lo, hi]`.
    pub magnitude_limits: Option<(f64, f64)>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            cache_path: None,
            index_order: DEFAULT_INDEX_ORDER,
            bands: Vec::new(),
            matching: MatchConfig::default(),
            clip: ClipConfig::default(),
            magnitude_limits: None,
        }
    }
}

impl CatalogConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_bands<I, S>(mut self, bands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bands = bands.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.index_order > MAX_ORDER {
            return Err(Error::Config(format!(
                "index_order {} exceeds the maximum of {}",
                self.index_order, MAX_ORDER
            )));
        }
        self.matching.validate()?;
        self.clip.validate()?;
        if let Some((lo, hi)) = self.magnitude_limits {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(Error::Config(format!(
                    "magnitude_limits lower bound {lo} exceeds upper bound {hi}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CatalogConfig::default();
        assert_eq!(config.index_order, 8);
        assert_eq!(config.matching.match_radius_arcsec, 1.5);
        assert_eq!(config.clip.sigma, 3.0);
        assert_eq!(config.clip.max_iterations, 5);
        assert!(config.cache_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config: CatalogConfig = serde_json::from_str(
            r#"{"bands": ["g", "r"], "matching": {"match_radius_arcsec": 2.0}, "magnitude_limits": [14.0, 18.0]}"#,
        )
        .unwrap();
        assert_eq!(config.bands, vec!["g", "r"]);
        assert_eq!(config.matching.match_radius_arcsec, 2.0);
        assert_eq!(config.matching.tie_tolerance_arcsec, 1e-6);
        assert_eq!(config.magnitude_limits, Some((14.0, 18.0)));
        assert_eq!(config.index_order, 8);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photcal.json");
        fs::write(&path, r#"{"cache_path": "/tmp/cat.pcat", "clip": {"sigma": 2.5}}"#).unwrap();
        let config = CatalogConfig::from_file(&path).unwrap();
        assert_eq!(config.cache_path, Some(PathBuf::from("/tmp/cat.pcat")));
        assert_eq!(config.clip.sigma, 2.5);
        assert_eq!(config.clip.max_iterations, 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"index_order": 40}"#).unwrap();
        assert!(matches!(CatalogConfig::from_file(&path), Err(Error::Config(_))));

        fs::write(&path, r#"{"magnitude_limits": [18.0, 14.0]}"#).unwrap();
        assert!(CatalogConfig::from_file(&path).is_err());

        fs::write(&path, "{not json").unwrap();
        assert!(matches!(CatalogConfig::from_file(&path), Err(Error::Config(_))));
    }
}
