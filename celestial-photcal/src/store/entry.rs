//! Catalog rows: identifier, position, per-band photometry.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sky::{normalize_ra, SkyPosition};

use super::format::MAX_STRING_LEN;

/// Stable catalog identifier.
///
/// Ordered integers first (numerically), then strings (lexicographically).
/// The cross-matcher breaks ties with this order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CatalogId {
    Int(i64),
    Text(String),
}

impl fmt::Display for CatalogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogId::Int(id) => write!(f, "{id}"),
            CatalogId::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for CatalogId {
    fn from(id: i64) -> Self {
        CatalogId::Int(id)
    }
}

impl From<&str> for CatalogId {
    fn from(id: &str) -> Self {
        CatalogId::Text(id.to_string())
    }
}

impl From<String> for CatalogId {
    fn from(id: String) -> Self {
        CatalogId::Text(id)
    }
}

impl CatalogId {
    /// Integer when the text is the canonical decimal form of one,
    /// otherwise the text itself. Survey services return numeric ids as CSV
    /// text; zero-padded or signed forms like `007` stay text so they
    /// display as received.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        match trimmed.parse::<i64>() {
            Ok(id) if id.to_string() == trimmed => CatalogId::Int(id),
            _ => CatalogId::Text(trimmed.to_string()),
        }
    }
}

/// Magnitude and its 1-sigma error in one band. Either may be NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Photometry {
    pub magnitude: f64,
    pub error: f64,
}

impl Photometry {
    pub const MISSING: Photometry = Photometry {
        magnitude: f64::NAN,
        error: f64::NAN,
    };

    pub const fn new(magnitude: f64, error: f64) -> Self {
        Self { magnitude, error }
    }

    pub fn has_magnitude(&self) -> bool {
        self.magnitude.is_finite()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: CatalogId,
    pub ra: f64,
    pub dec: f64,
    pub photometry: BTreeMap<String, Photometry>,
}

impl CatalogEntry {
    pub fn new(id: impl Into<CatalogId>, ra: f64, dec: f64) -> Self {
        Self {
            id: id.into(),
            ra,
            dec,
            photometry: BTreeMap::new(),
        }
    }

    pub fn with_band(mut self, band: impl Into<String>, magnitude: f64, error: f64) -> Self {
        self.photometry
            .insert(band.into(), Photometry::new(magnitude, error));
        self
    }

    pub fn position(&self) -> SkyPosition {
        SkyPosition::new(self.ra, self.dec)
    }

    pub fn photometry(&self, band: &str) -> Photometry {
        self.photometry
            .get(band)
            .copied()
            .unwrap_or(Photometry::MISSING)
    }

    /// Finite magnitude in `band`, if any.
    pub fn magnitude(&self, band: &str) -> Option<f64> {
        self.photometry
            .get(band)
            .map(|p| p.magnitude)
            .filter(|m| m.is_finite())
    }

    /// Check the position and identifier, and wrap RA into `[0, 360)`.
    pub(crate) fn validated(mut self) -> Result<Self> {
        if !self.ra.is_finite() || !self.dec.is_finite() {
            return Err(Error::InvalidEntry {
                id: self.id,
                reason: format!("non-finite position ({}, {})", self.ra, self.dec),
            });
        }
        if !(-90.0..=90.0).contains(&self.dec) {
            return Err(Error::InvalidEntry {
                id: self.id,
                reason: format!("declination {} outside [-90, 90]", self.dec),
            });
        }
        if let CatalogId::Text(text) = &self.id {
            if text.is_empty() {
                return Err(Error::InvalidEntry {
                    id: self.id,
                    reason: "empty identifier".into(),
                });
            }
            if text.len() > MAX_STRING_LEN {
                return Err(Error::InvalidEntry {
                    reason: format!(
                        "identifier is {} bytes, limit is {MAX_STRING_LEN}",
                        text.len()
                    ),
                    id: self.id,
                });
            }
        }
        if let Some(band) = self.photometry.keys().find(|b| b.len() > MAX_STRING_LEN) {
            return Err(Error::InvalidEntry {
                reason: format!("band name is {} bytes, limit is {MAX_STRING_LEN}", band.len()),
                id: self.id,
            });
        }
        self.ra = normalize_ra(self.ra);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_order_integers_before_text() {
        let mut ids = vec![
            CatalogId::from("b"),
            CatalogId::from(10),
            CatalogId::from("a"),
            CatalogId::from(-3),
            CatalogId::from(2),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                CatalogId::Int(-3),
                CatalogId::Int(2),
                CatalogId::Int(10),
                CatalogId::Text("a".into()),
                CatalogId::Text("b".into()),
            ]
        );
    }

    #[test]
    fn test_id_parse_and_display() {
        assert_eq!(CatalogId::parse(" 12345 "), CatalogId::Int(12345));
        assert_eq!(
            CatalogId::parse("J0001+0001"),
            CatalogId::Text("J0001+0001".into())
        );
        assert_eq!(CatalogId::parse("-42"), CatalogId::Int(-42));
        assert_eq!(CatalogId::Int(7).to_string(), "7");
        assert_eq!(CatalogId::from("x").to_string(), "x");
    }

    #[test]
    fn test_id_json_is_untagged() {
        let json = serde_json::to_string(&vec![CatalogId::Int(1), CatalogId::from("s")]).unwrap();
        assert_eq!(json, r#"[1,"s"]"#);
    }

    #[test]
    fn test_missing_band() {
        let entry = CatalogEntry::new(1, 10.0, 10.0).with_band("g", 15.0, 0.01);
        assert_eq!(entry.magnitude("g"), Some(15.0));
        assert_eq!(entry.magnitude("r"), None);
        assert!(entry.photometry("r").magnitude.is_nan());
    }

    #[test]
    fn test_nan_magnitude_is_not_reported() {
        let entry = CatalogEntry::new(1, 10.0, 10.0).with_band("g", f64::NAN, 0.01);
        assert_eq!(entry.magnitude("g"), None);
    }

    #[test]
    fn test_validated_wraps_ra() {
        let entry = CatalogEntry::new(1, -0.5, 10.0).validated().unwrap();
        assert_eq!(entry.ra, 359.5);
        let entry = CatalogEntry::new(2, 360.0, 10.0).validated().unwrap();
        assert_eq!(entry.ra, 0.0);
    }

    #[test]
    fn test_validated_rejects_bad_positions() {
        assert!(matches!(
            CatalogEntry::new(1, f64::NAN, 0.0).validated(),
            Err(Error::InvalidEntry { .. })
        ));
        assert!(matches!(
            CatalogEntry::new(1, 0.0, 91.0).validated(),
            Err(Error::InvalidEntry { .. })
        ));
        assert!(CatalogEntry::new("", 0.0, 0.0).validated().is_err());
    }

    #[test]
    fn test_padded_ids_stay_text() {
        for text in ["007", "+5", "-0", "00"] {
            let id = CatalogId::parse(text);
            assert_eq!(id, CatalogId::Text(text.into()), "{text}");
            assert_eq!(id.to_string(), text);
        }
        assert_eq!(CatalogId::parse("0"), CatalogId::Int(0));
    }

    #[test]
    fn test_validated_rejects_oversized_names() {
        let long = "x".repeat(MAX_STRING_LEN + 1);
        assert!(matches!(
            CatalogEntry::new(long.as_str(), 0.0, 0.0).validated(),
            Err(Error::InvalidEntry { .. })
        ));
        assert!(CatalogEntry::new("x".repeat(MAX_STRING_LEN), 0.0, 0.0)
            .validated()
            .is_ok());
        assert!(CatalogEntry::new(1, 0.0, 0.0)
            .with_band(long, 15.0, 0.01)
            .validated()
            .is_err());
    }
}
