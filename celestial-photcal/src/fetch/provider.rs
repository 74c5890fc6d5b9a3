//! Survey descriptions for the TAP adapters.
//!
//! Each provider knows its service endpoint, source table, identifier and
//! position columns, and the magnitude/error expressions per band. Queries
//! alias every selected column (`id`, `ra`, `dec`, `mag_<k>`, `err_<k>`) so
//! that responses from all surveys parse the same way.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::sky::Region;
use crate::store::{CatalogEntry, CatalogId, Photometry};

use super::{FetchError, FieldRequest};

/// Magnitude and error column expressions for one band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandColumns {
    pub band: &'static str,
    pub magnitude: &'static str,
    pub error: &'static str,
}

const fn band(band: &'static str, magnitude: &'static str, error: &'static str) -> BandColumns {
    BandColumns {
        band,
        magnitude,
        error,
    }
}

const SKYMAPPER_BANDS: &[BandColumns] = &[
    band("u", "u_psf", "e_u_psf"),
    band("v", "v_psf", "e_v_psf"),
    band("g", "g_psf", "e_g_psf"),
    band("r", "r_psf", "e_r_psf"),
    band("i", "i_psf", "e_i_psf"),
    band("z", "z_psf", "e_z_psf"),
];

const PANSTARRS_BANDS: &[BandColumns] = &[
    band("g", "gMeanPSFMag", "gMeanPSFMagErr"),
    band("r", "rMeanPSFMag", "rMeanPSFMagErr"),
    band("i", "iMeanPSFMag", "iMeanPSFMagErr"),
    band("z", "zMeanPSFMag", "zMeanPSFMagErr"),
    band("y", "yMeanPSFMag", "yMeanPSFMagErr"),
];

// Gaia publishes flux signal-to-noise rather than magnitude errors;
// 2.5 / ln(10) converts.
const GAIA_BANDS: &[BandColumns] = &[
    band("G", "phot_g_mean_mag", "1.0857 / phot_g_mean_flux_over_error"),
    band("BP", "phot_bp_mean_mag", "1.0857 / phot_bp_mean_flux_over_error"),
    band("RP", "phot_rp_mean_mag", "1.0857 / phot_rp_mean_flux_over_error"),
];

// ATLAS-RefCat2 through the VizieR TAP copy; errors are already in mag.
const REFCAT2_BANDS: &[BandColumns] = &[
    band("g", "gmag", "e_gmag"),
    band("r", "rmag", "e_rmag"),
    band("i", "imag", "e_imag"),
    band("z", "zmag", "e_zmag"),
];

/// Pan-STARRS1 marks missing photometry with this value.
const PANSTARRS_MISSING: f64 = -999.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    SkyMapperDr2,
    SkyMapperDr4,
    PanStarrs1Dr2,
    GaiaDr3,
    RefCat2,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::SkyMapperDr2,
        Provider::SkyMapperDr4,
        Provider::PanStarrs1Dr2,
        Provider::GaiaDr3,
        Provider::RefCat2,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Provider::SkyMapperDr2 => "skymapper-dr2",
            Provider::SkyMapperDr4 => "skymapper-dr4",
            Provider::PanStarrs1Dr2 => "ps1-dr2",
            Provider::GaiaDr3 => "gaia-dr3",
            Provider::RefCat2 => "refcat2",
        }
    }

    /// Synchronous TAP endpoint.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Provider::SkyMapperDr2 | Provider::SkyMapperDr4 => {
                "https://api.skymapper.nci.org.au/public/tap/sync"
            }
            Provider::PanStarrs1Dr2 => "https://vao.stsci.edu/PS1DR2/tapservice.aspx/sync",
            Provider::GaiaDr3 => "https://gea.esac.esa.int/tap-server/tap/sync",
            Provider::RefCat2 => "https://tapvizier.cds.unistra.fr/TAPVizieR/tap/sync",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Provider::SkyMapperDr2 => "dr2.master",
            Provider::SkyMapperDr4 => "dr4.master",
            Provider::PanStarrs1Dr2 => "dbo.MeanObjectView",
            Provider::GaiaDr3 => "gaiadr3.gaia_source",
            Provider::RefCat2 => "\"J/ApJ/867/105/refcat2\"",
        }
    }

    fn id_column(&self) -> &'static str {
        match self {
            Provider::SkyMapperDr2 | Provider::SkyMapperDr4 => "object_id",
            Provider::PanStarrs1Dr2 => "objID",
            Provider::GaiaDr3 => "source_id",
            Provider::RefCat2 => "objid",
        }
    }

    fn position_columns(&self) -> (&'static str, &'static str) {
        match self {
            Provider::SkyMapperDr2 | Provider::SkyMapperDr4 => ("raj2000", "dej2000"),
            Provider::PanStarrs1Dr2 => ("raMean", "decMean"),
            Provider::GaiaDr3 => ("ra", "dec"),
            Provider::RefCat2 => ("RA_ICRS", "DE_ICRS"),
        }
    }

    pub fn bands(&self) -> &'static [BandColumns] {
        match self {
            Provider::SkyMapperDr2 | Provider::SkyMapperDr4 => SKYMAPPER_BANDS,
            Provider::PanStarrs1Dr2 => PANSTARRS_BANDS,
            Provider::GaiaDr3 => GAIA_BANDS,
            Provider::RefCat2 => REFCAT2_BANDS,
        }
    }

    fn missing_sentinel(&self) -> Option<f64> {
        match self {
            Provider::PanStarrs1Dr2 => Some(PANSTARRS_MISSING),
            _ => None,
        }
    }

    /// Columns for the requested bands, in request order. Bands the survey
    /// does not offer are skipped; an empty request selects every band.
    pub fn select_bands(&self, requested: &[String]) -> Result<Vec<&'static BandColumns>, FetchError> {
        if requested.is_empty() {
            return Ok(self.bands().iter().collect());
        }

        let mut selected = Vec::with_capacity(requested.len());
        for name in requested {
            match self.bands().iter().find(|b| b.band == name.as_str()) {
                Some(columns) if !selected.contains(&columns) => selected.push(columns),
                Some(_) => {}
                None => log::warn!("{} has no band '{}', skipping it", self.name(), name),
            }
        }

        if selected.is_empty() {
            let offered: Vec<&str> = self.bands().iter().map(|b| b.band).collect();
            return Err(FetchError::Unsupported {
                service: self.name().to_string(),
                message: format!(
                    "none of the requested bands {:?} are offered (available: {})",
                    requested,
                    offered.join(", ")
                ),
            });
        }
        Ok(selected)
    }

    /// ADQL selecting every source in the request region.
    pub fn adql(&self, request: &FieldRequest) -> Result<String, FetchError> {
        let bands = self.select_bands(&request.bands)?;
        let (ra, dec) = self.position_columns();

        let mut columns = vec![
            format!("{} AS id", self.id_column()),
            format!("{ra} AS ra"),
            format!("{dec} AS dec"),
        ];
        for (k, b) in bands.iter().enumerate() {
            columns.push(format!("{} AS mag_{k}", b.magnitude));
            columns.push(format!("{} AS err_{k}", b.error));
        }

        Ok(format!(
            "SELECT {} FROM {} WHERE CONTAINS(POINT('ICRS', {ra}, {dec}), {}) = 1",
            columns.join(", "),
            self.table(),
            adql_shape(&request.region)
        ))
    }

    /// Parse a CSV response to [`Provider::adql`].
    ///
    /// Fields may be double-quoted, with commas and doubled quotes inside.
    /// Quoted fields do not span lines. Rows without an identifier or a parseable position are skipped.
    /// Empty, `null` and `NaN` fields, and the survey's missing-value
    /// sentinel, become NaN; bands with neither magnitude nor error are left
    /// out of the entry.
    pub fn parse_csv(&self, body: &str, request: &FieldRequest) -> Result<Vec<CatalogEntry>, FetchError> {
        let bands = self.select_bands(&request.bands)?;
        let parse_error = |message: String| FetchError::Parse {
            service: self.name().to_string(),
            message,
        };

        let mut lines = body.lines().filter(|l| !l.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| parse_error("empty response".into()))?;
        if header.trim_start().starts_with('<') {
            return Err(parse_error(format!(
                "expected CSV, got markup: {}",
                snippet(body)
            )));
        }

        let col_map: HashMap<String, usize> = split_fields(header)
            .into_iter()
            .enumerate()
            .map(|(idx, col)| (col.to_ascii_lowercase(), idx))
            .collect();
        let require = |name: &str| {
            col_map
                .get(name)
                .copied()
                .ok_or_else(|| parse_error(format!("missing column: {name}")))
        };

        let id_idx = require("id")?;
        let ra_idx = require("ra")?;
        let dec_idx = require("dec")?;
        let band_idx = (0..bands.len())
            .map(|k| Ok((require(&format!("mag_{k}"))?, require(&format!("err_{k}"))?)))
            .collect::<Result<Vec<_>, FetchError>>()?;

        let mut entries = Vec::new();
        let mut skipped = 0usize;
        for line in lines {
            let fields = split_fields(line);
            let field = |idx: usize| fields.get(idx).map_or("", String::as_str);

            let id = field(id_idx);
            let (Some(ra), Some(dec)) = (parse_value(field(ra_idx)), parse_value(field(dec_idx)))
            else {
                skipped += 1;
                continue;
            };
            if id.is_empty() || !ra.is_finite() || !dec.is_finite() {
                skipped += 1;
                continue;
            }

            let mut entry = CatalogEntry::new(CatalogId::parse(id), ra, dec);
            for (b, &(mag_idx, err_idx)) in bands.iter().zip(&band_idx) {
                let magnitude = self.photometric_value(field(mag_idx));
                let error = self.photometric_value(field(err_idx));
                if magnitude.is_nan() && error.is_nan() {
                    continue;
                }
                entry
                    .photometry
                    .insert(b.band.to_string(), Photometry::new(magnitude, error));
            }
            entries.push(entry);
        }

        if skipped > 0 {
            log::warn!("{}: skipped {} malformed rows", self.name(), skipped);
        }
        Ok(entries)
    }

    fn photometric_value(&self, text: &str) -> f64 {
        match parse_value(text) {
            Some(v) if self.missing_sentinel() == Some(v) => f64::NAN,
            Some(v) if v.is_finite() => v,
            _ => f64::NAN,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skymapper-dr2" | "skymapper2" => Ok(Provider::SkyMapperDr2),
            "skymapper-dr4" | "skymapper4" | "skymapper" => Ok(Provider::SkyMapperDr4),
            "ps1-dr2" | "ps1" | "panstarrs" | "panstarrs1" => Ok(Provider::PanStarrs1Dr2),
            "gaia-dr3" | "gaia" => Ok(Provider::GaiaDr3),
            "refcat2" | "refcat" | "atlas-refcat2" => Ok(Provider::RefCat2),
            _ => {
                let known: Vec<&str> = Provider::ALL.iter().map(Provider::name).collect();
                Err(format!("unknown provider '{}' (expected one of: {})", s, known.join(", ")))
            }
        }
    }
}

fn adql_shape(region: &Region) -> String {
    match region {
        Region::Cap(cap) => format!(
            "CIRCLE('ICRS', {:.8}, {:.8}, {:.8})",
            cap.center.ra, cap.center.dec, cap.radius_deg
        ),
        Region::Polygon(polygon) => {
            let coords: Vec<String> = polygon
                .vertices()
                .iter()
                .map(|v| format!("{:.8}, {:.8}", v.ra, v.dec))
                .collect();
            format!("POLYGON('ICRS', {})", coords.join(", "))
        }
    }
}

/// Split one CSV record on commas outside double quotes. Fields are
/// trimmed and unquoted; `""` inside quotes is a literal quote.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

fn parse_value(text: &str) -> Option<f64> {
    if text.is_empty() || text.eq_ignore_ascii_case("null") {
        return Some(f64::NAN);
    }
    text.parse::<f64>().ok()
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sky::SkyPosition;

    fn cap_request(bands: &[&str]) -> FieldRequest {
        FieldRequest {
            region: Region::cap(SkyPosition::new(1.1, 1.1), 0.15).unwrap(),
            bands: bands.iter().map(|b| b.to_string()).collect(),
        }
    }

    #[test]
    fn test_adql_cap() {
        let adql = Provider::SkyMapperDr4.adql(&cap_request(&["g", "r"])).unwrap();
        assert!(adql.starts_with("SELECT object_id AS id, raj2000 AS ra, dej2000 AS dec"));
        assert!(adql.contains("g_psf AS mag_0, e_g_psf AS err_0, r_psf AS mag_1, e_r_psf AS err_1"));
        assert!(adql.contains("FROM dr4.master"));
        assert!(adql.contains(
            "CONTAINS(POINT('ICRS', raj2000, dej2000), CIRCLE('ICRS', 1.10000000, 1.10000000, 0.15000000)) = 1"
        ));
    }

    #[test]
    fn test_adql_polygon() {
        let corners = [
            SkyPosition::new(1.0, 1.0),
            SkyPosition::new(1.2, 1.0),
            SkyPosition::new(1.2, 1.2),
            SkyPosition::new(1.0, 1.2),
        ];
        let request = FieldRequest {
            region: Region::polygon(&corners).unwrap(),
            bands: vec![],
        };
        let adql = Provider::GaiaDr3.adql(&request).unwrap();
        assert!(adql.contains("POLYGON('ICRS', 1.00000000, 1.00000000, 1.20000000, 1.00000000"));
        assert!(adql.contains("1.0857 / phot_bp_mean_flux_over_error AS err_1"));
        assert!(adql.contains("FROM gaiadr3.gaia_source"));
    }

    #[test]
    fn test_band_selection() {
        let bands = Provider::PanStarrs1Dr2
            .select_bands(&["r".into(), "u".into(), "r".into(), "g".into()])
            .unwrap();
        let names: Vec<_> = bands.iter().map(|b| b.band).collect();
        assert_eq!(names, vec!["r", "g"]);

        assert!(matches!(
            Provider::GaiaDr3.select_bands(&["g".into()]),
            Err(FetchError::Unsupported { .. })
        ));
        assert_eq!(Provider::GaiaDr3.select_bands(&[]).unwrap().len(), 3);
    }

    #[test]
    fn test_parse_csv() {
        let body = "\"id\",\"ra\",\"dec\",\"mag_0\",\"err_0\",\"mag_1\",\"err_1\"\n\
                    108411011108471,1.10,1.05,15.20,0.010,-999,-999\n\
                    108411011108472,1.12,1.07,,,16.1,0.02\n\
                    108411011108473,,1.07,15.0,0.01,16.0,0.02\n\
                    \n";
        let entries = Provider::PanStarrs1Dr2.parse_csv(body, &cap_request(&["g", "r"])).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].id, CatalogId::Int(108411011108471));
        assert_eq!(entries[0].magnitude("g"), Some(15.2));
        assert!(!entries[0].photometry.contains_key("r"));

        assert_eq!(entries[1].magnitude("g"), None);
        assert_eq!(entries[1].magnitude("r"), Some(16.1));
    }

    #[test]
    fn test_parse_csv_quoted_commas() {
        let body = "\"id\",\"ra\",\"dec\",\"mag_0\",\"err_0\"\n\
                    \"SMSS J1, \"\"a\"\"\",10.0,-5.0,\"15.5\",0.01\n\
                    \"plain\", 10.1 , -5.1 ,16.0,0.02\n";
        let entries = Provider::SkyMapperDr4.parse_csv(body, &cap_request(&["g"])).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, CatalogId::from("SMSS J1, \"a\""));
        assert_eq!(entries[0].ra, 10.0);
        assert_eq!(entries[0].magnitude("g"), Some(15.5));
        assert_eq!(entries[1].id, CatalogId::from("plain"));
        assert_eq!(entries[1].dec, -5.1);
    }

    #[test]
    fn test_split_fields() {
        assert_eq!(split_fields("a, b ,c"), vec!["a", "b", "c"]);
        assert_eq!(split_fields("\"x,y\",,z"), vec!["x,y", "", "z"]);
        assert_eq!(split_fields(""), vec![""]);
    }

    #[test]
    fn test_adql_refcat2() {
        let adql = Provider::RefCat2.adql(&cap_request(&["r", "i"])).unwrap();
        assert!(adql.starts_with("SELECT objid AS id, RA_ICRS AS ra, DE_ICRS AS dec"));
        assert!(adql.contains("rmag AS mag_0, e_rmag AS err_0, imag AS mag_1, e_imag AS err_1"));
        assert!(adql.contains("FROM \"J/ApJ/867/105/refcat2\""));
        assert!(adql.contains("CONTAINS(POINT('ICRS', RA_ICRS, DE_ICRS), CIRCLE('ICRS'"));
        assert!(Provider::RefCat2.endpoint().contains("tapvizier"));
    }

    #[test]
    fn test_parse_csv_refcat2() {
        let body = "id,ra,dec,mag_0,err_0,mag_1,err_1,mag_2,err_2,mag_3,err_3\n\
                    4295806720,10.01,-5.02,15.110,0.004,14.620,0.005,14.401,0.006,,\n\
                    4295806721,10.02,-5.03,17.300,0.012,16.800,0.010,16.550,0.011,16.420,0.020\n";
        let entries = Provider::RefCat2.parse_csv(body, &cap_request(&[])).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, CatalogId::Int(4295806720));
        assert_eq!(entries[0].magnitude("g"), Some(15.11));
        assert_eq!(entries[0].photometry("r").error, 0.005);
        assert!(!entries[0].photometry.contains_key("z"));
        assert_eq!(entries[1].magnitude("z"), Some(16.42));
        assert_eq!("atlas-refcat2".parse::<Provider>().unwrap(), Provider::RefCat2);
    }

    #[test]
    fn test_parse_csv_header_case_and_text_ids() {
        let body = "ID,RA,DEC,MAG_0,ERR_0\nGaia-1,10.0,-5.0,12.5,0.003\n";
        let entries = Provider::GaiaDr3.parse_csv(body, &cap_request(&["G"])).unwrap();
        assert_eq!(entries[0].id, CatalogId::from("Gaia-1"));
        assert_eq!(entries[0].magnitude("G"), Some(12.5));
    }

    #[test]
    fn test_parse_csv_header_only_is_empty() {
        let body = "id,ra,dec,mag_0,err_0\n";
        let entries = Provider::SkyMapperDr2.parse_csv(body, &cap_request(&["g"])).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_parse_csv_errors() {
        let request = cap_request(&["g"]);
        assert!(matches!(
            Provider::SkyMapperDr2.parse_csv("", &request),
            Err(FetchError::Parse { .. })
        ));
        assert!(matches!(
            Provider::SkyMapperDr2.parse_csv("id,ra,dec\n1,2,3\n", &request),
            Err(FetchError::Parse { .. })
        ));
        let votable = "<?xml version=\"1.0\"?><VOTABLE><INFO name=\"QUERY_STATUS\" value=\"ERROR\"/></VOTABLE>";
        let err = Provider::SkyMapperDr2.parse_csv(votable, &request).unwrap_err();
        assert!(err.to_string().contains("markup"));
    }

    #[test]
    fn test_provider_names_round_trip() {
        for provider in Provider::ALL {
            assert_eq!(provider.name().parse::<Provider>().unwrap(), provider);
        }
        assert_eq!("PS1".parse::<Provider>().unwrap(), Provider::PanStarrs1Dr2);
        assert!("sdss".parse::<Provider>().is_err());
    }
}
