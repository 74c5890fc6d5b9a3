//! Observation list reader: CSV with a header naming `ra`, `dec`, `mag` and
//! optionally `mag_err`, in any column order.

use anyhow::{anyhow, bail, Context, Result};
use celestial_photcal::SkyPosition;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct Observations {
    pub positions: Vec<SkyPosition>,
    pub mags: Vec<f64>,
    pub mag_errs: Option<Vec<f64>>,
}

pub fn read(path: &Path) -> Result<Observations> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse(&text).with_context(|| format!("parsing {}", path.display()))
}

pub fn parse(text: &str) -> Result<Observations> {
    let mut lines = text
        .lines()
        .map(str::trim)
        .enumerate()
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'));

    let (_, header) = lines.next().ok_or_else(|| anyhow!("empty observation file"))?;
    let columns: HashMap<String, usize> = header
        .split(',')
        .enumerate()
        .map(|(i, name)| (name.trim().to_ascii_lowercase(), i))
        .collect();
    let column = |name: &str| {
        columns
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("missing column '{name}' in header"))
    };
    let (ra_col, dec_col, mag_col) = (column("ra")?, column("dec")?, column("mag")?);
    let err_col = columns.get("mag_err").copied();

    let mut obs = Observations {
        positions: Vec::new(),
        mags: Vec::new(),
        mag_errs: err_col.map(|_| Vec::new()),
    };

    for (line_no, line) in lines {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let get = |col: usize| -> Result<f64> {
            let field = fields
                .get(col)
                .ok_or_else(|| anyhow!("line {}: too few columns", line_no + 1))?;
            if field.is_empty() {
                return Ok(f64::NAN);
            }
            field
                .parse()
                .with_context(|| format!("line {}: bad number '{}'", line_no + 1, field))
        };

        obs.positions.push(SkyPosition::new(get(ra_col)?, get(dec_col)?));
        obs.mags.push(get(mag_col)?);
        if let (Some(errs), Some(col)) = (obs.mag_errs.as_mut(), err_col) {
            errs.push(get(col)?);
        }
    }

    if obs.positions.is_empty() {
        bail!("no observations");
    }
    Ok(obs)
}
