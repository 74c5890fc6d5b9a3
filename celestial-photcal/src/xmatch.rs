//! Cross-matching observed positions against the catalog cache.
//!
//! Each observation gets the nearest cached entry within the match radius.
//! Entries whose separation is within a small tolerance of the minimum are
//! treated as equidistant, and the lowest [`CatalogId`] among them wins, so
//! the result never depends on storage order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sky::{Region, SkyPosition, ARCSEC_PER_DEG};
use crate::store::{CatalogId, EntryStore};

pub const DEFAULT_MATCH_RADIUS_ARCSEC: f64 = 1.5;
pub const DEFAULT_TIE_TOLERANCE_ARCSEC: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Largest accepted separation, in arcseconds.
    pub match_radius_arcsec: f64,
    /// Separations closer than this to the minimum count as ties.
    pub tie_tolerance_arcsec: f64,
    /// Give each catalog entry to at most one observation.
    pub exclusive: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            match_radius_arcsec: DEFAULT_MATCH_RADIUS_ARCSEC,
            tie_tolerance_arcsec: DEFAULT_TIE_TOLERANCE_ARCSEC,
            exclusive: false,
        }
    }
}

impl MatchConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.match_radius_arcsec.is_finite() || self.match_radius_arcsec <= 0.0 {
            return Err(Error::Config(format!(
                "match radius must be positive, got {}",
                self.match_radius_arcsec
            )));
        }
        if !self.tie_tolerance_arcsec.is_finite() || self.tie_tolerance_arcsec < 0.0 {
            return Err(Error::Config(format!(
                "tie tolerance must be non-negative, got {}",
                self.tie_tolerance_arcsec
            )));
        }
        Ok(())
    }
}

/// Outcome for one observation. `separation_arcsec` is set iff
/// `catalog_id` is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub observation_index: usize,
    pub catalog_id: Option<CatalogId>,
    pub separation_arcsec: Option<f64>,
}

impl Match {
    fn unmatched(observation_index: usize) -> Self {
        Self {
            observation_index,
            catalog_id: None,
            separation_arcsec: None,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.catalog_id.is_some()
    }
}

/// Match every observation against `store`, one [`Match`] per observation in
/// input order. Invalid positions come back unmatched.
pub fn match_positions(
    observations: &[SkyPosition],
    store: &EntryStore,
    config: &MatchConfig,
) -> Vec<Match> {
    let mut matches: Vec<Match> = observations
        .iter()
        .enumerate()
        .map(|(i, obs)| nearest(i, obs, store, config))
        .collect();

    if config.exclusive {
        enforce_exclusive(&mut matches);
    }

    let matched = matches.iter().filter(|m| m.is_matched()).count();
    log::debug!(
        "matched {}/{} observations within {}\"",
        matched,
        observations.len(),
        config.match_radius_arcsec
    );
    matches
}

fn nearest(index: usize, obs: &SkyPosition, store: &EntryStore, config: &MatchConfig) -> Match {
    if !obs.is_valid() {
        log::debug!("observation {} has invalid position ({}, {})", index, obs.ra, obs.dec);
        return Match::unmatched(index);
    }
    let Ok(region) = Region::cap(*obs, config.match_radius_arcsec / ARCSEC_PER_DEG) else {
        return Match::unmatched(index);
    };

    // In id order, so the first candidate inside the tie band is the winner.
    let candidates: Vec<(&CatalogId, f64)> = store
        .entries_within(&region)
        .into_iter()
        .map(|entry| (&entry.id, obs.separation_arcsec(&entry.position())))
        .filter(|&(_, sep)| sep <= config.match_radius_arcsec)
        .collect();

    let Some(min_sep) = candidates.iter().map(|&(_, sep)| sep).min_by(f64::total_cmp) else {
        return Match::unmatched(index);
    };

    let cutoff = min_sep + config.tie_tolerance_arcsec;
    match candidates.into_iter().find(|&(_, sep)| sep <= cutoff) {
        Some((id, sep)) => Match {
            observation_index: index,
            catalog_id: Some(id.clone()),
            separation_arcsec: Some(sep),
        },
        None => Match::unmatched(index),
    }
}

/// When several observations claim one id, the smallest separation keeps it
/// (equal separations: lowest observation index). Losers become unmatched
/// and are not re-matched.
fn enforce_exclusive(matches: &mut [Match]) {
    let mut owner: BTreeMap<CatalogId, usize> = BTreeMap::new();
    let mut released = Vec::new();

    for i in 0..matches.len() {
        let (Some(id), Some(sep)) = (matches[i].catalog_id.clone(), matches[i].separation_arcsec)
        else {
            continue;
        };
        match owner.get(&id).copied() {
            None => {
                owner.insert(id, i);
            }
            Some(holder) => {
                let holder_sep = matches[holder].separation_arcsec.unwrap_or(f64::INFINITY);
                if sep < holder_sep {
                    released.push(holder);
                    owner.insert(id, i);
                } else {
                    released.push(i);
                }
            }
        }
    }

    if !released.is_empty() {
        log::debug!("exclusive matching released {} observations", released.len());
    }
    for i in released {
        matches[i] = Match::unmatched(matches[i].observation_index);
    }
}
