//! CLI argument definitions for photcal

use celestial_photcal::fetch::Provider;
use celestial_photcal::ColorIndex;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "photcal")]
#[command(about = "Photometric calibration against a cached reference catalog")]
#[command(version)]
pub struct Cli {
    /// Catalog cache file (overrides the config file)
    #[arg(long, global = true)]
    pub cache: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Survey to fetch from: skymapper-dr2, skymapper-dr4, ps1-dr2, gaia-dr3, refcat2
    #[arg(long, global = true, default_value = "ps1-dr2")]
    pub provider: Provider,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print cache size and bands
    Info,

    /// Count cached entries covering an observation list
    Search(ObsArgs),

    /// Fetch the field around an observation list into the cache
    Fetch(FetchArgs),

    /// Match observations to cached catalog entries
    Xmatch(XmatchArgs),

    /// Fit a zero point (and color term) for an observation list
    Calibrate(CalibrateArgs),
}

#[derive(Parser)]
pub struct ObsArgs {
    /// Observation CSV with columns ra, dec, mag and optional mag_err
    pub observations: PathBuf,
}

#[derive(Parser)]
pub struct FetchArgs {
    #[command(flatten)]
    pub obs: ObsArgs,

    /// Skip the fetch when the cache already holds this many entries in the field
    #[arg(long)]
    pub min_entries: Option<usize>,

    /// Bands to request (default: all the survey offers)
    #[arg(long, value_delimiter = ',')]
    pub bands: Vec<String>,
}

#[derive(Parser)]
pub struct XmatchArgs {
    #[command(flatten)]
    pub obs: ObsArgs,

    /// Match radius in arcseconds
    #[arg(long)]
    pub radius: Option<f64>,

    /// One observation per catalog entry
    #[arg(long)]
    pub exclusive: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Parser)]
pub struct CalibrateArgs {
    #[command(flatten)]
    pub obs: ObsArgs,

    /// Catalog band to calibrate to
    #[arg(long)]
    pub band: String,

    /// Catalog color, e.g. g-r
    #[arg(long)]
    pub color: Option<ColorIndex>,

    /// Fit only a zero point; --color then acts as a filter with --color-limits
    #[arg(long)]
    pub constant: bool,

    /// Keep stars with color in LO,HI
    #[arg(long, value_parser = parse_limits)]
    pub color_limits: Option<(f64, f64)>,

    /// Hold the color term at this value
    #[arg(long, conflicts_with = "constant")]
    pub fixed_color_term: Option<f64>,

    /// Weight the color fit by magnitude errors
    #[arg(long, conflicts_with = "constant")]
    pub weighted: bool,

    /// Match radius in arcseconds
    #[arg(long)]
    pub radius: Option<f64>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

fn parse_limits(s: &str) -> Result<(f64, f64), String> {
    let (lo, hi) = s
        .split_once(',')
        .ok_or_else(|| format!("expected LO,HI, got '{s}'"))?;
    let lo: f64 = lo.trim().parse().map_err(|e| format!("bad lower limit: {e}"))?;
    let hi: f64 = hi.trim().parse().map_err(|e| format!("bad upper limit: {e}"))?;
    if lo > hi {
        return Err(format!("lower limit {lo} exceeds upper limit {hi}"));
    }
    Ok((lo, hi))
}
