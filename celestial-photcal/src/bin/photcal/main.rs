//! photcal: photometric calibration from the command line
//!
//! Reads observation lists (CSV), keeps a reference-catalog cache up to date
//! with the chosen survey, and fits zero points and color terms.

mod cli;
mod observations;

use anyhow::{Context, Result};
use celestial_photcal::fetch::{Credentials, TapFetcher};
use celestial_photcal::{Catalog, CatalogConfig, CalibrationResult, ColorFitOptions};
use clap::Parser;
use cli::{CalibrateArgs, Cli, Commands, FetchArgs, ObsArgs, OutputFormat, XmatchArgs};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match &cli.command {
        Commands::Info => info(&cli),
        Commands::Search(args) => search(args, &cli),
        Commands::Fetch(args) => fetch(args, &cli),
        Commands::Xmatch(args) => xmatch(args, &cli),
        Commands::Calibrate(args) => calibrate(args, &cli),
    }
}

fn load_config(cli: &Cli) -> Result<CatalogConfig> {
    let mut config = match &cli.config {
        Some(path) => CatalogConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CatalogConfig::default(),
    };
    if let Some(cache) = &cli.cache {
        config.cache_path = Some(cache.clone());
    }
    if config.cache_path.is_none() {
        log::warn!("no --cache given, using a throwaway in-memory catalog");
    }
    Ok(config)
}

fn open(config: CatalogConfig) -> Result<Catalog> {
    let path = config.cache_path.clone();
    Catalog::open(config).with_context(|| match path {
        Some(p) => format!("opening catalog cache {}", p.display()),
        None => "creating in-memory catalog".to_string(),
    })
}

fn info(cli: &Cli) -> Result<()> {
    let catalog = open(load_config(cli)?)?;
    let store = catalog.store();
    match store.path() {
        Some(path) => println!("Cache: {}", path.display()),
        None => println!("Cache: <memory>"),
    }
    println!("Entries: {}", store.len());
    println!("Index order: {}", store.index_order());
    let bands: Vec<&str> = store.bands().collect();
    println!("Bands: {}", if bands.is_empty() { "-".to_string() } else { bands.join(", ") });
    Ok(())
}

fn search(args: &ObsArgs, cli: &Cli) -> Result<()> {
    let obs = observations::read(&args.observations)?;
    let catalog = open(load_config(cli)?)?;
    let (ids, _) = catalog.search(&obs.positions)?;
    println!(
        "{} cached entries cover {} observations",
        ids.len(),
        obs.positions.len()
    );
    Ok(())
}

fn fetch(args: &FetchArgs, cli: &Cli) -> Result<()> {
    let obs = observations::read(&args.obs.observations)?;
    let mut config = load_config(cli)?;
    if !args.bands.is_empty() {
        config.bands = args.bands.clone();
    }

    let mut fetcher = TapFetcher::new(cli.provider);
    if let (Ok(username), Ok(password)) = (
        std::env::var("PHOTCAL_TAP_USER"),
        std::env::var("PHOTCAL_TAP_PASSWORD"),
    ) {
        fetcher = fetcher.with_credentials(Credentials { username, password });
    }
    let mut catalog = open(config)?.with_fetcher(Box::new(fetcher));

    let covered = catalog.coverage(&obs.positions)?;
    if let Some(min) = args.min_entries {
        if covered >= min {
            println!("Cache already holds {covered} entries in the field, not fetching");
            return Ok(());
        }
    }

    let summary = catalog
        .fetch_field(&obs.positions)
        .with_context(|| format!("fetching field from {}", cli.provider))?;
    println!(
        "Fetched {} entries from {}, {} new; cache now holds {}",
        summary.fetched,
        cli.provider,
        summary.inserted,
        catalog.store().len()
    );
    Ok(())
}

fn xmatch(args: &XmatchArgs, cli: &Cli) -> Result<()> {
    let obs = observations::read(&args.obs.observations)?;
    let mut config = load_config(cli)?;
    if let Some(radius) = args.radius {
        config.matching.match_radius_arcsec = radius;
    }
    config.matching.exclusive |= args.exclusive;
    let catalog = open(config)?;

    let (ids, seps) = catalog.xmatch(&obs.positions);
    match args.format {
        OutputFormat::Table => {
            for (i, (id, sep)) in ids.iter().zip(&seps).enumerate() {
                let p = obs.positions[i];
                match (id, sep) {
                    (Some(id), Some(sep)) => println!(
                        "{:4}: RA={:.6}° Dec={:+.6}° -> {:>20} ({:.3}\")",
                        i, p.ra, p.dec, id, sep
                    ),
                    _ => println!("{:4}: RA={:.6}° Dec={:+.6}° -> no match", i, p.ra, p.dec),
                }
            }
            let matched = ids.iter().flatten().count();
            println!("\n{} of {} observations matched", matched, ids.len());
        }
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = ids
                .iter()
                .zip(&seps)
                .enumerate()
                .map(|(i, (id, sep))| {
                    serde_json::json!({
                        "index": i,
                        "ra": obs.positions[i].ra,
                        "dec": obs.positions[i].dec,
                        "catalog_id": id,
                        "separation_arcsec": sep,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Csv => {
            println!("index,ra,dec,catalog_id,separation_arcsec");
            for (i, (id, sep)) in ids.iter().zip(&seps).enumerate() {
                println!(
                    "{},{:.8},{:.8},{},{}",
                    i,
                    obs.positions[i].ra,
                    obs.positions[i].dec,
                    id.as_ref().map(ToString::to_string).unwrap_or_default(),
                    sep.map(|s| format!("{s:.4}")).unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

fn calibrate(args: &CalibrateArgs, cli: &Cli) -> Result<()> {
    let obs = observations::read(&args.obs.observations)?;
    let mut config = load_config(cli)?;
    if let Some(radius) = args.radius {
        config.matching.match_radius_arcsec = radius;
    }
    let catalog = open(config)?;

    let (ids, _) = catalog.xmatch(&obs.positions);
    let matched = ids.iter().flatten().count();
    log::info!("{} of {} observations matched", matched, obs.positions.len());

    let result = match (&args.color, args.constant) {
        (Some(color), false) => {
            let options = ColorFitOptions {
                color_limits: args.color_limits,
                fixed_color_term: args.fixed_color_term,
                weighted: args.weighted,
            };
            catalog.cal_color(
                &ids,
                &obs.mags,
                obs.mag_errs.as_deref(),
                &args.band,
                color,
                &options,
            )
        }
        (color, _) => catalog.cal_constant(
            &ids,
            &obs.mags,
            obs.mag_errs.as_deref(),
            &args.band,
            color.as_ref(),
            args.color_limits,
        ),
    }
    .with_context(|| format!("calibrating to band {}", args.band))?;

    match args.format {
        OutputFormat::Table => print_table(&result, args),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Csv => print_csv(&result),
    }
    Ok(())
}

fn print_table(result: &CalibrationResult, args: &CalibrateArgs) {
    println!("Band:          {}", args.band);
    println!(
        "Zero point:    {:.4} ± {:.4} (median {:.4})",
        result.zero_point, result.uncertainty, result.zero_point_median
    );
    if let (Some(color), Some(term)) = (&args.color, result.color_term) {
        match result.color_term_uncertainty {
            Some(sigma) => println!("Color term:    {:.4} ± {:.4} ({})", term, sigma, color),
            None => println!("Color term:    {:.4} fixed ({})", term, color),
        }
    }
    println!("Scatter:       {:.4}", result.stdev);
    println!(
        "Stars used:    {} of {} ({} clip passes)",
        result.used_count(),
        result.used_mask.len(),
        result.iterations
    );
}

fn print_csv(result: &CalibrationResult) {
    println!("index,instrumental,catalog,color,calibrated,residual");
    for star in &result.stars {
        println!(
            "{},{:.4},{:.4},{},{:.4},{:.4}",
            star.index,
            star.instrumental,
            star.catalog,
            star.color.map(|c| format!("{c:.4}")).unwrap_or_default(),
            star.calibrated,
            star.residual
        );
    }
}
