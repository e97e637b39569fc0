#![deny(unused_crate_dependencies)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

mod analysis;
mod cli;
mod config;
mod error;
mod export;
mod fetch;
mod monitor;
mod parse;
mod store;

use std::{
    env,
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
    sync::Arc,
};

use chrono::{DateTime, Utc};

use crate::{
    analysis::AlertRules,
    cli::Command,
    config::Settings,
    export::Format,
    fetch::Fetcher,
    monitor::Monitor,
    store::{Catalog, SharedCatalog, Store},
};

pub use error::{Error, Result};

#[cfg(all(target_env = "musl", target_pointer_width = "64"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn config_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| env::var_os(config::PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_PATH))
}

fn alert_rules(settings: &Settings, threshold: Option<f64>, since: Option<DateTime<Utc>>) -> AlertRules {
    AlertRules {
        threshold_percent: threshold.unwrap_or(settings.alerts.threshold_percent),
        since,
        targets: settings.target_prices(),
    }
}

fn print_alerts(catalog: &Catalog, rules: &AlertRules) {
    let alerts = analysis::scan_alerts(catalog, rules);
    if alerts.is_empty() {
        println!("No price alerts (threshold {}%)", rules.threshold_percent);
    }
    for alert in alerts {
        println!("{alert}");
    }
}

async fn build_monitor(settings: &Settings) -> Result<Monitor> {
    let store = Store::from_settings(&settings.store).await?;
    let catalog = Arc::new(SharedCatalog::open(store).await?);
    Ok(Monitor::new(
        Fetcher::from_settings(&settings.fetch)?,
        catalog,
        monitor::targets(settings)?,
        settings.monitor.concurrency,
    ))
}

async fn load_catalog(settings: &Settings) -> Result<Catalog> {
    Store::from_settings(&settings.store).await?.load().await
}

fn export(catalog: &Catalog, format: Format, out: Option<PathBuf>, history: bool) -> Result<()> {
    let mut writer: Box<dyn Write> = match &out {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };
    match (format, history) {
        (Format::Csv, false) => export::write_products_csv(catalog, &mut writer)?,
        (Format::Csv, true) => export::write_history_csv(catalog, &mut writer)?,
        (Format::Json, _) => export::write_json(catalog, &mut writer)?,
    }
    writer.flush()?;
    if let Some(path) = out {
        log::info!("Wrote {} products to {}", catalog.len(), path.display());
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> core::result::Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let args = cli::parse(env::args().skip(1))?;
    if args.command == Command::Help {
        print!("{}", cli::HELP);
        return Ok(());
    }
    let path = config_path(args.config);
    let settings = Settings::load(&path)?;
    log::info!(
        "Loaded {} products on {} sites from {}",
        settings.products.len(),
        settings.sites.len(),
        path.display()
    );

    match args.command {
        Command::Run => {
            let started = Utc::now();
            let monitor = build_monitor(&settings).await?;
            let summary = monitor.run_once().await?;
            println!(
                "{} scraped, {} failed, {} price changes",
                summary.succeeded,
                summary.failed,
                summary.changes.len()
            );
            let catalog = monitor.catalog().get().await;
            print_alerts(&catalog, &alert_rules(&settings, None, Some(started)));
        }
        Command::Watch => {
            build_monitor(&settings)
                .await?
                .watch(settings.monitor.interval())
                .await?;
        }
        Command::Alerts { threshold } => {
            let catalog = load_catalog(&settings).await?;
            print_alerts(&catalog, &alert_rules(&settings, threshold, None));
        }
        Command::Report => {
            let catalog = load_catalog(&settings).await?;
            if let Some(at) = catalog.saved_at() {
                println!("Catalog of {} products, saved {at}", catalog.len());
            }
            let stats = analysis::summarize(&catalog);
            if stats.is_empty() {
                println!("No price history yet");
            }
            for line in stats {
                println!("{line}");
            }
        }
        Command::Export {
            format,
            out,
            history,
        } => {
            let catalog = load_catalog(&settings).await?;
            export(&catalog, format, out, history)?;
        }
        Command::Help => {}
    }
    Ok(())
}
