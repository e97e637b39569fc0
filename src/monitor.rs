use std::{sync::Arc, time::Duration};

use chrono::Utc;
use futures::{stream, StreamExt};
use url::Url;

use crate::{
    config::Settings,
    fetch::{FetchReport, Fetcher, ReqwestTransport, Transport},
    parse::Extractor,
    store::{PriceChange, ScrapeLogEntry, ScrapeStatus, SharedCatalog},
};

/// One configured product with the extractor of its site.
#[derive(Debug, Clone)]
pub struct Target {
    pub url: Url,
    pub site: String,
    pub extractor: Arc<Extractor>,
}

#[derive(Debug, Default)]
pub struct PassSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub changes: Vec<PriceChange>,
}

pub struct Monitor<T = ReqwestTransport> {
    fetcher: Fetcher<T>,
    catalog: Arc<SharedCatalog>,
    targets: Vec<Target>,
    concurrency: usize,
}

/// Compiles each site's selectors once and pairs them with the products.
pub fn targets(settings: &Settings) -> crate::Result<Vec<Target>> {
    let mut extractors = std::collections::BTreeMap::new();
    for (name, site) in &settings.sites {
        extractors.insert(name.as_str(), Arc::new(site.extractor()?));
    }
    settings
        .products
        .iter()
        .map(|product| {
            let extractor = extractors.get(product.site.as_str()).ok_or_else(|| {
                crate::Error::Usage(format!("unknown site `{}`", product.site))
            })?;
            Ok(Target {
                url: product.url.clone(),
                site: product.site.clone(),
                extractor: Arc::clone(extractor),
            })
        })
        .collect()
}

impl<T: Transport> Monitor<T> {
    pub fn new(
        fetcher: Fetcher<T>,
        catalog: Arc<SharedCatalog>,
        targets: Vec<Target>,
        concurrency: usize,
    ) -> Self {
        Self {
            fetcher,
            catalog,
            targets,
            concurrency: concurrency.max(1),
        }
    }

    pub const fn catalog(&self) -> &Arc<SharedCatalog> {
        &self.catalog
    }

    /// Scrapes every target once and saves the catalog.
    ///
    /// A page that cannot be fetched or parsed is logged and counted, the
    /// rest of the pass carries on.
    pub async fn run_once(&self) -> crate::Result<PassSummary> {
        log::info!(
            "Starting pass over {} products ({} at a time)",
            self.targets.len(),
            self.concurrency
        );
        let start = std::time::Instant::now();
        let results: Vec<(ScrapeStatus, Option<PriceChange>)> = stream::iter(&self.targets)
            .map(|target| self.scrape(target))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = PassSummary::default();
        for (status, change) in results {
            match status {
                ScrapeStatus::Success => summary.succeeded += 1,
                ScrapeStatus::FetchFailed | ScrapeStatus::ParseFailed => summary.failed += 1,
            }
            summary.changes.extend(change);
        }
        self.catalog.persist().await?;
        log::info!(
            "Pass finished in {:?}: {} ok, {} failed",
            start.elapsed(),
            summary.succeeded,
            summary.failed
        );
        Ok(summary)
    }

    async fn scrape(&self, target: &Target) -> (ScrapeStatus, Option<PriceChange>) {
        let report = self.fetcher.fetch(&target.url).await;
        let FetchReport {
            url,
            attempts,
            waits,
            elapsed,
            outcome,
        } = report;
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        if attempts > 1 {
            log::debug!(
                "{url}: {attempts} attempts, {:?} spent backing off",
                waits.iter().sum::<Duration>()
            );
        }
        let now = Utc::now();

        let body = match outcome {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Could not fetch {url}: {e}");
                self.log(url, ScrapeStatus::FetchFailed, Some(e.to_string()), attempts, elapsed_ms)
                    .await;
                return (ScrapeStatus::FetchFailed, None);
            }
        };

        let listing = match target.extractor.extract(&body) {
            Ok(listing) => listing,
            Err(e) => {
                log::warn!("Could not parse {url}: {e}");
                self.log(url, ScrapeStatus::ParseFailed, Some(e.to_string()), attempts, elapsed_ms)
                    .await;
                return (ScrapeStatus::ParseFailed, None);
            }
        };
        if listing.price.is_none() {
            log::info!(
                "No price found on {url} (price text: {:?})",
                listing.price_text
            );
        }

        let site = target.site.as_str();
        let outcome = self
            .catalog
            .update(|catalog| {
                let outcome = catalog.upsert(&url, site, listing, now);
                catalog.record_scrape(ScrapeLogEntry {
                    url: url.clone(),
                    status: ScrapeStatus::Success,
                    error: None,
                    attempts,
                    elapsed_ms,
                    recorded_at: now,
                });
                outcome
            })
            .await;
        if outcome.inserted {
            log::info!("Tracking new product {url}");
        }
        if let Some(PriceChange {
            title,
            previous: Some(previous),
            current,
            ..
        }) = &outcome.change
        {
            log::info!("Price of {title} changed {previous} -> {current}");
        }
        (ScrapeStatus::Success, outcome.change)
    }

    async fn log(
        &self,
        url: Url,
        status: ScrapeStatus,
        error: Option<String>,
        attempts: u32,
        elapsed_ms: u64,
    ) {
        self.catalog
            .update(|catalog| {
                catalog.record_scrape(ScrapeLogEntry {
                    url,
                    status,
                    error,
                    attempts,
                    elapsed_ms,
                    recorded_at: Utc::now(),
                });
            })
            .await;
    }

    /// Runs passes every `interval` until Ctrl-C.
    pub async fn watch(&self, interval: Duration) -> crate::Result<()> {
        self.watch_until(interval, tokio::signal::ctrl_c()).await
    }

    /// Runs passes every `interval` until `shutdown` resolves, whether that
    /// happens mid-pass or between passes. An interrupted pass still saves
    /// what it scraped.
    pub async fn watch_until(
        &self,
        interval: Duration,
        shutdown: impl std::future::Future<Output = std::io::Result<()>>,
    ) -> crate::Result<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                res = self.run_once() => match res {
                    Ok(summary) => log::info!(
                        "Pass done: {} ok, {} failed, {} price changes",
                        summary.succeeded,
                        summary.failed,
                        summary.changes.len()
                    ),
                    Err(e) => log::error!("Pass failed: {e}"),
                },
                res = &mut shutdown => {
                    res?;
                    log::info!("Interrupted mid-pass, saving and stopping");
                    self.catalog.persist().await?;
                    return Ok(());
                }
            }
            log::info!("Next pass in {interval:?}");
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                res = &mut shutdown => {
                    res?;
                    log::info!("Interrupted, stopping");
                    return Ok(());
                }
            }
        }
    }
}
