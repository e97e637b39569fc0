use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::parse::{Listing, Price};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub price: Price,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    Success,
    FetchFailed,
    ParseFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeLogEntry {
    pub url: Url,
    pub status: ScrapeStatus,
    pub error: Option<String>,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

/// A monitored product. Only `Catalog::upsert` changes one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    url: Url,
    site: String,
    title: String,
    price: Option<Price>,
    availability: Option<String>,
    description: Option<String>,
    first_seen: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    history: Vec<PriceHistoryEntry>,
}

impl Product {
    pub const fn url(&self) -> &Url {
        &self.url
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub const fn price(&self) -> Option<&Price> {
        self.price.as_ref()
    }

    pub fn availability(&self) -> Option<&str> {
        self.availability.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub const fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    pub const fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Oldest first.
    pub fn history(&self) -> &[PriceHistoryEntry] {
        &self.history
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceChange {
    pub url: Url,
    pub title: String,
    pub previous: Option<Price>,
    pub current: Price,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: bool,
    /// Set exactly when a history entry was appended.
    pub change: Option<PriceChange>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    saved_at: Option<DateTime<Utc>>,
    products: BTreeMap<String, Product>,
    scrape_log: Vec<ScrapeLogEntry>,
}

impl Catalog {
    /// Inserts or refreshes the product at `url`.
    ///
    /// History grows only when the observed price differs from the stored
    /// one. A listing without a price keeps the last known price.
    pub fn upsert(
        &mut self,
        url: &Url,
        site: &str,
        listing: Listing,
        now: DateTime<Utc>,
    ) -> UpsertOutcome {
        let Listing {
            title,
            price: observed,
            availability,
            description,
            ..
        } = listing;

        if let Some(product) = self.products.get_mut(url.as_str()) {
            site.clone_into(&mut product.site);
            product.title = title;
            if availability.is_some() {
                product.availability = availability;
            }
            if description.is_some() {
                product.description = description;
            }
            product.last_updated = now;

            let change = match observed {
                Some(price) if product.price.as_ref() != Some(&price) => {
                    product.history.push(PriceHistoryEntry {
                        price: price.clone(),
                        recorded_at: now,
                    });
                    let previous = product.price.replace(price.clone());
                    Some(PriceChange {
                        url: url.clone(),
                        title: product.title.clone(),
                        previous,
                        current: price,
                    })
                }
                _ => None,
            };
            return UpsertOutcome {
                inserted: false,
                change,
            };
        }

        let history = observed
            .iter()
            .map(|price| PriceHistoryEntry {
                price: price.clone(),
                recorded_at: now,
            })
            .collect();
        let change = observed.clone().map(|current| PriceChange {
            url: url.clone(),
            title: title.clone(),
            previous: None,
            current,
        });
        self.products.insert(
            url.to_string(),
            Product {
                url: url.clone(),
                site: site.to_owned(),
                title,
                price: observed,
                availability,
                description,
                first_seen: now,
                last_updated: now,
                history,
            },
        );
        UpsertOutcome {
            inserted: true,
            change,
        }
    }

    pub fn record_scrape(&mut self, entry: ScrapeLogEntry) {
        self.scrape_log.push(entry);
    }

    pub fn product(&self, url: &Url) -> Option<&Product> {
        self.products.get(url.as_str())
    }

    /// Ordered by URL.
    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn scrape_log(&self) -> &[ScrapeLogEntry] {
        &self.scrape_log
    }

    pub const fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.saved_at
    }

    pub fn mark_saved(&mut self, now: DateTime<Utc>) {
        self.saved_at = Some(now);
    }
}
