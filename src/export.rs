use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::Catalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Csv,
    Json,
}

impl std::str::FromStr for Format {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(crate::Error::Usage(format!("Unknown format: {other}"))),
        }
    }
}

#[derive(Serialize)]
struct ProductRow<'a> {
    url: &'a str,
    site: &'a str,
    title: &'a str,
    price: Option<String>,
    currency: Option<&'a str>,
    availability: Option<&'a str>,
    first_seen: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

#[derive(Serialize)]
struct HistoryRow<'a> {
    url: &'a str,
    title: &'a str,
    price: String,
    currency: &'a str,
    recorded_at: DateTime<Utc>,
}

/// One row per product with its current state.
pub fn write_products_csv(catalog: &Catalog, out: impl Write) -> crate::Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for product in catalog.products() {
        writer.serialize(ProductRow {
            url: product.url().as_str(),
            site: product.site(),
            title: product.title(),
            price: product.price().map(|p| p.amount().to_string()),
            currency: product.price().map(|p| p.currency_code()),
            availability: product.availability(),
            first_seen: product.first_seen(),
            last_updated: product.last_updated(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// One row per price history entry, grouped by product.
pub fn write_history_csv(catalog: &Catalog, out: impl Write) -> crate::Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for product in catalog.products() {
        for entry in product.history() {
            writer.serialize(HistoryRow {
                url: product.url().as_str(),
                title: product.title(),
                price: entry.price.amount().to_string(),
                currency: entry.price.currency_code(),
                recorded_at: entry.recorded_at,
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// The whole catalog, including the scrape log.
pub fn write_json(catalog: &Catalog, out: impl Write) -> crate::Result<()> {
    serde_json::to_writer_pretty(out, catalog)?;
    Ok(())
}
