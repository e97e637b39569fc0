use std::{collections::BTreeMap, fmt::Display};

use chrono::{DateTime, Utc};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use url::Url;

use crate::{
    parse::Price,
    store::{Catalog, Product},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Drop,
    Rise,
    BelowTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceAlert {
    pub url: Url,
    pub title: String,
    pub kind: AlertKind,
    pub previous: Option<Price>,
    pub current: Price,
    pub change_percent: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AlertRules {
    /// Minimum magnitude of a move between consecutive observations.
    pub threshold_percent: f64,
    /// Ignore observations recorded before this instant.
    pub since: Option<DateTime<Utc>>,
    /// Target prices keyed by product URL.
    pub targets: BTreeMap<String, Price>,
}

/// Relative move from `old` to `new` in percent. `None` across currencies, from
/// zero, or when the amounts are too large to compare.
pub fn percent_change(old: &Price, new: &Price) -> Option<f64> {
    if !old.same_currency(new) || old.amount().is_zero() {
        return None;
    }
    new.amount()
        .checked_sub(*old.amount())?
        .checked_div(*old.amount())?
        .checked_mul(Decimal::ONE_HUNDRED)?
        .to_f64()
}

pub fn scan_alerts(catalog: &Catalog, rules: &AlertRules) -> Vec<PriceAlert> {
    let mut alerts = Vec::new();
    for product in catalog.products() {
        scan_history(product, rules, &mut alerts);
        if let Some(alert) = below_target(product, rules) {
            alerts.push(alert);
        }
    }
    alerts.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
    alerts
}

fn scan_history(product: &Product, rules: &AlertRules, alerts: &mut Vec<PriceAlert>) {
    for pair in product.history().windows(2) {
        let (before, after) = (&pair[0], &pair[1]);
        if rules.since.is_some_and(|since| after.recorded_at < since) {
            continue;
        }
        let Some(change) = percent_change(&before.price, &after.price) else {
            continue;
        };
        if change.abs() < rules.threshold_percent || change == 0.0 {
            continue;
        }
        alerts.push(PriceAlert {
            url: product.url().clone(),
            title: product.title().to_owned(),
            kind: if change < 0.0 {
                AlertKind::Drop
            } else {
                AlertKind::Rise
            },
            previous: Some(before.price.clone()),
            current: after.price.clone(),
            change_percent: Some(change),
            recorded_at: after.recorded_at,
        });
    }
}

fn below_target(product: &Product, rules: &AlertRules) -> Option<PriceAlert> {
    let target = rules.targets.get(product.url().as_str())?;
    let current = product.price()?;
    if rules
        .since
        .is_some_and(|since| product.last_updated() < since)
    {
        return None;
    }
    if !current.same_currency(target) || current.amount() > target.amount() {
        return None;
    }
    Some(PriceAlert {
        url: product.url().clone(),
        title: product.title().to_owned(),
        kind: AlertKind::BelowTarget,
        previous: None,
        current: current.clone(),
        change_percent: None,
        recorded_at: product.last_updated(),
    })
}

impl Display for PriceAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.kind, &self.previous, self.change_percent) {
            (AlertKind::BelowTarget, _, _) => write!(
                f,
                "TARGET  {}  now {}  ({})",
                self.title, self.current, self.url
            ),
            (kind, Some(previous), Some(change)) => write!(
                f,
                "{:<6}  {:+.1}%  {}  {} -> {}  ({})",
                if kind == AlertKind::Drop { "DROP" } else { "RISE" },
                change,
                self.title,
                previous,
                self.current,
                self.url
            ),
            _ => write!(f, "{}  {}  ({})", self.title, self.current, self.url),
        }
    }
}

/// Price statistics over one product's history, in its current currency.
///
/// Products whose amounts overflow a `Decimal` sum are left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceStats {
    pub url: Url,
    pub title: String,
    pub currency: &'static str,
    pub observations: usize,
    pub min: Decimal,
    pub max: Decimal,
    pub mean: Decimal,
    pub latest: Decimal,
}

pub fn summarize(catalog: &Catalog) -> Vec<PriceStats> {
    catalog.products().filter_map(product_stats).collect()
}

fn product_stats(product: &Product) -> Option<PriceStats> {
    let latest = product.history().last()?;
    let currency = latest.price.currency_code();
    let amounts: Vec<Decimal> = product
        .history()
        .iter()
        .filter(|entry| entry.price.currency_code() == currency)
        .map(|entry| *entry.price.amount())
        .collect();
    let min = amounts.iter().min()?;
    let max = amounts.iter().max()?;
    let sum = amounts
        .iter()
        .try_fold(Decimal::ZERO, |acc, amount| acc.checked_add(*amount))?;
    let mean = sum.checked_div(Decimal::from(amounts.len()))?.round_dp(2);
    Some(PriceStats {
        url: product.url().clone(),
        title: product.title().to_owned(),
        currency,
        observations: amounts.len(),
        min: *min,
        max: *max,
        mean,
        latest: *latest.price.amount(),
    })
}

impl Display for PriceStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}  [{} obs]  latest {} {cur}  min {} {cur}  max {} {cur}  mean {} {cur}",
            self.title,
            self.observations,
            self.latest,
            self.min,
            self.max,
            self.mean,
            cur = self.currency,
        )
    }
}
