use std::{collections::BTreeMap, path::Path, path::PathBuf, time::Duration};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use url::Url;

use rust_decimal::Decimal;

use crate::{
    fetch::RetryPolicy,
    parse::{Extractor, Price},
};

pub const DEFAULT_PATH: &str = "price_monitor.yaml";
pub const PATH_ENV: &str = "PRICE_MONITOR_CONFIG";
const ENV_PREFIX: &str = "PRICE_MONITOR";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub alerts: AlertSettings,
    #[serde(default)]
    pub sites: BTreeMap<String, SiteSettings>,
    #[serde(default)]
    pub products: Vec<ProductTarget>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Ceiling on requests in any trailing 60 seconds.
    pub requests_per_minute: u32,
    pub burst_per_second: Option<u32>,
    pub jitter_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Longer `Retry-After` requests end the fetch instead of being waited out.
    pub max_retry_after_secs: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            burst_per_second: Some(2),
            jitter_ms: 500,
            timeout_secs: 30,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_owned(),
            max_retries: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            max_retry_after_secs: 600,
        }
    }
}

impl FetchSettings {
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            max_retry_after: Duration::from_secs(self.max_retry_after_secs),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// No path keeps everything in memory for the lifetime of the process.
    pub path: Option<PathBuf>,
    pub compress: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub interval_secs: u64,
    /// Pages fetched at once; 1 scrapes sequentially.
    pub concurrency: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60 * 60,
            concurrency: 1,
        }
    }
}

impl MonitorSettings {
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub threshold_percent: f64,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            threshold_percent: 10.0,
        }
    }
}

/// Selectors for one site; see `FieldSelector` for the ` @attr` suffix.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteSettings {
    pub title: String,
    pub price: String,
    pub availability: Option<String>,
    pub description: Option<String>,
    /// ISO code assumed when a price names no currency.
    pub currency: Option<String>,
}

impl SiteSettings {
    pub fn extractor(&self) -> Result<Extractor, crate::parse::Error> {
        let mut extractor = Extractor::new(&self.title, &self.price)?;
        if let Some(sel) = &self.availability {
            extractor = extractor.availability(sel)?;
        }
        if let Some(sel) = &self.description {
            extractor = extractor.description(sel)?;
        }
        if let Some(code) = &self.currency {
            extractor = extractor.currency(code)?;
        }
        Ok(extractor)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductTarget {
    pub url: Url,
    pub site: String,
    pub target_price: Option<f64>,
    /// Currency of `target_price`; defaults to the site's currency, then USD.
    pub target_currency: Option<String>,
}

impl ProductTarget {
    fn target(&self, site: Option<&SiteSettings>) -> Option<Result<Price, crate::parse::Error>> {
        let amount = self.target_price?;
        let code = self
            .target_currency
            .as_deref()
            .or_else(|| site.and_then(|s| s.currency.as_deref()))
            .unwrap_or("USD");
        // shortest round-trip text, so 999.99 stays 999.99
        Some(match amount.to_string().parse::<Decimal>() {
            Ok(amount) => Price::new(amount, code),
            Err(_) => Err(crate::parse::Error::PriceParse(format!(
                "target price {amount} is not a finite amount"
            ))),
        })
    }
}

impl Settings {
    /// Reads `path` as YAML, then applies `PRICE_MONITOR__SECTION__KEY` overrides.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let source = File::from(path.as_ref()).format(FileFormat::Yaml);
        Self::build(Config::builder().add_source(source))
    }

    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        Self::build(Config::builder().add_source(File::from_str(yaml, FileFormat::Yaml)))
    }

    fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> crate::Result<Self> {
        let settings: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Every product must name a configured site whose selectors compile.
    pub fn validate(&self) -> crate::Result<()> {
        for (name, site) in &self.sites {
            site.extractor().map_err(|e| {
                crate::Error::Config(config::ConfigError::Message(format!("site `{name}`: {e}")))
            })?;
        }
        for product in &self.products {
            let Some(site) = self.sites.get(&product.site) else {
                return Err(crate::Error::Config(config::ConfigError::Message(format!(
                    "product {} refers to unknown site `{}`",
                    product.url, product.site
                ))));
            };
            if let Some(Err(e)) = product.target(Some(site)) {
                return Err(crate::Error::Config(config::ConfigError::Message(format!(
                    "product {}: {e}",
                    product.url
                ))));
            }
        }
        if self.monitor.concurrency == 0 {
            return Err(crate::Error::Config(config::ConfigError::Message(
                "monitor.concurrency must be at least 1".to_owned(),
            )));
        }
        Ok(())
    }

    /// Target prices keyed by product URL. Invalid targets are rejected by `validate`.
    pub fn target_prices(&self) -> BTreeMap<String, Price> {
        self.products
            .iter()
            .filter_map(|p| {
                let target = p.target(self.sites.get(&p.site))?.ok()?;
                Some((p.url.to_string(), target))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r##"
fetch:
  requests_per_minute: 12
  max_retries: 5
store:
  path: prices.json.gz
  compress: true
monitor:
  concurrency: 4
alerts:
  threshold_percent: 15
sites:
  acme:
    title: h1.product-title
    price: .price-box .price
    availability: "#availability"
    currency: USD
  widgets:
    title: meta[property="og:title"] @content
    price: "[itemprop=price] @content"
products:
  - url: https://acme.example/anvil
    site: acme
    target_price: 999.99
  - url: https://widgets.example/pro
    site: widgets
"##;

    #[test]
    fn test_from_yaml() {
        let settings = Settings::from_yaml(EXAMPLE).unwrap();
        assert_eq!(settings.fetch.requests_per_minute, 12);
        assert_eq!(settings.fetch.max_retries, 5);
        // untouched keys keep their defaults
        assert_eq!(settings.fetch.timeout_secs, 30);
        assert_eq!(settings.store.path, Some(PathBuf::from("prices.json.gz")));
        assert!(settings.store.compress);
        assert_eq!(settings.monitor.concurrency, 4);
        assert_eq!(settings.monitor.interval(), Duration::from_secs(3600));
        assert!((settings.alerts.threshold_percent - 15.0).abs() < f64::EPSILON);
        assert_eq!(settings.sites.len(), 2);
        assert_eq!(settings.products.len(), 2);
        assert_eq!(settings.products[0].url.as_str(), "https://acme.example/anvil");
        assert_eq!(
            settings.target_prices().get("https://acme.example/anvil"),
            Price::parse("$999.99").as_ref()
        );
        assert_eq!(settings.target_prices().len(), 1);
    }

    #[test]
    fn test_retry_policy() {
        let policy = FetchSettings::default().retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert_eq!(policy.max_retry_after, Duration::from_secs(600));
    }

    #[test]
    fn test_unknown_site_is_rejected() {
        let yaml = r"
sites: {}
products:
  - url: https://acme.example/anvil
    site: acme
";
        let err = Settings::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown site `acme`"), "{err}");
    }

    #[test]
    fn test_bad_selector_is_rejected() {
        let yaml = r"
sites:
  broken:
    title: h1[
    price: .price
";
        let err = Settings::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("site `broken`"), "{err}");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let settings = Settings::from_yaml("{}").unwrap();
        assert!(settings.products.is_empty());
        assert_eq!(settings.fetch.requests_per_minute, 30);
        assert!(settings.store.path.is_none());
    }

    #[test]
    fn test_target_currency() {
        let yaml = r"
sites:
  tokyo:
    title: h1
    price: .price
    currency: JPY
products:
  - url: https://tokyo.example/kettle
    site: tokyo
    target_price: 4500
  - url: https://tokyo.example/pot
    site: tokyo
    target_price: 30
    target_currency: EUR
";
        let settings = Settings::from_yaml(yaml).unwrap();
        let targets = settings.target_prices();
        assert_eq!(targets["https://tokyo.example/kettle"].currency_code(), "JPY");
        assert_eq!(targets["https://tokyo.example/pot"].currency_code(), "EUR");

        let bad = yaml.replace("EUR", "ZZZ");
        let err = Settings::from_yaml(&bad).unwrap_err();
        assert!(err.to_string().contains("tokyo.example/pot"), "{err}");
    }

    #[test]
    fn test_env_overrides_yaml() {
        let yaml = r"
fetch:
  jitter_ms: 1
  backoff_max_ms: 2000
";
        std::env::set_var("PRICE_MONITOR__FETCH__JITTER_MS", "42");
        std::env::set_var("PRICE_MONITOR__FETCH__BACKOFF_MAX_MS", "9000");
        let settings = Settings::from_yaml(yaml);
        std::env::remove_var("PRICE_MONITOR__FETCH__JITTER_MS");
        std::env::remove_var("PRICE_MONITOR__FETCH__BACKOFF_MAX_MS");

        let settings = settings.unwrap();
        assert_eq!(settings.fetch.jitter_ms, 42);
        assert_eq!(settings.fetch.backoff_max_ms, 9000);
        // keys without a variable keep the file or default value
        assert_eq!(settings.fetch.timeout_secs, 30);
        assert_eq!(Settings::from_yaml(yaml).unwrap().fetch.jitter_ms, 1);
    }
}
