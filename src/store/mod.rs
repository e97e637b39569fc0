mod catalog;
mod local;
mod shared;

use std::path::Path;

pub use catalog::{Catalog, PriceChange, Product, ScrapeLogEntry, ScrapeStatus};
use local::FileStore;
pub use shared::SharedCatalog;

use crate::config::StoreSettings;

#[derive(Debug)]
#[non_exhaustive]
pub enum Store {
    Local(FileStore),
    AdHoc,
}

impl Store {
    pub async fn from_settings(settings: &StoreSettings) -> crate::Result<Self> {
        match &settings.path {
            Some(path) => Self::local(path, settings.compress).await,
            None => {
                log::warn!("store.path not set, using ad-hoc memory store.");
                Ok(Self::AdHoc)
            }
        }
    }

    #[inline]
    pub async fn local(p: impl AsRef<Path>, compressed: bool) -> crate::Result<Self> {
        FileStore::open(p, compressed).await.map(Self::Local)
    }

    /// An empty catalog when nothing was saved yet.
    pub async fn load(&self) -> crate::Result<Catalog> {
        let value = match self {
            Self::Local(f) => f.load().await?,
            Self::AdHoc => None,
        };
        Ok(value.unwrap_or_default())
    }

    pub async fn save(&self, data: &Catalog) -> crate::Result<()> {
        match self {
            Self::Local(f) => f.save(data).await,
            Self::AdHoc => Ok(()),
        }
    }
}
