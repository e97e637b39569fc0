use std::ops::Deref;

use chrono::Utc;
use futures_locks::{Mutex, RwLock};

use super::{Catalog, Store};

/// A catalog many scrape tasks can update at once.
///
/// Reads and upserts go through the `RwLock`; saves are serialized by the
/// `Mutex` around the backend.
#[derive(Debug)]
pub struct SharedCatalog {
    catalog: RwLock<Catalog>,
    store: Mutex<Store>,
}

impl SharedCatalog {
    pub async fn open(store: Store) -> crate::Result<Self> {
        let catalog = store.load().await?;
        log::info!("Opened catalog with {} products", catalog.len());
        Ok(Self {
            catalog: RwLock::new(catalog),
            store: Mutex::new(store),
        })
    }

    pub async fn get(&self) -> impl Deref<Target = Catalog> + '_ {
        self.catalog.read().await
    }

    pub async fn update<R>(&self, f: impl FnOnce(&mut Catalog) -> R) -> R {
        let mut guard = self.catalog.write().await;
        f(&mut guard)
    }

    pub async fn persist(&self) -> crate::Result<()> {
        let store = self.store.lock().await;
        self.catalog.write().await.mark_saved(Utc::now());
        let catalog = self.catalog.read().await;
        store.save(&catalog).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::future::join_all;
    use url::Url;

    use super::*;
    use crate::parse::{Listing, Price};

    fn listing(n: usize) -> Listing {
        Listing {
            title: format!("Item {n}"),
            price: Price::parse(&format!("${n}.99")),
            price_text: None,
            availability: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn test_concurrent_upserts() {
        let shared = Arc::new(SharedCatalog::open(Store::AdHoc).await.unwrap());
        let tasks = (0..20).map(|n| {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let url = Url::parse(&format!("https://shop.example/item/{}", n % 5)).unwrap();
                shared
                    .update(|c| c.upsert(&url, "shop", listing(n), Utc::now()))
                    .await
            })
        });
        for res in join_all(tasks).await {
            res.unwrap();
        }
        let catalog = shared.get().await;
        assert_eq!(catalog.len(), 5);
        // every write to a URL carried a new price
        let total: usize = catalog.products().map(|p| p.history().len()).sum();
        assert_eq!(total, 20);
    }

    #[tokio::test]
    async fn test_persist_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let shared = SharedCatalog::open(Store::local(&path, false).await.unwrap())
            .await
            .unwrap();
        let url = Url::parse("https://shop.example/item/1").unwrap();
        shared
            .update(|c| c.upsert(&url, "shop", listing(1), Utc::now()))
            .await;
        shared.persist().await.unwrap();
        assert!(shared.get().await.saved_at().is_some());

        let reopened = SharedCatalog::open(Store::local(&path, false).await.unwrap())
            .await
            .unwrap();
        let catalog = reopened.get().await;
        assert_eq!(catalog.product(&url).unwrap().title(), "Item 1");
        assert!(catalog.saved_at().is_some());
    }
}
