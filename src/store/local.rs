use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use async_compression::tokio::bufread::{GzipDecoder, GzipEncoder};
use tokio::{fs, io::AsyncReadExt};

use super::Catalog;

/// A catalog kept in one JSON file, gzipped when `compressed`.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    compressed: bool,
}

impl FileStore {
    pub async fn open(p: impl AsRef<Path>, compressed: bool) -> crate::Result<Self> {
        let path = p.as_ref().to_owned();
        if let Some(parent) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        Ok(Self { path, compressed })
    }

    pub async fn load(&self) -> crate::Result<Option<Catalog>> {
        if !fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        let raw = fs::read(&self.path).await?;
        let json = if self.compressed {
            let mut decoder = GzipDecoder::new(raw.as_slice());
            let mut out = Vec::with_capacity(raw.len() * 8);
            decoder.read_to_end(&mut out).await?;
            log::debug!("Decompressed catalog {} -> {} bytes", raw.len(), out.len());
            out
        } else {
            raw
        };
        Ok(Some(serde_json::from_slice(&json)?))
    }

    /// Writes next to the target and renames, so a crash never leaves half a file.
    pub async fn save(&self, catalog: &Catalog) -> crate::Result<()> {
        let json = serde_json::to_vec_pretty(catalog)?;
        let bytes = if self.compressed {
            let mut encoder = GzipEncoder::new(json.as_slice());
            let mut out = Vec::with_capacity(json.len() / 4);
            encoder.read_to_end(&mut out).await?;
            out
        } else {
            json
        };
        let mut tmp = OsString::from(self.path.as_os_str());
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &self.path).await?;
        log::debug!("Saved catalog to {} ({} bytes)", self.path.display(), bytes.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use url::Url;

    use super::*;
    use crate::parse::{Listing, Price};

    fn sample() -> Catalog {
        let mut catalog = Catalog::default();
        catalog.upsert(
            &Url::parse("https://acme.example/anvil").unwrap(),
            "acme",
            Listing {
                title: "Anvil".to_owned(),
                price: Price::parse("$1,234.56"),
                price_text: Some("$1,234.56".to_owned()),
                availability: None,
                description: Some("heavy".to_owned()),
            },
            Utc::now(),
        );
        catalog
    }

    #[tokio::test]
    async fn test_missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("nested/catalog.json"), false)
            .await
            .unwrap();
        assert!(store.load().await.unwrap().is_none());
        assert!(dir.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn test_plain_json_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let catalog = sample();
        FileStore::open(&path, false).await.unwrap().save(&catalog).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"title\": \"Anvil\""));
        let reopened = FileStore::open(&path, false).await.unwrap();
        assert_eq!(reopened.load().await.unwrap(), Some(catalog));
    }

    #[tokio::test]
    async fn test_gzip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json.gz");
        let catalog = sample();
        FileStore::open(&path, true).await.unwrap().save(&catalog).await.unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..2], &[0x1f, 0x8b], "gzip magic");
        let reopened = FileStore::open(&path, true).await.unwrap();
        assert_eq!(reopened.load().await.unwrap(), Some(catalog));
    }

    #[tokio::test]
    async fn test_save_overwrites_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("c.json"), false).await.unwrap();
        store.save(&sample()).await.unwrap();
        store.save(&Catalog::default()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(Catalog::default()));
        assert!(!dir.path().join("c.json.tmp").exists());
    }
}
