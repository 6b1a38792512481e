//! Durable (layer 3) fallback.
//!
//! Only categories whose data the application persists itself are served
//! from here; raw registry responses never are.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::cache::{CacheCategory, CacheError};

/// Read-only source of persisted values.
#[async_trait]
pub trait DurableStore<T>: Send + Sync + std::fmt::Debug {
    async fn fetch(&self, category: CacheCategory, key: &str) -> Result<Option<T>, CacheError>;

    /// Every persisted value of a category, for warming.
    async fn fetch_all(&self, category: CacheCategory) -> Result<Vec<(String, T)>, CacheError>;
}

/// Durable store loaded from a JSON document of the form
/// `{ "<category>": { "<key>": value, ... }, ... }`.
#[derive(Debug, Clone)]
pub struct JsonFileStore<T> {
    data: HashMap<CacheCategory, HashMap<String, T>>,
}

impl<T: DeserializeOwned> JsonFileStore<T> {
    /// Load from `path`. A missing file yields an empty store.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Durable cache file not found, starting empty");
            return Ok(Self::from_map(HashMap::new()));
        }

        let reader = BufReader::new(File::open(path)?);
        let raw: HashMap<String, HashMap<String, T>> = serde_json::from_reader(reader)?;

        let mut data = HashMap::new();
        for (name, entries) in raw {
            match CacheCategory::from_str(&name) {
                Ok(category) => {
                    data.insert(category, entries);
                }
                Err(_) => {
                    tracing::warn!(category = %name, "Ignoring unknown category in durable cache file");
                }
            }
        }

        let store = Self::from_map(data);
        tracing::info!(
            path = %path.display(),
            entries = store.len(),
            "Loaded durable cache file"
        );
        Ok(store)
    }
}

impl<T> JsonFileStore<T> {
    pub fn from_map(data: HashMap<CacheCategory, HashMap<String, T>>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<T> DurableStore<T> for JsonFileStore<T>
where
    T: Clone + Send + Sync + std::fmt::Debug,
{
    async fn fetch(&self, category: CacheCategory, key: &str) -> Result<Option<T>, CacheError> {
        Ok(self
            .data
            .get(&category)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn fetch_all(&self, category: CacheCategory) -> Result<Vec<(String, T)>, CacheError> {
        Ok(self
            .data
            .get(&category)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_skips_unknown_categories() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"supplier": {{"1": "acme", "2": "globex"}}, "vendor": {{"3": "x"}}}}"#
        )
        .unwrap();

        let store: JsonFileStore<String> = JsonFileStore::load(file.path()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.fetch(CacheCategory::Supplier, "1").await.unwrap().as_deref(),
            Some("acme")
        );
        assert_eq!(store.fetch(CacheCategory::Company, "1").await.unwrap(), None);

        let mut all = store.fetch_all(CacheCategory::Supplier).await.unwrap();
        all.sort();
        assert_eq!(all[1], ("2".to_string(), "globex".to_string()));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFileStore<String> =
            JsonFileStore::load(dir.path().join("absent.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = JsonFileStore::<String>::load(file.path()).unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
    }
}
