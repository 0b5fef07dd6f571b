//! Key-value cache persisting live samples and volatility snapshots across restarts.
//!
//! Keys are namespaced by symbol: `{SYMBOL}.mid-prices` and `{SYMBOL}.volatility.{YYYY-MM-DD}`.
//! Nothing in the cache is authoritative. Read failures are treated as a miss by callers.

use crate::error::CalendarError;
use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fmt::Debug,
    fs::{self, File},
    io::{BufReader, BufWriter, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::debug;

/// Handle to the cache shared by the tracker and its tasks.
pub type SharedCache = Arc<dyn KeyValueCache>;

pub trait KeyValueCache: Debug + Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, CalendarError>;

    fn set(&self, key: &str, value: Value) -> Result<(), CalendarError>;

    fn remove(&self, key: &str) -> Result<(), CalendarError>;

    /// Remove every key starting with `prefix`, returning how many were removed.
    fn clear_prefix(&self, prefix: &str) -> Result<usize, CalendarError>;
}

/// Key of the persisted live mid price samples for `symbol`.
pub fn mid_prices_key(symbol: &str) -> String {
    format!("{symbol}.mid-prices")
}

/// Key of the volatility snapshot for `symbol` on `date`.
pub fn volatility_key(symbol: &str, date: NaiveDate) -> String {
    format!("{symbol}.volatility.{}", date.format("%Y-%m-%d"))
}

/// Prefix shared by every key belonging to `symbol`.
pub fn symbol_prefix(symbol: &str) -> String {
    format!("{symbol}.")
}

/// Read and deserialise `key`.
pub fn load<T>(cache: &dyn KeyValueCache, key: &str) -> Result<Option<T>, CalendarError>
where
    T: DeserializeOwned,
{
    cache
        .get(key)?
        .map(|value| serde_json::from_value(value).map_err(|error| cache_error(key, error)))
        .transpose()
}

/// Serialise and write `value` under `key`.
pub fn save<T>(cache: &dyn KeyValueCache, key: &str, value: &T) -> Result<(), CalendarError>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(value).map_err(|error| cache_error(key, error))?;
    cache.set(key, value)
}

/// Open the cache described by `dir`: a [`JsonFileCache`] if set, else a [`MemoryCache`].
pub fn open(dir: Option<&Path>) -> Result<SharedCache, CalendarError> {
    match dir {
        Some(dir) => Ok(Arc::new(JsonFileCache::open(dir)?)),
        None => Ok(Arc::new(MemoryCache::default())),
    }
}

/// In-process cache, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl KeyValueCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Value>, CalendarError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), CalendarError> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CalendarError> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn clear_prefix(&self, prefix: &str) -> Result<usize, CalendarError> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct JsonFileCache {
    dir: PathBuf,
}

impl JsonFileCache {
    const EXTENSION: &'static str = "json";

    /// Use `dir` as the cache directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CalendarError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|error| cache_error(&dir.display().to_string(), error))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", file_stem(key), Self::EXTENSION))
    }
}

impl KeyValueCache for JsonFileCache {
    fn get(&self, key: &str) -> Result<Option<Value>, CalendarError> {
        let file = match File::open(self.path(key)) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(cache_error(key, error)),
        };

        serde_json::from_reader(BufReader::new(file))
            .map(Some)
            .map_err(|error| cache_error(key, error))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), CalendarError> {
        let path = self.path(key);
        let file = File::create(&path).map_err(|error| cache_error(key, error))?;
        serde_json::to_writer(BufWriter::new(file), &value).map_err(|error| cache_error(key, error))?;

        debug!(path = %path.display(), "wrote cache entry");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CalendarError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(cache_error(key, error)),
        }
    }

    fn clear_prefix(&self, prefix: &str) -> Result<usize, CalendarError> {
        let stem_prefix = file_stem(prefix);
        let entries = fs::read_dir(&self.dir).map_err(|error| cache_error(prefix, error))?;

        let mut removed = 0;
        for entry in entries {
            let path = entry.map_err(|error| cache_error(prefix, error))?.path();

            let matches = path.extension().is_some_and(|ext| ext == Self::EXTENSION)
                && path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .is_some_and(|stem| stem.starts_with(&stem_prefix));

            if matches {
                fs::remove_file(&path).map_err(|error| cache_error(prefix, error))?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}

/// Map a key onto a file name, replacing anything that could escape the directory.
fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

fn cache_error(key: &str, reason: impl ToString) -> CalendarError {
    CalendarError::Cache {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MidPriceSample, Volatility};
    use serde_json::json;
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 12).unwrap()
    }

    fn exercise(cache: &dyn KeyValueCache) {
        let samples = vec![MidPriceSample::new(100.5, 1), MidPriceSample::new(101.0, 2)];
        save(cache, &mid_prices_key("BTCUSDT"), &samples).unwrap();
        save(
            cache,
            &volatility_key("BTCUSDT", date()),
            &Volatility::from_std(2.0).unwrap(),
        )
        .unwrap();
        cache.set(&mid_prices_key("ETHUSDT"), json!([])).unwrap();

        let loaded: Option<Vec<MidPriceSample>> =
            load(cache, &mid_prices_key("BTCUSDT")).unwrap();
        assert_eq!(loaded, Some(samples));

        let snapshot = cache.get("BTCUSDT.volatility.2024-06-12").unwrap().unwrap();
        assert_eq!(snapshot, json!({ "level": "medium", "value": 2.0 }));

        assert_eq!(cache.clear_prefix(&symbol_prefix("BTCUSDT")).unwrap(), 2);
        assert_eq!(cache.get(&mid_prices_key("BTCUSDT")).unwrap(), None);
        assert_eq!(cache.get(&mid_prices_key("ETHUSDT")).unwrap(), Some(json!([])));

        cache.remove(&mid_prices_key("ETHUSDT")).unwrap();
        cache.remove(&mid_prices_key("ETHUSDT")).unwrap();
        assert_eq!(cache.get(&mid_prices_key("ETHUSDT")).unwrap(), None);
    }

    #[test]
    fn test_cache_keys() {
        assert_eq!(mid_prices_key("BTCUSDT"), "BTCUSDT.mid-prices");
        assert_eq!(
            volatility_key("BTCUSDT", date()),
            "BTCUSDT.volatility.2024-06-12"
        );
    }

    #[test]
    fn test_memory_cache() {
        exercise(&MemoryCache::default());
    }

    #[test]
    fn test_json_file_cache() {
        let dir = TempDir::new().unwrap();
        let cache = JsonFileCache::open(dir.path().join("nested")).unwrap();
        exercise(&cache);
    }

    #[test]
    fn test_json_file_cache_survives_reopen() {
        let dir = TempDir::new().unwrap();
        JsonFileCache::open(dir.path())
            .unwrap()
            .set("BTCUSDT.mid-prices", json!([{ "price": 1.0, "timestamp": 5 }]))
            .unwrap();

        let reopened = JsonFileCache::open(dir.path()).unwrap();
        let loaded: Option<Vec<MidPriceSample>> = load(&reopened, "BTCUSDT.mid-prices").unwrap();
        assert_eq!(loaded, Some(vec![MidPriceSample::new(1.0, 5)]));
    }

    #[test]
    fn test_json_file_cache_corrupt_entry() {
        let dir = TempDir::new().unwrap();
        let cache = JsonFileCache::open(dir.path()).unwrap();
        fs::write(dir.path().join("BTCUSDT.mid-prices.json"), "not json").unwrap();

        assert!(matches!(
            cache.get("BTCUSDT.mid-prices"),
            Err(CalendarError::Cache { .. })
        ));
    }

    #[test]
    fn test_file_stem_stays_in_directory() {
        assert_eq!(file_stem("../etc/passwd"), ".._etc_passwd");
    }
}
