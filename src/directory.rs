// src/directory.rs

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::api_client::{ApiError, EmployeeSource};
use crate::model::{Employee, EmployeeId};

pub const DEFAULT_CACHE_DIR: &str = "./asistencia_cache";
pub const DEFAULT_CACHE_DURATION_SECS: u64 = 24 * 60 * 60; // 24 hours

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Employee list could not be fetched: {0}")]
    Api(#[from] ApiError),

    #[error("JSON processing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("System time error: {0}")]
    TimeError(String),
}

// Helper to create context-aware IO errors
fn io_context<S: Into<String>>(source: std::io::Error, context: S) -> DirectoryError {
    DirectoryError::Io {
        source,
        context: context.into(),
    }
}

fn now_unix_secs() -> Result<u64, DirectoryError> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| DirectoryError::TimeError(format!("Failed to get system time: {}", e)))?
        .as_secs())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheMetadata {
    last_updated_unix_secs: u64,
    source: String,
}

impl CacheMetadata {
    fn is_stale(&self, max_age_secs: u64) -> Result<bool, DirectoryError> {
        let cache_age = now_unix_secs()?.saturating_sub(self.last_updated_unix_secs);
        Ok(cache_age > max_age_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedData<T> {
    metadata: CacheMetadata,
    data: T,
}

/// Cache file name for a given upstream: readable prefix plus a short digest
/// so two API hosts never share a file.
pub fn cache_key(resource_type: &str, source: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut key = resource_type.replace(|c: char| !c.is_alphanumeric(), "_");
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let hash = hasher.finalize();
    key.push_str("__");
    key.push_str(&hex::encode(&hash[..8]));
    key
}

/// Read-through cache of the employee directory. Callers receive it as an
/// explicit collaborator; nothing about it is global.
pub struct EmployeeDirectory<S> {
    source: S,
    source_label: String,
    cache_dir: PathBuf,
    max_age_secs: u64,
}

impl<S: EmployeeSource> EmployeeDirectory<S> {
    pub fn new(
        source: S,
        source_label: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
        max_age_secs: u64,
    ) -> Self {
        Self {
            source,
            source_label: source_label.into(),
            cache_dir: cache_dir.into(),
            max_age_secs,
        }
    }

    pub fn cache_file_path(&self) -> PathBuf {
        self.cache_dir
            .join(format!("{}.json", cache_key("employees", &self.source_label)))
    }

    /// Cached list when fresh, otherwise fetched and written back.
    pub async fn employees(&self) -> Result<Vec<Employee>, DirectoryError> {
        let cache_path = self.cache_file_path();
        match load_from_cache::<Vec<Employee>>(&cache_path, self.max_age_secs) {
            Ok(Some(employees)) => {
                debug!("Employee directory served from cache ({} entries)", employees.len());
                return Ok(employees);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Failed to load employee cache: {}. Fetching from API.", e);
            }
        }
        self.refresh().await
    }

    /// Bypasses the cache and rewrites it.
    pub async fn refresh(&self) -> Result<Vec<Employee>, DirectoryError> {
        let employees = self.source.list_employees().await?;
        info!("Refreshed employee directory: {} employees", employees.len());

        // A write failure only costs a refetch next time
        if let Err(e) = save_to_cache(&self.cache_file_path(), &self.source_label, &employees) {
            error!("Failed to save employee cache: {}", e);
        }
        Ok(employees)
    }

    pub async fn find(&self, employee_id: EmployeeId) -> Result<Option<Employee>, DirectoryError> {
        Ok(self
            .employees()
            .await?
            .into_iter()
            .find(|e| e.id == employee_id))
    }

    pub fn invalidate(&self) -> Result<(), DirectoryError> {
        let cache_path = self.cache_file_path();
        if cache_path.exists() {
            fs::remove_file(&cache_path).map_err(|e| {
                io_context(e, format!("Failed to remove cache file: {:?}", cache_path))
            })?;
            info!("Invalidated employee cache {:?}", cache_path);
        }
        Ok(())
    }
}

fn save_to_cache<T: Serialize>(path: &Path, source: &str, data: &T) -> Result<(), DirectoryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            io_context(e, format!("Failed to create cache directory: {:?}", parent))
        })?;
    }

    let cached_data = CachedData {
        metadata: CacheMetadata {
            last_updated_unix_secs: now_unix_secs()?,
            source: source.to_string(),
        },
        data,
    };
    let json_string = serde_json::to_string_pretty(&cached_data)?;

    let mut file = File::create(path)
        .map_err(|e| io_context(e, format!("Failed to create cache file: {:?}", path)))?;
    file.write_all(json_string.as_bytes())
        .map_err(|e| io_context(e, format!("Failed to write to cache file: {:?}", path)))?;

    debug!("Saved data to cache file {:?}", path);
    Ok(())
}

fn load_from_cache<T: DeserializeOwned>(
    path: &Path,
    max_age_secs: u64,
) -> Result<Option<T>, DirectoryError> {
    if !path.exists() {
        debug!("Cache miss (file not found): {:?}", path);
        return Ok(None);
    }

    let json_string = fs::read_to_string(path)
        .map_err(|e| io_context(e, format!("Failed to read cache file: {:?}", path)))?;

    let cached_data: CachedData<T> = match serde_json::from_str(&json_string) {
        Ok(data) => data,
        Err(e) => {
            warn!(
                "Failed to deserialize cache file {:?}: {}. Removing corrupt cache file.",
                path, e
            );
            if let Err(remove_err) = fs::remove_file(path) {
                error!("Failed to remove corrupt cache file {:?}: {}", path, remove_err);
            }
            // Treat as a miss
            return Ok(None);
        }
    };

    if cached_data.metadata.is_stale(max_age_secs)? {
        debug!("Cache stale: {:?}", path);
        return Ok(None);
    }

    debug!("Cache hit: {:?}", path);
    Ok(Some(cached_data.data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::runtime::Runtime;

    struct CountingSource {
        employees: Vec<Employee>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingSource {
        fn new(names: &[&str]) -> Self {
            Self {
                employees: names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| Employee {
                        id: i as i64 + 1,
                        name: name.to_string(),
                        document_id: None,
                        active: Some(true),
                    })
                    .collect(),
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmployeeSource for &CountingSource {
        async fn list_employees(&self) -> Result<Vec<Employee>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ApiError::Status {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "boom".to_string(),
                });
            }
            Ok(self.employees.clone())
        }
    }

    // Helper function to get test-specific paths
    fn get_test_cache_dir(test_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("asistencia_test_cache_{}", test_name))
    }

    fn setup(test_name: &str) -> PathBuf {
        teardown(test_name);
        get_test_cache_dir(test_name)
    }

    fn teardown(test_name: &str) {
        let _ = fs::remove_dir_all(get_test_cache_dir(test_name));
    }

    #[test]
    fn test_read_through_uses_cache_on_second_call() {
        let test_name = "read_through";
        let cache_dir = setup(test_name);
        let rt = Runtime::new().unwrap();
        let source = CountingSource::new(&["Ana", "Luis"]);
        let directory = EmployeeDirectory::new(&source, "https://a.example", &cache_dir, 3600);

        let first = rt.block_on(directory.employees()).unwrap();
        let second = rt.block_on(directory.employees()).unwrap();

        assert_eq!(first, second);
        assert_eq!(source.calls(), 1, "second call should be a cache hit");
        assert!(directory.cache_file_path().exists());

        let found = rt.block_on(directory.find(2)).unwrap();
        assert_eq!(found.map(|e| e.name), Some("Luis".to_string()));
        assert_eq!(source.calls(), 1);

        teardown(test_name);
    }

    #[test]
    fn test_stale_cache_is_refetched() {
        let test_name = "stale";
        let cache_dir = setup(test_name);
        let rt = Runtime::new().unwrap();
        let source = CountingSource::new(&["Ana"]);
        let directory = EmployeeDirectory::new(&source, "https://a.example", &cache_dir, 60);

        // Write a cache entry that is two hours old
        let old = CachedData {
            metadata: CacheMetadata {
                last_updated_unix_secs: now_unix_secs().unwrap() - 7200,
                source: "https://a.example".to_string(),
            },
            data: vec![Employee {
                id: 99,
                name: "Antiguo".to_string(),
                document_id: None,
                active: None,
            }],
        };
        fs::create_dir_all(&cache_dir).unwrap();
        fs::write(
            directory.cache_file_path(),
            serde_json::to_string(&old).unwrap(),
        )
        .unwrap();

        let employees = rt.block_on(directory.employees()).unwrap();
        assert_eq!(employees[0].name, "Ana");
        assert_eq!(source.calls(), 1);

        teardown(test_name);
    }

    #[test]
    fn test_corrupt_cache_is_removed_and_refetched() {
        let test_name = "corrupt";
        let cache_dir = setup(test_name);
        let rt = Runtime::new().unwrap();
        let source = CountingSource::new(&["Ana"]);
        let directory = EmployeeDirectory::new(&source, "https://a.example", &cache_dir, 3600);

        fs::create_dir_all(&cache_dir).unwrap();
        fs::write(directory.cache_file_path(), "{not json").unwrap();

        let employees = rt.block_on(directory.employees()).unwrap();
        assert_eq!(employees.len(), 1);
        assert_eq!(source.calls(), 1);

        teardown(test_name);
    }

    #[test]
    fn test_refresh_and_invalidate() {
        let test_name = "refresh_invalidate";
        let cache_dir = setup(test_name);
        let rt = Runtime::new().unwrap();
        let source = CountingSource::new(&["Ana"]);
        let directory = EmployeeDirectory::new(&source, "https://a.example", &cache_dir, 3600);

        rt.block_on(directory.employees()).unwrap();
        rt.block_on(directory.refresh()).unwrap();
        assert_eq!(source.calls(), 2);

        directory.invalidate().unwrap();
        assert!(!directory.cache_file_path().exists());
        rt.block_on(directory.employees()).unwrap();
        assert_eq!(source.calls(), 3);

        teardown(test_name);
    }

    #[test]
    fn test_api_failure_is_reported() {
        let test_name = "api_failure";
        let cache_dir = setup(test_name);
        let rt = Runtime::new().unwrap();
        let mut source = CountingSource::new(&[]);
        source.fail = true;
        let directory = EmployeeDirectory::new(&source, "https://a.example", &cache_dir, 3600);

        let result = rt.block_on(directory.employees());
        assert!(matches!(result, Err(DirectoryError::Api(_))));

        teardown(test_name);
    }

    #[test]
    fn test_cache_key_differs_per_source() {
        let a = cache_key("employees", "https://a.example");
        let b = cache_key("employees", "https://b.example");
        assert!(a.starts_with("employees__"));
        assert_ne!(a, b);
        assert_eq!(a, cache_key("employees", "https://a.example"));
    }
}
