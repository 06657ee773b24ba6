//! Dependency resolution against ordered repositories with a local cache.
//!
//! Coordinates use the `group:artifact:version` form. Resolution checks the
//! cache first; a miss goes to each repository in order through the
//! [`Fetcher`] seam. Offline mode never touches the fetcher: a cache miss
//! fails immediately. A repository may publish a `.sha256` companion next to
//! the artifact; when present it is verified before the artifact enters the
//! cache.

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("malformed dependency coordinate {0:?}; expected group:artifact:version")]
    BadCoordinate(String),
    #[error("dependency {0} is not cached and the resolver is offline")]
    OfflineMiss(Dependency),
    #[error("dependency {0} was not found in any configured repository")]
    NotFound(Dependency),
    #[error("checksum mismatch for {dependency}: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        dependency: Dependency,
        expected: String,
        computed: String,
    },
    #[error("fetch of {url} failed: {message}")]
    Fetch { url: String, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One `group:artifact:version` coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

impl Dependency {
    pub fn new(group: &str, artifact: &str, version: &str) -> Self {
        Self {
            group: group.to_string(),
            artifact: artifact.to_string(),
            version: version.to_string(),
        }
    }

    pub fn jar_name(&self) -> String {
        format!("{}-{}.jar", self.artifact, self.version)
    }

    /// Repository-relative path: `group/as/dirs/artifact/version/a-v.jar`.
    pub fn repository_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.group.replace('.', "/"),
            self.artifact,
            self.version,
            self.jar_name()
        )
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)
    }
}

impl FromStr for Dependency {
    type Err = ResolveError;

    fn from_str(coordinate: &str) -> Result<Self, Self::Err> {
        let mut parts = coordinate.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(g), Some(a), Some(v), None) if !g.is_empty() && !a.is_empty() && !v.is_empty() => {
                Ok(Self::new(g, a, v))
            }
            _ => Err(ResolveError::BadCoordinate(coordinate.to_string())),
        }
    }
}

/// Transport seam for repository access. Implementations return `Ok(None)`
/// for a clean not-found so the resolver can try the next repository.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Option<Vec<u8>>, ResolveError>;
}

/// Blocking HTTP fetcher.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, ResolveError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ResolveError::Fetch {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HttpFetcher")
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Option<Vec<u8>>, ResolveError> {
        let response = self.client.get(url).send().map_err(|e| ResolveError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ResolveError::Fetch {
                url: url.to_string(),
                message: format!("status {}", response.status()),
            });
        }
        let bytes = response.bytes().map_err(|e| ResolveError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(bytes.to_vec()))
    }
}

/// Resolves dependencies to cached artifact paths.
#[derive(Clone)]
pub struct DependencyResolver {
    repositories: Vec<String>,
    cache_dir: PathBuf,
    offline: bool,
    fetcher: Arc<dyn Fetcher>,
}

impl fmt::Debug for DependencyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyResolver")
            .field("repositories", &self.repositories)
            .field("cache_dir", &self.cache_dir)
            .field("offline", &self.offline)
            .finish()
    }
}

impl DependencyResolver {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        repositories: Vec<String>,
        offline: bool,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            repositories,
            cache_dir: cache_dir.into(),
            offline,
            fetcher,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn cached_path(&self, dependency: &Dependency) -> PathBuf {
        self.cache_dir.join(dependency.repository_path())
    }

    /// Resolve one dependency to a local artifact path, fetching and caching
    /// it when allowed.
    pub fn resolve(&self, dependency: &Dependency) -> Result<PathBuf, ResolveError> {
        let cached = self.cached_path(dependency);
        if cached.is_file() {
            debug!(dependency = %dependency, "Dependency cache hit");
            return Ok(cached);
        }
        if self.offline {
            return Err(ResolveError::OfflineMiss(dependency.clone()));
        }

        for repository in &self.repositories {
            let url = format!(
                "{}/{}",
                repository.trim_end_matches('/'),
                dependency.repository_path()
            );
            let Some(bytes) = self.fetcher.fetch(&url)? else {
                continue;
            };
            self.verify_checksum(dependency, &url, &bytes)?;
            if let Some(parent) = cached.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&cached, &bytes)?;
            info!(
                dependency = %dependency,
                repository = %repository,
                bytes = bytes.len(),
                "Dependency resolved"
            );
            return Ok(cached);
        }
        Err(ResolveError::NotFound(dependency.clone()))
    }

    pub fn resolve_all(&self, dependencies: &[Dependency]) -> Result<Vec<PathBuf>, ResolveError> {
        dependencies.iter().map(|d| self.resolve(d)).collect()
    }

    fn verify_checksum(
        &self,
        dependency: &Dependency,
        url: &str,
        bytes: &[u8],
    ) -> Result<(), ResolveError> {
        let Some(sum) = self.fetcher.fetch(&format!("{url}.sha256"))? else {
            return Ok(());
        };
        let expected = String::from_utf8_lossy(&sum)
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase();
        let computed = hex_digest(bytes);
        if expected != computed {
            return Err(ResolveError::ChecksumMismatch {
                dependency: dependency.clone(),
                expected,
                computed,
            });
        }
        debug!(dependency = %dependency, "Dependency checksum verified");
        Ok(())
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Local filesystem repository, used in tests and for air-gapped mirrors.
#[derive(Debug)]
pub struct DirFetcher {
    root: PathBuf,
}

impl DirFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Fetcher for DirFetcher {
    fn fetch(&self, url: &str) -> Result<Option<Vec<u8>>, ResolveError> {
        // Repository "URLs" are plain relative paths under the root.
        let path: &Path = Path::new(url.trim_start_matches('/'));
        let full = self.root.join(path);
        if !full.is_file() {
            return Ok(None);
        }
        Ok(Some(fs::read(full)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
        entries: std::collections::HashMap<String, Vec<u8>>,
    }

    impl CountingFetcher {
        fn with(entries: &[(&str, &[u8])]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                entries: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_vec()))
                    .collect(),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Fetcher for CountingFetcher {
        fn fetch(&self, url: &str) -> Result<Option<Vec<u8>>, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.entries.get(url).cloned())
        }
    }

    fn dep() -> Dependency {
        Dependency::new("com.example", "engine", "1.2.0")
    }

    #[test]
    fn coordinate_parsing() {
        let parsed: Dependency = "com.example:engine:1.2.0".parse().unwrap();
        assert_eq!(parsed, dep());
        assert_eq!(
            parsed.repository_path(),
            "com/example/engine/1.2.0/engine-1.2.0.jar"
        );
        assert!("com.example:engine".parse::<Dependency>().is_err());
        assert!("a:b:c:d".parse::<Dependency>().is_err());
    }

    #[test]
    fn offline_cache_hit_never_fetches() {
        let cache = tempfile::tempdir().unwrap();
        let cached = cache.path().join(dep().repository_path());
        fs::create_dir_all(cached.parent().unwrap()).unwrap();
        fs::write(&cached, b"jar-bytes").unwrap();

        let fetcher = Arc::new(CountingFetcher::default());
        let resolver = DependencyResolver::new(
            cache.path(),
            vec!["http://repo".to_string()],
            true,
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        );

        assert_eq!(resolver.resolve(&dep()).unwrap(), cached);
        assert_eq!(fetcher.calls(), 0);
    }

    #[test]
    fn offline_cache_miss_fails_without_network() {
        let cache = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::default());
        let resolver = DependencyResolver::new(
            cache.path(),
            vec!["http://repo".to_string()],
            true,
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        );

        assert!(matches!(
            resolver.resolve(&dep()),
            Err(ResolveError::OfflineMiss(_))
        ));
        assert_eq!(fetcher.calls(), 0);
    }

    #[test]
    fn fetch_populates_the_cache() {
        let cache = tempfile::tempdir().unwrap();
        let url = format!("http://repo/{}", dep().repository_path());
        let fetcher = Arc::new(CountingFetcher::with(&[(url.as_str(), b"jar-bytes")]));
        let resolver = DependencyResolver::new(
            cache.path(),
            vec!["http://repo".to_string()],
            false,
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        );

        let path = resolver.resolve(&dep()).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"jar-bytes");
        // One fetch for the artifact, one for the checksum.
        assert_eq!(fetcher.calls(), 2);

        // Second resolve is served from the cache.
        resolver.resolve(&dep()).unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn repositories_are_tried_in_order() {
        let cache = tempfile::tempdir().unwrap();
        let url = format!("http://second/{}", dep().repository_path());
        let fetcher = Arc::new(CountingFetcher::with(&[(url.as_str(), b"jar")]));
        let resolver = DependencyResolver::new(
            cache.path(),
            vec!["http://first".to_string(), "http://second".to_string()],
            false,
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        );

        assert!(resolver.resolve(&dep()).is_ok());
    }

    #[test]
    fn checksum_mismatch_is_fatal() {
        let cache = tempfile::tempdir().unwrap();
        let url = format!("http://repo/{}", dep().repository_path());
        let sum_url = format!("{url}.sha256");
        let fetcher = Arc::new(CountingFetcher::with(&[
            (url.as_str(), b"jar-bytes".as_slice()),
            (sum_url.as_str(), b"deadbeef".as_slice()),
        ]));
        let resolver = DependencyResolver::new(
            cache.path(),
            vec!["http://repo".to_string()],
            false,
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        );

        assert!(matches!(
            resolver.resolve(&dep()),
            Err(ResolveError::ChecksumMismatch { .. })
        ));
        // Nothing entered the cache.
        assert!(!resolver.cached_path(&dep()).exists());
    }

    #[test]
    fn matching_checksum_is_accepted() {
        let cache = tempfile::tempdir().unwrap();
        let url = format!("http://repo/{}", dep().repository_path());
        let sum_url = format!("{url}.sha256");
        let sum = hex_digest(b"jar-bytes");
        let fetcher = Arc::new(CountingFetcher::with(&[
            (url.as_str(), b"jar-bytes".as_slice()),
            (sum_url.as_str(), sum.as_bytes()),
        ]));
        let resolver = DependencyResolver::new(
            cache.path(),
            vec!["http://repo".to_string()],
            false,
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        );

        assert!(resolver.resolve(&dep()).is_ok());
    }

    #[test]
    fn miss_in_every_repository_is_not_found() {
        let cache = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::default());
        let resolver = DependencyResolver::new(
            cache.path(),
            vec!["http://a".to_string(), "http://b".to_string()],
            false,
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        );

        assert!(matches!(
            resolver.resolve(&dep()),
            Err(ResolveError::NotFound(_))
        ));
        assert_eq!(fetcher.calls(), 2);
    }
}
