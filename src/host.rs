//! Multi-application host.
//!
//! An [`AppHost`] owns any number of deployed applications keyed by context
//! path and routes incoming request paths to the application with the
//! longest matching context. Each application starts and stops on its own;
//! one failed deployment never touches the others.
//!
//! Two filesystem contracts support external supervision. Per-application
//! marker files (`<name>.deploying` while a deployment is in flight,
//! `<name>.started` once it serves) let an operator see which applications
//! survived a restart. A pid marker file, polled on an interval, signals
//! shutdown by absence: delete the file and the host drains and stops.

use crate::app::WebApp;
use crate::config;
use crate::deploy::{DeployError, DeployHandle, DeployOutcome, MicroDeployer};
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Deploy(#[from] DeployError),
    #[error("context path {0:?} is already hosted")]
    ContextTaken(String),
    #[error("marker file error: {0}")]
    Marker(#[from] std::io::Error),
}

struct HostedApp {
    name: String,
    app: Arc<WebApp>,
    handle: Option<DeployHandle>,
}

/// Applications keyed by context path, with longest-context request routing.
pub struct AppHost {
    apps: DashMap<String, HostedApp>,
    marker_dir: Option<PathBuf>,
}

impl Default for AppHost {
    fn default() -> Self {
        Self::new()
    }
}

impl AppHost {
    pub fn new() -> Self {
        Self {
            apps: DashMap::new(),
            marker_dir: None,
        }
    }

    /// Enable per-application marker files under `dir`.
    pub fn with_marker_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.marker_dir = Some(dir.into());
        self
    }

    /// Deploy an archive through `deployer` and host the result.
    ///
    /// The `.deploying` marker exists for exactly the duration of the
    /// attempt; `.started` appears only on success. A failure is reported to
    /// the caller and leaves every other hosted application untouched.
    pub fn deploy(
        &self,
        name: &str,
        deployer: &MicroDeployer,
        archive: &Path,
        config: HashMap<String, String>,
    ) -> Result<String, HostError> {
        self.write_marker(name, "deploying")?;
        let outcome = match deployer.deploy(archive, config) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.remove_marker(name, "deploying");
                error!(app = %name, error = %err, "Deployment failed");
                return Err(err.into());
            }
        };
        let context_root = outcome.context_root.clone();
        if let Err(err) = self.adopt(name, outcome) {
            self.remove_marker(name, "deploying");
            return Err(err);
        }
        self.remove_marker(name, "deploying");
        self.write_marker(name, "started")?;
        Ok(context_root)
    }

    fn adopt(&self, name: &str, outcome: DeployOutcome) -> Result<(), HostError> {
        let app = outcome
            .handle
            .web_app()
            .ok_or_else(|| DeployError::Boundary("bootstrap exposes no application".into()))?;
        let entry = HostedApp {
            name: name.to_string(),
            app,
            handle: Some(outcome.handle),
        };
        self.insert(outcome.context_root, entry)
    }

    /// Host an already-running application (embedded use, no deployer).
    pub fn add(&self, name: &str, app: Arc<WebApp>) -> Result<(), HostError> {
        let context = app.context_path().to_string();
        self.insert(
            context,
            HostedApp {
                name: name.to_string(),
                app,
                handle: None,
            },
        )
    }

    fn insert(&self, context: String, entry: HostedApp) -> Result<(), HostError> {
        // Entry API keeps check-and-insert atomic under concurrent deploys.
        match self.apps.entry(context.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(HostError::ContextTaken(context)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                info!(app = %entry.name, context_path = %context, "Application hosted");
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// The hosted application whose context path is the longest prefix of
    /// `path`. The root context ("") matches everything as a last resort.
    pub fn route(&self, path: &str) -> Option<Arc<WebApp>> {
        let mut best: Option<(usize, Arc<WebApp>)> = None;
        for entry in self.apps.iter() {
            let context = entry.key();
            let matches = context.is_empty()
                || path == context
                || path.starts_with(context) && path.as_bytes().get(context.len()) == Some(&b'/');
            if !matches {
                continue;
            }
            if best.as_ref().map_or(true, |(len, _)| context.len() > *len) {
                best = Some((context.len(), Arc::clone(&entry.value().app)));
            }
        }
        best.map(|(_, app)| app)
    }

    pub fn app_at(&self, context_path: &str) -> Option<Arc<WebApp>> {
        self.apps.get(context_path).map(|e| Arc::clone(&e.app))
    }

    pub fn context_paths(&self) -> Vec<String> {
        self.apps.iter().map(|e| e.key().clone()).collect()
    }

    /// Stop and unhost one application. Missing context is a no-op.
    pub fn stop_app(&self, context_path: &str) {
        if let Some((_, entry)) = self.apps.remove(context_path) {
            self.remove_marker(&entry.name, "started");
            match &entry.handle {
                Some(handle) => handle.stop(),
                None => {
                    if let Err(err) = crate::lifecycle::stop(&entry.app) {
                        warn!(context_path = %context_path, error = %err, "Stop did not complete cleanly");
                    }
                }
            }
            info!(app = %entry.name, context_path = %context_path, "Application unhosted");
        }
    }

    /// Stop every hosted application. One application's failure to stop
    /// cleanly never skips the rest.
    pub fn stop_all(&self) {
        for context in self.context_paths() {
            self.stop_app(&context);
        }
    }

    fn write_marker(&self, name: &str, suffix: &str) -> Result<(), std::io::Error> {
        if let Some(dir) = &self.marker_dir {
            std::fs::create_dir_all(dir)?;
            std::fs::write(dir.join(format!("{name}.{suffix}")), std::process::id().to_string())?;
        }
        Ok(())
    }

    fn remove_marker(&self, name: &str, suffix: &str) {
        if let Some(dir) = &self.marker_dir {
            let path = dir.join(format!("{name}.{suffix}"));
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(marker = %path.display(), error = %err, "Could not remove marker file");
                }
            }
        }
    }
}

impl std::fmt::Debug for AppHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppHost")
            .field("contexts", &self.context_paths())
            .finish()
    }
}

/// External-shutdown contract: a pid file whose absence means "stop".
///
/// [`PidWatcher::start`] writes the process id to the file and polls its
/// presence from a plain thread. Deleting the file resolves the watcher;
/// `wait` blocks until then. `cancel` stops the watcher from inside the
/// process (normal shutdown paths) and removes the file.
pub struct PidWatcher {
    pid_file: PathBuf,
    rx: std::sync::mpsc::Receiver<()>,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

impl PidWatcher {
    /// Poll every [`config::pid_poll_interval`].
    pub fn start(pid_file: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        Self::start_with_interval(pid_file, config::pid_poll_interval())
    }

    pub fn start_with_interval(
        pid_file: impl Into<PathBuf>,
        interval: Duration,
    ) -> Result<Self, std::io::Error> {
        let pid_file = pid_file.into();
        if let Some(parent) = pid_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&pid_file, std::process::id().to_string())?;
        info!(pid_file = %pid_file.display(), "Pid file written");

        let (tx, rx) = std::sync::mpsc::channel();
        let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let watched = pid_file.clone();
        let flag = Arc::clone(&cancelled);
        std::thread::spawn(move || loop {
            if flag.load(std::sync::atomic::Ordering::SeqCst) {
                return;
            }
            if !watched.is_file() {
                info!(pid_file = %watched.display(), "Pid file removed, requesting shutdown");
                let _ = tx.send(());
                return;
            }
            std::thread::sleep(interval);
        });

        Ok(Self {
            pid_file,
            rx,
            cancelled,
        })
    }

    /// Block until the pid file disappears or the watcher is cancelled.
    pub fn wait(&self) {
        let _ = self.rx.recv();
    }

    /// Stop watching and remove the pid file.
    pub fn cancel(&self) {
        self.cancelled
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let _ = std::fs::remove_file(&self.pid_file);
    }
}

impl std::fmt::Debug for PidWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PidWatcher")
            .field("pid_file", &self.pid_file)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppState;
    use crate::lifecycle;

    fn running_app(context: &str) -> Arc<WebApp> {
        let app = Arc::new(WebApp::new(context).unwrap());
        lifecycle::start(&app).unwrap();
        app
    }

    #[test]
    fn routes_to_the_longest_matching_context() {
        let host = AppHost::new();
        host.add("root", running_app("")).unwrap();
        host.add("api", running_app("/api")).unwrap();
        host.add("api-v2", running_app("/api/v2")).unwrap();

        assert_eq!(
            host.route("/api/v2/users").unwrap().context_path(),
            "/api/v2"
        );
        assert_eq!(host.route("/api/users").unwrap().context_path(), "/api");
        // "/apiary" shares a prefix with "/api" but not a path segment.
        assert_eq!(host.route("/apiary").unwrap().context_path(), "");
        assert_eq!(host.route("/other").unwrap().context_path(), "");
    }

    #[test]
    fn duplicate_context_is_rejected() {
        let host = AppHost::new();
        host.add("a", running_app("/x")).unwrap();
        assert!(matches!(
            host.add("b", running_app("/x")),
            Err(HostError::ContextTaken(_))
        ));
    }

    #[test]
    fn stopping_one_app_leaves_the_others_serving() {
        let host = AppHost::new();
        host.add("a", running_app("/a")).unwrap();
        host.add("b", running_app("/b")).unwrap();

        let b = host.app_at("/b").unwrap();
        host.stop_app("/b");
        assert_eq!(b.state(), AppState::Stopped);
        assert!(host.route("/b/x").is_none());

        let a = host.route("/a/x").unwrap();
        assert_eq!(a.state(), AppState::Running);
    }

    #[test]
    fn failed_deploy_leaves_no_marker_and_other_apps_alone() {
        let dir = tempfile::tempdir().unwrap();
        let host = AppHost::new().with_marker_dir(dir.path());
        host.add("healthy", running_app("/ok")).unwrap();

        let cache = tempfile::tempdir().unwrap();
        let deployer = MicroDeployer::new(
            crate::deploy::DependencyResolver::new(
                cache.path(),
                Vec::new(),
                true,
                Arc::new(crate::deploy::DirFetcher::new("/nonexistent")),
            ),
            Arc::new(crate::deploy::default_registry()),
        );
        // Not a zip archive at all.
        let bogus = dir.path().join("bad.war");
        std::fs::write(&bogus, b"not a zip").unwrap();

        assert!(host
            .deploy("bad", &deployer, &bogus, HashMap::new())
            .is_err());
        assert!(!dir.path().join("bad.deploying").exists());
        assert!(!dir.path().join("bad.started").exists());
        assert_eq!(host.route("/ok/x").unwrap().state(), AppState::Running);
    }

    #[test]
    fn pid_file_removal_triggers_shutdown_signal() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("host.pid");
        let watcher =
            PidWatcher::start_with_interval(&pid_file, Duration::from_millis(10)).unwrap();
        assert!(pid_file.is_file());

        std::fs::remove_file(&pid_file).unwrap();
        // recv returns once the poll thread notices the file is gone.
        watcher.wait();
    }

    #[test]
    fn cancel_removes_the_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("host.pid");
        let watcher =
            PidWatcher::start_with_interval(&pid_file, Duration::from_millis(10)).unwrap();
        watcher.cancel();
        assert!(!pid_file.is_file());
    }
}
