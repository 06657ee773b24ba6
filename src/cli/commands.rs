use crate::config::RuntimeConfig;
use crate::deploy::{
    default_registry, keys, Dependency, DependencyResolver, Fetcher, HttpFetcher, MicroDeployer,
};
use crate::host::{AppHost, PidWatcher};
use crate::index::{AnnotationIndex, IndexBuilder};
use crate::resource::{ArchiveResources, RebasedResources, ResourceSet};
use crate::server::{GatewayService, HttpServer};
use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "caribe")]
#[command(about = "Caribe web-application server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Dependency resolution options shared by `serve` and `deploy`.
#[derive(Debug, clap::Args)]
pub struct ResolverArgs {
    /// Repository base URL, highest priority first (repeatable)
    #[arg(long = "repo")]
    pub repositories: Vec<String>,

    /// Local artifact cache directory
    #[arg(long, default_value = ".caribe/cache")]
    pub cache_dir: PathBuf,

    /// Never touch the network; uncached dependencies fail the deployment
    #[arg(long, default_value_t = false)]
    pub offline: bool,

    /// Runtime dependency as group:artifact:version (repeatable)
    #[arg(long = "dependency")]
    pub dependencies: Vec<String>,

    /// TOML file listing dependencies and repositories
    #[arg(long)]
    pub dependencies_config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploy archives and run the HTTP listener
    Serve {
        /// Application archives (.war files); each mounts at /<file-stem>
        #[arg(required = true)]
        archives: Vec<PathBuf>,

        /// Address and port to bind
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,

        /// Pid marker file; deleting it shuts the server down
        #[arg(long)]
        pid_file: Option<PathBuf>,

        /// Directory for per-application deploying/started marker files
        #[arg(long)]
        marker_dir: Option<PathBuf>,

        #[command(flatten)]
        resolver: ResolverArgs,
    },
    /// Deploy an archive, report the outcome, and stop
    Deploy {
        /// Application archive (.war file)
        archive: PathBuf,

        /// Context path to mount at (default: derived from the archive name)
        #[arg(long)]
        context: Option<String>,

        #[command(flatten)]
        resolver: ResolverArgs,
    },
    /// Build the annotation index for an archive
    Index {
        /// Application archive (.war file)
        archive: PathBuf,

        /// Write the JSON index here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

/// Dependency list file (`caribe-dependencies.toml`).
#[derive(Debug, Default, Deserialize)]
struct DependenciesConfig {
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    repositories: Vec<String>,
}

pub fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            archives,
            addr,
            pid_file,
            marker_dir,
            resolver,
        } => serve(&archives, &addr, pid_file, marker_dir, &resolver),
        Commands::Deploy {
            archive,
            context,
            resolver,
        } => deploy_once(&archive, context, &resolver),
        Commands::Index { archive, out } => build_index(&archive, out.as_deref()),
    }
}

fn build_deployer(args: &ResolverArgs) -> anyhow::Result<MicroDeployer> {
    let mut dependencies = args.dependencies.clone();
    let mut repositories = args.repositories.clone();
    if let Some(path) = &args.dependencies_config {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let file: DependenciesConfig =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        dependencies.extend(file.dependencies);
        repositories.extend(file.repositories);
    }
    let dependencies = dependencies
        .iter()
        .map(|coord| coord.parse::<Dependency>())
        .collect::<Result<Vec<_>, _>>()?;

    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new()?);
    let resolver = DependencyResolver::new(
        args.cache_dir.clone(),
        repositories,
        args.offline,
        fetcher,
    );
    Ok(MicroDeployer::new(resolver, Arc::new(default_registry()))
        .with_dependencies(dependencies))
}

fn serve(
    archives: &[PathBuf],
    addr: &str,
    pid_file: Option<PathBuf>,
    marker_dir: Option<PathBuf>,
    resolver: &ResolverArgs,
) -> anyhow::Result<()> {
    let runtime = RuntimeConfig::from_env();
    may::config().set_stack_size(runtime.stack_size);

    let deployer = build_deployer(resolver)?;
    let mut host = AppHost::new();
    if let Some(dir) = marker_dir {
        host = host.with_marker_dir(dir);
    }
    let host = Arc::new(host);

    for archive in archives {
        let name = archive
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("app")
            .to_string();
        let context = host.deploy(&name, &deployer, archive, HashMap::new())?;
        info!(archive = %archive.display(), context_path = %context, "Deployed");
    }

    let handle = HttpServer(GatewayService::new(Arc::clone(&host))).start(addr)?;
    info!(addr = %addr, "Listening");

    match pid_file {
        Some(path) => {
            let watcher = PidWatcher::start(path)?;
            watcher.wait();
            info!("Shutting down");
            host.stop_all();
            handle.stop();
        }
        None => {
            handle
                .join()
                .map_err(|e| anyhow::anyhow!("server thread panicked: {e:?}"))?;
            host.stop_all();
        }
    }
    Ok(())
}

fn deploy_once(
    archive: &Path,
    context: Option<String>,
    resolver: &ResolverArgs,
) -> anyhow::Result<()> {
    let deployer = build_deployer(resolver)?;
    let mut config = HashMap::new();
    if let Some(context) = context {
        config.insert(keys::CONTEXT_ROOT.to_string(), context);
    }
    let outcome = deployer.deploy(archive, config)?;
    println!("context-root: {}", outcome.context_root);
    for name in &outcome.servlet_names {
        println!("servlet: {name}");
    }
    outcome.handle.stop();
    Ok(())
}

fn build_index(archive: &Path, out: Option<&Path>) -> anyhow::Result<()> {
    let archive_set: Arc<dyn ResourceSet> = Arc::new(ArchiveResources::open(archive)?);
    let mut builder = IndexBuilder::new();
    // Libraries first so application classes shadow them.
    for path in archive_set.paths() {
        if path.starts_with("WEB-INF/lib/") && path.ends_with(".jar") {
            if let Ok(Some(bytes)) = archive_set.read(&path) {
                if let Ok(jar) = ArchiveResources::from_bytes(path, bytes) {
                    builder.add_set(&jar);
                }
            }
        }
    }
    let classes = RebasedResources::new("WEB-INF/classes", Arc::clone(&archive_set));
    builder.add_set(&classes);
    let index: AnnotationIndex = builder.build();

    let json = index.to_json()?;
    match out {
        Some(path) => {
            std::fs::write(path, &json).with_context(|| format!("writing {}", path.display()))?;
            info!(
                out = %path.display(),
                classes = index.class_count(),
                "Annotation index written"
            );
        }
        None => println!("{}", String::from_utf8_lossy(&json)),
    }
    Ok(())
}
