//! # Caribe
//!
//! **Caribe** is a modular, embeddable web-application server built on the
//! `may` coroutine runtime. Applications are packaged as archives (`.war`
//! zip files or exploded directories), registered through a YAML descriptor
//! or a statically built annotation index, and served through a
//! servlet-style filter-chain dispatch engine.
//!
//! ## Architecture
//!
//! - **[`resource`]** - archive abstraction: ordered, layered byte resources
//!   (directory, zip, in-memory, rebased views)
//! - **[`loader`]** - isolating class spaces: two loader tiers per deployment
//!   with an allow-list delegation boundary
//! - **[`classfile`]** / **[`index`]** - static class-file parsing and the
//!   annotation index that replaces classpath scanning
//! - **[`http`]** - per-invocation request/response pair with commit
//!   semantics and the async hand-off slot
//! - **[`app`]** - the application model: registrations, mappings, listeners,
//!   error pages, pluggable managers, lifecycle state
//! - **[`dispatch`]** - routing, filter chains, error dispatch, async
//!   completion
//! - **[`lifecycle`]** - startup/shutdown choreography per application
//! - **[`bootstrap`]** - descriptor and annotation-scan registration
//! - **[`deploy`]** - the outer deployer: dependency resolution, loader tier
//!   construction, the string-map bootstrap boundary
//! - **[`host`]** - multi-application hosting with longest-context routing
//!   and marker/pid file contracts
//! - **[`server`]** - `may_minihttp` transport adapter
//! - **[`managers`]** - security, session, naming, multipart capability seams
//! - **[`cli`]** - the `caribe` binary: serve, deploy, index
//!
//! ## Embedding
//!
//! ```rust,no_run
//! use caribe::app::{ServletDef, WebApp};
//! use caribe::host::AppHost;
//! use caribe::server::{GatewayService, HttpServer};
//! use std::sync::Arc;
//!
//! # fn demo(servlet: Arc<dyn caribe::app::HttpServlet>) -> anyhow::Result<()> {
//! let app = Arc::new(WebApp::new("/shop")?);
//! app.add_servlet(ServletDef::of_instance("catalog", servlet))?;
//! app.add_servlet_mapping("/catalog/*", "catalog")?;
//! caribe::lifecycle::start(&app)?;
//!
//! let host = Arc::new(AppHost::new());
//! host.add("shop", app)?;
//! let handle = HttpServer(GatewayService::new(host)).start("127.0.0.1:8080")?;
//! handle.join().ok();
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod bootstrap;
pub mod classfile;
pub mod cli;
pub mod config;
pub mod deploy;
pub mod dispatch;
pub mod host;
pub mod http;
pub mod ids;
pub mod index;
pub mod lifecycle;
pub mod loader;
pub mod managers;
pub mod resource;
pub mod server;
