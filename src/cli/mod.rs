//! Command-line interface.
//!
//! Three commands: `serve` deploys one or more archives and runs the HTTP
//! listener, `deploy` performs a deployment and reports the outcome without
//! serving, `index` builds the annotation index for an archive so it can be
//! attached at `META-INF/caribe/annotations.json`.

mod commands;

pub use commands::{run_cli, Cli, Commands};
