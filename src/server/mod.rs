//! HTTP transport adapter.
//!
//! The dispatch engine never opens sockets; this module bridges it to
//! `may_minihttp`. [`GatewayService`] parses each raw request, routes it to a
//! hosted application by context path, runs the engine, and writes the
//! response back, blocking the serving coroutine through any async hand-off.

mod http_server;
mod request;
mod response;
mod service;

pub use http_server::{HttpServer, ServerHandle};
pub use request::parse_request;
pub use service::GatewayService;
