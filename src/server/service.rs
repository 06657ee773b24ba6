use super::request::parse_request;
use super::response::{write_plain, write_response};
use crate::dispatch::{DispatchEngine, EndState};
use crate::host::AppHost;
use crate::http::HttpResponse;
use crate::ids::REQUEST_ID_HEADER;
use may_minihttp::{HttpService, Request, Response};
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// The per-connection HTTP service: one coroutine runs `call` per request.
///
/// Routing happens in two stages: the host picks the application by context
/// path, the engine picks the servlet inside it. An async hand-off parks this
/// coroutine on the continuation channel until the application completes or
/// the timeout fires, so the connection stays open for the deferred response.
#[derive(Clone)]
pub struct GatewayService {
    host: Arc<AppHost>,
    engine: DispatchEngine,
}

impl GatewayService {
    pub fn new(host: Arc<AppHost>) -> Self {
        Self {
            host,
            engine: DispatchEngine::new(),
        }
    }

    pub fn host(&self) -> &Arc<AppHost> {
        &self.host
    }
}

impl HttpService for GatewayService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let started = Instant::now();
        let mut request = match parse_request(req) {
            Ok(request) => request,
            Err(method) => {
                write_plain(res, 400, &format!("unsupported method {method:?}"));
                return Ok(());
            }
        };

        let Some(app) = self.host.route(request.path()) else {
            write_plain(res, 404, "Not Found");
            return Ok(());
        };

        let mut response = HttpResponse::new();
        match self.engine.process(&app, &mut request, &mut response) {
            EndState::Completed => {}
            EndState::PendingAsync(pending) => {
                self.engine
                    .finish_async(&app, &mut request, &mut response, pending);
            }
        }

        info!(
            request_id = %request.id,
            method = %request.method,
            path = %request.path(),
            context_path = %app.context_path(),
            status = response.status(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
        // Echo the correlation id past commit and error-dispatch resets.
        res.header(Box::leak(
            format!("{REQUEST_ID_HEADER}: {}", request.id).into_boxed_str(),
        ));
        write_response(res, response);
        Ok(())
    }
}
