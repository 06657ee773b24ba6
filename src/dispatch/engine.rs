use super::async_support::{AsyncCell, AsyncSignal};
use super::chain::FilterChain;
use super::PendingAsync;
use crate::app::{AppState, Filter, ServletError, WebApp};
use crate::http::{attrs, HttpRequest, HttpResponse};
use crate::managers::{AuthOutcome, SESSION_COOKIE};
use may::sync::mpsc;
use serde_json::json;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// How one `process` call ended.
#[must_use]
#[derive(Debug)]
pub enum EndState {
    /// The response is final; the adapter may write it out.
    Completed,
    /// The request went async. The adapter must call
    /// [`DispatchEngine::finish_async`] to park until resolution.
    PendingAsync(PendingAsync),
}

enum Invocation {
    Done,
    Async(mpsc::Receiver<AsyncSignal>),
}

/// Runs one request through security, routing, the filter chain and the
/// servlet, then error dispatch if anything failed. Stateless: everything
/// per-application lives on the [`WebApp`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchEngine;

impl DispatchEngine {
    pub fn new() -> Self {
        Self
    }

    /// Process a request against `app`. The request path is absolute; the
    /// engine strips the application's context path before routing.
    pub fn process(
        &self,
        app: &WebApp,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
    ) -> EndState {
        if app.state() != AppState::Running {
            warn!(
                request_id = %req.id,
                context_path = %app.context_path(),
                state = ?app.state(),
                "Request refused: application not running"
            );
            res.set_status(503);
            res.set_header("Content-Type", "text/plain");
            res.write(b"Service Unavailable");
            res.commit();
            return EndState::Completed;
        }

        for listener in app.request_listeners() {
            listener.request_started(req);
        }

        let invocation = match relative_path(app.context_path(), req.path()) {
            Some(relative) => self.invoke(app, req, res, &relative, true),
            None => {
                self.fail(app, req, res, 404, &[], "path outside context");
                Invocation::Done
            }
        };

        match invocation {
            Invocation::Async(rx) => EndState::PendingAsync(PendingAsync { rx }),
            Invocation::Done => {
                self.complete(app, req, res);
                EndState::Completed
            }
        }
    }

    /// Park until the async hand-off resolves, then finalize the response.
    /// Liveness is guaranteed by the timeout sentinel armed at hand-off.
    pub fn finish_async(
        &self,
        app: &WebApp,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
        pending: PendingAsync,
    ) {
        // A response committed before the hand-off is already on the wire;
        // the resolution signal must not splice anything into it.
        match pending.rx.recv() {
            Ok(AsyncSignal::Complete(payload)) => {
                debug!(request_id = %req.id, status = payload.status, "Async request completed");
                if res.reset() {
                    res.set_status(payload.status);
                    for (name, value) in &payload.headers {
                        res.add_header(name, value);
                    }
                    res.write(&payload.body);
                } else {
                    warn!(
                        request_id = %req.id,
                        "Async completion after response commit; streamed output stands"
                    );
                }
            }
            Ok(AsyncSignal::Dispatch(path)) => {
                debug!(request_id = %req.id, path = %path, "Async request re-dispatched");
                let mut target = req.for_dispatch(&path);
                if res.reset() {
                    match relative_path(app.context_path(), target.path()) {
                        Some(relative) => {
                            let _ = self.invoke(app, &mut target, res, &relative, false);
                        }
                        None => self.fail(app, &mut target, res, 404, &[], "path outside context"),
                    }
                } else {
                    warn!(
                        request_id = %req.id,
                        "Async dispatch after response commit; streamed output stands"
                    );
                }
            }
            Ok(AsyncSignal::Timeout) | Err(_) => {
                error!(request_id = %req.id, "Async request timed out");
                if res.reset() {
                    res.set_status(500);
                    res.set_header("Content-Type", "text/plain");
                    res.write(b"Error 500");
                }
            }
        }
        self.complete(app, req, res);
    }

    fn invoke(
        &self,
        app: &WebApp,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
        relative: &str,
        allow_async: bool,
    ) -> Invocation {
        let managers = app.managers();

        match managers.security.authenticate(req, res) {
            Ok(AuthOutcome::Continue) => {}
            Ok(AuthOutcome::Denied(status)) => {
                self.fail(app, req, res, status, &[], "access denied");
                return Invocation::Done;
            }
            Err(err) => {
                self.fail_err(app, req, res, &err);
                return Invocation::Done;
            }
        }

        // Sessions are resumed here, never created: creation is an explicit
        // application decision through the session manager.
        if req.cookie(SESSION_COOKIE).is_some() {
            managers.session.lookup_or_create(req, res);
        }

        let routing = app.routing();
        let Some(route) = routing.route(relative) else {
            self.fail(app, req, res, 404, &[], "no servlet mapping");
            return Invocation::Done;
        };
        req.set_dispatch_paths(app.context_path(), &route.servlet_path, route.path_info.clone());

        let Some(registration) = app.servlet_registration(&route.servlet_name) else {
            error!(
                request_id = %req.id,
                servlet = %route.servlet_name,
                "Mapping references an unregistered servlet"
            );
            self.fail(app, req, res, 500, &[], "unregistered servlet");
            return Invocation::Done;
        };

        let factory = app.instance_factory();
        let servlet = match registration.instance(factory.as_ref()) {
            Ok(servlet) => servlet,
            Err(err) => {
                self.fail_err(app, req, res, &err);
                return Invocation::Done;
            }
        };

        if let Some(role) = registration.run_as() {
            req.set_attribute(attrs::RUN_AS, json!(role));
        }

        let mut async_slot = None;
        if allow_async && registration.async_supported() {
            let (cell, rx) = AsyncCell::new();
            req.async_cell = Some(Arc::clone(&cell));
            async_slot = Some((cell, rx));
        }

        // Filters in ascending priority; equal priorities keep registration
        // order.
        let mut filter_regs = Vec::new();
        for name in routing.filters_for(relative, &route.servlet_name) {
            match app.filter_registration(&name) {
                Some(reg) => filter_regs.push(reg),
                None => warn!(filter = %name, "Filter mapping references an unregistered filter"),
            }
        }
        filter_regs.sort_by_key(|reg| (reg.priority(), reg.order()));

        let mut filters: Vec<Arc<dyn Filter>> = Vec::with_capacity(filter_regs.len());
        for reg in &filter_regs {
            match reg.instance(factory.as_ref()) {
                Ok(filter) => filters.push(filter),
                Err(err) => {
                    self.fail_err(app, req, res, &err);
                    return Invocation::Done;
                }
            }
        }

        let chain = FilterChain::new(&filters, servlet.as_ref());
        let outcome = catch_unwind(AssertUnwindSafe(|| chain.proceed(req, res)));
        let outcome = match outcome {
            Ok(result) => result,
            Err(panic) => Err(ServletError::new("caribe.dispatch.Panic", panic_message(&panic))
                .with_status(500)),
        };

        match outcome {
            Ok(()) => {
                if req.async_started() {
                    if let Some((cell, rx)) = async_slot {
                        cell.arm_timeout(app.async_timeout());
                        return Invocation::Async(rx);
                    }
                }
                req.async_cell = None;
                if let Some(status) = res.error_status() {
                    res.clear_error_status();
                    self.fail(app, req, res, status, &[], "error status signaled");
                }
            }
            Err(err) => {
                req.async_cell = None;
                self.fail_err(app, req, res, &err);
            }
        }
        Invocation::Done
    }

    fn fail_err(
        &self,
        app: &WebApp,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
        err: &ServletError,
    ) {
        let status = err.status().unwrap_or(500);
        let kinds = err.kind_chain();
        error!(
            request_id = %req.id,
            kind = %err.kind(),
            status = status,
            error = %err,
            "Request invocation failed"
        );
        self.fail(app, req, res, status, &kinds, err.message());
    }

    /// Error dispatch. Resets the response, records the error attributes and
    /// routes to a configured error page; without one (or if the page itself
    /// fails) a minimal body is emitted. A committed response cannot be
    /// replaced, so the failure is only logged.
    fn fail(
        &self,
        app: &WebApp,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
        status: u16,
        kinds: &[&str],
        message: &str,
    ) {
        if res.is_committed() {
            warn!(
                request_id = %req.id,
                status = status,
                "Error after response commit; output already sent"
            );
            return;
        }

        // One level of error dispatch only.
        if req.attribute(attrs::ERROR_REQUEST_PATH).is_some() {
            warn!(request_id = %req.id, status = status, "Error page itself failed");
            minimal_error_body(res, status);
            return;
        }

        let original_path = req.path().to_string();
        res.reset();
        res.set_status(status);
        req.set_attribute(attrs::ERROR_REQUEST_PATH, json!(original_path));
        req.set_attribute(attrs::ERROR_STATUS, json!(status));
        req.set_attribute(attrs::ERROR_MESSAGE, json!(message));
        if let Some(kind) = kinds.first() {
            req.set_attribute(attrs::ERROR_KIND, json!(kind));
        }

        if let Some(location) = app.error_page_for(status, kinds) {
            if self.dispatch_error_page(app, req, res, &location) {
                return;
            }
            warn!(
                request_id = %req.id,
                location = %location,
                "Error page dispatch failed; emitting minimal body"
            );
            res.reset();
            res.set_status(status);
        }
        minimal_error_body(res, status);
    }

    /// Error pages run through the servlet alone, skipping filters.
    fn dispatch_error_page(
        &self,
        app: &WebApp,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
        location: &str,
    ) -> bool {
        let Some(route) = app.routing().route(location) else {
            return false;
        };
        let Some(registration) = app.servlet_registration(&route.servlet_name) else {
            return false;
        };
        let Ok(servlet) = registration.instance(app.instance_factory().as_ref()) else {
            return false;
        };
        req.set_dispatch_paths(app.context_path(), &route.servlet_path, route.path_info.clone());
        matches!(
            catch_unwind(AssertUnwindSafe(|| servlet.service(req, res))),
            Ok(Ok(()))
        )
    }

    fn complete(&self, app: &WebApp, req: &mut HttpRequest, res: &mut HttpResponse) {
        res.commit();
        for listener in app.request_listeners() {
            listener.request_completed(req);
        }
        if let Some(closer) = res.take_closer() {
            closer();
        }
    }
}

fn relative_path(context_path: &str, path: &str) -> Option<String> {
    if context_path.is_empty() {
        return Some(if path.is_empty() {
            "/".to_string()
        } else {
            path.to_string()
        });
    }
    if path == context_path {
        return Some("/".to_string());
    }
    path.strip_prefix(context_path)
        .filter(|rest| rest.starts_with('/'))
        .map(str::to_string)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}

fn minimal_error_body(res: &mut HttpResponse, status: u16) {
    res.set_header("Content-Type", "text/plain");
    res.write(format!("Error {status}").as_bytes());
}
