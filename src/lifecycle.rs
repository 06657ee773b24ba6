//! Application startup and shutdown choreography.
//!
//! Startup runs in a fixed order: initializers (with the registration window
//! still open), routing freeze, lifecycle listeners, filter initialization in
//! registration order, then eager servlets by ascending `load_on_startup`.
//! Any failure destroys what was initialized, in reverse order, and leaves
//! the application in `Failed` without it ever serving a request.
//!
//! Shutdown destroys every initialized component in reverse initialization
//! order, lazily-initialized servlets included, then notifies lifecycle
//! listeners in reverse registration order and releases the class space.

use crate::app::{AppState, InitKind, InitRecord, ServletError, WebApp};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("startup of {context_path:?} failed during {phase}: {source}")]
    Startup {
        context_path: String,
        phase: &'static str,
        #[source]
        source: ServletError,
    },
    #[error("cannot transition {context_path:?} from state {state:?}")]
    InvalidState {
        context_path: String,
        state: AppState,
    },
}

/// Bring an application from `Created` to `Running`.
pub fn start(app: &WebApp) -> Result<(), LifecycleError> {
    match app.state() {
        AppState::Created => {}
        state => {
            return Err(LifecycleError::InvalidState {
                context_path: app.context_path().to_string(),
                state,
            })
        }
    }
    app.set_state(AppState::Initializing);

    for initializer in app.initializers() {
        if let Err(source) = initializer.on_startup(app) {
            return abort(app, "initializer", source);
        }
    }

    app.freeze_routing();

    for listener in app.lifecycle_listeners() {
        listener.started(app);
    }

    let factory = app.instance_factory();

    for registration in app.filter_registrations() {
        if let Err(source) = registration.instance(factory.as_ref()) {
            return abort(app, "filter init", source);
        }
        record(app, InitKind::Filter, registration.name());
    }

    let mut eager: Vec<_> = app
        .servlet_registrations()
        .into_iter()
        .filter(|r| r.load_on_startup() >= 0)
        .collect();
    eager.sort_by_key(|r| (r.load_on_startup(), r.order()));
    for registration in eager {
        if let Err(source) = registration.instance(factory.as_ref()) {
            return abort(app, "servlet init", source);
        }
        record(app, InitKind::Servlet, registration.name());
    }

    app.set_state(AppState::Running);
    info!(
        context_path = %app.context_path(),
        servlets = app.servlet_registrations().len(),
        filters = app.filter_registrations().len(),
        "Application started"
    );
    Ok(())
}

/// Bring a running application to `Stopped`. Calling stop on an application
/// that is already `Stopped` or `Failed` is a no-op.
pub fn stop(app: &WebApp) -> Result<(), LifecycleError> {
    match app.state() {
        AppState::Running => {}
        AppState::Stopped | AppState::Failed => return Ok(()),
        state => {
            return Err(LifecycleError::InvalidState {
                context_path: app.context_path().to_string(),
                state,
            })
        }
    }
    app.set_state(AppState::Stopping);

    destroy_all(app);

    for listener in app.lifecycle_listeners().iter().rev() {
        listener.stopping(app);
    }

    app.release_class_space();
    app.set_state(AppState::Stopped);
    info!(context_path = %app.context_path(), "Application stopped");
    Ok(())
}

fn record(app: &WebApp, kind: InitKind, name: &str) {
    app.init_log.lock().unwrap().push(InitRecord {
        kind,
        name: name.to_string(),
    });
}

fn abort(app: &WebApp, phase: &'static str, source: ServletError) -> Result<(), LifecycleError> {
    error!(
        context_path = %app.context_path(),
        phase = phase,
        error = %source,
        "Application startup failed"
    );
    destroy_all(app);
    app.set_state(AppState::Failed);
    Err(LifecycleError::Startup {
        context_path: app.context_path().to_string(),
        phase,
        source,
    })
}

/// Destroy initialized components in reverse init order, then sweep any
/// lazily-initialized stragglers. Registration-level guards make double
/// destroys harmless.
fn destroy_all(app: &WebApp) {
    let log: Vec<InitRecord> = {
        let mut guard = app.init_log.lock().unwrap();
        guard.drain(..).collect()
    };
    for entry in log.iter().rev() {
        match entry.kind {
            InitKind::Servlet => {
                if let Some(reg) = app.servlet_registration(&entry.name) {
                    reg.destroy();
                }
            }
            InitKind::Filter => {
                if let Some(reg) = app.filter_registration(&entry.name) {
                    reg.destroy();
                }
            }
        }
    }
    for reg in app.servlet_registrations().iter().rev() {
        reg.destroy();
    }
    for reg in app.filter_registrations().iter().rev() {
        reg.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{
        AppInitializer, HttpServlet, LifecycleListener, ServletConfig, ServletDef,
    };
    use crate::http::{HttpRequest, HttpResponse};
    use std::sync::{Arc, Mutex};

    type EventLog = Arc<Mutex<Vec<String>>>;

    struct Traced {
        tag: &'static str,
        log: EventLog,
        fail_init: bool,
    }

    impl Traced {
        fn new(tag: &'static str, log: &EventLog) -> Arc<Self> {
            Arc::new(Self {
                tag,
                log: Arc::clone(log),
                fail_init: false,
            })
        }

        fn failing(tag: &'static str, log: &EventLog) -> Arc<Self> {
            Arc::new(Self {
                tag,
                log: Arc::clone(log),
                fail_init: true,
            })
        }
    }

    impl HttpServlet for Traced {
        fn init(&self, _config: &ServletConfig) -> Result<(), ServletError> {
            if self.fail_init {
                return Err(ServletError::new("init.Failure", self.tag));
            }
            self.log.lock().unwrap().push(format!("init:{}", self.tag));
            Ok(())
        }

        fn service(
            &self,
            _req: &mut HttpRequest,
            _res: &mut HttpResponse,
        ) -> Result<(), ServletError> {
            Ok(())
        }

        fn destroy(&self) {
            self.log.lock().unwrap().push(format!("destroy:{}", self.tag));
        }
    }

    #[test]
    fn eager_servlets_initialize_in_ascending_order() {
        let log: EventLog = Arc::default();
        let app = WebApp::root();
        app.add_servlet(
            ServletDef::of_instance("late", Traced::new("late", &log)).load_on_startup(5),
        )
        .unwrap();
        app.add_servlet(
            ServletDef::of_instance("early", Traced::new("early", &log)).load_on_startup(1),
        )
        .unwrap();
        app.add_servlet(ServletDef::of_instance("lazy", Traced::new("lazy", &log)))
            .unwrap();

        start(&app).unwrap();
        assert_eq!(app.state(), AppState::Running);
        assert_eq!(*log.lock().unwrap(), vec!["init:early", "init:late"]);
    }

    #[test]
    fn startup_failure_destroys_in_reverse_and_marks_failed() {
        let log: EventLog = Arc::default();
        let app = WebApp::root();
        app.add_servlet(ServletDef::of_instance("a", Traced::new("a", &log)).load_on_startup(1))
            .unwrap();
        app.add_servlet(ServletDef::of_instance("b", Traced::new("b", &log)).load_on_startup(2))
            .unwrap();
        app.add_servlet(
            ServletDef::of_instance("bad", Traced::failing("bad", &log)).load_on_startup(3),
        )
        .unwrap();

        let err = start(&app).unwrap_err();
        assert!(matches!(err, LifecycleError::Startup { phase: "servlet init", .. }));
        assert_eq!(app.state(), AppState::Failed);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["init:a", "init:b", "destroy:b", "destroy:a"]
        );
    }

    #[test]
    fn stop_destroys_lazily_initialized_servlets_too() {
        let log: EventLog = Arc::default();
        let app = WebApp::root();
        app.add_servlet(ServletDef::of_instance("lazy", Traced::new("lazy", &log)))
            .unwrap();
        app.add_servlet_mapping("/lazy", "lazy").unwrap();
        start(&app).unwrap();

        // First dispatch initializes the lazy servlet.
        let reg = app.servlet_registration("lazy").unwrap();
        reg.instance(app.instance_factory().as_ref()).unwrap();

        stop(&app).unwrap();
        assert_eq!(app.state(), AppState::Stopped);
        assert_eq!(*log.lock().unwrap(), vec!["init:lazy", "destroy:lazy"]);

        // Idempotent.
        stop(&app).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["init:lazy", "destroy:lazy"]);
    }

    #[test]
    fn initializers_run_inside_the_registration_window() {
        struct AddRoute;

        impl AppInitializer for AddRoute {
            fn on_startup(&self, app: &WebApp) -> Result<(), ServletError> {
                let log: EventLog = Arc::default();
                app.add_servlet(ServletDef::of_instance("added", Traced::new("added", &log)))
                    .map_err(|e| ServletError::new("init.Registration", e.to_string()))?;
                app.add_servlet_mapping("/added", "added")
                    .map_err(|e| ServletError::new("init.Registration", e.to_string()))?;
                Ok(())
            }
        }

        let app = WebApp::root();
        app.add_initializer(Arc::new(AddRoute)).unwrap();
        start(&app).unwrap();

        assert!(app.routing().route("/added").is_some());
    }

    #[test]
    fn listeners_observe_start_and_stop() {
        struct Observer(EventLog);

        impl LifecycleListener for Observer {
            fn started(&self, app: &WebApp) {
                self.0
                    .lock()
                    .unwrap()
                    .push(format!("started:{:?}", app.state()));
            }

            fn stopping(&self, _app: &WebApp) {
                self.0.lock().unwrap().push("stopping".to_string());
            }
        }

        let log: EventLog = Arc::default();
        let app = WebApp::root();
        app.add_lifecycle_listener(Arc::new(Observer(Arc::clone(&log))))
            .unwrap();
        start(&app).unwrap();
        stop(&app).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["started:Initializing", "stopping"]
        );
    }

    #[test]
    fn start_from_a_terminal_state_is_rejected() {
        let app = WebApp::root();
        start(&app).unwrap();
        assert!(matches!(
            start(&app),
            Err(LifecycleError::InvalidState { .. })
        ));
    }
}
