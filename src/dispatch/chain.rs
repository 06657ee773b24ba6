use crate::app::{Filter, HttpServlet, ServletError};
use crate::http::{HttpRequest, HttpResponse};
use std::cell::Cell;
use std::sync::Arc;

/// One invocation's filter chain, ending at the servlet. A filter continues
/// the chain by calling [`FilterChain::proceed`]; not calling it
/// short-circuits the request with whatever the filter wrote.
pub struct FilterChain<'a> {
    filters: &'a [Arc<dyn Filter>],
    servlet: &'a dyn HttpServlet,
    position: Cell<usize>,
}

impl<'a> FilterChain<'a> {
    pub(crate) fn new(filters: &'a [Arc<dyn Filter>], servlet: &'a dyn HttpServlet) -> Self {
        Self {
            filters,
            servlet,
            position: Cell::new(0),
        }
    }

    /// Invoke the next element: the next filter, or the servlet once every
    /// filter has run.
    pub fn proceed(
        &self,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
    ) -> Result<(), ServletError> {
        let pos = self.position.get();
        self.position.set(pos + 1);
        match self.filters.get(pos) {
            Some(filter) => filter.filter(req, res, self),
            None => self.servlet.service(req, res),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::FilterConfig;
    use http::Method;
    use std::sync::Mutex;

    struct Tail;

    impl HttpServlet for Tail {
        fn service(
            &self,
            _req: &mut HttpRequest,
            res: &mut HttpResponse,
        ) -> Result<(), ServletError> {
            res.write(b"servlet");
            Ok(())
        }
    }

    struct Tag(&'static str, Arc<Mutex<Vec<String>>>);

    impl Filter for Tag {
        fn init(&self, _config: &FilterConfig) -> Result<(), ServletError> {
            Ok(())
        }

        fn filter(
            &self,
            req: &mut HttpRequest,
            res: &mut HttpResponse,
            chain: &FilterChain<'_>,
        ) -> Result<(), ServletError> {
            self.1.lock().unwrap().push(format!("{}:before", self.0));
            chain.proceed(req, res)?;
            self.1.lock().unwrap().push(format!("{}:after", self.0));
            Ok(())
        }
    }

    struct Gate;

    impl Filter for Gate {
        fn filter(
            &self,
            _req: &mut HttpRequest,
            res: &mut HttpResponse,
            _chain: &FilterChain<'_>,
        ) -> Result<(), ServletError> {
            res.set_status(403);
            Ok(())
        }
    }

    #[test]
    fn filters_wrap_the_servlet_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let filters: Vec<Arc<dyn Filter>> = vec![
            Arc::new(Tag("outer", Arc::clone(&log))),
            Arc::new(Tag("inner", Arc::clone(&log))),
        ];
        let servlet = Tail;
        let chain = FilterChain::new(&filters, &servlet);

        let mut req = HttpRequest::new(Method::GET, "/");
        let mut res = HttpResponse::new();
        chain.proceed(&mut req, &mut res).unwrap();

        assert_eq!(res.body(), b"servlet");
        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer:before", "inner:before", "inner:after", "outer:after"]
        );
    }

    #[test]
    fn a_filter_can_short_circuit() {
        let filters: Vec<Arc<dyn Filter>> = vec![Arc::new(Gate)];
        let servlet = Tail;
        let chain = FilterChain::new(&filters, &servlet);

        let mut req = HttpRequest::new(Method::GET, "/");
        let mut res = HttpResponse::new();
        chain.proceed(&mut req, &mut res).unwrap();

        assert_eq!(res.status(), 403);
        assert!(res.body().is_empty());
    }
}
