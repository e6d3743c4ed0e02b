//! Exchange dispatch shared by HTTP/1.1 and HTTP/2
//!
//! Runs the request filters, routes the request to its handler (or answers
//! 404) and completes the response.

use super::{FilterChain, Request, RequestFilterResult, Response, Router, Status};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// What the protocol layer needs to know once an exchange is over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// The response was cut short; the transport (or stream) must be dropped
    pub aborted: bool,
    /// The response asked for `Connection: close`
    pub close: bool,
}

/// Routes requests through filters to handlers
#[derive(Clone)]
pub struct Dispatcher {
    router: Arc<dyn Router>,
    filters: Arc<FilterChain>,
}

impl Dispatcher {
    pub fn new(router: Arc<dyn Router>, filters: Arc<FilterChain>) -> Self {
        Dispatcher { router, filters }
    }

    /// Response filters, for building responses
    pub fn filters(&self) -> &Arc<FilterChain> {
        &self.filters
    }

    /// Serve one request
    pub fn dispatch(&self, mut request: Request, response: &mut Response<'_>) -> DispatchOutcome {
        let verdict = self.filters.run_request(&mut request, response);
        let request = Arc::new(request);
        response.attach_request(Arc::clone(&request));

        if verdict == RequestFilterResult::Halt {
            debug!(path = %request.path(), "request filter halted dispatch");
        } else {
            self.route(&request, response);
        }

        let completed = response.completed();
        let close = response
            .headers()
            .get("connection")
            .map(|v| v.trim().eq_ignore_ascii_case("close"))
            .unwrap_or(false);

        DispatchOutcome {
            aborted: completed.is_err() || response.is_aborted(),
            close,
        }
    }

    fn route(&self, request: &Request, response: &mut Response<'_>) {
        let Some(handler) = self
            .router
            .find(request.method(), request.path_components())
        else {
            not_found(request, response);
            return;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(request, response)));
        if outcome.is_err() {
            error!(path = %request.path(), "handler panicked");
            if response.headers_written() {
                // Part of the body is out and must not look complete
                response.cancel();
            } else {
                response.set_status(Status::INTERNAL_SERVER_ERROR);
                response.body_mut().clear();
            }
        }
    }
}

fn not_found(request: &Request, response: &mut Response<'_>) {
    let path = request.path();
    debug!(path = %path, "no route");
    response.set_status(Status::NOT_FOUND);
    response.set_header("Content-Type", "text/plain");
    response.set_body(format!("The file {} was not found.", path));
}
