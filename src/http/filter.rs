//! Request and response filters
//!
//! Filters are registered in three priority tiers and flattened once into a
//! [`FilterChain`]; within a tier registration order is kept. Request filters
//! run before routing, response filters run when the response is flushed:
//! the header phase once before the first byte, the body phase on every
//! flush.

use super::{Request, Response};
use std::fmt;
use std::sync::Arc;

/// Registration tier of a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterPriority {
    High,
    Medium,
    Low,
}

/// Outcome of a request filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFilterResult {
    /// Run the next filter
    Continue,
    /// Skip the remaining filters and dispatch
    Execute,
    /// Skip dispatch and complete the response as built
    Halt,
}

/// Outcome of a response filter phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFilterResult {
    /// Run the next filter
    Continue,
    /// Skip the remaining filters in this phase
    Done,
    /// Abort the exchange
    Halt,
}

/// Filter run before a request is routed
pub trait RequestFilter: Send + Sync {
    fn filter(&self, request: &mut Request, response: &mut Response<'_>) -> RequestFilterResult;
}

/// Filter run while a response is flushed
pub trait ResponseFilter: Send + Sync {
    /// Called once, before the status line or HEADERS frame is written
    fn filter_headers(&self, _response: &mut Response<'_>) -> ResponseFilterResult {
        ResponseFilterResult::Continue
    }

    /// Called for every flush with the pending body bytes
    fn filter_body(&self, _response: &mut Response<'_>) -> ResponseFilterResult {
        ResponseFilterResult::Continue
    }
}

/// Flattened, priority-ordered filter lists
#[derive(Clone, Default)]
pub struct FilterChain {
    request_filters: Vec<Arc<dyn RequestFilter>>,
    response_filters: Vec<Arc<dyn ResponseFilter>>,
}

impl FilterChain {
    /// Chain with no filters
    pub fn new() -> Self {
        Self::default()
    }

    /// Start collecting filters by priority
    pub fn builder() -> FilterChainBuilder {
        FilterChainBuilder::default()
    }

    pub fn request_filter_count(&self) -> usize {
        self.request_filters.len()
    }

    pub fn response_filter_count(&self) -> usize {
        self.response_filters.len()
    }

    /// Run request filters until one executes or halts
    pub fn run_request(
        &self,
        request: &mut Request,
        response: &mut Response<'_>,
    ) -> RequestFilterResult {
        for filter in &self.request_filters {
            match filter.filter(request, response) {
                RequestFilterResult::Continue => continue,
                other => return other,
            }
        }
        RequestFilterResult::Continue
    }

    /// Run the header phase of every response filter
    pub fn run_headers(&self, response: &mut Response<'_>) -> ResponseFilterResult {
        Self::run_phase(&self.response_filters, |f| f.filter_headers(response))
    }

    /// Run the body phase of every response filter
    pub fn run_body(&self, response: &mut Response<'_>) -> ResponseFilterResult {
        Self::run_phase(&self.response_filters, |f| f.filter_body(response))
    }

    fn run_phase<F>(filters: &[Arc<dyn ResponseFilter>], mut call: F) -> ResponseFilterResult
    where
        F: FnMut(&dyn ResponseFilter) -> ResponseFilterResult,
    {
        for filter in filters {
            match call(filter.as_ref()) {
                ResponseFilterResult::Continue => continue,
                other => return other,
            }
        }
        ResponseFilterResult::Continue
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("request_filters", &self.request_filters.len())
            .field("response_filters", &self.response_filters.len())
            .finish()
    }
}

/// Collects filters in tiers before flattening them
#[derive(Default)]
pub struct FilterChainBuilder {
    request_filters: Vec<(FilterPriority, Arc<dyn RequestFilter>)>,
    response_filters: Vec<(FilterPriority, Arc<dyn ResponseFilter>)>,
}

impl FilterChainBuilder {
    pub fn request_filter(
        mut self,
        priority: FilterPriority,
        filter: impl RequestFilter + 'static,
    ) -> Self {
        self.add_request_filter(priority, Arc::new(filter));
        self
    }

    pub fn response_filter(
        mut self,
        priority: FilterPriority,
        filter: impl ResponseFilter + 'static,
    ) -> Self {
        self.add_response_filter(priority, Arc::new(filter));
        self
    }

    pub fn add_request_filter(&mut self, priority: FilterPriority, filter: Arc<dyn RequestFilter>) {
        self.request_filters.push((priority, filter));
    }

    pub fn add_response_filter(
        &mut self,
        priority: FilterPriority,
        filter: Arc<dyn ResponseFilter>,
    ) {
        self.response_filters.push((priority, filter));
    }

    /// Flatten the tiers; the sort is stable so registration order survives
    pub fn build(mut self) -> FilterChain {
        self.request_filters.sort_by_key(|(priority, _)| *priority);
        self.response_filters.sort_by_key(|(priority, _)| *priority);

        FilterChain {
            request_filters: self.request_filters.into_iter().map(|(_, f)| f).collect(),
            response_filters: self.response_filters.into_iter().map(|(_, f)| f).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::tests::CaptureSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Tag(&'static str, RequestFilterResult, Arc<Mutex<Vec<&'static str>>>);

    impl RequestFilter for Tag {
        fn filter(
            &self,
            _request: &mut Request,
            _response: &mut Response<'_>,
        ) -> RequestFilterResult {
            self.2.lock().unwrap().push(self.0);
            self.1
        }
    }

    #[test]
    fn test_tiers_flatten_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let tag = |name| Tag(name, RequestFilterResult::Continue, seen.clone());
        let chain = FilterChain::builder()
            .request_filter(FilterPriority::Low, tag("low"))
            .request_filter(FilterPriority::High, tag("high1"))
            .request_filter(FilterPriority::Medium, tag("medium"))
            .request_filter(FilterPriority::High, tag("high2"))
            .build();

        let (sink, _out) = CaptureSink::new();
        let mut response = Response::new(Box::new(sink), Arc::new(FilterChain::new()));
        let mut request = Request::new();
        assert_eq!(chain.run_request(&mut request, &mut response), RequestFilterResult::Continue);
        assert_eq!(*seen.lock().unwrap(), vec!["high1", "high2", "medium", "low"]);
    }

    #[test]
    fn test_execute_skips_remaining() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::builder()
            .request_filter(
                FilterPriority::High,
                Tag("a", RequestFilterResult::Execute, seen.clone()),
            )
            .request_filter(
                FilterPriority::High,
                Tag("b", RequestFilterResult::Continue, seen.clone()),
            )
            .build();

        let (sink, _out) = CaptureSink::new();
        let mut response = Response::new(Box::new(sink), Arc::new(FilterChain::new()));
        let mut request = Request::new();
        assert_eq!(chain.run_request(&mut request, &mut response), RequestFilterResult::Execute);
        assert_eq!(*seen.lock().unwrap(), vec!["a"]);
    }

    struct Counting(ResponseFilterResult, Arc<AtomicUsize>);

    impl ResponseFilter for Counting {
        fn filter_body(&self, _response: &mut Response<'_>) -> ResponseFilterResult {
            self.1.fetch_add(1, Ordering::SeqCst);
            self.0
        }
    }

    #[test]
    fn test_done_stops_phase() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let chain = FilterChain::builder()
            .response_filter(
                FilterPriority::Medium,
                Counting(ResponseFilterResult::Done, first.clone()),
            )
            .response_filter(
                FilterPriority::Medium,
                Counting(ResponseFilterResult::Continue, second.clone()),
            )
            .build();

        let (sink, _out) = CaptureSink::new();
        let mut response = Response::new(Box::new(sink), Arc::new(FilterChain::new()));
        assert_eq!(chain.run_body(&mut response), ResponseFilterResult::Done);
        assert_eq!(chain.run_headers(&mut response), ResponseFilterResult::Continue);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }
}
