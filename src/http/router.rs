//! Request routing
//!
//! The engine only needs [`Router::find`]; [`Routes`] is a small table of
//! exact paths plus trailing `/**` prefix wildcards.

use super::url::path_components;
use super::{Method, Request, Response};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Request handler
pub type Handler = Arc<dyn Fn(&Request, &mut Response<'_>) + Send + Sync>;

/// Maps a method and decoded path segments to a handler
pub trait Router: Send + Sync {
    fn find(&self, method: Method, path: &[String]) -> Option<Handler>;
}

/// Route table
#[derive(Default, Clone)]
pub struct Routes {
    exact: HashMap<(Method, Vec<String>), Handler>,
    prefixes: Vec<(Method, Vec<String>, Handler)>,
}

impl Routes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; a path ending in `/**` matches everything below it
    pub fn add<F>(&mut self, method: Method, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response<'_>) + Send + Sync + 'static,
    {
        self.add_handler(method, path, Arc::new(handler))
    }

    pub fn add_handler(&mut self, method: Method, path: &str, handler: Handler) -> &mut Self {
        match path.strip_suffix("/**") {
            Some(prefix) => {
                let mut segments = path_components(prefix);
                if segments.last().map(String::as_str) == Some("/") && segments.len() > 1 {
                    segments.pop();
                }
                self.prefixes.push((method, segments, handler));
                // Longest prefix is tried first
                self.prefixes.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
            }
            None => {
                self.exact.insert((method, path_components(path)), handler);
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Router for Routes {
    fn find(&self, method: Method, path: &[String]) -> Option<Handler> {
        if let Some(handler) = self.exact.get(&(method, path.to_vec())) {
            return Some(handler.clone());
        }
        self.prefixes
            .iter()
            .find(|(m, prefix, _)| *m == method && path.starts_with(prefix))
            .map(|(_, _, handler)| handler.clone())
    }
}

impl fmt::Debug for Routes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Routes")
            .field("exact", &self.exact.len())
            .field("prefixes", &self.prefixes.len())
            .finish()
    }
}
