//! Protocol-agnostic request
//!
//! Both the HTTP/1.1 parser and HTTP/2 streams build a [`Request`]. Header
//! values accumulate with the joining rules of [`Headers::add_joined`]; the
//! body is either a flat byte buffer or a set of multipart parts.

use super::multipart::{BodySpec, MultipartReader};
use super::url::{encode_path, parse_form, path_components};
use super::{Headers, Method, Version};
use std::collections::HashMap;
use std::net::SocketAddr;

/// An incoming HTTP request
#[derive(Debug)]
pub struct Request {
    method: Method,
    path_components: Vec<String>,
    query_string: String,
    version: Version,
    headers: Headers,
    body: Vec<u8>,
    multipart: Option<MultipartReader>,
    scratch_pad: HashMap<String, String>,
    remote_addr: Option<SocketAddr>,
    server_name: String,
}

impl Request {
    /// Create an empty `GET /` request
    pub fn new() -> Self {
        Request {
            method: Method::Get,
            path_components: vec!["/".to_string()],
            query_string: String::new(),
            version: Version::Http11,
            headers: Headers::new(),
            body: Vec::new(),
            multipart: None,
            scratch_pad: HashMap::new(),
            remote_addr: None,
            server_name: String::new(),
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// The request path, re-encoded from its segments
    pub fn path(&self) -> String {
        encode_path(&self.path_components)
    }

    /// Replace the path, splitting it into decoded segments
    pub fn set_path(&mut self, path: &str) {
        self.path_components = path_components(path);
    }

    /// Decoded path segments, starting with `"/"`
    pub fn path_components(&self) -> &[String] {
        &self.path_components
    }

    pub(crate) fn set_target(&mut self, components: Vec<String>, query: String) {
        self.path_components = components;
        self.query_string = query;
    }

    /// Raw query string without the leading `?`
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    /// Decoded query parameters in order of appearance
    pub fn query_params(&self) -> Vec<(String, String)> {
        parse_form(&self.query_string)
    }

    /// First query parameter with the given name
    pub fn param(&self, name: &str) -> Option<String> {
        self.query_params()
            .into_iter()
            .chain(self.post_params())
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// First value of a header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Add a header value, joining onto an existing value of the same name
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.add_joined(name, value);
    }

    /// Replace a header value
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Cookies sent with the request as `(name, value)` pairs
    pub fn cookies(&self) -> Vec<(String, String)> {
        let Some(cookie) = self.headers.get("cookie") else {
            return Vec::new();
        };
        cookie
            .split(';')
            .filter_map(|crumb| {
                let crumb = crumb.trim();
                if crumb.is_empty() {
                    return None;
                }
                match crumb.split_once('=') {
                    Some((name, value)) => {
                        Some((name.trim().to_string(), value.trim().to_string()))
                    }
                    None => Some((crumb.to_string(), String::new())),
                }
            })
            .collect()
    }

    /// Whether the body is being routed into a multipart reader
    pub fn is_multipart(&self) -> bool {
        self.multipart.is_some()
    }

    pub(crate) fn multipart_mut(&mut self) -> Option<&mut MultipartReader> {
        self.multipart.as_mut()
    }

    pub(crate) fn set_multipart(&mut self, reader: MultipartReader) {
        self.multipart = Some(reader);
    }

    /// Raw body bytes; `None` when the body was multipart
    pub fn post_body_bytes(&self) -> Option<&[u8]> {
        if self.multipart.is_some() {
            None
        } else {
            Some(&self.body)
        }
    }

    /// Body decoded as UTF-8, lossily
    pub fn post_body_string(&self) -> Option<String> {
        self.post_body_bytes()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub(crate) fn append_body(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    /// Replace the body bytes
    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// Form fields from a URL-encoded body or the text parts of a multipart body
    pub fn post_params(&self) -> Vec<(String, String)> {
        if let Some(reader) = &self.multipart {
            return reader
                .body_specs()
                .iter()
                .filter(|spec| !spec.is_file())
                .map(|spec| (spec.field_name.clone(), spec.field_value.clone()))
                .collect();
        }

        let is_form = self
            .headers
            .get("content-type")
            .map(|ct| ct.to_ascii_lowercase().starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);
        if !is_form {
            return Vec::new();
        }
        parse_form(&String::from_utf8_lossy(&self.body))
    }

    /// Multipart parts that carried files
    pub fn post_file_uploads(&self) -> Option<Vec<&BodySpec>> {
        self.multipart
            .as_ref()
            .map(|reader| reader.body_specs().iter().filter(|s| s.is_file()).collect())
    }

    /// Connection-scoped key/value storage for filters and handlers
    pub fn scratch_pad(&self) -> &HashMap<String, String> {
        &self.scratch_pad
    }

    pub fn scratch_pad_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.scratch_pad
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn set_remote_addr(&mut self, addr: Option<SocketAddr>) {
        self.remote_addr = addr;
    }

    /// Name of the server instance that accepted the request
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn set_server_name(&mut self, name: impl Into<String>) {
        self.server_name = name.into();
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}
