//! Response body compression
//!
//! [`ContentCompression`] is a response filter that compresses buffered
//! bodies for clients listing `deflate` or `gzip` in `Accept-Encoding`.
//! Streaming responses pass through untouched, as do requests whose scratch
//! pad sets [`NO_COMPRESSION`] to `true`.
//!
//! ```no_run
//! use httpd_core::http::{ContentCompression, FilterPriority, ServerConfig};
//!
//! let config = ServerConfig::builder()
//!     .response_filter(FilterPriority::High, ContentCompression::new())
//!     .build()
//!     .unwrap();
//! ```

use super::{Response, ResponseFilter, ResponseFilterResult};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use std::io::{self, Write};
use tracing::{debug, trace};

/// Scratch pad key that turns compression off for one request
pub const NO_COMPRESSION: &str = "no-compression";

/// A content coding the filter can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coding {
    /// zlib stream (RFC 1950), the HTTP `deflate` coding
    Deflate,
    Gzip,
}

impl Coding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Coding::Deflate => "deflate",
            Coding::Gzip => "gzip",
        }
    }

    /// Compress a whole body
    pub fn encode(&self, data: &[u8], level: Compression) -> io::Result<Vec<u8>> {
        match self {
            Coding::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), level);
                encoder.write_all(data)?;
                encoder.finish()
            }
            Coding::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), level);
                encoder.write_all(data)?;
                encoder.finish()
            }
        }
    }
}

/// Pick a coding from an `Accept-Encoding` value
///
/// `deflate` is preferred over `gzip`; codings with `q=0` are refused and
/// `*` stands for `deflate`.
pub fn negotiate(accept_encoding: &str) -> Option<Coding> {
    let mut deflate = false;
    let mut gzip = false;

    for item in accept_encoding.split(',') {
        let mut parts = item.split(';');
        let name = parts.next().unwrap_or_default().trim();
        let refused = parts.any(|param| {
            param
                .trim()
                .strip_prefix("q=")
                .and_then(|q| q.trim().parse::<f32>().ok())
                .is_some_and(|q| q <= 0.0)
        });
        if refused {
            continue;
        }
        if name.eq_ignore_ascii_case("deflate") || name == "*" {
            deflate = true;
        } else if name.eq_ignore_ascii_case("gzip") || name.eq_ignore_ascii_case("x-gzip") {
            gzip = true;
        }
    }

    if deflate {
        Some(Coding::Deflate)
    } else if gzip {
        Some(Coding::Gzip)
    } else {
        None
    }
}

/// Match a MIME type against a pattern such as `text/*` or `*/*`
fn mime_matches(pattern: &str, mime: &str) -> bool {
    let mime = mime.split(';').next().unwrap_or_default().trim();
    let (pattern_type, pattern_sub) = pattern.split_once('/').unwrap_or((pattern, "*"));
    let (mime_type, mime_sub) = mime.split_once('/').unwrap_or((mime, ""));
    (pattern_type == "*" || pattern_type.eq_ignore_ascii_case(mime_type))
        && (pattern_sub == "*" || pattern_sub.eq_ignore_ascii_case(mime_sub))
}

/// MIME type guessed from the last path segment's extension
fn mime_for_path(path: &str) -> Option<&'static str> {
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    let mime = match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => return None,
    };
    Some(mime)
}

/// Response filter compressing buffered bodies
#[derive(Debug, Clone)]
pub struct ContentCompression {
    compress_types: Vec<String>,
    ignore_types: Vec<String>,
    level: Compression,
}

impl ContentCompression {
    /// Compress everything except images, video and audio
    pub fn new() -> Self {
        ContentCompression {
            compress_types: vec!["*/*".to_string()],
            ignore_types: vec![
                "image/*".to_string(),
                "video/*".to_string(),
                "audio/*".to_string(),
            ],
            level: Compression::default(),
        }
    }

    /// MIME types (or `type/*` wildcards) eligible for compression
    pub fn compress_types<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.compress_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// MIME types (or `type/*` wildcards) never compressed
    pub fn ignore_types<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.ignore_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// zlib level, 0 to 9
    pub fn level(mut self, level: u32) -> Self {
        self.level = Compression::new(level.min(9));
        self
    }

    fn should_compress(&self, mime: &str) -> bool {
        self.compress_types.iter().any(|p| mime_matches(p, mime))
            && !self.ignore_types.iter().any(|p| mime_matches(p, mime))
    }

    /// Coding to apply, if the exchange qualifies
    fn select(&self, response: &Response<'_>) -> Option<Coding> {
        if response.is_streaming()
            || response.body().is_empty()
            || response.headers().contains("content-encoding")
        {
            return None;
        }

        let request = response.request()?;
        let skip = request
            .scratch_pad()
            .get(NO_COMPRESSION)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        if skip {
            return None;
        }

        let coding = negotiate(request.header("accept-encoding")?)?;
        let eligible = match response.headers().get("content-type") {
            Some(mime) => self.should_compress(mime),
            None => mime_for_path(&request.path()).is_some_and(|mime| self.should_compress(mime)),
        };
        eligible.then_some(coding)
    }
}

impl Default for ContentCompression {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseFilter for ContentCompression {
    fn filter_headers(&self, response: &mut Response<'_>) -> ResponseFilterResult {
        let Some(coding) = self.select(response) else {
            return ResponseFilterResult::Continue;
        };

        match coding.encode(response.body(), self.level) {
            Ok(compressed) => {
                trace!(
                    coding = coding.as_str(),
                    from = response.body().len(),
                    to = compressed.len(),
                    "compressed response body"
                );
                response.set_header("Content-Encoding", coding.as_str());
                response.set_header("Content-Length", compressed.len().to_string());
                response.add_header("Vary", "Accept-Encoding");
                *response.body_mut() = compressed;
            }
            Err(e) => debug!(error = %e, "compression failed, sending identity body"),
        }
        ResponseFilterResult::Continue
    }
}
