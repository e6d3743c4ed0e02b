//! HTTP/1.1 end-to-end tests against a running server

mod common;

use common::{raw_exchange, start};
use httpd_core::http::{
    ContentCompression, FilterPriority, Method, Request, RequestFilter, RequestFilterResult,
    Response, ResponseFilter, ResponseFilterResult, Routes, ServerConfig, Status,
};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct AddHeader;

impl ResponseFilter for AddHeader {
    fn filter_headers(&self, response: &mut Response<'_>) -> ResponseFilterResult {
        response.add_header("X-Custom", "Value");
        ResponseFilterResult::Continue
    }
}

struct Replace {
    from: u8,
    to: u8,
    result: ResponseFilterResult,
}

impl ResponseFilter for Replace {
    fn filter_body(&self, response: &mut Response<'_>) -> ResponseFilterResult {
        for byte in response.body_mut().iter_mut() {
            if *byte == self.from {
                *byte = self.to;
            }
        }
        self.result
    }
}

struct NeverCalled(Arc<AtomicUsize>);

impl ResponseFilter for NeverCalled {
    fn filter_body(&self, _response: &mut Response<'_>) -> ResponseFilterResult {
        self.0.fetch_add(1, Ordering::SeqCst);
        ResponseFilterResult::Continue
    }
}

fn filtered_server(calls: Arc<AtomicUsize>) -> httpd_core::http::ServerHandle {
    let mut routes = Routes::new();
    routes.add(Method::Get, "/buffered", |_req, resp| {
        resp.set_header("Content-Type", "text/plain");
        resp.append_body(b"ABZABZ");
    });
    routes.add(Method::Get, "/streamed", |_req, resp| {
        resp.set_header("Content-Type", "text/plain");
        resp.set_streaming(true);
        resp.append_body(b"ABZ");
        resp.push().unwrap();
        resp.append_body(b"ABZ");
        resp.push().unwrap();
    });

    start(
        ServerConfig::builder()
            .routes(routes)
            .response_filter(FilterPriority::High, AddHeader)
            .response_filter(
                FilterPriority::Medium,
                Replace {
                    from: b'A',
                    to: b'a',
                    result: ResponseFilterResult::Continue,
                },
            )
            .response_filter(
                FilterPriority::Medium,
                Replace {
                    from: b'B',
                    to: b'b',
                    result: ResponseFilterResult::Done,
                },
            )
            .response_filter(FilterPriority::Low, NeverCalled(calls)),
    )
}

#[test]
fn test_response_filters_buffered() {
    let calls = Arc::new(AtomicUsize::new(0));
    let server = filtered_server(calls.clone());

    let out = raw_exchange(&server, b"GET /buffered HTTP/1.0\r\n\r\n");
    let lines: Vec<&str> = out.split("\r\n").collect();
    assert_eq!(
        lines,
        vec![
            "HTTP/1.0 200 OK",
            "Content-Type: text/plain",
            "Content-Length: 6",
            "X-Custom: Value",
            "",
            "abZabZ"
        ]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_response_filters_streamed() {
    let calls = Arc::new(AtomicUsize::new(0));
    let server = filtered_server(calls.clone());

    let out = raw_exchange(&server, b"GET /streamed HTTP/1.0\r\n\r\n");
    let lines: Vec<&str> = out.split("\r\n").collect();
    assert_eq!(
        lines,
        vec![
            "HTTP/1.0 200 OK",
            "Content-Type: text/plain",
            "Transfer-Encoding: chunked",
            "X-Custom: Value",
            "",
            "3",
            "abZ",
            "3",
            "abZ",
            "0",
            "",
            ""
        ]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

struct Deny;

impl RequestFilter for Deny {
    fn filter(&self, request: &mut Request, response: &mut Response<'_>) -> RequestFilterResult {
        if request.path().starts_with("/private") {
            response.set_status(Status::new(403).unwrap());
            response.set_body("denied");
            return RequestFilterResult::Halt;
        }
        request
            .scratch_pad_mut()
            .insert("seen".to_string(), "yes".to_string());
        RequestFilterResult::Continue
    }
}

fn app_server() -> httpd_core::http::ServerHandle {
    let mut routes = Routes::new();
    routes.add(Method::Get, "/search", |req, resp| {
        let q = req.param("q").unwrap_or_default();
        let seen = req.scratch_pad().get("seen").cloned().unwrap_or_default();
        resp.append_body(format!("q={} seen={}", q, seen).as_bytes());
    });
    routes.add(Method::Post, "/form", |req, resp| {
        let params: Vec<String> = req
            .post_params()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        resp.append_body(params.join("&").as_bytes());
    });
    routes.add(Method::Post, "/upload", |req, resp| {
        let uploads = req.post_file_uploads().unwrap_or_default();
        let mut lines = Vec::new();
        for spec in uploads {
            let path = spec.tmp_file_path().unwrap();
            let contents = std::fs::read_to_string(path).unwrap();
            lines.push(format!(
                "{}:{}:{}:{}",
                spec.field_name, spec.file_name, spec.file_size, contents
            ));
        }
        for (name, value) in req.post_params() {
            lines.push(format!("{}={}", name, value));
        }
        resp.append_body(lines.join("\n").as_bytes());
    });
    routes.add(Method::Get, "/files/**", |req, resp| {
        resp.append_body(req.path().as_bytes());
    });
    routes.add(Method::Get, "/cookies", |req, resp| {
        let cookies: Vec<String> = req
            .cookies()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        resp.append_body(cookies.join(",").as_bytes());
    });

    start(
        ServerConfig::builder()
            .name("test-server")
            .routes(routes)
            .request_filter(FilterPriority::High, Deny),
    )
}

fn body_of(response: &str) -> &str {
    response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
}

#[test]
fn test_query_params_and_scratch_pad() {
    let server = app_server();
    let out = raw_exchange(&server, b"GET /search?q=fi+%E2%98%83&x=1 HTTP/1.0\r\n\r\n");
    assert!(out.starts_with("HTTP/1.0 200 OK\r\n"));
    assert_eq!(body_of(&out), "q=fi \u{2603} seen=yes");
}

#[test]
fn test_request_filter_halt() {
    let server = app_server();
    let out = raw_exchange(&server, b"GET /private/x HTTP/1.0\r\n\r\n");
    assert!(out.starts_with("HTTP/1.0 403 Forbidden\r\n"));
    assert_eq!(body_of(&out), "denied");
}

#[test]
fn test_not_found() {
    let server = app_server();
    let out = raw_exchange(&server, b"GET /missing%20page HTTP/1.0\r\n\r\n");
    assert!(out.starts_with("HTTP/1.0 404 Not Found\r\n"));
    assert_eq!(body_of(&out), "The file /missing%20page was not found.");
}

#[test]
fn test_prefix_route() {
    let server = app_server();
    let out = raw_exchange(&server, b"GET /files/a/b.txt HTTP/1.0\r\n\r\n");
    assert_eq!(body_of(&out), "/files/a/b.txt");
}

#[test]
fn test_cookies() {
    let server = app_server();
    let out = raw_exchange(
        &server,
        b"GET /cookies HTTP/1.0\r\nCookie: a=1; b=2\r\nCookie: c=3\r\n\r\n",
    );
    assert_eq!(body_of(&out), "a=1,b=2,c=3");
}

#[test]
fn test_form_post_chunked() {
    let server = app_server();
    let out = raw_exchange(
        &server,
        b"POST /form HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\
          Content-Type: application/x-www-form-urlencoded\r\n\
          Transfer-Encoding: chunked\r\n\r\n\
          7\r\ndoo=fi+\r\nE\r\n%E2%98%83&y=as\r\n5\r\nd==&f\r\n2\r\ni=\r\n0\r\n\r\n",
    );
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body_of(&out), "doo=fi \u{2603}&y=asd==&fi=");
}

#[test]
fn test_multipart_upload() {
    let server = app_server();
    let body = "--XyZ\r\n\
                Content-Disposition: form-data; name=\"title\"\r\n\r\n\
                holiday\r\n\
                --XyZ\r\n\
                Content-Disposition: form-data; name=\"photo\"; filename=\"a.txt\"\r\n\
                Content-Type: text/plain\r\n\r\n\
                file body\r\n\
                --XyZ--\r\n";
    let request = format!(
        "POST /upload HTTP/1.0\r\n\
         Content-Type: multipart/form-data; boundary=XyZ\r\n\
         Content-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );

    let out = raw_exchange(&server, request.as_bytes());
    assert!(out.starts_with("HTTP/1.0 200 OK\r\n"));
    assert_eq!(body_of(&out), "photo:a.txt:9:file body\ntitle=holiday");
}

#[test]
fn test_keep_alive_reuses_connection() {
    let server = app_server();
    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    for _ in 0..3 {
        stream
            .write_all(b"GET /search?q=a HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();
        let mut buf = [0u8; 1024];
        let n = stream.read(&mut buf).unwrap();
        let out = String::from_utf8_lossy(&buf[..n]);
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("Connection: Keep-Alive\r\n"));
        assert!(out.ends_with("q=a seen=yes"));
    }
}

#[test]
fn test_header_block_too_large() {
    let server = app_server();
    let mut request = b"GET /search HTTP/1.1\r\nX-Big: ".to_vec();
    request.extend(std::iter::repeat(b'a').take(9000));
    request.extend_from_slice(b"\r\n\r\n");

    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(&request).unwrap();

    // The server may reset the connection after answering
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    while let Ok(n) = stream.read(&mut buf) {
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    assert!(out.starts_with(b"HTTP/1.1 413 Request Entity Too Large\r\n"));
}

#[test]
fn test_bad_method() {
    let server = app_server();
    let out = raw_exchange(&server, b"FROB / HTTP/1.1\r\nHost: x\r\n\r\n");
    assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[test]
fn test_content_compression() {
    let mut routes = Routes::new();
    routes.add(Method::Get, "/page.html", |_req, resp| {
        resp.append_body("<p>repeat</p>".repeat(50).as_bytes());
    });
    let server = start(
        ServerConfig::builder()
            .routes(routes)
            .response_filter(FilterPriority::High, ContentCompression::new()),
    );

    let fetch = |accept: &str| -> (String, Vec<u8>) {
        let mut stream = TcpStream::connect(server.local_addr()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let request = format!(
            "GET /page.html HTTP/1.0\r\nAccept-Encoding: {}\r\n\r\n",
            accept
        );
        stream.write_all(request.as_bytes()).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        let split = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
        let head = String::from_utf8_lossy(&out[..split]).into_owned();
        (head, out[split + 4..].to_vec())
    };

    let (head, body) = fetch("gzip, deflate");
    assert!(head.contains("Content-Encoding: deflate"), "{}", head);
    assert!(head.contains(&format!("Content-Length: {}", body.len())), "{}", head);
    let mut plain = String::new();
    flate2::read::ZlibDecoder::new(&body[..])
        .read_to_string(&mut plain)
        .unwrap();
    assert_eq!(plain, "<p>repeat</p>".repeat(50));

    let (head, body) = fetch("br");
    assert!(!head.contains("Content-Encoding"), "{}", head);
    assert_eq!(body, "<p>repeat</p>".repeat(50).as_bytes());
}
