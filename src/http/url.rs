//! Request-target handling
//!
//! Splits a request target into decoded path segments and a raw query
//! string, serializes segments back into an encoded path, and decodes
//! `application/x-www-form-urlencoded` data.
//!
//! Segments are decoded one at a time so an escaped `%2F` never turns into
//! a separator. The first element is always `"/"`; a trailing slash is kept
//! as a final `"/"` element so `/a/b/` and `/a/b` stay distinct.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters escaped inside a single path segment
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Clone, Copy, PartialEq)]
enum UriState {
    Slash,
    Component,
    Query,
}

/// Split a request target into decoded path segments and the raw query
pub fn parse_uri(uri: &str) -> (Vec<String>, String) {
    let mut components = vec!["/".to_string()];
    let mut component = String::new();
    let mut query = String::new();
    let mut state = UriState::Slash;

    for c in uri.chars() {
        match state {
            UriState::Slash => {
                if c == '?' {
                    if components.len() > 1 {
                        components.push("/".to_string());
                    }
                    state = UriState::Query;
                } else if c != '/' {
                    component.push(c);
                    state = UriState::Component;
                }
            }
            UriState::Component => {
                if c == '?' || c == '/' {
                    components.push(decode_segment(&component));
                    component.clear();
                    state = if c == '?' {
                        UriState::Query
                    } else {
                        UriState::Slash
                    };
                } else {
                    component.push(c);
                }
            }
            UriState::Query => query.push(c),
        }
    }

    match state {
        UriState::Slash if components.len() > 1 => components.push("/".to_string()),
        UriState::Component => components.push(decode_segment(&component)),
        _ => {}
    }

    (components, query)
}

/// Split a path (no query) into decoded segments
pub fn path_components(path: &str) -> Vec<String> {
    let path = path.split('?').next().unwrap_or_default();
    parse_uri(path).0
}

/// Percent-decode one segment; undecodable input yields an empty string
pub fn decode_segment(segment: &str) -> String {
    percent_decode_str(segment)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_default()
}

/// Serialize decoded segments back into an encoded path
pub fn encode_path(components: &[String]) -> String {
    let mut path = String::new();
    let mut last_was_slash = false;

    for component in components {
        if component == "/" {
            path.push('/');
            last_was_slash = true;
        } else {
            if !last_was_slash {
                path.push('/');
            }
            path.extend(utf8_percent_encode(component, SEGMENT));
            last_was_slash = false;
        }
    }

    if path.is_empty() {
        path.push('/');
    }
    path
}

/// Decode `name=value&...` pairs (`+` is a space, values are percent-decoded)
pub fn parse_form(data: &str) -> Vec<(String, String)> {
    ::url::form_urlencoded::parse(data.as_bytes())
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect()
}
