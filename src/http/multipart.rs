//! Streaming `multipart/form-data` reader
//!
//! Request bodies with a multipart content type are fed to a
//! [`MultipartReader`] as they arrive. Text fields are collected in memory;
//! file fields are streamed into temporary files that live as long as the
//! [`BodySpec`] describing them.

use super::{Error, Result};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// One part of a multipart body
#[derive(Debug)]
pub struct BodySpec {
    /// Form field name from `Content-Disposition`
    pub field_name: String,
    /// Field value for text parts (empty for files)
    pub field_value: String,
    /// Part content type, if one was sent
    pub content_type: String,
    /// Client-side file name for file parts
    pub file_name: String,
    /// Number of bytes written to the temporary file
    pub file_size: usize,
    file: Option<NamedTempFile>,
}

impl BodySpec {
    fn new() -> Self {
        BodySpec {
            field_name: String::new(),
            field_value: String::new(),
            content_type: String::new(),
            file_name: String::new(),
            file_size: 0,
            file: None,
        }
    }

    /// Whether this part carried a file upload
    pub fn is_file(&self) -> bool {
        self.file.is_some()
    }

    /// Location of the uploaded file's temporary copy
    pub fn tmp_file_path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum MimeState {
    Preamble,
    AfterBoundary,
    Headers,
    Body,
    Done,
}

/// Incremental multipart parser
#[derive(Debug)]
pub struct MultipartReader {
    delimiter: Vec<u8>,
    state: MimeState,
    buffer: Vec<u8>,
    current: Option<BodySpec>,
    value: Vec<u8>,
    specs: Vec<BodySpec>,
}

impl MultipartReader {
    /// Create a reader from a `multipart/form-data; boundary=...` content type
    pub fn new(content_type: &str) -> Result<Self> {
        let boundary = content_type
            .split(';')
            .filter_map(|param| param.trim().split_once('='))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
            .map(|(_, value)| value.trim().trim_matches('"').to_string())
            .filter(|b| !b.is_empty())
            .ok_or_else(|| {
                Error::InvalidHeader(format!("No multipart boundary in {}", content_type))
            })?;

        let mut delimiter = b"\r\n--".to_vec();
        delimiter.extend_from_slice(boundary.as_bytes());

        Ok(MultipartReader {
            delimiter,
            state: MimeState::Preamble,
            // The first boundary has no leading CRLF; seed one so a single
            // delimiter search covers every boundary.
            buffer: b"\r\n".to_vec(),
            current: None,
            value: Vec::new(),
            specs: Vec::new(),
        })
    }

    /// Whether the closing boundary has been seen
    pub fn is_complete(&self) -> bool {
        self.state == MimeState::Done
    }

    /// Parts completed so far
    pub fn body_specs(&self) -> &[BodySpec] {
        &self.specs
    }

    pub fn into_body_specs(self) -> Vec<BodySpec> {
        self.specs
    }

    /// Feed more body bytes
    pub fn add_to_buffer(&mut self, bytes: &[u8]) -> Result<()> {
        if self.state == MimeState::Done {
            return Ok(());
        }
        self.buffer.extend_from_slice(bytes);

        loop {
            match self.state {
                MimeState::Preamble => match find(&self.buffer, &self.delimiter) {
                    Some(pos) => {
                        self.buffer.drain(..pos + self.delimiter.len());
                        self.state = MimeState::AfterBoundary;
                    }
                    None => {
                        let keep = self.delimiter.len() - 1;
                        let cut = self.buffer.len().saturating_sub(keep);
                        self.buffer.drain(..cut);
                        return Ok(());
                    }
                },
                MimeState::AfterBoundary => {
                    if self.buffer.len() < 2 {
                        return Ok(());
                    }
                    if self.buffer.starts_with(b"--") {
                        self.buffer.clear();
                        self.state = MimeState::Done;
                        return Ok(());
                    }
                    if !self.buffer.starts_with(b"\r\n") {
                        return Err(Error::Protocol(
                            "Malformed multipart boundary line".to_string(),
                        ));
                    }
                    self.buffer.drain(..2);
                    self.state = MimeState::Headers;
                }
                MimeState::Headers => {
                    let end = if self.buffer.starts_with(b"\r\n") {
                        Some((0, 2))
                    } else {
                        find(&self.buffer, b"\r\n\r\n").map(|pos| (pos, pos + 4))
                    };
                    let Some((header_end, body_start)) = end else {
                        return Ok(());
                    };

                    let block = String::from_utf8_lossy(&self.buffer[..header_end]).into_owned();
                    self.buffer.drain(..body_start);
                    self.current = Some(parse_part_headers(&block)?);
                    self.value.clear();
                    self.state = MimeState::Body;
                }
                MimeState::Body => match find(&self.buffer, &self.delimiter) {
                    Some(pos) => {
                        let data: Vec<u8> = self.buffer.drain(..pos).collect();
                        self.write_part(&data)?;
                        self.buffer.drain(..self.delimiter.len());
                        self.finish_part()?;
                        self.state = MimeState::AfterBoundary;
                    }
                    None => {
                        let keep = self.delimiter.len() - 1;
                        let safe = self.buffer.len().saturating_sub(keep);
                        let data: Vec<u8> = self.buffer.drain(..safe).collect();
                        self.write_part(&data)?;
                        return Ok(());
                    }
                },
                MimeState::Done => return Ok(()),
            }
        }
    }

    fn write_part(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let Some(spec) = self.current.as_mut() else {
            return Ok(());
        };
        match spec.file.as_mut() {
            Some(file) => {
                file.write_all(data)?;
                spec.file_size += data.len();
            }
            None => self.value.extend_from_slice(data),
        }
        Ok(())
    }

    fn finish_part(&mut self) -> Result<()> {
        if let Some(mut spec) = self.current.take() {
            match spec.file.as_mut() {
                Some(file) => file.flush()?,
                None => spec.field_value = String::from_utf8_lossy(&self.value).into_owned(),
            }
            self.value.clear();
            self.specs.push(spec);
        }
        Ok(())
    }
}

fn parse_part_headers(block: &str) -> Result<BodySpec> {
    let mut spec = BodySpec::new();

    for line in block.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.trim().eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').skip(1) {
                if let Some((key, val)) = param.trim().split_once('=') {
                    let val = val.trim().trim_matches('"').to_string();
                    match key.trim().to_ascii_lowercase().as_str() {
                        "name" => spec.field_name = val,
                        "filename" => spec.file_name = val,
                        _ => {}
                    }
                }
            }
        } else if name.trim().eq_ignore_ascii_case("content-type") {
            spec.content_type = value.to_string();
        }
    }

    if !spec.file_name.is_empty() {
        spec.file = Some(NamedTempFile::new()?);
    }
    Ok(spec)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
