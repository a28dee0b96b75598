//! Call body parsing.
//!
//! Plain calls are JSON. Calls carrying files are `multipart/form-data`:
//! the JSON body travels in the `__body` part and every other part is a
//! file, named by its path in the envelope tree.

use thiserror::Error;

use crate::{
    codec::tagged::FileUpload,
    protocol::{
        CallBody, MULTIPART_BODY_PART,
        upload::{UploadError, restore_file},
    },
};

const DEFAULT_PART_MIME: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request body is not a valid call: {0}")]
    Json(#[from] serde_json::Error),

    #[error("multipart request has no boundary")]
    NoBoundary,

    #[error("malformed multipart body")]
    Multipart,

    #[error("multipart body has no `{MULTIPART_BODY_PART}` part")]
    MissingBody,

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("request body exceeds {0} bytes")]
    TooLarge(usize),
}

/// Parse a call body according to its `Content-Type`.
pub fn parse_call(content_type: Option<&str>, body: &[u8]) -> Result<CallBody, RequestError> {
    match content_type {
        Some(ct) if is_multipart(ct) => {
            let boundary = boundary(ct).ok_or(RequestError::NoBoundary)?;
            from_parts(parse_multipart(body, boundary)?)
        }
        _ => Ok(serde_json::from_slice(body)?),
    }
}

fn is_multipart(content_type: &str) -> bool {
    content_type
        .trim_start()
        .get(..19)
        .is_some_and(|head| head.eq_ignore_ascii_case("multipart/form-data"))
}

fn boundary(content_type: &str) -> Option<&str> {
    params(content_type)
        .find(|(key, _)| key.eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// `key=value` pairs after the first `;`, quotes stripped.
fn params(header: &str) -> impl Iterator<Item = (&str, &str)> {
    header.split(';').skip(1).filter_map(|param| {
        let (key, value) = param.split_once('=')?;
        Some((key.trim(), value.trim().trim_matches('"')))
    })
}

fn from_parts(parts: Vec<Part<'_>>) -> Result<CallBody, RequestError> {
    let json = parts
        .iter()
        .find(|part| part.name == MULTIPART_BODY_PART)
        .ok_or(RequestError::MissingBody)?;
    let mut body: CallBody = serde_json::from_slice(json.data)?;

    for part in parts.iter().filter(|part| part.name != MULTIPART_BODY_PART) {
        let file = FileUpload {
            name: part.filename.clone().unwrap_or_default(),
            mime: part
                .content_type
                .clone()
                .unwrap_or_else(|| DEFAULT_PART_MIME.to_string()),
            bytes: part.data.to_vec(),
        };
        restore_file(&mut body, &part.name, file)?;
    }
    Ok(body)
}

// =============================================================================
// multipart/form-data
// =============================================================================

#[derive(Debug)]
struct Part<'a> {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    data: &'a [u8],
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_multipart<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<Part<'a>>, RequestError> {
    let delimiter = format!("--{boundary}");
    let separator = format!("\r\n--{boundary}");

    let start = find(body, delimiter.as_bytes()).ok_or(RequestError::Multipart)?;
    let mut rest = &body[start + delimiter.len()..];
    let mut parts = Vec::new();

    loop {
        // Closing delimiter
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        rest = rest.strip_prefix(b"\r\n").ok_or(RequestError::Multipart)?;

        let header_end = find(rest, b"\r\n\r\n").ok_or(RequestError::Multipart)?;
        let headers = std::str::from_utf8(&rest[..header_end]).map_err(|_| RequestError::Multipart)?;
        rest = &rest[header_end + 4..];

        let end = find(rest, separator.as_bytes()).ok_or(RequestError::Multipart)?;
        parts.push(part(headers, &rest[..end])?);
        rest = &rest[end + separator.len()..];
    }
}

fn part<'a>(headers: &str, data: &'a [u8]) -> Result<Part<'a>, RequestError> {
    let mut name = None;
    let mut filename = None;
    let mut content_type = None;

    for line in headers.split("\r\n") {
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let field = field.trim();
        if field.eq_ignore_ascii_case("content-disposition") {
            for (key, param) in params(value) {
                match key {
                    "name" => name = Some(param.to_string()),
                    "filename" => filename = Some(param.to_string()),
                    _ => {}
                }
            }
        } else if field.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        }
    }

    Ok(Part {
        name: name.ok_or(RequestError::Multipart)?,
        filename,
        content_type,
        data,
    })
}
