//! HTTP page fetching.
//!
//! Uses the curl crate (libcurl) to GET a page, keep at most a configured
//! number of body bytes and pull out the bits the pipeline records: status,
//! content type and the HTML `<title>`. [`get_json`] serves JSON APIs.

mod parse;

use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::config::FetchConfig;
use crate::retry::FetchError;

pub use parse::{extract_title, parse_headers, HeaderInfo};

const USER_AGENT: &str = concat!("scout/", env!("CARGO_PKG_VERSION"));

/// Per-request limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Body bytes kept; the rest of the transfer is read and dropped.
    pub max_body_bytes: u64,
}

impl FetchOptions {
    pub fn from_config(cfg: &FetchConfig) -> Self {
        Self {
            timeout: Duration::from_secs(cfg.timeout_secs.max(1)),
            connect_timeout: Duration::from_secs(cfg.timeout_secs.clamp(1, 15)),
            max_body_bytes: cfg.max_body_bytes,
        }
    }
}

/// A fetched page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub status: u32,
    pub content_type: Option<String>,
    pub title: Option<String>,
    /// Bytes received over the wire (may exceed the kept body).
    pub bytes: u64,
    pub truncated: bool,
}

/// Raw result of one GET: final status, final header block and kept body.
struct Response {
    status: u32,
    headers: HeaderInfo,
    body: Vec<u8>,
    /// Bytes received over the wire (may exceed `body`).
    received: u64,
}

fn get(url: &str, opts: &FetchOptions, accept: &str) -> Result<Response, FetchError> {
    let mut headers: Vec<String> = Vec::new();
    let mut body: Vec<u8> = Vec::new();
    let mut received: u64 = 0;
    let cap = usize::try_from(opts.max_body_bytes).unwrap_or(usize::MAX);

    let mut request_headers = curl::easy::List::new();
    request_headers.append(&format!("Accept: {accept}"))?;

    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.get(true)?;
    easy.follow_location(true)?;
    easy.max_redirections(5)?;
    easy.useragent(USER_AGENT)?;
    easy.http_headers(request_headers)?;
    easy.accept_encoding("")?;
    easy.connect_timeout(opts.connect_timeout)?;
    easy.timeout(opts.timeout)?;

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = std::str::from_utf8(data) {
                let line = s.trim_end();
                // A new status line starts a new header block (after a redirect).
                if line.starts_with("HTTP/") {
                    headers.clear();
                }
                headers.push(line.to_string());
            }
            true
        })?;
        transfer.write_function(|data| {
            received += data.len() as u64;
            let room = cap.saturating_sub(body.len());
            body.extend_from_slice(&data[..data.len().min(room)]);
            Ok(data.len())
        })?;
        transfer.perform()?;
    }

    let status = easy.response_code()?;
    if !(200..300).contains(&status) {
        return Err(FetchError::Http(status));
    }
    Ok(Response {
        status,
        headers: parse_headers(&headers),
        body,
        received,
    })
}

/// Performs a GET and returns the parsed page. Non-2xx is an error.
///
/// Follows redirects. Blocking; call from `spawn_blocking` in async code.
pub fn get_page(url: &str, opts: &FetchOptions) -> Result<Page, FetchError> {
    let resp = get(url, opts, "text/html,application/xhtml+xml,*/*;q=0.8")?;
    let is_html = resp
        .headers
        .content_type
        .as_deref()
        .map_or(true, |ct| ct.to_ascii_lowercase().contains("html"));
    let title = if is_html {
        extract_title(&String::from_utf8_lossy(&resp.body))
    } else {
        None
    };

    Ok(Page {
        status: resp.status,
        content_type: resp.headers.content_type,
        title,
        bytes: resp.received,
        truncated: resp.received > resp.body.len() as u64,
    })
}

/// GET a JSON document and decode it. A truncated body fails to decode.
///
/// Blocking, like [`get_page`].
pub fn get_json<T: DeserializeOwned>(url: &str, opts: &FetchOptions) -> Result<T, FetchError> {
    let resp = get(url, opts, "application/json")?;
    Ok(serde_json::from_slice(&resp.body)?)
}
