//! Classify HTTP status and curl errors into retry policy error kinds.

use super::error::FetchError;
use super::policy::ErrorKind;

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        429 | 503 => ErrorKind::Throttled,
        408 => ErrorKind::Timeout,
        500..=599 => ErrorKind::Http5xx(code as u16),
        _ => ErrorKind::Other,
    }
}

/// Classify a curl error for retry decisions.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
    {
        return ErrorKind::Connection;
    }
    ErrorKind::Other
}

pub fn classify(e: &FetchError) -> ErrorKind {
    match e {
        FetchError::Curl(ce) => classify_curl_error(ce),
        FetchError::Http(code) => classify_http_status(*code),
        FetchError::Budget(_) | FetchError::Decode(_) | FetchError::Task(_) => ErrorKind::Other,
    }
}

/// True when the request never reached the remote host, so a token spent on
/// it bought nothing.
pub fn request_not_sent(e: &FetchError) -> bool {
    match e {
        FetchError::Curl(ce) => {
            ce.is_couldnt_connect() || ce.is_couldnt_resolve_host() || ce.is_couldnt_resolve_proxy()
        }
        FetchError::Budget(_) => true,
        FetchError::Http(_) | FetchError::Decode(_) | FetchError::Task(_) => false,
    }
}
