//! Minimal HTTP/1.1 server for integration tests.
//!
//! Routes by path:
//! - `/flaky` answers 503 until it has been hit `flaky_failures` times, then 200
//! - `/missing` answers 404
//! - `/search?...` answers a Nominatim-style JSON array built from `search_hit`
//! - anything else answers 200 with an HTML page titled after the path

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, Copy)]
pub struct PageServerOptions {
    pub flaky_failures: usize,
    /// Coordinates returned by `/search`; `None` answers an empty array.
    pub search_hit: Option<(f64, f64)>,
}

impl Default for PageServerOptions {
    fn default() -> Self {
        Self {
            flaky_failures: 1,
            search_hit: None,
        }
    }
}

pub struct PageServer {
    /// e.g. "http://127.0.0.1:12345"
    pub base: String,
    hits: Arc<AtomicUsize>,
}

impl PageServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Total requests served so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Starts a server in a background thread. It runs until the process exits.
pub fn start() -> PageServer {
    start_with_options(PageServerOptions::default())
}

pub fn start_with_options(opts: PageServerOptions) -> PageServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let flaky_hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let counter = Arc::clone(&counter);
            let flaky_hits = Arc::clone(&flaky_hits);
            thread::spawn(move || handle(stream, &counter, &flaky_hits, opts));
        }
    });
    PageServer {
        base: format!("http://127.0.0.1:{}", port),
        hits,
    }
}

fn handle(
    mut stream: std::net::TcpStream,
    hits: &AtomicUsize,
    flaky_hits: &AtomicUsize,
    opts: PageServerOptions,
) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    hits.fetch_add(1, Ordering::SeqCst);
    let path = request
        .lines()
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .unwrap_or("/");

    let (status, content_type, body) = match path {
        p if p.starts_with("/search") => {
            let body = match opts.search_hit {
                Some((lat, lng)) => format!(
                    r#"[{{"place_id":1,"lat":"{}","lon":"{}","display_name":"hit"}}]"#,
                    lat, lng
                ),
                None => "[]".to_string(),
            };
            ("200 OK", "application/json", body)
        }
        "/missing" => ("404 Not Found", "text/html; charset=utf-8", "not here".to_string()),
        "/flaky" if flaky_hits.fetch_add(1, Ordering::SeqCst) < opts.flaky_failures => {
            ("503 Service Unavailable", "text/html; charset=utf-8", "busy".to_string())
        }
        _ => (
            "200 OK",
            "text/html; charset=utf-8",
            format!(
                "<html><head><title>Page {}</title></head><body>hello</body></html>",
                path
            ),
        ),
    };
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
}
