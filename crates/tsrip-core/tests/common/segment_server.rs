//! Minimal HTTP/1.1 server for integration tests: serves one body per
//! segment path (`/seg/<index>.ts`) with injectable failure status,
//! response delay, stall, and truncation. Tracks the peak number of
//! in-flight requests so tests can assert the client's concurrency bound.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Respond to this segment index with the given status and no body,
    /// on every attempt.
    pub fail: Option<(usize, u32)>,
    /// Per-index delay before the response is written.
    pub delay_ms: HashMap<usize, u64>,
    /// Segment index whose response never arrives (tests client timeouts).
    pub stall: Option<usize>,
    /// Segment index whose body is cut to half its advertised length.
    pub truncate: Option<usize>,
}

pub struct SegmentServer {
    base_url: String,
    active_peak: Arc<AtomicUsize>,
    segment_count: usize,
}

impl SegmentServer {
    /// URL of segment `index`.
    pub fn url_for(&self, index: usize) -> String {
        format!("{}seg/{}.ts", self.base_url, index)
    }

    /// Locators for every served segment, in order.
    pub fn locators(&self) -> Vec<String> {
        (0..self.segment_count).map(|i| self.url_for(i)).collect()
    }

    /// Highest number of requests that were in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.active_peak.load(Ordering::Relaxed)
    }
}

/// Starts a server in a background thread serving `bodies` (index i at
/// `/seg/i.ts`). The server runs until the process exits.
pub fn start(bodies: Vec<Vec<u8>>) -> SegmentServer {
    start_with_options(bodies, ServerOptions::default())
}

pub fn start_with_options(bodies: Vec<Vec<u8>>, opts: ServerOptions) -> SegmentServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let segment_count = bodies.len();
    let bodies = Arc::new(bodies);
    let active_peak = Arc::new(AtomicUsize::new(0));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::clone(&active_peak);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let bodies = Arc::clone(&bodies);
            let opts = opts.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                handle(stream, &bodies, &opts);
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
    });
    SegmentServer {
        base_url: format!("http://127.0.0.1:{}/", port),
        active_peak,
        segment_count,
    }
}

fn handle(mut stream: std::net::TcpStream, bodies: &[Vec<u8>], opts: &ServerOptions) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return,
        Ok(n) => n,
        Err(_) => return,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let index = match parse_segment_index(request) {
        Some(i) => i,
        None => {
            let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
            return;
        }
    };

    if opts.stall == Some(index) {
        // Hold the connection open without answering; the client's
        // per-fetch timeout is expected to fire first.
        thread::sleep(Duration::from_secs(10));
        return;
    }
    if let Some(ms) = opts.delay_ms.get(&index) {
        thread::sleep(Duration::from_millis(*ms));
    }
    if let Some((fail_index, status)) = opts.fail {
        if fail_index == index {
            let response = format!("HTTP/1.1 {} Injected Error\r\nContent-Length: 0\r\n\r\n", status);
            let _ = stream.write_all(response.as_bytes());
            return;
        }
    }

    let body = match bodies.get(index) {
        Some(b) => b.as_slice(),
        None => {
            let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
            return;
        }
    };

    let advertised = body.len();
    let to_send = if opts.truncate == Some(index) {
        &body[..body.len() / 2]
    } else {
        body
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        advertised
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.write_all(to_send);
}

/// Extracts the index from a `GET /seg/<index>.ts` request line.
fn parse_segment_index(request: &str) -> Option<usize> {
    let line = request.lines().next()?;
    let path = line.split_whitespace().nth(1)?;
    let rest = path.strip_prefix("/seg/")?;
    rest.strip_suffix(".ts")?.parse().ok()
}
