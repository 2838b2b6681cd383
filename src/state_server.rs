//! Read-only HTTP endpoint for overlays.
//!
//! Serves the published state as JSON and the current cover image. Each
//! connection gets its own short-lived thread and is closed after one response.

use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::DisplayConfig;
use crate::protocol::{PlaybackEvent, PublishedState};
use crate::state_publisher::StatePublisher;

const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REQUEST_HEAD_BYTES: u64 = 8 * 1024;
const NOW_PLAYING_ROUTE: &str = "/api/now_playing";
const COVER_ROUTE: &str = "/cover.jpg";

/// Everything a request handler needs; cloned into each connection thread.
#[derive(Clone)]
pub struct ServerContext {
    pub publisher: Arc<StatePublisher>,
    pub display: DisplayConfig,
    pub cover_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_line: &'static str,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl HttpResponse {
    fn text(status_line: &'static str, body: &str) -> Self {
        Self {
            status_line,
            content_type: "text/plain; charset=utf-8",
            body: body.as_bytes().to_vec(),
        }
    }

    fn not_found() -> Self {
        Self::text("HTTP/1.1 404 Not Found", "Not Found\n")
    }
}

#[derive(serde::Serialize)]
struct NowPlayingSettings {
    show_history: bool,
    show_history_time: bool,
    show_source: bool,
}

#[derive(serde::Serialize)]
struct NowPlayingResponse<'a> {
    current: &'a PlaybackEvent,
    history: &'a [PlaybackEvent],
    settings: NowPlayingSettings,
}

fn now_playing_json(state: &PublishedState, display: &DisplayConfig) -> Result<Vec<u8>, String> {
    let response = NowPlayingResponse {
        current: &state.current,
        history: &state.history,
        settings: NowPlayingSettings {
            show_history: display.show_history,
            show_history_time: display.show_history_time,
            show_source: display.show_source,
        },
    };
    serde_json::to_vec(&response).map_err(|err| format!("failed to encode state: {err}"))
}

fn looks_like_png(bytes: &[u8]) -> bool {
    bytes.starts_with(b"\x89PNG\r\n\x1a\n")
}

fn cover_response(cover_path: Option<&Path>) -> HttpResponse {
    let Some(cover_path) = cover_path else {
        return HttpResponse::not_found();
    };
    match fs::read(cover_path) {
        Ok(bytes) if !bytes.is_empty() => HttpResponse {
            status_line: "HTTP/1.1 200 OK",
            content_type: if looks_like_png(&bytes) {
                "image/png"
            } else {
                "image/jpeg"
            },
            body: bytes,
        },
        _ => HttpResponse::not_found(),
    }
}

/// Maps one request to its response without touching the socket.
pub fn route_request(method: &str, target: &str, context: &ServerContext) -> HttpResponse {
    if method != "GET" {
        return HttpResponse::text("HTTP/1.1 405 Method Not Allowed", "Method Not Allowed\n");
    }
    let path = target.split_once('?').map_or(target, |(path, _)| path);

    match path {
        NOW_PLAYING_ROUTE => {
            let state = context.publisher.snapshot();
            match now_playing_json(&state, &context.display) {
                Ok(body) => HttpResponse {
                    status_line: "HTTP/1.1 200 OK",
                    content_type: "application/json",
                    body,
                },
                Err(err) => {
                    warn!("{}", err);
                    HttpResponse::text(
                        "HTTP/1.1 500 Internal Server Error",
                        "Internal Server Error\n",
                    )
                }
            }
        }
        COVER_ROUTE => cover_response(context.cover_path.as_deref()),
        _ => HttpResponse::not_found(),
    }
}

/// Reads the request line and drains the headers, refusing heads larger than
/// [`MAX_REQUEST_HEAD_BYTES`].
fn parse_request_head<R: BufRead>(reader: R) -> Result<(String, String), String> {
    let mut head = reader.take(MAX_REQUEST_HEAD_BYTES);
    let mut request_line = String::new();
    head.read_line(&mut request_line)
        .map_err(|err| format!("failed to read request line: {err}"))?;
    if request_line.trim().is_empty() {
        return Err("empty request".to_string());
    }
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| "missing request method".to_string())?
        .to_string();
    let target = parts
        .next()
        .ok_or_else(|| "missing request path".to_string())?
        .to_string();

    // Headers are drained but unused.
    loop {
        let mut line = String::new();
        head.read_line(&mut line)
            .map_err(|err| format!("failed to read header line: {err}"))?;
        if line == "\r\n" || line == "\n" {
            break;
        }
        if line.is_empty() || head.limit() == 0 {
            return Err("request head truncated or too large".to_string());
        }
    }

    Ok((method, target))
}

fn write_response(stream: &mut TcpStream, response: &HttpResponse) -> Result<(), String> {
    let header = format!(
        "{}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        response.status_line,
        response.content_type,
        response.body.len()
    );
    stream
        .write_all(header.as_bytes())
        .map_err(|err| format!("failed to write response header: {err}"))?;
    stream
        .write_all(&response.body)
        .map_err(|err| format!("failed to write response body: {err}"))?;
    Ok(())
}

fn handle_connection(stream: TcpStream, context: &ServerContext) -> Result<(), String> {
    stream
        .set_read_timeout(Some(CLIENT_READ_TIMEOUT))
        .map_err(|err| format!("failed to set read timeout: {err}"))?;
    let reader = BufReader::new(
        stream
            .try_clone()
            .map_err(|err| format!("failed to clone stream: {err}"))?,
    );
    let (method, target) = parse_request_head(reader)?;
    let mut stream = stream;
    write_response(&mut stream, &route_request(&method, &target, context))
}

pub struct StateServer {
    listener: TcpListener,
    context: ServerContext,
}

impl StateServer {
    pub fn bind(bind_address: &str, port: u16, context: ServerContext) -> Result<Self, String> {
        let listener = TcpListener::bind((bind_address, port))
            .map_err(|err| format!("failed to bind state server on {bind_address}:{port}: {err}"))?;
        Ok(Self { listener, context })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, String> {
        self.listener
            .local_addr()
            .map_err(|err| format!("failed to read state server address: {err}"))
    }

    /// Accepts connections until the listener fails.
    pub fn run(self) {
        if let Ok(addr) = self.local_addr() {
            info!("State server listening on http://{}{}", addr, NOW_PLAYING_ROUTE);
        }
        for incoming in self.listener.incoming() {
            match incoming {
                Ok(stream) => {
                    let context = self.context.clone();
                    thread::spawn(move || {
                        if let Err(err) = handle_connection(stream, &context) {
                            debug!("State request failed: {}", err);
                        }
                    });
                }
                Err(err) => debug!("Failed to accept state connection: {}", err),
            }
        }
    }
}
