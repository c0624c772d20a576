//! HTTP services
//!
//! Small blocking servers on `tiny_http`. Every request gets its own thread
//! so a long-lived video stream never blocks status polling.

pub mod multipart;
pub mod ocr;
pub mod tracker;

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, ResponseBox, Server, StatusCode};
use tracing::{debug, error, info, warn};

pub use ocr::OcrService;
pub use tracker::TrackerService;

/// Request failure carrying the status code to answer with
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Not found")]
    NotFound,
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("{0}")]
    Internal(String),
}

impl HttpError {
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::PayloadTooLarge(_) => 413,
            Self::Internal(_) => 500,
        }
    }
}

impl From<anyhow::Error> for HttpError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(format!("{:#}", e))
    }
}

impl From<multipart::MultipartError> for HttpError {
    fn from(e: multipart::MultipartError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
}

fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

/// JSON response with the given status
pub fn json_response<T: Serialize>(status: u16, body: &T) -> ResponseBox {
    let bytes = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    let mut response = Response::from_data(bytes).with_status_code(StatusCode(status));
    if let Some(h) = header("Content-Type", "application/json") {
        response.add_header(h);
    }
    response.boxed()
}

pub fn error_response(e: &HttpError) -> ResponseBox {
    let message = e.to_string();
    json_response(e.status(), &ErrorBody { detail: &message })
}

/// Path and decoded query parameters of a request URL
pub fn split_url(url: &str) -> (&str, HashMap<String, String>) {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let params = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_decode(key), percent_decode(value))
        })
        .collect();
    (path, params)
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(b) => {
                        out.push(b);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Allowed origins for cross-site browser requests
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    origins: Vec<String>,
}

impl CorsPolicy {
    pub fn new(origins: Vec<String>) -> Self {
        Self { origins }
    }

    fn allows_any(&self) -> bool {
        self.origins.is_empty() || self.origins.iter().any(|o| o == "*")
    }

    /// Origin header value for a request, None when not allowed
    pub fn allow_origin(&self, request_origin: Option<&str>) -> Option<String> {
        if self.allows_any() {
            return Some(request_origin.unwrap_or("*").to_string());
        }
        request_origin
            .filter(|origin| self.origins.iter().any(|o| o == origin))
            .map(str::to_string)
    }

    fn apply(&self, response: &mut ResponseBox, request_origin: Option<&str>) {
        let Some(origin) = self.allow_origin(request_origin) else {
            return;
        };
        let headers = [
            ("Access-Control-Allow-Origin", origin.as_str()),
            ("Access-Control-Allow-Credentials", "true"),
            ("Vary", "Origin"),
        ];
        for (name, value) in headers {
            if let Some(h) = header(name, value) {
                response.add_header(h);
            }
        }
    }

    fn preflight(&self, request_origin: Option<&str>) -> ResponseBox {
        let mut response = Response::empty(204).boxed();
        for (name, value) in [
            ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
            ("Access-Control-Allow-Headers", "*"),
            ("Access-Control-Max-Age", "600"),
        ] {
            if let Some(h) = header(name, value) {
                response.add_header(h);
            }
        }
        self.apply(&mut response, request_origin);
        response
    }
}

/// Route handler for one service
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: &mut Request) -> Result<ResponseBox, HttpError>;
}

/// Value of a request header, matched case-insensitively
pub fn request_header<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request
        .headers()
        .iter()
        .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Bind a listening socket
pub fn bind(addr: &str) -> Result<Server> {
    Server::http(addr).map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))
}

/// Local address of a bound server
pub fn local_addr(server: &Server) -> Option<SocketAddr> {
    server.server_addr().to_ip()
}

/// Accept requests forever, one thread per request
pub fn run<H: RequestHandler>(server: Server, handler: Arc<H>, cors: CorsPolicy) {
    let cors = Arc::new(cors);
    if let Some(addr) = local_addr(&server) {
        info!("Listening on http://{}", addr);
    }

    for request in server.incoming_requests() {
        let handler = handler.clone();
        let cors = cors.clone();
        thread::spawn(move || dispatch(request, handler.as_ref(), &cors));
    }
}

fn dispatch<H: RequestHandler>(mut request: Request, handler: &H, cors: &CorsPolicy) {
    let origin = request_header(&request, "Origin").map(str::to_string);
    debug!("{} {}", request.method(), request.url());

    let response = if request.method() == &Method::Options {
        cors.preflight(origin.as_deref())
    } else {
        let mut response = match handler.handle(&mut request) {
            Ok(response) => response,
            Err(e) => {
                if e.status() >= 500 {
                    error!("{} {} failed: {}", request.method(), request.url(), e);
                } else {
                    warn!("{} {} rejected: {}", request.method(), request.url(), e);
                }
                error_response(&e)
            }
        };
        cors.apply(&mut response, origin.as_deref());
        response
    };

    if let Err(e) = request.respond(response) {
        debug!("Client went away: {}", e);
    }
}
