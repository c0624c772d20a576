//! Tracker video service: MJPEG stream, status polling and reset

use serde::Serialize;
use std::io::{self, Cursor, Read};
use std::time::Duration;
use tiny_http::{Header, Method, Request, Response, ResponseBox, StatusCode};
use tracing::info;

use super::{json_response, split_url, HttpError, RequestHandler};
use crate::shared::SharedSession;

const BOUNDARY: &str = "frame";

/// How long a viewer waits for the next frame before checking the session again
const FRAME_WAIT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
struct ResetBody {
    status: &'static str,
}

/// One `multipart/x-mixed-replace` part holding a JPEG frame
pub fn mjpeg_part(jpeg: &[u8]) -> Vec<u8> {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY).as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

/// Endless body yielding each newly published frame as a multipart part.
/// Ends when the session stops.
pub struct MjpegStream {
    session: SharedSession,
    last_seq: u64,
    pending: Cursor<Vec<u8>>,
}

impl MjpegStream {
    pub fn new(session: SharedSession) -> Self {
        Self {
            session,
            last_seq: 0,
            pending: Cursor::new(Vec::new()),
        }
    }

    fn next_part(&mut self) -> Option<Vec<u8>> {
        loop {
            if let Some((seq, jpeg)) = self.session.wait_for_frame(self.last_seq, FRAME_WAIT) {
                self.last_seq = seq;
                return Some(mjpeg_part(&jpeg));
            }
            if !self.session.lock().is_active() {
                return None;
            }
        }
    }
}

impl Read for MjpegStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.pending.read(buf)?;
        if n > 0 {
            return Ok(n);
        }
        match self.next_part() {
            Some(part) => {
                self.pending = Cursor::new(part);
                self.pending.read(buf)
            }
            None => Ok(0),
        }
    }
}

/// Routes for the tracker service
pub struct TrackerService {
    session: SharedSession,
}

impl TrackerService {
    pub fn new(session: SharedSession) -> Self {
        Self { session }
    }

    fn video_feed(&self) -> ResponseBox {
        info!("Viewer connected to video feed");
        let content_type = format!("multipart/x-mixed-replace; boundary={}", BOUNDARY);
        let headers = Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes())
            .into_iter()
            .collect();
        Response::new(StatusCode(200), headers, MjpegStream::new(self.session.clone()), None, None).boxed()
    }
}

impl RequestHandler for TrackerService {
    fn handle(&self, request: &mut Request) -> Result<ResponseBox, HttpError> {
        if request.method() != &Method::Get {
            return Err(HttpError::MethodNotAllowed);
        }

        let (path, _) = split_url(request.url());
        match path {
            "/video_feed" => Ok(self.video_feed()),
            "/status" => Ok(json_response(200, &self.session.status())),
            "/reset" => {
                self.session.reset();
                info!("Counter reset via API");
                Ok(json_response(200, &ResetBody { status: "reset" }))
            }
            _ => Err(HttpError::NotFound),
        }
    }
}
