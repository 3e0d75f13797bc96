//! Minimal HTTP client over a Unix domain socket.
//!
//! Both engines expose their management API on a Unix socket, not TCP, so a
//! thin wrapper over hyper + tokio's `UnixStream` is all that is needed.

use std::path::Path;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, Response, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;

use crate::MigrateError;

/// Send an HTTP request to an engine API socket and return the response body.
///
/// The `uri_path` should be the path and query only (e.g. `/v1.24/info`).
///
/// # Errors
/// Returns [`MigrateError::Api`] on connection errors and non-2xx responses;
/// `status` is set whenever the server answered.
pub(crate) async fn api_request(
    socket_path: &Path,
    method: Method,
    uri_path: &str,
    body: Option<String>,
) -> Result<String, MigrateError> {
    let request = format!("{method} {uri_path}");
    let api_err = |status: Option<u16>, message: String| MigrateError::Api {
        request: request.clone(),
        status,
        message,
    };

    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| api_err(None, format!("connect to {}: {e}", socket_path.display())))?;

    let io = TokioIo::new(stream);

    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| api_err(None, format!("HTTP handshake: {e}")))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("engine API connection closed: {e}");
        }
    });

    let body_bytes = body.map(Bytes::from).unwrap_or_default();
    let content_len = body_bytes.len();

    let uri: Uri = uri_path
        .parse()
        .map_err(|e| api_err(None, format!("invalid URI path: {e}")))?;

    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Host", "localhost");

    if content_len > 0 {
        builder = builder.header("Content-Type", "application/json");
    }
    builder = builder.header("Content-Length", content_len.to_string());

    let req = builder
        .body(Full::new(body_bytes))
        .map_err(|e| api_err(None, format!("build request: {e}")))?;

    let resp: Response<_> = sender
        .send_request(req)
        .await
        .map_err(|e| api_err(None, format!("send request: {e}")))?;

    let status = resp.status();
    let body_bytes = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| api_err(Some(status.as_u16()), format!("read response body: {e}")))?
        .to_bytes();

    let body_str = String::from_utf8_lossy(&body_bytes).into_owned();

    if !status.is_success() {
        return Err(api_err(Some(status.as_u16()), format!("HTTP {status}: {}", body_str.trim())));
    }

    Ok(body_str)
}
