//! Plain HTTP/1.1 over a Unix domain socket.
//!
//! The gate daemon only ever speaks to same-host clients, so there is no
//! connection pool: each request opens a fresh [`UnixStream`], performs one
//! HTTP/1 exchange, and drops the connection. A background task drives the
//! hyper connection while the request is in flight.

use std::{path::Path, time::Duration};

use bytes::Bytes;
use http::{Request, Response, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;

/// A fully-buffered response.
#[derive(Debug)]
pub struct BufResponse {
    pub status: StatusCode,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

impl BufResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Send one `GET` over the socket at `socket_path` and buffer the response.
///
/// `headers` are appended to the request. The whole exchange (connect, send,
/// read body) is bounded by `timeout`.
pub async fn get(
    socket_path: &Path,
    path_and_query: &str,
    headers: &[(&str, String)],
    timeout: Duration,
) -> std::io::Result<BufResponse> {
    let fut = request(socket_path, path_and_query, headers);
    tokio::time::timeout(timeout, fut).await.map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("gate request {path_and_query} timed out after {timeout:?}"),
        )
    })?
}

async fn request(
    socket_path: &Path,
    path_and_query: &str,
    headers: &[(&str, String)],
) -> std::io::Result<BufResponse> {
    let stream = UnixStream::connect(socket_path).await?;

    let (mut sender, conn) =
        hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(std::io::Error::other)?;

    // The connection task finishes once the response (and body) is read or
    // either side closes; failures surface through `send_request` below.
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            tracing::debug!("gate socket connection error: {err}");
        }
    });

    let mut builder = Request::builder()
        .method(http::Method::GET)
        .uri(path_and_query)
        // hyper requires a Host header for HTTP/1.1; the daemon ignores it.
        .header(header::HOST, "gate");
    for (name, value) in headers {
        builder = builder.header(*name, value);
    }
    let request = builder
        .body(Full::<Bytes>::default())
        .map_err(std::io::Error::other)?;

    let response: Response<hyper::body::Incoming> = sender
        .send_request(request)
        .await
        .map_err(std::io::Error::other)?;

    let (parts, body) = response.into_parts();
    let body = body
        .collect()
        .await
        .map_err(std::io::Error::other)?
        .to_bytes();

    Ok(BufResponse {
        status: parts.status,
        headers: parts.headers,
        body,
    })
}

#[cfg(test)]
mod test {
    use axum::{Router, routing};

    use super::*;

    #[tokio::test]
    async fn get_roundtrips_over_a_unix_socket() {
        let tmp = tempfile::tempdir().unwrap();
        let socket_path = tmp.path().join("test.sock");

        let router = Router::new().route(
            "/health",
            routing::get(|| async { r#"{"status":"ok"}"# }),
        );
        let listener =
            tokio::net::UnixListener::bind(&socket_path).unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let resp = get(
            &socket_path,
            "/health",
            &[("x-test", "1".to_owned())],
            Duration::from_secs(3),
        )
        .await
        .unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert!(std::str::from_utf8(&resp.body).unwrap().contains("ok"));
    }

    #[tokio::test]
    async fn get_times_out_against_a_dead_socket() {
        let tmp = tempfile::tempdir().unwrap();
        let socket_path = tmp.path().join("missing.sock");

        let err = get(&socket_path, "/health", &[], Duration::from_millis(200))
            .await
            .unwrap_err();
        // Connect fails immediately with NotFound rather than timing out.
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
