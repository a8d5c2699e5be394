//! Instance identity via the metadata service (IMDSv2).
//!
//! Two-step token dance: PUT a session token, then GET the instance id
//! with it. Failure degrades to `"unknown"` — the report email is worth
//! sending even when metadata is unreachable.

use std::time::Duration;

use http_body_util::{BodyExt, Empty};
use tracing::{debug, warn};

const IMDS_ADDR: &str = "169.254.169.254:80";
const TOKEN_TTL_SECS: &str = "21600";

/// Resolve the current instance id, or `"unknown"`.
pub async fn instance_id(timeout: Duration) -> String {
    match instance_id_from(IMDS_ADDR, timeout).await {
        Ok(id) => id,
        Err(detail) => {
            warn!(%detail, "instance id lookup failed, using \"unknown\"");
            "unknown".to_string()
        }
    }
}

pub(crate) async fn instance_id_from(addr: &str, timeout: Duration) -> Result<String, String> {
    let token = fetch(
        addr,
        "PUT",
        "/latest/api/token",
        &[("x-aws-ec2-metadata-token-ttl-seconds", TOKEN_TTL_SECS)],
        timeout,
    )
    .await?;

    let id = fetch(
        addr,
        "GET",
        "/latest/meta-data/instance-id",
        &[("x-aws-ec2-metadata-token", token.trim())],
        timeout,
    )
    .await?;

    let id = id.trim().to_string();
    if id.is_empty() {
        return Err("metadata service returned an empty instance id".to_string());
    }
    debug!(instance = %id, "resolved instance id");
    Ok(id)
}

/// One request on a fresh connection; returns the body as text.
async fn fetch(
    addr: &str,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    timeout: Duration,
) -> Result<String, String> {
    tokio::time::timeout(timeout, async {
        let stream = tokio::net::TcpStream::connect(addr)
            .await
            .map_err(|e| format!("connect {addr}: {e}"))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| format!("handshake: {e}"))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = http::Request::builder()
            .method(method)
            .uri(path)
            .header("host", addr)
            .header("user-agent", "volscale/0.1");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let req = builder
            .body(Empty::<bytes::Bytes>::new())
            .map_err(|e| format!("build request: {e}"))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| format!("{method} {path}: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("{method} {path}: status {}", resp.status()));
        }

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| format!("read body: {e}"))?
            .to_bytes();
        String::from_utf8(body.to_vec()).map_err(|e| format!("body not utf-8: {e}"))
    })
    .await
    .map_err(|_| format!("{method} {path}: timed out"))?
}
