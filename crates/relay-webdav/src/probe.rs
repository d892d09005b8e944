use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use tracing::warn;

/// Outcome of a connectivity check, shown verbatim to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub ok: bool,
    pub message: String,
}

impl ProbeResult {
    fn ok(message: impl Into<String>) -> Self {
        Self { ok: true, message: message.into() }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self { ok: false, message: message.into() }
    }
}

/// Checks that `url` is a reachable WebDAV collection.
///
/// Issues `PROPFIND` (depth 0) against the URL and its slash-terminated
/// form; a 405 falls back to `OPTIONS` on the same URL.
pub async fn test_connection(url: &str, username: &str, password: &str) -> ProbeResult {
    if url.trim().is_empty() {
        return ProbeResult::fail("URL is empty");
    }

    let client = match Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
    {
        Ok(c) => c,
        Err(e) => return ProbeResult::fail(format!("Connection Failed: {}", e)),
    };
    let propfind = match Method::from_bytes(b"PROPFIND") {
        Ok(m) => m,
        Err(e) => return ProbeResult::fail(format!("Connection Failed: {}", e)),
    };

    let send = |method: Method, target: &str| {
        let builder = client.request(method, target);
        if username.is_empty() {
            builder
        } else {
            builder.basic_auth(username, Some(password))
        }
    };

    let mut targets = vec![url.to_string()];
    if !url.ends_with('/') {
        targets.push(format!("{}/", url));
    }

    let mut last_status: Option<StatusCode> = None;
    for target in &targets {
        let resp = match send(propfind.clone(), target)
            .header("Depth", "0")
            .header("Content-Type", "text/xml")
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url = %target, error = %e, "PROPFIND failed");
                continue;
            }
        };

        let status = resp.status();
        last_status = Some(status);
        match status.as_u16() {
            200 | 207 => return ProbeResult::ok("Connection successful"),
            401 => return ProbeResult::fail("Authentication failed (401)"),
            405 => match send(Method::OPTIONS, target).send().await {
                Ok(opt) => {
                    last_status = Some(opt.status());
                    match opt.status().as_u16() {
                        200 | 204 => {
                            let dav = opt
                                .headers()
                                .get("DAV")
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or_default();
                            if dav.is_empty() {
                                return ProbeResult::ok("Connection successful (OPTIONS)");
                            }
                            return ProbeResult::ok(format!("Connection successful (DAV: {})", dav));
                        }
                        401 => return ProbeResult::fail("Authentication failed (401)"),
                        _ => {}
                    }
                }
                Err(e) => warn!(url = %target, error = %e, "OPTIONS failed"),
            },
            _ => {}
        }
    }

    match last_status {
        Some(status) => ProbeResult::fail(format!("Connection failed (HTTP {})", status.as_u16())),
        None => ProbeResult::fail("Connection failed (HTTP Unknown)"),
    }
}
