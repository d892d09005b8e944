//! In-process WebDAV stand-in for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};

#[derive(Default)]
pub struct MockDav {
    pub calls: Mutex<Vec<(String, String)>>,
    pub stored: Mutex<HashMap<String, Vec<u8>>>,
    /// Statuses answered to successive PUTs before falling back to 201.
    pub put_script: Mutex<VecDeque<u16>>,
    pub mkcol_status: Mutex<HashMap<String, u16>>,
    pub propfind_status: Mutex<Option<u16>>,
    pub dav_header: Mutex<Option<String>>,
}

impl MockDav {
    pub fn count(&self, method: &str, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, p)| m == method && p == path)
            .count()
    }

    pub fn count_method(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(m, _)| m == method).count()
    }

    pub fn script_puts(&self, statuses: &[u16]) {
        self.put_script.lock().unwrap().extend(statuses.iter().copied());
    }
}

async fn handle(
    State(dav): State<Arc<MockDav>>,
    method: Method,
    uri: Uri,
    body: Body,
) -> Response {
    let path = uri.path().to_string();
    dav.calls
        .lock()
        .unwrap()
        .push((method.as_str().to_string(), path.clone()));

    match method.as_str() {
        "MKCOL" => {
            let status = dav.mkcol_status.lock().unwrap().get(&path).copied().unwrap_or(201);
            StatusCode::from_u16(status).unwrap().into_response()
        }
        "PUT" => {
            let bytes = match axum::body::to_bytes(body, usize::MAX).await {
                Ok(b) => b,
                Err(_) => return StatusCode::BAD_REQUEST.into_response(),
            };
            let scripted = dav.put_script.lock().unwrap().pop_front();
            match scripted {
                Some(status) => (StatusCode::from_u16(status).unwrap(), "scripted failure").into_response(),
                None => {
                    dav.stored.lock().unwrap().insert(path, bytes.to_vec());
                    StatusCode::CREATED.into_response()
                }
            }
        }
        "PROPFIND" => {
            let status = dav.propfind_status.lock().unwrap().unwrap_or(207);
            StatusCode::from_u16(status).unwrap().into_response()
        }
        "OPTIONS" => match dav.dav_header.lock().unwrap().clone() {
            Some(dav_value) => (StatusCode::OK, [("DAV", dav_value)]).into_response(),
            None => StatusCode::OK.into_response(),
        },
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

/// Starts the mock on an ephemeral port and returns its base URL.
pub async fn spawn_mock() -> (String, Arc<MockDav>) {
    let dav = Arc::new(MockDav::default());
    let app = Router::new().fallback(handle).with_state(Arc::clone(&dav));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/dav", addr), dav)
}
