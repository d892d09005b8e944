mod common;

use relay_webdav::test_connection;

use common::spawn_mock;

#[tokio::test]
async fn propfind_multistatus_is_success() {
    let (url, dav) = spawn_mock().await;
    let result = test_connection(&url, "user", "secret").await;
    assert!(result.ok, "{}", result.message);
    assert_eq!(result.message, "Connection successful");
    assert_eq!(dav.count("PROPFIND", "/dav"), 1);
}

#[tokio::test]
async fn unauthorized_is_reported() {
    let (url, dav) = spawn_mock().await;
    *dav.propfind_status.lock().unwrap() = Some(401);
    let result = test_connection(&url, "user", "wrong").await;
    assert!(!result.ok);
    assert_eq!(result.message, "Authentication failed (401)");
}

#[tokio::test]
async fn method_not_allowed_falls_back_to_options() {
    let (url, dav) = spawn_mock().await;
    *dav.propfind_status.lock().unwrap() = Some(405);
    *dav.dav_header.lock().unwrap() = Some("1, 2".into());

    let result = test_connection(&url, "", "").await;
    assert!(result.ok);
    assert_eq!(result.message, "Connection successful (DAV: 1, 2)");
    assert_eq!(dav.count_method("OPTIONS"), 1);
}

#[tokio::test]
async fn other_statuses_try_slash_form_then_fail() {
    let (url, dav) = spawn_mock().await;
    *dav.propfind_status.lock().unwrap() = Some(500);

    let result = test_connection(&url, "", "").await;
    assert!(!result.ok);
    assert_eq!(result.message, "Connection failed (HTTP 500)");
    assert_eq!(dav.count("PROPFIND", "/dav"), 1);
    assert_eq!(dav.count("PROPFIND", "/dav/"), 1);
}
