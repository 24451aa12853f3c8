mod common;

use common::http::{get, post_json, request};
use common::test_server::start_app;

const UPSERT: &str = "/services/exmodule/ExampleUpsert";

fn user_count(app: &common::test_server::TestApp, user_id: &str) -> i64 {
    app.db()
        .query_row(
            "SELECT COUNT(*) FROM t_user WHERE user_id = ?1",
            [user_id],
            |r| r.get(0),
        )
        .unwrap()
}

#[test]
fn test_upsert_inserts_user() {
    let app = start_app();
    let resp = post_json(&app.addr, UPSERT, r#"{"user_id":"U001","user_nm":"Mike Davis"}"#);

    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-type"), Some("application/json; charset=UTF-8"));
    assert_eq!(resp.header("cache-control"), Some("no-cache"));
    let body = resp.json();
    assert_eq!(body["_has_err"], false);
    let msg = &body["_msg"][0];
    assert_eq!(msg["type"], "INFO");
    assert_eq!(msg["id"], "i0001");
    assert_eq!(msg["text"], "User U001 has been registered.");
    assert_eq!(body["upd_ts"].as_str().map(str::len), Some(20));
    assert_eq!(user_count(&app, "U001"), 1);
}

#[test]
fn test_upsert_blank_id_is_rejected_without_write() {
    let app = start_app();
    let resp = post_json(&app.addr, UPSERT, r#"{"user_id":"","user_nm":"Mike Davis"}"#);

    assert_eq!(resp.status, 200);
    let body = resp.json();
    assert_eq!(body["_has_err"], true);
    let msg = &body["_msg"][0];
    assert_eq!(msg["type"], "ERROR");
    assert_eq!(msg["id"], "ev001");
    assert_eq!(msg["item"], "user_id");
    let total: i64 = app
        .db()
        .query_row("SELECT COUNT(*) FROM t_user", [], |r| r.get(0))
        .unwrap();
    assert_eq!(total, 0);
}

#[test]
fn test_update_round_trip_and_stale_conflict() {
    let app = start_app();
    let first = post_json(&app.addr, UPSERT, r#"{"user_id":"U002","user_nm":"A"}"#).json();
    let ts = first["upd_ts"].as_str().unwrap().to_string();

    let update = format!(r#"{{"user_id":"U002","user_nm":"B","upd_ts":"{ts}"}}"#);
    let second = post_json(&app.addr, UPSERT, &update).json();
    assert_eq!(second["_has_err"], false);
    assert_eq!(second["_msg"][0]["id"], "i0002");

    let stale = post_json(&app.addr, UPSERT, &update).json();
    assert_eq!(stale["_has_err"], true);
    assert_eq!(stale["_msg"][0]["id"], "ev003");
    assert_eq!(stale["_msg"][0]["item"], "upd_ts");

    let loaded = post_json(&app.addr, "/services/exmodule/ExampleLoad", r#"{"user_id":"U002"}"#);
    assert_eq!(loaded.json()["user_nm"], "B");
}

#[test]
fn test_get_dispatches_with_query() {
    let app = start_app();
    post_json(&app.addr, UPSERT, r#"{"user_id":"U003","user_nm":"Ken"}"#);
    let resp = get(&app.addr, "/services/exmodule/ExampleLoad?user_id=U003", &[]);
    assert_eq!(resp.status, 200);
    assert_eq!(resp.json()["user_nm"], "Ken");

    let ping = get(&app.addr, "/services/exmodule/ExamplePing", &[]);
    assert_eq!(ping.json()["status"], "ok");
}

#[test]
fn test_search_returns_rows() {
    let app = start_app();
    for (id, nm) in [("U010", "Mike"), ("U011", "Mina")] {
        let body = format!(r#"{{"user_id":"{id}","user_nm":"{nm}"}}"#);
        post_json(&app.addr, UPSERT, &body);
    }
    let body = post_json(&app.addr, "/services/exmodule/ExampleSearch", r#"{"user_nm":"Mi"}"#).json();
    let list = body["list"].as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[1]["user_nm"], "Mina");
}

#[test]
fn test_unknown_service_is_404() {
    let app = start_app();
    let resp = post_json(&app.addr, "/services/exmodule/Nope", "{}");
    assert_eq!(resp.status, 404);
    assert_eq!(resp.json()["error"], "Not Found");
}

#[test]
fn test_unsupported_method_is_405() {
    let app = start_app();
    let resp = request(&app.addr, "DELETE", UPSERT, "{}");
    assert_eq!(resp.status, 405);
    assert_eq!(resp.header("allow"), Some("GET, POST"));
}

#[test]
fn test_malformed_json_is_400() {
    let app = start_app();
    let resp = post_json(&app.addr, UPSERT, "{\"user_id\":");
    assert_eq!(resp.status, 400);
    assert_eq!(resp.json()["error"], "Bad Request");
}

#[test]
fn test_security_headers_with_inbound_trace_id() {
    let app = start_app();
    let req = format!(
        "POST {UPSERT} HTTP/1.1\r\nHost: localhost\r\nX-Trace-Id: 01ARZ3NDEKTSV4RRFFQ69G5FAV\r\nContent-Length: 2\r\n\r\n{{}}"
    );
    let resp = common::http::send_raw(&app.addr, &req);
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("x-trace-id"), None);
    assert_eq!(resp.header("x-content-type-options"), Some("nosniff"));
    assert_eq!(resp.header("x-frame-options"), Some("DENY"));
    assert_eq!(resp.header("referrer-policy"), Some("strict-origin-when-cross-origin"));
    assert!(resp.header("content-security-policy").is_some());
}
