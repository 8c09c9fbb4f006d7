// File: http_integration_tests.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

mod common;

use common::{create_html_response, setup_mock_server};
use pretty_assertions::assert_eq;
use raudit::buffer::BufferMode;
use raudit::config::{HttpOptions, DEFAULT_USER_AGENT};
use raudit::http::{Callbacks, Client, HttpClient};
use raudit::message::{Flow, Request, ReturnCode};
use raudit::scope::Scope;
use serial_test::serial;
use std::io::Write;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

fn client(options: HttpOptions) -> Client {
    Client::new(options).unwrap()
}

#[tokio::test]
#[serial]
async fn test_basic_request_carries_user_agent() {
    let mock_server = setup_mock_server().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("user-agent", DEFAULT_USER_AGENT))
        .respond_with(create_html_response("Hello, World!"))
        .mount(&mock_server)
        .await;

    let http = client(HttpOptions::default());
    let response = http.perform(Request::get(&format!("{}/", mock_server.uri()))).await;

    assert!(response.ok());
    assert_eq!(response.code(), 200);
    assert_eq!(response.body(), "Hello, World!");
    assert!(response.app_time() <= response.time());
}

#[tokio::test]
#[serial]
async fn test_parameters_are_sent_in_query() {
    let mock_server = setup_mock_server().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "rust lang"))
        .respond_with(ResponseTemplate::new(200).set_body_string("found"))
        .mount(&mock_server)
        .await;

    let http = client(HttpOptions::default());
    let mut request = Request::get(&format!("{}/search", mock_server.uri()));
    request.set_parameter("q", "rust lang");
    let response = http.perform(request).await;

    assert_eq!(response.body(), "found");
}

#[tokio::test]
#[serial]
async fn test_cookies_flow_from_response_to_next_request() {
    let mock_server = setup_mock_server().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("set-cookie", "session=abc123; Path=/")
                .set_body_string("logged in"),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("cookie", "session=abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_string("profile"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(10)
        .mount(&mock_server)
        .await;

    let http = client(HttpOptions::default());
    let new_cookies = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&new_cookies);
    http.on_new_cookies(Arc::new(move |cookies| {
        counter.fetch_add(cookies.len(), Ordering::SeqCst);
    }));

    let profile = format!("{}/profile", mock_server.uri());
    let before = http.perform(Request::get(&profile)).await;
    assert_eq!(before.code(), 401);

    // Without opting in, the jar stays untouched.
    http.perform(Request::get(&format!("{}/login", mock_server.uri())))
        .await;
    assert!(http.cookies_for(&profile).is_empty());

    http.perform(Request::get(&format!("{}/login", mock_server.uri())).with_update_cookies(true))
        .await;
    assert_eq!(new_cookies.load(Ordering::SeqCst), 1);
    assert_eq!(http.cookies_for(&profile).len(), 1);

    let after = http.perform(Request::get(&profile)).await;
    assert_eq!(after.code(), 200);
    assert_eq!(after.body(), "profile");
}

#[tokio::test]
#[serial]
async fn test_cookie_jar_file_is_loaded() {
    let mock_server = setup_mock_server().await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("cookie", "token=from-file"))
        .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
        .mount(&mock_server)
        .await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# Netscape HTTP Cookie File").unwrap();
    writeln!(file, "127.0.0.1\tFALSE\t/\tFALSE\t0\ttoken\tfrom-file").unwrap();

    let mut options = HttpOptions::default();
    options.set_cookie_jar_file(Some(file.path().to_path_buf()));
    let http = client(options);
    let response = http
        .perform(Request::get(&format!("{}/account", mock_server.uri())))
        .await;

    assert_eq!(response.body(), "welcome");
}

#[tokio::test]
#[serial]
async fn test_redirect_chain_is_recorded() {
    let mock_server = setup_mock_server().await;
    for (from, to) in [("/a", "/b"), ("/b", "/c")] {
        Mock::given(method("GET"))
            .and(path(from))
            .respond_with(ResponseTemplate::new(302).insert_header("location", to))
            .mount(&mock_server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/c"))
        .respond_with(ResponseTemplate::new(200).set_body_string("done"))
        .mount(&mock_server)
        .await;

    let http = client(HttpOptions::default());
    let start = format!("{}/a", mock_server.uri());

    let followed = http.perform(Request::get(&start)).await;
    assert_eq!(followed.code(), 200);
    assert_eq!(followed.body(), "done");
    assert!(followed.url().ends_with("/c"));
    let hops: Vec<u16> = followed.redirections().iter().map(|r| r.code()).collect();
    assert_eq!(hops, vec![302, 302]);

    let capped = http
        .perform(Request::get(&start).with_redirect_limit(1))
        .await;
    assert_eq!(capped.code(), 302);
    assert_eq!(capped.redirections().len(), 1);
    assert!(capped.url().ends_with("/b"));

    let unfollowed = http
        .perform(Request::get(&start).with_follow_location(false))
        .await;
    assert_eq!(unfollowed.code(), 302);
    assert!(unfollowed.is_redirect());
    assert!(unfollowed.redirections().is_empty());
}

#[tokio::test]
#[serial]
async fn test_see_other_switches_post_to_get() {
    let mock_server = setup_mock_server().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(303).insert_header("location", "/result"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/result"))
        .respond_with(ResponseTemplate::new(200).set_body_string("result"))
        .mount(&mock_server)
        .await;

    let http = client(HttpOptions::default());
    let response = http
        .perform(Request::post(&format!("{}/submit", mock_server.uri())).with_body("a=1"))
        .await;

    assert_eq!(response.code(), 200);
    assert_eq!(response.body(), "result");
}

#[tokio::test]
#[serial]
async fn test_slow_response_times_out() {
    let mock_server = setup_mock_server().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_millis(1_500)),
        )
        .mount(&mock_server)
        .await;

    let http = client(HttpOptions::default());
    let response = http
        .perform(
            Request::get(&format!("{}/slow", mock_server.uri()))
                .with_timeout(Duration::from_millis(200)),
        )
        .await;

    assert!(response.timed_out());
    assert!(!response.ok());
    assert_eq!(response.app_time(), response.time());
    assert!(response.time() >= Duration::from_millis(200));
    assert_eq!(http.statistics().time_out_count, 1);
}

#[tokio::test]
#[serial]
async fn test_connection_failure_is_an_error_code() {
    let http = client(HttpOptions::default());
    let response = http.perform(Request::get("http://127.0.0.1:1/")).await;

    assert!(matches!(response.return_code(), ReturnCode::Error(_)));
    assert_eq!(response.code(), 0);
}

#[tokio::test]
#[serial]
async fn test_byte_buffered_streaming() {
    let mock_server = setup_mock_server().await;
    let body = "a".repeat(40_000);
    Mock::given(method("GET"))
        .and(path("/large"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
        .mount(&mock_server)
        .await;

    let http = client(HttpOptions::default());
    let parts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&parts);
    http.request_buffered(
        Request::get(&format!("{}/large", mock_server.uri())),
        http.byte_buffer_mode(),
        Box::new(move |response, completed| {
            seen.lock()
                .unwrap()
                .push((response.body().to_string(), completed));
            Flow::Continue
        }),
    )
    .await;
    http.run().await;

    let parts = parts.lock().unwrap();
    let joined: String = parts.iter().map(|(text, _)| text.as_str()).collect();
    assert_eq!(joined.len(), body.len());
    assert!(parts.last().unwrap().1);
    assert!(parts[..parts.len() - 1]
        .iter()
        .all(|(text, completed)| !completed && text.len() >= 15_000));
}

#[tokio::test]
#[serial]
async fn test_out_of_scope_response_is_aborted() {
    let mock_server = setup_mock_server().await;
    Mock::given(method("GET"))
        .and(path("/private/data"))
        .respond_with(ResponseTemplate::new(200).set_body_string("secret\n".repeat(100)))
        .mount(&mock_server)
        .await;

    let mut scope = Scope::new();
    scope.add_exclude_pattern("/private/");
    let mut options = HttpOptions::default();
    options.set_scope(scope);
    let http = client(options);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let result = Arc::new(Mutex::new(None));
    let finished = Arc::clone(&result);
    http.on_complete(Arc::new(move |response| {
        *finished.lock().unwrap() = Some(response.return_code().clone());
    }));
    http.request_buffered(
        Request::get(&format!("{}/private/data", mock_server.uri())),
        BufferMode::Lines(1),
        Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Flow::Continue
        }),
    )
    .await;
    http.run().await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(*result.lock().unwrap(), Some(ReturnCode::Partial));
}

#[tokio::test]
#[serial]
async fn test_rate_limited_client_completes() {
    let mock_server = setup_mock_server().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(5)
        .mount(&mock_server)
        .await;

    let mut options = HttpOptions::default();
    options.set_rate_limit(NonZeroU32::new(50));
    let http = client(options);
    let completed = Arc::new(AtomicUsize::new(0));
    for i in 0..5 {
        let counter = Arc::clone(&completed);
        http.queue(
            Request::get(&format!("{}/{}", mock_server.uri(), i)),
            Callbacks::new().on_complete(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await;
    }
    http.run().await;

    assert_eq!(completed.load(Ordering::SeqCst), 5);
}
