// File: rdiff_tests.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

mod common;

use common::{param, path_of, scan_context, Reply, ScriptedTransport};
use pretty_assertions::assert_eq;
use raudit::audit::rdiff::{self, RdiffOptions, RdiffOutcome};
use raudit::element::Element;
use rstest::rstest;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const CONTROL: &str = "Error: invalid ID";

/// Boolean-injectable item page: a true condition shows the item, a false
/// one behaves like the bogus id.
fn item_site(true_code: u16, true_body: &'static str, false_body: &'static str) -> Arc<ScriptedTransport> {
    Arc::new(ScriptedTransport::new(move |request| {
        if path_of(request) != "/item" {
            return Reply::not_found();
        }
        let id = param(request, "id");
        if id == "-1" {
            Reply::ok(CONTROL)
        } else if id.contains("1=1") {
            Reply::status(true_code, true_body)
        } else if id.contains("1=2") {
            Reply::ok(false_body)
        } else {
            Reply::ok("Item 1")
        }
    }))
}

fn item() -> Element {
    Element::link("http://target.test/item").with_input("id", "1")
}

fn sqli_options() -> RdiffOptions {
    RdiffOptions::new("-1", vec![(" AND 1=1".to_string(), " AND 1=2".to_string())])
}

#[rstest]
#[case(200, 1)]
#[case(404, 0)]
#[case(500, 0)]
#[tokio::test]
async fn test_true_response_must_be_ok(#[case] true_code: u16, #[case] expected: usize) {
    let transport = item_site(true_code, "Welcome", CONTROL);
    let ctx = scan_context(&transport);

    let outcome = rdiff::audit(&ctx, &item(), &sqli_options()).await;

    assert_eq!(outcome, RdiffOutcome::Completed { issues: expected });
    assert_eq!(ctx.issues().len(), expected);
}

/// Control and false answer "Welcome", the true expression gets the error
/// page with `true_code`.
fn welcome_site(true_code: u16) -> Arc<ScriptedTransport> {
    Arc::new(ScriptedTransport::new(move |request| {
        if path_of(request) != "/item" {
            return Reply::not_found();
        }
        let id = param(request, "id");
        if id.contains("1=1") {
            Reply::status(true_code, CONTROL)
        } else {
            Reply::ok("Welcome")
        }
    }))
}

#[rstest]
#[case(200, 1)]
#[case(404, 0)]
#[tokio::test]
async fn test_decision_table_with_welcome_control(#[case] true_code: u16, #[case] expected: usize) {
    let transport = welcome_site(true_code);
    let ctx = scan_context(&transport);

    let outcome = rdiff::audit(&ctx, &item(), &sqli_options()).await;

    assert_eq!(outcome, RdiffOutcome::Completed { issues: expected });
    if expected == 1 {
        assert_eq!(ctx.issues()[0].proof.as_deref(), Some(CONTROL));
    }
}

#[tokio::test]
async fn test_issue_describes_true_expression() {
    let transport = item_site(200, "Welcome", CONTROL);
    let ctx = scan_context(&transport);

    rdiff::audit(&ctx, &item(), &sqli_options()).await;

    let issues = ctx.issues();
    let issue = &issues[0];
    assert_eq!(issue.vector.affected_input.as_deref(), Some("id"));
    assert_eq!(issue.payload.as_deref(), Some(" AND 1=1"));
    assert_eq!(issue.proof.as_deref(), Some("Welcome"));
    assert_eq!(issue.signature.as_deref(), Some(" AND 1=1 /  AND 1=2"));
}

#[tokio::test]
async fn test_identical_true_and_false_is_not_vulnerable() {
    let transport = item_site(200, CONTROL, CONTROL);
    let ctx = scan_context(&transport);

    let outcome = rdiff::audit(&ctx, &item(), &sqli_options()).await;

    assert_eq!(outcome, RdiffOutcome::Completed { issues: 0 });
}

#[tokio::test]
async fn test_false_unlike_control_is_not_vulnerable() {
    let transport = item_site(200, "Welcome", "Something else entirely");
    let ctx = scan_context(&transport);

    let outcome = rdiff::audit(&ctx, &item(), &sqli_options()).await;

    assert_eq!(outcome, RdiffOutcome::Completed { issues: 0 });
}

#[tokio::test]
async fn test_empty_control_aborts() {
    let transport = Arc::new(ScriptedTransport::new(|request| {
        if param(request, "id") == "-1" {
            Reply::ok("")
        } else {
            Reply::ok("Welcome")
        }
    }));
    let ctx = scan_context(&transport);

    let outcome = rdiff::audit(&ctx, &item(), &sqli_options()).await;

    assert_eq!(outcome, RdiffOutcome::Unstable("empty control response".to_string()));
    assert!(ctx.issues().is_empty());
}

#[tokio::test]
async fn test_diverging_control_aborts() {
    let controls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&controls);
    let transport = Arc::new(ScriptedTransport::new(move |request| {
        let id = param(request, "id");
        if id == "-1" {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Reply::ok(CONTROL)
            } else {
                Reply::ok("Maintenance mode")
            }
        } else if id.contains("1=1") {
            Reply::ok("Welcome")
        } else {
            Reply::ok(CONTROL)
        }
    }));
    let ctx = scan_context(&transport);

    let outcome = rdiff::audit(&ctx, &item(), &sqli_options()).await;

    assert_eq!(outcome, RdiffOutcome::Unstable("control responses diverged".to_string()));
    assert!(ctx.issues().is_empty());
}

#[rstest]
#[case(0.0, 0)]
#[case(0.3, 1)]
#[tokio::test]
async fn test_ratio_tolerates_small_differences(#[case] ratio: f64, #[case] expected: usize) {
    let transport = Arc::new(ScriptedTransport::new(|request| {
        let id = param(request, "id");
        if id == "-1" {
            Reply::ok("Error: invalid ID requested by user")
        } else if id.contains("1=1") {
            Reply::ok("Welcome back user")
        } else {
            Reply::ok("Error: invalid ID requested by guest")
        }
    }));
    let ctx = scan_context(&transport);
    let mut options = sqli_options();
    options.set_ratio(ratio).unwrap();

    let outcome = rdiff::audit(&ctx, &item(), &options).await;

    assert_eq!(outcome, RdiffOutcome::Completed { issues: expected });
}

#[tokio::test]
async fn test_repeat_and_empty_elements_are_skipped() {
    let transport = item_site(200, "Welcome", CONTROL);
    let ctx = scan_context(&transport);

    assert_eq!(
        rdiff::audit(&ctx, &Element::link("http://target.test/item"), &sqli_options()).await,
        RdiffOutcome::Skipped
    );
    rdiff::audit(&ctx, &item(), &sqli_options()).await;
    let requests = transport.request_count();
    assert_eq!(rdiff::audit(&ctx, &item(), &sqli_options()).await, RdiffOutcome::Skipped);
    assert_eq!(transport.request_count(), requests);
}

#[tokio::test]
async fn test_precision_sets_probe_count() {
    let transport = item_site(200, CONTROL, CONTROL);
    let ctx = scan_context(&transport);
    let mut options = sqli_options();
    options.set_precision(3).unwrap();

    rdiff::audit(&ctx, &item(), &options).await;

    // control, true and false three times each, plus the second control.
    assert_eq!(transport.request_count(), 10);
}
