// File: context.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::audit::taint::longest_word;
use crate::audit::timing::TimingState;
use crate::http::{lock, Callbacks, HttpClient};
use crate::issue::Issue;
use crate::message::{Request, Response, ReturnCode};
use crate::not_found::NotFoundDetector;
use futures::future::BoxFuture;
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

pub type IssueObserver = Arc<dyn Fn(&Issue) + Send + Sync>;

/// Per-scan state shared by the audit strategies: the client, logged
/// issues, dedup sets and caches. Several scans in one process each get
/// their own context.
pub struct ScanContext {
    client: Arc<dyn HttpClient>,
    platforms: Vec<String>,
    issues: Mutex<Vec<Issue>>,
    issue_observers: Mutex<Vec<IssueObserver>>,
    audited: Mutex<HashSet<String>>,
    longest_words: Mutex<HashMap<String, Option<String>>>,
    not_found: NotFoundDetector,
    timing: TimingState,
}

impl ScanContext {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        ScanContext {
            client,
            platforms: Vec::new(),
            issues: Mutex::new(Vec::new()),
            issue_observers: Mutex::new(Vec::new()),
            audited: Mutex::new(HashSet::new()),
            longest_words: Mutex::new(HashMap::new()),
            not_found: NotFoundDetector::new(),
            timing: TimingState::default(),
        }
    }

    /// Restricts platform-keyed payloads to these platforms.
    pub fn with_platforms(mut self, platforms: Vec<String>) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn with_not_found(mut self, detector: NotFoundDetector) -> Self {
        self.not_found = detector;
        self
    }

    pub fn client(&self) -> &dyn HttpClient {
        self.client.as_ref()
    }

    pub fn platforms(&self) -> &[String] {
        &self.platforms
    }

    /// Records an issue and returns its index for later verification.
    pub fn log_issue(&self, issue: Issue) -> usize {
        info!("Issue: {}", issue);
        let index = {
            let mut issues = lock(&self.issues);
            issues.push(issue.clone());
            issues.len() - 1
        };
        let observers = lock(&self.issue_observers).clone();
        for observer in observers {
            observer(&issue);
        }
        index
    }

    pub fn distrust(&self, index: usize, remark: &str) {
        match lock(&self.issues).get_mut(index) {
            Some(issue) => {
                warn!("Distrusting '{}': {}", issue.name, remark);
                issue.distrust(remark);
            }
            None => warn!("No issue #{} to distrust", index),
        }
    }

    pub fn issues(&self) -> Vec<Issue> {
        lock(&self.issues).clone()
    }

    pub fn on_issue(&self, observer: IssueObserver) {
        lock(&self.issue_observers).push(observer);
    }

    /// Records `id`; true the first time it is seen.
    pub fn audited(&self, id: &str) -> bool {
        lock(&self.audited).insert(id.to_string())
    }

    pub fn is_audited(&self, id: &str) -> bool {
        lock(&self.audited).contains(id)
    }

    /// Longest literal word of a regex source, cached per pattern.
    pub fn longest_word(&self, pattern: &str) -> Option<String> {
        if let Some(cached) = lock(&self.longest_words).get(pattern) {
            return cached.clone();
        }
        let word = longest_word(pattern);
        lock(&self.longest_words).insert(pattern.to_string(), word.clone());
        word
    }

    pub fn not_found(&self) -> &NotFoundDetector {
        &self.not_found
    }

    pub async fn is_not_found(&self, response: &Response) -> bool {
        self.not_found.is_not_found(self.client(), response).await
    }

    pub fn timing(&self) -> &TimingState {
        &self.timing
    }

    /// Queues `requests`, runs the client and returns the responses in
    /// request order. Requests dropped by an abort come back as errors.
    pub async fn gather(&self, requests: Vec<Request>) -> Vec<Response> {
        let mut pending = Vec::with_capacity(requests.len());
        for request in requests {
            let (tx, rx) = oneshot::channel();
            let fallback = request.clone();
            self.client.enqueue(
                request,
                Callbacks::new().on_complete(move |response| {
                    let _ = tx.send(response.clone());
                }),
            );
            pending.push((fallback, rx));
        }
        self.client.run().await;

        let mut responses = Vec::with_capacity(pending.len());
        for (request, rx) in pending {
            let response = match rx.await {
                Ok(response) => response,
                Err(_) => Response::failed(
                    request,
                    ReturnCode::Error("aborted".to_string()),
                    Duration::ZERO,
                ),
            };
            responses.push(response);
        }
        responses
    }

    /// Registers `callback` to run once the current batch has completed.
    pub fn after_run<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.client
            .after_run(Box::new(move || -> BoxFuture<'static, ()> { Box::pin(callback()) }));
    }

    /// Forgets issues, dedup ids and timing candidates.
    pub fn reset(&self) {
        lock(&self.issues).clear();
        lock(&self.audited).clear();
        self.timing.reset();
    }
}
