// File: common/mod.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(dead_code)]

use async_trait::async_trait;
use once_cell::sync::Lazy;
use raudit::config::HttpOptions;
use raudit::context::ScanContext;
use raudit::http::{Client, HttpClient};
use raudit::message::{Request, Response, ReturnCode};
use raudit::transport::{ResponseSink, Transport};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;
use wiremock::{MockServer, ResponseTemplate};

static SLEEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"sleep\((\d+)\)").unwrap());

/// What the scripted server answers to one request.
#[derive(Debug, Clone)]
pub struct Reply {
    pub code: u16,
    pub body: String,
    pub app_time: Duration,
    pub headers: Vec<(String, String)>,
}

impl Reply {
    pub fn ok(body: &str) -> Self {
        Self::status(200, body)
    }

    pub fn status(code: u16, body: &str) -> Self {
        Reply {
            code,
            body: body.to_string(),
            app_time: Duration::from_millis(20),
            headers: Vec::new(),
        }
    }

    pub fn not_found() -> Self {
        Self::status(404, "<h1>Not Found</h1>")
    }

    pub fn taking(mut self, millis: u64) -> Self {
        self.app_time = Duration::from_millis(millis);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

type Script = Box<dyn Fn(&Request) -> Reply + Send + Sync>;

/// In-memory transport answering from a script. Response times are
/// simulated rather than slept, and a simulated time beyond the request
/// timeout comes back as a timeout.
pub struct ScriptedTransport {
    script: Script,
    chunk_size: usize,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
    pub fn new(script: impl Fn(&Request) -> Reply + Send + Sync + 'static) -> Self {
        ScriptedTransport {
            script: Box::new(script),
            chunk_size: 4096,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: &Request, sink: &mut dyn ResponseSink) -> Response {
        self.requests.lock().unwrap().push(request.clone());
        let reply = (self.script)(request);
        tokio::task::yield_now().await;

        if let Some(timeout) = request.timeout() {
            if reply.app_time > timeout {
                return Response::failed(request.clone(), ReturnCode::TimedOut, timeout);
            }
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &reply.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        let mut head =
            Response::new_with_all(request.clone(), reply.code, headers, String::new(), ReturnCode::Ok);
        head.set_timing(reply.app_time, reply.app_time);

        if sink.on_headers(&head).is_abort() {
            head.set_return_code(ReturnCode::Partial);
            return head;
        }
        let mut delivered = Vec::new();
        for chunk in reply.body.as_bytes().chunks(self.chunk_size) {
            delivered.extend_from_slice(chunk);
            if sink.on_chunk(&head, chunk).is_abort() {
                head.set_return_code(ReturnCode::Partial);
                break;
            }
        }
        head.set_body(String::from_utf8_lossy(&delivered).into_owned());
        head
    }
}

pub fn client_with(options: HttpOptions, transport: &Arc<ScriptedTransport>) -> Arc<Client> {
    let transport: Arc<dyn Transport> = transport.clone();
    Arc::new(Client::with_transport(options, transport).unwrap())
}

pub fn scan_context(transport: &Arc<ScriptedTransport>) -> Arc<ScanContext> {
    let client: Arc<dyn HttpClient> = client_with(HttpOptions::default(), transport);
    Arc::new(ScanContext::new(client))
}

pub fn path_of(request: &Request) -> String {
    Url::parse(request.url())
        .map(|url| url.path().to_string())
        .unwrap_or_default()
}

pub fn param(request: &Request, name: &str) -> String {
    request.parameters().get(name).cloned().unwrap_or_default()
}

/// The `N` of a `sleep(N)` payload in `value`.
pub fn sleep_of(value: &str) -> Option<u64> {
    SLEEP
        .captures(value)
        .and_then(|captures| captures[1].parse().ok())
}

pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

pub fn create_mock_response(status: u16, body: &str, headers: HashMap<&str, &str>) -> ResponseTemplate {
    let mut response = ResponseTemplate::new(status).set_body_string(body);
    for (key, value) in headers {
        response = response.append_header(key, value);
    }
    response
}

pub fn create_html_response(content: &str) -> ResponseTemplate {
    let mut headers = HashMap::new();
    headers.insert("content-type", "text/html");
    create_mock_response(200, content, headers)
}
