// File: transport.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::config::{HttpOptions, ProxySettings};
use crate::error::{AuditError, AuditResult};
use crate::message::{Flow, Request, Response, ReturnCode};
use async_trait::async_trait;
use log::{debug, trace};
use lru::LruCache;
use reqwest::header::{HeaderValue, COOKIE, LOCATION, USER_AGENT};
use reqwest::{Method, StatusCode};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use url::Url;

/// Receives the head and body chunks of a response while it is being read.
/// Returning `Flow::Abort` stops the transport from reading any further.
pub trait ResponseSink: Send {
    fn on_headers(&mut self, _head: &Response) -> Flow {
        Flow::Continue
    }

    fn on_chunk(&mut self, _head: &Response, _chunk: &[u8]) -> Flow {
        Flow::Continue
    }
}

pub struct NullSink;

impl ResponseSink for NullSink {}

/// Performs exactly one HTTP exchange (following redirects when asked to).
/// Failures are reported through the response's return code, never as `Err`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &Request, sink: &mut dyn ResponseSink) -> Response;
}

const OVERHEAD_CACHE_SIZE: usize = 256;

pub struct ReqwestTransport {
    client: reqwest::Client,
    proxied: Mutex<HashMap<ProxySettings, reqwest::Client>>,
    connect_overhead: Arc<Mutex<LruCache<String, Duration>>>,
    default_timeout: Duration,
    follow_redirects: bool,
    redirect_limit: usize,
}

impl ReqwestTransport {
    pub fn new(options: &HttpOptions) -> AuditResult<Self> {
        let client = build_client(options.user_agent(), options.proxy())?;
        Ok(ReqwestTransport {
            client,
            proxied: Mutex::new(HashMap::new()),
            connect_overhead: Arc::new(Mutex::new(LruCache::new(
                NonZeroUsize::new(OVERHEAD_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            ))),
            default_timeout: options.request_timeout(),
            follow_redirects: options.follow_redirects(),
            redirect_limit: options.redirect_limit(),
        })
    }

    fn client_for(&self, proxy: Option<&ProxySettings>) -> reqwest::Client {
        let proxy = match proxy {
            Some(proxy) => proxy,
            None => return self.client.clone(),
        };
        let mut proxied = match self.proxied.lock() {
            Ok(proxied) => proxied,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(client) = proxied.get(proxy) {
            return client.clone();
        }
        match build_client("", Some(proxy)) {
            Ok(client) => {
                proxied.insert(proxy.clone(), client.clone());
                client
            }
            Err(e) => {
                debug!("Falling back to direct client, proxy unusable: {}", e);
                self.client.clone()
            }
        }
    }

    /// Estimated DNS + TCP setup cost for the origin of `url`, measured once
    /// per origin and cached. Subtracted from the time-to-first-byte so that
    /// `app_time` reflects server-side processing.
    async fn connect_overhead(&self, url: &Url, proxied: bool) -> Duration {
        if proxied {
            return Duration::ZERO;
        }
        let host = match url.host_str() {
            Some(host) => host.to_string(),
            None => return Duration::ZERO,
        };
        let port = url.port_or_known_default().unwrap_or(80);
        let origin = format!("{}:{}", host, port);

        if let Ok(mut cache) = self.connect_overhead.lock() {
            if let Some(overhead) = cache.get(&origin) {
                return *overhead;
            }
        }

        let started = Instant::now();
        let measured =
            match tokio::time::timeout(Duration::from_secs(5), TcpStream::connect(&origin)).await {
                Ok(Ok(_)) => started.elapsed(),
                _ => Duration::ZERO,
            };
        trace!("Connection overhead for {}: {:?}", origin, measured);

        if let Ok(mut cache) = self.connect_overhead.lock() {
            cache.put(origin, measured);
        }
        measured
    }
}

fn build_client(user_agent: &str, proxy: Option<&ProxySettings>) -> AuditResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(true)
        .pool_idle_timeout(Duration::from_secs(30));
    if !user_agent.is_empty() {
        builder = builder.user_agent(user_agent);
    }
    if let Some(settings) = proxy {
        let mut proxy = reqwest::Proxy::all(&settings.url)
            .map_err(|_| AuditError::InvalidUrl(settings.url.clone()))?;
        if let Some(username) = &settings.username {
            proxy = proxy.basic_auth(username, settings.password.as_deref().unwrap_or(""));
        }
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| AuditError::Configuration(format!("Failed to build HTTP client: {}", e)))
}

fn redirect_method(status: StatusCode, method: &Method) -> Method {
    match status {
        StatusCode::SEE_OTHER => Method::GET,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND if *method == Method::POST => Method::GET,
        _ => method.clone(),
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: &Request, sink: &mut dyn ResponseSink) -> Response {
        let started = Instant::now();
        let timeout = request.timeout().unwrap_or(self.default_timeout);
        let follow = request.follow_location().unwrap_or(self.follow_redirects);
        let limit = request.redirect_limit().unwrap_or(self.redirect_limit);
        let client = self.client_for(request.proxy());

        let mut url = match Url::parse(&request.effective_url()) {
            Ok(url) => url,
            Err(e) => {
                return Response::failed(
                    request.clone(),
                    ReturnCode::Error(format!("Invalid URL: {}", e)),
                    started.elapsed(),
                )
            }
        };
        let overhead = self.connect_overhead(&url, request.proxy().is_some()).await;
        let mut method = request.method().clone();
        let mut body = request.effective_body();
        let mut redirections = Vec::new();

        loop {
            let remaining = match timeout.checked_sub(started.elapsed()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => {
                    return timed_out(request, started, redirections);
                }
            };

            let mut builder = client
                .request(method.clone(), url.clone())
                .headers(request.headers().clone());
            if let Some(body) = &body {
                builder = builder.body(body.clone());
            }

            let sent = Instant::now();
            let mut resp = match tokio::time::timeout(remaining, builder.send()).await {
                Err(_) => return timed_out(request, started, redirections),
                Ok(Err(e)) if e.is_timeout() => return timed_out(request, started, redirections),
                Ok(Err(e)) => {
                    let mut failed = Response::failed(
                        request.clone(),
                        ReturnCode::Error(e.to_string()),
                        started.elapsed(),
                    );
                    failed.set_redirections(redirections);
                    return failed;
                }
                Ok(Ok(resp)) => resp,
            };
            let start_transfer = sent.elapsed();

            let mut head = Response::new(request.clone());
            head.set_url(url.to_string());
            head.set_code(resp.status().as_u16());
            head.set_headers(resp.headers().clone());

            let location = resp
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|location| url.join(location).ok());
            let status = resp.status();
            if follow && status.is_redirection() && redirections.len() < limit {
                if let Some(next) = location {
                    trace!("Following redirect {} -> {}", url, next);
                    head.set_body(resp.text().await.unwrap_or_default());
                    head.set_timing(sent.elapsed(), start_transfer.saturating_sub(overhead));
                    let next_method = redirect_method(status, &method);
                    if next_method != method {
                        body = None;
                    }
                    method = next_method;
                    redirections.push(head);
                    url = next;
                    continue;
                }
            }

            let mut return_code = ReturnCode::Ok;
            if sink.on_headers(&head).is_abort() {
                return_code = ReturnCode::Partial;
            }

            let mut bytes = Vec::new();
            while return_code == ReturnCode::Ok {
                let remaining = timeout.saturating_sub(started.elapsed());
                match tokio::time::timeout(remaining, resp.chunk()).await {
                    Err(_) => {
                        return_code = ReturnCode::TimedOut;
                    }
                    Ok(Err(e)) => {
                        return_code = if e.is_timeout() {
                            ReturnCode::TimedOut
                        } else {
                            ReturnCode::Error(e.to_string())
                        };
                    }
                    Ok(Ok(None)) => break,
                    Ok(Ok(Some(chunk))) => {
                        bytes.extend_from_slice(&chunk);
                        if sink.on_chunk(&head, &chunk).is_abort() {
                            return_code = ReturnCode::Partial;
                        }
                    }
                }
            }

            let time = started.elapsed();
            let app_time = if return_code == ReturnCode::TimedOut {
                time
            } else {
                start_transfer.saturating_sub(overhead)
            };
            head.set_body(String::from_utf8_lossy(&bytes).into_owned());
            head.set_return_code(return_code);
            head.set_timing(time, app_time);
            head.set_redirections(redirections);
            return head;
        }
    }
}

fn timed_out(request: &Request, started: Instant, redirections: Vec<Response>) -> Response {
    let mut response = Response::failed(request.clone(), ReturnCode::TimedOut, started.elapsed());
    response.set_redirections(redirections);
    response
}

/// Fills in the per-scan defaults a request didn't set itself.
pub(crate) fn apply_defaults(request: &mut Request, options: &HttpOptions, cookie_header: Option<String>) {
    if !request.headers().contains_key(USER_AGENT) {
        request.set_header(USER_AGENT.as_str(), options.user_agent());
    }
    for (name, value) in options.headers() {
        if !request.headers().contains_key(name.as_str()) {
            request.set_header(name, value);
        }
    }
    if let Some(cookie_header) = cookie_header {
        if !request.headers().contains_key(COOKIE) && HeaderValue::from_str(&cookie_header).is_ok() {
            request.set_header("cookie", &cookie_header);
        }
    }
}
