// File: config.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::{AuditError, AuditResult};
use crate::scope::Scope;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENCY: usize = 20;
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 500;
pub const DEFAULT_BYTE_BUFFER_SIZE: usize = 15_000;
pub const DEFAULT_LINE_BUFFER_SIZE: usize = 1_000;
pub const DEFAULT_USER_AGENT: &str = concat!("raudit/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxySettings {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxySettings {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            username: None,
            password: None,
        }
    }
}

/// Scheduler and transport settings shared by every request of a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    max_concurrency: usize,
    max_queue_size: usize,
    request_timeout_ms: u64,
    follow_redirects: bool,
    redirect_limit: usize,
    user_agent: String,
    headers: BTreeMap<String, String>,
    rate_limit: Option<NonZeroU32>,
    proxy: Option<ProxySettings>,
    cookie_jar_file: Option<PathBuf>,
    byte_buffer_size: usize,
    line_buffer_size: usize,
    scope: Scope,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpOptions {
    pub fn new() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            request_timeout_ms: 10_000,
            follow_redirects: true,
            redirect_limit: 5,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: BTreeMap::new(),
            rate_limit: None,
            proxy: None,
            cookie_jar_file: None,
            byte_buffer_size: DEFAULT_BYTE_BUFFER_SIZE,
            line_buffer_size: DEFAULT_LINE_BUFFER_SIZE,
            scope: Scope::default(),
        }
    }

    pub fn from_json_file(path: &Path) -> AuditResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let options: HttpOptions = serde_json::from_str(&raw)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> AuditResult<()> {
        if self.max_concurrency == 0 {
            return Err(AuditError::invalid_option(
                "max_concurrency",
                "must be at least 1",
            ));
        }
        if self.max_queue_size == 0 {
            return Err(AuditError::invalid_option(
                "max_queue_size",
                "must be at least 1",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(AuditError::invalid_option(
                "request_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.byte_buffer_size == 0 || self.line_buffer_size == 0 {
            return Err(AuditError::invalid_option(
                "buffer_size",
                "buffer thresholds must be greater than zero",
            ));
        }
        if let Some(proxy) = &self.proxy {
            url::Url::parse(&proxy.url).map_err(|_| AuditError::InvalidUrl(proxy.url.clone()))?;
        }
        self.scope.validate()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn set_max_concurrency(&mut self, max_concurrency: usize) {
        self.max_concurrency = max_concurrency;
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    pub fn set_max_queue_size(&mut self, max_queue_size: usize) {
        self.max_queue_size = max_queue_size;
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.request_timeout_ms = timeout.as_millis() as u64;
    }

    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    pub fn set_follow_redirects(&mut self, follow_redirects: bool) {
        self.follow_redirects = follow_redirects;
    }

    pub fn redirect_limit(&self) -> usize {
        self.redirect_limit
    }

    pub fn set_redirect_limit(&mut self, redirect_limit: usize) {
        self.redirect_limit = redirect_limit;
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn set_user_agent(&mut self, user_agent: &str) {
        self.user_agent = user_agent.to_string();
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_string(), value.to_string());
    }

    pub fn rate_limit(&self) -> Option<NonZeroU32> {
        self.rate_limit
    }

    pub fn set_rate_limit(&mut self, rate_limit: Option<NonZeroU32>) {
        self.rate_limit = rate_limit;
    }

    pub fn proxy(&self) -> Option<&ProxySettings> {
        self.proxy.as_ref()
    }

    pub fn set_proxy(&mut self, proxy: Option<ProxySettings>) {
        self.proxy = proxy;
    }

    pub fn cookie_jar_file(&self) -> Option<&Path> {
        self.cookie_jar_file.as_deref()
    }

    pub fn set_cookie_jar_file(&mut self, path: Option<PathBuf>) {
        self.cookie_jar_file = path;
    }

    pub fn byte_buffer_size(&self) -> usize {
        self.byte_buffer_size
    }

    pub fn set_byte_buffer_size(&mut self, size: usize) {
        self.byte_buffer_size = size;
    }

    pub fn line_buffer_size(&self) -> usize {
        self.line_buffer_size
    }

    pub fn set_line_buffer_size(&mut self, size: usize) {
        self.line_buffer_size = size;
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn set_scope(&mut self, scope: Scope) {
        self.scope = scope;
    }
}
