// File: message.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::config::ProxySettings;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, SET_COOKIE};
use reqwest::Method;
use std::any::Any;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::{form_urlencoded, Url};

fn unsafe_in_header(byte: u8) -> bool {
    (byte < 0x20 && byte != b'\t') || byte >= 0x7f
}

/// Form-encodes a header value holding control or non-ASCII bytes, which
/// a header can't carry verbatim. Clean values pass through untouched.
pub fn encode_header_value(value: &str) -> Cow<'_, str> {
    if value.bytes().any(unsafe_in_header) {
        Cow::Owned(form_urlencoded::byte_serialize(value.as_bytes()).collect())
    } else {
        Cow::Borrowed(value)
    }
}

/// Like `encode_header_value`, with `;` also encoded since it separates
/// cookie pairs.
pub fn encode_cookie_value(value: &str) -> Cow<'_, str> {
    if value.bytes().any(|byte| unsafe_in_header(byte) || byte == b';') {
        Cow::Owned(form_urlencoded::byte_serialize(value.as_bytes()).collect())
    } else {
        Cow::Borrowed(value)
    }
}

/// Returned by streaming callbacks; `Abort` stops further reads of a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Abort,
}

impl Flow {
    pub fn is_abort(self) -> bool {
        self == Flow::Abort
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Async,
    Sync,
}

/// Opaque handle to whatever issued a request, usually an audited element.
#[derive(Clone)]
pub struct Performer(Arc<dyn Any + Send + Sync>);

impl Performer {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for Performer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Performer(..)")
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    id: u64,
    method: Method,
    url: String,
    headers: HeaderMap,
    parameters: BTreeMap<String, String>,
    body: Option<String>,
    cookies: BTreeMap<String, String>,
    mode: Mode,
    timeout: Option<Duration>,
    follow_location: Option<bool>,
    redirect_limit: Option<usize>,
    proxy: Option<ProxySettings>,
    update_cookies: bool,
    performer: Option<Performer>,
}

impl Request {
    pub fn new(method: Method, url: &str) -> Self {
        Request {
            id: 0,
            method,
            url: url.to_string(),
            headers: HeaderMap::new(),
            parameters: BTreeMap::new(),
            body: None,
            cookies: BTreeMap::new(),
            mode: Mode::Async,
            timeout: None,
            follow_location: None,
            redirect_limit: None,
            proxy: None,
            update_cookies: false,
            performer: None,
        }
    }

    pub fn get(url: &str) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: &str) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_url(&mut self, url: &str) {
        self.url = url.to_string();
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Invalid header names or values are ignored.
    pub fn set_header(&mut self, name: &str, value: &str) -> bool {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
                true
            }
            _ => false,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn set_parameter(&mut self, name: &str, value: &str) {
        self.parameters.insert(name.to_string(), value.to_string());
    }

    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    pub fn set_cookie(&mut self, name: &str, value: &str) {
        self.cookies.insert(name.to_string(), value.to_string());
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn follow_location(&self) -> Option<bool> {
        self.follow_location
    }

    pub fn with_follow_location(mut self, follow: bool) -> Self {
        self.follow_location = Some(follow);
        self
    }

    pub fn redirect_limit(&self) -> Option<usize> {
        self.redirect_limit
    }

    pub fn with_redirect_limit(mut self, limit: usize) -> Self {
        self.redirect_limit = Some(limit);
        self
    }

    pub fn proxy(&self) -> Option<&ProxySettings> {
        self.proxy.as_ref()
    }

    pub fn with_proxy(mut self, proxy: ProxySettings) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn update_cookies(&self) -> bool {
        self.update_cookies
    }

    pub fn with_update_cookies(mut self, update: bool) -> Self {
        self.update_cookies = update;
        self
    }

    pub fn performer(&self) -> Option<&Performer> {
        self.performer.as_ref()
    }

    pub fn with_performer(mut self, performer: Performer) -> Self {
        self.performer = Some(performer);
        self
    }

    /// URL as sent on the wire. For GET/HEAD the parameters are merged into
    /// the query string; otherwise they travel in the body.
    pub fn effective_url(&self) -> String {
        if !self.parameters_in_query() || self.parameters.is_empty() {
            return self.url.clone();
        }
        match Url::parse(&self.url) {
            Ok(mut url) => {
                let existing: Vec<(String, String)> = url
                    .query_pairs()
                    .filter(|(name, _)| !self.parameters.contains_key(name.as_ref()))
                    .map(|(name, value)| (name.into_owned(), value.into_owned()))
                    .collect();
                {
                    let mut pairs = url.query_pairs_mut();
                    pairs.clear();
                    for (name, value) in &existing {
                        pairs.append_pair(name, value);
                    }
                    for (name, value) in &self.parameters {
                        pairs.append_pair(name, value);
                    }
                }
                url.to_string()
            }
            Err(_) => self.url.clone(),
        }
    }

    pub fn effective_body(&self) -> Option<String> {
        if let Some(body) = &self.body {
            return Some(body.clone());
        }
        if self.parameters_in_query() || self.parameters.is_empty() {
            return None;
        }
        Some(
            url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.parameters.iter())
                .finish(),
        )
    }

    fn parameters_in_query(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnCode {
    Ok,
    TimedOut,
    Partial,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct Response {
    url: String,
    code: u16,
    headers: HeaderMap,
    body: String,
    time: Duration,
    app_time: Duration,
    return_code: ReturnCode,
    request: Request,
    redirections: Vec<Response>,
}

impl Response {
    pub fn new(request: Request) -> Self {
        Response {
            url: request.effective_url(),
            code: 0,
            headers: HeaderMap::new(),
            body: String::new(),
            time: Duration::ZERO,
            app_time: Duration::ZERO,
            return_code: ReturnCode::Ok,
            request,
            redirections: Vec::new(),
        }
    }

    pub fn new_with_all(
        request: Request,
        code: u16,
        headers: HeaderMap,
        body: String,
        return_code: ReturnCode,
    ) -> Self {
        let mut response = Self::new(request);
        response.code = code;
        response.headers = headers;
        response.body = body;
        response.return_code = return_code;
        response
    }

    /// Transport failure, with a zero status code.
    pub fn failed(request: Request, return_code: ReturnCode, time: Duration) -> Self {
        let mut response = Self::new(request);
        response.return_code = return_code;
        response.time = time;
        response.app_time = time;
        response
    }

    /// Copy of the head of this response carrying a slice of the body.
    pub fn partial(&self, body: String) -> Self {
        Response {
            url: self.url.clone(),
            code: self.code,
            headers: self.headers.clone(),
            body,
            time: self.time,
            app_time: self.app_time,
            return_code: self.return_code.clone(),
            request: self.request.clone(),
            redirections: Vec::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_url(&mut self, url: String) {
        self.url = url;
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn set_code(&mut self, code: u16) {
        self.code = code;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn set_headers(&mut self, headers: HeaderMap) {
        self.headers = headers;
    }

    /// Case-insensitive header lookup; non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn set_cookie_headers(&self) -> Vec<&str> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn set_body(&mut self, body: String) {
        self.body = body;
    }

    pub fn time(&self) -> Duration {
        self.time
    }

    pub fn app_time(&self) -> Duration {
        self.app_time
    }

    /// `app_time` never exceeds the total time.
    pub fn set_timing(&mut self, time: Duration, app_time: Duration) {
        self.time = time;
        self.app_time = app_time.min(time);
    }

    pub fn return_code(&self) -> &ReturnCode {
        &self.return_code
    }

    pub fn set_return_code(&mut self, return_code: ReturnCode) {
        self.return_code = return_code;
    }

    pub fn ok(&self) -> bool {
        self.return_code == ReturnCode::Ok
    }

    pub fn timed_out(&self) -> bool {
        self.return_code == ReturnCode::TimedOut
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn redirections(&self) -> &[Response] {
        &self.redirections
    }

    pub fn set_redirections(&mut self, redirections: Vec<Response>) {
        self.redirections = redirections;
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.code) && self.header("location").is_some()
    }
}
