// File: element.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::issue::Vector;
use crate::message::{encode_header_value, Performer, Request, Response};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    Link,
    Form,
    Cookie,
    Header,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementKind::Link => "link",
            ElementKind::Form => "form",
            ElementKind::Cookie => "cookie",
            ElementKind::Header => "header",
        };
        f.write_str(name)
    }
}

/// How a payload is placed into an input value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    /// Replaces the value.
    Straight,
    /// Appends to the original value.
    Append,
    /// Replaces the value and terminates it with a null byte.
    Null,
}

impl Format {
    pub fn apply(self, original: &str, payload: &str) -> String {
        match self {
            Format::Straight => payload.to_string(),
            Format::Append => format!("{}{}", original, payload),
            Format::Null => format!("{}\0", payload),
        }
    }
}

pub const DEFAULT_FORMATS: [Format; 3] = [Format::Straight, Format::Append, Format::Null];

/// Payload sets accepted by the audit strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payloads {
    Single(String),
    List(Vec<String>),
    /// Keyed by platform name, e.g. `mysql` or `php`.
    Platform(BTreeMap<String, Vec<String>>),
}

impl Payloads {
    /// Flattens into `(platform, payload)` pairs. Platform sets are filtered
    /// by `platforms`; an empty filter keeps every platform.
    pub fn resolve(&self, platforms: &[String]) -> Vec<(Option<String>, String)> {
        match self {
            Payloads::Single(payload) => vec![(None, payload.clone())],
            Payloads::List(payloads) => payloads.iter().map(|p| (None, p.clone())).collect(),
            Payloads::Platform(map) => map
                .iter()
                .filter(|(platform, _)| {
                    platforms.is_empty()
                        || platforms.iter().any(|p| p.eq_ignore_ascii_case(platform))
                })
                .flat_map(|(platform, payloads)| {
                    payloads
                        .iter()
                        .map(move |payload| (Some(platform.clone()), payload.clone()))
                })
                .collect(),
        }
    }
}

impl From<&str> for Payloads {
    fn from(payload: &str) -> Self {
        Payloads::Single(payload.to_string())
    }
}

impl From<Vec<&str>> for Payloads {
    fn from(payloads: Vec<&str>) -> Self {
        Payloads::List(payloads.into_iter().map(str::to_string).collect())
    }
}

/// Anything the audit strategies can inject into.
pub trait Auditable: Clone + Send + Sync + 'static {
    fn kind(&self) -> ElementKind;
    fn action(&self) -> &str;
    fn method(&self) -> &Method;
    fn inputs(&self) -> &BTreeMap<String, String>;

    /// Name of the input carrying the payload, for mutations.
    fn altered(&self) -> Option<&str>;

    /// Payload this mutation was built from.
    fn seed(&self) -> Option<&str>;

    fn format(&self) -> Option<Format>;

    /// One copy per (input, format) with the payload in place. Copies that
    /// would produce identical inputs are dropped.
    fn mutations(&self, payload: &str, formats: &[Format]) -> Vec<Self>;

    fn to_request(&self) -> Request;

    fn vector(&self) -> Vector {
        Vector {
            kind: self.kind(),
            method: self.method().to_string(),
            url: self.action().to_string(),
            affected_input: self.altered().map(str::to_string),
        }
    }

    /// Dedup key for a probe of this element. Input values are left out so
    /// that every mutation of one element maps to the same identity.
    fn audit_id(&self, payload: &str, options: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind().to_string());
        hasher.update(b"\n");
        hasher.update(self.method().as_str());
        hasher.update(b"\n");
        hasher.update(self.action());
        hasher.update(b"\n");
        for name in self.inputs().keys() {
            hasher.update(name);
            hasher.update(b"\x1f");
        }
        hasher.update(b"\n");
        hasher.update(self.altered().unwrap_or_default());
        hasher.update(b"\n");
        if let Some(format) = self.format() {
            hasher.update(format!("{:?}", format));
        }
        hasher.update(b"\n");
        hasher.update(payload);
        hasher.update(b"\n");
        hasher.update(options);
        format!("{:x}", hasher.finalize())
    }
}

/// Link, form, cookie or header input vector of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    kind: ElementKind,
    method: Method,
    action: String,
    inputs: BTreeMap<String, String>,
    altered: Option<String>,
    seed: Option<String>,
    format: Option<Format>,
}

impl Element {
    pub fn new(kind: ElementKind, method: Method, action: &str) -> Self {
        Element {
            kind,
            method,
            action: action.to_string(),
            inputs: BTreeMap::new(),
            altered: None,
            seed: None,
            format: None,
        }
    }

    pub fn link(action: &str) -> Self {
        Self::new(ElementKind::Link, Method::GET, action)
    }

    pub fn form(action: &str, method: Method) -> Self {
        Self::new(ElementKind::Form, method, action)
    }

    pub fn cookie(action: &str) -> Self {
        Self::new(ElementKind::Cookie, Method::GET, action)
    }

    pub fn header(action: &str) -> Self {
        Self::new(ElementKind::Header, Method::GET, action)
    }

    pub fn with_input(mut self, name: &str, value: &str) -> Self {
        self.inputs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn is_mutation(&self) -> bool {
        self.altered.is_some()
    }
}

impl Auditable for Element {
    fn kind(&self) -> ElementKind {
        self.kind
    }

    fn action(&self) -> &str {
        &self.action
    }

    fn method(&self) -> &Method {
        &self.method
    }

    fn inputs(&self) -> &BTreeMap<String, String> {
        &self.inputs
    }

    fn altered(&self) -> Option<&str> {
        self.altered.as_deref()
    }

    fn seed(&self) -> Option<&str> {
        self.seed.as_deref()
    }

    fn format(&self) -> Option<Format> {
        self.format
    }

    fn mutations(&self, payload: &str, formats: &[Format]) -> Vec<Self> {
        let mut seen = HashSet::new();
        let mut mutations = Vec::new();
        for (name, original) in &self.inputs {
            for format in formats {
                let value = format.apply(original, payload);
                if !seen.insert((name.clone(), value.clone())) {
                    continue;
                }
                let mut mutation = self.clone();
                mutation.inputs.insert(name.clone(), value);
                mutation.altered = Some(name.clone());
                mutation.seed = Some(payload.to_string());
                mutation.format = Some(*format);
                mutations.push(mutation);
            }
        }
        mutations
    }

    fn to_request(&self) -> Request {
        let request = match self.kind {
            ElementKind::Link | ElementKind::Form => {
                Request::new(self.method.clone(), &self.action).with_parameters(self.inputs.clone())
            }
            ElementKind::Cookie => {
                let mut request = Request::new(self.method.clone(), &self.action);
                for (name, value) in &self.inputs {
                    request.set_cookie(name, value);
                }
                request
            }
            ElementKind::Header => {
                let mut request = Request::new(self.method.clone(), &self.action);
                for (name, value) in &self.inputs {
                    request.set_header(name, &encode_header_value(value));
                }
                request
            }
        };
        request.with_performer(Performer::new(self.clone()))
    }
}

/// A crawled page as handed over by the crawler/parser.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub code: u16,
    pub body: String,
    pub headers: BTreeMap<String, String>,
    pub elements: Vec<Element>,
}

impl Page {
    pub fn from_response(response: &Response, elements: Vec<Element>) -> Self {
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        Page {
            url: response.url().to_string(),
            code: response.code(),
            body: response.body().to_string(),
            headers,
            elements,
        }
    }

    pub fn elements_of(&self, kind: ElementKind) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(move |e| e.kind == kind)
    }
}
