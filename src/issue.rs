// File: issue.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::element::ElementKind;
use crate::message::Response;
use serde::Serialize;
use std::fmt;

/// Where an issue was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vector {
    pub kind: ElementKind,
    pub method: String,
    pub url: String,
    pub affected_input: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub name: String,
    pub vector: Vector,
    pub payload: Option<String>,
    pub proof: Option<String>,
    pub signature: Option<String>,
    pub platform: Option<String>,
    pub trusted: bool,
    pub remarks: Vec<String>,
    pub request_url: Option<String>,
    pub response_code: Option<u16>,
}

impl Issue {
    pub fn new(name: &str, vector: Vector) -> Self {
        Issue {
            name: name.to_string(),
            vector,
            payload: None,
            proof: None,
            signature: None,
            platform: None,
            trusted: true,
            remarks: Vec::new(),
            request_url: None,
            response_code: None,
        }
    }

    pub fn with_payload(mut self, payload: &str) -> Self {
        self.payload = Some(payload.to_string());
        self
    }

    pub fn with_proof(mut self, proof: &str) -> Self {
        self.proof = Some(proof.to_string());
        self
    }

    pub fn with_signature(mut self, signature: &str) -> Self {
        self.signature = Some(signature.to_string());
        self
    }

    pub fn with_platform(mut self, platform: Option<String>) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_response(mut self, response: &Response) -> Self {
        self.request_url = Some(response.request().effective_url());
        self.response_code = Some(response.code());
        self
    }

    /// Marks the issue as unverified, keeping a note of why.
    pub fn distrust(&mut self, remark: &str) {
        self.trusted = false;
        self.remarks.push(remark.to_string());
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {} '{}' at {} {}",
            self.name,
            self.vector.kind,
            self.vector.affected_input.as_deref().unwrap_or("-"),
            self.vector.method,
            self.vector.url
        )?;
        if !self.trusted {
            write!(f, " (untrusted)")?;
        }
        Ok(())
    }
}
