// File: error.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-time failures. Transport problems never show up here, they
/// are carried on the response as a return code.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Cookie jar not found: {}", .0.display())]
    CookieJarNotFound(PathBuf),

    #[error("Invalid option '{name}': {reason}")]
    InvalidOption { name: &'static str, reason: String },

    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuditError {
    pub fn invalid_option(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            name,
            reason: reason.into(),
        }
    }
}

pub type AuditResult<T> = Result<T, AuditError>;
