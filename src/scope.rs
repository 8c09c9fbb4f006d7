// File: scope.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::{AuditError, AuditResult};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// Audit boundary. An empty scope lets every http(s) URL through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scope {
    include: Vec<String>,
    exclude: Vec<String>,
    domains: Vec<String>,
    include_subdomains: bool,
    #[serde(skip)]
    compiled: OnceCell<CompiledRules>,
}

#[derive(Debug, Clone)]
struct CompiledRules {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the scan to the host of `url` and its subdomains.
    pub fn for_target(url: &str) -> AuditResult<Self> {
        let parsed = Url::parse(url).map_err(|_| AuditError::InvalidUrl(url.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| AuditError::InvalidUrl(url.to_string()))?;
        let mut scope = Self::default();
        scope.add_domain(host);
        scope.set_include_subdomains(true);
        Ok(scope)
    }

    pub fn add_include_pattern(&mut self, pattern: &str) {
        self.include.push(pattern.to_string());
        self.compiled = OnceCell::new();
    }

    pub fn add_exclude_pattern(&mut self, pattern: &str) {
        self.exclude.push(pattern.to_string());
        self.compiled = OnceCell::new();
    }

    pub fn add_domain(&mut self, domain: &str) {
        self.domains
            .push(domain.trim_start_matches('.').to_ascii_lowercase());
    }

    pub fn set_include_subdomains(&mut self, include_subdomains: bool) {
        self.include_subdomains = include_subdomains;
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn validate(&self) -> AuditResult<()> {
        self.rules().map(|_| ())
    }

    pub fn is_in_scope(&self, url: &str) -> bool {
        !self.is_out(url)
    }

    /// True when `url` falls outside the boundary. Unparseable URLs and
    /// non-HTTP schemes are always out.
    pub fn is_out(&self, url: &str) -> bool {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(_) => return true,
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return true;
        }

        if !self.domains.is_empty() {
            let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
            let allowed = self.domains.iter().any(|domain| {
                host == *domain
                    || (self.include_subdomains && host.ends_with(&format!(".{}", domain)))
            });
            if !allowed {
                return true;
            }
        }

        let rules = match self.rules() {
            Ok(rules) => rules,
            Err(_) => return true,
        };

        if rules.exclude.iter().any(|re| re.is_match(url)) {
            return true;
        }

        !rules.include.is_empty() && !rules.include.iter().any(|re| re.is_match(url))
    }

    fn rules(&self) -> AuditResult<&CompiledRules> {
        self.compiled.get_or_try_init(|| {
            Ok(CompiledRules {
                include: compile_all(&self.include)?,
                exclude: compile_all(&self.exclude)?,
            })
        })
    }
}

fn compile_all(patterns: &[String]) -> AuditResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| AuditError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}
