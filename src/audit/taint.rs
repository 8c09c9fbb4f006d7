// File: taint.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use super::compile_pattern;
use crate::context::ScanContext;
use crate::element::{Auditable, Format, Payloads, DEFAULT_FORMATS};
use crate::error::AuditResult;
use crate::http::Callbacks;
use crate::issue::Issue;
use crate::message::Response;
use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

static INLINE_FLAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\(\?[a-zA-Z]+\)").unwrap());
static ESCAPES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\.").unwrap());
static CLASSES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\]").unwrap());
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_ ]+").unwrap());

const BASELINE_REMARK: &str =
    "The proof also appears in the response to the unmodified element, the match may not be caused by the payload";

#[derive(Debug, Clone)]
pub struct TaintOptions {
    name: String,
    substring: Option<String>,
    regexps: Vec<Regex>,
    ignore: Vec<Regex>,
    longest_word_optimization: bool,
    formats: Vec<Format>,
    skip_like: Vec<Regex>,
    match_headers: bool,
}

impl Default for TaintOptions {
    fn default() -> Self {
        Self::new("Tainted response")
    }
}

impl TaintOptions {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            substring: None,
            regexps: Vec::new(),
            ignore: Vec::new(),
            longest_word_optimization: false,
            formats: DEFAULT_FORMATS.to_vec(),
            skip_like: Vec::new(),
            match_headers: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_substring(&mut self, substring: &str) {
        self.substring = Some(substring.to_string());
    }

    pub fn substring(&self) -> Option<&str> {
        self.substring.as_deref()
    }

    pub fn add_regexp(&mut self, pattern: &str) -> AuditResult<()> {
        self.regexps.push(compile_pattern(pattern)?);
        Ok(())
    }

    pub fn regexps(&self) -> &[Regex] {
        &self.regexps
    }

    pub fn add_ignore(&mut self, pattern: &str) -> AuditResult<()> {
        self.ignore.push(compile_pattern(pattern)?);
        Ok(())
    }

    pub fn set_longest_word_optimization(&mut self, enabled: bool) {
        self.longest_word_optimization = enabled;
    }

    pub fn longest_word_optimization(&self) -> bool {
        self.longest_word_optimization
    }

    pub fn set_formats(&mut self, formats: Vec<Format>) {
        self.formats = formats;
    }

    pub fn formats(&self) -> &[Format] {
        &self.formats
    }

    pub fn add_skip_like(&mut self, pattern: &str) -> AuditResult<()> {
        self.skip_like.push(compile_pattern(pattern)?);
        Ok(())
    }

    pub fn set_match_headers(&mut self, match_headers: bool) {
        self.match_headers = match_headers;
    }

    pub fn match_headers(&self) -> bool {
        self.match_headers
    }

    fn fingerprint(&self) -> String {
        let regexps: Vec<&str> = self.regexps.iter().map(Regex::as_str).collect();
        format!(
            "taint|{}|{}|{}",
            self.name,
            self.substring.as_deref().unwrap_or_default(),
            regexps.join("\x1f")
        )
    }

    fn skips(&self, action: &str) -> bool {
        self.skip_like.iter().any(|pattern| pattern.is_match(action))
    }
}

/// Longest literal word of a regex source, lowercased. `None` when the
/// pattern has alternation or optional parts, since then no single word is
/// guaranteed to be present in a match.
pub fn longest_word(pattern: &str) -> Option<String> {
    let source = INLINE_FLAGS.replace(pattern, "");
    if source.contains(['|', '?', '*', '{']) {
        return None;
    }
    let source = ESCAPES.replace_all(&source, " ");
    let source = CLASSES.replace_all(&source, " ");
    NON_WORD
        .split(&source)
        .map(str::trim)
        .filter(|word| !word.is_empty())
        .max_by_key(|word| word.len())
        .map(str::to_lowercase)
}

/// Queues one request per (payload, input, format) of `element`. Matches
/// are logged from the completion callbacks; each logged issue is checked
/// against the unmodified element once the batch has run. Returns the
/// number of requests queued.
pub async fn audit<E: Auditable>(
    ctx: &Arc<ScanContext>,
    element: &E,
    payloads: &Payloads,
    options: &TaintOptions,
) -> usize {
    if element.inputs().is_empty() {
        debug!("Skipping {}, no inputs", element.action());
        return 0;
    }
    if options.skips(element.action()) {
        debug!("Skipping {}, matches a skip rule", element.action());
        return 0;
    }

    let options = Arc::new(options.clone());
    let fingerprint = options.fingerprint();
    let mut queued = 0;
    for (platform, payload) in payloads.resolve(ctx.platforms()) {
        for mutation in element.mutations(&payload, options.formats()) {
            let id = mutation.audit_id(&payload, &fingerprint);
            if !ctx.audited(&id) {
                trace!("Already audited {}", id);
                continue;
            }

            let request = mutation.to_request();
            let probe = Probe {
                ctx: Arc::clone(ctx),
                original: element.clone(),
                mutation,
                payload: payload.clone(),
                platform: platform.clone(),
                options: Arc::clone(&options),
            };
            ctx.client()
                .queue(request, Callbacks::new().on_complete(move |response| probe.check(response)))
                .await;
            queued += 1;
        }
    }
    queued
}

struct Probe<E: Auditable> {
    ctx: Arc<ScanContext>,
    original: E,
    mutation: E,
    payload: String,
    platform: Option<String>,
    options: Arc<TaintOptions>,
}

impl<E: Auditable> Probe<E> {
    fn check(self, response: &Response) {
        if !response.ok() {
            trace!("Ignoring non-ok response for {}", response.url());
            return;
        }

        let mut haystacks = vec![response.body().to_string()];
        if self.options.match_headers() {
            haystacks.extend(
                response
                    .headers()
                    .values()
                    .filter_map(|value| value.to_str().ok())
                    .map(str::to_string),
            );
        }

        let found = haystacks
            .iter()
            .find_map(|text| self.find_match(text).map(|m| (text, m)));
        let (text, (proof, signature)) = match found {
            Some(found) => found,
            None => return,
        };
        if self.options.ignore.iter().any(|ignore| ignore.is_match(text)) {
            debug!("Match for '{}' suppressed by ignore list", proof);
            return;
        }

        let issue = Issue::new(self.options.name(), self.mutation.vector())
            .with_payload(&self.payload)
            .with_proof(&proof)
            .with_signature(&signature)
            .with_platform(self.platform.clone())
            .with_response(response);
        let index = self.ctx.log_issue(issue);

        let ctx = Arc::clone(&self.ctx);
        let original = self.original;
        self.ctx.after_run(move || async move {
            let baseline = ctx.client().perform(original.to_request()).await;
            if baseline.ok() && baseline.body().contains(&proof) {
                ctx.distrust(index, BASELINE_REMARK);
            }
        });
    }

    /// Returns `(proof, signature)` for the first matcher that hits.
    fn find_match(&self, text: &str) -> Option<(String, String)> {
        for regexp in &self.options.regexps {
            if self.options.longest_word_optimization() {
                if let Some(word) = self.ctx.longest_word(regexp.as_str()) {
                    if !text.to_lowercase().contains(&word) {
                        continue;
                    }
                }
            }
            if let Some(found) = regexp.find(text) {
                return Some((found.as_str().to_string(), regexp.as_str().to_string()));
            }
        }

        let substring = match (self.options.substring(), self.options.regexps.is_empty()) {
            (Some(substring), _) => substring,
            (None, true) => self.payload.as_str(),
            (None, false) => return None,
        };
        if !substring.is_empty() && text.contains(substring) {
            return Some((substring.to_string(), substring.to_string()));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(r"(?i)<script>xss\d+</script>", Some("script"))]
    #[case(r"Warning: mysql_fetch_array\(\)", Some("mysql_fetch_array"))]
    #[case(r"ORA-\d{5}", None)]
    #[case(r"error|warning", None)]
    #[case(r"[0-9]+ rows", Some("rows"))]
    #[case(r"\d+", None)]
    fn test_longest_word(#[case] pattern: &str, #[case] expected: Option<&str>) {
        assert_eq!(longest_word(pattern).as_deref(), expected);
    }

    #[test]
    fn test_fingerprint_tracks_matchers() {
        let mut a = TaintOptions::new("XSS");
        let mut b = TaintOptions::new("XSS");
        a.set_substring("xss123");
        b.add_regexp(r"xss\d+").unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_skip_like() {
        let mut options = TaintOptions::default();
        options.add_skip_like(r"/logout").unwrap();
        assert!(options.skips("http://example.com/logout?next=/"));
        assert!(!options.skips("http://example.com/search"));
        assert!(options.add_skip_like("(").is_err());
    }
}
