// File: timing.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::context::ScanContext;
use crate::element::{Auditable, Format, Payloads, DEFAULT_FORMATS};
use crate::error::{AuditError, AuditResult};
use crate::http::{lock, Callbacks};
use crate::issue::{Issue, Vector};
use crate::message::Request;
use log::{debug, info, trace, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TIME_PLACEHOLDER: &str = "__TIME__";

#[derive(Debug, Clone, PartialEq)]
pub struct TimingOptions {
    name: String,
    delay: u64,
    divider: u64,
    timeout_add_on: u64,
    deduplicate: bool,
    responsive_limit: u64,
    formats: Vec<Format>,
}

impl Default for TimingOptions {
    fn default() -> Self {
        Self {
            name: "Blind injection (timing attack)".to_string(),
            delay: 4_000,
            divider: 1,
            timeout_add_on: 5_000,
            deduplicate: true,
            responsive_limit: 120_000,
            formats: DEFAULT_FORMATS.to_vec(),
        }
    }
}

impl TimingOptions {
    pub fn new(delay: u64) -> AuditResult<Self> {
        let mut options = Self::default();
        options.set_delay(delay)?;
        Ok(options)
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requested server-side delay in milliseconds.
    pub fn set_delay(&mut self, delay: u64) -> AuditResult<()> {
        if delay == 0 {
            return Err(AuditError::invalid_option("delay", "must be greater than zero"));
        }
        self.delay = delay;
        Ok(())
    }

    pub fn delay(&self) -> u64 {
        self.delay
    }

    /// Divides the delay before it is written into the payload, for
    /// functions that take seconds instead of milliseconds.
    pub fn set_divider(&mut self, divider: u64) -> AuditResult<()> {
        if divider == 0 {
            return Err(AuditError::invalid_option("divider", "must be at least 1"));
        }
        self.divider = divider;
        Ok(())
    }

    pub fn divider(&self) -> u64 {
        self.divider
    }

    /// Extra milliseconds on top of the delay before a probe times out.
    pub fn set_timeout_add_on(&mut self, add_on: u64) {
        self.timeout_add_on = add_on;
    }

    pub fn timeout_add_on(&self) -> u64 {
        self.timeout_add_on
    }

    pub fn set_deduplicate(&mut self, deduplicate: bool) {
        self.deduplicate = deduplicate;
    }

    pub fn deduplicate(&self) -> bool {
        self.deduplicate
    }

    pub fn set_responsive_limit(&mut self, limit: u64) {
        self.responsive_limit = limit;
    }

    pub fn responsive_limit(&self) -> u64 {
        self.responsive_limit
    }

    pub fn set_formats(&mut self, formats: Vec<Format>) {
        self.formats = formats;
    }

    pub fn formats(&self) -> &[Format] {
        &self.formats
    }

    /// `template` with the placeholder replaced by `delay / divider`.
    pub fn payload_for(&self, template: &str, delay: u64) -> String {
        template.replace(TIME_PLACEHOLDER, &(delay / self.divider).to_string())
    }

    fn fingerprint(&self) -> String {
        format!("timing|{}", self.name)
    }

    fn timeout_for(&self, delay: u64) -> Duration {
        Duration::from_millis(delay + self.timeout_add_on)
    }
}

type BuildRequest = Arc<dyn Fn(&str) -> Request + Send + Sync>;

/// A probe whose response took at least the requested delay. The element
/// type is erased so candidates of any `Auditable` share one queue.
#[derive(Clone)]
struct Candidate {
    dedup_key: String,
    vector: Vector,
    template: String,
    platform: Option<String>,
    delay: u64,
    build: BuildRequest,
    original: Request,
    options: Arc<TimingOptions>,
}

/// Candidate and confirmation queues of one scan.
#[derive(Default)]
pub struct TimingState {
    candidates: Mutex<Vec<Candidate>>,
    confirm: Mutex<Vec<Candidate>>,
    verified: Mutex<HashSet<String>>,
    phase2_scheduled: AtomicBool,
    phase3_scheduled: AtomicBool,
}

impl TimingState {
    pub fn candidate_count(&self) -> usize {
        lock(&self.candidates).len()
    }

    pub fn confirm_count(&self) -> usize {
        lock(&self.confirm).len()
    }

    /// Pending timing work, for progress reporting.
    pub fn audit_operations(&self) -> usize {
        self.candidate_count() + self.confirm_count()
    }

    pub fn reset(&self) {
        lock(&self.candidates).clear();
        lock(&self.confirm).clear();
        lock(&self.verified).clear();
        self.phase2_scheduled.store(false, Ordering::SeqCst);
        self.phase3_scheduled.store(false, Ordering::SeqCst);
    }
}

/// Blocks until the unmodified element answers within the responsive
/// limit, so one probe's delay does not bleed into the next.
async fn responsive(ctx: &ScanContext, original: &Request, options: &TimingOptions) -> bool {
    let request = original
        .clone()
        .with_timeout(Duration::from_millis(options.responsive_limit()));
    let response = ctx.client().perform(request).await;
    if response.timed_out() {
        warn!(
            "{} did not respond within {} ms",
            original.url(),
            options.responsive_limit()
        );
        return false;
    }
    true
}

/// Phase 1: queues every timing payload against `element`. Responses that
/// take at least the delay become candidates, verified by two escalating
/// phases once the batch has run. Returns the number of requests queued.
pub async fn audit<E: Auditable>(
    ctx: &Arc<ScanContext>,
    element: &E,
    payloads: &Payloads,
    options: &TimingOptions,
) -> usize {
    if element.inputs().is_empty() {
        return 0;
    }
    let options = Arc::new(options.clone());
    let original = element.to_request();
    if !responsive(ctx, &original, &options).await {
        return 0;
    }

    let delay = options.delay();
    let mut queued = 0;
    for (platform, template) in payloads.resolve(ctx.platforms()) {
        let payload = options.payload_for(&template, delay);
        for mutation in element.mutations(&payload, options.formats()) {
            let id = mutation.audit_id(&template, &options.fingerprint());
            if !ctx.audited(&id) {
                continue;
            }
            let (input, format) = match (mutation.altered(), mutation.format()) {
                (Some(input), Some(format)) => (input.to_string(), format),
                _ => continue,
            };

            let verified = format!("{}|verified", options.fingerprint());
            let dedup_key = element.audit_id(&input, &verified);
            let element = element.clone();
            let build: BuildRequest = Arc::new(move |payload: &str| {
                super::mutation_for(&element, &input, payload, format)
                    .map(|mutation| mutation.to_request())
                    .unwrap_or_else(|| element.to_request())
            });
            let candidate = Candidate {
                dedup_key,
                vector: mutation.vector(),
                template: template.clone(),
                platform: platform.clone(),
                delay,
                build,
                original: original.clone(),
                options: Arc::clone(&options),
            };

            let request = mutation.to_request().with_timeout(options.timeout_for(delay));
            let ctx_ref = Arc::clone(ctx);
            ctx.client()
                .queue(
                    request,
                    Callbacks::new().on_complete(move |response| {
                        if response.app_time() < Duration::from_millis(candidate.delay) {
                            return;
                        }
                        debug!(
                            "Timing candidate at {} ({:?} >= {} ms)",
                            response.url(),
                            response.app_time(),
                            candidate.delay
                        );
                        add_candidate(&ctx_ref, candidate);
                    }),
                )
                .await;
            queued += 1;
        }
    }
    queued
}

fn add_candidate(ctx: &Arc<ScanContext>, candidate: Candidate) {
    lock(&ctx.timing().candidates).push(candidate);
    if !ctx.timing().phase2_scheduled.swap(true, Ordering::SeqCst) {
        let next = Arc::clone(ctx);
        ctx.after_run(move || async move { verify_candidates(&next).await });
    }
}

/// Liveness check followed by a probe at `delay`. True when the probe still
/// took at least `delay`.
async fn escalate(ctx: &ScanContext, candidate: &Candidate, delay: u64) -> bool {
    let options = &candidate.options;
    if !responsive(ctx, &candidate.original, options).await {
        return false;
    }

    let liveness = ctx
        .client()
        .perform(
            candidate
                .original
                .clone()
                .with_timeout(options.timeout_for(delay)),
        )
        .await;
    if liveness.timed_out() {
        warn!("{} timed out without a payload, dropping candidate", candidate.original.url());
        return false;
    }

    let payload = options.payload_for(&candidate.template, delay);
    let request = (candidate.build)(&payload).with_timeout(options.timeout_for(delay));
    let response = ctx.client().perform(request).await;
    let held = response.app_time() >= Duration::from_millis(delay);
    trace!(
        "Timing verification at {} ms: {:?}, {}",
        delay,
        response.app_time(),
        if held { "held" } else { "failed" }
    );
    held
}

/// Phase 2: doubles the delay for every candidate.
async fn verify_candidates(ctx: &Arc<ScanContext>) {
    let state = ctx.timing();
    state.phase2_scheduled.store(false, Ordering::SeqCst);
    let candidates = std::mem::take(&mut *lock(&state.candidates));
    info!("Verifying {} timing candidates", candidates.len());

    for mut candidate in candidates {
        let delay = candidate.delay * 2;
        if !escalate(ctx, &candidate, delay).await {
            continue;
        }
        if candidate.options.deduplicate()
            && !lock(&state.verified).insert(candidate.dedup_key.clone())
        {
            debug!("Duplicate timing candidate for {}", candidate.vector.url);
            continue;
        }
        candidate.delay = delay;
        lock(&state.confirm).push(candidate);
    }

    if state.confirm_count() > 0 && !state.phase3_scheduled.swap(true, Ordering::SeqCst) {
        let next = Arc::clone(ctx);
        ctx.after_run(move || async move { confirm_candidates(&next).await });
    }
}

/// Phase 3: doubles the delay again and logs whatever still holds.
async fn confirm_candidates(ctx: &Arc<ScanContext>) {
    let state = ctx.timing();
    state.phase3_scheduled.store(false, Ordering::SeqCst);
    let candidates = std::mem::take(&mut *lock(&state.confirm));
    info!("Confirming {} timing candidates", candidates.len());

    for candidate in candidates {
        let delay = candidate.delay * 2;
        if !escalate(ctx, &candidate, delay).await {
            continue;
        }
        let payload = candidate.options.payload_for(&candidate.template, delay);
        ctx.log_issue(
            Issue::new(candidate.options.name(), candidate.vector.clone())
                .with_payload(&payload)
                .with_signature(&candidate.template)
                .with_proof(&format!("Response delayed by at least {} ms", delay))
                .with_platform(candidate.platform.clone()),
        );
        responsive(ctx, &candidate.original, &candidate.options).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_for() {
        let mut options = TimingOptions::new(1000).unwrap();
        assert_eq!(options.payload_for("sleep(__TIME__)", 1000), "sleep(1000)");
        options.set_divider(1000).unwrap();
        assert_eq!(options.payload_for("sleep(__TIME__)", 4000), "sleep(4)");
    }

    #[test]
    fn test_option_validation() {
        let mut options = TimingOptions::default();
        assert!(options.set_divider(0).is_err());
        assert!(options.set_delay(0).is_err());
        assert!(TimingOptions::new(0).is_err());
        assert_eq!(options.delay(), 4_000);
        assert!(options.deduplicate());
        assert_eq!(options.responsive_limit(), 120_000);
    }

    #[test]
    fn test_timeout_includes_add_on() {
        let mut options = TimingOptions::new(1000).unwrap();
        options.set_timeout_add_on(500);
        assert_eq!(options.timeout_for(2000), Duration::from_millis(2500));
    }

    #[test]
    fn test_state_reset() {
        let state = TimingState::default();
        state.phase2_scheduled.store(true, Ordering::SeqCst);
        lock(&state.verified).insert("x".to_string());
        state.reset();
        assert_eq!(state.audit_operations(), 0);
        assert!(!state.phase2_scheduled.load(Ordering::SeqCst));
        assert!(lock(&state.verified).is_empty());
    }
}
