// File: rdiff.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use super::mutation_for;
use crate::context::ScanContext;
use crate::diff::{refine, refine_all, similar};
use crate::element::{Auditable, Format};
use crate::error::{AuditError, AuditResult};
use crate::issue::Issue;
use crate::message::{Request, Response};
use log::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RdiffOptions {
    name: String,
    false_value: String,
    pairs: Vec<(String, String)>,
    precision: usize,
    ratio: f64,
    format: Format,
}

impl Default for RdiffOptions {
    fn default() -> Self {
        Self {
            name: "Blind injection (differential analysis)".to_string(),
            false_value: "-1".to_string(),
            pairs: Vec::new(),
            precision: 2,
            ratio: 0.0,
            format: Format::Append,
        }
    }
}

impl RdiffOptions {
    pub fn new(false_value: &str, pairs: Vec<(String, String)>) -> Self {
        Self {
            false_value: false_value.to_string(),
            pairs,
            ..Self::default()
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn false_value(&self) -> &str {
        &self.false_value
    }

    pub fn add_pair(&mut self, true_expression: &str, false_expression: &str) {
        self.pairs
            .push((true_expression.to_string(), false_expression.to_string()));
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn set_precision(&mut self, precision: usize) -> AuditResult<()> {
        if precision == 0 {
            return Err(AuditError::invalid_option("precision", "must be at least 1"));
        }
        self.precision = precision;
        Ok(())
    }

    pub fn precision(&self) -> usize {
        self.precision
    }

    /// Word-set tolerance for body comparisons; 0.0 compares exactly.
    pub fn set_ratio(&mut self, ratio: f64) -> AuditResult<()> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(AuditError::invalid_option("ratio", "must be between 0.0 and 1.0"));
        }
        self.ratio = ratio;
        Ok(())
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// How the true/false expressions are placed into the input.
    pub fn set_format(&mut self, format: Format) {
        self.format = format;
    }

    pub fn format(&self) -> Format {
        self.format
    }

    fn fingerprint(&self) -> String {
        let pairs: Vec<String> = self
            .pairs
            .iter()
            .map(|(t, f)| format!("{}\x1f{}", t, f))
            .collect();
        format!("rdiff|{}|{}|{}", self.name, self.false_value, pairs.join("\x1e"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RdiffOutcome {
    /// Already audited, or nothing to inject into.
    Skipped,
    /// The control responses could not be trusted.
    Unstable(String),
    Completed { issues: usize },
}

/// Stable body of a probe: every response refined into one, plus the last
/// response for status checks. `None` marks a corrupted probe.
struct Folded {
    body: String,
    last: Response,
}

fn fold(responses: Vec<Response>) -> Option<Folded> {
    if responses
        .iter()
        .any(|response| !response.ok() || response.body().is_empty())
    {
        return None;
    }
    let body = refine_all(responses.iter().map(Response::body))?;
    let last = responses.into_iter().last()?;
    Some(Folded { body, last })
}

/// Boolean differential analysis of every input of `element`. Each stage is
/// its own batch on the client, so this must not be called from inside a
/// completion callback.
pub async fn audit<E: Auditable>(
    ctx: &ScanContext,
    element: &E,
    options: &RdiffOptions,
) -> RdiffOutcome {
    if element.inputs().is_empty() {
        return RdiffOutcome::Skipped;
    }
    let id = element.audit_id("", &options.fingerprint());
    if !ctx.audited(&id) {
        debug!("rDiff already ran for {}", element.action());
        return RdiffOutcome::Skipped;
    }

    let mut issues = 0;
    let inputs: Vec<String> = element.inputs().keys().cloned().collect();
    for input in inputs {
        let probe = |payload: &str, format: Format| -> Option<Request> {
            mutation_for(element, &input, payload, format).map(|m| m.to_request())
        };
        let control_request = match probe(options.false_value(), Format::Straight) {
            Some(request) => request,
            None => continue,
        };

        info!("rDiff control stage for '{}' at {}", input, element.action());
        let control = ctx
            .gather(vec![control_request.clone(); options.precision()])
            .await;
        let control = match fold(control) {
            Some(control) => control.body,
            None => {
                warn!("Server unstable, empty control response for {}", element.action());
                return RdiffOutcome::Unstable("empty control response".to_string());
            }
        };

        for (true_expression, false_expression) in options.pairs() {
            let (true_request, false_request) = match (
                probe(true_expression, options.format()),
                probe(false_expression, options.format()),
            ) {
                (Some(t), Some(f)) => (t, f),
                _ => continue,
            };

            let true_probe = fold(ctx.gather(vec![true_request; options.precision()]).await);
            let false_probe = fold(ctx.gather(vec![false_request; options.precision()]).await);

            let control2 = ctx.gather(vec![control_request.clone()]).await;
            let control2 = control2
                .first()
                .filter(|response| response.ok())
                .map(|response| refine(response.body(), &control))
                .unwrap_or_default();
            if !similar(&control, &control2, options.ratio()) {
                warn!("Control responses diverged for {}", element.action());
                return RdiffOutcome::Unstable("control responses diverged".to_string());
            }

            let (true_probe, false_probe) = match (true_probe, false_probe) {
                (Some(t), Some(f)) => (t, f),
                _ => {
                    debug!("Corrupted probe for '{}', skipping pair", input);
                    continue;
                }
            };

            let vulnerable = similar(&control, &false_probe.body, options.ratio())
                && !similar(&false_probe.body, &true_probe.body, options.ratio())
                && true_probe.last.code() == 200;
            if !vulnerable || ctx.is_not_found(&true_probe.last).await {
                continue;
            }

            let vector = match mutation_for(element, &input, true_expression, options.format()) {
                Some(mutation) => mutation.vector(),
                None => continue,
            };
            ctx.log_issue(
                Issue::new(options.name(), vector)
                    .with_payload(true_expression)
                    .with_proof(&true_probe.body)
                    .with_signature(&format!("{} / {}", true_expression, false_expression))
                    .with_response(&true_probe.last),
            );
            issues += 1;
        }
    }
    RdiffOutcome::Completed { issues }
}
