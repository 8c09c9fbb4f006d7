// File: passive.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::context::ScanContext;
use crate::element::ElementKind;
use crate::issue::{Issue, Vector};
use crate::message::Response;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

pub static CREDIT_CARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){12,18}\d\b").unwrap());

/// Logs an issue for every distinct match of `pattern` in the body that
/// `validator` accepts. Returns how many were logged.
pub fn match_and_log<F>(
    ctx: &ScanContext,
    name: &str,
    response: &Response,
    pattern: &Regex,
    validator: F,
) -> usize
where
    F: Fn(&str) -> bool,
{
    let mut logged = Vec::new();
    for found in pattern.find_iter(response.body()) {
        let proof = found.as_str();
        if logged.iter().any(|seen: &String| seen == proof) || !validator(proof) {
            continue;
        }
        debug!("{} matched '{}' at {}", name, proof, response.url());
        let vector = Vector {
            kind: ElementKind::Link,
            method: response.request().method().to_string(),
            url: response.url().to_string(),
            affected_input: None,
        };
        ctx.log_issue(
            Issue::new(name, vector)
                .with_proof(proof)
                .with_signature(pattern.as_str())
                .with_response(response),
        );
        logged.push(proof.to_string());
    }
    logged.len()
}

/// Luhn checksum over the digits of `number`; separators are ignored.
pub fn luhn_valid(number: &str) -> bool {
    let digits: Vec<u32> = number
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .map(|c| c.to_digit(10))
        .collect::<Option<Vec<u32>>>()
        .unwrap_or_default();
    if digits.len() < 2 {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &digit)| {
            if i % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                digit
            }
        })
        .sum();
    sum % 10 == 0
}
