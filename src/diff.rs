// File: diff.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static TOKENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+|\W+").unwrap());
static WORDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").unwrap());

/// Folds two bodies into the content they share: the tokens of `a` that also
/// occur in `b`, in `a`'s order. Dynamic bits such as timestamps or CSRF
/// tokens drop out, stable markup stays.
pub fn refine(a: &str, b: &str) -> String {
    if a == b {
        return a.to_string();
    }
    let other: HashSet<&str> = TOKENS.find_iter(b).map(|m| m.as_str()).collect();
    TOKENS
        .find_iter(a)
        .map(|m| m.as_str())
        .filter(|token| other.contains(token))
        .collect()
}

/// Refines a whole series of bodies, left to right.
pub fn refine_all<'a>(bodies: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut bodies = bodies.into_iter();
    let first = bodies.next()?.to_string();
    Some(bodies.fold(first, |acc, body| refine(&acc, body)))
}

fn words(text: &str) -> HashSet<&str> {
    WORDS.find_iter(text).map(|m| m.as_str()).collect()
}

/// Share of words not common to both texts, from 0.0 (same words) to 1.0
/// (nothing in common).
pub fn diff_ratio(a: &str, b: &str) -> f64 {
    if a == b {
        return 0.0;
    }
    let a_words = words(a);
    let b_words = words(b);
    if a_words.is_empty() || b_words.is_empty() {
        return 1.0;
    }
    let union = a_words.union(&b_words).count();
    let common = a_words.intersection(&b_words).count();
    (union - common) as f64 / union as f64
}

/// Exact comparison when `ratio` is zero, otherwise word-set distance
/// within `ratio`.
pub fn similar(a: &str, b: &str, ratio: f64) -> bool {
    if ratio <= 0.0 {
        return a == b;
    }
    diff_ratio(a, b) <= ratio
}
