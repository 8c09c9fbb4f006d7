// File: mod.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

pub mod rdiff;
pub mod taint;
pub mod timing;

use crate::element::{Auditable, Format};
use crate::error::{AuditError, AuditResult};
use regex::Regex;

pub(crate) fn compile_pattern(pattern: &str) -> AuditResult<Regex> {
    Regex::new(pattern).map_err(|source| AuditError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// The mutation of `element` carrying `payload` in `input`.
pub(crate) fn mutation_for<E: Auditable>(
    element: &E,
    input: &str,
    payload: &str,
    format: Format,
) -> Option<E> {
    element
        .mutations(payload, &[format])
        .into_iter()
        .find(|mutation| mutation.altered() == Some(input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;

    #[test]
    fn test_compile_pattern_error() {
        assert!(compile_pattern(r"xss\d+").is_ok());
        let err = compile_pattern("(unclosed").unwrap_err();
        assert!(matches!(err, AuditError::InvalidPattern { .. }));
    }

    #[test]
    fn test_mutation_for() {
        let link = Element::link("http://example.com/item")
            .with_input("id", "1")
            .with_input("page", "2");
        let mutation = mutation_for(&link, "id", " AND 1=1", Format::Append).unwrap();
        assert_eq!(mutation.inputs()["id"], "1 AND 1=1");
        assert_eq!(mutation.inputs()["page"], "2");
        assert!(mutation_for(&link, "missing", "x", Format::Straight).is_none());
    }
}
