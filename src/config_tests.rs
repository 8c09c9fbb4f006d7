// File: config_tests.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

#[cfg(test)]
mod tests {
    use crate::config::{HttpOptions, ProxySettings, DEFAULT_USER_AGENT};
    use crate::error::AuditError;
    use crate::scope::Scope;
    use rstest::*;
    use std::io::Write;
    use std::num::NonZeroU32;
    use std::time::Duration;

    #[test]
    fn test_http_options_default() {
        let options = HttpOptions::default();

        assert_eq!(options.max_concurrency(), 20);
        assert_eq!(options.max_queue_size(), 500);
        assert_eq!(options.request_timeout(), Duration::from_secs(10));
        assert_eq!(options.follow_redirects(), true);
        assert_eq!(options.redirect_limit(), 5);
        assert_eq!(options.user_agent(), DEFAULT_USER_AGENT);
        assert_eq!(options.byte_buffer_size(), 15_000);
        assert_eq!(options.line_buffer_size(), 1_000);
        assert!(options.rate_limit().is_none());
        assert!(options.proxy().is_none());
        assert!(options.cookie_jar_file().is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_setters() {
        let mut options = HttpOptions::new();

        options.set_max_concurrency(4);
        options.set_max_queue_size(10);
        options.set_request_timeout(Duration::from_millis(2500));
        options.set_follow_redirects(false);
        options.set_redirect_limit(2);
        options.set_user_agent("tester/1.0");
        options.add_header("X-Scan", "1");
        options.set_rate_limit(NonZeroU32::new(50));

        assert_eq!(options.max_concurrency(), 4);
        assert_eq!(options.max_queue_size(), 10);
        assert_eq!(options.request_timeout(), Duration::from_millis(2500));
        assert_eq!(options.follow_redirects(), false);
        assert_eq!(options.redirect_limit(), 2);
        assert_eq!(options.user_agent(), "tester/1.0");
        assert_eq!(options.headers().get("X-Scan").map(String::as_str), Some("1"));
        assert_eq!(options.rate_limit().map(|r| r.get()), Some(50));
    }

    #[rstest]
    #[case::zero_concurrency(|o: &mut HttpOptions| o.set_max_concurrency(0), "max_concurrency")]
    #[case::zero_queue(|o: &mut HttpOptions| o.set_max_queue_size(0), "max_queue_size")]
    #[case::zero_timeout(|o: &mut HttpOptions| o.set_request_timeout(Duration::ZERO), "request_timeout_ms")]
    #[case::zero_buffer(|o: &mut HttpOptions| o.set_line_buffer_size(0), "buffer_size")]
    fn test_validate_rejects(#[case] mutate: fn(&mut HttpOptions), #[case] expected: &str) {
        let mut options = HttpOptions::new();
        mutate(&mut options);

        match options.validate() {
            Err(AuditError::InvalidOption { name, .. }) => assert_eq!(name, expected),
            other => panic!("unexpected validation result: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_proxy() {
        let mut options = HttpOptions::new();
        options.set_proxy(Some(ProxySettings::new("not a url")));
        assert!(matches!(options.validate(), Err(AuditError::InvalidUrl(_))));
    }

    #[test]
    fn test_validate_rejects_bad_scope_pattern() {
        let mut options = HttpOptions::new();
        let mut scope = Scope::default();
        scope.add_exclude_pattern("(broken");
        options.set_scope(scope);
        assert!(matches!(
            options.validate(),
            Err(AuditError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "max_concurrency": 7, "redirect_limit": 1, "headers": {{ "X-Token": "abc" }} }}"#
        )
        .unwrap();

        let options = HttpOptions::from_json_file(file.path()).unwrap();
        assert_eq!(options.max_concurrency(), 7);
        assert_eq!(options.redirect_limit(), 1);
        assert_eq!(options.max_queue_size(), 500);
        assert_eq!(
            options.headers().get("X-Token").map(String::as_str),
            Some("abc")
        );
    }

    #[test]
    fn test_from_json_file_invalid_value() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "max_concurrency": 0 }}"#).unwrap();

        assert!(matches!(
            HttpOptions::from_json_file(file.path()),
            Err(AuditError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_options_independence() {
        let mut first = HttpOptions::new();
        let second = first.clone();

        first.set_max_concurrency(1);
        assert_eq!(second.max_concurrency(), 20);
    }
}
