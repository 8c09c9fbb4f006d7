// File: cli.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    /// Target URL; query parameters become the audited inputs.
    pub url: String,

    #[arg(
        short = 'p',
        long = "param",
        help = "Extra input as name=value, may be repeated"
    )]
    pub params: Vec<String>,

    #[arg(long = "post", help = "Submit the inputs as a POST form")]
    pub post: bool,

    #[arg(long = "log-level", default_value = "warn")]
    pub log_level: String,

    #[arg(long = "no-color", help = "Disable colored output")]
    pub no_color: bool,

    #[arg(long = "json", help = "Print issues as JSON")]
    pub json: bool,

    #[arg(short = 'c', long = "config", help = "HTTP options as a JSON file")]
    pub config: Option<PathBuf>,

    #[arg(short = 'w', long = "workers", help = "Maximum concurrent requests")]
    pub workers: Option<usize>,

    #[arg(
        short = 't',
        long = "timeout",
        help = "HTTP request timeout in seconds"
    )]
    pub timeout: Option<u64>,

    #[arg(short = 'r', long = "rate-limit", help = "Requests per second")]
    pub rate_limit: Option<u32>,

    #[arg(long = "proxy")]
    pub proxy: Option<String>,

    #[arg(long = "cookie-jar", help = "Netscape format cookie file")]
    pub cookie_jar: Option<PathBuf>,

    #[arg(
        short = 'a',
        long = "audit",
        value_enum,
        default_values_t = [AuditKind::Taint, AuditKind::Rdiff, AuditKind::Timing],
        help = "Audits to run"
    )]
    pub audits: Vec<AuditKind>,

    #[arg(long = "payload", help = "Taint payload, may be repeated")]
    pub payloads: Vec<String>,

    #[arg(long = "regexp", help = "Taint match pattern, may be repeated")]
    pub regexps: Vec<String>,

    #[arg(long = "ignore", help = "Taint ignore pattern, may be repeated")]
    pub ignore: Vec<String>,

    #[arg(
        long = "timing-payload",
        help = "Timing payload with __TIME__ placeholder, may be repeated"
    )]
    pub timing_payloads: Vec<String>,

    #[arg(long = "delay", default_value_t = 4000, help = "Timing delay in ms")]
    pub delay: u64,

    #[arg(long = "platform", help = "Restrict platform payloads, may be repeated")]
    pub platforms: Vec<String>,

    #[arg(long = "ratio", default_value_t = 0.0, help = "rDiff fuzzy ratio")]
    pub ratio: f64,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditKind {
    Taint,
    Rdiff,
    Timing,
}

impl Cli {
    /// Splits `--param` values at the first `=`; a bare name gets an empty
    /// value.
    pub fn parsed_params(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|param| match param.split_once('=') {
                Some((name, value)) => (name.to_string(), value.to_string()),
                None => (param.clone(), String::new()),
            })
            .collect()
    }

    pub fn runs(&self, kind: AuditKind) -> bool {
        self.audits.contains(&kind)
    }
}
