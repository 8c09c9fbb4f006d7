// File: main.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2022-2025
// - Volker Schwaberow <volker@schwaberow.de>

mod cli;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use cli::{AuditKind, Cli};
use colored::*;
use log::{info, LevelFilter};
use raudit::audit::rdiff::{self, RdiffOptions, RdiffOutcome};
use raudit::audit::taint::{self, TaintOptions};
use raudit::audit::timing::{self, TimingOptions};
use raudit::config::ProxySettings;
use raudit::scope::Scope;
use raudit::{Auditable, Client, Element, HttpClient, HttpOptions, Issue, Payloads, ScanContext};
use reqwest::Method;
use simple_logger::SimpleLogger;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const DEFAULT_TAINT_PAYLOAD: &str = "raudit<xss>1337</xss>";

fn default_rdiff_pairs() -> Vec<(String, String)> {
    [
        (" AND 1=1", " AND 1=2"),
        ("' AND '1'='1", "' AND '1'='2"),
        ("\" AND \"1\"=\"1", "\" AND \"1\"=\"2"),
    ]
    .iter()
    .map(|(t, f)| (t.to_string(), f.to_string()))
    .collect()
}

fn default_timing_payloads() -> Payloads {
    let mut map = BTreeMap::new();
    map.insert(
        "mysql".to_string(),
        vec![
            " AND SLEEP(__TIME__)-- ".to_string(),
            "' AND SLEEP(__TIME__)-- ".to_string(),
        ],
    );
    map.insert(
        "pgsql".to_string(),
        vec!["; SELECT pg_sleep(__TIME__)-- ".to_string()],
    );
    map.insert(
        "php".to_string(),
        vec!["sleep(__TIME__);".to_string()],
    );
    Payloads::Platform(map)
}

fn http_options(cli: &Cli) -> Result<HttpOptions> {
    let mut options = match &cli.config {
        Some(path) => HttpOptions::from_json_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => HttpOptions::default(),
    };
    if let Some(workers) = cli.workers {
        options.set_max_concurrency(workers);
    }
    if let Some(timeout) = cli.timeout {
        options.set_request_timeout(Duration::from_secs(timeout));
    }
    if let Some(rate) = cli.rate_limit {
        options.set_rate_limit(NonZeroU32::new(rate));
    }
    if let Some(proxy) = &cli.proxy {
        options.set_proxy(Some(ProxySettings::new(proxy)));
    }
    if cli.cookie_jar.is_some() {
        options.set_cookie_jar_file(cli.cookie_jar.clone());
    }
    if options.scope().domains().is_empty() {
        options.set_scope(Scope::for_target(&cli.url)?);
    }
    options.validate()?;
    Ok(options)
}

/// The audited element: the URL without its query, with query pairs and
/// `--param` values as inputs.
fn target_element(cli: &Cli) -> Result<Element> {
    let mut url = Url::parse(&cli.url).with_context(|| format!("Invalid URL {}", cli.url))?;
    let mut inputs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    inputs.extend(cli.parsed_params());
    url.set_query(None);

    let mut element = if cli.post {
        Element::form(url.as_str(), Method::POST)
    } else {
        Element::link(url.as_str())
    };
    for (name, value) in inputs {
        element = element.with_input(&name, &value);
    }
    Ok(element)
}

fn print_issue(issue: &Issue) {
    let marker = if issue.trusted {
        "✗".red().bold()
    } else {
        "?".yellow().bold()
    };
    println!("{} {}", marker, issue.to_string().bold());
    if let Some(payload) = &issue.payload {
        println!("    {} {}", "payload:".dimmed(), payload);
    }
    if let Some(proof) = &issue.proof {
        let proof: String = proof.chars().take(120).collect();
        println!("    {} {}", "proof:".dimmed(), proof);
    }
    for remark in &issue.remarks {
        println!("    {} {}", "remark:".dimmed(), remark.yellow());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = LevelFilter::from_str(&cli.log_level).unwrap_or(LevelFilter::Warn);
    SimpleLogger::new().with_level(level).init()?;
    if cli.no_color {
        colored::control::set_override(false);
    }

    let options = http_options(&cli)?;
    let element = target_element(&cli)?;
    let client: Arc<dyn HttpClient> = Arc::new(Client::new(options)?);
    let ctx = Arc::new(ScanContext::new(client).with_platforms(cli.platforms.clone()));

    let started = Local::now();
    info!("Auditing {} with {} inputs", cli.url, element.inputs().len());

    if cli.runs(AuditKind::Taint) {
        let mut taint_options = TaintOptions::new("Reflected input");
        for pattern in &cli.regexps {
            taint_options.add_regexp(pattern)?;
        }
        for pattern in &cli.ignore {
            taint_options.add_ignore(pattern)?;
        }
        let payloads = if cli.payloads.is_empty() {
            Payloads::from(DEFAULT_TAINT_PAYLOAD)
        } else {
            Payloads::List(cli.payloads.clone())
        };
        taint::audit(&ctx, &element, &payloads, &taint_options).await;
    }

    if cli.runs(AuditKind::Timing) {
        let timing_options = {
            let mut options = TimingOptions::new(cli.delay)?;
            options.set_divider(1000)?;
            options
        };
        let payloads = if cli.timing_payloads.is_empty() {
            default_timing_payloads()
        } else {
            Payloads::List(cli.timing_payloads.clone())
        };
        timing::audit(&ctx, &element, &payloads, &timing_options).await;
    }

    ctx.client().run().await;

    if cli.runs(AuditKind::Rdiff) {
        let mut rdiff_options = RdiffOptions::new("-1", default_rdiff_pairs());
        rdiff_options.set_ratio(cli.ratio)?;
        if let RdiffOutcome::Unstable(reason) = rdiff::audit(&ctx, &element, &rdiff_options).await {
            eprintln!("{} rDiff skipped: {}", "⚠".yellow().bold(), reason);
        }
    }

    let issues = ctx.issues();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&issues)?);
    } else {
        for issue in &issues {
            print_issue(issue);
        }
    }

    let stats = ctx.client().statistics();
    let finished = Local::now();
    println!();
    println!(
        "{} requests, {} responses, {} timed out. Started at {} / Ended at {}. {:.2} responses/s. Issues: {}.",
        stats.request_count,
        stats.response_count,
        stats.time_out_count,
        started.format("%Y-%m-%d %H:%M:%S"),
        finished.format("%Y-%m-%d %H:%M:%S"),
        stats.total_responses_per_second,
        if issues.is_empty() {
            "0".green()
        } else {
            issues.len().to_string().red()
        }
    );
    Ok(())
}
