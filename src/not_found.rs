// File: not_found.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::diff::{diff_ratio, refine_all};
use crate::http::{lock, HttpClient};
use crate::message::{Request, Response};
use log::{debug, trace};
use lru::LruCache;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use url::Url;

const SIGNATURE_CACHE_SIZE: usize = 100;
const DEFAULT_PRECISION: usize = 2;
const MATCH_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
struct Signature {
    code: u16,
    body: String,
}

/// Recognises an application's "not found" page, including templated ones
/// served with a 200. Fingerprints are taken per directory and extension by
/// requesting names that cannot exist.
pub struct NotFoundDetector {
    precision: usize,
    signatures: Mutex<LruCache<String, Arc<Vec<Signature>>>>,
}

impl Default for NotFoundDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl NotFoundDetector {
    pub fn new() -> Self {
        NotFoundDetector {
            precision: DEFAULT_PRECISION,
            signatures: Mutex::new(LruCache::new(
                NonZeroUsize::new(SIGNATURE_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision.max(1);
        self
    }

    pub fn cached_fingerprints(&self) -> usize {
        lock(&self.signatures).len()
    }

    pub fn clear(&self) {
        lock(&self.signatures).clear();
    }

    pub async fn is_not_found(&self, client: &dyn HttpClient, response: &Response) -> bool {
        if response.code() == 404 {
            return true;
        }
        let url = match Url::parse(response.url()) {
            Ok(url) => url,
            Err(_) => return false,
        };
        let (directory, extension) = split_path(&url);
        let key = format!("{}|{}", directory, extension.as_deref().unwrap_or_default());

        let cached = lock(&self.signatures).get(&key).cloned();
        let signatures = match cached {
            Some(signatures) => signatures,
            None => {
                let signatures = Arc::new(
                    self.fingerprint(client, &url, &directory, extension.as_deref())
                        .await,
                );
                lock(&self.signatures).put(key, Arc::clone(&signatures));
                signatures
            }
        };

        let matched = signatures.iter().any(|signature| {
            signature.code == response.code()
                && diff_ratio(response.body(), &signature.body) <= MATCH_THRESHOLD
        });
        if matched {
            debug!("{} matches the custom 404 fingerprint", response.url());
        }
        matched
    }

    async fn fingerprint(
        &self,
        client: &dyn HttpClient,
        url: &Url,
        directory: &str,
        extension: Option<&str>,
    ) -> Vec<Signature> {
        let mut probes = vec![random_name()];
        if let Some(extension) = extension {
            probes.push(format!("{}.{}", random_name(), extension));
        }

        let mut signatures = Vec::new();
        for probe in probes {
            let mut probe_url = url.clone();
            probe_url.set_path(&format!("{}{}", directory, probe));
            probe_url.set_query(None);

            let mut bodies = Vec::new();
            let mut code = 0;
            for _ in 0..self.precision {
                let response = client
                    .perform(Request::get(probe_url.as_str()).with_follow_location(true))
                    .await;
                if !response.ok() {
                    continue;
                }
                code = response.code();
                bodies.push(response.body().to_string());
            }
            if let Some(body) = refine_all(bodies.iter().map(String::as_str)) {
                trace!("404 fingerprint for {}: code {}", probe_url, code);
                signatures.push(Signature { code, body });
            }
        }
        signatures
    }
}

fn random_name() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

/// Directory of the URL path (with trailing slash) and the extension of its
/// last segment, if any.
fn split_path(url: &Url) -> (String, Option<String>) {
    let path = url.path();
    let (directory, file) = match path.rfind('/') {
        Some(index) => (&path[..=index], &path[index + 1..]),
        None => ("/", path),
    };
    let extension = file
        .rfind('.')
        .filter(|&index| index > 0 && index + 1 < file.len())
        .map(|index| file[index + 1..].to_string());
    (directory.to_string(), extension)
}
