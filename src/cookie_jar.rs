// File: cookie_jar.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::{AuditError, AuditResult};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeZone, Utc};
use log::{debug, trace};
use reqwest::header::{HeaderMap, SET_COOKIE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: Option<DateTime<Utc>>,
    pub secure: bool,
    pub http_only: bool,
    /// `Expires` or `Max-Age` attribute as the server sent it. `expires` is
    /// derived from it at parse time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_attribute: Option<String>,
}

type CookieKey = (String, String, String);

/// Roughly 400 years, keeps `Max-Age` arithmetic in chrono's range.
const MAX_AGE_LIMIT: i64 = 12_622_780_800;

impl Cookie {
    pub fn new(name: &str, value: &str, domain: &str) -> Self {
        Cookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_ascii_lowercase(),
            path: "/".to_string(),
            expires: None,
            secure: false,
            http_only: false,
            expiry_attribute: None,
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self.expiry_attribute = None;
        self
    }

    /// Parses one `Set-Cookie` header value received from `url`. Returns
    /// `None` for anything that doesn't carry a `name=value` pair.
    pub fn parse_set_cookie(header: &str, url: &Url) -> Option<Cookie> {
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let host = url.host_str()?.to_ascii_lowercase();
        let mut cookie = Cookie::new(name, value.trim().trim_matches('"'), &host);
        cookie.path = default_path(url);
        let mut max_age: Option<i64> = None;
        let mut expires_attribute = None;

        for attribute in parts {
            let (key, val) = match attribute.split_once('=') {
                Some((key, val)) => (key.trim().to_ascii_lowercase(), val.trim()),
                None => (attribute.trim().to_ascii_lowercase(), ""),
            };
            match key.as_str() {
                "domain" if !val.is_empty() => {
                    let domain = val.trim_start_matches('.').to_ascii_lowercase();
                    if host != domain && !host.ends_with(&format!(".{}", domain)) {
                        trace!(
                            "Ignoring cookie {} from {} for foreign domain {}",
                            name, host, domain
                        );
                        return None;
                    }
                    cookie.domain = format!(".{}", domain);
                }
                "path" if val.starts_with('/') => cookie.path = val.to_string(),
                "expires" => {
                    if let Some(date) = parse_cookie_date(val) {
                        cookie.expires = Some(date);
                        expires_attribute = Some(format!("Expires={}", val));
                    }
                }
                "max-age" => max_age = val.parse().ok(),
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                _ => {}
            }
        }

        if let Some(seconds) = max_age {
            let seconds = seconds.clamp(-MAX_AGE_LIMIT, MAX_AGE_LIMIT);
            cookie.expires = Utc::now().checked_add_signed(ChronoDuration::seconds(seconds));
            cookie.expiry_attribute = Some(format!("Max-Age={}", seconds));
        } else {
            cookie.expiry_attribute = expires_attribute;
        }

        Some(cookie)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    /// A leading dot makes the cookie match the bare domain and all of its
    /// subdomains; otherwise only the exact host matches.
    pub fn matches_domain(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        match self.domain.strip_prefix('.') {
            Some(suffix) => host == suffix || host.ends_with(&self.domain),
            None => host == self.domain,
        }
    }

    pub fn matches_path(&self, request_path: &str) -> bool {
        let request_path = if request_path.is_empty() {
            "/"
        } else {
            request_path
        };
        if request_path == self.path {
            return true;
        }
        request_path.starts_with(&self.path)
            && (self.path.ends_with('/')
                || request_path[self.path.len()..].starts_with('/'))
    }

    /// Canonical `Set-Cookie` style rendering used to detect changes.
    pub fn serialize(&self) -> String {
        let mut out = format!(
            "{}={}; Domain={}; Path={}",
            self.name, self.value, self.domain, self.path
        );
        if let Some(expires) = self.expires {
            out.push_str(&format!(
                "; Expires={}",
                expires.format("%a, %d %b %Y %H:%M:%S GMT")
            ));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }

    /// What the server told us about the cookie. Unlike `serialize`, this
    /// doesn't move when the same `Max-Age` is parsed at a later time.
    fn state(&self) -> String {
        let expiry = match (&self.expiry_attribute, self.expires) {
            (Some(attribute), _) => attribute.clone(),
            (None, Some(expires)) => expires.timestamp().to_string(),
            (None, None) => String::new(),
        };
        format!(
            "{}={}|{}|{}|{}|{}|{}",
            self.name, self.value, self.domain, self.path, expiry, self.secure, self.http_only
        )
    }

    fn key(&self) -> CookieKey {
        (self.domain.clone(), self.path.clone(), self.name.clone())
    }
}

/// Cookie dates in the RFC 1123 form and the dashed Netscape forms servers
/// still send, e.g. `Thu, 01-Jan-1970 00:00:01 GMT`.
fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }
    // Two-digit years first, `%Y` would read `70` as year 70.
    const FORMATS: [&str; 4] = [
        "%a, %d-%b-%y %H:%M:%S GMT",
        "%A, %d-%b-%y %H:%M:%S GMT",
        "%a, %d-%b-%Y %H:%M:%S GMT",
        "%a %b %e %H:%M:%S %Y",
    ];
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value.trim(), format).ok())
        .map(|date| date.and_utc())
}

fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => path[..index].to_string(),
    }
}

/// Everything `CookieJar::update` accepts.
#[derive(Debug, Clone)]
pub enum CookieInput {
    SetCookie { url: String, header: String },
    Pairs { url: String, pairs: BTreeMap<String, String> },
    Cookie(Cookie),
}

impl CookieInput {
    pub fn set_cookie(url: &str, header: &str) -> Self {
        CookieInput::SetCookie {
            url: url.to_string(),
            header: header.to_string(),
        }
    }

    pub fn pairs<'a>(url: &str, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        CookieInput::Pairs {
            url: url.to_string(),
            pairs: pairs
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        }
    }

    fn into_cookies(self) -> Vec<Cookie> {
        match self {
            CookieInput::Cookie(cookie) => vec![cookie],
            CookieInput::SetCookie { url, header } => Url::parse(&url)
                .ok()
                .and_then(|url| Cookie::parse_set_cookie(&header, &url))
                .into_iter()
                .collect(),
            CookieInput::Pairs { url, pairs } => {
                let host = match Url::parse(&url)
                    .ok()
                    .and_then(|url| url.host_str().map(str::to_string))
                {
                    Some(host) => host,
                    None => return Vec::new(),
                };
                pairs
                    .iter()
                    .filter(|(name, _)| !name.is_empty())
                    .map(|(name, value)| Cookie::new(name, value, &host))
                    .collect()
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: BTreeMap<CookieKey, Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a Netscape-format cookie file.
    pub fn load(path: &Path) -> AuditResult<Self> {
        let mut jar = Self::new();
        jar.load_file(path)?;
        Ok(jar)
    }

    pub fn load_file(&mut self, path: &Path) -> AuditResult<()> {
        if !path.exists() {
            return Err(AuditError::CookieJarNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let cookies: Vec<CookieInput> = contents
            .lines()
            .filter_map(parse_netscape_line)
            .map(CookieInput::Cookie)
            .collect();
        let loaded = self.update(cookies);
        debug!("Loaded {} cookies from {}", loaded.len(), path.display());
        Ok(())
    }

    /// Stores the given cookies, returning the ones that were new or changed.
    pub fn update(&mut self, inputs: impl IntoIterator<Item = CookieInput>) -> Vec<Cookie> {
        let mut changed = Vec::new();
        for cookie in inputs.into_iter().flat_map(CookieInput::into_cookies) {
            let key = cookie.key();
            let unchanged = self
                .cookies
                .get(&key)
                .is_some_and(|existing| existing.state() == cookie.state());
            if unchanged {
                continue;
            }
            trace!("Cookie jar update: {}", cookie.serialize());
            self.cookies.insert(key, cookie.clone());
            changed.push(cookie);
        }
        changed
    }

    pub fn update_from_response(&mut self, url: &str, headers: &HeaderMap) -> Vec<Cookie> {
        let inputs: Vec<CookieInput> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(|header| CookieInput::set_cookie(url, header))
            .collect();
        self.update(inputs)
    }

    /// Cookies applicable to `url`, most specific path first.
    pub fn for_url(&self, url: &str) -> Vec<Cookie> {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(_) => return Vec::new(),
        };
        let host = match parsed.host_str() {
            Some(host) => host,
            None => return Vec::new(),
        };
        let now = Utc::now();

        let mut matching: Vec<Cookie> = self
            .cookies
            .values()
            .filter(|cookie| !cookie.is_expired(now))
            .filter(|cookie| cookie.matches_domain(host))
            .filter(|cookie| cookie.matches_path(parsed.path()))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        matching
    }

    pub fn header_for(&self, url: &str) -> Option<String> {
        let cookies = self.for_url(url);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|cookie| format!("{}={}", cookie.name, cookie.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn cookies(&self) -> Vec<Cookie> {
        self.cookies.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn clear(&mut self) {
        self.cookies.clear();
    }
}

fn parse_netscape_line(line: &str) -> Option<Cookie> {
    let (line, http_only) = match line.strip_prefix("#HttpOnly_") {
        Some(rest) => (rest, true),
        None => (line, false),
    };
    if line.trim().is_empty() || line.starts_with('#') {
        return None;
    }

    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 7 {
        return None;
    }

    let include_subdomains = fields[1].eq_ignore_ascii_case("TRUE");
    let bare_domain = fields[0].trim_start_matches('.');
    let domain = if include_subdomains || fields[0].starts_with('.') {
        format!(".{}", bare_domain)
    } else {
        bare_domain.to_string()
    };

    let mut cookie = Cookie::new(fields[5], fields[6], &domain).with_path(fields[2]);
    cookie.secure = fields[3].eq_ignore_ascii_case("TRUE");
    cookie.http_only = http_only;
    cookie.expires = match fields[4].parse::<i64>() {
        Ok(0) | Err(_) => None,
        Ok(epoch) => Utc.timestamp_opt(epoch, 0).single(),
    };
    Some(cookie)
}
