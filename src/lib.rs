// File: lib.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::module_inception)]
#![allow(clippy::bool_assert_comparison)]
#![allow(clippy::new_without_default)]

pub mod audit;
pub mod buffer;
pub mod config;
pub mod context;
pub mod cookie_jar;
pub mod diff;
pub mod element;
pub mod error;
pub mod http;
pub mod issue;
pub mod message;
pub mod not_found;
pub mod passive;
pub mod scope;
pub mod statistics;
pub mod transport;

pub use config::HttpOptions;
pub use context::ScanContext;
pub use element::{Auditable, Element, ElementKind, Format, Page, Payloads};
pub use error::{AuditError, AuditResult};
pub use http::{Callbacks, Client, HttpClient};
pub use issue::{Issue, Vector};
pub use message::{Flow, Request, Response, ReturnCode};

#[cfg(test)]
mod config_tests;
