// File: buffer.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::message::{Flow, Response};
use crate::scope::Scope;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    /// Flush once this many bytes are buffered.
    Bytes(usize),
    /// Flush once this many complete lines are buffered.
    Lines(usize),
}

/// Accumulates raw body chunks and hands out text once a threshold is hit.
pub trait BodyBuffer: Send {
    fn push(&mut self, chunk: &[u8]) -> Option<String>;
    fn finish(&mut self) -> String;
}

/// Splits `bytes` at the last complete UTF-8 sequence so multi-byte
/// characters straddling chunk boundaries are never mangled.
fn take_text(bytes: &mut Vec<u8>, upto: usize) -> String {
    let cut = match std::str::from_utf8(&bytes[..upto]) {
        Ok(_) => upto,
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => upto,
    };
    let rest = bytes.split_off(cut);
    let text = String::from_utf8_lossy(bytes).into_owned();
    *bytes = rest;
    text
}

#[derive(Debug)]
pub struct ByteBuffer {
    threshold: usize,
    buffer: Vec<u8>,
}

impl ByteBuffer {
    pub fn new(threshold: usize) -> Self {
        ByteBuffer {
            threshold: threshold.max(1),
            buffer: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl BodyBuffer for ByteBuffer {
    fn push(&mut self, chunk: &[u8]) -> Option<String> {
        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() < self.threshold {
            return None;
        }
        let upto = self.buffer.len();
        let text = take_text(&mut self.buffer, upto);
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn finish(&mut self) -> String {
        let remainder = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        remainder
    }
}

#[derive(Debug)]
pub struct LineBuffer {
    threshold: usize,
    buffer: Vec<u8>,
    complete_lines: usize,
}

impl LineBuffer {
    pub fn new(threshold: usize) -> Self {
        LineBuffer {
            threshold: threshold.max(1),
            buffer: Vec::new(),
            complete_lines: 0,
        }
    }

    pub fn complete_lines(&self) -> usize {
        self.complete_lines
    }
}

impl BodyBuffer for LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Option<String> {
        self.buffer.extend_from_slice(chunk);
        self.complete_lines += chunk.iter().filter(|&&b| b == b'\n').count();
        if self.complete_lines < self.threshold {
            return None;
        }

        // Everything up to and including the last newline goes out, the
        // incomplete trailing line stays behind.
        let last_newline = self.buffer.iter().rposition(|&b| b == b'\n')?;
        let text = take_text(&mut self.buffer, last_newline + 1);
        self.complete_lines = 0;
        Some(text)
    }

    fn finish(&mut self) -> String {
        let remainder = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        self.complete_lines = 0;
        remainder
    }
}

pub fn new_buffer(mode: BufferMode) -> Box<dyn BodyBuffer> {
    match mode {
        BufferMode::Bytes(size) => Box::new(ByteBuffer::new(size)),
        BufferMode::Lines(lines) => Box::new(LineBuffer::new(lines)),
    }
}

pub type BufferedHandler = Box<dyn FnMut(Response, bool) -> Flow + Send>;

/// Glue between the transport's chunk stream and an analysis block: feeds
/// chunks into a buffer, emits partial responses, and stops reading when the
/// handler asks to or the response leaves the audit scope.
pub struct BufferedReader {
    buffer: Box<dyn BodyBuffer>,
    handler: BufferedHandler,
    scope: Scope,
    aborted: bool,
}

impl BufferedReader {
    pub fn new(mode: BufferMode, scope: Scope, handler: BufferedHandler) -> Self {
        BufferedReader {
            buffer: new_buffer(mode),
            handler,
            scope,
            aborted: false,
        }
    }

    pub fn aborted(&self) -> bool {
        self.aborted
    }

    pub fn on_headers(&mut self, head: &Response) -> Flow {
        if self.scope.is_out(head.url()) {
            debug!("Out of scope, aborting buffered read of {}", head.url());
            self.aborted = true;
            return Flow::Abort;
        }
        Flow::Continue
    }

    pub fn on_chunk(&mut self, head: &Response, chunk: &[u8]) -> Flow {
        if self.aborted {
            return Flow::Abort;
        }
        if self.on_headers(head).is_abort() {
            return Flow::Abort;
        }
        if let Some(text) = self.buffer.push(chunk) {
            if (self.handler)(head.partial(text), false).is_abort() {
                self.aborted = true;
                return Flow::Abort;
            }
        }
        Flow::Continue
    }

    /// Final flush. Nothing is delivered once the read was aborted.
    pub fn on_complete(&mut self, response: &Response) {
        if self.aborted {
            return;
        }
        let remainder = self.buffer.finish();
        (self.handler)(response.partial(remainder), true);
    }
}
