// File: http.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::buffer::{BufferMode, BufferedHandler, BufferedReader};
use crate::config::HttpOptions;
use crate::cookie_jar::{Cookie, CookieInput, CookieJar};
use crate::error::AuditResult;
use crate::message::{encode_cookie_value, Flow, Mode, Request, Response, ReturnCode};
use crate::statistics::{Statistics, StatisticsSnapshot};
use crate::transport::{apply_defaults, ReqwestTransport, ResponseSink, Transport};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use log::{debug, info, trace};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub type HeadersCallback = Box<dyn FnMut(&Response) -> Flow + Send>;
pub type BodyCallback = Box<dyn FnMut(&Response, &[u8]) -> Flow + Send>;
pub type CompleteCallback = Box<dyn FnOnce(&Response) + Send>;
pub type AfterRun = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;
pub type PersistentHook = Arc<dyn Fn() + Send + Sync>;
pub type ResponseObserver = Arc<dyn Fn(&Response) + Send + Sync>;
pub type QueueObserver = Arc<dyn Fn(&Request) + Send + Sync>;
pub type CookieObserver = Arc<dyn Fn(&[Cookie]) + Send + Sync>;

tokio::task_local! {
    /// Clients whose `run` is on the current task's stack.
    static IN_RUN: Vec<usize>;
}

fn valid_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|byte| byte.is_ascii_graphic() && !b"=;,".contains(&byte))
}

/// Locks a std mutex, carrying on with the inner value if a callback
/// panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Per-request callbacks. Header and body callbacks see the response while
/// it streams in; completion callbacks run once it is done.
#[derive(Default)]
pub struct Callbacks {
    on_headers: Vec<HeadersCallback>,
    on_body: Vec<BodyCallback>,
    on_complete: Vec<CompleteCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_headers(mut self, callback: impl FnMut(&Response) -> Flow + Send + 'static) -> Self {
        self.on_headers.push(Box::new(callback));
        self
    }

    pub fn on_body(
        mut self,
        callback: impl FnMut(&Response, &[u8]) -> Flow + Send + 'static,
    ) -> Self {
        self.on_body.push(Box::new(callback));
        self
    }

    pub fn on_complete(mut self, callback: impl FnOnce(&Response) + Send + 'static) -> Self {
        self.on_complete.push(Box::new(callback));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.on_headers.is_empty() && self.on_body.is_empty() && self.on_complete.is_empty()
    }
}

struct CallbackSink<'a> {
    on_headers: &'a mut Vec<HeadersCallback>,
    on_body: &'a mut Vec<BodyCallback>,
    aborted: &'a AtomicBool,
}

impl ResponseSink for CallbackSink<'_> {
    fn on_headers(&mut self, head: &Response) -> Flow {
        if self.aborted.load(Ordering::SeqCst) {
            return Flow::Abort;
        }
        let mut flow = Flow::Continue;
        for callback in self.on_headers.iter_mut() {
            if callback(head).is_abort() {
                flow = Flow::Abort;
            }
        }
        flow
    }

    fn on_chunk(&mut self, head: &Response, chunk: &[u8]) -> Flow {
        if self.aborted.load(Ordering::SeqCst) {
            return Flow::Abort;
        }
        let mut flow = Flow::Continue;
        for callback in self.on_body.iter_mut() {
            if callback(head, chunk).is_abort() {
                flow = Flow::Abort;
            }
        }
        flow
    }
}

/// What analysis code needs from the request scheduler.
///
/// `after_run` callbacks must not call `run()` on a client from another
/// task; calling it from inside the callback itself is fine and drains the
/// queue in place.
#[async_trait]
pub trait HttpClient: Send + Sync {
    fn options(&self) -> &HttpOptions;

    /// Adds a request to the queue without ever draining it.
    fn enqueue(&self, request: Request, callbacks: Callbacks);

    /// Adds a request to the queue, draining it first when it is full and
    /// nothing else is running.
    async fn queue(&self, request: Request, callbacks: Callbacks);

    /// Executes everything queued, then the one-shot `after_run` callbacks,
    /// until both are exhausted.
    async fn run(&self);

    /// Executes `request` right away, outside the queue.
    async fn perform(&self, request: Request) -> Response;

    fn after_run(&self, callback: AfterRun);
    fn after_run_persistent(&self, hook: PersistentHook);
    fn on_complete(&self, observer: ResponseObserver);
    fn on_queue(&self, observer: QueueObserver);
    fn on_new_cookies(&self, observer: CookieObserver);

    fn update_cookies(&self, inputs: Vec<CookieInput>) -> Vec<Cookie>;
    fn cookies_for(&self, url: &str) -> Vec<Cookie>;

    fn abort(&self);
    fn is_aborted(&self) -> bool;
    fn reset(&self);
    fn is_running(&self) -> bool;
    fn queue_size(&self) -> usize;
    fn statistics(&self) -> StatisticsSnapshot;

    /// Queues `request` with its body fed through a buffer of the given
    /// discipline; `handler` receives partial responses and a final one.
    async fn request_buffered(&self, request: Request, mode: BufferMode, handler: BufferedHandler) {
        let reader = Arc::new(Mutex::new(BufferedReader::new(
            mode,
            self.options().scope().clone(),
            handler,
        )));
        let headers = Arc::clone(&reader);
        let body = Arc::clone(&reader);
        let callbacks = Callbacks::new()
            .on_headers(move |head| lock(&headers).on_headers(head))
            .on_body(move |head, chunk| lock(&body).on_chunk(head, chunk))
            .on_complete(move |response| lock(&reader).on_complete(response));
        self.queue(request, callbacks).await;
    }

    fn byte_buffer_mode(&self) -> BufferMode {
        BufferMode::Bytes(self.options().byte_buffer_size())
    }

    fn line_buffer_mode(&self) -> BufferMode {
        BufferMode::Lines(self.options().line_buffer_size())
    }
}

struct Pending {
    request: Request,
    callbacks: Callbacks,
}

#[derive(Default)]
struct Hooks {
    after_run: Vec<AfterRun>,
    after_run_persistent: Vec<PersistentHook>,
    on_complete: Vec<ResponseObserver>,
    on_queue: Vec<QueueObserver>,
    on_new_cookies: Vec<CookieObserver>,
}

pub struct Client {
    options: HttpOptions,
    transport: Arc<dyn Transport>,
    queue: Mutex<VecDeque<Pending>>,
    hooks: Mutex<Hooks>,
    statistics: Mutex<Statistics>,
    cookie_jar: Mutex<CookieJar>,
    run_lock: tokio::sync::Mutex<()>,
    running: AtomicBool,
    aborted: AtomicBool,
    next_id: AtomicU64,
    max_concurrency: AtomicUsize,
    rate_limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl Client {
    pub fn new(options: HttpOptions) -> AuditResult<Self> {
        let transport = ReqwestTransport::new(&options)?;
        Self::with_transport(options, Arc::new(transport))
    }

    pub fn with_transport(options: HttpOptions, transport: Arc<dyn Transport>) -> AuditResult<Self> {
        options.validate()?;
        let cookie_jar = match options.cookie_jar_file() {
            Some(path) => CookieJar::load(path)?,
            None => CookieJar::new(),
        };
        let rate_limiter = options
            .rate_limit()
            .map(|rate| RateLimiter::direct(Quota::per_second(rate)));
        Ok(Client {
            statistics: Mutex::new(Statistics::new(options.max_concurrency())),
            max_concurrency: AtomicUsize::new(options.max_concurrency()),
            options,
            transport,
            queue: Mutex::new(VecDeque::new()),
            hooks: Mutex::new(Hooks::default()),
            cookie_jar: Mutex::new(cookie_jar),
            run_lock: tokio::sync::Mutex::new(()),
            running: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            rate_limiter,
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.load(Ordering::SeqCst)
    }

    pub fn set_max_concurrency(&self, max_concurrency: usize) {
        let max_concurrency = max_concurrency.max(1);
        self.max_concurrency.store(max_concurrency, Ordering::SeqCst);
        lock(&self.statistics).set_max_concurrency(max_concurrency);
    }

    fn register(&self, request: &mut Request) {
        request.set_id(self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.statistics).add_request();
    }

    /// Adds the user agent, configured headers and cookie header. Jar cookies
    /// for the URL come first, most specific path first; cookies set on the
    /// request itself replace jar cookies of the same name.
    fn decorate(&self, mut request: Request) -> Request {
        let jar_cookies = lock(&self.cookie_jar).for_url(&request.effective_url());
        let mut seen = HashSet::new();
        let mut pairs = Vec::new();
        for cookie in jar_cookies {
            if request.cookies().contains_key(&cookie.name) || !seen.insert(cookie.name.clone()) {
                continue;
            }
            pairs.push(format!("{}={}", cookie.name, encode_cookie_value(&cookie.value)));
        }
        for (name, value) in request.cookies() {
            if !valid_cookie_name(name) {
                debug!("Skipping cookie with unusable name {:?}", name);
                continue;
            }
            pairs.push(format!("{}={}", name, encode_cookie_value(value)));
        }
        let header = if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        };
        apply_defaults(&mut request, &self.options, header);
        request
    }

    async fn execute(&self, request: Request, callbacks: Callbacks) -> Response {
        if self.aborted.load(Ordering::SeqCst) {
            return Response::failed(request, ReturnCode::Error("aborted".to_string()), Duration::ZERO);
        }
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let request = self.decorate(request);
        let Callbacks {
            mut on_headers,
            mut on_body,
            on_complete,
        } = callbacks;
        trace!("Executing #{} {} {}", request.id(), request.method(), request.url());
        let response = {
            let mut sink = CallbackSink {
                on_headers: &mut on_headers,
                on_body: &mut on_body,
                aborted: &self.aborted,
            };
            self.transport.execute(&request, &mut sink).await
        };
        self.complete(&response, on_complete);
        response
    }

    fn complete(&self, response: &Response, on_complete: Vec<CompleteCallback>) {
        lock(&self.statistics).add_response(response.time(), response.timed_out());
        if self.aborted.load(Ordering::SeqCst) {
            trace!("Suppressing callbacks for #{}, aborted", response.request().id());
            return;
        }

        if response.request().update_cookies() {
            let changed = {
                let mut jar = lock(&self.cookie_jar);
                let mut changed = Vec::new();
                for redirection in response.redirections() {
                    changed.extend(jar.update_from_response(redirection.url(), redirection.headers()));
                }
                changed.extend(jar.update_from_response(response.url(), response.headers()));
                changed
            };
            if !changed.is_empty() {
                debug!("{} new cookies from {}", changed.len(), response.url());
                let observers = lock(&self.hooks).on_new_cookies.clone();
                for observer in observers {
                    observer(&changed);
                }
            }
        }

        for callback in on_complete {
            callback(response);
        }
        let observers = lock(&self.hooks).on_complete.clone();
        for observer in observers {
            observer(response);
        }
    }

    fn run_key(&self) -> usize {
        self as *const Client as usize
    }

    /// True when called from inside this client's own `run`, e.g. from one
    /// of its `after_run` callbacks.
    fn in_run(&self) -> bool {
        IN_RUN
            .try_with(|running| running.contains(&self.run_key()))
            .unwrap_or(false)
    }

    fn next_pending(&self) -> Option<Pending> {
        lock(&self.queue).pop_front()
    }

    async fn drain_queue(&self) {
        let mut in_flight = FuturesUnordered::new();
        loop {
            while in_flight.len() < self.max_concurrency() {
                match self.next_pending() {
                    Some(pending) => in_flight.push(self.execute(pending.request, pending.callbacks)),
                    None => break,
                }
            }
            if in_flight.next().await.is_none() {
                break;
            }
        }
    }

    async fn run_cycle(&self) {
        loop {
            self.drain_queue().await;
            let callbacks = std::mem::take(&mut lock(&self.hooks).after_run);
            if callbacks.is_empty() {
                if self.queue_size() == 0 {
                    break;
                }
                continue;
            }
            trace!("Running {} after_run callbacks", callbacks.len());
            for callback in callbacks {
                callback().await;
            }
        }
    }
}

#[async_trait]
impl HttpClient for Client {
    fn options(&self) -> &HttpOptions {
        &self.options
    }

    fn enqueue(&self, mut request: Request, callbacks: Callbacks) {
        if self.aborted.load(Ordering::SeqCst) {
            trace!("Dropping request for {}, client aborted", request.url());
            return;
        }
        self.register(&mut request);
        let observers = lock(&self.hooks).on_queue.clone();
        for observer in observers {
            observer(&request);
        }
        lock(&self.queue).push_back(Pending { request, callbacks });
    }

    async fn queue(&self, request: Request, callbacks: Callbacks) {
        self.enqueue(request, callbacks);
        if !self.in_run()
            && !self.is_running()
            && self.queue_size() >= self.options.max_queue_size()
        {
            debug!(
                "Queue reached {} requests, running emergency drain",
                self.options.max_queue_size()
            );
            self.run().await;
        }
    }

    async fn run(&self) {
        if self.in_run() {
            self.drain_queue().await;
            return;
        }

        let _guard = self.run_lock.lock().await;
        self.running.store(true, Ordering::SeqCst);
        lock(&self.statistics).start_burst();
        let mut running = IN_RUN.try_with(Clone::clone).unwrap_or_default();
        running.push(self.run_key());
        IN_RUN.scope(running, self.run_cycle()).await;
        self.running.store(false, Ordering::SeqCst);

        let snapshot = self.statistics();
        info!(
            "Run finished: {} responses, {} timed out, {:.2} responses/s",
            snapshot.response_count, snapshot.time_out_count, snapshot.burst_responses_per_second
        );
        let hooks = lock(&self.hooks).after_run_persistent.clone();
        for hook in hooks {
            hook();
        }
    }

    async fn perform(&self, mut request: Request) -> Response {
        request = request.with_mode(Mode::Sync);
        self.register(&mut request);
        self.execute(request, Callbacks::default()).await
    }

    fn after_run(&self, callback: AfterRun) {
        lock(&self.hooks).after_run.push(callback);
    }

    fn after_run_persistent(&self, hook: PersistentHook) {
        lock(&self.hooks).after_run_persistent.push(hook);
    }

    fn on_complete(&self, observer: ResponseObserver) {
        lock(&self.hooks).on_complete.push(observer);
    }

    fn on_queue(&self, observer: QueueObserver) {
        lock(&self.hooks).on_queue.push(observer);
    }

    fn on_new_cookies(&self, observer: CookieObserver) {
        lock(&self.hooks).on_new_cookies.push(observer);
    }

    fn update_cookies(&self, inputs: Vec<CookieInput>) -> Vec<Cookie> {
        lock(&self.cookie_jar).update(inputs)
    }

    fn cookies_for(&self, url: &str) -> Vec<Cookie> {
        lock(&self.cookie_jar).for_url(url)
    }

    fn abort(&self) {
        info!("Aborting client, dropping {} queued requests", self.queue_size());
        self.aborted.store(true, Ordering::SeqCst);
        lock(&self.queue).clear();
        lock(&self.hooks).after_run.clear();
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.aborted.store(false, Ordering::SeqCst);
        lock(&self.queue).clear();
        lock(&self.hooks).after_run.clear();
        lock(&self.statistics).reset();
        self.max_concurrency
            .store(self.options.max_concurrency(), Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn queue_size(&self) -> usize {
        lock(&self.queue).len()
    }

    fn statistics(&self) -> StatisticsSnapshot {
        let queue_size = self.queue_size();
        lock(&self.statistics).snapshot(queue_size)
    }
}
