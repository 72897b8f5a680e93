use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::context::{Context, ErrorContext, FailureKind, OkContext};

use super::Middleware;

#[derive(Default)]
struct ThresholdState {
    overall: u64,
    per_actor: HashMap<String, u64>,
}

/// Trigger `on_failure` of the wrapped middleware only when errors
/// accumulate past a threshold.
///
/// Failures are counted per actor, per message, and overall; crossing any
/// of the three limits starts forwarding. A single successfully processed
/// message resets the overall counter and the counter of its actor.
///
/// Use it to alert on an unhealthy system without paging anyone about a
/// lone flaky message.
pub struct ErrorThresholdMiddleware<M> {
    inner: M,
    total_failures: u64,
    actor_failures: u64,
    message_failures: u64,
    state: Mutex<ThresholdState>,
}

impl<M: Middleware> ErrorThresholdMiddleware<M> {
    /// Wrap `inner` with the default limits (20 for each counter).
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            total_failures: 20,
            actor_failures: 20,
            message_failures: 20,
            state: Mutex::new(ThresholdState::default()),
        }
    }

    /// How many failures across all actors before forwarding. Crossing it
    /// means the whole system is unhealthy.
    pub fn total_failures(mut self, limit: u64) -> Self {
        self.total_failures = limit;
        self
    }

    /// How many failures in a single actor before forwarding.
    pub fn actor_failures(mut self, limit: u64) -> Self {
        self.actor_failures = limit;
        self
    }

    /// How many delivery attempts of a single message before forwarding.
    pub fn message_failures(mut self, limit: u64) -> Self {
        self.message_failures = limit;
        self
    }
}

#[async_trait]
impl<M: Middleware> Middleware for ErrorThresholdMiddleware<M> {
    async fn on_start(&self, ctx: &Context) {
        self.inner.on_start(ctx).await;
    }

    async fn on_success(&self, ctx: &OkContext) {
        {
            let mut state = self.state.lock().expect("threshold mutex poisoned");
            state.overall = 0;
            state.per_actor.remove(&ctx.actor_key());
        }
        self.inner.on_success(ctx).await;
    }

    async fn on_failure(&self, ctx: &ErrorContext) {
        let forward = {
            let mut state = self.state.lock().expect("threshold mutex poisoned");
            let key = ctx.actor_key();
            let actor_count = *state.per_actor.entry(key.clone()).or_insert(0);
            if state.overall > self.total_failures
                || actor_count > self.actor_failures
                || ctx.attempts() > self.message_failures
            {
                true
            } else {
                state.overall += 1;
                *state.per_actor.entry(key).or_insert(0) += 1;
                false
            }
        };
        if forward {
            self.inner.on_failure(ctx).await;
        }
    }
}

impl<M> std::fmt::Debug for ErrorThresholdMiddleware<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorThresholdMiddleware")
            .field("total_failures", &self.total_failures)
            .field("actor_failures", &self.actor_failures)
            .field("message_failures", &self.message_failures)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct FrequencyState {
    last_start: HashMap<String, Instant>,
    last_ok: HashMap<String, Instant>,
    last_err: HashMap<String, Instant>,
    last_err_kind: HashMap<(String, FailureKind), Instant>,
}

/// Trigger the wrapped middleware at most once per sliding window.
///
/// Each hook forwards at most once per actor per window; in addition,
/// `on_failure` never repeats a [`FailureKind`] for the same actor within
/// the window. Use it to avoid spamming a notification channel with copies
/// of the same message when things go south.
pub struct FrequencyMiddleware<M> {
    inner: M,
    timeframe: Duration,
    state: Mutex<FrequencyState>,
}

impl<M: Middleware> FrequencyMiddleware<M> {
    /// Wrap `inner` with the default 600-second window.
    pub fn new(inner: M) -> Self {
        Self::with_timeframe(inner, Duration::from_secs(600))
    }

    /// Wrap `inner` with an explicit deduplication window.
    pub fn with_timeframe(inner: M, timeframe: Duration) -> Self {
        Self {
            inner,
            timeframe,
            state: Mutex::new(FrequencyState::default()),
        }
    }

    fn should_forward<K>(&self, slot: fn(&mut FrequencyState) -> &mut HashMap<K, Instant>, key: K) -> bool
    where
        K: std::hash::Hash + Eq,
    {
        let now = Instant::now();
        let mut state = self.state.lock().expect("frequency mutex poisoned");
        let seen = slot(&mut state);
        match seen.get(&key) {
            Some(last) if now.duration_since(*last) <= self.timeframe => false,
            _ => {
                seen.insert(key, now);
                true
            }
        }
    }
}

#[async_trait]
impl<M: Middleware> Middleware for FrequencyMiddleware<M> {
    async fn on_start(&self, ctx: &Context) {
        if self.should_forward(|s| &mut s.last_start, ctx.actor_key()) {
            self.inner.on_start(ctx).await;
        }
    }

    async fn on_success(&self, ctx: &OkContext) {
        if self.should_forward(|s| &mut s.last_ok, ctx.actor_key()) {
            self.inner.on_success(ctx).await;
        }
    }

    async fn on_failure(&self, ctx: &ErrorContext) {
        // the per-actor gate dominates; the per-kind slot is only checked
        // once the actor is allowed to report again
        let actor_open = self.should_forward(|s| &mut s.last_err, ctx.actor_key());
        if actor_open
            && self.should_forward(|s| &mut s.last_err_kind, (ctx.actor_key(), ctx.kind()))
        {
            self.inner.on_failure(ctx).await;
        }
    }
}

impl<M> std::fmt::Debug for FrequencyMiddleware<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrequencyMiddleware")
            .field("timeframe", &self.timeframe)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::context::{test_context, Failure};

    #[derive(Default)]
    struct Counting {
        started: AtomicUsize,
        succeeded: AtomicUsize,
        failed: AtomicUsize,
    }

    #[async_trait]
    impl Middleware for Arc<Counting> {
        async fn on_start(&self, _ctx: &Context) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_success(&self, _ctx: &OkContext) {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_failure(&self, _ctx: &ErrorContext) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn failure_ctx(actor: &str, attempts: u64) -> ErrorContext {
        ErrorContext::new(
            test_context(actor, "e", attempts),
            Failure::handler("boom".into()),
        )
    }

    fn ok_ctx(actor: &str) -> OkContext {
        OkContext::new(test_context(actor, "e", 0), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn threshold_forwards_after_the_limit() {
        let counter = Arc::new(Counting::default());
        let mw = ErrorThresholdMiddleware::new(counter.clone());
        for attempt in 0..40 {
            mw.on_failure(&failure_ctx("a", attempt)).await;
        }
        assert_eq!(counter.failed.load(Ordering::SeqCst), 19);
    }

    #[tokio::test]
    async fn threshold_message_attempts_cross_first() {
        let counter = Arc::new(Counting::default());
        let mw = ErrorThresholdMiddleware::new(counter.clone())
            .total_failures(1000)
            .actor_failures(1000)
            .message_failures(3);
        mw.on_failure(&failure_ctx("a", 2)).await;
        assert_eq!(counter.failed.load(Ordering::SeqCst), 0);
        mw.on_failure(&failure_ctx("a", 5)).await;
        assert_eq!(counter.failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn threshold_success_resets_the_counters() {
        let counter = Arc::new(Counting::default());
        let mw = ErrorThresholdMiddleware::new(counter.clone())
            .total_failures(2)
            .actor_failures(2)
            .message_failures(1000);
        for _ in 0..3 {
            mw.on_failure(&failure_ctx("a", 0)).await;
        }
        mw.on_success(&ok_ctx("a")).await;
        for _ in 0..3 {
            mw.on_failure(&failure_ctx("a", 0)).await;
        }
        // neither streak got past the limit
        assert_eq!(counter.failed.load(Ordering::SeqCst), 0);
        assert_eq!(counter.succeeded.load(Ordering::SeqCst), 1);
        mw.on_failure(&failure_ctx("a", 0)).await;
        assert_eq!(counter.failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn threshold_always_forwards_start() {
        let counter = Arc::new(Counting::default());
        let mw = ErrorThresholdMiddleware::new(counter.clone());
        mw.on_start(&test_context("a", "e", 0)).await;
        assert_eq!(counter.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn frequency_forwards_once_per_window() {
        let counter = Arc::new(Counting::default());
        let mw = FrequencyMiddleware::with_timeframe(counter.clone(), Duration::from_secs(600));
        for _ in 0..5 {
            mw.on_start(&test_context("a", "e", 0)).await;
            mw.on_success(&ok_ctx("a")).await;
        }
        assert_eq!(counter.started.load(Ordering::SeqCst), 1);
        assert_eq!(counter.succeeded.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(601)).await;
        mw.on_start(&test_context("a", "e", 0)).await;
        assert_eq!(counter.started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn frequency_tracks_actors_separately() {
        let counter = Arc::new(Counting::default());
        let mw = FrequencyMiddleware::new(counter.clone());
        mw.on_start(&test_context("a", "e", 0)).await;
        mw.on_start(&test_context("b", "e", 0)).await;
        assert_eq!(counter.started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn frequency_forwards_failures_once_per_actor() {
        let counter = Arc::new(Counting::default());
        let mw = FrequencyMiddleware::new(counter.clone());
        mw.on_failure(&failure_ctx("a", 0)).await;
        mw.on_failure(&failure_ctx("a", 1)).await;
        assert_eq!(counter.failed.load(Ordering::SeqCst), 1);

        // even a different failure kind stays silenced within the window
        let timeout = ErrorContext::new(
            test_context("a", "e", 2),
            Failure::timeout(Duration::from_secs(1)),
        );
        mw.on_failure(&timeout).await;
        assert_eq!(counter.failed.load(Ordering::SeqCst), 1);

        // another actor reports independently
        mw.on_failure(&failure_ctx("b", 0)).await;
        assert_eq!(counter.failed.load(Ordering::SeqCst), 2);

        // a fresh window reopens both gates
        tokio::time::advance(Duration::from_secs(601)).await;
        mw.on_failure(&failure_ctx("a", 3)).await;
        assert_eq!(counter.failed.load(Ordering::SeqCst), 3);
    }
}
