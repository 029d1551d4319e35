//! Per-consumer synchronization controller.
//!
//! One actor task owns all mutable state. It consumes a single stream of
//! tagged events:
//!
//! ```text
//! push forwarder ──Pushed / PushFailed──┐
//! fetch tasks ─────Fetched{generation}──┼──> actor ──> watch::Sender<SyncView>
//! handle ──────────Refresh──────────────┤
//! fallback timer ───────────────────────┘
//! ```
//!
//! Readers only ever look at the watch channel, so reads never wait on a
//! fetch. Each fetch runs under a child token of the controller's token and
//! carries a generation number; only the latest generation may apply.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::sources::{AumSource, Fetched, PriceSource, SyncSource};
use super::view::{SyncPhase, SyncView};
use crate::channel::{SubscriptionHandle, UpdateSink};
use crate::config::SyncConfig;
use crate::errors::SyncError;
use crate::models::{RateLimitInfo, Session, Versioned};
use crate::provider::SessionProvider;

/// Controller keeping an AUM fresh through pushes and fallback fetches.
pub type AumSync = SyncController<AumSource>;

/// Controller keeping a price board fresh through fallback and manual fetches.
pub type PriceSync = SyncController<PriceSource>;

type Waiter = oneshot::Sender<Result<(), SyncError>>;

enum Event<T> {
    Pushed(T),
    PushFailed(SyncError),
    Fetched {
        generation: u64,
        result: Result<Fetched<T>, SyncError>,
    },
    Refresh(Option<Waiter>),
}

/// Feeds channel callbacks into the actor's event stream.
struct ForwardingSink<T> {
    events: mpsc::UnboundedSender<Event<T>>,
}

impl<T: Send + 'static> UpdateSink<T> for ForwardingSink<T> {
    fn on_update(&self, value: T) {
        let _ = self.events.send(Event::Pushed(value));
    }

    fn on_error(&self, error: SyncError) {
        let _ = self.events.send(Event::PushFailed(error));
    }
}

/// Handle to a running controller.
///
/// Dropping the handle tears the controller down.
pub struct SyncController<S: SyncSource> {
    view: watch::Receiver<SyncView<S::Value>>,
    events: mpsc::UnboundedSender<Event<S::Value>>,
    cancel: CancellationToken,
    actor: JoinHandle<()>,
}

impl<S: SyncSource> SyncController<S> {
    /// Start a controller on the current tokio runtime.
    ///
    /// The controller resolves the session, opens the source's push channel
    /// if it has one, then issues the initial fetch. The fallback timer
    /// first fires one `config.fallback_interval` after start.
    pub fn spawn(source: S, sessions: Arc<dyn SessionProvider>, config: &SyncConfig) -> Self {
        let (view_tx, view) = watch::channel(SyncView::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let actor = Actor {
            source: Arc::new(source),
            sessions,
            view: view_tx,
            events: events_tx.clone(),
            cancel: cancel.clone(),
            subject: None,
            session: None,
            channel: None,
            in_flight: None,
            generation: 0,
            waiters: Vec::new(),
            halted: false,
        };
        let actor = tokio::spawn(actor.run(events_rx, config.fallback_interval));

        Self {
            view,
            events: events_tx,
            cancel,
            actor,
        }
    }

    /// Snapshot of the published state.
    pub fn view(&self) -> SyncView<S::Value> {
        self.view.borrow().clone()
    }

    pub fn current_value(&self) -> Option<S::Value> {
        self.view.borrow().value.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.view.borrow().is_loading
    }

    pub fn last_error(&self) -> Option<SyncError> {
        self.view.borrow().last_error.clone()
    }

    pub fn phase(&self) -> SyncPhase {
        self.view.borrow().phase
    }

    pub fn channel_live(&self) -> bool {
        self.view.borrow().channel_live
    }

    pub fn rate_limit_remaining(&self) -> Option<u32> {
        self.view.borrow().rate_limit_remaining()
    }

    pub fn rate_limit_reset(&self) -> Option<DateTime<Utc>> {
        self.view.borrow().rate_limit_reset()
    }

    /// Change notifications for the published state.
    pub fn watch(&self) -> watch::Receiver<SyncView<S::Value>> {
        self.view.clone()
    }

    /// Fetch now and wait for the outcome.
    ///
    /// Resolves when this fetch, or a later one superseding it, has been
    /// applied. A controller stopped for lack of a session resolves the
    /// session again first.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(Event::Refresh(Some(tx)))
            .map_err(|_| SyncError::Cancelled)?;
        rx.await.unwrap_or(Err(SyncError::Cancelled))
    }

    /// Fetch now without waiting.
    pub fn trigger_refresh(&self) {
        let _ = self.events.send(Event::Refresh(None));
    }

    /// Stop everything and wait until `TornDown` is published.
    pub async fn teardown(&self) {
        self.cancel.cancel();
        let mut view = self.view.clone();
        let _ = view.wait_for(|v| v.phase.is_terminal()).await;
    }

    pub fn is_torn_down(&self) -> bool {
        self.view.borrow().phase.is_terminal() || self.actor.is_finished()
    }
}

impl<S: SyncSource> Drop for SyncController<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Actor<S: SyncSource> {
    source: Arc<S>,
    sessions: Arc<dyn SessionProvider>,
    view: watch::Sender<SyncView<S::Value>>,
    events: mpsc::UnboundedSender<Event<S::Value>>,
    cancel: CancellationToken,
    /// Subject of the first resolved session; another subject tears down.
    subject: Option<String>,
    session: Option<Session>,
    channel: Option<SubscriptionHandle>,
    in_flight: Option<CancellationToken>,
    generation: u64,
    waiters: Vec<Waiter>,
    /// Set when no session could be resolved; the timer pauses until a
    /// refresh finds one.
    halted: bool,
}

impl<S: SyncSource> Actor<S> {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<Event<S::Value>>,
        fallback_interval: Option<Duration>,
    ) {
        let cancel = self.cancel.clone();
        info!("Starting {} sync", self.source.name());

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.shutdown();
                return;
            }
            _ = self.start() => {}
        }

        let mut fallback = fallback_interval.filter(|every| !every.is_zero()).map(|every| {
            let mut timer = interval_at(Instant::now() + every, every);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            timer
        });

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(event) = events.recv() => self.handle_unless_cancelled(event).await,
                _ = next_tick(&mut fallback), if !self.halted => self.on_fallback_tick(),
            }
        }

        self.shutdown();
    }

    async fn start(&mut self) {
        self.publish(|v| {
            v.phase = SyncPhase::Subscribing;
            v.is_loading = true;
        });

        let Ok(session) = self.resolve_session().await else {
            return;
        };
        self.open_channel(&session).await;
        self.dispatch_fetch();
    }

    /// Handle `event`, abandoning it as soon as the controller is cancelled.
    async fn handle_unless_cancelled(&mut self, event: Event<S::Value>) {
        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = self.handle(event) => {}
        }
    }

    async fn handle(&mut self, event: Event<S::Value>) {
        match event {
            Event::Pushed(value) => {
                if self.halted {
                    return;
                }
                if self.apply_value(value) {
                    let fetching = self.in_flight.is_some();
                    self.publish(|v| {
                        v.last_error = None;
                        v.phase = if !fetching {
                            SyncPhase::Live
                        } else if v.phase == SyncPhase::Subscribing {
                            SyncPhase::Subscribing
                        } else {
                            SyncPhase::Refreshing
                        };
                    });
                }
            }
            Event::PushFailed(error) => self.on_push_failed(error),
            Event::Fetched { generation, result } => self.on_fetched(generation, result),
            Event::Refresh(waiter) => self.on_refresh(waiter).await,
        }
    }

    async fn on_refresh(&mut self, waiter: Option<Waiter>) {
        if self.halted || self.session.is_none() {
            self.publish(|v| v.is_loading = true);
            match self.resolve_session().await {
                Ok(session) => self.open_channel(&session).await,
                Err(error) => {
                    if let Some(waiter) = waiter {
                        let _ = waiter.send(Err(error));
                    }
                    return;
                }
            }
        }

        if let Some(waiter) = waiter {
            self.waiters.push(waiter);
        }
        self.dispatch_fetch();
    }

    fn on_fallback_tick(&mut self) {
        if self.session.is_none() {
            return;
        }
        debug!("Fallback refresh of {}", self.source.name());
        self.dispatch_fetch();
    }

    fn on_push_failed(&mut self, error: SyncError) {
        if self.halted {
            return;
        }
        if matches!(error, SyncError::TransportFailure(_)) {
            warn!(
                "Push channel for {} lost, continuing on fallback refresh: {}",
                self.source.name(),
                error
            );
            self.channel = None;
            self.publish(|v| v.channel_live = false);
        } else {
            warn!("Push update for {} failed: {}", self.source.name(), error);
        }
        self.publish(|v| v.last_error = Some(error));
    }

    fn on_fetched(&mut self, generation: u64, result: Result<Fetched<S::Value>, SyncError>) {
        if generation != self.generation {
            debug!(
                "Discarding superseded {} fetch (generation {}, current {})",
                self.source.name(),
                generation,
                self.generation
            );
            return;
        }
        self.in_flight = None;

        match result {
            Ok(fetched) => {
                self.apply_value(fetched.value);
                self.publish(|v| {
                    v.phase = SyncPhase::Live;
                    v.is_loading = false;
                    v.last_error = None;
                    if fetched.rate_limit.is_some() {
                        v.rate_limit = fetched.rate_limit;
                    }
                });
                self.release_waiters(Ok(()));
            }
            Err(SyncError::Cancelled) => {
                self.publish(|v| v.is_loading = false);
                self.release_waiters(Err(SyncError::Cancelled));
            }
            Err(SyncError::Unauthenticated) => self.halt(),
            Err(error) => {
                warn!("{} fetch failed: {}", self.source.name(), error);
                let rejected = match &error {
                    SyncError::RateLimited {
                        retry_after,
                        reset_at,
                    } => Some((*retry_after, *reset_at)),
                    _ => None,
                };
                self.publish(|v| {
                    if let Some((retry_after, reset_at)) = rejected {
                        v.rate_limit = Some(RateLimitInfo {
                            limit: v.rate_limit.as_ref().and_then(|info| info.limit),
                            remaining: 0,
                            reset_at,
                            retry_after: Some(retry_after),
                        });
                    }
                    v.phase = SyncPhase::Error;
                    v.is_loading = false;
                    v.last_error = Some(error.clone());
                });
                self.release_waiters(Err(error));
            }
        }
    }

    /// Replace the value unless `value` is older; returns whether it applied.
    fn apply_value(&mut self, value: S::Value) -> bool {
        let mut applied = false;
        self.view.send_if_modified(|v| {
            if v.value.as_ref().is_some_and(|current| !value.supersedes(current)) {
                return false;
            }
            v.value = Some(value);
            applied = true;
            true
        });
        if !applied {
            debug!("Ignoring stale {} value", self.source.name());
        }
        applied
    }

    /// Resolve the session, binding the controller to its subject.
    ///
    /// Fails with `Unauthenticated` after halting when there is none, and
    /// with `Cancelled` after starting teardown when it belongs to another
    /// subject.
    async fn resolve_session(&mut self) -> Result<Session, SyncError> {
        let Some(session) = self.sessions.current_session().await else {
            self.halt();
            return Err(SyncError::Unauthenticated);
        };

        let subject = self
            .subject
            .get_or_insert_with(|| session.subject_id.clone())
            .clone();
        if subject != session.subject_id {
            info!(
                "Session of {} sync now belongs to another subject, tearing down",
                self.source.name()
            );
            self.publish(|v| {
                v.value = None;
                v.rate_limit = None;
            });
            self.cancel.cancel();
            return Err(SyncError::Cancelled);
        }

        self.session = Some(session.clone());
        self.halted = false;
        Ok(session)
    }

    /// Stop the channel and the timer until a session is found again.
    fn halt(&mut self) {
        warn!("No session for {} sync, stopping", self.source.name());
        self.halted = true;
        self.session = None;
        self.cancel_in_flight();
        self.channel = None;
        self.publish(|v| {
            v.phase = SyncPhase::Error;
            v.is_loading = false;
            v.channel_live = false;
            v.last_error = Some(SyncError::Unauthenticated);
        });
        self.release_waiters(Err(SyncError::Unauthenticated));
    }

    async fn open_channel(&mut self, session: &Session) {
        // At most one subscription per controller.
        if let Some(previous) = self.channel.take() {
            previous.unsubscribe();
        }

        let sink = Arc::new(ForwardingSink {
            events: self.events.clone(),
        });
        match self.source.open_channel(session, sink).await {
            None => {}
            Some(Ok(handle)) => {
                debug!("Push channel open on '{}'", handle.topic());
                self.channel = Some(handle);
                self.publish(|v| v.channel_live = true);
            }
            Some(Err(error)) => {
                warn!(
                    "Push channel for {} unavailable, using fallback refresh only: {}",
                    self.source.name(),
                    error
                );
                self.publish(|v| {
                    v.channel_live = false;
                    v.last_error = Some(error);
                });
            }
        }
    }

    /// Start a fetch, superseding any outstanding one.
    fn dispatch_fetch(&mut self) {
        let Some(session) = self.session.clone() else {
            return;
        };
        self.cancel_in_flight();

        self.generation += 1;
        let generation = self.generation;
        let token = self.cancel.child_token();
        self.in_flight = Some(token.clone());

        self.publish(|v| {
            v.is_loading = true;
            if v.phase != SyncPhase::Subscribing {
                v.phase = SyncPhase::Refreshing;
            }
        });

        let source = self.source.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            if token.is_cancelled() {
                return;
            }
            let result = source.fetch(&session, &token).await;
            if token.is_cancelled() {
                return;
            }
            let _ = events.send(Event::Fetched { generation, result });
        });
    }

    fn cancel_in_flight(&mut self) {
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
    }

    fn release_waiters(&mut self, outcome: Result<(), SyncError>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn publish(&self, update: impl FnOnce(&mut SyncView<S::Value>)) {
        self.view.send_modify(update);
    }

    fn shutdown(&mut self) {
        self.cancel_in_flight();
        if let Some(channel) = self.channel.take() {
            channel.unsubscribe();
        }
        self.release_waiters(Err(SyncError::Cancelled));
        self.publish(|v| {
            v.phase = SyncPhase::TornDown;
            v.is_loading = false;
            v.channel_live = false;
        });
        info!("Stopped {} sync", self.source.name());
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
