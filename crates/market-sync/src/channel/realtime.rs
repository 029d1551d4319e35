//! Push subscription delivering AUM updates for one subject.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sink::UpdateSink;
use super::transport::{PushStream, PushTransport};
use crate::errors::SyncError;
use crate::models::{AumUpdate, PushMessage, Session};
use crate::provider::PricingGateway;

/// Topic carrying AUM events for `subject_id`, optionally narrowed to one
/// portfolio.
pub fn aum_topic(subject_id: &str, portfolio_id: Option<&str>) -> String {
    format!("aum-updates-{}-{}", subject_id, portfolio_id.unwrap_or("all"))
}

type SharedSink = Arc<dyn UpdateSink<AumUpdate>>;
type Slot = Arc<Mutex<Option<Arc<Delivery>>>>;

/// Ordered, closable path to the consumer's sink.
///
/// The sink is invoked under the delivery lock, so once [`Delivery::close`]
/// returns no callback is running or will run. The one exception is a close
/// issued from inside a callback: it stops further deliveries without
/// waiting on the lock its own thread holds.
struct Delivery {
    state: Mutex<DeliveryState>,
    closed: AtomicBool,
    dispatching: Mutex<Option<ThreadId>>,
}

struct DeliveryState {
    sink: Option<SharedSink>,
    last_delivered: Option<DateTime<Utc>>,
}

impl Delivery {
    fn new(sink: SharedSink) -> Self {
        Self {
            state: Mutex::new(DeliveryState {
                sink: Some(sink),
                last_delivered: None,
            }),
            closed: AtomicBool::new(false),
            dispatching: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeliveryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_dispatching(&self, thread: Option<ThreadId>) {
        *self
            .dispatching
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = thread;
    }

    fn dispatching_here(&self) -> bool {
        *self
            .dispatching
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            == Some(thread::current().id())
    }

    /// Run `callback` against the sink while holding the delivery lock.
    fn dispatch(&self, state: &DeliveryState, callback: impl FnOnce(&SharedSink)) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Some(sink) = &state.sink {
            self.set_dispatching(Some(thread::current().id()));
            callback(sink);
            self.set_dispatching(None);
        }
    }

    /// Deliver `update` unless it is older than the last one delivered.
    fn deliver(&self, update: AumUpdate) -> bool {
        let mut state = self.lock();
        if state.sink.is_none() || self.closed.load(Ordering::SeqCst) {
            return false;
        }
        if state
            .last_delivered
            .is_some_and(|last| update.last_updated < last)
        {
            debug!(
                "Dropping out-of-order AUM update from {}",
                update.last_updated
            );
            return false;
        }
        state.last_delivered = Some(update.last_updated);
        self.dispatch(&state, |sink| sink.on_update(update));
        true
    }

    fn fail(&self, error: SyncError) {
        let state = self.lock();
        self.dispatch(&state, |sink| sink.on_error(error));
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if self.dispatching_here() {
            return;
        }
        self.lock().sink = None;
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Realtime AUM channel for one (subject, portfolio) pair.
///
/// At most one subscription is alive per channel. Pushed `aum` events are
/// delivered as-is; `prices_changed` events trigger a recomputation through
/// the gateway's calculator.
pub struct RealtimeChannel {
    session: Session,
    portfolio_id: Option<String>,
    gateway: Arc<PricingGateway>,
    transport: Arc<dyn PushTransport>,
    active: Slot,
}

impl RealtimeChannel {
    pub fn new(
        session: Session,
        portfolio_id: Option<String>,
        gateway: Arc<PricingGateway>,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        Self {
            session,
            portfolio_id,
            gateway,
            transport,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn topic(&self) -> String {
        aum_topic(&self.session.subject_id, self.portfolio_id.as_deref())
    }

    pub fn is_subscribed(&self) -> bool {
        lock_slot(&self.active).is_some()
    }

    /// Connect to the push topic and start delivering to `sink`.
    ///
    /// Fails with [`SyncError::AlreadySubscribed`] while a previous handle is
    /// alive, and with the transport's error when the connection cannot be
    /// opened.
    pub async fn subscribe(&self, sink: SharedSink) -> Result<SubscriptionHandle, SyncError> {
        let topic = self.topic();
        let delivery = Arc::new(Delivery::new(sink));
        {
            let mut slot = lock_slot(&self.active);
            if slot.is_some() {
                return Err(SyncError::AlreadySubscribed(topic));
            }
            *slot = Some(delivery.clone());
        }

        let stream = match self.transport.connect(&topic).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to connect to '{}': {}", topic, e);
                release_slot(&self.active, &delivery);
                return Err(e);
            }
        };
        info!("Subscribed to '{}'", topic);

        let reader = tokio::spawn(read_pushes(
            stream,
            delivery.clone(),
            self.gateway.clone(),
            self.session.subject_id.clone(),
            self.portfolio_id.clone(),
        ));

        Ok(SubscriptionHandle {
            topic,
            delivery,
            slot: self.active.clone(),
            reader: Some(reader),
        })
    }

    /// Re-fetch the AUM through the rate-limited path.
    ///
    /// The result goes to the active subscription's sink, if any, and is
    /// returned.
    pub async fn refresh_aum(&self, cancel: &CancellationToken) -> Result<AumUpdate, SyncError> {
        let update = self
            .gateway
            .compute_aum(&self.session, self.portfolio_id.as_deref(), cancel)
            .await?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let delivery = lock_slot(&self.active).clone();
        if let Some(delivery) = delivery {
            delivery.deliver(update.clone());
        }
        Ok(update)
    }
}

fn lock_slot(slot: &Slot) -> MutexGuard<'_, Option<Arc<Delivery>>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn release_slot(slot: &Slot, delivery: &Arc<Delivery>) {
    let mut slot = lock_slot(slot);
    if slot.as_ref().is_some_and(|d| Arc::ptr_eq(d, delivery)) {
        *slot = None;
    }
}

async fn read_pushes(
    mut stream: PushStream,
    delivery: Arc<Delivery>,
    gateway: Arc<PricingGateway>,
    subject_id: String,
    portfolio_id: Option<String>,
) {
    loop {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                warn!("Push transport failed: {}", e);
                delivery.fail(if matches!(e, SyncError::TransportFailure(_)) {
                    e
                } else {
                    SyncError::TransportFailure(e.to_string())
                });
                return;
            }
            None => {
                warn!("Push transport closed");
                delivery.fail(SyncError::TransportFailure(
                    "push channel closed".to_string(),
                ));
                return;
            }
        };

        if delivery.is_closed() {
            return;
        }

        match message {
            PushMessage::Aum { update } => {
                delivery.deliver(update);
            }
            PushMessage::PricesChanged { symbols } => {
                debug!("Prices changed for {} symbol(s), recomputing AUM", symbols.len());
                let recomputed = gateway
                    .calculator()
                    .compute_aum(&subject_id, portfolio_id.as_deref())
                    .await
                    .and_then(|update| {
                        gateway.validator().validate_aum(&update)?;
                        Ok(update)
                    });
                match recomputed {
                    Ok(update) => {
                        delivery.deliver(update);
                    }
                    Err(e) => {
                        warn!("AUM recomputation failed: {}", e);
                        delivery.fail(if matches!(e, SyncError::BackendFailure(_)) {
                            e
                        } else {
                            SyncError::BackendFailure(e.to_string())
                        });
                    }
                }
            }
        }
    }
}

/// Lifecycle token of one subscription.
///
/// Owns the transport connection. Unsubscribing, or dropping the handle,
/// closes it; no sink callback happens afterwards.
pub struct SubscriptionHandle {
    topic: String,
    delivery: Arc<Delivery>,
    slot: Slot,
    reader: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether pushes are still being delivered.
    pub fn is_active(&self) -> bool {
        !self.delivery.is_closed()
            && self
                .reader
                .as_ref()
                .is_some_and(|reader| !reader.is_finished())
    }

    pub fn unsubscribe(mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.delivery.close();
        if let Some(reader) = self.reader.take() {
            reader.abort();
            info!("Unsubscribed from '{}'", self.topic);
        }
        release_slot(&self.slot, &self.delivery);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .field("active", &self.is_active())
            .finish()
    }
}
