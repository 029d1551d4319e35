//! Push delivery.
//!
//! - `transport` - Publish/subscribe transport abstraction and the in-memory broadcast transport
//! - `realtime` - AUM subscription with ordering and a closable lifecycle
//! - `sink` - Consumer callbacks

mod realtime;
mod sink;
mod transport;

pub use realtime::{aum_topic, RealtimeChannel, SubscriptionHandle};
pub use sink::{MockUpdateSink, NoOpUpdateSink, UpdateSink};
pub use transport::{BroadcastTransport, PushStream, PushTransport, DEFAULT_TOPIC_CAPACITY};
