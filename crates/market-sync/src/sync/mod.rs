//! Consumer-side synchronization.
//!
//! - `controller` - Actor keeping one value fresh (AumSync, PriceSync)
//! - `sources` - What a controller fetches and subscribes to
//! - `view` - State published to readers

mod controller;
mod sources;
mod view;

pub use controller::{AumSync, PriceSync, SyncController};
pub use sources::{AumSource, Fetched, PriceSource, SyncSource};
pub use view::{SyncPhase, SyncView};
