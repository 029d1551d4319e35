use serde::{Deserialize, Serialize};

use super::AumUpdate;

/// Event published on a push topic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// A freshly computed AUM, applied as-is.
    Aum { update: AumUpdate },

    /// Market prices changed for the listed symbols; AUM must be recomputed.
    PricesChanged {
        #[serde(default)]
        symbols: Vec<String>,
    },
}
