use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Versioned;

/// Assets-under-management aggregate for one subject.
///
/// Owned by whichever controller requested it. Never mutated after
/// construction; a newer update replaces it wholesale.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AumUpdate {
    pub total_aum: Decimal,

    pub total_aum_base_currency: Decimal,

    pub base_currency: String,

    /// Value per asset class (equity, bond, cash, ...)
    #[serde(default)]
    pub asset_class_breakdown: HashMap<String, Decimal>,

    /// Weight of each portfolio in the total, by portfolio id
    #[serde(default)]
    pub portfolio_weights: HashMap<String, Decimal>,

    pub daily_change: Decimal,

    pub daily_change_percent: Decimal,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annual_return: Option<Decimal>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_to_date_return: Option<Decimal>,

    pub last_updated: DateTime<Utc>,

    pub holdings_count: u32,
}

impl AumUpdate {
    /// Update for a subject without holdings.
    pub fn empty(base_currency: impl Into<String>, last_updated: DateTime<Utc>) -> Self {
        Self {
            total_aum: Decimal::ZERO,
            total_aum_base_currency: Decimal::ZERO,
            base_currency: base_currency.into(),
            asset_class_breakdown: HashMap::new(),
            portfolio_weights: HashMap::new(),
            daily_change: Decimal::ZERO,
            daily_change_percent: Decimal::ZERO,
            annual_return: None,
            year_to_date_return: None,
            last_updated,
            holdings_count: 0,
        }
    }
}

impl Versioned for AumUpdate {
    fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }
}
