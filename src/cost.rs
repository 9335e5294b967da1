use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostTotals {
    pub total_cost: f64,
    pub total_tokens: u64,
}

/// Running cost/token totals shared by every component of a session.
///
/// Increments arrive from concurrently completing calls, so the totals live
/// behind a mutex. Malformed amounts (NaN, infinities, negatives) count as zero.
#[derive(Debug, Default)]
pub struct CostLedger {
    totals: Mutex<CostTotals>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cost(&self, amount: f64, tokens: Option<u64>) {
        let amount = if amount.is_finite() && amount > 0.0 {
            amount
        } else {
            0.0
        };
        let tokens = tokens.unwrap_or(0);

        let mut totals = self.lock();
        totals.total_cost += amount;
        totals.total_tokens = totals.total_tokens.saturating_add(tokens);
    }

    pub fn totals(&self) -> CostTotals {
        *self.lock()
    }

    pub fn reset(&self) {
        *self.lock() = CostTotals::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CostTotals> {
        // A poisoned ledger still holds valid totals.
        self.totals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
