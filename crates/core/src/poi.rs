//! Proof-of-innocence bookkeeping

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Pending-spent and spendable-received txids for one wallet and txid version
///
/// A txid only ever moves from pending to spendable, never back.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoiStatus {
    pub pending_spent: BTreeSet<String>,
    pub spendable_received: BTreeSet<String>,
}

impl PoiStatus {
    pub fn new<P, S>(pending_spent: P, spendable_received: S) -> Self
    where
        P: IntoIterator<Item = String>,
        S: IntoIterator<Item = String>,
    {
        let spendable_received: BTreeSet<String> = spendable_received.into_iter().collect();
        let pending_spent = pending_spent
            .into_iter()
            .filter(|txid| !spendable_received.contains(txid))
            .collect();
        Self {
            pending_spent,
            spendable_received,
        }
    }

    /// Fold a freshly fetched status into this one
    ///
    /// Spendable txids accumulate. Pending becomes the fetched pending set
    /// minus anything already spendable.
    pub fn merge(&mut self, fetched: PoiStatus) {
        self.spendable_received.extend(fetched.spendable_received);
        self.pending_spent = fetched
            .pending_spent
            .into_iter()
            .filter(|txid| !self.spendable_received.contains(txid))
            .collect();
    }

    pub fn is_empty(&self) -> bool {
        self.pending_spent.is_empty() && self.spendable_received.is_empty()
    }
}
