//! Merkletree scan progress per (wallet, chain)

use serde::{Deserialize, Serialize};

use crate::{Chain, WalletId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    NotStarted,
    Scanning,
    Complete,
    Error,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// Which merkletree the engine is scanning
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanKind {
    Utxo,
    Txid,
}

/// Scan progress event delivered by the engine
///
/// Merkletree scans run per chain, so `wallet_id` is usually absent and the
/// update applies to every wallet scanning on `chain`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<WalletId>,
    pub chain: Chain,
    pub kind: ScanKind,
    pub status: ScanStatus,
    pub progress: f64,
}

/// Latest known scan state for one (wallet, chain) pair
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScanState {
    pub status: ScanStatus,
    /// In [0, 1], never decreases within one scan run
    pub progress: f64,
}

impl Default for ScanState {
    fn default() -> Self {
        Self {
            status: ScanStatus::NotStarted,
            progress: 0.0,
        }
    }
}

impl ScanState {
    /// Apply an engine update; returns the new state when it was accepted
    ///
    /// Progress never moves backwards within a run and COMPLETE pins it to
    /// 1.0. A SCANNING update after COMPLETE or ERROR starts a new run at
    /// the reported progress.
    pub fn apply(&mut self, status: ScanStatus, progress: f64) -> Option<ScanState> {
        let progress = if progress.is_finite() {
            progress.clamp(0.0, 1.0)
        } else {
            return None;
        };

        let next = match status {
            ScanStatus::Complete => ScanState {
                status,
                progress: 1.0,
            },
            ScanStatus::Error => ScanState {
                status,
                progress: self.progress,
            },
            ScanStatus::Scanning | ScanStatus::NotStarted => {
                if progress < self.progress && !self.status.is_terminal() {
                    return None;
                }
                ScanState {
                    status: ScanStatus::Scanning,
                    progress,
                }
            }
        };

        if next == *self {
            return None;
        }
        *self = next;
        Some(next)
    }
}
