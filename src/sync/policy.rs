//! Download policy gate.
//!
//! Picks exactly one outcome for a download request from network status, free
//! storage, the learner's Wi-Fi preference and the requested size. Rules are
//! evaluated in a fixed order and the first match wins:
//!
//! 1. retry of failed blocks: [`PolicyDecision::BlockFailedRetry`]
//! 2. everything already downloaded: [`PolicyDecision::ConfirmRemoval`]
//! 3. offline: [`PolicyDecision::BlockNoConnection`]
//! 4. free storage below `size * download_size_factor`: [`PolicyDecision::BlockStorage`]
//! 5. Wi-Fi only and not on Wi-Fi: [`PolicyDecision::BlockWifiRequired`]
//! 6. not on Wi-Fi: [`PolicyDecision::WarnCellular`]
//! 7. size at or above `max_cellular_size`: [`PolicyDecision::Confirm`]
//! 8. otherwise [`PolicyDecision::ProceedSilently`]

use std::fmt;

use serde::Serialize;

use crate::config::PolicyConfig;
use crate::error::{Error, Result};
use crate::system::{FreeStorage, NetworkStatus};

/// One line of a dialog: a container title and its byte size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialogItem {
    pub title: String,
    pub size_bytes: u64,
}

impl DialogItem {
    pub fn new(title: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            title: title.into(),
            size_bytes,
        }
    }
}

/// What a dialog shows for a decision.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DialogPayload {
    pub items: Vec<DialogItem>,
    pub total_bytes: u64,
    /// Free device storage, set when storage was the deciding factor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_bytes: Option<u64>,
}

impl DialogPayload {
    pub fn new(items: Vec<DialogItem>) -> Self {
        let total_bytes = items.iter().map(|i| i.size_bytes).sum();
        Self {
            items,
            total_bytes,
            free_bytes: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Download,
    /// Re-request of blocks whose earlier download failed.
    Retry,
}

/// Input to [`PolicyGate::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionRequest {
    pub kind: RequestKind,
    pub items: Vec<DialogItem>,
    /// Every requested leaf is already DOWNLOADED.
    pub all_downloaded: bool,
}

impl DecisionRequest {
    pub fn download(items: Vec<DialogItem>, all_downloaded: bool) -> Self {
        Self {
            kind: RequestKind::Download,
            items,
            all_downloaded,
        }
    }

    pub fn retry(items: Vec<DialogItem>) -> Self {
        Self {
            kind: RequestKind::Retry,
            items,
            all_downloaded: false,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.items.iter().map(|i| i.size_bytes).sum()
    }
}

/// Outcome of the policy gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    ProceedSilently,
    Confirm(DialogPayload),
    WarnCellular(DialogPayload),
    BlockStorage(DialogPayload),
    BlockWifiRequired(DialogPayload),
    BlockNoConnection(DialogPayload),
    /// The earlier download failed; retry is still offered.
    BlockFailedRetry(DialogPayload),
    ConfirmRemoval(DialogPayload),
}

impl PolicyDecision {
    pub fn payload(&self) -> Option<&DialogPayload> {
        match self {
            PolicyDecision::ProceedSilently => None,
            PolicyDecision::Confirm(p)
            | PolicyDecision::WarnCellular(p)
            | PolicyDecision::BlockStorage(p)
            | PolicyDecision::BlockWifiRequired(p)
            | PolicyDecision::BlockNoConnection(p)
            | PolicyDecision::BlockFailedRetry(p)
            | PolicyDecision::ConfirmRemoval(p) => Some(p),
        }
    }

    /// Hard blockers that cannot go ahead as things stand.
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            PolicyDecision::BlockStorage(_)
                | PolicyDecision::BlockWifiRequired(_)
                | PolicyDecision::BlockNoConnection(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            PolicyDecision::ProceedSilently => "proceed",
            PolicyDecision::Confirm(_) => "confirm",
            PolicyDecision::WarnCellular(_) => "warn-cellular",
            PolicyDecision::BlockStorage(_) => "block-storage",
            PolicyDecision::BlockWifiRequired(_) => "block-wifi-required",
            PolicyDecision::BlockNoConnection(_) => "block-no-connection",
            PolicyDecision::BlockFailedRetry(_) => "block-failed-retry",
            PolicyDecision::ConfirmRemoval(_) => "confirm-removal",
        }
    }
}

impl fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The ordered download rules.
#[derive(Debug, Clone)]
pub struct PolicyGate {
    config: PolicyConfig,
}

impl PolicyGate {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Free bytes needed to download `total_bytes`.
    pub fn required_space(&self, total_bytes: u64) -> u64 {
        total_bytes.saturating_mul(self.config.download_size_factor)
    }

    /// Decide a request. Network and storage are queried on every call.
    pub fn decide(
        &self,
        request: &DecisionRequest,
        network: &dyn NetworkStatus,
        storage: &dyn FreeStorage,
        wifi_only: bool,
    ) -> PolicyDecision {
        let mut payload = DialogPayload::new(request.items.clone());
        let total = payload.total_bytes;

        let decision = if request.kind == RequestKind::Retry {
            PolicyDecision::BlockFailedRetry(payload)
        } else if request.all_downloaded {
            PolicyDecision::ConfirmRemoval(payload)
        } else if !network.is_online() {
            PolicyDecision::BlockNoConnection(payload)
        } else {
            let free = storage.free_bytes();
            if free < self.required_space(total) {
                payload.free_bytes = Some(free);
                PolicyDecision::BlockStorage(payload)
            } else if !network.is_wifi() {
                if wifi_only {
                    PolicyDecision::BlockWifiRequired(payload)
                } else {
                    PolicyDecision::WarnCellular(payload)
                }
            } else if total >= self.config.max_cellular_size {
                PolicyDecision::Confirm(payload)
            } else {
                PolicyDecision::ProceedSilently
            }
        };

        tracing::debug!("Policy decision for {} bytes: {}", total, decision);
        decision
    }

    /// Re-check the hard blockers right before a confirmed download starts.
    pub fn preflight(
        &self,
        total_bytes: u64,
        network: &dyn NetworkStatus,
        storage: &dyn FreeStorage,
        wifi_only: bool,
    ) -> Result<()> {
        if !network.is_online() {
            return Err(Error::NoConnection);
        }

        let required = self.required_space(total_bytes);
        let available = storage.free_bytes();
        if available < required {
            return Err(Error::InsufficientStorage {
                required,
                available,
            });
        }

        if wifi_only && !network.is_wifi() {
            return Err(Error::WifiRequired);
        }

        Ok(())
    }
}
