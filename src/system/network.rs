//! Network status provider.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::config::ConnectionKind;

/// Read-only view of the device's connectivity.
pub trait NetworkStatus: Send + Sync {
    fn is_online(&self) -> bool;
    fn is_wifi(&self) -> bool;
}

/// Network provider reporting a settable connection kind.
///
/// The CLI seeds it from configuration; tests flip it between calls.
#[derive(Debug)]
pub struct StaticNetwork {
    kind: AtomicU8,
}

impl StaticNetwork {
    pub fn new(kind: ConnectionKind) -> Self {
        Self {
            kind: AtomicU8::new(encode(kind)),
        }
    }

    pub fn set(&self, kind: ConnectionKind) {
        self.kind.store(encode(kind), Ordering::SeqCst);
    }

    pub fn kind(&self) -> ConnectionKind {
        match self.kind.load(Ordering::SeqCst) {
            0 => ConnectionKind::Offline,
            1 => ConnectionKind::Cellular,
            _ => ConnectionKind::Wifi,
        }
    }
}

fn encode(kind: ConnectionKind) -> u8 {
    match kind {
        ConnectionKind::Offline => 0,
        ConnectionKind::Cellular => 1,
        ConnectionKind::Wifi => 2,
    }
}

impl NetworkStatus for StaticNetwork {
    fn is_online(&self) -> bool {
        self.kind() != ConnectionKind::Offline
    }

    fn is_wifi(&self) -> bool {
        self.kind() == ConnectionKind::Wifi
    }
}
