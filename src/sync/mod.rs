//! Synchronization module.
//!
//! This module provides:
//! - The state aggregator (block states, course rollups, size accounting)
//! - The download policy gate
//! - The request façade tying everything together

pub mod aggregator;
pub mod facade;
pub mod policy;

pub use aggregator::{
    apply_hysteresis, roll_up, CourseSnapshot, LargeDownload, SizeAccount, StateAggregator,
    StructureEvent, SyncSnapshot,
};
pub use facade::{CancelTarget, Decision, OfflineSync, RemovalTarget, SyncServices};
pub use policy::{DecisionRequest, DialogItem, DialogPayload, PolicyDecision, PolicyGate, RequestKind};
