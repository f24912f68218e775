//! Component B (abstraction) — the Browser Provider (spec §1 item 2):
//! two interchangeable implementations that produce [`Handle`]s over a
//! live browser-wide CDP connection.

pub mod external;
pub mod supervisor;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::LogicError;
use crate::handle::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecycleResult {
    Recycled,
    Canceled,
    StandbyUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeoverReason {
    Recycle,
    Fault,
}

/// Shared contract of [`supervisor::SupervisorProvider`] and
/// [`external::ExternalProvider`] (spec §1 item 2, §4.E, §4.F).
#[async_trait]
pub trait Provider: Send + Sync {
    async fn start(self: &Arc<Self>) -> Result<(), LogicError>;
    async fn close(&self);
    async fn create_handle(&self) -> Option<Handle>;
}
