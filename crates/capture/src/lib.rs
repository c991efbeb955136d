//! Hookwell ingestion-and-accounting core
//!
//! Accepts webhook traffic at high concurrency, answers quota questions
//! without touching the write path, and reconciles denormalized counters
//! and data retention through a durable deferred-task queue.
//!
//! The synchronous capture path never performs a read-modify-write on a
//! shared row: counter updates are enqueued as deferred tasks and applied
//! as independently-atomic additive patches, so burst traffic against one
//! user degrades to a backlog of cheap sequential patches instead of a
//! storm of optimistic-concurrency conflicts.

pub mod account;
pub mod accounting;
pub mod error;
pub mod oracle;
pub mod period;
pub mod pipeline;
pub mod reaper;
pub mod reconcile;
pub mod retention;
pub mod tasks;
pub mod validate;

pub use account::{AccountDeleter, DeletePhase};
pub use accounting::Accountant;
pub use error::{CaptureError, CaptureResult};
pub use oracle::{QuotaOracle, QuotaPlan, QuotaSnapshot};
pub use period::{PeriodActivator, PeriodCheck};
pub use pipeline::{BatchCaptureItem, CaptureInput, CaptureOutcome, CapturePipeline};
pub use reaper::ExpiryReaper;
pub use reconcile::PeriodReconciler;
pub use retention::RetentionSweeper;
pub use tasks::{Task, TaskQueue, TaskRunner};
