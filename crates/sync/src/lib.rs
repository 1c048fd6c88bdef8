//! Mirror synchronisation.
//!
//! One run takes two snapshots (the remote listing and the mirror listing),
//! then visits every remote file in name order: probe it, compare against
//! what the mirror recorded last time, and transfer it if anything differs.
//! Mirrored objects with no remote counterpart are deleted afterwards when
//! enabled.
//!
//! The primary entry point is [`sync`], which streams [`SyncEvent`]s as the
//! run progresses; [`run`] drains that stream, logging each event, and
//! returns the final [`Summary`].
//!
//! Nothing is retried and nothing is rolled back: the first failure ends
//! the run, leaving whatever was already transferred or deleted in place.
//! The next run recomputes everything from scratch and picks up from there.

mod decision;
pub mod error;
mod stream;

pub use self::decision::{Decision, StaleAction, TransferReason, decide};
pub use self::stream::{Summary, SyncEvent, SyncOptions, run, sync};
