#![doc = include_str!("../README.md")]
//! # Internals
//!
//! The crate is organized leaves-first:
//!
//! -   `node`: node layout (data nodes, marker nodes and the head
//!     sentinel), plus the tower constants [`MAX_LEVEL`] and [`P`].
//! -   `rng`: geometric tower-height sampling from per-thread generator
//!     state.
//! -   `traverse`: the level-wise descent (`find`) that returns
//!     predecessor/successor snapshots and cooperatively unlinks dead
//!     nodes.
//! -   `ops`: the insert and delete protocols built on those snapshots.
//! -   `iter`: forward cursors with lower-bound seek.
//! -   [`metrics`]: sharded counters and the metric keys fed to the
//!     `metrics` facade.

mod iter;
mod map;
mod node;
mod ops;
mod rng;
mod traverse;

pub mod metrics;

#[cfg(test)]
pub(crate) mod hooks;

pub use crate::iter::Iter;
pub use crate::map::SkipListMap;
pub use crate::metrics::CasStats;
pub use crate::node::{MAX_LEVEL, P};
