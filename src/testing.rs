//! Testing utilities for dataset trees.
//!
//! This module provides the fixtures and assertions the crate's own tests use,
//! for end-users who want to test their maps, sketches and control messages the
//! same way:
//!
//! - **Fixtures**: small maps, sketches and control messages over `i64` leaves,
//!   plus [`hosted`] to put a tree behind an in-process remote service
//! - **Assertions**: progress convergence and monoid laws
//!
//! # Quick Start
//!
//! ```
//! use ironfan::testing::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let tree = int_leaves(&[2, 3, 5]);
//! assert_eq!(tree.blocking_sketch(SumSketch)?, 10);
//!
//! let doubled = tree.blocking_map(ScaleMap { factor: 2 })?;
//! assert_eq!(doubled.blocking_sketch(SumSketch)?, 20);
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;
