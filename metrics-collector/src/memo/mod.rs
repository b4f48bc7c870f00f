//! Memoization of derived artifacts with in-flight deduplication.

mod cache;
mod staller;

pub use cache::MemoCache;
pub use staller::{signature, InFlight, StallOutcome, Staller};
