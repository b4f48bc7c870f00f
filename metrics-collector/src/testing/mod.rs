//! Testing utilities for metrics pipelines.
//!
//! This module provides:
//! - Fake extract and load components
//! - Progress reporters that record or fail
//! - A sample Daily Metrics Document

mod fakes;
mod fixtures;

pub use fakes::{FailingProgress, RecordingProgress, StaticExtract, StaticGraphLoader};
pub use fixtures::{sample_document, sample_schedule};
