//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod conventional;
pub mod policy;
pub mod score;
pub mod spec_id;
pub mod types;
