//! Trigger-independent business logic.
//!
//! Each handler takes its store explicitly and returns a typed report or
//! error. Logging the outcome is left to the trigger adapters in
//! `crate::triggers`.

pub mod aggregate;
pub mod ingest;

pub use ingest::SENSOR_COUNT;
