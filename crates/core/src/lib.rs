#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Shared models and pure logic for the parametric rainfall oracle.

/// Operator API request and response bodies.
pub mod api;
/// Pure trigger evaluation.
pub mod evaluate;
/// Canonical JSON and evidence hashing.
pub mod evidence;
/// Monitors, observations, evidence records and report payloads.
pub mod model;

mod util;

pub use util::{new_ulid, now_ms};
