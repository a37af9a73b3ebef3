//! Observability module for Token Guard.
//!
//! Provides metrics definitions and recording helpers.

pub mod metrics;
