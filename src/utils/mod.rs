//! The `utils` module provides a collection of utility functions and common
//! definitions used across the miner.
//!
//! It centralizes the error taxonomy, logging setup and the reconnect
//! backoff policy so every module reports and retries the same way.

pub mod backoff;
pub mod error;
pub mod logging;
