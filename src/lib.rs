//! Genflow: Content Generation Lifecycles and Scheduling
//!
//! A lifecycle state machine that drives one generation request (text, image or
//! video) through validation, prompt preparation and execution, and a priority
//! scheduler that runs many of them with bounded concurrency, priority aging,
//! retries and a shared rate-limit backoff.

pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod lifecycle;
pub mod logging;
pub mod provider;
pub mod queue;
pub mod types;
