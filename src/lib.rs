//! `fuzzer_core` — the web-request fuzzing engine.
//!
//! This crate implements the load-bearing core of an "Intruder"-style
//! request fuzzer: expanding a request template against payload sets
//! ([`expansion`]), executing the resulting corpus against a target host
//! ([`executor`]) under the supervision of a cancellable, crash-recoverable
//! job state machine ([`job`]), and scanning the results for common
//! vulnerability signals ([`analysis`]).
//!
//! The HTTP API surface, identity/credential issuance, and persistence
//! backends beyond the in-memory defaults are deliberately out of scope;
//! [`service::FuzzerService`] is the trait boundary a future server crate
//! would adapt into JSON routes.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod error;
pub mod executor;
pub mod expansion;
pub mod job;
pub mod logging;
pub mod parser;
pub mod service;

pub use error::{Error, ErrorKind, Result};
