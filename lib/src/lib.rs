//! # Static delta packaging for OSTree-based OTA updates
//!
//! This crate drives the external `ostree` tool to build a static delta
//! package between two commits of a repository: it fixes the machine ref,
//! resolves both ends of the delta, transfers the target commit out of a
//! separate update repository when one is used, and wraps the generated
//! artifacts together with a small metadata file into a single archive a
//! device can download and apply.

// See https://doc.rust-lang.org/rustc/lints/listing/allowed-by-default.html
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![forbid(unused_must_use)]
#![deny(unsafe_code)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::todo)]

pub mod cli;
mod delta;
mod error;
mod metadata;
mod package;
mod repo;
mod task;

pub use error::DeltaError;
