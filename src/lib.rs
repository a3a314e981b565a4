//! Offline-first capture and synchronization of geological drilling records.
//!
//! The local store tracks every write, the sync engine moves dirty rows to
//! the server and pulls server changes back, and the workflow engine drives
//! records through review.

pub mod config;
pub mod db;
pub mod models;
pub mod server;
pub mod sync;
pub mod validation;
pub mod workflow;
