//! progress-sync - optimistic sync and progress rollups for a learning
//! dashboard
//!
//! This crate provides the core functionality for the `psync` CLI tool.
//!
//! # Architecture
//!
//! - [`gateway`] - Contract to the authoritative relational store, plus a REST client
//! - [`storage`] - SQLite implementation of the gateway with a change feed
//! - [`store`] - In-memory entity collections with revision watches
//! - [`sync`] - Schema-adaptive writes, optimistic mutations, realtime merges
//! - [`progress`] - Completion rollups for students and cohorts
//! - [`celebration`] - FIFO queue of reward popups with auto-dismiss
//! - [`context`] - Domain operations (students, submissions, rewards, ...)
//! - [`session`] - Identity scoping and session lifecycle
//! - [`alerts`] - User-facing messages raised by failed writes
//! - [`cli`] - Command-line interface using clap
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod alerts;
pub mod celebration;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod model;
pub mod progress;
pub mod session;
pub mod storage;
pub mod store;
pub mod sync;
pub mod validate;

pub use error::{Error, Result};
