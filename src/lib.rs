//! fieldsync - offline-first sync engine for field-service data
//!
//! Local SQLite is the source of truth while offline. Every local write marks
//! its row pending; a sync cycle pushes pending rows to a remote record store
//! and pulls remote changes back, resolving conflicts last-write-wins.
//!
//! # Architecture
//!
//! - [`storage`] - SQLite database layer and schema migrations
//! - [`sync`] - Sync engine, status tracker and remote backends
//! - [`model`] - Syncable tables and sync status
//! - [`config`] - Configuration management
//! - [`cli`] - Command-line interface using clap
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod storage;
pub mod sync;

pub use error::{Error, Result};
