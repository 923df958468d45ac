//! Core types, errors, and utilities for otf-reader.
//!
//! This crate provides the foundational types used across the workspace:
//!
//! - [`ReaderSettings`] / [`ReaderConfig`] - raw settings and the validated,
//!   immutable configuration built from them
//! - [`InputFormat`], [`AlignMethod`], [`LevelMethod`], [`Capability`] - the
//!   processing tags a reader stamps onto its output
//! - [`Envelope`] and [`Meta`] - the JSON unit published to the broker
//! - [`ConfigError`], [`ConfigErrors`], [`EnvelopeError`]
//!
//! # Crate Dependencies
//!
//! ```text
//! otf-cli ──► otf-reader ──► otf-watcher ──► otf-core
//!                      └──────────────────────►
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod envelope;
pub mod error;
pub mod ident;

pub use config::{
    AlignMethod, BrokerConfig, Capability, InputFormat, LevelMethod, ReaderConfig,
    ReaderSettings, WatchConfig,
};
pub use envelope::{Envelope, Meta};
pub use error::{ConfigError, ConfigErrors, EnvelopeError};
pub use ident::{generate_id, generate_name, is_valid_topic};
