//! Core library: scanning, duplicate grouping, consolidation and statistics.

pub mod catalog;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod fs_ops;
pub mod hasher;
pub mod models;
pub mod output;
pub mod paths;
pub mod preview;
pub mod registry;
pub mod scanner;
pub mod service;
pub mod stats;
pub mod walker;

pub use error::{DedupeError, ErrorKind, Result};
pub use service::DedupeService;
