//! # Parcelock Common Library
//!
//! Shared code for the parcelock locker service:
//! - Error types
//! - Layered configuration loading (CLI → ENV → TOML → defaults)
//! - Database initialization for the tag record store

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
