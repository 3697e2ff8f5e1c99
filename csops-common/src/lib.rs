//! # CS Ops Common Library
//!
//! Shared code for the CS Ops service crates:
//! - Error type and configuration loading
//! - Database initialization and schema
//! - Event bus for notification fan-out
//! - Domain rules: access control, delivery workflow, health scoring,
//!   survey scoring, onboarding sequencing, diagnostic answers
//! - Token, password and webhook signature handling
//!
//! Nothing in here depends on the HTTP framework. The server crate wraps
//! these with axum handlers and extractors.

pub mod access;
pub mod auth;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod delivery;
pub mod diagnostic;
pub mod error;
pub mod events;
pub mod health;
pub mod onboarding;
pub mod survey;
pub mod time;
pub mod webhook;

pub use access::{Principal, Role};
pub use error::{Error, Result};
