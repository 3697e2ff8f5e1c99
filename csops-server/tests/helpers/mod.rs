//! Test helper modules for csops-server integration tests
//!
//! - TestServer: router over an in-memory database
//! - Seeded accounts for each role

#![allow(dead_code)]

pub mod test_server;

pub use test_server::{Seed, TestServer, CALCOM_SECRET, CALENDLY_KEY};
