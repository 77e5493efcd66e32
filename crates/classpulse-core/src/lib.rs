//! # ClassPulse Core
//!
//! Shared types, traits, and the deterministic conversation logic for the
//! ClassPulse instructor assistant. This crate is the foundation — the hub
//! and server crates depend on it.

pub mod config;
pub mod dataset;
pub mod error;
pub mod intent;
pub mod message;
pub mod provider;
pub mod resolver;
pub mod session;
pub mod store;
