//! shopsync Core - Shared types library.
//!
//! This crate provides common types used across all shopsync components:
//! - `client` - Session manager and optimistic resource stores
//! - `cli` - Terminal driver for a persistent storefront session
//! - `integration-tests` - In-memory API fake and behavior tests
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no HTTP
//! clients, no async runtime. This keeps it lightweight and allows it to be
//! used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, prices, emails, item
//!   statuses, and the canonical user profile

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
