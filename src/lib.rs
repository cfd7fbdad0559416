//! Workspace placeholder crate.
//!
//! This crate exposes shared feature flags that map to the individual
//! workspace crates (`core-service`, `core-cache`, `core-sync`,
//! `core-realtime`). Host applications can depend on `client-core-workspace`
//! and enable the documented features without wiring each crate individually.

#[cfg(feature = "core")]
pub use core_service::*;
