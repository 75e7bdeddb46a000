//! # Notify Runtime Library
//!
//! Exposes the component container of the notification runtime for testing.
//! The main entry point is the `main.rs` binary.

pub mod container;

pub use container::{bus_client, BusKind, NotifyContainer, RuntimeConfig};
