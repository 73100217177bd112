//! Censor Common - Shared types for the flow classification engine
//!
//! This crate provides the value types exchanged between the packet host
//! and the engine:
//! - Canonical flow keys (both directions of a connection share one key)
//! - A read-only packet view with transport metadata
//! - The three actions a host can enforce
//!
//! Header decoding and packet capture live in the host; nothing here parses
//! wire formats.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod flow;
pub mod packet;

pub use action::*;
pub use flow::*;
pub use packet::*;
