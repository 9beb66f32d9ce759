//! Domain Layer - Core price types and business rules.
//!
//! This layer contains the price types, the realtime wire contract and the
//! subscription bookkeeping. No I/O happens here; all types are plain Rust
//! with serialization support.

/// Symbol sets, quotes and snapshots.
pub mod pricing;

/// Realtime channel messages.
pub mod realtime;

/// Realtime client filters and watched symbols.
pub mod subscription;
