//! Sync services: the pieces a mounted board session is assembled from.
//!
//! ARCHITECTURE
//! ============
//! `session` is the orchestrator. It owns one `debounce` worker (outbound
//! scene saves), one `presence` throttle (outbound cursor writes) and runs
//! inbound snapshots through `merge`. `assets` materializes image bytes
//! for merged and inserted elements, and `color` gives every collaborator
//! a stable color.

pub mod assets;
pub mod color;
pub mod debounce;
pub mod merge;
pub mod presence;
pub mod session;
