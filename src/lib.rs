//! Board synchronization core for a collaborative whiteboard.
//!
//! ARCHITECTURE
//! ============
//! Each client mounts a `SessionHandle` per open board. The session keeps
//! the local scene graph, debounces local edits into whole-document saves,
//! merges snapshots pushed by the store with per-element last-writer-wins,
//! and publishes throttled cursor presence. Storage sits behind the
//! `BoardStore` contract: `MemoryStore` in-process, `PgBoardStore` on
//! Postgres.

pub mod config;
pub mod db;
pub mod error;
pub mod scene;
pub mod services;
pub mod state;
pub mod store;

pub use config::SyncConfig;
pub use error::ErrorCode;
pub use scene::{BinaryFile, ElementKind, SceneDocument, SceneElement, WriteTag};
pub use services::session::{AddImage, LocalUser, SceneView, SessionDeps, SessionError, SessionHandle, SessionPhase, SyncSession};
pub use store::{BoardDirectory, BoardStore, MemoryStore, StoreError};
