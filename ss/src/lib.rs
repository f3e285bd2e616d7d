//! SharedStore - the persistent key-value medium coordination runs over
//!
//! Independent execution contexts coordinate through a single shared store
//! plus a push channel that tells every *other* context about mutations.
//! This crate defines that contract ([`SharedStore`]) and ships an
//! in-process reference implementation ([`MemoryStore`]) used by tests and
//! demos.
//!
//! The contract is deliberately minimal: `get`/`set`/`remove` with no
//! transactions, a subscription stream of [`ChangeEvent`]s, and a
//! capability probe. Delivery of a writer's own mutations back to itself is
//! not part of the contract (mirroring the DOM storage-event behavior the
//! protocol was designed against).

mod memory;
mod store;

pub use memory::{MemoryHandle, MemoryStore};
pub use store::{Capability, ChangeEvent, SharedStore, StoreError};
