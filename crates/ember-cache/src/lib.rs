//! Ember Cache
//!
//! This crate provides everything the engine needs from storage:
//! - The [`CacheBackend`] contract (get/put/exists/delete/list by
//!   namespace + key) with in-memory and directory-backed implementations
//! - Content [`Fingerprint`]s and the [`FingerprintStore`] that computes
//!   them for nodes and their dependency closures
//! - Persisted per-node [`Metadata`] records
//! - The per-run [`Inventory`] of cache listings
//!
//! The persistent storage engine itself is out of scope; `DirCache` is a
//! flat-file implementation of the contract, nothing more. All reads are
//! fail-safe: a corrupt entry is a cache miss, never a wrong answer.

mod backend;
mod dir;
mod error;
mod fingerprint;
mod inventory;
mod metadata;
mod store;

pub use backend::{CacheBackend, MemoryCache, namespace};
pub use dir::DirCache;
pub use error::CacheError;
pub use fingerprint::{Fingerprint, HashAlgorithm, normalize_source};
pub use inventory::Inventory;
pub use metadata::{Metadata, Timings};
pub use store::{FingerprintPair, FingerprintStore};
