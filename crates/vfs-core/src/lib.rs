//! Reusable engine behind cloud object/photo storage VFS adapters.
//!
//! `vfs-core` owns the provider-agnostic plumbing — a retry/rate-limit
//! pacer, an HTTP call pipeline built on it, a directory path cache, a
//! hierarchical content hash, a finalize-call batcher, a shared download
//! cache, a chunked upload engine, a path-pattern router, and a
//! duplicate-aware album index — and the [`vfs`] module ties them together
//! behind one abstract filesystem contract. Adapters implement the
//! provider-specific backend traits each module exposes and compose their
//! own concrete `Fs`/`Object`/`FsHandle` from these pieces.

pub mod album;
pub mod batcher;
pub mod config;
pub mod dircache;
pub mod download;
pub mod error;
pub mod hash;
pub mod http;
pub mod pacer;
pub mod router;
pub mod upload;
pub mod vfs;

pub use error::{Error, Result};
