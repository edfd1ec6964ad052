//! Shared foundational types for the kiln kernel-compilation runtime.
//!
//! This crate provides the content digest type used for cache invalidation
//! across the runtime and its persistent compilation cache.

#![warn(missing_docs)]

pub mod digest;

pub use digest::Digest;
