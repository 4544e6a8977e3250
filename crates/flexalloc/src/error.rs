// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! Error type shared by every flexalloc operation.

use thiserror::Error;

/// Errors returned by flexalloc operations.
///
/// I/O errors abort the current call but leave the [`Fs`](crate::Fs)
/// usable; `Corruption` detected at open aborts the open. All other
/// variants are local to the failing call and expose no partial
/// mutation.
#[derive(Debug, Error)]
pub enum Error {
    /// Block-device failure. Fatal to the current operation, not to the system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No pool or object with the given key.
    #[error("not found")]
    NotFound,

    /// Name collision with mismatched parameters.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// No free pool slots, no free slabs, or the slab object freelist is full.
    #[error("out of space")]
    OutOfSpace,

    /// Out-of-range offset, oversized stripe chunk, overlong name, and similar.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Pool or object handle whose identity hash no longer matches the stored entry.
    #[error("stale handle")]
    StaleHandle,

    /// Cache operation invoked in the wrong state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Resource still holds live allocations (e.g. destroying a pool with objects).
    #[error("busy: {0}")]
    Busy(&'static str),

    /// On-disk metadata failed a consistency check.
    #[error("metadata corruption: {0}")]
    Corruption(String),
}

impl Error {
    pub(crate) fn inval(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
