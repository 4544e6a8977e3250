// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! # flexalloc - object-storage allocator for raw block devices
//!
//! flexalloc exposes a flat space of coarse *objects* grouped into named
//! *pools*, each pool dictating one uniform object size. Objects are
//! drawn from fixed-size *slabs* carved out of the device; a slab serves
//! one pool at a time. All control state persists in a dedicated
//! metadata region (optionally on a separate metadata device); object
//! data is never cached.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flexalloc::{mkfs, Fs, MkfsParams, OpenOpts, PoolCreateArgs};
//!
//! fn main() -> flexalloc::Result<()> {
//!     mkfs(&MkfsParams {
//!         dev_uri: "/dev/nvme0n1".into(),
//!         slab_nlb: 4000,
//!         npools: 8,
//!         ..MkfsParams::default()
//!     })?;
//!
//!     let mut fs = Fs::open(&OpenOpts::new("/dev/nvme0n1"))?;
//!     let pool = fs.pool_create(&PoolCreateArgs::new("my-pool", 16))?;
//!     let obj = fs.object_create(&pool)?;
//!
//!     let data = vec![0xaa; 8192];
//!     fs.object_write(&pool, &obj, &data, 0)?;
//!     fs.close()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +------------------------------------------------------------------+
//! |                        Facade (Fs)                               |
//! |        open / close / sync, pool + object operations             |
//! +------------------------------------------------------------------+
//! | Pool manager | Slab manager | Object engine (striping, zones)    |
//! +------------------------------------------------------------------+
//! | Bit freelist | Robin Hood hash table | Slab freelist cache       |
//! +------------------------------------------------------------------+
//! | Command-set adapter (conventional/zoned) | Data placement (FDP)  |
//! +------------------------------------------------------------------+
//! |              Block device abstraction (file / zoned)             |
//! +------------------------------------------------------------------+
//! ```
//!
//! ## Concurrency
//!
//! An [`Fs`] has a single logical owner: mutating operations take
//! `&mut self` and must be serialized by the caller. Concurrent reads of
//! already-opened objects are safe. The only internal fan-out is striped
//! I/O, which joins all sub-requests before returning. Metadata becomes
//! durable on [`Fs::sync`] or [`Fs::close`], never implicitly.

/// Bit-twiddling primitives shared by the freelist code.
pub mod bits;
/// Command-set adapter: conventional vs. zoned device behaviour.
mod cs;
/// Block-device abstraction and its file-backed implementations.
pub mod device;
/// Data-placement adapter (flexible data placement hints).
mod dp;
mod error;
/// Packed bit freelists (pool slots and per-slab object maps).
pub mod freelist;
mod fs;
/// Disk geometry derivation.
pub mod geo;
/// Robin Hood hash table mapping pool names to entries.
pub mod hash;
/// Consistency checks used by `flexalloc-inspect` and tests.
pub mod introspect;
mod mkfs;
mod object;
/// On-disk record layouts (super block, pool entries, slab headers).
pub mod ondisk;
mod pool;
mod slab;
mod slabcache;

pub use device::{BlockDevice, DeviceKind, IoBuf, WriteHints};
pub use dp::{DpConfig, FdpBinding};
pub use error::{Error, Result};
pub use fs::{Fs, OpenOpts};
pub use mkfs::{mkfs, MkfsParams};
pub use object::ObjectHandle;
pub use pool::{PoolCreateArgs, PoolHandle, RootSetFlags};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
