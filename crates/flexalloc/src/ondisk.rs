// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! On-disk record layouts.
//!
//! Every record is encoded field by field in little-endian byte order;
//! nothing is memory-mapped or transmuted. The metadata region is laid
//! out as:
//!
//! ```text
//! +--------------------------------------------------------------+
//! | super block (md_nlb blocks)                                  |
//! +--------------------------------------------------------------+
//! | pool freelist | pool hash table (hdr + slots) | pool entries |
//! +--------------------------------------------------------------+
//! | slab headers ........................ | count | head | tail  |
//! +--------------------------------------------------------------+
//! ```

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Magic tag in the super block ("!FS\0" little-endian).
pub const MAGIC: u32 = 0x0053_4621;

/// Current on-disk format version.
pub const FMT_VERSION: u32 = 1;

/// Size of the encoded super block.
pub const SUPER_BYTES: usize = 24;

/// Fixed size of one pool entry record.
pub const POOL_ENTRY_BYTES: usize = 512;

/// Size of one slab header record.
pub const SLAB_HEADER_BYTES: usize = 20;

/// Bytes of the free-slab `count`/`head`/`tail` words trailing the slab segment.
pub const SLAB_LIST_WORDS_BYTES: usize = 12;

/// Maximum pool-name length including the terminating NUL.
pub const POOL_NAME_BYTES: usize = 112;

/// Sentinel for an unset root-object handle.
pub const ROOT_OBJ_NONE: u64 = u64::MAX;

/// Null link in the slab lists.
pub const LIST_NULL: u32 = i32::MAX as u32;

/// Pool-entry flag: objects are striped across sub-objects.
pub const POOL_FLAG_STRIPED: u64 = 1;

/// Super block, written once by mkfs and read-only afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Super {
    pub nslabs: u32,
    pub slab_nlb: u32,
    pub npools: u32,
    pub md_nlb: u32,
}

impl Super {
    pub fn write(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..], MAGIC);
        LittleEndian::write_u32(&mut buf[4..], FMT_VERSION);
        LittleEndian::write_u32(&mut buf[8..], self.nslabs);
        LittleEndian::write_u32(&mut buf[12..], self.slab_nlb);
        LittleEndian::write_u32(&mut buf[16..], self.npools);
        LittleEndian::write_u32(&mut buf[20..], self.md_nlb);
    }

    /// Decode and validate a super block read from LBA 0.
    pub fn read(buf: &[u8]) -> Result<Self> {
        let magic = LittleEndian::read_u32(&buf[0..]);
        if magic != MAGIC {
            return Err(Error::Corruption(format!(
                "bad super-block magic {magic:#010x}, expected {MAGIC:#010x}"
            )));
        }
        let version = LittleEndian::read_u32(&buf[4..]);
        if version != FMT_VERSION {
            return Err(Error::Corruption(format!(
                "unsupported format version {version}"
            )));
        }
        Ok(Super {
            nslabs: LittleEndian::read_u32(&buf[8..]),
            slab_nlb: LittleEndian::read_u32(&buf[12..]),
            npools: LittleEndian::read_u32(&buf[16..]),
            md_nlb: LittleEndian::read_u32(&buf[20..]),
        })
    }
}

/// One pool slot, 512 bytes on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    /// Heads of the per-state slab lists.
    pub empty_slabs: u32,
    pub full_slabs: u32,
    pub partial_slabs: u32,
    /// Object size in logical blocks. All objects of a pool share it.
    pub obj_nlb: u32,
    /// Objects that fit into one slab, precomputed at pool creation.
    pub slab_nobj: u32,
    /// Stripe width in objects (meaningful when the striped flag is set).
    pub strp_nobjs: u32,
    /// Stripe chunk size in bytes.
    pub strp_nbytes: u32,
    pub flags: u64,
    /// Opaque root-object handle, [`ROOT_OBJ_NONE`] when unset.
    pub root_obj: u64,
    /// NUL-terminated name.
    pub name: [u8; POOL_NAME_BYTES],
}

impl Default for PoolEntry {
    fn default() -> Self {
        PoolEntry {
            empty_slabs: LIST_NULL,
            full_slabs: LIST_NULL,
            partial_slabs: LIST_NULL,
            obj_nlb: 0,
            slab_nobj: 0,
            strp_nobjs: 0,
            strp_nbytes: 0,
            flags: 0,
            root_obj: ROOT_OBJ_NONE,
            name: [0; POOL_NAME_BYTES],
        }
    }
}

impl PoolEntry {
    #[must_use]
    pub fn striped(&self) -> bool {
        self.flags & POOL_FLAG_STRIPED != 0
    }

    /// Sub-objects backing one handed-out object: stripe width, or 1.
    #[must_use]
    pub fn num_backing_objs(&self) -> u32 {
        if self.striped() {
            self.strp_nobjs
        } else {
            1
        }
    }

    /// Name as a str, up to the first NUL.
    #[must_use]
    pub fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = [0; POOL_NAME_BYTES];
        self.name[..name.len()].copy_from_slice(name.as_bytes());
    }

    pub fn write(&self, buf: &mut [u8]) {
        buf[..POOL_ENTRY_BYTES].fill(0);
        LittleEndian::write_u32(&mut buf[0..], self.empty_slabs);
        LittleEndian::write_u32(&mut buf[4..], self.full_slabs);
        LittleEndian::write_u32(&mut buf[8..], self.partial_slabs);
        LittleEndian::write_u32(&mut buf[12..], self.obj_nlb);
        LittleEndian::write_u32(&mut buf[16..], self.slab_nobj);
        LittleEndian::write_u32(&mut buf[20..], self.strp_nobjs);
        LittleEndian::write_u32(&mut buf[24..], self.strp_nbytes);
        LittleEndian::write_u64(&mut buf[32..], self.flags);
        LittleEndian::write_u64(&mut buf[40..], self.root_obj);
        buf[48..48 + POOL_NAME_BYTES].copy_from_slice(&self.name);
    }

    #[must_use]
    pub fn read(buf: &[u8]) -> Self {
        let mut name = [0u8; POOL_NAME_BYTES];
        name.copy_from_slice(&buf[48..48 + POOL_NAME_BYTES]);
        PoolEntry {
            empty_slabs: LittleEndian::read_u32(&buf[0..]),
            full_slabs: LittleEndian::read_u32(&buf[4..]),
            partial_slabs: LittleEndian::read_u32(&buf[8..]),
            obj_nlb: LittleEndian::read_u32(&buf[12..]),
            slab_nobj: LittleEndian::read_u32(&buf[16..]),
            strp_nobjs: LittleEndian::read_u32(&buf[20..]),
            strp_nbytes: LittleEndian::read_u32(&buf[24..]),
            flags: LittleEndian::read_u64(&buf[32..]),
            root_obj: LittleEndian::read_u64(&buf[40..]),
            name,
        }
    }
}

/// Per-slab header in the slab segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabHeader {
    /// Index of the owning pool entry (meaningful while acquired).
    pub pool: u32,
    /// Doubly-linked list neighbours, [`LIST_NULL`] terminated.
    pub prev: u32,
    pub next: u32,
    /// Objects currently allocated from the slab.
    pub refcount: u32,
    /// Objects that fit, given the owning pool's object size.
    pub maxcount: u32,
}

impl SlabHeader {
    pub fn write(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..], self.pool);
        LittleEndian::write_u32(&mut buf[4..], self.prev);
        LittleEndian::write_u32(&mut buf[8..], self.next);
        LittleEndian::write_u32(&mut buf[12..], self.refcount);
        LittleEndian::write_u32(&mut buf[16..], self.maxcount);
    }

    #[must_use]
    pub fn read(buf: &[u8]) -> Self {
        SlabHeader {
            pool: LittleEndian::read_u32(&buf[0..]),
            prev: LittleEndian::read_u32(&buf[4..]),
            next: LittleEndian::read_u32(&buf[8..]),
            refcount: LittleEndian::read_u32(&buf[12..]),
            maxcount: LittleEndian::read_u32(&buf[16..]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn super_block_round_trip() {
        let sb = Super { nslabs: 9, slab_nlb: 4000, npools: 2, md_nlb: 1 };
        let mut buf = vec![0u8; SUPER_BYTES];
        sb.write(&mut buf);
        assert_eq!(Super::read(&buf).unwrap(), sb);
    }

    #[test]
    fn super_block_rejects_bad_magic() {
        let mut buf = vec![0u8; SUPER_BYTES];
        Super { nslabs: 1, slab_nlb: 1, npools: 1, md_nlb: 1 }.write(&mut buf);
        buf[0] ^= 0xff;
        assert!(matches!(Super::read(&buf), Err(Error::Corruption(_))));
    }

    #[test]
    fn pool_entry_round_trip() {
        let mut entry = PoolEntry {
            obj_nlb: 16,
            slab_nobj: 250,
            strp_nobjs: 4,
            strp_nbytes: 2048,
            flags: POOL_FLAG_STRIPED,
            ..PoolEntry::default()
        };
        entry.set_name("stripe-pool");
        let mut buf = vec![0u8; POOL_ENTRY_BYTES];
        entry.write(&mut buf);
        let decoded = PoolEntry::read(&buf);
        assert_eq!(decoded, entry);
        assert_eq!(decoded.name_str(), "stripe-pool");
        assert!(decoded.striped());
        assert_eq!(decoded.num_backing_objs(), 4);
    }

    #[test]
    fn slab_header_round_trip() {
        let hdr = SlabHeader { pool: 3, prev: LIST_NULL, next: 7, refcount: 2, maxcount: 100 };
        let mut buf = vec![0u8; SLAB_HEADER_BYTES];
        hdr.write(&mut buf);
        assert_eq!(SlabHeader::read(&buf), hdr);
    }
}
