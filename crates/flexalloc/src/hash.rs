// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! Open-addressed hash table with Robin Hood probing.
//!
//! The table maps pool names to pool-entry indices and lives inside the
//! metadata buffer as an array of fixed 16-byte slots:
//!
//! ```text
//! +----------------+---------+---------+---------+
//! | h2 (8)         | val (4) | psl (2) | pad (2) |
//! +----------------+---------+---------+---------+
//! ```
//!
//! Two independent whole-string hashes are used: DJB2 places an entry
//! (compressed to a slot index with a multiply-add-divide step), SDBM
//! identifies it. Storing the secondary hash instead of the key makes
//! genuine collisions improbable while keeping slots fixed-size.

use byteorder::{ByteOrder, LittleEndian};

/// Bytes per table slot on disk.
pub const SLOT_BYTES: usize = 16;

/// Bytes of the `{size, len}` header preceding the slot array on disk.
pub const HDR_BYTES: usize = 8;

/// Sentinel secondary-hash value marking an unset slot.
pub const SLOT_UNSET: u64 = u64::MAX;

/// A decoded table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Secondary (identity) hash of the key.
    pub h2: u64,
    /// Stored value (pool entry index).
    pub val: u32,
    /// Probe sequence length: distance from the ideal slot.
    pub psl: u16,
}

impl Slot {
    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.h2 == SLOT_UNSET
    }
}

/// DJB2 hash, the primary (placement) hash.
#[must_use]
pub fn hash_djb2(key: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &b in key {
        hash = (hash << 5).wrapping_add(hash).wrapping_add(u64::from(b));
    }
    hash
}

/// SDBM hash, the secondary (identity) hash.
#[must_use]
pub fn hash_sdbm(key: &[u8]) -> u64 {
    let mut hash: u64 = 0;
    for &b in key {
        hash = u64::from(b)
            .wrapping_add(hash << 6)
            .wrapping_add(hash << 16)
            .wrapping_sub(hash);
    }
    hash
}

/// Multiply-add-divide compression of a hash value into `[0, n)`.
///
/// `a % n` must be non-zero for a reasonable spread.
#[must_use]
pub fn mad_compress(hash: u64, a: u64, b: u64, n: u64) -> u64 {
    a.wrapping_mul(hash).wrapping_add(b) % n
}

/// Ideal slot index for `key` in a table of `tbl_size` slots.
#[must_use]
pub fn ideal_slot(key: &[u8], tbl_size: u32) -> u32 {
    mad_compress(hash_djb2(key), 31, 5745, u64::from(tbl_size)) as u32
}

#[must_use]
pub fn read_slot(tbl: &[u8], ndx: u32) -> Slot {
    let off = ndx as usize * SLOT_BYTES;
    Slot {
        h2: LittleEndian::read_u64(&tbl[off..]),
        val: LittleEndian::read_u32(&tbl[off + 8..]),
        psl: LittleEndian::read_u16(&tbl[off + 12..]),
    }
}

pub fn write_slot(tbl: &mut [u8], ndx: u32, slot: Slot) {
    let off = ndx as usize * SLOT_BYTES;
    LittleEndian::write_u64(&mut tbl[off..], slot.h2);
    LittleEndian::write_u32(&mut tbl[off + 8..], slot.val);
    LittleEndian::write_u16(&mut tbl[off + 12..], slot.psl);
    LittleEndian::write_u16(&mut tbl[off + 14..], 0);
}

/// Initialize every slot of the table region to unset.
pub fn init_slots(tbl: &mut [u8], tbl_size: u32) {
    for ndx in 0..tbl_size {
        write_slot(tbl, ndx, Slot { h2: SLOT_UNSET, val: 0, psl: 0 });
    }
}

/// Outcome of an insertion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// A new entry was placed; the caller must bump the live length.
    Placed,
    /// An entry with the same identity hash had its value overwritten.
    Updated,
    /// The table is full.
    Full,
}

/// Insert `key -> val`, displacing poorer entries Robin Hood style.
pub fn insert(tbl: &mut [u8], tbl_size: u32, live_len: u32, key: &[u8], val: u32) -> Insert {
    if live_len == tbl_size {
        return Insert::Full;
    }
    let mut ndx = ideal_slot(key, tbl_size);
    let mut current = Slot { h2: hash_sdbm(key), val, psl: 0 };

    loop {
        let resident = read_slot(tbl, ndx);
        if resident.is_unset() {
            write_slot(tbl, ndx, current);
            return Insert::Placed;
        } else if resident.psl < current.psl {
            // richer resident: swap and continue placing the displaced entry
            write_slot(tbl, ndx, current);
            current = resident;
            current.psl += 1;
        } else if resident.h2 == current.h2 {
            write_slot(tbl, ndx, Slot { val: current.val, ..resident });
            return Insert::Updated;
        } else {
            current.psl += 1;
        }
        ndx += 1;
        if ndx == tbl_size {
            ndx = 0;
        }
    }
}

fn lookup_by_h2(tbl: &[u8], tbl_size: u32, h2: u64, mut ndx: u32) -> Option<u32> {
    let mut psl: u16 = 0;
    loop {
        let slot = read_slot(tbl, ndx);
        if slot.h2 == h2 {
            return Some(ndx);
        }
        if slot.is_unset() || slot.psl < psl {
            // An unset slot, or a resident closer to its ideal slot than
            // our walk distance, proves the key was never placed here.
            return None;
        }
        ndx += 1;
        if ndx == tbl_size {
            ndx = 0;
        }
        psl += 1;
    }
}

/// Find the slot index holding `key`.
#[must_use]
pub fn lookup(tbl: &[u8], tbl_size: u32, key: &[u8]) -> Option<u32> {
    lookup_by_h2(tbl, tbl_size, hash_sdbm(key), ideal_slot(key, tbl_size))
}

/// Remove the entry at `ndx`, back-shifting the probe chain behind it.
///
/// The caller must decrement the live length afterwards.
pub fn remove_at(tbl: &mut [u8], tbl_size: u32, mut ndx: u32) {
    loop {
        let mut next = ndx + 1;
        if next == tbl_size {
            next = 0;
        }
        let next_slot = read_slot(tbl, next);
        if next_slot.is_unset() || next_slot.psl == 0 {
            break;
        }
        write_slot(tbl, ndx, Slot { psl: next_slot.psl - 1, ..next_slot });
        ndx = next;
    }
    write_slot(tbl, ndx, Slot { h2: SLOT_UNSET, val: 0, psl: 0 });
}

/// Remove `key` if present; returns `true` if an entry was removed.
pub fn remove(tbl: &mut [u8], tbl_size: u32, key: &[u8]) -> bool {
    match lookup(tbl, tbl_size, key) {
        Some(ndx) => {
            remove_at(tbl, tbl_size, ndx);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_tbl(size: u32) -> Vec<u8> {
        let mut tbl = vec![0u8; size as usize * SLOT_BYTES];
        init_slots(&mut tbl, size);
        tbl
    }

    #[test]
    fn hashes_are_independent() {
        // same primary bucket is fine, identical h2 for distinct keys is not
        assert_ne!(hash_sdbm(b"pool-a"), hash_sdbm(b"pool-b"));
        assert_ne!(hash_djb2(b"pool-a"), hash_djb2(b"pool-b"));
    }

    #[test]
    fn mad_stays_in_range() {
        for h in [0u64, 1, 31, 5745, u64::MAX] {
            assert!(mad_compress(h, 31, 5745, 16) < 16);
        }
    }

    #[test]
    fn round_trip_many_keys() {
        let size = 64u32;
        let mut tbl = new_tbl(size);
        let mut len = 0u32;
        let keys: Vec<String> = (0..size / 2).map(|i| format!("pool-{i}")).collect();
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(insert(&mut tbl, size, len, key.as_bytes(), i as u32), Insert::Placed);
            len += 1;
        }
        for (i, key) in keys.iter().enumerate() {
            let ndx = lookup(&tbl, size, key.as_bytes()).expect("inserted key not found");
            assert_eq!(read_slot(&tbl, ndx).val, i as u32);
        }
        assert!(lookup(&tbl, size, b"never-inserted").is_none());
    }

    #[test]
    fn insert_overwrites_same_key() {
        let size = 8u32;
        let mut tbl = new_tbl(size);
        assert_eq!(insert(&mut tbl, size, 0, b"dup", 1), Insert::Placed);
        assert_eq!(insert(&mut tbl, size, 1, b"dup", 2), Insert::Updated);
        let ndx = lookup(&tbl, size, b"dup").unwrap();
        assert_eq!(read_slot(&tbl, ndx).val, 2);
    }

    #[test]
    fn full_table_rejects_insert() {
        let size = 4u32;
        let mut tbl = new_tbl(size);
        let mut len = 0;
        for i in 0..size {
            assert_eq!(
                insert(&mut tbl, size, len, format!("k{i}").as_bytes(), i),
                Insert::Placed
            );
            len += 1;
        }
        assert_eq!(insert(&mut tbl, size, len, b"overflow", 9), Insert::Full);
    }

    #[test]
    fn removal_backshifts_probe_chain() {
        let size = 16u32;
        let mut tbl = new_tbl(size);
        let mut len = 0;
        let keys: Vec<String> = (0..10).map(|i| format!("entry-{i}")).collect();
        for (i, key) in keys.iter().enumerate() {
            insert(&mut tbl, size, len, key.as_bytes(), i as u32);
            len += 1;
        }
        assert!(remove(&mut tbl, size, keys[4].as_bytes()));
        assert!(lookup(&tbl, size, keys[4].as_bytes()).is_none());
        // re-removal is a no-op
        assert!(!remove(&mut tbl, size, keys[4].as_bytes()));
        // every other key stays reachable with its value
        for (i, key) in keys.iter().enumerate() {
            if i == 4 {
                continue;
            }
            let ndx = lookup(&tbl, size, key.as_bytes()).unwrap();
            assert_eq!(read_slot(&tbl, ndx).val, i as u32);
        }
    }

    #[test]
    fn fresh_table_slots_are_unset_with_zero_psl() {
        let size = 8u32;
        let tbl = new_tbl(size);
        for ndx in 0..size {
            let slot = read_slot(&tbl, ndx);
            assert_eq!(slot.h2, SLOT_UNSET);
            assert_eq!(slot.psl, 0);
        }
    }
}
