// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! Consistency checks over an open system.
//!
//! Used by the `flexalloc-inspect` tool and by tests; every check
//! reports human-readable problem descriptions instead of failing fast
//! so one run surfaces all issues.

use crate::error::Result;
use crate::freelist;
use crate::hash;
use crate::ondisk::{LIST_NULL, POOL_NAME_BYTES};
use crate::pool::PoolHandle;
use crate::slab::{slab_bucket, Bucket};
use crate::Fs;

/// Slab ids of a pool's three bucket lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolBuckets {
    pub empty: Vec<u32>,
    pub partial: Vec<u32>,
    pub full: Vec<u32>,
}

/// Snapshot of the pool hash table slots, for diagnostics.
#[must_use]
pub fn htbl_snapshot(fs: &Fs) -> Vec<hash::Slot> {
    let size = fs.geo.pool_sgmt.htbl_tbl_size;
    (0..size).map(|ndx| hash::read_slot(fs.htbl(), ndx)).collect()
}

/// Walk the three slab lists of a pool.
pub fn pool_buckets(fs: &Fs, handle: &PoolHandle) -> Result<PoolBuckets> {
    let entry = fs.checked_entry(handle)?;
    Ok(PoolBuckets {
        empty: walk_list(fs, entry.empty_slabs),
        partial: walk_list(fs, entry.partial_slabs),
        full: walk_list(fs, entry.full_slabs),
    })
}

fn walk_list(fs: &Fs, head: u32) -> Vec<u32> {
    let mut ids = Vec::new();
    let mut cur = head;
    // bounded walk, a cycle cannot loop us forever
    for _ in 0..fs.geo.nslabs {
        if cur == LIST_NULL {
            break;
        }
        ids.push(cur);
        cur = match fs.slab_header(cur) {
            Ok(hdr) => hdr.next,
            Err(_) => break,
        };
    }
    ids
}

/// Summary of one live pool, for diagnostics output.
#[derive(Debug, Clone)]
pub struct PoolReport {
    pub ndx: u32,
    pub name: String,
    pub obj_nlb: u32,
    pub slab_nobj: u32,
    pub striped: bool,
    pub strp_nobjs: u32,
    pub strp_nbytes: u32,
    pub root_obj: Option<crate::ObjectHandle>,
    pub buckets: PoolBuckets,
}

/// Enumerate every live pool with its slab lists.
#[must_use]
pub fn pool_reports(fs: &Fs) -> Vec<PoolReport> {
    let mut reports = Vec::new();
    let flist = fs.pool_freelist().to_vec();
    let _ = freelist::search_reserved(&flist, |ndx| {
        let entry = fs.pool_entry(ndx);
        reports.push(PoolReport {
            ndx,
            name: entry.name_str().to_owned(),
            obj_nlb: entry.obj_nlb,
            slab_nobj: entry.slab_nobj,
            striped: entry.striped(),
            strp_nobjs: entry.strp_nobjs,
            strp_nbytes: entry.strp_nbytes,
            root_obj: (entry.root_obj != crate::ondisk::ROOT_OBJ_NONE)
                .then(|| crate::ObjectHandle::from_u64(entry.root_obj)),
            buckets: PoolBuckets {
                empty: walk_list(fs, entry.empty_slabs),
                partial: walk_list(fs, entry.partial_slabs),
                full: walk_list(fs, entry.full_slabs),
            },
        });
        Ok(freelist::SearchStep::FoundContinue)
    });
    reports
}

/// Run every invariant check; an empty result means a healthy system.
#[must_use]
pub fn validate(fs: &Fs) -> Vec<String> {
    let mut problems = Vec::new();
    check_super(fs, &mut problems);
    check_pool_counts(fs, &mut problems);
    check_pool_entries(fs, &mut problems);
    check_slab_accounting(fs, &mut problems);
    problems
}

fn check_super(fs: &Fs, problems: &mut Vec<String>) {
    if fs.geo.nslabs == 0 {
        problems.push("super block reports zero slabs".into());
    }
    if fs.geo.npools > fs.geo.nslabs {
        problems.push(format!(
            "super block reports more pools ({}) than slabs ({})",
            fs.geo.npools, fs.geo.nslabs
        ));
    }
}

fn check_pool_counts(fs: &Fs, problems: &mut Vec<String>) {
    let flist = fs.pool_freelist();
    if freelist::len(flist) != fs.geo.npools {
        problems.push(format!(
            "pool freelist length {} disagrees with super-block npools {}",
            freelist::len(flist),
            fs.geo.npools
        ));
    }
    // the on-disk header len may lag the live value until the next
    // flush, so only the slot count is compared here
    let (size, _len) = fs.htbl_hdr();
    if size != fs.geo.pool_sgmt.htbl_tbl_size {
        problems.push(format!(
            "hash table header size {size} disagrees with geometry {}",
            fs.geo.pool_sgmt.htbl_tbl_size
        ));
    }
    let occupied =
        htbl_snapshot(fs).iter().filter(|slot| !slot.is_unset()).count() as u32;
    if occupied != fs.htbl_len {
        problems.push(format!(
            "hash table holds {occupied} entries but the live length says {}",
            fs.htbl_len
        ));
    }
    let reserved = freelist::num_reserved(flist);
    if reserved != occupied {
        problems.push(format!(
            "pool freelist reserves {reserved} slots but the hash table holds {occupied} entries"
        ));
    }
}

fn check_pool_entries(fs: &Fs, problems: &mut Vec<String>) {
    for (slot_ndx, slot) in htbl_snapshot(fs).iter().enumerate() {
        if slot.is_unset() {
            continue;
        }
        if slot.val >= fs.geo.npools {
            problems.push(format!(
                "hash slot {slot_ndx} points at pool entry {} beyond npools {}",
                slot.val, fs.geo.npools
            ));
            continue;
        }
        if !freelist::is_reserved(fs.pool_freelist(), slot.val) {
            problems.push(format!(
                "hash slot {slot_ndx} names pool entry {} whose freelist bit is free",
                slot.val
            ));
        }
        let entry = fs.pool_entry(slot.val);
        if entry.name[0] == 0 {
            problems.push(format!("pool entry {} has no name", slot.val));
        }
        if entry.name.iter().all(|&b| b != 0) {
            problems.push(format!(
                "pool entry {} name is not NUL-terminated within {POOL_NAME_BYTES} bytes",
                slot.val
            ));
        }
        if hash::hash_sdbm(entry.name_str().as_bytes()) != slot.h2 {
            problems.push(format!(
                "pool entry {} name '{}' does not hash to its slot's identity hash",
                slot.val,
                entry.name_str()
            ));
        }
        if entry.obj_nlb == 0 {
            problems.push(format!("pool entry {} has a zero object size", slot.val));
        }
        if entry.slab_nobj == 0 {
            problems.push(format!("pool entry {} fits zero objects per slab", slot.val));
        }
    }
}

fn check_slab_accounting(fs: &Fs, problems: &mut Vec<String>) {
    let nslabs = fs.geo.nslabs;
    let mut owner: Vec<Option<String>> = vec![None; nslabs as usize];
    let mut claim = |slab_id: u32, who: String, problems: &mut Vec<String>| {
        if slab_id >= nslabs {
            problems.push(format!("{who} names out-of-range slab {slab_id}"));
            return;
        }
        match &owner[slab_id as usize] {
            Some(prev) => problems.push(format!(
                "slab {slab_id} appears in both {prev} and {who}"
            )),
            None => owner[slab_id as usize] = Some(who),
        }
    };

    // global free list
    let mut count = 0u32;
    for slab_id in walk_list(fs, fs.fslab_head()) {
        claim(slab_id, "the free-slab list".into(), problems);
        count += 1;
    }
    if count != fs.fslab_num() {
        problems.push(format!(
            "free-slab list holds {count} slabs but the count word says {}",
            fs.fslab_num()
        ));
    }

    // per-pool buckets, classification included
    let pool_flist = fs.pool_freelist().to_vec();
    let _ = freelist::search_reserved(&pool_flist, |pool_ndx| {
        let entry = fs.pool_entry(pool_ndx);
        for (bucket, head) in [
            (Bucket::Empty, entry.empty_slabs),
            (Bucket::Partial, entry.partial_slabs),
            (Bucket::Full, entry.full_slabs),
        ] {
            for slab_id in walk_list(fs, head) {
                claim(
                    slab_id,
                    format!("pool {pool_ndx} {bucket:?} list"),
                    problems,
                );
                if let Ok(hdr) = fs.slab_header(slab_id) {
                    let expect = slab_bucket(&hdr, &entry);
                    if expect != bucket {
                        problems.push(format!(
                            "slab {slab_id} (refcount {}) sits in the {bucket:?} list \
                             but belongs in {expect:?}",
                            hdr.refcount
                        ));
                    }
                    // invariant 3, when the freelist is resident
                    if let Some(reserved) = fs.slab_reserved_objs(slab_id) {
                        if reserved != hdr.refcount {
                            problems.push(format!(
                                "slab {slab_id} refcount {} disagrees with {reserved} \
                                 reserved freelist slots",
                                hdr.refcount
                            ));
                        }
                    }
                }
            }
        }
        Ok(freelist::SearchStep::FoundContinue)
    });

    for (slab_id, who) in owner.iter().enumerate() {
        if who.is_none() {
            problems.push(format!("slab {slab_id} is on no list at all"));
        }
    }
}
