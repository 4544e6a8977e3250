// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! Slab manager: the global free-slab list and slab formatting.
//!
//! Slabs are addressed by integer id; list links are ids stored in the
//! slab headers, [`LIST_NULL`] terminated. The free list keeps explicit
//! head/tail/count words at the end of the slab segment; the per-pool
//! bucket lists (empty/partial/full) are head-only and live in the pool
//! entries.

use crate::error::{Error, Result};
use crate::ondisk::{PoolEntry, SlabHeader, LIST_NULL};
use crate::slabcache;
use crate::Fs;

/// Per-pool slab bucket, determined by the slab's refcount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bucket {
    Empty,
    Partial,
    Full,
}

impl Bucket {
    pub(crate) fn head(self, entry: &PoolEntry) -> u32 {
        match self {
            Bucket::Empty => entry.empty_slabs,
            Bucket::Partial => entry.partial_slabs,
            Bucket::Full => entry.full_slabs,
        }
    }

    pub(crate) fn set_head(self, entry: &mut PoolEntry, head: u32) {
        match self {
            Bucket::Empty => entry.empty_slabs = head,
            Bucket::Partial => entry.partial_slabs = head,
            Bucket::Full => entry.full_slabs = head,
        }
    }
}

/// Bucket a slab belongs to, given its owning pool's entry.
///
/// A slab is full once it cannot serve another object; with striping an
/// object consumes `strp_nobjs` freelist slots at a time, so fullness is
/// `refcount + num_backing > maxcount`.
pub(crate) fn slab_bucket(hdr: &SlabHeader, entry: &PoolEntry) -> Bucket {
    if hdr.refcount == 0 {
        Bucket::Empty
    } else if hdr.refcount + entry.num_backing_objs() > hdr.maxcount {
        Bucket::Full
    } else {
        Bucket::Partial
    }
}

impl Fs {
    /// Objects of `obj_nlb` blocks that fit into one slab.
    ///
    /// On conventional devices the slab's own freelist occupies its tail
    /// blocks, so the count is searched downward until the leftover
    /// space holds the freelist. On zoned devices the freelist lives on
    /// the metadata device and the division is exact.
    pub(crate) fn objs_in_slab(&self, obj_nlb: u32) -> u32 {
        if obj_nlb == 0 {
            return 0;
        }
        if self.geo.zoned {
            return self.geo.slab_nlb / obj_nlb;
        }
        let mut nobj = self.geo.slab_nlb / obj_nlb;
        while nobj > 0 {
            let unused_nlb = u64::from(self.geo.slab_nlb - nobj * obj_nlb);
            if unused_nlb >= slabcache::flist_nlb(&self.geo, nobj) {
                break;
            }
            nobj -= 1;
        }
        nobj
    }

    /// Take the next free slab off the list head and format it for
    /// objects of `obj_nlb` blocks.
    pub(crate) fn acquire_slab(&mut self, obj_nlb: u32) -> Result<u32> {
        if self.fslab_num() == 0 {
            // valid state: the device is simply out of slabs
            return Err(Error::OutOfSpace);
        }
        let maxcount = self.objs_in_slab(obj_nlb);
        if maxcount < 1 {
            return Err(Error::inval(format!(
                "object size {obj_nlb} is incompatible with slab size {}",
                self.geo.slab_nlb
            )));
        }
        let slab_id = self.fslab_pop_head()?;
        self.set_slab_header(
            slab_id,
            &SlabHeader {
                pool: 0,
                prev: LIST_NULL,
                next: LIST_NULL,
                refcount: 0,
                maxcount,
            },
        );
        self.slab_cache.init(&self.geo, slab_id, maxcount)?;
        self.set_fslab_num(self.fslab_num() - 1);
        log::debug!("[slab] acquired slab {slab_id} ({maxcount} objects)");
        Ok(slab_id)
    }

    /// Return a slab to the free list.
    pub(crate) fn release_slab(&mut self, slab_id: u32) -> Result<()> {
        let hdr = self.slab_header(slab_id)?;
        if hdr.refcount > 0 {
            return Err(Error::Busy("slab still holds allocated objects"));
        }
        self.slab_cache.drop_entry(slab_id);
        self.fslab_push_tail(slab_id)?;
        self.set_fslab_num(self.fslab_num() + 1);

        // trim is advisory, a failure only costs us the hint
        let slba = self.cs.slab_offset(&self.geo, slab_id);
        if let Err(err) = self.cs.slab_trim(self.dev.as_ref(), slba, self.geo.slab_nlb) {
            log::warn!("[slab] trim of slab {slab_id} failed: {err}");
        }
        log::debug!("[slab] released slab {slab_id}");
        Ok(())
    }

    fn fslab_pop_head(&mut self) -> Result<u32> {
        let head = self.fslab_head();
        if head == LIST_NULL {
            return Err(Error::Corruption(
                "free-slab count is non-zero but the list is empty".into(),
            ));
        }
        let slab = self.slab_header(head)?;
        if head == self.fslab_tail() {
            self.set_fslab_head(LIST_NULL);
            self.set_fslab_tail(LIST_NULL);
        } else {
            let new_head = slab.next;
            let mut hdr = self.slab_header(new_head)?;
            hdr.prev = LIST_NULL;
            self.set_slab_header(new_head, &hdr);
            self.set_fslab_head(new_head);
        }
        Ok(head)
    }

    fn fslab_push_tail(&mut self, slab_id: u32) -> Result<()> {
        let tail = self.fslab_tail();
        let mut slab = self.slab_header(slab_id)?;
        if tail == LIST_NULL {
            slab.prev = LIST_NULL;
            slab.next = LIST_NULL;
            self.set_slab_header(slab_id, &slab);
            self.set_fslab_head(slab_id);
            self.set_fslab_tail(slab_id);
        } else {
            let mut old_tail = self.slab_header(tail)?;
            old_tail.next = slab_id;
            self.set_slab_header(tail, &old_tail);
            slab.prev = tail;
            slab.next = LIST_NULL;
            self.set_slab_header(slab_id, &slab);
            self.set_fslab_tail(slab_id);
        }
        Ok(())
    }

    /// Prepend a slab to one of a pool's bucket lists.
    pub(crate) fn slab_list_prepend(
        &mut self,
        pool_ndx: u32,
        bucket: Bucket,
        slab_id: u32,
    ) -> Result<()> {
        let mut entry = self.pool_entry(pool_ndx);
        let head = bucket.head(&entry);
        if head != LIST_NULL {
            let mut head_hdr = self.slab_header(head)?;
            head_hdr.prev = slab_id;
            self.set_slab_header(head, &head_hdr);
        }
        let mut slab = self.slab_header(slab_id)?;
        slab.next = head;
        slab.prev = LIST_NULL;
        self.set_slab_header(slab_id, &slab);
        bucket.set_head(&mut entry, slab_id);
        self.set_pool_entry(pool_ndx, &entry);
        Ok(())
    }

    /// Unlink a slab from one of a pool's bucket lists.
    pub(crate) fn slab_list_remove(
        &mut self,
        pool_ndx: u32,
        bucket: Bucket,
        slab_id: u32,
    ) -> Result<()> {
        let slab = self.slab_header(slab_id)?;
        if slab.prev == LIST_NULL {
            let mut entry = self.pool_entry(pool_ndx);
            bucket.set_head(&mut entry, slab.next);
            self.set_pool_entry(pool_ndx, &entry);
        } else {
            let mut prev = self.slab_header(slab.prev)?;
            prev.next = slab.next;
            self.set_slab_header(slab.prev, &prev);
        }
        if slab.next != LIST_NULL {
            let mut next = self.slab_header(slab.next)?;
            next.prev = slab.prev;
            self.set_slab_header(slab.next, &next);
        }
        let mut slab = slab;
        slab.prev = LIST_NULL;
        slab.next = LIST_NULL;
        self.set_slab_header(slab_id, &slab);
        Ok(())
    }

    /// Number of reserved slots in a slab's (resident) object freelist.
    pub(crate) fn slab_reserved_objs(&self, slab_id: u32) -> Option<u32> {
        self.slab_cache.num_reserved(slab_id)
    }
}
