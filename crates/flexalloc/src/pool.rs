// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! Pool management: named containers with one uniform object size.
//!
//! The pool freelist is the canonical record of which pool slots are in
//! use; the hash table maps names to slots, and every handle carries the
//! secondary hash of the name it was created with so repurposed slots
//! are detected as stale instead of silently followed.

use crate::error::{Error, Result};
use crate::freelist;
use crate::hash;
use crate::object::ObjectHandle;
use crate::ondisk::{PoolEntry, LIST_NULL, POOL_FLAG_STRIPED, POOL_NAME_BYTES, ROOT_OBJ_NONE};
use crate::slab::Bucket;
use crate::Fs;
use bitflags::bitflags;

/// Handle to an open pool.
///
/// Plain data: holds the pool-entry index and the identity hash of the
/// pool name at handle-creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHandle {
    pub ndx: u32,
    pub h2: u64,
}

bitflags! {
    /// Behaviour flags for [`Fs::pool_set_root`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RootSetFlags: u32 {
        /// Overwrite an already-set root object.
        const FORCE = 1;
        /// Reset the root object to unset; the object argument is ignored.
        const CLEAR = 1 << 1;
    }
}

/// Arguments to [`Fs::pool_create`].
#[derive(Debug, Clone)]
pub struct PoolCreateArgs {
    pub name: String,
    /// Object size in logical blocks.
    pub obj_nlb: u32,
    /// Stripe parameters `(strp_nobjs, strp_nbytes)`; `None` disables striping.
    pub striping: Option<(u32, u32)>,
}

impl PoolCreateArgs {
    #[must_use]
    pub fn new(name: impl Into<String>, obj_nlb: u32) -> PoolCreateArgs {
        PoolCreateArgs { name: name.into(), obj_nlb, striping: None }
    }

    /// Stripe each object across `strp_nobjs` sub-objects in chunks of
    /// `strp_nbytes` bytes.
    #[must_use]
    pub fn striped(mut self, strp_nobjs: u32, strp_nbytes: u32) -> PoolCreateArgs {
        self.striping = Some((strp_nobjs, strp_nbytes));
        self
    }
}

impl Fs {
    /// Create a pool, or return the existing one when the name already
    /// resolves to a pool of the same object size.
    pub fn pool_create(&mut self, args: &PoolCreateArgs) -> Result<PoolHandle> {
        if let Ok(handle) = self.pool_open(&args.name) {
            let entry = self.pool_entry(handle.ndx);
            if entry.obj_nlb != args.obj_nlb {
                return Err(Error::AlreadyExists(format!(
                    "pool '{}' exists with object size {}, requested {}",
                    args.name, entry.obj_nlb, args.obj_nlb
                )));
            }
            return Ok(handle);
        }

        if args.name.is_empty() || args.name.as_bytes().contains(&0) {
            return Err(Error::inval("pool name must be non-empty without NUL bytes"));
        }
        if args.name.len() >= POOL_NAME_BYTES {
            return Err(Error::inval(format!(
                "pool name length {} exceeds the {} byte maximum",
                args.name.len(),
                POOL_NAME_BYTES - 1
            )));
        }
        if args.obj_nlb < 1 {
            return Err(Error::inval("object size must be at least one logical block"));
        }
        let slab_nobj = self.objs_in_slab(args.obj_nlb);
        if slab_nobj < 1 {
            return Err(Error::inval(format!(
                "object size {} does not fit the slab size {}",
                args.obj_nlb, self.geo.slab_nlb
            )));
        }
        self.cs.pool_check(args.obj_nlb)?;

        let (flags, strp_nobjs, strp_nbytes) = match args.striping {
            None => (0, 0, 0),
            Some((nobjs, nbytes)) => {
                self.check_strp_params(nobjs, nbytes, args.obj_nlb, slab_nobj)?;
                (POOL_FLAG_STRIPED, nobjs, nbytes)
            }
        };

        let ndx = match freelist::alloc(self.pool_freelist_mut()) {
            Some(ndx) => ndx,
            None => return Err(Error::OutOfSpace),
        };

        let tbl_size = self.geo.pool_sgmt.htbl_tbl_size;
        let live_len = self.htbl_len;
        match hash::insert(self.htbl_mut(), tbl_size, live_len, args.name.as_bytes(), ndx) {
            hash::Insert::Placed => self.htbl_len += 1,
            hash::Insert::Updated => {}
            hash::Insert::Full => {
                freelist::free(self.pool_freelist_mut(), ndx)?;
                return Err(Error::OutOfSpace);
            }
        }

        let mut entry = PoolEntry {
            obj_nlb: args.obj_nlb,
            slab_nobj,
            strp_nobjs,
            strp_nbytes,
            flags,
            root_obj: ROOT_OBJ_NONE,
            ..PoolEntry::default()
        };
        entry.set_name(&args.name);
        self.set_pool_entry(ndx, &entry);

        log::debug!(
            "[pool] created '{}' (ndx {ndx}, obj_nlb {}, {} objs/slab)",
            args.name,
            args.obj_nlb,
            slab_nobj
        );
        Ok(PoolHandle { ndx, h2: hash::hash_sdbm(args.name.as_bytes()) })
    }

    /// Open an existing pool by name.
    pub fn pool_open(&self, name: &str) -> Result<PoolHandle> {
        let tbl_size = self.geo.pool_sgmt.htbl_tbl_size;
        let slot_ndx =
            hash::lookup(self.htbl(), tbl_size, name.as_bytes()).ok_or(Error::NotFound)?;
        let slot = hash::read_slot(self.htbl(), slot_ndx);
        Ok(PoolHandle { ndx: slot.val, h2: slot.h2 })
    }

    /// Close a pool handle. Releases nothing on the device.
    pub fn pool_close(&self, handle: PoolHandle) {
        let _ = handle;
    }

    /// Destroy a pool, releasing every slab it owns.
    ///
    /// Fails with [`Error::Busy`] if any of the pool's slabs still holds
    /// allocated objects, and with [`Error::StaleHandle`] if the handle
    /// no longer matches the stored entry.
    pub fn pool_destroy(&mut self, handle: PoolHandle) -> Result<()> {
        let entry = self.checked_entry(&handle)?;

        // refuse to drop reservations silently: every slab must be empty
        for bucket in [Bucket::Empty, Bucket::Full, Bucket::Partial] {
            let mut slab_id = bucket.head(&entry);
            while slab_id != LIST_NULL {
                let hdr = self.slab_header(slab_id)?;
                if hdr.refcount > 0 {
                    return Err(Error::Busy("pool still holds allocated objects"));
                }
                slab_id = hdr.next;
            }
        }

        for bucket in [Bucket::Empty, Bucket::Full, Bucket::Partial] {
            let mut entry = self.pool_entry(handle.ndx);
            let mut slab_id = bucket.head(&entry);
            while slab_id != LIST_NULL {
                let next = self.slab_header(slab_id)?.next;
                self.release_slab(slab_id)?;
                slab_id = next;
            }
            bucket.set_head(&mut entry, LIST_NULL);
            self.set_pool_entry(handle.ndx, &entry);
        }

        // the freelist entry is the canonical record; clear it first
        freelist::free(self.pool_freelist_mut(), handle.ndx)?;
        let name = entry.name_str().to_owned();
        let tbl_size = self.geo.pool_sgmt.htbl_tbl_size;
        if hash::remove(self.htbl_mut(), tbl_size, name.as_bytes()) {
            self.htbl_len -= 1;
        }
        log::debug!("[pool] destroyed '{name}' (ndx {})", handle.ndx);
        Ok(())
    }

    /// Record an object as the pool's root object.
    pub fn pool_set_root(
        &mut self,
        handle: &PoolHandle,
        obj: &ObjectHandle,
        flags: RootSetFlags,
    ) -> Result<()> {
        let mut entry = self.checked_entry(handle)?;
        if entry.root_obj != ROOT_OBJ_NONE && !flags.contains(RootSetFlags::FORCE) {
            return Err(Error::inval("pool already has a root object (use FORCE)"));
        }
        entry.root_obj =
            if flags.contains(RootSetFlags::CLEAR) { ROOT_OBJ_NONE } else { obj.to_u64() };
        self.set_pool_entry(handle.ndx, &entry);
        Ok(())
    }

    /// Fetch the pool's root object; `NotFound` when unset.
    pub fn pool_get_root(&self, handle: &PoolHandle) -> Result<ObjectHandle> {
        let entry = self.checked_entry(handle)?;
        if entry.root_obj == ROOT_OBJ_NONE {
            return Err(Error::NotFound);
        }
        Ok(ObjectHandle::from_u64(entry.root_obj))
    }

    /// Change a pool's stripe parameters.
    pub fn pool_set_strp(
        &mut self,
        handle: &PoolHandle,
        strp_nobjs: u32,
        strp_nbytes: u32,
    ) -> Result<()> {
        let mut entry = self.checked_entry(handle)?;
        if strp_nobjs <= 1 {
            entry.flags &= !POOL_FLAG_STRIPED;
            entry.strp_nobjs = 0;
            entry.strp_nbytes = 0;
        } else {
            self.check_strp_params(strp_nobjs, strp_nbytes, entry.obj_nlb, entry.slab_nobj)?;
            entry.flags |= POOL_FLAG_STRIPED;
            entry.strp_nobjs = strp_nobjs;
            entry.strp_nbytes = strp_nbytes;
        }
        self.set_pool_entry(handle.ndx, &entry);
        Ok(())
    }

    /// Object size of the pool, in logical blocks (one sub-object for
    /// striped pools).
    pub fn pool_obj_nlb(&self, handle: &PoolHandle) -> Result<u32> {
        Ok(self.checked_entry(handle)?.obj_nlb)
    }

    /// Size in bytes of one handed-out object, accounting for striping.
    pub fn pool_obj_nbytes(&self, handle: &PoolHandle) -> Result<u64> {
        let entry = self.checked_entry(handle)?;
        Ok(u64::from(entry.obj_nlb)
            * u64::from(self.geo.lb_nbytes)
            * u64::from(entry.num_backing_objs()))
    }

    fn check_strp_params(
        &self,
        strp_nobjs: u32,
        strp_nbytes: u32,
        obj_nlb: u32,
        slab_nobj: u32,
    ) -> Result<()> {
        if strp_nobjs < 2 {
            return Err(Error::inval("striping needs at least two sub-objects"));
        }
        if strp_nobjs > slab_nobj {
            return Err(Error::inval(format!(
                "stripe width {strp_nobjs} exceeds the {slab_nobj} objects a slab holds"
            )));
        }
        if strp_nbytes == 0 {
            return Err(Error::inval("stripe chunk size must be non-zero"));
        }
        if strp_nbytes > self.dev.mdts_nbytes() {
            return Err(Error::inval(format!(
                "stripe chunk size {strp_nbytes} exceeds the device transfer limit {}",
                self.dev.mdts_nbytes()
            )));
        }
        // the chunk grid must tile each sub-object exactly, or deep
        // offsets would spill past the sub-object end
        let sub_nbytes = u64::from(obj_nlb) * u64::from(self.geo.lb_nbytes);
        if sub_nbytes % u64::from(strp_nbytes) != 0 {
            return Err(Error::inval(format!(
                "stripe chunk size {strp_nbytes} does not divide the {sub_nbytes} byte sub-object"
            )));
        }
        Ok(())
    }

    /// Validate a handle against the stored entry and return the entry.
    pub(crate) fn checked_entry(&self, handle: &PoolHandle) -> Result<PoolEntry> {
        if handle.ndx >= self.geo.npools {
            return Err(Error::inval(format!("pool index {} out of range", handle.ndx)));
        }
        let entry = self.pool_entry(handle.ndx);
        let tbl_size = self.geo.pool_sgmt.htbl_tbl_size;
        let slot_ndx = hash::lookup(self.htbl(), tbl_size, entry.name_str().as_bytes())
            .ok_or(Error::StaleHandle)?;
        let slot = hash::read_slot(self.htbl(), slot_ndx);
        if slot.h2 != handle.h2 || slot.val != handle.ndx {
            // the slot was released or repurposed since the handle was made
            return Err(Error::StaleHandle);
        }
        if !self.pool_slot_reserved(handle.ndx) {
            return Err(Error::StaleHandle);
        }
        Ok(entry)
    }

    pub(crate) fn pool_slot_reserved(&self, ndx: u32) -> bool {
        freelist::is_reserved(self.pool_freelist(), ndx)
    }

    /// Slab to allocate the next object from: first partial, then empty,
    /// else a freshly acquired slab (which joins the empty list).
    pub(crate) fn next_available_slab(&mut self, handle: &PoolHandle) -> Result<u32> {
        let entry = self.pool_entry(handle.ndx);
        if entry.partial_slabs != LIST_NULL {
            return Ok(entry.partial_slabs);
        }
        if entry.empty_slabs != LIST_NULL {
            return Ok(entry.empty_slabs);
        }
        let slab_id = self.acquire_slab(entry.obj_nlb)?;
        let mut hdr = self.slab_header(slab_id)?;
        hdr.pool = handle.ndx;
        self.set_slab_header(slab_id, &hdr);
        if let Err(err) = self.slab_list_prepend(handle.ndx, Bucket::Empty, slab_id) {
            self.release_slab(slab_id)?;
            return Err(err);
        }
        Ok(slab_id)
    }
}
