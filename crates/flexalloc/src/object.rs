// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! Object engine: create, open, destroy, and I/O.
//!
//! An object handle is nothing but `(slab_id, entry_ndx)`; combined with
//! the owning pool's object size it fully determines the object's LBA
//! range. Striped objects interleave their logical bytes across
//! `strp_nobjs` contiguous sub-objects in chunks of `strp_nbytes`:
//!
//! ```text
//! logical:  |c0|c1|c2|c3|c4|c5|c6|c7|          (chunks of strp_nbytes)
//! sub 0:    |c0|c4|                             sub-object = obj_nlb blocks
//! sub 1:    |c1|c5|
//! sub 2:    |c2|c6|
//! sub 3:    |c3|c7|
//! ```
//!
//! Striped transfers are decomposed into per-chunk sub-requests and
//! issued concurrently; all of them resolve before the call returns.

use crate::bits::ceil_div;
use crate::dp::IoClass;
use crate::error::{Error, Result};
use crate::ondisk::PoolEntry;
use crate::pool::PoolHandle;
use crate::slab::slab_bucket;
use crate::Fs;

/// Handle to an object: the owning slab and the index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    pub slab_id: u32,
    pub entry_ndx: u32,
}

impl ObjectHandle {
    /// Pack into the 64-bit form stored in pool root-object fields.
    #[must_use]
    pub fn to_u64(self) -> u64 {
        u64::from(self.slab_id) | u64::from(self.entry_ndx) << 32
    }

    #[must_use]
    pub fn from_u64(raw: u64) -> ObjectHandle {
        ObjectHandle { slab_id: raw as u32, entry_ndx: (raw >> 32) as u32 }
    }
}

/// One device sub-request of a striped transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StripePiece {
    dev_off: u64,
    len: usize,
}

/// Decompose `[offset, offset + len)` of a striped object's logical
/// space into per-chunk device ranges, ascending in logical offset.
fn stripe_pieces(
    base_off: u64,
    sub_nbytes: u64,
    strp_nobjs: u32,
    strp_nbytes: u32,
    offset: u64,
    len: usize,
) -> Vec<StripePiece> {
    let chunk = u64::from(strp_nbytes);
    let nsubs = u64::from(strp_nobjs);
    let end = offset + len as u64;
    let mut pieces = Vec::with_capacity((ceil_div(len as u64, chunk) + 1) as usize);
    let mut cur = offset;
    while cur < end {
        let g = cur / chunk;
        let sub = g % nsubs;
        let in_sub = (g / nsubs) * chunk + cur % chunk;
        let piece_end = ((g + 1) * chunk).min(end);
        pieces.push(StripePiece {
            dev_off: base_off + sub * sub_nbytes + in_sub,
            len: (piece_end - cur) as usize,
        });
        cur = piece_end;
    }
    pieces
}

impl Fs {
    /// Allocate a new object from the pool.
    pub fn object_create(&mut self, pool: &PoolHandle) -> Result<ObjectHandle> {
        let entry = self.checked_entry(pool)?;
        let nbacking = entry.num_backing_objs();
        let slab_id = self.next_available_slab(pool)?;
        let hdr = self.slab_header(slab_id)?;
        self.slab_cache.ensure_loaded(
            self.md_dev.as_deref().unwrap_or(self.dev.as_ref()),
            &self.geo,
            slab_id,
            hdr.maxcount,
        )?;

        let from = slab_bucket(&hdr, &entry);
        let entry_ndx = self.slab_cache.obj_alloc(slab_id, nbacking)?;
        let mut hdr = hdr;
        hdr.refcount += nbacking;
        self.set_slab_header(slab_id, &hdr);

        let to = slab_bucket(&hdr, &entry);
        if from != to {
            self.slab_list_remove(pool.ndx, from, slab_id)?;
            self.slab_list_prepend(pool.ndx, to, slab_id)?;
        }
        log::debug!(
            "[object] created ({slab_id}, {entry_ndx}) in pool {} ({} backing)",
            pool.ndx,
            nbacking
        );
        Ok(ObjectHandle { slab_id, entry_ndx })
    }

    /// Make an existing object usable: loads the slab's object freelist
    /// if it is not resident yet. No freelist bit changes.
    pub fn object_open(&mut self, pool: &PoolHandle, obj: &ObjectHandle) -> Result<()> {
        let entry = self.checked_entry(pool)?;
        let hdr = self.slab_header(obj.slab_id)?;
        self.check_obj_range(&entry, &hdr, obj)?;
        self.slab_cache.ensure_loaded(
            self.md_dev.as_deref().unwrap_or(self.dev.as_ref()),
            &self.geo,
            obj.slab_id,
            hdr.maxcount,
        )
    }

    /// Destroy an object, clearing its reservation. On zoned devices the
    /// backing zones are reset first.
    pub fn object_destroy(&mut self, pool: &PoolHandle, obj: &ObjectHandle) -> Result<()> {
        let entry = self.checked_entry(pool)?;
        let hdr = self.slab_header(obj.slab_id)?;
        self.check_obj_range(&entry, &hdr, obj)?;
        let nbacking = entry.num_backing_objs();

        if self.geo.zoned {
            let slba = self.obj_slba(&entry, obj);
            self.cs.object_destroy(self.dev.as_ref(), slba, nbacking)?;
            for i in 0..u64::from(nbacking) {
                let zone = slba / self.geo.nzsect + i;
                self.open_zones.retain(|&z| z != zone);
            }
        }

        if hdr.refcount < nbacking {
            return Err(Error::Corruption(format!(
                "slab {} refcount {} below the {} objects being destroyed",
                obj.slab_id, hdr.refcount, nbacking
            )));
        }
        let from = slab_bucket(&hdr, &entry);
        self.slab_cache.obj_free(obj.slab_id, obj.entry_ndx, nbacking)?;
        let mut hdr = hdr;
        hdr.refcount -= nbacking;
        self.set_slab_header(obj.slab_id, &hdr);

        let to = slab_bucket(&hdr, &entry);
        if from != to {
            self.slab_list_remove(pool.ndx, from, obj.slab_id)?;
            self.slab_list_prepend(pool.ndx, to, obj.slab_id)?;
        }
        log::debug!("[object] destroyed ({}, {})", obj.slab_id, obj.entry_ndx);
        Ok(())
    }

    /// Read `buf.len()` bytes from the object, starting at `offset`.
    pub fn object_read(
        &self,
        pool: &PoolHandle,
        obj: &ObjectHandle,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<()> {
        let entry = self.checked_entry(pool)?;
        self.check_io_bounds(&entry, offset, buf.len())?;
        let soffset = self.obj_slba(&entry, obj) * u64::from(self.geo.lb_nbytes);
        if !entry.striped() {
            return self.dev.read(soffset + offset, buf);
        }
        let pieces = stripe_pieces(
            soffset,
            u64::from(entry.obj_nlb) * u64::from(self.geo.lb_nbytes),
            entry.strp_nobjs,
            entry.strp_nbytes,
            offset,
            buf.len(),
        );
        let dev = self.dev.as_ref();
        crossbeam::thread::scope(|scope| -> Result<()> {
            let mut remaining: &mut [u8] = buf;
            let mut workers = Vec::with_capacity(pieces.len());
            for piece in &pieces {
                let (chunk, rest) = std::mem::take(&mut remaining).split_at_mut(piece.len);
                remaining = rest;
                let piece = *piece;
                workers.push(scope.spawn(move |_| dev.read(piece.dev_off, chunk)));
            }
            for worker in workers {
                worker.join().expect("striped read worker panicked")?;
            }
            Ok(())
        })
        .expect("striped read scope panicked")
    }

    /// Write `buf` to the object at `offset`.
    pub fn object_write(
        &mut self,
        pool: &PoolHandle,
        obj: &ObjectHandle,
        buf: &[u8],
        offset: u64,
    ) -> Result<()> {
        let entry = self.checked_entry(pool)?;
        self.check_io_bounds(&entry, offset, buf.len())?;
        let obj_nbytes = self.obj_nbytes(&entry);
        let soffset = self.obj_slba(&entry, obj) * u64::from(self.geo.lb_nbytes);

        let zones = if self.geo.zoned {
            let zones = self.touched_zones(&entry, obj, offset, buf.len());
            for &zone in &zones {
                self.manage_zone(zone)?;
            }
            zones
        } else {
            Vec::new()
        };

        let hints = self.dp.write_hints(
            self.dev.as_ref(),
            IoClass::DataWrite {
                slab_id: obj.slab_id,
                pool_ndx: pool.ndx,
                entry_ndx: obj.entry_ndx,
            },
        )?;

        if entry.striped() {
            let pieces = stripe_pieces(
                soffset,
                u64::from(entry.obj_nlb) * u64::from(self.geo.lb_nbytes),
                entry.strp_nobjs,
                entry.strp_nbytes,
                offset,
                buf.len(),
            );
            let dev = self.dev.as_ref();
            crossbeam::thread::scope(|scope| -> Result<()> {
                let mut remaining: &[u8] = buf;
                let mut workers = Vec::with_capacity(pieces.len());
                for piece in &pieces {
                    let (chunk, rest) = remaining.split_at(piece.len);
                    remaining = rest;
                    let piece = *piece;
                    let hints = hints;
                    workers.push(scope.spawn(move |_| dev.write(piece.dev_off, chunk, &hints)));
                }
                for worker in workers {
                    worker.join().expect("striped write worker panicked")?;
                }
                Ok(())
            })
            .expect("striped write scope panicked")?;
        } else {
            self.dev.write(soffset + offset, buf, &hints)?;
        }

        // a write that reaches the object end fills its zones
        if self.geo.zoned && offset + buf.len() as u64 == obj_nbytes {
            for zone in zones {
                self.open_zones.retain(|&z| z != zone);
            }
        }
        Ok(())
    }

    /// Read-modify-write at logical-block granularity around
    /// `[offset, offset + buf.len())`. Conventional, non-striped only.
    pub fn object_unaligned_write(
        &mut self,
        pool: &PoolHandle,
        obj: &ObjectHandle,
        buf: &[u8],
        offset: u64,
    ) -> Result<()> {
        if self.geo.zoned {
            return Err(Error::inval(
                "unaligned writes are read-modify-write and need a conventional device",
            ));
        }
        let entry = self.checked_entry(pool)?;
        if entry.striped() {
            return Err(Error::inval("unaligned writes are not supported on striped pools"));
        }
        self.check_io_bounds(&entry, offset, buf.len())?;

        let lb = u64::from(self.geo.lb_nbytes);
        let orig_sb = self.obj_slba(&entry, obj) * lb + offset;
        let orig_eb = orig_sb + buf.len() as u64;
        let aligned_sb = orig_sb / lb * lb;
        let aligned_eb = ceil_div(orig_eb, lb) * lb;

        let mut bounce = self.alloc_buf((aligned_eb - aligned_sb) as usize);
        if aligned_sb < orig_sb {
            self.dev.read(aligned_sb, &mut bounce[..lb as usize])?;
        }
        if aligned_eb > orig_eb {
            let tail = bounce.len() - lb as usize;
            self.dev.read(aligned_eb - lb, &mut bounce[tail..])?;
        }
        let start = (orig_sb - aligned_sb) as usize;
        bounce[start..start + buf.len()].copy_from_slice(buf);

        let hints = self.dp.write_hints(
            self.dev.as_ref(),
            IoClass::DataWrite {
                slab_id: obj.slab_id,
                pool_ndx: pool.ndx,
                entry_ndx: obj.entry_ndx,
            },
        )?;
        self.dev.write(aligned_sb, &bounce, &hints)
    }

    /// Seal the object: no further writes are expected. Zone-finish on
    /// zoned devices, a no-op otherwise.
    pub fn object_seal(&mut self, pool: &PoolHandle, obj: &ObjectHandle) -> Result<()> {
        let entry = self.checked_entry(pool)?;
        let nbacking = entry.num_backing_objs();
        let slba = self.obj_slba(&entry, obj);
        self.cs.object_seal(self.dev.as_ref(), slba, nbacking)?;
        if self.geo.zoned {
            for i in 0..u64::from(nbacking) {
                let zone = slba / self.geo.nzsect + i;
                self.open_zones.retain(|&z| z != zone);
            }
        }
        Ok(())
    }

    /// First LBA of the object on the data device.
    pub(crate) fn obj_slba(&self, entry: &PoolEntry, obj: &ObjectHandle) -> u64 {
        self.cs.slab_offset(&self.geo, obj.slab_id)
            + u64::from(entry.obj_nlb) * u64::from(obj.entry_ndx)
    }

    /// Object size in bytes, accounting for striping.
    pub(crate) fn obj_nbytes(&self, entry: &PoolEntry) -> u64 {
        u64::from(entry.obj_nlb)
            * u64::from(self.geo.lb_nbytes)
            * u64::from(entry.num_backing_objs())
    }

    fn check_io_bounds(&self, entry: &PoolEntry, offset: u64, len: usize) -> Result<()> {
        let size = self.obj_nbytes(entry);
        if offset + len as u64 > size {
            return Err(Error::inval(format!(
                "transfer [{offset}, {}) exceeds the object size {size}",
                offset + len as u64
            )));
        }
        Ok(())
    }

    fn check_obj_range(
        &self,
        entry: &PoolEntry,
        hdr: &crate::ondisk::SlabHeader,
        obj: &ObjectHandle,
    ) -> Result<()> {
        let nbacking = entry.num_backing_objs();
        if u64::from(obj.entry_ndx) + u64::from(nbacking) > u64::from(hdr.maxcount) {
            return Err(Error::inval(format!(
                "object index {} out of range for slab {} ({} entries)",
                obj.entry_ndx, obj.slab_id, hdr.maxcount
            )));
        }
        Ok(())
    }

    /// Zone numbers a write to `[offset, offset + len)` lands in.
    fn touched_zones(
        &self,
        entry: &PoolEntry,
        obj: &ObjectHandle,
        offset: u64,
        len: usize,
    ) -> Vec<u64> {
        let slba = self.obj_slba(entry, obj);
        let base_zone = slba / self.geo.nzsect;
        if !entry.striped() {
            // a zoned pool's object is exactly one zone
            return vec![base_zone];
        }
        let chunk = u64::from(entry.strp_nbytes);
        let nsubs = u64::from(entry.strp_nobjs);
        if len == 0 {
            return Vec::new();
        }
        let g_first = offset / chunk;
        let g_last = (offset + len as u64 - 1) / chunk;
        let mut zones: Vec<u64> = Vec::new();
        for g in g_first..=g_last.min(g_first + nsubs - 1) {
            let zone = base_zone + g % nsubs;
            if !zones.contains(&zone) {
                zones.push(zone);
            }
        }
        zones.sort_unstable();
        zones
    }

    /// Track an opened zone, finishing the oldest one when the device's
    /// open-resources limit is hit.
    fn manage_zone(&mut self, zone: u64) -> Result<()> {
        if self.open_zones.contains(&zone) {
            return Ok(());
        }
        let mor = self.dev.max_open_zones();
        if mor > 0 && self.open_zones.len() as u32 >= mor {
            if let Some(oldest) = self.open_zones.pop_front() {
                log::debug!("[zoned] open-zone limit {mor} hit, finishing zone {oldest}");
                self.dev
                    .zone_mgmt(oldest * self.geo.nzsect, crate::device::ZoneAction::Finish)?;
            }
        }
        self.open_zones.push_back(zone);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_packs_into_root_object_form() {
        let obj = ObjectHandle { slab_id: 7, entry_ndx: 3 };
        assert_eq!(ObjectHandle::from_u64(obj.to_u64()), obj);
        assert_eq!(obj.to_u64() & 0xffff_ffff, 7);
    }

    #[test]
    fn stripe_pieces_round_robin() {
        // S=4 sub-objects of 8192 B, chunks of 2048 B, full first row
        let pieces = stripe_pieces(0, 8192, 4, 2048, 0, 8192);
        assert_eq!(
            pieces,
            vec![
                StripePiece { dev_off: 0, len: 2048 },
                StripePiece { dev_off: 8192, len: 2048 },
                StripePiece { dev_off: 16384, len: 2048 },
                StripePiece { dev_off: 24576, len: 2048 },
            ]
        );
    }

    #[test]
    fn stripe_pieces_second_row_lands_after_first() {
        // chunk 4 of 4 wraps back to sub-object 0, at its second chunk
        let pieces = stripe_pieces(0, 8192, 4, 2048, 8192, 2048);
        assert_eq!(pieces, vec![StripePiece { dev_off: 2048, len: 2048 }]);
    }

    #[test]
    fn stripe_pieces_handle_unaligned_offsets() {
        // start mid-chunk: first piece is the chunk remainder
        let pieces = stripe_pieces(0, 8192, 2, 1024, 512, 1536);
        assert_eq!(
            pieces,
            vec![
                StripePiece { dev_off: 512, len: 512 },
                StripePiece { dev_off: 8192, len: 1024 },
            ]
        );
    }

    #[test]
    fn stripe_pieces_cover_the_whole_transfer() {
        let pieces = stripe_pieces(4096, 16384, 3, 1000, 2500, 9000);
        let total: usize = pieces.iter().map(|p| p.len).sum();
        assert_eq!(total, 9000);
    }
}
