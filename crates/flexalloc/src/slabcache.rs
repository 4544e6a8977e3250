// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! Per-slab object-freelist cache.
//!
//! Each slab keeps its own object-allocation freelist whose size depends
//! on how many objects fit, which in turn depends on the pool object
//! size; the freelists can therefore neither be sized ahead of time nor
//! packed into the main metadata region. They live at the tail of the
//! slab itself on conventional devices, or in the per-slab freelist
//! region of the metadata device on split setups.
//!
//! Freelists are loaded lazily, mutated in memory, and written back as a
//! unit on flush:
//!
//! ```text
//!        init (slab acquired)           alloc/free
//! Stale ------------------------> Dirty <---------+
//!   |                               ^  \__________|
//!   |  load (slab opened)           |
//!   +----------------------> Clean -+ alloc/free
//!        drop (slab released) resets to Stale
//! ```

use crate::bits::ceil_div;
use crate::device::{BlockDevice, IoBuf, WriteHints};
use crate::error::{Error, Result};
use crate::freelist;
use crate::geo::Geo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheState {
    /// Not initialized, or invalidated when the slab left its pool.
    Stale,
    /// In-memory contents match the device.
    Clean,
    /// Mutated since the last flush.
    Dirty,
}

struct CacheEntry {
    buf: Option<IoBuf>,
    state: CacheState,
}

pub(crate) struct SlabCache {
    entries: Vec<CacheEntry>,
}

/// Logical blocks needed by a freelist of `flist_len` slots.
pub(crate) fn flist_nlb(geo: &Geo, flist_len: u32) -> u64 {
    ceil_div(freelist::size(flist_len) as u64, u64::from(geo.lb_nbytes))
}

/// Device LBA where the freelist of `slab_id` lives.
///
/// Conventional same-device layout puts it in the last blocks of the
/// slab; with a separate metadata device each slab owns exactly one LBA
/// after the metadata region.
fn entry_lba(geo: &Geo, slab_id: u32, nlb: u64) -> u64 {
    if geo.split_md {
        geo.md_flist_lba(slab_id)
    } else {
        geo.slab_lb_off(slab_id) + u64::from(geo.slab_nlb) - nlb
    }
}

fn check_md_flist_bound(geo: &Geo, nlb: u64) -> Result<()> {
    if geo.split_md && nlb > 1 {
        // the metadata device reserves exactly one LBA per slab freelist
        return Err(Error::inval(format!(
            "slab freelist needs {nlb} blocks but the metadata device holds one per slab"
        )));
    }
    Ok(())
}

impl SlabCache {
    pub(crate) fn new(nslabs: u32) -> SlabCache {
        let mut entries = Vec::with_capacity(nslabs as usize);
        entries.resize_with(nslabs as usize, || CacheEntry { buf: None, state: CacheState::Stale });
        SlabCache { entries }
    }

    pub(crate) fn state(&self, slab_id: u32) -> CacheState {
        self.entries[slab_id as usize].state
    }

    /// Set up a fresh freelist for a slab just acquired by a pool.
    /// Incurs no device I/O; the entry starts out dirty.
    pub(crate) fn init(&mut self, geo: &Geo, slab_id: u32, flist_len: u32) -> Result<()> {
        let nlb = flist_nlb(geo, flist_len);
        check_md_flist_bound(geo, nlb)?;
        let e = &mut self.entries[slab_id as usize];
        if e.state != CacheState::Stale {
            return Err(Error::InvalidState("slab freelist cache entry already initialized"));
        }
        let mut buf = IoBuf::alloc(
            (nlb * u64::from(geo.lb_nbytes)) as usize,
            geo.lb_nbytes as usize,
        );
        freelist::init(&mut buf, flist_len);
        e.buf = Some(buf);
        e.state = CacheState::Dirty;
        Ok(())
    }

    /// Read an existing freelist from the device.
    pub(crate) fn load(
        &mut self,
        md_dev: &dyn BlockDevice,
        geo: &Geo,
        slab_id: u32,
        flist_len: u32,
    ) -> Result<()> {
        let nlb = flist_nlb(geo, flist_len);
        check_md_flist_bound(geo, nlb)?;
        let e = &mut self.entries[slab_id as usize];
        if e.state != CacheState::Stale {
            return Err(Error::InvalidState("slab freelist cache entry already loaded"));
        }
        let mut buf = IoBuf::alloc(
            (nlb * u64::from(geo.lb_nbytes)) as usize,
            geo.lb_nbytes as usize,
        );
        let off = entry_lba(geo, slab_id, nlb) * u64::from(geo.lb_nbytes);
        md_dev.read(off, &mut buf)?;
        // the caller knows how many objects the slab holds; disagreement
        // means the metadata is inconsistent
        let stored = freelist::len(&buf);
        if stored != flist_len {
            return Err(Error::Corruption(format!(
                "slab {slab_id} freelist reports length {stored}, expected {flist_len}"
            )));
        }
        e.buf = Some(buf);
        e.state = CacheState::Clean;
        Ok(())
    }

    /// Load unless the entry is already resident.
    pub(crate) fn ensure_loaded(
        &mut self,
        md_dev: &dyn BlockDevice,
        geo: &Geo,
        slab_id: u32,
        flist_len: u32,
    ) -> Result<()> {
        match self.state(slab_id) {
            CacheState::Stale => self.load(md_dev, geo, slab_id, flist_len),
            _ => Ok(()),
        }
    }

    /// Reserve `num` consecutive objects, returning the first entry index.
    pub(crate) fn obj_alloc(&mut self, slab_id: u32, num: u32) -> Result<u32> {
        let e = &mut self.entries[slab_id as usize];
        if e.state == CacheState::Stale {
            return Err(Error::InvalidState("slab freelist not resident"));
        }
        let buf = e.buf.as_mut().ok_or(Error::InvalidState("slab freelist not resident"))?;
        let ndx = freelist::alloc_run(buf, num)?;
        e.state = CacheState::Dirty;
        Ok(ndx)
    }

    /// Release `num` consecutive objects starting at `entry_ndx`.
    pub(crate) fn obj_free(&mut self, slab_id: u32, entry_ndx: u32, num: u32) -> Result<()> {
        let e = &mut self.entries[slab_id as usize];
        if e.state == CacheState::Stale {
            return Err(Error::InvalidState("slab freelist not resident"));
        }
        let buf = e.buf.as_mut().ok_or(Error::InvalidState("slab freelist not resident"))?;
        freelist::free_run(buf, entry_ndx, num)?;
        e.state = CacheState::Dirty;
        Ok(())
    }

    /// Reserved-slot count of a resident freelist.
    pub(crate) fn num_reserved(&self, slab_id: u32) -> Option<u32> {
        self.entries[slab_id as usize]
            .buf
            .as_ref()
            .map(|buf| freelist::num_reserved(buf))
    }

    /// Write a dirty entry back to its on-device position.
    pub(crate) fn flush_entry(
        &mut self,
        md_dev: &dyn BlockDevice,
        geo: &Geo,
        slab_id: u32,
        hints: &WriteHints,
    ) -> Result<()> {
        let e = &mut self.entries[slab_id as usize];
        if e.state != CacheState::Dirty {
            return Ok(());
        }
        let buf = e.buf.as_ref().ok_or(Error::InvalidState("dirty entry without buffer"))?;
        let nlb = flist_nlb(geo, freelist::len(buf));
        let off = entry_lba(geo, slab_id, nlb) * u64::from(geo.lb_nbytes);
        md_dev.write(off, buf, hints)?;
        e.state = CacheState::Clean;
        Ok(())
    }

    /// Invalidate an entry when its slab is released back to the system.
    pub(crate) fn drop_entry(&mut self, slab_id: u32) {
        let e = &mut self.entries[slab_id as usize];
        e.buf = None;
        e.state = CacheState::Stale;
    }

    /// Flush every dirty entry; returns how many failed.
    pub(crate) fn flush_all(
        &mut self,
        md_dev: &dyn BlockDevice,
        geo: &Geo,
        hints: &WriteHints,
    ) -> u32 {
        let mut failed = 0;
        for slab_id in 0..self.entries.len() as u32 {
            if let Err(err) = self.flush_entry(md_dev, geo, slab_id, hints) {
                log::warn!("[slab] flushing freelist of slab {slab_id} failed: {err}");
                failed += 1;
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceUri, FileDevice};
    use crate::geo::{mkfs_calc, MkfsGeoInput};

    fn test_geo() -> Geo {
        let input =
            MkfsGeoInput { nlb: 4096, lb_nbytes: 512, zoned: false, nzsect: 0, md_dev_nlb: None };
        mkfs_calc(&input, 2, 256).unwrap()
    }

    fn test_dev() -> (tempfile::TempPath, FileDevice) {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(4096 * 512).unwrap();
        let path = file.into_temp_path();
        let uri = DeviceUri::parse(&format!("file:{}", path.display())).unwrap();
        (path, FileDevice::open(&uri).unwrap())
    }

    #[test]
    fn init_alloc_flush_load_round_trip() {
        let geo = test_geo();
        let (_p, dev) = test_dev();
        let mut cache = SlabCache::new(geo.nslabs);

        cache.init(&geo, 0, 100).unwrap();
        assert_eq!(cache.state(0), CacheState::Dirty);
        assert_eq!(cache.obj_alloc(0, 1).unwrap(), 0);
        assert_eq!(cache.obj_alloc(0, 1).unwrap(), 1);
        cache.flush_entry(&dev, &geo, 0, &WriteHints::NONE).unwrap();
        assert_eq!(cache.state(0), CacheState::Clean);

        // drop and reload from the device
        cache.drop_entry(0);
        assert_eq!(cache.state(0), CacheState::Stale);
        cache.load(&dev, &geo, 0, 100).unwrap();
        assert_eq!(cache.state(0), CacheState::Clean);
        assert_eq!(cache.num_reserved(0), Some(2));
        // allocation resumes where the persisted state left off
        assert_eq!(cache.obj_alloc(0, 1).unwrap(), 2);
    }

    #[test]
    fn double_init_is_an_invalid_state() {
        let geo = test_geo();
        let mut cache = SlabCache::new(geo.nslabs);
        cache.init(&geo, 1, 10).unwrap();
        assert!(matches!(cache.init(&geo, 1, 10), Err(Error::InvalidState(_))));
    }

    #[test]
    fn load_rejects_length_mismatch() {
        let geo = test_geo();
        let (_p, dev) = test_dev();
        let mut cache = SlabCache::new(geo.nslabs);
        cache.init(&geo, 0, 64).unwrap();
        cache.flush_entry(&dev, &geo, 0, &WriteHints::NONE).unwrap();
        cache.drop_entry(0);
        assert!(matches!(cache.load(&dev, &geo, 0, 65), Err(Error::Corruption(_))));
    }

    #[test]
    fn ops_on_stale_entry_fail() {
        let geo = test_geo();
        let mut cache = SlabCache::new(geo.nslabs);
        assert!(matches!(cache.obj_alloc(0, 1), Err(Error::InvalidState(_))));
        assert!(matches!(cache.obj_free(0, 0, 1), Err(Error::InvalidState(_))));
    }

    #[test]
    fn flush_all_reports_failures() {
        let geo = test_geo();
        let (_p, dev) = test_dev();
        let mut cache = SlabCache::new(geo.nslabs);
        cache.init(&geo, 0, 16).unwrap();
        assert_eq!(cache.flush_all(&dev, &geo, &WriteHints::NONE), 0);
        assert_eq!(cache.state(0), CacheState::Clean);
    }
}
