// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! The filesystem facade: open, close, sync, and ownership of the
//! metadata buffer.
//!
//! An [`Fs`] owns both devices, the whole metadata region as one byte
//! buffer, and the slab freelist cache. Every mutating operation takes
//! `&mut self`; callers wanting concurrency serialize externally.
//! Dropping an `Fs` without calling [`Fs::close`] discards unflushed
//! metadata, exactly like [`Fs::close_noflush`].

use crate::cs::{self, CommandSet};
use crate::device::{self, BlockDevice, DeviceKind, IoBuf};
use crate::dp::{self, DataPlacement, DpConfig, IoClass};
use crate::error::{Error, Result};
use crate::freelist;
use crate::geo::Geo;
use crate::hash;
use crate::ondisk::{PoolEntry, SlabHeader, Super, POOL_ENTRY_BYTES, SLAB_HEADER_BYTES};
use crate::slabcache::SlabCache;
use byteorder::{ByteOrder, LittleEndian};
use std::collections::VecDeque;

/// Options for [`Fs::open`].
#[derive(Debug, Clone, Default)]
pub struct OpenOpts {
    pub dev_uri: String,
    /// Separate metadata device; the data device doubles as one if unset.
    pub md_dev_uri: Option<String>,
    /// Data-placement adapter selection.
    pub dp: DpConfig,
}

impl OpenOpts {
    #[must_use]
    pub fn new(dev_uri: impl Into<String>) -> OpenOpts {
        OpenOpts { dev_uri: dev_uri.into(), ..OpenOpts::default() }
    }

    #[must_use]
    pub fn md_dev(mut self, uri: impl Into<String>) -> OpenOpts {
        self.md_dev_uri = Some(uri.into());
        self
    }

    #[must_use]
    pub fn dp(mut self, dp: DpConfig) -> OpenOpts {
        self.dp = dp;
        self
    }
}

/// An open flexalloc system.
pub struct Fs {
    pub(crate) dev: Box<dyn BlockDevice>,
    pub(crate) md_dev: Option<Box<dyn BlockDevice>>,
    pub(crate) geo: Geo,
    /// The entire on-disk metadata region, mutated in place and written
    /// back as one sequential write on flush.
    pub(crate) meta: IoBuf,
    /// Live hash-table length, copied into the on-disk header at flush.
    pub(crate) htbl_len: u32,
    pub(crate) slab_cache: SlabCache,
    pub(crate) cs: Box<dyn CommandSet>,
    pub(crate) dp: Box<dyn DataPlacement>,
    /// Zones currently opened by object writes, oldest first.
    pub(crate) open_zones: VecDeque<u64>,
}

impl std::fmt::Debug for Fs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fs").finish_non_exhaustive()
    }
}

impl Fs {
    /// Open an existing system.
    ///
    /// Reads the super block from the metadata device (the data device
    /// when no separate one is configured), recomputes the geometry, and
    /// pulls the whole metadata region into memory.
    pub fn open(opts: &OpenOpts) -> Result<Fs> {
        let dev = device::open(&opts.dev_uri)?;
        let md_dev = opts.md_dev_uri.as_deref().map(device::open).transpose()?;
        device::sanity_check(dev.as_ref(), md_dev.as_deref())?;

        if matches!(opts.dp, DpConfig::Fdp(_)) && dev.kind() == DeviceKind::Zoned {
            return Err(Error::inval(
                "flexible data placement is not available on zoned devices",
            ));
        }

        let lb_nbytes = dev.lba_nbytes();
        let md_ref: &dyn BlockDevice = md_dev.as_deref().unwrap_or(dev.as_ref());

        let mut super_buf = IoBuf::alloc(lb_nbytes as usize, lb_nbytes as usize);
        md_ref.read(0, &mut super_buf)?;
        let super_blk = Super::read(&super_buf)?;

        let geo = Geo::from_super(
            &super_blk,
            dev.nlb(),
            lb_nbytes,
            dev.kind() == DeviceKind::Zoned,
            dev.nzsect(),
            md_dev.is_some(),
        );

        let mut meta = IoBuf::alloc(geo.md_nbytes(), lb_nbytes as usize);
        md_ref.read(0, &mut meta)?;

        let nslabs = geo.nslabs;
        let mut fs = Fs {
            cs: cs::for_device(dev.as_ref()),
            dp: dp::for_config(opts.dp),
            dev,
            md_dev,
            geo,
            meta,
            htbl_len: 0,
            slab_cache: SlabCache::new(nslabs),
            open_zones: VecDeque::new(),
        };
        fs.check_meta_consistency()?;
        fs.htbl_len = fs.htbl_hdr_len();
        log::debug!(
            "[fs] opened '{}': {} slabs x {} blocks, {} pools",
            opts.dev_uri,
            fs.geo.nslabs,
            fs.geo.slab_nlb,
            fs.geo.npools
        );
        Ok(fs)
    }

    fn check_meta_consistency(&self) -> Result<()> {
        let flist_len = freelist::len(self.pool_freelist());
        if flist_len != self.geo.npools {
            return Err(Error::Corruption(format!(
                "pool freelist length {flist_len} disagrees with super-block npools {}",
                self.geo.npools
            )));
        }
        let (size, len) = self.htbl_hdr();
        if size != self.geo.pool_sgmt.htbl_tbl_size {
            return Err(Error::Corruption(format!(
                "pool hash table sized {size}, geometry expects {}",
                self.geo.pool_sgmt.htbl_tbl_size
            )));
        }
        if len > size {
            return Err(Error::Corruption(format!(
                "pool hash table reports {len} live entries in {size} slots"
            )));
        }
        Ok(())
    }

    /// Flush metadata and release both devices.
    pub fn close(mut self) -> Result<()> {
        if self.geo.zoned {
            // leave no zone implicitly open
            let zones: Vec<u64> = self.open_zones.drain(..).collect();
            for zone in zones {
                let slba = zone * self.geo.nzsect;
                if let Err(err) = self.dev.zone_mgmt(slba, device::ZoneAction::Finish) {
                    log::warn!("[zoned] finishing zone {zone} at close failed: {err}");
                }
            }
        }
        self.flush()
    }

    /// Release everything *without* writing metadata changes back.
    ///
    /// Changes since the last flush are lost by definition.
    pub fn close_noflush(self) {
        drop(self);
    }

    /// Make all metadata changes durable.
    pub fn sync(&mut self) -> Result<()> {
        self.flush()
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        let md_hints = self.dp.write_hints(self.md_device(), IoClass::MdWrite)?;
        let failed = {
            let md_dev = self.md_dev.as_deref().unwrap_or(self.dev.as_ref());
            self.slab_cache.flush_all(md_dev, &self.geo, &md_hints)
        };
        if failed > 0 {
            return Err(Error::Io(std::io::Error::other(format!(
                "{failed} slab freelists failed to flush"
            ))));
        }
        // the live hash-table length is authoritative; mirror it into
        // the on-disk header before the buffer goes out
        let len = self.htbl_len;
        self.set_htbl_hdr_len(len);
        let md_dev = self.md_dev.as_deref().unwrap_or(self.dev.as_ref());
        md_dev.write(0, &self.meta, &md_hints)?;
        log::debug!("[fs] metadata flushed ({} bytes)", self.meta.len());
        Ok(())
    }

    // --- queries ---

    /// Logical-block width of the data device in bytes.
    #[must_use]
    pub fn lb_nbytes(&self) -> u32 {
        self.geo.lb_nbytes
    }

    /// Whether the data device is zoned.
    #[must_use]
    pub fn is_zoned(&self) -> bool {
        self.geo.zoned
    }

    /// Sectors per zone of the data device (0 when conventional).
    #[must_use]
    pub fn nzsect(&self) -> u64 {
        self.geo.nzsect
    }

    /// Allocate a logical-block-aligned I/O buffer.
    #[must_use]
    pub fn alloc_buf(&self, nbytes: usize) -> IoBuf {
        IoBuf::alloc(nbytes, self.geo.lb_nbytes as usize)
    }

    /// The derived geometry (read-only).
    #[must_use]
    pub fn geometry(&self) -> &Geo {
        &self.geo
    }

    // --- internal plumbing shared by the pool/slab/object code ---

    pub(crate) fn md_device(&self) -> &dyn BlockDevice {
        self.md_dev.as_deref().unwrap_or(self.dev.as_ref())
    }

    pub(crate) fn pool_freelist(&self) -> &[u8] {
        let off = self.geo.pool_freelist_off();
        &self.meta[off..off + freelist::size(self.geo.npools)]
    }

    pub(crate) fn pool_freelist_mut(&mut self) -> &mut [u8] {
        let off = self.geo.pool_freelist_off();
        let size = freelist::size(self.geo.npools);
        &mut self.meta[off..off + size]
    }

    pub(crate) fn htbl_hdr(&self) -> (u32, u32) {
        let off = self.geo.htbl_hdr_off();
        (
            LittleEndian::read_u32(&self.meta[off..]),
            LittleEndian::read_u32(&self.meta[off + 4..]),
        )
    }

    pub(crate) fn htbl_hdr_len(&self) -> u32 {
        self.htbl_hdr().1
    }

    pub(crate) fn set_htbl_hdr_len(&mut self, len: u32) {
        let off = self.geo.htbl_hdr_off();
        LittleEndian::write_u32(&mut self.meta[off + 4..], len);
    }

    pub(crate) fn htbl(&self) -> &[u8] {
        let off = self.geo.htbl_slots_off();
        let size = self.geo.pool_sgmt.htbl_tbl_size as usize * hash::SLOT_BYTES;
        &self.meta[off..off + size]
    }

    pub(crate) fn htbl_mut(&mut self) -> &mut [u8] {
        let off = self.geo.htbl_slots_off();
        let size = self.geo.pool_sgmt.htbl_tbl_size as usize * hash::SLOT_BYTES;
        &mut self.meta[off..off + size]
    }

    pub(crate) fn pool_entry(&self, ndx: u32) -> PoolEntry {
        let off = self.geo.pool_entry_off(ndx);
        PoolEntry::read(&self.meta[off..off + POOL_ENTRY_BYTES])
    }

    pub(crate) fn set_pool_entry(&mut self, ndx: u32, entry: &PoolEntry) {
        let off = self.geo.pool_entry_off(ndx);
        entry.write(&mut self.meta[off..off + POOL_ENTRY_BYTES]);
    }

    pub(crate) fn slab_header(&self, slab_id: u32) -> Result<SlabHeader> {
        if slab_id >= self.geo.nslabs {
            return Err(Error::inval(format!(
                "slab id {slab_id} out of range (device has {} slabs)",
                self.geo.nslabs
            )));
        }
        let off = self.geo.slab_header_off(slab_id);
        Ok(SlabHeader::read(&self.meta[off..off + SLAB_HEADER_BYTES]))
    }

    pub(crate) fn set_slab_header(&mut self, slab_id: u32, hdr: &SlabHeader) {
        let off = self.geo.slab_header_off(slab_id);
        hdr.write(&mut self.meta[off..off + SLAB_HEADER_BYTES]);
    }

    pub(crate) fn fslab_num(&self) -> u32 {
        LittleEndian::read_u32(&self.meta[self.geo.fslab_words_off()..])
    }

    pub(crate) fn set_fslab_num(&mut self, num: u32) {
        let off = self.geo.fslab_words_off();
        LittleEndian::write_u32(&mut self.meta[off..], num);
    }

    pub(crate) fn fslab_head(&self) -> u32 {
        LittleEndian::read_u32(&self.meta[self.geo.fslab_words_off() + 4..])
    }

    pub(crate) fn set_fslab_head(&mut self, head: u32) {
        let off = self.geo.fslab_words_off() + 4;
        LittleEndian::write_u32(&mut self.meta[off..], head);
    }

    pub(crate) fn fslab_tail(&self) -> u32 {
        LittleEndian::read_u32(&self.meta[self.geo.fslab_words_off() + 8..])
    }

    pub(crate) fn set_fslab_tail(&mut self, tail: u32) {
        let off = self.geo.fslab_words_off() + 8;
        LittleEndian::write_u32(&mut self.meta[off..], tail);
    }
}
