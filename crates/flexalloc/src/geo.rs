// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! Disk geometry: derive every metadata offset from the super block.
//!
//! Nothing here is stored in full on disk. mkfs runs [`mkfs_calc`] to fix
//! `nslabs`/`npools`, afterwards [`Geo::from_super`] recomputes the same
//! layout from the handful of values the super block carries.

use crate::bits::ceil_div;
use crate::error::{Error, Result};
use crate::freelist;
use crate::hash;
use crate::ondisk::{POOL_ENTRY_BYTES, SLAB_HEADER_BYTES, SLAB_LIST_WORDS_BYTES, SUPER_BYTES};

/// Pool-segment sub-layout, in logical blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSgmt {
    /// Blocks for the pool freelist (1 bit per pool, rounded up).
    pub freelist_nlb: u32,
    /// Blocks for the hash table header plus slot array.
    pub htbl_nlb: u32,
    /// Slots in the hash table (2x the pool count).
    pub htbl_tbl_size: u32,
    /// Blocks for the pool entry records.
    pub entries_nlb: u32,
}

impl PoolSgmt {
    #[must_use]
    pub fn nblocks(&self) -> u32 {
        self.freelist_nlb + self.htbl_nlb + self.entries_nlb
    }
}

/// Derived geometry of a formatted device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geo {
    /// Total logical blocks of the data device.
    pub nlb: u64,
    /// Logical-block width in bytes.
    pub lb_nbytes: u32,
    /// Slab size in logical blocks.
    pub slab_nlb: u32,
    pub npools: u32,
    pub nslabs: u32,
    /// Blocks reserved for the super block.
    pub md_nlb: u32,
    pub pool_sgmt: PoolSgmt,
    /// Blocks for slab headers plus the trailing free-list words.
    pub slab_sgmt_nlb: u32,
    /// Whether the data device is zoned.
    pub zoned: bool,
    /// Sectors per zone (0 on conventional devices).
    pub nzsect: u64,
    /// Whether metadata lives on a separate device.
    pub split_md: bool,
}

/// Blocks needed for `nslabs` slab headers plus the trailing count/head/tail words.
#[must_use]
pub fn slab_sgmt_calc(nslabs: u32, lb_nbytes: u32) -> u32 {
    let nbytes = u64::from(nslabs) * SLAB_HEADER_BYTES as u64 + SLAB_LIST_WORDS_BYTES as u64;
    ceil_div(nbytes, u64::from(lb_nbytes)) as u32
}

/// Blocks needed for the pool segment supporting `npools` pools.
#[must_use]
pub fn pool_sgmt_calc(npools: u32, lb_nbytes: u32) -> PoolSgmt {
    let lb = u64::from(lb_nbytes);
    // Over-provision the hash table by 2x: open addressing degrades
    // sharply as the table fills.
    let htbl_tbl_size = npools * 2;
    PoolSgmt {
        freelist_nlb: ceil_div(freelist::size(npools) as u64, lb) as u32,
        htbl_tbl_size,
        htbl_nlb: ceil_div(
            hash::HDR_BYTES as u64 + u64::from(htbl_tbl_size) * hash::SLOT_BYTES as u64,
            lb,
        ) as u32,
        entries_nlb: ceil_div(u64::from(npools) * POOL_ENTRY_BYTES as u64, lb) as u32,
    }
}

/// Most slabs that fit into `blocks` while leaving room for their headers.
#[must_use]
pub fn nslabs_max(blocks: u64, slab_nlb: u32, lb_nbytes: u32) -> u32 {
    let mut nslabs = (blocks / u64::from(slab_nlb)) as u32;
    while nslabs > 0 {
        let hdr_nlb = slab_sgmt_calc(nslabs, lb_nbytes);
        if blocks - u64::from(nslabs) * u64::from(slab_nlb) >= u64::from(hdr_nlb) {
            break;
        }
        nslabs -= 1;
    }
    nslabs
}

/// Like [`nslabs_max`], but slab headers and per-slab freelists live on a
/// metadata device with `md_blocks` blocks to spare.
#[must_use]
pub fn nslabs_max_mddev(blocks: u64, slab_nlb: u32, lb_nbytes: u32, md_blocks: u64) -> u32 {
    let mut nslabs = (blocks / u64::from(slab_nlb)) as u32;
    while nslabs > 0 {
        // one LBA per slab for its object freelist, after the headers
        let need = u64::from(slab_sgmt_calc(nslabs, lb_nbytes)) + u64::from(nslabs);
        if need <= md_blocks {
            break;
        }
        nslabs -= 1;
    }
    nslabs
}

/// Inputs to [`mkfs_calc`], read off the devices being formatted.
#[derive(Debug, Clone, Copy)]
pub struct MkfsGeoInput {
    pub nlb: u64,
    pub lb_nbytes: u32,
    pub zoned: bool,
    pub nzsect: u64,
    /// Total blocks of the metadata device, if separate.
    pub md_dev_nlb: Option<u64>,
}

/// Compute the full geometry for a new system.
///
/// `npools == 0` means "assume roughly one pool per slab".
pub fn mkfs_calc(input: &MkfsGeoInput, npools: u32, slab_nlb: u32) -> Result<Geo> {
    if slab_nlb == 0 {
        return Err(Error::inval("slab size must be at least one logical block"));
    }
    if input.zoned {
        if input.md_dev_nlb.is_none() {
            return Err(Error::inval(
                "zoned devices need a separate metadata device for slab freelists",
            ));
        }
        if input.nzsect == 0 || u64::from(slab_nlb) % input.nzsect != 0 {
            return Err(Error::inval(format!(
                "slab size {} is not a multiple of the zone size {}",
                slab_nlb, input.nzsect
            )));
        }
    }

    let md_nlb = ceil_div(SUPER_BYTES as u64, u64::from(input.lb_nbytes)) as u32;

    // First pass: estimate the slab count before the pool-segment
    // overhead is known.
    let approx = match input.md_dev_nlb {
        None => nslabs_max(
            input.nlb.saturating_sub(u64::from(md_nlb)),
            slab_nlb,
            input.lb_nbytes,
        ),
        Some(md_nlb_total) => {
            nslabs_max_mddev(input.nlb, slab_nlb, input.lb_nbytes, md_nlb_total)
        }
    };
    if approx == 0 {
        return Err(Error::inval(
            "slab size too large - not enough space to allocate any slabs",
        ));
    }
    if npools > approx {
        // every pool needs at least one slab to function
        return Err(Error::inval(format!(
            "npools {npools} exceeds the maximum slab count {approx}"
        )));
    }
    let mut npools_eff = if npools == 0 { approx } else { npools };

    let mut pool_sgmt = pool_sgmt_calc(npools_eff, input.lb_nbytes);

    // Second pass with the pool segment subtracted.
    let nslabs = match input.md_dev_nlb {
        None => nslabs_max(
            input
                .nlb
                .saturating_sub(u64::from(md_nlb) + u64::from(pool_sgmt.nblocks())),
            slab_nlb,
            input.lb_nbytes,
        ),
        Some(md_nlb_total) => nslabs_max_mddev(
            input.nlb,
            slab_nlb,
            input.lb_nbytes,
            md_nlb_total.saturating_sub(u64::from(md_nlb) + u64::from(pool_sgmt.nblocks())),
        ),
    };
    if nslabs == 0 {
        return Err(Error::inval(
            "slab size too large - not enough space to allocate any slabs",
        ));
    }
    if npools > nslabs {
        return Err(Error::inval(format!(
            "npools {npools} exceeds the usable slab count {nslabs}"
        )));
    }
    if npools_eff > nslabs {
        // inferred pool count, scale it back to what we can actually serve
        npools_eff = nslabs;
        pool_sgmt = pool_sgmt_calc(npools_eff, input.lb_nbytes);
    }

    Ok(Geo {
        nlb: input.nlb,
        lb_nbytes: input.lb_nbytes,
        slab_nlb,
        npools: npools_eff,
        nslabs,
        md_nlb,
        pool_sgmt,
        slab_sgmt_nlb: slab_sgmt_calc(nslabs, input.lb_nbytes),
        zoned: input.zoned,
        nzsect: input.nzsect,
        split_md: input.md_dev_nlb.is_some(),
    })
}

impl Geo {
    /// Recompute the geometry of an existing system from its super block.
    #[must_use]
    pub fn from_super(
        super_blk: &crate::ondisk::Super,
        nlb: u64,
        lb_nbytes: u32,
        zoned: bool,
        nzsect: u64,
        split_md: bool,
    ) -> Geo {
        Geo {
            nlb,
            lb_nbytes,
            slab_nlb: super_blk.slab_nlb,
            npools: super_blk.npools,
            nslabs: super_blk.nslabs,
            md_nlb: super_blk.md_nlb,
            pool_sgmt: pool_sgmt_calc(super_blk.npools, lb_nbytes),
            slab_sgmt_nlb: slab_sgmt_calc(super_blk.nslabs, lb_nbytes),
            zoned,
            nzsect,
            split_md,
        }
    }

    /// Total metadata blocks: super, pool segment, slab segment.
    #[must_use]
    pub fn md_nblocks(&self) -> u32 {
        self.md_nlb + self.pool_sgmt.nblocks() + self.slab_sgmt_nlb
    }

    /// Metadata size in bytes (the size of the in-memory metadata buffer).
    #[must_use]
    pub fn md_nbytes(&self) -> usize {
        self.md_nblocks() as usize * self.lb_nbytes as usize
    }

    /// First LBA of the slab bodies on the data device.
    #[must_use]
    pub fn slabs_lb_base(&self) -> u64 {
        if self.split_md {
            // the data device holds only slab bodies
            0
        } else {
            u64::from(self.md_nblocks())
        }
    }

    /// LBA on the metadata device of the object freelist of `slab_id`.
    ///
    /// Only meaningful on split-metadata setups, where each slab gets one
    /// LBA right after the metadata region.
    #[must_use]
    pub fn md_flist_lba(&self, slab_id: u32) -> u64 {
        u64::from(self.md_nblocks()) + u64::from(slab_id)
    }

    /// Unaligned LBA of `slab_id` (the command set may round it up on
    /// zoned devices).
    #[must_use]
    pub fn slab_lb_off(&self, slab_id: u32) -> u64 {
        self.slabs_lb_base() + u64::from(slab_id) * u64::from(self.slab_nlb)
    }

    // --- byte offsets of the metadata-buffer subregions ---

    #[must_use]
    pub fn pool_base_off(&self) -> usize {
        self.md_nlb as usize * self.lb_nbytes as usize
    }

    #[must_use]
    pub fn pool_freelist_off(&self) -> usize {
        self.pool_base_off()
    }

    #[must_use]
    pub fn htbl_hdr_off(&self) -> usize {
        self.pool_base_off() + self.pool_sgmt.freelist_nlb as usize * self.lb_nbytes as usize
    }

    #[must_use]
    pub fn htbl_slots_off(&self) -> usize {
        self.htbl_hdr_off() + hash::HDR_BYTES
    }

    #[must_use]
    pub fn pool_entries_off(&self) -> usize {
        self.pool_base_off()
            + (self.pool_sgmt.freelist_nlb + self.pool_sgmt.htbl_nlb) as usize
                * self.lb_nbytes as usize
    }

    #[must_use]
    pub fn pool_entry_off(&self, ndx: u32) -> usize {
        self.pool_entries_off() + ndx as usize * POOL_ENTRY_BYTES
    }

    #[must_use]
    pub fn slab_sgmt_off(&self) -> usize {
        (self.md_nlb + self.pool_sgmt.nblocks()) as usize * self.lb_nbytes as usize
    }

    #[must_use]
    pub fn slab_header_off(&self, slab_id: u32) -> usize {
        self.slab_sgmt_off() + slab_id as usize * SLAB_HEADER_BYTES
    }

    /// Offset of the free-slab `count` word (followed by `head`, `tail`).
    #[must_use]
    pub fn fslab_words_off(&self) -> usize {
        self.slab_sgmt_off() + self.slab_sgmt_nlb as usize * self.lb_nbytes as usize
            - SLAB_LIST_WORDS_BYTES
    }
}
