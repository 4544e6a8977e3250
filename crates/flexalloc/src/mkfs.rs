// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! Formatting a device for flexalloc.
//!
//! mkfs derives the geometry, lays the metadata region out in one
//! zero-filled buffer (pool segment, slab segment, super block) and
//! writes it to the metadata device in a single sequential write. Every
//! slab starts life on the global free-slab list.

use crate::device::{self, DeviceKind, IoBuf, WriteHints, ZoneAction};
use crate::error::{Error, Result};
use crate::freelist;
use crate::geo::{self, Geo};
use crate::hash;
use crate::ondisk::{SlabHeader, Super, LIST_NULL, SLAB_HEADER_BYTES};
use byteorder::{ByteOrder, LittleEndian};

/// Parameters for [`mkfs`].
#[derive(Debug, Clone, Default)]
pub struct MkfsParams {
    pub dev_uri: String,
    /// Optional separate metadata device. Mandatory for zoned devices.
    pub md_dev_uri: Option<String>,
    /// Slab size in logical blocks.
    pub slab_nlb: u32,
    /// Number of pools to support; 0 assumes roughly one pool per slab.
    pub npools: u32,
}

/// Create a new flexalloc system on the device; returns the geometry
/// that was written.
pub fn mkfs(params: &MkfsParams) -> Result<Geo> {
    let dev = device::open(&params.dev_uri)?;
    let md_dev = params.md_dev_uri.as_deref().map(device::open).transpose()?;
    device::sanity_check(dev.as_ref(), md_dev.as_deref())?;

    if dev.kind() == DeviceKind::Zoned {
        if md_dev.is_none() {
            return Err(Error::inval(
                "zoned devices need a separate metadata device (--md-dev)",
            ));
        }
        // start from a clean slate, every zone empty
        dev.zone_mgmt(0, ZoneAction::ResetAll)?;
    }

    let input = geo::MkfsGeoInput {
        nlb: dev.nlb(),
        lb_nbytes: dev.lba_nbytes(),
        zoned: dev.kind() == DeviceKind::Zoned,
        nzsect: dev.nzsect(),
        md_dev_nlb: md_dev.as_deref().map(|dev| dev.nlb()),
    };
    let geo = geo::mkfs_calc(&input, params.npools, params.slab_nlb)?;

    let mut meta = IoBuf::alloc(geo.md_nbytes(), geo.lb_nbytes as usize);
    init_pool_sgmt(&mut meta, &geo);
    init_slab_sgmt(&mut meta, &geo);
    Super {
        nslabs: geo.nslabs,
        slab_nlb: geo.slab_nlb,
        npools: geo.npools,
        md_nlb: geo.md_nlb,
    }
    .write(&mut meta);

    let md_ref = md_dev.as_deref().unwrap_or(dev.as_ref());
    md_ref.write(0, &meta, &WriteHints::NONE)?;
    log::debug!(
        "[mkfs] formatted '{}': {} slabs x {} blocks, {} pools, {} metadata blocks",
        params.dev_uri,
        geo.nslabs,
        geo.slab_nlb,
        geo.npools,
        geo.md_nblocks()
    );
    Ok(geo)
}

fn init_pool_sgmt(meta: &mut [u8], geo: &Geo) {
    let off = geo.pool_freelist_off();
    let size = freelist::size(geo.npools);
    freelist::init(&mut meta[off..off + size], geo.npools);

    // hash-table header carries the slot count and the live length
    let hdr = geo.htbl_hdr_off();
    LittleEndian::write_u32(&mut meta[hdr..], geo.pool_sgmt.htbl_tbl_size);
    LittleEndian::write_u32(&mut meta[hdr + 4..], 0);

    let slots = geo.htbl_slots_off();
    let slots_len = geo.pool_sgmt.htbl_tbl_size as usize * hash::SLOT_BYTES;
    hash::init_slots(&mut meta[slots..slots + slots_len], geo.pool_sgmt.htbl_tbl_size);

    // pool entries stay zeroed until pool_create claims them
}

fn init_slab_sgmt(meta: &mut [u8], geo: &Geo) {
    // chain every slab into the free list: 0 <-> 1 <-> ... <-> n-1
    for slab_id in 0..geo.nslabs {
        let hdr = SlabHeader {
            pool: 0,
            prev: if slab_id == 0 { LIST_NULL } else { slab_id - 1 },
            next: if slab_id + 1 == geo.nslabs { LIST_NULL } else { slab_id + 1 },
            refcount: 0,
            maxcount: 0,
        };
        let off = geo.slab_header_off(slab_id);
        hdr.write(&mut meta[off..off + SLAB_HEADER_BYTES]);
    }
    let words = geo.fslab_words_off();
    LittleEndian::write_u32(&mut meta[words..], geo.nslabs);
    LittleEndian::write_u32(&mut meta[words + 4..], 0);
    LittleEndian::write_u32(&mut meta[words + 8..], geo.nslabs - 1);
}
