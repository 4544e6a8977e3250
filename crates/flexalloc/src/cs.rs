// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! Command-set adapter: conventional vs. zoned behaviour.
//!
//! The allocator core is command-set agnostic; everything a zoned device
//! does differently (object sizing rules, slab alignment, seal/reset on
//! object boundaries, trim) sits behind [`CommandSet`]. The concrete
//! adapter is picked once at open time from the device kind.

use crate::device::{BlockDevice, DeviceKind, ZoneAction};
use crate::error::{Error, Result};
use crate::geo::Geo;

pub(crate) trait CommandSet: Send + Sync {
    /// Validate the object size of a pool about to be created.
    fn pool_check(&self, obj_nlb: u32) -> Result<()>;

    /// Device LBA of the first block of `slab_id`.
    fn slab_offset(&self, geo: &Geo, slab_id: u32) -> u64;

    /// Seal an object: no further writes expected.
    fn object_seal(&self, dev: &dyn BlockDevice, obj_slba: u64, nbacking: u32) -> Result<()>;

    /// Device-side teardown when an object is destroyed.
    fn object_destroy(&self, dev: &dyn BlockDevice, obj_slba: u64, nbacking: u32) -> Result<()>;

    /// Hint that a released slab's range holds no useful data. Best-effort.
    fn slab_trim(&self, dev: &dyn BlockDevice, slab_slba: u64, slab_nlb: u32) -> Result<()>;
}

/// Pick the adapter for the data device.
pub(crate) fn for_device(dev: &dyn BlockDevice) -> Box<dyn CommandSet> {
    match dev.kind() {
        DeviceKind::Conventional => Box::new(ConventionalCs),
        DeviceKind::Zoned => Box::new(ZonedCs { nzsect: dev.nzsect() }),
    }
}

pub(crate) struct ConventionalCs;

impl CommandSet for ConventionalCs {
    fn pool_check(&self, _obj_nlb: u32) -> Result<()> {
        Ok(())
    }

    fn slab_offset(&self, geo: &Geo, slab_id: u32) -> u64 {
        geo.slab_lb_off(slab_id)
    }

    fn object_seal(&self, _dev: &dyn BlockDevice, _obj_slba: u64, _nbacking: u32) -> Result<()> {
        Ok(())
    }

    fn object_destroy(
        &self,
        _dev: &dyn BlockDevice,
        _obj_slba: u64,
        _nbacking: u32,
    ) -> Result<()> {
        Ok(())
    }

    fn slab_trim(&self, dev: &dyn BlockDevice, slab_slba: u64, slab_nlb: u32) -> Result<()> {
        dev.deallocate(slab_slba, u64::from(slab_nlb))
    }
}

pub(crate) struct ZonedCs {
    nzsect: u64,
}

impl CommandSet for ZonedCs {
    fn pool_check(&self, obj_nlb: u32) -> Result<()> {
        if u64::from(obj_nlb) != self.nzsect {
            return Err(Error::inval(format!(
                "object size {obj_nlb} must equal the zone size {} on a zoned device",
                self.nzsect
            )));
        }
        Ok(())
    }

    fn slab_offset(&self, geo: &Geo, slab_id: u32) -> u64 {
        let off = geo.slab_lb_off(slab_id);
        match off % self.nzsect {
            0 => off,
            rem => off + (self.nzsect - rem),
        }
    }

    fn object_seal(&self, dev: &dyn BlockDevice, obj_slba: u64, nbacking: u32) -> Result<()> {
        // one zone per backing sub-object
        for i in 0..u64::from(nbacking) {
            dev.zone_mgmt(obj_slba + self.nzsect * i, ZoneAction::Finish)?;
        }
        Ok(())
    }

    fn object_destroy(&self, dev: &dyn BlockDevice, obj_slba: u64, nbacking: u32) -> Result<()> {
        for i in 0..u64::from(nbacking) {
            dev.zone_mgmt(obj_slba + self.nzsect * i, ZoneAction::Reset)?;
        }
        Ok(())
    }

    fn slab_trim(&self, _dev: &dyn BlockDevice, _slab_slba: u64, _slab_nlb: u32) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{mkfs_calc, MkfsGeoInput};

    #[test]
    fn zoned_pool_check_requires_zone_sized_objects() {
        let cs = ZonedCs { nzsect: 128 };
        assert!(cs.pool_check(128).is_ok());
        assert!(cs.pool_check(64).is_err());
        assert!(cs.pool_check(256).is_err());
    }

    #[test]
    fn zoned_slab_offset_rounds_up_to_zone_boundary() {
        let input = MkfsGeoInput {
            nlb: 4096,
            lb_nbytes: 512,
            zoned: true,
            nzsect: 128,
            md_dev_nlb: Some(1024),
        };
        let geo = mkfs_calc(&input, 2, 256).unwrap();
        let cs = ZonedCs { nzsect: 128 };
        // split-metadata layout starts slabs at LBA 0, already aligned
        assert_eq!(cs.slab_offset(&geo, 0) % 128, 0);
        assert_eq!(cs.slab_offset(&geo, 1) % 128, 0);
        assert_eq!(cs.slab_offset(&geo, 1), 256);
    }
}
