// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! Data-placement adapter.
//!
//! A hook invoked before every write submission. The default adapter
//! adds nothing; the flexible-data-placement adapter attaches a
//! placement identifier chosen by the binding policy fixed at open time.
//! Metadata writes always carry the reserved identifier 0 so allocator
//! state never shares a reclaim unit with object data.

use crate::device::{BlockDevice, WriteHints};
use crate::error::{Error, Result};
use parking_lot::Mutex;

/// Upper bound on cached (binding -> placement id) pairs.
const MAX_CACHED_PIDS: usize = 60;

/// Placement identifier reserved for metadata writes.
const MD_PID: u32 = 0;

/// Data-placement selection, part of the open options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DpConfig {
    /// No placement hints.
    #[default]
    Null,
    /// Flexible data placement with the given binding policy.
    Fdp(FdpBinding),
}

/// What a placement identifier is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdpBinding {
    PerSlab,
    PerPool,
    PerObject,
    /// A fresh identifier on every write; nothing is cached.
    PerWrite,
}

/// Classifies a write for hint preparation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IoClass {
    MdWrite,
    DataWrite {
        slab_id: u32,
        pool_ndx: u32,
        entry_ndx: u32,
    },
}

pub(crate) trait DataPlacement: Send + Sync {
    fn write_hints(&self, dev: &dyn BlockDevice, io: IoClass) -> Result<WriteHints>;
}

/// Build the adapter configured in the open options.
pub(crate) fn for_config(config: DpConfig) -> Box<dyn DataPlacement> {
    match config {
        DpConfig::Null => Box::new(NullDp),
        DpConfig::Fdp(binding) => Box::new(FdpDp { binding, cache: Mutex::new(Vec::new()) }),
    }
}

pub(crate) struct NullDp;

impl DataPlacement for NullDp {
    fn write_hints(&self, _dev: &dyn BlockDevice, _io: IoClass) -> Result<WriteHints> {
        Ok(WriteHints::NONE)
    }
}

pub(crate) struct FdpDp {
    binding: FdpBinding,
    /// (binding id -> placement id), bounded by [`MAX_CACHED_PIDS`].
    cache: Mutex<Vec<(u32, u32)>>,
}

impl FdpDp {
    fn data_pid(&self, dev: &dyn BlockDevice, binding_id: u32) -> Result<u32> {
        let mut cache = self.cache.lock();
        if let Some(&(_, pid)) = cache.iter().find(|(id, _)| *id == binding_id) {
            return Ok(pid);
        }
        if cache.len() == MAX_CACHED_PIDS {
            // The device exposes a bounded set of reclaim units; once the
            // cache is full no further binding can get its own.
            return Err(Error::OutOfSpace);
        }
        let pid = dev.alloc_placement_id()?;
        cache.push((binding_id, pid));
        log::debug!("[dp] bound id {binding_id} to placement id {pid}");
        Ok(pid)
    }
}

impl DataPlacement for FdpDp {
    fn write_hints(&self, dev: &dyn BlockDevice, io: IoClass) -> Result<WriteHints> {
        let pid = match io {
            IoClass::MdWrite => MD_PID,
            IoClass::DataWrite { slab_id, pool_ndx, entry_ndx } => match self.binding {
                FdpBinding::PerWrite => dev.alloc_placement_id()?,
                FdpBinding::PerSlab => self.data_pid(dev, slab_id)?,
                FdpBinding::PerPool => self.data_pid(dev, pool_ndx)?,
                FdpBinding::PerObject => self.data_pid(dev, entry_ndx)?,
            },
        };
        Ok(WriteHints { placement_id: Some(pid) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceKind, ZoneAction};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeDev {
        next: AtomicU32,
    }

    impl BlockDevice for FakeDev {
        fn lba_nbytes(&self) -> u32 {
            512
        }
        fn tbytes(&self) -> u64 {
            1 << 20
        }
        fn mdts_nbytes(&self) -> u32 {
            1 << 16
        }
        fn kind(&self) -> DeviceKind {
            DeviceKind::Conventional
        }
        fn read(&self, _offset: u64, _buf: &mut [u8]) -> Result<()> {
            Ok(())
        }
        fn write(&self, _offset: u64, _buf: &[u8], _hints: &WriteHints) -> Result<()> {
            Ok(())
        }
        fn zone_mgmt(&self, _slba: u64, _action: ZoneAction) -> Result<()> {
            Ok(())
        }
        fn alloc_placement_id(&self) -> Result<u32> {
            Ok(self.next.fetch_add(1, Ordering::Relaxed))
        }
    }

    fn fake_dev() -> FakeDev {
        FakeDev { next: AtomicU32::new(100) }
    }

    #[test]
    fn null_adapter_adds_nothing() {
        let dev = fake_dev();
        let dp = for_config(DpConfig::Null);
        let hints = dp.write_hints(&dev, IoClass::MdWrite).unwrap();
        assert_eq!(hints, WriteHints::NONE);
    }

    #[test]
    fn metadata_writes_use_the_reserved_pid() {
        let dev = fake_dev();
        let dp = for_config(DpConfig::Fdp(FdpBinding::PerPool));
        let hints = dp.write_hints(&dev, IoClass::MdWrite).unwrap();
        assert_eq!(hints.placement_id, Some(0));
    }

    #[test]
    fn per_pool_binding_is_cached() {
        let dev = fake_dev();
        let dp = for_config(DpConfig::Fdp(FdpBinding::PerPool));
        let io = IoClass::DataWrite { slab_id: 9, pool_ndx: 3, entry_ndx: 17 };
        let first = dp.write_hints(&dev, io).unwrap();
        let second = dp.write_hints(&dev, io).unwrap();
        assert_eq!(first.placement_id, second.placement_id);
        // a different pool gets a different identifier
        let other = dp
            .write_hints(&dev, IoClass::DataWrite { slab_id: 9, pool_ndx: 4, entry_ndx: 17 })
            .unwrap();
        assert_ne!(other.placement_id, first.placement_id);
    }

    #[test]
    fn per_write_binding_always_fetches() {
        let dev = fake_dev();
        let dp = for_config(DpConfig::Fdp(FdpBinding::PerWrite));
        let io = IoClass::DataWrite { slab_id: 1, pool_ndx: 1, entry_ndx: 1 };
        let a = dp.write_hints(&dev, io).unwrap();
        let b = dp.write_hints(&dev, io).unwrap();
        assert_ne!(a.placement_id, b.placement_id);
    }

    #[test]
    fn cache_is_bounded() {
        let dev = fake_dev();
        let dp = for_config(DpConfig::Fdp(FdpBinding::PerObject));
        for ndx in 0..60 {
            dp.write_hints(&dev, IoClass::DataWrite { slab_id: 0, pool_ndx: 0, entry_ndx: ndx })
                .unwrap();
        }
        let overflow =
            dp.write_hints(&dev, IoClass::DataWrite { slab_id: 0, pool_ndx: 0, entry_ndx: 61 });
        assert!(matches!(overflow, Err(Error::OutOfSpace)));
    }
}
