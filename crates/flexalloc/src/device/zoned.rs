// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! Zoned block device emulation over a file.
//!
//! Mirrors the zoned-namespace write rules: each zone has a write
//! pointer and a condition, writes must land exactly at the write
//! pointer of a non-full zone, and a zone becomes writable again only
//! after an explicit reset. Zone state is runtime-only; a fresh open
//! assumes every zone is empty.

use super::{for_each_chunk, BlockDevice, DeviceKind, DeviceUri, WriteHints, ZoneAction};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::FileExt;

/// Default max-open-zones when the URI does not override it.
const DEFAULT_MOR: u32 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ZoneCond {
    Empty,
    Open,
    Full,
}

#[derive(Debug, Clone, Copy)]
struct Zone {
    /// Write pointer, in bytes from the zone start.
    wp: u64,
    cond: ZoneCond,
}

pub struct ZonedFileDevice {
    file: File,
    lb_nbytes: u32,
    tbytes: u64,
    mdts_nbytes: u32,
    nzsect: u64,
    nzones: u32,
    mor: u32,
    zones: Mutex<Vec<Zone>>,
}

impl ZonedFileDevice {
    pub(crate) fn open(uri: &DeviceUri) -> Result<ZonedFileDevice> {
        let mut file = OpenOptions::new().read(true).write(true).open(&uri.path)?;

        let lb_nbytes =
            uri.param_u64("lb")?.unwrap_or(u64::from(super::file::DEFAULT_LB_NBYTES)) as u32;
        if lb_nbytes == 0 || !lb_nbytes.is_power_of_two() {
            return Err(Error::inval(format!("bad logical-block size {lb_nbytes}")));
        }
        let nzsect = uri
            .param_u64("nzsect")?
            .ok_or_else(|| Error::inval("zoned device uri needs nzsect=<blocks per zone>"))?;
        if nzsect == 0 {
            return Err(Error::inval("nzsect must be non-zero"));
        }

        let zone_nbytes = nzsect * u64::from(lb_nbytes);
        let end = file.seek(SeekFrom::End(0))?;
        let max_zones = end / zone_nbytes;
        let nzones = match uri.param_u64("nzones")? {
            Some(n) if n > max_zones => {
                return Err(Error::inval(format!(
                    "nzones={n} does not fit the backing file ({max_zones} zones max)"
                )))
            }
            Some(n) => n as u32,
            None => max_zones as u32,
        };
        if nzones == 0 {
            return Err(Error::inval("backing file is smaller than one zone"));
        }
        let mor = uri.param_u64("mor")?.unwrap_or(u64::from(DEFAULT_MOR)) as u32;
        let mdts_nbytes = uri
            .param_u64("mdts")?
            .unwrap_or(u64::from(super::file::DEFAULT_MDTS_NBYTES))
            .min(zone_nbytes) as u32;

        log::debug!(
            "[dev] opened zoned '{}': {} zones x {} blocks, mor={}",
            uri.path,
            nzones,
            nzsect,
            mor
        );
        Ok(ZonedFileDevice {
            file,
            lb_nbytes,
            tbytes: u64::from(nzones) * zone_nbytes,
            mdts_nbytes,
            nzsect,
            nzones,
            mor,
            zones: Mutex::new(vec![Zone { wp: 0, cond: ZoneCond::Empty }; nzones as usize]),
        })
    }

    #[inline]
    fn zone_nbytes(&self) -> u64 {
        self.nzsect * u64::from(self.lb_nbytes)
    }

    fn zone_of_slba(&self, slba: u64) -> Result<usize> {
        let zone = slba / self.nzsect;
        if zone >= u64::from(self.nzones) {
            return Err(Error::inval(format!("LBA {slba} beyond the last zone")));
        }
        Ok(zone as usize)
    }

    /// Validate a write against the zone state machine and advance the
    /// write pointers. The whole request is checked before any pointer
    /// moves so a rejected write has no effect.
    fn advance_wp(&self, offset: u64, len: u64) -> Result<()> {
        let zsz = self.zone_nbytes();
        let mut zones = self.zones.lock();
        // pass 1: every touched zone must be writable at the right spot
        let mut cursor = offset;
        let end = offset + len;
        while cursor < end {
            let zone = (cursor / zsz) as usize;
            let in_zone = cursor % zsz;
            let state = zones[zone];
            if state.cond == ZoneCond::Full {
                return Err(Error::Io(std::io::Error::other(format!(
                    "write to full zone {zone}"
                ))));
            }
            if in_zone != state.wp {
                return Err(Error::Io(std::io::Error::other(format!(
                    "non-sequential write in zone {zone}: offset {in_zone}, write pointer {}",
                    state.wp
                ))));
            }
            // advance to the zone end or the request end
            cursor = ((zone as u64 + 1) * zsz).min(end);
        }
        // pass 2: commit
        let mut cursor = offset;
        while cursor < end {
            let zone = (cursor / zsz) as usize;
            let stop = ((zone as u64 + 1) * zsz).min(end);
            let z = &mut zones[zone];
            z.wp = stop - zone as u64 * zsz;
            z.cond = if z.wp == zsz { ZoneCond::Full } else { ZoneCond::Open };
            cursor = stop;
        }
        Ok(())
    }
}

impl BlockDevice for ZonedFileDevice {
    fn lba_nbytes(&self) -> u32 {
        self.lb_nbytes
    }

    fn tbytes(&self) -> u64 {
        self.tbytes
    }

    fn mdts_nbytes(&self) -> u32 {
        self.mdts_nbytes
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Zoned
    }

    fn nzones(&self) -> u32 {
        self.nzones
    }

    fn nzsect(&self) -> u64 {
        self.nzsect
    }

    fn max_open_zones(&self) -> u32 {
        self.mor
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if offset + buf.len() as u64 > self.tbytes {
            return Err(Error::inval(format!(
                "read [{offset}, {}) beyond device end",
                offset + buf.len() as u64
            )));
        }
        let len = buf.len();
        for_each_chunk(offset, len, self.mdts_nbytes, |off, range| {
            self.file.read_exact_at(&mut buf[range], off)?;
            Ok(())
        })
    }

    fn write(&self, offset: u64, buf: &[u8], _hints: &WriteHints) -> Result<()> {
        if offset + buf.len() as u64 > self.tbytes {
            return Err(Error::inval(format!(
                "write [{offset}, {}) beyond device end",
                offset + buf.len() as u64
            )));
        }
        self.advance_wp(offset, buf.len() as u64)?;
        for_each_chunk(offset, buf.len(), self.mdts_nbytes, |off, range| {
            self.file.write_all_at(&buf[range], off)?;
            Ok(())
        })
    }

    fn zone_mgmt(&self, slba: u64, action: ZoneAction) -> Result<()> {
        let mut zones = self.zones.lock();
        match action {
            ZoneAction::ResetAll => {
                for z in zones.iter_mut() {
                    *z = Zone { wp: 0, cond: ZoneCond::Empty };
                }
            }
            ZoneAction::Reset => {
                let zone = self.zone_of_slba(slba)?;
                zones[zone] = Zone { wp: 0, cond: ZoneCond::Empty };
                log::trace!("[dev] zone {zone} reset");
            }
            ZoneAction::Finish => {
                let zone = self.zone_of_slba(slba)?;
                zones[zone].cond = ZoneCond::Full;
                log::trace!("[dev] zone {zone} finished");
            }
        }
        Ok(())
    }
}
