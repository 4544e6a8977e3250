// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! Conventional block device backed by a file.
//!
//! Works against regular files and raw block devices alike, using
//! positional reads and writes so concurrent sub-requests never contend
//! on a shared cursor.

use super::{for_each_chunk, BlockDevice, DeviceKind, DeviceUri, WriteHints, ZoneAction};
use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Default logical-block width when the URI does not override it.
pub(crate) const DEFAULT_LB_NBYTES: u32 = 512;

/// Default maximum data transfer size.
pub(crate) const DEFAULT_MDTS_NBYTES: u32 = 1 << 20;

pub struct FileDevice {
    file: File,
    lb_nbytes: u32,
    tbytes: u64,
    mdts_nbytes: u32,
    // emulated flexible-data-placement identifier source
    next_pid: AtomicU32,
}

impl FileDevice {
    pub(crate) fn open(uri: &DeviceUri) -> Result<FileDevice> {
        let mut opts = OpenOptions::new();
        opts.read(true).write(true);
        #[cfg(target_os = "linux")]
        if uri.param_flag("direct") {
            use std::os::unix::fs::OpenOptionsExt;
            opts.custom_flags(libc::O_DIRECT);
        }
        let mut file = opts.open(&uri.path)?;

        let lb_nbytes = uri.param_u64("lb")?.unwrap_or(u64::from(DEFAULT_LB_NBYTES)) as u32;
        if lb_nbytes == 0 || !lb_nbytes.is_power_of_two() {
            return Err(Error::inval(format!("bad logical-block size {lb_nbytes}")));
        }
        let mdts_nbytes =
            uri.param_u64("mdts")?.unwrap_or(u64::from(DEFAULT_MDTS_NBYTES)) as u32;

        // metadata len() is 0 for block devices, seek to the end instead
        let end = file.seek(SeekFrom::End(0))?;
        let tbytes = end - end % u64::from(lb_nbytes);
        if tbytes == 0 {
            return Err(Error::inval(format!(
                "device '{}' is smaller than one logical block",
                uri.path
            )));
        }
        log::debug!(
            "[dev] opened '{}': {} bytes, lb={}, mdts={}",
            uri.path,
            tbytes,
            lb_nbytes,
            mdts_nbytes
        );
        Ok(FileDevice { file, lb_nbytes, tbytes, mdts_nbytes, next_pid: AtomicU32::new(1) })
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        if offset + len as u64 > self.tbytes {
            return Err(Error::inval(format!(
                "request [{offset}, {}) beyond device end {}",
                offset + len as u64,
                self.tbytes
            )));
        }
        Ok(())
    }
}

impl BlockDevice for FileDevice {
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
        DeviceKind::Conventional
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;
        let len = buf.len();
        for_each_chunk(offset, len, self.mdts_nbytes, |off, range| {
            self.file.read_exact_at(&mut buf[range], off)?;
            Ok(())
        })
    }

    fn write(&self, offset: u64, buf: &[u8], _hints: &WriteHints) -> Result<()> {
        self.check_range(offset, buf.len())?;
        for_each_chunk(offset, buf.len(), self.mdts_nbytes, |off, range| {
            self.file.write_all_at(&buf[range], off)?;
            Ok(())
        })
    }

    fn deallocate(&self, slba: u64, nlb: u64) -> Result<()> {
        // advisory only; nothing to do for a file
        log::trace!("[dev] deallocate hint: slba={slba} nlb={nlb}");
        Ok(())
    }

    fn zone_mgmt(&self, _slba: u64, _action: ZoneAction) -> Result<()> {
        Err(Error::inval("zone management on a conventional device"))
    }

    fn alloc_placement_id(&self) -> Result<u32> {
        Ok(self.next_pid.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_device(nbytes: u64, query: &str) -> (tempfile::TempPath, FileDevice) {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(nbytes).unwrap();
        let path = file.into_temp_path();
        let uri =
            DeviceUri::parse(&format!("file:{}{}", path.display(), query)).unwrap();
        let dev = FileDevice::open(&uri).unwrap();
        (path, dev)
    }

    #[test]
    fn geometry_from_file() {
        let (_path, dev) = tmp_device(1 << 20, "");
        assert_eq!(dev.lba_nbytes(), 512);
        assert_eq!(dev.tbytes(), 1 << 20);
        assert_eq!(dev.nlb(), 2048);
        assert_eq!(dev.kind(), DeviceKind::Conventional);
    }

    #[test]
    fn chunked_write_read_round_trip() {
        // mdts of 4 KiB forces an 80 KiB transfer into 20 sub-requests
        let (_path, dev) = tmp_device(1 << 20, "?mdts=4096");
        let data: Vec<u8> = (0..80 * 1024).map(|i| (i % 251) as u8).collect();
        dev.write(512, &data, &WriteHints::NONE).unwrap();
        let mut back = vec![0u8; data.len()];
        dev.read(512, &mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn out_of_range_request_is_rejected() {
        let (_path, dev) = tmp_device(4096, "");
        let mut buf = vec![0u8; 512];
        assert!(dev.read(4096, &mut buf).is_err());
        assert!(dev.write(3585, &buf, &WriteHints::NONE).is_err());
    }

    #[test]
    fn placement_ids_are_distinct() {
        let (_path, dev) = tmp_device(4096, "");
        let a = dev.alloc_placement_id().unwrap();
        let b = dev.alloc_placement_id().unwrap();
        assert_ne!(a, b);
    }
}
