// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! Block-device abstraction.
//!
//! All metadata and object I/O flows through [`BlockDevice`]. Requests
//! are byte-addressed; implementations decompose them into sub-requests
//! of at most the device's maximum data transfer size, issued in
//! ascending offset order. The first failing sub-request aborts the
//! whole request.
//!
//! Two backends exist: [`FileDevice`] for conventional devices (regular
//! files and raw block devices) and [`ZonedFileDevice`], a zoned-device
//! emulation that enforces sequential writes and explicit resets.
//!
//! # Device URIs
//!
//! - `PATH` or `file:PATH` - conventional device
//! - `zoned:PATH?nzsect=N[&nzones=N][&mor=N]` - zoned emulation with
//!   `nzsect` logical blocks per zone and `mor` max-open zones
//!
//! Both schemes accept `lb=N` (logical-block bytes, default 512) and
//! `direct=1` (open with `O_DIRECT`).

mod file;
mod iobuf;
mod zoned;

pub use file::FileDevice;
pub use iobuf::IoBuf;
pub use zoned::ZonedFileDevice;

use crate::error::{Error, Result};

/// Command-set class of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Conventional,
    Zoned,
}

/// Zone management actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneAction {
    /// Rewind the zone's write pointer, discarding its data.
    Reset,
    /// Reset every zone of the device.
    ResetAll,
    /// Transition the zone to full; no further writes until reset.
    Finish,
}

/// Per-write hints prepared by the data-placement adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteHints {
    /// Placement identifier for flexible-data-placement devices.
    pub placement_id: Option<u32>,
}

impl WriteHints {
    pub const NONE: WriteHints = WriteHints { placement_id: None };
}

/// A byte-addressed block device.
///
/// Offsets and lengths are in bytes; implementations may additionally
/// constrain alignment (a raw device opened with `O_DIRECT` needs
/// logical-block-aligned transfers).
pub trait BlockDevice: Send + Sync {
    /// Logical-block width in bytes.
    fn lba_nbytes(&self) -> u32;

    /// Usable capacity in bytes.
    fn tbytes(&self) -> u64;

    /// Maximum payload of a single sub-request, in bytes.
    fn mdts_nbytes(&self) -> u32;

    fn kind(&self) -> DeviceKind;

    /// Zones on the device (0 when conventional).
    fn nzones(&self) -> u32 {
        0
    }

    /// Logical blocks per zone (0 when conventional).
    fn nzsect(&self) -> u64 {
        0
    }

    /// Max zones the device allows open at once (0 when conventional).
    fn max_open_zones(&self) -> u32 {
        0
    }

    /// Read `buf.len()` bytes starting at byte `offset`.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `buf` at byte `offset`, honouring `hints`.
    fn write(&self, offset: u64, buf: &[u8], hints: &WriteHints) -> Result<()>;

    /// Hint that an LBA range no longer holds useful data. Best-effort.
    fn deallocate(&self, _slba: u64, _nlb: u64) -> Result<()> {
        Ok(())
    }

    /// Zone management; `slba` names the zone by its first LBA.
    fn zone_mgmt(&self, slba: u64, action: ZoneAction) -> Result<()>;

    /// Fetch a fresh placement identifier from the device.
    fn alloc_placement_id(&self) -> Result<u32> {
        Err(Error::inval("device has no placement identifiers"))
    }

    /// Total logical blocks.
    fn nlb(&self) -> u64 {
        self.tbytes() / u64::from(self.lba_nbytes())
    }
}

/// Walk `[offset, offset + len)` in sub-request ranges of at most
/// `mdts_nbytes`, in ascending order.
pub(crate) fn for_each_chunk<F>(offset: u64, len: usize, mdts_nbytes: u32, mut f: F) -> Result<()>
where
    F: FnMut(u64, std::ops::Range<usize>) -> Result<()>,
{
    let mdts = mdts_nbytes as usize;
    let mut done = 0usize;
    while done < len {
        let n = (len - done).min(mdts);
        f(offset + done as u64, done..done + n)?;
        done += n;
    }
    Ok(())
}

/// Parsed form of a device URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DeviceUri {
    pub scheme: UriScheme,
    pub path: String,
    pub params: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UriScheme {
    File,
    Zoned,
}

impl DeviceUri {
    pub fn parse(uri: &str) -> Result<DeviceUri> {
        let (scheme, rest) = if let Some(rest) = uri.strip_prefix("zoned:") {
            (UriScheme::Zoned, rest)
        } else if let Some(rest) = uri.strip_prefix("file:") {
            (UriScheme::File, rest)
        } else {
            (UriScheme::File, uri)
        };
        let (path, query) = match rest.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (rest, None),
        };
        if path.is_empty() {
            return Err(Error::inval(format!("device uri '{uri}' has no path")));
        }
        let mut params = Vec::new();
        if let Some(query) = query {
            for kv in query.split('&').filter(|s| !s.is_empty()) {
                let (k, v) = kv
                    .split_once('=')
                    .ok_or_else(|| Error::inval(format!("malformed uri parameter '{kv}'")))?;
                params.push((k.to_string(), v.to_string()));
            }
        }
        Ok(DeviceUri { scheme, path: path.to_string(), params })
    }

    pub fn param_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.params.iter().find(|(k, _)| k == key) {
            None => Ok(None),
            Some((_, v)) => v
                .parse::<u64>()
                .map(Some)
                .map_err(|_| Error::inval(format!("uri parameter {key}={v} is not a number"))),
        }
    }

    pub fn param_flag(&self, key: &str) -> bool {
        self.params
            .iter()
            .any(|(k, v)| k == key && v != "0" && v != "false")
    }
}

/// Open the device named by `uri`.
pub fn open(uri: &str) -> Result<Box<dyn BlockDevice>> {
    let parsed = DeviceUri::parse(uri)?;
    match parsed.scheme {
        UriScheme::File => Ok(Box::new(FileDevice::open(&parsed)?)),
        UriScheme::Zoned => Ok(Box::new(ZonedFileDevice::open(&parsed)?)),
    }
}

/// Cross-check a data device against its (optional) metadata device.
pub(crate) fn sanity_check(
    dev: &dyn BlockDevice,
    md_dev: Option<&dyn BlockDevice>,
) -> Result<()> {
    if dev.mdts_nbytes() <= 512 {
        return Err(Error::inval(
            "device reports a maximum data transfer size of 512 bytes or less",
        ));
    }
    if let Some(md) = md_dev {
        if md.lba_nbytes() != dev.lba_nbytes() {
            return Err(Error::inval(format!(
                "metadata-device block size {} does not match data-device block size {}",
                md.lba_nbytes(),
                dev.lba_nbytes()
            )));
        }
        if md.kind() == DeviceKind::Zoned {
            return Err(Error::inval("the metadata device must be conventional"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_default_scheme_is_file() {
        let u = DeviceUri::parse("/dev/loop0").unwrap();
        assert_eq!(u.scheme, UriScheme::File);
        assert_eq!(u.path, "/dev/loop0");
        assert!(u.params.is_empty());
    }

    #[test]
    fn uri_zoned_with_params() {
        let u = DeviceUri::parse("zoned:/tmp/dev?nzsect=4096&mor=4").unwrap();
        assert_eq!(u.scheme, UriScheme::Zoned);
        assert_eq!(u.path, "/tmp/dev");
        assert_eq!(u.param_u64("nzsect").unwrap(), Some(4096));
        assert_eq!(u.param_u64("mor").unwrap(), Some(4));
        assert_eq!(u.param_u64("nzones").unwrap(), None);
    }

    #[test]
    fn uri_rejects_garbage() {
        assert!(DeviceUri::parse("file:").is_err());
        assert!(DeviceUri::parse("file:/x?broken").is_err());
        assert!(DeviceUri::parse("file:/x?lb=abc").unwrap().param_u64("lb").is_err());
    }

    #[test]
    fn chunk_walk_covers_range_in_order() {
        let mut seen = Vec::new();
        for_each_chunk(1000, 2500, 1024, |off, range| {
            seen.push((off, range.len()));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![(1000, 1024), (2024, 1024), (3048, 452)]);
    }

    #[test]
    fn chunk_walk_aborts_on_first_error() {
        let mut calls = 0;
        let res = for_each_chunk(0, 4096, 1024, |_, _| {
            calls += 1;
            if calls == 2 {
                Err(Error::OutOfSpace)
            } else {
                Ok(())
            }
        });
        assert!(res.is_err());
        assert_eq!(calls, 2);
    }
}
