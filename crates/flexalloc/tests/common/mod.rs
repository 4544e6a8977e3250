// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! Shared fixtures for the integration tests: temp-file backed devices,
//! formatted and opened in one call.

use flexalloc::{mkfs, Fs, MkfsParams, OpenOpts};
use tempfile::TempPath;

pub struct TestDev {
    pub uri: String,
    // keeps the backing file alive for the test's duration
    _path: TempPath,
}

/// Create a conventional device backed by a temp file of `nlb` blocks
/// of 512 bytes.
pub fn conv_dev(nlb: u64) -> TestDev {
    conv_dev_with(nlb, "")
}

pub fn conv_dev_with(nlb: u64, query: &str) -> TestDev {
    let file = tempfile::NamedTempFile::new().expect("temp device file");
    file.as_file().set_len(nlb * 512).expect("size device file");
    let path = file.into_temp_path();
    TestDev { uri: format!("file:{}{query}", path.display()), _path: path }
}

/// Create a zoned device of `nzones` zones x `nzsect` blocks, plus extra
/// URI parameters (e.g. `&mor=2`).
pub fn zoned_dev(nzones: u64, nzsect: u64, extra: &str) -> TestDev {
    let file = tempfile::NamedTempFile::new().expect("temp device file");
    file.as_file().set_len(nzones * nzsect * 512).expect("size device file");
    let path = file.into_temp_path();
    TestDev {
        uri: format!("zoned:{}?nzsect={nzsect}{extra}", path.display()),
        _path: path,
    }
}

/// mkfs + open a conventional single-device system.
pub fn fresh_fs(nlb: u64, slab_nlb: u32, npools: u32) -> (TestDev, Fs) {
    let dev = conv_dev(nlb);
    mkfs(&MkfsParams {
        dev_uri: dev.uri.clone(),
        md_dev_uri: None,
        slab_nlb,
        npools,
    })
    .expect("mkfs");
    let fs = Fs::open(&OpenOpts::new(&dev.uri)).expect("open");
    (dev, fs)
}

/// mkfs + open a zoned data device with a conventional metadata device.
pub fn fresh_zoned_fs(
    nzones: u64,
    nzsect: u64,
    extra: &str,
    md_nlb: u64,
    slab_nlb: u32,
    npools: u32,
) -> (TestDev, TestDev, Fs) {
    let dev = zoned_dev(nzones, nzsect, extra);
    let md = conv_dev(md_nlb);
    mkfs(&MkfsParams {
        dev_uri: dev.uri.clone(),
        md_dev_uri: Some(md.uri.clone()),
        slab_nlb,
        npools,
    })
    .expect("mkfs zoned");
    let fs = Fs::open(&OpenOpts::new(&dev.uri).md_dev(&md.uri)).expect("open zoned");
    (dev, md, fs)
}

/// Deterministic fill pattern for I/O round-trips.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}
