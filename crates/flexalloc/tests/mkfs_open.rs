// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! mkfs and open/close behaviour of the whole system.

mod common;

use common::{conv_dev, fresh_fs};
use flexalloc::{hash, introspect, mkfs, Error, Fs, MkfsParams, OpenOpts};

#[test]
fn mkfs_writes_the_expected_geometry() {
    let (_dev, fs) = fresh_fs(40_000, 4000, 2);
    let geo = fs.geometry();
    assert_eq!(geo.slab_nlb, 4000);
    assert_eq!(geo.npools, 2);
    assert_eq!(geo.nslabs, 9);
    assert!(geo.md_nlb >= 1);
    assert!(geo.pool_sgmt.entries_nlb >= 1);
    assert_eq!(fs.lb_nbytes(), 512);
    assert!(!fs.is_zoned());
}

#[test]
fn fresh_system_passes_every_validation() {
    let (_dev, fs) = fresh_fs(40_000, 4000, 2);
    let problems = introspect::validate(&fs);
    assert!(problems.is_empty(), "unexpected problems: {problems:?}");
    // every hash slot starts unset with a zero probe length
    for slot in introspect::htbl_snapshot(&fs) {
        assert_eq!(slot.h2, hash::SLOT_UNSET);
        assert_eq!(slot.psl, 0);
    }
}

#[test]
fn open_rejects_an_unformatted_device() {
    let dev = conv_dev(4096);
    match Fs::open(&OpenOpts::new(&dev.uri)) {
        Err(Error::Corruption(_)) => {}
        other => panic!("expected corruption error, got {other:?}"),
    }
}

#[test]
fn mkfs_rejects_an_unusable_slab_size() {
    let dev = conv_dev(100);
    let err = mkfs(&MkfsParams {
        dev_uri: dev.uri.clone(),
        md_dev_uri: None,
        slab_nlb: 4000,
        npools: 1,
    });
    assert!(err.is_err());
}

#[test]
fn geometry_is_stable_across_reopen() {
    let (dev, fs) = fresh_fs(40_000, 4000, 2);
    let before = *fs.geometry();
    fs.close().unwrap();
    let fs = Fs::open(&OpenOpts::new(&dev.uri)).unwrap();
    assert_eq!(*fs.geometry(), before);
}

#[test]
fn close_noflush_discards_changes() {
    let (dev, mut fs) = fresh_fs(40_000, 4000, 4);
    fs.pool_create(&flexalloc::PoolCreateArgs::new("discarded", 2)).unwrap();
    fs.close_noflush();
    let fs = Fs::open(&OpenOpts::new(&dev.uri)).unwrap();
    assert!(matches!(fs.pool_open("discarded"), Err(Error::NotFound)));
}

#[test]
fn split_metadata_device_setup_round_trips() {
    let dev = conv_dev(8192);
    let md = conv_dev(2048);
    mkfs(&MkfsParams {
        dev_uri: dev.uri.clone(),
        md_dev_uri: Some(md.uri.clone()),
        slab_nlb: 256,
        npools: 2,
    })
    .unwrap();
    let mut fs = Fs::open(&OpenOpts::new(&dev.uri).md_dev(&md.uri)).unwrap();
    let pool = fs.pool_create(&flexalloc::PoolCreateArgs::new("split", 8)).unwrap();
    let obj = fs.object_create(&pool).unwrap();
    let data = common::pattern(4096, 7);
    fs.object_write(&pool, &obj, &data, 0).unwrap();
    fs.close().unwrap();

    let mut fs = Fs::open(&OpenOpts::new(&dev.uri).md_dev(&md.uri)).unwrap();
    let pool = fs.pool_open("split").unwrap();
    fs.object_open(&pool, &obj).unwrap();
    let mut back = vec![0u8; data.len()];
    fs.object_read(&pool, &obj, &mut back, 0).unwrap();
    assert_eq!(back, data);
    // the data device holds nothing but slab bodies; the super block
    // must come from the metadata device
    assert!(Fs::open(&OpenOpts::new(&dev.uri)).is_err());
    fs.close().unwrap();
}
