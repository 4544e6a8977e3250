// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! Pool lifecycle: create, open, destroy, root objects, striping knobs.

mod common;

use common::fresh_fs;
use flexalloc::{introspect, Error, Fs, ObjectHandle, OpenOpts, PoolCreateArgs, RootSetFlags};

#[test]
fn create_then_open_yields_the_same_handle() {
    let (_dev, mut fs) = fresh_fs(40_000, 4000, 4);
    let created = fs.pool_create(&PoolCreateArgs::new("mypool", 2)).unwrap();
    let opened = fs.pool_open("mypool").unwrap();
    assert_eq!(created, opened);
    assert_eq!(fs.pool_obj_nlb(&created).unwrap(), 2);
}

#[test]
fn create_is_idempotent_for_matching_sizes() {
    let (_dev, mut fs) = fresh_fs(40_000, 4000, 4);
    let first = fs.pool_create(&PoolCreateArgs::new("dup", 2)).unwrap();
    let second = fs.pool_create(&PoolCreateArgs::new("dup", 2)).unwrap();
    assert_eq!(first, second);
    // a size mismatch is a collision, not a new pool
    match fs.pool_create(&PoolCreateArgs::new("dup", 4)) {
        Err(Error::AlreadyExists(_)) => {}
        other => panic!("expected AlreadyExists, got {other:?}"),
    }
}

#[test]
fn open_of_a_missing_pool_is_not_found() {
    let (_dev, fs) = fresh_fs(40_000, 4000, 4);
    assert!(matches!(fs.pool_open("nope"), Err(Error::NotFound)));
}

#[test]
fn name_length_is_bounded() {
    let (_dev, mut fs) = fresh_fs(40_000, 4000, 4);
    let long = "x".repeat(112);
    assert!(fs.pool_create(&PoolCreateArgs::new(long, 2)).is_err());
    let just_fits = "x".repeat(111);
    fs.pool_create(&PoolCreateArgs::new(just_fits, 2)).unwrap();
}

#[test]
fn object_size_must_fit_the_slab() {
    let (_dev, mut fs) = fresh_fs(40_000, 4000, 4);
    assert!(fs.pool_create(&PoolCreateArgs::new("zero", 0)).is_err());
    // a 4000-block slab cannot host a 4000-block object plus freelist
    assert!(fs.pool_create(&PoolCreateArgs::new("huge", 4000)).is_err());
}

#[test]
fn destroy_releases_the_slot_for_reuse() {
    // npools=2 so the freelist can actually fill up
    let (_dev, mut fs) = fresh_fs(40_000, 4000, 2);
    let a = fs.pool_create(&PoolCreateArgs::new("a", 2)).unwrap();
    let _b = fs.pool_create(&PoolCreateArgs::new("b", 2)).unwrap();
    // freelist is full now
    match fs.pool_create(&PoolCreateArgs::new("c", 2)) {
        Err(Error::OutOfSpace) => {}
        other => panic!("expected OutOfSpace, got {other:?}"),
    }
    fs.pool_destroy(a).unwrap();
    // the freed slot serves the new pool; the old handle went stale
    let c = fs.pool_create(&PoolCreateArgs::new("c", 2)).unwrap();
    assert_eq!(c.ndx, a.ndx);
    assert!(matches!(fs.pool_destroy(a), Err(Error::StaleHandle)));
    assert!(matches!(fs.pool_obj_nlb(&a), Err(Error::StaleHandle)));
}

#[test]
fn destroy_with_live_objects_is_refused() {
    let (_dev, mut fs) = fresh_fs(40_000, 4000, 4);
    let pool = fs.pool_create(&PoolCreateArgs::new("busy", 2)).unwrap();
    let obj = fs.object_create(&pool).unwrap();
    assert!(matches!(fs.pool_destroy(pool), Err(Error::Busy(_))));
    // after the object is gone, destroy succeeds and returns the slab
    fs.object_destroy(&pool, &obj).unwrap();
    fs.pool_destroy(pool).unwrap();
    let problems = introspect::validate(&fs);
    assert!(problems.is_empty(), "unexpected problems: {problems:?}");
}

#[test]
fn root_object_set_get_clear() {
    let (_dev, mut fs) = fresh_fs(40_000, 4000, 4);
    let pool = fs.pool_create(&PoolCreateArgs::new("rooted", 2)).unwrap();
    assert!(matches!(fs.pool_get_root(&pool), Err(Error::NotFound)));

    let obj = fs.object_create(&pool).unwrap();
    fs.pool_set_root(&pool, &obj, RootSetFlags::empty()).unwrap();
    assert_eq!(fs.pool_get_root(&pool).unwrap(), obj);

    // overwriting needs FORCE
    let other = fs.object_create(&pool).unwrap();
    assert!(fs.pool_set_root(&pool, &other, RootSetFlags::empty()).is_err());
    fs.pool_set_root(&pool, &other, RootSetFlags::FORCE).unwrap();
    assert_eq!(fs.pool_get_root(&pool).unwrap(), other);

    fs.pool_set_root(&pool, &other, RootSetFlags::FORCE | RootSetFlags::CLEAR).unwrap();
    assert!(matches!(fs.pool_get_root(&pool), Err(Error::NotFound)));
}

#[test]
fn root_object_survives_reopen() {
    let (dev, mut fs) = fresh_fs(40_000, 4000, 4);
    let pool = fs.pool_create(&PoolCreateArgs::new("rooted", 2)).unwrap();
    let obj = ObjectHandle { slab_id: 0, entry_ndx: 3 };
    fs.pool_set_root(&pool, &obj, RootSetFlags::empty()).unwrap();
    fs.close().unwrap();

    let fs = Fs::open(&OpenOpts::new(&dev.uri)).unwrap();
    let pool = fs.pool_open("rooted").unwrap();
    assert_eq!(fs.pool_get_root(&pool).unwrap(), obj);
}

#[test]
fn stripe_parameters_are_validated() {
    let (_dev, mut fs) = fresh_fs(40_000, 4000, 4);
    let pool = fs.pool_create(&PoolCreateArgs::new("plain", 16)).unwrap();
    // chunk larger than the device transfer limit
    let mdts = 1 << 20;
    assert!(fs.pool_set_strp(&pool, 4, mdts + 1).is_err());
    assert!(fs.pool_set_strp(&pool, 4, 0).is_err());
    fs.pool_set_strp(&pool, 4, 2048).unwrap();
    assert_eq!(fs.pool_obj_nbytes(&pool).unwrap(), 16 * 512 * 4);
    // width 1 turns striping back off
    fs.pool_set_strp(&pool, 1, 0).unwrap();
    assert_eq!(fs.pool_obj_nbytes(&pool).unwrap(), 16 * 512);
}

#[test]
fn pools_persist_across_reopen_with_identical_handles() {
    let (dev, mut fs) = fresh_fs(40_000, 4000, 4);
    let names = ["alpha", "beta", "gamma"];
    let mut handles = Vec::new();
    for name in names {
        handles.push(fs.pool_create(&PoolCreateArgs::new(name, 2)).unwrap());
    }
    fs.close().unwrap();

    let fs = Fs::open(&OpenOpts::new(&dev.uri)).unwrap();
    for (name, orig) in names.iter().zip(&handles) {
        let reopened = fs.pool_open(name).unwrap();
        assert_eq!(reopened, *orig, "handle for '{name}' changed across reopen");
    }
    let problems = introspect::validate(&fs);
    assert!(problems.is_empty(), "unexpected problems: {problems:?}");
}
