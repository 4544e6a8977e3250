// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! Several pools of different object sizes sharing one device.

mod common;

use common::{fresh_fs, pattern};
use flexalloc::{introspect, DpConfig, FdpBinding, Fs, OpenOpts, PoolCreateArgs};

#[test]
fn pools_of_different_object_sizes_coexist() {
    let (_dev, mut fs) = fresh_fs(40_000, 4000, 4);
    let small = fs.pool_create(&PoolCreateArgs::new("small", 2)).unwrap();
    let medium = fs.pool_create(&PoolCreateArgs::new("medium", 16)).unwrap();
    let large = fs.pool_create(&PoolCreateArgs::new("large", 64)).unwrap();

    let mut written = Vec::new();
    for (i, pool) in [small, medium, large].iter().enumerate() {
        let obj = fs.object_create(pool).unwrap();
        let size = fs.pool_obj_nbytes(pool).unwrap() as usize;
        let data = pattern(size, i as u8);
        fs.object_write(pool, &obj, &data, 0).unwrap();
        written.push((*pool, obj, data));
    }

    // each pool draws from its own slab
    let slabs: Vec<u32> = written.iter().map(|(_, obj, _)| obj.slab_id).collect();
    assert_ne!(slabs[0], slabs[1]);
    assert_ne!(slabs[1], slabs[2]);

    // nothing bled into a neighbour
    for (pool, obj, data) in &written {
        let mut back = vec![0u8; data.len()];
        fs.object_read(pool, obj, &mut back, 0).unwrap();
        assert_eq!(&back, data);
    }

    let problems = introspect::validate(&fs);
    assert!(problems.is_empty(), "unexpected problems: {problems:?}");
}

#[test]
fn interleaved_writes_across_pools_round_trip_after_reopen() {
    let (dev, mut fs) = fresh_fs(40_000, 4000, 4);
    let a = fs.pool_create(&PoolCreateArgs::new("a", 4)).unwrap();
    let b = fs.pool_create(&PoolCreateArgs::new("b", 8)).unwrap();

    let mut objs = Vec::new();
    for round in 0..4u8 {
        for (pool, seed) in [(a, round), (b, round.wrapping_add(100))] {
            let obj = fs.object_create(&pool).unwrap();
            let size = fs.pool_obj_nbytes(&pool).unwrap() as usize;
            let data = pattern(size, seed);
            fs.object_write(&pool, &obj, &data, 0).unwrap();
            objs.push((pool, obj, data));
        }
    }
    fs.close().unwrap();

    let fs = Fs::open(&OpenOpts::new(&dev.uri)).unwrap();
    for (pool, obj, data) in &objs {
        let mut back = vec![0u8; data.len()];
        fs.object_read(pool, obj, &mut back, 0).unwrap();
        assert_eq!(&back, data, "object ({}, {})", obj.slab_id, obj.entry_ndx);
    }
}

#[test]
fn full_pool_spills_into_further_slabs() {
    // slab of 8 blocks holds three 2-block objects
    let (_dev, mut fs) = fresh_fs(4000, 8, 2);
    let pool = fs.pool_create(&PoolCreateArgs::new("spill", 2)).unwrap();
    let objs: Vec<_> = (0..9).map(|_| fs.object_create(&pool).unwrap()).collect();
    let distinct: std::collections::HashSet<u32> = objs.iter().map(|o| o.slab_id).collect();
    assert_eq!(distinct.len(), 3, "nine objects need three slabs");
    let problems = introspect::validate(&fs);
    assert!(problems.is_empty(), "unexpected problems: {problems:?}");
}

#[test]
fn placement_hints_do_not_disturb_the_data_path() {
    // same flow with the flexible-data-placement adapter bound per pool
    let dev = common::conv_dev(40_000);
    flexalloc::mkfs(&flexalloc::MkfsParams {
        dev_uri: dev.uri.clone(),
        md_dev_uri: None,
        slab_nlb: 4000,
        npools: 4,
    })
    .unwrap();
    let mut fs = Fs::open(
        &OpenOpts::new(&dev.uri).dp(DpConfig::Fdp(FdpBinding::PerPool)),
    )
    .unwrap();

    let pool = fs.pool_create(&PoolCreateArgs::new("hinted", 8)).unwrap();
    let obj = fs.object_create(&pool).unwrap();
    let data = pattern(4096, 42);
    fs.object_write(&pool, &obj, &data, 0).unwrap();
    fs.sync().unwrap();
    let mut back = vec![0u8; data.len()];
    fs.object_read(&pool, &obj, &mut back, 0).unwrap();
    assert_eq!(back, data);
    fs.close().unwrap();
}
