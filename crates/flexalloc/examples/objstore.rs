// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! End-to-end walkthrough against a file-backed device.
//!
//! Formats a scratch file, creates a plain and a striped pool, writes
//! and reads an object in each, and survives a close/reopen cycle.
//!
//! Run with: cargo run --example objstore -- /tmp/flexalloc.img

use flexalloc::{mkfs, Fs, MkfsParams, OpenOpts, PoolCreateArgs, RootSetFlags};

fn main() -> flexalloc::Result<()> {
    env_logger::init();
    let path = std::env::args().nth(1).unwrap_or_else(|| "/tmp/flexalloc.img".into());

    // 20 MiB scratch device, 512 B blocks
    let file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(&path)?;
    file.set_len(40_000 * 512)?;
    drop(file);

    let geo = mkfs(&MkfsParams {
        dev_uri: path.clone(),
        md_dev_uri: None,
        slab_nlb: 4000,
        npools: 4,
    })?;
    println!("formatted: {} slabs x {} blocks, {} pools", geo.nslabs, geo.slab_nlb, geo.npools);

    let mut fs = Fs::open(&OpenOpts::new(&path))?;

    // plain pool: 16-block (8 KiB) objects
    let pool = fs.pool_create(&PoolCreateArgs::new("documents", 16))?;
    let obj = fs.object_create(&pool)?;
    let payload = b"hello, flexalloc".to_vec();
    fs.object_write(&pool, &obj, &payload, 0)?;
    fs.pool_set_root(&pool, &obj, RootSetFlags::empty())?;

    // striped pool: objects interleaved across 4 sub-objects
    let striped = fs.pool_create(&PoolCreateArgs::new("bulk", 16).striped(4, 2048))?;
    let big_obj = fs.object_create(&striped)?;
    let big: Vec<u8> = (0..fs.pool_obj_nbytes(&striped)? as usize)
        .map(|i| (i % 251) as u8)
        .collect();
    fs.object_write(&striped, &big_obj, &big, 0)?;

    fs.close()?;

    // everything is rediscoverable from the device alone
    let fs = Fs::open(&OpenOpts::new(&path))?;
    let pool = fs.pool_open("documents")?;
    let obj = fs.pool_get_root(&pool)?;
    let mut back = vec![0u8; payload.len()];
    fs.object_read(&pool, &obj, &mut back, 0)?;
    assert_eq!(back, payload);
    println!("read back: {}", String::from_utf8_lossy(&back));

    let striped = fs.pool_open("bulk")?;
    let mut big_back = vec![0u8; big.len()];
    fs.object_read(&striped, &big_obj, &mut big_back, 0)?;
    assert_eq!(big_back, big);
    println!("striped object verified ({} bytes)", big_back.len());

    fs.close()
}
