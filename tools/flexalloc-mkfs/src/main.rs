// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! mkfs.flexalloc - initialize a device for flexalloc.
//!
//! Usage:
//!   mkfs.flexalloc --slab-nlb 4000 /dev/nvme0n1
//!   mkfs.flexalloc --slab-nlb 4000 --pools 8 /dev/nvme0n1
//!   mkfs.flexalloc --slab-nlb 8192 --md-dev /dev/nvme1n1 zoned:/dev/nvme0n2?nzsect=4096

use anyhow::Context;
use clap::Parser;
use flexalloc::{mkfs, MkfsParams};

#[derive(Parser, Debug)]
#[command(name = "mkfs.flexalloc")]
#[command(about = "Initialize a device for use with flexalloc")]
#[command(version)]
struct Args {
    /// Size of each slab, in logical blocks
    #[arg(short, long)]
    slab_nlb: u32,

    /// Number of pools to support (default: roughly one per slab)
    #[arg(short, long, default_value = "0")]
    pools: u32,

    /// Separate metadata device URI (mandatory for zoned devices)
    #[arg(long)]
    md_dev: Option<String>,

    /// Print the derived geometry
    #[arg(short, long)]
    verbose: bool,

    /// Device URI to format
    device: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.slab_nlb == 0 {
        anyhow::bail!("--slab-nlb must be a positive number of logical blocks");
    }

    let geo = mkfs(&MkfsParams {
        dev_uri: args.device.clone(),
        md_dev_uri: args.md_dev.clone(),
        slab_nlb: args.slab_nlb,
        npools: args.pools,
    })
    .with_context(|| format!("formatting '{}' failed", args.device))?;

    if args.verbose {
        println!("LBAs: {}", geo.nlb);
        println!("LBA width: {} B", geo.lb_nbytes);
        println!("md blocks: {}", geo.md_nlb);
        println!("pool segment:");
        println!("  * pools: {}", geo.npools);
        println!("  * freelist blocks: {}", geo.pool_sgmt.freelist_nlb);
        println!("  * htbl blocks: {}", geo.pool_sgmt.htbl_nlb);
        println!("  * entry blocks: {}", geo.pool_sgmt.entries_nlb);
        println!("slab segment:");
        println!("  * slabs: {}", geo.nslabs);
        println!("  * slab blocks: {}", geo.slab_nlb);
        println!("  * header blocks: {}", geo.slab_sgmt_nlb);
    }
    println!(
        "formatted '{}': {} slabs x {} blocks, {} pools",
        args.device, geo.nslabs, geo.slab_nlb, geo.npools
    );
    Ok(())
}
