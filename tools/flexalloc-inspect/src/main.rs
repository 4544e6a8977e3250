// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 flexalloc contributors

//! flexalloc-inspect - validate on-disk allocator state.
//!
//! Reads the super block, re-derives the geometry, and runs every
//! metadata invariant check, printing one diagnostic per problem.
//! Exit code 0 means the system validated cleanly.

use anyhow::Context;
use clap::Parser;
use flexalloc::{introspect, Fs, OpenOpts};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "flexalloc-inspect")]
#[command(about = "Inspect and validate flexalloc system state")]
#[command(version)]
struct Args {
    /// Separate metadata device URI, if the system was created with one
    #[arg(long)]
    md_dev: Option<String>,

    /// Also dump the super block, pools, and slab lists
    #[arg(short, long)]
    verbose: bool,

    /// Device URI to inspect
    device: String,
}

fn main() -> anyhow::Result<ExitCode> {
    env_logger::init();
    let args = Args::parse();

    let mut opts = OpenOpts::new(&args.device);
    if let Some(md) = &args.md_dev {
        opts = opts.md_dev(md);
    }
    let fs = Fs::open(&opts).with_context(|| format!("opening '{}' failed", args.device))?;

    let geo = fs.geometry();
    println!("Super block:");
    println!("  nslabs: {}", geo.nslabs);
    println!("  slab_nlb: {}", geo.slab_nlb);
    println!("  npools: {}", geo.npools);
    println!("  md_nlb: {}", geo.md_nlb);
    println!("  zoned: {}", geo.zoned);

    if args.verbose {
        for report in introspect::pool_reports(&fs) {
            println!("Pool {} '{}':", report.ndx, report.name);
            println!("  obj_nlb: {}", report.obj_nlb);
            println!("  objects per slab: {}", report.slab_nobj);
            if report.striped {
                println!(
                    "  striping: {} sub-objects x {} byte chunks",
                    report.strp_nobjs, report.strp_nbytes
                );
            }
            match report.root_obj {
                Some(obj) => {
                    println!("  root object: slab {} entry {}", obj.slab_id, obj.entry_ndx);
                }
                None => println!("  root object: unset"),
            }
            println!("  empty slabs: {:?}", report.buckets.empty);
            println!("  partial slabs: {:?}", report.buckets.partial);
            println!("  full slabs: {:?}", report.buckets.full);
        }
    }

    let problems = introspect::validate(&fs);
    if problems.is_empty() {
        println!("== validation passed, no problems found");
        Ok(ExitCode::SUCCESS)
    } else {
        for problem in &problems {
            eprintln!("PROBLEM: {problem}");
        }
        eprintln!("== validation failed: {} problem(s)", problems.len());
        Ok(ExitCode::FAILURE)
    }
}
