use anyhow::{Context, Result};
use clap::Parser;
use clap::error::ErrorKind;
use loki_unpatch::unpatcher::{emit, prepare};
use loki_unpatch::{ImageClass, RamdiskAddress, UnpatchOptions};
use memmap2::Mmap;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Extract the original .img out of a .lok
#[derive(Parser, Debug)]
#[command(name = "loki_unpatch", version)]
struct Args {
    /// Image class, "boot" or "recovery"
    class: ImageClass,
    /// Loki-patched input image
    input: PathBuf,
    /// Where to write the rebuilt image
    output: PathBuf,
    /// Load base added to the ramdisk offset in the rebuilt header
    #[arg(long, value_parser = parse_u32, conflicts_with = "keep_ramdisk_addr")]
    ramdisk_load_base: Option<u32>,
    /// Keep the ramdisk address of the patched header
    #[arg(long)]
    keep_ramdisk_addr: bool,
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address {s:?}: {e}"))
}

impl Args {
    fn options(&self) -> UnpatchOptions {
        let ramdisk_addr = if self.keep_ramdisk_addr {
            RamdiskAddress::Preserve
        } else {
            RamdiskAddress::Relative {
                base: self.ramdisk_load_base.unwrap_or(0),
            }
        };
        UnpatchOptions { ramdisk_addr }
    }
}

fn run(args: &Args) -> Result<()> {
    let input = File::open(&args.input)
        .with_context(|| format!("Failed to open {} for reading", args.input.display()))?;
    let mem = unsafe { Mmap::map(&input) }.context("Failed to mmap input file")?;

    let (plan, header) = prepare(&mem, args.class, &args.options())?;
    println!(
        "[+] Loki {} image, kernel {:#x} bytes, ramdisk {:#x} bytes, page size {}",
        args.class, plan.original_kernel_size, plan.original_ramdisk_size, plan.page_size
    );

    let mut output = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&args.output)
        .with_context(|| format!("Failed to open {} for writing", args.output.display()))?;
    emit(&mem, &header, &plan, &mut output)?;

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    println!("[+] loki_unpatch v{}", env!("CARGO_PKG_VERSION"));

    match run(&args) {
        Ok(()) => {
            println!("[+] Output file written to {}", args.output.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("[-] {:#}", e);
            ExitCode::FAILURE
        }
    }
}
