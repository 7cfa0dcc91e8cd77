//! Command-line driver for the decoration pass.
//!
//! Reads one module (textual IR or bitcode), decorates it and writes the
//! result. Target names come from the flags, falling back to
//! `DRTI_TARGET_NAMES` / `DRTI_TARGETS_FILE`.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use drti_decorate::core::{DecorateOptions, ProbeConfig, TargetSpecification};
use drti_decorate::llvm::{load_module, DecoratePass, PassOutcome};
use inkwell::context::Context;

#[derive(Parser, Debug)]
#[command(name = "drti-decorate", version, about = "Instrument LLVM modules for dynamic runtime inlining")]
struct Args {
    /// Input module (.ll or .bc)
    input: PathBuf,

    /// Output path
    #[arg(short, long)]
    output: PathBuf,

    /// Write textual IR instead of bitcode
    #[arg(long)]
    emit_llvm: bool,

    /// Whitespace-separated target function names
    #[arg(long)]
    target_names: Option<String>,

    /// File of whitespace-separated target function names
    #[arg(long)]
    targets_file: Option<PathBuf>,

    /// Global variable to export through the snapshot address table
    #[arg(long = "listed-global", value_name = "NAME")]
    listed_globals: Vec<String>,

    /// Return address alignment expected at decorated call sites
    #[arg(long, default_value_t = ProbeConfig::DEFAULT_ALIGNMENT)]
    probe_alignment: u64,

    /// Magic word planted before decorated call sites (hex, defaults to the built-in magic)
    #[arg(long, value_parser = parse_hex)]
    probe_magic: Option<u64>,

    /// Byte offset of the magic word from the return address
    #[arg(long, allow_negative_numbers = true)]
    probe_offset: Option<i64>,

    /// Run the LLVM verifier on the result
    #[arg(long)]
    verify: bool,
}

fn parse_hex(text: &str) -> Result<u64, String> {
    let digits = text
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .replace('_', "");
    u64::from_str_radix(&digits, 16).map_err(|e| format!("invalid hex value '{}': {}", text, e))
}

impl Args {
    fn probe(&self) -> ProbeConfig {
        ProbeConfig {
            alignment: self.probe_alignment,
            magic: self.probe_magic.unwrap_or(ProbeConfig::DEFAULT_MAGIC),
            offset: self
                .probe_offset
                .unwrap_or(-(self.probe_alignment as i64)),
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let probe = args.probe();
    let targets = TargetSpecification::new(args.target_names, args.targets_file)
        .or_env()
        .resolve()?;

    let options = DecorateOptions {
        probe,
        listed_globals: args.listed_globals,
        verify: args.verify,
    };

    let context = Context::create();
    let module = load_module(&context, &args.input)?;

    let outcome = DecoratePass::new(&context, targets, options).run_on_module(&module)?;
    match &outcome {
        PassOutcome::Decorated(report) => {
            for site in &report.landing_sites {
                log::info!(
                    "{}: {} decorated call sites",
                    site.function,
                    site.call_sites.len()
                );
            }
        }
        PassOutcome::LayoutMismatch(mismatch) => {
            log::warn!("module written without decoration: {}", mismatch)
        }
        PassOutcome::NotApplicable { .. } | PassOutcome::NoTargets => {}
    }

    if args.emit_llvm {
        module.print_to_file(&args.output)?;
    } else if !module.write_bitcode_to_path(&args.output) {
        return Err(format!("Failed to write bitcode to {}", args.output.display()).into());
    }

    Ok(())
}

fn main() {
    env_logger::init();

    if let Err(e) = run(Args::parse()) {
        log::error!("{}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
