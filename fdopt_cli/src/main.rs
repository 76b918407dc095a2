//! The `fdopt` binary: combined-profile tooling and the feedback-directed
//! inliner.
//!
//! Subcommands:
//! - `merge`: fold raw trial files and pre-combined profiles into one
//!   combined profile file per kind.
//! - `info`: histogram tables / shape statistics / summary for a combined
//!   file.
//! - `drift`: per-location distribution drift between two combined files.
//! - `edgedom`: write the edge dominance artifact.
//! - `inline`: run the profile-directed inliner over a module description.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use fdopt_inline::{Budget, Inliner, InlinerConfig};
use fdopt_ir::Module;
use fdopt_profile::{EdgeDominatorTree, ProfileFactory, ProfileWriter};

#[derive(Parser)]
#[command(name = "fdopt", version, about = "Combined profiling and feedback-directed inlining")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Merge raw and combined profiles into a single combined file.
    Merge {
        /// Module description (JSON).
        module: PathBuf,
        /// Raw or combined profile inputs.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long, default_value = "combined.cp")]
        output: PathBuf,
        /// Histogram bin count for newly built profiles.
        #[arg(long, default_value_t = 15)]
        bins: u32,
    },
    /// Print histogram tables for a combined profile file.
    Info {
        module: PathBuf,
        profile: PathBuf,
        /// Shape statistics instead of the basic table.
        #[arg(long)]
        stats: bool,
        /// One-line per-kind summary instead of the basic table.
        #[arg(long)]
        summary: bool,
    },
    /// Report per-location drift between two combined profile files.
    Drift {
        module: PathBuf,
        first: PathBuf,
        second: PathBuf,
    },
    /// Write the edge dominance artifact (one u32 dominator per edge).
    Edgedom {
        module: PathBuf,
        #[arg(short, long, default_value = "edgedom.out")]
        output: PathBuf,
    },
    /// Inline call sites ranked by the combined call profile.
    Inline {
        module: PathBuf,
        /// Combined profile file holding the call profile.
        #[arg(long)]
        call_profile: PathBuf,
        #[arg(long, default_value = "mean")]
        metric: String,
        /// Quantile points for the Q* metrics; values in (1,100] are
        /// percents.
        #[arg(long, value_delimiter = ',')]
        quantile: Vec<f64>,
        /// 0 = unlimited, 1 = auto, else instruction count.
        #[arg(long, default_value_t = 1)]
        budget: u32,
        /// Maximum inlining-history depth; 0 = unlimited.
        #[arg(long, default_value_t = 0)]
        depth: u32,
        /// Log file basename; `-` routes reports to stdout.
        #[arg(long, default_value = "fdilog")]
        log: String,
        /// Debug stream threshold, 0 (silent) to 10 (errors only).
        #[arg(long, default_value_t = 4)]
        verbosity: u8,
        /// Where to write the transformed module.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load_module(path: &Path) -> Result<Module> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read module description {}", path.display()))?;
    Module::from_json(&text)
        .with_context(|| format!("cannot parse module description {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    match Cli::parse().command {
        Command::Merge {
            module,
            inputs,
            output,
            bins,
        } => merge(&module, &inputs, &output, bins),
        Command::Info {
            module,
            profile,
            stats,
            summary,
        } => info(&module, &profile, stats, summary),
        Command::Drift {
            module,
            first,
            second,
        } => drift(&module, &first, &second),
        Command::Edgedom { module, output } => edgedom(&module, &output),
        Command::Inline {
            module,
            call_profile,
            metric,
            quantile,
            budget,
            depth,
            log,
            verbosity,
            output,
        } => inline(
            &module,
            &call_profile,
            metric,
            quantile,
            budget,
            depth,
            log,
            verbosity,
            output.as_deref(),
        ),
    }
}

fn merge(module: &Path, inputs: &[PathBuf], output: &Path, bins: u32) -> Result<()> {
    let m = load_module(module)?;
    let mut factory = ProfileFactory::new(&m).with_bin_count(bins);
    factory
        .build_profiles(inputs)
        .context("profile ingest failed")?;

    let file = fs::File::create(output)
        .with_context(|| format!("cannot open {} for writing", output.display()))?;
    let mut w = ProfileWriter::new(io::BufWriter::new(file));

    let mut wrote_any = false;
    if let Some(cp) = factory.take_edge_cp() {
        let written = cp.serialize(&mut w).context("writing edge profile")?;
        eprintln!("edge: {} histograms over {} edges", written, cp.core().size());
        wrote_any = true;
    }
    if let Some(cp) = factory.take_path_cp() {
        let written = cp.serialize(&mut w).context("writing path profile")?;
        eprintln!("path: {} histograms in {} functions", written, cp.function_count());
        wrote_any = true;
    }
    if let Some(cp) = factory.take_call_cp() {
        let written = cp.serialize(&mut w).context("writing call profile")?;
        eprintln!("call: {} histograms over {} blocks", written, cp.core().size());
        wrote_any = true;
    }
    w.flush().context("flushing combined profile")?;

    if !wrote_any {
        bail!("no profiles found in the inputs");
    }
    Ok(())
}

fn info(module: &Path, profile: &Path, stats: bool, summary: bool) -> Result<()> {
    let m = load_module(module)?;
    let mut factory = ProfileFactory::new(&m);
    factory.build_profiles(&[profile]).context("profile ingest failed")?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    let mut print_core = |name: &str, core: &fdopt_profile::ProfileCore| -> Result<()> {
        if summary {
            write!(out, "{name}: ")?;
            core.print_summary(&mut out)?;
        } else if stats {
            core.print_histogram_stats(name, &mut out)?;
        } else {
            core.print_histogram_info(name, &mut out)?;
        }
        Ok(())
    };

    let mut found = false;
    if let Some(cp) = factory.take_edge_cp() {
        print_core("edge", cp.core())?;
        found = true;
    }
    if let Some(cp) = factory.take_path_cp() {
        print_core("path", cp.core())?;
        found = true;
    }
    if let Some(cp) = factory.take_call_cp() {
        print_core("call", cp.core())?;
        found = true;
    }
    if !found {
        bail!("no combined profiles in {}", profile.display());
    }
    Ok(())
}

fn drift(module: &Path, first: &Path, second: &Path) -> Result<()> {
    let m = load_module(module)?;
    let mut fa = ProfileFactory::new(&m);
    fa.build_profiles(&[first]).context("first profile")?;
    let mut fb = ProfileFactory::new(&m);
    fb.build_profiles(&[second]).context("second profile")?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match (fa.take_edge_cp(), fb.take_edge_cp()) {
        (Some(a), Some(b)) => a.core().print_drift(b.core(), "edge", &mut out)?,
        (None, None) => {}
        _ => tracing::warn!("edge profile present in only one input"),
    }
    match (fa.take_path_cp(), fb.take_path_cp()) {
        (Some(a), Some(b)) => a.print_drift(&b, &mut out)?,
        (None, None) => {}
        _ => tracing::warn!("path profile present in only one input"),
    }
    match (fa.take_call_cp(), fb.take_call_cp()) {
        (Some(a), Some(b)) => a.core().print_drift(b.core(), "call", &mut out)?,
        (None, None) => {}
        _ => tracing::warn!("call profile present in only one input"),
    }
    Ok(())
}

fn edgedom(module: &Path, output: &Path) -> Result<()> {
    let m = load_module(module)?;
    let edt = EdgeDominatorTree::new(&m);
    edt.write_to_file(output)
        .with_context(|| format!("cannot write {}", output.display()))?;
    eprintln!("{} edges", edt.edge_count());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn inline(
    module: &Path,
    call_profile: &Path,
    metric: String,
    quantile: Vec<f64>,
    budget: u32,
    depth: u32,
    log: String,
    verbosity: u8,
    output: Option<&Path>,
) -> Result<()> {
    let mut m = load_module(module)?;

    let mut factory = ProfileFactory::new(&m);
    factory
        .build_profiles(&[call_profile])
        .context("profile ingest failed")?;
    let cp = factory
        .take_call_cp()
        .with_context(|| format!("no call profile found in {}", call_profile.display()))?;

    let config = InlinerConfig {
        metric,
        quantiles: quantile,
        budget: Budget::from_flag(budget),
        max_depth: depth,
        log_base: log,
        verbosity,
    };
    let mut inliner = Inliner::new(config).context("inliner setup failed")?;
    let stats = inliner
        .run(&mut m, &cp)
        .context("inlining terminated abnormally")?;

    println!(
        "Inlined {} of {} candidates ({} failures); budget {} -> {}; hash {:08X}",
        stats.inline_count,
        stats.initial_candidates,
        stats.inline_fail,
        stats.initial_budget,
        stats.final_budget,
        stats.global_hash,
    );

    if let Some(out_path) = output {
        let text = m.to_json().context("serializing transformed module")?;
        fs::write(out_path, text)
            .with_context(|| format!("cannot write {}", out_path.display()))?;
    }
    Ok(())
}
