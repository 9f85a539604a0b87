use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "parsync workspace automation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the criterion benches and summarize them
    Bench {
        /// Run quickly (lower sample size/time)
        #[arg(long, default_value_t = false)]
        quick: bool,

        /// Generate report only (skip running benchmarks)
        #[arg(long, default_value_t = false)]
        report_only: bool,

        /// Only this bench target
        #[arg(long)]
        only: Option<String>,

        /// Enable the `parallel` feature (rayon-backed sync rounds)
        #[arg(long, default_value_t = false)]
        parallel: bool,
    },
}

const BENCHES: &[&str] = &["worklist_benchmark", "barrier_benchmark"];

/// One criterion measurement: `group/function/parameter`.
#[derive(Debug, Serialize)]
struct Measurement {
    id: String,
    mean_ns: f64,
    /// Elements per second when the bench declares a throughput.
    elements_per_sec: Option<f64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Bench {
            quick,
            report_only,
            only,
            parallel,
        } => {
            if !report_only {
                let targets: Vec<&str> = match only.as_deref() {
                    Some(name) => {
                        if !BENCHES.contains(&name) {
                            anyhow::bail!("unknown bench {name}; expected one of {BENCHES:?}");
                        }
                        vec![name]
                    }
                    None => BENCHES.to_vec(),
                };
                run_benchmarks(&targets, quick, parallel)?;
            }
            generate_report()?;
        }
    }

    Ok(())
}

fn run_benchmarks(targets: &[&str], quick: bool, parallel: bool) -> Result<()> {
    for bench in targets {
        println!("\n>>> Running {bench}");
        let start = Instant::now();

        let mut cmd = Command::new("cargo");
        cmd.env("CARGO_INCREMENTAL", "0");
        cmd.arg("bench").arg("--bench").arg(bench);
        if parallel {
            cmd.arg("--features").arg("parallel");
        }

        // Args for the test runner (Criterion) go after --
        cmd.arg("--");
        if quick {
            cmd.arg("--measurement-time").arg("0.5");
            cmd.arg("--noplot");
            cmd.arg("--sample-size").arg("10");
        }

        let status = cmd.status().with_context(|| format!("failed to run bench {bench}"))?;
        if status.success() {
            println!("Finished {bench} in {:.2?}", start.elapsed());
        } else {
            eprintln!("Warning: bench {bench} failed");
        }
    }

    Ok(())
}

fn generate_report() -> Result<()> {
    println!("\n>>> Generating Report...");
    let criterion_dir = Path::new("target/criterion");
    if !criterion_dir.exists() {
        eprintln!("No criterion output found at {}", criterion_dir.display());
        return Ok(());
    }

    let mut results = BTreeMap::new();
    collect_results(criterion_dir, criterion_dir, &mut results);
    let measurements: Vec<Measurement> = results.into_values().collect();

    let out_dir = Path::new("benchmark_results");
    fs::create_dir_all(out_dir)?;
    fs::write(out_dir.join("report.json"), serde_json::to_string_pretty(&measurements)?)?;

    use std::io::Write;
    let report_path = out_dir.join("report.md");
    let mut file = fs::File::create(&report_path)?;
    writeln!(file, "# Benchmark Report")?;
    writeln!(file)?;
    writeln!(file, "| Benchmark | Mean | Throughput |")?;
    writeln!(file, "|---|---|---|")?;
    for m in &measurements {
        let throughput = m.elements_per_sec.map_or_else(|| "-".to_string(), format_rate);
        writeln!(file, "| {} | {} | {} |", m.id, format_time(m.mean_ns), throughput)?;
    }

    println!("Report written to {}", report_path.display());
    Ok(())
}

fn format_time(ns: f64) -> String {
    if ns > 1e9 {
        format!("{:.2} s", ns / 1e9)
    } else if ns > 1e6 {
        format!("{:.2} ms", ns / 1e6)
    } else if ns > 1e3 {
        format!("{:.2} us", ns / 1e3)
    } else {
        format!("{:.0} ns", ns)
    }
}

fn format_rate(per_sec: f64) -> String {
    if per_sec > 1_000_000.0 {
        format!("{:.2}M/s", per_sec / 1_000_000.0)
    } else if per_sec > 1_000.0 {
        format!("{:.2}K/s", per_sec / 1_000.0)
    } else {
        format!("{:.0}/s", per_sec)
    }
}

fn read_json(path: &Path) -> Option<serde_json::Value> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Walks criterion's output tree. Each measurement lives in
/// `<id...>/new/estimates.json` next to `<id...>/new/benchmark.json`.
fn collect_results(root: &Path, dir: &Path, results: &mut BTreeMap<String, Measurement>) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().and_then(|s| s.to_str()) != Some("report") {
                collect_results(root, &path, results);
            }
            continue;
        }
        if path.file_name().and_then(|s| s.to_str()) != Some("estimates.json") {
            continue;
        }
        let Some(run_dir) = path.parent() else { continue };
        if run_dir.file_name().and_then(|s| s.to_str()) != Some("new") {
            continue;
        }
        let Some(bench_dir) = run_dir.parent() else { continue };
        let Ok(rel) = bench_dir.strip_prefix(root) else { continue };
        let id = rel.to_string_lossy().replace('\\', "/");

        let Some(mean_ns) = read_json(&path)
            .and_then(|json| json.get("mean")?.get("point_estimate")?.as_f64())
            .filter(|&t| t > 0.0)
        else {
            continue;
        };
        let elements = read_json(&run_dir.join("benchmark.json"))
            .and_then(|json| json.get("throughput")?.get("Elements")?.as_f64());

        results.insert(
            id.clone(),
            Measurement {
                id,
                mean_ns,
                elements_per_sec: elements.map(|e| e * 1e9 / mean_ns),
            },
        );
    }
}
