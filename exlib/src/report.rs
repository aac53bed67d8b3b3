//! Self-checks and timing runs behind the `check` and `bench` commands.

use std::time::Instant;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::layout::{
    Executor, Geometry, ImageShape, LayoutExecutor, Parallel, Sequential, TensorView,
};
use crate::metrics;

/// Tolerance for results that only differ by summation order.
pub const TOLERANCE: f32 = 1e-4;

/// Deterministic test image: a bounded ramp with no repeating runs.
pub fn synthetic_image(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| ((i * 7919) % 1009) as f32 / 1009.0 - 0.5)
        .collect()
}

/// One named property check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub shape: ImageShape,
    pub geometry: Geometry,
    pub checks: Vec<CheckResult>,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }
}

impl std::fmt::Display for CheckReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(f, "Layout checks: image {} ({})", self.shape, self.geometry)?;
        writeln!(f, "{}", "=".repeat(60))?;
        for c in &self.checks {
            let status = if c.passed { "ok" } else { "FAIL" };
            writeln!(f, "  {:<24} {:>4}  {}", c.name, status, c.detail)?;
        }
        Ok(())
    }
}

/// Run the layout properties on a synthetic image with `executor`, using the
/// sequential realization as reference.
pub fn run_checks(executor: &Executor, shape: ImageShape, geom: &Geometry) -> Result<CheckReport> {
    let img = synthetic_image(shape.checked_len()?);
    let view = TensorView::new(&img, shape)?;
    let reference = Executor::sequential();
    let mut checks = Vec::new();

    let col = executor.im2col(&view, geom).context("im2col failed")?;
    let expected_col = geom.col_len(&shape)?;
    checks.push(CheckResult {
        name: "column shape",
        passed: col.len() == expected_col,
        detail: format!("{} elements, expected {expected_col}", col.len()),
    });

    let seq_col = reference.im2col(&view, geom)?;
    let diff = metrics::max_abs_diff(&col, &seq_col);
    checks.push(CheckResult {
        name: "im2col equivalence",
        passed: diff == 0.0,
        detail: format!("max |diff| {diff:e}"),
    });

    let probe = synthetic_image(col.len().max(1));
    let probe = &probe[..col.len()];
    let back = executor.col2im(probe, shape, geom).context("col2im failed")?;
    checks.push(CheckResult {
        name: "image shape",
        passed: back.len() == shape.len(),
        detail: format!("{} elements, expected {}", back.len(), shape.len()),
    });

    let seq_back = reference.col2im(probe, shape, geom)?;
    let diff = metrics::max_abs_diff(&back, &seq_back);
    checks.push(CheckResult {
        name: "col2im equivalence",
        passed: diff <= TOLERANCE,
        detail: format!("max |diff| {diff:e}"),
    });

    let lhs = metrics::dot(&col, probe);
    let rhs = metrics::dot(&img, &back);
    let gap = metrics::relative_gap(lhs, rhs);
    checks.push(CheckResult {
        name: "adjointness",
        passed: gap <= TOLERANCE as f64,
        detail: format!("<im2col(x), c> = {lhs:.6}, <x, col2im(c)> = {rhs:.6}"),
    });

    if geom.is_non_overlapping() {
        let round = executor.col2im(&col, shape, geom)?;
        // Pixels no window covers come back as zero.
        let ones = vec![1.0; shape.len()];
        let ones_col = reference.im2col(&TensorView::new(&ones, shape)?, geom)?;
        let covered = reference.col2im(&ones_col, shape, geom)?;
        let expected: Vec<f32> = img.iter().zip(&covered).map(|(v, c)| v * c).collect();
        let diff = metrics::max_abs_diff(&round, &expected);
        checks.push(CheckResult {
            name: "round trip",
            passed: diff == 0.0,
            detail: format!("max |diff| {diff:e}"),
        });
    }

    Ok(CheckReport {
        shape,
        geometry: *geom,
        checks,
    })
}

/// Timing of one operation on one realization.
#[derive(Debug, Clone, Serialize)]
pub struct BenchResult {
    pub op: &'static str,
    pub executor: &'static str,
    pub iterations: u32,
    pub mean_ms: f64,
    pub min_ms: f64,
    /// Column tensor bytes moved per second at the mean time.
    pub throughput: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub timestamp: String,
    pub shape: ImageShape,
    pub geometry: Geometry,
    pub threads: usize,
    pub results: Vec<BenchResult>,
}

impl std::fmt::Display for BenchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", "=".repeat(72))?;
        writeln!(f, "im2col / col2im benchmark ({} threads)", self.threads)?;
        writeln!(f, "  image {}  {}", self.shape, self.geometry)?;
        writeln!(f, "{}", "=".repeat(72))?;
        writeln!(
            f,
            "{:<8} {:<16} {:>6} {:>12} {:>12} {:>12}",
            "Op", "Executor", "Iters", "Mean", "Min", "Rate"
        )?;
        writeln!(f, "{}", "-".repeat(72))?;
        for r in &self.results {
            writeln!(
                f,
                "{:<8} {:<16} {:>6} {:>10.3}ms {:>10.3}ms {:>10}/s",
                r.op,
                r.executor,
                r.iterations,
                r.mean_ms,
                r.min_ms,
                format_bytes(r.throughput as u64)
            )?;
        }
        Ok(())
    }
}

/// Time im2col and col2im on the sequential and parallel realizations.
pub fn run_bench(
    shape: ImageShape,
    geom: &Geometry,
    iterations: u32,
    parallel: Parallel,
) -> Result<BenchReport> {
    let img = synthetic_image(shape.checked_len()?);
    let view = TensorView::new(&img, shape)?;
    let col_len = geom.validate(&shape)?;
    let col_bytes = (col_len * std::mem::size_of::<f32>()) as f64;
    let threads = parallel.threads();

    let executors = [
        (Sequential.name(), Executor::sequential()),
        (parallel.name(), Executor::parallel().with_parallel(parallel)),
    ];

    let pb = ProgressBar::new(u64::from(iterations) * 4);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .context("invalid progress template")?
            .progress_chars("=>-"),
    );

    let mut results = Vec::new();
    let mut col = vec![0.0f32; col_len];
    let mut out = vec![0.0f32; shape.len()];
    for (name, exec) in &executors {
        pb.set_message(format!("im2col {name}"));
        let times = time_iterations(iterations, &pb, || exec.im2col_into(&view, geom, &mut col))?;
        results.push(summarize("im2col", *name, &times, col_bytes));

        pb.set_message(format!("col2im {name}"));
        let times = time_iterations(iterations, &pb, || exec.col2im_into(&col, shape, geom, &mut out))?;
        results.push(summarize("col2im", *name, &times, col_bytes));
    }
    pb.finish_with_message("done");

    Ok(BenchReport {
        timestamp: chrono::Utc::now().to_rfc3339(),
        shape,
        geometry: *geom,
        threads,
        results,
    })
}

fn time_iterations<E>(
    iterations: u32,
    pb: &ProgressBar,
    mut op: impl FnMut() -> std::result::Result<(), E>,
) -> Result<Vec<f64>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let mut times = Vec::with_capacity(iterations as usize);
    for _ in 0..iterations {
        let t0 = Instant::now();
        op()?;
        times.push(t0.elapsed().as_secs_f64() * 1e3);
        pb.inc(1);
    }
    Ok(times)
}

fn summarize(op: &'static str, executor: &'static str, times: &[f64], bytes: f64) -> BenchResult {
    let n = times.len().max(1) as f64;
    let mean_ms = times.iter().sum::<f64>() / n;
    let min_ms = times.iter().cloned().fold(f64::INFINITY, f64::min);
    let throughput = if mean_ms > 0.0 { bytes / (mean_ms / 1e3) } else { 0.0 };
    BenchResult {
        op,
        executor,
        iterations: times.len() as u32,
        mean_ms,
        min_ms: if min_ms.is_finite() { min_ms } else { 0.0 },
        throughput,
    }
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.2} GB", bytes as f64 / 1e9)
    } else if bytes >= 1_000_000 {
        format!("{:.2} MB", bytes as f64 / 1e6)
    } else if bytes >= 1_000 {
        format!("{:.1} KB", bytes as f64 / 1e3)
    } else {
        format!("{bytes} B")
    }
}
