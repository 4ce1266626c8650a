//! Benchmark reports and number formatting of the console output.
use crate::precond::PreconditionerKind;
use serde::Serialize;
use std::fmt;

/// Formats like C's `%g`: `precision` significant digits, trailing zeros removed, scientific
/// notation for exponents below -4 or from `precision` on.
pub fn format_g(value: f64, precision: usize) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if !value.is_finite() {
        return format!("{value}");
    }
    let precision = precision.max(1);
    let scientific = format!("{:.*e}", precision - 1, value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((m, e)) => (m.to_string(), e.parse::<i32>().unwrap_or(0)),
        None => return scientific,
    };
    if exponent < -4 || exponent >= precision as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_zeros(&mantissa), sign, exponent.abs())
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        trim_zeros(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Displays a number with six significant digits, see [`format_g`].
#[derive(Debug, Clone, Copy)]
pub struct G(pub f64);

impl fmt::Display for G {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_g(self.0, 6))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub name: String,
    pub min_seconds: f64,
    pub max_seconds: f64,
    /// Millions of dofs per second, for the slowest and the fastest rank.
    pub mdofs_per_second: Option<[f64; 2]>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SolveReport {
    pub iterations: usize,
    pub converged: bool,
    pub initial_residual: f64,
    pub final_residual: f64,
}

/// Summary of a run, assembled on rank 0.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub problem: u8,
    pub order: usize,
    pub quadrature_points: usize,
    pub preconditioner: PreconditionerKind,
    pub ranks: usize,
    pub global_dofs: usize,
    pub stages: Vec<StageReport>,
    pub solve: SolveReport,
    /// `|| x - x0 || / || x0 ||` over true dofs, if requested.
    pub relative_error: Option<f64>,
}

impl BenchmarkReport {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|stage| stage.name == name)
    }
}
