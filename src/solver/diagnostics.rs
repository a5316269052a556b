//! Single-reference adequacy diagnostics for coupled-cluster amplitudes.
//!
//! T1 is the Frobenius norm of the singles divided by the square root of the
//! correlated electron count, D1 the largest singular value of the singles
//! matrix and D2 the largest singular value of the doubles tensor unfolded
//! over its occupied and virtual index pairs.

use crate::defaults;
use crate::engine::RestrictedAmplitudes;
use ndarray::prelude::*;
use ndarray_linalg::{EigValsh, UPLO};
use ndarray_stats::QuantileExt;
use std::error;
use std::fmt;

/// Failure inside the dense decompositions backing D1/D2. Diagnostics are
/// informational, so callers downgrade this to a log message.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticError {
    message: String,
}

impl fmt::Display for DiagnosticError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Amplitude diagnostic failed: {}", self.message)
    }
}

impl error::Error for DiagnosticError {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TDiagnostics {
    pub t1: f64,
    pub d1: f64,
    pub d2: f64,
}

impl TDiagnostics {
    /// True when any value lies beyond its last acceptable bound.
    pub fn is_suspect(&self) -> bool {
        grade_t1(self.t1) == DiagnosticGrade::Inadequate
            || grade_d1(self.d1) == DiagnosticGrade::Inadequate
            || grade_d2(self.d2) == DiagnosticGrade::Inadequate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticGrade {
    Good,
    Fair,
    Inadequate,
}

impl fmt::Display for DiagnosticGrade {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label: &str = match self {
            DiagnosticGrade::Good => "good",
            DiagnosticGrade::Fair => "fair",
            DiagnosticGrade::Inadequate => "inadequate",
        };
        write!(f, "{}", label)
    }
}

/// T1 has no intermediate tier; values at the bound still count as good.
pub fn grade_t1(value: f64) -> DiagnosticGrade {
    if value <= defaults::T1_GOOD {
        DiagnosticGrade::Good
    } else {
        DiagnosticGrade::Inadequate
    }
}

pub fn grade_d1(value: f64) -> DiagnosticGrade {
    if value <= defaults::D1_GOOD {
        DiagnosticGrade::Good
    } else if value <= defaults::D1_FAIR {
        DiagnosticGrade::Fair
    } else {
        DiagnosticGrade::Inadequate
    }
}

pub fn grade_d2(value: f64) -> DiagnosticGrade {
    if value <= defaults::D2_GOOD {
        DiagnosticGrade::Good
    } else if value <= defaults::D2_FAIR {
        DiagnosticGrade::Fair
    } else {
        DiagnosticGrade::Inadequate
    }
}

pub fn t1_diagnostic(t1: ArrayView2<f64>) -> f64 {
    let nelec: f64 = 2.0 * t1.dim().0 as f64;
    if nelec == 0.0 {
        return 0.0;
    }
    let norm_sq: f64 = t1.iter().map(|x| x * x).sum();
    (norm_sq / nelec).sqrt()
}

pub fn d1_diagnostic(t1: ArrayView2<f64>) -> Result<f64, DiagnosticError> {
    if t1.is_empty() {
        return Ok(0.0);
    }
    largest_singular_value(&t1.dot(&t1.t()), "singles occupied gramian")
}

pub fn d2_diagnostic(t2: &Array4<f64>) -> Result<f64, DiagnosticError> {
    let (nocc, _, nvir, _) = t2.dim();
    if nocc == 0 || nvir == 0 {
        return Ok(0.0);
    }
    // Unfold over the first occupied index against the remaining three.
    let occ_flat: Array2<f64> = t2
        .to_owned()
        .into_shape((nocc, nocc * nvir * nvir))
        .unwrap();
    let occ_gram: Array2<f64> = occ_flat.dot(&occ_flat.t());
    // Same contraction with a virtual index leading.
    let vir_first: Array4<f64> = t2
        .view()
        .permuted_axes([2, 0, 1, 3])
        .as_standard_layout()
        .to_owned();
    let vir_flat: Array2<f64> = vir_first.into_shape((nvir, nocc * nocc * nvir)).unwrap();
    let vir_gram: Array2<f64> = vir_flat.dot(&vir_flat.t());

    let occ_max: f64 = largest_singular_value(&occ_gram, "doubles occupied gramian")?;
    let vir_max: f64 = largest_singular_value(&vir_gram, "doubles virtual gramian")?;
    Ok(occ_max.max(vir_max))
}

/// Square root of the largest eigenvalue of a gramian matrix.
fn largest_singular_value(gram: &Array2<f64>, context: &str) -> Result<f64, DiagnosticError> {
    let eigvals: Array1<f64> = gram.eigvalsh(UPLO::Upper).map_err(|err| DiagnosticError {
        message: format!("{}: {}", context, err),
    })?;
    let max: f64 = *eigvals.max().map_err(|err| DiagnosticError {
        message: format!("{}: {}", context, err),
    })?;
    Ok(max.max(0.0).sqrt())
}

pub fn compute(amplitudes: &RestrictedAmplitudes) -> Result<TDiagnostics, DiagnosticError> {
    Ok(TDiagnostics {
        t1: t1_diagnostic(amplitudes.t1.view()),
        d1: d1_diagnostic(amplitudes.t1.view())?,
        d2: d2_diagnostic(&amplitudes.t2)?,
    })
}
