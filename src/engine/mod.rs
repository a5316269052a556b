//! Interfaces to the correlated-wavefunction engines that solve the actual
//! amplitude or eigenvalue equations of a cluster. The solver layer drives
//! these traits and never touches the numerical kernels directly.

pub mod ccsd;
pub mod fci;

use ndarray::prelude::*;
use std::error;
use std::fmt;

pub use ccsd::{CcsdEngine, EomRoots, UccsdEngine};
pub use fci::{DirectFci, FciEngine};

/// Failure modes of the engines and of the amplitude hooks they invoke.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The engine does not implement the requested capability.
    Unsupported(&'static str),
    /// A tensor did not have the shape the contract requires.
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    /// An amplitude hook needs the wavefunction of a fragment that has not
    /// published one yet.
    MissingResult(usize),
    /// Linear algebra inside the engine failed.
    Numerical(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineError::Unsupported(what) => {
                write!(f, "The engine does not support {}", what)
            }
            EngineError::ShapeMismatch {
                context,
                expected,
                found,
            } => {
                write!(
                    f,
                    "Shape mismatch for {}: expected {:?}, found {:?}",
                    context, expected, found
                )
            }
            EngineError::MissingResult(index) => {
                write!(
                    f,
                    "No wavefunction result has been published for fragment {}",
                    index
                )
            }
            EngineError::Numerical(msg) => {
                write!(f, "Numerical failure inside the engine: {}", msg)
            }
        }
    }
}

impl error::Error for EngineError {}

pub(crate) fn check_shape(
    context: &str,
    expected: &[usize],
    found: &[usize],
) -> Result<(), EngineError> {
    if expected != found {
        return Err(EngineError::ShapeMismatch {
            context: context.to_owned(),
            expected: expected.to_vec(),
            found: found.to_vec(),
        });
    }
    Ok(())
}

/// Singles and doubles amplitudes of a spin-restricted cluster wavefunction.
/// `t1` has shape `(nocc, nvir)`, `t2` has shape `(nocc, nocc, nvir, nvir)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RestrictedAmplitudes {
    pub t1: Array2<f64>,
    pub t2: Array4<f64>,
}

impl RestrictedAmplitudes {
    pub fn zeros(nocc: usize, nvir: usize) -> Self {
        RestrictedAmplitudes {
            t1: Array2::zeros((nocc, nvir)),
            t2: Array4::zeros((nocc, nocc, nvir, nvir)),
        }
    }

    pub fn nocc(&self) -> usize {
        self.t1.dim().0
    }

    pub fn nvir(&self) -> usize {
        self.t1.dim().1
    }

    pub fn same_shape(&self, other: &Self) -> bool {
        self.t1.dim() == other.t1.dim() && self.t2.dim() == other.t2.dim()
    }
}

/// Spin-resolved amplitudes with independent alpha/alpha, alpha/beta and
/// beta/beta doubles blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct UnrestrictedAmplitudes {
    pub t1a: Array2<f64>,
    pub t1b: Array2<f64>,
    pub t2aa: Array4<f64>,
    pub t2ab: Array4<f64>,
    pub t2bb: Array4<f64>,
}

impl UnrestrictedAmplitudes {
    pub fn zeros(nocc: (usize, usize), nvir: (usize, usize)) -> Self {
        UnrestrictedAmplitudes {
            t1a: Array2::zeros((nocc.0, nvir.0)),
            t1b: Array2::zeros((nocc.1, nvir.1)),
            t2aa: Array4::zeros((nocc.0, nocc.0, nvir.0, nvir.0)),
            t2ab: Array4::zeros((nocc.0, nocc.1, nvir.0, nvir.1)),
            t2bb: Array4::zeros((nocc.1, nocc.1, nvir.1, nvir.1)),
        }
    }

    pub fn same_shape(&self, other: &Self) -> bool {
        self.t1a.dim() == other.t1a.dim()
            && self.t1b.dim() == other.t1b.dim()
            && self.t2aa.dim() == other.t2aa.dim()
            && self.t2ab.dim() == other.t2ab.dim()
            && self.t2bb.dim() == other.t2bb.dim()
    }
}

/// Correction applied to the amplitude estimate once per engine iteration.
/// The hook receives the current estimate and must return tensors of the
/// identical shapes; the engine checks this on every invocation.
pub type RestrictedHook<'a> =
    Box<dyn FnMut(&RestrictedAmplitudes) -> Result<RestrictedAmplitudes, EngineError> + 'a>;

pub type UnrestrictedHook<'a> =
    Box<dyn FnMut(&UnrestrictedAmplitudes) -> Result<UnrestrictedAmplitudes, EngineError> + 'a>;

/// Invoke a restricted hook and enforce the output-shape contract. Engines
/// call this from their iteration loop instead of the hook itself.
pub fn apply_restricted_hook(
    hook: &mut RestrictedHook,
    amplitudes: &RestrictedAmplitudes,
) -> Result<RestrictedAmplitudes, EngineError> {
    let out: RestrictedAmplitudes = hook(amplitudes)?;
    check_shape(
        "t1 returned by the amplitude hook",
        amplitudes.t1.shape(),
        out.t1.shape(),
    )?;
    check_shape(
        "t2 returned by the amplitude hook",
        amplitudes.t2.shape(),
        out.t2.shape(),
    )?;
    Ok(out)
}

/// Spin-resolved counterpart of [`apply_restricted_hook`].
pub fn apply_unrestricted_hook(
    hook: &mut UnrestrictedHook,
    amplitudes: &UnrestrictedAmplitudes,
) -> Result<UnrestrictedAmplitudes, EngineError> {
    let out: UnrestrictedAmplitudes = hook(amplitudes)?;
    check_shape(
        "t1a returned by the amplitude hook",
        amplitudes.t1a.shape(),
        out.t1a.shape(),
    )?;
    check_shape(
        "t1b returned by the amplitude hook",
        amplitudes.t1b.shape(),
        out.t1b.shape(),
    )?;
    check_shape(
        "t2aa returned by the amplitude hook",
        amplitudes.t2aa.shape(),
        out.t2aa.shape(),
    )?;
    check_shape(
        "t2ab returned by the amplitude hook",
        amplitudes.t2ab.shape(),
        out.t2ab.shape(),
    )?;
    check_shape(
        "t2bb returned by the amplitude hook",
        amplitudes.t2bb.shape(),
        out.t2bb.shape(),
    )?;
    Ok(out)
}
