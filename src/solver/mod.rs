//! The cluster solver layer: one solver instance per fragment drives an
//! engine, injects embedding corrections and normalizes the raw output into
//! a [`WavefunctionResult`] for the embedding driver.

pub mod ccsd;
pub mod coupling;
pub mod diagnostics;
pub mod fci;
pub mod logging;
pub mod mp2;
pub mod options;
pub mod uccsd;

use crate::cluster::{ClusterError, ClusterSpace, SpinClusterSpace};
use crate::engine::{EngineError, EomRoots, RestrictedAmplitudes, UnrestrictedAmplitudes};
use crate::solver::diagnostics::TDiagnostics;
use crate::solver::options::OptionsError;
use crate::utils::BracketError;
use log::{error, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::error;
use std::fmt;
use std::str::FromStr;

/// The correlated methods this layer can drive. Adding a variant without
/// handling it in the dispatch sites is a compile error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SolverKind {
    Mp2,
    Ccsd,
    Uccsd,
    Fci,
}

impl SolverKind {
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, SolverKind::Uccsd)
    }
}

impl FromStr for SolverKind {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MP2" => Ok(SolverKind::Mp2),
            "CCSD" => Ok(SolverKind::Ccsd),
            "UCCSD" => Ok(SolverKind::Uccsd),
            "FCI" => Ok(SolverKind::Fci),
            _ => Err(SolverError::UnknownSolver(s.to_owned())),
        }
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name: &str = match self {
            SolverKind::Mp2 => "MP2",
            SolverKind::Ccsd => "CCSD",
            SolverKind::Uccsd => "UCCSD",
            SolverKind::Fci => "FCI",
        };
        write!(f, "{}", name)
    }
}

impl TryFrom<String> for SolverKind {
    type Error = SolverError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SolverKind> for String {
    fn from(kind: SolverKind) -> String {
        kind.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    /// A solver name did not parse into any [`SolverKind`].
    UnknownSolver(String),
    /// No engine is available for the requested solver kind.
    MissingEngine(SolverKind),
    Options(OptionsError),
    Cluster(ClusterError),
    Engine(EngineError),
    /// The reference determinant carries too little weight for intermediate
    /// normalization; the cluster has multi-reference character.
    DegenerateReference { c0: f64, threshold: f64 },
    /// The chemical-potential search window does not bracket the target.
    ChempotBracket(BracketError),
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SolverError::UnknownSolver(name) => {
                write!(f, "Unknown solver '{}'. Choose one of: MP2, CCSD, UCCSD, FCI", name)
            }
            SolverError::MissingEngine(kind) => {
                write!(f, "No engine is available for the {} solver", kind)
            }
            SolverError::Options(err) => write!(f, "{}", err),
            SolverError::Cluster(err) => write!(f, "{}", err),
            SolverError::Engine(err) => write!(f, "{}", err),
            SolverError::DegenerateReference { c0, threshold } => {
                write!(
                    f,
                    "Reference determinant coefficient |c0| = {:.3e} is below {:.1e}; \
                     the cluster wavefunction is not single-reference",
                    c0.abs(),
                    threshold
                )
            }
            SolverError::ChempotBracket(err) => {
                write!(f, "Chemical-potential search failed: {}", err)
            }
        }
    }
}

impl error::Error for SolverError {}

impl From<OptionsError> for SolverError {
    fn from(err: OptionsError) -> Self {
        SolverError::Options(err)
    }
}

impl From<ClusterError> for SolverError {
    fn from(err: ClusterError) -> Self {
        SolverError::Cluster(err)
    }
}

impl From<EngineError> for SolverError {
    fn from(err: EngineError) -> Self {
        SolverError::Engine(err)
    }
}

impl From<BracketError> for SolverError {
    fn from(err: BracketError) -> Self {
        SolverError::ChempotBracket(err)
    }
}

/// Owned copies of the active orbital blocks a result was produced in.
/// Coupling hooks of other fragments project against these.
#[derive(Debug, Clone)]
pub enum ClusterOrbitals {
    Restricted {
        c_occ: Array2<f64>,
        c_vir: Array2<f64>,
    },
    Unrestricted {
        c_occ_a: Array2<f64>,
        c_vir_a: Array2<f64>,
        c_occ_b: Array2<f64>,
        c_vir_b: Array2<f64>,
    },
}

impl ClusterOrbitals {
    pub fn restricted(space: &ClusterSpace) -> Self {
        ClusterOrbitals::Restricted {
            c_occ: space.c_active_occ().to_owned(),
            c_vir: space.c_active_vir().to_owned(),
        }
    }

    pub fn unrestricted(space: &SpinClusterSpace) -> Self {
        ClusterOrbitals::Unrestricted {
            c_occ_a: space.alpha.c_active_occ().to_owned(),
            c_vir_a: space.alpha.c_active_vir().to_owned(),
            c_occ_b: space.beta.c_active_occ().to_owned(),
            c_vir_b: space.beta.c_active_vir().to_owned(),
        }
    }
}

/// Amplitudes in either spin flavor.
#[derive(Debug, Clone)]
pub enum Amplitudes {
    Restricted(RestrictedAmplitudes),
    Unrestricted(UnrestrictedAmplitudes),
}

impl Amplitudes {
    pub fn as_restricted(&self) -> Option<&RestrictedAmplitudes> {
        match self {
            Amplitudes::Restricted(amps) => Some(amps),
            Amplitudes::Unrestricted(_) => None,
        }
    }

    pub fn as_unrestricted(&self) -> Option<&UnrestrictedAmplitudes> {
        match self {
            Amplitudes::Unrestricted(amps) => Some(amps),
            Amplitudes::Restricted(_) => None,
        }
    }
}

/// One-particle reduced density matrix in the active MO basis.
#[derive(Debug, Clone)]
pub enum DensityMatrix {
    Restricted(Array2<f64>),
    Unrestricted(Array2<f64>, Array2<f64>),
}

/// Canonical solver output. Produced once per solve, immutable afterwards,
/// published to the fragment result store.
#[derive(Debug, Clone)]
pub struct WavefunctionResult {
    pub fragment: usize,
    pub kind: SolverKind,
    pub converged: bool,
    pub e_corr: f64,
    pub orbitals: ClusterOrbitals,
    /// Cluster-operator normalization.
    pub t: Option<Amplitudes>,
    /// Intermediate (CI) normalization.
    pub c: Option<Amplitudes>,
    /// Reference determinant weight of a CI solve.
    pub c0: Option<f64>,
    pub lambdas: Option<Amplitudes>,
    pub lambda_converged: Option<bool>,
    pub dm1: Option<DensityMatrix>,
    pub diagnostics: Option<TDiagnostics>,
    pub ip: Option<EomRoots>,
    pub ea: Option<EomRoots>,
    /// Converged chemical potential of a constrained solve.
    pub chempot: Option<f64>,
}

impl WavefunctionResult {
    /// Empty record; the solver kernels fill in what they produce.
    pub fn new(fragment: usize, kind: SolverKind, orbitals: ClusterOrbitals) -> Self {
        WavefunctionResult {
            fragment,
            kind,
            converged: false,
            e_corr: 0.0,
            orbitals,
            t: None,
            c: None,
            c0: None,
            lambdas: None,
            lambda_converged: None,
            dm1: None,
            diagnostics: None,
            ip: None,
            ea: None,
            chempot: None,
        }
    }

    pub fn restricted_t(&self) -> Option<&RestrictedAmplitudes> {
        self.t.as_ref().and_then(Amplitudes::as_restricted)
    }
}

/// Validate and log an excited-state root search; failures cost only the
/// requested roots, never the ground-state result.
pub(crate) fn checked_roots(outcome: Result<EomRoots, EngineError>, channel: &str) -> Option<EomRoots> {
    match outcome {
        Ok(roots) => {
            if roots.energies.len() != roots.vectors.len() {
                error!(
                    "{} returned {} energies but {} vectors",
                    channel,
                    roots.energies.len(),
                    roots.vectors.len()
                );
                return None;
            }
            logging::print_eom_roots(channel, &roots);
            Some(roots)
        }
        Err(EngineError::Unsupported(what)) => {
            warn!("The engine does not support {}", what);
            None
        }
        Err(err) => {
            error!("{} failed: {}", channel, err);
            None
        }
    }
}

/// Accumulate `sign * t1_left (x) t1_right` onto a doubles tensor. Same-spin
/// products enter antisymmetrized in the virtual pair.
fn singles_product(
    t2: &mut ndarray::Array4<f64>,
    t1_left: &Array2<f64>,
    t1_right: &Array2<f64>,
    antisymmetrize: bool,
    sign: f64,
) {
    let (nocc_l, nvir_l) = t1_left.dim();
    let (nocc_r, nvir_r) = t1_right.dim();
    for i in 0..nocc_l {
        for j in 0..nocc_r {
            for a in 0..nvir_l {
                for b in 0..nvir_r {
                    let mut value: f64 = t1_left[[i, a]] * t1_right[[j, b]];
                    if antisymmetrize {
                        value -= t1_left[[i, b]] * t1_right[[j, a]];
                    }
                    t2[[i, j, a, b]] += sign * value;
                }
            }
        }
    }
}

/// CI-normalized amplitudes from cluster-operator ones:
/// `c1 = t1`, `c2 = t2 + t1 (x) t1`.
pub fn t_to_c(t: &RestrictedAmplitudes) -> RestrictedAmplitudes {
    let mut c: RestrictedAmplitudes = t.clone();
    singles_product(&mut c.t2, &t.t1, &t.t1, false, 1.0);
    c
}

/// Cluster-operator amplitudes from CI-normalized ones:
/// `t1 = c1`, `t2 = c2 - c1 (x) c1`.
pub fn c_to_t(c: &RestrictedAmplitudes) -> RestrictedAmplitudes {
    let mut t: RestrictedAmplitudes = c.clone();
    singles_product(&mut t.t2, &c.t1, &c.t1, false, -1.0);
    t
}

/// Unrestricted counterpart of [`t_to_c`].
pub fn u_t_to_c(t: &UnrestrictedAmplitudes) -> UnrestrictedAmplitudes {
    let mut c: UnrestrictedAmplitudes = t.clone();
    singles_product(&mut c.t2aa, &t.t1a, &t.t1a, true, 1.0);
    singles_product(&mut c.t2ab, &t.t1a, &t.t1b, false, 1.0);
    singles_product(&mut c.t2bb, &t.t1b, &t.t1b, true, 1.0);
    c
}

/// Unrestricted counterpart of [`c_to_t`].
pub fn u_c_to_t(c: &UnrestrictedAmplitudes) -> UnrestrictedAmplitudes {
    let mut t: UnrestrictedAmplitudes = c.clone();
    singles_product(&mut t.t2aa, &c.t1a, &c.t1a, true, -1.0);
    singles_product(&mut t.t2ab, &c.t1a, &c.t1b, false, -1.0);
    singles_product(&mut t.t2bb, &c.t1b, &c.t1b, true, -1.0);
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::prelude::*;

    #[test]
    fn solver_names_parse_case_insensitively() {
        assert_eq!("ccsd".parse::<SolverKind>().unwrap(), SolverKind::Ccsd);
        assert_eq!("FCI".parse::<SolverKind>().unwrap(), SolverKind::Fci);
        assert_eq!("Uccsd".parse::<SolverKind>().unwrap(), SolverKind::Uccsd);
        assert_eq!("mp2".parse::<SolverKind>().unwrap(), SolverKind::Mp2);
        let err = "CISD".parse::<SolverKind>().unwrap_err();
        assert_eq!(err, SolverError::UnknownSolver("CISD".to_owned()));
    }

    #[test]
    fn normalization_conversions_are_inverse() {
        let t1: Array2<f64> = array![[0.1, -0.2], [0.05, 0.3]];
        let mut t2: Array4<f64> = Array4::zeros((2, 2, 2, 2));
        t2[[0, 0, 0, 0]] = -0.4;
        t2[[1, 0, 1, 0]] = 0.12;
        let t = RestrictedAmplitudes { t1, t2 };

        let c = t_to_c(&t);
        assert_relative_eq!(
            c.t2[[0, 0, 0, 0]],
            -0.4 + 0.1 * 0.1,
            epsilon = 1e-14
        );
        assert_relative_eq!(
            c.t2[[0, 1, 0, 1]],
            0.1 * (-0.2),
            epsilon = 1e-14
        );

        let back = c_to_t(&c);
        assert_relative_eq!(back.t1, t.t1, epsilon = 1e-14);
        assert_relative_eq!(back.t2, t.t2, epsilon = 1e-14);
    }

    #[test]
    fn same_spin_products_enter_antisymmetrized() {
        let mut t = UnrestrictedAmplitudes::zeros((2, 1), (2, 1));
        t.t1a[[0, 0]] = 0.1;
        t.t1a[[1, 1]] = 0.2;
        t.t1b[[0, 0]] = 0.3;

        let c = u_t_to_c(&t);
        assert_relative_eq!(c.t2aa[[0, 1, 0, 1]], 0.02, epsilon = 1e-14);
        assert_relative_eq!(c.t2aa[[0, 1, 1, 0]], -0.02, epsilon = 1e-14);
        // Same occupied index: the antisymmetrized product vanishes.
        assert_relative_eq!(c.t2aa[[0, 0, 0, 1]], 0.0, epsilon = 1e-14);
        // Opposite spins multiply without exchange.
        assert_relative_eq!(c.t2ab[[0, 0, 0, 0]], 0.03, epsilon = 1e-14);
        assert_relative_eq!(c.t2ab[[1, 0, 1, 0]], 0.06, epsilon = 1e-14);

        let back = u_c_to_t(&c);
        assert_relative_eq!(back.t2aa, t.t2aa, epsilon = 1e-14);
        assert_relative_eq!(back.t2ab, t.t2ab, epsilon = 1e-14);
        assert_relative_eq!(back.t2bb, t.t2bb, epsilon = 1e-14);
    }
}
