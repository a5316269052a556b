use crate::cluster::integrals::{ClusterIntegrals, SpinClusterIntegrals};
use crate::engine::{
    EngineError, RestrictedAmplitudes, RestrictedHook, UnrestrictedAmplitudes, UnrestrictedHook,
};
use ndarray::prelude::*;

/// Iteration cap and convergence thresholds handed to a CCSD-class engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CcsdParams {
    pub max_cycle: usize,
    pub conv_tol: f64,
    pub conv_tol_normt: f64,
}

#[derive(Debug, Clone)]
pub struct CcsdSolution {
    pub converged: bool,
    pub e_corr: f64,
    pub amplitudes: RestrictedAmplitudes,
}

#[derive(Debug, Clone)]
pub struct UccsdSolution {
    pub converged: bool,
    pub e_corr: f64,
    pub amplitudes: UnrestrictedAmplitudes,
}

/// De-excitation amplitudes, same index layout as the excitation amplitudes.
#[derive(Debug, Clone)]
pub struct LambdaSolution {
    pub converged: bool,
    pub lambdas: RestrictedAmplitudes,
}

#[derive(Debug, Clone)]
pub struct ULambdaSolution {
    pub converged: bool,
    pub lambdas: UnrestrictedAmplitudes,
}

/// Energies and eigenvectors from an excited-state root search. Single-root
/// requests are returned as one-element vectors so that all callers see the
/// same layout.
#[derive(Debug, Clone)]
pub struct EomRoots {
    pub energies: Vec<f64>,
    pub vectors: Vec<Array1<f64>>,
}

impl EomRoots {
    pub fn nroots(&self) -> usize {
        self.energies.len()
    }
}

/// A spin-restricted CCSD engine. Only `kernel` is mandatory; the remaining
/// capabilities default to [`EngineError::Unsupported`] so that a minimal
/// engine stays usable for plain energy calculations.
pub trait CcsdEngine {
    /// Solve the ground-state amplitude equations. `guess` seeds the start
    /// amplitudes. `hook` is invoked once per iteration with the current
    /// estimate; the engine enforces the output-shape contract through
    /// [`crate::engine::apply_restricted_hook`].
    fn kernel(
        &mut self,
        eris: &ClusterIntegrals,
        params: &CcsdParams,
        guess: Option<&RestrictedAmplitudes>,
        hook: Option<RestrictedHook>,
    ) -> Result<CcsdSolution, EngineError>;

    /// Solve the lambda (de-excitation) equations for converged amplitudes.
    fn solve_lambda(
        &mut self,
        _eris: &ClusterIntegrals,
        _amplitudes: &RestrictedAmplitudes,
    ) -> Result<LambdaSolution, EngineError> {
        Err(EngineError::Unsupported("the lambda equations"))
    }

    /// One-particle reduced density matrix in the active MO basis. Without
    /// lambda amplitudes the engine may fall back to an approximate form.
    fn make_rdm1(
        &mut self,
        _eris: &ClusterIntegrals,
        _amplitudes: &RestrictedAmplitudes,
        _lambdas: Option<&RestrictedAmplitudes>,
    ) -> Result<Array2<f64>, EngineError> {
        Err(EngineError::Unsupported("the one-particle density matrix"))
    }

    /// Ionization-potential roots on top of the ground-state amplitudes.
    fn ipccsd(
        &mut self,
        _eris: &ClusterIntegrals,
        _amplitudes: &RestrictedAmplitudes,
        _nroots: usize,
    ) -> Result<EomRoots, EngineError> {
        Err(EngineError::Unsupported("ionization-potential roots"))
    }

    /// Electron-attachment roots on top of the ground-state amplitudes.
    fn eaccsd(
        &mut self,
        _eris: &ClusterIntegrals,
        _amplitudes: &RestrictedAmplitudes,
        _nroots: usize,
    ) -> Result<EomRoots, EngineError> {
        Err(EngineError::Unsupported("electron-attachment roots"))
    }
}

/// Spin-unrestricted counterpart of [`CcsdEngine`].
pub trait UccsdEngine {
    fn kernel(
        &mut self,
        eris: &SpinClusterIntegrals,
        params: &CcsdParams,
        guess: Option<&UnrestrictedAmplitudes>,
        hook: Option<UnrestrictedHook>,
    ) -> Result<UccsdSolution, EngineError>;

    fn solve_lambda(
        &mut self,
        _eris: &SpinClusterIntegrals,
        _amplitudes: &UnrestrictedAmplitudes,
    ) -> Result<ULambdaSolution, EngineError> {
        Err(EngineError::Unsupported("the lambda equations"))
    }

    /// Spin-resolved one-particle density matrices (alpha, beta).
    fn make_rdm1(
        &mut self,
        _eris: &SpinClusterIntegrals,
        _amplitudes: &UnrestrictedAmplitudes,
        _lambdas: Option<&UnrestrictedAmplitudes>,
    ) -> Result<(Array2<f64>, Array2<f64>), EngineError> {
        Err(EngineError::Unsupported("the one-particle density matrix"))
    }

    fn ipccsd(
        &mut self,
        _eris: &SpinClusterIntegrals,
        _amplitudes: &UnrestrictedAmplitudes,
        _nroots: usize,
    ) -> Result<EomRoots, EngineError> {
        Err(EngineError::Unsupported("ionization-potential roots"))
    }

    fn eaccsd(
        &mut self,
        _eris: &SpinClusterIntegrals,
        _amplitudes: &UnrestrictedAmplitudes,
        _nroots: usize,
    ) -> Result<EomRoots, EngineError> {
        Err(EngineError::Unsupported("electron-attachment roots"))
    }
}
