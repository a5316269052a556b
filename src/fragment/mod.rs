//! Fragment records and the embedding driver. A fragment ties a local AO
//! space to a cluster solver; the driver validates the fragment list against
//! the stored reference, solves every cluster per iteration and publishes
//! the results to a store that sibling fragments read through their coupling
//! hooks.

pub mod logging;

use crate::cluster::{ClusterSpace, SpinClusterSpace};
use crate::engine::{CcsdEngine, DirectFci, EngineError, RestrictedHook, UccsdEngine};
use crate::reference::{Reference, StoredReference, StoredSpinReference};
use crate::solver::ccsd::RccsdSolver;
use crate::solver::coupling::{self, SiblingAmplitudes};
use crate::solver::diagnostics::TDiagnostics;
use crate::solver::fci::FciSolver;
use crate::solver::mp2::Mp2Solver;
use crate::solver::options::{
    CcsdOptions, FciOptions, OptionsError, ResolvedCcsdOptions, ResolvedFciOptions,
};
use crate::solver::uccsd::UccsdSolver;
use crate::solver::{ClusterOrbitals, SolverError, SolverKind, WavefunctionResult};
use hashbrown::HashMap;
use log::{debug, warn};
use ndarray::prelude::*;
use rayon::prelude::*;
use std::error;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum DriverError {
    /// Fragment indices must equal their position in the fragment list.
    IndexMismatch { position: usize, index: usize },
    /// A coupling or tailoring list names a fragment that does not exist.
    UnknownSibling { fragment: usize, sibling: usize },
    /// A fragment lists itself as a coupling partner.
    SelfCoupling { fragment: usize },
    /// The solver kind does not match the spin treatment of the reference.
    SpinMismatch {
        fragment: usize,
        kind: SolverKind,
        polarized_reference: bool,
    },
    /// The cluster space flavor does not match the solver kind.
    SpaceMismatch { fragment: usize, kind: SolverKind },
    /// A per-fragment configuration or solve failure.
    Solver { fragment: usize, source: SolverError },
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DriverError::IndexMismatch { position, index } => {
                write!(
                    f,
                    "The fragment at position {} carries index {}; indices must follow the list order",
                    position, index
                )
            }
            DriverError::UnknownSibling { fragment, sibling } => {
                write!(
                    f,
                    "Fragment {} couples to fragment {}, which is not defined",
                    fragment, sibling
                )
            }
            DriverError::SelfCoupling { fragment } => {
                write!(f, "Fragment {} lists itself as a coupling partner", fragment)
            }
            DriverError::SpinMismatch {
                fragment,
                kind,
                polarized_reference,
            } => {
                let reference: &str = if *polarized_reference {
                    "spin-polarized"
                } else {
                    "spin-restricted"
                };
                write!(
                    f,
                    "Fragment {} requests the {} solver on a {} reference",
                    fragment, kind, reference
                )
            }
            DriverError::SpaceMismatch { fragment, kind } => {
                write!(
                    f,
                    "Fragment {} pairs the {} solver with the wrong cluster-space flavor",
                    fragment, kind
                )
            }
            DriverError::Solver { fragment, source } => {
                write!(f, "Fragment {}: {}", fragment, source)
            }
        }
    }
}

impl error::Error for DriverError {}

/// Cluster space in the spin flavor of the owning fragment's solver.
#[derive(Debug, Clone)]
pub enum FragmentSpace {
    Restricted(ClusterSpace),
    Polarized(SpinClusterSpace),
}

impl FragmentSpace {
    /// Active orbital count; the alpha channel for polarized spaces.
    pub fn norb_active(&self) -> usize {
        match self {
            FragmentSpace::Restricted(space) => space.norb_active(),
            FragmentSpace::Polarized(space) => space.alpha.norb_active(),
        }
    }

    pub fn nelec_active(&self) -> f64 {
        match self {
            FragmentSpace::Restricted(space) => space.nelec_active(),
            FragmentSpace::Polarized(space) => {
                space.alpha.nelec_active() + space.beta.nelec_active()
            }
        }
    }
}

/// One embedding fragment: a local AO block, a solver kind, the cluster
/// space the solver works in and the per-fragment option overrides. The
/// `coupled` list feeds self-consistent cross-fragment coupling, the
/// `tailor_from` list static amplitude tailoring.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub index: usize,
    pub name: String,
    pub kind: SolverKind,
    /// AO coefficients spanning the fragment's local space.
    pub c_frag: Array2<f64>,
    pub space: FragmentSpace,
    pub ccsd: CcsdOptions,
    pub fci: FciOptions,
    pub coupled: Vec<usize>,
    pub tailor_from: Vec<usize>,
}

impl Fragment {
    pub fn new(
        index: usize,
        name: &str,
        kind: SolverKind,
        c_frag: Array2<f64>,
        space: FragmentSpace,
    ) -> Self {
        Fragment {
            index,
            name: name.to_owned(),
            kind,
            c_frag,
            space,
            ccsd: CcsdOptions::default(),
            fci: FciOptions::default(),
            coupled: Vec::new(),
            tailor_from: Vec::new(),
        }
    }

    /// Fragment-space projector `(C^T S C_frag)(C_frag^T S C)` expressed in
    /// the orbital basis `c_basis`.
    pub fn projector(&self, c_basis: ArrayView2<f64>, ovlp: ArrayView2<f64>) -> Array2<f64> {
        let left: Array2<f64> = c_basis.t().dot(&ovlp.dot(&self.c_frag));
        let right: Array2<f64> = self.c_frag.t().dot(&ovlp.dot(&c_basis));
        left.dot(&right)
    }
}

/// Published per-fragment wavefunction results, keyed by fragment index.
/// `get` exposes the slot as an `Option`; coupling paths use `require` and
/// fail fast on an absent sibling instead of relying on iteration order.
#[derive(Debug, Default)]
pub struct ResultStore {
    results: HashMap<usize, WavefunctionResult>,
}

impl ResultStore {
    pub fn new() -> Self {
        ResultStore {
            results: HashMap::new(),
        }
    }

    /// Store a result under its fragment index. Later embedding iterations
    /// replace the previous entry.
    pub fn publish(&mut self, result: WavefunctionResult) {
        debug!(
            "Fragment {:3}: publishing the {} result",
            result.fragment, result.kind
        );
        self.results.insert(result.fragment, result);
    }

    pub fn get(&self, fragment: usize) -> Option<&WavefunctionResult> {
        self.results.get(&fragment)
    }

    pub fn require(&self, fragment: usize) -> Result<&WavefunctionResult, EngineError> {
        self.results
            .get(&fragment)
            .ok_or(EngineError::MissingResult(fragment))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// All published results in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &WavefunctionResult> {
        self.results.values()
    }
}

pub type CcsdFactory = Box<dyn Fn() -> Box<dyn CcsdEngine> + Send + Sync>;
pub type UccsdFactory = Box<dyn Fn() -> Box<dyn UccsdEngine> + Send + Sync>;

/// External CCSD-class engines, supplied as factories so that every fragment
/// solve gets a fresh engine even under parallel fan-out. The FCI engine is
/// bundled and needs no slot here.
#[derive(Default)]
pub struct EngineSet {
    pub ccsd: Option<CcsdFactory>,
    pub uccsd: Option<UccsdFactory>,
}

#[derive(Debug, Clone)]
pub struct FragmentSummary {
    pub index: usize,
    pub name: String,
    pub kind: SolverKind,
    pub converged: bool,
    pub e_corr: f64,
    pub diagnostics: Option<TDiagnostics>,
}

/// Assembled energies of one embedding run. The correlation energy is the
/// plain sum over fragments.
#[derive(Debug, Clone)]
pub struct EmbeddingSummary {
    pub fragments: Vec<FragmentSummary>,
    pub e_mf: f64,
    pub e_corr: f64,
    pub e_tot: f64,
}

impl EmbeddingSummary {
    pub fn converged(&self) -> bool {
        self.fragments.iter().all(|fragment| fragment.converged)
    }
}

/// The embedding driver: owns the reference, the fragment list and the
/// result store. Construction validates the whole configuration; `run`
/// executes the embedding iterations and assembles the summary.
pub struct Embedding {
    reference: Reference,
    fragments: Vec<Fragment>,
    engines: EngineSet,
    base_ccsd: CcsdOptions,
    base_fci: FciOptions,
    iterations: usize,
    store: ResultStore,
}

impl Embedding {
    pub fn new(
        reference: Reference,
        fragments: Vec<Fragment>,
        engines: EngineSet,
        base_ccsd: CcsdOptions,
        base_fci: FciOptions,
        iterations: usize,
    ) -> Result<Self, DriverError> {
        let driver = Embedding {
            reference,
            fragments,
            engines,
            base_ccsd,
            base_fci,
            iterations: iterations.max(1),
            store: ResultStore::new(),
        };
        driver.validate()?;
        Ok(driver)
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Whether any fragment reads sibling results. Coupled runs must stay
    /// sequential; uncoupled fragments are independent.
    pub fn has_coupling(&self) -> bool {
        self.fragments
            .iter()
            .any(|fragment| !fragment.coupled.is_empty() || !fragment.tailor_from.is_empty())
    }

    /// Configuration checks, all fatal before any solve.
    fn validate(&self) -> Result<(), DriverError> {
        let polarized: bool = self.reference.is_polarized();
        for (position, fragment) in self.fragments.iter().enumerate() {
            let wrap = |source: SolverError| DriverError::Solver {
                fragment: fragment.index,
                source,
            };
            if fragment.index != position {
                return Err(DriverError::IndexMismatch {
                    position,
                    index: fragment.index,
                });
            }
            if fragment.kind.is_unrestricted() != polarized {
                return Err(DriverError::SpinMismatch {
                    fragment: fragment.index,
                    kind: fragment.kind,
                    polarized_reference: polarized,
                });
            }
            let space_polarized: bool = matches!(fragment.space, FragmentSpace::Polarized(_));
            if space_polarized != fragment.kind.is_unrestricted() {
                return Err(DriverError::SpaceMismatch {
                    fragment: fragment.index,
                    kind: fragment.kind,
                });
            }
            for &sibling in fragment.coupled.iter().chain(&fragment.tailor_from) {
                if sibling == fragment.index {
                    return Err(DriverError::SelfCoupling {
                        fragment: fragment.index,
                    });
                }
                if sibling >= self.fragments.len() {
                    return Err(DriverError::UnknownSibling {
                        fragment: fragment.index,
                        sibling,
                    });
                }
            }
            match fragment.kind {
                SolverKind::Mp2 => {}
                SolverKind::Ccsd => {
                    self.resolved_ccsd(fragment).map_err(wrap)?;
                    if self.engines.ccsd.is_none() {
                        return Err(wrap(SolverError::MissingEngine(SolverKind::Ccsd)));
                    }
                }
                SolverKind::Uccsd => {
                    let opts: ResolvedCcsdOptions = self.resolved_ccsd(fragment).map_err(wrap)?;
                    if opts.sc_mode.is_some() {
                        return Err(wrap(
                            OptionsError::Unsupported {
                                option: "sc_mode",
                                solver: "UCCSD",
                            }
                            .into(),
                        ));
                    }
                    if opts.tailor_cas.is_some() {
                        return Err(wrap(
                            OptionsError::Unsupported {
                                option: "tailor_cas",
                                solver: "UCCSD",
                            }
                            .into(),
                        ));
                    }
                    if !fragment.coupled.is_empty() || !fragment.tailor_from.is_empty() {
                        return Err(wrap(
                            OptionsError::Unsupported {
                                option: "coupled/tailor_from",
                                solver: "UCCSD",
                            }
                            .into(),
                        ));
                    }
                    if self.engines.uccsd.is_none() {
                        return Err(wrap(SolverError::MissingEngine(SolverKind::Uccsd)));
                    }
                }
                SolverKind::Fci => {
                    self.resolved_fci(fragment).map_err(wrap)?;
                }
            }
        }
        Ok(())
    }

    fn resolved_ccsd(&self, fragment: &Fragment) -> Result<ResolvedCcsdOptions, SolverError> {
        Ok(fragment.ccsd.merged_over(&self.base_ccsd).resolve()?)
    }

    fn resolved_fci(&self, fragment: &Fragment) -> Result<ResolvedFciOptions, SolverError> {
        Ok(fragment.fci.merged_over(&self.base_fci).resolve()?)
    }

    /// Run all embedding iterations and assemble the energy summary.
    pub fn run(&mut self) -> Result<EmbeddingSummary, DriverError> {
        logging::print_driver_init(&self.reference, &self.fragments, self.iterations);
        let serial: bool = self.has_coupling();
        for iteration in 1..=self.iterations {
            logging::print_iteration(iteration, self.iterations);
            if serial {
                for idx in 0..self.fragments.len() {
                    let result: WavefunctionResult =
                        self.solve_one(&self.fragments[idx], iteration)?;
                    self.store.publish(result);
                }
            } else {
                let driver: &Embedding = &*self;
                let results: Result<Vec<WavefunctionResult>, DriverError> = driver
                    .fragments
                    .par_iter()
                    .map(|fragment| driver.solve_one(fragment, iteration))
                    .collect();
                for result in results? {
                    self.store.publish(result);
                }
            }
        }
        let summary: EmbeddingSummary = self.summary();
        logging::print_summary(&summary);
        Ok(summary)
    }

    fn solve_one(
        &self,
        fragment: &Fragment,
        iteration: usize,
    ) -> Result<WavefunctionResult, DriverError> {
        let wrap = |source: SolverError| DriverError::Solver {
            fragment: fragment.index,
            source,
        };
        match fragment.kind {
            SolverKind::Mp2 => {
                let mf: &StoredReference = self.restricted_reference(fragment)?;
                let space: &ClusterSpace = restricted_space(fragment)?;
                Mp2Solver::new(fragment.index, space).solve(mf).map_err(wrap)
            }
            SolverKind::Ccsd => {
                let mf: &StoredReference = self.restricted_reference(fragment)?;
                let space: &ClusterSpace = restricted_space(fragment)?;
                let opts: ResolvedCcsdOptions = self.resolved_ccsd(fragment).map_err(wrap)?;
                let factory: &CcsdFactory = self
                    .engines
                    .ccsd
                    .as_ref()
                    .ok_or_else(|| wrap(SolverError::MissingEngine(SolverKind::Ccsd)))?;
                let mut engine: Box<dyn CcsdEngine> = factory();
                let hook: Option<RestrictedHook<'static>> = self
                    .coupling_hook(fragment, space, &opts, iteration)
                    .map_err(wrap)?;
                RccsdSolver::new(fragment.index, space, opts, engine.as_mut())
                    .solve(mf, None, hook)
                    .map_err(wrap)
            }
            SolverKind::Uccsd => {
                let mf: &StoredSpinReference = self.polarized_reference(fragment)?;
                let space: &SpinClusterSpace = polarized_space(fragment)?;
                let opts: ResolvedCcsdOptions = self.resolved_ccsd(fragment).map_err(wrap)?;
                let factory: &UccsdFactory = self
                    .engines
                    .uccsd
                    .as_ref()
                    .ok_or_else(|| wrap(SolverError::MissingEngine(SolverKind::Uccsd)))?;
                let mut engine: Box<dyn UccsdEngine> = factory();
                UccsdSolver::new(fragment.index, space, opts, engine.as_mut())
                    .solve(mf, None, None)
                    .map_err(wrap)
            }
            SolverKind::Fci => {
                let mf: &StoredReference = self.restricted_reference(fragment)?;
                let space: &ClusterSpace = restricted_space(fragment)?;
                let opts: ResolvedFciOptions = self.resolved_fci(fragment).map_err(wrap)?;
                let projector: Option<Array2<f64>> = opts.nelec_target.map(|_| {
                    fragment.projector(space.c_active(), self.reference.overlap())
                });
                let mut engine = DirectFci::default();
                FciSolver::new(fragment.index, space, opts, &mut engine)
                    .solve(mf, projector.as_ref())
                    .map_err(wrap)
            }
        }
    }

    /// Build the per-iteration amplitude hook of a restricted CCSD fragment.
    /// Precedence: a CAS tailoring window (handled inside the solver) wins,
    /// then self-consistent coupling from the second iteration on, then
    /// static tailoring.
    fn coupling_hook(
        &self,
        fragment: &Fragment,
        space: &ClusterSpace,
        opts: &ResolvedCcsdOptions,
        iteration: usize,
    ) -> Result<Option<RestrictedHook<'static>>, SolverError> {
        let ovlp: ArrayView2<f64> = self.reference.overlap();
        let target: ClusterOrbitals = ClusterOrbitals::restricted(space);

        if let Some(mode) = opts.sc_mode {
            if fragment.coupled.is_empty() {
                warn!(
                    "Fragment {:3}: sc_mode is set but no coupled fragments are listed",
                    fragment.index
                );
            } else if iteration <= 1 {
                debug!(
                    "Fragment {:3}: self-consistent coupling starts with the second iteration",
                    fragment.index
                );
            } else {
                let sources: Vec<SiblingAmplitudes> =
                    self.sibling_amplitudes(&fragment.coupled, &target, space, ovlp)?;
                let own: Array2<f64> = fragment.projector(space.c_active_occ(), ovlp);
                return Ok(Some(coupling::make_cross_fragment_hook(sources, own, mode)));
            }
        }
        if !fragment.tailor_from.is_empty() {
            let sources: Vec<SiblingAmplitudes> =
                self.sibling_amplitudes(&fragment.tailor_from, &target, space, ovlp)?;
            return Ok(Some(coupling::make_tailor_hook(sources)));
        }
        Ok(None)
    }

    fn sibling_amplitudes(
        &self,
        indices: &[usize],
        target: &ClusterOrbitals,
        space: &ClusterSpace,
        ovlp: ArrayView2<f64>,
    ) -> Result<Vec<SiblingAmplitudes>, SolverError> {
        let mut sources: Vec<SiblingAmplitudes> = Vec::with_capacity(indices.len());
        for &sibling in indices {
            let result: &WavefunctionResult = self.store.require(sibling)?;
            let projector: Array2<f64> =
                self.fragments[sibling].projector(space.c_active_occ(), ovlp);
            sources.push(SiblingAmplitudes::prepare(result, target, ovlp, projector)?);
        }
        Ok(sources)
    }

    fn restricted_reference(&self, fragment: &Fragment) -> Result<&StoredReference, DriverError> {
        self.reference
            .restricted()
            .ok_or(DriverError::SpinMismatch {
                fragment: fragment.index,
                kind: fragment.kind,
                polarized_reference: true,
            })
    }

    fn polarized_reference(
        &self,
        fragment: &Fragment,
    ) -> Result<&StoredSpinReference, DriverError> {
        self.reference.polarized().ok_or(DriverError::SpinMismatch {
            fragment: fragment.index,
            kind: fragment.kind,
            polarized_reference: false,
        })
    }

    fn summary(&self) -> EmbeddingSummary {
        let mut fragments: Vec<FragmentSummary> = Vec::with_capacity(self.fragments.len());
        let mut e_corr: f64 = 0.0;
        for fragment in &self.fragments {
            if let Some(result) = self.store.get(fragment.index) {
                e_corr += result.e_corr;
                fragments.push(FragmentSummary {
                    index: fragment.index,
                    name: fragment.name.clone(),
                    kind: result.kind,
                    converged: result.converged,
                    e_corr: result.e_corr,
                    diagnostics: result.diagnostics,
                });
            }
        }
        let e_mf: f64 = self.reference.e_tot();
        EmbeddingSummary {
            fragments,
            e_mf,
            e_corr,
            e_tot: e_mf + e_corr,
        }
    }
}

fn restricted_space(fragment: &Fragment) -> Result<&ClusterSpace, DriverError> {
    match &fragment.space {
        FragmentSpace::Restricted(space) => Ok(space),
        FragmentSpace::Polarized(_) => Err(DriverError::SpaceMismatch {
            fragment: fragment.index,
            kind: fragment.kind,
        }),
    }
}

fn polarized_space(fragment: &Fragment) -> Result<&SpinClusterSpace, DriverError> {
    match &fragment.space {
        FragmentSpace::Polarized(space) => Ok(space),
        FragmentSpace::Restricted(_) => Err(DriverError::SpaceMismatch {
            fragment: fragment.index,
            kind: fragment.kind,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::MeanField;
    use crate::solver::options::{CouplingMode, Setting};
    use crate::utils::tests::{
        doublet_spin_reference, h2_reference, h2_spin_reference, DenominatorCcsd, DenominatorUccsd,
    };
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn h2_fragment(index: usize, kind: SolverKind) -> Fragment {
        let mf = h2_reference();
        let space = mf.full_space();
        let c_frag: Array2<f64> = mf.mo_coeff.clone();
        Fragment::new(
            index,
            &format!("H2-{}", index),
            kind,
            c_frag,
            FragmentSpace::Restricted(space),
        )
    }

    fn ccsd_engines() -> EngineSet {
        EngineSet {
            ccsd: Some(Box::new(|| Box::new(DenominatorCcsd::new()))),
            uccsd: None,
        }
    }

    #[test]
    fn result_store_reads_are_fail_fast() {
        let mut store = ResultStore::new();
        assert!(store.is_empty());
        assert_eq!(store.require(0).unwrap_err(), EngineError::MissingResult(0));

        let mf = h2_reference();
        let orbitals = ClusterOrbitals::restricted(&mf.full_space());
        store.publish(WavefunctionResult::new(0, SolverKind::Mp2, orbitals));
        assert_eq!(store.len(), 1);
        assert!(store.get(0).is_some());
        assert!(store.require(0).is_ok());
        assert!(store.get(1).is_none());
    }

    #[test]
    fn projector_spans_exactly_the_fragment_block() {
        let mf = h2_reference();
        let space = mf.full_space();
        // fragment = the occupied MO only
        let c_frag: Array2<f64> = mf.mo_coeff.slice(s![.., ..1]).to_owned();
        let fragment = Fragment::new(
            0,
            "occ",
            SolverKind::Ccsd,
            c_frag,
            FragmentSpace::Restricted(space.clone()),
        );
        let proj: Array2<f64> = fragment.projector(space.mo_coeff(), mf.overlap());
        // orthonormal MOs: the projector picks out the first column
        assert_relative_eq!(proj[[0, 0]], 1.0, epsilon = 1e-10);
        assert_relative_eq!(proj[[1, 1]], 0.0, epsilon = 1e-10);
        assert_relative_eq!(proj[[0, 1]], 0.0, epsilon = 1e-10);
    }

    #[test]
    fn single_fragment_embedding_matches_a_direct_solve() {
        let mf = h2_reference();
        let fragment = h2_fragment(0, SolverKind::Ccsd);
        let space = mf.full_space();

        let mut embedding = Embedding::new(
            Reference::Restricted(mf.stored()),
            vec![fragment],
            ccsd_engines(),
            CcsdOptions::default(),
            FciOptions::default(),
            1,
        )
        .unwrap();
        let summary = embedding.run().unwrap();

        let mut engine = DenominatorCcsd::new();
        let opts = CcsdOptions::default().resolve().unwrap();
        let direct = RccsdSolver::new(0, &space, opts, &mut engine)
            .solve(&mf, None, None)
            .unwrap();

        let through_store = embedding.store().require(0).unwrap();
        assert!(through_store.converged);
        assert_relative_eq!(through_store.e_corr, direct.e_corr, epsilon = 1e-12);
        assert_relative_eq!(summary.e_corr, direct.e_corr, epsilon = 1e-12);
        assert_relative_eq!(summary.e_tot, mf.e_tot() + direct.e_corr, epsilon = 1e-12);
        assert!(summary.converged());
    }

    #[test]
    fn restricted_kinds_dispatch_through_the_driver() {
        let fragments = vec![
            h2_fragment(0, SolverKind::Mp2),
            h2_fragment(1, SolverKind::Ccsd),
            h2_fragment(2, SolverKind::Fci),
        ];
        let mf = h2_reference();
        let mut embedding = Embedding::new(
            Reference::Restricted(mf.stored()),
            fragments,
            ccsd_engines(),
            CcsdOptions::default(),
            FciOptions::default(),
            1,
        )
        .unwrap();
        let summary = embedding.run().unwrap();

        assert_eq!(embedding.store().len(), 3);
        assert_eq!(embedding.store().require(0).unwrap().kind, SolverKind::Mp2);
        assert_eq!(embedding.store().require(1).unwrap().kind, SolverKind::Ccsd);
        assert_eq!(embedding.store().require(2).unwrap().kind, SolverKind::Fci);
        assert_eq!(summary.fragments.len(), 3);
        assert!(summary.converged());
    }

    #[test]
    fn polarized_job_runs_the_unrestricted_solver() {
        let mf = h2_spin_reference();
        let space = mf.full_space();
        let fragment = Fragment::new(
            0,
            "H2",
            SolverKind::Uccsd,
            mf.mo_coeff_a.clone(),
            FragmentSpace::Polarized(space),
        );
        let engines = EngineSet {
            ccsd: None,
            uccsd: Some(Box::new(|| Box::new(DenominatorUccsd::new()))),
        };
        let mut embedding = Embedding::new(
            Reference::Polarized(mf.stored()),
            vec![fragment],
            engines,
            CcsdOptions::default(),
            FciOptions::default(),
            1,
        )
        .unwrap();
        embedding.run().unwrap();
        assert_eq!(
            embedding.store().require(0).unwrap().kind,
            SolverKind::Uccsd
        );
    }

    #[test]
    fn unrestricted_embedding_matches_a_direct_solve_on_a_doublet() {
        let mf = doublet_spin_reference();
        let space = mf.full_space();
        let fragment = Fragment::new(
            0,
            "radical",
            SolverKind::Uccsd,
            mf.mo_coeff_a.clone(),
            FragmentSpace::Polarized(space.clone()),
        );
        let engines = EngineSet {
            ccsd: None,
            uccsd: Some(Box::new(|| Box::new(DenominatorUccsd::new()))),
        };
        let mut embedding = Embedding::new(
            Reference::Polarized(mf.stored()),
            vec![fragment],
            engines,
            CcsdOptions::default(),
            FciOptions::default(),
            1,
        )
        .unwrap();
        let summary = embedding.run().unwrap();

        let mut engine = DenominatorUccsd::new();
        let opts = CcsdOptions::default().resolve().unwrap();
        let direct = UccsdSolver::new(0, &space, opts, &mut engine)
            .solve(&mf, None, None)
            .unwrap();

        // The mixed-spin pair excitations leave a real correlation energy.
        assert!(direct.e_corr < 0.0);
        let through_store = embedding.store().require(0).unwrap();
        assert_relative_eq!(through_store.e_corr, direct.e_corr, epsilon = 1e-12);
        assert_relative_eq!(summary.e_corr, direct.e_corr, epsilon = 1e-12);
        assert_relative_eq!(summary.e_tot, mf.e_tot + direct.e_corr, epsilon = 1e-12);
    }

    #[test]
    fn coupling_to_an_undefined_fragment_is_rejected() {
        let mut fragment = h2_fragment(0, SolverKind::Ccsd);
        fragment.coupled = vec![5];
        let err = Embedding::new(
            Reference::Restricted(h2_reference().stored()),
            vec![fragment],
            ccsd_engines(),
            CcsdOptions::default(),
            FciOptions::default(),
            1,
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            DriverError::UnknownSibling {
                fragment: 0,
                sibling: 5
            }
        );
    }

    #[test]
    fn solver_kind_must_match_the_reference_spin() {
        let fragment = h2_fragment(0, SolverKind::Uccsd);
        let err = Embedding::new(
            Reference::Restricted(h2_reference().stored()),
            vec![fragment],
            ccsd_engines(),
            CcsdOptions::default(),
            FciOptions::default(),
            1,
        )
        .err()
        .unwrap();
        assert!(matches!(err, DriverError::SpinMismatch { fragment: 0, .. }));
    }

    #[test]
    fn ccsd_without_an_engine_is_a_configuration_error() {
        let fragment = h2_fragment(0, SolverKind::Ccsd);
        let err = Embedding::new(
            Reference::Restricted(h2_reference().stored()),
            vec![fragment],
            EngineSet::default(),
            CcsdOptions::default(),
            FciOptions::default(),
            1,
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            DriverError::Solver {
                fragment: 0,
                source: SolverError::MissingEngine(SolverKind::Ccsd)
            }
        );
    }

    #[test]
    fn required_option_errors_surface_before_any_solve() {
        let mut fragment = h2_fragment(0, SolverKind::Fci);
        fragment.fci.chempot = Setting::Set(true);
        let err = Embedding::new(
            Reference::Restricted(h2_reference().stored()),
            vec![fragment],
            EngineSet::default(),
            CcsdOptions::default(),
            FciOptions::default(),
            1,
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            DriverError::Solver {
                fragment: 0,
                source: SolverError::Options(OptionsError::Required("fci.nelec_target"))
            }
        );
    }

    #[test]
    fn missing_sibling_result_fails_fast() {
        // fragment 0 tailors from fragment 1, which has not solved yet when
        // the sequential loop reaches fragment 0
        let mut first = h2_fragment(0, SolverKind::Ccsd);
        first.tailor_from = vec![1];
        let second = h2_fragment(1, SolverKind::Ccsd);
        let mut embedding = Embedding::new(
            Reference::Restricted(h2_reference().stored()),
            vec![first, second],
            ccsd_engines(),
            CcsdOptions::default(),
            FciOptions::default(),
            1,
        )
        .unwrap();
        let err = embedding.run().unwrap_err();
        assert_eq!(
            err,
            DriverError::Solver {
                fragment: 0,
                source: SolverError::Engine(EngineError::MissingResult(1))
            }
        );
    }

    #[test]
    fn tailoring_follows_the_publication_order() {
        // the same pair the other way round: fragment 1 tailors from 0
        let first = h2_fragment(0, SolverKind::Ccsd);
        let mut second = h2_fragment(1, SolverKind::Ccsd);
        second.tailor_from = vec![0];
        let mut embedding = Embedding::new(
            Reference::Restricted(h2_reference().stored()),
            vec![first, second],
            ccsd_engines(),
            CcsdOptions::default(),
            FciOptions::default(),
            1,
        )
        .unwrap();
        embedding.run().unwrap();
        assert_eq!(embedding.store().len(), 2);
    }

    #[test]
    fn self_consistent_coupling_waits_for_the_second_iteration() {
        let probe: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
        let engines = |probe: Arc<AtomicUsize>| EngineSet {
            ccsd: Some(Box::new(move || {
                Box::new(DenominatorCcsd::new().with_hook_probe(probe.clone()))
            })),
            uccsd: None,
        };
        let build = |iterations: usize, probe: Arc<AtomicUsize>| {
            let mut first = h2_fragment(0, SolverKind::Ccsd);
            first.coupled = vec![1];
            first.ccsd.sc_mode = Setting::Set(CouplingMode::OccupiedPair);
            let mut second = h2_fragment(1, SolverKind::Ccsd);
            second.coupled = vec![0];
            second.ccsd.sc_mode = Setting::Set(CouplingMode::OccupiedPair);
            Embedding::new(
                Reference::Restricted(h2_reference().stored()),
                vec![first, second],
                engines(probe),
                CcsdOptions::default(),
                FciOptions::default(),
                iterations,
            )
            .unwrap()
        };

        // one iteration: the gate keeps every hook out of the engines
        build(1, probe.clone()).run().unwrap();
        assert_eq!(probe.load(Ordering::SeqCst), 0);

        // two iterations: the second one couples and the hooks fire
        build(2, probe.clone()).run().unwrap();
        assert!(probe.load(Ordering::SeqCst) > 0);
    }
}
