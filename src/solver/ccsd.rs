//! Spin-restricted CCSD over a cluster active space.
//!
//! The solver owns the per-cluster workflow around an exchangeable engine:
//! integral preparation, the MP2 start guess, iteration hooks for embedding
//! corrections, and the optional post-kernel steps (diagnostics, lambda
//! equations, density matrix, ionization and attachment roots). Ground-state
//! failures abort the solve; failures in optional steps only cost the
//! corresponding result entry.

use crate::cluster::integrals::ClusterIntegrals;
use crate::cluster::ClusterSpace;
use crate::engine::ccsd::{CcsdEngine, CcsdSolution, LambdaSolution};
use crate::engine::{EngineError, RestrictedAmplitudes, RestrictedHook};
use crate::reference::MeanField;
use crate::solver::options::ResolvedCcsdOptions;
use crate::solver::{
    checked_roots, coupling, diagnostics, logging, mp2, t_to_c, Amplitudes, ClusterOrbitals,
    DensityMatrix, SolverError, SolverKind, WavefunctionResult,
};
use crate::utils::Timer;
use log::{debug, error, info, log_enabled, warn, Level};

pub struct RccsdSolver<'a> {
    fragment: usize,
    space: &'a ClusterSpace,
    opts: ResolvedCcsdOptions,
    engine: &'a mut dyn CcsdEngine,
    eris: Option<ClusterIntegrals>,
}

impl<'a> RccsdSolver<'a> {
    pub fn new(
        fragment: usize,
        space: &'a ClusterSpace,
        opts: ResolvedCcsdOptions,
        engine: &'a mut dyn CcsdEngine,
    ) -> Self {
        RccsdSolver {
            fragment,
            space,
            opts,
            engine,
            eris: None,
        }
    }

    pub fn options(&self) -> &ResolvedCcsdOptions {
        &self.opts
    }

    /// Solve the cluster problem. `guess` overrides the MP2 start amplitudes,
    /// `hook` is applied by the engine after every amplitude update. A
    /// tailoring window in the options takes precedence over any passed hook.
    pub fn solve(
        &mut self,
        mf: &dyn MeanField,
        guess: Option<RestrictedAmplitudes>,
        hook: Option<RestrictedHook>,
    ) -> Result<WavefunctionResult, SolverError> {
        let timer: Timer = Timer::start();
        if log_enabled!(Level::Info) {
            logging::print_solver_init(
                self.fragment,
                SolverKind::Ccsd,
                self.space.norb_active(),
                self.space.nelec_active_pair(),
            );
        }

        let space: &ClusterSpace = self.space;
        let eris: &ClusterIntegrals = self
            .eris
            .get_or_insert_with(|| ClusterIntegrals::build(mf, space));

        let guess: Option<RestrictedAmplitudes> = match guess {
            Some(amplitudes) => Some(amplitudes),
            None if self.opts.mp2_guess => {
                let (e_mp2, amplitudes) = mp2::kernel(eris);
                info!("MP2 initial guess: E(corr) = {:.10} Hartree", e_mp2);
                Some(amplitudes)
            }
            None => None,
        };

        let hook: Option<RestrictedHook> = match self.opts.tailor_cas {
            Some(cas) => Some(coupling::make_cas_tailor_hook(eris, cas)?),
            None => hook,
        };

        let solution: CcsdSolution =
            self.engine
                .kernel(eris, &self.opts.params(), guess.as_ref(), hook)?;
        logging::print_solver_end(SolverKind::Ccsd, solution.converged, solution.e_corr);
        if !solution.converged {
            error!("Fragment {}: CCSD did not converge", self.fragment);
        }

        let mut result: WavefunctionResult = WavefunctionResult::new(
            self.fragment,
            SolverKind::Ccsd,
            ClusterOrbitals::restricted(self.space),
        );
        result.converged = solution.converged;
        result.e_corr = solution.e_corr;

        if self.opts.t_diagnostic {
            match diagnostics::compute(&solution.amplitudes) {
                Ok(diag) => {
                    logging::print_diagnostics(&diag);
                    result.diagnostics = Some(diag);
                }
                Err(err) => warn!("{}", err),
            }
        }

        let mut lambdas: Option<RestrictedAmplitudes> = None;
        if self.opts.solve_lambda {
            let lambda_timer: Timer = Timer::start();
            match self.engine.solve_lambda(eris, &solution.amplitudes) {
                Ok(LambdaSolution { converged, lambdas: lam }) => {
                    if !converged {
                        error!("Fragment {}: lambda equations did not converge", self.fragment);
                    }
                    result.converged = result.converged && converged;
                    result.lambda_converged = Some(converged);
                    lambdas = Some(lam);
                }
                Err(EngineError::Unsupported(what)) => {
                    warn!("The CCSD engine does not support {}", what)
                }
                Err(err) => error!("Lambda equations failed: {}", err),
            }
            debug!("lambda equations took {:.3} s", lambda_timer.elapsed_secs());
        }

        if self.opts.make_rdm1 {
            if lambdas.is_none() {
                debug!("No lambda amplitudes; the density matrix uses the engine fallback");
            }
            match self.engine.make_rdm1(eris, &solution.amplitudes, lambdas.as_ref()) {
                Ok(dm1) => result.dm1 = Some(DensityMatrix::Restricted(dm1)),
                Err(EngineError::Unsupported(what)) => {
                    warn!("The CCSD engine does not support {}", what)
                }
                Err(err) => error!("Density matrix construction failed: {}", err),
            }
        }

        if let Some(channels) = self.opts.eom {
            let nroots: usize = self.opts.eom_nroots;
            if channels.includes_ip() {
                result.ip =
                    checked_roots(self.engine.ipccsd(eris, &solution.amplitudes, nroots), "IP-EOM-CCSD");
            }
            if channels.includes_ea() {
                result.ea =
                    checked_roots(self.engine.eaccsd(eris, &solution.amplitudes, nroots), "EA-EOM-CCSD");
            }
        }

        result.c = Some(Amplitudes::Restricted(t_to_c(&solution.amplitudes)));
        result.lambdas = lambdas.map(Amplitudes::Restricted);
        result.t = Some(Amplitudes::Restricted(solution.amplitudes));
        debug!("{}", timer);
        Ok(result)
    }
}
