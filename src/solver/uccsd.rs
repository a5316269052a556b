//! Spin-unrestricted CCSD. Drives a [`UccsdEngine`] through the same
//! workflow as the restricted solver; the cross-fragment coupling and
//! tailoring machinery is restricted-only and is rejected up front.

use crate::cluster::integrals::SpinClusterIntegrals;
use crate::cluster::SpinClusterSpace;
use crate::engine::ccsd::{UccsdEngine, UccsdSolution, ULambdaSolution};
use crate::engine::{EngineError, UnrestrictedAmplitudes, UnrestrictedHook};
use crate::reference::SpinMeanField;
use crate::solver::options::{OptionsError, ResolvedCcsdOptions};
use crate::solver::{
    checked_roots, diagnostics, logging, mp2, u_t_to_c, Amplitudes, ClusterOrbitals,
    DensityMatrix, SolverError, SolverKind, WavefunctionResult,
};
use crate::utils::Timer;
use log::{debug, error, info, log_enabled, warn, Level};

pub struct UccsdSolver<'a> {
    fragment: usize,
    space: &'a SpinClusterSpace,
    opts: ResolvedCcsdOptions,
    engine: &'a mut dyn UccsdEngine,
    eris: Option<SpinClusterIntegrals>,
}

impl<'a> UccsdSolver<'a> {
    pub fn new(
        fragment: usize,
        space: &'a SpinClusterSpace,
        opts: ResolvedCcsdOptions,
        engine: &'a mut dyn UccsdEngine,
    ) -> Self {
        UccsdSolver {
            fragment,
            space,
            opts,
            engine,
            eris: None,
        }
    }

    pub fn solve(
        &mut self,
        mf: &dyn SpinMeanField,
        guess: Option<UnrestrictedAmplitudes>,
        hook: Option<UnrestrictedHook>,
    ) -> Result<WavefunctionResult, SolverError> {
        if self.opts.sc_mode.is_some() {
            return Err(OptionsError::Unsupported {
                option: "sc_mode",
                solver: "UCCSD",
            }
            .into());
        }
        if self.opts.tailor_cas.is_some() {
            return Err(OptionsError::Unsupported {
                option: "tailor_cas",
                solver: "UCCSD",
            }
            .into());
        }

        let timer: Timer = Timer::start();
        if log_enabled!(Level::Info) {
            logging::print_solver_init(
                self.fragment,
                SolverKind::Uccsd,
                self.space.alpha.norb_active(),
                self.space.nocc_active(),
            );
        }

        let space: &SpinClusterSpace = self.space;
        let eris: &SpinClusterIntegrals = self
            .eris
            .get_or_insert_with(|| SpinClusterIntegrals::build(mf, space));

        let guess: Option<UnrestrictedAmplitudes> = match guess {
            Some(amplitudes) => Some(amplitudes),
            None if self.opts.mp2_guess => {
                let (e_mp2, amplitudes) = mp2::ukernel(eris);
                info!("MP2 initial guess: E(corr) = {:.10} Hartree", e_mp2);
                Some(amplitudes)
            }
            None => None,
        };

        let solution: UccsdSolution =
            self.engine
                .kernel(eris, &self.opts.params(), guess.as_ref(), hook)?;
        logging::print_solver_end(SolverKind::Uccsd, solution.converged, solution.e_corr);
        if !solution.converged {
            error!("Fragment {}: UCCSD did not converge", self.fragment);
        }

        let mut result: WavefunctionResult = WavefunctionResult::new(
            self.fragment,
            SolverKind::Uccsd,
            ClusterOrbitals::unrestricted(self.space),
        );
        result.converged = solution.converged;
        result.e_corr = solution.e_corr;

        if self.opts.t_diagnostic {
            // The D1/D2 thresholds are calibrated for closed shells; report
            // the alpha channel for orientation only.
            let t1 = diagnostics::t1_diagnostic(solution.amplitudes.t1a.view());
            info!("T1 diagnostic (alpha channel): {:>10.5}", t1);
        }

        let mut lambdas: Option<UnrestrictedAmplitudes> = None;
        if self.opts.solve_lambda {
            let lambda_timer: Timer = Timer::start();
            match self.engine.solve_lambda(eris, &solution.amplitudes) {
                Ok(ULambdaSolution { converged, lambdas: lam }) => {
                    if !converged {
                        error!("Fragment {}: lambda equations did not converge", self.fragment);
                    }
                    result.converged = result.converged && converged;
                    result.lambda_converged = Some(converged);
                    lambdas = Some(lam);
                }
                Err(EngineError::Unsupported(what)) => {
                    warn!("The UCCSD engine does not support {}", what)
                }
                Err(err) => error!("Lambda equations failed: {}", err),
            }
            debug!("lambda equations took {:.3} s", lambda_timer.elapsed_secs());
        }

        if self.opts.make_rdm1 {
            match self.engine.make_rdm1(eris, &solution.amplitudes, lambdas.as_ref()) {
                Ok((dm_a, dm_b)) => result.dm1 = Some(DensityMatrix::Unrestricted(dm_a, dm_b)),
                Err(EngineError::Unsupported(what)) => {
                    warn!("The UCCSD engine does not support {}", what)
                }
                Err(err) => error!("Density matrix construction failed: {}", err),
            }
        }

        if let Some(channels) = self.opts.eom {
            let nroots: usize = self.opts.eom_nroots;
            if channels.includes_ip() {
                result.ip = checked_roots(
                    self.engine.ipccsd(eris, &solution.amplitudes, nroots),
                    "IP-EOM-UCCSD",
                );
            }
            if channels.includes_ea() {
                result.ea = checked_roots(
                    self.engine.eaccsd(eris, &solution.amplitudes, nroots),
                    "EA-EOM-UCCSD",
                );
            }
        }

        result.c = Some(Amplitudes::Unrestricted(u_t_to_c(&solution.amplitudes)));
        result.lambdas = lambdas.map(Amplitudes::Unrestricted);
        result.t = Some(Amplitudes::Unrestricted(solution.amplitudes));
        debug!("{}", timer);
        Ok(result)
    }
}
