//! Full-CI cluster solver. Builds the active-space effective Hamiltonian,
//! drives an [`FciEngine`] and condenses the CI vector into intermediately
//! normalized singles and doubles. An optional chemical potential on the
//! environment part of the cluster constrains the fragment-projected
//! electron number.

use crate::cluster::integrals::ClusterIntegrals;
use crate::cluster::ClusterSpace;
use crate::defaults;
use crate::engine::fci::{t1_addresses_signs, FciEngine, FciSolution};
use crate::engine::{EngineError, RestrictedAmplitudes};
use crate::reference::MeanField;
use crate::solver::options::{OptionsError, ResolvedFciOptions};
use crate::solver::{
    c_to_t, logging, Amplitudes, ClusterOrbitals, DensityMatrix, SolverError, SolverKind,
    WavefunctionResult,
};
use crate::utils::{zbrent, Timer};
use log::{debug, error, log_enabled, warn, Level};
use ndarray::prelude::*;

/// Mean-field potential generated by the active occupied orbitals.
pub fn active_potential(eris: &ClusterIntegrals) -> Array2<f64> {
    let nact: usize = eris.nact();
    let nocc: usize = eris.nocc;
    let mut v: Array2<f64> = Array2::zeros((nact, nact));
    for p in 0..nact {
        for q in 0..nact {
            let mut value: f64 = 0.0;
            for i in 0..nocc {
                value += 2.0 * eris.eri[[p, q, i, i]] - eris.eri[[p, i, i, q]];
            }
            v[[p, q]] = value;
        }
    }
    v
}

/// Effective one-body Hamiltonian of the active space: the cluster Fock
/// matrix stripped of the mean field of its own occupied orbitals, so that
/// the frozen-core and environment contributions stay in while nothing is
/// double counted by the CI treatment.
pub fn h_eff(eris: &ClusterIntegrals, v_ext: Option<&Array2<f64>>) -> Array2<f64> {
    let mut h: Array2<f64> = &eris.fock - &active_potential(eris);
    if let Some(v) = v_ext {
        h = h + v;
    }
    h
}

/// `-mu (1 - P_frag)`: shifts the environment orbitals of the cluster while
/// leaving the fragment part untouched.
pub fn external_potential(mu: f64, projector: &Array2<f64>) -> Array2<f64> {
    let mut v: Array2<f64> = projector.mapv(|p| mu * p);
    for d in 0..v.dim().0 {
        v[[d, d]] -= mu;
    }
    v
}

/// Energy of the reference determinant under `(h, eri)`, with singly
/// occupied orbitals in the alpha channel.
pub fn reference_energy(h: &Array2<f64>, eri: &Array4<f64>, nelec: (usize, usize)) -> f64 {
    let (na, nb) = nelec;
    let mut energy: f64 = 0.0;
    for i in 0..na {
        energy += h[[i, i]];
    }
    for i in 0..nb {
        energy += h[[i, i]];
    }
    for i in 0..na {
        for j in 0..na {
            energy += 0.5 * (eri[[i, i, j, j]] - eri[[i, j, j, i]]);
        }
    }
    for i in 0..nb {
        for j in 0..nb {
            energy += 0.5 * (eri[[i, i, j, j]] - eri[[i, j, j, i]]);
        }
    }
    for i in 0..na {
        for j in 0..nb {
            energy += eri[[i, i, j, j]];
        }
    }
    energy
}

/// Intermediately normalized singles and doubles of a closed-shell CI
/// vector, read off through the single-excitation address tables. The
/// reference weight divides each coefficient exactly once.
pub fn cisd_amplitudes(
    civec: &Array2<f64>,
    norb: usize,
    nocc: usize,
) -> Result<(f64, RestrictedAmplitudes), SolverError> {
    let nvir: usize = norb - nocc;
    let c0: f64 = civec[[0, 0]];
    if c0.abs() < defaults::FCI_C0_TOL {
        return Err(SolverError::DegenerateReference {
            c0,
            threshold: defaults::FCI_C0_TOL,
        });
    }

    let (addrs, signs) = t1_addresses_signs(norb, nocc);
    let mut amplitudes: RestrictedAmplitudes = RestrictedAmplitudes::zeros(nocc, nvir);
    for i in 0..nocc {
        for a in 0..nvir {
            amplitudes.t1[[i, a]] = signs[[i, a]] * civec[[0, addrs[[i, a]]]] / c0;
        }
    }
    for i in 0..nocc {
        for a in 0..nvir {
            for j in 0..nocc {
                for b in 0..nvir {
                    amplitudes.t2[[i, j, a, b]] = signs[[i, a]]
                        * signs[[j, b]]
                        * civec[[addrs[[i, a]], addrs[[j, b]]]]
                        / c0;
                }
            }
        }
    }
    Ok((c0, amplitudes))
}

pub struct FciSolver<'a> {
    fragment: usize,
    space: &'a ClusterSpace,
    opts: ResolvedFciOptions,
    engine: &'a mut dyn FciEngine,
    eris: Option<ClusterIntegrals>,
}

impl<'a> FciSolver<'a> {
    pub fn new(
        fragment: usize,
        space: &'a ClusterSpace,
        opts: ResolvedFciOptions,
        engine: &'a mut dyn FciEngine,
    ) -> Self {
        FciSolver {
            fragment,
            space,
            opts,
            engine,
            eris: None,
        }
    }

    /// Solve the cluster problem. `frag_projector` gives the fragment
    /// projector in the active MO basis; it is required when the options
    /// request the chemical-potential constraint.
    pub fn solve(
        &mut self,
        mf: &dyn MeanField,
        frag_projector: Option<&Array2<f64>>,
    ) -> Result<WavefunctionResult, SolverError> {
        let timer: Timer = Timer::start();
        if log_enabled!(Level::Info) {
            logging::print_solver_init(
                self.fragment,
                SolverKind::Fci,
                self.space.norb_active(),
                self.space.nelec_active_pair(),
            );
        }

        let space: &ClusterSpace = self.space;
        let eris: &ClusterIntegrals = self
            .eris
            .get_or_insert_with(|| ClusterIntegrals::build(mf, space));
        let norb: usize = eris.nact();
        let nelec: (usize, usize) = space.nelec_active_pair();
        let params = self.opts.params();
        let h0: Array2<f64> = h_eff(eris, None);

        let (solution, h_used, chempot): (FciSolution, Array2<f64>, Option<f64>) =
            match self.opts.nelec_target {
                None => {
                    let solution: FciSolution =
                        self.engine
                            .kernel(h0.view(), &eris.eri, norb, nelec, None, &params)?;
                    (solution, h0, None)
                }
                Some(target) => {
                    let projector: &Array2<f64> = match frag_projector {
                        Some(projector) => projector,
                        None => {
                            return Err(OptionsError::Required(
                                "the fragment projector for the chemical-potential constraint",
                            )
                            .into())
                        }
                    };
                    if projector.dim() != (norb, norb) {
                        return Err(EngineError::ShapeMismatch {
                            context: "fragment projector".to_owned(),
                            expected: vec![norb, norb],
                            found: projector.shape().to_vec(),
                        }
                        .into());
                    }
                    logging::print_chempot_init(defaults::CHEMPOT_WINDOW, target);

                    let engine: &mut dyn FciEngine = &mut *self.engine;
                    let mut failure: Option<SolverError> = None;
                    let mut objective = |mu: f64| -> f64 {
                        let h: Array2<f64> = &h0 + &external_potential(mu, projector);
                        let outcome =
                            engine.kernel(h.view(), &eris.eri, norb, nelec, None, &params);
                        let n_frag: Result<f64, SolverError> = outcome
                            .and_then(|sol| engine.make_rdm1(&sol.civec, norb, nelec))
                            .map(|dm| projector.dot(&dm).diag().sum())
                            .map_err(SolverError::from);
                        match n_frag {
                            Ok(n_frag) => {
                                logging::print_chempot_point(mu, n_frag);
                                n_frag - target
                            }
                            Err(err) => {
                                failure = Some(err);
                                0.0
                            }
                        }
                    };
                    let window: f64 = defaults::CHEMPOT_WINDOW;
                    let mut found = zbrent(
                        &mut objective,
                        -window,
                        window,
                        defaults::CHEMPOT_TOL,
                        defaults::CHEMPOT_MAX_ITER,
                    );
                    if found.is_err() {
                        warn!(
                            "Fragment {:3}: no sign change in [{:+.2}, {:+.2}], retrying with twice the window",
                            self.fragment, -window, window
                        );
                        found = zbrent(
                            &mut objective,
                            -2.0 * window,
                            2.0 * window,
                            defaults::CHEMPOT_TOL,
                            defaults::CHEMPOT_MAX_ITER,
                        );
                    }
                    if let Some(err) = failure {
                        return Err(err);
                    }
                    let mu: f64 = found?;

                    let h: Array2<f64> = &h0 + &external_potential(mu, projector);
                    let solution: FciSolution =
                        self.engine
                            .kernel(h.view(), &eris.eri, norb, nelec, None, &params)?;
                    if let Ok(dm) = self.engine.make_rdm1(&solution.civec, norb, nelec) {
                        let n_frag: f64 = projector.dot(&dm).diag().sum();
                        logging::print_chempot_result(mu, n_frag, target);
                    }
                    (solution, h, Some(mu))
                }
            };

        if !solution.converged {
            error!("Fragment {}: FCI did not converge", self.fragment);
        }
        let e_ref: f64 = reference_energy(&h_used, &eris.eri, nelec);
        let e_corr: f64 = solution.energy - e_ref;
        logging::print_solver_end(SolverKind::Fci, solution.converged, e_corr);

        let mut result: WavefunctionResult = WavefunctionResult::new(
            self.fragment,
            SolverKind::Fci,
            ClusterOrbitals::restricted(self.space),
        );
        result.converged = solution.converged;
        result.e_corr = e_corr;
        result.chempot = chempot;

        if nelec.0 == nelec.1 {
            let (c0, c) = cisd_amplitudes(&solution.civec, norb, nelec.0)?;
            result.c0 = Some(c0);
            result.t = Some(Amplitudes::Restricted(c_to_t(&c)));
            result.c = Some(Amplitudes::Restricted(c));
        } else {
            warn!("Amplitude extraction needs a closed-shell active space; skipping");
        }

        if self.opts.make_rdm1 {
            match self.engine.make_rdm1(&solution.civec, norb, nelec) {
                Ok(dm) => result.dm1 = Some(DensityMatrix::Restricted(dm)),
                Err(EngineError::Unsupported(what)) => {
                    warn!("The FCI engine does not support {}", what)
                }
                Err(err) => error!("Density matrix construction failed: {}", err),
            }
        }
        debug!("{}", timer);
        Ok(result)
    }
}
