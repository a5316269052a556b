//! Second-order Moller-Plesset amplitudes over a cluster active space.
//!
//! The denominators come from the diagonal of the cluster Fock matrix, so
//! the active orbitals are assumed canonical. Doubles as the initial-guess
//! source for the coupled-cluster solver.

use crate::cluster::integrals::{ClusterIntegrals, SpinClusterIntegrals};
use crate::cluster::ClusterSpace;
use crate::engine::{RestrictedAmplitudes, UnrestrictedAmplitudes};
use crate::reference::MeanField;
use crate::solver::{
    t_to_c, Amplitudes, ClusterOrbitals, SolverError, SolverKind, WavefunctionResult,
};
use log::info;
use ndarray::prelude::*;

/// First-order doubles and the closed-shell MP2 correlation energy.
pub fn kernel(eris: &ClusterIntegrals) -> (f64, RestrictedAmplitudes) {
    let nocc: usize = eris.nocc;
    let nvir: usize = eris.nvir();
    let eps: Array1<f64> = eris.orbital_energies();
    let ovov: ArrayView4<f64> = eris.ovov();

    let mut amplitudes: RestrictedAmplitudes = RestrictedAmplitudes::zeros(nocc, nvir);
    for i in 0..nocc {
        for j in 0..nocc {
            for a in 0..nvir {
                for b in 0..nvir {
                    let denom: f64 = eps[i] + eps[j] - eps[nocc + a] - eps[nocc + b];
                    amplitudes.t2[[i, j, a, b]] = ovov[[i, a, j, b]] / denom;
                }
            }
        }
    }

    let mut energy: f64 = 0.0;
    for i in 0..nocc {
        for j in 0..nocc {
            for a in 0..nvir {
                for b in 0..nvir {
                    energy += amplitudes.t2[[i, j, a, b]]
                        * (2.0 * ovov[[i, a, j, b]] - ovov[[i, b, j, a]]);
                }
            }
        }
    }
    (energy, amplitudes)
}

fn same_spin_block(
    t2: &mut Array4<f64>,
    eri: &Array4<f64>,
    eps: &Array1<f64>,
    nocc: usize,
    nvir: usize,
) -> f64 {
    let mut energy: f64 = 0.0;
    for i in 0..nocc {
        for j in 0..nocc {
            for a in 0..nvir {
                for b in 0..nvir {
                    let v: f64 =
                        eri[[i, nocc + a, j, nocc + b]] - eri[[i, nocc + b, j, nocc + a]];
                    let denom: f64 = eps[i] + eps[j] - eps[nocc + a] - eps[nocc + b];
                    let t: f64 = v / denom;
                    t2[[i, j, a, b]] = t;
                    energy += 0.25 * t * v;
                }
            }
        }
    }
    energy
}

/// Spin-unrestricted MP2. Same-spin doubles are antisymmetrized, the
/// opposite-spin block keeps plain chemist integrals.
pub fn ukernel(eris: &SpinClusterIntegrals) -> (f64, UnrestrictedAmplitudes) {
    let (nocc_a, nocc_b) = eris.nocc;
    let (nvir_a, nvir_b) = eris.nvir();
    let (eps_a, eps_b) = eris.orbital_energies();

    let mut amplitudes: UnrestrictedAmplitudes =
        UnrestrictedAmplitudes::zeros((nocc_a, nocc_b), (nvir_a, nvir_b));
    let mut energy: f64 = 0.0;
    energy += same_spin_block(&mut amplitudes.t2aa, &eris.eri_aa, &eps_a, nocc_a, nvir_a);
    energy += same_spin_block(&mut amplitudes.t2bb, &eris.eri_bb, &eps_b, nocc_b, nvir_b);
    for i in 0..nocc_a {
        for j in 0..nocc_b {
            for a in 0..nvir_a {
                for b in 0..nvir_b {
                    let v: f64 = eris.eri_ab[[i, nocc_a + a, j, nocc_b + b]];
                    let denom: f64 =
                        eps_a[i] + eps_b[j] - eps_a[nocc_a + a] - eps_b[nocc_b + b];
                    let t: f64 = v / denom;
                    amplitudes.t2ab[[i, j, a, b]] = t;
                    energy += t * v;
                }
            }
        }
    }
    (energy, amplitudes)
}

/// Non-iterative MP2 over a cluster space.
pub struct Mp2Solver<'a> {
    fragment: usize,
    space: &'a ClusterSpace,
    eris: Option<ClusterIntegrals>,
}

impl<'a> Mp2Solver<'a> {
    pub fn new(fragment: usize, space: &'a ClusterSpace) -> Self {
        Mp2Solver {
            fragment,
            space,
            eris: None,
        }
    }

    fn integrals(&mut self, mf: &dyn MeanField) -> &ClusterIntegrals {
        let space = self.space;
        self.eris
            .get_or_insert_with(|| ClusterIntegrals::build(mf, space))
    }

    pub fn solve(&mut self, mf: &dyn MeanField) -> Result<WavefunctionResult, SolverError> {
        let (e_corr, amplitudes) = kernel(self.integrals(mf));
        info!("Fragment {:3}: E(MP2 corr) = {:.10} Hartree", self.fragment, e_corr);

        let mut result: WavefunctionResult = WavefunctionResult::new(
            self.fragment,
            SolverKind::Mp2,
            ClusterOrbitals::restricted(self.space),
        );
        result.converged = true;
        result.e_corr = e_corr;
        result.c = Some(Amplitudes::Restricted(t_to_c(&amplitudes)));
        result.t = Some(Amplitudes::Restricted(amplitudes));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::tests::h2_reference;
    use approx::assert_relative_eq;

    #[test]
    fn h2_correlation_energy_matches_the_closed_form() {
        let mf = h2_reference();
        let space = mf.full_space();
        let eris = ClusterIntegrals::build(&mf, &space);
        let (e_corr, amps) = kernel(&eris);

        // One occupied and one virtual orbital: t = (ov|ov) / (2 eps_o - 2 eps_v),
        // e = t * (2 - 1) * (ov|ov).
        let v: f64 = eris.ovov()[[0, 0, 0, 0]];
        let eps = eris.orbital_energies();
        let t: f64 = v / (2.0 * eps[0] - 2.0 * eps[1]);
        assert_relative_eq!(amps.t2[[0, 0, 0, 0]], t, epsilon = 1e-12);
        assert_relative_eq!(e_corr, t * v, epsilon = 1e-12);
        assert!(e_corr < 0.0);
    }

    #[test]
    fn unrestricted_energy_matches_the_restricted_one_for_a_closed_shell() {
        use crate::utils::tests::h2_spin_reference;

        let mf = h2_reference();
        let space = mf.full_space();
        let (e_restricted, _) = kernel(&ClusterIntegrals::build(&mf, &space));

        let umf = h2_spin_reference();
        let uspace = umf.full_space();
        let (e_unrestricted, amps) = ukernel(&SpinClusterIntegrals::build(&umf, &uspace));

        assert_relative_eq!(e_unrestricted, e_restricted, epsilon = 1e-12);
        // One electron per spin: the same-spin blocks carry no correlation.
        assert_relative_eq!(amps.t2aa[[0, 0, 0, 0]], 0.0, epsilon = 1e-14);
        assert_relative_eq!(amps.t2bb[[0, 0, 0, 0]], 0.0, epsilon = 1e-14);
    }

    #[test]
    fn solver_fills_both_normalizations() {
        let mf = h2_reference();
        let space = mf.full_space();
        let mut solver = Mp2Solver::new(0, &space);
        let result = solver.solve(&mf).unwrap();

        assert!(result.converged);
        assert_eq!(result.kind, SolverKind::Mp2);
        let t = result.restricted_t().unwrap();
        let c = result.c.as_ref().unwrap().as_restricted().unwrap();
        // No singles at this order, so both normalizations coincide.
        assert_relative_eq!(t.t2, c.t2, epsilon = 1e-14);
        assert_relative_eq!(t.t1.sum(), 0.0, epsilon = 1e-14);
    }
}
