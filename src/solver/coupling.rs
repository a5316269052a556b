//! Cross-cluster amplitude corrections, injected into a CCSD engine as
//! per-iteration hooks.
//!
//! All corrections share one core: rotate a sibling cluster's amplitudes
//! into the consuming cluster's occupied/virtual bases through AO-overlap
//! projections, form the difference against the current estimate and add
//! back only the part that the sibling's own fragment space vouches for.
//! The projected patches are exact for mutually orthogonal fragment spaces
//! and an approximation otherwise.

use crate::cluster::integrals::ClusterIntegrals;
use crate::engine::{
    check_shape, DirectFci, EngineError, FciEngine, RestrictedAmplitudes, RestrictedHook,
};
use crate::solver::fci::{cisd_amplitudes, h_eff};
use crate::solver::options::{CouplingMode, FciOptions};
use crate::solver::{c_to_t, ClusterOrbitals, SolverError, WavefunctionResult};
use log::info;
use ndarray::prelude::*;

fn restricted_blocks(orbitals: &ClusterOrbitals) -> Result<(&Array2<f64>, &Array2<f64>), EngineError> {
    match orbitals {
        ClusterOrbitals::Restricted { c_occ, c_vir } => Ok((c_occ, c_vir)),
        ClusterOrbitals::Unrestricted { .. } => Err(EngineError::Unsupported(
            "coupling between spin-unrestricted clusters",
        )),
    }
}

/// Contract a matrix into the leading axis of a doubles-like tensor:
/// `out[x, ...] = sum_X m[x, X] t[X, ...]`.
fn apply_leading(t2: &Array4<f64>, m: ArrayView2<f64>) -> Array4<f64> {
    let (n0, n1, n2, n3) = t2.dim();
    let rows: usize = m.dim().0;
    let flat: ArrayView2<f64> = t2.view().into_shape((n0, n1 * n2 * n3)).unwrap();
    m.dot(&flat).into_shape((rows, n1, n2, n3)).unwrap()
}

/// Rotate singles between cluster bases: `out = r_occ^T t1 r_vir`.
pub fn transform_t1(t1: &Array2<f64>, r_occ: &Array2<f64>, r_vir: &Array2<f64>) -> Array2<f64> {
    r_occ.t().dot(&t1.dot(r_vir))
}

/// Rotate doubles between cluster bases, one index at a time.
pub fn transform_t2(t2: &Array4<f64>, r_occ: &Array2<f64>, r_vir: &Array2<f64>) -> Array4<f64> {
    let mut out: Array4<f64> = t2.clone();
    for r in [r_occ, r_occ, r_vir, r_vir] {
        out = apply_leading(&out, r.t());
        out = out
            .permuted_axes([1, 2, 3, 0])
            .as_standard_layout()
            .to_owned();
    }
    out
}

/// `out[i,j,a,b] = sum_IJ p_first[i,I] p_second[j,J] t[I,J,a,b]`.
fn project_occupied_pair(
    t2: &Array4<f64>,
    p_first: &Array2<f64>,
    p_second: &Array2<f64>,
) -> Array4<f64> {
    let step: Array4<f64> = apply_leading(t2, p_first.view())
        .permuted_axes([1, 0, 2, 3])
        .as_standard_layout()
        .to_owned();
    apply_leading(&step, p_second.view())
        .permuted_axes([1, 0, 2, 3])
        .as_standard_layout()
        .to_owned()
}

/// `(t[i,j,a,b] + t[j,i,b,a]) / 2`.
fn symmetrize_doubles(t2: &Array4<f64>) -> Array4<f64> {
    let mut out: Array4<f64> = t2 + &t2.view().permuted_axes([1, 0, 3, 2]);
    out.mapv_inplace(|x| 0.5 * x);
    out
}

/// A sibling cluster's converged amplitudes, rotated into the consuming
/// cluster's basis, together with the sibling's fragment projector expressed
/// in the consuming occupied space.
#[derive(Debug, Clone)]
pub struct SiblingAmplitudes {
    pub fragment: usize,
    pub t1: Array2<f64>,
    pub t2: Array4<f64>,
    pub projector: Array2<f64>,
}

impl SiblingAmplitudes {
    /// Rotate `result`'s amplitudes into `target`'s basis. `projector` is the
    /// sibling's fragment projector in the target occupied basis. Fails when
    /// the sibling has not published restricted amplitudes, or when the
    /// orbital blocks do not match the AO overlap.
    pub fn prepare(
        result: &WavefunctionResult,
        target: &ClusterOrbitals,
        ovlp: ArrayView2<f64>,
        projector: Array2<f64>,
    ) -> Result<Self, SolverError> {
        let t = result
            .restricted_t()
            .ok_or(EngineError::MissingResult(result.fragment))?;
        let (c_occ_x, c_vir_x) = restricted_blocks(&result.orbitals)?;
        let (c_occ_s, c_vir_s) = restricted_blocks(target)?;

        let nao: usize = ovlp.dim().0;
        check_shape(
            "AO overlap",
            &[nao, nao],
            &[ovlp.dim().0, ovlp.dim().1],
        )?;
        check_shape(
            "sibling occupied block against the AO overlap",
            &[nao],
            &[c_occ_x.dim().0],
        )?;
        check_shape(
            "consuming occupied block against the AO overlap",
            &[nao],
            &[c_occ_s.dim().0],
        )?;

        let r_occ: Array2<f64> = c_occ_x.t().dot(&ovlp.dot(c_occ_s));
        let r_vir: Array2<f64> = c_vir_x.t().dot(&ovlp.dot(c_vir_s));
        Ok(SiblingAmplitudes {
            fragment: result.fragment,
            t1: transform_t1(&t.t1, &r_occ, &r_vir),
            t2: transform_t2(&t.t2, &r_occ, &r_vir),
            projector,
        })
    }

    fn validate_against(&self, amplitudes: &RestrictedAmplitudes) -> Result<(), EngineError> {
        check_shape(
            "sibling t1 in the consuming basis",
            amplitudes.t1.shape(),
            self.t1.shape(),
        )?;
        check_shape(
            "sibling t2 in the consuming basis",
            amplitudes.t2.shape(),
            self.t2.shape(),
        )?;
        let nocc: usize = amplitudes.nocc();
        check_shape(
            "sibling fragment projector",
            &[nocc, nocc],
            self.projector.shape(),
        )?;
        Ok(())
    }
}

/// Tailoring: inside each sibling's own occupied space the sibling's
/// converged amplitudes override the local estimate.
pub fn make_tailor_hook(sources: Vec<SiblingAmplitudes>) -> RestrictedHook<'static> {
    Box::new(move |amplitudes| {
        let mut t1: Array2<f64> = amplitudes.t1.clone();
        let mut t2: Array4<f64> = amplitudes.t2.clone();
        for source in &sources {
            source.validate_against(amplitudes)?;
            let dt1: Array2<f64> = &source.t1 - &amplitudes.t1;
            let dt2: Array4<f64> = &source.t2 - &amplitudes.t2;
            t1 = t1 + source.projector.dot(&dt1);
            t2 = t2 + project_occupied_pair(&dt2, &source.projector, &source.projector);
        }
        Ok(RestrictedAmplitudes { t1, t2 })
    })
}

/// Self-consistent cross-fragment coupling. The mode selects which occupied
/// indices of the doubles correction get projected; `own_projector` is the
/// consuming fragment's projector, used by the cross-term mode.
pub fn make_cross_fragment_hook(
    sources: Vec<SiblingAmplitudes>,
    own_projector: Array2<f64>,
    mode: CouplingMode,
) -> RestrictedHook<'static> {
    Box::new(move |amplitudes| {
        let mut t1: Array2<f64> = amplitudes.t1.clone();
        let mut t2: Array4<f64> = amplitudes.t2.clone();
        for source in &sources {
            source.validate_against(amplitudes)?;
            let dt1: Array2<f64> = &source.t1 - &amplitudes.t1;
            let dt2: Array4<f64> = &source.t2 - &amplitudes.t2;
            t1 = t1 + source.projector.dot(&dt1);
            let patch: Array4<f64> = match mode {
                CouplingMode::OccupiedPair => {
                    project_occupied_pair(&dt2, &source.projector, &source.projector)
                }
                CouplingMode::OccupiedPairCross => {
                    let mut patch =
                        project_occupied_pair(&dt2, &source.projector, &source.projector);
                    patch = patch + project_occupied_pair(&dt2, &source.projector, &own_projector);
                    patch = patch + project_occupied_pair(&dt2, &own_projector, &source.projector);
                    patch
                }
                CouplingMode::FirstOccupied => {
                    let projected: Array4<f64> = apply_leading(&dt2, source.projector.view());
                    symmetrize_doubles(&projected)
                }
            };
            t2 = t2 + patch;
        }
        Ok(RestrictedAmplitudes { t1, t2 })
    })
}

/// Tailored CCSD: solve the CAS window `(occupied, virtual)` around the
/// Fermi level exactly, then pin the amplitudes of that window to the CI
/// result on every iteration.
pub fn make_cas_tailor_hook(
    eris: &ClusterIntegrals,
    cas: (usize, usize),
) -> Result<RestrictedHook<'static>, SolverError> {
    let (nocc_cas, nvir_cas) = cas;
    let nocc: usize = eris.nocc;
    let nvir: usize = eris.nvir();
    if nocc_cas == 0 || nvir_cas == 0 || nocc_cas > nocc || nvir_cas > nvir {
        return Err(EngineError::ShapeMismatch {
            context: "CAS window within the cluster (occupied, virtual)".to_owned(),
            expected: vec![nocc, nvir],
            found: vec![nocc_cas, nvir_cas],
        }
        .into());
    }
    let lo: usize = nocc - nocc_cas;
    let hi: usize = nocc + nvir_cas;
    let norb_cas: usize = nocc_cas + nvir_cas;

    let cas_ints = ClusterIntegrals {
        fock: eris.fock.slice(s![lo..hi, lo..hi]).to_owned(),
        eri: eris.eri.slice(s![lo..hi, lo..hi, lo..hi, lo..hi]).to_owned(),
        nocc: nocc_cas,
    };
    let h_cas: Array2<f64> = h_eff(&cas_ints, None);
    let params = FciOptions::default().resolve()?.params();
    let mut engine = DirectFci::default();
    let solution = engine.kernel(
        h_cas.view(),
        &cas_ints.eri,
        norb_cas,
        (nocc_cas, nocc_cas),
        None,
        &params,
    )?;
    info!(
        "CAS({}, {}) reference solve: E = {:.10} Hartree",
        nocc_cas, nvir_cas, solution.energy
    );
    let (_c0, c) = cisd_amplitudes(&solution.civec, norb_cas, nocc_cas)?;
    let target: RestrictedAmplitudes = c_to_t(&c);

    Ok(Box::new(move |amplitudes| {
        check_shape(
            "t1 entering the tailoring window",
            &[nocc, nvir],
            amplitudes.t1.shape(),
        )?;
        let mut out: RestrictedAmplitudes = amplitudes.clone();
        for i in 0..nocc_cas {
            for a in 0..nvir_cas {
                out.t1[[lo + i, a]] = target.t1[[i, a]];
            }
        }
        for i in 0..nocc_cas {
            for j in 0..nocc_cas {
                for a in 0..nvir_cas {
                    for b in 0..nvir_cas {
                        out.t2[[lo + i, lo + j, a, b]] = target.t2[[i, j, a, b]];
                    }
                }
            }
        }
        Ok(out)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::integrals::ClusterIntegrals;
    use crate::solver::SolverKind;
    use crate::utils::tests::h2_reference;
    use approx::assert_relative_eq;

    fn doubles_with(value: f64, nocc: usize, nvir: usize) -> Array4<f64> {
        Array4::from_elem((nocc, nocc, nvir, nvir), value)
    }

    #[test]
    fn identity_rotation_keeps_amplitudes() {
        let t1: Array2<f64> = array![[0.1, -0.2], [0.3, 0.05]];
        let mut t2: Array4<f64> = Array4::zeros((2, 2, 2, 2));
        t2[[0, 1, 1, 0]] = -0.4;
        let eye: Array2<f64> = Array2::eye(2);
        assert_relative_eq!(transform_t1(&t1, &eye, &eye), t1, epsilon = 1e-14);
        assert_relative_eq!(transform_t2(&t2, &eye, &eye), t2, epsilon = 1e-14);
    }

    #[test]
    fn rotation_contracts_every_index() {
        // Two occupied and one virtual source orbitals mapping onto a single
        // occupied/virtual pair.
        let r_occ: Array2<f64> = array![[0.6], [0.8]];
        let r_vir: Array2<f64> = array![[0.5]];
        let t1: Array2<f64> = array![[1.0], [2.0]];
        let out = transform_t1(&t1, &r_occ, &r_vir);
        assert_relative_eq!(out[[0, 0]], (0.6 + 1.6) * 0.5, epsilon = 1e-14);

        let mut t2: Array4<f64> = Array4::zeros((2, 2, 1, 1));
        t2[[0, 1, 0, 0]] = 1.0;
        let out = transform_t2(&t2, &r_occ, &r_vir);
        // 0.6 * 0.8 from the occupied pair, 0.25 from the virtuals.
        assert_relative_eq!(out[[0, 0, 0, 0]], 0.6 * 0.8 * 0.25, epsilon = 1e-14);
    }

    #[test]
    fn successive_rotations_compose() {
        use ndarray_rand::rand_distr::Uniform;
        use ndarray_rand::RandomExt;
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let mut rng = StdRng::seed_from_u64(27);
        let dist = Uniform::new(-1.0, 1.0);
        let t2: Array4<f64> = Array4::random_using((2, 2, 3, 3), dist, &mut rng);
        let r1_occ: Array2<f64> = Array2::random_using((2, 2), dist, &mut rng);
        let r1_vir: Array2<f64> = Array2::random_using((3, 3), dist, &mut rng);
        let r2_occ: Array2<f64> = Array2::random_using((2, 2), dist, &mut rng);
        let r2_vir: Array2<f64> = Array2::random_using((3, 3), dist, &mut rng);

        let stepwise = transform_t2(&transform_t2(&t2, &r1_occ, &r1_vir), &r2_occ, &r2_vir);
        let combined = transform_t2(&t2, &r1_occ.dot(&r2_occ), &r1_vir.dot(&r2_vir));
        assert_relative_eq!(stepwise, combined, epsilon = 1e-12);
    }

    #[test]
    fn tailoring_replaces_only_the_owned_occupied_block() {
        let current = RestrictedAmplitudes {
            t1: Array2::zeros((2, 1)),
            t2: Array4::zeros((2, 2, 1, 1)),
        };
        let source = SiblingAmplitudes {
            fragment: 1,
            t1: array![[0.5], [0.7]],
            t2: doubles_with(1.0, 2, 1),
            projector: array![[1.0, 0.0], [0.0, 0.0]],
        };
        let mut hook = make_tailor_hook(vec![source]);
        let out = hook(&current).unwrap();

        assert_relative_eq!(out.t1[[0, 0]], 0.5, epsilon = 1e-14);
        assert_relative_eq!(out.t1[[1, 0]], 0.0, epsilon = 1e-14);
        // Only the (0,0) occupied pair lies inside the sibling's space.
        assert_relative_eq!(out.t2[[0, 0, 0, 0]], 1.0, epsilon = 1e-14);
        assert_relative_eq!(out.t2[[0, 1, 0, 0]], 0.0, epsilon = 1e-14);
        assert_relative_eq!(out.t2[[1, 0, 0, 0]], 0.0, epsilon = 1e-14);
        assert_relative_eq!(out.t2[[1, 1, 0, 0]], 0.0, epsilon = 1e-14);
    }

    #[test]
    fn cross_mode_adds_the_symmetric_mixed_blocks() {
        let current = RestrictedAmplitudes {
            t1: Array2::zeros((2, 1)),
            t2: Array4::zeros((2, 2, 1, 1)),
        };
        let source = SiblingAmplitudes {
            fragment: 1,
            t1: Array2::zeros((2, 1)),
            t2: doubles_with(1.0, 2, 1),
            projector: array![[1.0, 0.0], [0.0, 0.0]],
        };
        let own: Array2<f64> = array![[0.0, 0.0], [0.0, 1.0]];
        let mut hook =
            make_cross_fragment_hook(vec![source], own, CouplingMode::OccupiedPairCross);
        let out = hook(&current).unwrap();

        assert_relative_eq!(out.t2[[0, 0, 0, 0]], 1.0, epsilon = 1e-14);
        assert_relative_eq!(out.t2[[0, 1, 0, 0]], 1.0, epsilon = 1e-14);
        assert_relative_eq!(out.t2[[1, 0, 0, 0]], 1.0, epsilon = 1e-14);
        // Neither projector owns the (1,1) pair.
        assert_relative_eq!(out.t2[[1, 1, 0, 0]], 0.0, epsilon = 1e-14);
    }

    #[test]
    fn first_occupied_mode_projects_and_symmetrizes() {
        let current = RestrictedAmplitudes {
            t1: Array2::zeros((2, 1)),
            t2: Array4::zeros((2, 2, 1, 1)),
        };
        let mut t2 = Array4::zeros((2, 2, 1, 1));
        t2[[0, 1, 0, 0]] = 1.0;
        let source = SiblingAmplitudes {
            fragment: 1,
            t1: Array2::zeros((2, 1)),
            t2,
            projector: array![[1.0, 0.0], [0.0, 0.0]],
        };
        let mut hook = make_cross_fragment_hook(
            vec![source],
            Array2::zeros((2, 2)),
            CouplingMode::FirstOccupied,
        );
        let out = hook(&current).unwrap();

        // Half of the projected element plus half of its transpose image.
        assert_relative_eq!(out.t2[[0, 1, 0, 0]], 0.5, epsilon = 1e-14);
        assert_relative_eq!(out.t2[[1, 0, 0, 0]], 0.5, epsilon = 1e-14);
        assert_relative_eq!(out.t2[[0, 0, 0, 0]], 0.0, epsilon = 1e-14);
    }

    #[test]
    fn mis_shaped_sibling_amplitudes_fail_before_any_contraction() {
        let current = RestrictedAmplitudes {
            t1: Array2::zeros((2, 1)),
            t2: Array4::zeros((2, 2, 1, 1)),
        };
        let source = SiblingAmplitudes {
            fragment: 3,
            t1: Array2::zeros((3, 1)),
            t2: Array4::zeros((3, 3, 1, 1)),
            projector: Array2::eye(2),
        };
        let mut hook = make_tailor_hook(vec![source]);
        let err = hook(&current).unwrap_err();
        assert!(matches!(err, EngineError::ShapeMismatch { .. }));
    }

    #[test]
    fn sibling_without_amplitudes_is_rejected_at_preparation() {
        let orbitals = ClusterOrbitals::Restricted {
            c_occ: Array2::eye(2),
            c_vir: Array2::eye(2),
        };
        let empty = WavefunctionResult::new(4, SolverKind::Ccsd, orbitals.clone());
        let ovlp: Array2<f64> = Array2::eye(2);
        let err =
            SiblingAmplitudes::prepare(&empty, &orbitals, ovlp.view(), Array2::eye(1)).unwrap_err();
        assert_eq!(err, SolverError::Engine(EngineError::MissingResult(4)));
    }

    #[test]
    fn cas_window_covering_the_cluster_pins_all_amplitudes() {
        let mf = h2_reference();
        let space = mf.full_space();
        let eris = ClusterIntegrals::build(&mf, &space);
        let mut hook = make_cas_tailor_hook(&eris, (1, 1)).unwrap();

        let zeros = RestrictedAmplitudes::zeros(1, 1);
        let out = hook(&zeros).unwrap();
        // The doubly excited determinant mixes in; singles vanish by symmetry.
        assert!(out.t2[[0, 0, 0, 0]].abs() > 1e-3);
        assert!(out.t2[[0, 0, 0, 0]] < 0.0);
        assert_relative_eq!(out.t1[[0, 0]], 0.0, epsilon = 1e-10);

        // Pinned values survive a nonzero estimate unchanged.
        let mut seeded = RestrictedAmplitudes::zeros(1, 1);
        seeded.t2[[0, 0, 0, 0]] = 0.123;
        let again = hook(&seeded).unwrap();
        assert_relative_eq!(again.t2[[0, 0, 0, 0]], out.t2[[0, 0, 0, 0]], epsilon = 1e-14);
    }

    #[test]
    fn oversized_cas_window_is_rejected() {
        let mf = h2_reference();
        let space = mf.full_space();
        let eris = ClusterIntegrals::build(&mf, &space);
        assert!(make_cas_tailor_hook(&eris, (2, 1)).is_err());
        assert!(make_cas_tailor_hook(&eris, (0, 1)).is_err());
    }
}
