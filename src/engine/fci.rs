//! Determinant-basis full CI for small active spaces. Determinants are bit
//! strings over active orbitals (bit p set = orbital p occupied), kept in
//! ascending binary order so that the position of a string is its address.
//! The reference determinant (lowest `nelec` orbitals occupied) therefore
//! always sits at address zero.

use crate::engine::EngineError;
use hashbrown::HashMap;
use itertools::Itertools;
use ndarray::prelude::*;
use ndarray_linalg::{Eigh, UPLO};

/// Iteration parameters of an FCI engine. A direct diagonalization ignores
/// the cycle cap and the linear-dependence threshold; iterative engines use
/// all three.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FciParams {
    pub max_cycle: usize,
    pub conv_tol: f64,
    pub lindep: f64,
}

/// Ground state of the active-space Hamiltonian. The CI vector is laid out
/// as `civec[alpha address, beta address]`.
#[derive(Debug, Clone)]
pub struct FciSolution {
    pub converged: bool,
    pub energy: f64,
    pub civec: Array2<f64>,
}

/// A full-CI engine over an active-space Hamiltonian `(h1e, eri)` in chemist
/// notation with `nelec = (alpha, beta)` electrons in `norb` orbitals.
pub trait FciEngine {
    fn kernel(
        &mut self,
        h1e: ArrayView2<f64>,
        eri: &Array4<f64>,
        norb: usize,
        nelec: (usize, usize),
        ci0: Option<&Array2<f64>>,
        params: &FciParams,
    ) -> Result<FciSolution, EngineError>;

    /// Spin-traced one-particle density matrix of a CI vector, in the active
    /// MO basis.
    fn make_rdm1(
        &self,
        _civec: &Array2<f64>,
        _norb: usize,
        _nelec: (usize, usize),
    ) -> Result<Array2<f64>, EngineError> {
        Err(EngineError::Unsupported("the one-particle density matrix"))
    }
}

pub fn binomial(n: usize, k: usize) -> usize {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut acc: usize = 1;
    for i in 0..k {
        acc = acc * (n - i) / (i + 1);
    }
    acc
}

/// Number of determinant strings with `nelec` electrons in `norb` orbitals.
pub fn num_strings(norb: usize, nelec: usize) -> usize {
    binomial(norb, nelec)
}

/// All determinant strings in ascending binary order.
pub fn gen_strings(norb: usize, nelec: usize) -> Vec<u64> {
    let mut strings: Vec<u64> = (0..norb)
        .combinations(nelec)
        .map(|orbs| orbs.iter().fold(0u64, |s, &p| s | (1u64 << p)))
        .collect();
    strings.sort_unstable();
    strings
}

fn string_addresses(strings: &[u64]) -> HashMap<u64, usize> {
    strings
        .iter()
        .enumerate()
        .map(|(addr, &s)| (s, addr))
        .collect()
}

fn occ_list(string: u64, norb: usize) -> Vec<usize> {
    (0..norb).filter(|&p| string >> p & 1 == 1).collect()
}

/// Fermionic sign of the excitation `i -> a` acting on `string` (which must
/// occupy `i` and not `a`): parity of the number of occupied orbitals
/// strictly between the two positions.
pub fn excitation_sign(string: u64, i: usize, a: usize) -> f64 {
    let (lo, hi) = if i < a { (i, a) } else { (a, i) };
    let mask: u64 = ((1u64 << hi) - 1) & !((1u64 << (lo + 1)) - 1);
    if (string & mask).count_ones() % 2 == 0 {
        1.0
    } else {
        -1.0
    }
}

/// Address and sign tables for all single excitations out of the reference
/// determinant, indexed as `(occupied i, virtual a)` with the virtual count
/// `nvir = norb - nocc`. Together with their outer product for doubles these
/// tables map a CI vector onto singles/doubles coefficients.
pub fn t1_addresses_signs(norb: usize, nocc: usize) -> (Array2<usize>, Array2<f64>) {
    let nvir: usize = norb - nocc;
    let strings: Vec<u64> = gen_strings(norb, nocc);
    let addresses: HashMap<u64, usize> = string_addresses(&strings);
    let reference: u64 = (1u64 << nocc) - 1;

    let mut addrs: Array2<usize> = Array2::zeros((nocc, nvir));
    let mut signs: Array2<f64> = Array2::zeros((nocc, nvir));
    for i in 0..nocc {
        for a in 0..nvir {
            let excited: u64 = (reference ^ (1u64 << i)) | (1u64 << (nocc + a));
            addrs[[i, a]] = addresses[&excited];
            signs[[i, a]] = excitation_sign(reference, i, nocc + a);
        }
    }
    (addrs, signs)
}

/// Dense determinant-basis FCI through a single symmetric eigendecomposition.
/// Validation-grade: cost grows with the square of the determinant count, so
/// this is intended for the small active spaces of embedding clusters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectFci;

impl DirectFci {
    pub fn new() -> Self {
        DirectFci
    }
}

struct Determinants {
    strings_a: Vec<u64>,
    strings_b: Vec<u64>,
}

impl Determinants {
    fn build(norb: usize, nelec: (usize, usize)) -> Self {
        Determinants {
            strings_a: gen_strings(norb, nelec.0),
            strings_b: gen_strings(norb, nelec.1),
        }
    }

    fn dims(&self) -> (usize, usize) {
        (self.strings_a.len(), self.strings_b.len())
    }
}

/// Matrix element between two determinant pairs by the Slater-Condon rules.
/// Returns zero beyond double excitations.
fn matrix_element(
    (sa, sb): (u64, u64),
    (ta, tb): (u64, u64),
    h1e: ArrayView2<f64>,
    eri: &Array4<f64>,
    norb: usize,
) -> f64 {
    let da: usize = ((sa ^ ta).count_ones() / 2) as usize;
    let db: usize = ((sb ^ tb).count_ones() / 2) as usize;
    match (da, db) {
        (0, 0) => diagonal_element((sa, sb), h1e, eri, norb),
        (1, 0) => single_element(sa, ta, sb, h1e, eri, norb),
        (0, 1) => single_element(sb, tb, sa, h1e, eri, norb),
        (2, 0) => double_same_spin(sa, ta, eri, norb),
        (0, 2) => double_same_spin(sb, tb, eri, norb),
        (1, 1) => double_mixed_spin(sa, ta, sb, tb, eri, norb),
        _ => 0.0,
    }
}

fn diagonal_element((sa, sb): (u64, u64), h1e: ArrayView2<f64>, eri: &Array4<f64>, norb: usize) -> f64 {
    let occa: Vec<usize> = occ_list(sa, norb);
    let occb: Vec<usize> = occ_list(sb, norb);
    let mut e: f64 = 0.0;
    for &p in occa.iter().chain(occb.iter()) {
        e += h1e[[p, p]];
    }
    for &p in &occa {
        for &q in &occa {
            e += 0.5 * (eri[[p, p, q, q]] - eri[[p, q, q, p]]);
        }
    }
    for &p in &occb {
        for &q in &occb {
            e += 0.5 * (eri[[p, p, q, q]] - eri[[p, q, q, p]]);
        }
    }
    for &p in &occa {
        for &q in &occb {
            e += eri[[p, p, q, q]];
        }
    }
    e
}

/// Single excitation `p -> q` in one spin channel; `other` is the string of
/// the opposite channel (identical on both sides).
fn single_element(
    s: u64,
    t: u64,
    other: u64,
    h1e: ArrayView2<f64>,
    eri: &Array4<f64>,
    norb: usize,
) -> f64 {
    let p: usize = ((s & !t).trailing_zeros()) as usize;
    let q: usize = ((t & !s).trailing_zeros()) as usize;
    let sign: f64 = excitation_sign(s, p, q);

    let mut e: f64 = h1e[[p, q]];
    for k in occ_list(s & t, norb) {
        e += eri[[p, q, k, k]] - eri[[p, k, k, q]];
    }
    for k in occ_list(other, norb) {
        e += eri[[p, q, k, k]];
    }
    sign * e
}

/// Same-spin double excitation `{p1, p2} -> {q1, q2}` with ascending index
/// pairing; the sign is accumulated over the two sequential singles.
fn double_same_spin(s: u64, t: u64, eri: &Array4<f64>, norb: usize) -> f64 {
    let removed: Vec<usize> = occ_list(s & !t, norb);
    let added: Vec<usize> = occ_list(t & !s, norb);
    let (p1, p2) = (removed[0], removed[1]);
    let (q1, q2) = (added[0], added[1]);

    let sign1: f64 = excitation_sign(s, p1, q1);
    let intermediate: u64 = (s ^ (1u64 << p1)) | (1u64 << q1);
    let sign2: f64 = excitation_sign(intermediate, p2, q2);

    sign1 * sign2 * (eri[[p1, q1, p2, q2]] - eri[[p1, q2, p2, q1]])
}

fn double_mixed_spin(sa: u64, ta: u64, sb: u64, tb: u64, eri: &Array4<f64>, _norb: usize) -> f64 {
    let pa: usize = ((sa & !ta).trailing_zeros()) as usize;
    let qa: usize = ((ta & !sa).trailing_zeros()) as usize;
    let pb: usize = ((sb & !tb).trailing_zeros()) as usize;
    let qb: usize = ((tb & !sb).trailing_zeros()) as usize;

    let sign: f64 = excitation_sign(sa, pa, qa) * excitation_sign(sb, pb, qb);
    sign * eri[[pa, qa, pb, qb]]
}

fn build_hamiltonian(
    dets: &Determinants,
    h1e: ArrayView2<f64>,
    eri: &Array4<f64>,
    norb: usize,
) -> Array2<f64> {
    let (na, nb) = dets.dims();
    let dim: usize = na * nb;
    let mut h: Array2<f64> = Array2::zeros((dim, dim));
    for ia in 0..na {
        for ib in 0..nb {
            let row: usize = ia * nb + ib;
            for ja in 0..na {
                // more than a double excitation in alpha alone cannot couple
                if (dets.strings_a[ia] ^ dets.strings_a[ja]).count_ones() > 4 {
                    continue;
                }
                for jb in 0..nb {
                    let col: usize = ja * nb + jb;
                    if col < row {
                        continue;
                    }
                    let value: f64 = matrix_element(
                        (dets.strings_a[ia], dets.strings_b[ib]),
                        (dets.strings_a[ja], dets.strings_b[jb]),
                        h1e,
                        eri,
                        norb,
                    );
                    h[[row, col]] = value;
                    h[[col, row]] = value;
                }
            }
        }
    }
    h
}

impl FciEngine for DirectFci {
    fn kernel(
        &mut self,
        h1e: ArrayView2<f64>,
        eri: &Array4<f64>,
        norb: usize,
        nelec: (usize, usize),
        _ci0: Option<&Array2<f64>>,
        _params: &FciParams,
    ) -> Result<FciSolution, EngineError> {
        let dets = Determinants::build(norb, nelec);
        let (na, nb) = dets.dims();

        let h: Array2<f64> = build_hamiltonian(&dets, h1e, eri, norb);
        let (eigenvalues, eigenvectors) = h
            .eigh(UPLO::Upper)
            .map_err(|e| EngineError::Numerical(e.to_string()))?;

        let ground: Array1<f64> = eigenvectors.column(0).to_owned();
        let civec: Array2<f64> = ground
            .into_shape((na, nb))
            .map_err(|e| EngineError::Numerical(e.to_string()))?;

        Ok(FciSolution {
            converged: true,
            energy: eigenvalues[0],
            civec,
        })
    }

    fn make_rdm1(
        &self,
        civec: &Array2<f64>,
        norb: usize,
        nelec: (usize, usize),
    ) -> Result<Array2<f64>, EngineError> {
        let dets = Determinants::build(norb, nelec);
        let (na, nb) = dets.dims();
        if civec.dim() != (na, nb) {
            return Err(EngineError::ShapeMismatch {
                context: "CI vector".to_owned(),
                expected: vec![na, nb],
                found: civec.shape().to_vec(),
            });
        }
        let addr_a: HashMap<u64, usize> = string_addresses(&dets.strings_a);
        let addr_b: HashMap<u64, usize> = string_addresses(&dets.strings_b);

        let mut dm1: Array2<f64> = Array2::zeros((norb, norb));
        // alpha channel
        for (ia, &sa) in dets.strings_a.iter().enumerate() {
            for q in occ_list(sa, norb) {
                for ib in 0..nb {
                    dm1[[q, q]] += civec[[ia, ib]] * civec[[ia, ib]];
                }
                for p in 0..norb {
                    if p == q || sa >> p & 1 == 1 {
                        continue;
                    }
                    let t: u64 = (sa ^ (1u64 << q)) | (1u64 << p);
                    let sign: f64 = excitation_sign(sa, q, p);
                    let ja: usize = addr_a[&t];
                    for ib in 0..nb {
                        dm1[[p, q]] += sign * civec[[ja, ib]] * civec[[ia, ib]];
                    }
                }
            }
        }
        // beta channel
        for (ib, &sb) in dets.strings_b.iter().enumerate() {
            for q in occ_list(sb, norb) {
                for ia in 0..na {
                    dm1[[q, q]] += civec[[ia, ib]] * civec[[ia, ib]];
                }
                for p in 0..norb {
                    if p == q || sb >> p & 1 == 1 {
                        continue;
                    }
                    let t: u64 = (sb ^ (1u64 << q)) | (1u64 << p);
                    let sign: f64 = excitation_sign(sb, q, p);
                    let jb: usize = addr_b[&t];
                    for ia in 0..na {
                        dm1[[p, q]] += sign * civec[[ia, jb]] * civec[[ia, ib]];
                    }
                }
            }
        }
        Ok(dm1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ao_to_mo;
    use approx::assert_relative_eq;

    fn default_params() -> FciParams {
        FciParams {
            max_cycle: 100,
            conv_tol: 1e-12,
            lindep: 1e-14,
        }
    }

    /// Eight-fold symmetric two-electron integrals from a symmetric pair
    /// matrix: `(pq|rs) = pair[p,q] * pair[r,s]`.
    fn separable_eri(pair: &Array2<f64>) -> Array4<f64> {
        let n: usize = pair.dim().0;
        Array4::from_shape_fn((n, n, n, n), |(p, q, r, s)| pair[[p, q]] * pair[[r, s]])
    }

    fn givens(n: usize, p: usize, q: usize, theta: f64) -> Array2<f64> {
        let mut g: Array2<f64> = Array2::eye(n);
        g[[p, p]] = theta.cos();
        g[[q, q]] = theta.cos();
        g[[p, q]] = -theta.sin();
        g[[q, p]] = theta.sin();
        g
    }

    /// Two orbitals with symmetric one- and two-electron integrals; small
    /// enough that the Hamiltonian can be written down by hand.
    fn toy_integrals() -> (Array2<f64>, Array4<f64>) {
        let h1e: Array2<f64> = array![[-1.0, 0.0], [0.0, 0.5]];
        let mut eri: Array4<f64> = Array4::zeros((2, 2, 2, 2));
        // (00|00), (11|11), (00|11), (01|01), (01|00), (01|11) with full
        // eight-fold permutation symmetry
        let assignments: [(usize, usize, usize, usize, f64); 6] = [
            (0, 0, 0, 0, 0.50),
            (1, 1, 1, 1, 0.45),
            (0, 0, 1, 1, 0.30),
            (0, 1, 0, 1, 0.10),
            (0, 1, 0, 0, 0.15),
            (0, 1, 1, 1, 0.05),
        ];
        for &(p, q, r, s, v) in assignments.iter() {
            for (a, b) in [(p, q), (q, p)] {
                for (c, d) in [(r, s), (s, r)] {
                    eri[[a, b, c, d]] = v;
                    eri[[c, d, a, b]] = v;
                }
            }
        }
        (h1e, eri)
    }

    #[test]
    fn string_enumeration() {
        let strings = gen_strings(4, 2);
        assert_eq!(strings.len(), num_strings(4, 2));
        assert_eq!(strings[0], 0b0011);
        assert!(strings.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn reference_sits_at_address_zero() {
        for (norb, nocc) in [(4, 2), (5, 3), (6, 1)] {
            let strings = gen_strings(norb, nocc);
            assert_eq!(strings[0], (1u64 << nocc) - 1);
        }
    }

    #[test]
    fn sign_parity() {
        // no occupied orbitals between 0 and 1
        assert_eq!(excitation_sign(0b0011, 0, 2), -1.0);
        assert_eq!(excitation_sign(0b0011, 1, 2), 1.0);
        // two electrons between 1 and 4
        assert_eq!(excitation_sign(0b01111, 1, 4), 1.0);
        assert_eq!(excitation_sign(0b01111, 0, 4), -1.0);
    }

    #[test]
    fn t1_tables_are_consistent() {
        let (addrs, signs) = t1_addresses_signs(4, 2);
        assert_eq!(addrs.dim(), (2, 2));
        let strings = gen_strings(4, 2);
        // every address points at a string one excitation away from the
        // reference
        for i in 0..2 {
            for a in 0..2 {
                let s: u64 = strings[addrs[[i, a]]];
                assert_eq!((s ^ 0b0011).count_ones(), 2);
                assert_eq!(signs[[i, a]].abs(), 1.0);
            }
        }
        // highest occupied into lowest virtual carries no intervening
        // electrons
        assert_eq!(signs[[1, 0]], 1.0);
        assert_eq!(signs[[0, 0]], -1.0);
    }

    #[test]
    fn two_orbital_ground_state_matches_hand_built_matrix() {
        let (h1e, eri) = toy_integrals();
        // determinant basis (alpha, beta): (01,01), (01,10), (10,01), (10,10)
        let h00: f64 = 2.0 * h1e[[0, 0]] + eri[[0, 0, 0, 0]];
        let h11: f64 = h1e[[0, 0]] + h1e[[1, 1]] + eri[[0, 0, 1, 1]];
        let h33: f64 = 2.0 * h1e[[1, 1]] + eri[[1, 1, 1, 1]];
        let single_ref: f64 = h1e[[0, 1]] + eri[[0, 1, 0, 0]];
        let single_exc: f64 = h1e[[0, 1]] + eri[[0, 1, 1, 1]];
        let k01: f64 = eri[[0, 1, 0, 1]];
        let h: Array2<f64> = array![
            [h00, single_ref, single_ref, k01],
            [single_ref, h11, k01, single_exc],
            [single_ref, k01, h11, single_exc],
            [k01, single_exc, single_exc, h33],
        ];
        let (reference_eigs, _) = h.eigh(UPLO::Upper).unwrap();

        let mut engine = DirectFci::new();
        let solution = engine
            .kernel(h1e.view(), &eri, 2, (1, 1), None, &default_params())
            .unwrap();
        assert!(solution.converged);
        assert_relative_eq!(solution.energy, reference_eigs[0], epsilon = 1e-12);
        assert_eq!(solution.civec.dim(), (2, 2));
    }

    #[test]
    fn same_spin_double_elements_follow_the_slater_condon_rule() {
        let pair: Array2<f64> = array![
            [0.90, 0.20, 0.10, 0.05, 0.03],
            [0.20, 0.80, 0.15, 0.06, 0.02],
            [0.10, 0.15, 0.70, 0.12, 0.04],
            [0.05, 0.06, 0.12, 0.65, 0.08],
            [0.03, 0.02, 0.04, 0.08, 0.55],
        ];
        let h1e: Array2<f64> = Array2::zeros((5, 5));
        let eri: Array4<f64> = separable_eri(&pair);

        // Both alpha electrons move, |01> -> |23>: the element is the
        // antisymmetrized integral (02|13) - (03|12) with a plus sign.
        let value: f64 =
            matrix_element((0b0011, 0b0011), (0b1100, 0b0011), h1e.view(), &eri, 5);
        assert_relative_eq!(
            value,
            eri[[0, 2, 1, 3]] - eri[[0, 3, 1, 2]],
            epsilon = 1e-12
        );

        // The beta channel routes through the same rule.
        let value: f64 =
            matrix_element((0b0011, 0b0011), (0b0011, 0b1100), h1e.view(), &eri, 5);
        assert_relative_eq!(
            value,
            eri[[0, 2, 1, 3]] - eri[[0, 3, 1, 2]],
            epsilon = 1e-12
        );

        // |012> -> |134>: aligning the shared orbital 1 costs one
        // transposition, so the element is -[(03|24) - (04|23)].
        let value: f64 =
            matrix_element((0b00111, 0b00011), (0b11010, 0b00011), h1e.view(), &eri, 5);
        assert_relative_eq!(
            value,
            -(eri[[0, 3, 2, 4]] - eri[[0, 4, 2, 3]]),
            epsilon = 1e-12
        );
    }

    #[test]
    fn ground_state_energy_is_invariant_under_orbital_rotations() {
        let h1e: Array2<f64> = array![
            [-2.00, 0.10, 0.05, 0.02],
            [0.10, -1.00, 0.12, 0.04],
            [0.05, 0.12, -0.30, 0.08],
            [0.02, 0.04, 0.08, 0.60],
        ];
        let pair: Array2<f64> = array![
            [0.90, 0.20, 0.10, 0.05],
            [0.20, 0.80, 0.15, 0.06],
            [0.10, 0.15, 0.70, 0.12],
            [0.05, 0.06, 0.12, 0.65],
        ];
        let eri: Array4<f64> = separable_eri(&pair);

        let mut engine = DirectFci::new();
        let solution = engine
            .kernel(h1e.view(), &eri, 4, (2, 2), None, &default_params())
            .unwrap();

        // A generic orthogonal mix of all four orbitals; the spectrum cannot
        // depend on the one-particle basis, and the (2, 2) sector couples
        // every Slater-Condon branch with nonzero weight.
        let u: Array2<f64> = givens(4, 0, 1, 0.3)
            .dot(&givens(4, 1, 2, 0.7))
            .dot(&givens(4, 2, 3, 1.1))
            .dot(&givens(4, 0, 3, 0.4));
        let h_rot: Array2<f64> = u.t().dot(&h1e).dot(&u);
        let eri_rot: Array4<f64> = ao_to_mo(&eri, u.view(), u.view(), u.view(), u.view());
        let rotated = engine
            .kernel(h_rot.view(), &eri_rot, 4, (2, 2), None, &default_params())
            .unwrap();

        assert_relative_eq!(rotated.energy, solution.energy, epsilon = 1e-10);
    }

    #[test]
    fn rdm1_traces_to_electron_count() {
        let (h1e, eri) = toy_integrals();
        let mut engine = DirectFci::new();
        let solution = engine
            .kernel(h1e.view(), &eri, 2, (1, 1), None, &default_params())
            .unwrap();
        let dm1 = engine.make_rdm1(&solution.civec, 2, (1, 1)).unwrap();
        assert_relative_eq!(dm1[[0, 0]] + dm1[[1, 1]], 2.0, epsilon = 1e-12);
        assert_relative_eq!(dm1[[0, 1]], dm1[[1, 0]], epsilon = 1e-12);
    }

    #[test]
    fn open_shell_dimensions() {
        let (h1e, eri) = toy_integrals();
        let mut engine = DirectFci::new();
        let solution = engine
            .kernel(h1e.view(), &eri, 2, (2, 1), None, &default_params())
            .unwrap();
        assert_eq!(solution.civec.dim(), (1, 2));
        let dm1 = engine.make_rdm1(&solution.civec, 2, (2, 1)).unwrap();
        assert_relative_eq!(dm1[[0, 0]] + dm1[[1, 1]], 3.0, epsilon = 1e-12);
    }
}
