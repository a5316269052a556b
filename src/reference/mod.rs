//! The mean-field collaborator. The solver layer only sees the two traits;
//! the stored implementations carry the matrices of a converged calculation
//! in memory, the way they arrive from the job file.

use derive_builder::Builder;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

/// Read access to a spin-restricted mean-field reference.
pub trait MeanField: Sync {
    /// Total mean-field energy (electronic plus nuclear).
    fn e_tot(&self) -> f64;

    /// AO overlap matrix.
    fn overlap(&self) -> ArrayView2<f64>;

    /// AO Fock matrix.
    fn fock(&self) -> ArrayView2<f64>;

    /// Two-electron integrals `(ij|kl)` in chemist notation, transformed
    /// into the four given molecular-orbital coefficient blocks.
    fn transform_eri(
        &self,
        c_i: ArrayView2<f64>,
        c_j: ArrayView2<f64>,
        c_k: ArrayView2<f64>,
        c_l: ArrayView2<f64>,
    ) -> Array4<f64>;
}

/// Read access to a spin-polarized mean-field reference. The two-electron
/// integrals stay spatial and are shared between the spin channels.
pub trait SpinMeanField: Sync {
    fn e_tot(&self) -> f64;
    fn overlap(&self) -> ArrayView2<f64>;
    fn fock_a(&self) -> ArrayView2<f64>;
    fn fock_b(&self) -> ArrayView2<f64>;
    fn transform_eri(
        &self,
        c_i: ArrayView2<f64>,
        c_j: ArrayView2<f64>,
        c_k: ArrayView2<f64>,
        c_l: ArrayView2<f64>,
    ) -> Array4<f64>;
}

/// Four sequential quarter transforms `(uv|ls) -> (ij|kl)`. Every index is
/// contracted with its own coefficient block, so rectangular blocks are
/// fine. Orbital counts in this layer are small; the O(N^5) chain is not a
/// bottleneck.
pub fn ao_to_mo(
    eri_ao: &Array4<f64>,
    c_i: ArrayView2<f64>,
    c_j: ArrayView2<f64>,
    c_k: ArrayView2<f64>,
    c_l: ArrayView2<f64>,
) -> Array4<f64> {
    let nao: usize = eri_ao.dim().0;
    let (ni, nj, nk, nl) = (
        c_i.dim().1,
        c_j.dim().1,
        c_k.dim().1,
        c_l.dim().1,
    );

    // (uv|ls) -> (i, v, l, s)
    let flat: Array2<f64> = eri_ao
        .view()
        .into_shape((nao, nao * nao * nao))
        .unwrap()
        .to_owned();
    let step: Array2<f64> = c_i.t().dot(&flat);
    let step: Array4<f64> = step.into_shape((ni, nao, nao, nao)).unwrap();

    // -> (j, i, l, s)
    let step: Array4<f64> = step
        .permuted_axes([1, 0, 2, 3])
        .as_standard_layout()
        .to_owned();
    let flat: Array2<f64> = step.into_shape((nao, ni * nao * nao)).unwrap();
    let step: Array2<f64> = c_j.t().dot(&flat);
    let step: Array4<f64> = step.into_shape((nj, ni, nao, nao)).unwrap();

    // -> (k, j, i, s)
    let step: Array4<f64> = step
        .permuted_axes([2, 0, 1, 3])
        .as_standard_layout()
        .to_owned();
    let flat: Array2<f64> = step.into_shape((nao, nj * ni * nao)).unwrap();
    let step: Array2<f64> = c_k.t().dot(&flat);
    let step: Array4<f64> = step.into_shape((nk, nj, ni, nao)).unwrap();

    // -> (l, k, j, i)
    let step: Array4<f64> = step
        .permuted_axes([3, 0, 1, 2])
        .as_standard_layout()
        .to_owned();
    let flat: Array2<f64> = step.into_shape((nao, nk * nj * ni)).unwrap();
    let step: Array2<f64> = c_l.t().dot(&flat);
    let step: Array4<f64> = step.into_shape((nl, nk, nj, ni)).unwrap();

    // back to (i, j, k, l)
    step.permuted_axes([3, 2, 1, 0])
        .as_standard_layout()
        .to_owned()
}

/// Either flavor of stored reference, tagged by its spin treatment in the
/// job file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "spin", rename_all = "lowercase")]
pub enum Reference {
    Restricted(StoredReference),
    Polarized(StoredSpinReference),
}

impl Reference {
    pub fn is_polarized(&self) -> bool {
        matches!(self, Reference::Polarized(_))
    }

    pub fn e_tot(&self) -> f64 {
        match self {
            Reference::Restricted(mf) => mf.e_tot,
            Reference::Polarized(mf) => mf.e_tot,
        }
    }

    pub fn overlap(&self) -> ArrayView2<f64> {
        match self {
            Reference::Restricted(mf) => mf.overlap.view(),
            Reference::Polarized(mf) => mf.overlap.view(),
        }
    }

    pub fn restricted(&self) -> Option<&StoredReference> {
        match self {
            Reference::Restricted(mf) => Some(mf),
            Reference::Polarized(_) => None,
        }
    }

    pub fn polarized(&self) -> Option<&StoredSpinReference> {
        match self {
            Reference::Polarized(mf) => Some(mf),
            Reference::Restricted(_) => None,
        }
    }
}

/// A spin-restricted reference held fully in memory.
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
pub struct StoredReference {
    pub e_tot: f64,
    pub overlap: Array2<f64>,
    pub fock: Array2<f64>,
    /// AO two-electron integrals `(uv|ls)` in chemist notation.
    pub eri_ao: Array4<f64>,
    pub mo_coeff: Array2<f64>,
    pub mo_occ: Array1<f64>,
}

impl MeanField for StoredReference {
    fn e_tot(&self) -> f64 {
        self.e_tot
    }

    fn overlap(&self) -> ArrayView2<f64> {
        self.overlap.view()
    }

    fn fock(&self) -> ArrayView2<f64> {
        self.fock.view()
    }

    fn transform_eri(
        &self,
        c_i: ArrayView2<f64>,
        c_j: ArrayView2<f64>,
        c_k: ArrayView2<f64>,
        c_l: ArrayView2<f64>,
    ) -> Array4<f64> {
        ao_to_mo(&self.eri_ao, c_i, c_j, c_k, c_l)
    }
}

/// A spin-polarized reference held fully in memory.
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
pub struct StoredSpinReference {
    pub e_tot: f64,
    pub overlap: Array2<f64>,
    pub fock_a: Array2<f64>,
    pub fock_b: Array2<f64>,
    pub eri_ao: Array4<f64>,
    pub mo_coeff_a: Array2<f64>,
    pub mo_coeff_b: Array2<f64>,
    pub mo_occ_a: Array1<f64>,
    pub mo_occ_b: Array1<f64>,
}

impl SpinMeanField for StoredSpinReference {
    fn e_tot(&self) -> f64 {
        self.e_tot
    }

    fn overlap(&self) -> ArrayView2<f64> {
        self.overlap.view()
    }

    fn fock_a(&self) -> ArrayView2<f64> {
        self.fock_a.view()
    }

    fn fock_b(&self) -> ArrayView2<f64> {
        self.fock_b.view()
    }

    fn transform_eri(
        &self,
        c_i: ArrayView2<f64>,
        c_j: ArrayView2<f64>,
        c_k: ArrayView2<f64>,
        c_l: ArrayView2<f64>,
    ) -> Array4<f64> {
        ao_to_mo(&self.eri_ao, c_i, c_j, c_k, c_l)
    }
}
