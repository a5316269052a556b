use crate::cluster::{ClusterSpace, SpinClusterSpace};
use crate::reference::{MeanField, SpinMeanField};
use crate::utils::Timer;
use log::debug;
use ndarray::prelude::*;

/// Active-space integrals of one cluster: the Fock block and the chemist
/// `(pq|rs)` two-electron tensor over active orbitals, occupied columns
/// first. Built once per solver instance and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ClusterIntegrals {
    pub fock: Array2<f64>,
    pub eri: Array4<f64>,
    pub nocc: usize,
}

impl ClusterIntegrals {
    /// Transform the mean-field matrices into the active space of `space`.
    pub fn build(mf: &dyn MeanField, space: &ClusterSpace) -> Self {
        let timer: Timer = Timer::start();
        let c_act: ArrayView2<f64> = space.c_active();
        let fock: Array2<f64> = c_act.t().dot(&mf.fock().dot(&c_act));
        let eri: Array4<f64> = mf.transform_eri(c_act, c_act, c_act, c_act);
        debug!(
            "AO->MO transform for {} active orbitals took {:.3} s",
            space.norb_active(),
            timer.elapsed_secs()
        );
        ClusterIntegrals {
            fock,
            eri,
            nocc: space.nocc_active(),
        }
    }

    pub fn nact(&self) -> usize {
        self.fock.dim().0
    }

    pub fn nvir(&self) -> usize {
        self.nact() - self.nocc
    }

    /// Diagonal of the active Fock block; exact orbital energies when the
    /// cluster basis diagonalizes the Fock operator.
    pub fn orbital_energies(&self) -> Array1<f64> {
        self.fock.diag().to_owned()
    }

    pub fn oooo(&self) -> ArrayView4<f64> {
        let o = self.nocc;
        self.eri.slice(s![..o, ..o, ..o, ..o])
    }

    pub fn ooov(&self) -> ArrayView4<f64> {
        let o = self.nocc;
        self.eri.slice(s![..o, ..o, ..o, o..])
    }

    pub fn oovv(&self) -> ArrayView4<f64> {
        let o = self.nocc;
        self.eri.slice(s![..o, ..o, o.., o..])
    }

    pub fn ovov(&self) -> ArrayView4<f64> {
        let o = self.nocc;
        self.eri.slice(s![..o, o.., ..o, o..])
    }

    pub fn ovvo(&self) -> ArrayView4<f64> {
        let o = self.nocc;
        self.eri.slice(s![..o, o.., o.., ..o])
    }

    pub fn ovvv(&self) -> ArrayView4<f64> {
        let o = self.nocc;
        self.eri.slice(s![..o, o.., o.., o..])
    }

    pub fn vvvv(&self) -> ArrayView4<f64> {
        let o = self.nocc;
        self.eri.slice(s![o.., o.., o.., o..])
    }
}

/// Spin-resolved active-space integrals. The mixed block is ordered
/// `(alpha alpha | beta beta)`.
#[derive(Debug, Clone)]
pub struct SpinClusterIntegrals {
    pub fock_a: Array2<f64>,
    pub fock_b: Array2<f64>,
    pub eri_aa: Array4<f64>,
    pub eri_ab: Array4<f64>,
    pub eri_bb: Array4<f64>,
    pub nocc: (usize, usize),
}

impl SpinClusterIntegrals {
    pub fn build(mf: &dyn SpinMeanField, space: &SpinClusterSpace) -> Self {
        let timer: Timer = Timer::start();
        let c_a: ArrayView2<f64> = space.alpha.c_active();
        let c_b: ArrayView2<f64> = space.beta.c_active();
        let fock_a: Array2<f64> = c_a.t().dot(&mf.fock_a().dot(&c_a));
        let fock_b: Array2<f64> = c_b.t().dot(&mf.fock_b().dot(&c_b));
        let eri_aa: Array4<f64> = mf.transform_eri(c_a, c_a, c_a, c_a);
        let eri_ab: Array4<f64> = mf.transform_eri(c_a, c_a, c_b, c_b);
        let eri_bb: Array4<f64> = mf.transform_eri(c_b, c_b, c_b, c_b);
        debug!(
            "AO->MO transform for ({}, {}) active orbitals took {:.3} s",
            space.alpha.norb_active(),
            space.beta.norb_active(),
            timer.elapsed_secs()
        );
        SpinClusterIntegrals {
            fock_a,
            fock_b,
            eri_aa,
            eri_ab,
            eri_bb,
            nocc: space.nocc_active(),
        }
    }

    pub fn nact(&self) -> (usize, usize) {
        (self.fock_a.dim().0, self.fock_b.dim().0)
    }

    pub fn nvir(&self) -> (usize, usize) {
        let (na, nb) = self.nact();
        (na - self.nocc.0, nb - self.nocc.1)
    }

    pub fn orbital_energies(&self) -> (Array1<f64>, Array1<f64>) {
        (
            self.fock_a.diag().to_owned(),
            self.fock_b.diag().to_owned(),
        )
    }
}
