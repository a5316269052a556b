//! Active-space bookkeeping of one embedding cluster. The orbital layout is
//! fixed: frozen occupied orbitals come first, then the active block, then
//! the frozen virtuals. Everything downstream (integral transforms,
//! amplitude shapes) slices against this layout.

pub mod integrals;

use crate::defaults;
use ndarray::prelude::*;
use std::error;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ClusterError {
    /// The frozen counts do not fit the occupied/virtual split.
    FrozenBounds {
        nocc_frozen: usize,
        nvir_frozen: usize,
        nocc: usize,
        nmo: usize,
    },
    /// Occupation vector and coefficient matrix disagree on the orbital count.
    OrbitalCount { coeff_cols: usize, occ_len: usize },
    /// The alpha and beta channels live in different AO bases.
    SpinBasisMismatch { nao_a: usize, nao_b: usize },
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClusterError::FrozenBounds {
                nocc_frozen,
                nvir_frozen,
                nocc,
                nmo,
            } => {
                write!(
                    f,
                    "Invalid frozen orbital counts: nocc_frozen = {} and nvir_frozen = {} \
                     violate nocc_frozen <= nocc = {} <= nmo - nvir_frozen = {}",
                    nocc_frozen,
                    nvir_frozen,
                    nocc,
                    nmo - nvir_frozen.min(nmo)
                )
            }
            ClusterError::OrbitalCount {
                coeff_cols,
                occ_len,
            } => {
                write!(
                    f,
                    "The occupation vector has {} entries but the coefficient matrix has {} columns",
                    occ_len, coeff_cols
                )
            }
            ClusterError::SpinBasisMismatch { nao_a, nao_b } => {
                write!(
                    f,
                    "The spin channels use different AO dimensions: {} (alpha) vs {} (beta)",
                    nao_a, nao_b
                )
            }
        }
    }
}

impl error::Error for ClusterError {}

/// Orbital space of one cluster: full MO coefficients, occupations and the
/// frozen-orbital counts. Construction validates the frozen bounds; the
/// occupied count is always derived from the occupation vector.
#[derive(Debug, Clone)]
pub struct ClusterSpace {
    mo_coeff: Array2<f64>,
    mo_occ: Array1<f64>,
    nocc_frozen: usize,
    nvir_frozen: usize,
}

impl ClusterSpace {
    pub fn new(
        mo_coeff: Array2<f64>,
        mo_occ: Array1<f64>,
        nocc_frozen: usize,
        nvir_frozen: usize,
    ) -> Result<Self, ClusterError> {
        if mo_coeff.dim().1 != mo_occ.len() {
            return Err(ClusterError::OrbitalCount {
                coeff_cols: mo_coeff.dim().1,
                occ_len: mo_occ.len(),
            });
        }
        let space = ClusterSpace {
            mo_coeff,
            mo_occ,
            nocc_frozen,
            nvir_frozen,
        };
        let nocc: usize = space.nocc();
        if nocc_frozen > nocc || nocc + nvir_frozen > space.nmo() {
            return Err(ClusterError::FrozenBounds {
                nocc_frozen,
                nvir_frozen,
                nocc,
                nmo: space.nmo(),
            });
        }
        Ok(space)
    }

    pub fn nao(&self) -> usize {
        self.mo_coeff.dim().0
    }

    pub fn nmo(&self) -> usize {
        self.mo_occ.len()
    }

    pub fn nocc(&self) -> usize {
        self.mo_occ
            .iter()
            .filter(|&&occ| occ > defaults::OCC_TOL)
            .count()
    }

    pub fn nvir(&self) -> usize {
        self.nmo() - self.nocc()
    }

    pub fn nocc_frozen(&self) -> usize {
        self.nocc_frozen
    }

    pub fn nvir_frozen(&self) -> usize {
        self.nvir_frozen
    }

    pub fn nfrozen(&self) -> usize {
        self.nocc_frozen + self.nvir_frozen
    }

    pub fn nocc_active(&self) -> usize {
        self.nocc() - self.nocc_frozen
    }

    pub fn nvir_active(&self) -> usize {
        self.nvir() - self.nvir_frozen
    }

    pub fn norb_active(&self) -> usize {
        self.nocc_active() + self.nvir_active()
    }

    pub fn mo_coeff(&self) -> ArrayView2<f64> {
        self.mo_coeff.view()
    }

    pub fn mo_occ(&self) -> ArrayView1<f64> {
        self.mo_occ.view()
    }

    /// Coefficients of the full active block, occupied columns first.
    pub fn c_active(&self) -> ArrayView2<f64> {
        self.mo_coeff
            .slice(s![.., self.nocc_frozen..self.nmo() - self.nvir_frozen])
    }

    pub fn c_active_occ(&self) -> ArrayView2<f64> {
        self.mo_coeff.slice(s![.., self.nocc_frozen..self.nocc()])
    }

    pub fn c_active_vir(&self) -> ArrayView2<f64> {
        self.mo_coeff
            .slice(s![.., self.nocc()..self.nmo() - self.nvir_frozen])
    }

    pub fn c_frozen_occ(&self) -> ArrayView2<f64> {
        self.mo_coeff.slice(s![.., ..self.nocc_frozen])
    }

    /// First `nocc_frozen` indices followed by the last `nvir_frozen` ones.
    pub fn frozen_indices(&self) -> Vec<usize> {
        (0..self.nocc_frozen)
            .chain(self.nmo() - self.nvir_frozen..self.nmo())
            .collect()
    }

    /// Electrons in the active space, summed from the occupation vector.
    pub fn nelec_active(&self) -> f64 {
        self.mo_occ
            .slice(s![self.nocc_frozen..self.nmo() - self.nvir_frozen])
            .sum()
    }

    /// Active electron pair `(alpha, beta)` for a CI treatment. Singly
    /// occupied orbitals are assigned to the alpha channel.
    pub fn nelec_active_pair(&self) -> (usize, usize) {
        let total: usize = self.nelec_active().round() as usize;
        let singly: usize = self
            .mo_occ
            .slice(s![self.nocc_frozen..self.nmo() - self.nvir_frozen])
            .iter()
            .filter(|&&occ| occ > defaults::OCC_TOL && occ < 2.0 - defaults::OCC_TOL)
            .count();
        let na: usize = (total + singly) / 2;
        (na, total - na)
    }
}

/// Independent alpha/beta cluster spaces over one shared AO basis.
#[derive(Debug, Clone)]
pub struct SpinClusterSpace {
    pub alpha: ClusterSpace,
    pub beta: ClusterSpace,
}

impl SpinClusterSpace {
    pub fn new(alpha: ClusterSpace, beta: ClusterSpace) -> Result<Self, ClusterError> {
        if alpha.nao() != beta.nao() {
            return Err(ClusterError::SpinBasisMismatch {
                nao_a: alpha.nao(),
                nao_b: beta.nao(),
            });
        }
        Ok(SpinClusterSpace { alpha, beta })
    }

    pub fn nocc_active(&self) -> (usize, usize) {
        (self.alpha.nocc_active(), self.beta.nocc_active())
    }

    pub fn nvir_active(&self) -> (usize, usize) {
        (self.alpha.nvir_active(), self.beta.nvir_active())
    }
}
