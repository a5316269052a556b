//! The job file: a JSON document holding the stored mean-field reference and
//! the fragment table. The arrays arrive in the serialized `ndarray` layout,
//! so a driver script only has to dump its matrices and name its fragments.

use crate::cluster::{ClusterSpace, SpinClusterSpace};
use crate::fragment::{Fragment, FragmentSpace};
use crate::reference::Reference;
use crate::solver::options::{CcsdOptions, FciOptions};
use crate::solver::SolverKind;
use anyhow::{Context, Result};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One fragment record of the job file. Frozen counts and solver options are
/// optional; absent option fields fall through to the `[ccsd]`/`[fci]`
/// sections of the configuration file.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FragmentInput {
    pub name: String,
    /// Solver name, parsed case-insensitively (`"CCSD"`, `"fci"`, ...).
    pub solver: SolverKind,
    /// AO coefficients of the fragment orbitals, one column per orbital.
    pub c_frag: Array2<f64>,
    #[serde(default)]
    pub nocc_frozen: usize,
    #[serde(default)]
    pub nvir_frozen: usize,
    /// Beta-channel frozen counts of a spin-polarized job. When absent the
    /// alpha counts apply to both channels.
    #[serde(default)]
    pub nocc_frozen_b: Option<usize>,
    #[serde(default)]
    pub nvir_frozen_b: Option<usize>,
    #[serde(default)]
    pub ccsd: CcsdOptions,
    #[serde(default)]
    pub fci: FciOptions,
    /// Indices of the fragments this one couples to self-consistently.
    #[serde(default)]
    pub coupled: Vec<usize>,
    /// Indices of the fragments whose converged amplitudes tailor this one.
    #[serde(default)]
    pub tailor_from: Vec<usize>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct JobInput {
    pub reference: Reference,
    pub fragments: Vec<FragmentInput>,
}

impl JobInput {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text: String = fs::read_to_string(path)
            .with_context(|| format!("Unable to read the job file '{}'", path.display()))?;
        let job: JobInput = serde_json::from_str(&text)
            .with_context(|| format!("The job file '{}' is not valid JSON", path.display()))?;
        Ok(job)
    }

    /// Build the driver fragments. Each fragment carries its own copy of the
    /// reference orbitals with its frozen counts applied; the space flavor
    /// always follows the reference spin, mismatched solver kinds are left
    /// for the driver validation to report.
    pub fn fragments(&self) -> Result<Vec<Fragment>> {
        self.fragments
            .iter()
            .enumerate()
            .map(|(index, input)| self.build_fragment(index, input))
            .collect()
    }

    fn build_fragment(&self, index: usize, input: &FragmentInput) -> Result<Fragment> {
        let space: FragmentSpace = match &self.reference {
            Reference::Restricted(mf) => {
                let space: ClusterSpace = ClusterSpace::new(
                    mf.mo_coeff.clone(),
                    mf.mo_occ.clone(),
                    input.nocc_frozen,
                    input.nvir_frozen,
                )
                .with_context(|| format!("Invalid active space of fragment '{}'", input.name))?;
                FragmentSpace::Restricted(space)
            }
            Reference::Polarized(mf) => {
                let alpha: ClusterSpace = ClusterSpace::new(
                    mf.mo_coeff_a.clone(),
                    mf.mo_occ_a.clone(),
                    input.nocc_frozen,
                    input.nvir_frozen,
                )
                .with_context(|| {
                    format!("Invalid alpha active space of fragment '{}'", input.name)
                })?;
                let beta: ClusterSpace = ClusterSpace::new(
                    mf.mo_coeff_b.clone(),
                    mf.mo_occ_b.clone(),
                    input.nocc_frozen_b.unwrap_or(input.nocc_frozen),
                    input.nvir_frozen_b.unwrap_or(input.nvir_frozen),
                )
                .with_context(|| {
                    format!("Invalid beta active space of fragment '{}'", input.name)
                })?;
                let space: SpinClusterSpace =
                    SpinClusterSpace::new(alpha, beta).with_context(|| {
                        format!("Inconsistent spin channels of fragment '{}'", input.name)
                    })?;
                FragmentSpace::Polarized(space)
            }
        };
        let mut fragment: Fragment = Fragment::new(
            index,
            &input.name,
            input.solver,
            input.c_frag.clone(),
            space,
        );
        fragment.ccsd = input.ccsd;
        fragment.fci = input.fci;
        fragment.coupled = input.coupled.clone();
        fragment.tailor_from = input.tailor_from.clone();
        Ok(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::StoredReferenceBuilder;
    use crate::solver::options::Setting;

    fn stored_job() -> JobInput {
        let mf = StoredReferenceBuilder::default()
            .e_tot(-1.0)
            .overlap(Array2::eye(2))
            .fock(Array2::from_diag(&array![-0.5, 0.3]))
            .eri_ao(Array4::zeros((2, 2, 2, 2)))
            .mo_coeff(Array2::eye(2))
            .mo_occ(array![2.0, 0.0])
            .build()
            .unwrap();
        JobInput {
            reference: Reference::Restricted(mf),
            fragments: vec![FragmentInput {
                name: String::from("atom 0"),
                solver: SolverKind::Ccsd,
                c_frag: Array2::eye(2),
                nocc_frozen: 0,
                nvir_frozen: 0,
                nocc_frozen_b: None,
                nvir_frozen_b: None,
                ccsd: CcsdOptions {
                    conv_tol: Setting::Set(1e-9),
                    ..Default::default()
                },
                fci: FciOptions::default(),
                coupled: Vec::new(),
                tailor_from: vec![1],
            }],
        }
    }

    #[test]
    fn job_round_trips_through_json() {
        let job: JobInput = stored_job();
        let text: String = serde_json::to_string(&job).unwrap();
        let back: JobInput = serde_json::from_str(&text).unwrap();
        assert_eq!(back.fragments.len(), 1);
        assert_eq!(back.fragments[0].solver, SolverKind::Ccsd);
        assert_eq!(back.fragments[0].ccsd.conv_tol, Setting::Set(1e-9));
        assert_eq!(back.fragments[0].tailor_from, vec![1]);
        assert_eq!(back.reference.e_tot(), -1.0);
    }

    #[test]
    fn absent_fragment_fields_deserialize_to_defaults() {
        let mut value: serde_json::Value =
            serde_json::to_value(&stored_job().fragments[0]).unwrap();
        let record = value.as_object_mut().unwrap();
        record.remove("nocc_frozen");
        record.remove("coupled");
        record.remove("fci");
        let input: FragmentInput = serde_json::from_value(value).unwrap();
        assert_eq!(input.nocc_frozen, 0);
        assert!(input.coupled.is_empty());
        assert!(input.fci.chempot.is_unset());
    }

    #[test]
    fn solver_names_parse_case_insensitively() {
        let kind: SolverKind = serde_json::from_value(serde_json::json!("fci")).unwrap();
        assert_eq!(kind, SolverKind::Fci);
        let err = serde_json::from_value::<SolverKind>(serde_json::json!("CISD")).unwrap_err();
        assert!(err.to_string().contains("Unknown solver"));
    }

    #[test]
    fn fragments_inherit_the_reference_orbitals() {
        let job: JobInput = stored_job();
        let fragments: Vec<Fragment> = job.fragments().unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].index, 0);
        match &fragments[0].space {
            FragmentSpace::Restricted(space) => {
                assert_eq!(space.nocc_active(), 1);
                assert_eq!(space.nvir_active(), 1);
            }
            FragmentSpace::Polarized(_) => panic!("restricted reference"),
        }
    }

    #[test]
    fn invalid_frozen_counts_name_the_fragment() {
        let mut job: JobInput = stored_job();
        job.fragments[0].nocc_frozen = 2;
        let err = job.fragments().unwrap_err();
        assert!(format!("{:#}", err).contains("atom 0"));
    }
}
