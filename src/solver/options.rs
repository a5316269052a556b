//! Layered solver configuration. Every option field is a [`Setting`] so that
//! "not provided" stays distinguishable from any explicitly chosen value;
//! records merge field by field with the more specific layer winning and the
//! hardcoded defaults filling whatever is still unset at the end.

use crate::defaults;
use crate::engine::ccsd::CcsdParams;
use crate::engine::fci::FciParams;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::error;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum OptionsError {
    /// A field without a hardcoded default stayed unset through all layers.
    Required(&'static str),
    /// The option is set but the chosen solver cannot honor it.
    Unsupported {
        option: &'static str,
        solver: &'static str,
    },
}

impl fmt::Display for OptionsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OptionsError::Required(name) => {
                write!(f, "The required option '{}' was not set in any layer", name)
            }
            OptionsError::Unsupported { option, solver } => {
                write!(
                    f,
                    "The option '{}' is not supported by the {} solver",
                    option, solver
                )
            }
        }
    }
}

impl error::Error for OptionsError {}

/// A two-state configuration value: either explicitly set or unset. Unset
/// fields fall through to the next option layer. In TOML/JSON input an
/// absent key deserializes to `Unset` through `#[serde(default)]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Setting<T> {
    Set(T),
    Unset,
}

impl<T> Default for Setting<T> {
    fn default() -> Self {
        Setting::Unset
    }
}

impl<T> Setting<T> {
    pub fn is_set(&self) -> bool {
        matches!(self, Setting::Set(_))
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Setting::Unset)
    }

    /// Keep `self` when set, otherwise fall back to `other`.
    pub fn or(self, other: Setting<T>) -> Setting<T> {
        match self {
            Setting::Set(value) => Setting::Set(value),
            Setting::Unset => other,
        }
    }

    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Setting::Set(value) => value,
            Setting::Unset => default,
        }
    }

    /// Resolve a field that has no hardcoded default.
    pub fn require(self, name: &'static str) -> Result<T, OptionsError> {
        match self {
            Setting::Set(value) => Ok(value),
            Setting::Unset => Err(OptionsError::Required(name)),
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Setting::Set(value) => Some(value),
            Setting::Unset => None,
        }
    }
}

/// Which occupied indices of the doubles correction get projected onto the
/// coupled fragment's space during cross-fragment coupling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum CouplingMode {
    /// Both occupied indices projected onto the coupled fragment.
    OccupiedPair = 1,
    /// Occupied pair plus the symmetric cross terms with the own projector.
    OccupiedPairCross = 2,
    /// Only the first occupied index, followed by symmetrization.
    FirstOccupied = 3,
}

/// Excited-state channels requested on top of a CCSD ground state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EomChannels {
    Ip,
    Ea,
    Both,
}

impl EomChannels {
    pub fn includes_ip(&self) -> bool {
        matches!(self, EomChannels::Ip | EomChannels::Both)
    }

    pub fn includes_ea(&self) -> bool {
        matches!(self, EomChannels::Ea | EomChannels::Both)
    }
}

/// Options of the CCSD solvers (restricted and unrestricted).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CcsdOptions {
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub max_cycle: Setting<usize>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub conv_tol: Setting<f64>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub conv_tol_normt: Setting<f64>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub mp2_guess: Setting<bool>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub solve_lambda: Setting<bool>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub make_rdm1: Setting<bool>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub t_diagnostic: Setting<bool>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub eom: Setting<EomChannels>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub eom_nroots: Setting<usize>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub sc_mode: Setting<CouplingMode>,
    /// Size `(occupied, virtual)` of the CAS window around the Fermi level
    /// used by tailored CCSD. Setting this turns tailoring on.
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub tailor_cas: Setting<(usize, usize)>,
}

impl CcsdOptions {
    /// Field-by-field merge with `self` winning over `other`.
    pub fn merged_over(self, other: &CcsdOptions) -> CcsdOptions {
        CcsdOptions {
            max_cycle: self.max_cycle.or(other.max_cycle),
            conv_tol: self.conv_tol.or(other.conv_tol),
            conv_tol_normt: self.conv_tol_normt.or(other.conv_tol_normt),
            mp2_guess: self.mp2_guess.or(other.mp2_guess),
            solve_lambda: self.solve_lambda.or(other.solve_lambda),
            make_rdm1: self.make_rdm1.or(other.make_rdm1),
            t_diagnostic: self.t_diagnostic.or(other.t_diagnostic),
            eom: self.eom.or(other.eom),
            eom_nroots: self.eom_nroots.or(other.eom_nroots),
            sc_mode: self.sc_mode.or(other.sc_mode),
            tailor_cas: self.tailor_cas.or(other.tailor_cas),
        }
    }

    /// Substitute hardcoded defaults for everything still unset.
    pub fn resolve(self) -> Result<ResolvedCcsdOptions, OptionsError> {
        Ok(ResolvedCcsdOptions {
            max_cycle: self.max_cycle.unwrap_or(defaults::CCSD_MAX_CYCLE),
            conv_tol: self.conv_tol.unwrap_or(defaults::CCSD_CONV_TOL),
            conv_tol_normt: self.conv_tol_normt.unwrap_or(defaults::CCSD_CONV_TOL_NORMT),
            mp2_guess: self.mp2_guess.unwrap_or(defaults::CCSD_MP2_GUESS),
            solve_lambda: self.solve_lambda.unwrap_or(defaults::CCSD_SOLVE_LAMBDA),
            make_rdm1: self.make_rdm1.unwrap_or(defaults::CCSD_MAKE_RDM1),
            t_diagnostic: self.t_diagnostic.unwrap_or(defaults::CCSD_T_DIAGNOSTIC),
            eom: self.eom.into_option(),
            eom_nroots: self.eom_nroots.unwrap_or(defaults::EOM_NROOTS),
            sc_mode: self.sc_mode.into_option(),
            tailor_cas: self.tailor_cas.into_option(),
        })
    }
}

/// CCSD options after layer resolution; immutable from here on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedCcsdOptions {
    pub max_cycle: usize,
    pub conv_tol: f64,
    pub conv_tol_normt: f64,
    pub mp2_guess: bool,
    pub solve_lambda: bool,
    pub make_rdm1: bool,
    pub t_diagnostic: bool,
    pub eom: Option<EomChannels>,
    pub eom_nroots: usize,
    pub sc_mode: Option<CouplingMode>,
    pub tailor_cas: Option<(usize, usize)>,
}

impl ResolvedCcsdOptions {
    pub fn params(&self) -> CcsdParams {
        CcsdParams {
            max_cycle: self.max_cycle,
            conv_tol: self.conv_tol,
            conv_tol_normt: self.conv_tol_normt,
        }
    }
}

/// Options of the FCI solver.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FciOptions {
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub max_cycle: Setting<usize>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub conv_tol: Setting<f64>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub lindep: Setting<f64>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub make_rdm1: Setting<bool>,
    /// Optimize a chemical potential so that the fragment-projected electron
    /// number hits `nelec_target`.
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub chempot: Setting<bool>,
    /// Electron-number target of the chemical-potential constraint. No
    /// hardcoded default: required whenever `chempot` is enabled.
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub nelec_target: Setting<f64>,
}

impl FciOptions {
    pub fn merged_over(self, other: &FciOptions) -> FciOptions {
        FciOptions {
            max_cycle: self.max_cycle.or(other.max_cycle),
            conv_tol: self.conv_tol.or(other.conv_tol),
            lindep: self.lindep.or(other.lindep),
            make_rdm1: self.make_rdm1.or(other.make_rdm1),
            chempot: self.chempot.or(other.chempot),
            nelec_target: self.nelec_target.or(other.nelec_target),
        }
    }

    pub fn resolve(self) -> Result<ResolvedFciOptions, OptionsError> {
        let nelec_target: Option<f64> = if self.chempot.unwrap_or(false) {
            Some(self.nelec_target.require("fci.nelec_target")?)
        } else {
            None
        };
        Ok(ResolvedFciOptions {
            max_cycle: self.max_cycle.unwrap_or(defaults::FCI_MAX_CYCLE),
            conv_tol: self.conv_tol.unwrap_or(defaults::FCI_CONV_TOL),
            lindep: self.lindep.unwrap_or(defaults::FCI_LINDEP),
            make_rdm1: self.make_rdm1.unwrap_or(defaults::FCI_MAKE_RDM1),
            nelec_target,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedFciOptions {
    pub max_cycle: usize,
    pub conv_tol: f64,
    pub lindep: f64,
    pub make_rdm1: bool,
    /// `Some` turns the chemical-potential constraint on.
    pub nelec_target: Option<f64>,
}

impl ResolvedFciOptions {
    pub fn params(&self) -> FciParams {
        FciParams {
            max_cycle: self.max_cycle,
            conv_tol: self.conv_tol,
            lindep: self.lindep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_layer_wins_over_fragment_and_base() {
        let explicit = CcsdOptions {
            max_cycle: Setting::Set(7),
            ..Default::default()
        };
        let fragment = CcsdOptions {
            max_cycle: Setting::Set(50),
            conv_tol: Setting::Set(1e-9),
            ..Default::default()
        };
        let base = CcsdOptions {
            max_cycle: Setting::Set(200),
            conv_tol: Setting::Set(1e-5),
            solve_lambda: Setting::Set(true),
            ..Default::default()
        };

        let merged = explicit.merged_over(&fragment).merged_over(&base);
        assert_eq!(merged.max_cycle, Setting::Set(7));
        assert_eq!(merged.conv_tol, Setting::Set(1e-9));
        assert_eq!(merged.solve_lambda, Setting::Set(true));

        let resolved = merged.resolve().unwrap();
        assert_eq!(resolved.max_cycle, 7);
        assert_eq!(resolved.conv_tol, 1e-9);
        assert!(resolved.solve_lambda);
        // untouched fields pick up the hardcoded defaults
        assert_eq!(resolved.conv_tol_normt, crate::defaults::CCSD_CONV_TOL_NORMT);
        assert_eq!(resolved.eom, None);
    }

    #[test]
    fn disjoint_layers_merge_order_independently() {
        let a = CcsdOptions {
            max_cycle: Setting::Set(30),
            ..Default::default()
        };
        let b = CcsdOptions {
            conv_tol: Setting::Set(1e-8),
            ..Default::default()
        };
        let ab = a.merged_over(&b);
        let ba = b.merged_over(&a);
        assert_eq!(ab, ba);
    }

    #[test]
    fn chempot_target_is_required() {
        let opts = FciOptions {
            chempot: Setting::Set(true),
            ..Default::default()
        };
        let err = opts.resolve().unwrap_err();
        assert_eq!(err, OptionsError::Required("fci.nelec_target"));

        let opts = FciOptions {
            chempot: Setting::Set(true),
            nelec_target: Setting::Set(1.5),
            ..Default::default()
        };
        let resolved = opts.resolve().unwrap();
        assert_eq!(resolved.nelec_target, Some(1.5));

        // without the constraint the target is simply ignored
        let opts = FciOptions::default();
        assert_eq!(opts.resolve().unwrap().nelec_target, None);
    }

    #[test]
    fn absent_toml_keys_stay_unset() {
        let opts: CcsdOptions = toml::from_str("max_cycle = 25\nsc_mode = 2\n").unwrap();
        assert_eq!(opts.max_cycle, Setting::Set(25));
        assert_eq!(opts.sc_mode, Setting::Set(CouplingMode::OccupiedPairCross));
        assert!(opts.conv_tol.is_unset());
        assert!(opts.tailor_cas.is_unset());

        let opts: CcsdOptions = toml::from_str("eom = \"both\"\ntailor_cas = [2, 2]\n").unwrap();
        assert_eq!(opts.eom, Setting::Set(EomChannels::Both));
        assert_eq!(opts.tailor_cas, Setting::Set((2, 2)));
    }

    #[test]
    fn unset_fields_round_trip_through_toml() {
        let opts = CcsdOptions {
            conv_tol: Setting::Set(1e-9),
            ..Default::default()
        };
        let text = toml::to_string(&opts).unwrap();
        assert!(text.contains("conv_tol"));
        assert!(!text.contains("max_cycle"));
        let back: CcsdOptions = toml::from_str(&text).unwrap();
        assert_eq!(back, opts);
    }
}
