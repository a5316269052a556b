// JOB SPECIFICATION
// jobtype
pub const JOBTYPE: &str = "embed";
// config file
pub const CONFIG_FILE_NAME: &str = "embers.toml";
// log verbosity (0 => Info)
pub const VERBOSE: i8 = 0;
// rayon worker threads
pub const NUMBER_OF_CORES: usize = 1;

// EMBEDDING LOOP
// outer iterations over all fragments; self-consistent coupling
// only becomes active from the second iteration on
pub const EMBEDDING_ITERATIONS: usize = 1;

// CCSD SOLVER
// stop the amplitude iterations after max_cycle steps
pub const CCSD_MAX_CYCLE: usize = 100;
// convergence threshold for the correlation energy
pub const CCSD_CONV_TOL: f64 = 1.0e-7;
// convergence threshold for the amplitude norm
pub const CCSD_CONV_TOL_NORMT: f64 = 1.0e-6;
pub const CCSD_SOLVE_LAMBDA: bool = false;
pub const CCSD_MAKE_RDM1: bool = false;
pub const CCSD_MP2_GUESS: bool = true;
pub const CCSD_T_DIAGNOSTIC: bool = true;
// excited-state roots per requested channel
pub const EOM_NROOTS: usize = 3;

// FCI SOLVER
pub const FCI_MAX_CYCLE: usize = 100;
pub const FCI_CONV_TOL: f64 = 1.0e-12;
pub const FCI_LINDEP: f64 = 1.0e-14;
pub const FCI_MAKE_RDM1: bool = false;
// reference coefficients below this magnitude count as degenerate
pub const FCI_C0_TOL: f64 = 1.0e-10;

// CHEMICAL POTENTIAL SEARCH
// initial symmetric bracket around zero in Hartree
pub const CHEMPOT_WINDOW: f64 = 1.0;
// tolerance on the fragment electron number
pub const CHEMPOT_TOL: f64 = 1.0e-8;
pub const CHEMPOT_MAX_ITER: usize = 100;

// T1/D1/D2 DIAGNOSTICS
// Ref: Lee, Taylor, Int. J. Quantum Chem. 36, 199 (1989) and successors
pub const T1_GOOD: f64 = 0.02;
pub const D1_GOOD: f64 = 0.02;
pub const D1_FAIR: f64 = 0.05;
pub const D2_GOOD: f64 = 0.15;
pub const D2_FAIR: f64 = 0.18;

// occupation numbers above this threshold count as occupied
pub const OCC_TOL: f64 = 1.0e-8;
