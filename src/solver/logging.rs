use crate::engine::EomRoots;
use crate::solver::diagnostics::{grade_d1, grade_d2, grade_t1, TDiagnostics};
use crate::solver::SolverKind;
use log::{debug, info, warn};

pub fn print_solver_init(fragment: usize, kind: SolverKind, norb: usize, nelec: (usize, usize)) {
    info!("{:^80}", "");
    info!("{: ^80}", format!("Cluster solver: {}", kind));
    info!("{:-^80}", "");
    info!("{: <25} {}", "fragment:", fragment);
    info!("{: <25} {}", "active orbitals:", norb);
    info!("{: <25} ({}, {})", "active electrons:", nelec.0, nelec.1);
    info!("{:^80}", "");
}

pub fn print_solver_end(kind: SolverKind, converged: bool, e_corr: f64) {
    info!("{:-^62} ", "");
    if converged {
        info!("{: ^62}", format!("{} converged", kind));
    } else {
        warn!("{: ^62}", format!("{} did NOT converge", kind));
    }
    info!("{:^80} ", "");
    info!("correlation energy: {:18.14} Hartree", e_corr);
    info!("{:-<80} ", "");
}

pub fn print_diagnostics(diag: &TDiagnostics) {
    info!("{: <25} {:>10.5} ({})", "T1 diagnostic:", diag.t1, grade_t1(diag.t1));
    info!("{: <25} {:>10.5} ({})", "D1 diagnostic:", diag.d1, grade_d1(diag.d1));
    info!("{: <25} {:>10.5} ({})", "D2 diagnostic:", diag.d2, grade_d2(diag.d2));
    if diag.is_suspect() {
        warn!("Amplitude diagnostics exceed their trusted bounds; the cluster may not be single-reference");
    }
}

pub fn print_eom_roots(channel: &str, roots: &EomRoots) {
    info!("{:^80}", "");
    info!("{: <45}", format!("{} roots: all energies are in atomic units", channel));
    info!("{:-^62} ", "");
    info!("{: <5} {: >18}", "Root", "Energy");
    info!("{:-^62} ", "");
    for (idx, energy) in roots.energies.iter().enumerate() {
        info!("{: >5} {:>18.10e}", idx + 1, energy);
    }
    info!("{:-^62} ", "");
}

pub fn print_chempot_init(window: f64, target: f64) {
    info!("{:^80}", "");
    info!("{: ^80}", "Chemical potential search");
    info!("{:-^80}", "");
    info!("{: <25} [{:+.4}, {:+.4}]", "search window:", -window, window);
    info!("{: <25} {:.8}", "target occupation:", target);
    info!("{:^80}", "");
}

pub fn print_chempot_point(mu: f64, n_frag: f64) {
    debug!("mu = {:>14.8}  N(fragment) = {:>14.8}", mu, n_frag);
}

pub fn print_chempot_result(mu: f64, n_frag: f64, target: f64) {
    info!("{:-^62} ", "");
    info!("{: ^62}", "chemical potential converged");
    info!("{: <25} {:>18.10}", "chemical potential:", mu);
    info!(
        "{: <25} {:>18.10} (target {:.8})",
        "fragment occupation:", n_frag, target
    );
    info!("{:-^62} ", "");
}
