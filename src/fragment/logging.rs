use crate::fragment::{EmbeddingSummary, Fragment};
use crate::reference::Reference;
use log::{info, warn};

pub fn print_driver_init(reference: &Reference, fragments: &[Fragment], iterations: usize) {
    let spin: &str = if reference.is_polarized() {
        "unrestricted"
    } else {
        "restricted"
    };
    info!("{:^80}", "");
    info!("{: ^80}", "Embedded-cluster calculation");
    info!("{:-^80}", "");
    info!("{: <25} {}", "fragments:", fragments.len());
    info!("{: <25} {}", "embedding iterations:", iterations);
    info!("{: <25} {}", "spin treatment:", spin);
    info!(
        "{: <25} {:18.14} Hartree",
        "mean-field energy:",
        reference.e_tot()
    );
    info!("{:^80}", "");
    info!(
        "{: <6} {: <16} {: >8} {: >12} {: >12}",
        "Index", "Name", "Solver", "Act. orbs", "Act. elec"
    );
    info!("{:-^62} ", "");
    for fragment in fragments {
        info!(
            "{: <6} {: <16} {: >8} {: >12} {: >12.2}",
            fragment.index,
            fragment.name,
            fragment.kind,
            fragment.space.norb_active(),
            fragment.space.nelec_active()
        );
    }
    info!("{:-^62} ", "");
}

pub fn print_iteration(iteration: usize, total: usize) {
    info!("{:^80}", "");
    info!(
        "{: ^80}",
        format!("Embedding iteration {} of {}", iteration, total)
    );
    info!("{:-^80}", "");
}

pub fn print_summary(summary: &EmbeddingSummary) {
    info!("{:^80}", "");
    info!("{: ^80}", "Summary of the embedded-cluster calculation");
    info!("{:-^80}", "");
    info!(
        "{: <6} {: <16} {: >8} {: >10} {: >20} {: >8}",
        "Index", "Name", "Solver", "Converged", "E(corr) [Hartree]", "T1 diag"
    );
    info!("{:-^73} ", "");
    for fragment in &summary.fragments {
        let t1: String = match fragment.diagnostics {
            Some(diag) => format!("{:.4}", diag.t1),
            None => String::from("-"),
        };
        info!(
            "{: <6} {: <16} {: >8} {: >10} {:>20.14} {: >8}",
            fragment.index, fragment.name, fragment.kind, fragment.converged, fragment.e_corr, t1
        );
    }
    info!("{:-^73} ", "");
    info!(
        "{: <25} {:18.14} Hartree",
        "mean-field energy:", summary.e_mf
    );
    info!(
        "{: <25} {:18.14} Hartree",
        "correlation energy:", summary.e_corr
    );
    info!("{: <25} {:18.14} Hartree", "total energy:", summary.e_tot);
    if !summary.converged() {
        warn!("Not every cluster solver converged; the total energy is unreliable");
    }
    info!("{:-<80} ", "");
}
