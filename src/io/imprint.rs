use crate::utils::Timer;
use chrono::Local;
use clap::{crate_name, crate_version};
use log::warn;

const LOG_WIDTH: usize = 80;

pub fn write_header() {
    warn!("{: ^LOG_WIDTH$}", "-----------------");
    warn!("{: ^LOG_WIDTH$}", crate_name!().to_uppercase());
    warn!("{: ^LOG_WIDTH$}", "-----------------");
    warn!("{: ^LOG_WIDTH$}", format!("version: {}", crate_version!()));
    warn!("{: ^LOG_WIDTH$}", "");
    warn!(
        "{: ^LOG_WIDTH$}",
        "::::::::::::::::::::::::::::::::::::::::::::::::::::::"
    );
    warn!(
        "{: ^LOG_WIDTH$}",
        "::       embedded-cluster electronic structure      ::"
    );
    warn!(
        "{: ^LOG_WIDTH$}",
        "::   MP2 / CCSD / UCCSD / FCI fragment solvers      ::"
    );
    warn!(
        "{: ^LOG_WIDTH$}",
        "::::::::::::::::::::::::::::::::::::::::::::::::::::::"
    );
    warn!("{: ^LOG_WIDTH$}", "");
    warn!(
        "{: ^LOG_WIDTH$}",
        format!("started on {}", Local::now().format("%Y-%m-%d at %H:%M:%S"))
    );
    warn!("{: ^LOG_WIDTH$}", "");
}

pub fn write_footer(timer: Timer) {
    warn!(
        "{:>68} {:>8.2} s",
        "total elapsed time:",
        timer.elapsed_secs()
    );
    warn!("{: ^LOG_WIDTH$}", "");
    warn!("{: ^LOG_WIDTH$}", "::::::::::::::::::::::::::::::::::::::");
    warn!(
        "{: ^LOG_WIDTH$}",
        format!(
            "::   Thank you for using {}    ::",
            crate_name!().to_uppercase()
        )
    );
    warn!("{: ^LOG_WIDTH$}", "::::::::::::::::::::::::::::::::::::::");
    warn!("{: ^LOG_WIDTH$}", "");
}
