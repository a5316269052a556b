#![allow(dead_code)]

use crate::fragment::{Embedding, EmbeddingSummary, EngineSet, Fragment};
use crate::io::{write_density_matrices, write_footer, write_header, Configuration, JobInput};
use crate::utils::Timer;
use anyhow::Result;
use clap::{crate_name, crate_version, App, Arg};
use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::path::Path;

mod cluster;
mod defaults;
mod engine;
mod fragment;
mod io;
mod reference;
mod solver;
mod utils;

fn main() -> Result<()> {
    // Input.
    let matches = App::new(crate_name!())
        .version(crate_version!())
        .about("embedded-cluster solver layer for quantum embedding calculations")
        .arg(
            Arg::new("job-file")
                .about("JSON job file with the mean-field reference and the fragment table")
                .required(true)
                .index(1),
        )
        .get_matches();
    // The job file is the only mandatory input; the optional configuration
    // file is picked up from the working directory.
    let job_file: &str = matches.value_of("job-file").unwrap();
    let config: Configuration = Configuration::new()?;

    // Multithreading.
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.parallelization.number_of_cores)
        .build_global()
        .unwrap();

    // Logging.
    // The log level is set.
    let log_level: LevelFilter = match config.verbose {
        2 => LevelFilter::Trace,
        1 => LevelFilter::Debug,
        0 => LevelFilter::Info,
        -1 => LevelFilter::Warn,
        -2 => LevelFilter::Error,
        _ => LevelFilter::Info,
    };
    // and the logger is build.
    Builder::new()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .filter(None, log_level)
        .init();

    // The program header is written to the command line.
    write_header();
    // and the total wall-time timer is started.
    let timer: Timer = Timer::start();

    // Computations.
    // ................................................................
    match config.jobtype.as_str() {
        "embed" => {
            let job: JobInput = JobInput::from_path(Path::new(job_file))?;
            let fragments: Vec<Fragment> = job.fragments()?;
            // The binary bundles only the direct FCI engine; CCSD fragments
            // need an external engine and are rejected during validation.
            let mut embedding: Embedding = Embedding::new(
                job.reference,
                fragments,
                EngineSet::default(),
                config.ccsd,
                config.fci,
                config.embedding.iterations,
            )?;
            let summary: EmbeddingSummary = embedding.run()?;

            if config.embedding.dump_density {
                write_density_matrices(crate_name!(), embedding.store())?;
            }
            if !summary.converged() {
                log::error!("The embedding run did not converge");
            }
        }
        jtype => {
            println!("Jobtype: {} is not available.", jtype);
            println!("Choose one of the available types: embed");
        }
    }
    // ................................................................

    // Finished.
    // The total wall-time is printed together with the end statement.
    write_footer(timer);
    Ok(())
}
