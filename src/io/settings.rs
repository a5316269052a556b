use crate::defaults;
use crate::solver::options::{CcsdOptions, FciOptions};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_jobtype() -> String {
    String::from(defaults::JOBTYPE)
}
fn default_verbose() -> i8 {
    defaults::VERBOSE
}
fn default_iterations() -> usize {
    defaults::EMBEDDING_ITERATIONS
}
fn default_dump_density() -> bool {
    false
}
fn default_number_of_cores() -> usize {
    defaults::NUMBER_OF_CORES
}
fn default_embedding_config() -> EmbeddingConfig {
    let embedding_config: EmbeddingConfig = toml::from_str("").unwrap();
    embedding_config
}
fn default_parallelization_config() -> ParallelizationConfig {
    let parallelization_config: ParallelizationConfig = toml::from_str("").unwrap();
    parallelization_config
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Configuration {
    #[serde(default = "default_jobtype")]
    pub jobtype: String,
    #[serde(default = "default_verbose")]
    pub verbose: i8,
    #[serde(default = "default_embedding_config")]
    pub embedding: EmbeddingConfig,
    #[serde(default = "default_parallelization_config")]
    pub parallelization: ParallelizationConfig,
    /// Driver-level solver options. Fragment records in the job file
    /// override these field by field.
    #[serde(default)]
    pub ccsd: CcsdOptions,
    #[serde(default)]
    pub fci: FciOptions,
}

impl Configuration {
    /// Read the configuration file from the working directory. If the file
    /// does not exist, the default settings are used and written back so
    /// that the run leaves its configuration behind.
    pub fn new() -> Result<Self> {
        let config_file_path: &Path = Path::new(defaults::CONFIG_FILE_NAME);
        let config_string: String = if config_file_path.exists() {
            fs::read_to_string(config_file_path).context("Unable to read the config file")?
        } else {
            String::new()
        };
        let config: Self = toml::from_str(&config_string)
            .context("The configuration file is not valid TOML")?;
        if !config_file_path.exists() {
            let config_string: String =
                toml::to_string(&config).context("Unable to serialize the default settings")?;
            fs::write(config_file_path, config_string)
                .context("Unable to write the config file")?;
        }
        Ok(config)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct EmbeddingConfig {
    /// Outer iterations over all fragments. Self-consistent coupling needs
    /// at least two to become active.
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    /// Dump the one-particle density matrices of all fragments to `.npy`
    /// files after the run.
    #[serde(default = "default_dump_density")]
    pub dump_density: bool,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct ParallelizationConfig {
    #[serde(default = "default_number_of_cores")]
    pub number_of_cores: usize,
}
