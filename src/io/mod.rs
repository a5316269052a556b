mod imprint;
mod jobfile;
mod output;
pub(crate) mod settings;

pub use imprint::{write_footer, write_header};
pub use jobfile::JobInput;
pub use output::write_density_matrices;
pub use settings::Configuration;
