//! Array output of a finished run. One `.npy` file per dumped quantity so
//! that any NumPy-based analysis script can pick the results up directly.

use crate::fragment::ResultStore;
use crate::solver::DensityMatrix;
use anyhow::{Context, Result};
use log::info;
use ndarray_npy::write_npy;

/// Write the one-particle density matrices of all published results to
/// `<prefix>_<index>_dm1.npy` (with `_a`/`_b` suffixes for the spin
/// channels of an unrestricted solve). Results without a density matrix
/// are skipped.
pub fn write_density_matrices(prefix: &str, store: &ResultStore) -> Result<usize> {
    let mut written: usize = 0;
    for result in store.iter() {
        match &result.dm1 {
            Some(DensityMatrix::Restricted(dm)) => {
                let path: String = format!("{}_{}_dm1.npy", prefix, result.fragment);
                write_npy(&path, dm).with_context(|| format!("Unable to write '{}'", path))?;
                info!("{: <25} {}", "Density matrix written:", path);
                written += 1;
            }
            Some(DensityMatrix::Unrestricted(dm_a, dm_b)) => {
                for (dm, channel) in [(dm_a, "a"), (dm_b, "b")] {
                    let path: String =
                        format!("{}_{}_dm1_{}.npy", prefix, result.fragment, channel);
                    write_npy(&path, dm)
                        .with_context(|| format!("Unable to write '{}'", path))?;
                    info!("{: <25} {}", "Density matrix written:", path);
                }
                written += 1;
            }
            None => {}
        }
    }
    Ok(written)
}
