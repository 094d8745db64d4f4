//! Lattice Hamiltonian trait.

use num_complex::Complex64;

use crate::error::Result;
use crate::sampling::{ConfigBatch, Configuration, ConnectedTable};

/// A Hamiltonian that is sparse in the computational basis.
pub trait Hamiltonian: Sync {
    fn n_sites(&self) -> usize;

    /// Configurations σ' with ⟨σ|H|σ'⟩ ≠ 0 and the matching matrix elements.
    fn get_conn(&self, config: &Configuration) -> Result<(Vec<Configuration>, Vec<Complex64>)>;

    /// Connected elements for a whole batch, padded to a common width.
    fn get_conn_padded(&self, samples: &ConfigBatch) -> Result<ConnectedTable> {
        let rows = samples
            .iter()
            .map(|config| self.get_conn(config))
            .collect::<Result<Vec<_>>>()?;
        ConnectedTable::from_rows(samples, rows)
    }
}
