//! Sampled configuration batches and padded connected-configuration tables.

use nalgebra::DVector;
use num_complex::Complex64;

use crate::error::{check_len, Result};

/// A spin configuration, one `±1.0` entry per site.
pub type Configuration = DVector<f64>;

/// An ordered batch of configurations drawn from |ψ|².
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigBatch {
    configs: Vec<Configuration>,
}

impl ConfigBatch {
    pub fn new(configs: Vec<Configuration>) -> Self {
        Self { configs }
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn as_slice(&self) -> &[Configuration] {
        &self.configs
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Configuration> {
        self.configs.iter()
    }
}

impl From<Vec<Configuration>> for ConfigBatch {
    fn from(configs: Vec<Configuration>) -> Self {
        Self::new(configs)
    }
}

/// For each sample, the configurations connected to it by one application
/// of the Hamiltonian and the matching matrix elements.
///
/// Rows are padded to a common `width`; a padding slot holds a copy of the
/// sample with a zero matrix element and never contributes to a sum.
#[derive(Clone, Debug)]
pub struct ConnectedTable {
    n_samples: usize,
    width: usize,
    configs: Vec<Configuration>,
    mels: Vec<Complex64>,
}

impl ConnectedTable {
    /// Build a table from row-major `n_samples × width` storage.
    pub fn new(
        n_samples: usize,
        width: usize,
        configs: Vec<Configuration>,
        mels: Vec<Complex64>,
    ) -> Result<Self> {
        check_len("connected table configurations", n_samples * width, configs.len())?;
        check_len("connected table matrix elements", n_samples * width, mels.len())?;
        Ok(Self { n_samples, width, configs, mels })
    }

    /// Pad ragged rows with `(sample, 0)` entries up to the widest row.
    pub fn from_rows(
        samples: &ConfigBatch,
        rows: Vec<(Vec<Configuration>, Vec<Complex64>)>,
    ) -> Result<Self> {
        check_len("connected rows", samples.len(), rows.len())?;
        let width = rows.iter().map(|(c, _)| c.len()).max().unwrap_or(0);
        let mut configs = Vec::with_capacity(width * rows.len());
        let mut mels = Vec::with_capacity(width * rows.len());
        for (sample, (row_configs, row_mels)) in samples.iter().zip(rows) {
            check_len("connected row", row_configs.len(), row_mels.len())?;
            let pad = width - row_configs.len();
            configs.extend(row_configs);
            mels.extend(row_mels);
            configs.extend(std::iter::repeat(sample.clone()).take(pad));
            mels.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(pad));
        }
        Self::new(samples.len(), width, configs, mels)
    }

    /// Number of rows (leading dimension).
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Connected configurations and matrix elements of row `k`.
    pub fn row(&self, k: usize) -> (&[Configuration], &[Complex64]) {
        let start = k * self.width;
        let end = start + self.width;
        (&self.configs[start..end], &self.mels[start..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_uses_zero_weights() {
        let samples = ConfigBatch::new(vec![
            DVector::from_vec(vec![1.0, 1.0]),
            DVector::from_vec(vec![1.0, -1.0]),
        ]);
        let rows = vec![
            (vec![DVector::from_vec(vec![-1.0, 1.0])], vec![Complex64::new(-1.0, 0.0)]),
            (
                vec![DVector::from_vec(vec![-1.0, -1.0]), DVector::from_vec(vec![1.0, 1.0])],
                vec![Complex64::new(-1.0, 0.0), Complex64::new(-1.0, 0.0)],
            ),
        ];
        let table = ConnectedTable::from_rows(&samples, rows).unwrap();
        assert_eq!(table.width(), 2);
        assert_eq!(table.n_samples(), 2);
        let (configs, mels) = table.row(0);
        assert_eq!(configs[1], samples.as_slice()[0]);
        assert_eq!(mels[1], Complex64::new(0.0, 0.0));
    }

    #[test]
    fn test_ragged_storage_is_rejected() {
        let c = DVector::from_vec(vec![1.0]);
        let table = ConnectedTable::new(2, 2, vec![c.clone(), c.clone(), c], vec![Complex64::new(1.0, 0.0); 3]);
        assert!(table.is_err());
    }
}
