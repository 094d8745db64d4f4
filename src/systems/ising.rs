//! Transverse-field Ising chain.
//!
//! H = -J Σ⟨ij⟩ σᶻᵢ σᶻⱼ - h Σᵢ σˣᵢ

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{check_len, Result, RgnError};
use crate::sampling::Configuration;
use super::traits::Hamiltonian;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Ising {
    /// Number of spins
    pub n_sites: usize,
    /// Nearest-neighbour coupling
    pub j: f64,
    /// Transverse field
    pub h: f64,
    /// Periodic boundary conditions
    pub pbc: bool,
}

impl Ising {
    /// Largest chain `to_dense` accepts (a 4096 × 4096 matrix).
    pub const MAX_DENSE_SITES: usize = 12;

    pub fn new(n_sites: usize, j: f64, h: f64) -> Result<Self> {
        if n_sites == 0 {
            return Err(RgnError::InvalidConfig("ising chain needs at least one site".into()));
        }
        Ok(Self { n_sites, j, h, pbc: false })
    }

    pub fn with_pbc(mut self, pbc: bool) -> Self {
        self.pbc = pbc;
        self
    }

    fn bonds(&self) -> Vec<(usize, usize)> {
        let mut bonds: Vec<(usize, usize)> = (0..self.n_sites.saturating_sub(1)).map(|i| (i, i + 1)).collect();
        // a two-site ring would count the same bond twice
        if self.pbc && self.n_sites > 2 {
            bonds.push((self.n_sites - 1, 0));
        }
        bonds
    }

    fn diagonal(&self, config: &Configuration) -> f64 {
        -self.j * self.bonds().iter().map(|&(a, b)| config[a] * config[b]).sum::<f64>()
    }

    /// Basis state for index `idx`; bit `i` set means spin `i` is down.
    pub fn config_from_index(&self, idx: usize) -> Configuration {
        DVector::from_fn(self.n_sites, |i, _| {
            if idx.checked_shr(i as u32).map_or(false, |b| b & 1 == 1) {
                -1.0
            } else {
                1.0
            }
        })
    }

    /// Inverse of `config_from_index`; chains of at most `MAX_DENSE_SITES`.
    fn index_of(&self, config: &Configuration) -> usize {
        config
            .iter()
            .enumerate()
            .filter(|(_, s)| **s < 0.0)
            .fold(0, |acc, (i, _)| acc | (1 << i))
    }

    /// Dense matrix in the `config_from_index` basis, for chains of at most
    /// [`Ising::MAX_DENSE_SITES`] sites.
    pub fn to_dense(&self) -> Result<DMatrix<f64>> {
        if self.n_sites > Self::MAX_DENSE_SITES {
            return Err(RgnError::InvalidConfig(format!(
                "dense ising matrix limited to {} sites, got {}",
                Self::MAX_DENSE_SITES,
                self.n_sites
            )));
        }
        let dim = 1usize << self.n_sites;
        let mut mat = DMatrix::zeros(dim, dim);
        for col in 0..dim {
            let config = self.config_from_index(col);
            let (conns, mels) = self.get_conn(&config)?;
            for (conn, mel) in conns.iter().zip(mels.iter()) {
                mat[(self.index_of(conn), col)] += mel.re;
            }
        }
        Ok(mat)
    }
}

impl Hamiltonian for Ising {
    fn n_sites(&self) -> usize {
        self.n_sites
    }

    fn get_conn(&self, config: &Configuration) -> Result<(Vec<Configuration>, Vec<Complex64>)> {
        check_len("ising configuration", self.n_sites, config.len())?;
        let mut conns = Vec::with_capacity(self.n_sites + 1);
        let mut mels = Vec::with_capacity(self.n_sites + 1);

        let diag = self.diagonal(config);
        if diag != 0.0 {
            conns.push(config.clone());
            mels.push(Complex64::new(diag, 0.0));
        }
        if self.h != 0.0 {
            for i in 0..self.n_sites {
                let mut flipped = config.clone();
                flipped[i] = -flipped[i];
                conns.push(flipped);
                mels.push(Complex64::new(-self.h, 0.0));
            }
        }
        Ok((conns, mels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::ConfigBatch;
    use approx::assert_relative_eq;

    #[test]
    fn test_two_site_ground_energy() {
        let ham = Ising::new(2, 1.0, 0.5).unwrap();
        let dense = ham.to_dense().unwrap();
        assert_relative_eq!(dense.clone(), dense.transpose(), epsilon = 1e-14);
        let eig = dense.symmetric_eigen();
        let e0 = eig.eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min);
        assert_relative_eq!(e0, -(1.0f64 + 4.0 * 0.25).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_zero_diagonal_is_omitted() {
        let ham = Ising::new(3, 1.0, 1.0).unwrap();
        let (conns, _) = ham.get_conn(&DVector::from_vec(vec![1.0, 1.0, -1.0])).unwrap();
        assert_eq!(conns.len(), 3);
        let (conns, mels) = ham.get_conn(&DVector::from_vec(vec![1.0, -1.0, 1.0])).unwrap();
        assert_eq!(conns.len(), 4);
        assert_relative_eq!(mels[0].re, 2.0);
    }

    #[test]
    fn test_padded_table_has_common_width() {
        let ham = Ising::new(3, 1.0, 1.0).unwrap();
        let samples = ConfigBatch::new(vec![
            DVector::from_vec(vec![1.0, 1.0, -1.0]),
            DVector::from_vec(vec![1.0, -1.0, 1.0]),
        ]);
        let table = ham.get_conn_padded(&samples).unwrap();
        assert_eq!(table.width(), 4);
        let (configs, mels) = table.row(0);
        assert_eq!(configs[3], samples.as_slice()[0]);
        assert_eq!(mels[3], Complex64::new(0.0, 0.0));
    }

    #[test]
    fn test_dense_matrix_size_is_bounded() {
        let small = Ising::new(Ising::MAX_DENSE_SITES, 1.0, 1.0).unwrap();
        assert_eq!(small.config_from_index(1).len(), Ising::MAX_DENSE_SITES);
        let long = Ising::new(100, 1.0, 1.0).unwrap().config_from_index(1);
        assert_eq!(long[0], -1.0);
        assert!(long.iter().skip(1).all(|&s| s == 1.0));
        for n in [Ising::MAX_DENSE_SITES + 1, 64, 100] {
            let ham = Ising::new(n, 1.0, 1.0).unwrap();
            assert!(matches!(ham.to_dense(), Err(RgnError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_wrong_config_length() {
        let ham = Ising::new(3, 1.0, 1.0).unwrap();
        assert!(ham.get_conn(&DVector::from_vec(vec![1.0, 1.0])).is_err());
    }
}
