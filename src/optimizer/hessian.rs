//! Loss statistics, loss gradient and the Rayleigh Hessian correction.
//!
//! With weights `w_kj = mel_kj · ψ(x'_kj) / ψ(x_k)` the local energy is
//! `E_loc(x_k) = Σ_j w_kj`. The Hessian correction applied on top of the QGT
//! is
//!
//!   H v = (1/N) J_cᴴ b(v),   b_k(v) = Σ_j w_kj O(x'_kj)·v − E_loc,k (Ō·v) − E (J_c v)_k
//!
//! i.e. `⟨Δ O* (Ĥ − E) Δ O⟩`, used through its Hermitian part.

use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{check_len, Result, RgnError};
use crate::sampling::{ConfigBatch, ConnectedTable};
use crate::wavefunction::{Ansatz, ParamTree};
use super::diff::{DiffMode, Differentiator, Domain};
use super::jacobian::{check_chunk_size, for_each_chunked, CenteredJacobian};

/// Monte Carlo statistics of the local energy.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub struct LossStats {
    /// Mean local energy
    pub mean: Complex64,
    /// `Σ |E_loc − E|² / N`
    pub variance: f64,
    /// Standard error of the mean
    pub error_of_mean: f64,
    pub n_samples: usize,
}

impl LossStats {
    pub fn from_local_energies(e_loc: &[Complex64]) -> Result<Self> {
        if e_loc.is_empty() {
            return Err(RgnError::InvalidConfig("no local energies to average".into()));
        }
        let n = e_loc.len() as f64;
        let mean = e_loc.iter().sum::<Complex64>() / n;
        let variance = e_loc.iter().map(|e| (e - mean).norm_sqr()).sum::<f64>() / n;
        Ok(Self { mean, variance, error_of_mean: (variance / n).sqrt(), n_samples: e_loc.len() })
    }
}

/// Implicit Rayleigh-Hessian data for one batch.
pub struct RHessian<'a, A: Ansatz> {
    diff: Differentiator<'a, A>,
    connected: &'a ConnectedTable,
    weights: Vec<Complex64>,
    e_loc: Vec<Complex64>,
    loss: Complex64,
    force: DVector<Complex64>,
    chunk_size: Option<usize>,
}

impl<'a, A: Ansatz> RHessian<'a, A> {
    pub fn n_samples(&self) -> usize {
        self.e_loc.len()
    }

    pub fn dim(&self) -> usize {
        self.diff.dim()
    }

    pub fn local_energies(&self) -> &[Complex64] {
        &self.e_loc
    }

    pub fn loss(&self) -> Complex64 {
        self.loss
    }

    /// `F = (1/N) Σ_k conj(O_k) (E_loc,k − E)` in operator space.
    pub fn force(&self) -> &DVector<Complex64> {
        &self.force
    }

    /// `w_kj`; zero on padding entries.
    pub fn weights(&self, k: usize) -> &[Complex64] {
        let width = self.connected.width();
        &self.weights[k * width..(k + 1) * width]
    }

    /// `c_k = Σ_j w_kj O(x'_kj)·v`, one entry per sample.
    pub fn connected_jvp(&self, v: &DVector<Complex64>) -> Result<DVector<Complex64>> {
        check_len("connected jvp", self.dim(), v.len())?;
        let mut out = DVector::zeros(self.n_samples());
        for_each_chunked(
            self.n_samples(),
            self.chunk_size,
            |k| {
                let (configs, _) = self.connected.row(k);
                let mut acc = Complex64::new(0.0, 0.0);
                for (config, w) in configs.iter().zip(self.weights(k)) {
                    if *w != Complex64::new(0.0, 0.0) {
                        acc += *w * self.diff.jvp_row(config, v)?;
                    }
                }
                Ok(acc)
            },
            |k, value| {
                out[k] = value;
                Ok(())
            },
        )?;
        Ok(out)
    }

    /// `Σ_k a_k Σ_j conj(w_kj) conj(O(x'_kj))`, the adjoint of
    /// [`RHessian::connected_jvp`].
    pub fn connected_vjp(&self, a: &DVector<Complex64>) -> Result<DVector<Complex64>> {
        check_len("connected vjp", self.n_samples(), a.len())?;
        let dim = self.dim();
        let mut acc = DVector::zeros(dim);
        for_each_chunked(
            self.n_samples(),
            self.chunk_size,
            |k| {
                let (configs, _) = self.connected.row(k);
                let mut row = DVector::zeros(dim);
                for (config, w) in configs.iter().zip(self.weights(k)) {
                    if *w != Complex64::new(0.0, 0.0) {
                        row += self.diff.gradient_row(config)? * *w;
                    }
                }
                Ok(row)
            },
            |k, row: DVector<Complex64>| {
                acc += row.conjugate() * a[k];
                Ok(())
            },
        )?;
        Ok(acc)
    }
}

/// The Hessian correction `H` built from a centered Jacobian and Rayleigh
/// Hessian data of the same batch.
pub struct HessianCorrection<'a, A: Ansatz> {
    jacobian: &'a CenteredJacobian<'a, A>,
    rhessian: &'a RHessian<'a, A>,
}

impl<'a, A: Ansatz> HessianCorrection<'a, A> {
    pub fn new(jacobian: &'a CenteredJacobian<'a, A>, rhessian: &'a RHessian<'a, A>) -> Result<Self> {
        check_len("hessian samples", jacobian.n_samples(), rhessian.n_samples())?;
        check_len("hessian dimension", jacobian.dim(), rhessian.dim())?;
        Ok(Self { jacobian, rhessian })
    }

    pub fn dim(&self) -> usize {
        self.jacobian.dim()
    }

    fn n(&self) -> Complex64 {
        Complex64::new(self.jacobian.n_samples() as f64, 0.0)
    }

    /// `H v`
    pub fn apply(&self, v: &DVector<Complex64>) -> Result<DVector<Complex64>> {
        let jv = self.jacobian.jvp(v)?;
        let mean_v = self.jacobian.mean_row().dot(v);
        let loss = self.rhessian.loss();
        let mut b = self.rhessian.connected_jvp(v)?;
        for (k, bk) in b.iter_mut().enumerate() {
            *bk -= self.rhessian.local_energies()[k] * mean_v + loss * jv[k];
        }
        Ok(self.jacobian.vjp(&b)? / self.n())
    }

    /// `Hᴴ v`
    pub fn apply_adjoint(&self, v: &DVector<Complex64>) -> Result<DVector<Complex64>> {
        let a = self.jacobian.jvp(v)?;
        let e_loc_dot: Complex64 = self
            .rhessian
            .local_energies()
            .iter()
            .zip(a.iter())
            .map(|(e, ak)| e.conj() * ak)
            .sum();
        let connected = self.rhessian.connected_vjp(&a)?;
        let local = self.jacobian.mean_row().conjugate() * e_loc_dot;
        let centered = self.jacobian.vjp(&a)? * self.rhessian.loss().conj();
        Ok((connected - local - centered) / self.n())
    }

    /// `(H + Hᴴ) v / 2`
    pub fn apply_hermitian(&self, v: &DVector<Complex64>) -> Result<DVector<Complex64>> {
        Ok((self.apply(v)? + self.apply_adjoint(v)?) * Complex64::new(0.5, 0.0))
    }
}

/// Local energies, loss statistics, the loss gradient and Rayleigh Hessian
/// data for one batch.
///
/// The gradient is `2 Re F` per real degree of freedom in the real and
/// complex domains and `F` in the holomorphic domain, returned with the
/// dtypes of `params`.
pub fn loss_grad_and_rhessian<'a, A: Ansatz>(
    ansatz: &'a A,
    params: &'a ParamTree,
    samples: &'a ConfigBatch,
    connected: &'a ConnectedTable,
    domain: Domain,
    diff_mode: DiffMode,
    chunk_size: Option<usize>,
) -> Result<(LossStats, ParamTree, RHessian<'a, A>)> {
    check_chunk_size(chunk_size)?;
    check_len("connected table rows", samples.len(), connected.n_samples())?;
    if samples.is_empty() {
        return Err(RgnError::InvalidConfig("empty sample batch".into()));
    }
    let diff = Differentiator::new(ansatz, params, domain, diff_mode, samples.len())?;
    let configs = samples.as_slice();
    let width = connected.width();

    let mut weights = Vec::with_capacity(configs.len() * width);
    let mut e_loc = Vec::with_capacity(configs.len());
    for_each_chunked(
        configs.len(),
        chunk_size,
        |k| {
            let log_psi = diff.log_psi(&configs[k])?;
            if !log_psi.is_finite() {
                return Err(RgnError::NumericalInstability(format!("log-amplitude of sample {}", k)));
            }
            let (conns, mels) = connected.row(k);
            let mut row = Vec::with_capacity(width);
            for (conn, mel) in conns.iter().zip(mels) {
                if *mel == Complex64::new(0.0, 0.0) {
                    row.push(Complex64::new(0.0, 0.0));
                    continue;
                }
                let log_psi_conn = diff.log_psi(conn)?;
                if !log_psi_conn.is_finite() {
                    return Err(RgnError::NumericalInstability(format!(
                        "log-amplitude of a configuration connected to sample {}",
                        k
                    )));
                }
                row.push(*mel * (log_psi_conn - log_psi).exp());
            }
            Ok(row)
        },
        |_, row| {
            e_loc.push(row.iter().sum::<Complex64>());
            weights.extend(row);
            Ok(())
        },
    )?;

    let stats = LossStats::from_local_energies(&e_loc)?;
    if !stats.mean.is_finite() || !stats.variance.is_finite() {
        return Err(RgnError::NumericalInstability("local energy statistics".into()));
    }

    let mut force = DVector::zeros(diff.dim());
    for_each_chunked(
        configs.len(),
        chunk_size,
        |k| diff.gradient_row(&configs[k]),
        |k, row: DVector<Complex64>| {
            force += row.conjugate() * (e_loc[k] - stats.mean);
            Ok(())
        },
    )?;
    force /= Complex64::new(configs.len() as f64, 0.0);
    if force.iter().any(|c| !c.is_finite()) {
        return Err(RgnError::NumericalInstability("loss gradient".into()));
    }

    let gradient = if domain.uses_real_view() {
        params.with_real_vec(&force.map(|c| 2.0 * c.re))?
    } else {
        params.unravel_like(&force)?
    };
    debug!(
        energy = stats.mean.re,
        variance = stats.variance,
        width,
        "local energies and rayleigh hessian ready"
    );

    let rhessian = RHessian { diff, connected, weights, e_loc, loss: stats.mean, force, chunk_size };
    Ok((stats, gradient, rhessian))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::jacobian::centered_jacobian_and_mean;
    use crate::systems::{Hamiltonian, Ising};
    use crate::wavefunction::{Jastrow, Rbm};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_batch(rng: &mut StdRng, n_sites: usize, n: usize) -> ConfigBatch {
        ConfigBatch::new(
            (0..n)
                .map(|_| DVector::from_fn(n_sites, |_, _| if rng.gen::<bool>() { 1.0 } else { -1.0 }))
                .collect(),
        )
    }

    #[test]
    fn test_local_energy_matches_dense_hamiltonian() {
        let mut rng = StdRng::seed_from_u64(41);
        let model = Jastrow::new(3).with_phase(true);
        let params = model.init_params(&mut rng, 0.4).unwrap();
        let ham = Ising::new(3, 1.0, 0.7).unwrap().with_pbc(true);
        let dense = ham.to_dense().unwrap();
        let samples = ConfigBatch::new((0..8).map(|i| ham.config_from_index(i)).collect());
        let table = ham.get_conn_padded(&samples).unwrap();

        let (_, _, rh) =
            loss_grad_and_rhessian(&model, &params, &samples, &table, Domain::Real, DiffMode::Auto, None).unwrap();
        let psi: Vec<Complex64> = (0..8).map(|i| model.log_psi(&params, &ham.config_from_index(i)).unwrap().exp()).collect();
        for k in 0..8 {
            let expected: Complex64 = (0..8).map(|j| psi[j] * dense[(k, j)]).sum::<Complex64>() / psi[k];
            assert_relative_eq!(rh.local_energies()[k].re, expected.re, epsilon = 1e-10);
            assert_relative_eq!(rh.local_energies()[k].im, expected.im, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_loss_statistics() {
        let e = [Complex64::new(1.0, 0.0), Complex64::new(3.0, 0.0)];
        let stats = LossStats::from_local_energies(&e).unwrap();
        assert_relative_eq!(stats.mean.re, 2.0);
        assert_relative_eq!(stats.variance, 1.0);
        assert_relative_eq!(stats.error_of_mean, 0.5f64.sqrt());
        assert_eq!(stats.n_samples, 2);
    }

    #[test]
    fn test_gradient_is_twice_real_force() {
        let mut rng = StdRng::seed_from_u64(42);
        let model = Rbm::new(3, 1);
        let params = model.init_params(&mut rng, 0.3).unwrap();
        let ham = Ising::new(3, 1.0, 1.0).unwrap();
        let samples = random_batch(&mut rng, 3, 16);
        let table = ham.get_conn_padded(&samples).unwrap();

        let (stats, grad, rh) =
            loss_grad_and_rhessian(&model, &params, &samples, &table, Domain::Real, DiffMode::Reverse, Some(3))
                .unwrap();
        assert_eq!(stats.n_samples, 16);
        params.check_isomorphic(&grad).unwrap();
        assert!(!grad.has_complex_leaves());
        let flat = grad.to_real_vec();
        for (g, f) in flat.iter().zip(rh.force().iter()) {
            assert_relative_eq!(*g, 2.0 * f.re, epsilon = 1e-12);
        }

        // force via the centered Jacobian: J_cᴴ (E_loc − E) / N
        let (jac, _) =
            centered_jacobian_and_mean(&model, &params, &samples, Domain::Real, DiffMode::Reverse, None).unwrap();
        let centered = DVector::from_iterator(16, rh.local_energies().iter().map(|e| e - stats.mean));
        let via_jac = jac.vjp(&centered).unwrap() / Complex64::new(16.0, 0.0);
        for (a, b) in via_jac.iter().zip(rh.force().iter()) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-10);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_adjoint_consistency() {
        let mut rng = StdRng::seed_from_u64(43);
        let model = Rbm::new(3, 1).with_complex(true);
        let params = model.init_params(&mut rng, 0.3).unwrap();
        let ham = Ising::new(3, 1.0, 0.5).unwrap();
        let samples = random_batch(&mut rng, 3, 12);
        let table = ham.get_conn_padded(&samples).unwrap();
        for domain in [Domain::Complex, Domain::Holomorphic] {
            let (jac, _) =
                centered_jacobian_and_mean(&model, &params, &samples, domain, DiffMode::Reverse, Some(5)).unwrap();
            let (_, _, rh) =
                loss_grad_and_rhessian(&model, &params, &samples, &table, domain, DiffMode::Reverse, Some(5))
                    .unwrap();
            let h = HessianCorrection::new(&jac, &rh).unwrap();
            let u = DVector::from_fn(h.dim(), |i, _| Complex64::new(0.5 - 0.1 * i as f64, 0.2 * i as f64));
            let v = DVector::from_fn(h.dim(), |i, _| Complex64::new(0.3 * i as f64, 1.0));
            // ⟨u, H v⟩ = ⟨Hᴴ u, v⟩
            let lhs = u.dotc(&h.apply(&v).unwrap());
            let rhs = h.apply_adjoint(&u).unwrap().dotc(&v);
            assert_relative_eq!(lhs.re, rhs.re, epsilon = 1e-10);
            assert_relative_eq!(lhs.im, rhs.im, epsilon = 1e-10);

            let sym = u.dotc(&h.apply_hermitian(&v).unwrap());
            let sym_t = h.apply_hermitian(&u).unwrap().dotc(&v);
            assert_relative_eq!(sym.re, sym_t.re, epsilon = 1e-10);
            assert_relative_eq!(sym.im, sym_t.im, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_padding_contributes_nothing() {
        let mut rng = StdRng::seed_from_u64(44);
        let model = Jastrow::new(3);
        let params = model.init_params(&mut rng, 0.3).unwrap();
        let ham = Ising::new(3, 1.0, 1.0).unwrap();
        // [1, 1, -1] has no diagonal entry, so its row carries one padding slot
        let samples = ConfigBatch::new(vec![
            DVector::from_vec(vec![1.0, 1.0, -1.0]),
            DVector::from_vec(vec![1.0, -1.0, 1.0]),
        ]);
        let table = ham.get_conn_padded(&samples).unwrap();
        let (_, _, rh) =
            loss_grad_and_rhessian(&model, &params, &samples, &table, Domain::Real, DiffMode::Auto, None).unwrap();
        assert_eq!(rh.weights(0)[3], Complex64::new(0.0, 0.0));

        let (conns, mels) = ham.get_conn(&samples.as_slice()[0]).unwrap();
        let log_psi = model.log_psi(&params, &samples.as_slice()[0]).unwrap();
        let expected: Complex64 = conns
            .iter()
            .zip(mels.iter())
            .map(|(c, m)| m * (model.log_psi(&params, c).unwrap() - log_psi).exp())
            .sum();
        assert_relative_eq!(rh.local_energies()[0].re, expected.re, epsilon = 1e-12);
    }

    /// Jastrow whose amplitude vanishes (log ψ = NaN) once site 0 is down.
    struct Vanishing(Jastrow);

    impl Ansatz for Vanishing {
        fn log_psi(&self, params: &ParamTree, config: &crate::sampling::Configuration) -> Result<Complex64> {
            if config[0] < 0.0 {
                Ok(Complex64::new(f64::NAN, 0.0))
            } else {
                self.0.log_psi(params, config)
            }
        }

        fn log_derivatives(
            &self,
            params: &ParamTree,
            config: &crate::sampling::Configuration,
        ) -> Result<DVector<Complex64>> {
            let grad = self.0.log_derivatives(params, config)?;
            if config[0] < 0.0 {
                Ok(grad.map(|_| Complex64::new(f64::NAN, 0.0)))
            } else {
                Ok(grad)
            }
        }
    }

    #[test]
    fn test_non_finite_log_amplitude_is_an_error() {
        let model = Vanishing(Jastrow::new(2));
        let params = model.0.zero_params();
        let ham = Ising::new(2, 1.0, 1.0).unwrap();

        // the sample itself
        let samples = ConfigBatch::new(vec![DVector::from_vec(vec![-1.0, 1.0])]);
        let table = ham.get_conn_padded(&samples).unwrap();
        match loss_grad_and_rhessian(&model, &params, &samples, &table, Domain::Real, DiffMode::Reverse, None) {
            Err(RgnError::NumericalInstability(msg)) => assert!(msg.contains("sample 0") && !msg.contains("connected")),
            _ => panic!("expected a numerical instability for sample 0"),
        }

        // a finite sample whose spin flip on site 0 vanishes
        let samples = ConfigBatch::new(vec![DVector::from_vec(vec![1.0, -1.0])]);
        let table = ham.get_conn_padded(&samples).unwrap();
        match loss_grad_and_rhessian(&model, &params, &samples, &table, Domain::Real, DiffMode::Reverse, Some(1)) {
            Err(RgnError::NumericalInstability(msg)) => assert!(msg.contains("connected to sample 0")),
            _ => panic!("expected a numerical instability for a connected configuration"),
        }

        // padding never evaluates the model: zero field leaves only the diagonal
        let diagonal_only = Ising::new(2, 1.0, 0.0).unwrap();
        let table = diagonal_only.get_conn_padded(&samples).unwrap();
        let (stats, _, _) =
            loss_grad_and_rhessian(&model, &params, &samples, &table, Domain::Real, DiffMode::Reverse, None).unwrap();
        assert_relative_eq!(stats.mean.re, 1.0);
    }

    #[test]
    fn test_jacobian_rejects_non_finite_derivatives() {
        let model = Vanishing(Jastrow::new(2));
        let params = model.0.zero_params();
        let samples = ConfigBatch::new(vec![DVector::from_vec(vec![1.0, 1.0]), DVector::from_vec(vec![-1.0, 1.0])]);
        let res = centered_jacobian_and_mean(&model, &params, &samples, Domain::Real, DiffMode::Reverse, Some(1));
        assert!(matches!(res, Err(RgnError::NumericalInstability(_))));
    }

    #[test]
    fn test_shape_mismatch() {
        let model = Jastrow::new(2);
        let params = model.zero_params();
        let ham = Ising::new(2, 1.0, 1.0).unwrap();
        let samples = ConfigBatch::new(vec![DVector::from_vec(vec![1.0, 1.0]), DVector::from_vec(vec![1.0, -1.0])]);
        let fewer = ConfigBatch::new(vec![DVector::from_vec(vec![1.0, 1.0])]);
        let table = ham.get_conn_padded(&fewer).unwrap();
        let res = loss_grad_and_rhessian(&model, &params, &samples, &table, Domain::Real, DiffMode::Auto, None);
        assert!(matches!(res, Err(RgnError::ShapeMismatch { .. })));
    }
}
