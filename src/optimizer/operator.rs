//! Lazily composed linear operators.
//!
//! `A = QGT + eps·H_sym + diag_shift·I`, where `QGT v = J_cᴴ J_c v / N` and
//! `H_sym` is the Hermitian part of the Hessian correction. Nothing is
//! materialised; every term is evaluated inside [`LinearOperator::apply`].

use nalgebra::DVector;
use num_complex::Complex64;

use crate::error::{check_len, Result, RgnError};
use crate::wavefunction::Ansatz;
use super::hessian::{HessianCorrection, RHessian};
use super::jacobian::CenteredJacobian;

/// A linear map on operator space.
pub trait LinearOperator {
    fn dim(&self) -> usize;

    fn apply(&self, v: &DVector<Complex64>) -> Result<DVector<Complex64>>;
}

/// One summand of a [`CompositeOperator`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum OperatorTerm {
    /// Quantum geometric tensor `J_cᴴ J_c / N`
    Qgt,
    /// Hermitian part of the Hessian correction, times `scale`
    Hessian { scale: f64 },
    /// `shift · I`
    ScaledIdentity(f64),
}

/// Sum of [`OperatorTerm`]s over one batch.
///
/// In the real and complex domains the real-symmetric projection `Re(A)` is
/// applied, C-linearly: `Re(A)(a + ib) = Re(A a) + i Re(A b)`.
pub struct CompositeOperator<'a, A: Ansatz> {
    jacobian: &'a CenteredJacobian<'a, A>,
    hessian: Option<HessianCorrection<'a, A>>,
    terms: Vec<OperatorTerm>,
}

impl<'a, A: Ansatz> CompositeOperator<'a, A> {
    /// `QGT + eps·H_sym + diag_shift·I`. Zero coefficients drop their term.
    pub fn new(
        jacobian: &'a CenteredJacobian<'a, A>,
        rhessian: &'a RHessian<'a, A>,
        eps: f64,
        diag_shift: f64,
    ) -> Result<Self> {
        if !eps.is_finite() || !diag_shift.is_finite() {
            return Err(RgnError::InvalidConfig(format!(
                "operator coefficients must be finite (eps = {}, diag_shift = {})",
                eps, diag_shift
            )));
        }
        let mut op = Self::qgt(jacobian).with_hessian(rhessian)?;
        if eps != 0.0 {
            op = op.with_term(OperatorTerm::Hessian { scale: eps })?;
        }
        if diag_shift != 0.0 {
            op = op.with_term(OperatorTerm::ScaledIdentity(diag_shift))?;
        }
        Ok(op)
    }

    /// The bare QGT.
    pub fn qgt(jacobian: &'a CenteredJacobian<'a, A>) -> Self {
        Self { jacobian, hessian: None, terms: vec![OperatorTerm::Qgt] }
    }

    /// Attach Hessian data so that [`OperatorTerm::Hessian`] can be added.
    pub fn with_hessian(mut self, rhessian: &'a RHessian<'a, A>) -> Result<Self> {
        self.hessian = Some(HessianCorrection::new(self.jacobian, rhessian)?);
        Ok(self)
    }

    pub fn with_term(mut self, term: OperatorTerm) -> Result<Self> {
        if matches!(term, OperatorTerm::Hessian { .. }) && self.hessian.is_none() {
            return Err(RgnError::InvalidConfig("hessian term without hessian data".into()));
        }
        self.terms.push(term);
        Ok(self)
    }

    pub fn terms(&self) -> &[OperatorTerm] {
        &self.terms
    }

    /// Apply the sum of terms without projection.
    fn apply_terms(&self, v: &DVector<Complex64>) -> Result<DVector<Complex64>> {
        let mut out = DVector::zeros(v.len());
        for term in &self.terms {
            match *term {
                OperatorTerm::Qgt => {
                    let n = Complex64::new(self.jacobian.n_samples() as f64, 0.0);
                    out += self.jacobian.vjp(&self.jacobian.jvp(v)?)? / n;
                }
                OperatorTerm::Hessian { scale } => {
                    let hessian = self
                        .hessian
                        .as_ref()
                        .ok_or_else(|| RgnError::InvalidConfig("hessian term without hessian data".into()))?;
                    out += hessian.apply_hermitian(v)? * Complex64::new(scale, 0.0);
                }
                OperatorTerm::ScaledIdentity(shift) => {
                    out += v * Complex64::new(shift, 0.0);
                }
            }
        }
        Ok(out)
    }
}

impl<'a, A: Ansatz> LinearOperator for CompositeOperator<'a, A> {
    fn dim(&self) -> usize {
        self.jacobian.dim()
    }

    fn apply(&self, v: &DVector<Complex64>) -> Result<DVector<Complex64>> {
        check_len("operator input", self.dim(), v.len())?;
        let out = if self.jacobian.domain().uses_real_view() {
            let re = self.apply_terms(&v.map(|c| Complex64::new(c.re, 0.0)))?.map(|c| c.re);
            let im = if v.iter().any(|c| c.im != 0.0) {
                self.apply_terms(&v.map(|c| Complex64::new(c.im, 0.0)))?.map(|c| c.re)
            } else {
                DVector::zeros(v.len())
            };
            re.zip_map(&im, Complex64::new)
        } else {
            self.apply_terms(v)?
        };
        if out.iter().any(|c| !c.is_finite()) {
            return Err(RgnError::NumericalInstability("composite operator product".into()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::diff::{DiffMode, Domain};
    use crate::optimizer::hessian::loss_grad_and_rhessian;
    use crate::optimizer::jacobian::centered_jacobian_and_mean;
    use crate::sampling::{ConfigBatch, ConnectedTable};
    use crate::systems::{Hamiltonian, Ising};
    use crate::wavefunction::{ParamTree, Rbm};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    struct Fixture {
        model: Rbm,
        params: ParamTree,
        samples: ConfigBatch,
        table: ConnectedTable,
    }

    fn fixture(complex: bool, seed: u64) -> Fixture {
        let mut rng = StdRng::seed_from_u64(seed);
        let model = Rbm::new(3, 1).with_complex(complex);
        let params = model.init_params(&mut rng, 0.3).unwrap();
        let samples = ConfigBatch::new(
            (0..10)
                .map(|_| DVector::from_fn(3, |_, _| if rng.gen::<bool>() { 1.0 } else { -1.0 }))
                .collect(),
        );
        let table = Ising::new(3, 1.0, 0.8).unwrap().get_conn_padded(&samples).unwrap();
        Fixture { model, params, samples, table }
    }

    #[test]
    fn test_linearity() {
        for (complex, domain) in [(false, Domain::Real), (true, Domain::Complex), (true, Domain::Holomorphic)] {
            let f = fixture(complex, 51);
            let (jac, _) =
                centered_jacobian_and_mean(&f.model, &f.params, &f.samples, domain, DiffMode::Auto, Some(4))
                    .unwrap();
            let (_, _, rh) = loss_grad_and_rhessian(
                &f.model, &f.params, &f.samples, &f.table, domain, DiffMode::Auto, Some(4),
            )
            .unwrap();
            let op = CompositeOperator::new(&jac, &rh, 0.05, 0.1).unwrap();
            let d = op.dim();
            let v1 = DVector::from_fn(d, |i, _| Complex64::new(1.0 - 0.1 * i as f64, 0.3));
            let v2 = DVector::from_fn(d, |i, _| Complex64::new(0.2 * i as f64, -0.5 + 0.05 * i as f64));
            let a = Complex64::new(0.7, -1.2);
            let b = Complex64::new(-2.0, 0.4);

            let lhs = op.apply(&(&v1 * a + &v2 * b)).unwrap();
            let rhs = op.apply(&v1).unwrap() * a + op.apply(&v2).unwrap() * b;
            for (x, y) in lhs.iter().zip(rhs.iter()) {
                assert_relative_eq!(x.re, y.re, epsilon = 1e-10);
                assert_relative_eq!(x.im, y.im, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_real_view_operator_is_symmetric_and_real() {
        let f = fixture(true, 52);
        let (jac, _) =
            centered_jacobian_and_mean(&f.model, &f.params, &f.samples, Domain::Complex, DiffMode::Reverse, None)
                .unwrap();
        let (_, _, rh) =
            loss_grad_and_rhessian(&f.model, &f.params, &f.samples, &f.table, Domain::Complex, DiffMode::Reverse, None)
                .unwrap();
        let op = CompositeOperator::new(&jac, &rh, 0.1, 0.0).unwrap();
        let d = op.dim();
        let cols: Vec<DVector<Complex64>> = (0..d)
            .map(|j| {
                let mut e = DVector::zeros(d);
                e[j] = Complex64::new(1.0, 0.0);
                op.apply(&e).unwrap()
            })
            .collect();
        for i in 0..d {
            for j in 0..d {
                assert_eq!(cols[j][i].im, 0.0);
                assert_relative_eq!(cols[j][i].re, cols[i][j].re, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_zero_eps_is_shifted_qgt() {
        let f = fixture(false, 53);
        let (jac, _) =
            centered_jacobian_and_mean(&f.model, &f.params, &f.samples, Domain::Real, DiffMode::Auto, None).unwrap();
        let (_, _, rh) =
            loss_grad_and_rhessian(&f.model, &f.params, &f.samples, &f.table, Domain::Real, DiffMode::Auto, None)
                .unwrap();
        let op = CompositeOperator::new(&jac, &rh, 0.0, 0.25).unwrap();
        assert_eq!(op.terms(), &[OperatorTerm::Qgt, OperatorTerm::ScaledIdentity(0.25)]);

        let v = DVector::from_fn(op.dim(), |i, _| Complex64::new(i as f64 - 2.0, 0.0));
        let expected = jac.vjp(&jac.jvp(&v).unwrap()).unwrap() / Complex64::new(10.0, 0.0) + &v * Complex64::new(0.25, 0.0);
        let got = op.apply(&v).unwrap();
        for (x, y) in got.iter().zip(expected.iter()) {
            assert_relative_eq!(x.re, y.re, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_hessian_term_requires_data() {
        let f = fixture(false, 54);
        let (jac, _) =
            centered_jacobian_and_mean(&f.model, &f.params, &f.samples, Domain::Real, DiffMode::Auto, None).unwrap();
        assert!(CompositeOperator::qgt(&jac).with_term(OperatorTerm::Hessian { scale: 1.0 }).is_err());
        assert!(CompositeOperator::qgt(&jac).with_term(OperatorTerm::ScaledIdentity(1.0)).is_ok());
    }

    #[test]
    fn test_wrong_input_length() {
        let f = fixture(false, 55);
        let (jac, _) =
            centered_jacobian_and_mean(&f.model, &f.params, &f.samples, Domain::Real, DiffMode::Auto, None).unwrap();
        let op = CompositeOperator::qgt(&jac);
        assert!(op.apply(&DVector::zeros(op.dim() + 1)).is_err());
    }
}
