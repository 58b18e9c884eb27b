use faer::Mat;
use faer::mat::MatRef;
use faer::prelude::Solve;
use faer_traits::ComplexField;
use num_traits::Float;

/// Solves `J * x = -r` for the Gauss-Newton step.
///
/// Square systems go through a full-pivot LU first. If the LU solution comes
/// back non-finite (the pivoted triangular solve divides by a zero pivot when
/// `J` is singular), or the system is rectangular, the step is recomputed as
/// the minimum-norm least-squares solution via an SVD pseudoinverse.
/// Returns `None` only if the SVD itself fails to converge.
pub(crate) fn gauss_newton_step<T>(jacobian: MatRef<'_, T>, residual: &[T]) -> Option<Vec<T>>
where
    T: ComplexField<Real = T> + Float,
{
    let rhs = Mat::from_fn(residual.len(), 1, |i, _| -residual[i]);

    if jacobian.nrows() == jacobian.ncols() {
        let x = lu_solve(jacobian, &rhs);
        if x.iter().all(|v| v.is_finite()) {
            return Some(x);
        }
        log::debug!("full-pivot LU produced a non-finite step, retrying with SVD");
    }

    svd_solve(jacobian, &rhs)
}

fn lu_solve<T>(a: MatRef<'_, T>, rhs: &Mat<T>) -> Vec<T>
where
    T: ComplexField<Real = T> + Float,
{
    let lu = a.full_piv_lu();
    let x = lu.solve(rhs.as_ref());
    x.col(0).iter().copied().collect()
}

/// Minimum-norm least-squares solve through the SVD pseudoinverse.
///
/// Rank is truncated at the LAPACK-style cutoff `eps * max(m, n) * sigma_max`,
/// so directions in the numerical null space contribute nothing to the step.
fn svd_solve<T>(a: MatRef<'_, T>, rhs: &Mat<T>) -> Option<Vec<T>>
where
    T: ComplexField<Real = T> + Float,
{
    let (m, n) = (a.nrows(), a.ncols());
    let svd = a.svd().ok()?;
    let u = svd.U().to_owned();
    let v = svd.V().to_owned();
    let sigma: Vec<T> = svd.S().column_vector().iter().copied().collect();

    let sigma_max = sigma.iter().fold(T::zero(), |acc, &s| acc.max(s));
    let cutoff = T::epsilon() * T::from(m.max(n)).unwrap_or_else(T::one) * sigma_max;

    let mut x = vec![T::zero(); n];
    for (i, &s) in sigma.iter().enumerate().take(m.min(n)) {
        if s <= cutoff {
            continue;
        }
        let mut coef = T::zero();
        for r in 0..m {
            coef = coef + u[(r, i)] * rhs[(r, 0)];
        }
        coef = coef / s;
        for (j, xj) in x.iter_mut().enumerate() {
            *xj = *xj + v[(j, i)] * coef;
        }
    }
    Some(x)
}
