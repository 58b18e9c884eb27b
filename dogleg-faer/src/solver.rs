use faer::mat::MatRef;
use faer_traits::ComplexField;
use num_traits::{Float, NumCast, One, ToPrimitive, Zero};

use super::MappedSystem;
use crate::linalg::gauss_newton_step;

/// Tolerances and limits for the dogleg loop.
#[derive(Clone, Copy, Debug)]
pub struct DoglegCfg<T> {
    /// Success once `||r||_inf <= tol_f * scaling`.
    pub tol_f: T,
    /// Success once `||J^T r||_inf <= tol_g`.
    pub tol_g: T,
    /// Stop once the trust radius has collapsed below this.
    pub tol_x: T,
    pub max_iter: usize,
    /// Initial trust radius.
    pub delta: T,
    /// Bail out with [`SolveStatus::HighDifferential`] when any Jacobian
    /// entry exceeds this after a step. Set to infinity to disable.
    pub differential_limit: T,
}

impl<T: Float> Default for DoglegCfg<T> {
    fn default() -> Self {
        Self {
            tol_f: T::from(1e-5).expect("type must represent the default tolerances"),
            tol_g: T::from(1e-80).unwrap_or_else(T::zero),
            tol_x: T::from(1e-10).expect("type must represent the default tolerances"),
            max_iter: 10_000,
            delta: T::from(5.0).expect("type must represent the default trust radius"),
            differential_limit: T::from(3.0).expect("type must represent the default limit"),
        }
    }
}

impl<T: Float> DoglegCfg<T> {
    pub fn with_tol_f(mut self, tol_f: T) -> Self {
        self.tol_f = tol_f;
        self
    }
    pub fn with_tol_g(mut self, tol_g: T) -> Self {
        self.tol_g = tol_g;
        self
    }
    pub fn with_tol_x(mut self, tol_x: T) -> Self {
        self.tol_x = tol_x;
        self
    }
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }
    pub fn with_delta(mut self, delta: T) -> Self {
        self.delta = delta;
        self
    }
    pub fn with_differential_limit(mut self, limit: T) -> Self {
        self.differential_limit = limit;
        self
    }
    /// Never bail out on large Jacobian entries.
    pub fn without_differential_limit(mut self) -> Self {
        self.differential_limit = T::infinity();
        self
    }
}

/// Why the dogleg loop stopped. `code()` gives the classic numeric form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveStatus {
    /// A Jacobian entry exceeded the differential limit after a step; the
    /// caller should re-parametrize (re-baseline cluster rotations) and retry.
    HighDifferential,
    /// `||r||_inf` converged below tolerance.
    ResidualConverged,
    /// `||J^T r||_inf` converged below tolerance (stationary point).
    GradientConverged,
    /// The trust region collapsed; no further progress possible.
    TrustRegionCollapsed,
    /// Iteration budget exhausted.
    IterationLimit,
    /// The system has no parameters or no equations.
    InvalidSystem,
    /// The residual diverged or became NaN.
    Diverged,
}

impl SolveStatus {
    pub fn code(self) -> u8 {
        match self {
            SolveStatus::HighDifferential => 0,
            SolveStatus::ResidualConverged => 1,
            SolveStatus::GradientConverged => 2,
            SolveStatus::TrustRegionCollapsed => 3,
            SolveStatus::IterationLimit => 4,
            SolveStatus::InvalidSystem => 5,
            SolveStatus::Diverged => 6,
        }
    }

    /// Stationary-point and trust-region termination count as success; the
    /// residual may simply be irreducible (over-constrained systems).
    pub fn is_success(self) -> bool {
        matches!(
            self,
            SolveStatus::ResidualConverged
                | SolveStatus::GradientConverged
                | SolveStatus::TrustRegionCollapsed
        )
    }
}

/// Outcome of one dogleg run. The system retains whatever state the final
/// iteration left behind, readable regardless of status.
#[derive(Clone, Copy, Debug)]
pub struct SolveReport<T> {
    pub status: SolveStatus,
    pub iterations: usize,
    /// `||r||_2` at termination.
    pub residual: T,
    /// Rejected (rolled-back) steps.
    pub unused_steps: usize,
}

fn norm_l2<T: Float>(v: &[T]) -> T {
    v.iter()
        .map(|&x| x * x)
        .fold(T::zero(), |a, b| a + b)
        .sqrt()
}

fn norm_inf<T: Float>(v: &[T]) -> T {
    // NaN must propagate so the divergence test can see it; Float::max would
    // silently drop it.
    v.iter().map(|&x| x.abs()).fold(T::zero(), |a, b| {
        if b.is_nan() {
            b
        } else if b > a {
            b
        } else {
            a
        }
    })
}

fn mat_norm_inf<T: Float>(m: MatRef<'_, T>) -> T {
    let mut max = T::zero();
    for j in 0..m.ncols() {
        for i in 0..m.nrows() {
            let a = m[(i, j)].abs();
            if a > max {
                max = a;
            }
        }
    }
    max
}

fn dot<T: Float>(a: &[T], b: &[T]) -> T {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| x * y)
        .fold(T::zero(), |acc, v| acc + v)
}

/// `J * v`
fn mat_vec<T: Float>(m: MatRef<'_, T>, v: &[T]) -> Vec<T> {
    let mut out = vec![T::zero(); m.nrows()];
    for j in 0..m.ncols() {
        let vj = v[j];
        for (i, oi) in out.iter_mut().enumerate() {
            *oi = *oi + m[(i, j)] * vj;
        }
    }
    out
}

/// `J^T * v`
fn mat_t_vec<T: Float>(m: MatRef<'_, T>, v: &[T]) -> Vec<T> {
    let mut out = vec![T::zero(); m.ncols()];
    for (j, oj) in out.iter_mut().enumerate() {
        let mut acc = T::zero();
        for i in 0..m.nrows() {
            acc = acc + m[(i, j)] * v[i];
        }
        *oj = acc;
    }
    out
}

/// Computes the dogleg step for the current gradient, Jacobian and residual.
///
/// Takes the Gauss-Newton step when it fits inside the trust region, the
/// clipped steepest-descent step when even the Cauchy point lies outside,
/// and otherwise the blend point on the segment between the two.
pub fn dogleg_step<T>(g: &[T], jacobian: MatRef<'_, T>, residual: &[T], delta: T) -> Vec<T>
where
    T: ComplexField<Real = T> + Float,
{
    let jg = mat_vec(jacobian, g);
    let alpha = dot(g, g) / dot(&jg, &jg);
    let h_sd: Vec<T> = g.iter().map(|&x| -x).collect();

    let h_gn = gauss_newton_step(jacobian, residual);
    if let Some(ref h) = h_gn {
        if norm_l2(h) <= delta {
            return h.clone();
        }
    }

    let sd_norm = norm_l2(&h_sd);
    if !alpha.is_finite() || alpha * sd_norm >= delta || h_gn.is_none() {
        // clip steepest descent to the trust-region boundary
        return h_sd.iter().map(|&x| (delta / sd_norm) * x).collect();
    }

    // blend: a = alpha*h_sd, b = h_gn, step = a + beta*(b - a) with
    // ||step|| = delta
    let b = h_gn.unwrap_or_default();
    let a: Vec<T> = h_sd.iter().map(|&x| alpha * x).collect();
    let bma: Vec<T> = b.iter().zip(a.iter()).map(|(&bi, &ai)| bi - ai).collect();
    let c = dot(&a, &bma);
    let bas = dot(&bma, &bma);
    let asq = dot(&a, &a);
    let disc = (c * c + bas * (delta * delta - asq)).sqrt();
    let beta = if c < T::zero() {
        (-c + disc) / bas
    } else {
        (delta * delta - asq) / (c + disc)
    };
    a.iter()
        .zip(bma.iter())
        .map(|(&ai, &di)| ai + beta * di)
        .collect()
}

/// Runs Powell's dogleg on the system until one of the termination tests
/// fires. Rejected steps restore the previous parameters, residual and
/// Jacobian before the loop continues with a shrunken trust region.
pub fn solve<M>(sys: &mut M, cfg: &DoglegCfg<M::Real>) -> SolveReport<M::Real>
where
    M: MappedSystem,
    M::Real: ComplexField<Real = M::Real> + Float,
{
    if !sys.is_valid() {
        return SolveReport {
            status: SolveStatus::InvalidSystem,
            iterations: 0,
            residual: M::Real::nan(),
            unused_steps: 0,
        };
    }

    let half: M::Real = NumCast::from(0.5).expect("type must represent 0.5");
    let quarter: M::Real = NumCast::from(0.25).expect("type must represent 0.25");
    let three_quarters = half + quarter;
    let two = M::Real::one() + M::Real::one();
    let three = two + M::Real::one();

    sys.recalculate();

    let mut err = norm_l2(sys.residual());
    let mut f_old = sys.residual().to_vec();
    let mut j_old = sys.jacobian().to_owned();
    let mut g = mat_t_vec(sys.jacobian(), sys.residual());
    let mut g_inf = norm_inf(&g);
    let mut fx_inf = norm_inf(sys.residual());

    let diverging_lim: M::Real = <M::Real as NumCast>::from(1e6).expect("limit") * err
        + <M::Real as NumCast>::from(1e12).expect("limit");

    let mut delta = cfg.delta;
    let mut nu = two;
    let mut iter = 0usize;
    let mut unused = 0usize;

    log::debug!(
        "dogleg start: {} params, {} equations, |r| = {:e}",
        sys.n_params(),
        sys.n_equations(),
        err.to_f64().unwrap_or(f64::NAN),
    );

    loop {
        let status = if fx_inf <= cfg.tol_f * sys.scaling() {
            Some(SolveStatus::ResidualConverged)
        } else if g_inf <= cfg.tol_g {
            Some(SolveStatus::GradientConverged)
        } else if delta <= cfg.tol_x {
            Some(SolveStatus::TrustRegionCollapsed)
        } else if iter >= cfg.max_iter {
            Some(SolveStatus::IterationLimit)
        } else if err > diverging_lim || err.is_nan() {
            Some(SolveStatus::Diverged)
        } else {
            None
        };
        if let Some(status) = status {
            log::debug!(
                "dogleg done: {:?} after {} iterations ({} rejected), |r| = {:e}",
                status,
                iter,
                unused,
                err.to_f64().unwrap_or(f64::NAN),
            );
            return SolveReport {
                status,
                iterations: iter,
                residual: err,
                unused_steps: unused,
            };
        }

        let h_dl = dogleg_step(&g, sys.jacobian(), sys.residual(), delta);

        // gain predicted by the linear model
        let jh = mat_vec(sys.jacobian(), &h_dl);
        let predicted: Vec<<M as MappedSystem>::Real> = sys
            .residual()
            .iter()
            .zip(jh.iter())
            .map(|(&r, &d)| r + d)
            .collect();
        let d_l = half * err - half * norm_l2(&predicted);

        for (p, h) in sys.parameters_mut().iter_mut().zip(h_dl.iter()) {
            *p = *p + *h;
        }
        sys.recalculate();

        if mat_norm_inf(sys.jacobian()) > cfg.differential_limit {
            log::debug!("high differential after step, bailing out in iteration {iter}");
            return SolveReport {
                status: SolveStatus::HighDifferential,
                iterations: iter,
                residual: err,
                unused_steps: unused,
            };
        }

        let err_new = norm_l2(sys.residual());
        let d_f = err - err_new;
        let rho = if !(d_f > M::Real::zero()) || !(d_l > M::Real::zero()) {
            -M::Real::one()
        } else {
            d_f / d_l
        };

        if rho > three_quarters {
            delta = delta.max(three * norm_l2(&h_dl));
            nu = two;
        } else if rho < quarter {
            delta = delta / nu;
            nu = two * nu;
        }

        if d_f > M::Real::zero() && d_l > M::Real::zero() {
            f_old.copy_from_slice(sys.residual());
            j_old.as_mut().copy_from(sys.jacobian());
            err = err_new;
            g = mat_t_vec(sys.jacobian(), sys.residual());
            g_inf = norm_inf(&g);
            fx_inf = norm_inf(sys.residual());
            log::trace!(
                "iteration {iter}: accepted, |r| = {:e}, delta = {:e}",
                err.to_f64().unwrap_or(f64::NAN),
                delta.to_f64().unwrap_or(f64::NAN),
            );
        } else {
            sys.residual_mut().copy_from_slice(&f_old);
            sys.jacobian_mut().copy_from(j_old.as_ref());
            for (p, h) in sys.parameters_mut().iter_mut().zip(h_dl.iter()) {
                *p = *p - *h;
            }
            unused += 1;
            log::trace!(
                "iteration {iter}: rejected, delta = {:e}",
                delta.to_f64().unwrap_or(f64::NAN),
            );
        }

        iter += 1;
    }
}
