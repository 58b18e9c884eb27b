#![doc = include_str!("../README.md")]
mod linalg;
mod solver;

pub use solver::{DoglegCfg, SolveReport, SolveStatus, dogleg_step, solve};

use faer::mat::{MatMut, MatRef};

/// A dense nonlinear least-squares system with externally mapped storage.
///
/// The implementor owns the parameter vector `p`, the residual vector `r` and
/// the Jacobian `J = dr/dp`. The solver mutates `p` in place and calls
/// [`MappedSystem::recalculate`] after every update; the implementation must
/// refresh `r` and `J` from the new parameters before returning.
pub trait MappedSystem {
    type Real;

    /// Number of free parameters (columns of the Jacobian).
    fn n_params(&self) -> usize;
    /// Number of residual equations (rows of the Jacobian).
    fn n_equations(&self) -> usize;
    /// Residual scale factor; the solver declares success once
    /// `||r||_inf <= tol_f * scaling()`.
    fn scaling(&self) -> Self::Real;

    /// A system without parameters or without equations cannot be solved.
    fn is_valid(&self) -> bool {
        self.n_params() > 0 && self.n_equations() > 0
    }

    fn parameters(&self) -> &[Self::Real];
    fn parameters_mut(&mut self) -> &mut [Self::Real];
    fn residual(&self) -> &[Self::Real];
    fn residual_mut(&mut self) -> &mut [Self::Real];
    fn jacobian(&self) -> MatRef<'_, Self::Real>;
    fn jacobian_mut(&mut self) -> MatMut<'_, Self::Real>;

    /// Refresh residual and Jacobian from the current parameters.
    fn recalculate(&mut self);
}
