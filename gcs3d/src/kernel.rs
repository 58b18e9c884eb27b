//! The mapped equation system: flat parameter, residual and Jacobian storage
//! for one solve, plus the offset-handle API that clusters, geometries and
//! constraints use to claim their slices of it.
//!
//! Handles are plain offsets instead of aliasing views, so the system is the
//! single owner of all buffers and a handle stays `Copy`. A new solve must
//! build a fresh [`Mes`]; handles from an earlier solve are meaningless.

use faer::Mat;
use faer::mat::{MatMut, MatRef};

/// A contiguous run of parameter slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamMap {
    pub offset: usize,
    pub len: usize,
}

/// One residual row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResidualMap {
    pub row: usize,
}

/// A run of cells in one Jacobian row, starting at a parameter offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JacobiMap {
    pub row: usize,
    pub offset: usize,
    pub len: usize,
}

/// Dense equation system of one cluster solve.
///
/// Layout: cluster rotation and translation parameters first (in binding
/// order), then free geometry parameters. Only the offsets recorded in the
/// handles matter to consumers. The Jacobian starts zeroed; cells nobody maps
/// stay zero, which is the correct derivative for them.
pub struct Mes {
    parameter: Vec<f64>,
    residual: Vec<f64>,
    jacobian: Mat<f64>,
    scaling: f64,
    n_params: usize,
    n_eqns: usize,
    param_offset: usize,
    eqn_offset: usize,
}

impl Mes {
    pub fn new(params: usize, equations: usize) -> Self {
        Self {
            parameter: vec![0.0; params],
            residual: vec![0.0; equations],
            jacobian: Mat::zeros(equations, params),
            scaling: 1.0,
            n_params: params,
            n_eqns: equations,
            param_offset: 0,
            eqn_offset: 0,
        }
    }

    pub fn n_params(&self) -> usize {
        self.n_params
    }
    pub fn n_equations(&self) -> usize {
        self.n_eqns
    }
    pub fn scaling(&self) -> f64 {
        self.scaling
    }

    pub fn is_valid(&self) -> bool {
        self.n_params > 0 && self.n_eqns > 0
    }

    /// Reserves `n` parameter slots and returns their handle.
    pub fn set_parameter_map(&mut self, n: usize) -> ParamMap {
        let map = ParamMap {
            offset: self.param_offset,
            len: n,
        };
        self.param_offset += n;
        debug_assert!(self.param_offset <= self.n_params, "parameter overrun");
        map
    }

    /// Reserves exactly three slots, the size of a rotation or translation
    /// block.
    pub fn set_vector3_map(&mut self) -> ParamMap {
        self.set_parameter_map(3)
    }

    /// Reserves one residual row.
    pub fn set_residual_map(&mut self) -> ResidualMap {
        let map = ResidualMap {
            row: self.eqn_offset,
        };
        self.eqn_offset += 1;
        debug_assert!(self.eqn_offset <= self.n_eqns, "equation overrun");
        map
    }

    /// A view over `n` cells of row `eqn` starting at column `offset`. Does
    /// not advance any cursor; several constraints may address disjoint runs
    /// of the same row.
    pub fn jacobi_map(&self, eqn: usize, offset: usize, n: usize) -> JacobiMap {
        debug_assert!(eqn < self.n_eqns && offset + n <= self.n_params);
        JacobiMap {
            row: eqn,
            offset,
            len: n,
        }
    }

    pub fn params(&self, map: ParamMap) -> &[f64] {
        &self.parameter[map.offset..map.offset + map.len]
    }

    pub fn params_mut(&mut self, map: ParamMap) -> &mut [f64] {
        &mut self.parameter[map.offset..map.offset + map.len]
    }

    pub fn set_residual(&mut self, map: ResidualMap, value: f64) {
        self.residual[map.row] = value;
    }

    pub fn write_jacobi(&mut self, map: JacobiMap, i: usize, value: f64) {
        debug_assert!(i < map.len);
        self.jacobian[(map.row, map.offset + i)] = value;
    }

    pub fn parameter(&self) -> &[f64] {
        &self.parameter
    }
    pub fn parameter_mut(&mut self) -> &mut [f64] {
        &mut self.parameter
    }
    pub fn residual(&self) -> &[f64] {
        &self.residual
    }
    pub fn residual_mut(&mut self) -> &mut [f64] {
        &mut self.residual
    }
    pub fn jacobian(&self) -> MatRef<'_, f64> {
        self.jacobian.as_ref()
    }
    pub fn jacobian_mut(&mut self) -> MatMut<'_, f64> {
        self.jacobian.as_mut()
    }
}

/// Loose equality for parameter tuples, the tolerance used when deciding
/// whether two geometric values describe the same thing.
pub fn is_same(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f64>()
            < 0.001
}

pub fn is_same_scalar(a: f64, b: f64) -> bool {
    (a - b).abs() < 0.001
}

/// True when the tuples are equal up to a sign flip, e.g. opposite
/// directions.
pub fn is_opposite(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x + y).powi(2))
            .sum::<f64>()
            < 0.001
}
