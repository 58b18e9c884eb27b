//! Geometric primitive kinds, the user-type adaption boundary, and the
//! per-geometry solve state.
//!
//! A geometry carries three value buffers: `global` (world frame), `toplocal`
//! (expressed in the owning cluster's frame at solve start) and `rotated`
//! (toplocal moved by the current cluster pose; what constraints read while
//! the geometry is clustered). The `parameter` buffer always holds whatever
//! the constraints should currently see, regardless of binding mode.

use std::any::Any;

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::id::ClusterId;
use crate::kernel::{Mes, ParamMap};
use crate::transform::DiffTransform3;

/// Primitive kind tag. The enum order is the canonical total order used by
/// the constraint dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GeometryKind {
    Point3d,
    Direction3d,
    Line3d,
    Plane3d,
    Cylinder3d,
    Point2d,
    Direction2d,
    Line2d,
}

impl GeometryKind {
    /// Number of parameters of the native primitive.
    pub fn parameters(self) -> usize {
        match self {
            GeometryKind::Point3d | GeometryKind::Direction3d => 3,
            GeometryKind::Line3d | GeometryKind::Plane3d => 6,
            GeometryKind::Cylinder3d => 7,
            GeometryKind::Point2d | GeometryKind::Direction2d => 2,
            GeometryKind::Line2d => 4,
        }
    }

    /// How many leading 3-vector sub-blocks rotate with the owning cluster.
    pub fn rotations(self) -> usize {
        match self {
            GeometryKind::Point3d | GeometryKind::Direction3d => 1,
            GeometryKind::Line3d | GeometryKind::Plane3d | GeometryKind::Cylinder3d => 2,
            GeometryKind::Point2d => 1,
            GeometryKind::Direction2d => 1,
            GeometryKind::Line2d => 2,
        }
    }

    /// How many leading sub-blocks additionally translate with the cluster.
    /// For a line this is just the position block; the direction only rotates.
    pub fn translations(self) -> usize {
        match self {
            GeometryKind::Point3d => 1,
            GeometryKind::Direction3d => 0,
            GeometryKind::Line3d | GeometryKind::Plane3d | GeometryKind::Cylinder3d => 1,
            GeometryKind::Point2d => 1,
            GeometryKind::Direction2d => 0,
            GeometryKind::Line2d => 1,
        }
    }

    /// Planar kinds participate as free geometry only; the rigid-cluster
    /// parametrization is three-dimensional.
    pub fn is_planar(self) -> bool {
        matches!(
            self,
            GeometryKind::Point2d | GeometryKind::Direction2d | GeometryKind::Line2d
        )
    }
}

/// The adaption boundary for user primitive types. Implementations read and
/// write the world-frame parameter tuple of their kind.
pub trait GeometryValue {
    fn kind(&self) -> GeometryKind;
    /// Writes the world-frame value into `out` (length `kind().parameters()`).
    fn extract(&self, out: &mut [f64]);
    /// Reads the world-frame value back from `values`.
    fn inject(&mut self, values: &[f64]);
}

/// Object-safe wrapper adding downcast access to stored user values.
pub(crate) trait AnyGeometryValue: GeometryValue {
    fn as_any(&self) -> &dyn Any;
}

impl<T: GeometryValue + Any> AnyGeometryValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Where a geometry's parameters currently live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    /// Not part of any running solve.
    Unbound,
    /// Own parameter slots in the equation system.
    Free { offset: usize },
    /// Driven by a cluster's six rigid parameters. Offsets are the cluster's
    /// rotation and translation blocks; a fixed cluster has no blocks and
    /// contributes no Jacobian columns.
    Clustered {
        cluster: ClusterId,
        fixed: bool,
        rot_offset: usize,
        trans_offset: usize,
    },
}

pub struct Geometry {
    kind: GeometryKind,
    value: Box<dyn AnyGeometryValue>,
    global: DVector<f64>,
    toplocal: DVector<f64>,
    rotated: DVector<f64>,
    /// `parameters x 6`; columns 0..3 are the rotated value differentiated by
    /// the cluster rotation parameters, columns 3..6 by the translation.
    diffparam: DMatrix<f64>,
    /// The values constraints read, whatever the binding mode.
    parameter: DVector<f64>,
    binding: Binding,
}

impl Geometry {
    pub(crate) fn new(value: Box<dyn AnyGeometryValue>) -> Self {
        let kind = value.kind();
        let n = kind.parameters();
        let mut global = DVector::zeros(n);
        value.extract(global.as_mut_slice());
        Self {
            kind,
            value,
            toplocal: global.clone(),
            rotated: global.clone(),
            diffparam: DMatrix::zeros(n, 6),
            parameter: global.clone(),
            global,
            binding: Binding::Unbound,
        }
    }

    /// Swaps in a new user value, possibly of a different kind. All buffers
    /// are re-initialized from it.
    pub(crate) fn reset_value(&mut self, value: Box<dyn AnyGeometryValue>) {
        *self = Self::new(value);
    }

    pub fn kind(&self) -> GeometryKind {
        self.kind
    }

    pub fn binding(&self) -> Binding {
        self.binding
    }

    pub fn parameter_count(&self) -> usize {
        self.kind.parameters()
    }

    /// Current values as seen by the constraint layer.
    pub fn parameter(&self) -> &[f64] {
        self.parameter.as_slice()
    }

    pub fn global(&self) -> &[f64] {
        self.global.as_slice()
    }

    pub(crate) fn value(&self) -> &dyn AnyGeometryValue {
        self.value.as_ref()
    }

    /// Column `k` of the differential matrix as a contiguous slice.
    pub fn diff_column(&self, k: usize) -> &[f64] {
        let n = self.diffparam.nrows();
        &self.diffparam.as_slice()[k * n..(k + 1) * n]
    }

    pub fn is_clustered(&self) -> bool {
        matches!(self.binding, Binding::Clustered { .. })
    }

    pub fn is_cluster_fixed(&self) -> bool {
        matches!(self.binding, Binding::Clustered { fixed: true, .. })
    }

    /// Claims own parameter slots and seeds them with the global value.
    pub(crate) fn bind_free(&mut self, mes: &mut Mes) -> ParamMap {
        let map = mes.set_parameter_map(self.parameter_count());
        mes.params_mut(map).copy_from_slice(self.global.as_slice());
        self.parameter.as_mut_slice().copy_from_slice(self.global.as_slice());
        self.binding = Binding::Free { offset: map.offset };
        map
    }

    /// Puts the geometry under cluster control. A fixed cluster pins the
    /// constraint-visible values to the global buffer for the whole solve.
    pub(crate) fn set_cluster_mode(
        &mut self,
        cluster: ClusterId,
        fixed: bool,
        rot_offset: usize,
        trans_offset: usize,
    ) {
        self.binding = Binding::Clustered {
            cluster,
            fixed,
            rot_offset,
            trans_offset,
        };
        if fixed {
            self.parameter
                .as_mut_slice()
                .copy_from_slice(self.global.as_slice());
        }
        self.diffparam.fill(0.0);
    }

    pub(crate) fn set_unbound(&mut self) {
        self.binding = Binding::Unbound;
    }

    fn block(v: &DVector<f64>, i: usize) -> Vector3<f64> {
        Vector3::new(v[3 * i], v[3 * i + 1], v[3 * i + 2])
    }

    fn set_block(v: &mut DVector<f64>, i: usize, b: Vector3<f64>) {
        v[3 * i] = b.x;
        v[3 * i + 1] = b.y;
        v[3 * i + 2] = b.z;
    }

    /// Derives `toplocal` from `global`: translated blocks move first, then
    /// every rotated block turns. `rot` and `trans` are the inverse cluster
    /// pose, so this is the inverse of `world = R local + t`.
    pub(crate) fn transform_inverse(&mut self, rot: &Matrix3<f64>, trans: &Vector3<f64>) {
        self.toplocal.copy_from(&self.global);
        for i in 0..self.kind.translations() {
            let b = Self::block(&self.global, i) + trans;
            Self::set_block(&mut self.toplocal, i, b);
        }
        for i in 0..self.kind.rotations() {
            let b = rot * Self::block(&self.toplocal, i);
            Self::set_block(&mut self.toplocal, i, b);
        }
    }

    /// Moves the committed global value by a rigid motion: rotated blocks
    /// turn, translated blocks shift.
    pub(crate) fn transform_global(&mut self, rot: &Matrix3<f64>, trans: &Vector3<f64>) {
        for i in 0..self.kind.rotations() {
            let b = rot * Self::block(&self.global, i);
            Self::set_block(&mut self.global, i, b);
        }
        for i in 0..self.kind.translations() {
            let b = Self::block(&self.global, i) + trans;
            Self::set_block(&mut self.global, i, b);
        }
    }

    /// Rebuilds `rotated` and the differential from the cluster pose. Only
    /// meaningful for non-fixed clustered geometry.
    pub(crate) fn recalculate(&mut self, pose: &DiffTransform3) {
        if !matches!(self.binding, Binding::Clustered { fixed: false, .. }) {
            return;
        }
        let q = pose.rotation();
        let diffrot = pose.differential();
        for i in 0..self.kind.rotations() {
            let local = Self::block(&self.toplocal, i);
            Self::set_block(&mut self.rotated, i, q * local);
            for k in 0..3 {
                let dr = diffrot.fixed_view::<3, 3>(0, 3 * k);
                let grad = dr * local;
                self.diffparam[(3 * i, k)] = grad.x;
                self.diffparam[(3 * i + 1, k)] = grad.y;
                self.diffparam[(3 * i + 2, k)] = grad.z;
            }
        }
        for i in 0..self.kind.translations() {
            let b = Self::block(&self.rotated, i) + pose.translation();
            Self::set_block(&mut self.rotated, i, b);
            for k in 0..3 {
                for r in 0..3 {
                    self.diffparam[(3 * i + r, 3 + k)] = if r == k { 1.0 } else { 0.0 };
                }
            }
        }
        self.parameter.copy_from(&self.rotated);
    }

    /// Pulls the current solver values into `parameter` for free geometry.
    pub(crate) fn refresh_free(&mut self, mes: &Mes) {
        if let Binding::Free { offset } = self.binding {
            let map = ParamMap {
                offset,
                len: self.parameter_count(),
            };
            self.parameter.as_mut_slice().copy_from_slice(mes.params(map));
        }
    }

    /// Writes the solved value back into `global` and the stored user type.
    /// Geometry in a fixed cluster stays untouched.
    pub(crate) fn finish_calculation(&mut self, mes: &Mes) {
        match self.binding {
            Binding::Clustered { fixed: false, .. } => {
                self.global.copy_from(&self.rotated);
            }
            Binding::Free { offset } => {
                let map = ParamMap {
                    offset,
                    len: self.parameter_count(),
                };
                self.global.as_mut_slice().copy_from_slice(mes.params(map));
            }
            Binding::Clustered { fixed: true, .. } | Binding::Unbound => return,
        }
        self.value.inject(self.global.as_slice());
    }
}
