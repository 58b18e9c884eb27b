#![doc = include_str!("../README.md")]

mod cluster;
mod constraint;
/// Shipped primitive types implementing the adaption boundary.
pub mod datatypes;
mod equations;
mod geometry;
mod id;
mod kernel;
mod scheduler;
mod solver;
mod system;
mod transform;
/// Scenario tests across the whole pipeline.
#[cfg(test)]
mod tests;

pub use cluster::ClusterMath;
pub use constraint::{Constraint, ConstraintKind};
pub use dogleg_faer::{DoglegCfg, SolveReport, SolveStatus};
pub use equations::Equation;
pub use geometry::{Binding, Geometry, GeometryKind, GeometryValue};
pub use id::{ClusterId, ConstraintId, GeometryId, PartId};
pub use kernel::{JacobiMap, Mes, ParamMap, ResidualMap, is_opposite, is_same, is_same_scalar};
pub use scheduler::{Job, Scheduler};
pub use system::System;
pub use transform::{
    DiffTransform, DiffTransform2, DiffTransform3, Rotation, Transform, Transform2, Transform3,
};

/// Errors from assembling or solving a system. Solver termination is not an
/// error; it is reported through [`SolveReport`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no equation registered for {kind:?} between {first:?} and {second:?}")]
    UnsupportedConstraint {
        kind: ConstraintKind,
        first: GeometryKind,
        second: GeometryKind,
    },
    #[error("geometry {0:?} does not exist or was removed")]
    UnknownGeometry(GeometryId),
    #[error("constraint {0:?} does not exist or was removed")]
    UnknownConstraint(ConstraintId),
    #[error("cluster {0:?} does not exist")]
    UnknownCluster(ClusterId),
    #[error("part {0:?} does not exist")]
    UnknownPart(PartId),
    #[error("geometry {0:?} does not hold a value of the requested type")]
    ValueTypeMismatch(GeometryId),
    #[error("planar geometry cannot join a rigid subcluster")]
    PlanarInCluster,
    #[error("no drag in progress; call start_drag first")]
    NoActiveDrag,
    #[error("drag target must be a {expected:?}, got {got:?}")]
    DragKindMismatch {
        expected: GeometryKind,
        got: GeometryKind,
    },
    #[error("the solver is not available, a solve is already running")]
    SolverUnavailable,
}
