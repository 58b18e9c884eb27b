//! Type-erased pairwise constraints.
//!
//! At creation time the pair of geometry tags picks the concrete equation
//! objects from the factory. Tags are compared under their canonical total
//! order first; when the caller's pair arrives reversed, the two geometries
//! swap roles for the lifetime of the constraint so exactly one equation
//! variant per unordered pair suffices.
//!
//! A constraint owns one [`EquationSet`] per scalar equation: distance-style
//! constraints have one, per-component ones (coincidence, fix) have one per
//! component. Each set maps one residual row and up to six Jacobian row
//! segments (rotation/translation per clustered side, one run per free side).

use crate::Error;
use crate::equations::{
    ComponentDiff, CosineAngle, Cross2d, CrossComponent, DotProduct, Equation, LineLineDistance,
    LinePlaneDistance, PlanePlaneDistance, PointDistance, PointLineDistance, PointPlaneDistance,
};
use crate::geometry::{Binding, Geometry, GeometryKind};
use crate::id::GeometryId;
use crate::kernel::{JacobiMap, Mes, ResidualMap};

/// The constraint kinds the dispatch knows equations for.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConstraintKind {
    /// Keep the two geometries a given distance apart.
    Distance(f64),
    /// Make the two geometries coincide.
    Coincident,
    /// Directions point the same (or exactly opposite) way.
    Parallel,
    /// Directions at a right angle.
    Perpendicular,
    /// Directions at a given angle in radians.
    Angle(f64),
    /// Equate a geometry to a target of the same kind, component by
    /// component.
    Fix,
}

fn canonical_order(t1: GeometryKind, t2: GeometryKind) -> (GeometryKind, GeometryKind, bool) {
    if t1 <= t2 {
        (t1, t2, false)
    } else {
        (t2, t1, true)
    }
}

/// Builds the equation list for a kind and a canonically ordered tag pair.
fn equations_for(
    kind: ConstraintKind,
    first: GeometryKind,
    second: GeometryKind,
) -> Result<Vec<Box<dyn Equation>>, Error> {
    use GeometryKind::*;

    let unsupported = || Error::UnsupportedConstraint {
        kind,
        first,
        second,
    };

    let eqs: Vec<Box<dyn Equation>> = match kind {
        ConstraintKind::Distance(offset) => match (first, second) {
            (Point3d, Point3d) => vec![Box::new(PointDistance { dim: 3, offset })],
            (Point2d, Point2d) => vec![Box::new(PointDistance { dim: 2, offset })],
            (Point3d, Line3d) => vec![Box::new(PointLineDistance { offset })],
            (Point3d, Plane3d) => vec![Box::new(PointPlaneDistance { offset })],
            (Line3d, Line3d) => vec![Box::new(LineLineDistance { offset })],
            (Line3d, Plane3d) => vec![Box::new(LinePlaneDistance { offset })],
            (Plane3d, Plane3d) => vec![Box::new(PlanePlaneDistance { offset })],
            _ => return Err(unsupported()),
        },
        ConstraintKind::Coincident => match (first, second) {
            (Point3d, Point3d) => component_diffs(3),
            (Point2d, Point2d) => component_diffs(2),
            (Point3d, Line3d) => vec![Box::new(PointLineDistance { offset: 0.0 })],
            (Point3d, Plane3d) => vec![Box::new(PointPlaneDistance { offset: 0.0 })],
            _ => return Err(unsupported()),
        },
        ConstraintKind::Parallel => match (first, second) {
            (Direction3d, Direction3d) => (0..3)
                .map(|axis| Box::new(CrossComponent { axis }) as Box<dyn Equation>)
                .collect(),
            (Direction2d, Direction2d) => vec![Box::new(Cross2d)],
            _ => return Err(unsupported()),
        },
        ConstraintKind::Perpendicular => match (first, second) {
            (Direction3d, Direction3d) => vec![Box::new(DotProduct { dim: 3 })],
            (Direction2d, Direction2d) => vec![Box::new(DotProduct { dim: 2 })],
            _ => return Err(unsupported()),
        },
        ConstraintKind::Angle(angle) => match (first, second) {
            (Direction3d, Direction3d) => vec![Box::new(CosineAngle {
                dim: 3,
                cos_angle: libm::cos(angle),
            })],
            (Direction2d, Direction2d) => vec![Box::new(CosineAngle {
                dim: 2,
                cos_angle: libm::cos(angle),
            })],
            _ => return Err(unsupported()),
        },
        ConstraintKind::Fix => {
            if first != second {
                return Err(unsupported());
            }
            component_diffs(first.parameters())
        }
    };
    Ok(eqs)
}

fn component_diffs(n: usize) -> Vec<Box<dyn Equation>> {
    (0..n)
        .map(|axis| Box::new(ComponentDiff { axis }) as Box<dyn Equation>)
        .collect()
}

/// One scalar equation plus its residual row and Jacobian segments for the
/// current solve. All maps start empty and are wired by `set_maps`.
struct EquationSet {
    equation: Box<dyn Equation>,
    residual: Option<ResidualMap>,
    rot_first: Option<JacobiMap>,
    trans_first: Option<JacobiMap>,
    free_first: Option<JacobiMap>,
    rot_second: Option<JacobiMap>,
    trans_second: Option<JacobiMap>,
    free_second: Option<JacobiMap>,
}

impl std::fmt::Debug for EquationSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EquationSet")
            .field("residual", &self.residual)
            .field("rot_first", &self.rot_first)
            .field("trans_first", &self.trans_first)
            .field("free_first", &self.free_first)
            .field("rot_second", &self.rot_second)
            .field("trans_second", &self.trans_second)
            .field("free_second", &self.free_second)
            .finish_non_exhaustive()
    }
}

impl EquationSet {
    fn new(equation: Box<dyn Equation>) -> Self {
        Self {
            equation,
            residual: None,
            rot_first: None,
            trans_first: None,
            free_first: None,
            rot_second: None,
            trans_second: None,
            free_second: None,
        }
    }

    fn clear_maps(&mut self) {
        self.residual = None;
        self.rot_first = None;
        self.trans_first = None;
        self.free_first = None;
        self.rot_second = None;
        self.trans_second = None;
        self.free_second = None;
    }
}

#[derive(Debug)]
pub struct Constraint {
    kind: ConstraintKind,
    first: GeometryId,
    second: GeometryId,
    sets: Vec<EquationSet>,
}

impl Constraint {
    /// Creates the dispatch for a geometry pair, swapping the pair if the
    /// canonical tag order demands it.
    pub fn new(
        kind: ConstraintKind,
        first: (GeometryId, GeometryKind),
        second: (GeometryId, GeometryKind),
    ) -> Result<Self, Error> {
        let (ta, tb, swap) = canonical_order(first.1, second.1);
        let sets = equations_for(kind, ta, tb)?
            .into_iter()
            .map(EquationSet::new)
            .collect();
        let (fid, sid) = if swap {
            (second.0, first.0)
        } else {
            (first.0, second.0)
        };
        Ok(Self {
            kind,
            first: fid,
            second: sid,
            sets,
        })
    }

    /// Re-runs equation selection after a geometry changed its kind. The
    /// stored pair may swap again to restore canonical order.
    pub fn rebind(
        &mut self,
        first_kind: GeometryKind,
        second_kind: GeometryKind,
    ) -> Result<(), Error> {
        let (ta, tb, swap) = canonical_order(first_kind, second_kind);
        self.sets = equations_for(self.kind, ta, tb)?
            .into_iter()
            .map(EquationSet::new)
            .collect();
        if swap {
            std::mem::swap(&mut self.first, &mut self.second);
        }
        Ok(())
    }

    pub fn kind(&self) -> ConstraintKind {
        self.kind
    }
    pub fn first(&self) -> GeometryId {
        self.first
    }
    pub fn second(&self) -> GeometryId {
        self.second
    }

    /// How many residual rows this constraint owns.
    pub fn equation_count(&self) -> usize {
        self.sets.len()
    }

    pub fn touches(&self, id: GeometryId) -> bool {
        self.first == id || self.second == id
    }

    /// Claims one residual row per equation and the Jacobian segments each
    /// geometry's binding mode calls for. Fixed-cluster geometry gets no
    /// segments; the zeroed Jacobian already holds its derivatives.
    pub fn set_maps(&mut self, mes: &mut Mes, first: &Geometry, second: &Geometry) {
        for set in &mut self.sets {
            set.clear_maps();
            let res = mes.set_residual_map();
            set.residual = Some(res);
            let row = res.row;

            match first.binding() {
                Binding::Clustered {
                    fixed: false,
                    rot_offset,
                    trans_offset,
                    ..
                } => {
                    set.trans_first = Some(mes.jacobi_map(row, trans_offset, 3));
                    set.rot_first = Some(mes.jacobi_map(row, rot_offset, 3));
                }
                Binding::Free { offset } => {
                    set.free_first = Some(mes.jacobi_map(row, offset, first.parameter_count()));
                }
                Binding::Clustered { fixed: true, .. } | Binding::Unbound => {}
            }

            match second.binding() {
                Binding::Clustered {
                    fixed: false,
                    rot_offset,
                    trans_offset,
                    ..
                } => {
                    set.trans_second = Some(mes.jacobi_map(row, trans_offset, 3));
                    set.rot_second = Some(mes.jacobi_map(row, rot_offset, 3));
                }
                Binding::Free { offset } => {
                    set.free_second = Some(mes.jacobi_map(row, offset, second.parameter_count()));
                }
                Binding::Clustered { fixed: true, .. } | Binding::Unbound => {}
            }
        }
    }

    /// Evaluates every equation: the residual, then the gradient through the
    /// route each side is bound by. Clustered sides run the directional
    /// derivative against the six differential columns; free sides take the
    /// complete-gradient fast path.
    pub fn calculate(&self, mes: &mut Mes, first: &Geometry, second: &Geometry) {
        let p1 = first.parameter();
        let p2 = second.parameter();

        for set in &self.sets {
            let Some(res) = set.residual else { continue };
            let eq = set.equation.as_ref();
            mes.set_residual(res, eq.residual(p1, p2));

            if let (Some(rot), Some(trans)) = (set.rot_first, set.trans_first) {
                for k in 0..3 {
                    mes.write_jacobi(rot, k, eq.gradient_first(p1, p2, first.diff_column(k)));
                }
                for k in 0..3 {
                    mes.write_jacobi(
                        trans,
                        k,
                        eq.gradient_first(p1, p2, first.diff_column(3 + k)),
                    );
                }
            } else if let Some(free) = set.free_first {
                let mut grad = vec![0.0; free.len];
                eq.gradient_first_complete(p1, p2, &mut grad);
                for (k, g) in grad.iter().enumerate() {
                    mes.write_jacobi(free, k, *g);
                }
            }

            if let (Some(rot), Some(trans)) = (set.rot_second, set.trans_second) {
                for k in 0..3 {
                    mes.write_jacobi(rot, k, eq.gradient_second(p1, p2, second.diff_column(k)));
                }
                for k in 0..3 {
                    mes.write_jacobi(
                        trans,
                        k,
                        eq.gradient_second(p1, p2, second.diff_column(3 + k)),
                    );
                }
            } else if let Some(free) = set.free_second {
                let mut grad = vec![0.0; free.len];
                eq.gradient_second_complete(p1, p2, &mut grad);
                for (k, g) in grad.iter().enumerate() {
                    mes.write_jacobi(free, k, *g);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{Direction3, Line3, Point3};
    use nalgebra::Vector3;

    fn geom(value: impl crate::geometry::GeometryValue + 'static) -> Geometry {
        Geometry::new(Box::new(value))
    }

    #[test]
    fn canonical_order_swaps_reversed_pairs() {
        let c = Constraint::new(
            ConstraintKind::Distance(1.0),
            (GeometryId(7), GeometryKind::Line3d),
            (GeometryId(9), GeometryKind::Point3d),
        )
        .unwrap();
        // point3d orders before line3d, so the pair swapped
        assert_eq!(c.first(), GeometryId(9));
        assert_eq!(c.second(), GeometryId(7));
    }

    #[test]
    fn equation_counts_follow_the_kind() {
        let pp = Constraint::new(
            ConstraintKind::Coincident,
            (GeometryId(0), GeometryKind::Point3d),
            (GeometryId(1), GeometryKind::Point3d),
        )
        .unwrap();
        assert_eq!(pp.equation_count(), 3);

        let fix_line = Constraint::new(
            ConstraintKind::Fix,
            (GeometryId(0), GeometryKind::Line3d),
            (GeometryId(1), GeometryKind::Line3d),
        )
        .unwrap();
        assert_eq!(fix_line.equation_count(), 6);

        let par = Constraint::new(
            ConstraintKind::Parallel,
            (GeometryId(0), GeometryKind::Direction3d),
            (GeometryId(1), GeometryKind::Direction3d),
        )
        .unwrap();
        assert_eq!(par.equation_count(), 3);

        let dist = Constraint::new(
            ConstraintKind::Distance(2.0),
            (GeometryId(0), GeometryKind::Point3d),
            (GeometryId(1), GeometryKind::Point3d),
        )
        .unwrap();
        assert_eq!(dist.equation_count(), 1);
    }

    #[test]
    fn unsupported_pairs_are_rejected() {
        let err = Constraint::new(
            ConstraintKind::Parallel,
            (GeometryId(0), GeometryKind::Point3d),
            (GeometryId(1), GeometryKind::Point3d),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedConstraint { .. }));

        let err = Constraint::new(
            ConstraintKind::Fix,
            (GeometryId(0), GeometryKind::Point3d),
            (GeometryId(1), GeometryKind::Line3d),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedConstraint { .. }));
    }

    #[test]
    fn free_geometry_fills_residual_and_jacobian_runs() {
        let mut mes = Mes::new(6, 1);
        let mut g1 = geom(Direction3::new(1.0, 0.0, 0.0));
        let mut g2 = geom(Direction3::new(0.0, 1.0, 0.0));
        g1.bind_free(&mut mes);
        g2.bind_free(&mut mes);

        let mut c = Constraint::new(
            ConstraintKind::Perpendicular,
            (GeometryId(0), GeometryKind::Direction3d),
            (GeometryId(1), GeometryKind::Direction3d),
        )
        .unwrap();
        c.set_maps(&mut mes, &g1, &g2);
        c.calculate(&mut mes, &g1, &g2);

        // residual = d1 . d2 = 0 here; gradient rows are d2 | d1
        assert_eq!(mes.residual()[0], 0.0);
        let j = mes.jacobian();
        assert_eq!([j[(0, 0)], j[(0, 1)], j[(0, 2)]], [0.0, 1.0, 0.0]);
        assert_eq!([j[(0, 3)], j[(0, 4)], j[(0, 5)]], [1.0, 0.0, 0.0]);
    }

    #[test]
    fn fixed_cluster_side_leaves_jacobian_zero() {
        let mut mes = Mes::new(3, 3);
        let mut fixed = geom(Point3::new(1.0, 2.0, 3.0));
        fixed.set_cluster_mode(crate::id::ClusterId(0), true, 0, 0);
        let mut free = geom(Point3::new(0.0, 0.0, 0.0));
        free.bind_free(&mut mes);

        let mut c = Constraint::new(
            ConstraintKind::Coincident,
            (GeometryId(0), GeometryKind::Point3d),
            (GeometryId(1), GeometryKind::Point3d),
        )
        .unwrap();
        c.set_maps(&mut mes, &fixed, &free);
        c.calculate(&mut mes, &fixed, &free);

        // three residual rows: fixed - free per component
        assert_eq!(mes.residual(), &[1.0, 2.0, 3.0]);
        let j = mes.jacobian();
        // the free side is the second tuple: derivative -1 on the diagonal
        for row in 0..3 {
            for col in 0..3 {
                let expected = if row == col { -1.0 } else { 0.0 };
                assert_eq!(j[(row, col)], expected);
            }
        }
    }

    #[test]
    fn rebind_reselects_equations_for_new_kinds() {
        let mut c = Constraint::new(
            ConstraintKind::Distance(1.0),
            (GeometryId(0), GeometryKind::Point3d),
            (GeometryId(1), GeometryKind::Point3d),
        )
        .unwrap();
        assert_eq!(c.equation_count(), 1);
        // the first geometry becomes a line; point-line distance still exists
        c.rebind(GeometryKind::Line3d, GeometryKind::Point3d).unwrap();
        assert_eq!(c.equation_count(), 1);
        // and the pair swapped to canonical point-line order
        assert_eq!(c.first(), GeometryId(1));
        assert_eq!(c.second(), GeometryId(0));
    }

    #[test]
    fn line_line_distance_dispatch_works_end_to_end() {
        let mut mes = Mes::new(12, 1);
        let mut l1 = geom(Line3::new(Vector3::zeros(), Vector3::x()));
        let mut l2 = geom(Line3::new(Vector3::new(0.0, 0.0, 3.0), Vector3::y()));
        l1.bind_free(&mut mes);
        l2.bind_free(&mut mes);

        let mut c = Constraint::new(
            ConstraintKind::Distance(3.0),
            (GeometryId(0), GeometryKind::Line3d),
            (GeometryId(1), GeometryKind::Line3d),
        )
        .unwrap();
        c.set_maps(&mut mes, &l1, &l2);
        c.calculate(&mut mes, &l1, &l2);
        assert!(mes.residual()[0].abs() < 1e-12);
    }
}
