use nalgebra::{UnitQuaternion, Vector2, Vector3};

use crate::datatypes::{Direction3, Plane3, Point3};
use crate::{ConstraintKind, DoglegCfg, System, Transform3, is_same};

mod proptests;

fn tight() -> DoglegCfg<f64> {
    DoglegCfg::default().with_tol_f(1e-9)
}

fn direction(sys: &System, id: crate::GeometryId) -> Vector3<f64> {
    Vector3::from(*sys.geometry_value::<Direction3>(id).unwrap())
}

fn point(sys: &System, id: crate::GeometryId) -> Vector3<f64> {
    Vector3::from(*sys.geometry_value::<Point3>(id).unwrap())
}

#[test]
fn three_perpendicular_directions() {
    let mut sys = System::new();
    sys.set_config(tight());
    let d1 = sys.add_geometry(Direction3::new(7.0, -0.5, 0.3));
    let d2 = sys.add_geometry(Direction3::new(0.2, 0.5, -0.1));
    let d3 = sys.add_geometry(Direction3::new(1.2, 5.9, 0.43));

    sys.add_constraint(ConstraintKind::Perpendicular, d1, d2)
        .unwrap();
    sys.add_constraint(ConstraintKind::Perpendicular, d2, d3)
        .unwrap();
    sys.add_constraint(ConstraintKind::Perpendicular, d3, d1)
        .unwrap();

    let report = sys.solve().unwrap();
    assert!(report.status.is_success(), "status {:?}", report.status);

    let v1 = direction(&sys, d1);
    let v2 = direction(&sys, d2);
    let v3 = direction(&sys, d3);
    assert!(v1.dot(&v2).abs() < 1e-6, "d1.d2 = {}", v1.dot(&v2));
    assert!(v2.dot(&v3).abs() < 1e-6, "d2.d3 = {}", v2.dot(&v3));
    assert!(v3.dot(&v1).abs() < 1e-6, "d3.d1 = {}", v3.dot(&v1));
}

#[test]
fn converged_solve_meets_the_residual_tolerance() {
    // Same system under the default tolerances: whenever the solver claims
    // residual convergence, every constraint residual obeys tol_f * scaling.
    let mut sys = System::new();
    let d1 = sys.add_geometry(Direction3::new(7.0, -0.5, 0.3));
    let d2 = sys.add_geometry(Direction3::new(0.2, 0.5, -0.1));
    let d3 = sys.add_geometry(Direction3::new(1.2, 5.9, 0.43));
    for (a, b) in [(d1, d2), (d2, d3), (d3, d1)] {
        sys.add_constraint(ConstraintKind::Perpendicular, a, b)
            .unwrap();
    }

    let report = sys.solve().unwrap();
    if report.status.code() == 1 {
        let tol = sys.config().tol_f;
        let v1 = direction(&sys, d1);
        let v2 = direction(&sys, d2);
        let v3 = direction(&sys, d3);
        assert!(v1.dot(&v2).abs() <= tol);
        assert!(v2.dot(&v3).abs() <= tol);
        assert!(v3.dot(&v1).abs() <= tol);
    } else {
        assert!(report.status.is_success(), "status {:?}", report.status);
    }
}

#[test]
fn empty_solve_reports_invalid_system() {
    let mut sys = System::new();
    let g1 = sys.add_geometry(Direction3::new(7.0, -0.5, 0.3));
    let g2 = sys.add_geometry(Direction3::new(0.2, 0.5, -0.1));

    let report = sys.solve().unwrap();
    assert_eq!(report.status.code(), 5);
    assert!(!report.status.is_success());

    // nothing moved
    assert_eq!(sys.geometry_global(g1).unwrap(), &[7.0, -0.5, 0.3]);
    assert_eq!(sys.geometry_global(g2).unwrap(), &[0.2, 0.5, -0.1]);
}

#[test]
fn fixed_cluster_pins_its_geometry() {
    let mut sys = System::new();
    sys.set_config(tight());
    let a = sys.add_geometry(Point3::new(1.0, 2.0, 3.0));
    let b = sys.add_geometry(Point3::new(-2.0, 0.5, 1.0));
    let free = sys.add_geometry(Point3::new(0.1, -0.3, 0.2));

    let sc = sys.create_subcluster();
    sys.move_to_subcluster(a, sc).unwrap();
    sys.move_to_subcluster(b, sc).unwrap();
    sys.set_fixed(sc, true).unwrap();

    sys.add_constraint(ConstraintKind::Coincident, free, a)
        .unwrap();

    let a_before = sys.geometry_global(a).unwrap().to_vec();
    let b_before = sys.geometry_global(b).unwrap().to_vec();

    let report = sys.solve().unwrap();
    assert!(report.status.is_success(), "status {:?}", report.status);

    // bit-for-bit identical: fixed geometry is never written back
    assert_eq!(sys.geometry_global(a).unwrap(), a_before.as_slice());
    assert_eq!(sys.geometry_global(b).unwrap(), b_before.as_slice());

    let solved = point(&sys, free);
    assert!((solved - Vector3::new(1.0, 2.0, 3.0)).norm() < 1e-5);
}

#[test]
fn subcluster_moves_rigidly_into_place() {
    let mut sys = System::new();
    sys.set_config(tight());
    let d1 = sys.add_geometry(Direction3::new(7.0, -0.5, 0.3));
    let d2 = sys.add_geometry(Direction3::new(0.2, 0.5, -0.1));
    let d3 = sys.add_geometry(Direction3::new(1.2, 5.9, 0.43));

    let sc = sys.create_subcluster();
    sys.move_to_subcluster(d1, sc).unwrap();
    sys.move_to_subcluster(d2, sc).unwrap();

    sys.add_constraint(ConstraintKind::Perpendicular, d1, d2)
        .unwrap();
    sys.add_constraint(ConstraintKind::Perpendicular, d2, d3)
        .unwrap();
    sys.add_constraint(ConstraintKind::Perpendicular, d3, d1)
        .unwrap();

    let before = sys.cluster_pose(sc).unwrap();
    let report = sys.solve().unwrap();
    assert!(report.status.is_success(), "status {:?}", report.status);

    let v1 = direction(&sys, d1);
    let v2 = direction(&sys, d2);
    let v3 = direction(&sys, d3);
    assert!(v1.dot(&v2).abs() < 1e-6, "d1.d2 = {}", v1.dot(&v2));
    assert!(v2.dot(&v3).abs() < 1e-6, "d2.d3 = {}", v2.dot(&v3));
    assert!(v3.dot(&v1).abs() < 1e-6, "d3.d1 = {}", v3.dot(&v1));

    // the pair moved as one rigid body, so the cluster pose rotated
    let after = sys.cluster_pose(sc).unwrap();
    assert!(before.rotation().angle_to(after.rotation()) > 1e-8);
    assert!((after.rotation().into_inner().norm() - 1.0).abs() < 1e-10);
}

#[test]
fn point_to_plane_distance_with_swapped_creation_order() {
    let mut sys = System::new();
    sys.set_config(tight());
    // plane pinned in a fixed cluster, point free
    let plane = sys.add_geometry(Plane3::new(Vector3::zeros(), Vector3::z()));
    let sc = sys.create_subcluster();
    sys.move_to_subcluster(plane, sc).unwrap();
    sys.set_fixed(sc, true).unwrap();

    let p = sys.add_geometry(Point3::new(0.3, -0.2, 4.0));
    // passed plane-first: the dispatch swaps to canonical point-plane order
    sys.add_constraint(ConstraintKind::Distance(1.5), plane, p)
        .unwrap();

    let report = sys.solve().unwrap();
    assert!(report.status.is_success(), "status {:?}", report.status);
    let solved = point(&sys, p);
    assert!((solved.z - 1.5).abs() < 1e-6, "z = {}", solved.z);
}

#[test]
fn parts_translate_onto_their_targets() {
    let mut sys = System::new();
    sys.set_config(tight());

    let part = sys.add_part(Transform3::identity());
    let p1 = sys
        .add_part_geometry(part, Point3::new(0.0, 0.0, 0.0))
        .unwrap();
    let p2 = sys
        .add_part_geometry(part, Point3::new(1.0, 0.0, 0.0))
        .unwrap();

    let t1 = sys.add_geometry(Point3::new(10.0, 0.0, 0.0));
    let t2 = sys.add_geometry(Point3::new(11.0, 0.0, 0.0));
    let anchors = sys.create_subcluster();
    sys.move_to_subcluster(t1, anchors).unwrap();
    sys.move_to_subcluster(t2, anchors).unwrap();
    sys.set_fixed(anchors, true).unwrap();

    sys.add_constraint(ConstraintKind::Coincident, p1, t1)
        .unwrap();
    sys.add_constraint(ConstraintKind::Coincident, p2, t2)
        .unwrap();

    let report = sys.solve().unwrap();
    assert!(report.status.is_success(), "status {:?}", report.status);

    let s1 = point(&sys, p1);
    let s2 = point(&sys, p2);
    assert!((s1 - Vector3::new(10.0, 0.0, 0.0)).norm() < 1e-5);
    assert!((s2 - Vector3::new(11.0, 0.0, 0.0)).norm() < 1e-5);
    // rigidity: the inner distance survived the motion
    assert!(((s1 - s2).norm() - 1.0).abs() < 1e-6);

    // the solved pose keeps a unit rotation
    let pose = sys.part_pose(part).unwrap();
    assert!((pose.rotation().into_inner().norm() - 1.0).abs() < 1e-10);
}

#[test]
fn dragging_a_point_pulls_the_assembly_along() {
    let mut sys = System::new();
    sys.set_config(tight());
    let p = sys.add_geometry(Point3::new(0.0, 0.0, 0.0));
    let q = sys.add_geometry(Point3::new(1.0, 1.0, 1.0));
    let spacing = 3.0_f64.sqrt();
    sys.add_constraint(ConstraintKind::Distance(spacing), p, q)
        .unwrap();

    sys.start_drag(p).unwrap();
    let report = sys.drag_to(Point3::new(3.0, 4.0, 0.0)).unwrap();
    assert!(report.status.is_success(), "status {:?}", report.status);

    let dragged = point(&sys, p);
    assert!(is_same(dragged.as_slice(), &[3.0, 4.0, 0.0]));
    assert!((dragged - Vector3::new(3.0, 4.0, 0.0)).norm() < 1e-5);
    // the companion kept its spacing
    let follower = point(&sys, q);
    assert!(((dragged - follower).norm() - spacing).abs() < 1e-5);

    // a second pull reuses the transient goal
    let report = sys.drag_to(Point3::new(-1.0, 2.0, 0.5)).unwrap();
    assert!(report.status.is_success());
    assert!((point(&sys, p) - Vector3::new(-1.0, 2.0, 0.5)).norm() < 1e-5);

    sys.finish_drag();
    // the transient fix is gone: re-solving no longer pins p
    let report = sys.solve().unwrap();
    assert!(report.status.is_success() || report.status.code() == 5);
}

#[test]
fn reassigning_a_geometry_rebinds_its_constraints() {
    let mut sys = System::new();
    sys.set_config(tight());
    let a = sys.add_geometry(Point3::new(0.0, 0.0, 2.0));
    let b = sys.add_geometry(Point3::new(0.0, 0.0, 0.0));
    sys.add_constraint(ConstraintKind::Distance(2.0), a, b)
        .unwrap();
    let report = sys.solve().unwrap();
    assert!(report.status.is_success());

    // b becomes a plane; the same constraint must now solve point-plane
    sys.set_geometry(b, Plane3::new(Vector3::zeros(), Vector3::z()))
        .unwrap();
    let report = sys.solve().unwrap();
    assert!(report.status.is_success(), "status {:?}", report.status);
    let solved = point(&sys, a);
    assert!((solved.z.abs() - 2.0).abs() < 1e-5, "z = {}", solved.z);
}

#[test]
fn planar_directions_solve_as_free_geometry() {
    use crate::datatypes::Direction2;

    let mut sys = System::new();
    sys.set_config(tight());
    let d1 = sys.add_geometry(Direction2::new(1.0, 0.2));
    let d2 = sys.add_geometry(Direction2::new(0.4, 1.0));
    sys.add_constraint(ConstraintKind::Perpendicular, d1, d2)
        .unwrap();

    let report = sys.solve().unwrap();
    assert!(report.status.is_success(), "status {:?}", report.status);
    let v1 = Vector2::from(*sys.geometry_value::<Direction2>(d1).unwrap());
    let v2 = Vector2::from(*sys.geometry_value::<Direction2>(d2).unwrap());
    assert!(v1.dot(&v2).abs() < 1e-6);
}

#[test]
fn solving_twice_converges_immediately_the_second_time() {
    let mut sys = System::new();
    sys.set_config(tight());
    let d1 = sys.add_geometry(Direction3::new(7.0, -0.5, 0.3));
    let d2 = sys.add_geometry(Direction3::new(0.2, 0.5, -0.1));
    sys.add_constraint(ConstraintKind::Perpendicular, d1, d2)
        .unwrap();

    let first = sys.solve().unwrap();
    assert!(first.status.is_success());
    let v1 = direction(&sys, d1);
    let v2 = direction(&sys, d2);

    let second = sys.solve().unwrap();
    assert!(second.status.is_success());
    // already satisfied; the state must not drift
    assert!((direction(&sys, d1) - v1).norm() < 1e-9);
    assert!((direction(&sys, d2) - v2).norm() < 1e-9);
}

#[test]
fn parallel_directions_align() {
    let mut sys = System::new();
    sys.set_config(tight());
    let d1 = sys.add_geometry(Direction3::new(1.0, 0.1, -0.2));
    let d2 = sys.add_geometry(Direction3::new(0.3, 0.9, 0.4));
    sys.add_constraint(ConstraintKind::Parallel, d1, d2).unwrap();

    let report = sys.solve().unwrap();
    assert!(report.status.is_success(), "status {:?}", report.status);
    let v1 = direction(&sys, d1);
    let v2 = direction(&sys, d2);
    assert!(v1.cross(&v2).norm() < 1e-6, "cross = {}", v1.cross(&v2).norm());
}

#[test]
fn angled_directions_meet_the_requested_angle() {
    let mut sys = System::new();
    sys.set_config(tight());
    let angle = std::f64::consts::PI / 3.0;
    let d1 = sys.add_geometry(Direction3::new(1.0, 0.0, 0.0));
    let d2 = sys.add_geometry(Direction3::new(0.9, 0.1, 0.0));
    sys.add_constraint(ConstraintKind::Angle(angle), d1, d2)
        .unwrap();

    let report = sys.solve().unwrap();
    assert!(report.status.is_success(), "status {:?}", report.status);
    let v1 = direction(&sys, d1);
    let v2 = direction(&sys, d2);
    let cos = v1.dot(&v2) / (v1.norm() * v2.norm());
    assert!((cos - angle.cos()).abs() < 1e-6, "cos = {cos}");
}

#[test]
fn quaternion_stays_unit_after_every_solve() {
    let mut sys = System::new();
    sys.set_config(tight());
    let d1 = sys.add_geometry(Direction3::new(0.3, 0.8, 0.1));
    let d2 = sys.add_geometry(Direction3::new(0.9, -0.1, 0.2));
    let d3 = sys.add_geometry(Direction3::new(0.2, 0.4, 0.9));
    let sc = sys.create_subcluster();
    sys.move_to_subcluster(d1, sc).unwrap();
    sys.move_to_subcluster(d2, sc).unwrap();
    sys.add_constraint(ConstraintKind::Perpendicular, d1, d3)
        .unwrap();
    sys.add_constraint(ConstraintKind::Perpendicular, d2, d3)
        .unwrap();

    for _ in 0..3 {
        sys.solve().unwrap();
        let pose = sys.cluster_pose(sc).unwrap();
        assert!((pose.rotation().into_inner().norm() - 1.0).abs() < 1e-10);
        // keep it dirty so the next pass re-solves
        let q = UnitQuaternion::from_euler_angles(0.0, 0.0, 0.3);
        let v = direction(&sys, d3);
        sys.set_geometry(d3, Direction3::from(q * v)).unwrap();
    }
}
