use nalgebra::{UnitQuaternion, Vector3};
use proptest::prelude::*;

use crate::{Transform3, is_same};

proptest! {
    #[test]
    fn transform_inverse_cancels(
        roll in -3.0..3.0f64,
        pitch in -1.5..1.5f64,
        yaw in -3.0..3.0f64,
        tx in -10.0..10.0f64,
        ty in -10.0..10.0f64,
        tz in -10.0..10.0f64,
        scale in 0.1..10.0f64,
    ) {
        let t = Transform3::new(
            UnitQuaternion::from_euler_angles(roll, pitch, yaw),
            Vector3::new(tx, ty, tz),
            scale,
        );
        let id = t * t.inverse();
        prop_assert!(id.is_approx(&Transform3::identity(), 1e-9));
        let id = t.inverse() * t;
        prop_assert!(id.is_approx(&Transform3::identity(), 1e-9));
    }

    #[test]
    fn composition_applies_sequentially(
        roll1 in -3.0..3.0f64,
        yaw1 in -3.0..3.0f64,
        roll2 in -3.0..3.0f64,
        yaw2 in -3.0..3.0f64,
        tx in -5.0..5.0f64,
        ty in -5.0..5.0f64,
        vx in -2.0..2.0f64,
        vy in -2.0..2.0f64,
        vz in -2.0..2.0f64,
    ) {
        // rigid (scale 1) transforms compose like function application
        let t1 = Transform3::new(
            UnitQuaternion::from_euler_angles(roll1, 0.0, yaw1),
            Vector3::new(tx, ty, 0.0),
            1.0,
        );
        let t2 = Transform3::new(
            UnitQuaternion::from_euler_angles(roll2, 0.0, yaw2),
            Vector3::new(0.0, ty, tx),
            1.0,
        );
        let v = Vector3::new(vx, vy, vz);
        let composed = (t1 * t2).apply(v);
        let sequential = t1.apply(t2.apply(v));
        prop_assert!((composed - sequential).norm() < 1e-9);
    }

    #[test]
    fn apply_round_trips_through_the_inverse(
        roll in -3.0..3.0f64,
        yaw in -3.0..3.0f64,
        tx in -10.0..10.0f64,
        tz in -10.0..10.0f64,
        vx in -4.0..4.0f64,
        vy in -4.0..4.0f64,
    ) {
        let t = Transform3::new(
            UnitQuaternion::from_euler_angles(roll, 0.3, yaw),
            Vector3::new(tx, 1.0, tz),
            1.0,
        );
        let v = Vector3::new(vx, vy, 0.5);
        let back = t.inverse().apply(t.apply(v));
        prop_assert!(is_same(back.as_slice(), v.as_slice()));
        prop_assert!((back - v).norm() < 1e-9);
    }
}
