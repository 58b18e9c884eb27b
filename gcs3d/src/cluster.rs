//! Per-cluster rigid-body state.
//!
//! During a solve a cluster's pose is parametrized by three scaled axis-angle
//! rotation components plus three translation components, both living in the
//! mapped equation system. The committed quaternion and translation survive
//! between solves; `init_maps` seeds the solve parameters from them and
//! `finish_calculation` commits the solved parameters back.

use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};

use crate::kernel::{Mes, ParamMap};
use crate::transform::{DiffTransform3, Transform3};

/// Below this norm the axis-angle vector is treated as the identity rotation.
const IDENTITY_EPS: f64 = 1e-10;

/// Reconstructs the quaternion from the scaled axis-angle vector:
/// `Q = (cos ||v||, sin ||v|| / ||v|| * v)`.
pub(crate) fn quaternion_from_axis_angle(v: &Vector3<f64>) -> UnitQuaternion<f64> {
    let n = v.norm();
    if n < IDENTITY_EPS {
        return UnitQuaternion::identity();
    }
    let fac = n.sin() / n;
    UnitQuaternion::from_quaternion(Quaternion::new(n.cos(), v.x * fac, v.y * fac, v.z * fac))
}

/// Inverse of [`quaternion_from_axis_angle`]: `v = vec(Q) * theta / sin theta`
/// with `theta = acos(w)`. The sign of `Q` is canonicalized to `w >= 0` first
/// so `theta` stays below `pi/2` and clear of the `pi` singularity.
pub(crate) fn axis_angle_from_quaternion(q: &UnitQuaternion<f64>) -> Vector3<f64> {
    let mut w = q.w;
    let mut vec = q.vector().into_owned();
    if w < 0.0 {
        w = -w;
        vec = -vec;
    }
    let theta = w.clamp(-1.0, 1.0).acos();
    if theta.sin() < IDENTITY_EPS {
        return Vector3::zeros();
    }
    vec * (theta / theta.sin())
}

/// Rigid-body math of one cluster.
pub struct ClusterMath {
    quaternion: UnitQuaternion<f64>,
    original_translation: Vector3<f64>,
    /// Solve-time pose: quaternion and translation rebuilt from the mapped
    /// parameters, differential carrying the three `dR/dnorm_q` blocks.
    pose: DiffTransform3,
    norm_q_map: Option<ParamMap>,
    translation_map: Option<ParamMap>,
}

impl ClusterMath {
    /// Fresh clusters start from a fixed non-identity baseline quaternion so
    /// the axis-angle parameters have usable gradients from the first
    /// iteration on.
    pub fn new() -> Self {
        let quaternion =
            UnitQuaternion::from_quaternion(Quaternion::new(1.0, 2.0, 3.0, 4.0));
        Self {
            quaternion,
            original_translation: Vector3::zeros(),
            pose: DiffTransform3::default(),
            norm_q_map: None,
            translation_map: None,
        }
    }

    pub fn quaternion(&self) -> &UnitQuaternion<f64> {
        &self.quaternion
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.original_translation
    }

    pub fn committed(&self) -> Transform3 {
        Transform3::new(self.quaternion, self.original_translation, 1.0)
    }

    pub fn set_committed(&mut self, quaternion: UnitQuaternion<f64>, translation: Vector3<f64>) {
        self.quaternion = quaternion;
        self.original_translation = translation;
    }

    /// Solve-time pose, valid after [`ClusterMath::recalculate`].
    pub fn pose(&self) -> &DiffTransform3 {
        &self.pose
    }

    /// Rotation matrix form of the solve-time pose.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.pose.rotation().to_rotation_matrix().into_inner()
    }

    /// Claims the six cluster parameters (rotation block first) and returns
    /// their offsets.
    pub fn bind(&mut self, mes: &mut Mes) -> (usize, usize) {
        let rot = mes.set_vector3_map();
        let trans = mes.set_vector3_map();
        self.norm_q_map = Some(rot);
        self.translation_map = Some(trans);
        (rot.offset, trans.offset)
    }

    /// Seeds the mapped parameters from the committed state.
    ///
    /// A committed rotation at (or extremely close to) the identity has no
    /// usable axis-angle gradient, so such clusters are re-baselined onto the
    /// default baseline quaternion first. The baseline is an arbitrary
    /// parametrization anchor; descendant geometry is expressed relative to
    /// it afterwards, so world-frame results are unaffected.
    pub fn init_maps(&mut self, mes: &mut Mes) {
        let (Some(rot), Some(trans)) = (self.norm_q_map, self.translation_map) else {
            return;
        };
        if self.quaternion.angle() < 1e-6 {
            self.quaternion =
                UnitQuaternion::from_quaternion(Quaternion::new(1.0, 2.0, 3.0, 4.0));
        }
        let norm_q = axis_angle_from_quaternion(&self.quaternion);
        mes.params_mut(rot).copy_from_slice(norm_q.as_slice());
        mes.params_mut(trans)
            .copy_from_slice(self.original_translation.as_slice());
    }

    /// Commits the solved parameters: quaternion rebuilt from the axis-angle
    /// block and re-normalized, translation taken verbatim.
    pub fn finish_calculation(&mut self, mes: &Mes) {
        let (Some(rot), Some(trans)) = (self.norm_q_map, self.translation_map) else {
            return;
        };
        let p = mes.params(rot);
        self.quaternion = quaternion_from_axis_angle(&Vector3::new(p[0], p[1], p[2]));
        let t = mes.params(trans);
        self.original_translation = Vector3::new(t[0], t[1], t[2]);
    }

    /// Rebuilds the solve-time pose from the mapped parameters: quaternion,
    /// translation, and the three `dR/dnorm_q_i` matrices stored column-block
    /// wise in the pose differential.
    pub fn recalculate(&mut self, mes: &Mes) {
        let (Some(rot), Some(trans)) = (self.norm_q_map, self.translation_map) else {
            return;
        };
        let p = mes.params(rot);
        let norm_q = Vector3::new(p[0], p[1], p[2]);
        let t = mes.params(trans);
        let translation = Vector3::new(t[0], t[1], t[2]);

        let n = norm_q.norm();
        if n < IDENTITY_EPS {
            *self.pose.transform_mut() =
                Transform3::new(UnitQuaternion::identity(), translation, 1.0);
            *self.pose.differential_mut() = nalgebra::SMatrix::zeros();
            return;
        }

        let q = quaternion_from_axis_angle(&norm_q);
        *self.pose.transform_mut() = Transform3::new(q, translation, 1.0);

        // Partial derivatives of the quaternion components with respect to
        // the axis-angle components (a, b, c):
        //   Q = (cos n, a/n sin n, b/n sin n, c/n sin n),  n = ||norm_q||
        let sn = n.sin() / n;
        let mul = (n.cos() - sn) / (n * n);
        let (a, b, c) = (norm_q.x, norm_q.y, norm_q.z);

        let dxa = sn + a * a * mul;
        let dxb = a * b * mul;
        let dxc = a * c * mul;

        let dya = b * a * mul;
        let dyb = sn + b * b * mul;
        let dyc = b * c * mul;

        let dza = c * a * mul;
        let dzb = c * b * mul;
        let dzc = sn + c * c * mul;

        let dwa = -sn * a;
        let dwb = -sn * b;
        let dwc = -sn * c;

        let (qw, qx, qy, qz) = (q.w, q.i, q.j, q.k);
        let diff = self.pose.differential_mut();

        diff[(0, 0)] = -4.0 * (qy * dya + qz * dza);
        diff[(0, 1)] = -2.0 * (qw * dza + dwa * qz) + 2.0 * (qx * dya + dxa * qy);
        diff[(0, 2)] = 2.0 * (dwa * qy + qw * dya) + 2.0 * (dxa * qz + qx * dza);
        diff[(1, 0)] = 2.0 * (qw * dza + dwa * qz) + 2.0 * (qx * dya + dxa * qy);
        diff[(1, 1)] = -4.0 * (qx * dxa + qz * dza);
        diff[(1, 2)] = -2.0 * (dwa * qx + qw * dxa) + 2.0 * (dya * qz + qy * dza);
        diff[(2, 0)] = -2.0 * (dwa * qy + qw * dya) + 2.0 * (dxa * qz + qx * dza);
        diff[(2, 1)] = 2.0 * (dwa * qx + qw * dxa) + 2.0 * (dya * qz + qy * dza);
        diff[(2, 2)] = -4.0 * (qx * dxa + qy * dya);

        diff[(0, 3)] = -4.0 * (qy * dyb + qz * dzb);
        diff[(0, 4)] = -2.0 * (qw * dzb + dwb * qz) + 2.0 * (qx * dyb + dxb * qy);
        diff[(0, 5)] = 2.0 * (dwb * qy + qw * dyb) + 2.0 * (dxb * qz + qx * dzb);
        diff[(1, 3)] = 2.0 * (qw * dzb + dwb * qz) + 2.0 * (qx * dyb + dxb * qy);
        diff[(1, 4)] = -4.0 * (qx * dxb + qz * dzb);
        diff[(1, 5)] = -2.0 * (dwb * qx + qw * dxb) + 2.0 * (dyb * qz + qy * dzb);
        diff[(2, 3)] = -2.0 * (dwb * qy + qw * dyb) + 2.0 * (dxb * qz + qx * dzb);
        diff[(2, 4)] = 2.0 * (dwb * qx + qw * dxb) + 2.0 * (dyb * qz + qy * dzb);
        diff[(2, 5)] = -4.0 * (qx * dxb + qy * dyb);

        diff[(0, 6)] = -4.0 * (qy * dyc + qz * dzc);
        diff[(0, 7)] = -2.0 * (qw * dzc + dwc * qz) + 2.0 * (qx * dyc + dxc * qy);
        diff[(0, 8)] = 2.0 * (dwc * qy + qw * dyc) + 2.0 * (dxc * qz + qx * dzc);
        diff[(1, 6)] = 2.0 * (qw * dzc + dwc * qz) + 2.0 * (qx * dyc + dxc * qy);
        diff[(1, 7)] = -4.0 * (qx * dxc + qz * dzc);
        diff[(1, 8)] = -2.0 * (dwc * qx + qw * dxc) + 2.0 * (dyc * qz + qy * dzc);
        diff[(2, 6)] = -2.0 * (dwc * qy + qw * dyc) + 2.0 * (dxc * qz + qx * dzc);
        diff[(2, 7)] = 2.0 * (dwc * qx + qw * dxc) + 2.0 * (dyc * qz + qy * dzc);
        diff[(2, 8)] = -4.0 * (qx * dxc + qy * dyc);
    }
}

impl Default for ClusterMath {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bound_math() -> (ClusterMath, Mes) {
        let mut mes = Mes::new(6, 1);
        let mut math = ClusterMath::new();
        math.bind(&mut mes);
        (math, mes)
    }

    #[test]
    fn axis_angle_round_trips_through_quaternion() {
        for v in [
            Vector3::new(0.1, -0.2, 0.3),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(-0.4, 0.9, 0.2),
            Vector3::zeros(),
        ] {
            let q = quaternion_from_axis_angle(&v);
            let back = axis_angle_from_quaternion(&q);
            assert_relative_eq!(back, v, epsilon = 1e-12);
        }
    }

    #[test]
    fn init_recalculate_finish_preserves_committed_state() {
        let (mut math, mut mes) = bound_math();
        math.set_committed(
            UnitQuaternion::from_euler_angles(0.4, -0.2, 0.7),
            Vector3::new(1.0, 2.0, 3.0),
        );
        let q0 = *math.quaternion();
        let t0 = math.translation();

        math.init_maps(&mut mes);
        math.recalculate(&mes);
        math.finish_calculation(&mes);

        assert!(math.quaternion().angle_to(&q0) < 1e-10);
        assert_relative_eq!(math.translation(), t0, epsilon = 1e-10);
    }

    #[test]
    fn committed_quaternion_stays_normalized() {
        let (mut math, mut mes) = bound_math();
        math.init_maps(&mut mes);
        // perturb the solve parameters and commit
        mes.parameter_mut()[..3].copy_from_slice(&[0.3, -0.1, 0.25]);
        math.finish_calculation(&mes);
        assert!((math.quaternion().into_inner().norm() - 1.0).abs() < 1e-10);
    }

    #[test]
    fn recalculate_matches_direct_quaternion_matrix() {
        // The fixed vector (0.1, -0.2, 0.3) must produce exactly the matrix
        // of Q = (cos theta, sin(theta)/theta * v), and the same quaternion
        // must be committed by finish_calculation.
        let (mut math, mut mes) = bound_math();
        let v = Vector3::new(0.1, -0.2, 0.3);
        mes.parameter_mut()[..3].copy_from_slice(v.as_slice());
        math.recalculate(&mes);

        let theta = v.norm();
        let fac = theta.sin() / theta;
        let expected = UnitQuaternion::from_quaternion(Quaternion::new(
            theta.cos(),
            v.x * fac,
            v.y * fac,
            v.z * fac,
        ));
        let r = math.rotation_matrix();
        assert_relative_eq!(
            r,
            expected.to_rotation_matrix().into_inner(),
            epsilon = 1e-12
        );

        math.finish_calculation(&mes);
        assert!(math.quaternion().angle_to(&expected) < 1e-12);
    }

    #[test]
    fn identity_axis_angle_yields_identity_and_zero_gradient() {
        let (mut math, mut mes) = bound_math();
        mes.parameter_mut()[..3].copy_from_slice(&[0.0, 0.0, 0.0]);
        mes.parameter_mut()[3..6].copy_from_slice(&[4.0, 5.0, 6.0]);
        math.recalculate(&mes);
        assert_relative_eq!(
            math.rotation_matrix(),
            Matrix3::identity(),
            epsilon = 1e-15
        );
        assert_eq!(
            math.pose().differential().iter().filter(|v| **v != 0.0).count(),
            0
        );
        assert_relative_eq!(
            math.pose().translation(),
            Vector3::new(4.0, 5.0, 6.0),
            epsilon = 1e-15
        );
    }

    #[test]
    fn rotation_gradient_matches_finite_differences() {
        let (mut math, mut mes) = bound_math();
        let samples = [
            Vector3::new(1e-6, 0.0, 0.0),
            Vector3::new(0.01, -0.02, 0.005),
            Vector3::new(0.3, 0.1, -0.2),
            Vector3::new(-0.5, 0.7, 0.3),
            Vector3::new(0.6, -0.6, 0.5),
        ];
        let h = 1e-7;
        for v in samples {
            mes.parameter_mut()[..3].copy_from_slice(v.as_slice());
            math.recalculate(&mes);
            let diff = *math.pose().differential();
            for k in 0..3 {
                let mut vp = v;
                let mut vm = v;
                vp[k] += h;
                vm[k] -= h;
                let rp = quaternion_from_axis_angle(&vp)
                    .to_rotation_matrix()
                    .into_inner();
                let rm = quaternion_from_axis_angle(&vm)
                    .to_rotation_matrix()
                    .into_inner();
                let numeric = (rp - rm) / (2.0 * h);
                for i in 0..3 {
                    for j in 0..3 {
                        assert!(
                            (diff[(i, 3 * k + j)] - numeric[(i, j)]).abs() < 1e-6,
                            "dR/dq{k} mismatch at ({i},{j}) for {v:?}: {} vs {}",
                            diff[(i, 3 * k + j)],
                            numeric[(i, j)],
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn identity_committed_rotation_is_rebaselined() {
        let (mut math, mut mes) = bound_math();
        math.set_committed(UnitQuaternion::identity(), Vector3::zeros());
        math.init_maps(&mut mes);
        let p = &mes.parameter()[..3];
        let norm = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
        assert!(norm > 0.1, "identity baseline must move away from zero");
    }
}
