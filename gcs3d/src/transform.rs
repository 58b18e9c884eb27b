//! Rigid-body-plus-scale transforms in two and three dimensions.
//!
//! The transform applies as `(R v + t) * s`. Composition and inversion follow
//! the same convention, so `t * t.inverse()` is the identity for any scale.

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use nalgebra::{SMatrix, UnitComplex, UnitQuaternion, Vector2, Vector3};

/// The rotation component of a [`Transform`]: a unit quaternion in 3D, a unit
/// complex number (planar angle) in 2D.
pub trait Rotation: Copy + PartialEq + fmt::Debug {
    const DIM: usize;
    type Vector: Copy
        + PartialEq
        + fmt::Debug
        + Add<Output = Self::Vector>
        + Sub<Output = Self::Vector>
        + Mul<f64, Output = Self::Vector>
        + Div<f64, Output = Self::Vector>;
    /// `DIM x 3*DIM` matrix of rotation partial derivatives.
    type DiffMatrix: Copy + fmt::Debug;

    fn identity() -> Self;
    fn renormalize(&mut self);
    /// `self` applied after `other`.
    fn compose(&self, other: &Self) -> Self;
    fn inverted(&self) -> Self;
    fn rotate(&self, v: Self::Vector) -> Self::Vector;
    fn zero_vector() -> Self::Vector;
    fn zero_diff() -> Self::DiffMatrix;
    fn vector_norm(v: Self::Vector) -> f64;
    fn is_approx(&self, other: &Self, prec: f64) -> bool;
}

impl Rotation for UnitQuaternion<f64> {
    const DIM: usize = 3;
    type Vector = Vector3<f64>;
    type DiffMatrix = SMatrix<f64, 3, 9>;

    fn identity() -> Self {
        UnitQuaternion::identity()
    }
    fn renormalize(&mut self) {
        let q = self.into_inner().normalize();
        *self = UnitQuaternion::new_unchecked(q);
    }
    fn compose(&self, other: &Self) -> Self {
        self * other
    }
    fn inverted(&self) -> Self {
        self.inverse()
    }
    fn rotate(&self, v: Self::Vector) -> Self::Vector {
        self * v
    }
    fn zero_vector() -> Self::Vector {
        Vector3::zeros()
    }
    fn zero_diff() -> Self::DiffMatrix {
        SMatrix::zeros()
    }
    fn vector_norm(v: Self::Vector) -> f64 {
        v.norm()
    }
    fn is_approx(&self, other: &Self, prec: f64) -> bool {
        self.angle_to(other) < prec
    }
}

impl Rotation for UnitComplex<f64> {
    const DIM: usize = 2;
    type Vector = Vector2<f64>;
    type DiffMatrix = SMatrix<f64, 2, 6>;

    fn identity() -> Self {
        UnitComplex::identity()
    }
    fn renormalize(&mut self) {
        let c = self.into_inner();
        let norm = c.norm();
        if norm > 0.0 {
            *self = UnitComplex::new_unchecked(c / norm);
        }
    }
    fn compose(&self, other: &Self) -> Self {
        self * other
    }
    fn inverted(&self) -> Self {
        self.inverse()
    }
    fn rotate(&self, v: Self::Vector) -> Self::Vector {
        self * v
    }
    fn zero_vector() -> Self::Vector {
        Vector2::zeros()
    }
    fn zero_diff() -> Self::DiffMatrix {
        SMatrix::zeros()
    }
    fn vector_norm(v: Self::Vector) -> f64 {
        v.norm()
    }
    fn is_approx(&self, other: &Self, prec: f64) -> bool {
        self.angle_to(other).abs() < prec
    }
}

/// Rotation, translation and uniform scale. The rotation is re-normalized
/// after every mutation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform<R: Rotation> {
    rotation: R,
    translation: R::Vector,
    scale: f64,
}

pub type Transform3 = Transform<UnitQuaternion<f64>>;
pub type Transform2 = Transform<UnitComplex<f64>>;

impl<R: Rotation> Transform<R> {
    pub fn new(mut rotation: R, translation: R::Vector, scale: f64) -> Self {
        rotation.renormalize();
        Self {
            rotation,
            translation,
            scale,
        }
    }

    pub fn identity() -> Self {
        Self {
            rotation: R::identity(),
            translation: R::zero_vector(),
            scale: 1.0,
        }
    }

    pub fn rotation(&self) -> &R {
        &self.rotation
    }
    pub fn translation(&self) -> R::Vector {
        self.translation
    }
    pub fn scaling(&self) -> f64 {
        self.scale
    }

    pub fn rotate(&mut self, rotation: &R) -> &mut Self {
        let mut r = *rotation;
        r.renormalize();
        self.rotation = r.compose(&self.rotation);
        self
    }

    pub fn translate(&mut self, offset: R::Vector) -> &mut Self {
        self.translation = self.translation + offset;
        self
    }

    pub fn scale(&mut self, factor: f64) -> &mut Self {
        self.scale *= factor;
        self
    }

    pub fn invert(&mut self) -> &mut Self {
        self.rotation = self.rotation.inverted();
        self.translation = self.rotation.rotate(self.translation) * (-self.scale);
        self.scale = 1.0 / self.scale;
        self
    }

    pub fn inverse(&self) -> Self {
        let mut res = *self;
        res.invert();
        res
    }

    /// Rotates without translating or scaling.
    pub fn rotate_vector(&self, v: R::Vector) -> R::Vector {
        self.rotation.rotate(v)
    }

    pub fn translate_vector(&self, v: R::Vector) -> R::Vector {
        v + self.translation
    }

    pub fn scale_vector(&self, v: R::Vector) -> R::Vector {
        v * self.scale
    }

    /// The full transform `(R v + t) * s`.
    pub fn apply(&self, v: R::Vector) -> R::Vector {
        (self.rotation.rotate(v) + self.translation) * self.scale
    }

    pub fn is_approx(&self, other: &Self, prec: f64) -> bool {
        self.rotation.is_approx(&other.rotation, prec)
            && R::vector_norm(self.translation - other.translation) < prec
            && (self.scale - other.scale).abs() < prec
    }

    pub fn set_identity(&mut self) {
        self.rotation = R::identity();
        self.translation = R::zero_vector();
        self.scale = 1.0;
    }

    pub fn normalize(&mut self) -> &mut Self {
        self.rotation.renormalize();
        self
    }
}

impl<R: Rotation> Default for Transform<R> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<R: Rotation> Mul for Transform<R> {
    type Output = Self;

    /// `(R1 R2, R1 t2 / s1 + t1, s1 s2)`
    fn mul(self, other: Self) -> Self {
        let mut rotation = self.rotation.compose(&other.rotation);
        rotation.renormalize();
        Self {
            rotation,
            translation: self.translation + self.rotation.rotate(other.translation) / self.scale,
            scale: self.scale * other.scale,
        }
    }
}

impl<R: Rotation> std::ops::MulAssign for Transform<R> {
    fn mul_assign(&mut self, other: Self) {
        *self = *self * other;
    }
}

/// A [`Transform`] that additionally carries the partial derivatives of its
/// rotation with respect to each rotation parameter, one `DIM x DIM` block
/// per parameter.
#[derive(Clone, Copy, Debug)]
pub struct DiffTransform<R: Rotation> {
    transform: Transform<R>,
    diff: R::DiffMatrix,
}

pub type DiffTransform3 = DiffTransform<UnitQuaternion<f64>>;
pub type DiffTransform2 = DiffTransform<UnitComplex<f64>>;

impl<R: Rotation> DiffTransform<R> {
    pub fn new(transform: Transform<R>) -> Self {
        Self {
            transform,
            diff: R::zero_diff(),
        }
    }

    pub fn transform(&self) -> &Transform<R> {
        &self.transform
    }
    pub fn transform_mut(&mut self) -> &mut Transform<R> {
        &mut self.transform
    }
    pub fn rotation(&self) -> &R {
        self.transform.rotation()
    }
    pub fn translation(&self) -> R::Vector {
        self.transform.translation()
    }

    pub fn differential(&self) -> &R::DiffMatrix {
        &self.diff
    }
    pub fn differential_mut(&mut self) -> &mut R::DiffMatrix {
        &mut self.diff
    }
}

impl<R: Rotation> Default for DiffTransform<R> {
    fn default() -> Self {
        Self::new(Transform::identity())
    }
}

impl<R: Rotation> From<Transform<R>> for DiffTransform<R> {
    fn from(transform: Transform<R>) -> Self {
        Self::new(transform)
    }
}
