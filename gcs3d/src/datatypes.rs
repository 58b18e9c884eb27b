//! Shipped primitive types and their adaption to the solver.
//!
//! Any user type can participate by implementing [`GeometryValue`]; these are
//! the plain reference shapes used throughout the tests and examples.

use nalgebra::{Vector2, Vector3};

use crate::geometry::{GeometryKind, GeometryValue};

/// A located point in space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point3(Vector3<f64>);

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self(Vector3::new(x, y, z))
    }
}

impl From<Vector3<f64>> for Point3 {
    fn from(v: Vector3<f64>) -> Self {
        Self(v)
    }
}

impl From<Point3> for Vector3<f64> {
    fn from(p: Point3) -> Self {
        p.0
    }
}

impl GeometryValue for Point3 {
    fn kind(&self) -> GeometryKind {
        GeometryKind::Point3d
    }
    fn extract(&self, out: &mut [f64]) {
        out.copy_from_slice(self.0.as_slice());
    }
    fn inject(&mut self, values: &[f64]) {
        self.0 = Vector3::new(values[0], values[1], values[2]);
    }
}

/// A free direction; rotates with its cluster but never translates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Direction3(Vector3<f64>);

impl Direction3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self(Vector3::new(x, y, z))
    }
}

impl From<Vector3<f64>> for Direction3 {
    fn from(v: Vector3<f64>) -> Self {
        Self(v)
    }
}

impl From<Direction3> for Vector3<f64> {
    fn from(d: Direction3) -> Self {
        d.0
    }
}

impl GeometryValue for Direction3 {
    fn kind(&self) -> GeometryKind {
        GeometryKind::Direction3d
    }
    fn extract(&self, out: &mut [f64]) {
        out.copy_from_slice(self.0.as_slice());
    }
    fn inject(&mut self, values: &[f64]) {
        self.0 = Vector3::new(values[0], values[1], values[2]);
    }
}

/// An infinite line: a point on it plus its direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Line3 {
    pub origin: Vector3<f64>,
    pub direction: Vector3<f64>,
}

impl Line3 {
    pub fn new(origin: Vector3<f64>, direction: Vector3<f64>) -> Self {
        Self { origin, direction }
    }
}

impl GeometryValue for Line3 {
    fn kind(&self) -> GeometryKind {
        GeometryKind::Line3d
    }
    fn extract(&self, out: &mut [f64]) {
        out[..3].copy_from_slice(self.origin.as_slice());
        out[3..].copy_from_slice(self.direction.as_slice());
    }
    fn inject(&mut self, values: &[f64]) {
        self.origin = Vector3::new(values[0], values[1], values[2]);
        self.direction = Vector3::new(values[3], values[4], values[5]);
    }
}

/// An infinite plane: a point on it plus its normal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane3 {
    pub origin: Vector3<f64>,
    pub normal: Vector3<f64>,
}

impl Plane3 {
    pub fn new(origin: Vector3<f64>, normal: Vector3<f64>) -> Self {
        Self { origin, normal }
    }
}

impl GeometryValue for Plane3 {
    fn kind(&self) -> GeometryKind {
        GeometryKind::Plane3d
    }
    fn extract(&self, out: &mut [f64]) {
        out[..3].copy_from_slice(self.origin.as_slice());
        out[3..].copy_from_slice(self.normal.as_slice());
    }
    fn inject(&mut self, values: &[f64]) {
        self.origin = Vector3::new(values[0], values[1], values[2]);
        self.normal = Vector3::new(values[3], values[4], values[5]);
    }
}

/// A cylinder: axis point, axis direction and radius.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cylinder3 {
    pub origin: Vector3<f64>,
    pub direction: Vector3<f64>,
    pub radius: f64,
}

impl Cylinder3 {
    pub fn new(origin: Vector3<f64>, direction: Vector3<f64>, radius: f64) -> Self {
        Self {
            origin,
            direction,
            radius,
        }
    }
}

impl GeometryValue for Cylinder3 {
    fn kind(&self) -> GeometryKind {
        GeometryKind::Cylinder3d
    }
    fn extract(&self, out: &mut [f64]) {
        out[..3].copy_from_slice(self.origin.as_slice());
        out[3..6].copy_from_slice(self.direction.as_slice());
        out[6] = self.radius;
    }
    fn inject(&mut self, values: &[f64]) {
        self.origin = Vector3::new(values[0], values[1], values[2]);
        self.direction = Vector3::new(values[3], values[4], values[5]);
        self.radius = values[6];
    }
}

/// A planar point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point2(Vector2<f64>);

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self(Vector2::new(x, y))
    }
}

impl From<Point2> for Vector2<f64> {
    fn from(p: Point2) -> Self {
        p.0
    }
}

impl GeometryValue for Point2 {
    fn kind(&self) -> GeometryKind {
        GeometryKind::Point2d
    }
    fn extract(&self, out: &mut [f64]) {
        out.copy_from_slice(self.0.as_slice());
    }
    fn inject(&mut self, values: &[f64]) {
        self.0 = Vector2::new(values[0], values[1]);
    }
}

/// A planar direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Direction2(Vector2<f64>);

impl Direction2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self(Vector2::new(x, y))
    }
}

impl From<Direction2> for Vector2<f64> {
    fn from(d: Direction2) -> Self {
        d.0
    }
}

impl GeometryValue for Direction2 {
    fn kind(&self) -> GeometryKind {
        GeometryKind::Direction2d
    }
    fn extract(&self, out: &mut [f64]) {
        out.copy_from_slice(self.0.as_slice());
    }
    fn inject(&mut self, values: &[f64]) {
        self.0 = Vector2::new(values[0], values[1]);
    }
}

/// An infinite planar line: point plus direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Line2 {
    pub origin: Vector2<f64>,
    pub direction: Vector2<f64>,
}

impl Line2 {
    pub fn new(origin: Vector2<f64>, direction: Vector2<f64>) -> Self {
        Self { origin, direction }
    }
}

impl GeometryValue for Line2 {
    fn kind(&self) -> GeometryKind {
        GeometryKind::Line2d
    }
    fn extract(&self, out: &mut [f64]) {
        out[..2].copy_from_slice(self.origin.as_slice());
        out[2..].copy_from_slice(self.direction.as_slice());
    }
    fn inject(&mut self, values: &[f64]) {
        self.origin = Vector2::new(values[0], values[1]);
        self.direction = Vector2::new(values[2], values[3]);
    }
}
