//! Scalar constraint equations per geometry tag pair.
//!
//! Every equation evaluates one residual from the parameter tuples of its two
//! geometries, plus directional derivatives against an arbitrary direction
//! vector (used when a geometry is driven by cluster parameters through its
//! differential columns) and full gradients (the fast path for free
//! geometry). Residuals are zero exactly on the constraint manifold.

use nalgebra::Vector3;

/// Geometry closer to degenerate than this gets zero gradients instead of
/// exploding ones.
const MIN_NORM: f64 = 1e-10;

/// One scalar equation between two parameter tuples.
pub trait Equation {
    fn residual(&self, p1: &[f64], p2: &[f64]) -> f64;
    /// Directional derivative with respect to the first tuple.
    fn gradient_first(&self, p1: &[f64], p2: &[f64], dp1: &[f64]) -> f64;
    /// Directional derivative with respect to the second tuple.
    fn gradient_second(&self, p1: &[f64], p2: &[f64], dp2: &[f64]) -> f64;
    /// Full gradient with respect to the first tuple; `grad` has its length.
    fn gradient_first_complete(&self, p1: &[f64], p2: &[f64], grad: &mut [f64]);
    fn gradient_second_complete(&self, p1: &[f64], p2: &[f64], grad: &mut [f64]);
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn v3(p: &[f64], offset: usize) -> Vector3<f64> {
    Vector3::new(p[offset], p[offset + 1], p[offset + 2])
}

fn write3(grad: &mut [f64], offset: usize, v: Vector3<f64>) {
    grad[offset] = v.x;
    grad[offset + 1] = v.y;
    grad[offset + 2] = v.z;
}

/// `p1[axis] - p2[axis]`; building block of coincidence and fix, one instance
/// per component.
pub struct ComponentDiff {
    pub axis: usize,
}

impl Equation for ComponentDiff {
    fn residual(&self, p1: &[f64], p2: &[f64]) -> f64 {
        p1[self.axis] - p2[self.axis]
    }
    fn gradient_first(&self, _p1: &[f64], _p2: &[f64], dp1: &[f64]) -> f64 {
        dp1[self.axis]
    }
    fn gradient_second(&self, _p1: &[f64], _p2: &[f64], dp2: &[f64]) -> f64 {
        -dp2[self.axis]
    }
    fn gradient_first_complete(&self, _p1: &[f64], _p2: &[f64], grad: &mut [f64]) {
        grad.fill(0.0);
        grad[self.axis] = 1.0;
    }
    fn gradient_second_complete(&self, _p1: &[f64], _p2: &[f64], grad: &mut [f64]) {
        grad.fill(0.0);
        grad[self.axis] = -1.0;
    }
}

/// `||p1 - p2|| - d` between two points of any dimension.
pub struct PointDistance {
    pub dim: usize,
    pub offset: f64,
}

impl PointDistance {
    fn separation(&self, p1: &[f64], p2: &[f64]) -> f64 {
        (0..self.dim)
            .map(|i| (p1[i] - p2[i]).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

impl Equation for PointDistance {
    fn residual(&self, p1: &[f64], p2: &[f64]) -> f64 {
        self.separation(p1, p2) - self.offset
    }
    fn gradient_first(&self, p1: &[f64], p2: &[f64], dp1: &[f64]) -> f64 {
        let d = self.separation(p1, p2);
        if d < MIN_NORM {
            return 0.0;
        }
        (0..self.dim).map(|i| (p1[i] - p2[i]) * dp1[i]).sum::<f64>() / d
    }
    fn gradient_second(&self, p1: &[f64], p2: &[f64], dp2: &[f64]) -> f64 {
        let d = self.separation(p1, p2);
        if d < MIN_NORM {
            return 0.0;
        }
        (0..self.dim).map(|i| (p2[i] - p1[i]) * dp2[i]).sum::<f64>() / d
    }
    fn gradient_first_complete(&self, p1: &[f64], p2: &[f64], grad: &mut [f64]) {
        grad.fill(0.0);
        let d = self.separation(p1, p2);
        if d < MIN_NORM {
            return;
        }
        for i in 0..self.dim {
            grad[i] = (p1[i] - p2[i]) / d;
        }
    }
    fn gradient_second_complete(&self, p1: &[f64], p2: &[f64], grad: &mut [f64]) {
        grad.fill(0.0);
        let d = self.separation(p1, p2);
        if d < MIN_NORM {
            return;
        }
        for i in 0..self.dim {
            grad[i] = (p2[i] - p1[i]) / d;
        }
    }
}

/// Distance of a point `p1` from a line `p2 = (origin, direction)`:
/// `||(p - o) x l|| / ||l|| - d`.
pub struct PointLineDistance {
    pub offset: f64,
}

impl PointLineDistance {
    fn parts(p1: &[f64], p2: &[f64]) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>) {
        let a = v3(p1, 0);
        let o = v3(p2, 0);
        let l = v3(p2, 3);
        (a - o, l, (a - o).cross(&l))
    }
}

impl Equation for PointLineDistance {
    fn residual(&self, p1: &[f64], p2: &[f64]) -> f64 {
        let (_, l, c) = Self::parts(p1, p2);
        let nl = l.norm();
        if nl < MIN_NORM {
            return -self.offset;
        }
        c.norm() / nl - self.offset
    }
    fn gradient_first(&self, p1: &[f64], p2: &[f64], dp1: &[f64]) -> f64 {
        let (_, l, c) = Self::parts(p1, p2);
        let (nc, nl) = (c.norm(), l.norm());
        if nc < MIN_NORM || nl < MIN_NORM {
            return 0.0;
        }
        v3(dp1, 0).dot(&l.cross(&c)) / (nc * nl)
    }
    fn gradient_second(&self, p1: &[f64], p2: &[f64], dp2: &[f64]) -> f64 {
        let (w, l, c) = Self::parts(p1, p2);
        let (nc, nl) = (c.norm(), l.norm());
        if nc < MIN_NORM || nl < MIN_NORM {
            return 0.0;
        }
        let dpo = v3(dp2, 0);
        let dpl = v3(dp2, 3);
        (-dpo.dot(&l.cross(&c)) + dpl.dot(&c.cross(&w))) / (nc * nl)
            - nc * l.dot(&dpl) / nl.powi(3)
    }
    fn gradient_first_complete(&self, p1: &[f64], p2: &[f64], grad: &mut [f64]) {
        grad.fill(0.0);
        let (_, l, c) = Self::parts(p1, p2);
        let (nc, nl) = (c.norm(), l.norm());
        if nc < MIN_NORM || nl < MIN_NORM {
            return;
        }
        write3(grad, 0, l.cross(&c) / (nc * nl));
    }
    fn gradient_second_complete(&self, p1: &[f64], p2: &[f64], grad: &mut [f64]) {
        grad.fill(0.0);
        let (w, l, c) = Self::parts(p1, p2);
        let (nc, nl) = (c.norm(), l.norm());
        if nc < MIN_NORM || nl < MIN_NORM {
            return;
        }
        write3(grad, 0, -l.cross(&c) / (nc * nl));
        write3(grad, 3, c.cross(&w) / (nc * nl) - l * (nc / nl.powi(3)));
    }
}

/// Signed distance of a point `p1` from a plane `p2 = (origin, normal)`:
/// `(p - o) . n / ||n|| - d`.
pub struct PointPlaneDistance {
    pub offset: f64,
}

impl Equation for PointPlaneDistance {
    fn residual(&self, p1: &[f64], p2: &[f64]) -> f64 {
        let w = v3(p1, 0) - v3(p2, 0);
        let n = v3(p2, 3);
        let nn = n.norm();
        if nn < MIN_NORM {
            return -self.offset;
        }
        w.dot(&n) / nn - self.offset
    }
    fn gradient_first(&self, _p1: &[f64], p2: &[f64], dp1: &[f64]) -> f64 {
        let n = v3(p2, 3);
        let nn = n.norm();
        if nn < MIN_NORM {
            return 0.0;
        }
        v3(dp1, 0).dot(&n) / nn
    }
    fn gradient_second(&self, p1: &[f64], p2: &[f64], dp2: &[f64]) -> f64 {
        let w = v3(p1, 0) - v3(p2, 0);
        let n = v3(p2, 3);
        let nn = n.norm();
        if nn < MIN_NORM {
            return 0.0;
        }
        let dpo = v3(dp2, 0);
        let dpn = v3(dp2, 3);
        (-dpo.dot(&n) + w.dot(&dpn)) / nn - w.dot(&n) * n.dot(&dpn) / nn.powi(3)
    }
    fn gradient_first_complete(&self, _p1: &[f64], p2: &[f64], grad: &mut [f64]) {
        grad.fill(0.0);
        let n = v3(p2, 3);
        let nn = n.norm();
        if nn < MIN_NORM {
            return;
        }
        write3(grad, 0, n / nn);
    }
    fn gradient_second_complete(&self, p1: &[f64], p2: &[f64], grad: &mut [f64]) {
        grad.fill(0.0);
        let w = v3(p1, 0) - v3(p2, 0);
        let n = v3(p2, 3);
        let nn = n.norm();
        if nn < MIN_NORM {
            return;
        }
        write3(grad, 0, -n / nn);
        write3(grad, 3, w / nn - n * (w.dot(&n) / nn.powi(3)));
    }
}

/// Signed distance between two skew lines:
/// `(o2 - o1) . (l1 x l2) / ||l1 x l2|| - d`. Parallel lines fall back to the
/// point-line distance of `o2` against the first line, with zero gradients.
pub struct LineLineDistance {
    pub offset: f64,
}

impl LineLineDistance {
    #[allow(clippy::type_complexity)]
    fn parts(
        p1: &[f64],
        p2: &[f64],
    ) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>, Vector3<f64>) {
        let l1 = v3(p1, 3);
        let l2 = v3(p2, 3);
        (v3(p2, 0) - v3(p1, 0), l1, l2, l1.cross(&l2))
    }
}

impl Equation for LineLineDistance {
    fn residual(&self, p1: &[f64], p2: &[f64]) -> f64 {
        let (w, l1, _, c) = Self::parts(p1, p2);
        let nc = c.norm();
        if nc < MIN_NORM {
            let nl = l1.norm();
            if nl < MIN_NORM {
                return -self.offset;
            }
            return w.cross(&l1).norm() / nl - self.offset;
        }
        w.dot(&c) / nc - self.offset
    }
    fn gradient_first(&self, p1: &[f64], p2: &[f64], dp1: &[f64]) -> f64 {
        let (w, _, l2, c) = Self::parts(p1, p2);
        let nc = c.norm();
        if nc < MIN_NORM {
            return 0.0;
        }
        let u = c / nc;
        let wp = (w - u * w.dot(&u)) / nc;
        -v3(dp1, 0).dot(&u) + v3(dp1, 3).dot(&l2.cross(&wp))
    }
    fn gradient_second(&self, p1: &[f64], p2: &[f64], dp2: &[f64]) -> f64 {
        let (w, l1, _, c) = Self::parts(p1, p2);
        let nc = c.norm();
        if nc < MIN_NORM {
            return 0.0;
        }
        let u = c / nc;
        let wp = (w - u * w.dot(&u)) / nc;
        v3(dp2, 0).dot(&u) + v3(dp2, 3).dot(&wp.cross(&l1))
    }
    fn gradient_first_complete(&self, p1: &[f64], p2: &[f64], grad: &mut [f64]) {
        grad.fill(0.0);
        let (w, _, l2, c) = Self::parts(p1, p2);
        let nc = c.norm();
        if nc < MIN_NORM {
            return;
        }
        let u = c / nc;
        let wp = (w - u * w.dot(&u)) / nc;
        write3(grad, 0, -u);
        write3(grad, 3, l2.cross(&wp));
    }
    fn gradient_second_complete(&self, p1: &[f64], p2: &[f64], grad: &mut [f64]) {
        grad.fill(0.0);
        let (w, l1, _, c) = Self::parts(p1, p2);
        let nc = c.norm();
        if nc < MIN_NORM {
            return;
        }
        let u = c / nc;
        let wp = (w - u * w.dot(&u)) / nc;
        write3(grad, 0, u);
        write3(grad, 3, wp.cross(&l1));
    }
}

/// Signed distance of a line `p1` (assumed parallel to the plane) from a
/// plane `p2`: `(o_l - o_p) . n / ||n|| - d`.
pub struct LinePlaneDistance {
    pub offset: f64,
}

impl Equation for LinePlaneDistance {
    fn residual(&self, p1: &[f64], p2: &[f64]) -> f64 {
        let w = v3(p1, 0) - v3(p2, 0);
        let n = v3(p2, 3);
        let nn = n.norm();
        if nn < MIN_NORM {
            return -self.offset;
        }
        w.dot(&n) / nn - self.offset
    }
    fn gradient_first(&self, _p1: &[f64], p2: &[f64], dp1: &[f64]) -> f64 {
        let n = v3(p2, 3);
        let nn = n.norm();
        if nn < MIN_NORM {
            return 0.0;
        }
        v3(dp1, 0).dot(&n) / nn
    }
    fn gradient_second(&self, p1: &[f64], p2: &[f64], dp2: &[f64]) -> f64 {
        let w = v3(p1, 0) - v3(p2, 0);
        let n = v3(p2, 3);
        let nn = n.norm();
        if nn < MIN_NORM {
            return 0.0;
        }
        let dpo = v3(dp2, 0);
        let dpn = v3(dp2, 3);
        (-dpo.dot(&n) + w.dot(&dpn)) / nn - w.dot(&n) * n.dot(&dpn) / nn.powi(3)
    }
    fn gradient_first_complete(&self, _p1: &[f64], p2: &[f64], grad: &mut [f64]) {
        grad.fill(0.0);
        let n = v3(p2, 3);
        let nn = n.norm();
        if nn < MIN_NORM {
            return;
        }
        write3(grad, 0, n / nn);
    }
    fn gradient_second_complete(&self, p1: &[f64], p2: &[f64], grad: &mut [f64]) {
        grad.fill(0.0);
        let w = v3(p1, 0) - v3(p2, 0);
        let n = v3(p2, 3);
        let nn = n.norm();
        if nn < MIN_NORM {
            return;
        }
        write3(grad, 0, -n / nn);
        write3(grad, 3, w / nn - n * (w.dot(&n) / nn.powi(3)));
    }
}

/// Signed distance between two (assumed parallel) planes, measured along the
/// first plane's normal.
pub struct PlanePlaneDistance {
    pub offset: f64,
}

impl Equation for PlanePlaneDistance {
    fn residual(&self, p1: &[f64], p2: &[f64]) -> f64 {
        let w = v3(p1, 0) - v3(p2, 0);
        let n = v3(p1, 3);
        let nn = n.norm();
        if nn < MIN_NORM {
            return -self.offset;
        }
        w.dot(&n) / nn - self.offset
    }
    fn gradient_first(&self, p1: &[f64], p2: &[f64], dp1: &[f64]) -> f64 {
        let w = v3(p1, 0) - v3(p2, 0);
        let n = v3(p1, 3);
        let nn = n.norm();
        if nn < MIN_NORM {
            return 0.0;
        }
        let dpo = v3(dp1, 0);
        let dpn = v3(dp1, 3);
        (dpo.dot(&n) + w.dot(&dpn)) / nn - w.dot(&n) * n.dot(&dpn) / nn.powi(3)
    }
    fn gradient_second(&self, p1: &[f64], _p2: &[f64], dp2: &[f64]) -> f64 {
        let n = v3(p1, 3);
        let nn = n.norm();
        if nn < MIN_NORM {
            return 0.0;
        }
        -v3(dp2, 0).dot(&n) / nn
    }
    fn gradient_first_complete(&self, p1: &[f64], p2: &[f64], grad: &mut [f64]) {
        grad.fill(0.0);
        let w = v3(p1, 0) - v3(p2, 0);
        let n = v3(p1, 3);
        let nn = n.norm();
        if nn < MIN_NORM {
            return;
        }
        write3(grad, 0, n / nn);
        write3(grad, 3, w / nn - n * (w.dot(&n) / nn.powi(3)));
    }
    fn gradient_second_complete(&self, p1: &[f64], _p2: &[f64], grad: &mut [f64]) {
        grad.fill(0.0);
        let n = v3(p1, 3);
        let nn = n.norm();
        if nn < MIN_NORM {
            return;
        }
        write3(grad, 0, -n / nn);
    }
}

/// `p1 . p2`; zero when the two directions are perpendicular.
pub struct DotProduct {
    pub dim: usize,
}

impl Equation for DotProduct {
    fn residual(&self, p1: &[f64], p2: &[f64]) -> f64 {
        dot(&p1[..self.dim], &p2[..self.dim])
    }
    fn gradient_first(&self, _p1: &[f64], p2: &[f64], dp1: &[f64]) -> f64 {
        dot(&dp1[..self.dim], &p2[..self.dim])
    }
    fn gradient_second(&self, p1: &[f64], _p2: &[f64], dp2: &[f64]) -> f64 {
        dot(&p1[..self.dim], &dp2[..self.dim])
    }
    fn gradient_first_complete(&self, _p1: &[f64], p2: &[f64], grad: &mut [f64]) {
        grad.copy_from_slice(&p2[..self.dim]);
    }
    fn gradient_second_complete(&self, p1: &[f64], _p2: &[f64], grad: &mut [f64]) {
        grad.copy_from_slice(&p1[..self.dim]);
    }
}

/// One component of `p1 x p2`; the three instances together express 3D
/// parallelism.
pub struct CrossComponent {
    pub axis: usize,
}

fn basis(i: usize) -> Vector3<f64> {
    let mut v = Vector3::zeros();
    v[i] = 1.0;
    v
}

impl Equation for CrossComponent {
    fn residual(&self, p1: &[f64], p2: &[f64]) -> f64 {
        v3(p1, 0).cross(&v3(p2, 0))[self.axis]
    }
    fn gradient_first(&self, _p1: &[f64], p2: &[f64], dp1: &[f64]) -> f64 {
        v3(dp1, 0).cross(&v3(p2, 0))[self.axis]
    }
    fn gradient_second(&self, p1: &[f64], _p2: &[f64], dp2: &[f64]) -> f64 {
        v3(p1, 0).cross(&v3(dp2, 0))[self.axis]
    }
    fn gradient_first_complete(&self, _p1: &[f64], p2: &[f64], grad: &mut [f64]) {
        let d2 = v3(p2, 0);
        for i in 0..3 {
            grad[i] = basis(i).cross(&d2)[self.axis];
        }
    }
    fn gradient_second_complete(&self, p1: &[f64], _p2: &[f64], grad: &mut [f64]) {
        let d1 = v3(p1, 0);
        for i in 0..3 {
            grad[i] = d1.cross(&basis(i))[self.axis];
        }
    }
}

/// Planar cross product `x1 y2 - y1 x2`; zero when parallel.
pub struct Cross2d;

impl Equation for Cross2d {
    fn residual(&self, p1: &[f64], p2: &[f64]) -> f64 {
        p1[0] * p2[1] - p1[1] * p2[0]
    }
    fn gradient_first(&self, _p1: &[f64], p2: &[f64], dp1: &[f64]) -> f64 {
        dp1[0] * p2[1] - dp1[1] * p2[0]
    }
    fn gradient_second(&self, p1: &[f64], _p2: &[f64], dp2: &[f64]) -> f64 {
        p1[0] * dp2[1] - p1[1] * dp2[0]
    }
    fn gradient_first_complete(&self, _p1: &[f64], p2: &[f64], grad: &mut [f64]) {
        grad[0] = p2[1];
        grad[1] = -p2[0];
    }
    fn gradient_second_complete(&self, p1: &[f64], _p2: &[f64], grad: &mut [f64]) {
        grad[0] = -p1[1];
        grad[1] = p1[0];
    }
}

/// `p1 . p2 / (||p1|| ||p2||) - cos(angle)`; scale-invariant direction angle.
pub struct CosineAngle {
    pub dim: usize,
    pub cos_angle: f64,
}

impl CosineAngle {
    fn norms(&self, p1: &[f64], p2: &[f64]) -> (f64, f64) {
        (
            dot(&p1[..self.dim], &p1[..self.dim]).sqrt(),
            dot(&p2[..self.dim], &p2[..self.dim]).sqrt(),
        )
    }
}

impl Equation for CosineAngle {
    fn residual(&self, p1: &[f64], p2: &[f64]) -> f64 {
        let (n1, n2) = self.norms(p1, p2);
        if n1 < MIN_NORM || n2 < MIN_NORM {
            return 0.0;
        }
        dot(&p1[..self.dim], &p2[..self.dim]) / (n1 * n2) - self.cos_angle
    }
    fn gradient_first(&self, p1: &[f64], p2: &[f64], dp1: &[f64]) -> f64 {
        let (n1, n2) = self.norms(p1, p2);
        if n1 < MIN_NORM || n2 < MIN_NORM {
            return 0.0;
        }
        let d = dot(&p1[..self.dim], &p2[..self.dim]);
        (0..self.dim)
            .map(|i| (p2[i] / (n1 * n2) - d * p1[i] / (n1.powi(3) * n2)) * dp1[i])
            .sum()
    }
    fn gradient_second(&self, p1: &[f64], p2: &[f64], dp2: &[f64]) -> f64 {
        let (n1, n2) = self.norms(p1, p2);
        if n1 < MIN_NORM || n2 < MIN_NORM {
            return 0.0;
        }
        let d = dot(&p1[..self.dim], &p2[..self.dim]);
        (0..self.dim)
            .map(|i| (p1[i] / (n1 * n2) - d * p2[i] / (n2.powi(3) * n1)) * dp2[i])
            .sum()
    }
    fn gradient_first_complete(&self, p1: &[f64], p2: &[f64], grad: &mut [f64]) {
        grad.fill(0.0);
        let (n1, n2) = self.norms(p1, p2);
        if n1 < MIN_NORM || n2 < MIN_NORM {
            return;
        }
        let d = dot(&p1[..self.dim], &p2[..self.dim]);
        for i in 0..self.dim {
            grad[i] = p2[i] / (n1 * n2) - d * p1[i] / (n1.powi(3) * n2);
        }
    }
    fn gradient_second_complete(&self, p1: &[f64], p2: &[f64], grad: &mut [f64]) {
        grad.fill(0.0);
        let (n1, n2) = self.norms(p1, p2);
        if n1 < MIN_NORM || n2 < MIN_NORM {
            return;
        }
        let d = dot(&p1[..self.dim], &p2[..self.dim]);
        for i in 0..self.dim {
            grad[i] = p1[i] / (n1 * n2) - d * p2[i] / (n2.powi(3) * n1);
        }
    }
}
