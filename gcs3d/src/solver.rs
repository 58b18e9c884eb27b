//! The per-cluster solve driver.
//!
//! For one cluster level it sizes the equation system, binds cluster and
//! free-geometry parameters, wires the constraint maps, and runs the dogleg
//! loop with a recalculation pass that refreshes clusters, then geometries,
//! then constraints. Changed subclusters solve recursively first, so by the
//! time a level runs, everything below it is already rigid-consistent.

use dogleg_faer::{MappedSystem, SolveReport, SolveStatus};
use faer::mat::{MatMut, MatRef};
use nalgebra::{UnitQuaternion, Vector3};

use crate::Error;
use crate::constraint::Constraint;
use crate::geometry::Geometry;
use crate::id::{ClusterId, ConstraintId, GeometryId};
use crate::kernel::Mes;
use crate::scheduler::Job;
use crate::system::{ClusterNode, System};

/// High-differential bailouts re-baseline and retry this many times before
/// the guard is dropped for the final attempt.
const MAX_REBASELINE: usize = 2;

/// The standard process job: solve the root cluster tree.
pub(crate) struct SolveJob;

impl Job<System> for SolveJob {
    fn execute(&mut self, sys: &mut System) -> Result<(), Error> {
        let root = sys.root();
        let report = solve_cluster(sys, root)?;
        sys.last_report = Some(report);
        Ok(())
    }
}

pub(crate) fn solve_cluster(
    sys: &mut System,
    cluster: ClusterId,
) -> Result<SolveReport<f64>, Error> {
    // changed subclusters first; their solved state feeds this level
    let subs = sys.clusters[cluster.0].subclusters.clone();
    for sub in subs {
        if sys.clusters[sub.0].changed && !sys.clusters[sub.0].fixed {
            solve_cluster(sys, sub)?;
        }
    }

    let mut attempt = 0;
    loop {
        let guarded = attempt < MAX_REBASELINE;
        let report = solve_cluster_once(sys, cluster, guarded)?;
        if report.status != SolveStatus::HighDifferential {
            sys.clusters[cluster.0].changed = false;
            log::debug!(
                "cluster {cluster:?}: {:?} (code {}) after {} iterations, |r| = {:e}",
                report.status,
                report.status.code(),
                report.iterations,
                report.residual,
            );
            return Ok(report);
        }
        // The bailed-out state was written back, so the next pass derives
        // fresh toplocal values from it: a finish/init re-baseline of every
        // cluster rotation.
        attempt += 1;
        log::debug!(
            "cluster {cluster:?}: high differential, re-baselining (attempt {attempt})"
        );
    }
}

fn solve_cluster_once(
    sys: &mut System,
    cluster: ClusterId,
    guarded: bool,
) -> Result<SolveReport<f64>, Error> {
    let config = sys.config;
    let System {
        geometries,
        constraints,
        clusters,
        ..
    } = sys;

    let node = &clusters[cluster.0];
    let mut params = 0;
    for &sub in &node.subclusters {
        if !clusters[sub.0].fixed {
            params += 6;
        }
    }
    for &gid in &node.geometries {
        params += geo(geometries, gid)?.parameter_count();
    }
    let mut equations = 0;
    for &cid in &node.constraints {
        equations += cons(constraints, cid)?.equation_count();
    }

    if params == 0 || equations == 0 {
        return Ok(SolveReport {
            status: SolveStatus::InvalidSystem,
            iterations: 0,
            residual: f64::NAN,
            unused_steps: 0,
        });
    }

    let subclusters = node.subclusters.clone();
    let level_geometries = node.geometries.clone();
    let level_constraints = node.constraints.clone();

    let mut mes = Mes::new(params, equations);

    // cluster parameters and downstream geometry
    let mut gmap: Vec<(ClusterId, Vec<GeometryId>)> = Vec::new();
    for &sub in &subclusters {
        if clusters[sub.0].fixed {
            mark_fixed_downstream(clusters, geometries, sub, sub)?;
        } else {
            let (rot_offset, trans_offset) = clusters[sub.0].math.bind(&mut mes);
            clusters[sub.0].math.init_maps(&mut mes);
            let mut collected = Vec::new();
            map_downstream(
                clusters,
                geometries,
                sub,
                sub,
                rot_offset,
                trans_offset,
                UnitQuaternion::identity(),
                Vector3::zeros(),
                &mut collected,
            )?;
            gmap.push((sub, collected));
        }
    }

    // free geometry parameters
    for &gid in &level_geometries {
        geo_mut(geometries, gid)?.bind_free(&mut mes);
    }

    // residual and Jacobian maps
    for &cid in &level_constraints {
        let (fid, sid) = {
            let c = cons(constraints, cid)?;
            (c.first(), c.second())
        };
        let first = geo(geometries, fid)?;
        let second = geo(geometries, sid)?;
        let c = constraints[cid.0]
            .as_mut()
            .ok_or(Error::UnknownConstraint(cid))?;
        c.set_maps(&mut mes, first, second);
    }

    let cfg = if guarded {
        config
    } else {
        config.without_differential_limit()
    };

    let mut ctx = ClusterSolve {
        mes,
        clusters: clusters.as_mut_slice(),
        geometries: geometries.as_mut_slice(),
        constraints: constraints.as_slice(),
        gmap: &gmap,
        free: &level_geometries,
        active: &level_constraints,
    };
    let report = dogleg_faer::solve(&mut ctx, &cfg);
    let mes = ctx.mes;

    // write back: downstream geometry first, then the cluster poses, then
    // the free geometry
    for (cid, geoms) in &gmap {
        for &gid in geoms {
            geo_mut(geometries, gid)?.finish_calculation(&mes);
        }
        clusters[cid.0].math.finish_calculation(&mes);
    }
    for &gid in &level_geometries {
        geo_mut(geometries, gid)?.finish_calculation(&mes);
    }

    Ok(report)
}

/// Binds every geometry below `current` to the six parameters of `top`,
/// deriving its toplocal value from the accumulated pose of the cluster
/// chain.
#[allow(clippy::too_many_arguments)]
fn map_downstream(
    clusters: &[ClusterNode],
    geometries: &mut [Option<Geometry>],
    top: ClusterId,
    current: ClusterId,
    rot_offset: usize,
    trans_offset: usize,
    q: UnitQuaternion<f64>,
    t: Vector3<f64>,
    out: &mut Vec<GeometryId>,
) -> Result<(), Error> {
    let node = &clusters[current.0];
    let nq = q * node.math.quaternion();
    let nt = t + node.math.translation();
    let inv_rot = nq.inverse().to_rotation_matrix().into_inner();

    for &gid in &node.geometries {
        let g = geo_mut(geometries, gid)?;
        g.set_cluster_mode(top, false, rot_offset, trans_offset);
        g.transform_inverse(&inv_rot, &(-nt));
        out.push(gid);
    }
    for &sub in &node.subclusters {
        map_downstream(
            clusters,
            geometries,
            top,
            sub,
            rot_offset,
            trans_offset,
            nq,
            nt,
            out,
        )?;
    }
    Ok(())
}

/// Pins every geometry below a fixed cluster to its global value.
fn mark_fixed_downstream(
    clusters: &[ClusterNode],
    geometries: &mut [Option<Geometry>],
    top: ClusterId,
    current: ClusterId,
) -> Result<(), Error> {
    let node = &clusters[current.0];
    for &gid in &node.geometries {
        geo_mut(geometries, gid)?.set_cluster_mode(top, true, 0, 0);
    }
    for &sub in &node.subclusters {
        mark_fixed_downstream(clusters, geometries, top, sub)?;
    }
    Ok(())
}

fn geo(geometries: &[Option<Geometry>], id: GeometryId) -> Result<&Geometry, Error> {
    geometries
        .get(id.0)
        .and_then(|g| g.as_ref())
        .ok_or(Error::UnknownGeometry(id))
}

fn geo_mut(geometries: &mut [Option<Geometry>], id: GeometryId) -> Result<&mut Geometry, Error> {
    geometries
        .get_mut(id.0)
        .and_then(|g| g.as_mut())
        .ok_or(Error::UnknownGeometry(id))
}

fn cons(constraints: &[Option<Constraint>], id: ConstraintId) -> Result<&Constraint, Error> {
    constraints
        .get(id.0)
        .and_then(|c| c.as_ref())
        .ok_or(Error::UnknownConstraint(id))
}

/// One level's equation system plus everything its recalculation touches.
struct ClusterSolve<'a> {
    mes: Mes,
    clusters: &'a mut [ClusterNode],
    geometries: &'a mut [Option<Geometry>],
    constraints: &'a [Option<Constraint>],
    gmap: &'a [(ClusterId, Vec<GeometryId>)],
    free: &'a [GeometryId],
    active: &'a [ConstraintId],
}

impl MappedSystem for ClusterSolve<'_> {
    type Real = f64;

    fn n_params(&self) -> usize {
        self.mes.n_params()
    }
    fn n_equations(&self) -> usize {
        self.mes.n_equations()
    }
    fn scaling(&self) -> f64 {
        self.mes.scaling()
    }
    fn parameters(&self) -> &[f64] {
        self.mes.parameter()
    }
    fn parameters_mut(&mut self) -> &mut [f64] {
        self.mes.parameter_mut()
    }
    fn residual(&self) -> &[f64] {
        self.mes.residual()
    }
    fn residual_mut(&mut self) -> &mut [f64] {
        self.mes.residual_mut()
    }
    fn jacobian(&self) -> MatRef<'_, f64> {
        self.mes.jacobian()
    }
    fn jacobian_mut(&mut self) -> MatMut<'_, f64> {
        self.mes.jacobian_mut()
    }

    /// Clusters first, their geometries second, constraints last; nothing
    /// downstream ever reads stale state within one iteration.
    fn recalculate(&mut self) {
        for (cid, geoms) in self.gmap {
            self.clusters[cid.0].math.recalculate(&self.mes);
            let math = &self.clusters[cid.0].math;
            for &gid in geoms {
                if let Some(g) = self.geometries[gid.0].as_mut() {
                    g.recalculate(math.pose());
                }
            }
        }
        for &gid in self.free {
            if let Some(g) = self.geometries[gid.0].as_mut() {
                g.refresh_free(&self.mes);
            }
        }
        for &cid in self.active {
            let Some(c) = self.constraints[cid.0].as_ref() else {
                continue;
            };
            let (Some(first), Some(second)) = (
                self.geometries[c.first().0].as_ref(),
                self.geometries[c.second().0].as_ref(),
            ) else {
                continue;
            };
            c.calculate(&mut self.mes, first, second);
        }
    }
}
