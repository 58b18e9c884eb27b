//! The assembly façade: arenas for geometries, constraints, clusters and
//! parts, the scheduler wiring, and the interactive helpers (point drag,
//! geometry reassignment).
//!
//! The cluster tree is plain input state here; nothing rewrites it during a
//! solve. Constraints live on the deepest cluster containing both endpoint
//! geometries, so a pair inside one subcluster is resolved by that
//! subcluster's own solve and a pair spanning two subclusters by their
//! common ancestor.

use dogleg_faer::{DoglegCfg, SolveReport};

use crate::Error;
use crate::cluster::ClusterMath;
use crate::constraint::{Constraint, ConstraintKind};
use crate::geometry::{AnyGeometryValue, Geometry, GeometryKind, GeometryValue};
use crate::id::{ClusterId, ConstraintId, GeometryId, PartId};
use crate::scheduler::{Job, Scheduler};
use crate::solver::SolveJob;
use crate::transform::Transform3;

pub(crate) struct ClusterNode {
    pub(crate) math: ClusterMath,
    pub(crate) geometries: Vec<GeometryId>,
    pub(crate) subclusters: Vec<ClusterId>,
    pub(crate) constraints: Vec<ConstraintId>,
    pub(crate) parent: Option<ClusterId>,
    pub(crate) fixed: bool,
    pub(crate) changed: bool,
}

impl ClusterNode {
    fn new(parent: Option<ClusterId>) -> Self {
        Self {
            math: ClusterMath::new(),
            geometries: Vec::new(),
            subclusters: Vec::new(),
            constraints: Vec::new(),
            parent,
            fixed: false,
            changed: true,
        }
    }
}

/// A rigid user body: a pose handle plus the cluster its geometries live in.
pub(crate) struct Part {
    pub(crate) pose: Transform3,
    pub(crate) cluster: ClusterId,
}

struct DragState {
    point: GeometryId,
    goal: Option<GeometryId>,
    goal_cluster: Option<ClusterId>,
    constraint: Option<ConstraintId>,
}

/// Copies every part's pose into its cluster math before the solve.
struct PrepareCluster;

impl Job<System> for PrepareCluster {
    fn execute(&mut self, sys: &mut System) -> Result<(), Error> {
        let System {
            parts, clusters, ..
        } = sys;
        for part in parts.iter() {
            clusters[part.cluster.0]
                .math
                .set_committed(*part.pose.rotation(), part.pose.translation());
        }
        Ok(())
    }
}

/// Copies the solved cluster math back into every part's pose.
struct EvaluateCluster;

impl Job<System> for EvaluateCluster {
    fn execute(&mut self, sys: &mut System) -> Result<(), Error> {
        let System {
            parts, clusters, ..
        } = sys;
        for part in parts.iter_mut() {
            let math = &clusters[part.cluster.0].math;
            part.pose = Transform3::new(*math.quaternion(), math.translation(), 1.0);
        }
        Ok(())
    }
}

pub struct System {
    pub(crate) geometries: Vec<Option<Geometry>>,
    pub(crate) geometry_owner: Vec<ClusterId>,
    pub(crate) constraints: Vec<Option<Constraint>>,
    pub(crate) clusters: Vec<ClusterNode>,
    pub(crate) parts: Vec<Part>,
    pub(crate) config: DoglegCfg<f64>,
    pub(crate) last_report: Option<SolveReport<f64>>,
    scheduler: Option<Scheduler<System>>,
    drag: Option<DragState>,
}

impl System {
    pub fn new() -> Self {
        let mut scheduler = Scheduler::default();
        scheduler.add_preprocess_job(Box::new(PrepareCluster));
        scheduler.add_process_job(Box::new(SolveJob));
        scheduler.add_postprocess_job(Box::new(EvaluateCluster));
        Self {
            geometries: Vec::new(),
            geometry_owner: Vec::new(),
            constraints: Vec::new(),
            clusters: vec![ClusterNode::new(None)],
            parts: Vec::new(),
            config: DoglegCfg::default(),
            last_report: None,
            scheduler: Some(scheduler),
            drag: None,
        }
    }

    pub(crate) fn root(&self) -> ClusterId {
        ClusterId(0)
    }

    /// Dogleg tolerances used by subsequent solves.
    pub fn config(&self) -> &DoglegCfg<f64> {
        &self.config
    }

    pub fn set_config(&mut self, config: DoglegCfg<f64>) {
        self.config = config;
    }

    /// Outcome of the most recent solve, if any.
    pub fn last_report(&self) -> Option<SolveReport<f64>> {
        self.last_report
    }

    // geometry ------------------------------------------------------------

    pub fn add_geometry<T: GeometryValue + 'static>(&mut self, value: T) -> GeometryId {
        let root = self.root();
        self.insert_geometry(Box::new(value), root)
    }

    fn insert_geometry(
        &mut self,
        value: Box<dyn AnyGeometryValue>,
        owner: ClusterId,
    ) -> GeometryId {
        let id = GeometryId(self.geometries.len());
        self.geometries.push(Some(Geometry::new(value)));
        self.geometry_owner.push(owner);
        self.clusters[owner.0].geometries.push(id);
        self.mark_changed(owner);
        id
    }

    pub(crate) fn geometry(&self, id: GeometryId) -> Result<&Geometry, Error> {
        self.geometries
            .get(id.0)
            .and_then(|g| g.as_ref())
            .ok_or(Error::UnknownGeometry(id))
    }

    pub fn geometry_kind(&self, id: GeometryId) -> Result<GeometryKind, Error> {
        self.geometry(id).map(|g| g.kind())
    }

    /// World-frame parameter tuple of a geometry.
    pub fn geometry_global(&self, id: GeometryId) -> Result<&[f64], Error> {
        self.geometry(id).map(|g| g.global())
    }

    /// The stored user value, downcast to its concrete type.
    pub fn geometry_value<T: GeometryValue + 'static>(&self, id: GeometryId) -> Result<&T, Error> {
        self.geometry(id)?
            .value()
            .as_any()
            .downcast_ref::<T>()
            .ok_or(Error::ValueTypeMismatch(id))
    }

    /// Replaces a geometry's value (possibly with a different kind) and
    /// re-runs equation selection on every constraint touching it.
    pub fn set_geometry<T: GeometryValue + 'static>(
        &mut self,
        id: GeometryId,
        value: T,
    ) -> Result<(), Error> {
        self.reset_geometry_value(id, Box::new(value))
    }

    fn reset_geometry_value(
        &mut self,
        id: GeometryId,
        value: Box<dyn AnyGeometryValue>,
    ) -> Result<(), Error> {
        self.geometries
            .get_mut(id.0)
            .and_then(|g| g.as_mut())
            .ok_or(Error::UnknownGeometry(id))?
            .reset_value(value);

        let touching: Vec<ConstraintId> = self
            .constraints
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.as_ref()
                    .filter(|c| c.touches(id))
                    .map(|_| ConstraintId(i))
            })
            .collect();
        for cid in touching {
            let (first_kind, second_kind) = {
                let c = self.constraints[cid.0]
                    .as_ref()
                    .ok_or(Error::UnknownConstraint(cid))?;
                (
                    self.geometry(c.first())?.kind(),
                    self.geometry(c.second())?.kind(),
                )
            };
            self.constraints[cid.0]
                .as_mut()
                .ok_or(Error::UnknownConstraint(cid))?
                .rebind(first_kind, second_kind)?;
        }

        let owner = self.geometry_owner[id.0];
        self.mark_changed(owner);
        Ok(())
    }

    // constraints ---------------------------------------------------------

    pub fn add_constraint(
        &mut self,
        kind: ConstraintKind,
        first: GeometryId,
        second: GeometryId,
    ) -> Result<ConstraintId, Error> {
        let first_kind = self.geometry(first)?.kind();
        let second_kind = self.geometry(second)?.kind();
        let constraint = Constraint::new(kind, (first, first_kind), (second, second_kind))?;

        let id = ConstraintId(self.constraints.len());
        self.constraints.push(Some(constraint));
        let home = self.common_cluster(self.geometry_owner[first.0], self.geometry_owner[second.0]);
        self.clusters[home.0].constraints.push(id);
        self.mark_changed(home);
        Ok(id)
    }

    pub fn remove_constraint(&mut self, id: ConstraintId) -> Result<(), Error> {
        self.constraints
            .get_mut(id.0)
            .and_then(|slot| slot.take())
            .ok_or(Error::UnknownConstraint(id))?;
        for node in &mut self.clusters {
            node.constraints.retain(|&c| c != id);
        }
        let root = self.root();
        self.mark_changed(root);
        Ok(())
    }

    // clusters ------------------------------------------------------------

    /// A fresh rigid subcluster directly under the root.
    pub fn create_subcluster(&mut self) -> ClusterId {
        let id = ClusterId(self.clusters.len());
        let root = self.root();
        self.clusters.push(ClusterNode::new(Some(root)));
        self.clusters[root.0].subclusters.push(id);
        self.mark_changed(id);
        id
    }

    /// A fresh rigid subcluster nested under an existing cluster.
    pub fn create_subcluster_in(&mut self, parent: ClusterId) -> Result<ClusterId, Error> {
        if parent.0 >= self.clusters.len() {
            return Err(Error::UnknownCluster(parent));
        }
        let id = ClusterId(self.clusters.len());
        self.clusters.push(ClusterNode::new(Some(parent)));
        self.clusters[parent.0].subclusters.push(id);
        self.mark_changed(id);
        Ok(id)
    }

    /// Moves a geometry vertex into a subcluster and re-places its incident
    /// constraints at their new common cluster.
    pub fn move_to_subcluster(
        &mut self,
        geometry: GeometryId,
        cluster: ClusterId,
    ) -> Result<(), Error> {
        let kind = self.geometry(geometry)?.kind();
        if kind.is_planar() {
            return Err(Error::PlanarInCluster);
        }
        if cluster.0 >= self.clusters.len() {
            return Err(Error::UnknownCluster(cluster));
        }

        let old = self.geometry_owner[geometry.0];
        self.clusters[old.0].geometries.retain(|&g| g != geometry);
        self.clusters[cluster.0].geometries.push(geometry);
        self.geometry_owner[geometry.0] = cluster;

        let touching: Vec<ConstraintId> = self
            .constraints
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.as_ref()
                    .filter(|c| c.touches(geometry))
                    .map(|_| ConstraintId(i))
            })
            .collect();
        for cid in touching {
            for node in &mut self.clusters {
                node.constraints.retain(|&c| c != cid);
            }
            let (first, second) = {
                let c = self.constraints[cid.0]
                    .as_ref()
                    .ok_or(Error::UnknownConstraint(cid))?;
                (c.first(), c.second())
            };
            let home =
                self.common_cluster(self.geometry_owner[first.0], self.geometry_owner[second.0]);
            self.clusters[home.0].constraints.push(cid);
            self.mark_changed(home);
        }

        self.mark_changed(old);
        self.mark_changed(cluster);
        Ok(())
    }

    /// Holds a cluster's pose constant during solves; its geometry becomes
    /// read-only boundary data.
    pub fn set_fixed(&mut self, cluster: ClusterId, fixed: bool) -> Result<(), Error> {
        self.clusters
            .get_mut(cluster.0)
            .ok_or(Error::UnknownCluster(cluster))?
            .fixed = fixed;
        self.mark_changed(cluster);
        Ok(())
    }

    /// Solved pose of a cluster.
    pub fn cluster_pose(&self, cluster: ClusterId) -> Result<Transform3, Error> {
        self.clusters
            .get(cluster.0)
            .map(|node| node.math.committed())
            .ok_or(Error::UnknownCluster(cluster))
    }

    fn cluster_path(&self, mut cluster: ClusterId) -> Vec<ClusterId> {
        let mut path = vec![cluster];
        while let Some(parent) = self.clusters[cluster.0].parent {
            path.push(parent);
            cluster = parent;
        }
        path.reverse();
        path
    }

    fn common_cluster(&self, a: ClusterId, b: ClusterId) -> ClusterId {
        let pa = self.cluster_path(a);
        let pb = self.cluster_path(b);
        let mut lca = self.root();
        for (x, y) in pa.iter().zip(pb.iter()) {
            if x == y {
                lca = *x;
            } else {
                break;
            }
        }
        lca
    }

    fn mark_changed(&mut self, mut cluster: ClusterId) {
        loop {
            self.clusters[cluster.0].changed = true;
            match self.clusters[cluster.0].parent {
                Some(parent) => cluster = parent,
                None => break,
            }
        }
    }

    // parts ---------------------------------------------------------------

    /// Registers a rigid body with the given pose; its geometries are added
    /// with [`System::add_part_geometry`] and stay rigid relative to each
    /// other.
    pub fn add_part(&mut self, pose: Transform3) -> PartId {
        let cluster = self.create_subcluster();
        self.clusters[cluster.0]
            .math
            .set_committed(*pose.rotation(), pose.translation());
        let id = PartId(self.parts.len());
        self.parts.push(Part { pose, cluster });
        id
    }

    /// Adds a world-frame geometry that moves rigidly with the part.
    pub fn add_part_geometry<T: GeometryValue + 'static>(
        &mut self,
        part: PartId,
        value: T,
    ) -> Result<GeometryId, Error> {
        if value.kind().is_planar() {
            return Err(Error::PlanarInCluster);
        }
        let cluster = self
            .parts
            .get(part.0)
            .ok_or(Error::UnknownPart(part))?
            .cluster;
        Ok(self.insert_geometry(Box::new(value), cluster))
    }

    pub fn part_pose(&self, part: PartId) -> Result<Transform3, Error> {
        self.parts
            .get(part.0)
            .map(|p| p.pose)
            .ok_or(Error::UnknownPart(part))
    }

    pub fn set_part_pose(&mut self, part: PartId, pose: Transform3) -> Result<(), Error> {
        let cluster = {
            let p = self.parts.get_mut(part.0).ok_or(Error::UnknownPart(part))?;
            p.pose = pose;
            p.cluster
        };
        self.mark_changed(cluster);
        Ok(())
    }

    pub fn fix_part(&mut self, part: PartId, fixed: bool) -> Result<(), Error> {
        let cluster = self
            .parts
            .get(part.0)
            .ok_or(Error::UnknownPart(part))?
            .cluster;
        self.set_fixed(cluster, fixed)
    }

    // solving -------------------------------------------------------------

    /// Runs the scheduler: part poses in, cluster tree solve, part poses out.
    pub fn solve(&mut self) -> Result<SolveReport<f64>, Error> {
        let mut scheduler = self.scheduler.take().ok_or(Error::SolverUnavailable)?;
        let outcome = scheduler.execute(self);
        self.scheduler = Some(scheduler);
        outcome?;
        self.last_report.ok_or(Error::SolverUnavailable)
    }

    // dragging ------------------------------------------------------------

    /// Begins dragging a geometry; subsequent [`System::drag_to`] calls pull
    /// it toward a moving target.
    pub fn start_drag(&mut self, geometry: GeometryId) -> Result<(), Error> {
        self.geometry(geometry)?;
        self.finish_drag();
        self.drag = Some(DragState {
            point: geometry,
            goal: None,
            goal_cluster: None,
            constraint: None,
        });
        Ok(())
    }

    /// Updates the drag target and re-solves. The target lives in a fixed
    /// carrier cluster, so the dragged geometry does all the moving.
    pub fn drag_to<T: GeometryValue + 'static>(
        &mut self,
        target: T,
    ) -> Result<SolveReport<f64>, Error> {
        let mut drag = self.drag.take().ok_or(Error::NoActiveDrag)?;
        let expected = match self.geometry(drag.point) {
            Ok(g) => g.kind(),
            Err(e) => {
                self.drag = Some(drag);
                return Err(e);
            }
        };
        if target.kind() != expected {
            let got = target.kind();
            self.drag = Some(drag);
            return Err(Error::DragKindMismatch { expected, got });
        }

        match drag.goal {
            Some(goal) => self.reset_geometry_value(goal, Box::new(target))?,
            None => {
                let cluster = self.create_subcluster();
                self.clusters[cluster.0].fixed = true;
                let goal = self.insert_geometry(Box::new(target), cluster);
                let constraint = self.add_constraint(ConstraintKind::Fix, drag.point, goal)?;
                drag.goal = Some(goal);
                drag.goal_cluster = Some(cluster);
                drag.constraint = Some(constraint);
            }
        }
        self.drag = Some(drag);
        self.solve()
    }

    /// Removes the transient drag constraint and target.
    pub fn finish_drag(&mut self) {
        let Some(drag) = self.drag.take() else {
            return;
        };
        if let Some(cid) = drag.constraint {
            let _ = self.remove_constraint(cid);
        }
        if let Some(goal) = drag.goal {
            let owner = self.geometry_owner[goal.0];
            self.clusters[owner.0].geometries.retain(|&g| g != goal);
            if let Some(slot) = self.geometries.get_mut(goal.0) {
                *slot = None;
            }
            if let Some(cluster) = drag.goal_cluster {
                let root = self.root();
                self.clusters[root.0].subclusters.retain(|&c| c != cluster);
            }
        }
        let root = self.root();
        self.mark_changed(root);
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}
