//! Constant-rate random load.
//!
//! [`RandomOperationIssuer`] picks one random graph operation at a time:
//! with probability `permissions_probability` it replaces the permissions of
//! a known edge, otherwise it toggles a random edge (adds it if absent,
//! removes it if present). [`issue_at_rate`] drives it at a fixed rate and
//! logs one stats line per report interval; [`run_constant_load`] does so
//! against a cluster while a dispatcher thread processes the events.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::cluster::Cluster;
use crate::config::LoadConfig;
use crate::error::{LoadError, ZoneIndexResult};
use crate::graph::{Edge, EdgeId, Permissions, VertexId};
use crate::inbox::DispatchReport;
use crate::instrumentation::EventStats;

/// Anything that accepts graph operations: an in-process cluster, or a
/// client for remote zones.
pub trait OperationIssuer: Send + Sync {
    fn add_edge(&self, edge: Edge) -> ZoneIndexResult<()>;
    fn remove_edge(&self, id: &EdgeId) -> ZoneIndexResult<()>;
    fn set_permissions(&self, id: &EdgeId, permissions: Permissions) -> ZoneIndexResult<()>;
}

/// The operation chosen by one [`RandomOperationIssuer::perform`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    AddEdge(Edge),
    RemoveEdge(EdgeId),
    SetPermissions(EdgeId, Permissions),
}

/// Issues random operations against a fixed vertex population.
pub struct RandomOperationIssuer<'a> {
    issuer: &'a dyn OperationIssuer,
    rng: StdRng,
    vertices: Vec<VertexId>,
    edges: BTreeSet<EdgeId>,
    permissions_probability: f64,
}

impl<'a> RandomOperationIssuer<'a> {
    /// `vertices` is the population to draw endpoints from, `edges` the
    /// edges known to exist at start.
    pub fn new(
        issuer: &'a dyn OperationIssuer,
        vertices: Vec<VertexId>,
        edges: impl IntoIterator<Item = EdgeId>,
        config: &LoadConfig,
    ) -> Result<Self, LoadError> {
        if vertices.len() < 2 {
            return Err(LoadError::EmptyGraph {
                what: "pair of vertices".into(),
            });
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            issuer,
            rng,
            vertices,
            edges: edges.into_iter().collect(),
            permissions_probability: config.permissions_probability,
        })
    }

    /// Edges this issuer believes exist.
    pub fn known_edges(&self) -> &BTreeSet<EdgeId> {
        &self.edges
    }

    /// Pick and apply one operation.
    ///
    /// The known-edge set is updated only when the operation succeeds.
    pub fn perform(&mut self) -> ZoneIndexResult<Operation> {
        let op = self.next_operation();
        match &op {
            Operation::AddEdge(edge) => {
                self.issuer.add_edge(edge.clone())?;
                self.edges.insert(edge.id());
            }
            Operation::RemoveEdge(id) => {
                self.issuer.remove_edge(id)?;
                self.edges.remove(id);
            }
            Operation::SetPermissions(id, permissions) => {
                self.issuer.set_permissions(id, *permissions)?;
            }
        }
        Ok(op)
    }

    fn next_operation(&mut self) -> Operation {
        if !self.edges.is_empty() && self.rng.gen_bool(self.permissions_probability) {
            let i = self.rng.gen_range(0..self.edges.len());
            if let Some(id) = self.edges.iter().nth(i) {
                return Operation::SetPermissions(id.clone(), self.random_permissions());
            }
        }

        let (from, to) = self.random_pair();
        let id = EdgeId::new(from.clone(), to.clone());
        if self.edges.contains(&id) {
            Operation::RemoveEdge(id)
        } else {
            Operation::AddEdge(Edge::new(from, to, self.random_permissions()))
        }
    }

    fn random_pair(&mut self) -> (VertexId, VertexId) {
        let n = self.vertices.len();
        let a = self.rng.gen_range(0..n);
        let mut b = self.rng.gen_range(0..n - 1);
        if b >= a {
            b += 1;
        }
        (self.vertices[a].clone(), self.vertices[b].clone())
    }

    fn random_permissions(&mut self) -> Permissions {
        Permissions::from_bits(self.rng.gen_range(0..=Permissions::ALL.bits()))
    }
}

/// Totals from one load run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub operations: u64,
    pub errors: u64,
    /// The run ended at the first failed operation.
    pub aborted: bool,
    #[serde(skip)]
    pub dispatch: DispatchReport,
    pub elapsed_ms: u64,
}

/// Perform operations from `issuer` at `config.operations_per_second` until
/// `stop` is set, `duration` has passed, or an operation fails while
/// `exit_on_fail` is on.
///
/// `stats` supplies the event counters for the periodic report line. The
/// returned report has no dispatch counters.
pub fn issue_at_rate(
    issuer: &mut RandomOperationIssuer<'_>,
    config: &LoadConfig,
    duration: Option<Duration>,
    stop: &AtomicBool,
    stats: impl Fn() -> EventStats,
) -> LoadReport {
    let interval = Duration::from_secs(1) / config.operations_per_second.max(1);
    let report_every = Duration::from_secs(config.report_interval_secs.max(1));

    let started = Instant::now();
    let mut next_op = started;
    let mut next_report = started + report_every;
    let mut window_ops = 0u64;
    let mut report = LoadReport::default();

    while !stop.load(Ordering::Relaxed) {
        if duration.is_some_and(|d| started.elapsed() >= d) {
            break;
        }
        let now = Instant::now();
        if now < next_op {
            std::thread::sleep((next_op - now).min(report_every));
            continue;
        }
        next_op += interval;

        report.operations += 1;
        window_ops += 1;
        if let Err(e) = issuer.perform() {
            report.errors += 1;
            tracing::error!(error = %e, "operation failed");
            if config.exit_on_fail {
                report.aborted = true;
                break;
            }
        }

        if Instant::now() >= next_report {
            let rate = window_ops as f64 / report_every.as_secs_f64();
            tracing::info!(
                stats = %stats(),
                ops_per_sec = rate,
                err = report.errors,
                tot = report.operations,
                "load"
            );
            window_ops = 0;
            next_report += report_every;
        }
    }

    report.elapsed_ms = started.elapsed().as_millis() as u64;
    report
}

/// Issue random operations against `cluster` at `config.operations_per_second`
/// until `stop` is set or `duration` has passed.
///
/// Events are processed concurrently by the cluster's workers; after the
/// last operation the run waits for the inbox to drain. With
/// `exit_on_fail`, the first failed operation ends the run with
/// [`LoadError::Aborted`].
pub fn run_constant_load(
    cluster: &Cluster,
    config: &LoadConfig,
    duration: Option<Duration>,
    stop: Arc<AtomicBool>,
) -> ZoneIndexResult<LoadReport> {
    let mut issuer =
        RandomOperationIssuer::new(cluster, cluster.vertex_ids(), cluster.edge_ids(), config)?;
    let dispatch_stop = AtomicBool::new(false);

    tracing::info!(
        ops_per_sec = config.operations_per_second,
        vertices = cluster.vertex_ids().len(),
        edges = issuer.known_edges().len(),
        workers = cluster.workers(),
        "starting constant load"
    );

    let report = std::thread::scope(|s| {
        let dispatcher = s.spawn(|| cluster.run(&dispatch_stop));
        let mut report = issue_at_rate(&mut issuer, config, duration, &stop, || cluster.stats());

        dispatch_stop.store(true, Ordering::Relaxed);
        report.dispatch = dispatcher.join().unwrap_or_else(|_| {
            tracing::error!("dispatcher thread panicked");
            DispatchReport::default()
        });
        report
    });

    tracing::info!(
        operations = report.operations,
        errors = report.errors,
        processed = report.dispatch.processed,
        failed = report.dispatch.failed,
        elapsed_ms = report.elapsed_ms,
        "load finished"
    );
    if report.aborted {
        return Err(LoadError::Aborted {
            failed: report.errors,
        }
        .into());
    }
    Ok(report)
}

/// Register SIGINT to set the returned flag.
pub fn stop_on_interrupt() -> Result<Arc<AtomicBool>, LoadError> {
    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop)).map_err(|e| {
        LoadError::Signal {
            message: e.to_string(),
        }
    })?;
    Ok(stop)
}
