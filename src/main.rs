//! zone-index CLI: inspect, index and load-test zone graphs.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use zone_index::cluster::Cluster;
use zone_index::config::ZoneConfig;
use zone_index::graph::VertexId;
use zone_index::graph::loader::GraphLoader;
use zone_index::index::EffectiveVertex;
use zone_index::load::{run_constant_load, stop_on_interrupt};

/// Enables the notification log written by the cluster's instrumentation.
const EVENT_LOG_DIRECTIVE: &str = "zone_index::instrumentation=trace";

#[derive(Parser)]
#[command(
    name = "zone-index",
    version,
    about = "Incremental effective-reachability index over zone-partitioned graphs"
)]
struct Cli {
    /// Zone configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Local zone id; overrides the config file and ZONE_ID.
    #[arg(long, global = true)]
    zone: Option<String>,

    /// Dispatcher worker threads; overrides the config file.
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Log every processor notification at trace level.
    #[arg(long, global = true)]
    trace_events: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show vertex/edge counts and zones of a graph file.
    Info {
        /// Path to the JSON graph document.
        #[arg(long)]
        graph: PathBuf,
    },

    /// Build the full index in-process and print effective relations.
    Index {
        /// Path to the JSON graph document.
        #[arg(long)]
        graph: PathBuf,

        /// Only print this vertex (`zone:name`).
        #[arg(long)]
        vertex: Option<VertexId>,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Apply random operations at a constant rate until Ctrl-C.
    Load {
        /// Path to the JSON graph document.
        #[arg(long)]
        graph: PathBuf,

        /// Operations per second.
        #[arg(short = 'n', long)]
        ops: Option<u32>,

        /// Stop after this many seconds.
        #[arg(long)]
        duration: Option<u64>,

        /// Stop at the first failed operation.
        #[arg(long)]
        exit_on_fail: bool,

        /// Probability of a permission change instead of an edge toggle.
        #[arg(long)]
        prob_perms: Option<f64>,

        /// RNG seed for a reproducible run.
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    let cli = Cli::parse();

    let mut filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if cli.trace_events {
        filter = filter.add_directive(EVENT_LOG_DIRECTIVE.parse().into_diagnostic()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &cli.config {
        Some(path) => ZoneConfig::load(path)?,
        None => ZoneConfig::default(),
    }
    .apply_env()
    .with_zone_override(cli.zone.clone());
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    config.validate()?;

    match cli.command {
        Commands::Info { graph } => {
            let loader = GraphLoader::from_path(&graph, config.zone_id.clone())?;
            let g = loader.graph();
            if let Some(zone) = &config.zone_id {
                println!("Zone:     {zone}");
            }
            println!("Vertices: {}", g.vertex_count());
            println!("Edges:    {}", g.edge_count());
            let zones: Vec<String> = g.all_zones().iter().map(|z| z.to_string()).collect();
            println!("Zones:    {}", zones.join(", "));
        }

        Commands::Index {
            graph,
            vertex,
            json,
        } => {
            let cluster = Cluster::load(&graph, config.workers)?;
            let report = cluster.build_index();
            if report.failed > 0 {
                eprintln!("warning: {} event(s) failed while indexing", report.failed);
            }

            let ids: Vec<VertexId> = match vertex {
                Some(id) => vec![id],
                None => cluster
                    .vertex_ids()
                    .into_iter()
                    .filter(|id| config.zone_id.as_ref().is_none_or(|z| id.owner() == z))
                    .collect(),
            };

            let mut rows = Vec::with_capacity(ids.len());
            for id in ids {
                let parents = cluster.effective_parents(&id)?;
                let children = cluster.effective_children(&id)?;
                if json {
                    rows.push(serde_json::json!({
                        "vertex": id,
                        "parents": parents,
                        "children": children,
                    }));
                } else {
                    print_vertex(&id, &parents, &children);
                }
            }
            if json {
                let out = serde_json::to_string_pretty(&rows).into_diagnostic()?;
                println!("{out}");
            }
            println!("{}", cluster.stats());
        }

        Commands::Load {
            graph,
            ops,
            duration,
            exit_on_fail,
            prob_perms,
            seed,
        } => {
            let mut load = config.load.clone();
            if let Some(ops) = ops {
                load.operations_per_second = ops;
            }
            if let Some(p) = prob_perms {
                load.permissions_probability = p;
            }
            if seed.is_some() {
                load.seed = seed;
            }
            load.exit_on_fail |= exit_on_fail;
            ZoneConfig {
                load: load.clone(),
                ..config.clone()
            }
            .validate()?;

            let cluster = Cluster::load(&graph, config.workers)?;
            cluster.build_index();

            let stop = stop_on_interrupt()?;
            let report =
                run_constant_load(&cluster, &load, duration.map(Duration::from_secs), stop)?;
            println!(
                "Operations: {} ({} failed) in {:.1}s",
                report.operations,
                report.errors,
                report.elapsed_ms as f64 / 1000.0
            );
            println!("Events:     {}", cluster.stats());
        }
    }

    Ok(())
}

fn print_vertex(id: &VertexId, parents: &[EffectiveVertex], children: &[EffectiveVertex]) {
    println!("{id}");
    for (label, entries) in [("parents", parents), ("children", children)] {
        println!("  {label} ({}):", entries.len());
        for entry in entries {
            let via: Vec<String> = entry
                .intermediate_vertices()
                .iter()
                .map(|v| v.to_string())
                .collect();
            println!(
                "    {:<24} perms={} via=[{}]{}",
                entry.subject().to_string(),
                entry.permissions(),
                via.join(", "),
                if entry.is_dirty() { " dirty" } else { "" }
            );
        }
    }
}
