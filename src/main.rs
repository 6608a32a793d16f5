use clap::{Args, Parser, Subcommand};

use gatherplan::collective::ElementType;
use gatherplan::config::RunConfig;
use gatherplan::graph::Graph;
use gatherplan::rewrite::{Rewrite, SerialSet, SynchronizationInserter};
use gatherplan::spec::{NetSpec, SerialSpec};
use gatherplan::{diagnostics, probe, Result};

use anyhow::{anyhow, Context};
use tracing::info;

#[derive(Parser)]
#[command(name = "gatherplan")]
#[command(about = "Insert gather operators at parallel -> serial boundaries", long_about = None)]
struct Cli {
    /// -v for debug, -vv for trace.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Args)]
struct PlanArgs {
    #[arg(long)]
    net: String,

    /// JSON file with serial operator names and/or patterns.
    #[arg(long)]
    serial_file: Option<String>,

    /// Serial operator name (repeatable).
    #[arg(long = "serial")]
    serial: Vec<String>,

    /// JSON run config; flags below override it.
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    world_size: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite a net, writing the result as JSON.
    Rewrite {
        #[command(flatten)]
        plan: PlanArgs,

        /// Output path; stdout if omitted.
        #[arg(short = 'o', long)]
        out: Option<String>,
    },
    /// Validate inputs and print what the rewrite would do.
    Check {
        #[command(flatten)]
        plan: PlanArgs,
    },
    /// Rewrite, then run every gather across an in-process worker group.
    Probe {
        #[command(flatten)]
        plan: PlanArgs,

        /// Per-worker shard shape, e.g. "8,3,32,32".
        #[arg(long, default_value = "2,3")]
        shard_shape: String,

        #[arg(long)]
        element_type: Option<ElementType>,

        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

struct Plan {
    config: RunConfig,
    graph: Graph,
    serial: SerialSet,
}

fn load_plan(args: &PlanArgs) -> Result<Plan> {
    let mut config = match &args.config {
        Some(path) => RunConfig::from_file(path)?,
        None => RunConfig::default(),
    };
    if let Some(w) = args.world_size {
        config.world_size = w;
    }
    config.validate()?;

    let graph = NetSpec::from_file(&args.net)?
        .validate_and_build()
        .with_context(|| diagnostics::error_message(format!("invalid net {}", args.net)))?;

    let serial_spec = match &args.serial_file {
        Some(path) => SerialSpec::from_file(path)?,
        None => SerialSpec::default(),
    };
    let serial = serial_spec.merge(&args.serial).resolve(&graph)?;

    for shard in config.shard_batches(&graph)? {
        info!(
            op = %shard.op,
            global = shard.global,
            per_worker = shard.per_worker,
            "batch split across workers"
        );
    }

    Ok(Plan {
        config,
        graph,
        serial,
    })
}

fn rewrite(plan: &Plan) -> Result<Rewrite> {
    SynchronizationInserter::default().insert(&plan.graph, &plan.serial)
}

fn parse_shape(s: &str) -> Result<Vec<usize>> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<usize>()
                .map_err(|e| anyhow!(diagnostics::error_message(format!("bad shard dim {:?}: {}", p, e))))
        })
        .collect()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    diagnostics::init_logging(cli.verbose)
        .map_err(|e| anyhow!(diagnostics::error_message(format!("install logger: {}", e))))?;

    match cli.cmd {
        Commands::Rewrite { plan, out } => {
            let plan = load_plan(&plan)?;
            let rw = rewrite(&plan)?;
            let json = NetSpec::from_graph(&rw.graph).to_json_pretty()?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| diagnostics::error_message(format!("write {}", path)))?;
                    println!("Wrote {}", path);
                }
                None => println!("{}", json),
            }
        }
        Commands::Check { plan } => {
            let plan = load_plan(&plan)?;
            let rw = rewrite(&plan)?;
            println!("{}", serde_json::to_string_pretty(&rw.report)?);
        }
        Commands::Probe {
            plan,
            shard_shape,
            element_type,
            timeout_ms,
        } => {
            let mut plan = load_plan(&plan)?;
            if let Some(t) = element_type {
                plan.config.element_type = t;
            }
            if timeout_ms.is_some() {
                plan.config.timeout_ms = timeout_ms;
            }
            let rw = rewrite(&plan)?;
            let report = probe::probe(&rw.graph, &plan.config, &parse_shape(&shard_shape)?)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
