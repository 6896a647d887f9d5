//! praxis CLI: run reasoning queries against a compiled document.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use praxis::config::EngineConfig;
use praxis::document::CompiledDocument;
use praxis::engine::{Answer, Engine, Query};
use praxis::fact::Atom;
use praxis::infer::InferMode;
use praxis::plan::Action;
use praxis::schedule::sensitivity::Target;

#[derive(Parser)]
#[command(name = "praxis", version, about = "Rule inference, constraints, planning, scheduling and decisions")]
struct Cli {
    /// Engine configuration (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print compact instead of indented JSON.
    #[arg(long, global = true)]
    compact: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward-chain FACTS under RULES, or prove one goal.
    Infer {
        /// Compiled document (JSON or TOML).
        document: PathBuf,

        /// Prove this ground fact by backward chaining, e.g. "flies(tweety)".
        #[arg(long)]
        goal: Option<Atom>,

        /// Cap on forward-chaining passes.
        #[arg(long)]
        max_passes: Option<usize>,
    },

    /// Solve VARIABLES under CONSTRAINTS and SOFT_CONSTRAINTS.
    Solve {
        document: PathBuf,

        /// Cap on value assignments tried.
        #[arg(long)]
        node_budget: Option<usize>,
    },

    /// Find a plan from INITIAL_STATE to GOAL_STATE.
    Plan {
        document: PathBuf,

        /// Override the search depth bound.
        #[arg(long)]
        depth_bound: Option<usize>,
    },

    /// Replay a plan and report the first failing step.
    Validate {
        document: PathBuf,

        /// Actions in order, e.g. "move(a, b)".
        #[arg(required = true)]
        actions: Vec<Action>,
    },

    /// Time and level ACTIVITIES against RESOURCES.
    Schedule {
        document: PathBuf,

        /// Latest allowed finish time.
        #[arg(long)]
        horizon: Option<f64>,
    },

    /// Monte Carlo simulation of the makespan.
    Simulate {
        document: PathBuf,

        #[arg(long)]
        trials: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Perturb inputs one at a time and rank their impact.
    Sensitivity {
        document: PathBuf,

        /// Targets such as "duration.design" or "capacity.dev". Every
        /// duration and capacity when omitted.
        targets: Vec<Target>,

        /// Relative perturbation.
        #[arg(long)]
        delta: Option<f64>,
    },

    /// Expected-utility evaluation of DECISION_TREE.
    Evaluate { document: PathBuf },

    /// Rank RISKS by exposure.
    Risks { document: PathBuf },

    /// Write the effective configuration as TOML.
    Config {
        /// Destination file.
        output: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => Ok(EngineConfig::default()),
    }
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

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    let (document, query) = match cli.command {
        Commands::Infer {
            document,
            goal,
            max_passes,
        } => {
            if max_passes.is_some() {
                config.max_inference_passes = max_passes;
            }
            let mode = match goal {
                Some(goal) => InferMode::Backward { goal },
                None => InferMode::Forward,
            };
            (document, Query::Infer { mode })
        }
        Commands::Solve {
            document,
            node_budget,
        } => {
            if let Some(budget) = node_budget {
                config.solver_node_budget = budget;
            }
            (document, Query::Solve)
        }
        Commands::Plan {
            document,
            depth_bound,
        } => {
            if depth_bound.is_some() {
                config.planner.depth_bound = depth_bound;
            }
            (document, Query::Plan)
        }
        Commands::Validate { document, actions } => (document, Query::ValidatePlan { actions }),
        Commands::Schedule { document, horizon } => {
            if horizon.is_some() {
                config.schedule.horizon = horizon;
            }
            (document, Query::Schedule)
        }
        Commands::Simulate {
            document,
            trials,
            seed,
        } => {
            if let Some(trials) = trials {
                config.simulation.trials = trials;
            }
            if let Some(seed) = seed {
                config.simulation.seed = seed;
            }
            (document, Query::Simulate)
        }
        Commands::Sensitivity {
            document,
            targets,
            delta,
        } => {
            if let Some(delta) = delta {
                config.sensitivity.delta = delta;
            }
            (document, Query::Sensitivity { targets })
        }
        Commands::Evaluate { document } => (document, Query::Evaluate),
        Commands::Risks { document } => (document, Query::Risks),
        Commands::Config { output } => {
            config.validate()?;
            config.save(&output)?;
            println!("Wrote configuration to {}", output.display());
            return Ok(());
        }
    };

    let engine = Engine::new(config)?;
    let doc = CompiledDocument::load(&document)?;
    let answer = engine.run(&doc, &query)?;
    print_answer(&answer, cli.compact)
}

fn print_answer(answer: &Answer, compact: bool) -> Result<()> {
    let json = if compact {
        serde_json::to_string(answer)
    } else {
        serde_json::to_string_pretty(answer)
    }
    .into_diagnostic()?;
    println!("{json}");
    Ok(())
}
