//! `rusty-automation-tool` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    — start the API server.
//! - `migrate`  — run pending database migrations.
//! - `validate` — validate a workflow graph JSON file.
//! - `compile`  — render a workflow graph as Rust source.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use db::{pool::PoolConfig, PgStore};
use engine::{ExecutorConfig, WorkflowExecutor, WorkflowGraph};
use nodes::{
    register_builtins, InputField, RuntimeContext, Step, StepDescriptor, StepInput,
    StepRegistry, StepResult,
};

#[derive(Parser)]
#[command(
    name = "rusty-automation-tool",
    about = "Workflow graph compiler and execution engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
        bind: SocketAddr,
        #[command(flatten)]
        database: DatabaseArgs,
        #[command(flatten)]
        steps: StepArgs,
        /// Retries for a failed execution-log write.
        #[arg(long, env = "LOG_WRITE_RETRIES", default_value_t = 3)]
        log_write_retries: u32,
    },
    /// Run pending database migrations.
    Migrate {
        #[command(flatten)]
        database: DatabaseArgs,
    },
    /// Validate a workflow graph JSON file and print its stages.
    Validate {
        /// Path to the graph JSON file (`{"nodes": [...], "edges": [...]}`).
        path: PathBuf,
        #[command(flatten)]
        steps: StepArgs,
    },
    /// Compile a workflow graph JSON file into Rust source.
    Compile {
        path: PathBuf,
        /// Write the generated source here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        steps: StepArgs,
    },
}

#[derive(Args)]
struct DatabaseArgs {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 10)]
    max_connections: u32,
}

impl DatabaseArgs {
    fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.database_url.clone(), self.max_connections)
    }
}

#[derive(Args)]
struct StepArgs {
    /// JSON manifest of extra step types: `[{"type": "email", "requiredInputs": ["to"]}]`.
    #[arg(long, env = "STEP_MANIFEST")]
    steps: Option<PathBuf>,
}

/// One step type declared by a manifest.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeclaredStepType {
    #[serde(rename = "type")]
    step_type: String,
    #[serde(default)]
    required_inputs: Vec<String>,
    #[serde(default)]
    optional_inputs: Vec<String>,
}

/// Stands in for a connector this binary does not ship.
struct DeclaredStep {
    step_type: String,
}

#[async_trait]
impl Step for DeclaredStep {
    async fn invoke(&self, _input: StepInput, _ctx: &RuntimeContext) -> StepResult {
        StepResult::failure(format!(
            "step type '{}' is declared but not available in this deployment",
            self.step_type
        ))
    }
}

impl StepArgs {
    /// Built-in steps plus every type from the manifest, if one was given.
    fn registry(&self) -> Result<StepRegistry> {
        let mut builder = StepRegistry::builder();
        register_builtins(&mut builder)?;

        if let Some(path) = &self.steps {
            let declared: Vec<DeclaredStepType> = read_json(path)?;
            for decl in declared {
                let mut descriptor = StepDescriptor::new(
                    decl.step_type.clone(),
                    DeclaredStep { step_type: decl.step_type.clone() },
                );
                for name in decl.required_inputs {
                    descriptor = descriptor.with_input(InputField::required(name));
                }
                for name in decl.optional_inputs {
                    descriptor = descriptor.with_input(InputField::optional(name));
                }
                builder.register(descriptor)?;
            }
        }
        Ok(builder.build())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, database, steps, log_write_retries } => {
            let registry = Arc::new(steps.registry()?);
            info!("registered step types: {}", registry.step_types().join(", "));

            let pool = db::pool::create_pool(&database.pool_config())
                .await
                .context("failed to connect to database")?;
            let store = Arc::new(PgStore::new(pool));

            let config = ExecutorConfig {
                max_log_retries: log_write_retries,
                ..ExecutorConfig::default()
            };
            let executor = WorkflowExecutor::new(store.clone(), registry, config);

            info!("Starting API server on {bind}");
            api::serve(bind, api::AppState::new(store, Arc::new(executor))).await?;
        }
        Command::Migrate { database } => {
            let pool = db::pool::create_pool(&database.pool_config())
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
        }
        Command::Validate { path, steps } => {
            let graph: WorkflowGraph = read_json(&path)?;
            let registry = steps.registry()?;

            match engine::compile_graph(&graph, &registry) {
                Ok(program) => {
                    println!("Workflow is valid: {} node(s) in {} stage(s)", program.len(), program.stages().len());
                    for stage in program.stages() {
                        println!("  stage {}: {}", stage.index, stage.node_ids.join(", "));
                    }
                }
                Err(e) => {
                    eprintln!("Validation failed with {} violation(s):", e.violations.len());
                    for violation in &e.violations {
                        eprintln!("  - {violation}");
                    }
                    std::process::exit(1);
                }
            }
        }
        Command::Compile { path, output, steps } => {
            let graph: WorkflowGraph = read_json(&path)?;
            let registry = steps.registry()?;
            let program = engine::compile_graph(&graph, &registry)?;

            let title = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "workflow".to_owned());
            let code = engine::generate(&program, &title);

            match output {
                Some(out) => {
                    std::fs::write(&out, code)
                        .with_context(|| format!("cannot write {}", out.display()))?;
                    info!("wrote {}", out.display());
                }
                None => print!("{code}"),
            }
            if program.is_empty() {
                warn!("workflow has no nodes; generated an empty run_workflow");
            }
        }
    }

    Ok(())
}
