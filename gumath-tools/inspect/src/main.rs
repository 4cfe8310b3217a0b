//! Gumath Registry Inspector
//!
//! Run with: `gm-inspect [--config FILE] [-v] <COMMAND>`

mod value;

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use gumath::{Array, Convention, EngineConfig, Function, KernelSet, Registry};

#[derive(Parser)]
#[command(name = "gm-inspect")]
#[command(about = "Inspect registered gumath functions and call their kernels")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration file (TOML)
    #[arg(short = 'c', long, env = "GUMATH_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered functions
    List {
        /// Print functions and kernel sets as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the kernel sets of one function in selection order
    Describe { name: String },
    /// Call a function on JSON literals, e.g. `call add_scalar '[1,2]:int64' '3:int64'`
    Call {
        name: String,
        #[arg(value_name = "VALUE:TYPE", required = true)]
        args: Vec<String>,
    },
}

#[derive(Serialize)]
struct KernelInfo {
    signature: String,
    conventions: Vec<Convention>,
    vectorize: bool,
    constraint: Option<String>,
}

impl From<&KernelSet> for KernelInfo {
    fn from(set: &KernelSet) -> Self {
        Self {
            signature: set.sig.to_string(),
            conventions: set.conventions(),
            vectorize: set.vectorize,
            constraint: set.constraint.as_ref().map(|c| c.name().to_string()),
        }
    }
}

#[derive(Serialize)]
struct FunctionInfo {
    name: String,
    kernels: Vec<KernelInfo>,
}

impl From<&Function> for FunctionInfo {
    fn from(func: &Function) -> Self {
        Self {
            name: func.name().to_string(),
            kernels: func.kernels().iter().map(KernelInfo::from).collect(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let registry = build_registry(&cli)?;

    match &cli.command {
        Commands::List { json } => list(&registry, *json),
        Commands::Describe { name } => describe(&registry, name),
        Commands::Call { name, args } => call(&registry, name, args),
    }
}

fn build_registry(cli: &Cli) -> Result<Registry> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?,
        None => EngineConfig::default(),
    };
    debug!(?config, "engine configuration");
    Registry::new(config).context("Failed to initialize registry")
}

fn list(registry: &Registry, as_json: bool) -> Result<()> {
    if as_json {
        let infos: Vec<FunctionInfo> = registry.functions().map(FunctionInfo::from).collect();
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }
    for func in registry.functions() {
        println!("{:<24} {:>3} kernel set(s)", func.name(), func.len());
    }
    Ok(())
}

fn describe(registry: &Registry, name: &str) -> Result<()> {
    let func = registry
        .lookup(name)
        .with_context(|| format!("Unknown function: {name}"))?;
    println!("{name}");
    for (i, info) in func.kernels().iter().map(KernelInfo::from).enumerate() {
        let conventions: Vec<&str> = info.conventions.iter().map(|c| c.name()).collect();
        print!("  [{i:>3}] {}  ({})", info.signature, conventions.join(", "));
        if info.vectorize {
            print!(" vectorized");
        }
        if let Some(constraint) = &info.constraint {
            print!(" where {constraint}");
        }
        println!();
    }
    Ok(())
}

fn call(registry: &Registry, name: &str, args: &[String]) -> Result<()> {
    let inputs = args
        .iter()
        .map(|arg| {
            let (value, kind) = value::parse_argument(arg)?;
            value::to_array(&value, kind).with_context(|| format!("Invalid argument: {arg}"))
        })
        .collect::<Result<Vec<_>>>()?;
    let outputs = execute(registry, name, &inputs)?;
    for out in &outputs {
        let rendered = json!({
            "type": out.ty().to_string(),
            "value": value::to_json(out)?,
        });
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    }
    Ok(())
}

/// Select a kernel once, allocate its inferred outputs and run it.
fn execute(registry: &Registry, name: &str, inputs: &[Array]) -> Result<Vec<Array>> {
    let refs: Vec<_> = inputs.iter().collect();
    let in_types: Vec<_> = inputs.iter().map(|a| a.ty()).collect();

    let kernel = registry.select(name, &in_types, &refs)?;
    info!(function = name, signature = %kernel.set.sig, convention = %kernel.tag, "selected kernel");

    let mut outputs = kernel
        .spec
        .out_types
        .iter()
        .map(|ty| Array::zeros(ty.clone()))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    {
        let mut stack = kernel.stack(&refs, &mut outputs)?;
        gumath::apply(&kernel, &mut stack).with_context(|| format!("Failed to call {name}"))?;
    }
    Ok(outputs)
}
