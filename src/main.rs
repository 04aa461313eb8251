use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use hamly::expr::{eval_static, parse_expr};
use hamly::loader::Loader;
use hamly::options::{LoaderOptions, OptimizerOptions};
use hamly::value::{Value, to_value};

/// Render a template file.
#[derive(Parser)]
#[command(name = "hamly", version, about = "Compile and render HAML-like templates")]
struct Cli {
    /// Template file to render.
    template: PathBuf,

    /// Context entries as `name=value`. Values that parse as literals
    /// (`3`, `True`, `[1, 2]`) keep their type, anything else is a string.
    vars: Vec<String>,

    /// JSON file holding a context object; `name=value` entries override it.
    #[arg(short, long)]
    context: Option<PathBuf>,

    /// Print the compiled form instead of rendering.
    #[arg(long)]
    source: bool,

    /// Skip the optimizer.
    #[arg(long)]
    no_optimize: bool,
}

fn parse_var(entry: &str) -> Result<(String, Value)> {
    let Some((name, raw)) = entry.split_once('=') else {
        bail!("expected name=value, got '{}'", entry);
    };
    let value = parse_expr(raw)
        .ok()
        .and_then(|expr| eval_static(&expr).ok())
        .unwrap_or_else(|| Value::from(raw));
    Ok((name.trim().to_string(), value))
}

fn load_context(path: &PathBuf) -> Result<HashMap<String, Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read context file: {}", path.display()))?;
    let json: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("invalid JSON in {}", path.display()))?;
    match to_value(&json)? {
        Value::Map(map) => Ok(map.into_iter().collect()),
        other => bail!("context file must hold an object, got {}", other.type_name()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let root = cli
        .template
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let id = cli
        .template
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .context("template path has no file name")?;
    let optimizer = if cli.no_optimize {
        OptimizerOptions::disabled()
    } else {
        OptimizerOptions::new()
    };
    let loader = Loader::new(LoaderOptions::new(root).optimizer(optimizer));
    let renderer = loader.get_renderer_async(&id).await?;

    if cli.source {
        print!("{}", renderer.template_source());
        return Ok(());
    }

    let mut context = match &cli.context {
        Some(path) => load_context(path)?,
        None => HashMap::new(),
    };
    for entry in &cli.vars {
        let (name, value) = parse_var(entry)?;
        context.insert(name, value);
    }
    print!("{}", renderer.render_map(&context)?);
    Ok(())
}
