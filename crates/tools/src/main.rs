use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use compute::{ComputeRegistry, EngineConfig};
use expression::{Defines, Expression};
use foundation::Feature;
use layers::Layer;
use serde_json::Value;
use streaming::{FeatureCache, SourceLoader, decode_geojson};
use tracing::info;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Style expression and layer computation tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate one style expression and print the JSON result
    Eval {
        expression: String,

        /// Feature to evaluate against (GeoJSON Feature or `{id, properties}`)
        #[arg(long)]
        feature: Option<PathBuf>,

        /// Text substitution, KEY=VALUE; repeatable
        #[arg(long = "define", value_parser = parse_define)]
        defines: Vec<(String, String)>,
    },

    /// Compute a layer definition until settled and print the computed layers
    Compute {
        layer: PathBuf,
    },
}

#[tokio::main]
async fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Args::parse().command {
        Command::Eval {
            expression,
            feature,
            defines,
        } => eval(&expression, feature.as_deref(), defines.into_iter().collect())?,
        Command::Compute { layer } => compute(&layer).await?,
    }
    Ok(())
}

fn parse_define(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    if key.is_empty() {
        return Err(format!("empty define name in {raw:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn read_feature(path: &Path) -> CliResult<Feature> {
    let value: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    if value.get("type").is_some() {
        let mut features = decode_geojson(&value, None)?;
        if features.is_empty() {
            return Err(format!("{} holds no feature", path.display()).into());
        }
        return Ok(features.swap_remove(0));
    }
    Ok(serde_json::from_value(value)?)
}

fn eval(text: &str, feature: Option<&Path>, defines: Defines) -> CliResult<()> {
    let feature = match feature {
        Some(path) => read_feature(path)?,
        None => Feature::new(""),
    };
    let expression = Expression::new(text, Some(&feature), Some(&defines))?;
    let value = expression.evaluate(&feature)?;
    match value.to_json() {
        Some(json) => println!("{json}"),
        None => println!("undefined"),
    }
    Ok(())
}

async fn compute(path: &Path) -> CliResult<()> {
    let layer: Layer = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let loader = SourceLoader::new().with_base_dir(base_dir);
    let cache = FeatureCache::new(Arc::new(loader));

    let mut registry = ComputeRegistry::new(cache, EngineConfig::from_env())?;
    registry.sync(std::slice::from_ref(&layer))?;
    let snapshots = registry.settle().await?;
    info!(layers = snapshots.len(), stats = ?registry.cache().stats(), "settled");

    for event in registry.diagnostics().events() {
        eprintln!(
            "{} [{}] {}",
            event.kind,
            event.layer_id.as_deref().unwrap_or("-"),
            event.message
        );
    }

    let output = match layer {
        Layer::Simple(simple) => serde_json::to_string_pretty(&snapshots.get(&simple.id))?,
        Layer::Group(_) => serde_json::to_string_pretty(&snapshots)?,
    };
    println!("{output}");
    Ok(())
}
