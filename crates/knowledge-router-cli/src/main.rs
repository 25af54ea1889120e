use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use knowledge_router_api::{load_config, KnowledgeRouterApi};
use knowledge_router_core::{
    check_integrity, diff_section_ids, generation_id, CallerAttributes, RouterConfig,
};
use knowledge_router_pack::{build_pack_from_dir, read_pack, write_pack};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const LOG_ENV: &str = "KR_LOG";

#[derive(Debug, Parser)]
#[command(name = "kr")]
#[command(about = "Knowledge Router CLI")]
struct Cli {
    /// Knowledge Pack JSON file to serve.
    #[arg(long, global = true)]
    pack: Option<PathBuf>,

    /// Router config YAML.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Pack {
        #[command(subcommand)]
        command: PackCommand,
    },
    Query {
        #[command(subcommand)]
        command: QueryCommand,
    },
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },
}

#[derive(Debug, Subcommand)]
enum PackCommand {
    Build(PackBuildArgs),
    Check,
    Ids,
    Diff(PackDiffArgs),
}

#[derive(Debug, Args)]
struct PackBuildArgs {
    #[arg(long)]
    source: PathBuf,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct PackDiffArgs {
    #[arg(long)]
    before: PathBuf,
    #[arg(long)]
    after: PathBuf,
}

#[derive(Debug, Subcommand)]
enum QueryCommand {
    Route(QueryArgs),
    Top(QueryArgs),
    Trace(QueryArgs),
    Lookup(LookupArgs),
}

#[derive(Debug, Args)]
struct QueryArgs {
    #[arg(long)]
    text: String,
    #[command(flatten)]
    caller: CallerArgs,
}

#[derive(Debug, Args)]
struct CallerArgs {
    #[arg(long)]
    region: Option<String>,
    #[arg(long, default_value_t = false)]
    phi_clearance: bool,
    #[arg(long, default_value_t = false)]
    pii_clearance: bool,
}

impl CallerArgs {
    fn attributes(&self) -> CallerAttributes {
        CallerAttributes::new(self.region.as_deref(), self.phi_clearance, self.pii_clearance)
    }
}

#[derive(Debug, Args)]
struct LookupArgs {
    #[arg(long)]
    text: String,
    #[arg(long)]
    max_chunk_chars: Option<usize>,
    #[command(flatten)]
    caller: CallerArgs,
}

#[derive(Debug, Subcommand)]
enum PolicyCommand {
    Enforce(CallerArgs),
    Summary,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn emit<T: Serialize>(value: &T, what: &str) -> Result<()> {
    emit_json(serde_json::to_value(value).with_context(|| format!("failed to serialize {what}"))?)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Pack { command } => run_pack(command, cli.pack.as_deref()),
        Command::Query { command } => {
            let api = open_api(cli.pack.as_deref(), cli.config.as_deref())?;
            run_query(command, &api)
        }
        Command::Policy { command } => {
            let api = open_api(cli.pack.as_deref(), cli.config.as_deref())?;
            run_policy(command, &api)
        }
    }
}

/// Serving front with the pack published, or an empty slot when no pack is given.
fn open_api(pack: Option<&Path>, config: Option<&Path>) -> Result<KnowledgeRouterApi> {
    let config = match config {
        Some(path) => load_config(path)?,
        None => RouterConfig::default(),
    };
    let api = KnowledgeRouterApi::new(config);
    if let Some(path) = pack {
        let receipt = api.publish_file(path)?;
        tracing::debug!(
            pack = %path.display(),
            generation_id = %receipt.generation.generation_id,
            "serving knowledge pack"
        );
    }
    Ok(api)
}

fn require_pack(pack: Option<&Path>) -> Result<&Path> {
    pack.ok_or_else(|| anyhow!("--pack <FILE> is required for this command"))
}

fn run_pack(command: PackCommand, pack: Option<&Path>) -> Result<()> {
    match command {
        PackCommand::Build(args) => run_pack_build(&args),
        PackCommand::Check => run_pack_check(require_pack(pack)?),
        PackCommand::Ids => run_pack_ids(require_pack(pack)?),
        PackCommand::Diff(args) => run_pack_diff(&args),
    }
}

fn run_pack_build(args: &PackBuildArgs) -> Result<()> {
    let pack = build_pack_from_dir(&args.source)?;
    write_pack(&args.out, &pack)?;
    emit_json(serde_json::json!({
        "out": args.out.display().to_string(),
        "dataset_id": pack.manifest.dataset_id,
        "version": pack.manifest.version,
        "generation_id": generation_id(&pack)?,
        "files": pack.toc.files.len(),
        "sections": pack.section_count(),
    }))
}

fn run_pack_check(path: &Path) -> Result<()> {
    let pack = read_pack(path)?;
    let report = check_integrity(&pack);
    let servable = report.is_servable();
    emit_json(serde_json::json!({
        "servable": servable,
        "report": serde_json::to_value(&report).context("failed to serialize integrity report")?,
        "defects": report.fatal_messages(),
    }))?;

    if servable {
        Ok(())
    } else {
        Err(anyhow!("knowledge pack {} is not servable", path.display()))
    }
}

fn run_pack_ids(path: &Path) -> Result<()> {
    let pack = read_pack(path)?;
    let sections = pack
        .toc
        .files
        .iter()
        .flat_map(|file| {
            file.sections.iter().map(|section| {
                serde_json::json!({
                    "file_id": file.file_id,
                    "section_id": section.section_id,
                    "label": section.label,
                })
            })
        })
        .collect::<Vec<_>>();
    emit_json(serde_json::json!({
        "dataset_id": pack.manifest.dataset_id,
        "count": sections.len(),
        "sections": sections,
    }))
}

fn run_pack_diff(args: &PackDiffArgs) -> Result<()> {
    let before = read_pack(&args.before)?;
    let after = read_pack(&args.after)?;
    let diff = diff_section_ids(&before, &after);
    emit_json(serde_json::json!({
        "stable": diff.is_stable(),
        "added": diff.added,
        "removed": diff.removed,
    }))
}

fn run_query(command: QueryCommand, api: &KnowledgeRouterApi) -> Result<()> {
    match command {
        QueryCommand::Route(args) => {
            emit(&api.route_query(&args.caller.attributes(), &args.text), "route result")
        }
        QueryCommand::Top(args) => {
            emit(&api.get_top_section(&args.caller.attributes(), &args.text), "top section")
        }
        QueryCommand::Trace(args) => {
            emit(&api.get_routing_trace(&args.caller.attributes(), &args.text), "routing trace")
        }
        QueryCommand::Lookup(args) => {
            let outcome =
                api.lookup_exact(&args.caller.attributes(), &args.text, args.max_chunk_chars)?;
            emit(&outcome, "lookup outcome")
        }
    }
}

fn run_policy(command: PolicyCommand, api: &KnowledgeRouterApi) -> Result<()> {
    match command {
        PolicyCommand::Enforce(args) => emit(
            &api.enforce(args.region.as_deref(), args.phi_clearance, args.pii_clearance),
            "policy decision",
        ),
        PolicyCommand::Summary => emit(&api.get_policy_summary(), "policy summary"),
    }
}
