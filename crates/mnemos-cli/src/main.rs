//! Mnemos - memory lifecycle CLI
//!
//! The `mnemos` command drives the memory engine against a SurrealDB store.
//!
//! ## Commands
//!
//! - `ingest`, `edit`, `rollback`, `history`, `tombstone`: memory lifecycle
//! - `search`: ranked retrieval
//! - `scan`, `conflicts`, `resolve`, `stats`: contradiction tracking
//! - `record`, `decisions`, `verify`, `replay`: decision audit trail
//!
//! Every command prints pretty JSON on stdout; logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, Level};

use mnemos_core::api::{
    ConflictView, DecisionListParams, DecisionView, MemoryView, ReplayParams, SearchParams,
    VerifyOutcomeParams, VersionView,
};
use mnemos_core::domain::memory::{parse_content_type, parse_metadata};
use mnemos_core::metrics::METRICS;
use mnemos_core::telemetry;
use mnemos_core::{
    ConfidenceAdjustment, ConflictFilter, ConflictId, ConflictStatus, DecisionId, EngineConfig,
    MemoryEngine, MemoryId, NewMemory, RecordDecision, ResolveAction, VersionId,
};
use mnemos_state::SurrealLedger;

#[derive(Parser)]
#[command(name = "mnemos")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Versioned agent memories with decaying relevance and decision replay", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Engine config file (TOML)
    #[arg(long, global = true, env = "MNEMOS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a new memory
    Ingest {
        /// Namespace the memory belongs to
        #[arg(short, long)]
        namespace: String,

        /// Key, unique within the namespace
        #[arg(short, long)]
        key: String,

        /// Memory content
        #[arg(short, long)]
        content: String,

        /// fact, preference, instruction or observation
        #[arg(short = 't', long, default_value = "fact")]
        content_type: String,

        /// Initial confidence in [0, 1]
        #[arg(long, default_value = "0.8")]
        confidence: f64,

        /// Metadata as JSON, e.g. '{"tags":["deploy"]}'
        #[arg(long)]
        metadata: Option<String>,

        #[arg(short, long, default_value = "cli")]
        author: String,

        /// Scan the new memory for contradictions before returning
        #[arg(long)]
        scan: bool,
    },

    /// Commit a new version of a memory's content
    Edit {
        memory_id: String,

        #[arg(short, long)]
        content: String,

        /// Only apply on top of this version
        #[arg(long)]
        base: Option<String>,

        #[arg(short, long, default_value = "cli")]
        author: String,

        /// Rescan the memory for contradictions after the edit
        #[arg(long)]
        scan: bool,
    },

    /// Restore an earlier version's content as a new version
    Rollback {
        memory_id: String,

        /// Version to restore
        #[arg(long)]
        to: String,

        #[arg(short, long, default_value = "cli")]
        author: String,
    },

    /// Show a memory's version history, most recent first
    History { memory_id: String },

    /// Soft-delete a memory
    Tombstone {
        memory_id: String,

        #[arg(short, long, default_value = "cli")]
        author: String,
    },

    /// Ranked search over active memories
    Search {
        #[arg(default_value = "")]
        query: String,

        #[arg(short, long)]
        namespace: Option<String>,

        /// Score with this organization's overrides
        #[arg(long)]
        org: Option<String>,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Scan one memory, or a whole namespace, for contradictions
    Scan {
        memory_id: Option<String>,

        #[arg(short, long, conflicts_with = "memory_id")]
        namespace: Option<String>,
    },

    /// List conflicts
    Conflicts {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,

        #[arg(short, long)]
        namespace: Option<String>,

        /// Only conflicts involving this memory
        #[arg(short, long)]
        memory: Option<String>,
    },

    /// Resolve a pending conflict
    Resolve {
        conflict_id: String,

        #[arg(long, value_enum)]
        action: ActionArg,

        /// Memory that keeps the merged content (merge)
        #[arg(long)]
        survivor: Option<String>,

        /// Merged content for the survivor (merge)
        #[arg(long)]
        content: Option<String>,

        /// Memory to deprecate (deprecate-one)
        #[arg(long)]
        loser: Option<String>,

        /// Confidence change as MEMORY_ID=VALUE; repeatable
        #[arg(long = "adjust")]
        adjustments: Vec<String>,

        #[arg(short, long, default_value = "cli")]
        author: String,
    },

    /// Conflict counts and resolution rate
    Stats,

    /// Record an agent decision
    Record {
        #[arg(long)]
        agent: String,

        #[arg(long)]
        org: String,

        #[arg(long)]
        query: String,

        #[arg(long)]
        output: String,

        #[arg(long, default_value = "0.5")]
        confidence: f64,

        /// Retrieved memory ids, in retrieval order
        #[arg(long, value_delimiter = ',')]
        memories: Vec<String>,

        #[arg(long)]
        model: String,

        #[arg(long, default_value = "0")]
        latency_ms: u64,
    },

    /// List an organization's decisions, newest first
    Decisions {
        #[arg(long)]
        org: String,

        #[arg(long)]
        agent: Option<String>,

        #[arg(long)]
        verified: Option<bool>,

        #[arg(short, long)]
        limit: Option<usize>,

        #[arg(long)]
        offset: Option<usize>,
    },

    /// Record whether a decision turned out correct
    Verify {
        decision_id: String,

        #[arg(long)]
        correct: bool,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Compare a decision's memory context with today's
    Replay { decision_id: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusArg {
    Pending,
    Resolved,
}

impl From<StatusArg> for ConflictStatus {
    fn from(s: StatusArg) -> Self {
        match s {
            StatusArg::Pending => ConflictStatus::Pending,
            StatusArg::Resolved => ConflictStatus::Resolved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ActionArg {
    KeepBoth,
    Merge,
    DeprecateOne,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;
    let ledger = SurrealLedger::from_env()
        .await
        .context("Failed to connect to Mnemos database")?;
    let engine = MemoryEngine::new(Arc::new(ledger), config).context("Invalid engine config")?;

    let output = run(&engine, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    METRICS.flush();
    Ok(())
}

/// Load the engine config. A short-lived process cannot wait for detached
/// scans, so scan-on-write is turned off and `--scan` scans inline instead.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.conflicts.scan_on_write = false;
    Ok(config)
}

async fn run(engine: &MemoryEngine, command: Commands) -> Result<Value> {
    match command {
        Commands::Ingest {
            namespace,
            key,
            content,
            content_type,
            confidence,
            metadata,
            author,
            scan,
        } => {
            let mut new = NewMemory::new(
                namespace,
                key,
                content,
                parse_content_type(&content_type)?,
                confidence,
                author,
            );
            if let Some(raw) = metadata {
                let value: Value =
                    serde_json::from_str(&raw).context("--metadata is not valid JSON")?;
                new = new.with_metadata(parse_metadata(value)?);
            }
            cmd_ingest(engine, new, scan).await
        }
        Commands::Edit {
            memory_id,
            content,
            base,
            author,
            scan,
        } => {
            let base = base.map(VersionId::from);
            cmd_edit(
                engine,
                &MemoryId::from(memory_id),
                base.as_ref(),
                &content,
                &author,
                scan,
            )
            .await
        }
        Commands::Rollback {
            memory_id,
            to,
            author,
        } => {
            let version = engine
                .rollback(&MemoryId::from(memory_id), &VersionId::from(to), &author)
                .await?;
            to_json(VersionView::from(version))
        }
        Commands::History { memory_id } => {
            let history = engine.history(&MemoryId::from(memory_id)).await?;
            let versions: Vec<VersionView> =
                history.to_vec().into_iter().map(VersionView::from).collect();
            to_json(versions)
        }
        Commands::Tombstone { memory_id, author } => {
            let memory = engine.tombstone(&MemoryId::from(memory_id), &author).await?;
            to_json(MemoryView::from(memory))
        }
        Commands::Search {
            query,
            namespace,
            org,
            limit,
        } => {
            let hits = engine
                .memory_search(SearchParams {
                    query,
                    namespace,
                    organization_id: org,
                    limit,
                })
                .await?;
            to_json(hits)
        }
        Commands::Scan {
            memory_id,
            namespace,
        } => cmd_scan(engine, memory_id, namespace).await,
        Commands::Conflicts {
            status,
            namespace,
            memory,
        } => {
            let filter = ConflictFilter {
                status: status.map(ConflictStatus::from),
                namespace,
                memory_id: memory.map(MemoryId::from),
            };
            let conflicts = engine.conflict_list(&filter).await?;
            to_json(conflicts.into_iter().map(ConflictView::from).collect::<Vec<_>>())
        }
        Commands::Resolve {
            conflict_id,
            action,
            survivor,
            content,
            loser,
            adjustments,
            author,
        } => {
            let action = resolve_action(action, survivor, content, loser)?;
            let adjustments = adjustments
                .iter()
                .map(|raw| parse_adjustment(raw))
                .collect::<Result<Vec<_>>>()?;
            let conflict = engine
                .resolve(&ConflictId::from(conflict_id), action, adjustments, &author)
                .await?;
            to_json(ConflictView::from(conflict))
        }
        Commands::Stats => to_json(engine.conflict_stats().await?),
        Commands::Record {
            agent,
            org,
            query,
            output,
            confidence,
            memories,
            model,
            latency_ms,
        } => {
            let decision = engine
                .decision_record(RecordDecision {
                    agent_id: agent,
                    organization_id: org,
                    input_query: query,
                    output,
                    confidence,
                    retrieved_memory_ids: memories.into_iter().map(MemoryId::from).collect(),
                    model_used: model,
                    latency_ms,
                })
                .await?;
            info!(decision_id = %decision.decision_id, "Decision recorded");
            to_json(DecisionView::from(decision))
        }
        Commands::Decisions {
            org,
            agent,
            verified,
            limit,
            offset,
        } => {
            let page = engine
                .decision_list(DecisionListParams {
                    organization_id: org,
                    agent_id: agent,
                    verified,
                    limit,
                    offset,
                })
                .await?;
            to_json(page)
        }
        Commands::Verify {
            decision_id,
            correct,
            notes,
        } => {
            let view = engine
                .decision_verify_outcome(VerifyOutcomeParams {
                    decision_id: DecisionId::from(decision_id),
                    outcome_correct: correct,
                    outcome_notes: notes,
                })
                .await?;
            to_json(view)
        }
        Commands::Replay { decision_id } => {
            let replay = engine
                .decision_replay(ReplayParams {
                    decision_id: DecisionId::from(decision_id),
                })
                .await?;
            to_json(replay)
        }
    }
}

async fn cmd_ingest(engine: &MemoryEngine, new: NewMemory, scan: bool) -> Result<Value> {
    let memory = engine.ingest(new).await?;
    info!(memory_id = %memory.memory_id, "Memory ingested");
    if !scan {
        return to_json(MemoryView::from(memory));
    }
    let conflicts = engine.scan(&memory.memory_id).await?;
    Ok(serde_json::json!({
        "memory": MemoryView::from(memory),
        "conflicts": conflicts.into_iter().map(ConflictView::from).collect::<Vec<_>>(),
    }))
}

async fn cmd_edit(
    engine: &MemoryEngine,
    memory_id: &MemoryId,
    base: Option<&VersionId>,
    content: &str,
    author: &str,
    scan: bool,
) -> Result<Value> {
    let version = engine.edit(memory_id, base, content, author).await?;
    if !scan {
        return to_json(VersionView::from(version));
    }
    let conflicts = engine.scan(memory_id).await?;
    Ok(serde_json::json!({
        "version": VersionView::from(version),
        "conflicts": conflicts.into_iter().map(ConflictView::from).collect::<Vec<_>>(),
    }))
}

async fn cmd_scan(
    engine: &MemoryEngine,
    memory_id: Option<String>,
    namespace: Option<String>,
) -> Result<Value> {
    let conflicts = match (memory_id, namespace) {
        (Some(id), _) => engine.scan(&MemoryId::from(id)).await?,
        (None, Some(ns)) => engine.full_scan(&ns).await?,
        (None, None) => bail!("scan needs a memory id or --namespace"),
    };
    info!(count = conflicts.len(), "Scan complete");
    to_json(conflicts.into_iter().map(ConflictView::from).collect::<Vec<_>>())
}

fn resolve_action(
    action: ActionArg,
    survivor: Option<String>,
    content: Option<String>,
    loser: Option<String>,
) -> Result<ResolveAction> {
    Ok(match action {
        ActionArg::KeepBoth => ResolveAction::KeepBoth,
        ActionArg::Merge => ResolveAction::Merge {
            survivor: MemoryId::from(survivor.context("merge needs --survivor")?),
            merged_content: content.context("merge needs --content")?,
        },
        ActionArg::DeprecateOne => ResolveAction::DeprecateOne {
            loser: MemoryId::from(loser.context("deprecate-one needs --loser")?),
        },
    })
}

/// Parse `MEMORY_ID=VALUE`.
fn parse_adjustment(raw: &str) -> Result<ConfidenceAdjustment> {
    let (id, value) = raw
        .rsplit_once('=')
        .ok_or_else(|| anyhow!("adjustment `{raw}` must look like MEMORY_ID=VALUE"))?;
    if id.trim().is_empty() {
        bail!("adjustment `{raw}` has no memory id");
    }
    let confidence: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("adjustment `{raw}` has a non-numeric confidence"))?;
    Ok(ConfidenceAdjustment {
        memory_id: MemoryId::from(id.trim()),
        confidence,
    })
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
