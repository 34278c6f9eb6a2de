//! lore CLI - local activity journal

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use lore_core::{
    Config, Engine, Event, MonitorNotification, ResultType, StorageState, Subject, TimeRange,
};

#[derive(Debug, Parser)]
#[command(
    name = "lore",
    author,
    version,
    about = "Local activity journal with full-text search",
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

/// Template fields shared by the filtering commands. Values take the
/// template grammar: a leading `!` negates, a leading `*` prefix-matches.
#[derive(Debug, Clone, clap::Args, Default)]
struct TemplateArgs {
    /// Event interpretation (matches the whole subtree)
    #[arg(long)]
    interpretation: Option<String>,

    /// Event manifestation (matches the whole subtree)
    #[arg(long)]
    manifestation: Option<String>,

    /// Event actor URI
    #[arg(long)]
    actor: Option<String>,

    /// Event origin URI
    #[arg(long)]
    origin: Option<String>,

    /// Subject URI
    #[arg(long)]
    subject_uri: Option<String>,

    /// Subject interpretation (matches the whole subtree)
    #[arg(long)]
    subject_interpretation: Option<String>,

    /// Subject manifestation (matches the whole subtree)
    #[arg(long)]
    subject_manifestation: Option<String>,

    /// Subject origin URI
    #[arg(long)]
    subject_origin: Option<String>,

    /// Subject mimetype
    #[arg(long)]
    mimetype: Option<String>,

    /// Subject text label
    #[arg(long)]
    text: Option<String>,

    /// Subject storage medium
    #[arg(long)]
    storage: Option<String>,
}

impl TemplateArgs {
    fn templates(&self) -> Vec<Event> {
        let subject = Subject {
            uri: self.subject_uri.clone().unwrap_or_default(),
            interpretation: self.subject_interpretation.clone().unwrap_or_default(),
            manifestation: self.subject_manifestation.clone().unwrap_or_default(),
            origin: self.subject_origin.clone().unwrap_or_default(),
            mimetype: self.mimetype.clone().unwrap_or_default(),
            text: self.text.clone().unwrap_or_default(),
            storage: self.storage.clone().unwrap_or_default(),
            ..Subject::default()
        };
        let has_subject = subject != Subject::default();

        let template = Event {
            interpretation: self.interpretation.clone().unwrap_or_default(),
            manifestation: self.manifestation.clone().unwrap_or_default(),
            actor: self.actor.clone().unwrap_or_default(),
            origin: self.origin.clone().unwrap_or_default(),
            subjects: if has_subject { vec![subject] } else { Vec::new() },
            ..Event::default()
        };

        if template == Event::default() {
            Vec::new()
        } else {
            vec![template]
        }
    }
}

#[derive(Debug, Clone, clap::Args, Default)]
struct TimeArgs {
    /// Lower bound, e.g. "2024-01-01" or "2 days ago"
    #[arg(long)]
    since: Option<String>,

    /// Upper bound (exclusive)
    #[arg(long)]
    until: Option<String>,
}

impl TimeArgs {
    fn time_range(&self) -> Result<TimeRange> {
        let mut range = TimeRange::always();
        if let Some(since) = &self.since {
            range.begin = parse_time(since)?;
        }
        if let Some(until) = &self.until {
            range.end = parse_time(until)?;
        }
        Ok(range)
    }
}

fn parse_time(value: &str) -> Result<i64> {
    if let Ok(ms) = value.parse::<i64>() {
        return Ok(ms);
    }
    let parsed = dateparser::parse(value)
        .map_err(|e| anyhow::anyhow!("unable to parse time '{value}': {e}"))?;
    Ok(parsed.timestamp_millis())
}

fn parse_result_type(value: &str) -> Result<ResultType> {
    if let Ok(number) = value.parse::<u32>() {
        return Ok(ResultType::from_u32(number)?);
    }
    let folded: String = value.chars().filter(|c| *c != '-' && *c != '_').collect();
    let tag = match folded.to_lowercase().as_str() {
        "mostrecentevents" => ResultType::MostRecentEvents,
        "leastrecentevents" => ResultType::LeastRecentEvents,
        "mostrecentsubjects" => ResultType::MostRecentSubjects,
        "leastrecentsubjects" => ResultType::LeastRecentSubjects,
        "mostpopularsubjects" => ResultType::MostPopularSubjects,
        "leastpopularsubjects" => ResultType::LeastPopularSubjects,
        "mostrecentactor" => ResultType::MostRecentActor,
        "leastrecentactor" => ResultType::LeastRecentActor,
        "mostpopularactor" => ResultType::MostPopularActor,
        "leastpopularactor" => ResultType::LeastPopularActor,
        "oldestactor" => ResultType::OldestActor,
        "relevancy" => ResultType::Relevancy,
        _ => bail!("unknown result type '{value}'"),
    };
    Ok(tag)
}

fn parse_storage_state(value: &str) -> Result<StorageState> {
    Ok(match value.to_lowercase().as_str() {
        "any" => StorageState::Any,
        "available" => StorageState::Available,
        "not-available" | "notavailable" => StorageState::NotAvailable,
        _ => bail!("unknown storage state '{value}'"),
    })
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Insert events from a JSON file ("-" for stdin)
    Insert {
        /// File with one event object or an array of them
        file: PathBuf,

        /// Sender identity passed to policy hooks
        #[arg(long, default_value = "cli")]
        sender: String,
    },

    /// Fetch events by id
    Get {
        /// Event ids
        ids: Vec<u32>,
    },

    /// Find events matching a template
    Find {
        #[command(flatten)]
        time: TimeArgs,

        #[command(flatten)]
        template: TemplateArgs,

        /// Storage availability filter (any, available, not-available)
        #[arg(long, default_value = "any")]
        storage_state: String,

        /// Maximum results (0 = unlimited)
        #[arg(short, long, default_value = "20")]
        limit: u32,

        /// Result ordering/grouping
        #[arg(long, default_value = "most-recent-events")]
        result_type: String,

        /// Print ids only
        #[arg(long)]
        ids_only: bool,
    },

    /// Full-text search across the journal
    Search {
        /// Search query
        query: String,

        #[command(flatten)]
        time: TimeArgs,

        #[command(flatten)]
        template: TemplateArgs,

        /// Skip this many hits
        #[arg(long, default_value = "0")]
        offset: u32,

        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: u32,

        /// Result ordering (relevancy sorts by match quality)
        #[arg(long, default_value = "relevancy")]
        result_type: String,
    },

    /// Subject URIs commonly used together with matching events
    Related {
        #[command(flatten)]
        time: TimeArgs,

        #[command(flatten)]
        template: TemplateArgs,

        /// Rank by occurrence count instead of recency
        #[arg(long)]
        by_count: bool,

        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Delete events by id
    Delete {
        /// Event ids
        ids: Vec<u32>,

        /// Sender identity passed to policy hooks
        #[arg(long, default_value = "cli")]
        sender: String,
    },

    /// Delete the entire journal and reset the search index
    DeleteLog,

    /// Manage storage media availability
    Storage {
        #[command(subcommand)]
        command: StorageCommand,
    },

    /// Rebuild the full-text index from the journal
    Reindex,

    /// Show journal statistics
    Stats,

    /// Stream insert/delete notifications as JSON lines
    Monitor {
        #[command(flatten)]
        time: TimeArgs,

        #[command(flatten)]
        template: TemplateArgs,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Subcommand)]
enum StorageCommand {
    /// Mark a storage medium as available
    Add {
        name: String,

        #[arg(long, default_value = "")]
        icon: String,

        #[arg(long, default_value = "")]
        display_name: String,
    },

    /// Mark a storage medium as unavailable
    Remove { name: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            match err.downcast_ref::<lore_core::Error>() {
                Some(lore_core::Error::StoreCorrupt(_)) => {
                    ExitCode::from(u8::try_from(lore_core::STORE_CORRUPT_EXIT_CODE).unwrap_or(1))
                }
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Command::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(*shell, &mut command, "lore", &mut std::io::stdout());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let engine = Engine::open(&config).await?;

    let result = dispatch(&engine, cli.command).await;
    engine.close().await;
    result
}

async fn dispatch(engine: &Engine, command: Command) -> Result<()> {
    match command {
        Command::Insert { file, sender } => {
            let content = if file.as_os_str() == "-" {
                let mut buffer = String::new();
                std::io::stdin().read_to_string(&mut buffer)?;
                buffer
            } else {
                std::fs::read_to_string(&file)
                    .with_context(|| format!("reading {}", file.display()))?
            };
            let events: Vec<Event> = if content.trim_start().starts_with('[') {
                serde_json::from_str(&content)?
            } else {
                vec![serde_json::from_str(&content)?]
            };
            let ids = engine.insert_events(events, &sender).await?;
            println!("{}", serde_json::to_string(&ids)?);
        }

        Command::Get { ids } => {
            let events = engine.get_events(&ids).await?;
            println!("{}", serde_json::to_string_pretty(&events)?);
        }

        Command::Find {
            time,
            template,
            storage_state,
            limit,
            result_type,
            ids_only,
        } => {
            let range = time.time_range()?;
            let templates = template.templates();
            let state = parse_storage_state(&storage_state)?;
            let tag = parse_result_type(&result_type)?;
            if ids_only {
                let ids = engine
                    .find_event_ids(range, &templates, state, limit, tag)
                    .await?;
                println!("{}", serde_json::to_string(&ids)?);
            } else {
                let events = engine
                    .find_events(range, &templates, state, limit, tag)
                    .await?;
                println!("{}", serde_json::to_string_pretty(&events)?);
            }
        }

        Command::Search {
            query,
            time,
            template,
            offset,
            limit,
            result_type,
        } => {
            let range = time.time_range()?;
            let templates = template.templates();
            let tag = parse_result_type(&result_type)?;
            let (events, total) = engine
                .search(&query, range, &templates, offset, limit, tag)
                .await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "estimated_hits": total,
                    "events": events,
                }))?
            );
        }

        Command::Related {
            time,
            template,
            by_count,
            limit,
        } => {
            let range = time.time_range()?;
            let templates = template.templates();
            let tag = if by_count {
                ResultType::MostPopularSubjects
            } else {
                ResultType::MostRecentSubjects
            };
            let uris = engine
                .find_related_uris(range, &templates, &[], StorageState::Any, limit, tag)
                .await?;
            println!("{}", serde_json::to_string_pretty(&uris)?);
        }

        Command::Delete { ids, sender } => {
            match engine.delete_events(&ids, &sender).await? {
                Some((min, max)) => {
                    println!("{}", serde_json::json!({ "deleted_range": [min, max] }));
                }
                None => println!("{}", serde_json::json!({ "deleted_range": [-1, -1] })),
            }
        }

        Command::DeleteLog => {
            engine.delete_log().await?;
            println!("journal deleted");
        }

        Command::Storage { command } => match command {
            StorageCommand::Add { name, icon, display_name } => {
                engine.add_storage_medium(&name, &icon, &display_name).await?;
                println!("storage '{name}' available");
            }
            StorageCommand::Remove { name } => {
                engine.remove_storage_medium(&name).await?;
                println!("storage '{name}' unavailable");
            }
        },

        Command::Reindex => {
            engine.force_reindex().await?;
            println!("reindex scheduled");
        }

        Command::Stats => {
            let stats = engine.stats().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "events": stats.events,
                    "subjects": stats.subjects,
                    "indexed_documents": stats.indexed_documents,
                    "monitors": stats.monitors,
                }))?
            );
        }

        Command::Monitor { time, template } => {
            let range = time.time_range()?;
            let templates = template.templates();
            let mut receiver = engine.install_monitor("/cli/monitor", range, templates)?;
            eprintln!("monitoring; ctrl-c to stop");
            loop {
                tokio::select! {
                    notification = receiver.recv() => {
                        let Some(notification) = notification else { break };
                        println!("{}", notification_json(&notification));
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            engine.remove_monitor("/cli/monitor").ok();
        }

        // Handled before engine startup.
        Command::Completions { .. } => {}
    }
    Ok(())
}

fn notification_json(notification: &MonitorNotification) -> String {
    let value = match notification {
        MonitorNotification::Inserted { time_range, events } => serde_json::json!({
            "kind": "inserted",
            "time_range": [time_range.begin, time_range.end],
            "events": events,
        }),
        MonitorNotification::Deleted { time_range, ids } => serde_json::json!({
            "kind": "deleted",
            "time_range": [time_range.begin, time_range.end],
            "ids": ids,
        }),
    };
    value.to_string()
}
