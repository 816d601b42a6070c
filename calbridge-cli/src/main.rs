mod commands;
mod utils;

use std::path::PathBuf;

use anyhow::Result;
use calbridge_core::{BridgeConfig, CalBridgeError, CalendarClient, default_factory};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use commands::Context;

#[derive(Parser)]
#[command(name = "calbridge", version)]
#[command(about = "Read and edit the macOS Calendar app from scripts and agents")]
struct Cli {
    /// Deadline for each backend call (e.g. "30s", "2m"; "0s" waits forever)
    #[arg(long, global = true)]
    timeout: Option<String>,

    /// Retries for transient Calendar app failures
    #[arg(long, global = true)]
    retries: Option<u32>,

    /// Debug logging plus per-phase timings on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Validate and resolve without touching the calendar or the journal
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the Calendar app and its store are reachable
    Doctor,
    /// List calendars
    Calendars,
    /// List events in a time window
    Events {
        /// Window start (RFC 3339, "YYYY-MM-DD[THH:MM]" local, or "now")
        #[arg(long)]
        from: Option<String>,

        /// Window end (defaults to a week after --from)
        #[arg(long)]
        to: Option<String>,

        /// Only these calendars (id or name), repeatable
        #[arg(short, long)]
        calendar: Vec<String>,

        /// Case-insensitive text to search for
        #[arg(short, long)]
        query: Option<String>,

        /// Restrict --query to one field (title, location, notes, url)
        #[arg(long)]
        field: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one event by id
    Get { id: String },
    /// Create an event
    Add {
        title: String,

        /// Calendar id or name
        #[arg(short, long)]
        calendar: String,

        #[arg(short, long)]
        start: String,

        /// End time (defaults to one hour, or one day for all-day events)
        #[arg(short, long, conflicts_with = "duration")]
        end: Option<String>,

        /// Length instead of an end time (e.g. "45m")
        #[arg(short, long)]
        duration: Option<String>,

        #[arg(long)]
        all_day: bool,

        #[arg(short, long)]
        location: Option<String>,

        #[arg(long)]
        notes: Option<String>,

        #[arg(long)]
        url: Option<String>,

        /// Recurrence such as "weekly:mon,wed*10"
        #[arg(long)]
        repeat: Option<String>,
    },
    /// Change fields of an event, an occurrence, or a series
    Update {
        id: String,

        /// auto, this, future or series
        #[arg(long, default_value = "auto")]
        scope: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,

        #[arg(long)]
        all_day: Option<bool>,

        #[arg(long)]
        location: Option<String>,

        #[arg(long)]
        notes: Option<String>,

        #[arg(long)]
        url: Option<String>,

        #[arg(long, conflicts_with = "no_repeat")]
        repeat: Option<String>,

        /// Make the event non-recurring
        #[arg(long)]
        no_repeat: bool,

        /// Fail unless the event's edit sequence still equals this
        #[arg(long)]
        expected_sequence: Option<i64>,
    },
    /// Delete an event, an occurrence, or a series
    Delete {
        id: String,

        #[arg(long, default_value = "auto")]
        scope: String,
    },
    /// Read or change the reminder of an event's series
    Reminder {
        #[command(subcommand)]
        command: ReminderCommand,
    },
    /// Revert the most recent change
    Undo,
    /// Re-apply the most recently undone change
    Redo,
    /// Apply newline-delimited JSON operations under one transaction
    Batch {
        /// Input file ("-" or absent reads stdin)
        file: Option<PathBuf>,

        /// Stop at the first failing row
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand)]
enum ReminderCommand {
    Get {
        id: String,
    },
    Set {
        id: String,

        /// Minutes before the start, e.g. "-15m" or "-1h30m"
        #[arg(allow_hyphen_values = true)]
        offset: String,
    },
    Clear {
        id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        let kind = e
            .downcast_ref::<CalBridgeError>()
            .map(|err| err.kind())
            .unwrap_or("failure");
        let body = serde_json::json!({ "error": kind, "message": format!("{e:#}") });
        eprintln!("{body}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("CALBRIDGE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "calbridge_core=debug,calbridge_cli=debug,info"
        } else {
            "warn"
        })
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = BridgeConfig::load()?;
    if let Some(timeout) = cli.timeout {
        config.timeout = timeout;
    }
    if let Some(retries) = cli.retries {
        config.retries = retries;
    }

    let client = CalendarClient::from_config(&config, &default_factory())?;

    let token = client.supervisor().cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, canceling pending calls");
            token.cancel();
        }
    });

    let ctx = Context {
        config,
        client,
        dry_run: cli.dry_run,
    };

    let result = match cli.command {
        Commands::Doctor => commands::doctor::run(&ctx).await,
        Commands::Calendars => commands::events::calendars(&ctx).await,
        Commands::Events {
            from,
            to,
            calendar,
            query,
            field,
            limit,
        } => {
            let args = commands::events::ListArgs {
                from,
                to,
                calendars: calendar,
                query,
                field,
                limit,
            };
            commands::events::list(&ctx, args).await
        }
        Commands::Get { id } => commands::events::get(&ctx, &id).await,
        Commands::Add {
            title,
            calendar,
            start,
            end,
            duration,
            all_day,
            location,
            notes,
            url,
            repeat,
        } => {
            let args = commands::mutate::AddArgs {
                title,
                calendar,
                start,
                end,
                duration,
                all_day,
                location,
                notes,
                url,
                repeat,
            };
            commands::mutate::add(&ctx, args).await
        }
        Commands::Update {
            id,
            scope,
            title,
            start,
            end,
            all_day,
            location,
            notes,
            url,
            repeat,
            no_repeat,
            expected_sequence,
        } => {
            let args = commands::mutate::UpdateArgs {
                title,
                start,
                end,
                all_day,
                location,
                notes,
                url,
                repeat,
                no_repeat,
                expected_sequence,
            };
            commands::mutate::update(&ctx, &id, &scope, args).await
        }
        Commands::Delete { id, scope } => commands::mutate::delete(&ctx, &id, &scope).await,
        Commands::Reminder { command } => match command {
            ReminderCommand::Get { id } => commands::reminder::get(&ctx, &id).await,
            ReminderCommand::Set { id, offset } => commands::reminder::set(&ctx, &id, &offset).await,
            ReminderCommand::Clear { id } => commands::reminder::clear(&ctx, &id).await,
        },
        Commands::Undo => commands::history::undo(&ctx).await,
        Commands::Redo => commands::history::redo(&ctx).await,
        Commands::Batch { file, strict } => commands::history::batch(&ctx, file, strict).await,
    };

    if cli.verbose {
        eprint!("{}", ctx.client.supervisor().timings());
    }
    result
}
