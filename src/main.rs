//! # rag-admin CLI
//!
//! Command-line front end for the model admin backend. Every command reads
//! a TOML config (see `config/rag-admin.example.toml`) and talks to the
//! backend's REST API; `watch` and the `--watch` flags also open the
//! WebSocket status channel.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag-admin models` | List one page of models, optionally filtered |
//! | `rag-admin status <id>` | Print a model's embedding status |
//! | `rag-admin watch` | Follow live status changes for a page of models |
//! | `rag-admin train <id>` | Start training a model |
//! | `rag-admin reembed <id>` | Restart document embedding for a model |
//! | `rag-admin create --name <name>` | Create an empty model |
//! | `rag-admin delete <id>` | Delete a model |
//!
//! ## Examples
//!
//! ```bash
//! # Models whose name or description mention "contract"
//! rag-admin models --search contract --config ./config/rag-admin.toml
//!
//! # Follow a re-embed until it completes or fails
//! rag-admin reembed 42 --watch
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rag_admin::api::{ApiClient, StatusSource};
use rag_admin::collection::{is_valid_page, page_count, ModelFilter};
use rag_admin::config::{self, Config};
use rag_admin::logging;
use rag_admin::models::{Model, ModelStatus};
use rag_admin::session::SyncSession;
use rag_admin::task::CancelToken;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Admin client for AI document-ingestion models.
#[derive(Parser)]
#[command(
    name = "rag-admin",
    about = "Admin client for AI document-ingestion models",
    version,
    long_about = "rag-admin lists models, triggers training and re-embedding, and follows \
    model status live by merging WebSocket pushes with a polling fallback."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/rag-admin.toml`. When the file is missing, a
    /// local backend on `localhost:5000` is assumed.
    #[arg(long, global = true, default_value = "./config/rag-admin.toml")]
    config: PathBuf,

    /// Log at debug level. `RUST_LOG` takes precedence.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List one page of models.
    ///
    /// Models whose embedding has not completed are refreshed with their
    /// full details before printing.
    Models {
        /// Page number, starting at 1.
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        page: u32,

        /// Page size. Defaults to `[session].page_size`.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        limit: Option<u32>,

        /// Case-insensitive match on name or description.
        #[arg(long)]
        search: Option<String>,

        /// Only show models with this training status
        /// (`pending`, `training`, `ready`, `error`).
        #[arg(long)]
        status: Option<ModelStatus>,
    },

    /// Print the embedding status of one model.
    Status {
        /// Model id.
        id: String,
    },

    /// Follow live status changes until Ctrl-C.
    Watch {
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        page: u32,

        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        limit: Option<u32>,
    },

    /// Start training a model.
    Train {
        /// Model id.
        id: String,

        /// Keep running until training reaches `ready` or `error`.
        #[arg(long)]
        watch: bool,
    },

    /// Restart document embedding for a model.
    Reembed {
        /// Model id.
        id: String,

        /// Keep running until embedding reaches `completed` or `error`.
        #[arg(long)]
        watch: bool,
    },

    /// Create a model with no documents.
    Create {
        /// Display name.
        #[arg(long)]
        name: String,

        #[arg(long, default_value = "")]
        description: String,
    },

    /// Delete a model and its documents.
    Delete {
        /// Model id.
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Models {
            page,
            limit,
            search,
            status,
        } => {
            let limit = limit.unwrap_or(cfg.session.page_size);
            let mut session = SyncSession::from_config(&cfg)?;
            session.load_page(page, limit).await?;
            ensure_page_exists(&session, page, limit)?;
            session.set_filter(ModelFilter { search, status });

            print_models(session.filtered().models());
            println!(
                "page {} of {} ({} models total)",
                session.page(),
                page_count(session.total(), limit).max(1),
                session.total()
            );
            session.shutdown();
        }
        Commands::Status { id } => {
            let api = ApiClient::new(&cfg.api)?;
            let report = api.embedding_status(&id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Watch { page, limit } => {
            let limit = limit.unwrap_or(cfg.session.page_size);
            let mut session = SyncSession::from_config(&cfg)?;
            session.connect();
            session.load_page(page, limit).await?;
            ensure_page_exists(&session, page, limit)?;
            print_models(session.models().models());

            let cancel = cancel_on_ctrl_c();
            follow(&mut session, &cancel, |_| false).await;
            session.shutdown();
        }
        Commands::Train { id, watch } => {
            let mut session = SyncSession::from_config(&cfg)?;
            session.load_detail(&id).await?;
            if watch {
                session.connect();
            }
            session.train(&id).await?;
            println!("training started for {}", id);

            if watch {
                let cancel = cancel_on_ctrl_c();
                follow(&mut session, &cancel, |m| m.status.is_terminal()).await;
            }
            session.shutdown();
        }
        Commands::Reembed { id, watch } => {
            let mut session = SyncSession::from_config(&cfg)?;
            session.load_detail(&id).await?;
            if watch {
                session.connect();
            }
            session.reembed(&id).await?;
            println!("re-embedding started for {}", id);

            if watch {
                let cancel = cancel_on_ctrl_c();
                follow(&mut session, &cancel, |m| m.embedding_status.is_terminal()).await;
            }
            session.shutdown();
        }
        Commands::Create { name, description } => {
            let mut session = SyncSession::from_config(&cfg)?;
            let model = session.create_model(&name, &description).await?;
            print_model(&model);
            session.shutdown();
        }
        Commands::Delete { id } => {
            let mut session = SyncSession::from_config(&cfg)?;
            session.delete_model(&id).await?;
            println!("deleted {}", id);
            session.shutdown();
        }
    }

    Ok(())
}

/// Load the config file, or fall back to local defaults when it does not
/// exist. A file that exists but is invalid is an error.
fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        warn!(path = %path.display(), "config file not found; using local defaults");
        Ok(Config::minimal())
    }
}

/// Reject a page past the end. An empty listing still has page 1.
fn ensure_page_exists(session: &SyncSession, page: u32, limit: u32) -> Result<()> {
    let total = session.total();
    if total > 0 && !is_valid_page(page, total, limit) {
        bail!(
            "page {} is out of range: {} models make {} page(s) of {}",
            page,
            total,
            page_count(total, limit),
            limit
        );
    }
    Ok(())
}

fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupted");
                trigger.cancel();
            }
            Err(e) => warn!(error = %e, "cannot listen for Ctrl-C"),
        }
    });
    cancel
}

/// Merge events and print every model whose copy changed, until `cancel`
/// fires or a changed model satisfies `done`.
async fn follow<F>(session: &mut SyncSession, cancel: &CancelToken, done: F)
where
    F: Fn(&Model) -> bool,
{
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => None,
            event = session.next_event() => event,
        };
        let Some(event) = event else { break };

        let model_id = event.model_id.clone();
        if session.apply(event) == 0 {
            continue;
        }
        let model = session
            .detail()
            .get(&model_id)
            .or_else(|| session.models().get(&model_id));
        if let Some(model) = model {
            print_model(model);
            if done(model) {
                break;
            }
        }
    }
}

fn print_models(models: &[Model]) {
    if models.is_empty() {
        println!("No models.");
        return;
    }
    for model in models {
        print_model(model);
    }
}

fn print_model(model: &Model) {
    println!(
        "{:<12} {:<32} {:<9} {:<10} {:>3}%",
        model.id,
        truncate(&model.name, 32),
        model.status.as_str(),
        model.embedding_status.as_str(),
        model.embedding_progress
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
