//! strata - cache-aware chat with rolling conversation compression

mod chat;
mod commands;
mod config;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use strata_ai::{CacheTtl, UsageReport};
use strata_context::DocumentStore;
use tracing_subscriber::EnvFilter;

/// strata - layered context and conversation compression for Claude
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default: claude-sonnet-4-5-20250929)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Estimate tokens and cost of the next message in a saved conversation
    Estimate {
        /// Conversation JSON file
        #[arg(short, long)]
        conversation: PathBuf,
        /// Message that would be sent
        #[arg(long)]
        message: String,
        /// System prompt
        #[arg(short, long, default_value = "")]
        system: String,
        /// Cache TTL (5m or 1h)
        #[arg(long, value_parser = parse_ttl)]
        ttl: Option<CacheTtl>,
    },

    /// Price a request from its token counts
    Cost {
        #[arg(long, default_value_t = 0)]
        input: u32,
        #[arg(long, default_value_t = 0)]
        output: u32,
        #[arg(long, default_value_t = 0)]
        cache_write: u32,
        #[arg(long, default_value_t = 0)]
        cache_read: u32,
        /// Cache TTL (5m or 1h)
        #[arg(long, value_parser = parse_ttl)]
        ttl: Option<CacheTtl>,
    },

    /// List known models and prices
    Models,

    /// Chat interactively
    Chat {
        /// Resume a conversation by ID
        #[arg(short, long)]
        conversation: Option<String>,
        /// Project for a new conversation
        #[arg(short, long, default_value = "default")]
        project: String,
        /// System prompt
        #[arg(short, long, default_value = "")]
        system: String,
        /// Extended thinking budget in tokens
        #[arg(long)]
        thinking: Option<u32>,
        /// Let the provider compact the context server-side when it overflows
        #[arg(long)]
        compaction: bool,
    },

    /// List saved conversations
    Conversations,
}

fn parse_ttl(s: &str) -> Result<CacheTtl, String> {
    CacheTtl::parse(s).ok_or_else(|| format!("invalid TTL '{}', expected 5m or 1h", s))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "strata=debug" } else { "strata=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        let path = config::Config::init()?;
        println!("Config file at: {}", path.display());
        return Ok(());
    }

    let mut cfg = config::Config::load();
    let model_id = cfg.model_id(args.model.as_deref());

    let Some(command) = args.command else {
        println!("No command given. Try `strata chat` or `strata --help`.");
        return Ok(());
    };

    match command {
        Command::Estimate {
            conversation,
            message,
            system,
            ttl,
        } => {
            if let Some(ttl) = ttl {
                cfg.context.cache_ttl = ttl;
            }
            let documents: Option<Arc<dyn DocumentStore>> =
                match store::JsonStore::open(cfg.data_dir()) {
                    Ok(store) => Some(Arc::new(store)),
                    Err(e) => {
                        tracing::warn!("Project documents unavailable: {:#}", e);
                        None
                    }
                };
            let report = commands::estimate(
                &conversation,
                &message,
                &system,
                &model_id,
                cfg.context.clone(),
                cfg.cost_model(),
                documents,
            )?;
            println!("{}", report);
        }
        Command::Cost {
            input,
            output,
            cache_write,
            cache_read,
            ttl,
        } => {
            if let Some(ttl) = ttl {
                cfg.context.cache_ttl = ttl;
            }
            let usage = UsageReport {
                input_tokens: input,
                output_tokens: output,
                cache_creation_tokens: cache_write,
                cache_read_tokens: cache_read,
            };
            println!("{}", commands::cost(&cfg.cost_model(), &model_id, usage));
        }
        Command::Models => {
            println!("{}", commands::models(&cfg.catalog(), &model_id));
        }
        Command::Conversations => {
            let store = store::JsonStore::open(cfg.data_dir())?;
            let conversations = store.list_conversations()?;
            if conversations.is_empty() {
                println!("No saved conversations.");
            }
            for conv in conversations {
                println!(
                    "{}  {}  project={}  summary={} tokens",
                    conv.id,
                    conv.updated_at.format("%Y-%m-%d %H:%M"),
                    conv.project_id,
                    conv.summary_token_count
                );
            }
        }
        Command::Chat {
            conversation,
            project,
            system,
            thinking,
            compaction,
        } => {
            let options = chat::ChatOptions {
                conversation,
                project,
                system_prompt: system,
                model_id,
                thinking_budget: thinking,
                compaction,
            };
            chat::run(&cfg, options).await?;
        }
    }

    Ok(())
}
