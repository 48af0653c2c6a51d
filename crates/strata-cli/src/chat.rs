//! Interactive chat loop

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use base64::Engine as _;
use futures::StreamExt;
use parking_lot::Mutex;
use strata_ai::providers::anthropic::AnthropicProvider;
use strata_ai::stream::{CollectedResponse, ResponseCollector};
use strata_ai::{
    Attachment, CacheTtl, CompletionProvider, StreamEvent, StreamRequest, format_cost,
};
use strata_context::{
    CompressionEngine, CompressionResult, CompressionScheduler, ContextBuilder, Message,
    MessageStore,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::store::JsonStore;

/// Cancellation token of the turn currently streaming
type ActiveTurn = Arc<Mutex<Option<CancellationToken>>>;

/// Options for one chat session
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Resume this conversation instead of starting a new one
    pub conversation: Option<String>,
    /// Project for new conversations
    pub project: String,
    pub system_prompt: String,
    pub model_id: String,
    pub thinking_budget: Option<u32>,
    /// Ask the provider to compact server-side if the context still overflows
    pub compaction: bool,
}

/// Run the interactive loop until EOF or /exit
pub async fn run(config: &Config, options: ChatOptions) -> anyhow::Result<()> {
    let store = Arc::new(JsonStore::open(config.data_dir())?);
    let provider: Arc<dyn CompletionProvider> = Arc::new(
        AnthropicProvider::from_env_or(config.api_key.as_deref()).context(
            "no Anthropic API key: set ANTHROPIC_API_KEY or api_key in the config file",
        )?,
    );

    let cost_model = config.cost_model();
    let mut builder = ContextBuilder::new(config.context.clone(), store.clone(), store.clone())
        .with_cost_model(cost_model.clone());
    let engine = CompressionEngine::new(config.context.clone(), store.clone(), provider.clone())
        .with_catalog(config.catalog());
    let scheduler = CompressionScheduler::new(Arc::new(engine));

    let conversation = match &options.conversation {
        Some(id) => store
            .get_conversation(id)?
            .with_context(|| format!("conversation {} not found", id))?,
        None => store.create_conversation(&options.project)?,
    };
    let project_id = conversation.project_id.clone();
    let conversation_id = conversation.id.clone();

    if io::IsTerminal::is_terminal(&io::stderr()) {
        eprintln!(
            "strata ({}) conversation {} in project {}",
            options.model_id, conversation_id, project_id
        );
        eprintln!("Commands: /attach <file>, /ttl 5m|1h, /exit");
        eprintln!("Ctrl-C cancels a reply; /exit or Ctrl-D quits");
        eprintln!();
    }

    let printer = spawn_status_printer(scheduler.subscribe());
    let active: ActiveTurn = Arc::new(Mutex::new(None));
    let interrupts = spawn_interrupt_listener(active.clone());
    let mut pending: Option<JoinHandle<Option<CompressionResult>>> = None;
    let mut attachments: Vec<Attachment> = Vec::new();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix('/') {
            let (name, arg) = command.split_once(' ').unwrap_or((command, ""));
            match name {
                "exit" | "quit" => break,
                "attach" => match load_attachment(Path::new(arg.trim())) {
                    Ok(attachment) => {
                        attachments.push(attachment);
                        println!("Attached {} ({} pending)", arg.trim(), attachments.len());
                    }
                    Err(e) => println!("Cannot attach: {:#}", e),
                },
                "ttl" => match CacheTtl::parse(arg) {
                    Some(ttl) => {
                        builder.set_cache_ttl(ttl);
                        println!("Cache TTL set to {}", ttl);
                    }
                    None => println!("Usage: /ttl 5m|1h"),
                },
                _ => println!("Unknown command: /{}", name),
            }
            continue;
        }

        let payload = builder.build(
            &project_id,
            &conversation_id,
            input,
            &options.system_prompt,
            &options.model_id,
            &attachments,
        );
        let mut request =
            payload.into_request(&options.model_id, config.context.response_token_reserve);
        request.thinking_budget = options.thinking_budget;
        if options.compaction {
            request.compaction = Some(builder.compaction_params());
        }

        println!();
        let turn = CancellationToken::new();
        *active.lock() = Some(turn.clone());
        let reply = stream_reply(provider.as_ref(), &request, &turn).await;
        *active.lock() = None;
        let response = match reply {
            Ok(Some(response)) => response,
            Ok(None) => {
                println!("[cancelled]");
                // Cancelled turns are skipped by the scheduler
                scheduler.schedule(&conversation_id, &project_id, turn);
                continue;
            }
            Err(e) => {
                eprintln!("Error: {:#}", e);
                continue;
            }
        };

        let cost = cost_model.cost(&options.model_id, &response.usage);
        let user = Message::user(&conversation_id, input)
            .with_attachments(std::mem::take(&mut attachments));
        let assistant = Message::assistant(&conversation_id, response.text)
            .with_telemetry(&options.model_id, response.usage, cost);
        store.append_message(user)?;
        store.append_message(assistant)?;

        println!(
            "[{} in ({} cached), {} out | {}]",
            response.usage.total_input(),
            response.usage.cache_read_tokens,
            response.usage.output_tokens,
            format_cost(cost)
        );
        println!();

        // Passes for one conversation queue behind its lock, so the latest finishes last
        pending = Some(scheduler.schedule(&conversation_id, &project_id, turn));
    }

    interrupts.abort();
    if let Some(handle) = pending {
        let _ = handle.await;
    }
    drop(scheduler);
    let _ = printer.await;
    Ok(())
}

/// Cancel the streaming turn, if any.
///
/// Returns false when nothing was streaming.
fn interrupt(active: &Mutex<Option<CancellationToken>>) -> bool {
    match active.lock().as_ref() {
        Some(turn) => {
            turn.cancel();
            true
        }
        None => false,
    }
}

/// One Ctrl-C handler for the whole session
fn spawn_interrupt_listener(active: ActiveTurn) -> JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !interrupt(&active) {
                println!();
                print!("(type /exit or press Ctrl-D to quit)\n> ");
                io::stdout().flush().ok();
            }
        }
    })
}

/// Stream one reply to stdout.
///
/// Returns `None` when the turn was cancelled.
async fn stream_reply(
    provider: &dyn CompletionProvider,
    request: &StreamRequest,
    turn: &CancellationToken,
) -> anyhow::Result<Option<CollectedResponse>> {
    let mut events = provider.stream(request).await?;
    let mut collector = ResponseCollector::new();

    loop {
        tokio::select! {
            _ = turn.cancelled() => {
                println!();
                return Ok(None);
            }
            event = events.next() => {
                let Some(event) = event else { break };
                if let StreamEvent::TextDelta { text } = &event {
                    print!("{}", text);
                    io::stdout().flush().ok();
                }
                collector.process_event(&event);
                if event.is_terminal() {
                    break;
                }
            }
        }
    }
    println!();
    Ok(Some(collector.finish()?))
}

fn spawn_status_printer(mut events: broadcast::Receiver<strata_context::CompressionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = event.status_message() {
                        eprintln!("[{}]", line);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Read a file as a base64 attachment, typed by extension
pub fn load_attachment(path: &Path) -> anyhow::Result<Attachment> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    let media_type = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => anyhow::bail!("unsupported file type: {}", path.display()),
    };
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let data = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(if media_type.starts_with("image/") {
        Attachment::image(media_type, data)
    } else {
        Attachment::document(media_type, data)
    })
}
