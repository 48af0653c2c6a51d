//! One-shot subcommands: estimate, cost and models

use std::path::Path;
use std::sync::Arc;

use strata_ai::{CacheTtl, CostModel, ModelCatalog, UsageReport, format_cost};
use strata_context::{
    ContextBuilder, ContextConfig, DocumentStore, InMemoryDocuments, InMemoryStore,
    RequestEstimate,
};

use crate::store::ConversationFile;

/// Estimate tokens and cost for sending `message` in a saved conversation
pub fn estimate(
    conversation_file: &Path,
    message: &str,
    system_prompt: &str,
    model_id: &str,
    context: ContextConfig,
    cost_model: CostModel,
    documents: Option<Arc<dyn DocumentStore>>,
) -> anyhow::Result<String> {
    let file = ConversationFile::load(conversation_file)?;
    let store = Arc::new(InMemoryStore::new());
    let conversation_id = file.conversation.id.clone();
    let project_id = file.conversation.project_id.clone();
    store.insert_conversation(file.conversation);
    for message in file.messages {
        store.append_message(message)?;
    }

    let documents = documents.unwrap_or_else(|| Arc::new(InMemoryDocuments::new()));
    let builder = ContextBuilder::new(context, store, documents).with_cost_model(cost_model);
    let estimate =
        builder.estimate_request(&project_id, &conversation_id, message, system_prompt, model_id);
    Ok(render_estimate(model_id, builder.cache_ttl(), &estimate))
}

fn render_estimate(model_id: &str, ttl: CacheTtl, e: &RequestEstimate) -> String {
    let summary_state = if e.summary_tokens == 0 {
        "none"
    } else if e.summary_cached {
        "cached"
    } else {
        "uncached"
    };
    let mut out = vec![
        format!("Model: {} (cache TTL {})", model_id, ttl),
        format!("  System + documents: {:>8} tokens  cached", e.system_tokens),
        format!("  Rolling summary:    {:>8} tokens  {}", e.summary_tokens, summary_state),
        format!("  History:            {:>8} tokens", e.history_tokens),
        format!("  Message:            {:>8} tokens", e.user_tokens),
        format!("  Total:              {:>8} tokens", e.total_tokens),
    ];
    if e.likely_cache_hit {
        out.push(format!(
            "Estimated input cost: {} with {} cached tokens ({}% saved, {} uncached)",
            format_cost(e.estimated_cost),
            e.cached_tokens,
            e.savings_percent,
            format_cost(e.uncached_cost)
        ));
    } else {
        out.push(format!(
            "Estimated input cost: {} (no cache hit expected)",
            format_cost(e.estimated_cost)
        ));
    }
    if e.budget_clamped {
        out.push("Warning: system prompt and summary leave little room for history".to_string());
    }
    out.join("\n")
}

/// Price a request from its usage numbers
pub fn cost(cost_model: &CostModel, model_id: &str, usage: UsageReport) -> String {
    let b = cost_model.breakdown(model_id, &usage);
    [
        format!("Model: {} (cache TTL {})", model_id, cost_model.ttl()),
        format!("  Input:       {:>8} tokens  {}", usage.input_tokens, format_cost(b.input)),
        format!("  Output:      {:>8} tokens  {}", usage.output_tokens, format_cost(b.output)),
        format!(
            "  Cache write: {:>8} tokens  {}",
            usage.cache_creation_tokens,
            format_cost(b.cache_write)
        ),
        format!(
            "  Cache read:  {:>8} tokens  {}",
            usage.cache_read_tokens,
            format_cost(b.cache_read)
        ),
        format!("  Total:                        {}", format_cost(b.total)),
    ]
    .join("\n")
}

/// List the catalog
pub fn models(catalog: &ModelCatalog, current: &str) -> String {
    let mut out = vec![format!(
        "{:<2}{:<30} {:>10} {:>10} {:>9}",
        "", "MODEL", "INPUT/M", "OUTPUT/M", "WINDOW"
    )];
    for model in &catalog.models {
        let marker = if model.id == current { "*" } else { "" };
        out.push(format!(
            "{:<2}{:<30} {:>10} {:>10} {:>9}",
            marker,
            model.id,
            format!("${:.2}", model.input_price),
            format!("${:.2}", model.output_price),
            model.context_window
        ));
    }
    out.push(format!("Unknown models are priced as {}", catalog.fallback));
    out.join("\n")
}
