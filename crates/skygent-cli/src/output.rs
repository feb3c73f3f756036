//! Rendering query hits and run summaries in the four output formats.

use serde_json::json;
use skygent_store::QueryHit;
use skygent_sync::SyncResult;

use crate::cli::OutputFormat;

fn hit_json(hit: &QueryHit) -> serde_json::Value {
    json!({
        "store": hit.store.as_str(),
        "post": hit.post,
    })
}

fn truncate(text: &str, max: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

pub fn print_hits(hits: &[QueryHit], format: OutputFormat, compact: bool) {
    match format {
        OutputFormat::Json => {
            let all: Vec<_> = hits.iter().map(hit_json).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&all).expect("values serialize")
            );
        }
        OutputFormat::Ndjson => {
            for hit in hits {
                println!(
                    "{}",
                    serde_json::to_string(&hit_json(hit)).expect("values serialize")
                );
            }
        }
        OutputFormat::Markdown => {
            for hit in hits {
                let text = if compact {
                    truncate(&hit.post.text, 80)
                } else {
                    hit.post.text.clone()
                };
                println!(
                    "- **@{}** ({}, `{}`): {}",
                    hit.post.author,
                    hit.post.created_at,
                    hit.store,
                    text
                );
            }
        }
        OutputFormat::Table => {
            let text_width = if compact { 48 } else { 96 };
            println!(
                "{:<20}  {:<12}  {:<24}  TEXT",
                "CREATED", "STORE", "AUTHOR"
            );
            for hit in hits {
                println!(
                    "{:<20}  {:<12}  {:<24}  {}",
                    hit.post.created_at.to_rfc3339(),
                    truncate(hit.store.as_str(), 12),
                    truncate(hit.post.author.as_str(), 24),
                    truncate(&hit.post.text, text_width),
                );
            }
        }
    }
}

pub fn print_sync_result(result: &SyncResult, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Ndjson => {
            println!(
                "{}",
                serde_json::to_string_pretty(result).expect("results serialize")
            );
        }
        OutputFormat::Markdown | OutputFormat::Table => {
            println!(
                "added {}  skipped {}  errors {}",
                result.posts_added, result.posts_skipped, result.errors_total
            );
            for error in &result.errors {
                println!(
                    "  [{stage:?}] {item}: {message}",
                    stage = error.stage,
                    item = error.item.as_deref().unwrap_or("-"),
                    message = error.message,
                );
            }
        }
    }
}

pub fn print_value(value: &serde_json::Value, format: OutputFormat) {
    match format {
        OutputFormat::Ndjson => {
            println!("{}", serde_json::to_string(value).expect("values serialize"));
        }
        _ => {
            println!(
                "{}",
                serde_json::to_string_pretty(value).expect("values serialize")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_counts_chars_not_bytes() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello w…");
        assert_eq!(truncate("héllo wörld", 8), "héllo w…");
        assert_eq!(truncate("two\nlines", 20), "two lines");
    }
}
