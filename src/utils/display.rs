use crate::actors::messages::{AgentStatus, HandlerInfo};
use crate::search::document::{Document, DocumentQueryResult, SourceStatus};
use colored::*;

pub fn print_header(text: &str) {
    println!("\n{}", text.bright_cyan().bold());
    println!("{}", "=".repeat(text.len()).bright_cyan());
}

pub fn print_success(text: &str) {
    println!("{}", text.green());
}

pub fn print_error(text: &str) {
    eprintln!("{}", text.red().bold());
}

pub fn print_info(text: &str) {
    println!("{}", text.blue());
}

pub fn print_warning(text: &str) {
    println!("{}", text.yellow().bold());
}

pub fn print_progress(source: &str, total: usize, from_cache: bool) {
    let origin = if from_cache { "cache" } else { "live" };
    println!(
        "  {} {} ({}), {} merged so far",
        "+".green(),
        source.bold(),
        origin.dimmed(),
        total
    );
}

pub fn print_document(index: usize, document: &Document) {
    let title = document.field("title").unwrap_or("(untitled)");
    println!("{:>3}. {} {}", index + 1, title.bold(), format!("[{:.2}]", document.relevance).dimmed());

    for (name, value) in document.fields.iter().filter(|(name, _)| name.as_str() != "title") {
        println!("     {}: {}", name.cyan(), value);
    }

    let found: Vec<&str> = document
        .provenance
        .iter()
        .filter(|p| p.status == SourceStatus::Found)
        .map(|p| p.source.as_str())
        .collect();
    println!("     {}: {}", "found in".green(), found.join(", "));
    let missed = document.missed_sources();
    if !missed.is_empty() {
        println!("     {}: {}", "missed".yellow(), missed.join(", "));
    }
}

pub fn print_result(result: &DocumentQueryResult) {
    print_header(&format!(
        "{} of {} documents",
        result.documents.len(),
        result.total
    ));
    for (index, document) in result.documents.iter().enumerate() {
        print_document(index, document);
    }
    if result.partial {
        print_warning(&format!(
            "Partial result: no answer from {}",
            result.missed_sources.join(", ")
        ));
    }
}

pub fn print_status(status: &AgentStatus, handlers: &[HandlerInfo]) {
    print_header(&format!("Agent '{}'", status.name));
    println!("  {}: {}", "service".cyan(), status.service_name);
    println!("  {}: {}s", "uptime".cyan(), status.uptime_seconds);
    println!("  {}: {}", "live handlers".cyan(), status.live_handlers);

    for handler in handlers {
        let state = if handler.running {
            "running".green()
        } else {
            "halted".red()
        };
        let request = handler
            .request_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "    {} {} {} ({}s)",
            state,
            handler.description,
            request.dimmed(),
            handler.uptime_seconds
        );
    }
}
