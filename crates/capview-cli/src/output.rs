use colored::Colorize;
use serde_json::{Value, json};
use tabled::builder::Builder;
use tabled::settings::Style;

use capview_core::ledger::{LedgerSummary, StepStatus, WorkflowStep};
use capview_core::{CapabilityDocument, ClassifiedError};

use crate::cli::OutputFormat;

pub fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "!".yellow(), msg);
}

fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

pub fn print_overview(doc: &CapabilityDocument, format: OutputFormat) {
    if format == OutputFormat::Json {
        print_json(doc.as_json());
        return;
    }

    let software = doc
        .software()
        .map(|(name, version)| format!("{name} {}", version.unwrap_or_default()))
        .unwrap_or_else(|| "-".to_string());
    println!("{}: {}", "Source".cyan(), doc.source_url());
    println!("{}: {}", "Name".cyan(), or_dash(doc.name()));
    println!("{}: {}", "FHIR Version".cyan(), doc.fhir_version());
    println!("{}: {}", "Status".cyan(), or_dash(doc.status()));
    println!("{}: {}", "Kind".cyan(), or_dash(doc.kind()));
    println!("{}: {}", "Date".cyan(), or_dash(doc.date()));
    println!("{}: {}", "Publisher".cyan(), or_dash(doc.publisher()));
    println!("{}: {}", "Software".cyan(), software.trim_end());
    println!("{}: {}", "Implementation".cyan(), or_dash(doc.implementation()));
    let formats = doc.formats();
    if !formats.is_empty() {
        println!("{}: {}", "Formats".cyan(), formats.join(", "));
    }
    if let Some(security) = doc.security() {
        let cors = match security.cors {
            Some(true) => "enabled",
            Some(false) => "disabled",
            None => "not declared",
        };
        println!("{}: CORS {cors}", "Security".cyan());
        if !security.services.is_empty() {
            println!("  {}", security.services.join(", "));
        }
        if let Some(description) = &security.description {
            println!("  {description}");
        }
    }
    let interactions = doc.system_interactions();
    if !interactions.is_empty() {
        println!("{}: {}", "System interactions".cyan(), interactions.join(", "));
    }
    let operations = doc.operations();
    if !operations.is_empty() {
        println!("{}: {}", "Operations".cyan(), operations.join(", "));
    }
    println!(
        "{}: {} resource types",
        "Resources".cyan(),
        doc.resources().len()
    );
    println!("{}: {}", "REST base".cyan(), doc.base_url());
}

pub fn print_resources(doc: &CapabilityDocument, format: OutputFormat) {
    let resources = doc.resources();
    if format == OutputFormat::Json {
        print_json(&json!(resources));
        return;
    }
    if resources.is_empty() {
        println!("No resources declared.");
        return;
    }
    let mut builder = Builder::default();
    builder.push_record(["Resource", "Interactions", "Search params", "Operations"]);
    for r in &resources {
        builder.push_record([
            r.resource_type.clone(),
            r.interactions.join(", "),
            r.search_params.len().to_string(),
            r.operations.join(", "),
        ]);
    }
    println!("{}", builder.build().with(Style::rounded()));
}

// Plain text: ANSI codes inside cells throw off tabled's column widths.
fn status_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Passed => "✓ passed",
        StepStatus::Failed => "✗ failed",
        StepStatus::Skipped => "- skipped",
    }
}

pub fn print_steps(steps: &[WorkflowStep], summary: &LedgerSummary, format: OutputFormat) {
    if format == OutputFormat::Json {
        print_json(&json!({ "steps": steps, "summary": summary }));
        return;
    }

    let mut builder = Builder::default();
    builder.push_record(["Step", "Result", "HTTP", "Message"]);
    for step in steps {
        builder.push_record([
            step.name.clone(),
            status_label(step.status).to_string(),
            step.http_status.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
            step.message.clone(),
        ]);
    }
    println!("{}", builder.build().with(Style::rounded()));

    // Response data is shown for failures only.
    for step in steps.iter().filter(|s| s.status == StepStatus::Failed) {
        if let Some(preview) = step.payload_preview() {
            println!("{} {}", step.name.red(), "response data:".dimmed());
            println!("{preview}");
        }
    }
    println!("{}", summary.to_string().bold());
}

pub fn print_classified(error: &ClassifiedError, format: OutputFormat) {
    if format == OutputFormat::Json {
        let mut value = json!(error);
        value["title"] = Value::String(error.title().to_string());
        value["remediation"] = json!(error.category.remediation());
        eprintln!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
    } else {
        print_error(&error.to_string());
    }
}
