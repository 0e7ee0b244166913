use anyhow::{Context, Result};

use capview_core::{
    CapabilityDocument, FetchRequest, ResilientFetcher, build_permalink, classify,
    load_capability_statement,
};

use crate::cli::{LoadArgs, OutputFormat};
use crate::output::{print_classified, print_json, print_overview, print_resources, print_success};

/// Load and validate the CapabilityStatement behind `request`.
///
/// A terminal failure is classified and reported once in the chosen format;
/// the returned error carries only the short title.
pub async fn load_document(
    fetcher: &ResilientFetcher,
    request: &FetchRequest,
    format: OutputFormat,
) -> Result<CapabilityDocument> {
    load_capability_statement(fetcher, request)
        .await
        .map_err(|failure| {
            tracing::debug!(stage = %failure.stage, kind = ?failure.kind, "load failed");
            let classified = classify(&failure, &request.url);
            print_classified(&classified, format);
            anyhow::anyhow!(classified.title())
        })
}

async fn fetch_document(
    fetcher: &ResilientFetcher,
    url: &str,
    token: Option<&str>,
    args: &LoadArgs,
    format: OutputFormat,
) -> Result<CapabilityDocument> {
    let token = token.filter(|_| args.authenticated).map(str::to_string);
    let request = FetchRequest::parse(url)?
        .with_json_format(!args.no_format_param)
        .with_bearer_token(token);
    load_document(fetcher, &request, format).await
}

/// Fetch a CapabilityStatement and print its overview (or raw JSON).
pub async fn load(
    fetcher: &ResilientFetcher,
    url: &str,
    token: Option<&str>,
    args: &LoadArgs,
    format: OutputFormat,
) -> Result<()> {
    let doc = fetch_document(fetcher, url, token, args, format).await?;
    if args.raw {
        print_json(doc.as_json());
    } else {
        print_overview(&doc, format);
        if format == OutputFormat::Table {
            print_success("CapabilityStatement loaded");
        }
    }
    Ok(())
}

pub async fn resources(
    fetcher: &ResilientFetcher,
    url: &str,
    token: Option<&str>,
    args: &LoadArgs,
    format: OutputFormat,
) -> Result<()> {
    let doc = fetch_document(fetcher, url, token, args, format).await?;
    print_resources(&doc, format);
    Ok(())
}

pub fn permalink(viewer: &str, url: &str) -> Result<()> {
    let link = build_permalink(viewer, url).context("Failed to build permalink")?;
    println!("{link}");
    Ok(())
}
