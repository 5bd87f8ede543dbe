use anyhow::{Context, Result};
use futures::StreamExt;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cloner::Cloner;
use crate::config::Config;
use crate::downloader::{destination_key, Dispatcher};
use crate::error::FetchError;
use crate::hashing;
use crate::providers::{self, civitai::CivitaiClient, civitai::ModelMetadata};
use crate::request::{AcquisitionRequest, BatchReport, TransferResult};
use crate::resolver::Resolver;
use crate::tokens;

enum Resolved {
    Request(AcquisitionRequest),
    Failed(TransferResult),
}

/// Resolves, transfers and clones one batch of tokens. Only configuration
/// problems (such as an unreadable list file) fail the call; every other
/// failure is recorded in the returned report.
pub async fn run_batch(raw_tokens: Vec<String>, config: &Config, cancel: CancellationToken) -> Result<BatchReport> {
    let config = Arc::new(config.clone());
    let client = providers::http_client();

    let tokens = tokens::expand_tokens(raw_tokens, &client)
        .await
        .context("Failed to expand batch input")?;
    if tokens.is_empty() {
        println!("Nothing to download.");
        return Ok(BatchReport::default());
    }
    tracing::info!(count = tokens.len(), "resolving batch");

    let resolver = Arc::new(Resolver::new(&config));
    let resolved = resolve_all(&resolver, tokens, config.concurrency, &cancel).await;

    let mut results = Vec::new();
    let mut requests = Vec::new();
    for item in resolved {
        match item {
            Resolved::Request(request) => requests.push(request),
            Resolved::Failed(result) => results.push(result),
        }
    }

    let dispatcher = Arc::new(Dispatcher::new(config.clone(), resolver.civitai(), cancel.clone()));
    let outcome = dispatcher.dispatch(requests, config.verbose).await;
    results.extend(outcome.results);

    // Cloning starts only once the file phase has fully finished.
    if !outcome.extensions.is_empty() {
        let cloner = Arc::new(Cloner::new(
            config.tools.git.clone(),
            dispatcher.multi_progress().clone(),
            config.concurrency,
            cancel.clone(),
        ));
        results.extend(cloner.clone_all(outcome.extensions, config.verbose).await);
    }

    let report = BatchReport { results };
    print_report(&report);
    Ok(report)
}

/// Resolves every token with bounded concurrency, keeping input order, and
/// rejects any request whose destination another request already claimed.
/// Tokens still resolving when `cancel` fires come back as cancelled.
async fn resolve_all(
    resolver: &Arc<Resolver>,
    tokens: Vec<String>,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Vec<Resolved> {
    let outcomes: Vec<(String, Result<AcquisitionRequest, FetchError>)> = futures::stream::iter(tokens)
        .map(|token| {
            let resolver = resolver.clone();
            let cancel = cancel.clone();
            async move {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(FetchError::Cancelled),
                    outcome = resolver.resolve(&token) => outcome,
                };
                (token, outcome)
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut claimed = HashSet::new();
    outcomes
        .into_iter()
        .map(|(token, outcome)| match outcome {
            Ok(request) if request.filename_is_placeholder => Resolved::Request(request),
            Ok(request) => {
                if claimed.insert(destination_key(&request)) {
                    Resolved::Request(request)
                } else {
                    let err = FetchError::Resolution(format!(
                        "destination {} is already used by another request",
                        request.destination().display()
                    ));
                    Resolved::Failed(TransferResult::failed(&request, &err))
                }
            }
            Err(err) => {
                tracing::debug!(token = %token, error = %err, "resolution failed");
                Resolved::Failed(TransferResult::unresolved(&token, &err))
            }
        })
        .collect()
}

/// End-of-batch summary with one entry per failed request.
pub fn print_report(report: &BatchReport) {
    let skipped = report.results.iter().filter(|r| r.skipped).count();
    let failures: Vec<&TransferResult> = report.failures().collect();

    println!(
        "Finished: {} succeeded ({} skipped), {} failed",
        report.succeeded(),
        skipped,
        failures.len()
    );
    if failures.is_empty() {
        return;
    }

    println!("Failed requests:");
    for failure in failures {
        let message = failure
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        println!("  URL:         {}", failure.url);
        println!("  Destination: {}", failure.destination_display());
        println!("  Error:       {}", message);
    }
}

/// Prints the civitai version matching a SHA-256, or the hash of a local file.
pub async fn lookup(target: &str, config: &Config) -> Result<()> {
    let sha256 = if Path::new(target).is_file() {
        println!("Hashing {}...", target);
        hashing::calculate_hash(Path::new(target))
            .await
            .with_context(|| format!("Failed to hash {}", target))?
    } else {
        target.trim().to_ascii_lowercase()
    };

    let client = CivitaiClient::new(config);
    match client.find_by_hash(&sha256).await? {
        Some(meta) => print_metadata(&sha256, &meta),
        None => println!("No civitai version found for {}", sha256),
    }
    Ok(())
}

fn print_metadata(sha256: &str, meta: &ModelMetadata) {
    println!("SHA256:       {}", sha256);
    println!("Model:        {}", meta.page_link());
    println!("Type:         {}", meta.model_type);
    println!("File:         {}", meta.filename);
    if let Some(base) = &meta.base_model {
        println!("Base model:   {}", base);
    }
    if let Some(words) = meta.trained_words.as_ref().filter(|w| !w.is_empty()) {
        println!("Trigger words: {}", words.join(", "));
    }
    println!("Download:     {}", meta.download_url);
    if meta.early_access_restricted {
        println!("Access:       early access only");
    }
}
