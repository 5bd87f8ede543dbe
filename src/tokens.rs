//! Batch input: splitting, list-file expansion and the per-token grammar
//! `[<prefix>:]<url>[<bracket>][ <filename>][|<sha256>]`.

use reqwest::Client;
use std::path::{Path, PathBuf};

use crate::error::FetchError;

/// A token split into its parts. Nothing here touches the network.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedToken {
    pub raw: String,
    pub prefix: Option<String>,
    pub url: String,
    pub dir_override: Option<PathBuf>,
    pub filename_override: Option<String>,
    pub sha256: Option<String>,
}

pub fn parse_token(token: &str) -> ParsedToken {
    let raw = token.trim().to_string();
    let mut rest = raw.as_str();

    let mut sha256 = None;
    if let Some((head, tail)) = rest.rsplit_once('|') {
        let tail = tail.trim();
        if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_hexdigit()) {
            sha256 = Some(tail.to_ascii_lowercase());
            rest = head.trim_end();
        }
    }

    let mut prefix = None;
    if let Some((head, tail)) = rest.split_once(':') {
        let is_ident = !head.is_empty()
            && head.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if is_ident && !tail.starts_with("//") {
            prefix = Some(head.to_ascii_lowercase());
            rest = tail.trim_start();
        }
    }

    let (url, bracket, trailing) = match rest.find('[') {
        Some(open) => match rest[open..].find(']') {
            Some(close) => (
                &rest[..open],
                Some(rest[open + 1..open + close].trim()),
                rest[open + close + 1..].trim(),
            ),
            None => split_trailing(rest),
        },
        None => split_trailing(rest),
    };

    let mut dir_override = None;
    let mut filename_override = None;
    match bracket.filter(|b| !b.is_empty()) {
        Some(b) if b.contains('/') || b.contains('\\') => dir_override = Some(PathBuf::from(b)),
        Some(b) => filename_override = Some(b.to_string()),
        None => {}
    }
    if filename_override.is_none() && !trailing.is_empty() {
        filename_override = Some(trailing.to_string());
    }
    let url = url.trim().to_string();

    ParsedToken {
        raw,
        prefix,
        url,
        dir_override,
        filename_override,
        sha256,
    }
}

fn split_trailing(rest: &str) -> (&str, Option<&str>, &str) {
    match rest.split_once(char::is_whitespace) {
        Some((url, trailing)) => (url, None, trailing.trim()),
        None => (rest, None, ""),
    }
}

/// Splits raw batch input on commas and newlines, dropping blanks and
/// `#` comment lines.
pub fn split_tokens(input: &str) -> Vec<String> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_remote_list(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    let path = lower.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();
    (lower.starts_with("http://") || lower.starts_with("https://"))
        && path.ends_with(".txt")
        && !token.contains('[')
        && !token.contains(char::is_whitespace)
}

fn list_lines(content: &str) -> impl Iterator<Item = String> + '_ {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
}

/// Replaces every list-file token (a local file, or a remote `.txt` URL)
/// with the tokens it contains. An unreadable list fails the whole batch.
pub async fn expand_tokens(tokens: Vec<String>, client: &Client) -> Result<Vec<String>, FetchError> {
    let mut expanded = Vec::with_capacity(tokens.len());
    for token in tokens {
        if Path::new(&token).is_file() {
            let content = tokio::fs::read_to_string(&token)
                .await
                .map_err(|e| FetchError::Config(format!("cannot read list file {}: {}", token, e)))?;
            tracing::debug!(list = %token, "expanding local list file");
            expanded.extend(list_lines(&content));
        } else if is_remote_list(&token) {
            let content = fetch_list(client, &token).await?;
            tracing::debug!(list = %token, "expanding remote list file");
            expanded.extend(list_lines(&content));
        } else {
            expanded.push(token);
        }
    }
    Ok(expanded)
}

async fn fetch_list(client: &Client, url: &str) -> Result<String, FetchError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::Config(format!("cannot fetch list {}: {}", url, e)))?;
    if !resp.status().is_success() {
        return Err(FetchError::Config(format!("cannot fetch list {}: {}", url, resp.status())));
    }
    resp.text()
        .await
        .map_err(|e| FetchError::Config(format!("cannot read list {}: {}", url, e)))
}
