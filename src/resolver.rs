//! Turns raw tokens into [`AcquisitionRequest`]s: category, destination
//! directory, canonical URL and final filename.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{Category, Config, DirectoryTable};
use crate::error::FetchError;
use crate::providers::civitai::{CivitaiClient, HashSource};
use crate::request::{AcquisitionRequest, PostProcess};
use crate::tokens::{parse_token, ParsedToken};
use crate::urls::{self, Platform};
use crate::utils::{extension_of, get_filename_from_url, has_extension, placeholder_filename, sanitize_filename};

pub struct Resolver {
    civitai: Arc<CivitaiClient>,
    directories: DirectoryTable,
}

impl Resolver {
    pub fn new(config: &Config) -> Self {
        Self {
            civitai: Arc::new(CivitaiClient::new(config)),
            directories: config.directories.clone(),
        }
    }

    pub fn with_client(civitai: Arc<CivitaiClient>, directories: DirectoryTable) -> Self {
        Self { civitai, directories }
    }

    pub fn civitai(&self) -> Arc<CivitaiClient> {
        self.civitai.clone()
    }

    pub async fn resolve(&self, token: &str) -> Result<AcquisitionRequest, FetchError> {
        let parsed = parse_token(token);
        if parsed.url.is_empty() {
            return Err(FetchError::Resolution(format!("no URL in '{}'", parsed.raw)));
        }

        let category = resolve_category(parsed.prefix.as_deref());
        let (platform, canonical) = urls::normalize(&parsed.url);
        let destination_dir = self.destination_dir(&parsed, category);

        if platform == Platform::Civitai && category != Category::Extension {
            let meta = self
                .civitai
                .resolve_version(&parsed.url, parsed.filename_override.as_deref())
                .await?;
            let filename = sanitize_filename(&meta.filename);
            let declared = self.civitai.get_hash(HashSource::Metadata(&meta)).await?;
            return Ok(AcquisitionRequest {
                raw_spec: parsed.raw.clone(),
                category,
                source_url: parsed.url.clone(),
                canonical_url: meta.signed_url.clone(),
                platform,
                destination_dir,
                post_process: PostProcess::for_filename(&filename),
                filename,
                filename_is_placeholder: false,
                expected_sha256: parsed.sha256.clone().or(declared),
                metadata: Some(meta),
            });
        }

        let (filename, filename_is_placeholder) = infer_filename(&parsed, category, platform, &canonical)?;
        Ok(AcquisitionRequest {
            raw_spec: parsed.raw.clone(),
            category,
            source_url: parsed.url.clone(),
            canonical_url: canonical,
            platform,
            destination_dir,
            post_process: if category == Category::Extension || filename_is_placeholder {
                PostProcess::None
            } else {
                PostProcess::for_filename(&filename)
            },
            filename,
            filename_is_placeholder,
            expected_sha256: parsed.sha256,
            metadata: None,
        })
    }

    fn destination_dir(&self, parsed: &ParsedToken, category: Category) -> PathBuf {
        match &parsed.dir_override {
            Some(dir) => dir.clone(),
            None => self.directories.lookup(category).dir.clone(),
        }
    }
}

/// Category for a token prefix. Absent or unknown prefixes map to
/// [`Category::Model`].
pub fn resolve_category(prefix: Option<&str>) -> Category {
    match prefix {
        None => Category::Model,
        Some(p) => Category::parse(p).unwrap_or_else(|| {
            tracing::warn!(prefix = p, "unknown prefix, using the model directory");
            Category::Model
        }),
    }
}

/// Filename for a non-civitai request, and whether it is a placeholder.
fn infer_filename(
    parsed: &ParsedToken,
    category: Category,
    platform: Platform,
    canonical: &str,
) -> Result<(String, bool), FetchError> {
    let from_url = get_filename_from_url(canonical);

    if category == Category::Extension {
        let name = parsed
            .filename_override
            .clone()
            .or_else(|| urls::github_repo_path(canonical).map(|(_, repo)| repo))
            .or_else(|| from_url.map(|s| s.trim_end_matches(".git").to_string()))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| unresolvable(&parsed.raw))?;
        return Ok((sanitize_filename(&name), false));
    }

    if let Some(name) = parsed.filename_override.as_deref() {
        if has_extension(name) || (platform == Platform::GoogleDrive && urls::is_drive_folder(canonical)) {
            return Ok((sanitize_filename(name), false));
        }
        let ext = from_url
            .as_deref()
            .and_then(extension_of)
            .ok_or_else(|| unresolvable(&parsed.raw))?;
        return Ok((sanitize_filename(&format!("{}.{}", name, ext)), false));
    }

    if platform == Platform::GoogleDrive {
        return Ok((placeholder_filename(), true));
    }

    match from_url {
        Some(name) if has_extension(&name) => Ok((sanitize_filename(&name), false)),
        _ => Err(unresolvable(&parsed.raw)),
    }
}

fn unresolvable(raw: &str) -> FetchError {
    FetchError::Resolution(format!("cannot derive a filename with an extension for '{}'", raw))
}
