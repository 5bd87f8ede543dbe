//! Client for the civitai model-version API: resolves page and download URLs
//! into signed download URLs with filename, hash and preview metadata.

use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::error::FetchError;
use crate::utils::{extension_of, file_stem, has_extension};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);
const PAGE_BASE: &str = "https://civitai.com/models";

/// Model types that ship a preview image next to the weights.
const PREVIEW_TYPES: [&str; 6] = [
    "Checkpoint",
    "TextualInversion",
    "LORA",
    "LoCon",
    "Hypernetwork",
    "AestheticGradient",
];

/// Images at or above this level are skipped in constrained environments.
const NSFW_LIMIT: u32 = 4;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelMetadata {
    pub model_id: String,
    pub version_id: String,
    /// Download URL without any token.
    pub download_url: String,
    /// Download URL carrying the configured token, if any.
    pub signed_url: String,
    pub filename: String,
    pub model_type: String,
    pub sha256: Option<String>,
    pub preview_url: Option<String>,
    pub preview_name: Option<String>,
    pub early_access_restricted: bool,
    pub base_model: Option<String>,
    pub trained_words: Option<Vec<String>>,
}

impl ModelMetadata {
    pub fn page_link(&self) -> String {
        format!("{}/{}?modelVersionId={}", PAGE_BASE, self.model_id, self.version_id)
    }

    /// Refuses restricted versions; no download may be built from them.
    pub fn ensure_available(&self) -> Result<(), FetchError> {
        if self.early_access_restricted {
            return Err(FetchError::RestrictedAccess {
                link: self.page_link(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRef {
    Version(String),
    /// Bare model page; the latest version has to be looked up.
    Model(String),
}

pub enum HashSource<'a> {
    Metadata(&'a ModelMetadata),
    VersionId(&'a str),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSummary {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionResponse {
    id: u64,
    model_id: u64,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    availability: Option<String>,
    #[serde(default)]
    early_access_ends_at: Option<String>,
    #[serde(default)]
    base_model: Option<String>,
    #[serde(default)]
    trained_words: Option<Vec<String>>,
    #[serde(default)]
    files: Vec<VersionFile>,
    #[serde(default)]
    images: Vec<VersionImage>,
    #[serde(default)]
    model: Option<ModelSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    hashes: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionImage {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    nsfw_level: Option<u32>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelSummary {
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelResponse {
    #[serde(default)]
    model_versions: Vec<VersionSummary>,
}

/// Sidecar `<stem>.json` written next to a downloaded model.
#[derive(Debug, Serialize, PartialEq)]
pub struct ModelInfo {
    pub model_type: String,
    pub sd_version: String,
    #[serde(rename = "modelId")]
    pub model_id: String,
    #[serde(rename = "modelVersionId")]
    pub model_version_id: String,
    pub activation_text: String,
    pub sha256: Option<String>,
}

impl From<&ModelMetadata> for ModelInfo {
    fn from(meta: &ModelMetadata) -> Self {
        const BASE_MAPPING: [(&str, &str); 7] = [
            ("SD 1", "SD1"),
            ("SD 1.5", "SD1"),
            ("SD 2", "SD2"),
            ("SD 3", "SD3"),
            ("SDXL", "SDXL"),
            ("Pony", "SDXL"),
            ("Illustrious", "SDXL"),
        ];
        let base = meta.base_model.as_deref().unwrap_or_default();
        let sd_version = BASE_MAPPING
            .iter()
            .find(|(key, _)| base.contains(key))
            .map(|(_, v)| v.to_string())
            .unwrap_or_default();
        ModelInfo {
            model_type: meta.model_type.clone(),
            sd_version,
            model_id: meta.model_id.clone(),
            model_version_id: meta.version_id.clone(),
            activation_text: meta.trained_words.clone().unwrap_or_default().join(", "),
            sha256: meta.sha256.clone(),
        }
    }
}

/// Finds the version reference in one of the three supported URL shapes:
/// `?modelVersionId=`, `/api/download/models/<id>` or a `/models/<id>` page.
pub fn extract_version_ref(url: &str) -> Option<VersionRef> {
    let parsed = Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    if let Some((_, id)) = parsed.query_pairs().find(|(k, _)| k == "modelVersionId") {
        return numeric(&id).map(VersionRef::Version);
    }

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    match segments.as_slice() {
        ["api", "download", "models", id, ..] => numeric(id).map(VersionRef::Version),
        ["models", id, ..] => numeric(id).map(VersionRef::Model),
        _ => None,
    }
}

fn numeric(id: &str) -> Option<String> {
    let id = id.trim();
    (!id.is_empty() && id.chars().all(|c| c.is_ascii_digit())).then(|| id.to_string())
}

/// Removes any `token` parameter from `raw` and returns the clean URL along
/// with the URL signed with `token`.
pub fn sign_url(raw: &str, token: Option<&str>) -> (String, String) {
    let Ok(mut url) = Url::parse(raw) else {
        return (raw.to_string(), raw.to_string());
    };
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "token")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.set_query(None);
    if !kept.is_empty() {
        url.query_pairs_mut().extend_pairs(kept);
    }
    let clean = url.to_string();

    match token.filter(|t| !t.is_empty()) {
        Some(token) => {
            url.query_pairs_mut().append_pair("token", token);
            (clean, url.to_string())
        }
        None => (clean.clone(), clean),
    }
}

fn model_filename(files: &[VersionFile], requested: Option<&str>) -> Result<String, FetchError> {
    let declared = files.first().and_then(|f| f.name.clone());
    match (requested.map(str::trim).filter(|n| !n.is_empty()), declared) {
        (Some(name), Some(declared)) if !has_extension(name) => match extension_of(&declared) {
            Some(ext) => Ok(format!("{}.{}", name, ext)),
            None => Ok(name.to_string()),
        },
        (Some(name), _) => Ok(name.to_string()),
        (None, Some(declared)) => Ok(declared),
        (None, None) => Err(FetchError::Resolution("version has no files".to_string())),
    }
}

fn width_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"/width=\d+/").unwrap())
}

fn select_preview(
    images: &[VersionImage],
    model_filename: &str,
    constrained: bool,
    width: Option<u32>,
) -> Option<(String, String)> {
    for image in images {
        let Some(url) = image.url.as_deref().filter(|u| !u.is_empty()) else {
            continue;
        };
        if constrained && image.nsfw_level.unwrap_or(0) >= NSFW_LIMIT {
            continue;
        }
        let lower = url.to_ascii_lowercase();
        let path = lower.split('?').next().unwrap_or_default();
        if image.kind.as_deref() == Some("video")
            || [".gif", ".mp4", ".webm"].iter().any(|ext| path.ends_with(ext))
        {
            continue;
        }
        let ext = url
            .rsplit('.')
            .next()
            .and_then(|e| e.split('?').next())
            .filter(|e| !e.contains('/'))
            .unwrap_or("png");
        let url = match width {
            Some(w) => width_pattern()
                .replace(url, format!("/width={}/", w).as_str())
                .into_owned(),
            None => url.to_string(),
        };
        return Some((url, format!("{}.preview.{}", file_stem(model_filename), ext)));
    }
    None
}

/// Metadata for a version response. Restricted versions are returned with
/// `early_access_restricted` set; callers decide via [`ModelMetadata::ensure_available`].
fn build_metadata(
    data: VersionResponse,
    requested: Option<&str>,
    token: Option<&str>,
    constrained: bool,
    preview_width: Option<u32>,
) -> Result<ModelMetadata, FetchError> {
    let early_access_restricted =
        data.availability.as_deref() == Some("EarlyAccess") || data.early_access_ends_at.is_some();
    let model_type = data
        .model
        .as_ref()
        .and_then(|m| m.kind.clone())
        .unwrap_or_else(|| "Checkpoint".to_string());

    let raw_download = data
        .download_url
        .clone()
        .or_else(|| data.files.first().and_then(|f| f.download_url.clone()))
        .ok_or_else(|| FetchError::Resolution(format!("version {} has no download URL", data.id)))?;
    let (download_url, signed_url) = sign_url(&raw_download, token);

    let filename = model_filename(&data.files, requested)?;
    let sha256 = declared_sha256(&data);

    let (preview_url, preview_name) = if PREVIEW_TYPES.contains(&model_type.as_str()) {
        match select_preview(&data.images, &filename, constrained, preview_width) {
            Some((url, name)) => (Some(url), Some(name)),
            None => (None, None),
        }
    } else {
        (None, None)
    };

    Ok(ModelMetadata {
        model_id: data.model_id.to_string(),
        version_id: data.id.to_string(),
        download_url,
        signed_url,
        filename,
        model_type,
        sha256,
        preview_url,
        preview_name,
        early_access_restricted,
        base_model: data.base_model,
        trained_words: data.trained_words,
    })
}

fn declared_sha256(data: &VersionResponse) -> Option<String> {
    data.files
        .first()
        .and_then(|f| f.hashes.get("SHA256"))
        .map(|h| h.to_ascii_lowercase())
}

pub struct CivitaiClient {
    client: Client,
    api_base: String,
    token: Option<String>,
    constrained: bool,
    preview_width: Option<u32>,
    retry_delay: Duration,
}

impl CivitaiClient {
    pub fn new(config: &Config) -> Self {
        if config.civitai_token.is_none() {
            tracing::warn!("no civitai token configured; only public model versions are reachable");
        }
        Self::with_client(super::http_client(), config)
    }

    pub fn with_client(client: Client, config: &Config) -> Self {
        Self {
            client,
            api_base: config.api_base.clone(),
            token: config.civitai_token.clone(),
            constrained: config.constrained_env,
            preview_width: config.preview_width,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Base delay between retries of a failed API request; grows linearly
    /// with the attempt number.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let mut last_error = FetchError::Network(format!("no attempt made for {}", url));

        for attempt in 1..=RETRY_ATTEMPTS {
            tracing::debug!(%url, attempt, "civitai API request");
            let mut request = self.client.get(url).header(reqwest::header::ACCEPT, "application/json");
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                    return Err(FetchError::NotFound(url.to_string()));
                }
                Ok(resp) if !resp.status().is_success() => {
                    return Err(FetchError::Network(format!("{} returned {}", url, resp.status())));
                }
                Ok(resp) => {
                    return resp
                        .json::<T>()
                        .await
                        .map_err(|e| FetchError::Network(format!("invalid response from {}: {}", url, e)));
                }
                Err(e) => {
                    tracing::warn!(%url, attempt, error = %e, "civitai API request failed");
                    last_error = FetchError::Network(e.to_string());
                }
            }

            if attempt < RETRY_ATTEMPTS {
                tokio::time::sleep(self.retry_delay * attempt).await;
            }
        }
        Err(last_error)
    }

    async fn version_data(&self, version_id: &str) -> Result<VersionResponse, FetchError> {
        self.get_json(&self.endpoint(&format!("model-versions/{}", version_id)))
            .await
    }

    /// Version id for any supported URL shape; bare model pages resolve to
    /// their latest version.
    pub async fn version_id_for(&self, url: &str) -> Result<String, FetchError> {
        match extract_version_ref(url) {
            Some(VersionRef::Version(id)) => Ok(id),
            Some(VersionRef::Model(model_id)) => self
                .model_versions(&model_id)
                .await?
                .first()
                .map(|v| v.id.to_string())
                .ok_or_else(|| FetchError::NotFound(format!("model {} has no versions", model_id))),
            None => Err(FetchError::Classification(format!(
                "unsupported civitai URL: {}",
                url
            ))),
        }
    }

    /// Resolves `url` into downloadable metadata. Fails closed on
    /// early-access versions.
    pub async fn resolve_version(
        &self,
        url: &str,
        filename: Option<&str>,
    ) -> Result<ModelMetadata, FetchError> {
        let version_id = self.version_id_for(url).await?;
        let data = self.version_data(&version_id).await?;
        let meta = build_metadata(
            data,
            filename,
            self.token.as_deref(),
            self.constrained,
            self.preview_width,
        )?;
        if let Err(err) = meta.ensure_available() {
            tracing::warn!("Requires Early Access: {}", meta.page_link());
            return Err(err);
        }
        Ok(meta)
    }

    pub async fn get_hash(&self, source: HashSource<'_>) -> Result<Option<String>, FetchError> {
        match source {
            HashSource::Metadata(meta) => Ok(meta.sha256.clone()),
            HashSource::VersionId(id) => Ok(declared_sha256(&self.version_data(id).await?)),
        }
    }

    /// Reverse lookup of a version by its SHA-256. Unknown hashes yield `None`.
    pub async fn find_by_hash(&self, sha256: &str) -> Result<Option<ModelMetadata>, FetchError> {
        let url = self.endpoint(&format!("model-versions/by-hash/{}", sha256.trim()));
        match self.get_json::<VersionResponse>(&url).await {
            Ok(data) => build_metadata(
                data,
                None,
                self.token.as_deref(),
                self.constrained,
                self.preview_width,
            )
            .map(Some),
            Err(FetchError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn model_versions(&self, model_id: &str) -> Result<Vec<VersionSummary>, FetchError> {
        let data: ModelResponse = self.get_json(&self.endpoint(&format!("models/{}", model_id))).await?;
        Ok(data.model_versions)
    }

    /// Saves the preview image next to the model. Existing previews are kept.
    pub async fn download_preview(
        &self,
        meta: &ModelMetadata,
        dir: &Path,
    ) -> Result<Option<PathBuf>, FetchError> {
        let (Some(url), Some(name)) = (&meta.preview_url, &meta.preview_name) else {
            return Ok(None);
        };
        let path = dir.join(name);
        if path.exists() {
            return Ok(None);
        }

        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::Network(format!("{} returned {}", url, resp.status())));
        }
        let bytes = resp.bytes().await?;
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, &bytes).await?;
        Ok(Some(path))
    }
}

/// Writes `<stem>.json` model info next to the model unless it already exists.
pub async fn save_model_info(meta: &ModelMetadata, dir: &Path) -> Result<Option<PathBuf>, FetchError> {
    let path = dir.join(format!("{}.json", file_stem(&meta.filename)));
    if path.exists() {
        return Ok(None);
    }
    let info = ModelInfo::from(meta);
    let content = serde_json::to_string_pretty(&info)
        .map_err(|e| FetchError::Resolution(format!("cannot encode model info: {}", e)))?;
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&path, content).await?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fixture_server::FixtureServer;
    use crate::resolver::Resolver;
    use serde_json::json;
    use std::sync::Arc;

    fn version_fixture(availability: &str) -> VersionResponse {
        serde_json::from_value(version_json(availability)).unwrap()
    }

    fn client_for(server: &FixtureServer, token: Option<&str>) -> CivitaiClient {
        let mut config = Config::new(Path::new("/sd"));
        config.api_base = server.base.clone();
        config.civitai_token = token.map(str::to_string);
        CivitaiClient::new(&config).with_retry_delay(Duration::from_millis(10))
    }

    fn resolver_for(client: CivitaiClient) -> Resolver {
        let config = Config::new(Path::new("/sd"));
        Resolver::with_client(Arc::new(client), config.directories)
    }

    fn version_json(availability: &str) -> serde_json::Value {
        json!({
            "id": 456,
            "modelId": 123,
            "availability": availability,
            "baseModel": "SDXL 1.0",
            "trainedWords": ["foo", "bar"],
            "downloadUrl": "https://civitai.com/api/download/models/456?type=Model&token=stale",
            "model": { "name": "Example", "type": "LORA" },
            "files": [{
                "name": "example_v1.safetensors",
                "downloadUrl": "https://civitai.com/api/download/models/456",
                "hashes": { "SHA256": "ABCDEF0123" }
            }],
            "images": [
                { "url": "https://image.civitai.com/x/width=1024/anim.gif", "nsfwLevel": 1 },
                { "url": "https://image.civitai.com/x/width=1024/spicy.jpeg", "nsfwLevel": 8 },
                { "url": "https://image.civitai.com/x/width=1024/safe.jpeg", "nsfwLevel": 1 }
            ]
        })
    }

    #[test]
    fn extracts_version_from_all_url_shapes() {
        assert_eq!(
            extract_version_ref("https://civitai.com/models/123?modelVersionId=456"),
            Some(VersionRef::Version("456".into()))
        );
        assert_eq!(
            extract_version_ref("https://civitai.com/api/download/models/789?type=Model"),
            Some(VersionRef::Version("789".into()))
        );
        assert_eq!(
            extract_version_ref("https://civitai.com/models/123/some-slug"),
            Some(VersionRef::Model("123".into()))
        );
        assert_eq!(extract_version_ref("https://civitai.com/images/5"), None);
        assert_eq!(extract_version_ref("civitai.com/models/1"), None);
    }

    #[test]
    fn signing_replaces_existing_token() {
        let (clean, signed) = sign_url(
            "https://civitai.com/api/download/models/456?type=Model&token=stale",
            Some("fresh"),
        );
        assert_eq!(clean, "https://civitai.com/api/download/models/456?type=Model");
        assert_eq!(signed, "https://civitai.com/api/download/models/456?type=Model&token=fresh");

        let (clean, signed) = sign_url("https://civitai.com/api/download/models/1?token=x", None);
        assert_eq!(clean, "https://civitai.com/api/download/models/1");
        assert_eq!(signed, clean);
    }

    #[test]
    fn builds_metadata_with_preview_and_hash() {
        let meta = build_metadata(version_fixture("Public"), None, Some("tok"), false, Some(512)).unwrap();
        assert_eq!(meta.filename, "example_v1.safetensors");
        assert_eq!(meta.model_type, "LORA");
        assert_eq!(meta.sha256.as_deref(), Some("abcdef0123"));
        assert!(meta.signed_url.ends_with("token=tok"));
        assert!(!meta.early_access_restricted);
        // the gif is skipped; the first still image wins outside constrained environments
        assert_eq!(
            meta.preview_url.as_deref(),
            Some("https://image.civitai.com/x/width=512/spicy.jpeg")
        );
        assert_eq!(meta.preview_name.as_deref(), Some("example_v1.preview.jpeg"));
    }

    #[test]
    fn constrained_environment_skips_flagged_previews() {
        let meta = build_metadata(version_fixture("Public"), None, None, true, None).unwrap();
        assert_eq!(
            meta.preview_url.as_deref(),
            Some("https://image.civitai.com/x/width=1024/safe.jpeg")
        );
    }

    #[test]
    fn requested_name_wins_and_gains_extension() {
        let meta = build_metadata(version_fixture("Public"), Some("mine"), None, false, None).unwrap();
        assert_eq!(meta.filename, "mine.safetensors");
        assert_eq!(meta.preview_name.as_deref(), Some("mine.preview.jpeg"));

        let meta = build_metadata(version_fixture("Public"), Some("mine.ckpt"), None, false, None).unwrap();
        assert_eq!(meta.filename, "mine.ckpt");
    }

    #[test]
    fn early_access_fails_closed() {
        let meta = build_metadata(version_fixture("EarlyAccess"), None, None, false, None).unwrap();
        assert!(meta.early_access_restricted);
        match meta.ensure_available() {
            Err(FetchError::RestrictedAccess { link }) => {
                assert_eq!(link, "https://civitai.com/models/123?modelVersionId=456");
            }
            other => panic!("expected restricted access, got {other:?}"),
        }
    }

    #[test]
    fn model_info_maps_base_model() {
        let meta = build_metadata(version_fixture("Public"), None, None, false, None).unwrap();
        let info = ModelInfo::from(&meta);
        assert_eq!(info.sd_version, "SDXL");
        assert_eq!(info.activation_text, "foo, bar");
        assert_eq!(info.model_version_id, "456");
    }

    #[tokio::test]
    async fn model_info_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let meta = build_metadata(version_fixture("Public"), None, None, false, None).unwrap();
        let path = save_model_info(&meta, dir.path()).await.unwrap().unwrap();
        assert!(path.ends_with("example_v1.json"));
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["modelId"], "123");
        assert_eq!(save_model_info(&meta, dir.path()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn early_access_version_is_refused_by_resolver() {
        let server = FixtureServer::start(
            vec![("/model-versions/456", 200, version_json("EarlyAccess").to_string())],
            0,
        )
        .await;
        let resolver = resolver_for(client_for(&server, Some("tok")));

        let err = resolver
            .resolve("lora:https://civitai.com/models/123?modelVersionId=456")
            .await
            .unwrap_err();
        match err {
            FetchError::RestrictedAccess { link } => {
                assert_eq!(link, "https://civitai.com/models/123?modelVersionId=456");
            }
            other => panic!("expected restricted access, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bare_model_page_resolves_to_latest_version() {
        let server = FixtureServer::start(
            vec![
                (
                    "/models/123",
                    200,
                    json!({ "modelVersions": [{ "id": 456, "name": "v2" }, { "id": 400, "name": "v1" }] }).to_string(),
                ),
                ("/model-versions/456", 200, version_json("Public").to_string()),
            ],
            0,
        )
        .await;
        let resolver = resolver_for(client_for(&server, Some("tok")));

        let req = resolver
            .resolve("lora:https://civitai.com/models/123/example-slug")
            .await
            .unwrap();
        assert_eq!(req.filename, "example_v1.safetensors");
        assert_eq!(req.destination_dir, PathBuf::from("/sd/models/Lora"));
        assert_eq!(req.expected_sha256.as_deref(), Some("abcdef0123"));
        assert!(req.canonical_url.ends_with("token=tok"));
        assert_eq!(req.metadata.as_ref().map(|m| m.version_id.as_str()), Some("456"));
    }

    #[tokio::test]
    async fn hash_by_version_id_and_unknown_hash_lookup() {
        let server = FixtureServer::start(
            vec![
                ("/model-versions/456", 200, version_json("Public").to_string()),
                ("/model-versions/by-hash/abcdef0123", 200, version_json("Public").to_string()),
            ],
            0,
        )
        .await;
        let client = client_for(&server, None);

        let hash = client.get_hash(HashSource::VersionId("456")).await.unwrap();
        assert_eq!(hash.as_deref(), Some("abcdef0123"));

        let found = client.find_by_hash("abcdef0123").await.unwrap().unwrap();
        assert_eq!(found.version_id, "456");
        assert_eq!(client.find_by_hash("ffff").await.unwrap(), None);

        let err = client.resolve_version("https://civitai.com/models/9?modelVersionId=999", None).await;
        assert!(matches!(err, Err(FetchError::NotFound(_))));
    }

    #[tokio::test]
    async fn dropped_connections_are_retried() {
        let server = FixtureServer::start(
            vec![("/model-versions/456", 200, version_json("Public").to_string())],
            2,
        )
        .await;
        let client = client_for(&server, None);

        let meta = client
            .resolve_version("https://civitai.com/api/download/models/456", None)
            .await
            .unwrap();
        assert_eq!(meta.filename, "example_v1.safetensors");
        assert_eq!(server.connections(), 3);
    }
}
