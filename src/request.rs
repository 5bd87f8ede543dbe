use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::archive::ArchiveKind;
use crate::config::Category;
use crate::error::{ErrorInfo, FetchError};
use crate::providers::civitai::ModelMetadata;
use crate::urls::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PostProcess {
    None,
    ExtractArchive,
}

impl PostProcess {
    pub fn for_filename(filename: &str) -> Self {
        if ArchiveKind::detect(filename).is_some() {
            PostProcess::ExtractArchive
        } else {
            PostProcess::None
        }
    }
}

/// One fully resolved unit of work. `canonical_url`, `destination_dir` and
/// `filename` are never empty.
#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    pub raw_spec: String,
    pub category: Category,
    pub source_url: String,
    pub canonical_url: String,
    pub platform: Platform,
    pub destination_dir: PathBuf,
    pub filename: String,
    /// Whether `filename` names the real file, or is a stand-in the transfer
    /// tool replaces (personal-cloud downloads without an explicit name).
    pub filename_is_placeholder: bool,
    pub post_process: PostProcess,
    pub expected_sha256: Option<String>,
    pub metadata: Option<ModelMetadata>,
}

impl AcquisitionRequest {
    pub fn destination(&self) -> PathBuf {
        self.destination_dir.join(&self.filename)
    }
}

/// A version-control repository to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneRequest {
    pub repo_url: String,
    pub destination_dir: PathBuf,
    pub repo_name: Option<String>,
    /// 0 clones the full history.
    pub depth: u32,
    pub recursive: bool,
}

impl CloneRequest {
    /// Directory name the repository is cloned into.
    pub fn target_name(&self) -> Option<String> {
        if let Some(name) = self.repo_name.as_ref().filter(|n| !n.trim().is_empty()) {
            return Some(name.trim().to_string());
        }
        self.repo_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .map(|s| s.trim_end_matches(".git").to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn target_path(&self) -> Option<PathBuf> {
        self.target_name().map(|name| self.destination_dir.join(name))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferResult {
    pub raw_spec: String,
    pub url: String,
    pub destination: Option<PathBuf>,
    pub filename: Option<String>,
    pub success: bool,
    /// The target already existed and nothing was transferred.
    pub skipped: bool,
    pub error: Option<ErrorInfo>,
}

impl TransferResult {
    pub fn completed(request: &AcquisitionRequest) -> Self {
        Self {
            raw_spec: request.raw_spec.clone(),
            url: request.canonical_url.clone(),
            destination: Some(request.destination_dir.clone()),
            filename: Some(request.filename.clone()),
            success: true,
            skipped: false,
            error: None,
        }
    }

    pub fn skipped(request: &AcquisitionRequest) -> Self {
        Self {
            skipped: true,
            ..Self::completed(request)
        }
    }

    pub fn failed(request: &AcquisitionRequest, err: &FetchError) -> Self {
        Self {
            success: false,
            error: Some(ErrorInfo::from(err)),
            ..Self::completed(request)
        }
    }

    /// A token that never became a request.
    pub fn unresolved(raw_spec: &str, err: &FetchError) -> Self {
        Self {
            raw_spec: raw_spec.to_string(),
            url: raw_spec.to_string(),
            destination: None,
            filename: None,
            success: false,
            skipped: false,
            error: Some(ErrorInfo::from(err)),
        }
    }

    pub fn for_clone(request: &CloneRequest, raw_spec: &str, outcome: Result<bool, FetchError>) -> Self {
        let (success, skipped, error) = match outcome {
            Ok(skipped) => (true, skipped, None),
            Err(err) => (false, false, Some(ErrorInfo::from(&err))),
        };
        Self {
            raw_spec: raw_spec.to_string(),
            url: request.repo_url.clone(),
            destination: Some(request.destination_dir.clone()),
            filename: request.target_name(),
            success,
            skipped,
            error,
        }
    }

    pub fn destination_display(&self) -> String {
        match (&self.destination, &self.filename) {
            (Some(dir), Some(name)) => dir.join(name).display().to_string(),
            (Some(dir), None) => dir.display().to_string(),
            _ => "-".to_string(),
        }
    }
}

/// All results of one batch, plus the convenience views the report needs.
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub results: Vec<TransferResult>,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &TransferResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }
}

pub fn path_key(path: &Path) -> PathBuf {
    path.components().collect()
}
