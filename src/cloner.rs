//! `git clone` of extension repositories, supervised like file transfers.

use indicatif::MultiProgress;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::monitor::{supervise, ProgressDisplay};
use crate::request::{CloneRequest, TransferResult};
use crate::urls;

/// Arguments for `git` cloning `request`. Only github.com repositories are accepted.
pub fn build_clone_args(request: &CloneRequest) -> Result<Vec<String>, FetchError> {
    if urls::github_repo_path(&request.repo_url).is_none() {
        return Err(FetchError::Classification(format!(
            "not a GitHub repository: {}",
            request.repo_url
        )));
    }
    let target = request
        .target_path()
        .ok_or_else(|| FetchError::Resolution(format!("no repository name in {}", request.repo_url)))?;

    let mut args = vec!["clone".to_string(), "--progress".to_string()];
    if request.depth > 0 {
        args.push("--depth".to_string());
        args.push(request.depth.to_string());
    }
    if request.recursive {
        args.push("--recursive".to_string());
        if request.depth > 0 {
            args.push("--shallow-submodules".to_string());
        }
    }
    args.push(request.repo_url.clone());
    args.push(target.display().to_string());
    Ok(args)
}

pub struct Cloner {
    git: PathBuf,
    multi_progress: MultiProgress,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Cloner {
    pub fn new(git: PathBuf, multi_progress: MultiProgress, concurrency: usize, cancel: CancellationToken) -> Self {
        Self {
            git,
            multi_progress,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            cancel,
        }
    }

    /// Clones every request concurrently. `requests` pairs each clone with
    /// the raw token it came from; results keep that order.
    pub async fn clone_all(self: &Arc<Self>, requests: Vec<(CloneRequest, String)>, verbose: bool) -> Vec<TransferResult> {
        let mut handles = Vec::with_capacity(requests.len());
        for (request, raw_spec) in requests {
            let cloner = self.clone();
            let task_request = request.clone();
            let handle = tokio::spawn(async move {
                let permit = tokio::select! {
                    permit = cloner.semaphore.clone().acquire_owned() => permit.ok(),
                    _ = cloner.cancel.cancelled() => None,
                };
                match permit {
                    Some(_) if !cloner.cancel.is_cancelled() => cloner.clone_one(&task_request, verbose).await,
                    _ => Err(FetchError::Cancelled),
                }
            });
            handles.push((request, raw_spec, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (request, raw_spec, handle) in handles {
            let outcome = handle.await.unwrap_or_else(|e| {
                Err(FetchError::Process {
                    program: "task".to_string(),
                    code: None,
                    message: e.to_string(),
                })
            });
            results.push(TransferResult::for_clone(&request, &raw_spec, outcome));
        }
        results
    }

    /// `Ok(true)` when the target directory already existed.
    async fn clone_one(&self, request: &CloneRequest, verbose: bool) -> Result<bool, FetchError> {
        let args = build_clone_args(request)?;
        let label = request.target_name().unwrap_or_else(|| request.repo_url.clone());
        let display = ProgressDisplay::new(&self.multi_progress, &label, verbose);

        if request.target_path().map(|p| p.exists()).unwrap_or(false) {
            display.finish(format!("Skipped     {}", label));
            return Ok(true);
        }
        tokio::fs::create_dir_all(&request.destination_dir).await?;

        let mut command = Command::new(&self.git);
        command.args(&args);
        match supervise(command, &display, &self.cancel).await {
            Ok(_) => {
                display.finish(format!("Cloned      {}", label));
                Ok(false)
            }
            Err(err) => {
                display.abandon(format!("Failed      {}", label));
                tracing::debug!(repo = %request.repo_url, error = %err, "clone failed");
                Err(err)
            }
        }
    }
}
