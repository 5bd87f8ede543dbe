use chrono::{DateTime, Local};
use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::archive;
use crate::cli::VerifyMode;
use crate::config::{Category, Config, ToolPaths};
use crate::error::FetchError;
use crate::hashing;
use crate::monitor::{supervise, ProgressDisplay};
use crate::providers::civitai::{self, CivitaiClient};
use crate::providers::USER_AGENT;
use crate::request::{AcquisitionRequest, CloneRequest, PostProcess, TransferResult};
use crate::urls::{self, Platform};

/// How a request's bytes are moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Multi-connection accelerator.
    Aria2,
    Gdown { folder: bool },
    Curl,
}

impl Strategy {
    pub fn for_request(request: &AcquisitionRequest) -> Result<Strategy, FetchError> {
        match request.platform {
            Platform::Civitai | Platform::HuggingFace | Platform::GitHub => Ok(Strategy::Aria2),
            Platform::GoogleDrive => Ok(Strategy::Gdown {
                folder: urls::is_drive_folder(&request.canonical_url),
            }),
            Platform::Generic => Ok(Strategy::Curl),
            Platform::Unsupported => Err(FetchError::Classification(request.source_url.clone())),
        }
    }

    pub fn program<'a>(&self, tools: &'a ToolPaths) -> &'a Path {
        match self {
            Strategy::Aria2 => &tools.aria2c,
            Strategy::Gdown { .. } => &tools.gdown,
            Strategy::Curl => &tools.curl,
        }
    }

    pub fn args(&self, request: &AcquisitionRequest, hf_token: Option<&str>) -> Vec<String> {
        let dir = request.destination_dir.display().to_string();
        match self {
            Strategy::Aria2 => {
                let mut args = vec![
                    "--console-log-level=error".to_string(),
                    "--summary-interval=1".to_string(),
                    "--allow-overwrite=true".to_string(),
                    "--file-allocation=none".to_string(),
                    "-c".to_string(),
                    "-x16".to_string(),
                    "-s16".to_string(),
                    "-k1M".to_string(),
                    format!("--user-agent={}", USER_AGENT),
                ];
                if request.platform == Platform::HuggingFace {
                    if let Some(token) = hf_token {
                        args.push(format!("--header=Authorization: Bearer {}", token));
                    }
                }
                args.extend([
                    "-d".to_string(),
                    dir,
                    "-o".to_string(),
                    request.filename.clone(),
                    request.canonical_url.clone(),
                ]);
                args
            }
            Strategy::Gdown { folder } => {
                let target = if request.filename_is_placeholder {
                    format!("{}/", dir.trim_end_matches('/'))
                } else {
                    request.destination().display().to_string()
                };
                let mode = if *folder { "--folder" } else { "--fuzzy" };
                vec![
                    mode.to_string(),
                    request.canonical_url.clone(),
                    "-O".to_string(),
                    target,
                ]
            }
            Strategy::Curl => vec![
                "-fL".to_string(),
                "--progress-bar".to_string(),
                "--create-dirs".to_string(),
                "-A".to_string(),
                USER_AGENT.to_string(),
                "-o".to_string(),
                request.destination().display().to_string(),
                request.canonical_url.clone(),
            ],
        }
    }
}

/// Results of the file phase plus the extension repositories forked out of
/// it, each paired with its raw token.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub results: Vec<TransferResult>,
    pub extensions: Vec<(CloneRequest, String)>,
}

enum Transferred {
    Done(AcquisitionRequest),
    Skipped { size: u64, modified: Option<DateTime<Local>> },
}

pub struct Dispatcher {
    config: Arc<Config>,
    civitai: Arc<CivitaiClient>,
    multi_progress: MultiProgress,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(config: Arc<Config>, civitai: Arc<CivitaiClient>, cancel: CancellationToken) -> Self {
        let multi_progress = MultiProgress::new();
        multi_progress.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            config,
            civitai,
            multi_progress,
            semaphore,
            cancel,
        }
    }

    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi_progress
    }

    /// Transfers every file request concurrently and forks extension requests
    /// into clone requests. Yields one result per file request, in input order.
    pub async fn dispatch(self: &Arc<Self>, requests: Vec<AcquisitionRequest>, verbose: bool) -> DispatchOutcome {
        let (extensions, files): (Vec<_>, Vec<_>) = requests
            .into_iter()
            .partition(|r| r.category == Category::Extension);

        let extensions = extensions
            .into_iter()
            .map(|r| (self.clone_request_for(&r), r.raw_spec))
            .collect();

        let total_files = files.len();
        if total_files == 0 {
            return DispatchOutcome {
                results: vec![],
                extensions,
            };
        }

        let header_pb = if verbose {
            let pb = self.multi_progress.add(ProgressBar::new(0));
            pb.set_style(ProgressStyle::default_bar().template("{msg}").unwrap_or_else(|_| ProgressStyle::default_bar()));
            pb
        } else {
            println!("Downloading {} file(s)...", total_files);
            ProgressBar::hidden()
        };
        header_pb.set_message(format!("Summary: Files: 0/{} | Failed: 0", total_files));

        let finished = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(total_files);

        for request in files {
            let dispatcher = self.clone();
            let semaphore = self.semaphore.clone();
            let finished = finished.clone();
            let failed = failed.clone();
            let header_pb = header_pb.clone();
            let task_request = request.clone();

            let handle = tokio::spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    _ = dispatcher.cancel.cancelled() => None,
                };
                let result = match permit {
                    Some(_) if !dispatcher.cancel.is_cancelled() => {
                        dispatcher.run_one(task_request, verbose).await
                    }
                    _ => TransferResult::failed(&task_request, &FetchError::Cancelled),
                };

                let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
                let bad = if result.success {
                    failed.load(Ordering::Relaxed)
                } else {
                    failed.fetch_add(1, Ordering::Relaxed) + 1
                };
                header_pb.set_message(format!("Summary: Files: {}/{} | Failed: {}", done, total_files, bad));
                result
            });
            handles.push((request, handle));
        }

        let mut results = Vec::with_capacity(total_files);
        for (request, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    let err = FetchError::Process {
                        program: "task".to_string(),
                        code: None,
                        message: e.to_string(),
                    };
                    results.push(TransferResult::failed(&request, &err));
                }
            }
        }
        header_pb.finish();

        DispatchOutcome { results, extensions }
    }

    fn clone_request_for(&self, request: &AcquisitionRequest) -> CloneRequest {
        let repo_url = match urls::github_repo_path(&request.canonical_url) {
            Some((owner, repo)) => format!("https://github.com/{}/{}", owner, repo),
            None => request.canonical_url.clone(),
        };
        CloneRequest {
            repo_url,
            destination_dir: request.destination_dir.clone(),
            repo_name: Some(request.filename.clone()),
            depth: self.config.extension_depth,
            recursive: self.config.extension_recursive,
        }
    }

    async fn run_one(&self, request: AcquisitionRequest, verbose: bool) -> TransferResult {
        let display = ProgressDisplay::new(&self.multi_progress, &request.filename, verbose);

        match self.transfer(&request, &display).await {
            Ok(Transferred::Skipped { size, modified }) => {
                let date = modified
                    .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                display.finish(format!("{:>12} {:>17} Skipped {}", HumanBytes(size).to_string(), date, request.filename));
                TransferResult::skipped(&request)
            }
            Ok(Transferred::Done(done)) => {
                display.finish(format!("Completed   {}", done.filename));
                TransferResult::completed(&done)
            }
            Err(err) => {
                display.abandon(format!("Failed      {}", request.filename));
                tracing::debug!(url = %request.canonical_url, error = %err, "transfer failed");
                TransferResult::failed(&request, &err)
            }
        }
    }

    async fn transfer(&self, request: &AcquisitionRequest, display: &ProgressDisplay) -> Result<Transferred, FetchError> {
        let strategy = Strategy::for_request(request)?;
        if let Some(meta) = &request.metadata {
            meta.ensure_available()?;
        }
        if self.config.verify == VerifyMode::On && request.expected_sha256.is_none() {
            return Err(FetchError::Integrity(format!(
                "no hash available for {}",
                request.source_url
            )));
        }

        let destination = request.destination();
        if !request.filename_is_placeholder && destination.exists() {
            let metadata = tokio::fs::metadata(&destination).await?;
            let modified = metadata.modified().ok().map(DateTime::<Local>::from);
            return Ok(Transferred::Skipped {
                size: metadata.len(),
                modified,
            });
        }

        tokio::fs::create_dir_all(&request.destination_dir).await?;
        let done = if request.filename_is_placeholder {
            self.fetch_into_scratch(strategy, request, display).await?
        } else {
            self.run_tool(strategy, request, display).await?;
            request.clone()
        };

        let path = done.destination();
        if path.is_dir() {
            if self.config.verify != VerifyMode::Off && done.expected_sha256.is_some() {
                return Err(FetchError::Integrity(format!(
                    "{} is a directory and cannot be hash-checked",
                    path.display()
                )));
            }
        } else {
            hashing::verify_file(&path, done.expected_sha256.as_deref(), self.config.verify).await?;
        }

        if done.post_process == PostProcess::ExtractArchive {
            let count = archive::extract_in_place(&path, &done.destination_dir).await?;
            tracing::info!(archive = %done.filename, files = count, "extracted archive");
        }

        if let Some(meta) = &done.metadata {
            self.save_sidecars(meta, &done.destination_dir).await;
        }
        Ok(Transferred::Done(done))
    }

    async fn run_tool(
        &self,
        strategy: Strategy,
        request: &AcquisitionRequest,
        display: &ProgressDisplay,
    ) -> Result<(), FetchError> {
        let mut command = Command::new(strategy.program(&self.config.tools));
        command.args(strategy.args(request, self.config.hf_token.as_deref()));
        let report = supervise(command, display, &self.cancel).await?;
        if !report.errors.is_empty() {
            tracing::warn!(
                file = %request.filename,
                codes = ?report.error_codes(),
                "transfer finished with errors: {}",
                report.error_messages().join("; ")
            );
        }
        Ok(())
    }

    /// Runs a transfer whose output name is picked by the tool. The tool
    /// writes into a private scratch directory and the single entry it
    /// leaves there is moved into the destination directory.
    async fn fetch_into_scratch(
        &self,
        strategy: Strategy,
        request: &AcquisitionRequest,
        display: &ProgressDisplay,
    ) -> Result<AcquisitionRequest, FetchError> {
        let scratch = request
            .destination_dir
            .join(format!(".sdfetch-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&scratch).await?;

        let mut staged = request.clone();
        staged.destination_dir = scratch.clone();
        let outcome = match self.run_tool(strategy, &staged, display).await {
            Ok(()) => adopt_single_entry(&scratch, request, strategy).await,
            Err(e) => Err(e),
        };

        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            tracing::warn!(dir = %scratch.display(), error = %e, "cannot remove scratch directory");
        }
        outcome
    }

    /// Preview and model info next to a civitai download. Failures are logged only.
    async fn save_sidecars(&self, meta: &civitai::ModelMetadata, dir: &Path) {
        if self.config.save_previews {
            if let Err(e) = self.civitai.download_preview(meta, dir).await {
                tracing::warn!(model = %meta.filename, error = %e, "preview download failed");
            }
        }
        if self.config.save_model_info {
            if let Err(e) = civitai::save_model_info(meta, dir).await {
                tracing::warn!(model = %meta.filename, error = %e, "cannot write model info");
            }
        }
    }
}

/// Moves the only entry of `scratch` into the request's destination
/// directory and names the request after it.
async fn adopt_single_entry(
    scratch: &Path,
    request: &AcquisitionRequest,
    strategy: Strategy,
) -> Result<AcquisitionRequest, FetchError> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(scratch).await?;
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name());
    }

    let name = match names.as_slice() {
        [only] => only
            .to_str()
            .map(str::to_string)
            .ok_or_else(|| FetchError::Resolution(format!("{:?} is not a valid UTF-8 name", only)))?,
        [] => {
            return Err(FetchError::Resolution(format!(
                "no file was produced for {}",
                request.source_url
            )))
        }
        many => {
            return Err(FetchError::Resolution(format!(
                "{} entries were produced for {}, expected one",
                many.len(),
                request.source_url
            )))
        }
    };

    let target = request.destination_dir.join(&name);
    if tokio::fs::symlink_metadata(&target).await.is_ok() {
        return Err(FetchError::Resolution(format!(
            "destination {} already exists",
            target.display()
        )));
    }
    tokio::fs::rename(scratch.join(&name), &target).await?;

    let mut done = request.clone();
    done.post_process = if matches!(strategy, Strategy::Gdown { folder: true }) {
        PostProcess::None
    } else {
        PostProcess::for_filename(&name)
    };
    done.filename = name;
    done.filename_is_placeholder = false;
    Ok(done)
}

pub fn destination_key(request: &AcquisitionRequest) -> PathBuf {
    crate::request::path_key(&request.destination())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn request(platform: Platform, url: &str, dir: &Path, filename: &str) -> AcquisitionRequest {
        AcquisitionRequest {
            raw_spec: url.to_string(),
            category: Category::Model,
            source_url: url.to_string(),
            canonical_url: url.to_string(),
            platform,
            destination_dir: dir.to_path_buf(),
            filename: filename.to_string(),
            filename_is_placeholder: false,
            post_process: PostProcess::for_filename(filename),
            expected_sha256: None,
            metadata: None,
        }
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let script = dir.join(name);
        let mut file = std::fs::File::create(&script).unwrap();
        writeln!(file, "#!/bin/sh\n{}", body).unwrap();
        drop(file);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        script
    }

    /// A stand-in for curl that copies `source` to the `-o` target.
    fn fake_curl(dir: &Path, source: &Path) -> PathBuf {
        write_script(
            dir,
            "fake-curl",
            &format!(
                "while [ $# -gt 0 ]; do if [ \"$1\" = \"-o\" ]; then out=\"$2\"; shift; fi; shift; done\ncp '{}' \"$out\"",
                source.display()
            ),
        )
    }

    /// A stand-in for gdown that picks its own output name: the Drive file id
    /// plus `.safetensors`, written into the `-O` directory.
    fn fake_gdown(dir: &Path) -> PathBuf {
        write_script(
            dir,
            "fake-gdown",
            r#"while [ $# -gt 0 ]; do
  case "$1" in
    -O) out="$2"; shift ;;
    http*) url="$1" ;;
  esac
  shift
done
id=$(basename "$(dirname "$url")")
sleep 0.2
printf '%s' "$id" > "$out/$id.safetensors""#,
        )
    }

    fn dispatcher_with(root: &Path, configure: impl FnOnce(&mut Config)) -> Arc<Dispatcher> {
        let mut config = Config::new(root);
        config.concurrency = 2;
        configure(&mut config);
        let civitai = Arc::new(CivitaiClient::new(&config));
        Arc::new(Dispatcher::new(Arc::new(config), civitai, CancellationToken::new()))
    }

    fn dispatcher(root: &Path, curl: PathBuf) -> Arc<Dispatcher> {
        dispatcher_with(root, |config| config.tools.curl = curl)
    }

    fn drive_placeholder(id: &str, dir: &Path) -> AcquisitionRequest {
        let url = format!("https://drive.google.com/file/d/{}/view", id);
        let mut req = request(Platform::GoogleDrive, &url, dir, &crate::utils::placeholder_filename());
        req.filename_is_placeholder = true;
        req.post_process = PostProcess::None;
        req
    }

    fn scratch_dirs(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(".sdfetch-"))
            .collect()
    }

    #[test]
    fn aria2_args_carry_hf_token() {
        let req = request(
            Platform::HuggingFace,
            "https://huggingface.co/u/r/resolve/main/vae.safetensors",
            Path::new("/sd/vae"),
            "vae.safetensors",
        );
        let args = Strategy::Aria2.args(&req, Some("hf_x"));
        assert!(args.contains(&"--header=Authorization: Bearer hf_x".to_string()));
        assert!(args.windows(2).any(|w| w == ["-o", "vae.safetensors"]));
        assert_eq!(args.last().map(String::as_str), Some(req.canonical_url.as_str()));

        let gh = request(Platform::GitHub, "https://github.com/o/r/raw/main/x.yaml", Path::new("/sd"), "x.yaml");
        assert!(!Strategy::Aria2.args(&gh, Some("hf_x")).iter().any(|a| a.contains("Bearer")));
    }

    #[test]
    fn strategy_by_platform() {
        let dir = Path::new("/sd");
        let drive = request(Platform::GoogleDrive, "https://drive.google.com/drive/folders/abc", dir, "x");
        assert_eq!(Strategy::for_request(&drive).unwrap(), Strategy::Gdown { folder: true });
        let generic = request(Platform::Generic, "https://host/a.bin", dir, "a.bin");
        assert_eq!(Strategy::for_request(&generic).unwrap(), Strategy::Curl);
        for platform in [Platform::Civitai, Platform::HuggingFace, Platform::GitHub] {
            let req = request(platform, "https://host/a.bin", dir, "a.bin");
            assert_eq!(Strategy::for_request(&req).unwrap(), Strategy::Aria2);
        }
        let bad = request(Platform::Unsupported, "a.bin", dir, "x.bin");
        assert!(matches!(Strategy::for_request(&bad), Err(FetchError::Classification(_))));
    }

    #[tokio::test]
    async fn every_request_yields_one_result() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("payload.bin");
        std::fs::write(&source, b"weights").unwrap();
        let out = dir.path().join("out");
        let dispatcher = dispatcher(dir.path(), fake_curl(dir.path(), &source));

        let requests = vec![
            request(Platform::Unsupported, "a.bin", &out, "x.bin"),
            request(Platform::Generic, "http://host.invalid/b.bin", &out, "y.bin"),
        ];
        let outcome = dispatcher.dispatch(requests, false).await;

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].filename.as_deref(), Some("x.bin"));
        assert!(!outcome.results[0].success);
        assert_eq!(
            outcome.results[0].error.as_ref().map(|e| e.code),
            Some(crate::error::ErrorCode::Classification)
        );
        assert_eq!(outcome.results[1].filename.as_deref(), Some("y.bin"));
        assert!(outcome.results[1].success, "{:?}", outcome.results[1].error);
        assert_eq!(std::fs::read(out.join("y.bin")).unwrap(), b"weights");
    }

    #[tokio::test]
    async fn downloaded_archive_is_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.zip");
        {
            let mut zip = zip::ZipWriter::new(std::fs::File::create(&source).unwrap());
            zip.start_file("emb.pt", zip::write::FileOptions::default()).unwrap();
            zip.write_all(b"emb").unwrap();
            zip.finish().unwrap();
        }
        let out = dir.path().join("embeddings");
        let dispatcher = dispatcher(dir.path(), fake_curl(dir.path(), &source));

        let req = request(Platform::Generic, "http://host.invalid/pack.zip", &out, "pack.zip");
        let outcome = dispatcher.dispatch(vec![req], false).await;

        assert!(outcome.results[0].success, "{:?}", outcome.results[0].error);
        assert!(!out.join("pack.zip").exists());
        assert_eq!(std::fs::read(out.join("emb.pt")).unwrap(), b"emb");
    }

    #[tokio::test]
    async fn hash_mismatch_fails_request() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("payload.bin");
        std::fs::write(&source, b"hello").unwrap();
        let out = dir.path().join("out");
        let dispatcher = dispatcher(dir.path(), fake_curl(dir.path(), &source));

        let mut req = request(Platform::Generic, "http://host.invalid/a.bin", &out, "a.bin");
        req.expected_sha256 = Some("00".repeat(32));
        let outcome = dispatcher.dispatch(vec![req], false).await;

        assert_eq!(
            outcome.results[0].error.as_ref().map(|e| e.code),
            Some(crate::error::ErrorCode::Integrity)
        );
        assert!(!out.join("a.bin").exists());
    }

    #[tokio::test]
    async fn drive_placeholders_sharing_a_directory_keep_their_own_names() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("models");
        let gdown = fake_gdown(dir.path());
        let dispatcher = dispatcher_with(dir.path(), |config| config.tools.gdown = gdown);

        let requests = vec![drive_placeholder("AAA", &out), drive_placeholder("BBB", &out)];
        let outcome = dispatcher.dispatch(requests, false).await;

        assert_eq!(outcome.results.len(), 2);
        for (result, id) in outcome.results.iter().zip(["AAA", "BBB"]) {
            assert!(result.success, "{:?}", result.error);
            let name = format!("{}.safetensors", id);
            assert_eq!(result.filename.as_deref(), Some(name.as_str()));
            assert_eq!(std::fs::read_to_string(out.join(&name)).unwrap(), id);
        }
        assert!(scratch_dirs(&out).is_empty());
    }

    #[tokio::test]
    async fn drive_placeholder_without_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("models");
        let gdown = write_script(dir.path(), "silent-gdown", "exit 0");
        let dispatcher = dispatcher_with(dir.path(), |config| config.tools.gdown = gdown);

        let outcome = dispatcher.dispatch(vec![drive_placeholder("CCC", &out)], false).await;

        let result = &outcome.results[0];
        assert!(!result.success);
        assert_eq!(result.error.as_ref().map(|e| e.code), Some(crate::error::ErrorCode::Resolution));
        assert!(scratch_dirs(&out).is_empty());
    }

    #[tokio::test]
    async fn verify_on_rejects_requests_without_hash() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let dispatcher = dispatcher_with(dir.path(), |config| {
            config.tools.curl = PathBuf::from("/nonexistent/curl");
            config.tools.gdown = PathBuf::from("/nonexistent/gdown");
            config.verify = VerifyMode::On;
        });

        let requests = vec![
            request(Platform::Generic, "http://host.invalid/a.bin", &out, "a.bin"),
            drive_placeholder("DDD", &out),
            request(Platform::GoogleDrive, "https://drive.google.com/drive/folders/xyz", &out, "pack"),
        ];
        let outcome = dispatcher.dispatch(requests, false).await;

        for result in &outcome.results {
            assert_eq!(result.error.as_ref().map(|e| e.code), Some(crate::error::ErrorCode::Integrity));
        }
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn existing_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"present").unwrap();
        let dispatcher = dispatcher(dir.path(), PathBuf::from("/nonexistent/curl"));

        let req = request(Platform::Generic, "http://host.invalid/a.bin", dir.path(), "a.bin");
        let outcome = dispatcher.dispatch(vec![req], false).await;
        assert!(outcome.results[0].success);
        assert!(outcome.results[0].skipped);
    }

    #[tokio::test]
    async fn extensions_are_forked_not_transferred() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path(), PathBuf::from("/nonexistent/curl"));

        let mut req = request(
            Platform::GitHub,
            "https://github.com/org/repo/tree/main",
            &dir.path().join("extensions"),
            "repo",
        );
        req.category = Category::Extension;
        let outcome = dispatcher.dispatch(vec![req], false).await;

        assert!(outcome.results.is_empty());
        assert_eq!(outcome.extensions.len(), 1);
        let (clone, raw) = &outcome.extensions[0];
        assert_eq!(clone.repo_name.as_deref(), Some("repo"));
        assert_eq!(clone.repo_url, "https://github.com/org/repo");
        assert_eq!(clone.depth, 1);
        assert_eq!(raw, "https://github.com/org/repo/tree/main");
    }

    #[tokio::test]
    async fn cancelled_batch_reports_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path());
        config.tools.curl = PathBuf::from("/nonexistent/curl");
        let civitai = Arc::new(CivitaiClient::new(&config));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(config), civitai, cancel));

        let req = request(Platform::Generic, "http://host.invalid/a.bin", dir.path(), "a.bin");
        let outcome = dispatcher.dispatch(vec![req], false).await;
        assert_eq!(
            outcome.results[0].error.as_ref().map(|e| e.code),
            Some(crate::error::ErrorCode::Cancelled)
        );
    }
}
