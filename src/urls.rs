//! Hosting platform detection and rewriting of browsable URLs into their
//! directly fetchable form.

use std::fmt;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Model-hosting API (civitai). Resolved through metadata, not rewritten here.
    Civitai,
    /// Direct-file host (Hugging Face).
    HuggingFace,
    /// Source-forge host (GitHub).
    GitHub,
    /// Personal-cloud host (Google Drive).
    GoogleDrive,
    Generic,
    /// Not an http(s) URL at all.
    Unsupported,
}

impl Platform {
    pub fn detect(url: &str) -> Platform {
        let Ok(parsed) = Url::parse(url.trim()) else {
            return Platform::Unsupported;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return Platform::Unsupported;
        }
        let Some(host) = parsed.host_str() else {
            return Platform::Unsupported;
        };
        let host = host.to_ascii_lowercase();
        if host.contains("civitai.com") {
            Platform::Civitai
        } else if host.contains("huggingface.co") {
            Platform::HuggingFace
        } else if host.contains("github.com") || host.contains("githubusercontent.com") {
            Platform::GitHub
        } else if host.contains("drive.google.com") || host.contains("drive.usercontent.google.com") {
            Platform::GoogleDrive
        } else {
            Platform::Generic
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Civitai => "civitai",
            Platform::HuggingFace => "huggingface",
            Platform::GitHub => "github",
            Platform::GoogleDrive => "google-drive",
            Platform::Generic => "http",
            Platform::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

/// Classifies `url` and rewrites it to its raw-content form. Never fails:
/// anything it does not understand is returned unchanged.
pub fn normalize(url: &str) -> (Platform, String) {
    let url = url.trim();
    let platform = Platform::detect(url);
    let canonical = match platform {
        Platform::HuggingFace => {
            let rewritten = rewrite_segment(url, "/blob/", "/resolve/");
            strip_query(&rewritten).to_string()
        }
        Platform::GitHub => {
            if is_repo_host(url) {
                rewrite_segment(url, "/blob/", "/raw/")
            } else {
                url.to_string()
            }
        }
        _ => url.to_string(),
    };
    (platform, canonical)
}

/// Replaces the first `from` segment with `to`, unless `to` already occurs
/// before it.
fn rewrite_segment(url: &str, from: &str, to: &str) -> String {
    match url.find(from) {
        Some(pos) if !url[..pos].contains(to) => {
            format!("{}{}{}", &url[..pos], to, &url[pos + from.len()..])
        }
        _ => url.to_string(),
    }
}

fn strip_query(url: &str) -> &str {
    let end = url.find(|c: char| c == '?' || c == '#').unwrap_or(url.len());
    &url[..end]
}

fn is_repo_host(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case("github.com")))
        .unwrap_or(false)
}

/// `owner/repo` path of a GitHub repository URL, without a trailing `.git`.
pub fn github_repo_path(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url.trim()).ok()?;
    if !parsed.host_str()?.eq_ignore_ascii_case("github.com") {
        return None;
    }
    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
    let owner = segments.next()?.to_string();
    let repo = segments.next()?.trim_end_matches(".git").to_string();
    if repo.is_empty() {
        return None;
    }
    Some((owner, repo))
}

pub fn is_drive_folder(url: &str) -> bool {
    url.contains("/drive/folders/") || url.contains("/folders/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huggingface_blob_becomes_resolve() {
        let (platform, url) =
            normalize("https://huggingface.co/user/repo/blob/main/vae.safetensors?download=true");
        assert_eq!(platform, Platform::HuggingFace);
        assert_eq!(url, "https://huggingface.co/user/repo/resolve/main/vae.safetensors");
    }

    #[test]
    fn github_blob_becomes_raw() {
        let (platform, url) = normalize("https://github.com/org/repo/blob/main/config.yaml");
        assert_eq!(platform, Platform::GitHub);
        assert_eq!(url, "https://github.com/org/repo/raw/main/config.yaml");
    }

    #[test]
    fn normalization_is_idempotent() {
        let urls = [
            "https://huggingface.co/a/b/blob/main/x.safetensors?download=true",
            "https://huggingface.co/a/b/resolve/main/x.safetensors",
            "https://github.com/o/r/blob/dev/file.pt",
            "https://github.com/o/r/blob/dev/blob/nested.pt",
            "https://raw.githubusercontent.com/o/r/main/blob/x.yaml",
            "https://civitai.com/models/123?modelVersionId=456",
            "https://drive.google.com/file/d/abc/view",
            "https://example.com/files/thing.zip?x=1",
            "not a url",
        ];
        for url in urls {
            let (_, once) = normalize(url);
            let (_, twice) = normalize(&once);
            assert_eq!(once, twice, "normalize is not idempotent for {url}");
        }
    }

    #[test]
    fn classification() {
        assert_eq!(Platform::detect("https://civitai.com/api/download/models/1"), Platform::Civitai);
        assert_eq!(Platform::detect("https://drive.google.com/drive/folders/x"), Platform::GoogleDrive);
        assert_eq!(Platform::detect("https://example.org/f.bin"), Platform::Generic);
        assert_eq!(Platform::detect("ftp://example.org/f.bin"), Platform::Unsupported);
        assert_eq!(Platform::detect("a.bin"), Platform::Unsupported);
    }

    #[test]
    fn unparseable_input_is_returned_unchanged() {
        assert_eq!(normalize("::garbage::"), (Platform::Unsupported, "::garbage::".to_string()));
    }

    #[test]
    fn repo_path() {
        assert_eq!(
            github_repo_path("https://github.com/org/repo.git"),
            Some(("org".to_string(), "repo".to_string()))
        );
        assert_eq!(github_repo_path("https://gitlab.com/org/repo"), None);
        assert_eq!(github_repo_path("https://github.com/org"), None);
    }
}
