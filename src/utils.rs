use percent_encoding::percent_decode_str;
use std::path::Path;
use url::Url;

/// Last path segment of `url_str`, without its query string. `None` when the
/// URL has no usable segment.
pub fn get_filename_from_url(url_str: &str) -> Option<String> {
    if let Ok(url) = Url::parse(url_str) {
        return url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned());
    }

    // Not a URL: treat it as a bare path.
    let path = url_str.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();
    path.rsplit('/')
        .find(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Placeholder name for transfers whose real name is only known once the
/// download tool has talked to the host.
pub fn placeholder_filename() -> String {
    format!("download_{}", uuid::Uuid::new_v4())
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(
        |c: char| matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control(),
        "_",
    )
}

pub fn has_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .map(|ext| !ext.is_empty())
        .unwrap_or(false)
}

pub fn extension_of(filename: &str) -> Option<&str> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
}

pub fn file_stem(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
}
