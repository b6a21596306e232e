//! Utility functions for file naming and path manipulation

use crate::config::FileCollisionAction;
use crate::error::{Error, Result};
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Longest name produced by [`sanitize_filename`]
const MAX_SANITIZED_LEN: usize = 50;

/// Get a unique path for a file, handling collisions according to the specified action
///
/// For Rename this may return a path with a ` (n)` suffix before the extension.
/// Skip fails with [`Error::Persistence`] when the file exists; Overwrite always
/// returns the original path.
///
/// # Examples
///
/// ```
/// use bundle_dl::utils::get_unique_path;
/// use bundle_dl::config::FileCollisionAction;
/// use std::path::Path;
///
/// let path = Path::new("/tmp/post.zip");
/// let unique = get_unique_path(path, FileCollisionAction::Rename).unwrap();
/// // If /tmp/post.zip exists, returns /tmp/post (1).zip
/// ```
pub fn get_unique_path(path: &Path, action: FileCollisionAction) -> Result<PathBuf> {
    match action {
        FileCollisionAction::Overwrite => Ok(path.to_path_buf()),
        FileCollisionAction::Skip => {
            if path.exists() {
                return Err(Error::Persistence(format!(
                    "{} already exists and collision action is skip",
                    path.display()
                )));
            }
            Ok(path.to_path_buf())
        }
        FileCollisionAction::Rename => {
            if !path.exists() {
                return Ok(path.to_path_buf());
            }

            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    Error::Persistence(format!("cannot extract file name of {}", path.display()))
                })?;
            let parent = path.parent().ok_or_else(|| {
                Error::Persistence(format!("cannot extract parent of {}", path.display()))
            })?;

            for i in 1..=MAX_RENAME_ATTEMPTS {
                let new_path = parent.join(numbered_name(file_name, i));
                if !new_path.exists() {
                    return Ok(new_path);
                }
            }

            Err(Error::Persistence(format!(
                "could not find a unique name for {} after {} attempts",
                path.display(),
                MAX_RENAME_ATTEMPTS
            )))
        }
    }
}

/// Insert ` (n)` before the extension: `a.tar.gz` -> `a.tar (1).gz`, `README` -> `README (1)`
fn numbered_name(name: &str, n: u32) -> String {
    match name.rfind('.') {
        Some(idx) if idx > 0 => format!("{} ({}).{}", &name[..idx], n, &name[idx + 1..]),
        _ => format!("{} ({})", name, n),
    }
}

/// Lowercase extension of a file name, without the dot
pub fn extension_of(name: &str) -> Option<String> {
    let path = Path::new(name);
    path.file_stem()?;
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(str::to_ascii_lowercase)
}

/// Make a string safe to use as a file name
///
/// Replaces `<>:"/\|?*` with `_`, turns whitespace runs into a single `_`,
/// and truncates to 50 characters.
///
/// ```
/// use bundle_dl::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("My Post: part 1/2"), "My_Post__part_1_2");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    static RESERVED: OnceLock<Regex> = OnceLock::new();
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();

    #[allow(clippy::expect_used)]
    let reserved = RESERVED.get_or_init(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("valid regex"));
    #[allow(clippy::expect_used)]
    let whitespace = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"));

    let replaced = reserved.replace_all(name, "_");
    let collapsed = whitespace.replace_all(&replaced, "_");
    collapsed.chars().take(MAX_SANITIZED_LEN).collect()
}

/// Reduce `name` to a single plain file-name component
///
/// Keeps the last component that is not empty, `.` or `..`, splitting on both
/// `/` and `\`, so the result can never leave the directory it is joined to.
/// Drive-letter colons and control characters become `_`. Falls back to
/// `"download"` when nothing usable remains.
///
/// ```
/// use bundle_dl::utils::file_name_component;
///
/// assert_eq!(file_name_component("../../etc/passwd"), "passwd");
/// assert_eq!(file_name_component(".."), "download");
/// ```
pub fn file_name_component(name: &str) -> String {
    name.split(['/', '\\'])
        .map(str::trim)
        .filter(|c| !c.is_empty() && *c != "." && *c != "..")
        .next_back()
        .map(|c| {
            c.chars()
                .map(|ch| if ch == ':' || ch.is_control() { '_' } else { ch })
                .collect::<String>()
        })
        .unwrap_or_else(|| "download".to_string())
}

/// Format a byte count for progress messages (`0 B`, `1.5 KB`, `2 GB`)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{} {}", rounded as u64, UNITS[unit])
    } else {
        format!("{:.1} {}", rounded, UNITS[unit])
    }
}

/// Derive a file name from the last path segment of a URL
///
/// Percent-encoded segments are decoded; encoded separators cannot smuggle in
/// a path. Falls back to `"download"`.
pub fn filename_from_url(url: &str) -> String {
    if let Ok(parsed_url) = url::Url::parse(url)
        && let Some(mut segments) = parsed_url.path_segments()
        && let Some(last_segment) = segments.next_back()
        && !last_segment.is_empty()
    {
        return match urlencoding::decode(last_segment) {
            Ok(decoded) => file_name_component(&decoded),
            Err(_) => file_name_component(last_segment),
        };
    }
    "download".to_string()
}

/// Hands out persisted names that are unique within one run
///
/// Names are compared case-insensitively; a repeated name gets ` (1)`, ` (2)`, ...
/// before its extension.
#[derive(Debug, Default)]
pub struct NameRegistry {
    prefix: Option<String>,
    taken: HashSet<String>,
}

impl NameRegistry {
    /// A registry that prefixes every name with `sanitize_filename(prefix) + "_"`
    pub fn with_prefix(prefix: Option<&str>) -> Self {
        Self {
            prefix: prefix.map(sanitize_filename),
            taken: HashSet::new(),
        }
    }

    /// Reserve a unique name for `name`, reduced to a plain file name
    pub fn claim(&mut self, name: &str) -> String {
        let name = file_name_component(name);
        let base = match &self.prefix {
            Some(prefix) => format!("{prefix}_{name}"),
            None => name.to_string(),
        };
        if self.taken.insert(base.to_lowercase()) {
            return base;
        }
        for i in 1..=MAX_RENAME_ATTEMPTS {
            let candidate = numbered_name(&base, i);
            if self.taken.insert(candidate.to_lowercase()) {
                return candidate;
            }
        }
        base
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_get_unique_path_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("post.zip");
        let result = get_unique_path(&path, FileCollisionAction::Rename).unwrap();
        assert_eq!(result, path);
    }

    #[test]
    fn test_get_unique_path_rename_with_extension() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("post.zip");
        fs::write(&path, b"x").unwrap();

        let result = get_unique_path(&path, FileCollisionAction::Rename).unwrap();
        assert_eq!(result, temp_dir.path().join("post (1).zip"));
    }

    #[test]
    fn test_get_unique_path_sequential() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.png");
        fs::write(&path, b"x").unwrap();
        fs::write(temp_dir.path().join("a (1).png"), b"x").unwrap();

        let result = get_unique_path(&path, FileCollisionAction::Rename).unwrap();
        assert_eq!(result, temp_dir.path().join("a (2).png"));
    }

    #[test]
    fn test_get_unique_path_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.png");
        fs::write(&path, b"x").unwrap();
        assert_eq!(
            get_unique_path(&path, FileCollisionAction::Overwrite).unwrap(),
            path
        );
    }

    #[test]
    fn test_get_unique_path_skip_existing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.png");
        fs::write(&path, b"x").unwrap();
        assert!(matches!(
            get_unique_path(&path, FileCollisionAction::Skip),
            Err(Error::Persistence(_))
        ));
    }

    #[test]
    fn numbered_name_handles_missing_and_multiple_extensions() {
        assert_eq!(numbered_name("README", 1), "README (1)");
        assert_eq!(numbered_name("a.tar.gz", 2), "a.tar (2).gz");
        assert_eq!(numbered_name(".hidden", 1), ".hidden (1)");
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension_of("Clip.MP4").as_deref(), Some("mp4"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of("trailing."), None);
    }

    #[test]
    fn sanitize_replaces_reserved_and_whitespace() {
        assert_eq!(sanitize_filename("a<b>c"), "a_b_c");
        assert_eq!(sanitize_filename("two   words\there"), "two_words_here");
        assert_eq!(sanitize_filename(r#"q?"*|\"#), "q_____");
    }

    #[test]
    fn sanitize_truncates_to_fifty_chars() {
        let long = "x".repeat(80);
        assert_eq!(sanitize_filename(&long).len(), 50);
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(100 * 1024 * 1024), "100 MB");
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024), "2 GB");
    }

    #[test]
    fn filename_from_url_decodes_last_segment() {
        assert_eq!(
            filename_from_url("https://cdn.example.com/data/ab/my%20file.png?f=1"),
            "my file.png"
        );
        assert_eq!(filename_from_url("https://example.com/"), "download");
        assert_eq!(filename_from_url("not a url"), "download");
    }

    #[test]
    fn file_name_component_drops_path_parts() {
        assert_eq!(file_name_component("../escaped.txt"), "escaped.txt");
        assert_eq!(file_name_component("/etc/passwd"), "passwd");
        assert_eq!(file_name_component(r"..\..\win.ini"), "win.ini");
        assert_eq!(file_name_component("C:evil.exe"), "C_evil.exe");
        assert_eq!(file_name_component("dir/./"), "dir");
        assert_eq!(file_name_component("../.."), "download");
        assert_eq!(file_name_component("photo 1.jpg"), "photo 1.jpg");
    }

    #[test]
    fn filename_from_url_ignores_encoded_separators() {
        assert_eq!(
            filename_from_url("https://x.test/..%2F..%2Fevil.sh"),
            "evil.sh"
        );
        assert_eq!(filename_from_url("https://x.test/a/..%2F.."), "download");
    }

    #[test]
    fn registry_claims_plain_names_only() {
        let mut names = NameRegistry::with_prefix(Some("Post"));
        assert_eq!(names.claim("../../escaped.txt"), "Post_escaped.txt");
        assert_eq!(names.claim("/abs/escaped.txt"), "Post_escaped (1).txt");
    }

    #[test]
    fn registry_suffixes_duplicates() {
        let mut names = NameRegistry::default();
        assert_eq!(names.claim("a.png"), "a.png");
        assert_eq!(names.claim("A.PNG"), "A (1).PNG");
        assert_eq!(names.claim("a.png"), "a (2).png");
        assert_eq!(names.claim("b.png"), "b.png");
    }

    #[test]
    fn registry_applies_sanitized_prefix() {
        let mut names = NameRegistry::with_prefix(Some("My Post"));
        assert_eq!(names.claim("a.png"), "My_Post_a.png");
        assert_eq!(names.claim("a.png"), "My_Post_a (1).png");
    }
}
