// Purpose: Filesystem adapter used by module-name resolution and the loader.
// Inputs/Outputs: Maps module strings and import paths onto canonical paths,
// directory listings, and extensions.
// Invariants: Lookup failures are values (None/empty), never panics; listing
// order is sorted so module member order is deterministic.
// Gotchas: `join` resolves relative to a file's directory when the base is a
// file, since module strings are written relative to the importing source.

use std::fs;
use std::path::Path;

/// Normalize a module string into a relative directory path.
pub fn to_directory(s: &str) -> String {
    let normalized = s.replace('\\', "/");
    normalized.trim_end_matches('/').to_string()
}

/// Join `rel` onto `base`, where `base` may be a file (its directory is
/// used) or a directory. An absolute `rel` wins outright.
pub fn join(base: &str, rel: &str) -> String {
    if Path::new(rel).is_absolute() {
        return rel.to_string();
    }
    let dir = if is_directory(base) {
        Path::new(base)
    } else {
        Path::new(base).parent().unwrap_or_else(|| Path::new("."))
    };
    dir.join(rel).to_string_lossy().into_owned()
}

/// Canonicalize a path, or `None` if it does not resolve.
pub fn canonical(path: &str) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    fs::canonicalize(path)
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
}

pub fn is_directory(path: &str) -> bool {
    Path::new(path).is_dir()
}

/// File names (not paths) directly inside `dir`, sorted.
pub fn files(dir: &str) -> Vec<String> {
    list(dir, false)
}

/// Directory names directly inside `dir`, sorted. Feeds suggestions when a
/// module string fails to resolve.
pub fn directories(dir: &str) -> Vec<String> {
    list(dir, true)
}

fn list(dir: &str, want_dirs: bool) -> Vec<String> {
    let mut out = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir == want_dirs {
                out.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
    }
    out.sort();
    out
}

pub fn extension(file: &str) -> Option<&str> {
    Path::new(file).extension().and_then(|e| e.to_str())
}

/// The directory containing `path`, or "." when there is none.
pub fn parent(path: &str) -> String {
    Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time drift")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "quill-paths-{}-{}-{}",
            prefix,
            std::process::id(),
            nonce
        ))
    }

    #[test]
    fn to_directory_normalizes_separators() {
        assert_eq!(to_directory("std\\list/"), "std/list");
        assert_eq!(to_directory("./b"), "./b");
    }

    #[test]
    fn join_uses_the_directory_of_a_file_base() {
        let root = temp_dir("join");
        fs::create_dir_all(root.join("pkg")).expect("mkdir");
        let file = root.join("pkg").join("main.quill");
        fs::write(&file, "").expect("write");

        let joined = join(&file.to_string_lossy(), "./sub");
        assert!(joined.ends_with("pkg/./sub") || joined.ends_with("pkg/sub"));

        let from_dir = join(&root.join("pkg").to_string_lossy(), "sub");
        assert!(from_dir.ends_with("pkg/sub"));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn canonical_fails_as_none() {
        assert!(canonical("").is_none());
        assert!(canonical("/definitely/not/a/real/path/zzz").is_none());
    }

    #[test]
    fn files_and_directories_are_sorted() {
        let root = temp_dir("list");
        fs::create_dir_all(root.join("b_dir")).expect("mkdir");
        fs::create_dir_all(root.join("a_dir")).expect("mkdir");
        fs::write(root.join("z.quill"), "").expect("write");
        fs::write(root.join("a.quill"), "").expect("write");

        let dir = root.to_string_lossy().into_owned();
        assert_eq!(files(&dir), vec!["a.quill", "z.quill"]);
        assert_eq!(directories(&dir), vec!["a_dir", "b_dir"]);

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn extension_of_source_files() {
        assert_eq!(extension("a/b/c.quill"), Some("quill"));
        assert_eq!(extension("a/b/noext"), None);
    }
}
