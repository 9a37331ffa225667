//! Remote path helpers.
//!
//! File paths are absolute and never end in `/`; directory (location)
//! paths are absolute and always end in `/`.

use crate::error::{VfsError, VfsResult};

/// Check an absolute file path and return it normalized.
pub fn validate_file_path(path: &str) -> VfsResult<String> {
    if !path.starts_with('/') || path.ends_with('/') {
        return Err(VfsError::invalid_path(format!(
            "file path must be absolute and not end in '/': {path}"
        )));
    }
    let normalized = normalize(path)?;
    if normalized == "/" {
        return Err(VfsError::invalid_path(path));
    }
    Ok(normalized)
}

/// Check an absolute directory path and return it normalized, with a
/// trailing slash.
pub fn validate_dir_path(path: &str) -> VfsResult<String> {
    if !path.starts_with('/') || !path.ends_with('/') {
        return Err(VfsError::invalid_path(format!(
            "location path must be absolute and end in '/': {path}"
        )));
    }
    Ok(with_slash(&normalize(path)?))
}

/// Collapse `.`, `..` and repeated slashes. Trailing slash is dropped.
fn normalize(path: &str) -> VfsResult<String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(VfsError::invalid_path(format!("path escapes root: {path}")));
                }
            }
            s => parts.push(s),
        }
    }
    Ok(format!("/{}", parts.join("/")))
}

fn with_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_owned()
    } else {
        format!("{path}/")
    }
}

/// `/a/b/` for `/a/b/c.txt`.
pub fn parent_dir(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(i) => &trimmed[..=i],
        None => "/",
    }
}

/// `c.txt` for `/a/b/c.txt`, `b` for `/a/b/`.
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// The form sent to the server: no trailing slash except for the root.
pub fn remote(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// Join a relative path onto a directory path.
pub fn join(dir: &str, relative: &str) -> String {
    format!("{}{}", with_slash(dir), relative.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_file_path() {
        assert_eq!(validate_file_path("/a/./b//c.txt").unwrap(), "/a/b/c.txt");
        assert_eq!(validate_file_path("/a/x/../c.txt").unwrap(), "/a/c.txt");
        assert!(validate_file_path("a/c.txt").is_err());
        assert!(validate_file_path("/a/").is_err());
        assert!(validate_file_path("/../etc").is_err());
        assert!(validate_file_path("/a/..").is_err());
    }

    #[test]
    fn test_validate_dir_path() {
        assert_eq!(validate_dir_path("/").unwrap(), "/");
        assert_eq!(validate_dir_path("/a/b/../c/").unwrap(), "/a/c/");
        assert!(validate_dir_path("/a").is_err());
    }

    #[test]
    fn test_parent_and_base() {
        assert_eq!(parent_dir("/a/b/c.txt"), "/a/b/");
        assert_eq!(parent_dir("/c.txt"), "/");
        assert_eq!(parent_dir("/a/b/"), "/a/");
        assert_eq!(base_name("/a/b/c.txt"), "c.txt");
        assert_eq!(base_name("/a/b/"), "b");
    }

    #[test]
    fn test_remote_and_join() {
        assert_eq!(remote("/a/b/"), "/a/b");
        assert_eq!(remote("/"), "/");
        assert_eq!(join("/a/", "b/c.txt"), "/a/b/c.txt");
        assert_eq!(join("/a", "/b/"), "/a/b/");
    }
}
