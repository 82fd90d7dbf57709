//! Path helpers shared by the coordinator, the config and the builders.

use path_clean::PathClean;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Resolve symlinks in `path`, falling back to `path` itself if it doesn't exist.
///
/// Broken symlinks and missing files yield the input unchanged so that a
/// module which is about to be created can still be registered. Any error
/// other than `NotFound` is returned.
pub fn maybe_real_path(path: &Path) -> io::Result<PathBuf> {
    real_or_input(std::fs::canonicalize(path), path)
}

/// [`maybe_real_path`] for async callers.
pub async fn resolve_real_path(path: &Path) -> io::Result<PathBuf> {
    real_or_input(tokio::fs::canonicalize(path).await, path)
}

fn real_or_input(result: io::Result<PathBuf>, path: &Path) -> io::Result<PathBuf> {
    match result {
        Ok(real) => Ok(real),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(path.to_path_buf()),
        Err(e) => Err(e),
    }
}

/// URL path of `target` as seen from a server rooted at `base`.
///
/// Returns `"/"` when both are the same directory and `None` when `target`
/// lies outside `base`.
pub fn url_path_between(base: &Path, target: &Path) -> Option<String> {
    let relative = target.strip_prefix(base).ok()?;
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(format!("/{}", segments.join("/")))
}

/// Map a percent-encoded request path onto a file below `root`.
///
/// Returns `None` for paths that would escape `root` or don't decode to UTF-8.
pub fn resolve_request_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(request_path).ok()?;
    let relative = Path::new(decoded.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return None;
    }

    let joined = root.join(relative).clean();
    joined.starts_with(root).then_some(joined)
}

/// Module id of `path`: its `/`-separated location relative to `root`.
pub fn module_id(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_maybe_real_path_existing_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.txt");
        fs::write(&file, "x").unwrap();

        let real = maybe_real_path(&file).unwrap();
        assert_eq!(real, fs::canonicalize(&file).unwrap());
    }

    #[test]
    fn test_maybe_real_path_missing_file_returns_input() {
        let path = PathBuf::from("/no/such/dir/foobar.js");
        assert_eq!(maybe_real_path(&path).unwrap(), path);
    }

    #[cfg(unix)]
    #[test]
    fn test_maybe_real_path_resolves_symlink() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.txt");
        let link = temp.path().join("symlink.txt");
        fs::write(&file, "x").unwrap();
        std::os::unix::fs::symlink(&file, &link).unwrap();

        assert_eq!(
            maybe_real_path(&link).unwrap(),
            fs::canonicalize(&file).unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_maybe_real_path_broken_symlink_returns_link() {
        let temp = TempDir::new().unwrap();
        let link = temp.path().join("brokenSymlink.txt");
        std::os::unix::fs::symlink(temp.path().join("gone.txt"), &link).unwrap();

        assert_eq!(maybe_real_path(&link).unwrap(), link);
    }

    #[cfg(unix)]
    #[test]
    fn test_maybe_real_path_propagates_other_errors() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.txt");
        fs::write(&file, "x").unwrap();

        // A regular file used as a directory component is ENOTDIR, not ENOENT
        let err = maybe_real_path(&file.join("child.js")).unwrap_err();
        assert_ne!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_real_path_matches_blocking_version() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.txt");
        let link = temp.path().join("link.txt");
        let missing = temp.path().join("missing.js");
        fs::write(&file, "x").unwrap();
        std::os::unix::fs::symlink(&file, &link).unwrap();

        assert_eq!(
            resolve_real_path(&link).await.unwrap(),
            fs::canonicalize(&file).unwrap()
        );
        assert_eq!(resolve_real_path(&missing).await.unwrap(), missing);
        assert!(resolve_real_path(&file.join("child.js")).await.is_err());
    }

    #[test]
    fn test_url_path_between() {
        let base = Path::new("/srv/www");
        assert_eq!(url_path_between(base, base).as_deref(), Some("/"));
        assert_eq!(
            url_path_between(base, Path::new("/srv/www/app/config.js")).as_deref(),
            Some("/app/config.js")
        );
        assert_eq!(url_path_between(base, Path::new("/etc/passwd")), None);
    }

    #[test]
    fn test_resolve_request_path() {
        let root = Path::new("/srv/www");
        assert_eq!(
            resolve_request_path(root, "/lib/foo.js"),
            Some(PathBuf::from("/srv/www/lib/foo.js"))
        );
        assert_eq!(
            resolve_request_path(root, "/lib/./foo.js"),
            Some(PathBuf::from("/srv/www/lib/foo.js"))
        );
        assert_eq!(
            resolve_request_path(root, "/lib/my%20file.js"),
            Some(PathBuf::from("/srv/www/lib/my file.js"))
        );
        assert_eq!(resolve_request_path(root, "/../etc/passwd"), None);
        assert_eq!(resolve_request_path(root, "/%2E%2E/etc/passwd"), None);
        assert_eq!(resolve_request_path(root, "/lib/../../etc/passwd"), None);
    }

    #[test]
    fn test_module_id() {
        let root = Path::new("/srv/www");
        assert_eq!(
            module_id(root, Path::new("/srv/www/lib/foo.js")),
            "lib/foo.js"
        );
        assert_eq!(module_id(root, Path::new("/elsewhere/x.js")), "/elsewhere/x.js");
    }
}
