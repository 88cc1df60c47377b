use prodline_core::paths::PRODLINE_DIR;
use std::path::{Path, PathBuf};

/// Resolve the project root directory.
///
/// Priority:
/// 1. `--root` flag / `PRODLINE_ROOT` env var (passed in as `explicit`)
/// 2. Nearest ancestor of `cwd` holding `.prodline/`
/// 3. Nearest ancestor of `cwd` holding `.git/`
/// 4. `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_upward(&cwd, PRODLINE_DIR)
        .or_else(|| find_upward(&cwd, ".git"))
        .unwrap_or(cwd)
}

fn find_upward(start: &Path, marker: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(marker).is_dir())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        let result = resolve_root(Some(dir.path()));
        assert_eq!(result, dir.path());
    }

    #[test]
    fn finds_nearest_project_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(PRODLINE_DIR)).unwrap();
        let nested = dir.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_upward(&nested, PRODLINE_DIR).unwrap(), dir.path());
        assert!(find_upward(&nested, "no-such-marker").is_none());
    }
}
