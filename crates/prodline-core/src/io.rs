use crate::error::Result;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Prevents partial writes from leaving half-written config or variant files.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Delete `path` and everything below it, then create it again empty.
pub fn recreate_dir(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_dir_all(path)?;
    }
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Append text to a file, creating it if it doesn't exist.
pub fn append_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    f.write_all(text.as_bytes())?;
    Ok(())
}

/// Add `entry` to `root/.gitignore` if it isn't already present.
///
/// Checks for an exact line match. Appends with a leading newline separator
/// if the file doesn't already end with one.
pub fn ensure_gitignore_entry(root: &Path, entry: &str) -> Result<()> {
    let gitignore = root.join(".gitignore");
    let existing = if gitignore.exists() {
        std::fs::read_to_string(&gitignore)?
    } else {
        String::new()
    };
    if existing.lines().any(|l| l == entry) {
        return Ok(());
    }
    let sep = if existing.is_empty() || existing.ends_with('\n') {
        ""
    } else {
        "\n"
    };
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&gitignore)?;
    writeln!(f, "{sep}{entry}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/00001.config");
        atomic_write(&path, b"Base\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Base\n");
    }

    #[test]
    fn recreate_dir_removes_stale_content() {
        let dir = TempDir::new().unwrap();
        let products = dir.path().join("products");
        std::fs::create_dir_all(products.join("00001")).unwrap();
        std::fs::write(products.join("00001/old.config"), "A\n").unwrap();

        recreate_dir(&products).unwrap();

        assert!(products.is_dir());
        assert_eq!(std::fs::read_dir(&products).unwrap().count(), 0);
    }

    #[test]
    fn append_text_accumulates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/markers.log");
        append_text(&path, "one\n").unwrap();
        append_text(&path, "two\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn ensure_gitignore_entry_idempotent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target").unwrap();
        ensure_gitignore_entry(dir.path(), "products/").unwrap();
        ensure_gitignore_entry(dir.path(), "products/").unwrap();
        let content = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(content, "target\nproducts/\n");
    }
}
