use std::io::Write;
use std::path::Path;

/// Write `content` to `path` atomically: a temp file in the same directory is
/// written, flushed, then renamed over the destination.
pub fn atomic_write_str(path: &Path, content: &str) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Make a string safe to embed in a file name. Path separators, whitespace
/// and control characters become underscores.
pub fn sanitize_file_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_whitespace() || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.txt");

        atomic_write_str(&path, "first").expect("write");
        atomic_write_str(&path, "second").expect("overwrite");

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1, "no temp files left behind");
    }

    #[test]
    fn test_atomic_write_missing_dir_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing").join("out.txt");
        assert!(atomic_write_str(&path, "data").is_err());
    }

    #[test]
    fn test_sanitize_keeps_email_shape() {
        assert_eq!(sanitize_file_component("admin@place.org"), "admin@place.org");
        assert_eq!(sanitize_file_component("a/b c\\d"), "a_b_c_d");
    }
}
