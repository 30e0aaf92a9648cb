//! File system helpers used by persistent stores

use std::fs;
use std::io::Write;
use std::path::Path;

/// Read a text file, decoding invalid UTF-8 lossily
pub fn read_text_file(path: &Path) -> crate::Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
            let bytes = fs::read(path)?;
            Ok(String::from_utf8_lossy(&bytes).to_string())
        }
        Err(err) => Err(err.into()),
    }
}

/// Ensure directory exists, creating parents as needed
pub fn ensure_dir(path: &Path) -> crate::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    } else if !path.is_dir() {
        return Err(crate::UtilError::PathOperation(format!(
            "Path exists but is not a directory: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Write `contents` to `path` through a uniquely named sibling temp file
/// and a rename, so readers never observe a half-written file and
/// concurrent writers never share a temp path.
pub fn write_atomic(path: &Path, contents: &[u8]) -> crate::Result<()> {
    if path.file_name().is_none() {
        return Err(crate::UtilError::PathOperation(format!(
            "Invalid file path: {}",
            path.display()
        )));
    }
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            ensure_dir(parent)?;
            parent
        }
        None => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| crate::UtilError::Io(e.error))?;
    Ok(())
}
