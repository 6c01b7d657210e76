use std::fs;
use std::io;
use std::path::Path;

use crate::error::ItemError;

/// Move `from` to `to`, refusing to overwrite an existing destination.
///
/// Falls back to copy and remove when the two paths are on different
/// filesystems.
pub fn move_file(from: &Path, to: &Path) -> Result<(), ItemError> {
    if to.exists() {
        return Err(ItemError::DestinationConflict {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => copy_then_remove(from, to),
        Err(e) => Err(ItemError::from_io(from, e)),
    }
}

/// Copy `from` to `to` and delete `from`. On failure the copy is removed
/// again so the file only ever exists under one name.
fn copy_then_remove(from: &Path, to: &Path) -> Result<(), ItemError> {
    if let Err(e) = fs::copy(from, to) {
        discard(to);
        return Err(ItemError::from_io(to, e));
    }
    if let Err(e) = fs::remove_file(from) {
        discard(to);
        return Err(ItemError::from_io(from, e));
    }
    Ok(())
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            log::warn!("Could not remove partial copy {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_move_file_renames() {
        let temp_dir = TempDir::new().unwrap();
        let from = temp_dir.path().join("a.jpg");
        let to = temp_dir.path().join("b.jpg");
        fs::write(&from, b"pixels").unwrap();

        move_file(&from, &to).unwrap();

        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"pixels");
    }

    #[test]
    fn test_existing_destination_is_a_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let from = temp_dir.path().join("a.jpg");
        let to = temp_dir.path().join("b.jpg");
        fs::write(&from, b"new").unwrap();
        fs::write(&to, b"old").unwrap();

        let result = move_file(&from, &to);

        assert!(matches!(result, Err(ItemError::DestinationConflict { .. })));
        assert_eq!(fs::read(&from).unwrap(), b"new");
        assert_eq!(fs::read(&to).unwrap(), b"old");
    }

    #[test]
    fn test_missing_source_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let result = move_file(
            &temp_dir.path().join("gone.jpg"),
            &temp_dir.path().join("dest.jpg"),
        );
        assert!(matches!(result, Err(ItemError::Io { .. })));
    }

    #[test]
    fn test_copy_fallback_moves_contents() {
        let temp_dir = TempDir::new().unwrap();
        let from = temp_dir.path().join("a.jpg");
        let to = temp_dir.path().join("b.jpg");
        fs::write(&from, b"pixels").unwrap();

        copy_then_remove(&from, &to).unwrap();

        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"pixels");
    }

    #[test]
    fn test_failed_copy_leaves_no_destination() {
        let temp_dir = TempDir::new().unwrap();
        let from = temp_dir.path().join("folder.jpg");
        fs::create_dir(&from).unwrap();
        let to = temp_dir.path().join("b.jpg");

        assert!(copy_then_remove(&from, &to).is_err());
        assert!(!to.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_source_that_cannot_be_removed_keeps_one_copy() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let locked = temp_dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        let from = locked.join("a.jpg");
        fs::write(&from, b"pixels").unwrap();
        let to = temp_dir.path().join("a.jpg");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();
        if fs::write(locked.join(".write-check"), b"").is_ok() {
            // Running with privileges that ignore permission bits.
            return;
        }

        let result = copy_then_remove(&from, &to);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(result, Err(ItemError::PermissionDenied { .. })));
        assert!(from.exists());
        assert!(!to.exists());
    }
}
