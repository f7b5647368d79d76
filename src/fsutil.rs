//! Thin filesystem layer used by the manager and buffers.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Absolute, normalized form of `path`. Falls back to joining with the
/// current directory when the file does not exist yet.
pub fn canonical(path: &Path) -> PathBuf {
    if let Ok(path) = fs::canonicalize(path) {
        return path;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

pub fn exists(path: &Path) -> bool {
    path.exists()
}

pub fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

pub fn file_size(path: &Path) -> io::Result<u64> {
    fs::metadata(path).map(|meta| meta.len())
}

pub fn is_readonly(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.permissions().readonly())
        .unwrap_or(false)
}

pub fn set_readonly(path: &Path, readonly: bool) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    if permissions.readonly() == readonly {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = permissions.mode();
        permissions.set_mode(if readonly { mode & !0o222 } else { mode | 0o200 });
    }
    #[cfg(not(unix))]
    permissions.set_readonly(readonly);
    fs::set_permissions(path, permissions)
}

pub fn open_read(path: &Path) -> io::Result<File> {
    File::open(path)
}

pub fn open_write(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

pub fn create_dir_all(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

pub fn remove_file(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

/// Move `from` to `to`, replacing an existing file at `to`
pub fn move_replace(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices && from.is_file() => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
        Err(err) => Err(err),
    }
}

/// Hidden/system attributes that must be cleared before a file can be rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpecialAttributes {
    raw: u32,
}

impl SpecialAttributes {
    pub fn is_empty(&self) -> bool {
        self.raw == 0
    }
}

#[cfg(windows)]
mod attrs {
    use super::SpecialAttributes;
    use std::os::windows::ffi::OsStrExt;
    use std::path::Path;
    use windows_sys::Win32::Storage::FileSystem::{
        GetFileAttributesW, SetFileAttributesW, FILE_ATTRIBUTE_HIDDEN, FILE_ATTRIBUTE_SYSTEM,
        INVALID_FILE_ATTRIBUTES,
    };

    const SPECIAL: u32 = FILE_ATTRIBUTE_HIDDEN | FILE_ATTRIBUTE_SYSTEM;

    fn wide(path: &Path) -> Vec<u16> {
        path.as_os_str().encode_wide().chain(std::iter::once(0)).collect()
    }

    pub fn clear_special(path: &Path) -> SpecialAttributes {
        let name = wide(path);
        // SAFETY: `name` is a NUL-terminated UTF-16 string that outlives both calls.
        unsafe {
            let current = GetFileAttributesW(name.as_ptr());
            if current == INVALID_FILE_ATTRIBUTES || current & SPECIAL == 0 {
                return SpecialAttributes::default();
            }
            SetFileAttributesW(name.as_ptr(), current & !SPECIAL);
            SpecialAttributes { raw: current & SPECIAL }
        }
    }

    pub fn restore_special(path: &Path, saved: SpecialAttributes) {
        if saved.raw == 0 {
            return;
        }
        let name = wide(path);
        // SAFETY: as above.
        unsafe {
            let current = GetFileAttributesW(name.as_ptr());
            if current != INVALID_FILE_ATTRIBUTES {
                SetFileAttributesW(name.as_ptr(), current | saved.raw);
            }
        }
    }
}

#[cfg(not(windows))]
mod attrs {
    use super::SpecialAttributes;
    use std::path::Path;

    pub fn clear_special(_path: &Path) -> SpecialAttributes {
        SpecialAttributes::default()
    }

    pub fn restore_special(_path: &Path, _saved: SpecialAttributes) {}
}

/// Clear hidden/system attributes on `path`, returning what was cleared
pub fn clear_special_attributes(path: &Path) -> SpecialAttributes {
    attrs::clear_special(path)
}

pub fn restore_special_attributes(path: &Path, saved: SpecialAttributes) {
    attrs::restore_special(path, saved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readonly_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro.txt");
        fs::write(&path, "x").unwrap();

        assert!(!is_readonly(&path));
        set_readonly(&path, true).unwrap();
        assert!(is_readonly(&path));
        set_readonly(&path, false).unwrap();
        assert!(!is_readonly(&path));
    }

    #[test]
    fn test_move_replace_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.txt");
        let to = dir.path().join("b.txt");
        fs::write(&from, "new").unwrap();
        fs::write(&to, "old").unwrap();

        move_replace(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read_to_string(&to).unwrap(), "new");
    }

    #[test]
    fn test_move_replace_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.txt");
        let to = dir.path().join("missing").join("b.txt");
        fs::write(&from, "keep").unwrap();

        let err = move_replace(&from, &to).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(fs::read_to_string(&from).unwrap(), "keep");
        assert!(!to.exists());
    }

    #[test]
    fn test_canonical_of_missing_file_is_absolute() {
        let path = canonical(Path::new("definitely-not-here.txt"));
        assert!(path.is_absolute());
    }
}
