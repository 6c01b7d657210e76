//! Marking thumbnail files hidden where the platform has such a notion.

use std::io;
use std::path::Path;

/// Capability to mark a file hidden.
pub trait FileHider: Send + Sync {
    fn hide(&self, path: &Path) -> io::Result<()>;
}

/// Used on platforms without a hidden attribute.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHider;

impl FileHider for NoopHider {
    fn hide(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(windows)]
mod windows {
    use std::ffi::OsStr;
    use std::io;
    use std::os::windows::ffi::OsStrExt;
    use std::path::Path;
    use windows_sys::Win32::Storage::FileSystem::{
        FILE_ATTRIBUTE_HIDDEN, GetFileAttributesW, INVALID_FILE_ATTRIBUTES, SetFileAttributesW,
    };

    /// Sets `FILE_ATTRIBUTE_HIDDEN`, keeping the other attribute bits.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct AttributeHider;

    impl super::FileHider for AttributeHider {
        fn hide(&self, path: &Path) -> io::Result<()> {
            let wide: Vec<u16> = OsStr::new(path.as_os_str())
                .encode_wide()
                .chain(std::iter::once(0))
                .collect();
            // SAFETY: `wide` is a NUL-terminated UTF-16 buffer that outlives both calls.
            let current = unsafe { GetFileAttributesW(wide.as_ptr()) };
            if current == INVALID_FILE_ATTRIBUTES {
                return Err(io::Error::last_os_error());
            }
            if current & FILE_ATTRIBUTE_HIDDEN != 0 {
                return Ok(());
            }
            // SAFETY: as above.
            let ok = unsafe { SetFileAttributesW(wide.as_ptr(), current | FILE_ATTRIBUTE_HIDDEN) };
            if ok == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    }
}

#[cfg(windows)]
pub use windows::AttributeHider;

/// The hider for the current platform.
pub fn platform_hider() -> Box<dyn FileHider> {
    #[cfg(windows)]
    {
        Box::new(AttributeHider)
    }
    #[cfg(not(windows))]
    {
        Box::new(NoopHider)
    }
}

/// Hide `path`, logging instead of failing: a visible thumbnail is harmless.
pub fn hide_or_warn(hider: &dyn FileHider, path: &Path) {
    if let Err(e) = hider.hide(path) {
        log::warn!("Could not hide {}: {}", path.display(), e);
    }
}
