//! Discovery of the Widevine CDM shared library on disk.
//!
//! Two bounded scan strategies cover the browser install trees that ship the
//! CDM: Mozilla profiles keep it under `gmp-widevinecdm/<version>/`, Chromium
//! trees under `WidevineCdm/<version>/_platform_specific/<platform>/`. Both
//! walks are cancellable and tolerate unreadable directories by skipping
//! them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};
use walkdir::WalkDir;

#[cfg(target_os = "macos")]
pub const CDM_BLOB: &str = "libwidevinecdm.dylib";
#[cfg(not(target_os = "macos"))]
pub const CDM_BLOB: &str = "libwidevinecdm.so";

const MOZILLA_CDM_DIR: &str = "gmp-widevinecdm";
const CHROMIUM_CDM_DIR: &str = "WidevineCdm";
const PLATFORM_SPECIFIC_DIR: &str = "_platform_specific";

/// Cooperative cancellation for directory scans, checked before each child
/// read.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Scan a Mozilla-style profile tree (max depth 2 below `root`). A hit is a
/// `gmp-widevinecdm/<child>/libwidevinecdm.*` file; the first hit in
/// enumeration order wins.
pub fn find_firefox_cdm(root: impl AsRef<Path>, token: &CancelToken) -> Option<PathBuf> {
    let root = root.as_ref();
    let mut walk = WalkDir::new(root)
        .follow_links(false)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry) = walk.next() {
        if token.is_cancelled() {
            return None;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(target: "opencdm::locate", root = %root.display(), "skip unreadable entry: {e}");
                continue;
            },
        };
        if !entry.file_type().is_dir() || entry.file_name() != MOZILLA_CDM_DIR {
            continue;
        }
        if let Some(blob) = probe_version_dirs(entry.path(), token) {
            return Some(blob);
        }
        walk.skip_current_dir();
    }
    None
}

/// Scan a Chromium-style tree. The walk descends until a directory named
/// `WidevineCdm` is found, then probes its version-named children for
/// `_platform_specific/<platform>/libwidevinecdm.*`.
pub fn find_chromium_cdm(root: impl AsRef<Path>, token: &CancelToken) -> Option<PathBuf> {
    let root = root.as_ref();
    let mut walk = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry) = walk.next() {
        if token.is_cancelled() {
            return None;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(target: "opencdm::locate", root = %root.display(), "skip unreadable entry: {e}");
                continue;
            },
        };
        if !entry.file_type().is_dir() || entry.file_name() != CHROMIUM_CDM_DIR {
            continue;
        }
        for version_dir in child_dirs(entry.path(), token) {
            if let Some(blob) =
                probe_version_dirs(&version_dir.join(PLATFORM_SPECIFIC_DIR), token)
            {
                return Some(blob);
            }
        }
        walk.skip_current_dir();
    }
    None
}

/// Enumerate the immediate child directories of `dir` and return the first
/// one containing the CDM blob.
fn probe_version_dirs(dir: &Path, token: &CancelToken) -> Option<PathBuf> {
    for child in child_dirs(dir, token) {
        let blob = child.join(CDM_BLOB);
        if blob.is_file() {
            return Some(blob);
        }
    }
    None
}

fn child_dirs(dir: &Path, token: &CancelToken) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    let mut out = Vec::new();
    for entry in entries {
        if token.is_cancelled() {
            return out;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(target: "opencdm::locate", dir = %dir.display(), "skip unreadable child: {e}");
                continue;
            },
        };
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            out.push(entry.path());
        }
    }
    out.sort();
    out
}

#[cfg(not(target_os = "macos"))]
fn firefox_dir() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".mozilla").join("firefox"))
}

#[cfg(target_os = "macos")]
fn firefox_dir() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join("Library")
            .join("Application Support")
            .join("Firefox"),
    )
}

#[cfg(not(target_os = "macos"))]
fn chromium_dir() -> Option<PathBuf> {
    let config = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) => PathBuf::from(dir),
        None => PathBuf::from(std::env::var_os("HOME")?).join(".config"),
    };
    Some(config.join("chromium"))
}

#[cfg(target_os = "macos")]
fn chromium_dir() -> Option<PathBuf> {
    let home = PathBuf::from(std::env::var_os("HOME")?);
    let support = home.join("Library").join("Application Support");
    let chrome = support.join("Google").join("Chrome");
    if chrome.is_dir() {
        return Some(chrome);
    }
    Some(support.join("Chromium"))
}

/// Fixed install locations of Chrome's bundled CDM, checked before any tree
/// scan.
#[cfg(not(target_os = "macos"))]
fn find_chrome_cdm() -> Option<PathBuf> {
    const CANDIDATES: [&str; 2] = [
        "/opt/google/chrome/WidevineCdm/_platform_specific/linux_x64/libwidevinecdm.so",
        "/usr/lib/chromium/WidevineCdm/_platform_specific/linux_x64/libwidevinecdm.so",
    ];
    CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

/// Chrome on macOS ships the CDM inside the framework bundle under a
/// `<major>.<minor>.<build>.<patch>` version directory; the lexicographically
/// greatest version is probed.
#[cfg(target_os = "macos")]
fn find_chrome_cdm() -> Option<PathBuf> {
    #[cfg(target_arch = "aarch64")]
    const PLATFORM: &str = "mac_arm64";
    #[cfg(not(target_arch = "aarch64"))]
    const PLATFORM: &str = "mac_x64";

    let versions_dir = PathBuf::from(
        "/Applications/Google Chrome.app/Contents/Frameworks/Google Chrome Framework.framework",
    )
    .join("Versions");
    let version_pattern =
        regex::Regex::new(r"^\d+\.\d+\.\d+\.\d+$").expect("static version pattern");

    let entries = std::fs::read_dir(&versions_dir).ok()?;
    let latest = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| version_pattern.is_match(name))
        .max()?;

    let blob = versions_dir
        .join(latest)
        .join("Libraries")
        .join(CHROMIUM_CDM_DIR)
        .join(PLATFORM_SPECIFIC_DIR)
        .join(PLATFORM)
        .join(CDM_BLOB);
    blob.is_file().then_some(blob)
}

fn blob_from_env() -> Option<PathBuf> {
    let path = PathBuf::from(std::env::var_os("WIDEVINE_CDM_BLOB")?);
    if path.is_file() {
        Some(path)
    } else {
        warn!(target: "opencdm::locate", path = %path.display(), "WIDEVINE_CDM_BLOB does not exist, ignoring");
        None
    }
}

/// Locate the CDM blob: env override first, then Chrome's fixed install
/// paths, then the Firefox and Chromium tree scans.
pub fn locate_cdm(token: &CancelToken) -> Option<PathBuf> {
    if let Some(path) = blob_from_env() {
        debug!(target: "opencdm::locate", path = %path.display(), "using env override");
        return Some(path);
    }
    if let Some(path) = find_chrome_cdm() {
        debug!(target: "opencdm::locate", path = %path.display(), "found chrome cdm");
        return Some(path);
    }
    if let Some(path) = firefox_dir().and_then(|dir| find_firefox_cdm(dir, token)) {
        debug!(target: "opencdm::locate", path = %path.display(), "found firefox cdm");
        return Some(path);
    }
    if let Some(path) = chromium_dir().and_then(|dir| find_chromium_cdm(dir, token)) {
        debug!(target: "opencdm::locate", path = %path.display(), "found chromium cdm");
        return Some(path);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
        std::fs::write(path, b"").expect("write file");
    }

    #[test]
    fn finds_cdm_in_firefox_profile_tree() {
        let root = tempfile::tempdir().expect("tempdir");
        let blob = root
            .path()
            .join("foo")
            .join(MOZILLA_CDM_DIR)
            .join("1.4.9.1088")
            .join(CDM_BLOB);
        touch(&blob);

        let found = find_firefox_cdm(root.path(), &CancelToken::new()).expect("hit");
        assert_eq!(found, blob);
    }

    #[test]
    fn firefox_scan_is_depth_bounded() {
        let root = tempfile::tempdir().expect("tempdir");
        // The scan stops two levels below the root; this gmp dir sits at
        // depth 3.
        let blob = root
            .path()
            .join("a")
            .join("b")
            .join(MOZILLA_CDM_DIR)
            .join("1.0")
            .join(CDM_BLOB);
        touch(&blob);

        assert_eq!(find_firefox_cdm(root.path(), &CancelToken::new()), None);
    }

    #[test]
    fn finds_cdm_in_chromium_tree() {
        let root = tempfile::tempdir().expect("tempdir");
        let blob = root
            .path()
            .join(CHROMIUM_CDM_DIR)
            .join("4.10.2")
            .join(PLATFORM_SPECIFIC_DIR)
            .join("linux_x64")
            .join(CDM_BLOB);
        touch(&blob);

        let found = find_chromium_cdm(root.path(), &CancelToken::new()).expect("hit");
        assert_eq!(found, blob);
    }

    #[test]
    fn chromium_scan_descends_to_nested_install() {
        let root = tempfile::tempdir().expect("tempdir");
        let blob = root
            .path()
            .join("opt")
            .join("chromium")
            .join(CHROMIUM_CDM_DIR)
            .join("4.10.2662.3")
            .join(PLATFORM_SPECIFIC_DIR)
            .join("linux_arm64")
            .join(CDM_BLOB);
        touch(&blob);

        let found = find_chromium_cdm(root.path(), &CancelToken::new()).expect("hit");
        assert_eq!(found, blob);
    }

    #[test]
    fn returns_none_without_a_blob() {
        let root = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(root.path().join("profile").join(MOZILLA_CDM_DIR))
            .expect("create dirs");
        assert_eq!(find_firefox_cdm(root.path(), &CancelToken::new()), None);
        assert_eq!(find_chromium_cdm(root.path(), &CancelToken::new()), None);
    }

    #[test]
    fn cancelled_token_stops_the_walk() {
        let root = tempfile::tempdir().expect("tempdir");
        let blob = root
            .path()
            .join("foo")
            .join(MOZILLA_CDM_DIR)
            .join("1.0")
            .join(CDM_BLOB);
        touch(&blob);

        let token = CancelToken::new();
        token.cancel();
        assert_eq!(find_firefox_cdm(root.path(), &token), None);
    }
}
