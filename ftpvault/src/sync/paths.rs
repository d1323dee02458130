use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use super::ledger::DayStamp;

const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("file name is empty")]
    Empty,
    #[error("file name is not a single path component: {0}")]
    UnsupportedComponent(String),
}

/// Local artifact location for a remote file: `<root>/<year>/<month>/<day>/<name>`,
/// mirroring the sink layout so files that share a name on different days
/// never share an artifact. Remote names come from third-party listings, so
/// anything other than one plain component is refused.
pub fn artifact_path(
    download_root: &Path,
    day: &DayStamp,
    name: &str,
) -> Result<PathBuf, PathError> {
    if name.is_empty() {
        return Err(PathError::Empty);
    }
    if name.contains('/') || name.contains('\\') {
        return Err(PathError::UnsupportedComponent(name.to_string()));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => Ok(day_dir(download_root, day).join(part)),
        _ => Err(PathError::UnsupportedComponent(name.to_string())),
    }
}

fn day_dir(download_root: &Path, day: &DayStamp) -> PathBuf {
    download_root.join(&day.year).join(&day.month).join(&day.day)
}

/// Sibling file that receives bytes until a download is complete.
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    target.with_file_name(name)
}
