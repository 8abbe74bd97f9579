//! Locate and extract the tabular member of a downloaded zip archive.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use zip::ZipArchive;

use crate::error::{FormatError, TaskError};

/// macOS resource-fork directory some publishers ship inside their zips.
const MACOS_METADATA_DIR: &str = "__MACOSX/";

fn is_tabular(name: &str) -> bool {
    !name.ends_with('/')
        && !name.starts_with(MACOS_METADATA_DIR)
        && !name.contains(&format!("/{MACOS_METADATA_DIR}"))
        && name.to_ascii_lowercase().ends_with(".csv")
}

/// `.csv` member names in archive order.
pub fn tabular_members<R: Read + Seek>(archive: &ZipArchive<R>) -> Vec<String> {
    (0..archive.len())
        .filter_map(|i| archive.name_for_index(i))
        .filter(|name| is_tabular(name))
        .map(str::to_string)
        .collect()
}

/// Pick the tabular member. With several, the first in archive order wins.
pub fn select_member(members: &[String]) -> Result<&str, FormatError> {
    match members {
        [] => Err(FormatError::NoTabularMember),
        [only] => Ok(only.as_str()),
        [first, rest @ ..] => {
            warn!(
                chosen = %first,
                ignored = ?rest,
                "archive has several .csv members, using the first"
            );
            Ok(first.as_str())
        }
    }
}

/// Extract the tabular member of `bytes` into `dir`.
///
/// Returns the member name and the path of the extracted file.
pub fn extract_tabular(bytes: &[u8], dir: &Path) -> Result<(String, PathBuf), TaskError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(FormatError::from)?;
    let members = tabular_members(&archive);
    let member = select_member(&members)?.to_string();

    let mut entry = archive.by_name(&member).map_err(FormatError::from)?;
    // Flatten: only the base name lands in the scratch directory.
    let file_name = Path::new(&member)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "member.csv".into());
    let target = dir.join(file_name);

    let mut out = File::create(&target)?;
    let written = io::copy(&mut entry, &mut out)?;
    debug!(member = %member, bytes = written, path = %target.display(), "extracted tabular member");

    Ok((member, target))
}
