//! Writing filtered link lists for hosts that hand results over as files.

use std::path::{Path, PathBuf};
use tracing::info;

use crate::errors::HarvestError;

/// File name used for a list of `count` links.
#[must_use]
pub fn link_file_name(count: usize) -> String {
    format!("filtered_links_{count}.txt")
}

/// Writes `links` one per line into `dir` and returns the file's path.
///
/// The directory is created when missing. Any failure is reported as
/// [`HarvestError::Delivery`].
pub async fn write_link_file(dir: impl AsRef<Path>, links: &[String]) -> Result<PathBuf, HarvestError> {
    let dir = dir.as_ref();
    let path = dir.join(link_file_name(links.len()));

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|err| HarvestError::delivery(format!("cannot create {}: {err}", dir.display())))?;

    let mut contents = links.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    tokio::fs::write(&path, contents)
        .await
        .map_err(|err| HarvestError::delivery(format!("cannot write {}: {err}", path.display())))?;

    info!(path = %path.display(), links = links.len(), "Link file written");
    Ok(path)
}
