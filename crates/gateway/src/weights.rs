use std::path::{Path, PathBuf};

/// Pick the model weights file.
///
/// An explicit override always wins. Otherwise the local relative path is
/// used when it exists, else the deployment path.
pub fn resolve_weights_path(
    override_path: Option<&str>,
    local_path: &Path,
    deployment_path: &Path,
) -> PathBuf {
    if let Some(path) = override_path.filter(|p| !p.trim().is_empty()) {
        return PathBuf::from(path);
    }

    if local_path.exists() {
        local_path.to_path_buf()
    } else {
        deployment_path.to_path_buf()
    }
}
