// ABOUTME: Filesystem isolation of a drone.
// ABOUTME: Changes the root directory and moves into the application directory.

use crate::error::BootstrapError;
use std::path::Path;

/// Confine the process to `root` and change into `app_path` inside it.
///
/// Must run before anything that resolves paths relative to the new root.
/// Requires CAP_SYS_CHROOT.
pub fn isolate(root: &Path, app_path: Option<&Path>) -> Result<(), BootstrapError> {
    nix::unistd::chroot(root).map_err(|errno| BootstrapError::Isolation {
        path: root.to_path_buf(),
        source: errno.into(),
    })?;

    let cwd = app_path.unwrap_or(Path::new("/"));
    std::env::set_current_dir(cwd).map_err(|source| BootstrapError::Isolation {
        path: cwd.to_path_buf(),
        source,
    })?;

    tracing::info!(root = %root.display(), cwd = %cwd.display(), "Isolated drone");
    Ok(())
}
