//! Storage path resolution for memory databases and backups.

use std::env;
use std::path::PathBuf;

/// Returns the base directory for persistent engine storage (SQLite memory
/// databases, evolution history).
///
/// Resolution order: `OKAMI_STORAGE_DIR` environment variable, then the
/// platform data directory (`~/.local/share/okami/<project>` on Linux,
/// `~/Library/Application Support/okami/<project>` on macOS), falling back
/// to `/tmp/okami`. The directory is created if missing.
pub fn storage_path() -> PathBuf {
    let dir = match env::var("OKAMI_STORAGE_DIR") {
        Ok(custom) => PathBuf::from(custom),
        Err(_) => {
            let project = project_name();
            if let Ok(home) = env::var("HOME") {
                if cfg!(target_os = "macos") {
                    PathBuf::from(home)
                        .join("Library")
                        .join("Application Support")
                        .join("okami")
                        .join(project)
                } else {
                    PathBuf::from(home)
                        .join(".local")
                        .join("share")
                        .join("okami")
                        .join(project)
                }
            } else {
                PathBuf::from("/tmp").join("okami").join(project)
            }
        }
    };

    let _ = std::fs::create_dir_all(&dir);
    dir
}

/// Current project name, taken from the working directory's basename.
fn project_name() -> String {
    env::current_dir()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "default".to_string())
}
