use std::path::PathBuf;

const APP_DIR: &str = "frame-sync";

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/frame-sync/ (XDG standard)
    // instead of macOS Application Support for consistency
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn config_dir() -> PathBuf {
    // On macOS and Linux, always use ~/.config/frame-sync/
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(APP_DIR)
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

/// Directory holding the composition assets (background, logos).
///
/// A `resources/` folder beside the executable wins, which is how the
/// container image ships them; otherwise the data dir is used.
pub fn resources_dir() -> PathBuf {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let bundled = exe_dir.join("resources");
            if bundled.exists() {
                return bundled;
            }
        }
    }
    data_dir().join("resources")
}

/// Font candidates tried in order when none are configured.
/// The second element is the face index inside a collection file.
pub fn default_font_candidates() -> Vec<(PathBuf, u32)> {
    vec![
        // Alpine / Debian DejaVu packages
        (PathBuf::from("/usr/share/fonts/ttf-dejavu/DejaVuSans-Bold.ttf"), 0),
        (PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf"), 0),
        // macOS Helvetica Bold lives at index 1 of the collection
        (PathBuf::from("/System/Library/Fonts/Helvetica.ttc"), 1),
        (PathBuf::from("/System/Library/Fonts/Supplemental/Arial Bold.ttf"), 0),
        (PathBuf::from("/System/Library/Fonts/Helvetica.ttc"), 0),
    ]
}
