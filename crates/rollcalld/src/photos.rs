use std::path::{Path, PathBuf};

/// Extensions probed, in order, when looking up an identity photo.
const PHOTO_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Resolves `{dir}/{identity_id}.{jpg,jpeg,png}` for display after attendance.
#[derive(Debug, Clone)]
pub struct PhotoLocator {
    dir: PathBuf,
}

impl PhotoLocator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// First existing photo for `identity_id`, or `None`.
    ///
    /// Ids containing path separators never resolve.
    pub fn find(&self, identity_id: &str) -> Option<PathBuf> {
        let id = identity_id.trim();
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            return None;
        }
        PHOTO_EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{id}.{ext}")))
            .find(|p| p.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "rollcall-photos-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_prefers_jpg_over_png() {
        let dir = scratch_dir("order");
        std::fs::write(dir.join("S100.png"), b"png").unwrap();
        std::fs::write(dir.join("S100.jpg"), b"jpg").unwrap();

        let locator = PhotoLocator::new(&dir);
        assert_eq!(locator.find("S100"), Some(dir.join("S100.jpg")));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_falls_back_to_png() {
        let dir = scratch_dir("png");
        std::fs::write(dir.join("S200.png"), b"png").unwrap();

        let locator = PhotoLocator::new(&dir);
        assert_eq!(locator.find("S200"), Some(dir.join("S200.png")));
        assert_eq!(locator.find("S300"), None);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let locator = PhotoLocator::new("/tmp");
        assert_eq!(locator.find("../etc/passwd"), None);
        assert_eq!(locator.find(""), None);
    }
}
