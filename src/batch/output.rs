//! Output directory layout
//!
//! Aligned images go to `<root>/<name>`, overlays to `<root>/overlap/<name>`.
//! A requested root that cannot be created or written falls back once to the
//! default root.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{AlignError, AlignResult};
use crate::pipeline::AlignmentResult;

pub const OVERLAP_DIR: &str = "overlap";
const ALIGNMENTS_DIR: &str = "Alignments";
const WRITE_PROBE: &str = ".align_write_probe";

#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    overlay: bool,
}

/// `<base>/Alignments/<target dir basename>_Alignments`
pub fn default_output_root(base: &Path, target_dir: &Path) -> PathBuf {
    base.join(ALIGNMENTS_DIR)
        .join(format!("{}_Alignments", directory_basename(target_dir)))
}

/// Last path component, resolving `.`, `..` and trailing separators where possible.
pub fn directory_basename(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_os_string())
        .or_else(|| fs::canonicalize(dir).ok().and_then(|p| p.file_name().map(|n| n.to_os_string())))
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl OutputLayout {
    /// Create the requested root (or `default_root` when none is given),
    /// falling back to `default_root` once.
    pub fn prepare(requested: Option<&Path>, default_root: &Path, overlay: bool) -> AlignResult<Self> {
        let first = requested.unwrap_or(default_root);
        match Self::create(first, overlay) {
            Ok(layout) => Ok(layout),
            Err(e) if requested.is_some() && first != default_root => {
                warn!(
                    requested = %first.display(),
                    fallback = %default_root.display(),
                    error = %e,
                    "Output directory unusable, using default"
                );
                Self::create(default_root, overlay).map_err(|e| {
                    AlignError::Setup(format!(
                        "cannot create output directory '{}': {}",
                        default_root.display(),
                        e
                    ))
                })
            }
            Err(e) => Err(AlignError::Setup(format!(
                "cannot create output directory '{}': {}",
                first.display(),
                e
            ))),
        }
    }

    fn create(root: &Path, overlay: bool) -> std::io::Result<Self> {
        let existed = root.is_dir();
        fs::create_dir_all(root)?;
        if !existed {
            info!(directory = %root.display(), "Output directory created");
        }
        if overlay {
            fs::create_dir_all(root.join(OVERLAP_DIR))?;
        }

        let probe = root.join(WRITE_PROBE);
        fs::write(&probe, b"")?;
        fs::remove_file(&probe)?;

        Ok(Self {
            root: root.to_path_buf(),
            overlay,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn overlap_dir(&self) -> PathBuf {
        self.root.join(OVERLAP_DIR)
    }

    pub fn output_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn overlay_path(&self, name: &str) -> PathBuf {
        self.overlap_dir().join(name)
    }

    /// True when a previous run left files that may be overwritten.
    pub fn has_existing_files(&self) -> AlignResult<bool> {
        let root_entries = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| !(entry.file_name().to_str() == Some(OVERLAP_DIR) && entry.path().is_dir()))
            .count();
        if root_entries > 0 {
            return Ok(true);
        }

        let overlap = self.overlap_dir();
        if self.overlay && overlap.is_dir() {
            return Ok(fs::read_dir(overlap)?.next().is_some());
        }
        Ok(false)
    }

    /// Write the overlay (when enabled), then the transformed image.
    ///
    /// A failed write leaves neither file behind for this pair.
    pub fn write(&self, name: &str, result: &AlignmentResult) -> AlignResult<()> {
        let overlay_path = match (self.overlay, result.overlay.as_ref()) {
            (true, Some(overlay)) => {
                let path = self.overlay_path(name);
                overlay.save(&path).map_err(|e| AlignError::Output {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                Some(path)
            }
            _ => None,
        };

        let path = self.output_path(name);
        if let Err(e) = result.transformed.save(&path) {
            if let Some(overlay_path) = overlay_path {
                let _ = fs::remove_file(overlay_path);
            }
            return Err(AlignError::Output {
                path,
                reason: e.to_string(),
            });
        }
        Ok(())
    }
}
