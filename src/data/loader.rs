use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{AlignError, AlignResult};

/// Decode any supported raster file into 3-channel RGB.
///
/// Grayscale and alpha inputs are expanded or flattened so every later stage
/// sees the same pixel layout.
pub fn load_color_image<P: AsRef<Path>>(path: P) -> AlignResult<RgbImage> {
    let path = path.as_ref();
    let decoded = image::open(path).map_err(|e| AlignError::ImageLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let rgb = decoded.to_rgb8();
    validate_image(&rgb).map_err(|e| AlignError::ImageLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(rgb)
}

pub fn validate_image(image: &RgbImage) -> AlignResult<()> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(AlignError::MalformedImage(format!(
            "image has no pixels ({}x{})",
            width, height
        )));
    }
    Ok(())
}

/// A reference file and the identically named target file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairPaths {
    pub identifier: String,
    pub reference: PathBuf,
    pub target: PathBuf,
}

/// Both images of a pair, decoded.
#[derive(Debug, Clone)]
pub struct ImagePair {
    pub identifier: String,
    pub reference: RgbImage,
    pub target: RgbImage,
}

impl PairPaths {
    pub fn load(&self) -> AlignResult<ImagePair> {
        Ok(ImagePair {
            identifier: self.identifier.clone(),
            reference: load_color_image(&self.reference)?,
            target: load_color_image(&self.target)?,
        })
    }
}

/// Pairs of identically named files in a reference and a target directory.
#[derive(Debug, Clone)]
pub struct PairSource {
    pub reference_dir: PathBuf,
    pub target_dir: PathBuf,
}

/// Result of scanning the reference directory.
#[derive(Debug, Default)]
pub struct PairListing {
    pub pairs: Vec<PairPaths>,
    /// Reference files with no counterpart in the target directory.
    pub unmatched: Vec<String>,
}

impl PairListing {
    /// Number of reference files seen, matched or not.
    pub fn reference_count(&self) -> usize {
        self.pairs.len() + self.unmatched.len()
    }
}

impl PairSource {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(reference_dir: P, target_dir: Q) -> Self {
        Self {
            reference_dir: reference_dir.into(),
            target_dir: target_dir.into(),
        }
    }

    /// Directories must both exist and must not be the same directory.
    pub fn validate(&self) -> AlignResult<()> {
        if !self.reference_dir.is_dir() {
            return Err(AlignError::Setup(format!(
                "reference folder '{}' does not exist",
                self.reference_dir.display()
            )));
        }
        if !self.target_dir.is_dir() {
            return Err(AlignError::Setup(format!(
                "target folder '{}' does not exist",
                self.target_dir.display()
            )));
        }
        if fs::canonicalize(&self.reference_dir)? == fs::canonicalize(&self.target_dir)? {
            return Err(AlignError::Setup(
                "reference and target folder should be different".to_string(),
            ));
        }
        Ok(())
    }

    /// Regular files of the reference directory, sorted by name, paired with
    /// the target file of the same name.
    pub fn list(&self) -> AlignResult<PairListing> {
        let mut listing = PairListing::default();
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.reference_dir)?.filter_map(|entry| entry.ok()) {
            if !entry.path().is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => {
                    let name = raw.to_string_lossy().into_owned();
                    warn!(file = %name, "File name is not valid UTF-8, skipping");
                    listing.unmatched.push(name);
                }
            }
        }
        names.sort();

        for name in names {
            let target = self.target_dir.join(&name);
            if target.is_file() {
                listing.pairs.push(PairPaths {
                    reference: self.reference_dir.join(&name),
                    target,
                    identifier: name,
                });
            } else {
                listing.unmatched.push(name);
            }
        }
        listing.unmatched.sort();
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    fn write_image(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([10, 20, 30]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_listing_pairs_by_name() {
        let dir = TempDir::new().unwrap();
        let reference = dir.path().join("reference");
        let target = dir.path().join("target");
        fs::create_dir_all(reference.join("nested")).unwrap();
        fs::create_dir_all(&target).unwrap();

        write_image(&reference.join("b.png"), 4, 4);
        write_image(&reference.join("a.png"), 4, 4);
        write_image(&reference.join("only_ref.png"), 4, 4);
        write_image(&target.join("a.png"), 4, 4);
        write_image(&target.join("b.png"), 4, 4);

        let source = PairSource::new(&reference, &target);
        source.validate().unwrap();
        let listing = source.list().unwrap();

        let names: Vec<&str> = listing.pairs.iter().map(|p| p.identifier.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
        assert_eq!(listing.unmatched, vec!["only_ref.png".to_string()]);
        assert_eq!(listing.reference_count(), 3);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_reference_name_is_reported_unmatched() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        let reference = dir.path().join("reference");
        let target = dir.path().join("target");
        fs::create_dir_all(&reference).unwrap();
        fs::create_dir_all(&target).unwrap();

        let raw = OsStr::from_bytes(b"bad\xff.png");
        fs::write(reference.join(raw), b"x").unwrap();
        fs::write(target.join(raw), b"x").unwrap();
        write_image(&reference.join("a.png"), 4, 4);
        write_image(&target.join("a.png"), 4, 4);

        let listing = PairSource::new(&reference, &target).list().unwrap();
        assert_eq!(listing.pairs.len(), 1);
        assert_eq!(listing.unmatched, vec!["bad\u{fffd}.png".to_string()]);
    }

    #[test]
    fn test_same_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        let source = PairSource::new(dir.path(), dir.path());
        assert!(matches!(source.validate(), Err(AlignError::Setup(_))));
    }

    #[test]
    fn test_missing_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        let source = PairSource::new(dir.path().join("missing"), dir.path());
        assert!(matches!(source.validate(), Err(AlignError::Setup(_))));
    }

    #[test]
    fn test_unreadable_image_is_a_load_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        fs::write(&path, b"not a png").unwrap();

        match load_color_image(&path) {
            Err(AlignError::ImageLoad { path: failed, .. }) => assert_eq!(failed, path),
            other => panic!("expected ImageLoad error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_grayscale_input_is_expanded_to_rgb() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gray.png");
        image::GrayImage::from_pixel(3, 2, image::Luma([77])).save(&path).unwrap();

        let rgb = load_color_image(&path).unwrap();
        assert_eq!(rgb.dimensions(), (3, 2));
        assert_eq!(rgb.get_pixel(1, 1), &Rgb([77, 77, 77]));
    }
}
