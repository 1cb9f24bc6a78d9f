use crate::{Error, Result};
use std::fs::File;
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

/// Extracts the zip archive at `archive` into `dest`, creating `dest` if needed.
/// The contents are not inspected.
pub fn extract(archive: &Path, dest: &Path) -> Result<()> {
    if !archive.is_file() {
        return Err(Error::ArtifactMissing(archive.to_path_buf()));
    }

    let file = File::open(archive)?;
    let to_archive_err = |source| Error::Archive {
        path: archive.to_path_buf(),
        source,
    };

    let mut zip = ZipArchive::new(file).map_err(to_archive_err)?;
    std::fs::create_dir_all(dest)?;
    zip.extract(dest).map_err(to_archive_err)?;

    debug!("Extracted {} file(s) from {} into {}", zip.len(), archive.display(), dest.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, contents) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn extracts_nested_files() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("fn.zip");
        write_zip(&archive, &[("index.js", "exports.handler = 1"), ("lib/util.js", "//")]);

        let dest = dir.path().join("out");
        extract(&archive, &dest).unwrap();

        assert_eq!(std::fs::read_to_string(dest.join("index.js")).unwrap(), "exports.handler = 1");
        assert!(dest.join("lib/util.js").is_file());
    }

    #[test]
    fn missing_archive() {
        let dir = TempDir::new().unwrap();
        let err = extract(&dir.path().join("nope.zip"), &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, Error::ArtifactMissing(_)));
    }

    #[test]
    fn corrupt_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("bad.zip");
        std::fs::write(&archive, "definitely not a zip").unwrap();

        let err = extract(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, Error::Archive { .. }));
    }
}
