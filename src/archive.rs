// src/archive.rs

//! Zip extraction for repository snapshots and zip dependencies.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::{Component, Path};

/// Extract `bytes` into `dest`, refusing entries that would escape it.
pub fn extract_zip(bytes: &[u8], dest: &Path) -> Result<usize> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("Failed to read zip archive")?;
    fs::create_dir_all(dest).with_context(|| format!("Failed to create {:?}", dest))?;

    let mut extracted = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("Failed to read archive entry")?;
        let name = entry.name().to_string();

        if !is_safe_entry(&name) {
            bail!("Refusing to extract unsafe path from archive: {}", name);
        }
        let rel = match entry.enclosed_name() {
            Some(p) => p,
            None => bail!("Refusing to extract unsafe path from archive: {}", name),
        };
        let out_path = dest.join(rel);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .with_context(|| format!("Failed to create {:?}", out_path))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let mut out = File::create(&out_path)
            .with_context(|| format!("Failed to create file: {}", out_path.display()))?;
        io::copy(&mut entry, &mut out).with_context(|| format!("Failed to extract: {}", name))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode().filter(|m| m & 0o777 != 0) {
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o777))
                    .with_context(|| format!("Failed to set permissions on {:?}", out_path))?;
            }
        }

        extracted += 1;
    }

    tracing::debug!(files = extracted, dest = %dest.display(), "extracted archive");
    Ok(extracted)
}

/// Relative, no parent components, no drive prefixes.
fn is_safe_entry(name: &str) -> bool {
    let path = Path::new(name);
    if name.starts_with('/') || name.starts_with('\\') || path.is_absolute() {
        return false;
    }
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// GitHub archives wrap the tree in one `<repo>-<sha>/` directory; hoist its
/// contents into `dir`.
pub fn flatten_single_root(dir: &Path) -> Result<()> {
    let entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read {:?}", dir))?
        .collect::<io::Result<_>>()?;

    if entries.len() != 1 || !entries[0].file_type()?.is_dir() {
        return Ok(());
    }

    // The root may contain a child with its own name.
    let root = dir.join(".zipball_root");
    fs::rename(entries[0].path(), &root)
        .with_context(|| format!("Failed to move {:?}", entries[0].path()))?;
    for item in fs::read_dir(&root).with_context(|| format!("Failed to read {:?}", root))? {
        let item = item?;
        fs::rename(item.path(), dir.join(item.file_name()))
            .with_context(|| format!("Failed to move {:?}", item.path()))?;
    }
    fs::remove_dir(&root).with_context(|| format!("Failed to remove {:?}", root))?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in files {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn extracts_and_flattens_github_archive() {
        let bytes = zip_bytes(&[
            ("widgets-abc123/cumulusci.yml", "project:\n  name: Widgets\n"),
            ("widgets-abc123/force-app/main/a.cls", "class A {}"),
        ]);
        let dir = tempdir().unwrap();

        assert_eq!(extract_zip(&bytes, dir.path()).unwrap(), 2);
        flatten_single_root(dir.path()).unwrap();

        assert!(dir.path().join("cumulusci.yml").exists());
        assert!(dir.path().join("force-app/main/a.cls").exists());
        assert!(!dir.path().join("widgets-abc123").exists());
    }

    #[test]
    fn rejects_parent_traversal() {
        let bytes = zip_bytes(&[("../evil.txt", "x")]);
        let dir = tempdir().unwrap();
        let err = extract_zip(&bytes, &dir.path().join("out")).unwrap_err();
        assert!(err.to_string().contains("unsafe path"));
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[test]
    fn rejects_absolute_paths() {
        assert!(!is_safe_entry("/etc/passwd"));
        assert!(!is_safe_entry("a/../../b"));
        assert!(is_safe_entry("a/./b.txt"));
    }

    #[test]
    fn flatten_leaves_multi_root_alone() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("b.txt"), "x").unwrap();
        flatten_single_root(dir.path()).unwrap();
        assert!(dir.path().join("a").is_dir());
    }

    #[test]
    fn invalid_bytes_fail() {
        let dir = tempdir().unwrap();
        assert!(extract_zip(b"not a zip", dir.path()).is_err());
    }

    #[test]
    fn flatten_handles_child_named_like_root() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("widgets/widgets");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("widgets/cumulusci.yml"), "x").unwrap();

        flatten_single_root(dir.path()).unwrap();

        assert!(dir.path().join("cumulusci.yml").is_file());
        assert!(dir.path().join("widgets/a.txt").is_file());
        assert!(!dir.path().join(".zipball_root").exists());
    }
}
