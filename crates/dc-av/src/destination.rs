//! Output path selection.
//!
//! Output lands next to the source unless the source directory matches one of
//! the configured exclude patterns, in which case it goes to the default
//! destination directory. Name collisions are settled by the configured
//! [`CollisionPolicy`].

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use dc_core::config::{CollisionPolicy, ConversionConfig};
use dc_core::{Error, Result};
use parking_lot::Mutex;

/// Upper bound on `name (N).ext` candidates tried before giving up.
const MAX_RENAME_ATTEMPTS: u32 = 10_000;

/// An output path handed out by [`DestinationResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub path: PathBuf,
    /// The resolver created `path` as an empty placeholder. When false the
    /// file may belong to the user (`overwrite`) and must not be removed on
    /// failure.
    pub placeholder: bool,
}

/// Picks and claims output paths.
///
/// Claims are serialized through an internal lock and backed by an exclusive
/// create of an empty placeholder file, so two jobs converting `a.mov` and
/// `a.mkv` side by side never get the same `a.mp4`. A claim stays live until
/// [`release`](Self::release) is called for it.
#[derive(Debug)]
pub struct DestinationResolver {
    policy: CollisionPolicy,
    default_dest_dir: PathBuf,
    exclude_patterns: Vec<String>,
    claims: Mutex<HashSet<PathBuf>>,
}

impl DestinationResolver {
    pub fn new(config: &ConversionConfig) -> Self {
        Self {
            policy: config.collision,
            default_dest_dir: config.default_dest_dir.clone(),
            exclude_patterns: config
                .exclude_patterns
                .iter()
                .map(|p| p.trim_end_matches(['/', '\\']).to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            claims: Mutex::new(HashSet::new()),
        }
    }

    /// Directory the output for `source` goes into.
    pub fn target_dir(&self, source: &Path) -> PathBuf {
        let parent = source.parent().unwrap_or_else(|| Path::new("."));
        let parent_str = parent.to_string_lossy();
        match self
            .exclude_patterns
            .iter()
            .find(|pat| parent_str.contains(pat.as_str()))
        {
            Some(pat) => {
                tracing::debug!(source = %source.display(), pattern = %pat, dest = %self.default_dest_dir.display(), "source directory excluded; using default destination");
                self.default_dest_dir.clone()
            }
            None => parent.to_path_buf(),
        }
    }

    /// Choose the output path for `source` with extension `ext` (including
    /// the dot, e.g. `".mp4"`).
    ///
    /// Except under `overwrite`, the returned path exists as a placeholder
    /// when this returns; the caller must remove it if conversion fails. The
    /// source file itself and paths still claimed by another conversion are
    /// never returned.
    pub fn resolve(&self, source: &Path, ext: &str) -> Result<Destination> {
        let mut claims = self.claims.lock();

        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| Error::invalid_path(source, "file has no name"))?;
        let dir = self.target_dir(source);
        if dir == self.default_dest_dir {
            std::fs::create_dir_all(&dir)?;
        }
        let dest = dir.join(format!("{stem}{ext}"));
        let available = dest != source && !claims.contains(&dest);

        if available {
            if self.policy == CollisionPolicy::Overwrite {
                claims.insert(dest.clone());
                return Ok(Destination { path: dest, placeholder: false });
            }
            if claim(&dest)? {
                claims.insert(dest.clone());
                return Ok(Destination { path: dest, placeholder: true });
            }
            // A zero-byte file nobody holds is a leftover placeholder; reuse it.
            if std::fs::metadata(&dest).map(|m| m.len() == 0).unwrap_or(false) {
                claims.insert(dest.clone());
                return Ok(Destination { path: dest, placeholder: true });
            }
        }

        if self.policy == CollisionPolicy::Error {
            return Err(Error::Conversion(format!(
                "file already exists: {}",
                dest.display()
            )));
        }

        for i in 1..=MAX_RENAME_ATTEMPTS {
            let candidate = dir.join(format!("{stem} ({i}){ext}"));
            if !claims.contains(&candidate) && claim(&candidate)? {
                claims.insert(candidate.clone());
                return Ok(Destination { path: candidate, placeholder: true });
            }
        }
        Err(Error::Conversion(format!(
            "no free output name for {stem}{ext} in {}",
            dir.display()
        )))
    }

    /// Drop the live claim on `path` once its conversion has finished.
    pub fn release(&self, path: &Path) {
        self.claims.lock().remove(path);
    }
}

/// Atomically create an empty file at `path`. `Ok(false)` if it exists.
fn claim(path: &Path) -> Result<bool> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn resolver(dir: &Path, policy: CollisionPolicy, excludes: &[&str]) -> DestinationResolver {
        DestinationResolver::new(&ConversionConfig {
            collision: policy,
            default_dest_dir: dir.join("Pictures"),
            exclude_patterns: excludes.iter().map(|s| s.to_string()).collect(),
            ..ConversionConfig::default()
        })
    }

    #[test]
    fn free_name_is_claimed_with_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("clip.mov");
        fs::write(&src, b"x").unwrap();

        let r = resolver(dir.path(), CollisionPolicy::Rename, &[]);
        let dest = r.resolve(&src, ".mp4").unwrap();
        assert_eq!(dest.path, dir.path().join("clip.mp4"));
        assert!(dest.placeholder);
        assert_eq!(fs::metadata(&dest.path).unwrap().len(), 0);
    }

    #[test]
    fn rename_picks_next_free_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("clip.mov");
        fs::write(&src, b"x").unwrap();
        fs::write(dir.path().join("clip.mp4"), b"old").unwrap();
        fs::write(dir.path().join("clip (1).mp4"), b"old").unwrap();

        let r = resolver(dir.path(), CollisionPolicy::Rename, &[]);
        assert_eq!(
            r.resolve(&src, ".mp4").unwrap().path,
            dir.path().join("clip (2).mp4")
        );
        // The claim holds: asking again moves on.
        assert_eq!(
            r.resolve(&src, ".mp4").unwrap().path,
            dir.path().join("clip (3).mp4")
        );
    }

    #[test]
    fn zero_byte_file_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("photo.heic");
        fs::write(&src, b"x").unwrap();
        fs::write(dir.path().join("photo.jpg"), b"").unwrap();

        let r = resolver(dir.path(), CollisionPolicy::Error, &[]);
        assert_eq!(r.resolve(&src, ".jpg").unwrap().path, dir.path().join("photo.jpg"));
    }

    #[test]
    fn error_policy_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("photo.heic");
        fs::write(&src, b"x").unwrap();
        fs::write(dir.path().join("photo.jpg"), b"old").unwrap();

        let r = resolver(dir.path(), CollisionPolicy::Error, &[]);
        let err = r.resolve(&src, ".jpg").unwrap_err();
        assert!(err.to_string().contains("file already exists"), "{err}");
    }

    #[test]
    fn overwrite_returns_plain_name_without_claiming() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("clip.mov");
        fs::write(&src, b"x").unwrap();
        fs::write(dir.path().join("clip.mp4"), b"old").unwrap();

        let r = resolver(dir.path(), CollisionPolicy::Overwrite, &[]);
        let dest = r.resolve(&src, ".mp4").unwrap();
        assert_eq!(dest.path, dir.path().join("clip.mp4"));
        assert!(!dest.placeholder);
        assert_eq!(fs::read(dir.path().join("clip.mp4")).unwrap(), b"old");
    }

    #[test]
    fn never_targets_the_source_itself() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("clip.mp4");
        fs::write(&src, b"x").unwrap();

        let r = resolver(dir.path(), CollisionPolicy::Overwrite, &[]);
        assert_eq!(r.resolve(&src, ".mp4").unwrap().path, dir.path().join("clip (1).mp4"));
        assert_eq!(fs::read(&src).unwrap(), b"x");
    }

    #[test]
    fn excluded_directory_redirects_to_default_dest() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = dir.path().join("iCloud Drive").join("Camera");
        fs::create_dir_all(&cloud).unwrap();
        let src = cloud.join("clip.mov");
        fs::write(&src, b"x").unwrap();

        let r = resolver(dir.path(), CollisionPolicy::Rename, &["iCloud Drive/"]);
        let dest = r.resolve(&src, ".mp4").unwrap();
        assert_eq!(dest.path, dir.path().join("Pictures").join("clip.mp4"));
        assert!(dest.path.exists());
    }

    #[test]
    fn same_stem_sources_get_distinct_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mov = dir.path().join("a.mov");
        let mkv = dir.path().join("a.mkv");
        fs::write(&mov, b"x").unwrap();
        fs::write(&mkv, b"x").unwrap();

        let r = resolver(dir.path(), CollisionPolicy::Rename, &[]);
        let first = r.resolve(&mov, ".mp4").unwrap();
        let second = r.resolve(&mkv, ".mp4").unwrap();
        assert_eq!(first.path, dir.path().join("a.mp4"));
        assert_eq!(second.path, dir.path().join("a (1).mp4"));
    }

    #[test]
    fn held_placeholder_is_refused_under_error_policy() {
        let dir = tempfile::tempdir().unwrap();
        let heic = dir.path().join("x.heic");
        let heif = dir.path().join("x.heif");
        fs::write(&heic, b"x").unwrap();
        fs::write(&heif, b"x").unwrap();

        let r = resolver(dir.path(), CollisionPolicy::Error, &[]);
        r.resolve(&heic, ".jpg").unwrap();
        assert!(r.resolve(&heif, ".jpg").is_err());
    }

    #[test]
    fn overwrite_does_not_share_an_in_flight_output() {
        let dir = tempfile::tempdir().unwrap();
        let mov = dir.path().join("a.mov");
        let mkv = dir.path().join("a.mkv");
        fs::write(&mov, b"x").unwrap();
        fs::write(&mkv, b"x").unwrap();

        let r = resolver(dir.path(), CollisionPolicy::Overwrite, &[]);
        assert_eq!(r.resolve(&mov, ".mp4").unwrap().path, dir.path().join("a.mp4"));
        assert_eq!(r.resolve(&mkv, ".mp4").unwrap().path, dir.path().join("a (1).mp4"));
    }

    #[test]
    fn released_placeholder_can_be_reused() {
        let dir = tempfile::tempdir().unwrap();
        let mov = dir.path().join("a.mov");
        let mkv = dir.path().join("a.mkv");
        fs::write(&mov, b"x").unwrap();
        fs::write(&mkv, b"x").unwrap();

        let r = resolver(dir.path(), CollisionPolicy::Rename, &[]);
        let first = r.resolve(&mov, ".mp4").unwrap();
        r.release(&first.path);
        // Still zero bytes, no longer held by anyone.
        assert_eq!(r.resolve(&mkv, ".mp4").unwrap().path, first.path);
    }
}
