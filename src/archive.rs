use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{
    error::{Error, Result},
    kind::{self, ArchiveKind, FileKind},
    tool,
};

/// Directory under the scratch root that receives files materialized by
/// [`ArchiveExtractor::unpack_file`].
pub const OPENED_DIR: &str = "opened";

const EXIT_OK: &[i32] = &[0];
// unzip exits with 1 when it only emitted warnings.
const EXIT_OK_OR_WARNINGS: &[i32] = &[0, 1];

/// Unpacks archives of a given kind.
///
/// The default implementation shells out to the usual command-line tools;
/// tests substitute their own.
pub trait Unpacker {
    /// Unpack every entry of `archive` into `dest`.
    fn unpack_all(
        &self,
        kind: ArchiveKind,
        archive: &Path,
        dest: &Path,
    ) -> Result<()>;

    /// Unpack the single entry `inner` (relative to the archive root) into
    /// `dest`. Tools may recreate the entry's directories under `dest`.
    fn unpack_one(
        &self,
        kind: ArchiveKind,
        archive: &Path,
        inner: &str,
        dest: &Path,
    ) -> Result<()>;
}

/// [`Unpacker`] backed by `tar`, `unzip`, `unrar` and `7z`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandUnpacker;

impl CommandUnpacker {
    fn command(
        kind: ArchiveKind,
        archive: &Path,
        inner: Option<&str>,
        dest: &Path,
    ) -> (&'static str, Vec<OsString>, &'static [i32]) {
        let mut args: Vec<OsString> = Vec::new();
        match kind {
            ArchiveKind::TarGz => {
                args.extend(["-xzf".into(), archive.into(), "-C".into()]);
                args.push(dest.into());
                args.extend(inner.map(OsString::from));
                ("tar", args, EXIT_OK)
            }
            ArchiveKind::Zip => {
                args.extend(["-o".into(), archive.into()]);
                args.extend(inner.map(OsString::from));
                args.extend(["-d".into(), dest.into()]);
                ("unzip", args, EXIT_OK_OR_WARNINGS)
            }
            ArchiveKind::Rar => {
                args.extend(["x".into(), "-o+".into(), archive.into()]);
                args.extend(inner.map(OsString::from));
                let mut target = dest.as_os_str().to_owned();
                target.push("/");
                args.push(target);
                ("unrar", args, EXIT_OK)
            }
            ArchiveKind::SevenZ => {
                args.extend(["x".into(), "-y".into(), archive.into()]);
                let mut target = OsString::from("-o");
                target.push(dest.as_os_str());
                args.push(target);
                args.extend(inner.map(OsString::from));
                ("7z", args, EXIT_OK)
            }
        }
    }

    fn invoke(
        kind: ArchiveKind,
        archive: &Path,
        inner: Option<&str>,
        dest: &Path,
    ) -> Result<()> {
        let (program, args, accepted) =
            Self::command(kind, archive, inner, dest);
        tool::run_checked(program, args, None, accepted)?;

        if kind == ArchiveKind::Zip {
            // Zip entries can come out read-only, which breaks cleanup.
            let args = [OsStr::new("-R"), OsStr::new("u+w"), dest.as_os_str()];
            let out = tool::run("chmod", args, None)?;
            if !out.success() {
                tracing::warn!(
                    path = %dest.display(),
                    output = %out.output,
                    "failed to make unpacked files writable"
                );
            }
        }
        Ok(())
    }
}

impl Unpacker for CommandUnpacker {
    fn unpack_all(
        &self,
        kind: ArchiveKind,
        archive: &Path,
        dest: &Path,
    ) -> Result<()> {
        Self::invoke(kind, archive, None, dest)
    }

    fn unpack_one(
        &self,
        kind: ArchiveKind,
        archive: &Path,
        inner: &str,
        dest: &Path,
    ) -> Result<()> {
        Self::invoke(kind, archive, Some(inner), dest)
    }
}

/// The extraction scratch area.
///
/// Directories are handed out serially as `<root>/<kind>_<n>` and are
/// single-use: a stale directory with the same name is wiped first.
#[derive(Debug)]
pub struct ScratchSpace {
    root: PathBuf,
    keep_artifacts: bool,
    counter: AtomicU64,
}

impl ScratchSpace {
    pub fn new(root: impl Into<PathBuf>, keep_artifacts: bool) -> Self {
        Self {
            root: root.into(),
            keep_artifacts,
            counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fail unless the scratch root exists, and, when `require_tmpfs` is
    /// set, is a tmpfs mount point.
    pub fn check_mounted(&self, require_tmpfs: bool) -> Result<()> {
        if !self.root.is_dir() {
            return Err(Error::ScratchNotMounted(self.root.clone()));
        }
        if !require_tmpfs {
            return Ok(());
        }

        let mounts = std::fs::read_to_string("/proc/mounts")?;
        let root = self.root.canonicalize()?;
        let mounted = mounts.lines().any(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next();
            let mount_point = fields.next();
            let fs_type = fields.next();
            fs_type == Some("tmpfs")
                && mount_point.is_some_and(|m| Path::new(m) == root)
        });
        if mounted {
            Ok(())
        } else {
            Err(Error::ScratchNotMounted(self.root.clone()))
        }
    }

    /// Allocate a fresh, empty directory for one archive.
    pub fn allocate(&self, kind: ArchiveKind) -> Result<PathBuf> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let dir = self.root.join(format!("{kind}_{n}"));
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Delete a directory returned by [`allocate`](Self::allocate), unless
    /// artifacts are being kept for debugging.
    pub fn release(&self, dir: &Path) {
        if self.keep_artifacts {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(dir)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(
                path = %dir.display(),
                error = %e,
                "failed to remove scratch directory"
            );
        }
    }
}

/// One level of a nested logical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLevel {
    /// For the outermost level a real path; otherwise the entry's path
    /// relative to the previous archive.
    pub path: String,
    pub kind: ArchiveKind,
}

/// A logical path split at its archive boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedPath {
    pub levels: Vec<ArchiveLevel>,
    /// Path of the target inside the innermost archive.
    pub entry: String,
}

/// Split a logical path into the archives it passes through.
///
/// Every proper prefix is run through the classifier; each archive-typed
/// prefix starts a new level. The outermost archive must exist on disk so
/// that a real directory that merely looks like an archive is not
/// mistaken for one. Returns `None` when the path crosses no archive.
pub fn split_nested(logical: &str) -> Option<NestedPath> {
    let components: Vec<&str> = logical.split('/').collect();
    let last = components.len().checked_sub(1)?;

    let mut levels = Vec::new();
    let mut start = 0;
    for (i, component) in components.iter().enumerate().take(last) {
        let Some(FileKind::Archive(kind)) = kind::classify(component) else {
            continue;
        };
        let path = components[start..=i].join("/");
        if levels.is_empty() && !Path::new(&path).is_file() {
            continue;
        }
        levels.push(ArchiveLevel { path, kind });
        start = i + 1;
    }

    if levels.is_empty() {
        return None;
    }
    Some(NestedPath {
        levels,
        entry: components[start..].join("/"),
    })
}

/// Archive extraction for the scanner and for interactive open/export.
pub struct ArchiveExtractor {
    unpacker: Box<dyn Unpacker>,
    scratch: ScratchSpace,
}

impl ArchiveExtractor {
    pub fn new(unpacker: Box<dyn Unpacker>, scratch: ScratchSpace) -> Self {
        Self { unpacker, scratch }
    }

    pub fn scratch(&self) -> &ScratchSpace {
        &self.scratch
    }

    /// Unpack all of `archive` into a newly allocated scratch directory.
    ///
    /// The caller owns the returned directory and must hand it back to
    /// [`release`](Self::release). On failure the directory is already
    /// released.
    pub fn unpack(&self, archive: &Path, kind: ArchiveKind) -> Result<PathBuf> {
        let dir = self.scratch.allocate(kind)?;
        match self.unpacker.unpack_all(kind, archive, &dir) {
            Ok(()) => Ok(dir),
            Err(e) => {
                self.scratch.release(&dir);
                Err(e)
            }
        }
    }

    pub fn release(&self, dir: &Path) {
        self.scratch.release(dir);
    }

    /// Materialize one file addressed by a logical path.
    ///
    /// Only the entries on the way to the target are unpacked, one level at
    /// a time. The result is moved into the [`OPENED_DIR`] directory of the
    /// scratch area and every intermediate directory is removed. A path
    /// that crosses no archive is returned unchanged.
    pub fn unpack_file(&self, logical: &str) -> Result<PathBuf> {
        let Some(nested) = split_nested(logical) else {
            return Ok(PathBuf::from(logical));
        };

        let mut allocated = Vec::new();
        let result = self.unpack_chain(&nested, &mut allocated);
        for dir in &allocated {
            self.scratch.release(dir);
        }
        result
    }

    fn unpack_chain(
        &self,
        nested: &NestedPath,
        allocated: &mut Vec<PathBuf>,
    ) -> Result<PathBuf> {
        let mut current = PathBuf::from(&nested.levels[0].path);
        let mut kind = nested.levels[0].kind;

        let inner_entries = nested.levels[1..]
            .iter()
            .map(|level| (level.path.as_str(), Some(level.kind)))
            .chain(std::iter::once((nested.entry.as_str(), None)));

        for (entry, next_kind) in inner_entries {
            let dir = self.scratch.allocate(kind)?;
            allocated.push(dir.clone());
            self.unpacker.unpack_one(kind, &current, entry, &dir)?;
            current = flatten(&dir, entry)?;
            if let Some(next_kind) = next_kind {
                kind = next_kind;
            }
        }

        let opened = self.scratch.root().join(OPENED_DIR);
        std::fs::create_dir_all(&opened)?;
        let name = current.file_name().ok_or_else(|| {
            Error::Extraction(format!("no file name in {}", nested.entry))
        })?;
        let target = opened.join(name);
        if target.exists() {
            std::fs::remove_file(&target)?;
        }
        std::fs::rename(&current, &target)?;
        tracing::debug!(path = %target.display(), "materialized nested file");
        Ok(target)
    }
}

/// Move an unpacked `entry` to the root of `dir`, returning its new path.
fn flatten(dir: &Path, entry: &str) -> Result<PathBuf> {
    let base = entry.rsplit('/').next().unwrap_or(entry);
    let flat = dir.join(base);
    let nested = dir.join(entry);

    if nested.is_file() {
        if nested != flat {
            std::fs::rename(&nested, &flat)?;
        }
        Ok(flat)
    } else if flat.is_file() {
        Ok(flat)
    } else {
        Err(Error::Extraction(format!(
            "{entry} was not produced by the unpack tool"
        )))
    }
}
