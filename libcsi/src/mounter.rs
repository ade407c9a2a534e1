//! The opaque mount primitive.
//!
//! Everything the node service needs from the operating system's mount
//! machinery goes through the [`Mounter`] trait so that the lifecycle logic in
//! [`crate::probe`] and [`crate::backend::smb`] can be exercised against an
//! in-memory fake.  [`SystemMounter`] is the Linux implementation: it shells
//! out to `mount(8)` (which dispatches to `mount.cifs` for SMB shares) and
//! calls `umount(2)` directly.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::errno::Errno;
use tracing::{debug, instrument};

/// Path of the kernel's view of this process's mount table.
const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Placeholder printed instead of sensitive mount options.
const MASKED: &str = "<masked>";

/// A single entry of the system mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    /// Mounted device or remote source (`//server/share` for CIFS).
    pub device: String,
    /// Absolute mount point.
    pub path: PathBuf,
    /// Filesystem type, e.g. `cifs`.
    pub fs_type: String,
    /// Mount options as listed by the kernel.
    pub opts: Vec<String>,
}

/// Mount / unmount / mount-detection primitives.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Mount `source` at `target`.  `sensitive_options` are passed to the
    /// mount helper but never logged.
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
        sensitive_options: &[String],
    ) -> io::Result<()>;

    /// Unmount whatever is mounted at `target`.
    async fn unmount(&self, target: &Path) -> io::Result<()>;

    /// Cheap check whether `path` is *not* a mount point.  Bind mounts of a
    /// directory on the same device are reported as "not a mount point";
    /// callers that care consult [`Mounter::list`] as well.
    ///
    /// Returns a `NotFound` error when `path` does not exist.
    async fn is_likely_not_mount_point(&self, path: &Path) -> io::Result<bool>;

    /// Enumerate the system mount table.
    async fn list(&self) -> io::Result<Vec<MountPoint>>;

    /// List `path` to confirm the mount behind it still answers.
    async fn list_dir(&self, path: &Path) -> io::Result<()> {
        let mut entries = tokio::fs::read_dir(path).await?;
        entries.next_entry().await?;
        Ok(())
    }
}

/// Errors that indicate a mount whose backing connection is gone (stale SMB
/// session, unreachable server).  Such paths still occupy the mount table and
/// must be unmounted before they can be reused.
pub fn is_corrupted_mnt(err: &io::Error) -> bool {
    let Some(code) = err.raw_os_error() else {
        return false;
    };
    matches!(
        Errno::from_raw(code),
        Errno::ENOTCONN
            | Errno::ESTALE
            | Errno::EIO
            | Errno::EACCES
            | Errno::EHOSTDOWN
            | Errno::EWOULDBLOCK
    )
}

/// Join options into the comma-separated form accepted by `mount -o`.
fn join_options(options: &[String], sensitive_options: &[String]) -> String {
    options
        .iter()
        .chain(sensitive_options)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Like [`join_options`] but with every sensitive option replaced by a mask,
/// for logs and error messages.
fn sanitized_options(options: &[String], sensitive_options: &[String]) -> String {
    options
        .iter()
        .map(String::as_str)
        .chain(sensitive_options.iter().map(|_| MASKED))
        .collect::<Vec<_>>()
        .join(",")
}

/// Decode the octal escapes (`\040` for space, `\011` for tab, ...) the
/// kernel uses for whitespace in `/proc/self/mounts`.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse the contents of `/proc/self/mounts`.
///
/// Format: `<device> <mountpoint> <fstype> <options> <dump> <pass>`.
pub fn parse_proc_mounts(contents: &str) -> io::Result<Vec<MountPoint>> {
    let mut mounts = Vec::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("wrong number of fields (expected 6, got {}): {line}", fields.len()),
            ));
        }
        mounts.push(MountPoint {
            device: unescape_mount_field(fields[0]),
            path: PathBuf::from(unescape_mount_field(fields[1])),
            fs_type: fields[2].to_owned(),
            opts: fields[3].split(',').map(str::to_owned).collect(),
        });
    }
    Ok(mounts)
}

/// [`Mounter`] backed by `mount(8)`, `umount(2)` and `/proc/self/mounts`.
#[derive(Debug, Default, Clone)]
pub struct SystemMounter;

impl SystemMounter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Mounter for SystemMounter {
    #[instrument(skip(self, options, sensitive_options), fields(target = %target.display()))]
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
        sensitive_options: &[String],
    ) -> io::Result<()> {
        let mut cmd = tokio::process::Command::new("mount");
        if !fs_type.is_empty() {
            cmd.args(["-t", fs_type]);
        }
        if !options.is_empty() || !sensitive_options.is_empty() {
            cmd.arg("-o").arg(join_options(options, sensitive_options));
        }
        cmd.arg(source).arg(target);

        let printable = sanitized_options(options, sensitive_options);
        debug!(%source, fs_type, options = %printable, "invoking mount");

        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "mount failed: {}\nMounting command: mount\nMounting arguments: -t {fs_type} -o {printable} {source} {}\nOutput: {}",
                output.status,
                target.display(),
                String::from_utf8_lossy(&output.stderr).trim(),
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(target = %target.display()))]
    async fn unmount(&self, target: &Path) -> io::Result<()> {
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || nix::mount::umount(&target))
            .await
            .map_err(io::Error::other)?
            .map_err(io::Error::from)
    }

    async fn is_likely_not_mount_point(&self, path: &Path) -> io::Result<bool> {
        use std::os::unix::fs::MetadataExt;

        let stat = tokio::fs::metadata(path).await?;
        let parent = path.parent().unwrap_or_else(|| Path::new("/"));
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        let root_stat = tokio::fs::metadata(parent).await?;
        // A different device than the parent means something is mounted here.
        Ok(stat.dev() == root_stat.dev())
    }

    async fn list(&self) -> io::Result<Vec<MountPoint>> {
        let contents = tokio::fs::read_to_string(PROC_MOUNTS).await?;
        parse_proc_mounts(&contents)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted in-memory [`Mounter`] for lifecycle tests.

    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// A recorded `mount` call.
    #[derive(Debug, Clone)]
    pub(crate) struct MountCall {
        pub source: String,
        pub target: PathBuf,
        pub fs_type: String,
        pub options: Vec<String>,
        pub sensitive_options: Vec<String>,
    }

    #[derive(Default)]
    struct State {
        mounted: HashSet<PathBuf>,
        corrupted: HashSet<PathBuf>,
        mounts: Vec<MountCall>,
        unmounts: Vec<PathBuf>,
        mount_error: Option<String>,
        hang: bool,
        list_error: bool,
    }

    /// Tracks mounted paths in memory.  Paths must exist on the real
    /// filesystem (tests use temp dirs), everything else is simulated.
    #[derive(Default)]
    pub(crate) struct FakeMounter {
        state: Mutex<State>,
        unblock: tokio::sync::Notify,
    }

    fn abs(path: &Path) -> PathBuf {
        std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
    }

    fn stale() -> io::Error {
        io::Error::from_raw_os_error(Errno::ENOTCONN as i32)
    }

    impl FakeMounter {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn mark_mounted(&self, path: &Path) {
            self.state.lock().unwrap().mounted.insert(abs(path));
        }

        /// Simulate a mount whose server went away.
        pub(crate) fn mark_corrupted(&self, path: &Path) {
            let mut state = self.state.lock().unwrap();
            state.mounted.insert(abs(path));
            state.corrupted.insert(abs(path));
        }

        pub(crate) fn fail_mounts(&self, reason: &str) {
            self.state.lock().unwrap().mount_error = Some(reason.to_owned());
        }

        /// Make every subsequent `mount` call block until
        /// [`Self::finish_hung_mounts`].
        pub(crate) fn hang_mounts(&self) {
            self.state.lock().unwrap().hang = true;
        }

        /// Let every blocked `mount` call complete successfully.
        pub(crate) fn finish_hung_mounts(&self) {
            self.state.lock().unwrap().hang = false;
            self.unblock.notify_waiters();
        }

        pub(crate) fn fail_list(&self) {
            self.state.lock().unwrap().list_error = true;
        }

        pub(crate) fn is_mounted(&self, path: &Path) -> bool {
            self.state.lock().unwrap().mounted.contains(&abs(path))
        }

        pub(crate) fn mount_calls(&self) -> Vec<MountCall> {
            self.state.lock().unwrap().mounts.clone()
        }

        pub(crate) fn unmount_calls(&self) -> Vec<PathBuf> {
            self.state.lock().unwrap().unmounts.clone()
        }
    }

    #[async_trait]
    impl Mounter for FakeMounter {
        async fn mount(
            &self,
            source: &str,
            target: &Path,
            fs_type: &str,
            options: &[String],
            sensitive_options: &[String],
        ) -> io::Result<()> {
            let hang = {
                let mut state = self.state.lock().unwrap();
                state.mounts.push(MountCall {
                    source: source.to_owned(),
                    target: target.to_path_buf(),
                    fs_type: fs_type.to_owned(),
                    options: options.to_vec(),
                    sensitive_options: sensitive_options.to_vec(),
                });
                if let Some(reason) = &state.mount_error {
                    return Err(io::Error::other(reason.clone()));
                }
                if !state.hang {
                    state.mounted.insert(abs(target));
                }
                state.hang
            };
            if hang {
                self.unblock.notified().await;
                self.state.lock().unwrap().mounted.insert(abs(target));
            }
            Ok(())
        }

        async fn unmount(&self, target: &Path) -> io::Result<()> {
            let mut state = self.state.lock().unwrap();
            state.unmounts.push(target.to_path_buf());
            state.mounted.remove(&abs(target));
            state.corrupted.remove(&abs(target));
            Ok(())
        }

        async fn is_likely_not_mount_point(&self, path: &Path) -> io::Result<bool> {
            if self.state.lock().unwrap().corrupted.contains(&abs(path)) {
                return Err(stale());
            }
            tokio::fs::metadata(path).await?;
            // Bind mounts are invisible to the cheap check on Linux; only the
            // mount table knows about them.
            Ok(true)
        }

        async fn list(&self) -> io::Result<Vec<MountPoint>> {
            let state = self.state.lock().unwrap();
            if state.list_error {
                return Err(io::Error::other("cannot read mount table"));
            }
            Ok(state
                .mounted
                .iter()
                .map(|path| MountPoint {
                    device: "//fake/share".to_owned(),
                    path: path.clone(),
                    fs_type: "cifs".to_owned(),
                    opts: vec!["rw".to_owned()],
                })
                .collect())
        }

        async fn list_dir(&self, path: &Path) -> io::Result<()> {
            if self.state.lock().unwrap().corrupted.contains(&abs(path)) {
                return Err(stale());
            }
            tokio::fs::read_dir(path).await.map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupted_errnos() {
        for errno in [Errno::ENOTCONN, Errno::ESTALE, Errno::EIO, Errno::EHOSTDOWN] {
            assert!(is_corrupted_mnt(&io::Error::from_raw_os_error(errno as i32)));
        }
        assert!(!is_corrupted_mnt(&io::Error::from_raw_os_error(
            Errno::ENOENT as i32
        )));
        assert!(!is_corrupted_mnt(&io::Error::other("no errno")));
    }

    #[test]
    fn parse_mount_table() {
        let table = "\
//srv/share /var/lib/kubelet/stage cifs rw,relatime,vers=3.0 0 0
/dev/sda1 /mnt/with\\040space ext4 rw 0 0
";
        let mounts = parse_proc_mounts(table).unwrap();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].device, "//srv/share");
        assert_eq!(mounts[0].fs_type, "cifs");
        assert_eq!(mounts[0].opts, vec!["rw", "relatime", "vers=3.0"]);
        assert_eq!(mounts[1].path, PathBuf::from("/mnt/with space"));
    }

    #[test]
    fn parse_rejects_truncated_line() {
        assert!(parse_proc_mounts("/dev/sda1 /mnt ext4\n").is_err());
    }

    #[test]
    fn sensitive_options_are_masked() {
        let opts = vec!["vers=3.0".to_owned()];
        let sensitive = vec!["username=u,password=p".to_owned()];
        assert_eq!(join_options(&opts, &sensitive), "vers=3.0,username=u,password=p");
        let printable = sanitized_options(&opts, &sensitive);
        assert_eq!(printable, "vers=3.0,<masked>");
        assert!(!printable.contains("password"));
    }

    #[tokio::test]
    async fn system_mounter_sees_plain_dir_as_not_mounted() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("plain");
        std::fs::create_dir(&dir).unwrap();
        let mounter = SystemMounter::new();
        assert!(mounter.is_likely_not_mount_point(&dir).await.unwrap());

        let missing = tmp.path().join("missing");
        let err = mounter.is_likely_not_mount_point(&missing).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
