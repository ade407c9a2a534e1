//! Kerberos ticket caches for `sec=krb5*` mounts.
//!
//! `mount.cifs` (through `cifs.upcall`) looks for the ticket cache of the
//! mounting user at the fixed name `krb5cc_<uid>`.  Tickets arrive as base64
//! secrets with the stage request.  Each volume's ticket is written to a file
//! named after the *volume id*, and `krb5cc_<uid>` is made a symlink to the
//! most recently staged one.  Naming the content by volume id lets unstage
//! find and delete exactly its own cache even after another volume with the
//! same uid has re-pointed the symlink.
//!
//! # On-disk layout
//!
//! ```text
//! <cache_dir>/
//!   krb5cc_1000     -> <cache_dir>/dm9sLTE=   # canonical symlink per uid
//!   dm9sLTE=                                   # ticket of volume "vol-1"
//!   dm9sLTI=                                   # ticket of volume "vol-2"
//! ```

use std::io;
use std::path::{Path, PathBuf};

use base64::{Engine, engine::general_purpose};
use nix::unistd::{Gid, Uid};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::error::CsiError;
use crate::types::Secrets;

/// Prefix of the canonical cache file name the Kerberos library expects.
const KRB5_CCACHE_PREFIX: &str = "krb5cc_";
const SEC_KRB5_PREFIX: &str = "sec=krb5";
const CRUID_PREFIX: &str = "cruid=";

/// Whether the mount flags ask for Kerberos security (`sec=krb5`,
/// `sec=krb5i`, ...).
pub fn has_kerberos_mount_option(mount_flags: &[String]) -> bool {
    mount_flags.iter().any(|f| f.starts_with(SEC_KRB5_PREFIX))
}

/// Extract the credential uid from a `cruid=<uid>` mount flag.
pub fn cred_uid(mount_flags: &[String]) -> Result<u32, CsiError> {
    let value = mount_flags
        .iter()
        .find_map(|f| f.strip_prefix(CRUID_PREFIX))
        .ok_or_else(|| CsiError::cache("can't find cruid in mount flags"))?;
    value
        .parse()
        .map_err(|e| CsiError::cache(format!("invalid cruid {value:?}: {e}")))
}

/// Canonical cache name for `uid`, e.g. `krb5cc_1000`.
pub fn ccache_name(uid: u32) -> String {
    format!("{KRB5_CCACHE_PREFIX}{uid}")
}

/// File name holding the ticket of `volume_id`: standard base64 of the id
/// with the path separator and `+` replaced so the result is a single,
/// shell-friendly path component.
pub fn volume_cache_name(volume_id: &str) -> String {
    general_purpose::STANDARD
        .encode(volume_id)
        .replace('/', "-")
        .replace('+', "_")
}

/// Creates and garbage-collects per-volume ticket caches under one directory.
#[derive(Debug, Clone)]
pub struct Krb5CacheManager {
    cache_dir: PathBuf,
}

impl Krb5CacheManager {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Absolute path of a file inside the cache directory.
    fn file_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }

    /// Path of the per-volume ticket file.
    pub fn volume_cache_path(&self, volume_id: &str) -> PathBuf {
        self.file_path(&volume_cache_name(volume_id))
    }

    /// `Ok(true)` if the directory exists, `Ok(false)` if it does not.
    async fn dir_exists(&self) -> Result<bool, CsiError> {
        match tokio::fs::metadata(&self.cache_dir).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CsiError::cache(format!(
                "stat {}: {e}",
                self.cache_dir.display()
            ))),
        }
    }

    /// Decode the ticket stored under `krb5cc_<uid>` (case-insensitive).
    fn ticket_content(uid: u32, secrets: &Secrets) -> Result<Vec<u8>, CsiError> {
        let key = ccache_name(uid);
        let encoded = secrets
            .get_ignore_case(&key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CsiError::cache(format!("empty kerberos cache in key {key}")))?;
        general_purpose::STANDARD.decode(encoded).map_err(|e| {
            CsiError::cache(format!(
                "malformed kerberos cache in key {key}, expected to be in base64 form: {e}"
            ))
        })
    }

    /// Materialize the ticket cache for `volume_id` if the mount flags ask for
    /// Kerberos.  Returns whether Kerberos is in use; when it is, password
    /// options must not be passed to the mount.
    #[instrument(skip(self, mount_flags, secrets))]
    pub async fn ensure_cache(
        &self,
        volume_id: &str,
        mount_flags: &[String],
        secrets: &Secrets,
    ) -> Result<bool, CsiError> {
        if !has_kerberos_mount_option(mount_flags) {
            return Ok(false);
        }
        if !self.dir_exists().await? {
            return Err(CsiError::Configuration(format!(
                "directory for kerberos caches must exist, it will not be created: {}",
                self.cache_dir.display()
            )));
        }

        let uid = cred_uid(mount_flags)?;
        let content = Self::ticket_content(uid, secrets)?;

        let volume_cache = self.volume_cache_path(volume_id);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o700)
            .open(&volume_cache)
            .await
            .map_err(|e| {
                CsiError::cache(format!(
                    "couldn't write kerberos cache to file {}: {e}",
                    volume_cache.display()
                ))
            })?;
        file.write_all(&content).await.map_err(|e| {
            CsiError::cache(format!(
                "couldn't write kerberos cache to file {}: {e}",
                volume_cache.display()
            ))
        })?;
        file.flush().await.map_err(CsiError::cache)?;
        drop(file);

        // cifs.upcall reads the cache as cruid; the group follows the uid.
        nix::unistd::chown(&volume_cache, Some(Uid::from_raw(uid)), Some(Gid::from_raw(uid)))
            .map_err(|e| {
                CsiError::cache(format!(
                    "couldn't chown kerberos cache {} to {uid}:{uid}: {e}",
                    volume_cache.display()
                ))
            })?;

        let canonical = self.file_path(&ccache_name(uid));
        match tokio::fs::remove_file(&canonical).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %canonical.display(), "symlink doesn't exist, it'll be created");
            }
            Err(e) => {
                warn!(path = %canonical.display(), error = %e, "couldn't delete existing cache symlink");
            }
        }

        tokio::fs::symlink(&volume_cache, &canonical)
            .await
            .map_err(|e| {
                CsiError::cache(format!(
                    "couldn't create symlink to a cache file {}->{}: {e}",
                    canonical.display(),
                    volume_cache.display()
                ))
            })?;

        info!(%volume_id, uid, "kerberos cache installed");
        Ok(true)
    }

    /// Remove the ticket cache of `volume_id` and every symlink pointing at it.
    ///
    /// Missing directory or cache file means there is nothing to do.  Failures
    /// to remove individual entries are logged and otherwise ignored so that
    /// unstage can always release the volume.
    #[instrument(skip(self))]
    pub async fn delete_cache(&self, volume_id: &str) -> Result<(), CsiError> {
        if !self.dir_exists().await? {
            return Ok(());
        }

        let volume_cache = self.volume_cache_path(volume_id);
        match tokio::fs::symlink_metadata(&volume_cache).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(CsiError::cache(format!(
                    "stat {}: {e}",
                    volume_cache.display()
                )));
            }
        }

        let mut failures: Vec<(PathBuf, io::Error)> = Vec::new();

        match tokio::fs::read_dir(&self.cache_dir).await {
            Ok(mut entries) => loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        failures.push((self.cache_dir.clone(), e));
                        break;
                    }
                };
                let path = entry.path();
                // Only symlinks have a target; regular files fail here.
                let Ok(target) = tokio::fs::read_link(&path).await else {
                    continue;
                };
                if target == volume_cache
                    && let Err(e) = tokio::fs::remove_file(&path).await
                {
                    failures.push((path, e));
                }
            },
            Err(e) => failures.push((self.cache_dir.clone(), e)),
        }

        if let Err(e) = tokio::fs::remove_file(&volume_cache).await {
            failures.push((volume_cache, e));
        }

        for (path, e) in &failures {
            warn!(%volume_id, path = %path.display(), error = %e, "error removing kerberos ticket cache");
        }
        if failures.is_empty() {
            debug!(%volume_id, "kerberos cache removed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;

    use super::*;

    fn current_uid() -> u32 {
        nix::unistd::getuid().as_raw()
    }

    fn krb_flags(uid: u32) -> Vec<String> {
        vec!["sec=krb5".to_owned(), format!("cruid={uid}")]
    }

    fn ticket_secrets(uid: u32, ticket: &[u8]) -> Secrets {
        let mut secrets = Secrets::default();
        secrets
            .0
            .insert(ccache_name(uid), general_purpose::STANDARD.encode(ticket));
        secrets
    }

    #[test]
    fn volume_cache_name_is_path_safe() {
        // base64("??>") == "Pz8+", base64("???") == "Pz8/"
        assert_eq!(volume_cache_name("??>"), "Pz8_");
        assert_eq!(volume_cache_name("???"), "Pz8-");
        assert_eq!(volume_cache_name("vol-1"), "dm9sLTE=");
    }

    #[test]
    fn parse_cruid() {
        assert_eq!(cred_uid(&["vers=3".into(), "cruid=1000".into()]).unwrap(), 1000);
        assert!(cred_uid(&["vers=3".into()]).is_err());
        assert!(cred_uid(&["cruid=abc".into()]).is_err());
    }

    #[test]
    fn kerberos_flag_detection() {
        assert!(has_kerberos_mount_option(&["sec=krb5i".into()]));
        assert!(!has_kerberos_mount_option(&["sec=ntlmssp".into()]));
    }

    #[tokio::test]
    async fn non_kerberos_mount_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = Krb5CacheManager::new(tmp.path().join("missing"));
        let used = mgr
            .ensure_cache("v1", &["vers=3.0".into()], &Secrets::default())
            .await
            .unwrap();
        assert!(!used);
    }

    #[tokio::test]
    async fn missing_cache_dir_is_configuration_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("kerberos");
        let mgr = Krb5CacheManager::new(&dir);
        let uid = current_uid();
        let err = mgr
            .ensure_cache("v1", &krb_flags(uid), &ticket_secrets(uid, b"ticket"))
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::Configuration(_)));
        assert!(!dir.exists(), "cache directory must never be created");
    }

    #[tokio::test]
    async fn missing_or_malformed_ticket() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = Krb5CacheManager::new(tmp.path());
        let uid = current_uid();

        let err = mgr
            .ensure_cache("v1", &krb_flags(uid), &Secrets::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::CredentialCache(_)));

        let mut secrets = Secrets::default();
        secrets.0.insert(ccache_name(uid), "not base64!!".into());
        let err = mgr
            .ensure_cache("v1", &krb_flags(uid), &secrets)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("base64"));
    }

    #[tokio::test]
    async fn ensure_writes_cache_and_symlink() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = Krb5CacheManager::new(tmp.path());
        let uid = current_uid();

        let used = mgr
            .ensure_cache("vol-1", &krb_flags(uid), &ticket_secrets(uid, b"ticket-1"))
            .await
            .unwrap();
        assert!(used);

        let cache = mgr.volume_cache_path("vol-1");
        assert_eq!(std::fs::read(&cache).unwrap(), b"ticket-1");
        let meta = std::fs::metadata(&cache).unwrap();
        assert_eq!(meta.uid(), uid);
        assert_eq!(meta.gid(), uid);
        assert_eq!(meta.mode() & 0o777, 0o700);
        let canonical = tmp.path().join(ccache_name(uid));
        assert_eq!(std::fs::read_link(&canonical).unwrap(), cache);
    }

    #[tokio::test]
    async fn symlink_follows_latest_volume() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = Krb5CacheManager::new(tmp.path());
        let uid = current_uid();

        mgr.ensure_cache("vol-1", &krb_flags(uid), &ticket_secrets(uid, b"one"))
            .await
            .unwrap();
        mgr.ensure_cache("vol-2", &krb_flags(uid), &ticket_secrets(uid, b"two"))
            .await
            .unwrap();

        let canonical = tmp.path().join(ccache_name(uid));
        assert_eq!(
            std::fs::read_link(&canonical).unwrap(),
            mgr.volume_cache_path("vol-2")
        );
        assert!(mgr.volume_cache_path("vol-1").exists());

        // vol-1 no longer owns the symlink: only its file goes away.
        mgr.delete_cache("vol-1").await.unwrap();
        assert!(!mgr.volume_cache_path("vol-1").exists());
        assert_eq!(
            std::fs::read_link(&canonical).unwrap(),
            mgr.volume_cache_path("vol-2")
        );
        assert!(mgr.volume_cache_path("vol-2").exists());
    }

    #[tokio::test]
    async fn round_trip_leaves_no_trace() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = Krb5CacheManager::new(tmp.path());
        let uid = current_uid();

        // An unrelated file must survive.
        let unrelated = tmp.path().join("unrelated");
        std::fs::write(&unrelated, b"keep").unwrap();

        mgr.ensure_cache("vol-1", &krb_flags(uid), &ticket_secrets(uid, b"t"))
            .await
            .unwrap();
        // A second, stale symlink to the same file is also collected.
        let extra = tmp.path().join("krb5cc_stale");
        std::os::unix::fs::symlink(mgr.volume_cache_path("vol-1"), &extra).unwrap();

        mgr.delete_cache("vol-1").await.unwrap();

        let remaining: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(remaining, vec![std::ffi::OsString::from("unrelated")]);
    }

    #[tokio::test]
    async fn delete_without_cache_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = Krb5CacheManager::new(tmp.path());
        mgr.delete_cache("never-staged").await.unwrap();

        let mgr = Krb5CacheManager::new(tmp.path().join("missing"));
        mgr.delete_cache("v1").await.unwrap();
    }
}
