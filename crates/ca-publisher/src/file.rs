//! Filesystem mirror publisher
//!
//! Writes certificates and CRLs into a directory that web servers or other
//! consumers serve as-is.
//!
//! # Write protocol
//!
//! Every data file is written to `<base>.temp` and renamed over its final
//! name, so readers never see a partial `.der` or `.b64`. The optional
//! `<base>.zip` is written directly with a single `<base>.der` entry.
//!
//! # Latest link
//!
//! `<prefix>[-delta].<ext>` is a relative symlink to the newest CRL file.
//! Rotation:
//!
//! 1. `<link>.new` is created pointing at the new file
//! 2. `<link>.old` becomes a copy of the current link
//! 3. `<link>.new` is renamed over `<link>`
//! 4. `<link>.old` is deleted
//!
//! `<link>` exists at every step. If a rotation is interrupted, the next one
//! (or [`FilePublisher::recover`]) restores `<link>` from `<link>.old` and
//! drops stale `.new` entries.

use crate::audit::{AuditSink, NullAuditSink, Operation};
use crate::config::{FileTargetConfig, RetentionConfig};
use crate::error::{PublishError, PublishReport, PublishResult};
use crate::policy::{CallContext, FailurePolicy};
use crate::publisher::{conclude, Publisher};
use ca_publish_proto::encoding::base64_lines;
use ca_publish_proto::naming::{
    cert_base_name, crl_base_name, crl_prefix, link_name, parse_crl_file_name, DATA_EXTENSIONS,
};
use ca_publish_proto::{Artifact, CertificateArtifact, CrlArtifact, TimestampZone};
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDateTime, TimeZone, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const TEMP_EXTENSION: &str = "temp";
const NEW_SUFFIX: &str = ".new";
const OLD_SUFFIX: &str = ".old";

/// Publishes artifacts as files
pub struct FilePublisher {
    audit: Arc<dyn AuditSink>,
    policy: FailurePolicy,
    link_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl Default for FilePublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl FilePublisher {
    pub fn new() -> Self {
        FilePublisher {
            audit: Arc::new(NullAuditSink),
            policy: FailurePolicy::FailClosed,
            link_locks: DashMap::new(),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn link_lock(&self, link: &Path) -> Arc<Mutex<()>> {
        self.link_locks
            .entry(link.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn write(
        &self,
        artifact: &Artifact,
        target: &FileTargetConfig,
        ctx: &CallContext,
    ) -> PublishResult<PublishReport> {
        ctx.check()?;
        if matches!(artifact, Artifact::Crl(_))
            && target.latest_link
            && !target.writes_extension(&target.link_extension)
        {
            return Err(PublishError::InvalidTarget(format!(
                "latest link points at .{} files, which target {} does not write",
                target.link_extension, target.name
            )));
        }
        let dir = Path::new(&target.directory);
        fs::create_dir_all(dir)?;

        match artifact {
            Artifact::Crl(crl) => self.write_crl(crl, dir, target, ctx),
            Artifact::Certificate(cert) => write_certificate(cert, dir, target),
            Artifact::CertificatePair(_) => Ok(PublishReport::Skipped(
                "certificate pairs are not mirrored to files".to_string(),
            )),
        }
    }

    fn write_crl(
        &self,
        crl: &CrlArtifact,
        dir: &Path,
        target: &FileTargetConfig,
        ctx: &CallContext,
    ) -> PublishResult<PublishReport> {
        let base = crl_base_name(crl, target.timezone);
        let prefix = crl_prefix(crl);
        let link = link_name(prefix, crl.is_delta(), &target.link_extension);

        let lock = self.link_lock(&dir.join(&link));
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        ctx.check()?;

        let mut written = 0;
        if target.write_der || target.zip {
            let temp = write_temp(dir, &base, crl.der())?;
            if target.zip {
                write_zip(
                    &dir.join(format!("{}.zip", base)),
                    &format!("{}.der", base),
                    crl.der(),
                    target.zip_level,
                )?;
                written += 1;
            }
            if target.write_der {
                replace(&temp, &dir.join(format!("{}.der", base)))?;
                written += 1;
            } else {
                remove_if_exists(&temp)?;
            }
        }

        if target.write_base64 {
            let temp = write_temp(dir, &base, base64_lines(crl.der()).as_bytes())?;
            replace(&temp, &dir.join(format!("{}.b64", base)))?;
            written += 1;
        }

        if target.latest_link {
            rotate_link(dir, &link, &format!("{}.{}", base, target.link_extension))?;
            debug!(link = %link, base = %base, "Rotated latest CRL link");
            written += 1;
        }

        if target.retention.is_enabled() {
            let purged = purge_crls(
                dir,
                prefix,
                crl.is_delta(),
                &target.retention,
                target.timezone,
                &[base.as_str()],
                target.latest_link.then(|| dir.join(&link)).as_deref(),
                Utc::now(),
            )?;
            if purged > 0 {
                info!(directory = %dir.display(), prefix = %prefix, purged, "Purged old CRLs");
            }
        }

        Ok(PublishReport::Applied { changes: written })
    }

    fn remove(
        &self,
        artifact: &Artifact,
        target: &FileTargetConfig,
        ctx: &CallContext,
    ) -> PublishResult<PublishReport> {
        ctx.check()?;
        let dir = Path::new(&target.directory);

        let (base, extensions): (String, &[&str]) = match artifact {
            Artifact::Crl(crl) => (crl_base_name(crl, target.timezone), &DATA_EXTENSIONS[..]),
            Artifact::Certificate(cert) => (cert_base_name(cert), &["der", "b64"][..]),
            Artifact::CertificatePair(_) => {
                return Ok(PublishReport::Skipped(
                    "certificate pairs are not mirrored to files".to_string(),
                ))
            }
        };

        let mut removed = 0;
        for ext in extensions {
            if remove_if_exists(&dir.join(format!("{}.{}", base, ext)))? {
                removed += 1;
            }
        }

        if let Artifact::Crl(crl) = artifact {
            if target.latest_link {
                let link = dir.join(link_name(crl_prefix(crl), crl.is_delta(), &target.link_extension));
                if is_present(&link) && !link.exists() {
                    warn!(link = %link.display(), "Latest CRL link now points at a removed file");
                }
            }
        }

        if removed == 0 {
            Ok(PublishReport::Unchanged)
        } else {
            Ok(PublishReport::Applied { changes: removed })
        }
    }

    /// Repair links left behind by interrupted rotations in a target directory
    ///
    /// Returns the number of links restored from `<link>.old`.
    pub fn recover(&self, target: &FileTargetConfig) -> PublishResult<usize> {
        let dir = Path::new(&target.directory);
        let mut restored = 0;

        let names = fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()?;

        for name in names {
            let link = match name
                .strip_suffix(OLD_SUFFIX)
                .or_else(|| name.strip_suffix(NEW_SUFFIX))
            {
                Some(link) => link.to_string(),
                None => continue,
            };

            let link_path = dir.join(&link);
            let lock = self.link_lock(&link_path);
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

            if recover_link(&link_path)? {
                restored += 1;
            }
            remove_if_exists(&sibling(&link_path, NEW_SUFFIX))?;
            if is_present(&link_path) {
                remove_if_exists(&sibling(&link_path, OLD_SUFFIX))?;
            }
        }

        Ok(restored)
    }
}

impl Publisher for FilePublisher {
    type Target = FileTargetConfig;

    fn name(&self) -> String {
        "file".to_string()
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    fn publish(
        &self,
        artifact: &Artifact,
        target: &FileTargetConfig,
        ctx: &CallContext,
    ) -> PublishResult<PublishReport> {
        let result = self.write(artifact, target, ctx);
        conclude(
            self.policy,
            self.audit.as_ref(),
            Operation::Publish,
            "file",
            &target.directory,
            artifact,
            result,
        )
    }

    fn unpublish(
        &self,
        artifact: &Artifact,
        target: &FileTargetConfig,
        ctx: &CallContext,
    ) -> PublishResult<PublishReport> {
        let result = self.remove(artifact, target, ctx);
        conclude(
            self.policy,
            self.audit.as_ref(),
            Operation::Unpublish,
            "file",
            &target.directory,
            artifact,
            result,
        )
    }
}

fn write_certificate(
    cert: &CertificateArtifact,
    dir: &Path,
    target: &FileTargetConfig,
) -> PublishResult<PublishReport> {
    let base = cert_base_name(cert);
    let mut written = 0;

    if target.write_der {
        let temp = write_temp(dir, &base, cert.der())?;
        replace(&temp, &dir.join(format!("{}.der", base)))?;
        written += 1;
    }
    if target.write_base64 {
        let temp = write_temp(dir, &base, base64_lines(cert.der()).as_bytes())?;
        replace(&temp, &dir.join(format!("{}.b64", base)))?;
        written += 1;
    }

    Ok(PublishReport::Applied { changes: written })
}

/// Write `<base>.temp` and flush it to disk
fn write_temp(dir: &Path, base: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    let temp = dir.join(format!("{}.{}", base, TEMP_EXTENSION));
    let mut file = File::create(&temp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(temp)
}

/// Rename `from` over `to`
///
/// Falls back to delete-then-rename where the platform refuses to rename
/// onto an existing file.
fn replace(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            remove_if_exists(to)?;
            fs::rename(from, to)
        }
        Err(e) => Err(e),
    }
}

fn write_zip(path: &Path, entry_name: &str, der: &[u8], level: u32) -> io::Result<()> {
    let options = if level == 0 {
        SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
    } else {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(level.clamp(1, 9) as i64))
    };

    let mut zip = ZipWriter::new(File::create(path)?);
    zip.start_file(entry_name, options).map_err(io::Error::other)?;
    zip.write_all(der)?;
    let file = zip.finish().map_err(io::Error::other)?;
    file.sync_all()
}

/// Point `<dir>/<link>` at `<dir>/<target_file>` without ever removing it
pub fn rotate_link(dir: &Path, link: &str, target_file: &str) -> io::Result<()> {
    let link_path = dir.join(link);
    let new_path = sibling(&link_path, NEW_SUFFIX);
    let old_path = sibling(&link_path, OLD_SUFFIX);

    if recover_link(&link_path)? {
        warn!(link = %link_path.display(), "Restored link from interrupted rotation");
    }

    remove_if_exists(&new_path)?;
    make_link(dir, target_file, &new_path)?;

    if is_present(&link_path) {
        remove_if_exists(&old_path)?;
        copy_link(dir, &link_path, &old_path)?;
    }

    replace(&new_path, &link_path)?;
    remove_if_exists(&old_path)?;
    Ok(())
}

/// Restore `<link>` from `<link>.old` when the link itself is missing
fn recover_link(link_path: &Path) -> io::Result<bool> {
    let old_path = sibling(link_path, OLD_SUFFIX);
    if !is_present(link_path) && is_present(&old_path) {
        fs::rename(&old_path, link_path)?;
        return Ok(true);
    }
    Ok(false)
}

#[cfg(unix)]
fn make_link(_dir: &Path, target_file: &str, at: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target_file, at)
}

#[cfg(not(unix))]
fn make_link(dir: &Path, target_file: &str, at: &Path) -> io::Result<()> {
    fs::copy(dir.join(target_file), at).map(|_| ())
}

fn copy_link(dir: &Path, from: &Path, to: &Path) -> io::Result<()> {
    if fs::symlink_metadata(from)?.file_type().is_symlink() {
        let target = fs::read_link(from)?;
        make_link(dir, &target.to_string_lossy(), to)
    } else {
        fs::copy(from, to).map(|_| ())
    }
}

/// File name the link currently points at
fn link_target_name(link_path: &Path) -> Option<String> {
    let target = fs::read_link(link_path).ok()?;
    target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Whether a directory entry exists, without following symlinks
fn is_present(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove CRL generations beyond the retention limits
///
/// Generations are grouped by base name; all data files of a purged
/// generation go together. `keep` and the file the link resolves to are never
/// purged.
#[allow(clippy::too_many_arguments)]
fn purge_crls(
    dir: &Path,
    prefix: &str,
    delta: bool,
    retention: &RetentionConfig,
    zone: TimestampZone,
    keep: &[&str],
    link: Option<&Path>,
    now: DateTime<Utc>,
) -> io::Result<usize> {
    // base name -> timestamp
    let mut generations: BTreeMap<String, String> = BTreeMap::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if let Some(parsed) = parse_crl_file_name(&name) {
            if parsed.prefix == prefix && parsed.delta == delta {
                generations.insert(parsed.base_name(), parsed.timestamp.clone());
            }
        }
    }

    let linked = link
        .and_then(link_target_name)
        .and_then(|name| parse_crl_file_name(&name).map(|p| p.base_name()));

    let mut ordered: Vec<(String, String)> = generations.into_iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1));

    let limit = if delta {
        retention.max_delta_crls
    } else {
        retention.max_full_crls
    };
    let cutoff = retention
        .max_age_hours
        .map(|hours| now - ChronoDuration::hours(hours as i64));

    let mut purged = 0;
    for (index, (base, timestamp)) in ordered.iter().enumerate() {
        if keep.contains(&base.as_str()) || linked.as_deref() == Some(base.as_str()) {
            continue;
        }
        let over_limit = limit.is_some_and(|max| index >= max);
        let too_old = match (cutoff, parse_timestamp(timestamp, zone)) {
            (Some(cutoff), Some(ts)) => ts < cutoff,
            _ => false,
        };
        if !(over_limit || too_old) {
            continue;
        }

        for ext in DATA_EXTENSIONS {
            remove_if_exists(&dir.join(format!("{}.{}", base, ext)))?;
        }
        debug!(base = %base, "Purged CRL generation");
        purged += 1;
    }
    Ok(purged)
}

fn parse_timestamp(timestamp: &str, zone: TimestampZone) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(timestamp, "%Y%m%d-%H%M%S").ok()?;
    match zone {
        TimestampZone::Utc => Some(naive.and_utc()),
        TimestampZone::Local => Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}
