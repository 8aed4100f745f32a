//! Append-only audit log.
//!
//! One JSON object per line at `audit.jsonl` in the app data directory.
//! Writes are serialized by a mutex and stamp the entry with the current
//! RFC 3339 instant; reads return entries in file order and skip malformed
//! lines.

use crate::domain::response::AuditEntry;
use crate::infra::error::{SignerError, SignerResult};
use crate::infra::paths;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct AuditLog {
    file_path: PathBuf,
    lock: Mutex<()>,
}

impl AuditLog {
    /// Open the log in `dir`, creating the directory (0700) if needed.
    pub fn open(dir: &Path) -> SignerResult<Self> {
        paths::create_private_dir(dir)?;
        Ok(Self {
            file_path: dir.join("audit.jsonl"),
            lock: Mutex::new(()),
        })
    }

    /// Append one entry, stamping its timestamp.
    pub fn log(&self, mut entry: AuditEntry) -> SignerResult<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| SignerError::Io("audit lock poisoned".to_string()))?;

        entry.timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        log::debug!(
            "audit entry: requestId={} status={}",
            entry.request_id,
            entry.status
        );

        let line = serde_json::to_string(&entry)?;
        let created = !self.file_path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .map_err(|e| SignerError::Io(format!("failed to open audit file: {e}")))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .map_err(|e| SignerError::Io(format!("failed to write audit entry: {e}")))?;

        if created {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(&self.file_path, fs::Permissions::from_mode(0o600));
            }
        }
        Ok(())
    }

    /// All entries in file order; malformed lines are silently skipped.
    pub fn read_all(&self) -> SignerResult<Vec<AuditEntry>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| SignerError::Io("audit lock poisoned".to_string()))?;

        let content = match fs::read_to_string(&self.file_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SignerError::Io(format!("failed to read audit file: {e}"))),
        };

        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(request_id: &str, status: &str) -> AuditEntry {
        AuditEntry {
            timestamp: String::new(),
            request_id: request_id.to_string(),
            proposal_title: "Títol".to_string(),
            signer_name: "PAU".to_string(),
            signer_dni: "47824166J".to_string(),
            callback_host: "example.org".to_string(),
            cert_fingerprint: "ab".repeat(32),
            status: status.to_string(),
            error: String::new(),
            server_ack_id: String::new(),
        }
    }

    #[test]
    fn test_log_and_read_back_in_order() {
        let tmp = TempDir::new().unwrap();
        let audit = AuditLog::open(tmp.path()).unwrap();
        audit.log(entry("r1", "success")).unwrap();
        audit.log(entry("r2", "fail")).unwrap();

        let entries = audit.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].request_id, "r1");
        assert_eq!(entries[1].request_id, "r2");
        // Timestamps were stamped at log time.
        assert!(!entries[0].timestamp.is_empty());
        chrono::DateTime::parse_from_rfc3339(&entries[0].timestamp).unwrap();
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let audit = AuditLog::open(tmp.path()).unwrap();
        assert!(audit.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let audit = AuditLog::open(tmp.path()).unwrap();
        audit.log(entry("r1", "success")).unwrap();
        {
            let mut f = OpenOptions::new()
                .append(true)
                .open(tmp.path().join("audit.jsonl"))
                .unwrap();
            writeln!(f, "{{broken json").unwrap();
        }
        audit.log(entry("r2", "success")).unwrap();

        let entries = audit.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].request_id, "r2");
    }

    #[test]
    fn test_file_mode_is_restrictive() {
        let tmp = TempDir::new().unwrap();
        let audit = AuditLog::open(tmp.path()).unwrap();
        audit.log(entry("r1", "success")).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(tmp.path().join("audit.jsonl"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
