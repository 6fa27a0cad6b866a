//! Append-only audit records for token grants and denials.
//!
//! Records are one JSON object per line, appended to a per-user file inside
//! the `0700` runtime directory. Appends are best-effort: a failed or short
//! write is reported to standard error and dropped, never surfaced to the
//! request path.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Which tier of token a request asked for.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Dev,
    Prod,
}

/// The final outcome of a token request.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Granted,
    Denied,
    Error,
    RateLimited,
}

/// One audit event. Totally ordered by append; duplicates are permitted.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// RFC-3339, UTC.
    pub timestamp: String,
    pub endpoint: String,
    pub level: AuditLevel,
    pub result: AuditResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    pub fn new(
        endpoint: impl Into<String>,
        level: AuditLevel,
        result: AuditResult,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            endpoint: endpoint.into(),
            level,
            result,
            email: None,
            error: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Best-effort sink for [`AuditRecord`]s.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Appends records to `<runtime_dir>/audit.log`, one JSON line each.
///
/// The file is shared by append among concurrent gate invocations of the
/// same user; per-line atomicity is all we rely on.
pub struct FileAuditSink {
    path: PathBuf,
}

impl FileAuditSink {
    /// `dir` must be the user-private runtime directory; it is created with
    /// mode `0700` if missing.
    pub fn new(dir: &Path) -> anyhow::Result<Self> {
        crate::rundir::ensure_private_dir(dir)?;
        Ok(Self {
            path: crate::rundir::audit_log_path(dir),
        })
    }

    fn try_append(&self, record: &AuditRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_string(record).map_err(|err| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, err)
        })?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        // Tokens never appear in records, but grant history is still
        // user-private.
        let _ = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600));
        file.write_all(line.as_bytes())
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, record: AuditRecord) {
        if let Err(err) = self.try_append(&record) {
            eprintln!(
                "gated: failed to append audit record to {}: {err}",
                self.path.display()
            );
        }
    }
}

/// An in-memory sink for tests.
#[cfg(any(test, feature = "test-utils"))]
pub struct MemAuditSink {
    records: std::sync::Mutex<Vec<AuditRecord>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MemAuditSink {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            records: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl AuditSink for MemAuditSink {
    fn record(&self, record: AuditRecord) {
        self.records.lock().unwrap().push(record);
    }
}

#[cfg(test)]
mod test {
    use std::os::unix::fs::MetadataExt;

    use super::*;

    #[test]
    fn record_serializes_without_empty_options() {
        let record = AuditRecord::new("/token", AuditLevel::Dev, AuditResult::Granted);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""level":"dev""#));
        assert!(json.contains(r#""result":"granted""#));
        assert!(!json.contains("email"));
        assert!(!json.contains("error"));

        let record = AuditRecord::new(
            "/token?level=prod",
            AuditLevel::Prod,
            AuditResult::RateLimited,
        )
        .with_email("eng@ex.com")
        .with_error("already pending");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""result":"rate_limited""#));
        assert!(json.contains(r#""email":"eng@ex.com""#));
    }

    #[test]
    fn file_sink_appends_one_line_per_record() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = FileAuditSink::new(tmp.path()).unwrap();

        sink.record(AuditRecord::new("/token", AuditLevel::Dev, AuditResult::Granted));
        sink.record(
            AuditRecord::new("/token?level=prod", AuditLevel::Prod, AuditResult::Denied)
                .with_email("eng@ex.com"),
        );

        let path = crate::rundir::audit_log_path(tmp.path());
        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: AuditRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.result, AuditResult::Granted);
        let second: AuditRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.email.as_deref(), Some("eng@ex.com"));

        assert_eq!(fs::metadata(&path).unwrap().mode() & 0o777, 0o600);
    }
}
