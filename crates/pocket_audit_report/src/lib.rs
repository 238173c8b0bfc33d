//! Result files for audit reports: pretty JSON plus a SHA-256 digest sidecar.
//!
//! The digest is taken over key-sorted compact JSON, so anyone holding the result
//! file can recompute it and compare with `<stem>.sha256`.

use pocket_audit::Report;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::info;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("format: {0}")]
    Format(#[from] time::error::Format),
}

#[derive(Clone, Debug)]
pub struct ResultFiles {
    pub report_path: PathBuf,
    pub digest_path: PathBuf,
    pub digest: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verification {
    pub digest: String,
    pub expected: Option<String>,
    pub matches: bool,
}

/// `<dir>/<MM-DD-YY>.json`, dated the day before `now`: a run covers the day that just ended.
pub fn default_result_path(dir: impl AsRef<Path>, now: OffsetDateTime) -> Result<PathBuf, ReportError> {
    let day = now - time::Duration::days(1);
    let name = day.format(format_description!("[month]-[day]-[year repr:last_two]"))?;
    Ok(dir.as_ref().join(format!("{name}.json")))
}

/// Sidecar path holding the digest of `report_path`.
pub fn digest_path_for(report_path: &Path) -> PathBuf {
    let stem = report_path
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned();
    report_path.with_file_name(format!("{stem}.sha256"))
}

/// Normalize JSON for hashing: sorted keys, no whitespace.
pub fn normalize_for_hash(value: &serde_json::Value) -> Result<String, ReportError> {
    Ok(serde_json::to_string(&sort_json_keys(value))?)
}

fn sort_json_keys(v: &serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::Object(m) => {
            let sorted: BTreeMap<String, serde_json::Value> = m
                .iter()
                .map(|(k, v)| (k.clone(), sort_json_keys(v)))
                .collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(sort_json_keys).collect())
        }
        other => other.clone(),
    }
}

fn digest_of_value(value: &serde_json::Value) -> Result<String, ReportError> {
    let normalized = normalize_for_hash(value)?;
    Ok(hex::encode(Sha256::digest(normalized.as_bytes())))
}

pub fn report_digest(report: &Report) -> Result<String, ReportError> {
    digest_of_value(&serde_json::to_value(report)?)
}

/// Write the report and its digest sidecar, creating parent directories.
pub fn write_report(report: &Report, path: impl AsRef<Path>) -> Result<ResultFiles, ReportError> {
    let report_path = path.as_ref().to_path_buf();
    if let Some(parent) = report_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&report_path, json)?;
    let digest = report_digest(report)?;
    let digest_path = digest_path_for(&report_path);
    std::fs::write(&digest_path, format!("{digest}\n"))?;
    info!(report = %report_path.display(), %digest, "result written");
    Ok(ResultFiles {
        report_path,
        digest_path,
        digest,
    })
}

/// Recompute the digest of a result file and compare with its sidecar, if present.
pub fn verify_report_file(path: impl AsRef<Path>) -> Result<Verification, ReportError> {
    let path = path.as_ref();
    let report: Report = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let digest = report_digest(&report)?;
    let expected = std::fs::read_to_string(digest_path_for(path))
        .ok()
        .map(|s| s.trim().to_lowercase());
    let matches = expected.as_deref() == Some(digest.as_str());
    Ok(Verification {
        digest,
        expected,
        matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pocket_audit::HeightRange;
    use tempfile::tempdir;
    use time::macros::datetime;

    fn sample() -> Report {
        let mut r = Report {
            total_relays_completed: 42,
            total_minted: -50,
            total_bad_txs: 1,
            selector: "timeline".into(),
            timeline_report: HeightRange {
                min_height: 808,
                max_height: 1000,
            },
            ..Default::default()
        };
        r.bad_tx_count_by_code.insert(10, 1);
        r
    }

    #[test]
    fn normalize_deterministic() {
        let a = serde_json::json!({"z": 1, "a": {"y": 2, "b": 3}});
        let b = serde_json::json!({"a": {"b": 3, "y": 2}, "z": 1});
        assert_eq!(normalize_for_hash(&a).unwrap(), normalize_for_hash(&b).unwrap());
    }

    #[test]
    fn digest_is_stable() {
        let d1 = report_digest(&sample()).unwrap();
        let d2 = report_digest(&sample()).unwrap();
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 64);
        let mut other = sample();
        other.total_minted = 0;
        assert_ne!(report_digest(&other).unwrap(), d1);
    }

    #[test]
    fn default_path_is_yesterday() {
        let p = default_result_path("result", datetime!(2021-01-28 03:00 UTC)).unwrap();
        assert_eq!(p, Path::new("result").join("01-27-21.json"));
    }

    #[test]
    fn write_then_verify() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("result").join("run.json");
        let files = write_report(&sample(), &path).unwrap();
        assert_eq!(files.digest_path, dir.path().join("result").join("run.sha256"));
        let v = verify_report_file(&path).unwrap();
        assert!(v.matches);
        assert_eq!(v.digest, files.digest);
    }

    #[test]
    fn tampered_report_does_not_verify() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.json");
        write_report(&sample(), &path).unwrap();
        let mut tampered = sample();
        tampered.total_relays_completed = 43;
        std::fs::write(&path, serde_json::to_string_pretty(&tampered).unwrap()).unwrap();
        let v = verify_report_file(&path).unwrap();
        assert!(!v.matches);
        assert!(v.expected.is_some());
    }

    #[test]
    fn missing_sidecar_does_not_verify() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, serde_json::to_string(&sample()).unwrap()).unwrap();
        let v = verify_report_file(&path).unwrap();
        assert!(!v.matches);
        assert_eq!(v.expected, None);
    }
}
