use crate::pipeline::types::PipelineStats;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Summary of one pipeline run, stored next to its artifact as `<artifact>.json`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunReport {
    pub input: String,
    pub output: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub frames_read: usize,
    pub frames_written: usize,
    pub frames_skipped: usize,
    pub cancelled: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunReport {
    pub fn new(
        input: &str,
        output: &Path,
        started_at: DateTime<Utc>,
        stats: PipelineStats,
        error: Option<String>,
    ) -> Self {
        Self {
            input: input.to_string(),
            output: output.to_path_buf(),
            started_at,
            finished_at: Utc::now(),
            frames_read: stats.frames_read,
            frames_written: stats.frames_written,
            frames_skipped: stats.frames_skipped,
            cancelled: stats.cancelled,
            error,
        }
    }
}

/// Creates the directory containing `output_path`. Succeeds if it already exists.
pub fn ensure_output_dir(output_path: &Path) -> io::Result<()> {
    match output_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

pub fn report_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

pub fn write_report(report: &RunReport) -> Result<PathBuf> {
    let path = report_path(&report.output);
    let content = serde_json::to_string_pretty(report)?;
    fs::write(&path, content)?;
    Ok(path)
}

pub fn read_report(artifact: &Path) -> Result<Option<RunReport>> {
    let path = report_path(artifact);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Reduces an uploaded file name to a safe single path component.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = Path::new(name).file_name()?.to_str()?;
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Input and artifact paths for an uploaded video.
pub fn upload_paths(upload_root: &Path, file_name: &str) -> (PathBuf, PathBuf) {
    (
        upload_root.join(file_name),
        upload_root.join(format!("processed_{}", file_name)),
    )
}

/// Artifact paths that a run is currently writing.
///
/// A path can be claimed by one run at a time; the claim is released when the
/// returned guard is dropped.
#[derive(Clone, Default)]
pub struct ArtifactClaims {
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

impl ArtifactClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` while another run holds `path`.
    pub fn claim(&self, path: &Path) -> Option<ArtifactClaim> {
        if !self.lock().insert(path.to_path_buf()) {
            return None;
        }
        Some(ArtifactClaim {
            claims: self.clone(),
            path: path.to_path_buf(),
        })
    }

    pub fn is_claimed(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct ArtifactClaim {
    claims: ArtifactClaims,
    path: PathBuf,
}

impl ArtifactClaim {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ArtifactClaim {
    fn drop(&mut self) {
        self.claims.lock().remove(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_output_dir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("a").join("b").join("out.mp4");
        ensure_output_dir(&output).unwrap();
        assert!(dir.path().join("a").join("b").is_dir());
        ensure_output_dir(&output).unwrap();
        ensure_output_dir(Path::new("bare.mp4")).unwrap();
    }

    #[test]
    fn test_report_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("processed_site.mp4");
        let stats = PipelineStats {
            frames_read: 12,
            frames_written: 11,
            frames_skipped: 1,
            cancelled: false,
        };
        let report = RunReport::new("site.mp4", &artifact, Utc::now(), stats, None);

        let path = write_report(&report).unwrap();
        assert_eq!(path, dir.path().join("processed_site.mp4.json"));

        let loaded = read_report(&artifact).unwrap().unwrap();
        assert_eq!(loaded.frames_written, 11);
        assert_eq!(loaded.frames_skipped, 1);
        assert!(read_report(&dir.path().join("other.mp4")).unwrap().is_none());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("site cam 1.mp4").unwrap(), "site_cam_1.mp4");
        assert_eq!(sanitize_file_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_file_name(".hidden.mp4").unwrap(), "hidden.mp4");
        assert!(sanitize_file_name("..").is_none());
        assert!(sanitize_file_name("").is_none());
    }

    #[test]
    fn test_upload_paths() {
        let (input, output) = upload_paths(Path::new("static/files"), "site.mp4");
        assert_eq!(input, Path::new("static/files/site.mp4"));
        assert_eq!(output, Path::new("static/files/processed_site.mp4"));
    }

    #[test]
    fn test_artifact_claim_is_exclusive_per_path() {
        let claims = ArtifactClaims::new();
        let webcam = Path::new("static/files/webcam_output.mp4");

        let first = claims.claim(webcam).unwrap();
        assert_eq!(first.path(), webcam);
        assert!(claims.claim(webcam).is_none());
        assert!(claims
            .claim(Path::new("static/files/processed_site.mp4"))
            .is_some());

        drop(first);
        assert!(!claims.is_claimed(webcam));
        assert!(claims.claim(webcam).is_some());
    }

    #[test]
    fn test_claim_released_on_another_thread() {
        let claims = ArtifactClaims::new();
        let path = Path::new("out/processed_a.mp4");
        let claim = claims.claim(path).unwrap();

        std::thread::spawn(move || drop(claim)).join().unwrap();
        assert!(!claims.is_claimed(path));
    }
}
