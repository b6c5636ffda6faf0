//! The conversion job: its status machine, its owned context, and the local
//! checks that must pass before any request goes out.

use crate::error::ConvertError;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Hard ceiling imposed by the conversion service.
pub const MAX_SOURCE_BYTES: u64 = 35 * 1024 * 1024;

/// Where the orchestrator is in the conversion lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConversionStatus {
    #[default]
    Idle,
    RefreshingToken,
    Uploading,
    ConvertingRemote,
    Downloading,
    Done,
    Failed,
}

impl ConversionStatus {
    /// A job in this status may be replaced by a new start.
    pub fn accepts_start(self) -> bool {
        matches!(
            self,
            ConversionStatus::Idle | ConversionStatus::Failed | ConversionStatus::Done
        )
    }
}

impl fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversionStatus::Idle => "Idle",
            ConversionStatus::RefreshingToken => "RefreshingToken",
            ConversionStatus::Uploading => "Uploading",
            ConversionStatus::ConvertingRemote => "ConvertingRemote",
            ConversionStatus::Downloading => "Downloading",
            ConversionStatus::Done => "Done",
            ConversionStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// A stage that can be (re-)entered, e.g. after a token refresh.
///
/// Kept apart from [`ConversionStatus`]: the status says where the job *is*,
/// this says where it should *go next*.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    Upload,
    Split,
    Download,
    UploadAndConvert,
}

impl fmt::Display for Resume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resume::Upload => "upload",
            Resume::Split => "split/convert",
            Resume::Download => "download",
            Resume::UploadAndConvert => "upload/convert",
        };
        f.write_str(s)
    }
}

/// Identifies one job within an orchestrator instance.
///
/// Replies tagged with an older id belong to a job that has already been
/// replaced and are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub const fn first() -> Self {
        Self(1)
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// A validated local presentation, read into memory.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// File name sent to the service.
    pub name: String,
    pub size: u64,
    pub bytes: Bytes,
}

/// Everything the orchestrator knows about the job in flight.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub id: JobId,
    pub source: SourceFile,
    pub destination: PathBuf,
    /// Unique storage folder created for this upload.
    pub server_folder: String,
    /// Name under which the service stored the upload. May differ from
    /// `source.name` if the service renamed it.
    pub server_file_name: String,
    /// Locators returned by the split stage, in slide order.
    pub download_queue: Vec<String>,
    /// Stage to re-enter once the pending token refresh succeeds.
    pub resume_after_token: Option<Resume>,
}

impl ConversionJob {
    pub fn new(id: JobId, source: SourceFile, destination: PathBuf) -> Self {
        Self {
            id,
            server_file_name: String::new(),
            server_folder: String::new(),
            source,
            destination,
            download_queue: Vec::new(),
            resume_after_token: None,
        }
    }
}

/// Check that `path` is a non-empty regular file no larger than `limit`
/// bytes, and read it.
pub fn validate_source(path: &Path, limit: u64) -> Result<SourceFile, ConvertError> {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConvertError::FileNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(ConvertError::Unreadable {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    if !meta.is_file() {
        return Err(ConvertError::Unreadable {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
        });
    }

    let size = meta.len();
    if size == 0 {
        return Err(ConvertError::EmptyFile {
            path: path.to_path_buf(),
        });
    }
    if size > limit {
        return Err(ConvertError::FileTooLarge {
            path: path.to_path_buf(),
            size,
            limit,
        });
    }

    let bytes = std::fs::read(path).map_err(|e| ConvertError::Unreadable {
        path: path.to_path_buf(),
        source: e,
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "presentation.pptx".to_string());

    debug!("Validated source {} ({} bytes)", path.display(), size);
    Ok(SourceFile {
        path: path.to_path_buf(),
        name,
        size,
        bytes: Bytes::from(bytes),
    })
}

/// Make sure the destination directory exists, creating it if needed.
pub fn prepare_destination(path: &Path) -> Result<PathBuf, ConvertError> {
    std::fs::create_dir_all(path).map_err(|e| ConvertError::DestinationUnavailable {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    #[test]
    fn missing_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_source(&dir.path().join("nope.pptx"), MAX_SOURCE_BYTES).unwrap_err();
        assert!(matches!(err, ConvertError::FileNotFound { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn empty_file_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = validate_source(file.path(), MAX_SOURCE_BYTES).unwrap_err();
        assert!(matches!(err, ConvertError::EmptyFile { .. }));
    }

    #[test]
    fn oversized_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 11]).unwrap();
        let err = validate_source(file.path(), 10).unwrap_err();
        assert!(matches!(err, ConvertError::FileTooLarge { size: 11, limit: 10, .. }));
    }

    #[test]
    fn file_at_limit_is_accepted() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1u8; 10]).unwrap();
        let src = validate_source(file.path(), 10).unwrap();
        assert_eq!(src.size, 10);
        assert_eq!(src.bytes.len(), 10);
    }

    #[test]
    fn directory_is_not_a_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_source(dir.path(), MAX_SOURCE_BYTES).unwrap_err();
        assert!(matches!(err, ConvertError::Unreadable { .. }));
    }

    #[test]
    fn destination_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a/b/c");
        prepare_destination(&dest).unwrap();
        assert!(dest.is_dir());
    }

    #[test]
    fn start_is_accepted_only_when_settled() {
        assert!(ConversionStatus::Idle.accepts_start());
        assert!(ConversionStatus::Failed.accepts_start());
        assert!(ConversionStatus::Done.accepts_start());
        assert!(!ConversionStatus::RefreshingToken.accepts_start());
        assert!(!ConversionStatus::Uploading.accepts_start());
        assert!(!ConversionStatus::ConvertingRemote.accepts_start());
        assert!(!ConversionStatus::Downloading.accepts_start());
    }
}
