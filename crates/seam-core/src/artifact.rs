// Bundled load-time agent artifact and its publication to the build output.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Agent artifact bytes bundled into the library at compile time
pub static AGENT_ARTIFACT: &[u8] = include_bytes!("../assets/seam-agent.bin");

/// Where a build session stands with the agent artifact
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PublicationState {
    #[default]
    Pending,
    Published(PathBuf),
    Failed,
}

impl PublicationState {
    pub fn is_published(&self) -> bool {
        matches!(self, PublicationState::Published(_))
    }

    pub fn published_path(&self) -> Option<&Path> {
        match self {
            PublicationState::Published(path) => Some(path.as_path()),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("agent artifact '{name}' is empty; nothing was published")]
    Empty { name: String },

    #[error("could not publish agent artifact to {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Write `bytes` verbatim to `dir/name`, creating `dir` as needed
pub fn publish(bytes: &[u8], dir: &Path, name: &str) -> Result<PathBuf, ArtifactError> {
    if bytes.is_empty() {
        return Err(ArtifactError::Empty {
            name: name.to_string(),
        });
    }
    let path = dir.join(name);
    let io = |source| ArtifactError::Io {
        path: path.clone(),
        source,
    };
    fs::create_dir_all(dir).map_err(io)?;
    fs::write(&path, bytes).map_err(io)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_artifact_is_not_empty() {
        assert!(!AGENT_ARTIFACT.is_empty());
    }

    #[test]
    fn test_publish_writes_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = publish(b"\x00agent\xff", &dir.path().join("out"), "a.agent").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"\x00agent\xff");
    }

    #[test]
    fn test_publish_refuses_empty_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let err = publish(b"", dir.path(), "a.agent").unwrap_err();
        assert!(matches!(err, ArtifactError::Empty { .. }));
        assert!(!dir.path().join("a.agent").exists());
    }

    #[test]
    fn test_publish_reports_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        // a regular file where the output directory should be
        let err = publish(b"bytes", &blocker, "a.agent").unwrap_err();
        assert!(matches!(err, ArtifactError::Io { .. }));
        assert!(err.to_string().contains("a.agent"));
    }
}
