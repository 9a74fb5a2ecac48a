use std::path::Path;
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{IngestError, Result};

const SUPPORTED_EXTENSIONS: [&str; 2] = ["txt", "md"];

pub struct FileReader;

impl FileReader {
    pub async fn read_file(path: &Path) -> Result<String> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        if !SUPPORTED_EXTENSIONS.contains(&extension) {
            return Err(IngestError::UnsupportedFormat(extension.to_string()));
        }

        fs::read_to_string(path).await.map_err(|source| IngestError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Read every supported file below `dir`, sorted by path
    pub async fn read_directory(dir: &Path) -> Result<Vec<(String, String)>> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            let supported = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext));

            if entry.file_type().is_file() && supported {
                paths.push(path.to_path_buf());
            }
        }

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let content = Self::read_file(&path).await?;
            debug!(path = %path.display(), bytes = content.len(), "Read document");
            files.push((path.to_string_lossy().to_string(), content));
        }

        Ok(files)
    }
}
