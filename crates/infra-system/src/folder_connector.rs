// Folder source connector
// Lists regular files under a directory in lexicographic path order

use async_trait::async_trait;
use docflow_core::domain::{Candidate, SourceConfig};
use docflow_core::port::{ScanBatch, SourceConnector, SourceError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Continuation token = last path returned; the next batch starts after it
#[derive(Debug, Default, Clone)]
pub struct FolderConnector;

impl FolderConnector {
    pub fn new() -> Self {
        Self
    }
}

fn io_error(path: &Path, err: std::io::Error) -> SourceError {
    match err.kind() {
        ErrorKind::PermissionDenied => {
            SourceError::Auth(format!("permission denied: {}", path.display()))
        }
        ErrorKind::NotFound => {
            SourceError::Config(format!("folder does not exist: {}", path.display()))
        }
        _ => SourceError::Unavailable(format!("{}: {}", path.display(), err)),
    }
}

fn matches_type(path: &Path, file_types: &[String]) -> bool {
    if file_types.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            file_types
                .iter()
                .any(|t| t.trim_start_matches('.').eq_ignore_ascii_case(&ext))
        })
        .unwrap_or(false)
}

/// Every matching regular file below `root`, sorted
async fn list_files(
    root: &Path,
    recursive: bool,
    file_types: &[String],
) -> Result<Vec<(PathBuf, u64)>, SourceError> {
    let meta = tokio::fs::metadata(root)
        .await
        .map_err(|e| io_error(root, e))?;
    if !meta.is_dir() {
        return Err(SourceError::Config(format!(
            "not a directory: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
            let path = entry.path();
            // Follows symlinks; broken links are skipped
            let Ok(meta) = tokio::fs::metadata(&path).await else {
                continue;
            };
            if meta.is_dir() {
                if recursive {
                    pending.push(path);
                }
            } else if meta.is_file() && matches_type(&path, file_types) {
                files.push((path, meta.len()));
            }
        }
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

#[async_trait]
impl SourceConnector for FolderConnector {
    async fn scan(
        &self,
        source: &SourceConfig,
        token: Option<&str>,
        limit: u32,
    ) -> Result<ScanBatch, SourceError> {
        let SourceConfig::Folder {
            path,
            recursive,
            file_types,
        } = source
        else {
            return Err(SourceError::Config(format!(
                "folder connector cannot scan '{}' sources",
                source.kind()
            )));
        };

        let files = list_files(Path::new(path), *recursive, file_types).await?;
        let after = token.map(PathBuf::from);
        let remaining: Vec<&(PathBuf, u64)> = files
            .iter()
            .filter(|(p, _)| after.as_ref().map_or(true, |a| p > a))
            .collect();

        let take = (limit as usize).max(1);
        let exhausted = remaining.len() <= take;
        let candidates: Vec<Candidate> = remaining
            .into_iter()
            .take(take)
            .map(|(p, len)| Candidate {
                size_bytes: i64::try_from(*len).ok(),
                ..Candidate::new(p.to_string_lossy())
            })
            .collect();

        debug!(
            folder = %path,
            found = candidates.len(),
            exhausted,
            "Folder scanned"
        );

        let next_token = candidates
            .last()
            .map(|c| c.source_ref.clone())
            .or_else(|| token.map(str::to_string));
        Ok(ScanBatch {
            candidates,
            next_token,
            exhausted,
        })
    }
}
