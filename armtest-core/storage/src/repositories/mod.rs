mod connections;
mod params;
mod reports;

pub use connections::ConnectionRepository;
pub use params::ParameterFileRepository;
pub use reports::{DeploymentReport, ReportEntry, ReportFormat, ReportRepository};

use std::path::Path;

use crate::error::{Result, StorageError};

/// 一次写入：目标已存在时返回 `AlreadyExists`
async fn write_once(path: &Path, content: &str) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = match options.open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(StorageError::AlreadyExists(path.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

async fn read_existing(path: &Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StorageError::NotFound(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}
