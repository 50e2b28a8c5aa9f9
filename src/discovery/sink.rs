use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::autodiscovery::DiscoveredFeed;

/// Record layout of the discovery output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One feed URL per line.
    #[default]
    Plain,
    /// One JSON object per line with type, url, title and page.
    Extended,
}

/// Append-only destination for discovered feeds, shared by all workers.
///
/// Each record is written with a single call under the lock so lines from
/// different workers never interleave.
#[derive(Debug)]
pub struct DiscoverySink {
    path: PathBuf,
    format: OutputFormat,
    file: Mutex<File>,
}

impl DiscoverySink {
    /// Opens `path` for appending, creating it if needed.
    pub async fn open(path: impl AsRef<Path>, format: OutputFormat) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            format,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, feed: &DiscoveredFeed) -> std::io::Result<()> {
        let mut line = match self.format {
            OutputFormat::Plain => feed.feed_url.clone(),
            OutputFormat::Extended => serde_json::to_string(feed)?,
        };
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
