//! Startup loading of block and allow list files.

use std::io::{self, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{DomainSet, ListParseError, StaticLists, parser_for_format};
use crate::config::{ListFormat, ListSource, ListsConfig};

/// Reasons a list file could not be turned into patterns.
#[derive(Debug, thiserror::Error)]
pub enum ListLoadError {
    #[error("list file {0:?} does not exist")]
    NotFound(PathBuf),

    #[error("list file {0:?} is not readable")]
    PermissionDenied(PathBuf),

    #[error("failed to read list file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed list file")]
    Parse(#[from] ListParseError),

    /// The blocking parse task panicked or was cancelled.
    #[error("list parsing task failed")]
    Join(#[from] tokio::task::JoinError),
}

impl ListLoadError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        match source.kind() {
            ErrorKind::NotFound => Self::NotFound(path),
            ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            _ => Self::Io { path, source },
        }
    }
}

/// Builds [`StaticLists`] from the files named in the configuration.
pub struct FileLoader;

impl FileLoader {
    /// Read one list file and return its raw patterns, in file order.
    ///
    /// Parsing runs on the blocking pool so a large list does not hold up
    /// a runtime worker.
    ///
    /// # Errors
    ///
    /// Fails with [`ListLoadError::NotFound`], [`ListLoadError::PermissionDenied`]
    /// or [`ListLoadError::Io`] when the file cannot be read as UTF-8 text.
    pub async fn load(path: &Path, format: ListFormat) -> Result<Vec<String>, ListLoadError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ListLoadError::from_io(path, e))?;

        let patterns = tokio::task::spawn_blocking(move || {
            parser_for_format(format).parse(&mut BufReader::new(content.as_bytes()))
        })
        .await??;

        debug!(path = ?path, ?format, patterns = patterns.len(), "list file read");
        Ok(patterns)
    }

    /// Merge several sources into one set. No sources yields an empty set.
    pub async fn load_all(sources: &[ListSource]) -> Result<DomainSet, ListLoadError> {
        let mut set = DomainSet::default();
        for source in sources {
            set.extend(Self::load(&source.path, source.format).await?);
        }
        Ok(set)
    }

    /// Load every configured block and allow list.
    ///
    /// Any unreadable source fails the whole load; the detector never runs
    /// with a partial block list.
    pub async fn load_lists(config: &ListsConfig) -> Result<StaticLists, ListLoadError> {
        let blocklist = Self::load_all(&config.blocklist).await?;
        let allowlist = Self::load_all(&config.allowlist).await?;

        info!(
            blocklist = blocklist.len(),
            allowlist = allowlist.len(),
            "domain lists loaded"
        );
        Ok(StaticLists::new(blocklist, allowlist))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lists::DomainLists;
    use std::fs;
    use tempfile::TempDir;

    fn source(dir: &TempDir, name: &str, content: &str, format: ListFormat) -> ListSource {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        ListSource { path, format }
    }

    #[tokio::test]
    async fn should_read_patterns_in_file_order() {
        let dir = TempDir::new().unwrap();
        let list = source(
            &dir,
            "block.txt",
            "# trackers\nz.example\n*.ads.example\na.example\n",
            ListFormat::Domains,
        );

        let patterns = FileLoader::load(&list.path, list.format).await.unwrap();

        assert_eq!(patterns, vec!["z.example", "*.ads.example", "a.example"]);
    }

    #[tokio::test]
    async fn should_read_hosts_file() {
        let dir = TempDir::new().unwrap();
        let list = source(
            &dir,
            "hosts",
            "127.0.0.1 localhost\n0.0.0.0 ads.example tracking.example\n",
            ListFormat::Hosts,
        );

        let patterns = FileLoader::load(&list.path, list.format).await.unwrap();

        assert_eq!(patterns, vec!["ads.example", "tracking.example"]);
    }

    #[tokio::test]
    async fn should_accept_empty_file() {
        let dir = TempDir::new().unwrap();
        let list = source(&dir, "empty.txt", "", ListFormat::Domains);

        assert!(FileLoader::load(&list.path, list.format).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_report_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.txt");

        let result = FileLoader::load(&path, ListFormat::Domains).await;

        assert!(matches!(result, Err(ListLoadError::NotFound(p)) if p == path));
    }

    #[tokio::test]
    async fn should_reject_binary_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("binary.txt");
        fs::write(&path, [0xFF, 0xFE, 0x00, 0x80]).unwrap();

        let result = FileLoader::load(&path, ListFormat::Domains).await;

        assert!(matches!(result, Err(ListLoadError::Io { .. })));
    }

    #[tokio::test]
    async fn should_merge_sources_into_lists() {
        let dir = TempDir::new().unwrap();
        let config = ListsConfig {
            blocklist: vec![
                source(&dir, "a.txt", "bad.com\n", ListFormat::Domains),
                source(&dir, "b.hosts", "0.0.0.0 worse.com\n", ListFormat::Hosts),
            ],
            allowlist: vec![source(&dir, "allow.txt", "good.com\n", ListFormat::Domains)],
        };

        let lists = FileLoader::load_lists(&config).await.unwrap();
        let block = lists
            .check_blocklist(&["bad.com", "worse.com", "good.com"])
            .unwrap();

        assert!(block["bad.com"]);
        assert!(block["worse.com"]);
        assert!(!block["good.com"]);
        assert!(lists.allowlist().contains("GOOD.com."));
    }

    #[tokio::test]
    async fn should_fail_when_any_source_is_missing() {
        let dir = TempDir::new().unwrap();
        let config = ListsConfig {
            blocklist: vec![source(&dir, "ok.txt", "bad.com\n", ListFormat::Domains)],
            allowlist: vec![ListSource {
                path: dir.path().join("missing.txt"),
                format: ListFormat::Domains,
            }],
        };

        assert!(matches!(
            FileLoader::load_lists(&config).await,
            Err(ListLoadError::NotFound(_))
        ));
    }
}
