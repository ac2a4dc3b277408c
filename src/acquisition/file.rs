//! Proxy list file source with inline fallback

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{parse_proxy_list, Proxy, RefreshSource};

/// Reads `host:port` / `scheme://host:port` entries from a file, or from an
/// inline list when no file is available
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    path: Option<PathBuf>,
    inline: Vec<String>,
}

impl FileSource {
    pub fn new(path: Option<PathBuf>, inline: Vec<String>) -> Self {
        Self { path, inline }
    }

    pub fn is_configured(&self) -> bool {
        self.path.is_some() || !self.inline.is_empty()
    }

    /// Load the list, returning the source it actually came from
    ///
    /// A configured but missing file falls back to the inline list. A file
    /// that exists but holds no entries yields an empty list.
    pub async fn load(&self) -> Result<(RefreshSource, Vec<Proxy>)> {
        if let Some(path) = &self.path {
            match tokio::fs::read_to_string(path).await {
                Ok(content) => {
                    let proxies = parse_lines(content.lines(), RefreshSource::File);
                    debug!(path = %path.display(), count = proxies.len(), "Loaded proxy list file");
                    return Ok((RefreshSource::File, proxies));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Proxy list file not found, using inline list");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let proxies = parse_lines(self.inline.iter().map(String::as_str), RefreshSource::Inline);
        Ok((RefreshSource::Inline, proxies))
    }
}

fn parse_lines<'a, I>(lines: I, source: RefreshSource) -> Vec<Proxy>
where
    I: IntoIterator<Item = &'a str>,
{
    let (proxies, rejected) = parse_proxy_list(lines);
    for entry in rejected {
        warn!(source = %source, entry = %entry, "Skipping invalid proxy entry");
    }
    proxies
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_file_skips_comments_and_duplicates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# list").unwrap();
        writeln!(file, "1.2.3.4:8080").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "http://1.2.3.4:8080").unwrap();
        writeln!(file, "https://5.6.7.8:3128").unwrap();
        writeln!(file, "not a proxy").unwrap();

        let source = FileSource::new(Some(file.path().to_path_buf()), vec!["9.9.9.9:80".into()]);
        let (from, proxies) = source.load().await.unwrap();

        assert_eq!(from, RefreshSource::File);
        assert_eq!(
            proxies,
            vec![
                Proxy::parse("1.2.3.4:8080").unwrap(),
                Proxy::parse("https://5.6.7.8:3128").unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_inline() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(
            Some(dir.path().join("absent.txt")),
            vec!["9.9.9.9:80".into(), "9.9.9.9:80".into()],
        );

        let (from, proxies) = source.load().await.unwrap();
        assert_eq!(from, RefreshSource::Inline);
        assert_eq!(proxies, vec![Proxy::parse("9.9.9.9:80").unwrap()]);
    }

    #[tokio::test]
    async fn test_empty_file_yields_nothing() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let source = FileSource::new(Some(file.path().to_path_buf()), vec!["9.9.9.9:80".into()]);

        let (from, proxies) = source.load().await.unwrap();
        assert_eq!(from, RefreshSource::File);
        assert!(proxies.is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_source() {
        let source = FileSource::default();
        assert!(!source.is_configured());
        let (_, proxies) = source.load().await.unwrap();
        assert!(proxies.is_empty());
    }
}
