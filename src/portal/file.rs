//! Downloadable files and saving them to disk.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::StreamExt;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{
    CONTENT_DISPOSITION, CONTENT_LENGTH, ETAG, HeaderMap, HeaderName, LAST_MODIFIED,
};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, instrument};
use url::Url;

use super::paths::valid_filename;
use super::videostore::LessonInfo;
use crate::error::PortalError;
use crate::html::compile_static_regex;
use crate::session::{Portal, ensure_success};

static CONTENT_DISPOSITION_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"^.*filename="(.+)"$"#));

/// Chooses the local file name from the file and the server's answer.
///
/// The returned name is sanitised before use; an empty or blank name skips
/// the file.
pub type Naming = dyn Fn(&RemoteFile, &ServerMetadata) -> String + Send + Sync;

/// Naming that keeps the name the server announces.
#[must_use]
pub fn server_filename(_file: &RemoteFile, metadata: &ServerMetadata) -> String {
    metadata.filename.clone()
}

/// What kind of portal element a file comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// A document in a material folder, with the properties shown next to its link.
    Document {
        /// File type label, e.g. `pdf`.
        extension: Option<String>,
        /// Human readable size, e.g. `1 MB`.
        size: Option<String>,
    },
    /// A recorded lesson.
    Lesson(LessonInfo),
}

/// A file that can be downloaded from the portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    name: String,
    link: Url,
    location: PathBuf,
    kind: FileKind,
}

impl RemoteFile {
    /// Creates a file living in the relative directory `location`.
    #[must_use]
    pub fn new(name: impl Into<String>, link: Url, location: PathBuf, kind: FileKind) -> Self {
        Self {
            name: name.into(),
            link,
            location,
            kind,
        }
    }

    /// Name shown by the portal.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Download link.
    #[must_use]
    pub fn link(&self) -> &Url {
        &self.link
    }

    /// Relative directory of the file (its parent's location).
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Relative path of the file named after the portal name.
    #[must_use]
    pub fn relative_path(&self) -> PathBuf {
        self.location.join(valid_filename(&self.name))
    }

    /// Document or lesson properties.
    #[must_use]
    pub fn kind(&self) -> &FileKind {
        &self.kind
    }

    /// Downloads the file into `dir`.
    ///
    /// `naming` picks the file name once the response headers are known.
    /// Unless `overwrite` is set, an existing file with the same size and
    /// modification time as announced by the server is left alone.
    /// `on_bytes` is called with the length of every chunk written.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::FileNotFound`] on 403, [`PortalError::HttpStatus`]
    /// on other failures, network errors while streaming, or IO errors.
    #[instrument(skip(self, portal, naming, on_bytes), fields(file = %self.name, dir = %dir.display()))]
    pub async fn save(
        &self,
        portal: &Portal,
        dir: &Path,
        naming: &Naming,
        overwrite: bool,
        on_bytes: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<SaveOutcome, PortalError> {
        let response = portal.get(self.link.clone()).await?;
        if response.status() == StatusCode::FORBIDDEN {
            error!(url = %self.link, "file not found");
            return Err(PortalError::FileNotFound {
                url: self.link.to_string(),
            });
        }
        let response = ensure_success(response)?;
        let metadata = ServerMetadata::from_headers(response.headers(), &self.name);

        let filename = valid_filename(&naming(self, &metadata));
        if filename.trim().is_empty() {
            debug!("naming returned an empty name, skipping");
            return Ok(SaveOutcome::Skipped);
        }

        let path = dir.join(&filename);
        if !overwrite && is_up_to_date(&path, &metadata).await {
            info!(path = %path.display(), "already up to date");
            return Ok(SaveOutcome::UpToDate { path, metadata });
        }

        let tmp_path = tmp_path(&path);
        let file = File::create(&tmp_path)
            .await
            .map_err(|e| PortalError::io(&tmp_path, e))?;

        let written = stream_to_file(file, response, &tmp_path, metadata.modified, on_bytes).await;
        let bytes = match written {
            Ok(bytes) => bytes,
            Err(error) => {
                debug!(path = %tmp_path.display(), "cleaning up temporary file after error");
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(error);
            }
        };

        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| PortalError::io(&path, e))?;

        debug!(path = %path.display(), bytes, "file saved");
        Ok(SaveOutcome::Downloaded {
            path,
            bytes,
            metadata,
        })
    }
}

/// File properties announced by the server in the download response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMetadata {
    /// Name from `Content-Disposition`, or the portal name.
    pub filename: String,
    /// `Content-Length`.
    pub size: Option<u64>,
    /// `Last-Modified`.
    pub modified: Option<SystemTime>,
    /// `ETag`.
    pub etag: Option<String>,
}

impl ServerMetadata {
    /// Reads the metadata from response headers, defaulting the file name to
    /// `fallback_name`.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap, fallback_name: &str) -> Self {
        let header = |name: HeaderName| headers.get(name).and_then(|v| v.to_str().ok());

        let filename = header(CONTENT_DISPOSITION)
            .and_then(|value| CONTENT_DISPOSITION_RE.captures(value))
            .and_then(|caps| caps.get(1))
            .map_or_else(|| fallback_name.to_string(), |m| m.as_str().to_string());

        Self {
            filename,
            size: header(CONTENT_LENGTH).and_then(|v| v.trim().parse().ok()),
            modified: header(LAST_MODIFIED).and_then(|v| httpdate::parse_http_date(v).ok()),
            etag: header(ETAG).map(str::to_string),
        }
    }
}

/// Result of [`RemoteFile::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The body was written to `path`.
    Downloaded {
        /// Final file path.
        path: PathBuf,
        /// Bytes written.
        bytes: u64,
        /// Server metadata of the download.
        metadata: ServerMetadata,
    },
    /// A file with the same size and modification time already exists.
    UpToDate {
        /// Existing file path.
        path: PathBuf,
        /// Server metadata of the download.
        metadata: ServerMetadata,
    },
    /// The naming function returned an empty name.
    Skipped,
}

async fn is_up_to_date(path: &Path, metadata: &ServerMetadata) -> bool {
    let (Some(size), Some(modified)) = (metadata.size, metadata.modified) else {
        return false;
    };
    let Ok(local) = tokio::fs::metadata(path).await else {
        return false;
    };
    let local_modified = local.modified().ok().and_then(unix_seconds);
    local.len() == size && local_modified.is_some() && local_modified == unix_seconds(modified)
}

fn unix_seconds(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

async fn stream_to_file(
    file: File,
    response: reqwest::Response,
    path: &Path,
    modified: Option<SystemTime>,
    on_bytes: &(dyn Fn(u64) + Send + Sync),
) -> Result<u64, PortalError> {
    let url = response.url().to_string();
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| PortalError::request(url.as_str(), e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| PortalError::io(path, e))?;
        let len = chunk.len() as u64;
        bytes_written += len;
        on_bytes(len);
    }

    writer.flush().await.map_err(|e| PortalError::io(path, e))?;

    if let Some(modified) = modified {
        let file = writer.into_inner().into_std().await;
        file.set_modified(modified)
            .map_err(|e| PortalError::io(path, e))?;
    }

    Ok(bytes_written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use reqwest::header::HeaderValue;
    use std::time::Duration;

    fn document(name: &str) -> RemoteFile {
        RemoteFile::new(
            name,
            Url::parse("https://didattica.polito.it/pls/portal30/sviluppo.materiale.download?nod=1")
                .unwrap(),
            PathBuf::from("2023").join("Fisica I").join("Lezioni"),
            FileKind::Document {
                extension: Some("pdf".to_string()),
                size: Some("1 MB".to_string()),
            },
        )
    }

    #[test]
    fn test_metadata_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static(r#"attachment; filename="slides 01.pdf""#),
        );
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1234"));
        headers.insert(
            LAST_MODIFIED,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        headers.insert(ETAG, HeaderValue::from_static("\"abc\""));

        let metadata = ServerMetadata::from_headers(&headers, "fallback");
        assert_eq!(metadata.filename, "slides 01.pdf");
        assert_eq!(metadata.size, Some(1234));
        assert_eq!(
            metadata.modified,
            Some(UNIX_EPOCH + Duration::from_secs(1_445_412_480))
        );
        assert_eq!(metadata.etag.as_deref(), Some("\"abc\""));
    }

    #[test]
    fn test_metadata_defaults_to_portal_name() {
        let metadata = ServerMetadata::from_headers(&HeaderMap::new(), "Lezione 1");
        assert_eq!(metadata.filename, "Lezione 1");
        assert_eq!(metadata.size, None);
        assert_eq!(metadata.modified, None);
        assert_eq!(metadata.etag, None);
    }

    #[test]
    fn test_metadata_ignores_unquoted_disposition() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=plain.pdf"),
        );
        let metadata = ServerMetadata::from_headers(&headers, "fallback");
        assert_eq!(metadata.filename, "fallback");
    }

    #[test]
    fn test_relative_path_sanitises_name() {
        let file = document("Esercizi: parte 1/2");
        assert_eq!(
            file.relative_path(),
            PathBuf::from("2023/Fisica I/Lezioni/Esercizi_ parte 1_2")
        );
    }

    #[test]
    fn test_server_filename_naming() {
        let file = document("Slides");
        let metadata = ServerMetadata {
            filename: "slides.pdf".to_string(),
            size: None,
            modified: None,
            etag: None,
        };
        assert_eq!(server_filename(&file, &metadata), "slides.pdf");
    }

    #[test]
    fn test_tmp_path_appends_suffix() {
        assert_eq!(
            tmp_path(Path::new("out/slides.pdf")),
            PathBuf::from("out/slides.pdf.tmp")
        );
    }

    #[tokio::test]
    async fn test_up_to_date_requires_size_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        std::fs::write(&path, b"12345").unwrap();
        let modified = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(modified)
            .unwrap();

        let mut metadata = ServerMetadata {
            filename: "a.pdf".to_string(),
            size: Some(5),
            modified: Some(modified),
            etag: None,
        };
        assert!(is_up_to_date(&path, &metadata).await);

        metadata.size = Some(6);
        assert!(!is_up_to_date(&path, &metadata).await);

        metadata.size = Some(5);
        metadata.modified = Some(modified + Duration::from_secs(1));
        assert!(!is_up_to_date(&path, &metadata).await);

        metadata.modified = None;
        assert!(!is_up_to_date(&path, &metadata).await);

        assert!(!is_up_to_date(&dir.path().join("missing"), &metadata).await);
    }

    #[test]
    fn test_up_to_date_without_server_size_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.pdf");
        std::fs::write(&path, b"").unwrap();
        let metadata = ServerMetadata {
            filename: "b.pdf".to_string(),
            size: None,
            modified: Some(SystemTime::now()),
            etag: None,
        };
        assert!(!tokio_test::block_on(is_up_to_date(&path, &metadata)));
    }
}
