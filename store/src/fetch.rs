//! Streaming a URL into a temp file while hashing it.
//!
//! `http(s)` URLs go through [reqwest]'s blocking client; everything else
//! is treated as a local filesystem path and read through the same
//! interface, which is what lets the registry client consume either. The
//! temp file lives under `R/tmp/` and is deleted automatically unless the
//! caller consumes it, so no error path leaves a partial download behind
//! (and the recovery sweep reaps anything a killed process left).

use pandora_archive::digest::{HashingWriter, Sha256Digest};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error for {0}: {1}")]
    Transport(String, reqwest::Error),
    #[error("transfer interrupted for {0}: {1}")]
    Transfer(String, io::Error),
    #[error("unable to read {0}: {1}")]
    Local(PathBuf, io::Error),
    #[error("unable to write temp file: {0}")]
    TempFile(io::Error),
}

/// A completed download: the temp file holding the body, and the digest
/// of every byte in it. Dropping this deletes the file; callers either
/// import it or let it go.
#[derive(Debug)]
pub struct FetchedFile {
    pub file: NamedTempFile,
    pub digest: Sha256Digest,
}

impl FetchedFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

enum Source {
    Remote(Url),
    Local(PathBuf),
}

fn classify(url: &str) -> Source {
    match Url::parse(url) {
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => Source::Remote(u),
        Ok(u) if u.scheme() == "file" => {
            Source::Local(u.to_file_path().unwrap_or_else(|_| PathBuf::from(url)))
        }
        _ => Source::Local(PathBuf::from(url)),
    }
}

/// Stream `url` into a fresh temp file under `tmp_dir`, returning the
/// file and the digest of the whole body. The digest is only ever
/// returned for a complete transfer.
pub fn fetch(tmp_dir: &Path, url: &str) -> Result<FetchedFile, FetchError> {
    let mut file = tempfile::Builder::new()
        .prefix("fetch-")
        .suffix(".part")
        .tempfile_in(tmp_dir)
        .map_err(FetchError::TempFile)?;

    let digest = {
        let mut writer = HashingWriter::new(file.as_file_mut());
        match classify(url) {
            Source::Remote(remote) => {
                debug!(%remote, "fetching");
                let mut response = reqwest::blocking::get(remote)
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| FetchError::Transport(url.to_string(), e))?;
                io::copy(&mut response, &mut writer)
                    .map_err(|e| FetchError::Transfer(url.to_string(), e))?;
            }
            Source::Local(path) => {
                debug!(path = %path.display(), "reading local source");
                let mut source =
                    File::open(&path).map_err(|e| FetchError::Local(path.clone(), e))?;
                io::copy(&mut source, &mut writer)
                    .map_err(|e| FetchError::Local(path.clone(), e))?;
            }
        }
        writer.flush().map_err(FetchError::TempFile)?;

        let (_, digest) = writer.finalize();
        digest
    };

    Ok(FetchedFile { file, digest })
}
