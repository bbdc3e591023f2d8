/// Artifact download and archive extraction
use std::io::{Cursor, Read};
use std::path::{Component, Path};
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Retrieves the bytes behind a URL
///
/// Errors are plain messages; the provisioner attaches tool and URL.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, String>;
}

/// HTTP(S) fetcher driven on the tokio runtime
///
/// `file://` URLs are read from the local filesystem, which is how mirrored
/// tool archives are consumed in air-gapped CI.
pub struct HttpFetcher {
    client: reqwest::Client,
    handle: tokio::runtime::Handle,
}

impl HttpFetcher {
    /// Create a fetcher bound to `handle`
    ///
    /// `fetch` blocks on the handle, so it must be called from a thread that
    /// is not itself driving async tasks (e.g. inside `spawn_blocking`).
    pub fn new(handle: tokio::runtime::Handle, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("werk/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, handle })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, String> {
        if let Some(path) = url.strip_prefix("file://") {
            return std::fs::read(path).map_err(|e| format!("{}: {}", path, e));
        }

        let client = self.client.clone();
        let url = url.to_string();

        self.handle
            .block_on(async move {
                let response = client.get(&url).send().await?.error_for_status()?;
                let bytes = response.bytes().await?;
                Ok::<_, reqwest::Error>(bytes.to_vec())
            })
            .map_err(|e| e.to_string())
    }
}

/// Hex-encoded SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Packaging of a downloaded artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// The download is the executable itself
    Binary,
    Tar,
    TarGz,
    TarZst,
}

impl ArchiveFormat {
    /// Infer the format from the URL's file extension
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);

        if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
            ArchiveFormat::TarGz
        } else if path.ends_with(".tar.zst") || path.ends_with(".tzst") {
            ArchiveFormat::TarZst
        } else if path.ends_with(".tar") {
            ArchiveFormat::Tar
        } else {
            ArchiveFormat::Binary
        }
    }

    /// Pull exactly `entry` out of the archive
    pub fn extract(&self, bytes: &[u8], entry: &str) -> Result<Vec<u8>, String> {
        match self {
            ArchiveFormat::Binary => Ok(bytes.to_vec()),
            ArchiveFormat::Tar => extract_tar_entry(Cursor::new(bytes), entry),
            ArchiveFormat::TarGz => {
                extract_tar_entry(flate2::read::GzDecoder::new(Cursor::new(bytes)), entry)
            }
            ArchiveFormat::TarZst => {
                let decoder = zstd::stream::read::Decoder::new(Cursor::new(bytes))
                    .map_err(|e| format!("invalid zstd stream: {}", e))?;
                extract_tar_entry(decoder, entry)
            }
        }
    }
}

/// Compare archive paths ignoring `./` prefixes
fn normalized(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

fn extract_tar_entry<R: Read>(reader: R, entry: &str) -> Result<Vec<u8>, String> {
    let wanted = normalized(Path::new(entry));
    let mut archive = tar::Archive::new(reader);

    let entries = archive
        .entries()
        .map_err(|e| format!("failed to read archive: {}", e))?;

    for item in entries {
        let mut item = item.map_err(|e| format!("corrupt archive entry: {}", e))?;
        let path = item
            .path()
            .map_err(|e| format!("invalid entry path: {}", e))?
            .into_owned();

        if normalized(&path) == wanted && item.header().entry_type().is_file() {
            let mut contents = Vec::new();
            item.read_to_end(&mut contents)
                .map_err(|e| format!("failed to read {}: {}", entry, e))?;
            return Ok(contents);
        }
    }

    Err("entry not found in archive".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tar_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_format_from_url() {
        assert_eq!(
            ArchiveFormat::from_url("https://get.helm.sh/helm-v3-linux-amd64.tar.gz"),
            ArchiveFormat::TarGz
        );
        assert_eq!(ArchiveFormat::from_url("https://x/y.tgz?sig=1"), ArchiveFormat::TarGz);
        assert_eq!(ArchiveFormat::from_url("file:///m/tool.tar.zst"), ArchiveFormat::TarZst);
        assert_eq!(ArchiveFormat::from_url("https://x/tool.tar"), ArchiveFormat::Tar);
        assert_eq!(
            ArchiveFormat::from_url("https://kind.sigs.k8s.io/dl/v0.22.0/kind-linux-amd64"),
            ArchiveFormat::Binary
        );
    }

    #[test]
    fn test_extract_exact_entry_from_tar_gz() {
        let tar = tar_with(&[
            ("linux-amd64/README.md", b"docs"),
            ("linux-amd64/helm", b"helm-binary"),
        ]);
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        std::io::Write::write_all(&mut encoder, &tar).unwrap();
        let gz = encoder.finish().unwrap();

        let binary = ArchiveFormat::TarGz.extract(&gz, "linux-amd64/helm").unwrap();
        assert_eq!(binary, b"helm-binary");
    }

    #[test]
    fn test_extract_ignores_dot_prefix() {
        let tar = tar_with(&[("./bin/tool", b"tool")]);
        assert_eq!(ArchiveFormat::Tar.extract(&tar, "bin/tool").unwrap(), b"tool");
    }

    #[test]
    fn test_extract_from_tar_zst() {
        let tar = tar_with(&[("tool", b"zstd-tool")]);
        let zst = zstd::stream::encode_all(Cursor::new(tar), 3).unwrap();
        assert_eq!(ArchiveFormat::TarZst.extract(&zst, "tool").unwrap(), b"zstd-tool");
    }

    #[test]
    fn test_missing_entry() {
        let tar = tar_with(&[("other", b"x")]);
        let err = ArchiveFormat::Tar.extract(&tar, "tool").unwrap_err();
        assert!(err.contains("not found"));
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
