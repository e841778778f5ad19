use std::{
    io::{Cursor, Read, Write},
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use tokio::{fs, process::Command};
use xz2::read::XzDecoder;
use zip::ZipArchive;

use crate::error::ProvisionError;

const WINDOWS_ARCHIVE_URL: &str = "https://www.gyan.dev/ffmpeg/builds/ffmpeg-release-essentials.zip";
const MACOS_ARCHIVE_URL: &str = "https://evermeet.cx/ffmpeg/getrelease/zip";
const LINUX_ARCHIVE_URL: &str =
    "https://johnvansickle.com/ffmpeg/releases/ffmpeg-release-amd64-static.tar.xz";

/// File name of the ffmpeg executable on this platform.
pub fn binary_name() -> &'static str {
    if cfg!(target_os = "windows") { "ffmpeg.exe" } else { "ffmpeg" }
}

/// Known-good release archive for this platform.
pub fn default_archive_url() -> &'static str {
    if cfg!(target_os = "windows") {
        WINDOWS_ARCHIVE_URL
    } else if cfg!(target_os = "macos") {
        MACOS_ARCHIVE_URL
    } else {
        LINUX_ARCHIVE_URL
    }
}

/// Makes sure an external binary is available before a download runs.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Returns the binary path inside `target_directory`, installing it first
    /// if needed. Cheap and offline when the binary is already there.
    async fn ensure_binary_present(&self, target_directory: &Path) -> Result<PathBuf, ProvisionError>;
}

/// Downloads archive bytes. Split out so installs can be tested offline.
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ProvisionError>;
}

#[derive(Clone, Debug, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[async_trait]
impl ArchiveFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ProvisionError> {
        log::info!("downloading {url}");
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            log::error!("download of {url} failed: HTTP status {}", response.status());
            return Err(ProvisionError::Http(response.status()));
        }
        let bytes = response.bytes().await?;
        log::info!("downloaded {} bytes from {url}", bytes.len());
        Ok(bytes.to_vec())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarXz,
}

impl ArchiveKind {
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.ends_with(".tar.xz") || path.ends_with(".txz") {
            ArchiveKind::TarXz
        } else {
            ArchiveKind::Zip
        }
    }
}

/// Installs ffmpeg from a release archive into a target directory.
pub struct FfmpegProvisioner<F = HttpFetcher> {
    fetcher: F,
    archive_url: String,
    probe: bool,
}

impl FfmpegProvisioner<HttpFetcher> {
    pub fn new(archive_url: impl Into<String>) -> Self {
        Self::with_fetcher(HttpFetcher::default(), archive_url)
    }
}

impl<F: ArchiveFetcher> FfmpegProvisioner<F> {
    pub fn with_fetcher(fetcher: F, archive_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            archive_url: archive_url.into(),
            probe: false,
        }
    }

    /// Also run `ffmpeg -version` before handing the path out.
    pub fn probe_version(mut self, probe: bool) -> Self {
        self.probe = probe;
        self
    }

    async fn install(&self, target_directory: &Path, target: &Path) -> Result<(), ProvisionError> {
        fs::create_dir_all(target_directory)
            .await
            .map_err(ProvisionError::io(target_directory))?;

        let archive = self.fetcher.fetch(&self.archive_url).await?;
        let kind = ArchiveKind::from_url(&self.archive_url);
        let directory = target_directory.to_path_buf();
        let destination = target.to_path_buf();
        tokio::task::spawn_blocking(move || install_from_archive(&archive, kind, &directory, &destination))
            .await
            .map_err(|e| ProvisionError::Unpack(std::io::Error::other(e)))??;
        log::info!("ffmpeg installed to {}", target.display());
        Ok(())
    }
}

#[async_trait]
impl<F: ArchiveFetcher> Provisioner for FfmpegProvisioner<F> {
    async fn ensure_binary_present(&self, target_directory: &Path) -> Result<PathBuf, ProvisionError> {
        let target = target_directory.join(binary_name());
        if fs::try_exists(&target).await.unwrap_or(false) {
            log::debug!("ffmpeg already present at {}", target.display());
        } else {
            log::info!("ffmpeg not found in {}, installing", target_directory.display());
            self.install(target_directory, &target).await?;
        }
        if self.probe {
            probe(&target).await?;
        }
        Ok(target)
    }
}

async fn probe(binary: &Path) -> Result<(), ProvisionError> {
    let probe_error = |reason: String| ProvisionError::Probe {
        path: binary.to_path_buf(),
        reason,
    };
    let output = Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| probe_error(e.to_string()))?;
    if !output.status.success() {
        return Err(probe_error(format!("`-version` exited with {}", output.status)));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    log::info!("{}", stdout.lines().next().unwrap_or("ffmpeg responded to -version"));
    Ok(())
}

/// Extracts ffmpeg and moves it to `target` in one rename.
///
/// Each call stages into its own uniquely named `.part` file, so concurrent
/// installs into the same directory never write the same file. A failure
/// before the rename leaves nothing at `target`.
fn install_from_archive(
    archive: &[u8],
    kind: ArchiveKind,
    directory: &Path,
    target: &Path,
) -> Result<(), ProvisionError> {
    let name = binary_name();
    let binary = extract_binary(archive, kind, name)?;

    let mut staging = tempfile::Builder::new()
        .prefix(name)
        .suffix(".part")
        .tempfile_in(directory)
        .map_err(ProvisionError::io(directory))?;
    staging
        .write_all(&binary)
        .map_err(ProvisionError::io(staging.path()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        staging
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o755))
            .map_err(ProvisionError::io(staging.path()))?;
    }
    staging
        .persist(target)
        .map_err(|e| ProvisionError::io(target)(e.error))?;
    Ok(())
}

/// Pulls the named binary out of an in-memory archive.
pub fn extract_binary(archive: &[u8], kind: ArchiveKind, name: &str) -> Result<Vec<u8>, ProvisionError> {
    match kind {
        ArchiveKind::Zip => extract_from_zip(archive, name),
        ArchiveKind::TarXz => extract_from_tar_xz(archive, name),
    }
}

fn extract_from_zip(archive: &[u8], name: &str) -> Result<Vec<u8>, ProvisionError> {
    let mut zip = ZipArchive::new(Cursor::new(archive))?;
    let entries: Vec<String> = zip.file_names().map(str::to_owned).collect();
    let chosen = select_entry(entries.iter().map(String::as_str), name)
        .ok_or_else(|| ProvisionError::BinaryNotInArchive(name.to_owned()))?;

    let mut file = zip.by_name(chosen)?;
    let mut binary = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut binary).map_err(ProvisionError::Unpack)?;
    log::info!("extracted {chosen} ({} bytes)", binary.len());
    Ok(binary)
}

fn extract_from_tar_xz(archive: &[u8], name: &str) -> Result<Vec<u8>, ProvisionError> {
    let mut tar = tar::Archive::new(XzDecoder::new(Cursor::new(archive)));
    for entry in tar.entries().map_err(ProvisionError::Unpack)? {
        let mut entry = entry.map_err(ProvisionError::Unpack)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().map_err(ProvisionError::Unpack)?.to_string_lossy().into_owned();
        if file_name(&path) != name {
            continue;
        }
        let mut binary = Vec::new();
        entry.read_to_end(&mut binary).map_err(ProvisionError::Unpack)?;
        log::info!("extracted {path} ({} bytes)", binary.len());
        return Ok(binary);
    }
    Err(ProvisionError::BinaryNotInArchive(name.to_owned()))
}

fn file_name(entry: &str) -> &str {
    entry.rsplit(['/', '\\']).next().unwrap_or(entry)
}

/// Picks the archive entry holding `name`, preferring one under a `bin/` folder.
fn select_entry<'a>(entries: impl Iterator<Item = &'a str>, name: &str) -> Option<&'a str> {
    let mut fallback = None;
    for entry in entries.filter(|e| file_name(e) == name) {
        let in_bin = entry.split(['/', '\\']).rev().nth(1) == Some("bin");
        if in_bin {
            return Some(entry);
        }
        fallback.get_or_insert(entry);
    }
    fallback
}
