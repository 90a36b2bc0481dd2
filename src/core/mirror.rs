use reqwest::StatusCode;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::core::config::{fill_template, GappsConfig};
use crate::core::error::{Error, ErrorKind, Result, ResultExt};
use crate::core::model::Package;
use crate::core::queue::DownloadQueue;
use crate::core::scratch::ScratchFile;

/// Download attempts per artifact; a batch mirror must eventually succeed.
pub const MIRROR_RETRIES: u32 = 20;
pub const UPLOAD_CONTENT_TYPE: &str = "application/zip";
pub const UPLOAD_MAX_DAYS: &str = "7";

#[cfg(unix)]
const STORAGE_MODE: u32 = 0o755;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    NotMirrored,
    Downloaded,
    LocallyPlaced,
    RemotelyMirrored,
    Done,
}

impl fmt::Display for MirrorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MirrorState::NotMirrored => "not-mirrored",
            MirrorState::Downloaded => "downloaded",
            MirrorState::LocallyPlaced => "locally-placed",
            MirrorState::RemotelyMirrored => "remotely-mirrored",
            MirrorState::Done => "done",
        };
        f.write_str(s)
    }
}

impl Package {
    /// True when every configured tier already has a URL. With no tier
    /// configured there is nothing to do, which also counts as mirrored.
    pub fn is_mirrored(&self, cfg: &GappsConfig) -> bool {
        let local_done = cfg.local_url.is_none() || self.local_url.is_some();
        let remote_done = cfg.remote_url.is_none() || self.remote_url.is_some();
        local_done && remote_done
    }

    /// `<platform>/<date>/<name>`, the path below the local storage root.
    pub fn local_relative_path(&self) -> String {
        format!("{}/{}/{}", self.platform, self.date, self.name)
    }

    pub fn local_destination(&self, base: &Path) -> PathBuf {
        base.join(self.platform.as_str()).join(&self.date).join(&self.name)
    }

    /// Downloads the artifact and publishes it to every configured tier,
    /// filling in `local_url` / `remote_url`.
    ///
    /// Safe to call again after a failure: the download is simply repeated.
    pub async fn create_mirror(&mut self, queue: &DownloadQueue, cfg: &GappsConfig) -> Result<()> {
        if self.is_mirrored(cfg) {
            debug!(name = %self.name, "already mirrored, skipping");
            return Ok(());
        }
        if cfg.local_url.is_some() && cfg.local_path.is_none() {
            return Err(Error::new(ErrorKind::Config, "gapps.local_url requires gapps.local_path"));
        }
        debug!(name = %self.name, state = %MirrorState::NotMirrored, "mirroring package");

        let downloaded = queue
            .add_multiple(&self.origin_url, &self.md5, MIRROR_RETRIES, self.size)
            .await
            .map_err(|e| e.wrap("unable to read file body"))?;
        debug!(name = %self.name, state = %MirrorState::Downloaded, path = %downloaded.display(), "package downloaded");

        // Without local storage the download is only needed for the upload.
        let (file, _scratch) = match &cfg.local_path {
            Some(base) => {
                let placed = self
                    .place_locally(&downloaded, base)
                    .await
                    .map_err(|e| e.wrap("unable to move the file to storage"))?;
                debug!(name = %self.name, state = %MirrorState::LocallyPlaced, path = %placed.display(), "package moved");

                if let Some(tpl) = &cfg.local_url {
                    let url = fill_template(tpl, &self.local_relative_path());
                    debug!(name = %self.name, url = %url, "local url assigned");
                    self.local_url = Some(url);
                }
                (placed, None)
            }
            None => {
                debug!(name = %self.name, "temp file will be deleted");
                (downloaded.clone(), Some(ScratchFile::new(downloaded)))
            }
        };

        if let Some(tpl) = &cfg.remote_url {
            let url = self.upload(queue, tpl, &file).await?;
            debug!(name = %self.name, state = %MirrorState::RemotelyMirrored, url = %url, "file uploaded");
            self.remote_url = Some(url);
        }

        if !self.is_mirrored(cfg) {
            return Err(Error::new(ErrorKind::Local, format!("mirror of {} left a tier without url", self.name)));
        }
        debug!(name = %self.name, state = %MirrorState::Done, "mirror complete");
        Ok(())
    }

    async fn place_locally(&self, origin: &Path, base: &Path) -> Result<PathBuf> {
        let dir = base.join(self.platform.as_str()).join(&self.date);
        create_storage_dir(&dir)
            .await
            .context_kind(ErrorKind::Local, "unable to create folder")?;

        let dest = dir.join(&self.name);
        move_file(origin, &dest)
            .await
            .context_kind(ErrorKind::Local, "unable to move file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&dest, std::fs::Permissions::from_mode(STORAGE_MODE))
                .await
                .context_kind(ErrorKind::Local, "unable to set file permissions")?;
        }

        Ok(dest)
    }

    async fn upload(&self, queue: &DownloadQueue, template: &str, file: &Path) -> Result<String> {
        let target = fill_template(template, &self.name);
        let reply = queue
            .driver()
            .upload(
                &target,
                queue.driver_context(),
                file,
                &[("Content-Type", UPLOAD_CONTENT_TYPE), ("Max-Days", UPLOAD_MAX_DAYS)],
            )
            .await
            .context_kind(ErrorKind::Remote, "unable to make upload request")?;

        if reply.status != StatusCode::OK {
            return Err(Error::new(
                ErrorKind::Remote,
                format!("unable to make upload request: {}", reply.status),
            ));
        }
        if reply.body.is_empty() {
            return Err(Error::new(ErrorKind::Remote, "empty mirror response body"));
        }
        Ok(reply.body)
    }
}

async fn create_storage_dir(dir: &Path) -> io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(STORAGE_MODE);
    builder.create(dir).await
}

/// Rename, falling back to copy + remove across filesystems. A failed copy
/// leaves no partial destination behind.
async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    let rename_err = match tokio::fs::rename(from, to).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    debug!(from = %from.display(), to = %to.display(), error = %rename_err, "rename failed, copying");
    if let Err(copy_err) = tokio::fs::copy(from, to).await {
        if let Err(e) = tokio::fs::remove_file(to).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %to.display(), error = %e, "unable to remove partial copy");
            }
        }
        return Err(io::Error::new(
            copy_err.kind(),
            format!("rename failed: {rename_err}; copy failed: {copy_err}"),
        ));
    }
    tokio::fs::remove_file(from).await
}
