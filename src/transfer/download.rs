use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::RemoteFile;
use super::helpers::remote_basename;
use super::session::ConnectionManager;
use crate::error::SyncError;

/// Scratch file next to the destination. Removed on drop unless committed, so
/// a failed or retried transfer never leaves a partial file behind.
pub(crate) struct PartFile {
    tmp: PathBuf,
    dest: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl PartFile {
    pub(crate) fn create(dest: &Path) -> Result<Self, SyncError> {
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        let name = dest.file_name().and_then(|n| n.to_str()).unwrap_or("download");
        let tmp = parent.join(format!(".{}.ftpsync.part.{}", name, std::process::id()));
        let file = File::create(&tmp).map_err(|e| SyncError::local_io(&tmp, e))?;
        Ok(Self { tmp, dest: dest.to_path_buf(), writer: Some(BufWriter::new(file)) })
    }

    pub(crate) fn writer(&mut self) -> &mut dyn Write {
        match self.writer.as_mut() {
            Some(w) => w,
            None => unreachable!("part file writer taken before commit"),
        }
    }

    /// Flush, fsync and rename over the destination.
    pub(crate) fn commit(mut self) -> Result<(), SyncError> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let file = writer.into_inner().map_err(|e| SyncError::local_io(&self.tmp, e.error()))?;
        file.sync_all().map_err(|e| SyncError::local_io(&self.tmp, e))?;
        drop(file);
        std::fs::rename(&self.tmp, &self.dest).map_err(|e| SyncError::local_io(&self.dest, e))?;
        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        // commit() renames the file away; anything left here is partial
        self.writer.take();
        if self.tmp.exists()
            && let Err(e) = std::fs::remove_file(&self.tmp)
        {
            tracing::debug!(path = %self.tmp.display(), error = %e, "cannot remove part file");
        }
    }
}

/// Local destination of a remote file: `target_dir/<basename>`.
pub fn local_target(target_dir: &Path, remote: &RemoteFile) -> Result<PathBuf, SyncError> {
    let name = remote_basename(&remote.filepath);
    if name.is_empty() || name == "." || name == ".." {
        return Err(SyncError::LocalIo {
            path: remote.filepath.clone(),
            message: "remote path has no file name".to_string(),
        });
    }
    Ok(target_dir.join(name))
}

/// Stream one remote file into `target_dir`, reconnecting once on a dropped
/// connection. Returns the number of bytes written.
pub fn download_file(
    manager: &mut ConnectionManager,
    target_dir: &Path,
    remote: &RemoteFile,
) -> Result<u64, SyncError> {
    let dest = local_target(target_dir, remote)?;
    std::fs::create_dir_all(target_dir).map_err(|e| SyncError::local_io(target_dir, e))?;
    manager.with_reconnect("retr", |sess| {
        let mut part = PartFile::create(&dest)?;
        let mut sink = TrackedWriter::new(part.writer());
        let fetched = sess.retrieve(&remote.filepath, &mut sink);
        if let Some(local) = sink.failure.take() {
            return Err(SyncError::local_io(&dest, local));
        }
        let bytes = fetched?;
        part.commit()?;
        Ok(bytes)
    })
}

/// Remembers the first local write error so it is not mistaken for a remote one.
struct TrackedWriter<'a> {
    inner: &'a mut dyn Write,
    failure: Option<std::io::Error>,
}

impl<'a> TrackedWriter<'a> {
    fn new(inner: &'a mut dyn Write) -> Self {
        Self { inner, failure: None }
    }

    fn track<T>(&mut self, res: std::io::Result<T>) -> std::io::Result<T> {
        if let Err(e) = &res
            && self.failure.is_none()
        {
            self.failure = Some(std::io::Error::new(e.kind(), e.to_string()));
        }
        res
    }
}

impl Write for TrackedWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let res = self.inner.write(buf);
        self.track(res)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let res = self.inner.flush();
        self.track(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn committed_part_file_replaces_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.csv");
        std::fs::write(&dest, b"old").unwrap();
        let mut part = PartFile::create(&dest).unwrap();
        part.writer().write_all(b"new contents").unwrap();
        part.commit().unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"new contents");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn dropped_part_file_is_removed_and_destination_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.csv");
        std::fs::write(&dest, b"old").unwrap();
        {
            let mut part = PartFile::create(&dest).unwrap();
            part.writer().write_all(b"partial").unwrap();
        }
        assert_eq!(std::fs::read(&dest).unwrap(), b"old");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("no space left on device"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn tracked_writer_keeps_the_local_error() {
        let mut disk = FullDisk;
        let mut sink = TrackedWriter::new(&mut disk);
        assert!(sink.write_all(b"abc").is_err());
        let err = sink.failure.take().unwrap();
        assert!(err.to_string().contains("no space left"));

        let mut buf = Vec::new();
        let mut ok = TrackedWriter::new(&mut buf);
        ok.write_all(b"abc").unwrap();
        assert!(ok.failure.is_none());
    }

    #[test]
    fn local_target_flattens_remote_directories() {
        let f = RemoteFile {
            filepath: "/data/sub/b.csv".into(),
            last_modified: Utc::now(),
            modified_known: true,
        };
        assert_eq!(local_target(Path::new("out"), &f).unwrap(), Path::new("out").join("b.csv"));
        let bad = RemoteFile { filepath: "/".into(), ..f };
        assert!(local_target(Path::new("out"), &bad).is_err());
    }
}
