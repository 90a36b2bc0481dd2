use std::io;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// Writes out-of-order chunks into a pre-sized file.
pub struct Assembler {
    file: tokio::sync::Mutex<File>,
}

impl Assembler {
    pub async fn create(path: &Path, total_size: Option<u64>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)
            .await?;

        if let Some(sz) = total_size {
            file.set_len(sz).await?;
        }

        Ok(Self { file: tokio::sync::Mutex::new(file) })
    }

    pub async fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut f = self.file.lock().await;
        f.seek(io::SeekFrom::Start(offset)).await?;
        f.write_all(data).await?;
        Ok(())
    }

    /// Discards whatever was written and stores `data` as the whole file.
    pub async fn replace_all(&self, data: &[u8]) -> io::Result<()> {
        let mut f = self.file.lock().await;
        f.set_len(0).await?;
        f.seek(io::SeekFrom::Start(0)).await?;
        f.write_all(data).await?;
        Ok(())
    }

    pub async fn finish(&self) -> io::Result<u64> {
        let mut f = self.file.lock().await;
        f.flush().await?;
        f.sync_all().await?;
        Ok(f.metadata().await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn out_of_order_writes_land_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        let asm = Assembler::create(&path, Some(6)).await.unwrap();
        asm.write_at(3, b"def").await.unwrap();
        asm.write_at(0, b"abc").await.unwrap();
        assert_eq!(asm.finish().await.unwrap(), 6);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn replace_all_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        let asm = Assembler::create(&path, Some(10)).await.unwrap();
        asm.write_at(0, b"xx").await.unwrap();
        asm.replace_all(b"whole").await.unwrap();
        assert_eq!(asm.finish().await.unwrap(), 5);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"whole");
    }
}
