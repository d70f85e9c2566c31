use std::io::{self, BufReader, Seek, SeekFrom};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Raw lines of one DATA transaction, kept in an anonymous temporary file.
///
/// The file is unlinked as soon as it is created, so dropping the spool
/// (or the reader it turns into) releases the storage on every path.
pub struct Spool {
    file: File,
    len: u64,
}

impl Spool {
    pub async fn create() -> io::Result<Self> {
        let file = tokio::task::spawn_blocking(tempfile::tempfile)
            .await
            .map_err(io::Error::other)??;
        Ok(Self {
            file: File::from_std(file),
            len: 0,
        })
    }

    /// Appends one line exactly as received, terminator included.
    pub async fn append(&mut self, line: &[u8]) -> io::Result<()> {
        self.file.write_all(line).await?;
        self.len += line.len() as u64;
        Ok(())
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    /// Pushes buffered lines to the file so write errors surface now.
    pub async fn flush(&mut self) -> io::Result<()> {
        self.file.flush().await
    }

    #[cfg(test)]
    pub(crate) fn from_std(file: std::fs::File) -> Self {
        Self {
            file: File::from_std(file),
            len: 0,
        }
    }

    /// Flushes the spool and rewinds it for a blocking reader.
    pub async fn into_reader(mut self) -> io::Result<BufReader<std::fs::File>> {
        self.file.flush().await?;
        let mut file = self.file.into_std().await;
        file.seek(SeekFrom::Start(0))?;
        Ok(BufReader::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[tokio::test]
    async fn replays_appended_lines() {
        let mut spool = Spool::create().await.unwrap();
        assert_eq!(spool.len(), 0);
        spool.append(b"Subject: scan\r\n").await.unwrap();
        spool.append(b"\r\n").await.unwrap();
        assert_eq!(spool.len(), 17);

        let mut contents = String::new();
        spool.into_reader().await.unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "Subject: scan\r\n\r\n");
    }
}
