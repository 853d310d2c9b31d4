use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::Path,
};

/// Destination of a connection's payload.
pub trait Sink {
    /// Append the bytes to the end of the file at `path`.
    fn append(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
}

/// File sink
///
/// Every call opens the file in append mode, creating it if needed, writes
/// the chunk and closes the file again. No handle survives between calls, so
/// each chunk is on disk once `append` returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSink;

impl Sink for FileSink {
    fn append(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).create(true).open(path)?;
        file.write_all(bytes)?;
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use rand::Rng;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "ingest-sink-{}-{name}",
            rand::rng().random::<u64>()
        ))
    }

    #[test]
    fn append_creates_and_accumulates() -> anyhow::Result<()> {
        let path = scratch_path("accumulate.bin");

        FileSink.append(&path, b"hello")?;
        FileSink.append(&path, b"")?;
        FileSink.append(&path, b" world")?;

        assert_eq!(fs::read(&path)?, b"hello world");

        fs::remove_file(&path)?;
        Ok(())
    }

    #[test]
    fn append_keeps_existing_content() -> anyhow::Result<()> {
        let path = scratch_path("existing.bin");
        fs::write(&path, b"head:")?;

        FileSink.append(&path, b"tail")?;
        assert_eq!(fs::read(&path)?, b"head:tail");

        fs::remove_file(&path)?;
        Ok(())
    }

    #[test]
    fn append_into_missing_directory_fails() {
        let path = scratch_path("missing").join("file.bin");

        assert!(FileSink.append(&path, b"data").is_err());
    }
}
