// Copyright 2025-2026 CEMAXECUTER LLC

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::sample::Sample;

/// Per-channel output name: `rx.dat` becomes `rx.00.dat`, `rx.01.dat`, ...
/// when more than one channel is recorded. Single-channel sessions keep
/// the base name.
pub fn channel_filename(base: &Path, n_channels: usize, index: usize) -> PathBuf {
    if n_channels == 1 {
        return base.to_path_buf();
    }
    let ext = match base.extension() {
        Some(ext) => format!("{:02}.{}", index, ext.to_string_lossy()),
        None => format!("{:02}", index),
    };
    base.with_extension(ext)
}

/// Append-only raw sample file for one receive channel.
pub struct ChannelFileSink<S: Sample> {
    channel: usize,
    path: PathBuf,
    writer: BufWriter<File>,
    scratch: Vec<u8>,
    bytes_written: u64,
    _format: PhantomData<S>,
}

impl<S: Sample> ChannelFileSink<S> {
    pub fn create(path: impl AsRef<Path>, channel: usize) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        log::info!("channel {} -> {}", channel, path.display());
        Ok(Self {
            channel,
            path,
            writer: BufWriter::with_capacity(1024 * 1024, file),
            scratch: Vec::new(),
            bytes_written: 0,
            _format: PhantomData,
        })
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn append(&mut self, samples: &[S]) -> io::Result<()> {
        self.scratch.clear();
        S::write_le(samples, &mut self.scratch);
        self.writer.write_all(&self.scratch)?;
        self.bytes_written += self.scratch.len() as u64;
        Ok(())
    }

    /// Flush and close the file. Consumes the sink; returns bytes written.
    pub fn close(mut self) -> io::Result<u64> {
        self.writer.flush()?;
        log::debug!("closed {} ({} bytes)", self.path.display(), self.bytes_written);
        Ok(self.bytes_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex;

    #[test]
    fn test_channel_filename() {
        let base = Path::new("captures/rx.dat");
        assert_eq!(channel_filename(base, 1, 0), PathBuf::from("captures/rx.dat"));
        assert_eq!(channel_filename(base, 2, 0), PathBuf::from("captures/rx.00.dat"));
        assert_eq!(channel_filename(base, 2, 1), PathBuf::from("captures/rx.01.dat"));
        assert_eq!(channel_filename(base, 12, 11), PathBuf::from("captures/rx.11.dat"));
        assert_eq!(channel_filename(Path::new("rx"), 2, 3), PathBuf::from("rx.03"));
    }

    #[test]
    fn test_append_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ch0.dat");
        let mut sink = ChannelFileSink::<Complex<f64>>::create(&path, 0).unwrap();
        sink.append(&[Complex::new(1.0, 2.0); 3]).unwrap();
        sink.append(&[Complex::new(0.5, 0.5); 2]).unwrap();
        assert_eq!(sink.bytes_written(), 5 * 16);

        let bytes = sink.close().unwrap();
        assert_eq!(bytes, 80);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 80);
    }
}
