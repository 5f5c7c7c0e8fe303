// Copyright 2025-2026 CEMAXECUTER LLC

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::sample::{Sample, SampleBlock};

/// Outcome of one `read_block` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRead {
    pub num_samples: usize,
    /// No bytes remain after this block
    pub end_of_stream: bool,
}

/// Raw IQ file reader for the transmit side: reads fixed-size blocks of
/// headerless interleaved samples and can restart from the beginning.
pub struct FileSampleSource<S: Sample> {
    path: PathBuf,
    reader: BufReader<File>,
    /// Number of complex samples per block
    block_size: usize,
    bytes: Vec<u8>,
    _format: PhantomData<S>,
}

impl<S: Sample> FileSampleSource<S> {
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let reader = BufReader::with_capacity(1024 * 1024, file);

        log::info!(
            "reading IQ from {} ({}, {} samples per block)",
            path.display(),
            S::FORMAT,
            block_size
        );

        Ok(Self {
            path,
            reader,
            block_size,
            bytes: Vec::with_capacity(block_size * S::SIZE),
            _format: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fill `block` with up to `block_size` whole samples. A trailing
    /// partial sample at the end of the file is dropped.
    pub fn read_block(&mut self, block: &mut SampleBlock<S>) -> io::Result<BlockRead> {
        let wanted = block.capacity().min(self.block_size) * S::SIZE;
        self.bytes.resize(wanted, 0);

        let mut filled = 0;
        while filled < wanted {
            match self.reader.read(&mut self.bytes[filled..wanted]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let num_samples = filled / S::SIZE;
        S::read_le(&self.bytes[..num_samples * S::SIZE], &mut block.data[..num_samples]);
        block.num_samples = num_samples;

        // Peek so the last block carries the flag, not an extra empty read
        let end_of_stream = self.reader.fill_buf()?.is_empty();

        Ok(BlockRead {
            num_samples,
            end_of_stream,
        })
    }

    /// Seek back to offset 0 for another pass.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.reader.rewind()?;
        log::debug!("rewound {}", self.path.display());
        Ok(())
    }
}
