//! Sequential reads from a file through a sliding memory map.
//!
//! Only one window of the file is mapped at a time. When a read runs off the
//! end of the current window, the next window is mapped starting at exactly
//! the byte where the previous one ended, so a value can straddle two windows.

use std::fs::File;
use std::io::{self, ErrorKind};
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

/// Size of each mapping window when reading model files.
pub const ONE_GB: u64 = 1 << 30;

pub(crate) struct WindowedReader {
    file: File,
    file_len: u64,
    window_size: u64,
    /// Absolute file offset of the first byte of `map`.
    base: u64,
    /// `None` once the whole file has been consumed, or for an empty file.
    map: Option<Mmap>,
    /// Read position within `map`.
    pos: usize,
}

impl WindowedReader {
    pub(crate) fn open(path: &Path, window_size: u64) -> io::Result<Self> {
        assert!(window_size > 0, "window size must be positive");
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = WindowedReader {
            file,
            file_len,
            window_size,
            base: 0,
            map: None,
            pos: 0,
        };
        reader.map = reader.map_window(0)?;
        Ok(reader)
    }

    fn map_window(&self, base: u64) -> io::Result<Option<Mmap>> {
        let len = self.window_size.min(self.file_len.saturating_sub(base));
        if len == 0 {
            return Ok(None);
        }
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "mapping window too large"))?;
        // SAFETY: the map is read-only and private to this reader. If another
        // process truncates the file while it is mapped, reads can fault;
        // that is the usual caveat of memory-mapped I/O and is accepted here.
        let map = unsafe { MmapOptions::new().offset(base).len(len).map(&self.file)? };
        Ok(Some(map))
    }

    /// Unmaps the current window and maps the one after it. Returns false at
    /// end of file.
    fn advance_window(&mut self) -> io::Result<bool> {
        let consumed = self.map.as_ref().map_or(0, |m| m.len()) as u64;
        if consumed == 0 {
            return Ok(false);
        }
        self.base += consumed;
        self.pos = 0;
        self.map = None;
        self.map = self.map_window(self.base)?;
        Ok(self.map.is_some())
    }

    /// Absolute position of the next byte to be read.
    pub(crate) fn offset(&self) -> u64 {
        self.base + self.pos as u64
    }

    pub(crate) fn remaining(&self) -> u64 {
        self.file_len - self.offset()
    }

    pub(crate) fn next_byte(&mut self) -> io::Result<Option<u8>> {
        loop {
            if let Some(map) = &self.map {
                if let Some(&b) = map.get(self.pos) {
                    self.pos += 1;
                    return Ok(Some(b));
                }
            }
            if !self.advance_window()? {
                return Ok(None);
            }
        }
    }

    /// Fills `buf`, crossing into later windows as needed.
    pub(crate) fn read_exact(&mut self, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let available = match &self.map {
                Some(map) => &map[self.pos..],
                None => &[][..],
            };
            if available.is_empty() {
                if !self.advance_window()? {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "unexpected end of file",
                    ));
                }
                continue;
            }
            let n = available.len().min(buf.len());
            buf[..n].copy_from_slice(&available[..n]);
            self.pos += n;
            buf = &mut std::mem::take(&mut buf)[n..];
        }
        Ok(())
    }
}
