//! Bounds-checked reader over little-endian 16-bit words.

use crate::{Error, Result};

/// Cursor over a window of 16-bit words in a byte buffer.
///
/// Reads never pass the window end; they fail with [`Error::Truncated`].
/// Offsets reported in errors are absolute word indices into the buffer.
#[derive(Debug, Clone)]
pub struct WordCursor<'a> {
    data: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> WordCursor<'a> {
    /// Creates a cursor over every whole word of `data`.
    ///
    /// A trailing odd byte is ignored.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            end: data.len() / 2,
        }
    }

    /// Absolute word index of the next read.
    #[inline]
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Words left in the window.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }

    /// True when the window is exhausted.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.end
    }

    fn check(&self, needed: usize) -> Result<()> {
        if needed > self.remaining() {
            return Err(Error::Truncated {
                offset: self.pos,
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    /// Reads the next word.
    ///
    /// # Errors
    /// Returns [`Error::Truncated`] at the end of the window.
    #[inline]
    pub fn read(&mut self) -> Result<u16> {
        self.check(1)?;
        let i = self.pos * 2;
        self.pos += 1;
        Ok(u16::from_le_bytes([self.data[i], self.data[i + 1]]))
    }

    /// Returns the next word without consuming it.
    ///
    /// # Errors
    /// Returns [`Error::Truncated`] at the end of the window.
    pub fn peek(&self) -> Result<u16> {
        self.check(1)?;
        let i = self.pos * 2;
        Ok(u16::from_le_bytes([self.data[i], self.data[i + 1]]))
    }

    /// Skips `n` words.
    ///
    /// # Errors
    /// Returns [`Error::Truncated`] if fewer than `n` words remain.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.check(n)?;
        self.pos += n;
        Ok(())
    }

    /// Reads `n` words into a new vector.
    ///
    /// # Errors
    /// Returns [`Error::Truncated`] if fewer than `n` words remain.
    pub fn read_words(&mut self, n: usize) -> Result<Vec<u16>> {
        self.check(n)?;
        let start = self.pos * 2;
        let words = self.data[start..start + n * 2]
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        self.pos += n;
        Ok(words)
    }

    /// Splits off the next `n` words as a child cursor and advances past them.
    ///
    /// # Errors
    /// Returns [`Error::Truncated`] if fewer than `n` words remain.
    pub fn take(&mut self, n: usize) -> Result<WordCursor<'a>> {
        self.check(n)?;
        let child = WordCursor {
            data: self.data,
            pos: self.pos,
            end: self.pos + n,
        };
        self.pos += n;
        Ok(child)
    }
}
