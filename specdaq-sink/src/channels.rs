//! Run-length text codec for sparse channel data.
//!
//! Cells are written in ascending order as whitespace-separated tokens:
//!
//! - `+ N` advances N rows and returns to column 0 (2D only);
//! - `0 N` skips N empty columns;
//! - any other token is the count at the current cell, after which the
//!   column advances by one.
//!
//! Stored counts are never zero, so a literal `0` is always a skip marker.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::{Error, Result};

/// Encodes a 2D map row by row.
#[must_use]
pub fn encode_2d(cells: &BTreeMap<(u16, u16), u64>) -> String {
    let mut out = String::new();
    let (mut row, mut col) = (0u16, 0u16);
    for (&(i, j), &count) in cells {
        if count == 0 {
            continue;
        }
        if i > row {
            let _ = write!(out, "+ {} ", i - row);
            row = i;
            col = 0;
        }
        if j > col {
            let _ = write!(out, "0 {} ", j - col);
        }
        let _ = write!(out, "{count} ");
        col = j.saturating_add(1);
    }
    out
}

/// Decodes text written by [`encode_2d`].
///
/// Returns the cells and the highest coordinate on either axis.
///
/// # Errors
/// Returns [`Error::ChannelData`] on a malformed token or a coordinate past `u16`.
pub fn decode_2d(text: &str) -> Result<(BTreeMap<(u16, u16), u64>, u16)> {
    let mut cells = BTreeMap::new();
    let mut max_chan = 0u16;
    let (mut row, mut col) = (0u32, 0u32);
    let mut tokens = text.split_whitespace().enumerate();

    while let Some((pos, token)) = tokens.next() {
        match token {
            "+" => {
                row = row.saturating_add(run_length(tokens.next(), pos)?);
                col = 0;
            }
            "0" => col = col.saturating_add(run_length(tokens.next(), pos)?),
            _ => {
                let count = parse_count(token, pos)?;
                let i = coord(row, pos, token)?;
                let j = coord(col, pos, token)?;
                max_chan = max_chan.max(i).max(j);
                cells.insert((i, j), count);
                col = col.saturating_add(1);
            }
        }
    }
    Ok((cells, max_chan))
}

/// Encodes a 1D map.
#[must_use]
pub fn encode_1d(cells: &BTreeMap<u16, u64>) -> String {
    let mut out = String::new();
    let mut col = 0u16;
    for (&j, &count) in cells {
        if count == 0 {
            continue;
        }
        if j > col {
            let _ = write!(out, "0 {} ", j - col);
        }
        let _ = write!(out, "{count} ");
        col = j.saturating_add(1);
    }
    out
}

/// Decodes text written by [`encode_1d`].
///
/// # Errors
/// Returns [`Error::ChannelData`] on a malformed token, a row marker or a
/// coordinate past `u16`.
pub fn decode_1d(text: &str) -> Result<(BTreeMap<u16, u64>, u16)> {
    let mut cells = BTreeMap::new();
    let mut max_chan = 0u16;
    let mut col = 0u32;
    let mut tokens = text.split_whitespace().enumerate();

    while let Some((pos, token)) = tokens.next() {
        if token == "0" {
            col = col.saturating_add(run_length(tokens.next(), pos)?);
            continue;
        }
        let count = parse_count(token, pos)?;
        let j = coord(col, pos, token)?;
        max_chan = max_chan.max(j);
        cells.insert(j, count);
        col = col.saturating_add(1);
    }
    Ok((cells, max_chan))
}

fn bad(position: usize, token: &str) -> Error {
    Error::ChannelData {
        position,
        token: token.to_string(),
    }
}

fn run_length(next: Option<(usize, &str)>, marker: usize) -> Result<u32> {
    let (pos, token) = next.ok_or_else(|| bad(marker, ""))?;
    token.parse::<u16>().map(u32::from).map_err(|_| bad(pos, token))
}

fn parse_count(token: &str, pos: usize) -> Result<u64> {
    token.parse::<u64>().map_err(|_| bad(pos, token))
}

fn coord(value: u32, pos: usize, token: &str) -> Result<u16> {
    u16::try_from(value).map_err(|_| bad(pos, token))
}
