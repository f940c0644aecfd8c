//! File codecs for histogram exports.
//!
//! - `m`: text script assigning `coinc(i+1, j+1)` per populated cell;
//! - `m4b`: dense 4096x4096 grid of little-endian `u32` counts, row-major,
//!   whatever the bit resolution;
//! - `mat`: row-major square grid sized by the bit resolution, `u16` counts;
//! - `tka`: live time, real time, then one count per line.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::{Error, Result};

/// Largest dense grid side, the legacy 4096-channel matrix.
pub const MAX_GRID_SIDE: usize = 4096;

/// Cell width of a dense matrix file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellWidth {
    /// 2-byte counts (`mat`).
    U16,
    /// 4-byte counts (`m4b`).
    U32,
}

impl CellWidth {
    /// Bytes per cell.
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            CellWidth::U16 => 2,
            CellWidth::U32 => 4,
        }
    }

    /// Cell width for a matrix format name.
    #[must_use]
    pub fn for_format(format: &str) -> Option<Self> {
        match format {
            "mat" => Some(CellWidth::U16),
            "m4b" => Some(CellWidth::U32),
            _ => None,
        }
    }

    /// Grid side written for a histogram of `bits` resolution.
    ///
    /// `m4b` keeps the fixed legacy side; `mat` follows [`grid_side`].
    #[must_use]
    pub fn export_side(self, bits: u16) -> usize {
        match self {
            CellWidth::U16 => grid_side(bits),
            CellWidth::U32 => MAX_GRID_SIDE,
        }
    }
}

/// Dense grid side for a bit resolution.
#[must_use]
pub fn grid_side(bits: u16) -> usize {
    (1usize << bits.min(16)).min(MAX_GRID_SIDE)
}

/// Writes `cells` as a dense `side`×`side` grid.
///
/// Cells outside the grid are skipped. Counts too large for the cell width
/// saturate. Returns the number of saturated cells.
///
/// # Errors
/// Returns an error if writing fails.
pub fn write_dense<W: Write>(
    cells: &BTreeMap<(u16, u16), u64>,
    side: usize,
    width: CellWidth,
    out: W,
) -> Result<u64> {
    let mut out = BufWriter::new(out);
    let mut saturated = 0u64;
    let mut populated = cells
        .iter()
        .filter(|&(&(i, j), _)| usize::from(i) < side && usize::from(j) < side)
        .peekable();

    for i in 0..side {
        for j in 0..side {
            let count = match populated.peek() {
                Some(&(&(ci, cj), &c)) if usize::from(ci) == i && usize::from(cj) == j => {
                    populated.next();
                    c
                }
                _ => 0,
            };
            match width {
                CellWidth::U16 => {
                    let v = u16::try_from(count).unwrap_or_else(|_| {
                        saturated += 1;
                        u16::MAX
                    });
                    out.write_all(&v.to_le_bytes())?;
                }
                CellWidth::U32 => {
                    let v = u32::try_from(count).unwrap_or_else(|_| {
                        saturated += 1;
                        u32::MAX
                    });
                    out.write_all(&v.to_le_bytes())?;
                }
            }
        }
    }
    out.flush()?;
    Ok(saturated)
}

/// Reads a dense grid, inferring its side from the byte length.
///
/// Returns the non-zero cells and the grid side.
///
/// # Errors
/// Returns [`Error::InvalidMatrix`] unless the data is a square grid with a
/// power-of-two side from 2 to [`MAX_GRID_SIDE`].
pub fn read_dense(bytes: &[u8], width: CellWidth) -> Result<(BTreeMap<(u16, u16), u64>, usize)> {
    let cell = width.bytes();
    if bytes.len() % cell != 0 {
        return Err(Error::InvalidMatrix(format!(
            "{} bytes is not a whole number of {cell}-byte cells",
            bytes.len()
        )));
    }
    let cells = bytes.len() / cell;
    let side = square_side(cells);
    if side < 2 || side * side != cells || !side.is_power_of_two() || side > MAX_GRID_SIDE {
        return Err(Error::InvalidMatrix(format!(
            "{cells} cells do not form a square power-of-two grid of side 2 to {MAX_GRID_SIDE}"
        )));
    }

    let mut map = BTreeMap::new();
    for (idx, chunk) in bytes.chunks_exact(cell).enumerate() {
        let count = match width {
            CellWidth::U16 => u64::from(u16::from_le_bytes([chunk[0], chunk[1]])),
            CellWidth::U32 => u64::from(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])),
        };
        if count > 0 {
            let i = u16::try_from(idx / side).unwrap_or(u16::MAX);
            let j = u16::try_from(idx % side).unwrap_or(u16::MAX);
            map.insert((i, j), count);
        }
    }
    Ok((map, side))
}

fn square_side(cells: usize) -> usize {
    let mut side = 1usize;
    while side * side < cells && side <= MAX_GRID_SIDE {
        side *= 2;
    }
    side
}

/// Writes the `m` plotting script.
///
/// # Errors
/// Returns an error if writing fails.
pub fn write_script<W: Write>(
    cells: &BTreeMap<(u16, u16), u64>,
    bits: u16,
    total_count: u64,
    out: W,
) -> Result<()> {
    let mut out = BufWriter::new(out);
    writeln!(out, "%=========specdaq 2d spectrum=========")?;
    writeln!(out, "%  Bit precision: {bits}")?;
    writeln!(out, "%  Total events : {total_count}")?;
    writeln!(out, "clear;")?;
    for (&(i, j), &count) in cells {
        writeln!(out, "coinc({}, {}) = {count};", u32::from(i) + 1, u32::from(j) + 1)?;
    }
    writeln!(out, "figure;")?;
    writeln!(out, "imagesc(log(coinc));")?;
    writeln!(out, "colormap(hot);")?;
    out.flush()?;
    Ok(())
}

/// Writes a `tka` spectrum covering channels `0..=max_chan`.
///
/// # Errors
/// Returns an error if writing fails.
pub fn write_tka<W: Write>(
    cells: &BTreeMap<u16, u64>,
    max_chan: u16,
    live_time: f64,
    real_time: f64,
    out: W,
) -> Result<()> {
    let mut out = BufWriter::new(out);
    writeln!(out, "{live_time:.0}")?;
    writeln!(out, "{real_time:.0}")?;
    for chan in 0..=max_chan {
        writeln!(out, "{}", cells.get(&chan).copied().unwrap_or(0))?;
    }
    out.flush()?;
    Ok(())
}

/// Spectrum read back from a `tka` file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TkaSpectrum {
    /// Live time, seconds.
    pub live_time: f64,
    /// Real time, seconds.
    pub real_time: f64,
    /// Non-zero channels.
    pub cells: BTreeMap<u16, u64>,
    /// Last channel listed.
    pub max_chan: u16,
}

/// Reads a `tka` spectrum.
///
/// # Errors
/// Returns an error on I/O failure or a non-numeric line.
pub fn read_tka(path: &Path) -> Result<TkaSpectrum> {
    let reader = BufReader::new(File::open(path)?);
    let mut spectrum = TkaSpectrum::default();
    let mut chan = 0u32;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let token = line.trim();
        if token.is_empty() {
            continue;
        }
        let bad = || Error::ChannelData {
            position: line_no,
            token: token.to_string(),
        };
        match line_no {
            0 => spectrum.live_time = token.parse().map_err(|_| bad())?,
            1 => spectrum.real_time = token.parse().map_err(|_| bad())?,
            _ => {
                let count: u64 = token.parse().map_err(|_| bad())?;
                let c = u16::try_from(chan).map_err(|_| bad())?;
                if count > 0 {
                    spectrum.cells.insert(c, count);
                }
                spectrum.max_chan = c;
                chan += 1;
            }
        }
    }
    Ok(spectrum)
}
