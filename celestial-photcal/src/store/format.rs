//! On-disk layout of the catalog cache.
//!
//! All integers and floats little-endian:
//!
//! ```text
//! magic       4 bytes   "PCAT"
//! version     u32
//! band_count  u32
//! bands       band_count × (u16 length + UTF-8 name)
//! entry_count u64
//! entries     entry_count × row
//!
//! row:
//!   tag       u8        0 = integer id, 1 = text id
//!   id        i64 | (u32 length + UTF-8)
//!   ra, dec   f64, f64
//!   per band  f64 magnitude, f64 error   (NaN when absent)
//! ```

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::{Error, Result};

use super::entry::{CatalogEntry, CatalogId, Photometry};

const MAGIC: &[u8; 4] = b"PCAT";
const VERSION: u32 = 1;

const TAG_INT: u8 = 0;
const TAG_TEXT: u8 = 1;

/// Longest band or id string the file holds. Reading rejects longer length
/// prefixes as corrupt.
pub(crate) const MAX_STRING_LEN: usize = 1 << 16;

fn write_u8(w: &mut impl Write, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

fn write_u16(w: &mut impl Write, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u32(w: &mut impl Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64(w: &mut impl Write, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_i64(w: &mut impl Write, v: i64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_f64(w: &mut impl Write, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u8(r: &mut impl Read) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16(r: &mut impl Read) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i64(r: &mut impl Read) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_f64(r: &mut impl Read) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn read_string(r: &mut impl Read, len: usize) -> io::Result<String> {
    if len > MAX_STRING_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("string length {len} exceeds limit"),
        ));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Write the full table. `bands` fixes the column order of the photometry.
pub(crate) fn write_table<'a>(
    w: &mut impl Write,
    bands: &[String],
    entries: impl ExactSizeIterator<Item = &'a CatalogEntry>,
) -> io::Result<()> {
    w.write_all(MAGIC)?;
    write_u32(w, VERSION)?;

    write_u32(w, bands.len() as u32)?;
    for band in bands {
        let len = u16::try_from(band.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("band name too long: {band}"))
        })?;
        write_u16(w, len)?;
        w.write_all(band.as_bytes())?;
    }

    write_u64(w, entries.len() as u64)?;
    for entry in entries {
        match &entry.id {
            CatalogId::Int(id) => {
                write_u8(w, TAG_INT)?;
                write_i64(w, *id)?;
            }
            CatalogId::Text(id) => {
                write_u8(w, TAG_TEXT)?;
                write_u32(w, id.len() as u32)?;
                w.write_all(id.as_bytes())?;
            }
        }
        write_f64(w, entry.ra)?;
        write_f64(w, entry.dec)?;
        for band in bands {
            let phot = entry.photometry(band);
            write_f64(w, phot.magnitude)?;
            write_f64(w, phot.error)?;
        }
    }

    w.flush()
}

/// Read a full table. Bands whose stored magnitude and error are both NaN
/// are left out of the entry's photometry map.
pub(crate) fn read_table(r: &mut impl Read, path: &Path) -> Result<(Vec<String>, Vec<CatalogEntry>)> {
    read_table_inner(r).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::corruption(path, "file is truncated"),
        io::ErrorKind::InvalidData => Error::corruption(path, e.to_string()),
        _ => Error::Io(e),
    })
}

fn read_table_inner(r: &mut impl Read) -> io::Result<(Vec<String>, Vec<CatalogEntry>)> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "invalid magic bytes",
        ));
    }

    let version = read_u32(r)?;
    if version != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported version: {version}"),
        ));
    }

    let band_count = read_u32(r)? as usize;
    let mut bands = Vec::with_capacity(band_count.min(256));
    for _ in 0..band_count {
        let len = read_u16(r)? as usize;
        bands.push(read_string(r, len)?);
    }

    let entry_count = read_u64(r)?;
    let mut entries = Vec::with_capacity((entry_count as usize).min(1 << 20));
    for _ in 0..entry_count {
        let id = match read_u8(r)? {
            TAG_INT => CatalogId::Int(read_i64(r)?),
            TAG_TEXT => {
                let len = read_u32(r)? as usize;
                CatalogId::Text(read_string(r, len)?)
            }
            tag => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown id tag {tag}"),
                ))
            }
        };
        let ra = read_f64(r)?;
        let dec = read_f64(r)?;

        let mut photometry = BTreeMap::new();
        for band in &bands {
            let magnitude = read_f64(r)?;
            let error = read_f64(r)?;
            if !(magnitude.is_nan() && error.is_nan()) {
                photometry.insert(band.clone(), Photometry::new(magnitude, error));
            }
        }

        entries.push(CatalogEntry {
            id,
            ra,
            dec,
            photometry,
        });
    }

    let mut trailing = [0u8; 1];
    if r.read(&mut trailing)? != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "trailing bytes after last entry",
        ));
    }

    Ok((bands, entries))
}
