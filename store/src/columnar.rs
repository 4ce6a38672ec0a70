//! The `.bbdata` columnar artifact format (§6, §9 "Columnar writer choice").
//!
//! The core only requires a `(bytes, table, compression) → size_mb` contract
//! (§9); this picks one stable format, following the teacher's tape framing
//! idiom (`differ`'s `tape_writer`/`tape_reader`): magic bytes, a version, a
//! length-prefixed JSON header, a compressed body, and a footer carrying
//! counts and a digest.

use std::io::{Read, Write};

use recorder_kernel::table::{Cell, Column, Table};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StoreError;

const BBDATA_MAGIC: [u8; 8] = *b"BBDATA01";
const BBDATA_VERSION: u16 = 1;
const FOOTER_MAGIC: u32 = 0xB0D0_DA7A;

/// Codec for `.bbdata` bodies (§4.7 `parquet_compression` option).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Snappy,
    Zstd,
    Gzip,
    Lz4,
    None,
}

impl Compression {
    fn tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Zstd => 1,
            Compression::Gzip => 2,
            Compression::Lz4 => 3,
            Compression::Snappy => 4,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, StoreError> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Zstd),
            2 => Ok(Compression::Gzip),
            3 => Ok(Compression::Lz4),
            4 => Ok(Compression::Snappy),
            other => Err(StoreError::Backend {
                detail: format!("unknown bbdata compression tag {other}"),
            }),
        }
    }

    fn compress(self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Zstd => zstd::encode_all(data, 0)
                .map_err(|e| StoreError::Backend { detail: format!("zstd: {e}") }),
            Compression::Gzip => {
                let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                enc.write_all(data)?;
                enc.finish().map_err(StoreError::from)
            }
            Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            Compression::Snappy => {
                let mut encoder = snap::write::FrameEncoder::new(Vec::new());
                encoder.write_all(data)?;
                encoder.flush()?;
                encoder
                    .into_inner()
                    .map_err(|e| StoreError::Backend { detail: format!("snappy: {e}") })
            }
        }
    }

    fn decompress(self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Zstd => zstd::decode_all(data)
                .map_err(|e| StoreError::Backend { detail: format!("zstd: {e}") }),
            Compression::Gzip => {
                let mut dec = flate2::read::GzDecoder::new(data);
                let mut out = Vec::new();
                dec.read_to_end(&mut out)?;
                Ok(out)
            }
            Compression::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| StoreError::Backend { detail: format!("lz4: {e}") }),
            Compression::Snappy => {
                let mut decoder = snap::read::FrameDecoder::new(data);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
enum CellDto {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&Cell> for CellDto {
    fn from(c: &Cell) -> Self {
        match c {
            Cell::Null => CellDto::Null,
            Cell::Bool(b) => CellDto::Bool(*b),
            Cell::Int(i) => CellDto::Int(*i),
            Cell::Float(f) => CellDto::Float(*f),
            Cell::Text(t) => CellDto::Text(t.clone()),
        }
    }
}

impl From<CellDto> for Cell {
    fn from(c: CellDto) -> Self {
        match c {
            CellDto::Null => Cell::Null,
            CellDto::Bool(b) => Cell::Bool(b),
            CellDto::Int(i) => Cell::Int(i),
            CellDto::Float(f) => Cell::Float(f),
            CellDto::Text(t) => Cell::Text(t),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ColumnHeader {
    name: String,
    dtype: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    columns: Vec<ColumnHeader>,
    n_rows: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct Body {
    columns: Vec<Vec<CellDto>>,
}

/// Encode `table` as a `.bbdata` byte buffer, reporting its size in MB.
///
/// # Errors
///
/// Returns [`StoreError`] if JSON serialization of the body or compression
/// fails.
pub fn encode_columnar(table: &Table, compression: Compression) -> Result<(Vec<u8>, f64), StoreError> {
    let header = Header {
        columns: table
            .columns()
            .iter()
            .map(|c| ColumnHeader { name: c.name.clone(), dtype: c.dtype.clone() })
            .collect(),
        n_rows: table.n_rows(),
    };
    let header_bytes = serde_json::to_vec(&header)?;

    let body = Body {
        columns: table
            .columns()
            .iter()
            .map(|c| c.values.iter().map(CellDto::from).collect())
            .collect(),
    };
    let body_json = serde_json::to_vec(&body)?;
    let body_compressed = compression.compress(&body_json)?;

    let mut buf = Vec::with_capacity(32 + header_bytes.len() + body_compressed.len());
    buf.extend_from_slice(&BBDATA_MAGIC);
    buf.extend_from_slice(&BBDATA_VERSION.to_le_bytes());
    buf.push(compression.tag());
    #[allow(clippy::cast_possible_truncation)]
    let header_len = header_bytes.len() as u32;
    buf.extend_from_slice(&header_len.to_le_bytes());
    buf.extend_from_slice(&header_bytes);
    #[allow(clippy::cast_possible_truncation)]
    let body_len = body_compressed.len() as u32;
    buf.extend_from_slice(&body_len.to_le_bytes());
    buf.extend_from_slice(&body_compressed);

    let mut hasher = Sha256::new();
    hasher.update(&body_compressed);
    let body_digest: [u8; 32] = hasher.finalize().into();

    #[allow(clippy::cast_possible_truncation)]
    let n_rows = header.n_rows as u64;
    buf.extend_from_slice(&n_rows.to_le_bytes());
    buf.extend_from_slice(&body_digest);
    buf.extend_from_slice(&FOOTER_MAGIC.to_le_bytes());

    #[allow(clippy::cast_precision_loss)]
    let size_mb = buf.len() as f64 / (1024.0 * 1024.0);
    Ok((buf, size_mb))
}

/// Decode a `.bbdata` byte buffer back into a [`Table`].
///
/// # Errors
///
/// Returns [`StoreError::Backend`] on magic/version/footer mismatch or a
/// body digest mismatch, and on malformed header/body JSON.
pub fn decode_columnar(bytes: &[u8]) -> Result<Table, StoreError> {
    if bytes.len() < 8 + 2 + 1 + 4 {
        return Err(StoreError::Backend { detail: "bbdata: truncated header".to_string() });
    }
    if bytes[0..8] != BBDATA_MAGIC {
        return Err(StoreError::Backend { detail: "bbdata: bad magic".to_string() });
    }
    let version = u16::from_le_bytes([bytes[8], bytes[9]]);
    if version != BBDATA_VERSION {
        return Err(StoreError::Backend { detail: format!("bbdata: unsupported version {version}") });
    }
    let compression = Compression::from_tag(bytes[10])?;
    let header_len = u32::from_le_bytes(bytes[11..15].try_into().unwrap()) as usize;
    let mut cursor = 15;
    let header_bytes = bytes
        .get(cursor..cursor + header_len)
        .ok_or_else(|| StoreError::Backend { detail: "bbdata: truncated header body".to_string() })?;
    let header: Header = serde_json::from_slice(header_bytes)?;
    cursor += header_len;

    let body_len = bytes
        .get(cursor..cursor + 4)
        .ok_or_else(|| StoreError::Backend { detail: "bbdata: truncated body length".to_string() })?;
    let body_len = u32::from_le_bytes(body_len.try_into().unwrap()) as usize;
    cursor += 4;

    let body_compressed = bytes
        .get(cursor..cursor + body_len)
        .ok_or_else(|| StoreError::Backend { detail: "bbdata: truncated body".to_string() })?;
    cursor += body_len;

    let footer = bytes
        .get(cursor..cursor + 8 + 32 + 4)
        .ok_or_else(|| StoreError::Backend { detail: "bbdata: truncated footer".to_string() })?;
    let n_rows = u64::from_le_bytes(footer[0..8].try_into().unwrap());
    let stored_digest = &footer[8..40];
    let footer_magic = u32::from_le_bytes(footer[40..44].try_into().unwrap());
    if footer_magic != FOOTER_MAGIC {
        return Err(StoreError::Backend { detail: "bbdata: bad footer magic".to_string() });
    }

    let mut hasher = Sha256::new();
    hasher.update(body_compressed);
    let computed_digest: [u8; 32] = hasher.finalize().into();
    if computed_digest != stored_digest {
        return Err(StoreError::Backend { detail: "bbdata: body digest mismatch".to_string() });
    }
    if n_rows as usize != header.n_rows {
        return Err(StoreError::Backend { detail: "bbdata: row count mismatch".to_string() });
    }

    let body_json = compression.decompress(body_compressed)?;
    let body: Body = serde_json::from_slice(&body_json)?;

    if body.columns.len() != header.columns.len() {
        return Err(StoreError::Backend { detail: "bbdata: column count mismatch".to_string() });
    }

    let columns = header
        .columns
        .into_iter()
        .zip(body.columns)
        .map(|(h, values)| Column {
            name: h.name,
            dtype: h.dtype,
            values: values.into_iter().map(Cell::from).collect(),
        })
        .collect();

    Ok(Table::new(columns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use recorder_kernel::table::{Cell, Column};

    fn sample() -> Table {
        Table::new(vec![
            Column {
                name: "id".into(),
                dtype: "int".into(),
                values: vec![Cell::Int(1), Cell::Int(2), Cell::Null],
            },
            Column {
                name: "x".into(),
                dtype: "text".into(),
                values: vec![Cell::Text("a".into()), Cell::Text("b".into()), Cell::Bool(true)],
            },
        ])
    }

    #[test]
    fn round_trips_shape_and_values() {
        let t = sample();
        let (bytes, _mb) = encode_columnar(&t, Compression::None).unwrap();
        let back = decode_columnar(&bytes).unwrap();
        assert_eq!(back.n_rows(), t.n_rows());
        assert_eq!(back.n_cols(), t.n_cols());
        assert_eq!(back.column_names(), t.column_names());
    }

    #[test]
    fn round_trips_under_every_compression() {
        let t = sample();
        for c in [
            Compression::None,
            Compression::Zstd,
            Compression::Gzip,
            Compression::Lz4,
            Compression::Snappy,
        ] {
            let (bytes, mb) = encode_columnar(&t, c).unwrap();
            assert!(mb > 0.0);
            let back = decode_columnar(&bytes).unwrap();
            assert_eq!(back.n_rows(), t.n_rows());
        }
    }

    #[test]
    fn tampered_body_fails_digest_check() {
        let t = sample();
        let (mut bytes, _) = encode_columnar(&t, Compression::None).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        assert!(decode_columnar(&bytes).is_err());
    }

    #[test]
    fn empty_table_round_trips() {
        let t = Table::new(vec![Column { name: "id".into(), dtype: "int".into(), values: vec![] }]);
        let (bytes, _) = encode_columnar(&t, Compression::Zstd).unwrap();
        let back = decode_columnar(&bytes).unwrap();
        assert_eq!(back.n_rows(), 0);
    }
}
