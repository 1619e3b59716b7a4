// src/npy.rs
//! Minimal NPY (v1.0 / v2.0) codec for the per-shard verdict arrays.
//!
//! Writes 1-D little-endian `<i8` arrays. Reads 1-D arrays of the common numeric dtypes
//! (`<i8`, `<i4`, `|i1`, `|u1`, `|b1`, `<f8`, `<f4`) so arrays produced by other tools
//! can be aggregated too. Values come back as `f64`.

use std::fs;
use std::io::Write;
use std::path::Path;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const ALIGN: usize = 64;

#[derive(thiserror::Error, Debug)]
pub enum NpyError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("not an NPY file (bad magic)")]
    BadMagic,
    #[error("unsupported NPY version {0}.{1}")]
    UnsupportedVersion(u8, u8),
    #[error("malformed NPY header: {0}")]
    BadHeader(String),
    #[error("unsupported dtype {0}")]
    UnsupportedDtype(String),
    #[error("expected a 1-D array, got shape {0}")]
    NotOneDimensional(String),
    #[error("payload truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Encode `values` as a 1-D `<i8` NPY v1.0 file image.
pub fn encode_i64(values: &[i64]) -> Vec<u8> {
    let dict = format!(
        "{{'descr': '<i8', 'fortran_order': False, 'shape': ({},), }}",
        values.len()
    );
    // magic(6) + version(2) + header_len(2) + dict + padding + '\n'
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let pad = (ALIGN - unpadded % ALIGN) % ALIGN;
    let header_len = dict.len() + pad + 1;

    let mut out = Vec::with_capacity(unpadded + pad + values.len() * 8);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.resize(out.len() + pad, b' ');
    out.push(b'\n');
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Write verdicts to `path` as `<i8`.
pub fn write_i64(path: &Path, values: &[i64]) -> Result<(), NpyError> {
    let bytes = encode_i64(values);
    let io_err = |source| NpyError::Io {
        path: path.display().to_string(),
        source,
    };
    let mut f = fs::File::create(path).map_err(io_err)?;
    f.write_all(&bytes).map_err(io_err)?;
    f.sync_all().map_err(io_err)?;
    Ok(())
}

/// Read a 1-D numeric array from `path`.
pub fn read_f64(path: &Path) -> Result<Vec<f64>, NpyError> {
    let bytes = fs::read(path).map_err(|source| NpyError::Io {
        path: path.display().to_string(),
        source,
    })?;
    decode_f64(&bytes)
}

/// Decode a 1-D numeric NPY image.
pub fn decode_f64(bytes: &[u8]) -> Result<Vec<f64>, NpyError> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(NpyError::BadMagic);
    }
    let (major, minor) = (bytes[6], bytes[7]);
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(NpyError::BadHeader("short v2 preamble".into()));
            }
            (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            )
        }
        _ => return Err(NpyError::UnsupportedVersion(major, minor)),
    };
    let data_start = header_start + header_len;
    if bytes.len() < data_start {
        return Err(NpyError::BadHeader("header runs past end of file".into()));
    }
    let header = std::str::from_utf8(&bytes[header_start..data_start])
        .map_err(|e| NpyError::BadHeader(e.to_string()))?;

    let descr = dict_value(header, "descr")?;
    let descr = descr.trim_matches(|c| c == '\'' || c == '"');
    let shape = dict_value(header, "shape")?;
    let len = parse_1d_shape(shape)?;

    let dtype = Dtype::parse(descr)?;
    let payload = &bytes[data_start..];
    let expected = len
        .checked_mul(dtype.width())
        .ok_or_else(|| NpyError::BadHeader(format!("shape ({len},) overflows the payload size")))?;
    if payload.len() < expected {
        return Err(NpyError::Truncated {
            expected,
            actual: payload.len(),
        });
    }

    Ok(payload[..expected]
        .chunks_exact(dtype.width())
        .map(|c| dtype.decode(c))
        .collect())
}

#[derive(Debug, Clone, Copy)]
enum Dtype {
    I8,
    I4,
    I1,
    U1,
    Bool,
    F8,
    F4,
}

impl Dtype {
    fn parse(descr: &str) -> Result<Self, NpyError> {
        Ok(match descr {
            "<i8" => Dtype::I8,
            "<i4" => Dtype::I4,
            "|i1" => Dtype::I1,
            "|u1" => Dtype::U1,
            "|b1" => Dtype::Bool,
            "<f8" => Dtype::F8,
            "<f4" => Dtype::F4,
            other => return Err(NpyError::UnsupportedDtype(other.to_string())),
        })
    }

    fn width(self) -> usize {
        match self {
            Dtype::I8 | Dtype::F8 => 8,
            Dtype::I4 | Dtype::F4 => 4,
            Dtype::I1 | Dtype::U1 | Dtype::Bool => 1,
        }
    }

    fn decode(self, c: &[u8]) -> f64 {
        match self {
            Dtype::I8 => i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f64,
            Dtype::I4 => i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64,
            Dtype::I1 => c[0] as i8 as f64,
            Dtype::U1 => c[0] as f64,
            Dtype::Bool => {
                if c[0] != 0 {
                    1.0
                } else {
                    0.0
                }
            }
            Dtype::F8 => f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]),
            Dtype::F4 => f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64,
        }
    }
}

/// Pull the raw value text for `key` out of the Python-literal header dict.
fn dict_value<'h>(header: &'h str, key: &str) -> Result<&'h str, NpyError> {
    let needle = format!("'{key}':");
    let at = header
        .find(&needle)
        .ok_or_else(|| NpyError::BadHeader(format!("missing key {key}")))?;
    let rest = header[at + needle.len()..].trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')').map(|i| i + 1)
    } else {
        rest.find(',')
    }
    .ok_or_else(|| NpyError::BadHeader(format!("unterminated value for {key}")))?;
    Ok(rest[..end].trim())
}

fn parse_1d_shape(shape: &str) -> Result<usize, NpyError> {
    let inner = shape
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| NpyError::BadHeader(format!("bad shape {shape}")))?;
    let dims: Vec<&str> = inner
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .collect();
    if dims.len() != 1 {
        return Err(NpyError::NotOneDimensional(shape.to_string()));
    }
    dims[0]
        .parse::<usize>()
        .map_err(|_| NpyError::BadHeader(format!("bad dimension {}", dims[0])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_aligned_and_terminated() {
        let bytes = encode_i64(&[0, 1, 1]);
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % ALIGN, 0);
        assert_eq!(bytes[10 + header_len - 1], b'\n');
        assert_eq!(bytes.len(), 10 + header_len + 3 * 8);
    }

    #[test]
    fn reads_back_verdicts() {
        let bytes = encode_i64(&[1, 0, 0, 1]);
        assert_eq!(decode_f64(&bytes).unwrap(), vec![1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn reads_bool_arrays_written_elsewhere() {
        let dict = "{'descr': '|b1', 'fortran_order': False, 'shape': (3,), }";
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&[1, 0]);
        let header = format!("{dict}\n");
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&[1, 0, 1]);
        assert_eq!(decode_f64(&bytes).unwrap(), vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn rejects_two_dimensional_and_truncated() {
        let dict = "{'descr': '<i8', 'fortran_order': False, 'shape': (2, 2), }\n";
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(dict.len() as u16).to_le_bytes());
        bytes.extend_from_slice(dict.as_bytes());
        assert!(matches!(
            decode_f64(&bytes),
            Err(NpyError::NotOneDimensional(_))
        ));

        let mut short = encode_i64(&[1, 2, 3]);
        short.truncate(short.len() - 4);
        assert!(matches!(decode_f64(&short), Err(NpyError::Truncated { .. })));
        assert!(matches!(decode_f64(b"nope"), Err(NpyError::BadMagic)));
    }

    #[test]
    fn oversized_shape_is_a_header_error() {
        let dict = "{'descr': '<i8', 'fortran_order': False, 'shape': (4611686018427387904,), }\n";
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(dict.len() as u16).to_le_bytes());
        bytes.extend_from_slice(dict.as_bytes());
        assert!(matches!(decode_f64(&bytes), Err(NpyError::BadHeader(_))));
    }

    #[test]
    fn empty_array_roundtrip() {
        assert!(decode_f64(&encode_i64(&[])).unwrap().is_empty());
    }
}
