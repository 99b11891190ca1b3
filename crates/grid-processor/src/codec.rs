//! Zarr v2 array metadata and chunk decoding.
//!
//! Supports what NWM / AORC reference sets use in practice: little and big
//! endian integer and float dtypes, `zlib` / `gzip` compression (as the
//! compressor or as a filter, which is how HDF5 deflate shows up), the
//! `shuffle` filter, fill values and CF `scale_factor` / `add_offset`.

use flate2::read::{GzDecoder, ZlibDecoder};
use serde_json::Value;
use std::io::Read;

use crate::error::{GridProcessorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberKind {
    Float,
    Int,
    UInt,
}

/// Parsed numpy dtype string such as `<f4` or `>i2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataType {
    pub kind: NumberKind,
    pub size: usize,
    pub big_endian: bool,
}

impl DataType {
    pub fn parse(s: &str) -> Result<Self> {
        let (big_endian, rest) = match s.as_bytes().first() {
            Some(b'<') | Some(b'=') => (false, &s[1..]),
            Some(b'>') => (true, &s[1..]),
            Some(b'|') => (false, &s[1..]),
            _ => (false, s),
        };
        let mut chars = rest.chars();
        let kind = chars.next().map(String::from).unwrap_or_default();
        let size: usize = chars
            .as_str()
            .parse()
            .map_err(|_| GridProcessorError::unsupported(format!("dtype {}", s)))?;
        let kind = match (kind.as_str(), size) {
            ("f", 4 | 8) => NumberKind::Float,
            ("i", 1 | 2 | 4 | 8) => NumberKind::Int,
            ("u", 1 | 2 | 4) => NumberKind::UInt,
            _ => return Err(GridProcessorError::unsupported(format!("dtype {}", s))),
        };
        Ok(Self {
            kind,
            size,
            big_endian,
        })
    }

    fn read(&self, b: &[u8]) -> f64 {
        macro_rules! num {
            ($t:ty, $n:expr) => {{
                let mut buf = [0u8; $n];
                buf.copy_from_slice(&b[..$n]);
                if self.big_endian {
                    <$t>::from_be_bytes(buf) as f64
                } else {
                    <$t>::from_le_bytes(buf) as f64
                }
            }};
        }
        match (self.kind, self.size) {
            (NumberKind::Float, 4) => num!(f32, 4),
            (NumberKind::Float, _) => num!(f64, 8),
            (NumberKind::Int, 1) => b[0] as i8 as f64,
            (NumberKind::Int, 2) => num!(i16, 2),
            (NumberKind::Int, 4) => num!(i32, 4),
            (NumberKind::Int, _) => num!(i64, 8),
            (NumberKind::UInt, 1) => b[0] as f64,
            (NumberKind::UInt, 2) => num!(u16, 2),
            (NumberKind::UInt, _) => num!(u32, 4),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Codec {
    Zlib,
    Gzip,
    Shuffle { element_size: usize },
}

impl Codec {
    fn from_json(value: &Value, dtype: &DataType) -> Result<Self> {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| GridProcessorError::unsupported(format!("codec without id: {}", value)))?;
        match id {
            "zlib" => Ok(Codec::Zlib),
            "gzip" => Ok(Codec::Gzip),
            "shuffle" => Ok(Codec::Shuffle {
                element_size: value
                    .get("elementsize")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize)
                    .unwrap_or(dtype.size),
            }),
            other => Err(GridProcessorError::unsupported(format!("codec {}", other))),
        }
    }

    fn decode(&self, input: Vec<u8>) -> Result<Vec<u8>> {
        match self {
            Codec::Zlib => inflate(ZlibDecoder::new(input.as_slice())),
            Codec::Gzip => inflate(GzDecoder::new(input.as_slice())),
            Codec::Shuffle { element_size } => Ok(unshuffle(&input, *element_size)),
        }
    }
}

fn inflate<R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    reader
        .read_to_end(&mut out)
        .map_err(|e| GridProcessorError::decompression(e.to_string()))?;
    Ok(out)
}

/// Inverse of the byte shuffle: the input holds all first bytes, then all
/// second bytes, and so on.
fn unshuffle(input: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || input.len() % element_size != 0 {
        return input.to_vec();
    }
    let count = input.len() / element_size;
    let mut out = vec![0u8; input.len()];
    for (byte, lane) in input.chunks_exact(count).enumerate() {
        for (i, &b) in lane.iter().enumerate() {
            out[i * element_size + byte] = b;
        }
    }
    out
}

fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}

/// `.zarray` plus the CF attributes that change how values read.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayMeta {
    pub shape: Vec<usize>,
    pub chunks: Vec<usize>,
    pub dtype: DataType,
    /// Decode order: compressor first, then filters last-to-first.
    pub codecs: Vec<Codec>,
    /// Raw values that mean "no data".
    pub missing: Vec<f64>,
    pub scale_factor: f64,
    pub add_offset: f64,
}

impl ArrayMeta {
    /// Build from `.zarray` and optional `.zattrs` JSON.
    pub fn from_json(zarray: &Value, zattrs: Option<&Value>) -> std::result::Result<Self, String> {
        let dims = |key: &str| -> std::result::Result<Vec<usize>, String> {
            zarray
                .get(key)
                .and_then(Value::as_array)
                .ok_or_else(|| format!("missing {}", key))?
                .iter()
                .map(|v| v.as_u64().map(|n| n as usize).ok_or_else(|| format!("bad {}", key)))
                .collect()
        };
        let shape = dims("shape")?;
        let chunks = dims("chunks")?;
        if shape.len() != chunks.len() {
            return Err("shape and chunks differ in rank".to_string());
        }
        if chunks.iter().any(|&c| c == 0) {
            return Err("zero chunk length".to_string());
        }

        if let Some(order) = zarray.get("order").and_then(Value::as_str) {
            if order != "C" {
                return Err(format!("unsupported memory order {}", order));
            }
        }

        let dtype = zarray
            .get("dtype")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing dtype".to_string())?;
        let dtype = DataType::parse(dtype).map_err(|e| e.to_string())?;

        let mut codecs = Vec::new();
        if let Some(compressor) = zarray.get("compressor").filter(|v| !v.is_null()) {
            codecs.push(Codec::from_json(compressor, &dtype).map_err(|e| e.to_string())?);
        }
        if let Some(filters) = zarray.get("filters").and_then(Value::as_array) {
            for filter in filters.iter().rev() {
                codecs.push(Codec::from_json(filter, &dtype).map_err(|e| e.to_string())?);
            }
        }

        let mut missing = Vec::new();
        if let Some(fill) = zarray.get("fill_value").and_then(json_number) {
            missing.push(fill);
        }

        let mut scale_factor = 1.0;
        let mut add_offset = 0.0;
        if let Some(attrs) = zattrs {
            for key in ["_FillValue", "missing_value"] {
                match attrs.get(key) {
                    Some(Value::Array(values)) => missing.extend(values.iter().filter_map(json_number)),
                    Some(value) => missing.extend(json_number(value)),
                    None => {}
                }
            }
            if let Some(s) = attrs.get("scale_factor").and_then(json_number) {
                scale_factor = s;
            }
            if let Some(o) = attrs.get("add_offset").and_then(json_number) {
                add_offset = o;
            }
        }

        Ok(Self {
            shape,
            chunks,
            dtype,
            codecs,
            missing,
            scale_factor,
            add_offset,
        })
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Elements in one (full, padded) chunk.
    pub fn chunk_len(&self) -> usize {
        self.chunks.iter().product()
    }

    /// Same on-disk layout: shape, chunking, dtype and codecs.
    pub fn same_layout(&self, other: &ArrayMeta) -> bool {
        self.shape == other.shape
            && self.chunks == other.chunks
            && self.dtype == other.dtype
            && self.codecs == other.codecs
    }

    /// Compare at storage precision: an `f4` fill of -1e30 must match the
    /// rounded value actually stored.
    fn is_missing(&self, raw: f64) -> bool {
        let single = self.dtype.kind == NumberKind::Float && self.dtype.size == 4;
        self.missing.iter().any(|&m| {
            if single {
                m as f32 == raw as f32
            } else {
                m == raw
            }
        })
    }

    /// Decode raw chunk bytes into physical values; missing data is NaN.
    pub fn decode(&self, raw: &[u8]) -> Result<Vec<f64>> {
        let mut bytes = raw.to_vec();
        for codec in &self.codecs {
            bytes = codec.decode(bytes)?;
        }

        let expected = self.chunk_len() * self.dtype.size;
        if bytes.len() != expected {
            return Err(GridProcessorError::decompression(format!(
                "chunk decoded to {} bytes, expected {}",
                bytes.len(),
                expected
            )));
        }

        Ok(bytes
            .chunks_exact(self.dtype.size)
            .map(|b| {
                let raw = self.dtype.read(b);
                if raw.is_nan() || self.is_missing(raw) {
                    f64::NAN
                } else {
                    raw * self.scale_factor + self.add_offset
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::ZlibEncoder, Compression};
    use serde_json::json;
    use std::io::Write;

    fn shuffle(input: &[u8], element_size: usize) -> Vec<u8> {
        let count = input.len() / element_size;
        let mut out = vec![0u8; input.len()];
        for i in 0..count {
            for b in 0..element_size {
                out[b * count + i] = input[i * element_size + b];
            }
        }
        out
    }

    #[test]
    fn test_dtype_parse() {
        assert_eq!(
            DataType::parse("<f4").unwrap(),
            DataType { kind: NumberKind::Float, size: 4, big_endian: false }
        );
        assert!(DataType::parse(">i2").unwrap().big_endian);
        assert!(DataType::parse("|b1").is_err());
        assert!(DataType::parse("<c8").is_err());
    }

    #[test]
    fn test_big_endian_int_with_scale_and_fill() {
        let meta = ArrayMeta::from_json(
            &json!({"shape": [1, 2, 2], "chunks": [1, 2, 2], "dtype": ">i2",
                    "compressor": null, "fill_value": -9999, "order": "C"}),
            Some(&json!({"scale_factor": 0.1, "add_offset": 273.15})),
        )
        .unwrap();

        let mut raw = Vec::new();
        for v in [0i16, 10, -9999, 250] {
            raw.extend_from_slice(&v.to_be_bytes());
        }
        let values = meta.decode(&raw).unwrap();
        assert!((values[0] - 273.15).abs() < 1e-9);
        assert!((values[1] - 274.15).abs() < 1e-9);
        assert!(values[2].is_nan());
        assert!((values[3] - 298.15).abs() < 1e-9);
    }

    #[test]
    fn test_zlib_with_shuffle_filter() {
        // HDF5 style: deflate expressed as a filter after shuffle
        let meta = ArrayMeta::from_json(
            &json!({"shape": [3], "chunks": [3], "dtype": "<f4", "compressor": null,
                    "fill_value": "NaN",
                    "filters": [{"id": "shuffle", "elementsize": 4}, {"id": "zlib", "level": 4}]}),
            Some(&json!({"_FillValue": -999.0})),
        )
        .unwrap();

        let mut raw = Vec::new();
        for v in [1.5f32, -999.0, 42.0] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&shuffle(&raw, 4)).unwrap();
        let encoded = encoder.finish().unwrap();

        let values = meta.decode(&encoded).unwrap();
        assert_eq!(values[0], 1.5);
        assert!(values[1].is_nan());
        assert_eq!(values[2], 42.0);
    }

    #[test]
    fn test_rejects_wrong_length_and_unsupported() {
        let meta = ArrayMeta::from_json(
            &json!({"shape": [4], "chunks": [4], "dtype": "<f4", "compressor": null, "fill_value": null}),
            None,
        )
        .unwrap();
        assert!(meta.decode(&[0u8; 12]).is_err());

        let blosc = ArrayMeta::from_json(
            &json!({"shape": [4], "chunks": [4], "dtype": "<f4", "compressor": {"id": "blosc"}}),
            None,
        );
        assert!(blosc.is_err());
        let fortran = ArrayMeta::from_json(
            &json!({"shape": [4], "chunks": [4], "dtype": "<f4", "order": "F"}),
            None,
        );
        assert!(fortran.is_err());
    }
}
