//! kerchunk-style reference sets.
//!
//! A reference set maps zarr keys (`T2D/.zarray`, `T2D/0.0.0`, ...) to
//! either inline content or a byte range in some remote object. Version 0
//! is a bare map; version 1 wraps it as
//! `{"version": 1, "templates": {...}, "refs": {...}}` and allows
//! `{{name}}` placeholders in urls.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::error::{GridProcessorError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceValue {
    Inline(Bytes),
    /// `[url, offset, length]`
    Remote { url: String, offset: u64, length: u64 },
    /// `[url]`
    WholeObject { url: String },
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    refs: BTreeMap<String, ReferenceValue>,
}

impl ReferenceSet {
    /// Parse a reference descriptor. `descriptor` is only used in errors.
    pub fn parse(json: &[u8], descriptor: &str) -> Result<Self> {
        let invalid = |msg: String| GridProcessorError::invalid_descriptor(descriptor, msg);

        let root: Value = serde_json::from_slice(json).map_err(|e| invalid(e.to_string()))?;
        let Value::Object(root) = root else {
            return Err(invalid("top level is not an object".to_string()));
        };

        let (refs, templates) = match root.get("version") {
            Some(version) => {
                if version.as_u64() != Some(1) {
                    return Err(invalid(format!("unsupported reference version {}", version)));
                }
                let refs = match root.get("refs") {
                    Some(Value::Object(refs)) => refs,
                    _ => return Err(invalid("version 1 descriptor without refs".to_string())),
                };
                let templates: HashMap<String, String> = match root.get("templates") {
                    Some(Value::Object(t)) => t
                        .iter()
                        .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                        .collect(),
                    _ => HashMap::new(),
                };
                (refs, templates)
            }
            None => (&root, HashMap::new()),
        };

        let mut parsed = BTreeMap::new();
        for (key, value) in refs {
            let value = parse_value(value, &templates).map_err(|msg| invalid(format!("{}: {}", key, msg)))?;
            parsed.insert(key.clone(), value);
        }

        Ok(Self { refs: parsed })
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ReferenceValue> {
        self.refs.get(key)
    }

    /// Inline JSON metadata (`.zarray`, `.zattrs`, ...) under `key`.
    ///
    /// Metadata must be inline; returns `Ok(None)` when the key is absent.
    pub fn json(&self, key: &str) -> std::result::Result<Option<Value>, String> {
        match self.refs.get(key) {
            None => Ok(None),
            Some(ReferenceValue::Inline(bytes)) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| format!("{}: {}", key, e)),
            Some(_) => Err(format!("{} is not inline metadata", key)),
        }
    }

    /// Chunk keys of one array: `var/i.j.k` entries, excluding `.z*` metadata.
    pub fn chunks_of<'a>(&'a self, variable: &'a str) -> impl Iterator<Item = (&'a str, &'a ReferenceValue)> + 'a {
        let prefix = format!("{}/", variable);
        self.refs
            .range(prefix.clone()..)
            .take_while(move |(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, v)| {
                let (_, name) = k.rsplit_once('/')?;
                (!name.starts_with('.')).then_some((name, v))
            })
    }
}

fn parse_value(value: &Value, templates: &HashMap<String, String>) -> std::result::Result<ReferenceValue, String> {
    match value {
        Value::String(s) => match s.strip_prefix("base64:") {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map(|b| ReferenceValue::Inline(Bytes::from(b)))
                .map_err(|e| format!("bad base64: {}", e)),
            None => Ok(ReferenceValue::Inline(Bytes::from(s.clone()))),
        },
        // Some writers embed metadata as an object rather than a string
        Value::Object(_) => Ok(ReferenceValue::Inline(Bytes::from(value.to_string()))),
        Value::Array(parts) => {
            let url = parts
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| "reference without url".to_string())?;
            let url = expand_templates(url, templates)?;
            match parts.len() {
                1 => Ok(ReferenceValue::WholeObject { url }),
                3 => {
                    let offset = parts[1].as_u64().ok_or_else(|| "offset is not an integer".to_string())?;
                    let length = parts[2].as_u64().ok_or_else(|| "length is not an integer".to_string())?;
                    Ok(ReferenceValue::Remote { url, offset, length })
                }
                n => Err(format!("reference with {} elements", n)),
            }
        }
        other => Err(format!("unexpected reference value {}", other)),
    }
}

fn expand_templates(url: &str, templates: &HashMap<String, String>) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(url.len());
    let mut rest = url;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| format!("unterminated template in {}", url))?;
        let name = after[..end].trim();
        let value = templates
            .get(name)
            .ok_or_else(|| format!("unknown template {{{{{}}}}}", name))?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_0() {
        let json = br#"{
            ".zgroup": "{\"zarr_format\": 2}",
            "T2D/.zarray": "{\"shape\": [1, 4, 4]}",
            "T2D/0.0.0": ["s3://bucket/2010/2010010100.LDASIN_DOMAIN1", 1024, 256],
            "T2D/0.0.1": ["s3://bucket/2010/2010010100.LDASIN_DOMAIN1"],
            "x/0": "base64:AAAAAA=="
        }"#;
        let refs = ReferenceSet::parse(json, "test").unwrap();
        assert_eq!(refs.len(), 5);
        assert_eq!(
            refs.get("T2D/0.0.0"),
            Some(&ReferenceValue::Remote {
                url: "s3://bucket/2010/2010010100.LDASIN_DOMAIN1".to_string(),
                offset: 1024,
                length: 256
            })
        );
        assert_eq!(refs.get("x/0"), Some(&ReferenceValue::Inline(Bytes::from_static(&[0, 0, 0, 0]))));
        assert!(refs.json("T2D/.zarray").unwrap().is_some());
        assert!(refs.json("T2D/0.0.0").is_err());

        let chunks: Vec<&str> = refs.chunks_of("T2D").map(|(k, _)| k).collect();
        assert_eq!(chunks, vec!["0.0.0", "0.0.1"]);
    }

    #[test]
    fn test_version_1_templates() {
        let json = br#"{
            "version": 1,
            "templates": {"u": "s3://noaa-nwm-retrospective-2-1-pds/forcing/2010"},
            "refs": {"RAINRATE/0.0.0": ["{{u}}/2010010100.LDASIN_DOMAIN1", 10, 20]}
        }"#;
        let refs = ReferenceSet::parse(json, "test").unwrap();
        match refs.get("RAINRATE/0.0.0").unwrap() {
            ReferenceValue::Remote { url, .. } => {
                assert_eq!(url, "s3://noaa-nwm-retrospective-2-1-pds/forcing/2010/2010010100.LDASIN_DOMAIN1")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed() {
        assert!(ReferenceSet::parse(b"[1, 2]", "d").is_err());
        assert!(ReferenceSet::parse(br#"{"version": 2, "refs": {}}"#, "d").is_err());
        assert!(ReferenceSet::parse(br#"{"a/0": ["u", 1]}"#, "d").is_err());
        assert!(ReferenceSet::parse(br#"{"version": 1, "refs": {"a/0": ["{{missing}}/x"]}}"#, "d").is_err());
    }
}
