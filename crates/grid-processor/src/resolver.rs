//! Remote chunk catalog resolver.
//!
//! Lists descriptor files year by year under the catalog root, keeps the
//! ones whose file name timestamp falls in the requested range, and folds
//! them into a [`VirtualArrayIndex`].

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use forcing_common::{parse_with_format, RasterMetadata, TimeRange};
use object_store::path::Path;
use storage::StoreRouter;

use crate::codec::ArrayMeta;
use crate::config::ResolverConfig;
use crate::error::{GridProcessorError, Result};
use crate::index::{ChunkRef, FragmentEntry, VariableLayout, VirtualArrayIndex, VirtualIndexBuilder};
use crate::reader::fetch_chunk;
use crate::reference::{ReferenceSet, ReferenceValue};

/// A 1-D coordinate array as referenced by a descriptor.
#[derive(Debug, Clone)]
pub struct AxisRef {
    pub meta: ArrayMeta,
    /// Chunk index to location, ordered.
    pub chunks: BTreeMap<usize, ChunkRef>,
}

/// Everything extracted from one descriptor.
#[derive(Debug, Clone)]
pub struct ParsedFragment {
    pub entry: FragmentEntry,
    pub layouts: BTreeMap<String, VariableLayout>,
    pub raster: RasterMetadata,
    pub x: Option<AxisRef>,
    pub y: Option<AxisRef>,
}

pub struct CatalogResolver {
    router: Arc<StoreRouter>,
    config: ResolverConfig,
}

impl CatalogResolver {
    pub fn new(router: Arc<StoreRouter>, config: ResolverConfig) -> Self {
        Self { router, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Build the index for `[range.start, range.end]`.
    #[instrument(skip(self), fields(root = %self.config.root))]
    pub async fn resolve(&self, range: &TimeRange) -> Result<VirtualArrayIndex> {
        let descriptors = self.list_descriptors(range).await?;
        info!(
            count = descriptors.len(),
            start = %range.start,
            end = %range.end,
            "Found catalog descriptors"
        );
        if descriptors.is_empty() {
            return Err(empty_range(range));
        }

        let (storage, _) = self
            .router
            .resolve(&self.config.root)
            .map_err(|e| GridProcessorError::source_unavailable(e.to_string()))?;

        let mut fetches = stream::iter(descriptors)
            .map(|(time, path)| {
                let storage = storage.clone();
                async move {
                    let url = storage.url(&path);
                    let bytes = storage
                        .get(&path)
                        .await
                        .map_err(|e| GridProcessorError::source_unavailable(format!("{}: {}", url, e)))?;
                    Ok::<_, GridProcessorError>((time, url, bytes))
                }
            })
            .buffer_unordered(self.config.fetch_concurrency.max(1));

        let mut builder = VirtualIndexBuilder::new();
        let mut first_axes: Option<(DateTime<Utc>, Option<AxisRef>, Option<AxisRef>)> = None;

        while let Some(fetched) = fetches.next().await {
            let (time, url, bytes) = fetched?;
            let refs = ReferenceSet::parse(&bytes, &url)?;
            let fragment = parse_fragment(&refs, time, &url, &self.config)?;
            debug!(descriptor = %url, refs = refs.len(), "Parsed descriptor");

            if first_axes.as_ref().map_or(true, |(t, _, _)| time < *t) {
                first_axes = Some((time, fragment.x, fragment.y));
            }
            builder.add(fragment.entry, fragment.layouts, fragment.raster)?;
        }

        let mut index = builder.finish().ok_or_else(|| empty_range(range))?;

        if let Some((_, x, y)) = first_axes {
            let (rows, cols) = index.raster().shape;
            let x = match x {
                Some(axis) => Some(self.decode_axis(&axis, cols, &self.config.x_variable).await?),
                None => None,
            };
            let y = match y {
                Some(axis) => Some(self.decode_axis(&axis, rows, &self.config.y_variable).await?),
                None => None,
            };
            index.set_axes(x, y);
        }

        info!(
            entries = index.len(),
            variables = index.variables().len(),
            shape = ?index.raster().shape,
            "Built virtual array index"
        );
        Ok(index)
    }

    /// Stream each year's listing; skip entries before `start` and stop the
    /// year at the first entry after `end`. Stores without ordered listings,
    /// and file names that do not sort in time order, are scanned to the end
    /// of each year instead.
    async fn list_descriptors(&self, range: &TimeRange) -> Result<Vec<(DateTime<Utc>, Path)>> {
        let (storage, base) = self
            .router
            .resolve(&self.config.root)
            .map_err(|e| GridProcessorError::source_unavailable(e.to_string()))?;

        let stop_early = storage.ordered_listing() && self.config.names_sort_chronologically();
        let mut found = Vec::new();
        for year in range.years() {
            let prefix = base.child(year.to_string());
            debug!(prefix = %prefix, "Listing catalog year");

            let mut listing = storage.list(&prefix);
            while let Some(meta) = listing
                .try_next()
                .await
                .map_err(|e| GridProcessorError::source_unavailable(e.to_string()))?
            {
                let Some(name) = meta.location.filename() else {
                    continue;
                };
                let stem = name.split('.').next().unwrap_or(name);
                let Some(time) = parse_with_format(stem, &self.config.filename_time_format) else {
                    debug!(path = %meta.location, "Skipping entry without timestamp");
                    continue;
                };

                if time < range.start {
                    continue;
                }
                if time > range.end {
                    if stop_early {
                        break;
                    }
                    continue;
                }
                found.push((time, meta.location));
            }
        }
        if !stop_early {
            found.sort_by_key(|(time, _)| *time);
        }
        Ok(found)
    }

    async fn decode_axis(&self, axis: &AxisRef, expected: usize, name: &str) -> Result<Vec<f64>> {
        let chunk_len = axis.meta.chunk_len();
        let mut values = Vec::with_capacity(axis.meta.shape[0]);
        let chunk_count = axis.meta.shape[0].div_ceil(chunk_len);
        for i in 0..chunk_count {
            match axis.chunks.get(&i) {
                Some(chunk) => {
                    let bytes = fetch_chunk(&self.router, chunk).await?;
                    values.extend(axis.meta.decode(&bytes)?);
                }
                None => values.extend(std::iter::repeat(f64::NAN).take(chunk_len)),
            }
        }
        values.truncate(axis.meta.shape[0]);

        if values.len() != expected {
            return Err(GridProcessorError::invalid_descriptor(
                name,
                format!("axis has {} values, grid has {}", values.len(), expected),
            ));
        }
        Ok(values)
    }
}

fn empty_range(range: &TimeRange) -> GridProcessorError {
    GridProcessorError::EmptyRange {
        start: range.start.to_rfc3339(),
        end: range.end.to_rfc3339(),
    }
}

/// Extract the configured variables, CRS attributes and axis references.
pub fn parse_fragment(
    refs: &ReferenceSet,
    time: DateTime<Utc>,
    descriptor: &str,
    config: &ResolverConfig,
) -> Result<ParsedFragment> {
    let invalid = |msg: String| GridProcessorError::invalid_descriptor(descriptor, msg);

    let mut layouts = BTreeMap::new();
    let mut chunks = BTreeMap::new();
    let mut shape: Option<(usize, usize)> = None;

    for name in &config.variables {
        let meta = array_meta(refs, name)
            .map_err(invalid)?
            .ok_or_else(|| invalid(format!("variable {} not present", name)))?;

        let rank = meta.rank();
        if rank < 2 {
            return Err(invalid(format!("{} has rank {}, need at least 2", name, rank)));
        }
        if meta.shape[..rank - 2].iter().any(|&d| d != 1) {
            return Err(invalid(format!(
                "{} has shape {:?}; leading dimensions must be 1 per fragment",
                name, meta.shape
            )));
        }

        let layout = VariableLayout {
            name: name.clone(),
            meta,
        };
        match shape {
            None => shape = Some(layout.shape()),
            Some(s) if s != layout.shape() => {
                return Err(invalid(format!(
                    "{} spans {:?}, other variables {:?}",
                    name,
                    layout.shape(),
                    s
                )))
            }
            Some(_) => {}
        }

        let mut var_chunks = HashMap::new();
        for (key, value) in refs.chunks_of(name) {
            let idx = chunk_index(key, rank).ok_or_else(|| invalid(format!("bad chunk key {}/{}", name, key)))?;
            if idx[..rank - 2].iter().any(|&i| i != 0) {
                return Err(invalid(format!("chunk {}/{} outside the time step", name, key)));
            }
            var_chunks.insert((idx[rank - 2], idx[rank - 1]), chunk_ref(value));
        }

        chunks.insert(name.clone(), var_chunks);
        layouts.insert(name.clone(), layout);
    }

    let mut crs_attributes = BTreeMap::new();
    for key in [".zattrs".to_string(), format!("{}/.zattrs", config.crs_variable)] {
        if let Some(Value::Object(attrs)) = refs.json(&key).map_err(invalid)? {
            for (k, v) in attrs {
                if let Value::String(s) = v {
                    crs_attributes.insert(k, s);
                }
            }
        }
    }

    let x = axis_ref(refs, &config.x_variable).map_err(invalid)?;
    let y = axis_ref(refs, &config.y_variable).map_err(invalid)?;

    Ok(ParsedFragment {
        entry: FragmentEntry {
            time,
            descriptor: descriptor.to_string(),
            chunks,
        },
        layouts,
        raster: RasterMetadata {
            shape: shape.unwrap_or_default(),
            crs_attributes,
            x: None,
            y: None,
        },
        x,
        y,
    })
}

fn array_meta(refs: &ReferenceSet, name: &str) -> std::result::Result<Option<ArrayMeta>, String> {
    let Some(zarray) = refs.json(&format!("{}/.zarray", name))? else {
        return Ok(None);
    };
    let zattrs = refs.json(&format!("{}/.zattrs", name))?;
    ArrayMeta::from_json(&zarray, zattrs.as_ref())
        .map(Some)
        .map_err(|e| format!("{}: {}", name, e))
}

fn axis_ref(refs: &ReferenceSet, name: &str) -> std::result::Result<Option<AxisRef>, String> {
    let Some(meta) = array_meta(refs, name)? else {
        return Ok(None);
    };
    if meta.rank() != 1 {
        return Err(format!("coordinate {} has rank {}", name, meta.rank()));
    }
    let chunks = refs
        .chunks_of(name)
        .map(|(key, value)| {
            let idx = chunk_index(key, 1).ok_or_else(|| format!("bad chunk key {}/{}", name, key))?;
            Ok((idx[0], chunk_ref(value)))
        })
        .collect::<std::result::Result<BTreeMap<_, _>, String>>()?;
    Ok(Some(AxisRef { meta, chunks }))
}

fn chunk_index(key: &str, rank: usize) -> Option<Vec<usize>> {
    let idx: Vec<usize> = key.split('.').map(|p| p.parse().ok()).collect::<Option<_>>()?;
    (idx.len() == rank).then_some(idx)
}

fn chunk_ref(value: &ReferenceValue) -> ChunkRef {
    match value {
        ReferenceValue::Inline(bytes) => ChunkRef::Inline(bytes.clone()),
        ReferenceValue::Remote { url, offset, length } => ChunkRef::Remote {
            url: url.clone(),
            offset: *offset,
            length: Some(*length),
        },
        ReferenceValue::WholeObject { url } => ChunkRef::Remote {
            url: url.clone(),
            offset: 0,
            length: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> ResolverConfig {
        ResolverConfig {
            root: "memory://catalog".to_string(),
            variables: vec!["T2D".to_string()],
            ..Default::default()
        }
    }

    fn descriptor(shape: &str) -> Vec<u8> {
        format!(
            r#"{{
                ".zattrs": "{{\"title\": \"OUTPUT FROM WRF-Hydro\"}}",
                "crs/.zattrs": "{{\"esri_pe_string\": \"PROJCS[]\"}}",
                "T2D/.zarray": "{{\"shape\": {shape}, \"chunks\": [1, 2, 2], \"dtype\": \"<f4\", \"compressor\": null, \"fill_value\": null, \"order\": \"C\", \"zarr_format\": 2}}",
                "T2D/0.0.0": ["s3://bucket/2010010100.LDASIN_DOMAIN1", 100, 16],
                "T2D/0.1.1": ["s3://bucket/2010010100.LDASIN_DOMAIN1"]
            }}"#
        )
        .into_bytes()
    }

    #[test]
    fn test_parse_fragment() {
        let refs = ReferenceSet::parse(&descriptor("[1, 4, 4]"), "d").unwrap();
        let t = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
        let fragment = parse_fragment(&refs, t, "d", &config()).unwrap();

        assert_eq!(fragment.raster.shape, (4, 4));
        assert_eq!(fragment.raster.crs_attributes["esri_pe_string"], "PROJCS[]");
        assert!(fragment.x.is_none());
        assert_eq!(fragment.entry.chunks["T2D"].len(), 2);
        assert_eq!(
            fragment.entry.chunk("T2D", (1, 1)),
            Some(&ChunkRef::Remote {
                url: "s3://bucket/2010010100.LDASIN_DOMAIN1".to_string(),
                offset: 0,
                length: None
            })
        );
    }

    #[test]
    fn test_parse_fragment_rejects_bad_layouts() {
        let t = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
        let refs = ReferenceSet::parse(&descriptor("[2, 4, 4]"), "d").unwrap();
        assert!(parse_fragment(&refs, t, "d", &config()).is_err());

        let mut missing = config();
        missing.variables.push("Q2D".to_string());
        let refs = ReferenceSet::parse(&descriptor("[1, 4, 4]"), "d").unwrap();
        assert!(matches!(
            parse_fragment(&refs, t, "d", &missing),
            Err(GridProcessorError::InvalidDescriptor { .. })
        ));
    }
}
