//! The virtual array index: a time-concatenated view over many reference
//! descriptors that holds chunk locations, never array values.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use forcing_common::{CellWindow, RasterMetadata};

use crate::codec::ArrayMeta;
use crate::error::{GridProcessorError, Result};

/// Where one chunk's bytes live.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkRef {
    Inline(Bytes),
    /// `length == None` reads the whole object.
    Remote {
        url: String,
        offset: u64,
        length: Option<u64>,
    },
}

/// On-disk layout of one variable, identical across fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableLayout {
    pub name: String,
    pub meta: ArrayMeta,
}

impl VariableLayout {
    /// Spatial (rows, cols): the trailing two dimensions.
    pub fn shape(&self) -> (usize, usize) {
        let r = self.meta.rank();
        (self.meta.shape[r - 2], self.meta.shape[r - 1])
    }

    pub fn chunk_shape(&self) -> (usize, usize) {
        let r = self.meta.rank();
        (self.meta.chunks[r - 2], self.meta.chunks[r - 1])
    }

    /// Spatial chunk coordinates intersecting a window, row-major.
    pub fn chunks_for_window(&self, window: &CellWindow) -> Vec<(usize, usize)> {
        let (rows, cols) = self.shape();
        let (cr, cc) = self.chunk_shape();
        if window.is_empty() {
            return Vec::new();
        }
        let row_end = window.row_end.min(rows);
        let col_end = window.col_end.min(cols);
        let min_chunk_y = window.row_start / cr;
        let max_chunk_y = row_end.div_ceil(cr);
        let min_chunk_x = window.col_start / cc;
        let max_chunk_x = col_end.div_ceil(cc);

        (min_chunk_y..max_chunk_y)
            .flat_map(|cy| (min_chunk_x..max_chunk_x).map(move |cx| (cy, cx)))
            .collect()
    }
}

/// One descriptor's contribution: a single time step.
#[derive(Debug, Clone)]
pub struct FragmentEntry {
    pub time: DateTime<Utc>,
    /// URL of the reference descriptor.
    pub descriptor: String,
    /// Per variable, spatial chunk coordinate to chunk location. Absent
    /// coordinates read as fill.
    pub chunks: BTreeMap<String, HashMap<(usize, usize), ChunkRef>>,
}

impl FragmentEntry {
    pub fn chunk(&self, variable: &str, coord: (usize, usize)) -> Option<&ChunkRef> {
        self.chunks.get(variable)?.get(&coord)
    }
}

#[derive(Debug, Clone)]
pub struct VirtualArrayIndex {
    variables: BTreeMap<String, VariableLayout>,
    entries: Vec<FragmentEntry>,
    raster: RasterMetadata,
}

impl VirtualArrayIndex {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in strictly increasing time order.
    pub fn entries(&self) -> &[FragmentEntry] {
        &self.entries
    }

    pub fn times(&self) -> Vec<DateTime<Utc>> {
        self.entries.iter().map(|e| e.time).collect()
    }

    pub fn variables(&self) -> &BTreeMap<String, VariableLayout> {
        &self.variables
    }

    pub fn layout(&self, variable: &str) -> Option<&VariableLayout> {
        self.variables.get(variable)
    }

    pub fn raster(&self) -> &RasterMetadata {
        &self.raster
    }

    pub(crate) fn set_axes(&mut self, x: Option<Vec<f64>>, y: Option<Vec<f64>>) {
        self.raster.x = x;
        self.raster.y = y;
    }
}

/// Accumulates fragments in any arrival order.
#[derive(Debug, Default)]
pub struct VirtualIndexBuilder {
    variables: Option<BTreeMap<String, VariableLayout>>,
    entries: BTreeMap<DateTime<Utc>, FragmentEntry>,
    raster: Option<(DateTime<Utc>, RasterMetadata)>,
}

impl VirtualIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a fragment with its layouts and raster metadata.
    ///
    /// The raster metadata of the earliest fragment wins.
    pub fn add(
        &mut self,
        entry: FragmentEntry,
        layouts: BTreeMap<String, VariableLayout>,
        raster: RasterMetadata,
    ) -> Result<()> {
        if self.entries.contains_key(&entry.time) {
            return Err(GridProcessorError::DuplicateTimestamp(format!(
                "{} ({})",
                entry.time, entry.descriptor
            )));
        }

        match &self.variables {
            None => self.variables = Some(layouts),
            Some(existing) => check_layouts(existing, &layouts, &entry.descriptor)?,
        }

        let earlier = self.raster.as_ref().map_or(true, |(t, _)| entry.time < *t);
        if earlier {
            self.raster = Some((entry.time, raster));
        }

        self.entries.insert(entry.time, entry);
        Ok(())
    }

    /// `None` when nothing was added.
    pub fn finish(self) -> Option<VirtualArrayIndex> {
        let variables = self.variables?;
        let (_, raster) = self.raster?;
        Some(VirtualArrayIndex {
            variables,
            entries: self.entries.into_values().collect(),
            raster,
        })
    }
}

fn check_layouts(
    expected: &BTreeMap<String, VariableLayout>,
    actual: &BTreeMap<String, VariableLayout>,
    descriptor: &str,
) -> Result<()> {
    if expected.keys().ne(actual.keys()) {
        return Err(GridProcessorError::inconsistent_fragment(
            descriptor,
            format!(
                "variables {:?} differ from {:?}",
                actual.keys().collect::<Vec<_>>(),
                expected.keys().collect::<Vec<_>>()
            ),
        ));
    }
    for (name, layout) in expected {
        if let Some(other) = actual.get(name) {
            if !layout.meta.same_layout(&other.meta) {
                return Err(GridProcessorError::inconsistent_fragment(
                    descriptor,
                    format!("layout of {} differs from the first fragment", name),
                ));
            }
        }
    }
    Ok(())
}
