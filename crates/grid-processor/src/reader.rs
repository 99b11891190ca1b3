//! Slice reads against a virtual array index.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, instrument};

use forcing_common::{CellWindow, RasterSlice, TimePartition};
use storage::StoreRouter;

use crate::config::ReaderConfig;
use crate::error::{GridProcessorError, Result};
use crate::index::{ChunkRef, VariableLayout, VirtualArrayIndex};

/// Reads partitions of the index into memory.
///
/// Only chunks intersecting the requested window are fetched, each with a
/// single byte-range request. Chunk coordinates the descriptor does not
/// reference read as NaN.
#[derive(Clone)]
pub struct SliceReader {
    router: Arc<StoreRouter>,
    index: Arc<VirtualArrayIndex>,
    config: ReaderConfig,
}

impl SliceReader {
    pub fn new(router: Arc<StoreRouter>, index: Arc<VirtualArrayIndex>, config: ReaderConfig) -> Self {
        Self {
            router,
            index,
            config,
        }
    }

    pub fn index(&self) -> &VirtualArrayIndex {
        &self.index
    }

    #[instrument(skip(self, variables), fields(partition = partition.index, window = ?window))]
    pub async fn read_slice(
        &self,
        partition: &TimePartition,
        window: &CellWindow,
        variables: &[String],
    ) -> Result<RasterSlice> {
        let entries = self
            .index
            .entries()
            .get(partition.start..partition.end)
            .ok_or_else(|| {
                GridProcessorError::read_failed(format!(
                    "partition {} [{}, {}) outside index of {} entries",
                    partition.index,
                    partition.start,
                    partition.end,
                    self.index.len()
                ))
            })?;

        let times = entries.iter().map(|e| e.time).collect();
        let mut slice = RasterSlice::empty(times, *window, variables.to_vec());

        let mut requests = Vec::new();
        for (v, name) in variables.iter().enumerate() {
            let layout = self.index.layout(name).ok_or_else(|| {
                GridProcessorError::ConfigError(format!("variable {} is not indexed", name))
            })?;
            let coords = layout.chunks_for_window(window);
            for (t, entry) in entries.iter().enumerate() {
                for &coord in &coords {
                    if let Some(chunk) = entry.chunk(name, coord) {
                        requests.push(ChunkRequest {
                            variable: v,
                            step: t,
                            coord,
                            time: entry.time,
                            layout: layout.clone(),
                            chunk: chunk.clone(),
                        });
                    }
                }
            }
        }

        debug!(chunks = requests.len(), steps = entries.len(), "Reading chunks");

        let router = self.router.clone();
        let mut reads = stream::iter(requests)
            .map(move |request| {
                let router = router.clone();
                async move {
                    let bytes = fetch_chunk(&router, &request.chunk).await.map_err(|e| {
                        GridProcessorError::read_failed(format!(
                            "{} chunk {:?} at {}: {}",
                            request.layout.name, request.coord, request.time, e
                        ))
                    })?;
                    let values = request.layout.meta.decode(&bytes)?;
                    Ok::<_, GridProcessorError>((request, values))
                }
            })
            .buffer_unordered(self.config.read_concurrency.max(1));

        while let Some(read) = reads.next().await {
            let (request, values) = read?;
            copy_chunk(
                slice.step_mut(request.variable, request.step),
                window,
                request.layout.chunk_shape(),
                request.coord,
                &values,
            );
        }

        Ok(slice)
    }
}

/// One chunk fetch. Owned, so read futures are `Send` on spawned tasks.
struct ChunkRequest {
    variable: usize,
    step: usize,
    coord: (usize, usize),
    time: DateTime<Utc>,
    layout: VariableLayout,
    chunk: ChunkRef,
}

/// Fetch the raw bytes of one chunk.
pub(crate) async fn fetch_chunk(router: &StoreRouter, chunk: &ChunkRef) -> Result<Bytes> {
    match chunk {
        ChunkRef::Inline(bytes) => Ok(bytes.clone()),
        ChunkRef::Remote { url, offset, length } => {
            let (storage, path) = router.resolve(url)?;
            let start = *offset as usize;
            match length {
                Some(len) => Ok(storage.get_range(&path, start..start + *len as usize).await?),
                None => {
                    let bytes = storage.get(&path).await?;
                    if start > bytes.len() {
                        return Err(GridProcessorError::read_failed(format!(
                            "offset {} beyond end of {}",
                            start, url
                        )));
                    }
                    Ok(bytes.slice(start..))
                }
            }
        }
    }
}

/// Copy the part of a decoded chunk that overlaps the window.
///
/// Chunks are stored padded to the full chunk shape, so the row stride is
/// always the chunk width.
fn copy_chunk(
    out: &mut [f32],
    window: &CellWindow,
    (chunk_h, chunk_w): (usize, usize),
    (cy, cx): (usize, usize),
    values: &[f64],
) {
    let chunk_start_row = cy * chunk_h;
    let chunk_start_col = cx * chunk_w;

    let overlap_start_row = window.row_start.max(chunk_start_row);
    let overlap_end_row = window.row_end.min(chunk_start_row + chunk_h);
    let overlap_start_col = window.col_start.max(chunk_start_col);
    let overlap_end_col = window.col_end.min(chunk_start_col + chunk_w);

    for row in overlap_start_row..overlap_end_row {
        let chunk_row = row - chunk_start_row;
        let out_row = row - window.row_start;
        for col in overlap_start_col..overlap_end_col {
            let chunk_idx = chunk_row * chunk_w + (col - chunk_start_col);
            let out_idx = out_row * window.cols() + (col - window.col_start);
            if let Some(&v) = values.get(chunk_idx) {
                out[out_idx] = v as f32;
            }
        }
    }
}
