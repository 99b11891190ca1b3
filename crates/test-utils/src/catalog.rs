//! Synthetic remote catalogs.
//!
//! Builds the layout the resolver expects, entirely in an
//! [`InMemory`] object store registered at `memory://catalog`:
//!
//! ```text
//! {year}/{%Y%m%d%H}.LDASIN_DOMAIN1.json   reference descriptor per step
//! data/{%Y%m%d%H}.bin                      every chunk of that step
//! ```
//!
//! Values come from a [`ValueFn`], so tests can compute expected means.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use flate2::{write::ZlibEncoder, Compression};
use object_store::{memory::InMemory, path::Path, ObjectStore};
use serde_json::{json, Map, Value};
use std::io::Write;
use std::sync::Arc;

use storage::StoreRouter;

use crate::fixtures::WGS84_WKT;
use crate::generators::{indexed_value, ValueFn};

pub const CATALOG_ROOT: &str = "memory://catalog";

/// The NWM forcing variables the default output columns read.
pub const NWM_VARIABLES: [&str; 7] = ["LWDOWN", "Q2D", "RAINRATE", "SWDOWN", "T2D", "U2D", "V2D"];

/// A catalog ready for use.
pub struct CatalogFixture {
    pub store: Arc<InMemory>,
    pub router: Arc<StoreRouter>,
    pub root: String,
    pub times: Vec<DateTime<Utc>>,
    /// Cell-centre axes written into the descriptors (if any).
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl CatalogFixture {
    pub fn data_path(time: &DateTime<Utc>) -> Path {
        Path::from(format!("data/{}.bin", time.format("%Y%m%d%H")))
    }

    pub fn descriptor_path(time: &DateTime<Utc>) -> Path {
        Path::from(format!(
            "{}/{}.LDASIN_DOMAIN1.json",
            time.format("%Y"),
            time.format("%Y%m%d%H")
        ))
    }

    /// Delete the chunk data of one step, so every read of it fails.
    pub async fn break_step(&self, step: usize) {
        let path = Self::data_path(&self.times[step]);
        self.store.delete(&path).await.expect("delete chunk data");
    }

    /// Put an arbitrary object into the catalog store.
    pub async fn put(&self, path: &str, body: impl Into<Bytes>) {
        let body: Bytes = body.into();
        self.store
            .put(&Path::from(path), body.into())
            .await
            .expect("put fixture object");
    }
}

pub struct SyntheticCatalog {
    rows: usize,
    cols: usize,
    chunk: (usize, usize),
    variables: Vec<String>,
    start: DateTime<Utc>,
    steps: usize,
    step: Duration,
    origin: (f64, f64),
    cell: f64,
    axes: bool,
    compress: bool,
    crs_attributes: Vec<(String, String)>,
    values: Box<ValueFn>,
}

impl SyntheticCatalog {
    /// A `rows` x `cols` geographic grid of unit cells whose top-left corner
    /// is (0, rows): column `c` is centred at `c + 0.5`, row `r` at
    /// `rows - r - 0.5`. Hourly steps from 2010-01-01T00.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            chunk: (2, 2),
            variables: vec!["T2D".to_string()],
            start: Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).single().unwrap_or_default(),
            steps: 3,
            step: Duration::hours(1),
            origin: (0.0, rows as f64),
            cell: 1.0,
            axes: true,
            compress: false,
            crs_attributes: vec![("crs_wkt".to_string(), WGS84_WKT.to_string())],
            values: Box::new(indexed_value),
        }
    }

    pub fn chunk_shape(mut self, rows: usize, cols: usize) -> Self {
        self.chunk = (rows, cols);
        self
    }

    pub fn variables(mut self, variables: &[&str]) -> Self {
        self.variables = variables.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn start(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    pub fn steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }

    pub fn step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Top-left corner and cell size of the grid.
    pub fn placement(mut self, left: f64, top: f64, cell: f64) -> Self {
        self.origin = (left, top);
        self.cell = cell;
        self
    }

    /// Leave out the x / y coordinate arrays.
    pub fn without_axes(mut self) -> Self {
        self.axes = false;
        self
    }

    /// zlib-compress every chunk.
    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    /// Replace the CRS attributes written on the `crs` variable.
    pub fn crs_attributes(mut self, attributes: &[(&str, &str)]) -> Self {
        self.crs_attributes = attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    pub fn values(mut self, values: impl Fn(&str, usize, usize, usize) -> f32 + Send + Sync + 'static) -> Self {
        self.values = Box::new(values);
        self
    }

    pub fn x_axis(&self) -> Vec<f64> {
        (0..self.cols)
            .map(|c| self.origin.0 + (c as f64 + 0.5) * self.cell)
            .collect()
    }

    pub fn y_axis(&self) -> Vec<f64> {
        (0..self.rows)
            .map(|r| self.origin.1 - (r as f64 + 0.5) * self.cell)
            .collect()
    }

    pub async fn build(self) -> CatalogFixture {
        let store = Arc::new(InMemory::new());
        let router = Arc::new(StoreRouter::default());
        router
            .register(CATALOG_ROOT, store.clone())
            .expect("register memory catalog");

        let times: Vec<DateTime<Utc>> = (0..self.steps)
            .map(|i| self.start + self.step * i as i32)
            .collect();

        for (step, time) in times.iter().enumerate() {
            let (descriptor, data) = self.step_objects(step, time);
            store
                .put(&CatalogFixture::data_path(time), Bytes::from(data).into())
                .await
                .expect("put chunk data");
            store
                .put(
                    &CatalogFixture::descriptor_path(time),
                    Bytes::from(descriptor.to_string()).into(),
                )
                .await
                .expect("put descriptor");
        }

        CatalogFixture {
            x: self.x_axis(),
            y: self.y_axis(),
            store,
            router,
            root: CATALOG_ROOT.to_string(),
            times,
        }
    }

    fn step_objects(&self, step: usize, time: &DateTime<Utc>) -> (Value, Vec<u8>) {
        let data_url = format!("{}/{}", CATALOG_ROOT, CatalogFixture::data_path(time));
        let mut refs = Map::new();
        let mut data = Vec::new();

        refs.insert(".zgroup".into(), json!(r#"{"zarr_format": 2}"#));
        refs.insert(".zattrs".into(), json!(r#"{"title": "synthetic forcing"}"#));
        let crs_attrs: Map<String, Value> = self
            .crs_attributes
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        refs.insert("crs/.zattrs".into(), json!(Value::Object(crs_attrs).to_string()));

        let compressor = if self.compress {
            json!({"id": "zlib", "level": 1})
        } else {
            Value::Null
        };

        let (cr, cc) = self.chunk;
        for name in &self.variables {
            let zarray = json!({
                "shape": [1, self.rows, self.cols],
                "chunks": [1, cr, cc],
                "dtype": "<f4",
                "compressor": compressor,
                "fill_value": "NaN",
                "filters": null,
                "order": "C",
                "zarr_format": 2
            });
            refs.insert(format!("{}/.zarray", name), json!(zarray.to_string()));
            refs.insert(
                format!("{}/.zattrs", name),
                json!(r#"{"_ARRAY_DIMENSIONS": ["Time", "south_north", "west_east"]}"#),
            );

            for cy in 0..self.rows.div_ceil(cr) {
                for cx in 0..self.cols.div_ceil(cc) {
                    let mut raw = Vec::with_capacity(cr * cc * 4);
                    for r in 0..cr {
                        for c in 0..cc {
                            let (row, col) = (cy * cr + r, cx * cc + c);
                            let v = if row < self.rows && col < self.cols {
                                (self.values)(name, step, row, col)
                            } else {
                                f32::NAN
                            };
                            raw.extend_from_slice(&v.to_le_bytes());
                        }
                    }
                    let raw = if self.compress { zlib(&raw) } else { raw };
                    refs.insert(
                        format!("{}/0.{}.{}", name, cy, cx),
                        json!([data_url, data.len(), raw.len()]),
                    );
                    data.extend_from_slice(&raw);
                }
            }
        }

        if self.axes {
            for (axis, values) in [("x", self.x_axis()), ("y", self.y_axis())] {
                let zarray = json!({
                    "shape": [values.len()],
                    "chunks": [values.len()],
                    "dtype": "<f8",
                    "compressor": null,
                    "fill_value": null,
                    "filters": null,
                    "order": "C",
                    "zarr_format": 2
                });
                refs.insert(format!("{}/.zarray", axis), json!(zarray.to_string()));
                let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                refs.insert(
                    format!("{}/0", axis),
                    json!(format!("base64:{}", STANDARD.encode(bytes))),
                );
            }
        }

        (json!({"version": 1, "templates": {}, "refs": refs}), data)
    }
}

fn zlib(raw: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(raw).expect("zlib encode");
    encoder.finish().expect("zlib finish")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_catalog_layout() {
        let catalog = SyntheticCatalog::new(3, 3).steps(2).build().await;
        assert_eq!(catalog.times.len(), 2);

        let (storage, _) = catalog.router.resolve(&catalog.root).unwrap();
        let descriptor = storage
            .get(&CatalogFixture::descriptor_path(&catalog.times[1]))
            .await
            .unwrap();
        let value: Value = serde_json::from_slice(&descriptor).unwrap();
        // 2x2 chunks over a 3x3 grid
        assert!(value["refs"]["T2D/0.1.1"].is_array());
        assert!(value["refs"]["x/0"].as_str().unwrap().starts_with("base64:"));
        assert_eq!(catalog.y, vec![2.5, 1.5, 0.5]);
    }
}
