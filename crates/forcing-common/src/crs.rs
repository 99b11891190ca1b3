//! Coordinate reference system definitions.
//!
//! Rasters describe their CRS through free-form attributes (WKT1 as written
//! by GDAL or ESRI, a WKT2 subset, PROJ strings) and zone files through an
//! EPSG code. All of them are reduced to [`CrsDefinition`]. Geographic and
//! Lambert systems carry their parameters directly; every other projection
//! is kept as a normalized PROJ string for the general-purpose path in the
//! projection crate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{CommonError, CommonResult};
use crate::wkt::{parse_wkt, WktNode};

/// Lambert Conformal Conic used by the National Water Model forcing grids.
///
/// Provided for explicit use as a fallback projection; nothing applies it
/// automatically.
pub const NWM_LAMBERT_PROJ: &str =
    "+proj=lcc +lat_1=30 +lat_2=60 +lat_0=40.0000076293945 +lon_0=-97 +x_0=0 +y_0=0 +a=6370000 +b=6370000 +units=m +no_defs";

/// Reference ellipsoid. `inverse_flattening == 0` denotes a sphere.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipsoid {
    pub semi_major: f64,
    pub inverse_flattening: f64,
}

impl Ellipsoid {
    pub fn wgs84() -> Self {
        Self {
            semi_major: 6_378_137.0,
            inverse_flattening: 298.257_223_563,
        }
    }

    pub fn grs80() -> Self {
        Self {
            semi_major: 6_378_137.0,
            inverse_flattening: 298.257_222_101,
        }
    }

    pub fn sphere(radius: f64) -> Self {
        Self {
            semi_major: radius,
            inverse_flattening: 0.0,
        }
    }

    /// Build from semi-axes; equal axes give a sphere.
    pub fn from_axes(a: f64, b: f64) -> Self {
        if (a - b).abs() < 1e-9 {
            Self::sphere(a)
        } else {
            Self {
                semi_major: a,
                inverse_flattening: a / (a - b),
            }
        }
    }

    pub fn is_sphere(&self) -> bool {
        self.inverse_flattening == 0.0
    }

    pub fn flattening(&self) -> f64 {
        if self.is_sphere() {
            0.0
        } else {
            1.0 / self.inverse_flattening
        }
    }

    pub fn eccentricity(&self) -> f64 {
        let f = self.flattening();
        (2.0 * f - f * f).sqrt()
    }

    pub fn semi_minor(&self) -> f64 {
        self.semi_major * (1.0 - self.flattening())
    }

    fn approx_eq(&self, other: &Ellipsoid) -> bool {
        (self.semi_major - other.semi_major).abs() < 1e-3
            && (self.flattening() - other.flattening()).abs() < 1e-12
    }
}

/// Parameters of a Lambert Conformal Conic projection (degrees, metres).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LambertConformalParams {
    pub lat_1: f64,
    pub lat_2: f64,
    pub lat_0: f64,
    pub lon_0: f64,
    #[serde(default)]
    pub false_easting: f64,
    #[serde(default)]
    pub false_northing: f64,
    pub ellipsoid: Ellipsoid,
    /// Metres per projected unit.
    #[serde(default = "one")]
    pub unit_to_meter: f64,
}

fn one() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrsDefinition {
    /// Longitude / latitude in degrees.
    Geographic { ellipsoid: Ellipsoid },
    LambertConformalConic(LambertConformalParams),
    /// Any other projected system, as a PROJ string.
    Projected { proj: String },
}

impl CrsDefinition {
    pub fn wgs84() -> Self {
        CrsDefinition::Geographic {
            ellipsoid: Ellipsoid::wgs84(),
        }
    }

    /// The NWM forcing Lambert grid, see [`NWM_LAMBERT_PROJ`].
    pub fn nwm_lambert() -> Self {
        CrsDefinition::LambertConformalConic(LambertConformalParams {
            lat_1: 30.0,
            lat_2: 60.0,
            lat_0: 40.000_007_629_394_5,
            lon_0: -97.0,
            false_easting: 0.0,
            false_northing: 0.0,
            ellipsoid: Ellipsoid::sphere(6_370_000.0),
            unit_to_meter: 1.0,
        })
    }

    /// Parse any supported textual form.
    ///
    /// Accepts:
    /// - WKT1 (`GEOGCS`, `PROJCS`) and WKT2 (`GEOGCRS`, `PROJCRS`, ...)
    /// - PROJ strings (`+proj=lcc ...`, `+proj=aea ...`, `+proj=longlat ...`)
    /// - `EPSG:<code>` and `urn:ogc:def:crs:EPSG::<code>` for the codes in
    ///   [`epsg_proj_string`], and the OGC `CRS84` alias
    pub fn parse(s: &str) -> CommonResult<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CommonError::invalid_crs("empty CRS definition"));
        }

        let upper = trimmed.to_ascii_uppercase();
        if trimmed.starts_with('+') || trimmed.contains("+proj=") {
            Self::from_proj_string(trimmed)
        } else if upper.ends_with("CRS84") {
            Ok(Self::wgs84())
        } else if let Some(code) = upper
            .strip_prefix("EPSG:")
            .or_else(|| upper.strip_prefix("URN:OGC:DEF:CRS:EPSG:"))
        {
            // URNs may carry a version between the authority and the code
            let code = code.rsplit(':').next().unwrap_or(code);
            let code: u32 = code
                .trim()
                .parse()
                .map_err(|_| CommonError::invalid_crs(format!("bad EPSG code: {}", trimmed)))?;
            Self::from_epsg(code)
        } else {
            Self::from_wkt(trimmed)
        }
    }

    pub fn from_epsg(code: u32) -> CommonResult<Self> {
        match code {
            4326 => Ok(Self::wgs84()),
            4269 => Ok(CrsDefinition::Geographic {
                ellipsoid: Ellipsoid::grs80(),
            }),
            _ => match epsg_proj_string(code) {
                Some(proj) => Self::from_proj_string(&proj),
                None => Err(CommonError::UnsupportedCrs(format!("EPSG:{}", code))),
            },
        }
    }

    pub fn from_proj_string(s: &str) -> CommonResult<Self> {
        let mut params: HashMap<&str, &str> = HashMap::new();
        for token in s.split_whitespace() {
            let token = token.trim_start_matches('+');
            match token.split_once('=') {
                Some((key, value)) => params.insert(key, value),
                None => params.insert(token, ""),
            };
        }

        let number = |key: &str| -> CommonResult<Option<f64>> {
            params
                .get(key)
                .map(|v| {
                    v.parse::<f64>().map_err(|_| {
                        CommonError::invalid_crs(format!("PROJ parameter {}={} is not a number", key, v))
                    })
                })
                .transpose()
        };

        let ellipsoid = if let Some(r) = number("R")? {
            Ellipsoid::sphere(r)
        } else if let Some(a) = number("a")? {
            match (number("b")?, number("rf")?) {
                (Some(b), _) => Ellipsoid::from_axes(a, b),
                (None, Some(rf)) => Ellipsoid {
                    semi_major: a,
                    inverse_flattening: rf,
                },
                (None, None) => Ellipsoid::sphere(a),
            }
        } else {
            match params.get("ellps").or_else(|| params.get("datum")).copied() {
                Some("GRS80") | Some("NAD83") => Ellipsoid::grs80(),
                Some("sphere") => Ellipsoid::sphere(6_370_997.0),
                _ => Ellipsoid::wgs84(),
            }
        };

        match params.get("proj").copied() {
            Some("longlat") | Some("latlong") | Some("lonlat") | Some("latlon") => {
                Ok(CrsDefinition::Geographic { ellipsoid })
            }
            Some("lcc") => {
                let lat_1 = number("lat_1")?
                    .or(number("lat_0")?)
                    .ok_or_else(|| CommonError::invalid_crs("lcc requires lat_1"))?;
                let lat_2 = number("lat_2")?.unwrap_or(lat_1);
                let lat_0 = number("lat_0")?.unwrap_or(lat_1);
                let unit_to_meter = match (number("to_meter")?, params.get("units").copied()) {
                    (Some(m), _) => m,
                    (None, Some("km")) => 1000.0,
                    (None, Some("m")) | (None, None) => 1.0,
                    (None, Some(other)) => {
                        return Err(CommonError::UnsupportedCrs(format!("PROJ units={}", other)))
                    }
                };
                Ok(CrsDefinition::LambertConformalConic(LambertConformalParams {
                    lat_1,
                    lat_2,
                    lat_0,
                    lon_0: number("lon_0")?.unwrap_or(0.0),
                    false_easting: number("x_0")?.unwrap_or(0.0),
                    false_northing: number("y_0")?.unwrap_or(0.0),
                    ellipsoid,
                    unit_to_meter,
                }))
            }
            Some(_) => Ok(CrsDefinition::Projected {
                proj: normalize_proj(s),
            }),
            None => Err(CommonError::invalid_crs(format!("no +proj in '{}'", s))),
        }
    }

    pub fn from_wkt(s: &str) -> CommonResult<Self> {
        let root = parse_wkt(s).map_err(CommonError::InvalidCrs)?;
        match root.keyword.as_str() {
            "GEOGCS" | "GEOGCRS" | "GEODCRS" | "GEOGRAPHICCRS" | "GEODETICCRS" => {
                Ok(CrsDefinition::Geographic {
                    ellipsoid: wkt_ellipsoid(&root)?,
                })
            }
            "PROJCS" | "PROJCRS" | "PROJECTEDCRS" => wkt_projected(&root),
            other => Err(CommonError::UnsupportedCrs(format!("WKT root {}", other))),
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, CrsDefinition::Geographic { .. })
    }

    /// Equality up to floating point noise in the parameters.
    ///
    /// Geographic systems compare equal regardless of ellipsoid: no datum
    /// shift is ever applied between them.
    pub fn approx_eq(&self, other: &CrsDefinition) -> bool {
        match (self, other) {
            (CrsDefinition::Geographic { .. }, CrsDefinition::Geographic { .. }) => true,
            (CrsDefinition::LambertConformalConic(a), CrsDefinition::LambertConformalConic(b)) => {
                let close = |x: f64, y: f64| (x - y).abs() < 1e-9;
                close(a.lat_1, b.lat_1)
                    && close(a.lat_2, b.lat_2)
                    && close(a.lat_0, b.lat_0)
                    && close(a.lon_0, b.lon_0)
                    && close(a.false_easting, b.false_easting)
                    && close(a.false_northing, b.false_northing)
                    && close(a.unit_to_meter, b.unit_to_meter)
                    && a.ellipsoid.approx_eq(&b.ellipsoid)
            }
            (CrsDefinition::Projected { proj: a }, CrsDefinition::Projected { proj: b }) => {
                let mut a: Vec<&str> = a.split_whitespace().collect();
                let mut b: Vec<&str> = b.split_whitespace().collect();
                a.sort_unstable();
                b.sort_unstable();
                a == b
            }
            _ => false,
        }
    }
}

/// PROJ definitions for the EPSG codes zone files commonly use.
///
/// Covers the CONUS and Alaska Albers systems hydrofabrics ship in, US
/// National Atlas equal area, web mercator and the NAD83 / WGS84 UTM zones.
pub fn epsg_proj_string(code: u32) -> Option<String> {
    const NAD83: &str = "+ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs";
    let proj = match code {
        4326 => "+proj=longlat +datum=WGS84 +no_defs".to_string(),
        4269 => "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs".to_string(),
        3857 => "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs"
            .to_string(),
        5070 | 6350 => format!(
            "+proj=aea +lat_0=23 +lon_0=-96 +lat_1=29.5 +lat_2=45.5 +x_0=0 +y_0=0 {}",
            NAD83
        ),
        3338 => format!(
            "+proj=aea +lat_0=50 +lon_0=-154 +lat_1=55 +lat_2=65 +x_0=0 +y_0=0 {}",
            NAD83
        ),
        2163 => "+proj=laea +lat_0=45 +lon_0=-100 +x_0=0 +y_0=0 +a=6370997 +b=6370997 +units=m +no_defs"
            .to_string(),
        26901..=26923 => format!("+proj=utm +zone={} {}", code - 26900, NAD83),
        32601..=32660 => format!("+proj=utm +zone={} +datum=WGS84 +units=m +no_defs", code - 32600),
        32701..=32760 => format!(
            "+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs",
            code - 32700
        ),
        _ => return None,
    };
    Some(proj)
}

/// One `+key=value` token per parameter, single spaces, `+type=crs` dropped.
fn normalize_proj(s: &str) -> String {
    s.split_whitespace()
        .map(|token| format!("+{}", token.trim_start_matches('+')))
        .filter(|token| token != "+type=crs")
        .collect::<Vec<_>>()
        .join(" ")
}

fn ellipsoid_proj(e: &Ellipsoid) -> String {
    if e.is_sphere() {
        format!("+R={}", e.semi_major)
    } else {
        format!("+a={} +rf={}", e.semi_major, e.inverse_flattening)
    }
}

impl fmt::Display for CrsDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrsDefinition::Geographic { ellipsoid } => {
                write!(f, "+proj=longlat {} +no_defs", ellipsoid_proj(ellipsoid))
            }
            CrsDefinition::LambertConformalConic(p) => write!(
                f,
                "+proj=lcc +lat_1={} +lat_2={} +lat_0={} +lon_0={} +x_0={} +y_0={} {} +to_meter={} +no_defs",
                p.lat_1,
                p.lat_2,
                p.lat_0,
                p.lon_0,
                p.false_easting,
                p.false_northing,
                ellipsoid_proj(&p.ellipsoid),
                p.unit_to_meter
            ),
            CrsDefinition::Projected { proj } => f.write_str(proj),
        }
    }
}

fn wkt_ellipsoid(root: &WktNode) -> CommonResult<Ellipsoid> {
    let node = root
        .find("SPHEROID")
        .or_else(|| root.find("ELLIPSOID"))
        .ok_or_else(|| CommonError::invalid_crs("WKT has no SPHEROID/ELLIPSOID"))?;
    let a = node
        .number(1)
        .ok_or_else(|| CommonError::invalid_crs("ellipsoid without semi-major axis"))?;
    let rf = node.number(2).unwrap_or(0.0);
    Ok(Ellipsoid {
        semi_major: a,
        inverse_flattening: rf,
    })
}

/// Lower-case and strip separators so `Standard_Parallel_1` and
/// `Latitude of 1st standard parallel` can be matched by key.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn wkt_projected(root: &WktNode) -> CommonResult<CrsDefinition> {
    // WKT1 keeps PROJECTION and PARAMETER on the PROJCS node, WKT2 nests
    // METHOD and PARAMETER under CONVERSION.
    let holder = root.find("CONVERSION").unwrap_or(root);
    let method = holder
        .child("PROJECTION")
        .or_else(|| holder.child("METHOD"))
        .and_then(|n| n.name())
        .ok_or_else(|| CommonError::invalid_crs("projected WKT without PROJECTION/METHOD"))?;

    let method_key = normalize(method);
    let params: HashMap<String, f64> = holder
        .children("PARAMETER")
        .filter_map(|p| Some((normalize(p.name()?), p.number(1)?)))
        .collect();
    let lookup = |keys: &[&str]| keys.iter().find_map(|k| params.get(*k).copied());

    let is_lambert_conformal =
        method_key.contains("lambert") && (method_key.contains("conformal") || method_key.contains("conic"));
    if !is_lambert_conformal {
        if let Some(code) = wkt_epsg_code(root) {
            if let Some(proj) = epsg_proj_string(code) {
                return CrsDefinition::from_proj_string(&proj);
            }
        }
        return wkt_general_projection(root, &method_key, method, &params);
    }

    let lat_0 = lookup(&["latitudeoforigin", "latitudeoffalseorigin", "latitudeofnaturalorigin"]);
    let lat_1 = lookup(&["standardparallel1", "latitudeof1ststandardparallel"]).or(lat_0);
    let lat_1 = lat_1.ok_or_else(|| CommonError::invalid_crs("LCC without standard parallel"))?;
    let lat_2 = lookup(&["standardparallel2", "latitudeof2ndstandardparallel"]).unwrap_or(lat_1);

    let unit_to_meter = root
        .child("UNIT")
        .or_else(|| root.child("LENGTHUNIT"))
        .and_then(|u| u.number(1))
        .unwrap_or(1.0);

    Ok(CrsDefinition::LambertConformalConic(LambertConformalParams {
        lat_1,
        lat_2,
        lat_0: lat_0.unwrap_or(lat_1),
        lon_0: lookup(&["centralmeridian", "longitudeoffalseorigin", "longitudeofnaturalorigin"])
            .unwrap_or(0.0),
        false_easting: lookup(&["falseeasting", "eastingatfalseorigin"]).unwrap_or(0.0),
        false_northing: lookup(&["falsenorthing", "northingatfalseorigin"]).unwrap_or(0.0),
        ellipsoid: wkt_ellipsoid(root)?,
        unit_to_meter,
    }))
}

/// `AUTHORITY["EPSG","5070"]` (WKT1) or `ID["EPSG",5070]` (WKT2) on the root.
fn wkt_epsg_code(root: &WktNode) -> Option<u32> {
    let id = root.child("AUTHORITY").or_else(|| root.child("ID"))?;
    if !id.name()?.eq_ignore_ascii_case("EPSG") {
        return None;
    }
    match id.text(1) {
        Some(code) => code.trim().parse().ok(),
        None => id.number(1).map(|n| n as u32),
    }
}

/// Translate the projection methods PROJ names directly into a PROJ string.
fn wkt_general_projection(
    root: &WktNode,
    method_key: &str,
    method: &str,
    params: &HashMap<String, f64>,
) -> CommonResult<CrsDefinition> {
    let lookup = |keys: &[&str]| keys.iter().find_map(|k| params.get(*k).copied());
    let name = if method_key.contains("albers") {
        "aea"
    } else if method_key.contains("transversemercator") {
        "tmerc"
    } else if method_key.contains("mercator") {
        "merc"
    } else if method_key.contains("lambertazimuthal") {
        "laea"
    } else {
        return Err(CommonError::UnsupportedCrs(format!("projection method '{}'", method)));
    };

    let mut proj = format!("+proj={}", name);
    let mut push = |key: &str, value: Option<f64>| {
        if let Some(v) = value {
            proj.push_str(&format!(" +{}={}", key, v));
        }
    };
    push(
        "lat_0",
        lookup(&[
            "latitudeoforigin",
            "latitudeofcenter",
            "latitudeoffalseorigin",
            "latitudeofnaturalorigin",
            "latitudeofprojectioncentre",
        ]),
    );
    push(
        "lon_0",
        lookup(&[
            "centralmeridian",
            "longitudeofcenter",
            "longitudeoffalseorigin",
            "longitudeofnaturalorigin",
            "longitudeofprojectioncentre",
        ]),
    );
    push("lat_1", lookup(&["standardparallel1", "latitudeof1ststandardparallel"]));
    push("lat_2", lookup(&["standardparallel2", "latitudeof2ndstandardparallel"]));
    push("k", lookup(&["scalefactor", "scalefactoratnaturalorigin"]));
    push("x_0", lookup(&["falseeasting", "eastingatfalseorigin"]));
    push("y_0", lookup(&["falsenorthing", "northingatfalseorigin"]));

    let ellipsoid = wkt_ellipsoid(root)?;
    let unit_to_meter = root
        .child("UNIT")
        .or_else(|| root.child("LENGTHUNIT"))
        .and_then(|u| u.number(1))
        .unwrap_or(1.0);
    proj.push_str(&format!(
        " {} +to_meter={} +no_defs",
        ellipsoid_proj(&ellipsoid),
        unit_to_meter
    ));
    Ok(CrsDefinition::Projected { proj })
}
