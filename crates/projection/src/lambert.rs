//! Lambert Conformal Conic projection.
//!
//! Used by the NWM and AORC forcing grids. Formulas follow Snyder,
//! "Map Projections: A Working Manual" (USGS 1395), eqs. 15-1 to 15-11,
//! in their ellipsoidal form; with zero eccentricity they reduce to the
//! spherical case, so one code path serves both.
//!
//! Coordinates:
//! - geographic: (lon, lat) in degrees
//! - projected: (x, y) in the CRS linear unit, false easting/northing applied

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use forcing_common::LambertConformalParams;

use crate::error::{ProjectionError, ProjectionResult};

const MAX_ITERATIONS: usize = 15;
const CONVERGENCE: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct LambertConformal {
    params: LambertConformalParams,
    /// Central meridian in radians
    lon0: f64,
    /// First eccentricity
    e: f64,
    /// Cone constant
    n: f64,
    /// a * F
    af: f64,
    /// Radius of the parallel through the origin
    rho0: f64,
}

impl LambertConformal {
    pub fn new(params: &LambertConformalParams) -> ProjectionResult<Self> {
        let to_rad = PI / 180.0;
        for (name, lat) in [("lat_1", params.lat_1), ("lat_2", params.lat_2), ("lat_0", params.lat_0)] {
            if !lat.is_finite() || lat.abs() >= 90.0 {
                return Err(ProjectionError::InvalidParameters(format!(
                    "{} = {} must lie strictly between the poles",
                    name, lat
                )));
            }
        }
        if (params.lat_1 + params.lat_2).abs() < 1e-10 {
            return Err(ProjectionError::InvalidParameters(
                "standard parallels are symmetric about the equator".to_string(),
            ));
        }
        if params.ellipsoid.semi_major <= 0.0 || params.unit_to_meter <= 0.0 {
            return Err(ProjectionError::InvalidParameters(
                "semi-major axis and unit must be positive".to_string(),
            ));
        }

        let e = params.ellipsoid.eccentricity();
        let phi1 = params.lat_1 * to_rad;
        let phi2 = params.lat_2 * to_rad;
        let phi0 = params.lat_0 * to_rad;

        let m1 = msfn(phi1, e);
        let t1 = tsfn(phi1, e);
        let n = if (phi1 - phi2).abs() < 1e-10 {
            // Tangent cone
            phi1.sin()
        } else {
            (m1.ln() - msfn(phi2, e).ln()) / (t1.ln() - tsfn(phi2, e).ln())
        };

        let af = params.ellipsoid.semi_major * m1 / (n * t1.powf(n));
        let rho0 = af * tsfn(phi0, e).powf(n);

        Ok(Self {
            params: *params,
            lon0: params.lon_0 * to_rad,
            e,
            n,
            af,
            rho0,
        })
    }

    pub fn params(&self) -> &LambertConformalParams {
        &self.params
    }

    /// Geographic (lon, lat) degrees to projected (x, y).
    pub fn geo_to_xy(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let to_rad = PI / 180.0;
        let phi = lat_deg * to_rad;

        let dlon = normalize_angle(lon_deg * to_rad - self.lon0);
        let rho = if (phi.abs() - FRAC_PI_2).abs() < 1e-12 {
            if phi * self.n > 0.0 {
                0.0
            } else {
                f64::INFINITY
            }
        } else {
            self.af * tsfn(phi, self.e).powf(self.n)
        };
        let theta = self.n * dlon;

        let x = rho * theta.sin();
        let y = self.rho0 - rho * theta.cos();
        (
            x / self.params.unit_to_meter + self.params.false_easting,
            y / self.params.unit_to_meter + self.params.false_northing,
        )
    }

    /// Projected (x, y) to geographic (lon, lat) degrees.
    pub fn xy_to_geo(&self, x: f64, y: f64) -> (f64, f64) {
        let to_deg = 180.0 / PI;
        let x = (x - self.params.false_easting) * self.params.unit_to_meter;
        let dy = self.rho0 - (y - self.params.false_northing) * self.params.unit_to_meter;

        let sign = self.n.signum();
        let rho = sign * (x * x + dy * dy).sqrt();
        if rho == 0.0 {
            return (self.params.lon_0, sign * 90.0);
        }

        let theta = (sign * x).atan2(sign * dy);
        let t = (rho / self.af).powf(1.0 / self.n);

        let mut phi = FRAC_PI_2 - 2.0 * t.atan();
        for _ in 0..MAX_ITERATIONS {
            let es = self.e * phi.sin();
            let next = FRAC_PI_2 - 2.0 * (t * ((1.0 - es) / (1.0 + es)).powf(self.e / 2.0)).atan();
            let done = (next - phi).abs() < CONVERGENCE;
            phi = next;
            if done {
                break;
            }
        }

        let lon = normalize_angle(theta / self.n + self.lon0);
        (lon * to_deg, phi * to_deg)
    }
}

/// Snyder eq. 14-15.
fn msfn(phi: f64, e: f64) -> f64 {
    let es = e * phi.sin();
    phi.cos() / (1.0 - es * es).sqrt()
}

/// Snyder eq. 15-9.
fn tsfn(phi: f64, e: f64) -> f64 {
    let es = e * phi.sin();
    (FRAC_PI_4 - phi / 2.0).tan() / ((1.0 - es) / (1.0 + es)).powf(e / 2.0)
}

/// Wrap to [-PI, PI].
fn normalize_angle(mut a: f64) -> f64 {
    while a > PI {
        a -= 2.0 * PI;
    }
    while a < -PI {
        a += 2.0 * PI;
    }
    a
}
