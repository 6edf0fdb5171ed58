//! Coordinate reference systems and point transforms.
//!
//! Every transform goes through geographic longitude/latitude in degrees.
//! NAD83 and WGS84 are treated as the same datum, which is well inside the
//! tolerance of a rendered map. Transverse Mercator uses the third-order
//! Krüger series, accurate to well under a millimetre within a zone.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use std::fmt;
use std::str::FromStr;

use geo::Coord;
use serde::{Deserialize, Serialize};

use crate::GeometryError;

/// Web Mercator sphere radius in metres.
const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// Latitude limit of the Web Mercator square, in degrees.
pub const WEB_MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// Reference ellipsoid for projected systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ellipsoid {
    /// Used by NAD83-based systems.
    Grs80,
    Wgs84,
}

impl Ellipsoid {
    const fn semi_major_axis(self) -> f64 {
        6_378_137.0
    }

    const fn flattening(self) -> f64 {
        match self {
            Self::Grs80 => 1.0 / 298.257_222_101,
            Self::Wgs84 => 1.0 / 298.257_223_563,
        }
    }

    const fn proj_name(self) -> &'static str {
        match self {
            Self::Grs80 => "GRS80",
            Self::Wgs84 => "WGS84",
        }
    }
}

/// Parameters of a Transverse Mercator projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransverseMercator {
    /// EPSG code, when the parameters match a registered system.
    pub epsg: Option<u32>,
    pub ellipsoid: Ellipsoid,
    /// Degrees.
    pub latitude_of_origin: f64,
    /// Degrees.
    pub central_meridian: f64,
    pub scale_factor: f64,
    /// Metres.
    pub false_easting: f64,
    /// Metres.
    pub false_northing: f64,
}

/// A coordinate reference system the pipeline can transform between.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    /// Geographic longitude/latitude in degrees (EPSG:4326).
    Wgs84,
    /// Spherical Web Mercator in metres (EPSG:3857).
    WebMercator,
    TransverseMercator(TransverseMercator),
}

impl Crs {
    /// NAD83 / Alberta 10-TM (Forest), EPSG:3400.
    #[must_use]
    pub const fn alberta_10tm_forest() -> Self {
        Self::TransverseMercator(TransverseMercator {
            epsg: Some(3400),
            ellipsoid: Ellipsoid::Grs80,
            latitude_of_origin: 0.0,
            central_meridian: -115.0,
            scale_factor: 0.9992,
            false_easting: 500_000.0,
            false_northing: 0.0,
        })
    }

    /// NAD83 / Alberta 10-TM (Resource), EPSG:3401.
    #[must_use]
    pub const fn alberta_10tm_resource() -> Self {
        Self::TransverseMercator(TransverseMercator {
            epsg: Some(3401),
            ellipsoid: Ellipsoid::Grs80,
            latitude_of_origin: 0.0,
            central_meridian: -115.0,
            scale_factor: 0.9992,
            false_easting: 0.0,
            false_northing: 0.0,
        })
    }

    /// Universal Transverse Mercator on WGS84 (EPSG:326zz / 327zz).
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::UnknownCrs`] if `zone` is not in `1..=60`.
    pub fn utm(zone: u8, north: bool) -> Result<Self, GeometryError> {
        Self::utm_on(zone, north, Ellipsoid::Wgs84, if north { 32_600 } else { 32_700 })
    }

    fn utm_on(zone: u8, north: bool, ellipsoid: Ellipsoid, epsg_base: u32) -> Result<Self, GeometryError> {
        if !(1..=60).contains(&zone) {
            return Err(GeometryError::UnknownCrs {
                value: format!("UTM zone {zone}"),
                message: "zone must be between 1 and 60".to_string(),
            });
        }
        Ok(Self::TransverseMercator(TransverseMercator {
            epsg: Some(epsg_base + u32::from(zone)),
            ellipsoid,
            latitude_of_origin: 0.0,
            central_meridian: f64::from(zone).mul_add(6.0, -183.0),
            scale_factor: 0.9996,
            false_easting: 500_000.0,
            false_northing: if north { 0.0 } else { 10_000_000.0 },
        }))
    }

    /// Looks up a system by EPSG code.
    ///
    /// NAD83 geographic (4269) maps to [`Crs::Wgs84`].
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::UnknownCrs`] for unsupported codes.
    pub fn from_epsg(code: u32) -> Result<Self, GeometryError> {
        match code {
            4326 | 4269 => Ok(Self::Wgs84),
            3857 | 900_913 => Ok(Self::WebMercator),
            3400 => Ok(Self::alberta_10tm_forest()),
            3401 => Ok(Self::alberta_10tm_resource()),
            32_601..=32_660 => Self::utm(zone_of(code, 32_600), true),
            32_701..=32_760 => Self::utm(zone_of(code, 32_700), false),
            26_901..=26_923 => Self::utm_on(zone_of(code, 26_900), true, Ellipsoid::Grs80, 26_900),
            _ => Err(GeometryError::UnknownCrs {
                value: format!("EPSG:{code}"),
                message: "unsupported EPSG code".to_string(),
            }),
        }
    }

    /// Whether coordinates are longitude/latitude degrees.
    #[must_use]
    pub const fn is_geographic(&self) -> bool {
        matches!(self, Self::Wgs84)
    }

    /// Converts a coordinate in this system to longitude/latitude degrees.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::Projection`] for non-finite input or
    /// latitudes outside `[-90, 90]`.
    pub fn to_geographic(&self, coord: Coord<f64>) -> Result<Coord<f64>, GeometryError> {
        ensure_finite(coord, self)?;
        let geographic = match self {
            Self::Wgs84 => coord,
            Self::WebMercator => Coord {
                x: (coord.x / WEB_MERCATOR_RADIUS).to_degrees(),
                y: 2.0f64
                    .mul_add((coord.y / WEB_MERCATOR_RADIUS).exp().atan(), -FRAC_PI_2)
                    .to_degrees(),
            },
            Self::TransverseMercator(tm) => tm.inverse(coord),
        };
        if !(-90.0..=90.0).contains(&geographic.y) {
            return Err(GeometryError::Projection {
                message: format!("latitude {} out of range in {self}", geographic.y),
            });
        }
        ensure_finite(geographic, &Self::Wgs84)?;
        Ok(geographic)
    }

    /// Converts longitude/latitude degrees into this system.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::Projection`] if the point is outside the
    /// projection's domain.
    pub fn from_geographic(&self, lon_lat: Coord<f64>) -> Result<Coord<f64>, GeometryError> {
        let projected = match self {
            Self::Wgs84 => lon_lat,
            Self::WebMercator => {
                if lon_lat.y.abs() > WEB_MERCATOR_MAX_LAT {
                    return Err(GeometryError::Projection {
                        message: format!(
                            "latitude {} is outside the Web Mercator domain",
                            lon_lat.y
                        ),
                    });
                }
                Coord {
                    x: WEB_MERCATOR_RADIUS * lon_lat.x.to_radians(),
                    y: WEB_MERCATOR_RADIUS
                        * (FRAC_PI_4 + lon_lat.y.to_radians() / 2.0).tan().ln(),
                }
            }
            Self::TransverseMercator(tm) => tm.forward(lon_lat),
        };
        ensure_finite(projected, self)?;
        Ok(projected)
    }

    /// Transforms one coordinate from `self` into `target`.
    ///
    /// # Errors
    ///
    /// See [`Self::to_geographic`] and [`Self::from_geographic`].
    pub fn transform(&self, coord: Coord<f64>, target: &Self) -> Result<Coord<f64>, GeometryError> {
        if self == target {
            return Ok(coord);
        }
        target.from_geographic(self.to_geographic(coord)?)
    }
}

fn zone_of(code: u32, base: u32) -> u8 {
    u8::try_from(code - base).unwrap_or(0)
}

fn ensure_finite(coord: Coord<f64>, crs: &Crs) -> Result<(), GeometryError> {
    if coord.x.is_finite() && coord.y.is_finite() {
        Ok(())
    } else {
        Err(GeometryError::Projection {
            message: format!("non-finite coordinate ({}, {}) in {crs}", coord.x, coord.y),
        })
    }
}

/// Krüger series coefficients for one ellipsoid.
struct KrugerSeries {
    eccentricity: f64,
    /// Rectifying radius.
    rectifying_radius: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
    delta: [f64; 3],
}

impl KrugerSeries {
    fn new(ellipsoid: Ellipsoid) -> Self {
        let f = ellipsoid.flattening();
        let n = f / (2.0 - f);
        let n2 = n * n;
        let n3 = n2 * n;

        Self {
            eccentricity: (f * (2.0 - f)).sqrt(),
            rectifying_radius: ellipsoid.semi_major_axis() / (1.0 + n)
                * (1.0 + n2 / 4.0 + n2 * n2 / 64.0),
            alpha: [
                n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
                13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
                61.0 * n3 / 240.0,
            ],
            beta: [
                n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0,
                n2 / 48.0 + n3 / 15.0,
                17.0 * n3 / 480.0,
            ],
            delta: [
                2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3,
                7.0 * n2 / 3.0 - 8.0 * n3 / 5.0,
                56.0 * n3 / 15.0,
            ],
        }
    }

    /// Unscaled Gauss-Krüger coordinates `(xi, eta)` for a latitude and a
    /// longitude offset from the central meridian, both in radians.
    fn gauss_kruger(&self, lat: f64, dlon: f64) -> (f64, f64) {
        let e = self.eccentricity;
        let sin_lat = lat.sin();
        let t = (sin_lat.atanh() - e * (e * sin_lat).atanh()).sinh();
        let xi_p = t.atan2(dlon.cos());
        let eta_p = (dlon.sin() / t.mul_add(t, 1.0).sqrt()).atanh();

        let mut xi = xi_p;
        let mut eta = eta_p;
        for (j, alpha) in (1..=3).zip(self.alpha) {
            let k = 2.0 * f64::from(j);
            xi += alpha * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += alpha * (k * xi_p).cos() * (k * eta_p).sinh();
        }
        (xi, eta)
    }

    /// Inverse of [`Self::gauss_kruger`], returning `(lat, dlon)` radians.
    fn inverse(&self, xi: f64, eta: f64) -> (f64, f64) {
        let mut xi_p = xi;
        let mut eta_p = eta;
        for (j, beta) in (1..=3).zip(self.beta) {
            let k = 2.0 * f64::from(j);
            xi_p -= beta * (k * xi).sin() * (k * eta).cosh();
            eta_p -= beta * (k * xi).cos() * (k * eta).sinh();
        }

        let chi = (xi_p.sin() / eta_p.cosh()).asin();
        let mut lat = chi;
        for (j, delta) in (1..=3).zip(self.delta) {
            lat += delta * (2.0 * f64::from(j) * chi).sin();
        }
        let dlon = eta_p.sinh().atan2(xi_p.cos());
        (lat, dlon)
    }
}

impl TransverseMercator {
    fn scaled_radius(&self, series: &KrugerSeries) -> f64 {
        self.scale_factor * series.rectifying_radius
    }

    fn origin_xi(&self, series: &KrugerSeries) -> f64 {
        series.gauss_kruger(self.latitude_of_origin.to_radians(), 0.0).0
    }

    fn forward(&self, lon_lat: Coord<f64>) -> Coord<f64> {
        let series = KrugerSeries::new(self.ellipsoid);
        let radius = self.scaled_radius(&series);
        let (xi, eta) = series.gauss_kruger(
            lon_lat.y.to_radians(),
            (lon_lat.x - self.central_meridian).to_radians(),
        );
        Coord {
            x: radius.mul_add(eta, self.false_easting),
            y: radius.mul_add(xi - self.origin_xi(&series), self.false_northing),
        }
    }

    fn inverse(&self, coord: Coord<f64>) -> Coord<f64> {
        let series = KrugerSeries::new(self.ellipsoid);
        let radius = self.scaled_radius(&series);
        let xi = (coord.y - self.false_northing) / radius + self.origin_xi(&series);
        let eta = (coord.x - self.false_easting) / radius;
        let (lat, dlon) = series.inverse(xi, eta);
        Coord {
            x: self.central_meridian + dlon.to_degrees(),
            y: lat.to_degrees(),
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wgs84 => f.write_str("EPSG:4326"),
            Self::WebMercator => f.write_str("EPSG:3857"),
            Self::TransverseMercator(TransverseMercator { epsg: Some(code), .. }) => {
                write!(f, "EPSG:{code}")
            }
            Self::TransverseMercator(tm) => write!(
                f,
                "+proj=tmerc +lat_0={} +lon_0={} +k={} +x_0={} +y_0={} +ellps={}",
                tm.latitude_of_origin,
                tm.central_meridian,
                tm.scale_factor,
                tm.false_easting,
                tm.false_northing,
                tm.ellipsoid.proj_name(),
            ),
        }
    }
}

impl FromStr for Crs {
    type Err = GeometryError;

    /// Accepts `EPSG:<code>`, a bare code, `WGS84`, or a `+proj=tmerc`
    /// parameter string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        let upper = value.to_ascii_uppercase();

        if upper == "WGS84" || upper == "CRS84" {
            return Ok(Self::Wgs84);
        }
        if value.starts_with("+proj=") {
            return parse_proj_string(value);
        }

        let code = upper.strip_prefix("EPSG:").unwrap_or(&upper);
        code.parse::<u32>()
            .map_err(|_| GeometryError::UnknownCrs {
                value: value.to_string(),
                message: "expected EPSG:<code> or a +proj=tmerc string".to_string(),
            })
            .and_then(Self::from_epsg)
    }
}

fn parse_proj_string(value: &str) -> Result<Crs, GeometryError> {
    let unknown = |message: String| GeometryError::UnknownCrs {
        value: value.to_string(),
        message,
    };

    let mut tm = TransverseMercator {
        epsg: None,
        ellipsoid: Ellipsoid::Grs80,
        latitude_of_origin: 0.0,
        central_meridian: 0.0,
        scale_factor: 1.0,
        false_easting: 0.0,
        false_northing: 0.0,
    };
    let mut saw_tmerc = false;

    for token in value.split_whitespace() {
        let Some((key, val)) = token.trim_start_matches('+').split_once('=') else {
            continue;
        };
        let number = || {
            val.parse::<f64>()
                .map_err(|_| unknown(format!("parameter {key} is not a number: {val}")))
        };
        match key {
            "proj" if val == "tmerc" => saw_tmerc = true,
            "proj" => return Err(unknown(format!("unsupported projection {val}"))),
            "lat_0" => tm.latitude_of_origin = number()?,
            "lon_0" => tm.central_meridian = number()?,
            "k" | "k_0" => tm.scale_factor = number()?,
            "x_0" => tm.false_easting = number()?,
            "y_0" => tm.false_northing = number()?,
            "ellps" | "datum" => {
                tm.ellipsoid = match val {
                    "GRS80" | "NAD83" => Ellipsoid::Grs80,
                    "WGS84" => Ellipsoid::Wgs84,
                    other => return Err(unknown(format!("unsupported ellipsoid {other}"))),
                };
            }
            _ => log::debug!("Ignoring proj parameter {key}={val}"),
        }
    }

    if !saw_tmerc {
        return Err(unknown("missing +proj=tmerc".to_string()));
    }
    Ok(Crs::TransverseMercator(tm))
}

impl TryFrom<String> for Crs {
    type Error = GeometryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}
