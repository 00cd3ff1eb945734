// Coordinate reference systems and the transforms between them.
//
// Supports WGS84 geographic (EPSG:4326), UTM North/South (EPSG:326xx and
// 327xx) and an unnamed local planar system for data that is already in
// metres. The UTM series follow Snyder 1987 (USGS Prof. Paper 1395).

use crate::errors::FeatureError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const A: f64 = 6_378_137.0;
const F: f64 = 1.0 / 298.257_223_563;
const E2: f64 = 2.0 * F - F * F;
const E_PRIME2: f64 = E2 / (1.0 - E2);
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// UTM is defined between 80S and 84N.
const UTM_MIN_LAT: f64 = -80.0;
const UTM_MAX_LAT: f64 = 84.0;
/// Widest offset from the central meridian the fifth-order series stay
/// sub-metre for. A neighbouring zone's data (3 to 9 degrees out) still fits.
const UTM_MAX_LON_OFFSET: f64 = 8.0;

pub const WGS_84_EPSG: u32 = 4326;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    /// Geographic longitude/latitude in degrees.
    Wgs84,
    /// Universal Transverse Mercator, metres.
    Utm { zone: u32, north: bool },
    /// Already-projected local plane, metres. Only compatible with itself.
    Planar,
}

impl Crs {
    pub fn from_epsg(code: u32) -> Result<Self, FeatureError> {
        match code {
            WGS_84_EPSG => Ok(Crs::Wgs84),
            32601..=32660 => Ok(Crs::Utm {
                zone: code - 32600,
                north: true,
            }),
            32701..=32760 => Ok(Crs::Utm {
                zone: code - 32700,
                north: false,
            }),
            other => Err(FeatureError::UnsupportedCrs(other)),
        }
    }

    pub fn epsg(&self) -> Option<u32> {
        match self {
            Crs::Wgs84 => Some(WGS_84_EPSG),
            Crs::Utm { zone, north: true } => Some(32600 + zone),
            Crs::Utm { zone, north: false } => Some(32700 + zone),
            Crs::Planar => None,
        }
    }

    /// Whether coordinates are in linear units and planar distance is meaningful.
    pub fn is_projected(&self) -> bool {
        !matches!(self, Crs::Wgs84)
    }

    /// Transform a single coordinate pair from `self` into `target`.
    pub fn transform(&self, target: &Crs, x: f64, y: f64) -> Result<(f64, f64), FeatureError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(FeatureError::NonFinite);
        }

        match (*self, *target) {
            (from, to) if from == to => Ok((x, y)),
            (Crs::Wgs84, Crs::Utm { zone, north }) => wgs84_to_utm(x, y, zone, north),
            (Crs::Utm { zone, north }, Crs::Wgs84) => utm_to_wgs84(x, y, zone, north),
            (Crs::Utm { zone, north }, Crs::Utm { zone: z2, north: n2 }) => {
                let (lon, lat) = utm_to_wgs84(x, y, zone, north)?;
                wgs84_to_utm(lon, lat, z2, n2)
            }
            (from, to) => Err(FeatureError::NoTransform {
                from: from.to_string(),
                to: to.to_string(),
            }),
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.epsg() {
            Some(code) => write!(f, "EPSG:{}", code),
            None => write!(f, "planar"),
        }
    }
}

impl FromStr for Crs {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("planar") || trimmed.eq_ignore_ascii_case("local") {
            return Ok(Crs::Planar);
        }

        let digits = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
            .unwrap_or(trimmed);

        let code = digits
            .parse::<u32>()
            .map_err(|_| format!("unrecognised CRS '{}'", s))?;

        Crs::from_epsg(code).map_err(|e| e.to_string())
    }
}

impl TryFrom<String> for Crs {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(value: Crs) -> Self {
        value.to_string()
    }
}

fn central_meridian(zone: u32) -> f64 {
    (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0
}

fn check_domain(lon_deg: f64, lat_deg: f64, lon0_deg: f64) -> Result<(), FeatureError> {
    if !(UTM_MIN_LAT..=UTM_MAX_LAT).contains(&lat_deg)
        || !(-180.0..=180.0).contains(&lon_deg)
        || (lon_deg - lon0_deg).abs() > UTM_MAX_LON_OFFSET
    {
        return Err(FeatureError::OutOfDomain {
            x: lon_deg,
            y: lat_deg,
        });
    }
    Ok(())
}

fn wgs84_to_utm(
    lon_deg: f64,
    lat_deg: f64,
    zone: u32,
    north: bool,
) -> Result<(f64, f64), FeatureError> {
    let lon0_deg = central_meridian(zone);
    check_domain(lon_deg, lat_deg, lon0_deg)?;

    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let lon0 = lon0_deg.to_radians();

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();

    let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = E_PRIME2 * cos_lat * cos_lat;
    let a_coeff = cos_lat * (lon - lon0);
    let m = meridional_arc(lat);

    let a2 = a_coeff * a_coeff;
    let a4 = a2 * a2;
    let a6 = a4 * a2;

    let easting = K0
        * n
        * (a_coeff
            + (1.0 - t + c) * a2 * a_coeff / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * E_PRIME2) * a4 * a_coeff / 120.0)
        + FALSE_EASTING;

    let northing = K0
        * (m + n
            * tan_lat
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * E_PRIME2) * a6 / 720.0));

    let northing = if north {
        northing
    } else {
        northing + FALSE_NORTHING_SOUTH
    };

    Ok((easting, northing))
}

fn utm_to_wgs84(
    easting: f64,
    northing: f64,
    zone: u32,
    north: bool,
) -> Result<(f64, f64), FeatureError> {
    let x = easting - FALSE_EASTING;
    let y = if north {
        northing
    } else {
        northing - FALSE_NORTHING_SOUTH
    };

    let e4 = E2 * E2;
    let e6 = e4 * E2;
    let m = y / K0;
    let mu = m / (A * (1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

    let sqrt_1_e2 = (1.0 - E2).sqrt();
    let e1 = (1.0 - sqrt_1_e2) / (1.0 + sqrt_1_e2);
    let e1_2 = e1 * e1;
    let e1_3 = e1_2 * e1;
    let e1_4 = e1_3 * e1;

    // Footpoint latitude (Snyder eq. 3-26)
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let tan_phi1 = phi1.tan();

    let denom = 1.0 - E2 * sin_phi1 * sin_phi1;
    let n1 = A / denom.sqrt();
    let t1 = tan_phi1 * tan_phi1;
    let c1 = E_PRIME2 * cos_phi1 * cos_phi1;
    let r1 = A * (1.0 - E2) / denom.powf(1.5);
    let d = x / (n1 * K0);

    let d2 = d * d;
    let d4 = d2 * d2;
    let d6 = d4 * d2;

    let lat = phi1
        - (n1 * tan_phi1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * E_PRIME2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                    - 252.0 * E_PRIME2
                    - 3.0 * c1 * c1)
                    * d6
                    / 720.0);

    let lon = (d - (1.0 + 2.0 * t1 + c1) * d2 * d / 6.0
        + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * E_PRIME2 + 24.0 * t1 * t1)
            * d4
            * d
            / 120.0)
        / cos_phi1;

    let lon0_deg = central_meridian(zone);
    let (lon_deg, lat_deg) = (lon0_deg + lon.to_degrees(), lat.to_degrees());
    if !lon_deg.is_finite() || !lat_deg.is_finite() {
        return Err(FeatureError::NonFinite);
    }
    // eastings far outside the zone invert to garbage, reject them the same way
    check_domain(lon_deg, lat_deg, lon0_deg)?;

    Ok((lon_deg, lat_deg))
}

/// Meridional arc from the equator to `lat` (radians). Snyder eq. 3-21.
fn meridional_arc(lat: f64) -> f64 {
    let e4 = E2 * E2;
    let e6 = e4 * E2;

    A * ((1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
        - (3.0 * E2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64, tol: f64, msg: &str) {
        let diff = (a - b).abs();
        assert!(diff < tol, "{msg}: expected {b}, got {a}, diff {diff}");
    }

    #[test]
    fn test_from_epsg() {
        assert_eq!(Crs::from_epsg(4326), Ok(Crs::Wgs84));
        assert_eq!(
            Crs::from_epsg(32645),
            Ok(Crs::Utm {
                zone: 45,
                north: true
            })
        );
        assert_eq!(
            Crs::from_epsg(32721),
            Ok(Crs::Utm {
                zone: 21,
                north: false
            })
        );
        assert_eq!(Crs::from_epsg(3857), Err(FeatureError::UnsupportedCrs(3857)));
        assert_eq!(Crs::from_epsg(32600), Err(FeatureError::UnsupportedCrs(32600)));
    }

    #[test]
    fn test_parse_and_display() {
        let crs: Crs = "EPSG:32645".parse().unwrap();
        assert_eq!(crs.to_string(), "EPSG:32645");
        assert_eq!("4326".parse::<Crs>(), Ok(Crs::Wgs84));
        assert_eq!("planar".parse::<Crs>(), Ok(Crs::Planar));
        assert!("EPSG:banana".parse::<Crs>().is_err());
    }

    // Reference from pyproj: (-3.7037, 40.4168) -> (440298.94, 4474257.31) in 32630
    #[test]
    fn test_madrid_to_utm30n() {
        let utm = Crs::from_epsg(32630).unwrap();
        let (e, n) = Crs::Wgs84.transform(&utm, -3.7037, 40.4168).unwrap();
        assert_close(e, 440_298.94, 1.0, "easting");
        assert_close(n, 4_474_257.31, 1.0, "northing");
    }

    #[test]
    fn test_central_meridian_equator() {
        let utm = Crs::from_epsg(32645).unwrap();
        let (e, n) = Crs::Wgs84.transform(&utm, 87.0, 0.0).unwrap();
        assert_close(e, 500_000.0, 0.01, "easting");
        assert_close(n, 0.0, 0.01, "northing");
    }

    #[test]
    fn test_round_trip_kathmandu() {
        let utm = Crs::from_epsg(32645).unwrap();
        let (e, n) = Crs::Wgs84.transform(&utm, 85.324, 27.7172).unwrap();
        let (lon, lat) = utm.transform(&Crs::Wgs84, e, n).unwrap();
        assert_close(lon, 85.324, 1e-6, "lon");
        assert_close(lat, 27.7172, 1e-6, "lat");
    }

    #[test]
    fn test_metric_distance_after_projection() {
        // 0.01 degrees of latitude is roughly 1108 m near 28N
        let utm = Crs::from_epsg(32645).unwrap();
        let (_, n1) = Crs::Wgs84.transform(&utm, 87.0, 28.0).unwrap();
        let (_, n2) = Crs::Wgs84.transform(&utm, 87.0, 28.01).unwrap();
        let d = n2 - n1;
        assert!(d > 1_100.0 && d < 1_115.0, "got {d}");
    }

    #[test]
    fn test_out_of_domain() {
        let utm = Crs::from_epsg(32645).unwrap();
        assert!(matches!(
            Crs::Wgs84.transform(&utm, 87.0, 89.0),
            Err(FeatureError::OutOfDomain { .. })
        ));
        assert!(matches!(
            Crs::Wgs84.transform(&utm, -60.0, 10.0),
            Err(FeatureError::OutOfDomain { .. })
        ));
        assert_eq!(
            Crs::Wgs84.transform(&utm, f64::NAN, 10.0),
            Err(FeatureError::NonFinite)
        );
    }

    #[test]
    fn test_round_trip_at_edge_of_domain() {
        let utm = Crs::from_epsg(32645).unwrap();
        for (lon, lat) in [(94.9, 60.0), (79.1, 60.0), (94.9, 28.0), (79.1, -45.0)] {
            let (e, n) = Crs::Wgs84.transform(&utm, lon, lat).unwrap();
            let (lon2, lat2) = utm.transform(&Crs::Wgs84, e, n).unwrap();
            assert_close(lon2, lon, 1e-4, "lon");
            assert_close(lat2, lat, 1e-4, "lat");
        }
    }

    #[test]
    fn test_far_from_central_meridian_is_out_of_domain() {
        let utm = Crs::from_epsg(32645).unwrap();
        for lon in [95.5, 78.5, 116.9] {
            assert!(matches!(
                Crs::Wgs84.transform(&utm, lon, 60.0),
                Err(FeatureError::OutOfDomain { .. })
            ));
        }
        // 2000 km east of the zone's false easting
        assert!(matches!(
            utm.transform(&Crs::Wgs84, 2_500_000.0, 3_000_000.0),
            Err(FeatureError::OutOfDomain { .. })
        ));
        let zone_44 = Crs::from_epsg(32644).unwrap();
        assert!(matches!(
            utm.transform(&zone_44, 1_400_000.0, 6_650_000.0),
            Err(FeatureError::OutOfDomain { .. })
        ));
    }

    #[test]
    fn test_planar_only_maps_to_itself() {
        assert_eq!(Crs::Planar.transform(&Crs::Planar, 3.0, 4.0), Ok((3.0, 4.0)));
        assert!(matches!(
            Crs::Wgs84.transform(&Crs::Planar, 3.0, 4.0),
            Err(FeatureError::NoTransform { .. })
        ));
    }
}
