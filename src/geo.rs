use std::path::Path;

use anyhow::{Context, anyhow};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// A point on the globe in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn in_range(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Great-circle (haversine) distance between two points, in kilometers.
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

#[derive(Debug, Clone)]
pub struct ZipCentroid {
    pub zip5: String,
    pub lat: f64,
    pub lon: f64,
}

pub fn normalize_zip5(s: &str) -> Option<String> {
    let mut digits = String::with_capacity(5);
    for ch in s.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 5 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.len() == 5 { Some(digits) } else { None }
}

pub fn parse_geonames_us_txt(path: &Path) -> anyhow::Result<Vec<ZipCentroid>> {
    let data = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_geonames_lines(&data)
}

/// GeoNames postal format: tab-separated, postal code in column 1,
/// lat/lon in columns 9/10.
fn parse_geonames_lines(data: &str) -> anyhow::Result<Vec<ZipCentroid>> {
    let mut out = Vec::new();
    for (lineno, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 11 {
            return Err(anyhow!(
                "GeoNames line {} has too few columns ({}): {}",
                lineno + 1,
                parts.len(),
                line
            ));
        }
        let zip_raw = parts[1];
        let Some(zip5) = normalize_zip5(zip_raw) else {
            continue;
        };
        let lat: f64 = parts[9].parse().context("parse lat")?;
        let lon: f64 = parts[10].parse().context("parse lon")?;
        out.push(ZipCentroid { zip5, lat, lon });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHICAGO: Coordinates = Coordinates {
        lat: 41.8781,
        lon: -87.6298,
    };
    const ST_LOUIS: Coordinates = Coordinates {
        lat: 38.6270,
        lon: -90.1994,
    };

    #[test]
    fn haversine_zero_for_identical_points() {
        assert_eq!(haversine_km(CHICAGO, CHICAGO), 0.0);
    }

    #[test]
    fn haversine_symmetric_and_nonnegative() {
        let ab = haversine_km(CHICAGO, ST_LOUIS);
        let ba = haversine_km(ST_LOUIS, CHICAGO);
        assert!(ab > 0.0);
        assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn haversine_chicago_to_st_louis() {
        // Known distance is roughly 422 km.
        let d = haversine_km(CHICAGO, ST_LOUIS);
        assert!((d - 422.0).abs() < 3.0, "got {d}");
    }

    #[test]
    fn coordinates_range_check() {
        assert!(Coordinates::new(41.8, -87.6).in_range());
        assert!(Coordinates::new(90.0, 180.0).in_range());
        assert!(!Coordinates::new(90.1, 0.0).in_range());
        assert!(!Coordinates::new(0.0, -180.5).in_range());
        assert!(!Coordinates::new(f64::NAN, 0.0).in_range());
    }

    #[test]
    fn zip5_normalization() {
        assert_eq!(normalize_zip5("60601"), Some("60601".to_string()));
        assert_eq!(normalize_zip5("60601-1234"), Some("60601".to_string()));
        assert_eq!(normalize_zip5("606"), None);
        assert_eq!(normalize_zip5(""), None);
    }

    #[test]
    fn geonames_lines_parse() {
        let data = "US\t60601\tChicago\tIllinois\tIL\tCook\t031\t\t\t41.8853\t-87.6216\t4\n\
                    US\tABC\tBad\t\t\t\t\t\t\t0.0\t0.0\t1\n";
        let rows = parse_geonames_lines(data).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].zip5, "60601");
        assert!((rows[0].lat - 41.8853).abs() < 1e-9);
    }
}
