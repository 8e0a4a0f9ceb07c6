//! `lat,lng` location overrides

use std::fmt;
use std::str::FromStr;

use crate::api::GeoPoint;
use crate::common::Error;

/// A validated GPS coordinate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, Error> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::InvalidLocation(format!(
                "latitude must be between -90 and 90 (got {:.6})",
                latitude
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::InvalidLocation(format!(
                "longitude must be between -180 and 180 (got {:.6})",
                longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

impl FromStr for Location {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lng) = s.split_once(',').ok_or_else(|| {
            Error::InvalidLocation(
                "invalid --location format: expected lat,lng (e.g. 37.7749,-122.4194)".to_string(),
            )
        })?;

        let latitude: f64 = lat
            .trim()
            .parse()
            .map_err(|_| Error::InvalidLocation(format!("invalid latitude: {:?}", lat.trim())))?;
        let longitude: f64 = lng
            .trim()
            .parse()
            .map_err(|_| Error::InvalidLocation(format!("invalid longitude: {:?}", lng.trim())))?;

        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(Error::InvalidLocation(
                "latitude and longitude must be finite numbers".to_string(),
            ));
        }

        Location::new(latitude, longitude)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

impl From<Location> for GeoPoint {
    fn from(loc: Location) -> Self {
        GeoPoint {
            latitude: loc.latitude,
            longitude: loc.longitude,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let loc: Location = "37.7749,-122.4194".parse().unwrap();
        assert_eq!(loc.latitude, 37.7749);
        assert_eq!(loc.longitude, -122.4194);

        let loc: Location = " -90 , 180 ".parse().unwrap();
        assert_eq!((loc.latitude, loc.longitude), (-90.0, 180.0));
    }

    #[test]
    fn test_range_errors() {
        let err = "91,0".parse::<Location>().unwrap_err().to_string();
        assert!(err.starts_with("latitude must be between -90 and 90"), "{err}");

        let err = "0,181".parse::<Location>().unwrap_err().to_string();
        assert!(err.starts_with("longitude must be between -180 and 180"), "{err}");
    }

    #[test]
    fn test_format_errors() {
        for input in ["37.7749", ""] {
            let err = input.parse::<Location>().unwrap_err().to_string();
            assert!(err.contains("expected lat,lng"), "{input}: {err}");
        }
        let err = "abc,1".parse::<Location>().unwrap_err().to_string();
        assert!(err.starts_with("invalid latitude"));
        let err = "1,2,3".parse::<Location>().unwrap_err().to_string();
        assert!(err.starts_with("invalid longitude"));
        assert!("NaN,0".parse::<Location>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        let loc: Location = "37.7749,-122.4194".parse().unwrap();
        assert_eq!(loc.to_string().parse::<Location>().unwrap(), loc);
    }
}
