//! Sunrise and sunset on a local date, computed by the `sunrise` crate.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use sunrise::{Coordinates, SolarDay, SolarEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolarError {
    InvalidCoordinates,
    /// Polar day or polar night: the sun stays on one side of the horizon
    NoHorizonCrossing,
}

impl SolarError {
    pub fn describe(&self) -> &'static str {
        match self {
            SolarError::InvalidCoordinates => "coordinates are out of range",
            SolarError::NoHorizonCrossing => "the sun neither rises nor sets on this date",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SunEvents {
    pub sunrise: DateTime<Tz>,
    pub sunset: DateTime<Tz>,
}

/// Sunrise and sunset falling on `date` in `tz` for the given coordinates.
pub fn sun_events(
    date: NaiveDate,
    latitude: f64,
    longitude: f64,
    tz: &Tz,
) -> Result<SunEvents, SolarError> {
    let coordinates = Coordinates::new(latitude, longitude).ok_or(SolarError::InvalidCoordinates)?;

    Ok(SunEvents {
        sunrise: event_on_local_date(coordinates, date, SolarEvent::Sunrise, tz)?,
        sunset: event_on_local_date(coordinates, date, SolarEvent::Sunset, tz)?,
    })
}

/// The event of the solar day whose local date is `date`.
///
/// Solar days are anchored on the UTC date, so far from Greenwich the event
/// can land on the neighbouring local date; the adjacent solar day is used
/// then.
fn event_on_local_date(
    coordinates: Coordinates,
    date: NaiveDate,
    event: SolarEvent,
    tz: &Tz,
) -> Result<DateTime<Tz>, SolarError> {
    let event_for = |day: NaiveDate| {
        SolarDay::new(coordinates, day)
            .event_time(event)
            .map(|at| at.with_timezone(tz))
            .ok_or(SolarError::NoHorizonCrossing)
    };

    let first = event_for(date)?;
    let neighbour = match first.date_naive().cmp(&date) {
        Ordering::Equal => None,
        Ordering::Less => date.succ_opt(),
        Ordering::Greater => date.pred_opt(),
    };

    match neighbour {
        Some(day) => event_for(day),
        None => Ok(first),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn assert_near(actual: DateTime<Tz>, expected: &str) {
        let expected = NaiveDateTime::parse_from_str(expected, "%Y-%m-%d %H:%M:%S").unwrap();
        let drift = (actual.naive_local() - expected).num_seconds().abs();
        assert!(drift <= 300, "{actual} is {drift}s away from {expected}");
    }

    #[test]
    fn test_new_york_solstices() {
        let tz = chrono_tz::America::New_York;

        let june = sun_events(date(2024, 6, 21), 40.7128, -74.0060, &tz).unwrap();
        assert_near(june.sunrise, "2024-06-21 05:25:05");
        assert_near(june.sunset, "2024-06-21 20:30:49");

        let december = sun_events(date(2024, 12, 21), 40.7128, -74.0060, &tz).unwrap();
        assert_near(december.sunrise, "2024-12-21 07:16:59");
        assert_near(december.sunset, "2024-12-21 16:32:15");
    }

    #[test]
    fn test_other_hemispheres() {
        let london = sun_events(date(2024, 3, 20), 51.5074, -0.1278, &chrono_tz::Europe::London).unwrap();
        assert_near(london.sunrise, "2024-03-20 06:01:57");
        assert_near(london.sunset, "2024-03-20 18:14:44");

        let sydney =
            sun_events(date(2024, 6, 21), -33.8688, 151.2093, &chrono_tz::Australia::Sydney).unwrap();
        assert_near(sydney.sunrise, "2024-06-21 07:00:02");
        assert_near(sydney.sunset, "2024-06-21 16:53:54");
    }

    #[test]
    fn test_events_land_on_requested_local_date() {
        // sunset in Seattle falls after midnight UTC
        let seattle = sun_events(date(2024, 6, 21), 47.6062, -122.3321, &chrono_tz::America::Los_Angeles).unwrap();
        assert_eq!(seattle.sunset.date_naive(), date(2024, 6, 21));
        assert_near(seattle.sunrise, "2024-06-21 05:11:40");
        assert_near(seattle.sunset, "2024-06-21 21:10:54");
        assert!(seattle.sunrise < seattle.sunset);
    }

    #[test]
    fn test_polar_conditions() {
        let tz = chrono_tz::Arctic::Longyearbyen;
        assert_eq!(
            sun_events(date(2024, 6, 21), 78.22, 15.65, &tz),
            Err(SolarError::NoHorizonCrossing)
        );
        assert_eq!(
            sun_events(date(2024, 12, 21), 78.22, 15.65, &tz),
            Err(SolarError::NoHorizonCrossing)
        );
        assert!(sun_events(date(2024, 3, 20), 78.22, 15.65, &tz).is_ok());
    }

    #[test]
    fn test_out_of_range_coordinates() {
        assert_eq!(
            sun_events(date(2024, 6, 21), 91.0, 0.0, &chrono_tz::UTC),
            Err(SolarError::InvalidCoordinates)
        );
    }

    #[test]
    fn test_far_east_events_stay_on_local_date() {
        let auckland = sun_events(date(2024, 12, 21), -36.8485, 174.7633, &chrono_tz::Pacific::Auckland).unwrap();
        assert_eq!(auckland.sunrise.date_naive(), date(2024, 12, 21));
        assert_eq!(auckland.sunset.date_naive(), date(2024, 12, 21));
        assert_near(auckland.sunrise, "2024-12-21 05:59:00");
        assert_near(auckland.sunset, "2024-12-21 20:41:00");
    }
}
