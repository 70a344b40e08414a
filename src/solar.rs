use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Julian date of 2000-01-01 12:00 UTC.
const J2000: f64 = 2_451_545.0;
/// Julian date of the Unix epoch.
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const MS_PER_DAY: f64 = 86_400_000.0;
/// Apparent-horizon depression: refraction plus the solar semi-diameter.
const HORIZON_DEPRESSION_DEG: f64 = 0.833;
const OBLIQUITY_DEG: f64 = 23.4397;

/// Sleep value that tells the poll loop to stop.
pub const TERMINATE: i64 = -1;

/// A fixed observation point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    /// Degrees east positive.
    pub longitude: f64,
    /// Metres above sea level.
    pub altitude_m: f64,
    pub timezone: Tz,
}

impl Location {
    /// The local calendar date at `now`.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }
}

/// Sunrise and sunset instants for one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolarWindow {
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
}

/// Sunrise/sunset for `date` at `location` using the standard sunrise
/// equation, with the horizon lowered for the observer's altitude.
///
/// Fails when the sun does not cross the horizon that day (polar day or
/// polar night).
pub fn compute_window(location: &Location, date: NaiveDate) -> Result<SolarWindow> {
    let epoch = NaiveDate::from_ymd_opt(2000, 1, 1).context("invalid J2000 epoch date")?;
    let n = (date - epoch).num_days() as f64;

    // Mean solar time at the observer's meridian.
    let j_star = n - location.longitude / 360.0;
    let m = (357.5291 + 0.985_600_28 * j_star).rem_euclid(360.0);
    let m_rad = m.to_radians();
    // Equation of the centre.
    let c = 1.9148 * m_rad.sin() + 0.0200 * (2.0 * m_rad).sin() + 0.0003 * (3.0 * m_rad).sin();
    // Ecliptic longitude.
    let lambda = (m + c + 180.0 + 102.9372).rem_euclid(360.0).to_radians();
    let j_transit = J2000 + j_star + 0.0053 * m_rad.sin() - 0.0069 * (2.0 * lambda).sin();

    let sin_decl = lambda.sin() * OBLIQUITY_DEG.to_radians().sin();
    let cos_decl = sin_decl.asin().cos();

    let altitude = location.altitude_m.max(0.0);
    let horizon = -(HORIZON_DEPRESSION_DEG + 2.076 * altitude.sqrt() / 60.0);
    let lat = location.latitude.to_radians();
    let cos_hour_angle =
        (horizon.to_radians().sin() - lat.sin() * sin_decl) / (lat.cos() * cos_decl);

    if cos_hour_angle > 1.0 {
        bail!("the sun does not rise on {date} at latitude {}", location.latitude);
    }
    if cos_hour_angle < -1.0 {
        bail!("the sun does not set on {date} at latitude {}", location.latitude);
    }

    let half_day = cos_hour_angle.acos().to_degrees() / 360.0;
    Ok(SolarWindow {
        sunrise: julian_to_utc(j_transit - half_day)?,
        sunset: julian_to_utc(j_transit + half_day)?,
    })
}

fn julian_to_utc(jd: f64) -> Result<DateTime<Utc>> {
    let ms = ((jd - UNIX_EPOCH_JD) * MS_PER_DAY).round() as i64;
    Utc.timestamp_millis_opt(ms)
        .single()
        .with_context(|| format!("julian date {jd} is out of range"))
}

/// Seconds to sleep before the next poll, or [`TERMINATE`] once the window
/// (plus a two hour tail) has passed. Bands are checked in order:
///
/// | now                 | sleep |
/// |---------------------|-------|
/// | before sunrise − 2h | 600   |
/// | up to sunrise − 1h  | 300   |
/// | after sunset + 2h   | −1    |
/// | after sunset + 1h   | 300   |
/// | otherwise           | 15    |
pub fn next_sleep_seconds(now: DateTime<Utc>, window: &SolarWindow) -> i64 {
    if now < window.sunrise - Duration::hours(2) {
        600
    } else if now <= window.sunrise - Duration::hours(1) {
        300
    } else if now > window.sunset + Duration::hours(2) {
        TERMINATE
    } else if now > window.sunset + Duration::hours(1) {
        300
    } else {
        15
    }
}
