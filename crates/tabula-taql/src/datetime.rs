//! Datetimes as modified Julian days (MJD, days since 1858-11-17 00:00 UTC).

use crate::error::{TaqlError, TaqlResult};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use std::f64::consts::PI;

/// `NaiveDate::num_days_from_ce` of the MJD epoch.
const MJD_EPOCH_CE: i32 = 678_576;
const SECONDS_PER_DAY: f64 = 86_400.0;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];
const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

pub fn mjd_from_datetime(datetime: NaiveDateTime) -> f64 {
    let days = f64::from(datetime.date().num_days_from_ce() - MJD_EPOCH_CE);
    let time = datetime.time();
    let seconds =
        f64::from(time.num_seconds_from_midnight()) + f64::from(time.nanosecond()) * 1e-9;
    days + seconds / SECONDS_PER_DAY
}

pub fn datetime_from_mjd(mjd: f64) -> TaqlResult<NaiveDateTime> {
    if !mjd.is_finite() {
        return Err(TaqlError::eval(format!("invalid MJD {mjd}")));
    }
    let mut days = mjd.floor();
    let mut millis = ((mjd - days) * SECONDS_PER_DAY * 1000.0).round() as u64;
    if millis >= 86_400_000 {
        days += 1.0;
        millis -= 86_400_000;
    }
    let date = i32::try_from(days as i64)
        .ok()
        .and_then(|d| d.checked_add(MJD_EPOCH_CE))
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or_else(|| TaqlError::eval(format!("MJD {mjd} out of range")))?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(
        (millis / 1000) as u32,
        ((millis % 1000) * 1_000_000) as u32,
    )
    .ok_or_else(|| TaqlError::eval(format!("MJD {mjd} out of range")))?;
    Ok(NaiveDateTime::new(date, time))
}

pub fn now_mjd() -> f64 {
    mjd_from_datetime(Utc::now().naive_utc())
}

fn month_from_name(name: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(name))
        .map(|i| i as u32 + 1)
}

/// Parses `3Mar16/12:14:23.3`, `2016-03-02/1:4:23`, `2016/03/02 01:04` and the like.
///
/// The time part is optional and may be separated from the date by `/`, `-`, `T` or a
/// space. Two-digit years below 50 are in this century.
pub fn parse_datetime(text: &str) -> TaqlResult<f64> {
    let invalid = || TaqlError::eval(format!("invalid datetime {text:?}"));
    let text = text.trim();
    let bytes = text.as_bytes();
    let digits_at = |start: usize| {
        bytes[start..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count()
    };

    let first = digits_at(0);
    if first == 0 {
        return Err(invalid());
    }
    let year: i32;
    let month: u32;
    let day: u32;
    let mut pos: usize;
    if bytes.get(first).is_some_and(|b| b.is_ascii_alphabetic()) {
        // 3Mar16 / 03Mar2016
        let letters = bytes[first..]
            .iter()
            .take_while(|b| b.is_ascii_alphabetic())
            .count();
        let month_name = &text[first..first + letters];
        month = month_from_name(month_name).ok_or_else(invalid)?;
        day = text[..first].parse::<u32>().map_err(|_| invalid())?;
        let year_start = first + letters;
        let year_len = digits_at(year_start);
        let raw: i32 = text[year_start..year_start + year_len]
            .parse()
            .map_err(|_| invalid())?;
        year = match year_len {
            1 | 2 if raw < 50 => 2000 + raw,
            1 | 2 => 1900 + raw,
            _ => raw,
        };
        pos = year_start + year_len;
    } else {
        // 2016-03-02 / 2016/03/02
        year = text[..first].parse().map_err(|_| invalid())?;
        let sep = *bytes.get(first).ok_or_else(invalid)?;
        if sep != b'-' && sep != b'/' {
            return Err(invalid());
        }
        let m_len = digits_at(first + 1);
        month = text[first + 1..first + 1 + m_len]
            .parse()
            .map_err(|_| invalid())?;
        let sep2 = first + 1 + m_len;
        if bytes.get(sep2) != Some(&sep) {
            return Err(invalid());
        }
        let d_len = digits_at(sep2 + 1);
        day = text[sep2 + 1..sep2 + 1 + d_len]
            .parse()
            .map_err(|_| invalid())?;
        pos = sep2 + 1 + d_len;
    }
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)?;

    let mut seconds = 0.0;
    if pos < bytes.len() {
        if !matches!(bytes[pos], b'/' | b'-' | b' ' | b'T') {
            return Err(invalid());
        }
        pos += 1;
        let time = text[pos..].trim();
        let mut scale = 3600.0;
        for part in time.split(':') {
            if scale < 1.0 {
                return Err(invalid());
            }
            let v: f64 = part.parse().map_err(|_| invalid())?;
            seconds += v * scale;
            scale /= 60.0;
        }
    }
    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(invalid)?;
    Ok(mjd_from_datetime(midnight) + seconds / SECONDS_PER_DAY)
}

fn split_millis(datetime: &NaiveDateTime) -> (u32, u32, u32, u32) {
    let time = datetime.time();
    (
        time.hour(),
        time.minute(),
        time.second(),
        time.nanosecond() / 1_000_000,
    )
}

/// `YYYY/MM/DD/HH:MM:SS.SSS`
pub fn format_datetime(mjd: f64) -> String {
    match datetime_from_mjd(mjd) {
        Ok(dt) => {
            let (h, m, s, ms) = split_millis(&dt);
            format!(
                "{:04}/{:02}/{:02}/{h:02}:{m:02}:{s:02}.{ms:03}",
                dt.year(),
                dt.month(),
                dt.day()
            )
        }
        Err(_) => format!("MJD {mjd}"),
    }
}

/// `DD-Mon-YYYY`
pub fn format_date(mjd: f64) -> TaqlResult<String> {
    let dt = datetime_from_mjd(mjd)?;
    Ok(format!(
        "{:02}-{}-{:04}",
        dt.day(),
        MONTHS[dt.month0() as usize],
        dt.year()
    ))
}

/// `HH:MM:SS.SSS`
pub fn format_time(mjd: f64) -> TaqlResult<String> {
    let dt = datetime_from_mjd(mjd)?;
    let (h, m, s, ms) = split_millis(&dt);
    Ok(format!("{h:02}:{m:02}:{s:02}.{ms:03}"))
}

pub fn month_name(mjd: f64) -> TaqlResult<&'static str> {
    Ok(MONTHS[datetime_from_mjd(mjd)?.month0() as usize])
}

pub fn weekday_name(mjd: f64) -> TaqlResult<&'static str> {
    Ok(WEEKDAYS[datetime_from_mjd(mjd)?.weekday().num_days_from_monday() as usize])
}

pub fn year(mjd: f64) -> TaqlResult<i64> {
    Ok(i64::from(datetime_from_mjd(mjd)?.year()))
}

pub fn month(mjd: f64) -> TaqlResult<i64> {
    Ok(i64::from(datetime_from_mjd(mjd)?.month()))
}

pub fn day(mjd: f64) -> TaqlResult<i64> {
    Ok(i64::from(datetime_from_mjd(mjd)?.day()))
}

/// 1 = Monday .. 7 = Sunday.
pub fn weekday(mjd: f64) -> TaqlResult<i64> {
    Ok(i64::from(
        datetime_from_mjd(mjd)?.weekday().number_from_monday(),
    ))
}

/// ISO 8601 week number.
pub fn week(mjd: f64) -> TaqlResult<i64> {
    Ok(i64::from(datetime_from_mjd(mjd)?.iso_week().week()))
}

/// Time of day as an angle (a full day is 2 pi rad).
pub fn time_of_day(mjd: f64) -> f64 {
    (mjd - mjd.floor()) * 2.0 * PI
}

fn sexagesimal(value: f64, first_sep: char) -> String {
    let sign = if value < 0.0 { "-" } else { "" };
    // Round to milliseconds first so 59.9999 does not print as 60.000.
    let total_ms = (value.abs() * 3_600_000.0).round() as u64;
    let units = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let ms = total_ms % 60_000;
    format!(
        "{sign}{units:02}{first_sep}{minutes:02}m{:02}.{:03}",
        ms / 1000,
        ms % 1000
    )
}

/// Angle in rad as hours, e.g. `12h34m56.789`.
pub fn format_hms(rad: f64) -> String {
    sexagesimal(rad * 12.0 / PI, 'h')
}

/// Angle in rad as degrees, e.g. `+12d34m56.789`.
pub fn format_dms(rad: f64) -> String {
    let text = sexagesimal(rad * 180.0 / PI, 'd');
    if text.starts_with('-') {
        text
    } else {
        format!("+{text}")
    }
}

/// Parses `2h13m44.5` (hours) or `30d13m44.4` (degrees) into rad.
pub fn parse_sexagesimal(text: &str) -> TaqlResult<f64> {
    let invalid = || TaqlError::eval(format!("invalid angle {text:?}"));
    let (unit_pos, scale) = if let Some(pos) = text.find(['h', 'H']) {
        (pos, PI / 12.0)
    } else if let Some(pos) = text.find(['d', 'D']) {
        (pos, PI / 180.0)
    } else {
        return Err(invalid());
    };
    let whole: f64 = text[..unit_pos].parse().map_err(|_| invalid())?;
    let rest = &text[unit_pos + 1..];
    let (minutes, seconds) = match rest.find(['m', 'M']) {
        Some(m) => {
            let minutes: f64 = rest[..m].parse().map_err(|_| invalid())?;
            let sec_text = &rest[m + 1..];
            let seconds = if sec_text.is_empty() {
                0.0
            } else {
                sec_text.parse().map_err(|_| invalid())?
            };
            (minutes, seconds)
        }
        None if rest.is_empty() => (0.0, 0.0),
        None => return Err(invalid()),
    };
    Ok((whole + minutes / 60.0 + seconds / 3600.0) * scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_mjd_zero() {
        let epoch = NaiveDate::from_ymd_opt(1858, 11, 17).unwrap();
        assert_eq!(epoch.num_days_from_ce(), MJD_EPOCH_CE);
        assert_eq!(parse_datetime("2000-01-01").unwrap(), 51544.0);
    }

    #[test]
    fn literal_forms() {
        let a = parse_datetime("3Mar16/12:14:23.3").unwrap();
        let b = parse_datetime("2016-03-03/12:14:23.3").unwrap();
        assert!((a - b).abs() < 1e-9);
        assert_eq!(format_datetime(a), "2016/03/03/12:14:23.300");
        assert_eq!(format_date(a).unwrap(), "03-Mar-2016");
        assert_eq!(weekday(a).unwrap(), 4);
        assert!(parse_datetime("2016-13-01").is_err());
    }

    #[test]
    fn sexagesimal_angles() {
        let rad = parse_sexagesimal("2h13m44.5").unwrap();
        assert_eq!(format_hms(rad), "02h13m44.500");
        let rad = parse_sexagesimal("30d13m44.4").unwrap();
        assert_eq!(format_dms(rad), "+30d13m44.400");
        assert_eq!(format_dms(-rad), "-30d13m44.400");
    }
}
