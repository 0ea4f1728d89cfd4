// MS-DOS date/time stamps stored in directory entries
//
// date: bits 15-9 year since 1980, bits 8-5 month, bits 4-0 day
// time: bits 15-11 hours, bits 10-5 minutes, bits 4-0 seconds / 2

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A decoded directory timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatTimestamp {
    pub date: u16,
    pub time: u16,
}

impl FatTimestamp {
    pub fn now() -> Self {
        let (date, time) = current_fat_datetime();
        FatTimestamp { date, time }
    }

    pub fn from_unix(secs: u64) -> Self {
        let (date, time) = unix_to_fat_datetime(secs);
        FatTimestamp { date, time }
    }

    /// Seconds since the Unix epoch, or `None` for an unset or malformed stamp.
    pub fn to_unix(&self) -> Option<u64> {
        fat_datetime_to_unix(self.date, self.time)
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let secs = self.to_unix()?;
        DateTime::<Utc>::from_timestamp(secs as i64, 0)
    }
}

pub fn fat_datetime_to_unix(date: u16, time: u16) -> Option<u64> {
    let year = ((date >> 9) & 0x7F) as i32 + 1980;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;

    let hour = ((time >> 11) & 0x1F) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) * 2) as u32;

    let dt = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    let secs = dt.and_utc().timestamp();
    if secs < 0 {
        None
    } else {
        Some(secs as u64)
    }
}

/// Years outside 1980..=2107 are clamped to the representable range.
pub fn unix_to_fat_datetime(timestamp: u64) -> (u16, u16) {
    let datetime = DateTime::<Utc>::from(UNIX_EPOCH + Duration::from_secs(timestamp));

    let year = datetime.year();
    let (fat_year, month, day, hour, minute, second) = if year < 1980 {
        (0, 1, 1, 0, 0, 0)
    } else if year > 2107 {
        (127, 12, 31, 23, 59, 58)
    } else {
        (
            (year - 1980) as u16,
            datetime.month(),
            datetime.day(),
            datetime.hour(),
            datetime.minute(),
            datetime.second(),
        )
    };

    let fat_date = (fat_year << 9) | ((month as u16) << 5) | (day as u16);
    let fat_time = ((hour as u16) << 11) | ((minute as u16) << 5) | ((second / 2) as u16);
    (fat_date, fat_time)
}

pub fn current_fat_datetime() -> (u16, u16) {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => unix_to_fat_datetime(duration.as_secs()),
        Err(_) => unix_to_fat_datetime(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_date_round_trips() {
        // 2024-01-15 14:30:00 UTC
        let (date, time) = unix_to_fat_datetime(1_705_329_000);
        assert_eq!(date >> 9, 44);
        assert_eq!((date >> 5) & 0x0F, 1);
        assert_eq!(date & 0x1F, 15);
        assert_eq!(time >> 11, 14);
        assert_eq!(fat_datetime_to_unix(date, time), Some(1_705_329_000));
    }

    #[test]
    fn odd_seconds_lose_precision() {
        let stamp = FatTimestamp::from_unix(1_705_329_001);
        assert_eq!(stamp.to_unix(), Some(1_705_329_000));
    }

    #[test]
    fn pre_1980_clamps_to_epoch_of_fat() {
        let (date, time) = unix_to_fat_datetime(0);
        assert_eq!(date, (1 << 5) | 1);
        assert_eq!(time, 0);
    }

    #[test]
    fn zero_date_is_unset() {
        assert_eq!(fat_datetime_to_unix(0, 0), None);
        assert!(FatTimestamp { date: 0, time: 0 }.to_datetime().is_none());
    }
}
