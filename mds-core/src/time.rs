//! Candle boundary arithmetic. All flooring is done on UTC calendar fields so
//! that 4h and 1d candles align to UTC midnight regardless of process locale.

use chrono::{DateTime, TimeZone, Timelike, Utc};

use crate::model::Interval;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn to_utc(timestamp_ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(timestamp_ms).single()
}

/// Open time of the candle containing `timestamp_ms` for `interval`, floored
/// on calendar fields (minute-of-hour, hour-of-day, day boundaries).
pub fn kline_open_time(timestamp_ms: i64, interval: Interval) -> i64 {
    let Some(dt) = to_utc(timestamp_ms) else {
        return timestamp_ms;
    };
    let date = dt.date_naive();
    let floored = match interval {
        Interval::M1 => date.and_hms_opt(dt.hour(), dt.minute(), 0),
        Interval::M5 => date.and_hms_opt(dt.hour(), dt.minute() / 5 * 5, 0),
        Interval::M15 => date.and_hms_opt(dt.hour(), dt.minute() / 15 * 15, 0),
        Interval::H1 => date.and_hms_opt(dt.hour(), 0, 0),
        Interval::H4 => date.and_hms_opt(dt.hour() / 4 * 4, 0, 0),
        Interval::D1 => date.and_hms_opt(0, 0, 0),
    };
    match floored {
        Some(naive) => naive.and_utc().timestamp_millis(),
        None => timestamp_ms,
    }
}

/// Close time of the candle opening at `open_time_ms`: the last millisecond
/// of the period.
pub fn kline_close_time(open_time_ms: i64, interval: Interval) -> i64 {
    open_time_ms + interval.period_ms() - 1
}

/// Whether a trade at `trade_ts_ms` belongs to a later candle than the one
/// opened at `current_open_ms`.
pub fn is_new_kline(current_open_ms: i64, trade_ts_ms: i64, interval: Interval) -> bool {
    kline_open_time(trade_ts_ms, interval) != current_open_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> i64 {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    #[test]
    fn open_time_floors_to_calendar_boundaries() {
        let t = ms(2024, 3, 15, 13, 47, 23) + 512;
        assert_eq!(kline_open_time(t, Interval::M1), ms(2024, 3, 15, 13, 47, 0));
        assert_eq!(kline_open_time(t, Interval::M5), ms(2024, 3, 15, 13, 45, 0));
        assert_eq!(
            kline_open_time(t, Interval::M15),
            ms(2024, 3, 15, 13, 45, 0)
        );
        assert_eq!(kline_open_time(t, Interval::H1), ms(2024, 3, 15, 13, 0, 0));
        assert_eq!(kline_open_time(t, Interval::H4), ms(2024, 3, 15, 12, 0, 0));
        assert_eq!(kline_open_time(t, Interval::D1), ms(2024, 3, 15, 0, 0, 0));
    }

    #[test]
    fn candle_brackets_its_trades() {
        let samples = [
            ms(2024, 1, 1, 0, 0, 0),
            ms(2024, 3, 15, 13, 47, 23) + 999,
            ms(2024, 12, 31, 23, 59, 59) + 999,
            ms(2026, 6, 30, 3, 59, 59),
        ];
        for t in samples {
            for interval in Interval::ALL {
                let open = kline_open_time(t, interval);
                let close = kline_close_time(open, interval);
                assert!(open <= t, "{interval} open after trade");
                assert!(t <= close, "{interval} close before trade");
                assert_eq!(close, open + interval.period_ms() - 1);
            }
        }
    }

    #[test]
    fn four_hour_candles_align_to_utc_midnight() {
        let t = ms(2024, 7, 9, 2, 10, 0);
        assert_eq!(kline_open_time(t, Interval::H4), ms(2024, 7, 9, 0, 0, 0));
        let late = ms(2024, 7, 9, 23, 59, 59);
        assert_eq!(kline_open_time(late, Interval::H4), ms(2024, 7, 9, 20, 0, 0));
    }

    #[test]
    fn boundary_trade_opens_the_next_candle() {
        let open = ms(2024, 3, 15, 13, 47, 0);
        assert!(!is_new_kline(open, open + 59_999, Interval::M1));
        assert!(is_new_kline(open, open + 60_000, Interval::M1));
    }
}
