// Post Scheduler
//
// Every (platform, language) pair gets one post at `optimal_time` on the day
// after "now" in the language's audience time zone. The +1 day is
// unconditional, even when the hour has not passed yet today.

use chrono::{DateTime, Duration, FixedOffset, LocalResult, NaiveTime, Offset, TimeZone as _, Utc};
use std::collections::HashMap;
use tracing::debug;

use crate::core::errors::SchedulingError;
use crate::core::languages::{Language, Platform, TimeZone};
use crate::core::types::{PostSchedule, PostStatus};

/// Parse a 24-hour "HH:MM" string
pub fn parse_optimal_time(value: &str) -> Result<NaiveTime, SchedulingError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| SchedulingError::InvalidOptimalTime(value.to_string()))
}

/// Tomorrow (relative to `now` in `zone`) at `time`, as an absolute instant
/// carrying the zone's offset.
pub fn next_day_at(zone: TimeZone, time: NaiveTime, now: DateTime<Utc>) -> DateTime<FixedOffset> {
    let tz = zone.tz();
    let local_now = now.with_timezone(&tz);
    let tomorrow = local_now.date_naive() + Duration::days(1);
    let wall = tomorrow.and_time(time);

    match tz.from_local_datetime(&wall) {
        LocalResult::Single(dt) => dt.fixed_offset(),
        LocalResult::Ambiguous(earlier, _) => earlier.fixed_offset(),
        // DST gap: interpret the wall time with the offset in force now
        LocalResult::None => {
            let offset = local_now.offset().fix();
            match offset.from_local_datetime(&wall) {
                LocalResult::Single(dt) => dt,
                _ => (now + Duration::days(1)).with_timezone(&offset),
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostScheduler;

impl PostScheduler {
    pub fn new() -> Self {
        Self
    }

    pub fn schedule(
        &self,
        image_id: &str,
        platforms: &[Platform],
        language_time_zones: &HashMap<Language, TimeZone>,
        optimal_time: &str,
    ) -> Result<Vec<PostSchedule>, SchedulingError> {
        self.schedule_at(image_id, platforms, language_time_zones, optimal_time, Utc::now())
    }

    /// Same as [`schedule`](Self::schedule) with an explicit "now".
    ///
    /// Order is platform-major in first-appearance order (duplicates
    /// dropped), then language by code.
    pub fn schedule_at(
        &self,
        image_id: &str,
        platforms: &[Platform],
        language_time_zones: &HashMap<Language, TimeZone>,
        optimal_time: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<PostSchedule>, SchedulingError> {
        let time = parse_optimal_time(optimal_time)?;

        let mut unique_platforms: Vec<Platform> = Vec::with_capacity(platforms.len());
        for platform in platforms {
            if !unique_platforms.contains(platform) {
                unique_platforms.push(*platform);
            }
        }

        let mut languages: Vec<(&Language, &TimeZone)> = language_time_zones.iter().collect();
        languages.sort_by_key(|(lang, _)| lang.code());

        let mut schedules = Vec::with_capacity(unique_platforms.len() * languages.len());
        for platform in &unique_platforms {
            for (language, zone) in &languages {
                schedules.push(PostSchedule {
                    image_id: image_id.to_string(),
                    platform: *platform,
                    target_language: **language,
                    time_zone: **zone,
                    scheduled_time: next_day_at(**zone, time, now),
                    status: PostStatus::Pending,
                });
            }
        }

        debug!(
            "Planned {} posts for image {} at {}",
            schedules.len(),
            image_id,
            optimal_time
        );
        Ok(schedules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, NaiveDate, Timelike};

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn test_parse_optimal_time() {
        assert_eq!(
            parse_optimal_time("18:00").unwrap(),
            NaiveTime::from_hms_opt(18, 0, 0).unwrap()
        );
        assert_eq!(
            parse_optimal_time("7:05").unwrap(),
            NaiveTime::from_hms_opt(7, 5, 0).unwrap()
        );
        for bad in ["25:00", "18", "six pm", "18:60", ""] {
            assert_eq!(
                parse_optimal_time(bad),
                Err(SchedulingError::InvalidOptimalTime(bad.to_string()))
            );
        }
    }

    #[test]
    fn test_always_tomorrow_even_before_target_hour() {
        // 06:00 in Paris (UTC+2 in June): 18:00 today is still ahead, but
        // the post goes out tomorrow
        let now = utc(2024, 6, 10, 4, 0);
        let at = next_day_at(TimeZone::Cet, parse_optimal_time("18:00").unwrap(), now);
        assert_eq!(at.date_naive(), NaiveDate::from_ymd_opt(2024, 6, 11).unwrap());
        assert_eq!((at.hour(), at.minute(), at.second()), (18, 0, 0));
        assert_eq!(at.offset().local_minus_utc(), 2 * 3600);
    }

    #[test]
    fn test_day_is_taken_in_target_zone() {
        // 23:30 UTC on the 10th is already the 11th in Tokyo
        let now = utc(2024, 3, 10, 23, 30);
        let at = next_day_at(TimeZone::Jst, parse_optimal_time("09:15").unwrap(), now);
        assert_eq!(at.day(), 12);
        assert_eq!((at.hour(), at.minute()), (9, 15));

        // ...and still the 10th in Los Angeles
        let at = next_day_at(TimeZone::Pst, parse_optimal_time("09:15").unwrap(), now);
        assert_eq!(at.day(), 11);
    }

    #[test]
    fn test_dst_gap_uses_current_offset() {
        // 02:30 on 2024-03-31 does not exist in Paris
        let now = utc(2024, 3, 30, 12, 0);
        let at = next_day_at(TimeZone::Cet, parse_optimal_time("02:30").unwrap(), now);
        assert_eq!(at.offset().local_minus_utc(), 3600);
        assert_eq!((at.day(), at.hour(), at.minute()), (31, 2, 30));
    }

    #[test]
    fn test_ambiguous_time_takes_earlier_instant() {
        // 02:30 on 2024-10-27 happens twice in Paris
        let now = utc(2024, 10, 26, 12, 0);
        let at = next_day_at(TimeZone::Cet, parse_optimal_time("02:30").unwrap(), now);
        assert_eq!(at.offset().local_minus_utc(), 2 * 3600);
    }

    #[test]
    fn test_cartesian_product_and_order() {
        let scheduler = PostScheduler::new();
        let mut zones = HashMap::new();
        zones.insert(Language::Spanish, TimeZone::Cet);
        zones.insert(Language::French, TimeZone::Cet);

        let now = Utc::now();
        let schedules = scheduler
            .schedule_at(
                "img-42",
                &[Platform::Instagram, Platform::Twitter],
                &zones,
                "18:00",
                now,
            )
            .unwrap();

        assert_eq!(schedules.len(), 4);
        let pairs: Vec<_> = schedules
            .iter()
            .map(|s| (s.platform, s.target_language))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (Platform::Instagram, Language::Spanish),
                (Platform::Instagram, Language::French),
                (Platform::Twitter, Language::Spanish),
                (Platform::Twitter, Language::French),
            ]
        );

        let today_paris = now.with_timezone(&chrono_tz::Europe::Paris).date_naive();
        for s in &schedules {
            assert_eq!(s.image_id, "img-42");
            assert_eq!(s.status, PostStatus::Pending);
            assert!(s.scheduled_time > now);
            assert_eq!(s.scheduled_time.date_naive(), today_paris + Duration::days(1));
            assert_eq!((s.scheduled_time.hour(), s.scheduled_time.minute()), (18, 0));
        }
    }

    #[test]
    fn test_duplicate_platforms_collapse() {
        let mut zones = HashMap::new();
        zones.insert(Language::German, TimeZone::Utc);
        let schedules = PostScheduler::new()
            .schedule("img", &[Platform::Facebook, Platform::Facebook], &zones, "08:00")
            .unwrap();
        assert_eq!(schedules.len(), 1);
    }

    #[test]
    fn test_malformed_time_fails_fast() {
        let mut zones = HashMap::new();
        zones.insert(Language::German, TimeZone::Utc);
        let result = PostScheduler::new().schedule("img", &[Platform::Twitter], &zones, "noon");
        assert!(matches!(result, Err(SchedulingError::InvalidOptimalTime(_))));
    }
}
