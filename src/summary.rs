//! Distance, calorie and goal summaries over the step log
//!
//! Days are local calendar days: local midnight up to the next local
//! midnight, queried with the log's `(from, to]` convention.

use crate::error::TrackerError;
use crate::log_store::StepLog;
use crate::types::Step;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Days in a [`WeekSummary`]
pub const DAYS_PER_WEEK: usize = 7;

// Distance per step is height (cm) times stride coefficient, cm -> km
const CM_PER_KM: f64 = 100_000.0;
const CM_PER_M: f64 = 100.0;
// kcal/min = MET * 3.5 * kg / 200
const OXYGEN_ML_PER_KG_MIN: f64 = 3.5;
const KCAL_DIVISOR: f64 = 200.0;
const SECONDS_PER_MINUTE: f64 = 60.0;

/// Distance covered by `steps` (km)
pub fn distance_km(steps: &[Step], stride_coefficient: f64) -> f64 {
    steps
        .iter()
        .map(|s| s.height * stride_coefficient / CM_PER_KM)
        .sum()
}

/// Energy spent on a single step (kcal)
///
/// A step with no speed carries no duration and contributes nothing.
pub fn step_calories(step: &Step, stride_coefficient: f64) -> f64 {
    if step.speed <= 0.0 {
        return 0.0;
    }
    let stride_m = step.height * stride_coefficient / CM_PER_M;
    let seconds = stride_m / step.speed;
    seconds * step.met * OXYGEN_ML_PER_KG_MIN * step.weight / (KCAL_DIVISOR * SECONDS_PER_MINUTE)
}

/// Energy spent over `steps` (kcal)
pub fn calories(steps: &[Step], stride_coefficient: f64) -> f64 {
    steps
        .iter()
        .map(|s| step_calories(s, stride_coefficient))
        .sum()
}

/// "850 m" below one kilometre, "1.25 km" above
pub fn format_distance(km: f64) -> String {
    if km < 1.0 {
        format!("{:.0} m", km * 1000.0)
    } else {
        format!("{:.2} km", km)
    }
}

pub fn format_calories(kcal: f64) -> String {
    format!("{:.2} kcal", kcal)
}

/// Local midnight of `date` and of the following day, as UTC instants
pub fn day_range<Tz: TimeZone>(
    date: NaiveDate,
    tz: &Tz,
) -> Result<(DateTime<Utc>, DateTime<Utc>), TrackerError> {
    let next = date
        .succ_opt()
        .ok_or_else(|| TrackerError::InvalidDate(format!("no day after {}", date)))?;
    Ok((local_midnight(date, tz)?, local_midnight(next, tz)?))
}

fn local_midnight<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> Result<DateTime<Utc>, TrackerError> {
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| TrackerError::InvalidDate(date.to_string()))?;
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| TrackerError::InvalidDate(format!("{} has no local midnight", date)))
}

/// Progress toward the daily goal for one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub steps: u64,
    pub distance_km: f64,
    pub calories: f64,
    pub goal: u64,
    /// steps / goal, clamped to [0, 1]
    pub progress: f64,
    pub goal_reached: bool,
}

impl DaySummary {
    /// Summarise an already-queried day of steps
    pub fn from_steps(date: NaiveDate, steps: &[Step], goal: u64, stride_coefficient: f64) -> Self {
        let count = steps.len() as u64;
        let progress = if goal == 0 {
            1.0
        } else {
            (count as f64 / goal as f64).clamp(0.0, 1.0)
        };
        Self {
            date,
            steps: count,
            distance_km: distance_km(steps, stride_coefficient),
            calories: calories(steps, stride_coefficient),
            goal,
            progress,
            goal_reached: count >= goal,
        }
    }

    /// Query `log` for `date` in `tz` and summarise it
    pub fn for_day<Tz: TimeZone>(
        log: &StepLog,
        date: NaiveDate,
        tz: &Tz,
        goal: u64,
        stride_coefficient: f64,
    ) -> Result<Self, TrackerError> {
        let (from, to) = day_range(date, tz)?;
        let steps = log.query(from, to);
        Ok(Self::from_steps(date, &steps, goal, stride_coefficient))
    }

    pub fn distance_label(&self) -> String {
        format_distance(self.distance_km)
    }

    pub fn calories_label(&self) -> String {
        format_calories(self.calories)
    }
}

/// Seven consecutive days ending at (and including) `end`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekSummary {
    pub days: Vec<DaySummary>,
    pub total_steps: u64,
    pub total_distance_km: f64,
    pub total_calories: f64,
    pub days_goal_reached: usize,
}

impl WeekSummary {
    pub fn from_days(days: Vec<DaySummary>) -> Self {
        Self {
            total_steps: days.iter().map(|d| d.steps).sum(),
            total_distance_km: days.iter().map(|d| d.distance_km).sum(),
            total_calories: days.iter().map(|d| d.calories).sum(),
            days_goal_reached: days.iter().filter(|d| d.goal_reached).count(),
            days,
        }
    }

    pub fn ending<Tz: TimeZone>(
        log: &StepLog,
        end: NaiveDate,
        tz: &Tz,
        goal: u64,
        stride_coefficient: f64,
    ) -> Result<Self, TrackerError> {
        let mut days = Vec::with_capacity(DAYS_PER_WEEK);
        for offset in (0..DAYS_PER_WEEK as i64).rev() {
            let date = end
                .checked_sub_signed(Duration::days(offset))
                .ok_or_else(|| TrackerError::InvalidDate(format!("{} - {} days", end, offset)))?;
            days.push(DaySummary::for_day(log, date, tz, goal, stride_coefficient)?);
        }
        Ok(Self::from_days(days))
    }

    pub fn start(&self) -> Option<NaiveDate> {
        self.days.first().map(|d| d.date)
    }

    pub fn end(&self) -> Option<NaiveDate> {
        self.days.last().map(|d| d.date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gait::{self, GaitModel, DEFAULT_STRIDE_COEFFICIENT};
    use crate::types::{Gender, WalkSpeed};
    use chrono::FixedOffset;
    use pretty_assertions::assert_eq;

    const K: f64 = DEFAULT_STRIDE_COEFFICIENT;

    fn step_at(instant: DateTime<Utc>, cadence: f64) -> Step {
        Step {
            instant,
            met: gait::met(cadence, Some(Gender::Male)),
            height: 170.0,
            weight: 70.0,
            speed: GaitModel::default().speed(170.0, cadence),
            walk_speed: gait::classify(cadence),
        }
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_step_calories_golden() {
        let step = step_at(utc(2024, 1, 15, 9, 0), 120.0);
        // 0.5 s per stride at 1.4076 m/s, MET 4.60985
        assert!((step_calories(&step, K) - 0.047_058_8).abs() < 1e-6);
    }

    #[test]
    fn test_distance_per_step() {
        let steps = vec![step_at(utc(2024, 1, 15, 9, 0), 120.0); 1000];
        assert!((distance_km(&steps, K) - 0.7038).abs() < 1e-9);
    }

    #[test]
    fn test_stationary_step_has_no_calories() {
        let mut step = step_at(utc(2024, 1, 15, 9, 0), 120.0);
        step.speed = 0.0;
        step.walk_speed = WalkSpeed::Still;
        assert_eq!(step_calories(&step, K), 0.0);
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_distance(0.85), "850 m");
        assert_eq!(format_distance(0.0), "0 m");
        assert_eq!(format_distance(1.254), "1.25 km");
        assert_eq!(format_calories(12.345), "12.35 kcal");
    }

    #[test]
    fn test_day_range_uses_local_midnight() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let (from, to) = day_range(date, &tz).unwrap();
        assert_eq!(from, utc(2024, 1, 14, 22, 0));
        assert_eq!(to, utc(2024, 1, 15, 22, 0));
    }

    #[test]
    fn test_day_summary_respects_boundaries() {
        let log = StepLog::in_memory();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let (from, to) = day_range(date, &Utc).unwrap();

        // Exactly midnight belongs to the previous day
        log.insert(step_at(from, 120.0)).unwrap();
        log.insert(step_at(from + Duration::milliseconds(1), 120.0)).unwrap();
        log.insert(step_at(utc(2024, 1, 15, 12, 0), 120.0)).unwrap();
        log.insert(step_at(to, 120.0)).unwrap();
        log.insert(step_at(to + Duration::milliseconds(1), 120.0)).unwrap();

        let summary = DaySummary::for_day(&log, date, &Utc, 4, K).unwrap();
        assert_eq!(summary.steps, 3);
        assert_eq!(summary.progress, 0.75);
        assert!(!summary.goal_reached);
    }

    #[test]
    fn test_progress_is_clamped() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let steps: Vec<Step> = (0..5)
            .map(|i| step_at(utc(2024, 1, 15, 9, i), 120.0))
            .collect();

        let summary = DaySummary::from_steps(date, &steps, 2, K);
        assert_eq!(summary.progress, 1.0);
        assert!(summary.goal_reached);

        let empty = DaySummary::from_steps(date, &[], 10_000, K);
        assert_eq!(empty.progress, 0.0);
        assert_eq!(empty.distance_label(), "0 m");
        assert_eq!(empty.calories_label(), "0.00 kcal");
    }

    #[test]
    fn test_week_summary() {
        let log = StepLog::in_memory();
        let end = NaiveDate::from_ymd_opt(2024, 1, 21).unwrap();

        // Two steps on the 15th, one on the 21st, one outside the week
        log.insert(step_at(utc(2024, 1, 15, 8, 0), 120.0)).unwrap();
        log.insert(step_at(utc(2024, 1, 15, 8, 1), 120.0)).unwrap();
        log.insert(step_at(utc(2024, 1, 21, 23, 59), 120.0)).unwrap();
        log.insert(step_at(utc(2024, 1, 14, 12, 0), 120.0)).unwrap();

        let week = WeekSummary::ending(&log, end, &Utc, 2, K).unwrap();
        assert_eq!(week.days.len(), DAYS_PER_WEEK);
        assert_eq!(week.start(), NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(week.end(), Some(end));
        assert_eq!(week.total_steps, 3);
        assert_eq!(week.days_goal_reached, 1);
        assert_eq!(week.days[0].steps, 2);
        assert_eq!(week.days[6].steps, 1);
    }
}
