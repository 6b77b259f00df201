use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime, Timelike};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{
    Appointment, AvailabilityStats, AvailabilitySummary, DayAvailability, DoctorSchedule,
    ScheduleError, ScheduleException, TimeSlot, UpcomingSlot,
};
use crate::services::booking::BookingService;
use crate::services::clock::{Clock, SystemClock};
use crate::services::exception::{last_day_of_month, ExceptionService};
use crate::services::interval;
use crate::services::schedule::{day_of_week_index, ScheduleService};

/// Slot generation granularity used when a caller asks about an arbitrary
/// time range rather than a specific granularity.
pub const DEFAULT_SLOT_DURATION_MINUTES: i32 = 30;

const BOOKED_REASON: &str = "Appointment booked";
const BLOCKED_REASON: &str = "Blocked";
const NEXT_AVAILABLE_SCAN_DAYS: i64 = 30;

const DAY_NAMES: [&str; 7] = [
    "Sunday", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday",
];

/// Stateless availability queries over schedules, exceptions, and booked
/// appointments. Everything here is recomputed per call; the booking
/// ledger's conflict check remains the authoritative gate for writes.
pub struct AvailabilityService {
    schedule_service: ScheduleService,
    exception_service: ExceptionService,
    booking_service: BookingService,
    clock: Arc<dyn Clock>,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            schedule_service: ScheduleService::new(config),
            exception_service: ExceptionService::with_clock(config, clock.clone()),
            booking_service: BookingService::new(config),
            clock,
        }
    }

    /// Ordered slots for one doctor and date, each flagged available or
    /// carrying the reason it is not.
    ///
    /// Non-working days and full-day exceptions yield an empty list. For
    /// today, slots already in the past are dropped.
    pub async fn get_available_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        slot_duration: i32,
        auth_token: &str,
    ) -> Result<Vec<TimeSlot>, ScheduleError> {
        debug!("Calculating slots for doctor {} on {}", doctor_id, date);

        if slot_duration <= 0 {
            return Err(ScheduleError::Validation(
                "Slot duration must be positive".to_string(),
            ));
        }

        let windows = self
            .schedule_service
            .get_schedules_for_date(doctor_id, date, auth_token)
            .await?;

        if windows.is_empty() {
            debug!("Doctor {} has no schedule windows on {}", doctor_id, date);
            return Ok(vec![]);
        }

        let exceptions = self
            .exception_service
            .get_exceptions_for_date(doctor_id, date, auth_token)
            .await?;

        if exceptions.iter().any(|e| e.is_full_day()) {
            debug!("Doctor {} has a full-day exception on {}", doctor_id, date);
            return Ok(vec![]);
        }

        let appointments = self
            .booking_service
            .get_active_appointments_for_date(doctor_id, date, None, auth_token)
            .await?;

        Ok(self.compute_slots(&windows, &exceptions, &appointments, date, slot_duration))
    }

    /// Whether a booking of `duration_minutes` starting at `time` would
    /// fall entirely on available slots. The requested start must line up
    /// with a generated slot, and every slot the range covers must be free.
    pub async fn is_time_slot_available(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        duration_minutes: i32,
        auth_token: &str,
    ) -> Result<bool, ScheduleError> {
        let slots = self
            .get_available_slots(doctor_id, date, DEFAULT_SLOT_DURATION_MINUTES, auth_token)
            .await?;

        let start = interval::minutes_from_midnight(time);
        let end = start + duration_minutes as i64;

        let covering: Vec<&TimeSlot> = slots
            .iter()
            .filter(|slot| {
                let slot_start = interval::minutes_from_midnight(slot.time);
                let slot_end = slot_start + slot.duration_minutes as i64;
                interval::overlaps(slot_start, slot_end, start, end)
            })
            .collect();

        if !covering.iter().any(|slot| slot.time == time) {
            return Ok(false);
        }

        let needed =
            (duration_minutes + DEFAULT_SLOT_DURATION_MINUTES - 1) / DEFAULT_SLOT_DURATION_MINUTES;
        if (covering.len() as i32) < needed {
            return Ok(false);
        }

        Ok(covering.iter().all(|slot| slot.available))
    }

    /// Scan forward from today, collecting up to `limit` open slots.
    /// The scan is capped at 30 days.
    pub async fn next_available_slots(
        &self,
        doctor_id: Uuid,
        slot_duration: i32,
        limit: i32,
        auth_token: &str,
    ) -> Result<Vec<UpcomingSlot>, ScheduleError> {
        let today = self.clock.today();
        let mut found = Vec::new();

        for offset in 0..NEXT_AVAILABLE_SCAN_DAYS {
            let date = today + Duration::days(offset);
            let slots = self
                .get_available_slots(doctor_id, date, slot_duration, auth_token)
                .await?;

            for slot in slots.into_iter().filter(|s| s.available) {
                found.push(UpcomingSlot {
                    date,
                    time: slot.time,
                    duration_minutes: slot.duration_minutes,
                });

                if found.len() as i32 >= limit {
                    return Ok(found);
                }
            }
        }

        Ok(found)
    }

    pub async fn first_available_slot(
        &self,
        doctor_id: Uuid,
        slot_duration: i32,
        auth_token: &str,
    ) -> Result<Option<UpcomingSlot>, ScheduleError> {
        let slots = self
            .next_available_slots(doctor_id, slot_duration, 1, auth_token)
            .await?;
        Ok(slots.into_iter().next())
    }

    /// Seven days of per-day availability starting at `week_start`.
    pub async fn get_week_availability(
        &self,
        doctor_id: Uuid,
        week_start: NaiveDate,
        slot_duration: i32,
        auth_token: &str,
    ) -> Result<Vec<DayAvailability>, ScheduleError> {
        let mut days = Vec::with_capacity(7);

        for offset in 0..7 {
            let date = week_start + Duration::days(offset);
            days.push(self.day_availability(doctor_id, date, slot_duration, auth_token).await?);
        }

        Ok(days)
    }

    pub async fn get_month_availability(
        &self,
        doctor_id: Uuid,
        year: i32,
        month: u32,
        slot_duration: i32,
        auth_token: &str,
    ) -> Result<Vec<DayAvailability>, ScheduleError> {
        let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            ScheduleError::Validation(format!("Invalid month: {}-{}", year, month))
        })?;
        let last = last_day_of_month(year, month);

        let mut days = Vec::new();
        let mut date = first;

        while date <= last {
            days.push(self.day_availability(doctor_id, date, slot_duration, auth_token).await?);
            date += Duration::days(1);
        }

        Ok(days)
    }

    /// Count-only rollup over a date range.
    pub async fn get_availability_summary(
        &self,
        doctor_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        slot_duration: i32,
        auth_token: &str,
    ) -> Result<AvailabilitySummary, ScheduleError> {
        if start_date > end_date {
            return Err(ScheduleError::Validation(
                "Start date must not be after end date".to_string(),
            ));
        }

        let mut summary = AvailabilitySummary {
            start_date,
            end_date,
            total_days: 0,
            working_days: 0,
            days_with_availability: 0,
            total_slots: 0,
            available_slots: 0,
        };

        let mut date = start_date;
        while date <= end_date {
            let day = self.day_availability(doctor_id, date, slot_duration, auth_token).await?;

            summary.total_days += 1;
            if day.is_working_day {
                summary.working_days += 1;
            }

            let available = day.slots.iter().filter(|s| s.available).count() as i32;
            if available > 0 {
                summary.days_with_availability += 1;
            }

            summary.total_slots += day.slots.len() as i32;
            summary.available_slots += available;

            date += Duration::days(1);
        }

        Ok(summary)
    }

    /// Slot-level utilization over a date range, splitting unavailable
    /// slots into booked and blocked.
    pub async fn get_availability_stats(
        &self,
        doctor_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        slot_duration: i32,
        auth_token: &str,
    ) -> Result<AvailabilityStats, ScheduleError> {
        if start_date > end_date {
            return Err(ScheduleError::Validation(
                "Start date must not be after end date".to_string(),
            ));
        }

        let mut stats = AvailabilityStats {
            total_slots: 0,
            available_slots: 0,
            booked_slots: 0,
            blocked_slots: 0,
            utilization_percent: 0.0,
        };

        let mut date = start_date;
        while date <= end_date {
            let day = self.day_availability(doctor_id, date, slot_duration, auth_token).await?;

            for slot in &day.slots {
                stats.total_slots += 1;
                if slot.available {
                    stats.available_slots += 1;
                } else if slot.reason.as_deref() == Some(BOOKED_REASON) {
                    stats.booked_slots += 1;
                } else {
                    stats.blocked_slots += 1;
                }
            }

            date += Duration::days(1);
        }

        if stats.total_slots > 0 {
            stats.utilization_percent =
                (stats.booked_slots as f64 / stats.total_slots as f64) * 100.0;
        }

        Ok(stats)
    }

    pub async fn has_availability_in_range(
        &self,
        doctor_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        slot_duration: i32,
        auth_token: &str,
    ) -> Result<bool, ScheduleError> {
        let mut date = start_date;

        while date <= end_date {
            let slots = self
                .get_available_slots(doctor_id, date, slot_duration, auth_token)
                .await?;

            if slots.iter().any(|s| s.available) {
                return Ok(true);
            }

            date += Duration::days(1);
        }

        Ok(false)
    }

    // Private helper methods

    async fn day_availability(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        slot_duration: i32,
        auth_token: &str,
    ) -> Result<DayAvailability, ScheduleError> {
        let day_of_week = day_of_week_index(date);

        let windows = self
            .schedule_service
            .get_schedules_for_date(doctor_id, date, auth_token)
            .await?;
        let exceptions = self
            .exception_service
            .get_exceptions_for_date(doctor_id, date, auth_token)
            .await?;

        let has_full_day = exceptions.iter().any(|e| e.is_full_day());
        let is_working_day = !windows.is_empty() && !has_full_day;

        let slots = if is_working_day {
            let appointments = self
                .booking_service
                .get_active_appointments_for_date(doctor_id, date, None, auth_token)
                .await?;
            self.compute_slots(&windows, &exceptions, &appointments, date, slot_duration)
        } else {
            vec![]
        };

        Ok(DayAvailability {
            date,
            day_of_week,
            day_name: DAY_NAMES[day_of_week as usize].to_string(),
            is_working_day,
            has_exception: !exceptions.is_empty(),
            slots,
        })
    }

    fn compute_slots(
        &self,
        windows: &[DoctorSchedule],
        exceptions: &[ScheduleException],
        appointments: &[Appointment],
        date: NaiveDate,
        slot_duration: i32,
    ) -> Vec<TimeSlot> {
        let duration = slot_duration as i64;
        let mut slots = Vec::new();

        // Windows arrive sorted by start time and may not overlap, so
        // generation order is ascending across the whole day. A slot that
        // would overrun its window's end is dropped, not truncated.
        for window in windows {
            let window_start = interval::minutes_from_midnight(window.start_time);
            let window_end = interval::minutes_from_midnight(window.end_time);

            let mut current = window_start;
            while current + duration <= window_end {
                slots.push(TimeSlot {
                    time: interval::time_from_minutes(current),
                    duration_minutes: slot_duration,
                    available: true,
                    reason: None,
                });
                current += duration;
            }
        }

        for exception in exceptions {
            if let (Some(ex_start), Some(ex_end)) = (exception.start_time, exception.end_time) {
                let ex_start = interval::minutes_from_midnight(ex_start);
                let ex_end = interval::minutes_from_midnight(ex_end);

                for slot in slots.iter_mut() {
                    let slot_start = interval::minutes_from_midnight(slot.time);
                    if interval::overlaps(slot_start, slot_start + duration, ex_start, ex_end) {
                        slot.available = false;
                        slot.reason = Some(
                            exception
                                .reason
                                .clone()
                                .unwrap_or_else(|| BLOCKED_REASON.to_string()),
                        );
                    }
                }
            }
        }

        // Bookings run after exceptions; when both apply, the booking's
        // reason is what the caller sees.
        for appointment in appointments {
            if !appointment.status.is_blocking() {
                continue;
            }

            let apt_start = interval::minutes_from_midnight(appointment.appointment_time);
            let apt_end = apt_start + appointment.duration_minutes as i64;

            for slot in slots.iter_mut() {
                let slot_start = interval::minutes_from_midnight(slot.time);
                if interval::overlaps(slot_start, slot_start + duration, apt_start, apt_end) {
                    slot.available = false;
                    slot.reason = Some(BOOKED_REASON.to_string());
                }
            }
        }

        if date == self.clock.today() {
            let now = self.clock.time_of_day();
            let cutoff = NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap();
            slots.retain(|slot| slot.time >= cutoff);
        }

        slots
    }
}
