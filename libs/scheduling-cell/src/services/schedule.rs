use chrono::{Datelike, NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    CreateScheduleRequest, DoctorSchedule, ScheduleError, UpdateScheduleRequest,
};
use crate::services::interval;

/// Day-of-week index used across the scheduling tables: 0 = Sunday.
pub fn day_of_week_index(date: NaiveDate) -> i32 {
    date.weekday().num_days_from_sunday() as i32
}

/// CRUD over a doctor's recurring weekly availability windows.
///
/// Among active windows for the same doctor and day of week, no two may
/// overlap; inactive windows are kept for history and exempt from the
/// invariant.
pub struct ScheduleService {
    supabase: SupabaseClient,
}

impl ScheduleService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Create a weekly availability window for a doctor.
    pub async fn create_schedule(
        &self,
        doctor_id: Uuid,
        request: CreateScheduleRequest,
        auth_token: &str,
    ) -> Result<DoctorSchedule, ScheduleError> {
        debug!("Creating schedule window for doctor: {}", doctor_id);

        if request.day_of_week < 0 || request.day_of_week > 6 {
            return Err(ScheduleError::Validation(
                "Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
            ));
        }

        if request.start_time >= request.end_time {
            return Err(ScheduleError::Validation(
                "Start time must be before end time".to_string(),
            ));
        }

        let is_active = request.is_active.unwrap_or(true);

        // Only active windows participate in the non-overlap invariant.
        if is_active {
            self.check_schedule_conflicts(
                doctor_id,
                request.day_of_week,
                request.start_time,
                request.end_time,
                None,
                auth_token,
            )
            .await?;
        }

        let schedule_data = json!({
            "doctor_id": doctor_id,
            "day_of_week": request.day_of_week,
            "start_time": request.start_time.format("%H:%M:%S").to_string(),
            "end_time": request.end_time.format("%H:%M:%S").to_string(),
            "is_active": is_active,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/doctor_schedules",
            Some(auth_token),
            Some(schedule_data),
            Some(headers),
        ).await.map_err(|e| ScheduleError::Database(e.to_string()))?;

        if result.is_empty() {
            return Err(ScheduleError::Database("Failed to create schedule window".to_string()));
        }

        let schedule: DoctorSchedule = serde_json::from_value(result[0].clone())
            .map_err(|e| ScheduleError::Database(format!("Failed to parse schedule: {}", e)))?;
        debug!("Schedule window created with ID: {}", schedule.id);

        Ok(schedule)
    }

    /// Update a window's day or time range, re-validating the effective
    /// values against the doctor's other active windows.
    pub async fn update_schedule(
        &self,
        schedule_id: Uuid,
        request: UpdateScheduleRequest,
        auth_token: &str,
    ) -> Result<DoctorSchedule, ScheduleError> {
        debug!("Updating schedule window: {}", schedule_id);

        let current = self.get_schedule_by_id(schedule_id, auth_token).await?;

        let day_of_week = request.day_of_week.unwrap_or(current.day_of_week);
        let start_time = request.start_time.unwrap_or(current.start_time);
        let end_time = request.end_time.unwrap_or(current.end_time);

        if day_of_week < 0 || day_of_week > 6 {
            return Err(ScheduleError::Validation(
                "Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
            ));
        }

        if start_time >= end_time {
            return Err(ScheduleError::Validation(
                "Start time must be before end time".to_string(),
            ));
        }

        // Inactive windows sit outside the non-overlap invariant;
        // activate_schedule re-runs the check before they rejoin it.
        if current.is_active {
            self.check_schedule_conflicts(
                current.doctor_id,
                day_of_week,
                start_time,
                end_time,
                Some(schedule_id),
                auth_token,
            )
            .await?;
        }

        let mut update_data = serde_json::Map::new();

        if let Some(day) = request.day_of_week {
            update_data.insert("day_of_week".to_string(), json!(day));
        }
        if let Some(start) = request.start_time {
            update_data.insert("start_time".to_string(), json!(start.format("%H:%M:%S").to_string()));
        }
        if let Some(end) = request.end_time {
            update_data.insert("end_time".to_string(), json!(end.format("%H:%M:%S").to_string()));
        }

        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        self.patch_schedule(schedule_id, Value::Object(update_data), auth_token).await
    }

    /// Re-activate a window, re-running the overlap check first.
    pub async fn activate_schedule(
        &self,
        schedule_id: Uuid,
        auth_token: &str,
    ) -> Result<DoctorSchedule, ScheduleError> {
        debug!("Activating schedule window: {}", schedule_id);

        let current = self.get_schedule_by_id(schedule_id, auth_token).await?;

        self.check_schedule_conflicts(
            current.doctor_id,
            current.day_of_week,
            current.start_time,
            current.end_time,
            Some(schedule_id),
            auth_token,
        )
        .await?;

        let update_data = json!({
            "is_active": true,
            "updated_at": Utc::now().to_rfc3339()
        });

        self.patch_schedule(schedule_id, update_data, auth_token).await
    }

    /// Deactivate a window. Never conflicts.
    pub async fn deactivate_schedule(
        &self,
        schedule_id: Uuid,
        auth_token: &str,
    ) -> Result<DoctorSchedule, ScheduleError> {
        debug!("Deactivating schedule window: {}", schedule_id);

        let update_data = json!({
            "is_active": false,
            "updated_at": Utc::now().to_rfc3339()
        });

        self.patch_schedule(schedule_id, update_data, auth_token).await
    }

    /// Hard-delete a window.
    pub async fn delete_schedule(
        &self,
        schedule_id: Uuid,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        debug!("Deleting schedule window: {}", schedule_id);

        let path = format!("/rest/v1/doctor_schedules?id=eq.{}", schedule_id);
        let _: Vec<Value> = self.supabase.request(
            Method::DELETE,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| ScheduleError::Database(e.to_string()))?;

        Ok(())
    }

    /// Hard-delete every window belonging to a doctor.
    pub async fn delete_all_for_doctor(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        debug!("Deleting all schedule windows for doctor: {}", doctor_id);

        let path = format!("/rest/v1/doctor_schedules?doctor_id=eq.{}", doctor_id);
        let _: Vec<Value> = self.supabase.request(
            Method::DELETE,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| ScheduleError::Database(e.to_string()))?;

        Ok(())
    }

    /// Copy every active window of one weekday onto another, best-effort.
    ///
    /// Windows that would overlap an existing active window on the target
    /// day are skipped; only the windows actually created are returned.
    pub async fn duplicate_day(
        &self,
        doctor_id: Uuid,
        source_day: i32,
        target_day: i32,
        auth_token: &str,
    ) -> Result<Vec<DoctorSchedule>, ScheduleError> {
        debug!("Duplicating schedule windows for doctor {} from day {} to day {}",
               doctor_id, source_day, target_day);

        for day in [source_day, target_day] {
            if day < 0 || day > 6 {
                return Err(ScheduleError::Validation(
                    "Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
                ));
            }
        }

        let source_windows = self
            .get_active_schedules_for_day(doctor_id, source_day, auth_token)
            .await?;

        if source_windows.is_empty() {
            return Err(ScheduleError::NotFound(format!(
                "No active schedule windows found for day {}",
                source_day
            )));
        }

        let mut created = Vec::new();

        for window in source_windows {
            let request = CreateScheduleRequest {
                day_of_week: target_day,
                start_time: window.start_time,
                end_time: window.end_time,
                is_active: Some(true),
            };

            match self.create_schedule(doctor_id, request, auth_token).await {
                Ok(schedule) => created.push(schedule),
                Err(ScheduleError::Conflict(msg)) => {
                    warn!("Skipping window {}-{} on day {}: {}",
                          window.start_time, window.end_time, target_day, msg);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(created)
    }

    /// All windows for a doctor, active and inactive, in calendar order.
    pub async fn get_doctor_schedules(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<DoctorSchedule>, ScheduleError> {
        debug!("Fetching schedule windows for doctor: {}", doctor_id);

        let path = format!(
            "/rest/v1/doctor_schedules?doctor_id=eq.{}&order=day_of_week.asc,start_time.asc",
            doctor_id
        );

        self.fetch_schedules(&path, auth_token).await
    }

    /// Active windows for one weekday, ordered by start time.
    pub async fn get_active_schedules_for_day(
        &self,
        doctor_id: Uuid,
        day_of_week: i32,
        auth_token: &str,
    ) -> Result<Vec<DoctorSchedule>, ScheduleError> {
        let path = format!(
            "/rest/v1/doctor_schedules?doctor_id=eq.{}&day_of_week=eq.{}&is_active=eq.true&order=start_time.asc",
            doctor_id, day_of_week
        );

        self.fetch_schedules(&path, auth_token).await
    }

    /// Active windows applicable to a calendar date, via weekday derivation.
    pub async fn get_schedules_for_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<DoctorSchedule>, ScheduleError> {
        self.get_active_schedules_for_day(doctor_id, day_of_week_index(date), auth_token)
            .await
    }

    /// Distinct weekdays on which the doctor has at least one active window.
    pub async fn working_days(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<i32>, ScheduleError> {
        let path = format!(
            "/rest/v1/doctor_schedules?doctor_id=eq.{}&is_active=eq.true&order=day_of_week.asc",
            doctor_id
        );

        let schedules = self.fetch_schedules(&path, auth_token).await?;

        let mut days: Vec<i32> = schedules.iter().map(|s| s.day_of_week).collect();
        days.sort_unstable();
        days.dedup();

        Ok(days)
    }

    /// Earliest start and latest end across the date's active windows.
    pub async fn working_hours_range(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Option<(NaiveTime, NaiveTime)>, ScheduleError> {
        let windows = self.get_schedules_for_date(doctor_id, date, auth_token).await?;

        let earliest = windows.iter().map(|w| w.start_time).min();
        let latest = windows.iter().map(|w| w.end_time).max();

        match (earliest, latest) {
            (Some(start), Some(end)) => Ok(Some((start, end))),
            _ => Ok(None),
        }
    }

    // Private helper methods

    async fn get_schedule_by_id(
        &self,
        schedule_id: Uuid,
        auth_token: &str,
    ) -> Result<DoctorSchedule, ScheduleError> {
        let path = format!("/rest/v1/doctor_schedules?id=eq.{}", schedule_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| ScheduleError::Database(e.to_string()))?;

        if result.is_empty() {
            return Err(ScheduleError::NotFound(format!(
                "Schedule window {} not found",
                schedule_id
            )));
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| ScheduleError::Database(format!("Failed to parse schedule: {}", e)))
    }

    async fn patch_schedule(
        &self,
        schedule_id: Uuid,
        update_data: Value,
        auth_token: &str,
    ) -> Result<DoctorSchedule, ScheduleError> {
        let path = format!("/rest/v1/doctor_schedules?id=eq.{}", schedule_id);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(update_data),
            Some(headers),
        ).await.map_err(|e| ScheduleError::Database(e.to_string()))?;

        if result.is_empty() {
            return Err(ScheduleError::NotFound(format!(
                "Schedule window {} not found",
                schedule_id
            )));
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| ScheduleError::Database(format!("Failed to parse schedule: {}", e)))
    }

    async fn check_schedule_conflicts(
        &self,
        doctor_id: Uuid,
        day_of_week: i32,
        start_time: NaiveTime,
        end_time: NaiveTime,
        exclude_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        let mut path = format!(
            "/rest/v1/doctor_schedules?doctor_id=eq.{}&day_of_week=eq.{}&is_active=eq.true",
            doctor_id, day_of_week
        );

        if let Some(id) = exclude_id {
            path.push_str(&format!("&id=neq.{}", id));
        }

        let existing = self.fetch_schedules(&path, auth_token).await?;

        for window in existing {
            if interval::overlaps(start_time, end_time, window.start_time, window.end_time) {
                return Err(ScheduleError::Conflict(format!(
                    "Schedule window overlaps existing window {} - {}",
                    window.start_time, window.end_time
                )));
            }
        }

        Ok(())
    }

    async fn fetch_schedules(
        &self,
        path: &str,
        auth_token: &str,
    ) -> Result<Vec<DoctorSchedule>, ScheduleError> {
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            path,
            Some(auth_token),
            None,
        ).await.map_err(|e| ScheduleError::Database(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<DoctorSchedule>, _>>()
            .map_err(|e| ScheduleError::Database(format!("Failed to parse schedules: {}", e)))
    }
}
