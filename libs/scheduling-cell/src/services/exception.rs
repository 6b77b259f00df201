use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    CreateExceptionRequest, CreateMultiDayExceptionRequest, ScheduleError, ScheduleException,
};
use crate::services::clock::{Clock, SystemClock};
use crate::services::interval;

/// CRUD over date-specific availability overrides.
///
/// A full-day exception blocks the whole date and is mutually exclusive
/// with partial exceptions on that date; partial exceptions may coexist as
/// long as their time ranges do not overlap.
pub struct ExceptionService {
    supabase: SupabaseClient,
    clock: Arc<dyn Clock>,
}

impl ExceptionService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            clock,
        }
    }

    /// Create a single exception for a doctor.
    pub async fn create_exception(
        &self,
        doctor_id: Uuid,
        request: CreateExceptionRequest,
        auth_token: &str,
    ) -> Result<ScheduleException, ScheduleError> {
        debug!("Creating exception for doctor {} on {}", doctor_id, request.exception_date);

        self.validate_time_pair(request.start_time, request.end_time)?;

        if request.exception_date < self.clock.today() {
            return Err(ScheduleError::Validation(
                "Exception date cannot be in the past".to_string(),
            ));
        }

        self.check_exception_conflicts(
            doctor_id,
            request.exception_date,
            request.start_time,
            request.end_time,
            auth_token,
        )
        .await?;

        let exception_data = json!({
            "doctor_id": doctor_id,
            "exception_date": request.exception_date,
            "start_time": request.start_time.map(|t| t.format("%H:%M:%S").to_string()),
            "end_time": request.end_time.map(|t| t.format("%H:%M:%S").to_string()),
            "reason": request.reason,
            "created_at": Utc::now().to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/schedule_exceptions",
            Some(auth_token),
            Some(exception_data),
            Some(headers),
        ).await.map_err(|e| ScheduleError::Database(e.to_string()))?;

        if result.is_empty() {
            return Err(ScheduleError::Database("Failed to create exception".to_string()));
        }

        let exception: ScheduleException = serde_json::from_value(result[0].clone())
            .map_err(|e| ScheduleError::Database(format!("Failed to parse exception: {}", e)))?;
        debug!("Exception created with ID: {}", exception.id);

        Ok(exception)
    }

    /// Create the same exception over a contiguous date range, best-effort.
    ///
    /// Days that conflict with an existing exception are skipped with a
    /// warning; only the exceptions actually created are returned.
    pub async fn create_multiple_days(
        &self,
        doctor_id: Uuid,
        request: CreateMultiDayExceptionRequest,
        auth_token: &str,
    ) -> Result<Vec<ScheduleException>, ScheduleError> {
        debug!("Creating exceptions for doctor {} from {} to {}",
               doctor_id, request.start_date, request.end_date);

        if request.start_date > request.end_date {
            return Err(ScheduleError::Validation(
                "Start date must not be after end date".to_string(),
            ));
        }

        if request.start_date < self.clock.today() {
            return Err(ScheduleError::Validation(
                "Start date cannot be in the past".to_string(),
            ));
        }

        self.validate_time_pair(request.start_time, request.end_time)?;

        let mut created = Vec::new();
        let mut date = request.start_date;

        while date <= request.end_date {
            let day_request = CreateExceptionRequest {
                exception_date: date,
                start_time: request.start_time,
                end_time: request.end_time,
                reason: request.reason.clone(),
            };

            match self.create_exception(doctor_id, day_request, auth_token).await {
                Ok(exception) => created.push(exception),
                Err(ScheduleError::Conflict(msg)) => {
                    warn!("Skipping exception on {}: {}", date, msg);
                }
                Err(e) => return Err(e),
            }

            date += Duration::days(1);
        }

        Ok(created)
    }

    /// All exceptions for a doctor, in date order.
    pub async fn get_doctor_exceptions(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<ScheduleException>, ScheduleError> {
        debug!("Fetching exceptions for doctor: {}", doctor_id);

        let path = format!(
            "/rest/v1/schedule_exceptions?doctor_id=eq.{}&order=exception_date.asc,start_time.asc",
            doctor_id
        );

        self.fetch_exceptions(&path, auth_token).await
    }

    pub async fn get_exceptions_for_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<ScheduleException>, ScheduleError> {
        let path = format!(
            "/rest/v1/schedule_exceptions?doctor_id=eq.{}&exception_date=eq.{}&order=start_time.asc",
            doctor_id, date
        );

        self.fetch_exceptions(&path, auth_token).await
    }

    pub async fn get_exceptions_in_range(
        &self,
        doctor_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<ScheduleException>, ScheduleError> {
        let path = format!(
            "/rest/v1/schedule_exceptions?doctor_id=eq.{}&exception_date=gte.{}&exception_date=lte.{}&order=exception_date.asc",
            doctor_id, from, to
        );

        self.fetch_exceptions(&path, auth_token).await
    }

    /// The next `limit` exceptions dated today or later.
    pub async fn get_upcoming_exceptions(
        &self,
        doctor_id: Uuid,
        limit: i32,
        auth_token: &str,
    ) -> Result<Vec<ScheduleException>, ScheduleError> {
        let path = format!(
            "/rest/v1/schedule_exceptions?doctor_id=eq.{}&exception_date=gte.{}&order=exception_date.asc&limit={}",
            doctor_id,
            self.clock.today(),
            limit
        );

        self.fetch_exceptions(&path, auth_token).await
    }

    /// Dates within a month that carry a full-day exception, for greying
    /// out calendar views.
    pub async fn get_blocked_days_in_month(
        &self,
        doctor_id: Uuid,
        year: i32,
        month: u32,
        auth_token: &str,
    ) -> Result<Vec<NaiveDate>, ScheduleError> {
        let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            ScheduleError::Validation(format!("Invalid month: {}-{}", year, month))
        })?;
        let last = last_day_of_month(year, month);

        let exceptions = self
            .get_exceptions_in_range(doctor_id, first, last, auth_token)
            .await?;

        let mut days: Vec<NaiveDate> = exceptions
            .iter()
            .filter(|e| e.is_full_day())
            .map(|e| e.exception_date)
            .collect();
        days.sort_unstable();
        days.dedup();

        Ok(days)
    }

    pub async fn delete_exception(
        &self,
        exception_id: Uuid,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        debug!("Deleting exception: {}", exception_id);

        let path = format!("/rest/v1/schedule_exceptions?id=eq.{}", exception_id);
        let _: Vec<Value> = self.supabase.request(
            Method::DELETE,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| ScheduleError::Database(e.to_string()))?;

        Ok(())
    }

    pub async fn delete_all_for_doctor(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        debug!("Deleting all exceptions for doctor: {}", doctor_id);

        let path = format!("/rest/v1/schedule_exceptions?doctor_id=eq.{}", doctor_id);
        let _: Vec<Value> = self.supabase.request(
            Method::DELETE,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| ScheduleError::Database(e.to_string()))?;

        Ok(())
    }

    pub async fn delete_for_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        debug!("Deleting exceptions for doctor {} on {}", doctor_id, date);

        let path = format!(
            "/rest/v1/schedule_exceptions?doctor_id=eq.{}&exception_date=eq.{}",
            doctor_id, date
        );
        let _: Vec<Value> = self.supabase.request(
            Method::DELETE,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| ScheduleError::Database(e.to_string()))?;

        Ok(())
    }

    /// Remove exceptions whose date has already passed, optionally scoped
    /// to one doctor. Returns the number of rows removed.
    pub async fn delete_expired(
        &self,
        doctor_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<usize, ScheduleError> {
        debug!("Deleting expired exceptions (doctor: {:?})", doctor_id);

        let mut path = format!(
            "/rest/v1/schedule_exceptions?exception_date=lt.{}",
            self.clock.today()
        );

        if let Some(id) = doctor_id {
            path.push_str(&format!("&doctor_id=eq.{}", id));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let removed: Vec<Value> = self.supabase.request_with_headers(
            Method::DELETE,
            &path,
            Some(auth_token),
            None,
            Some(headers),
        ).await.map_err(|e| ScheduleError::Database(e.to_string()))?;

        debug!("Removed {} expired exceptions", removed.len());
        Ok(removed.len())
    }

    /// Whether the doctor has any exception on a date; with a time, whether
    /// that time is actually blocked (full-day, or inside a partial range).
    pub async fn has_exception_on_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time: Option<NaiveTime>,
        auth_token: &str,
    ) -> Result<bool, ScheduleError> {
        let exceptions = self.get_exceptions_for_date(doctor_id, date, auth_token).await?;

        match time {
            None => Ok(!exceptions.is_empty()),
            Some(t) => Ok(exceptions.iter().any(|e| {
                if e.is_full_day() {
                    return true;
                }
                match (e.start_time, e.end_time) {
                    (Some(start), Some(end)) => start <= t && t < end,
                    _ => false,
                }
            })),
        }
    }

    // Private helper methods

    fn validate_time_pair(
        &self,
        start_time: Option<NaiveTime>,
        end_time: Option<NaiveTime>,
    ) -> Result<(), ScheduleError> {
        match (start_time, end_time) {
            (None, None) => Ok(()),
            (Some(start), Some(end)) if start >= end => Err(ScheduleError::Validation(
                "Start time must be before end time".to_string(),
            )),
            (Some(_), Some(_)) => Ok(()),
            _ => Err(ScheduleError::Validation(
                "Start time and end time must be provided together".to_string(),
            )),
        }
    }

    async fn check_exception_conflicts(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        start_time: Option<NaiveTime>,
        end_time: Option<NaiveTime>,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        let existing = self.get_exceptions_for_date(doctor_id, date, auth_token).await?;

        if existing.iter().any(|e| e.is_full_day()) {
            return Err(ScheduleError::Conflict(format!(
                "A full-day exception already exists for {}",
                date
            )));
        }

        let new_is_full_day = start_time.is_none() && end_time.is_none();

        if new_is_full_day && !existing.is_empty() {
            return Err(ScheduleError::Conflict(format!(
                "Partial exceptions already exist for {}",
                date
            )));
        }

        if let (Some(start), Some(end)) = (start_time, end_time) {
            for exception in &existing {
                if let (Some(ex_start), Some(ex_end)) = (exception.start_time, exception.end_time) {
                    if interval::overlaps(start, end, ex_start, ex_end) {
                        return Err(ScheduleError::Conflict(format!(
                            "Exception overlaps existing exception {} - {}",
                            ex_start, ex_end
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    async fn fetch_exceptions(
        &self,
        path: &str,
        auth_token: &str,
    ) -> Result<Vec<ScheduleException>, ScheduleError> {
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            path,
            Some(auth_token),
            None,
        ).await.map_err(|e| ScheduleError::Database(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<ScheduleException>, _>>()
            .map_err(|e| ScheduleError::Database(format!("Failed to parse exceptions: {}", e)))
    }
}

pub(crate) fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next_month.unwrap().pred_opt().unwrap()
}
