use chrono::{NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentStatus, CreateAppointmentRequest, ScheduleError,
    UpdateAppointmentRequest,
};
use crate::services::interval;

/// Appointment writes and the overlap gate that protects them.
///
/// Every mutation that changes an appointment's date, time, or duration
/// runs [`BookingService::check_conflict`] before persisting. This is the
/// single authoritative overlap check; computed availability is advisory.
pub struct BookingService {
    supabase: SupabaseClient,
}

impl BookingService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// True iff `[time, time + duration)` overlaps any non-cancelled,
    /// non-no-show appointment for the doctor on that date.
    pub async fn check_conflict(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        duration_minutes: i32,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<bool, ScheduleError> {
        debug!("Checking conflicts for doctor {} on {} at {}", doctor_id, date, time);

        let existing = self
            .get_active_appointments_for_date(doctor_id, date, exclude_appointment_id, auth_token)
            .await?;

        let candidate_start = interval::minutes_from_midnight(time);
        let candidate_end = candidate_start + duration_minutes as i64;

        for appointment in &existing {
            let start = interval::minutes_from_midnight(appointment.appointment_time);
            let end = start + appointment.duration_minutes as i64;

            if interval::overlaps(candidate_start, candidate_end, start, end) {
                warn!("Conflict detected for doctor {} on {}: overlaps appointment {}",
                      doctor_id, date, appointment.id);
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Book an appointment, failing on overlap with an existing booking.
    pub async fn create_appointment(
        &self,
        request: CreateAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        debug!("Booking appointment for patient {} with doctor {}",
               request.patient_id, request.doctor_id);

        if request.duration_minutes <= 0 {
            return Err(ScheduleError::Validation(
                "Duration must be positive".to_string(),
            ));
        }

        let has_conflict = self.check_conflict(
            request.doctor_id,
            request.appointment_date,
            request.appointment_time,
            request.duration_minutes,
            None,
            auth_token,
        ).await?;

        if has_conflict {
            return Err(ScheduleError::Conflict(
                "Time slot conflicts with an existing appointment".to_string(),
            ));
        }

        let appointment_data = json!({
            "patient_id": request.patient_id,
            "doctor_id": request.doctor_id,
            "appointment_date": request.appointment_date,
            "appointment_time": request.appointment_time.format("%H:%M:%S").to_string(),
            "duration_minutes": request.duration_minutes,
            "status": AppointmentStatus::Scheduled.to_string(),
            "notes": request.notes,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/appointments",
            Some(auth_token),
            Some(appointment_data),
            Some(headers),
        ).await.map_err(|e| ScheduleError::Database(e.to_string()))?;

        if result.is_empty() {
            return Err(ScheduleError::Database("Failed to create appointment".to_string()));
        }

        let appointment: Appointment = serde_json::from_value(result[0].clone())
            .map_err(|e| ScheduleError::Database(format!("Failed to parse appointment: {}", e)))?;
        debug!("Appointment booked with ID: {}", appointment.id);

        Ok(appointment)
    }

    /// Update an appointment; a date, time, or duration change re-runs the
    /// conflict check excluding the appointment itself.
    pub async fn update_appointment(
        &self,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        debug!("Updating appointment: {}", appointment_id);

        let current = self.get_appointment(appointment_id, auth_token).await?;

        let date = request.appointment_date.unwrap_or(current.appointment_date);
        let time = request.appointment_time.unwrap_or(current.appointment_time);
        let duration = request.duration_minutes.unwrap_or(current.duration_minutes);

        if duration <= 0 {
            return Err(ScheduleError::Validation(
                "Duration must be positive".to_string(),
            ));
        }

        let time_changed = date != current.appointment_date
            || time != current.appointment_time
            || duration != current.duration_minutes;

        if time_changed {
            let has_conflict = self.check_conflict(
                current.doctor_id,
                date,
                time,
                duration,
                Some(appointment_id),
                auth_token,
            ).await?;

            if has_conflict {
                return Err(ScheduleError::Conflict(
                    "New time conflicts with an existing appointment".to_string(),
                ));
            }
        }

        let mut update_data = serde_json::Map::new();

        if let Some(new_date) = request.appointment_date {
            update_data.insert("appointment_date".to_string(), json!(new_date));
        }
        if let Some(new_time) = request.appointment_time {
            update_data.insert("appointment_time".to_string(), json!(new_time.format("%H:%M:%S").to_string()));
        }
        if let Some(new_duration) = request.duration_minutes {
            update_data.insert("duration_minutes".to_string(), json!(new_duration));
        }
        if let Some(notes) = request.notes {
            update_data.insert("notes".to_string(), json!(notes));
        }

        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        self.patch_appointment(appointment_id, Value::Object(update_data), auth_token).await
    }

    /// Move an appointment to a new date and time, marking it rescheduled.
    pub async fn reschedule_appointment(
        &self,
        appointment_id: Uuid,
        new_date: NaiveDate,
        new_time: NaiveTime,
        new_duration: Option<i32>,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        debug!("Rescheduling appointment {} to {} {}", appointment_id, new_date, new_time);

        let current = self.get_appointment(appointment_id, auth_token).await?;
        let duration = new_duration.unwrap_or(current.duration_minutes);

        let has_conflict = self.check_conflict(
            current.doctor_id,
            new_date,
            new_time,
            duration,
            Some(appointment_id),
            auth_token,
        ).await?;

        if has_conflict {
            return Err(ScheduleError::Conflict(
                "Reschedule time conflicts with an existing appointment".to_string(),
            ));
        }

        let update_data = json!({
            "appointment_date": new_date,
            "appointment_time": new_time.format("%H:%M:%S").to_string(),
            "duration_minutes": duration,
            "status": AppointmentStatus::Rescheduled.to_string(),
            "updated_at": Utc::now().to_rfc3339()
        });

        self.patch_appointment(appointment_id, update_data, auth_token).await
    }

    // Status transitions never move the appointment in time, so they skip
    // the conflict check.

    pub async fn confirm_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        self.set_status(appointment_id, AppointmentStatus::Confirmed, auth_token).await
    }

    pub async fn complete_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        self.set_status(appointment_id, AppointmentStatus::Completed, auth_token).await
    }

    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        self.set_status(appointment_id, AppointmentStatus::Cancelled, auth_token).await
    }

    pub async fn mark_as_no_show(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        self.set_status(appointment_id, AppointmentStatus::NoShow, auth_token).await
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| ScheduleError::Database(e.to_string()))?;

        if result.is_empty() {
            return Err(ScheduleError::NotFound(format!(
                "Appointment {} not found",
                appointment_id
            )));
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| ScheduleError::Database(format!("Failed to parse appointment: {}", e)))
    }

    /// All appointments for a doctor on a date, regardless of status.
    pub async fn get_appointments_for_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, ScheduleError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_date=eq.{}&order=appointment_time.asc",
            doctor_id, date
        );

        self.fetch_appointments(&path, auth_token).await
    }

    /// Slot-occupying appointments for a doctor on a date.
    pub async fn get_active_appointments_for_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, ScheduleError> {
        let mut path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_date=eq.{}&status=not.in.(cancelled,no_show)&order=appointment_time.asc",
            doctor_id, date
        );

        if let Some(exclude_id) = exclude_appointment_id {
            path.push_str(&format!("&id=neq.{}", exclude_id));
        }

        let appointments = self.fetch_appointments(&path, auth_token).await?;

        // The status filter also runs server-side; re-applying it here keeps
        // the gate correct even against a permissive store.
        Ok(appointments
            .into_iter()
            .filter(|a| a.status.is_blocking())
            .collect())
    }

    pub async fn delete_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        debug!("Deleting appointment: {}", appointment_id);

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let _: Vec<Value> = self.supabase.request(
            Method::DELETE,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| ScheduleError::Database(e.to_string()))?;

        Ok(())
    }

    // Private helper methods

    async fn set_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        debug!("Setting appointment {} status to {}", appointment_id, status);

        let update_data = json!({
            "status": status.to_string(),
            "updated_at": Utc::now().to_rfc3339()
        });

        self.patch_appointment(appointment_id, update_data, auth_token).await
    }

    async fn patch_appointment(
        &self,
        appointment_id: Uuid,
        update_data: Value,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
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
                "Appointment {} not found",
                appointment_id
            )));
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| ScheduleError::Database(format!("Failed to parse appointment: {}", e)))
    }

    async fn fetch_appointments(
        &self,
        path: &str,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, ScheduleError> {
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            path,
            Some(auth_token),
            None,
        ).await.map_err(|e| ScheduleError::Database(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| ScheduleError::Database(format!("Failed to parse appointments: {}", e)))
    }
}
