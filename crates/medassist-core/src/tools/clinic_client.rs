//! HTTP client for the clinic management API behind the dialogue tools.
//!
//! Every call carries the agent's upstream `access_token` as a query parameter and
//! every reply is an envelope whose `response` field is `1` on success.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::errors::AgentError;

/// Accepts a JSON string or number and keeps it as text.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specialty {
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: i64,
    pub name: String,
    #[serde(default, rename = "specialnosti")]
    pub specialties: Vec<Specialty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoctorList {
    #[serde(default)]
    pub doctors: Vec<Doctor>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub count: String,
    #[serde(default, rename = "atPage")]
    pub at_page: i64,
    #[serde(default, rename = "maxPage")]
    pub max_page: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub year: i32,
    pub month: u32,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cabinet: String,
    #[serde(rename = "doctor")]
    pub doctor_id: i64,
    #[serde(default, rename = "perDayData")]
    pub per_day: BTreeMap<String, Vec<TimeInterval>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleList {
    #[serde(default, rename = "rasps")]
    pub schedules: Vec<Schedule>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub count: String,
    #[serde(default, rename = "atPage")]
    pub at_page: i64,
    #[serde(default, rename = "maxPage")]
    pub max_page: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub doctor: i64,
    pub patient: i64,
    pub date: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    #[serde(rename = "doctor")]
    pub doctor_id: i64,
    #[serde(rename = "patient")]
    pub patient_id: i64,
    pub date: String,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub status: i64,
    #[serde(default, rename = "zhaloba")]
    pub complaint: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default, rename = "isFirst")]
    pub is_first: bool,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cabinet: String,
    #[serde(default, rename = "rasp", deserialize_with = "lenient_string")]
    pub schedule_id: String,
}

#[derive(Debug, Deserialize)]
struct PatientEnvelope {
    patient: Patient,
}

#[derive(Debug, Deserialize)]
struct AppointmentEnvelope {
    #[serde(rename = "zapis")]
    appointment: Appointment,
}

/// Operations the dialogue tools call on the clinic system.
#[async_trait]
pub trait ClinicClient: Send + Sync {
    async fn find_doctors(&self, access_token: &str, name: Option<&str>) -> Result<DoctorList, AgentError>;

    async fn schedules(&self, access_token: &str) -> Result<ScheduleList, AgentError>;

    async fn add_patient(&self, access_token: &str, name: &str) -> Result<Patient, AgentError>;

    async fn add_appointment(
        &self,
        access_token: &str,
        appointment: &NewAppointment,
    ) -> Result<Appointment, AgentError>;
}

#[derive(Debug, Clone)]
pub struct HttpClinicClient {
    client: Client,
    base_url: String,
}

impl HttpClinicClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        builder: RequestBuilder,
    ) -> Result<T, AgentError> {
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            log::error!("Clinic API {} failed with status {}", operation, status);
            return Err(AgentError::ProviderError(format!(
                "Clinic API {} failed with status {}",
                operation, status
            )));
        }

        let body: Value = serde_json::from_str(&text).map_err(|e| {
            AgentError::ProviderContractViolation(format!(
                "Clinic API {} returned invalid JSON: {}",
                operation, e
            ))
        })?;

        let code = body.get("response").and_then(Value::as_i64).unwrap_or(0);
        if code != 1 {
            log::warn!("Clinic API {} rejected the request (response={})", operation, code);
            return Err(AgentError::ProviderError(format!(
                "Clinic API {} rejected the request (response={})",
                operation, code
            )));
        }

        serde_json::from_value(body).map_err(|e| {
            AgentError::ProviderContractViolation(format!(
                "Unexpected clinic API {} response: {}",
                operation, e
            ))
        })
    }
}

#[async_trait]
impl ClinicClient for HttpClinicClient {
    async fn find_doctors(&self, access_token: &str, name: Option<&str>) -> Result<DoctorList, AgentError> {
        let mut query = vec![("access_token", access_token)];
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            query.push(("name", name));
        }
        log::info!("Fetching doctors (name filter: {})", name.is_some());
        self.call("doctor/find", self.client.get(self.url("doctor/find")).query(&query))
            .await
    }

    async fn schedules(&self, access_token: &str) -> Result<ScheduleList, AgentError> {
        log::info!("Fetching schedules");
        self.call(
            "rasp/find",
            self.client
                .get(self.url("rasp/find"))
                .query(&[("access_token", access_token)]),
        )
        .await
    }

    async fn add_patient(&self, access_token: &str, name: &str) -> Result<Patient, AgentError> {
        log::info!("Creating patient");
        let envelope: PatientEnvelope = self
            .call(
                "patient/add",
                self.client
                    .post(self.url("patient/add"))
                    .query(&[("access_token", access_token), ("name", name)]),
            )
            .await?;
        Ok(envelope.patient)
    }

    async fn add_appointment(
        &self,
        access_token: &str,
        appointment: &NewAppointment,
    ) -> Result<Appointment, AgentError> {
        log::info!(
            "Creating appointment for doctor {} on {} {}-{}",
            appointment.doctor,
            appointment.date,
            appointment.start,
            appointment.end
        );
        let doctor = appointment.doctor.to_string();
        let patient = appointment.patient.to_string();
        let envelope: AppointmentEnvelope = self
            .call(
                "zapis/add",
                self.client.post(self.url("zapis/add")).query(&[
                    ("access_token", access_token),
                    ("doctor", doctor.as_str()),
                    ("patient", patient.as_str()),
                    ("date", appointment.date.as_str()),
                    ("start", appointment.start.as_str()),
                    ("end", appointment.end.as_str()),
                ]),
            )
            .await?;
        Ok(envelope.appointment)
    }
}
