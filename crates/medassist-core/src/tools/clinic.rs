//! Clinic tools: doctor lookup, schedules, patient and appointment creation.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::errors::AgentError;
use crate::llm::ToolMetadata;
use crate::tools::clinic_client::{ClinicClient, NewAppointment};
use crate::tools::{decode_arguments, Tool};

pub const GET_DOCTORS: &str = "get_doctors";
pub const GET_SCHEDULE: &str = "get_schedule";
pub const CREATE_PATIENT: &str = "create_patient";
pub const CREATE_APPOINTMENT: &str = "create_appointment";

pub fn get_doctors_spec() -> ToolMetadata {
    ToolMetadata {
        name: GET_DOCTORS.to_string(),
        description: "Get the list of the clinic's doctors with their specialties".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Optional part of the doctor's name to filter by"
                }
            }
        }),
    }
}

pub fn get_schedule_spec() -> ToolMetadata {
    ToolMetadata {
        name: GET_SCHEDULE.to_string(),
        description: "Get the doctors' working schedules with free time intervals per day".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {}
        }),
    }
}

pub fn create_patient_spec() -> ToolMetadata {
    ToolMetadata {
        name: CREATE_PATIENT.to_string(),
        description: "Register a new patient and return the patient's ID".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Patient's full name"
                }
            },
            "required": ["name"]
        }),
    }
}

pub fn create_appointment_spec() -> ToolMetadata {
    ToolMetadata {
        name: CREATE_APPOINTMENT.to_string(),
        description: "Book an appointment with a doctor".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "patient": {
                    "type": "integer",
                    "description": "Patient ID returned by create_patient"
                },
                "doctor": {
                    "type": "integer",
                    "description": "Doctor ID from the get_doctors list"
                },
                "date": {
                    "type": "string",
                    "description": "Appointment date, e.g. 2024-05-14"
                },
                "start": {
                    "type": "string",
                    "description": "Start time, e.g. 10:00"
                },
                "end": {
                    "type": "string",
                    "description": "End time, e.g. 10:30"
                }
            },
            "required": ["patient", "doctor", "date", "start", "end"]
        }),
    }
}

#[derive(Debug, Default, Deserialize)]
struct GetDoctorsArgs {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatePatientArgs {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreateAppointmentArgs {
    patient: i64,
    doctor: i64,
    date: String,
    start: String,
    end: String,
}

fn require_non_empty(tool: &str, field: &str, value: &str) -> Result<(), AgentError> {
    if value.trim().is_empty() {
        return Err(AgentError::InvalidInput(format!(
            "Invalid arguments for {}: '{}' must not be empty",
            tool, field
        )));
    }
    Ok(())
}

fn to_content<T: serde::Serialize>(value: &T) -> Result<String, AgentError> {
    Ok(serde_json::to_string(value)?)
}

pub struct GetDoctorsTool {
    client: Arc<dyn ClinicClient>,
    access_token: String,
}

impl GetDoctorsTool {
    pub fn new(client: Arc<dyn ClinicClient>, access_token: String) -> Self {
        Self { client, access_token }
    }
}

#[async_trait]
impl Tool for GetDoctorsTool {
    fn metadata(&self) -> ToolMetadata {
        get_doctors_spec()
    }

    async fn execute(&self, arguments: &str) -> Result<String, AgentError> {
        let args: GetDoctorsArgs = decode_arguments(GET_DOCTORS, arguments)?;
        let doctors = self
            .client
            .find_doctors(&self.access_token, args.name.as_deref())
            .await?;
        to_content(&doctors)
    }
}

pub struct GetScheduleTool {
    client: Arc<dyn ClinicClient>,
    access_token: String,
}

impl GetScheduleTool {
    pub fn new(client: Arc<dyn ClinicClient>, access_token: String) -> Self {
        Self { client, access_token }
    }
}

#[async_trait]
impl Tool for GetScheduleTool {
    fn metadata(&self) -> ToolMetadata {
        get_schedule_spec()
    }

    async fn execute(&self, arguments: &str) -> Result<String, AgentError> {
        let _: serde_json::Map<String, serde_json::Value> = decode_arguments(GET_SCHEDULE, arguments)?;
        let schedules = self.client.schedules(&self.access_token).await?;
        to_content(&schedules)
    }
}

pub struct CreatePatientTool {
    client: Arc<dyn ClinicClient>,
    access_token: String,
}

impl CreatePatientTool {
    pub fn new(client: Arc<dyn ClinicClient>, access_token: String) -> Self {
        Self { client, access_token }
    }
}

#[async_trait]
impl Tool for CreatePatientTool {
    fn metadata(&self) -> ToolMetadata {
        create_patient_spec()
    }

    async fn execute(&self, arguments: &str) -> Result<String, AgentError> {
        let args: CreatePatientArgs = decode_arguments(CREATE_PATIENT, arguments)?;
        require_non_empty(CREATE_PATIENT, "name", &args.name)?;
        let patient = self
            .client
            .add_patient(&self.access_token, args.name.trim())
            .await?;
        to_content(&patient)
    }
}

pub struct CreateAppointmentTool {
    client: Arc<dyn ClinicClient>,
    access_token: String,
}

impl CreateAppointmentTool {
    pub fn new(client: Arc<dyn ClinicClient>, access_token: String) -> Self {
        Self { client, access_token }
    }
}

#[async_trait]
impl Tool for CreateAppointmentTool {
    fn metadata(&self) -> ToolMetadata {
        create_appointment_spec()
    }

    async fn execute(&self, arguments: &str) -> Result<String, AgentError> {
        let args: CreateAppointmentArgs = decode_arguments(CREATE_APPOINTMENT, arguments)?;
        require_non_empty(CREATE_APPOINTMENT, "date", &args.date)?;
        require_non_empty(CREATE_APPOINTMENT, "start", &args.start)?;
        require_non_empty(CREATE_APPOINTMENT, "end", &args.end)?;

        let appointment = self
            .client
            .add_appointment(
                &self.access_token,
                &NewAppointment {
                    doctor: args.doctor,
                    patient: args.patient,
                    date: args.date,
                    start: args.start,
                    end: args.end,
                },
            )
            .await?;
        to_content(&appointment)
    }
}
