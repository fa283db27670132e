// src/test_utils/recording_clinic.rs
use async_trait::async_trait;
use std::sync::Mutex;

use crate::errors::AgentError;
use crate::tools::clinic_client::{
    Appointment, ClinicClient, Doctor, DoctorList, NewAppointment, Patient, ScheduleList,
};

/// Clinic stub that records every call as a short string and returns canned data.
#[derive(Default)]
pub struct RecordingClinic {
    pub calls: Mutex<Vec<String>>,
    pub fail_doctors: bool,
}

impl RecordingClinic {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClinicClient for RecordingClinic {
    async fn find_doctors(&self, token: &str, name: Option<&str>) -> Result<DoctorList, AgentError> {
        self.calls.lock().unwrap().push(format!("find_doctors:{}:{:?}", token, name));
        if self.fail_doctors {
            return Err(AgentError::ProviderError("clinic API unavailable".to_string()));
        }
        Ok(DoctorList {
            doctors: vec![Doctor { id: 7, name: "Dr. Aigerim".to_string(), specialties: vec![] }],
            count: "1".to_string(),
            at_page: 1,
            max_page: 1,
        })
    }

    async fn schedules(&self, _token: &str) -> Result<ScheduleList, AgentError> {
        self.calls.lock().unwrap().push("schedules".to_string());
        Ok(ScheduleList { schedules: vec![], count: "0".to_string(), at_page: 1, max_page: 1 })
    }

    async fn add_patient(&self, _token: &str, name: &str) -> Result<Patient, AgentError> {
        self.calls.lock().unwrap().push(format!("add_patient:{}", name));
        Ok(Patient { id: 90, name: name.to_string(), comment: String::new() })
    }

    async fn add_appointment(&self, _token: &str, a: &NewAppointment) -> Result<Appointment, AgentError> {
        self.calls.lock().unwrap().push(format!("add_appointment:{}:{}", a.doctor, a.patient));
        Ok(Appointment {
            id: 501,
            doctor_id: a.doctor,
            patient_id: a.patient,
            date: a.date.clone(),
            start: a.start.clone(),
            end: a.end.clone(),
            status: 0,
            complaint: String::new(),
            comment: String::new(),
            is_first: true,
            cabinet: "2".to_string(),
            schedule_id: "11".to_string(),
        })
    }
}
