//! Record entry forms.
//!
//! A form owns an editable draft. Submitting checks required fields locally,
//! appends one document, and leaves a transient [`Notice`] behind. The draft resets
//! only after a successful write, so a failed submission can be retried as is.
//! New records show up through the live subscriptions, never optimistically.

use chrono::Local;
use tracing::{error, info, instrument};
use validator::Validate;

use super::{
    live::{ClinicData, PatientEntry},
    ClinicClient,
};
use crate::{
    db::{CollectionPath, DocumentId, NewDocument, CREATED_AT, REGISTERED_AT},
    error::StoreResult,
    models::{DateField, Patient, Review, SessionRecord, DATE_FORMAT},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Failure,
    Prompt,
}

/// Acknowledgement shown once after a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

struct Messages {
    success: &'static str,
    failure: &'static str,
    prompt: &'static str,
}

const PATIENT: Messages = Messages {
    success: "Patient registered successfully",
    failure: "Error registering patient",
    prompt: "Please enter the patient's name and age",
};

const SESSION: Messages = Messages {
    success: "Session saved to the patient's history",
    failure: "Error saving session",
    prompt: "Please select a patient and a date",
};

const REVIEW: Messages = Messages {
    success: "Review saved successfully",
    failure: "Error saving review",
    prompt: "Please select a patient and enter a diagnosis",
};

#[derive(Debug, Clone, Default, PartialEq, Validate)]
pub struct PatientDraft {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub age: String,
    pub profession: String,
    pub consultation_reason: String,
    pub medical_history: String,
}

impl PatientDraft {
    fn to_record(&self) -> Patient {
        Patient {
            name: self.name.clone(),
            age: self.age.clone(),
            profession: self.profession.clone(),
            consultation_reason: self.consultation_reason.clone(),
            medical_history: self.medical_history.clone(),
            registered_at: None,
            search_key: Some(Patient::search_key_for(&self.name)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Validate)]
pub struct SessionDraft {
    #[validate(length(min = 1))]
    pub patient_id: String,
    #[validate(length(min = 1))]
    pub date: String,
    pub time: String,
    pub reason: String,
    pub symptoms: String,
    pub diagnosis: String,
    pub treatment: String,
    pub points: String,
    pub tongue_body: String,
    pub tongue_coating: String,
    pub pulse_left: String,
    pub pulse_right: String,
    pub notes: String,
}

impl Default for SessionDraft {
    /// Blank draft dated now.
    fn default() -> Self {
        let now = Local::now();
        Self {
            patient_id: String::new(),
            date: now.format("%Y-%m-%d").to_string(),
            time: now.format("%H:%M").to_string(),
            reason: String::new(),
            symptoms: String::new(),
            diagnosis: String::new(),
            treatment: String::new(),
            points: String::new(),
            tongue_body: String::new(),
            tongue_coating: String::new(),
            pulse_left: String::new(),
            pulse_right: String::new(),
            notes: String::new(),
        }
    }
}

impl SessionDraft {
    fn to_record(&self) -> SessionRecord {
        SessionRecord {
            patient_id: self.patient_id.clone(),
            date: Some(DateField::Text(self.date.clone())),
            time: self.time.clone(),
            reason: self.reason.clone(),
            symptoms: self.symptoms.clone(),
            diagnosis: self.diagnosis.clone(),
            treatment: self.treatment.clone(),
            points: self.points.clone(),
            tongue_body: self.tongue_body.clone(),
            tongue_coating: self.tongue_coating.clone(),
            pulse_left: self.pulse_left.clone(),
            pulse_right: self.pulse_right.clone(),
            notes: self.notes.clone(),
            created_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Validate)]
pub struct ReviewDraft {
    #[validate(length(min = 1))]
    pub diagnosis: String,
    pub treatment: String,
    pub notes: String,
}

pub struct Form<D> {
    pub draft: D,
    notice: Option<Notice>,
}

pub type PatientForm = Form<PatientDraft>;
pub type SessionForm = Form<SessionDraft>;
pub type ReviewForm = Form<ReviewDraft>;

impl<D: Default> Default for Form<D> {
    fn default() -> Self {
        Self {
            draft: D::default(),
            notice: None,
        }
    }
}

impl<D: Default> Form<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    /// Reads and clears the pending acknowledgement.
    pub fn take_notice(&mut self) -> Option<Notice> {
        self.notice.take()
    }

    fn prompt(&mut self, messages: &Messages) -> Notice {
        self.show(NoticeKind::Prompt, messages.prompt)
    }

    fn settle(&mut self, result: StoreResult<DocumentId>, messages: &Messages) -> Notice {
        match result {
            Ok(id) => {
                info!("Saved document {}", id);
                self.draft = D::default();
                self.show(NoticeKind::Success, messages.success)
            }
            Err(e) => {
                error!("{}: {}", messages.failure, e);
                self.show(NoticeKind::Failure, messages.failure)
            }
        }
    }

    fn show(&mut self, kind: NoticeKind, message: &str) -> Notice {
        let notice = Notice {
            kind,
            message: message.to_string(),
        };
        self.notice = Some(notice.clone());
        notice
    }
}

impl Form<PatientDraft> {
    #[instrument(skip_all)]
    pub async fn submit(&mut self, client: &ClinicClient) -> Notice {
        if self.draft.validate().is_err() {
            return self.prompt(&PATIENT);
        }

        let result = self.write(client).await;
        self.settle(result, &PATIENT)
    }

    async fn write(&self, client: &ClinicClient) -> StoreResult<DocumentId> {
        let document = NewDocument::from_record(&self.draft.to_record())?.with_server_timestamp(REGISTERED_AT);
        client.store.add(&CollectionPath::patients(), document).await
    }
}

impl Form<SessionDraft> {
    /// Selectable patients, in snapshot order.
    pub fn patient_options(data: &ClinicData) -> Vec<(DocumentId, String)> {
        data.patients
            .current()
            .into_iter()
            .map(|p| (p.id.clone(), p.name.clone()))
            .collect()
    }

    #[instrument(skip_all, fields(patient = %self.draft.patient_id))]
    pub async fn submit(&mut self, client: &ClinicClient) -> Notice {
        if self.draft.validate().is_err() {
            return self.prompt(&SESSION);
        }

        let result = self.write(client).await;
        self.settle(result, &SESSION)
    }

    async fn write(&self, client: &ClinicClient) -> StoreResult<DocumentId> {
        let path = CollectionPath::patient_sessions(&DocumentId::new(&self.draft.patient_id));
        let document = NewDocument::from_record(&self.draft.to_record())?.with_server_timestamp(CREATED_AT);
        client.store.add(&path, document).await
    }
}

impl Form<ReviewDraft> {
    #[instrument(skip_all)]
    pub async fn submit(&mut self, client: &ClinicClient, patient: Option<&PatientEntry>) -> Notice {
        let Some(patient) = patient else {
            return self.prompt(&REVIEW);
        };
        if self.draft.validate().is_err() {
            return self.prompt(&REVIEW);
        }

        let result = self.write(client, patient).await;
        self.settle(result, &REVIEW)
    }

    async fn write(&self, client: &ClinicClient, patient: &PatientEntry) -> StoreResult<DocumentId> {
        let now = Local::now();
        let review = Review {
            patient_id: patient.id.to_string(),
            patient_name: patient.name.clone(),
            diagnosis: self.draft.diagnosis.clone(),
            treatment: self.draft.treatment.clone(),
            notes: self.draft.notes.clone(),
            date: now.format(DATE_FORMAT).to_string(),
            time: now.format("%H:%M:%S").to_string(),
            created_at: None,
        };

        let document = NewDocument::from_record(&review)?.with_server_timestamp(CREATED_AT);
        client.store.add(&CollectionPath::reviews(), document).await
    }
}
