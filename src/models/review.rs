use serde::{Deserialize, Serialize};

use super::DateField;

/// Free-standing review referencing a patient by id and denormalized name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Review {
    #[serde(rename = "pacienteId")]
    pub patient_id: String,
    #[serde(rename = "pacienteNombre")]
    pub patient_name: String,
    #[serde(rename = "diagnostico")]
    pub diagnosis: String,
    #[serde(rename = "tratamiento")]
    pub treatment: String,
    #[serde(rename = "notas")]
    pub notes: String,
    #[serde(rename = "fecha")]
    pub date: String,
    #[serde(rename = "hora")]
    pub time: String,
    #[serde(rename = "fechaCreado", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateField>,
}
