use serde::{Deserialize, Serialize};

use super::{display_date, DateField};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Patient {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "edad")]
    pub age: String,
    #[serde(rename = "profesion")]
    pub profession: String,
    #[serde(rename = "motivo_consulta")]
    pub consultation_reason: String,
    #[serde(rename = "historial_medico")]
    pub medical_history: String,
    #[serde(rename = "fecha_registro", skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_key: Option<String>,
}

impl Patient {
    /// Lowercase key derived from the name, written alongside every new patient.
    pub fn search_key_for(name: &str) -> String {
        name.to_lowercase()
    }

    /// Replaces the registration timestamp with its display string.
    pub fn with_display_date(mut self) -> Self {
        let shown = display_date(self.registered_at.as_ref());
        self.registered_at = Some(DateField::Text(shown));
        self
    }

    /// Registration date as shown in the intake summary.
    pub fn registered_display(&self) -> String {
        display_date(self.registered_at.as_ref())
    }
}
