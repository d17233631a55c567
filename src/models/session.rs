use serde::{Deserialize, Serialize};

use super::{display_date, DateField};

/// A patient visit, stored under `pacientes/{id}/sesiones`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionRecord {
    #[serde(rename = "pacienteId")]
    pub patient_id: String,
    #[serde(rename = "fecha", skip_serializing_if = "Option::is_none")]
    pub date: Option<DateField>,
    #[serde(rename = "hora")]
    pub time: String,
    #[serde(rename = "motivo")]
    pub reason: String,
    #[serde(rename = "sintomas")]
    pub symptoms: String,
    #[serde(rename = "diagnostico")]
    pub diagnosis: String,
    #[serde(rename = "tratamiento")]
    pub treatment: String,
    #[serde(rename = "puntos")]
    pub points: String,
    #[serde(rename = "lengua_cuerpo")]
    pub tongue_body: String,
    #[serde(rename = "lengua_saburra")]
    pub tongue_coating: String,
    #[serde(rename = "pulso_izquierdo")]
    pub pulse_left: String,
    #[serde(rename = "pulso_derecho")]
    pub pulse_right: String,
    #[serde(rename = "observacion")]
    pub notes: String,
    #[serde(rename = "fechaCreado", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateField>,
}

impl SessionRecord {
    /// Rewrites `date` into its display string so history entries always carry text.
    pub fn normalized(mut self) -> Self {
        let shown = display_date(self.date.as_ref());
        self.date = Some(DateField::Text(shown));
        self
    }

    pub fn date_display(&self) -> String {
        display_date(self.date.as_ref())
    }
}
