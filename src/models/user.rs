use serde::{Deserialize, Serialize};

use super::DateField;

/// Authorization record keyed by email. Only an administrator with direct store
/// access ever flips `authorized`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserRecord {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "autorizado")]
    pub authorized: bool,
    #[serde(rename = "acupuntura")]
    pub acupuncture: bool,
    pub tuina: bool,
    pub pro: bool,
    #[serde(rename = "fecha_registro", skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateField>,
}

impl UserRecord {
    pub const DEFAULT_NAME: &'static str = "User";

    /// Record created on first sign-in: unauthorized, no capabilities.
    pub fn pending(display_name: Option<&str>) -> Self {
        Self {
            name: display_name
                .filter(|n| !n.is_empty())
                .unwrap_or(Self::DEFAULT_NAME)
                .to_string(),
            ..Self::default()
        }
    }
}
