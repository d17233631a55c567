//! Patient history lookup: in-memory search over the patients snapshot and a
//! per-patient live subscription to that patient's sessions.

use std::cmp::Ordering;

use tokio::sync::watch;
use tracing::{debug, info};

use super::{
    live::{ClinicData, LiveCollection, PatientEntry, ReviewEntry, SessionEntry},
    ClinicClient,
};
use crate::{
    db::{CollectionPath, Query},
    models::{parse_display_date, SessionRecord},
};

/// Patients whose name or profession contains `search`, ignoring case.
pub fn filter_patients(patients: &[PatientEntry], search: &str) -> Vec<PatientEntry> {
    let needle = search.to_lowercase();

    patients
        .iter()
        .filter(|p| p.name.to_lowercase().contains(&needle) || p.profession.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

/// Newest parsed date first. Dates that do not parse go last, keeping their order.
pub fn sort_by_date_desc(sessions: &mut [SessionEntry]) {
    sessions.sort_by(|a, b| {
        match (parse_display_date(&a.date_display()), parse_display_date(&b.date_display())) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });
}

/// Static intake details shown for the selected patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeSummary {
    pub age: String,
    pub profession: String,
    pub consultation_reason: String,
    pub medical_history: String,
    pub registered: String,
}

pub struct HistoryPanel {
    client: ClinicClient,
    search: String,
    selected: Option<PatientEntry>,
    show_intake: bool,
    sessions: Option<LiveCollection<SessionEntry>>,
}

impl HistoryPanel {
    pub fn new(client: ClinicClient) -> Self {
        Self {
            client,
            search: String::new(),
            selected: None,
            show_intake: false,
            sessions: None,
        }
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn set_search(&mut self, text: impl Into<String>) {
        self.search = text.into();
    }

    /// Matches for the current search text, none while it is empty.
    pub fn results(&self, data: &ClinicData) -> Vec<PatientEntry> {
        if self.search.is_empty() {
            return Vec::new();
        }
        filter_patients(&data.patients.current(), &self.search)
    }

    pub fn selected(&self) -> Option<&PatientEntry> {
        self.selected.as_ref()
    }

    /// Opens `patient`, replacing any previous per-patient subscription.
    pub fn select(&mut self, patient: PatientEntry) {
        info!("Opening history for patient {}", patient.id);

        self.search.clear();
        self.show_intake = false;
        // Tear the old subscription down before registering the new one
        self.sessions = None;

        // Unordered so sessions lacking a creation timestamp are still listed
        let query = Query::collection(CollectionPath::patient_sessions(&patient.id));
        self.sessions = Some(LiveCollection::mount_arranged(
            self.client.store.as_ref(),
            query,
            |session: SessionEntry| session.map(SessionRecord::normalized),
            |sessions: &mut Vec<SessionEntry>| sort_by_date_desc(sessions),
        ));
        self.selected = Some(patient);
    }

    pub fn deselect(&mut self) {
        if let Some(patient) = self.selected.take() {
            debug!("Closing history for patient {}", patient.id);
        }
        self.sessions = None;
        self.show_intake = false;
    }

    /// Sessions of the selected patient, newest date first.
    pub fn sessions(&self) -> Vec<SessionEntry> {
        self.sessions
            .as_ref()
            .map(LiveCollection::current)
            .unwrap_or_default()
    }

    /// Receiver for the selected patient's sessions, sorted like [`HistoryPanel::sessions`].
    pub fn watch_sessions(&self) -> Option<watch::Receiver<Vec<SessionEntry>>> {
        self.sessions.as_ref().map(LiveCollection::watch)
    }

    pub fn toggle_intake(&mut self) {
        self.show_intake = !self.show_intake;
    }

    /// The intake summary while it is shown and a patient is selected.
    pub fn intake(&self) -> Option<IntakeSummary> {
        if !self.show_intake {
            return None;
        }

        self.selected.as_ref().map(|p| IntakeSummary {
            age: p.age.clone(),
            profession: p.profession.clone(),
            consultation_reason: p.consultation_reason.clone(),
            medical_history: p.medical_history.clone(),
            registered: p.registered_display(),
        })
    }

    /// Stored reviews for the selected patient, newest first.
    pub fn reviews(&self, data: &ClinicData) -> Vec<ReviewEntry> {
        let Some(patient) = &self.selected else {
            return Vec::new();
        };

        data.reviews
            .current()
            .into_iter()
            .filter(|r| r.patient_id == patient.id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::auth::LocalIdentityProvider,
        db::{memory::MemoryStore, DocumentId, DocumentStore, NewDocument, CREATED_AT},
        models::{DateField, Patient, Stored, Timestamp, NO_DATE},
    };
    use serde_json::json;
    use std::sync::Arc;

    fn client(store: &MemoryStore) -> ClinicClient {
        ClinicClient::new(Arc::new(store.clone()), Arc::new(LocalIdentityProvider::new(None)))
    }

    fn patient(id: &str, name: &str, profession: &str) -> PatientEntry {
        Stored::new(
            DocumentId::new(id),
            Patient {
                name: name.into(),
                profession: profession.into(),
                ..Patient::default()
            },
        )
    }

    fn session(id: &str, date: Option<DateField>) -> SessionEntry {
        Stored::new(
            DocumentId::new(id),
            SessionRecord {
                date,
                ..SessionRecord::default()
            },
        )
    }

    async fn add_session(store: &MemoryStore, patient: &str, date: &str) {
        store
            .add(
                &CollectionPath::patient_sessions(&DocumentId::new(patient)),
                NewDocument::default()
                    .with_field("fecha", date)
                    .with_server_timestamp(CREATED_AT),
            )
            .await
            .unwrap();
    }

    #[test]
    fn search_matches_name_or_profession_ignoring_case() {
        let patients = vec![
            patient("a", "Ana Pérez", "Ingeniera"),
            patient("l", "Luis Gómez", "Médico"),
        ];

        let by_name = filter_patients(&patients, "ana");
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].name, "Ana Pérez");

        let by_profession = filter_patients(&patients, "MÉDICO");
        assert_eq!(by_profession.len(), 1);
        assert_eq!(by_profession[0].name, "Luis Gómez");

        assert!(filter_patients(&patients, "carla").is_empty());
    }

    #[test]
    fn sessions_sort_newest_first_with_unknown_dates_last() {
        let older = Timestamp {
            seconds: 1_700_000_000,
            nanoseconds: 0,
        };
        let mut sessions = vec![
            session("none", None),
            session("old", Some(DateField::Timestamp(older))).map(SessionRecord::normalized),
            session("typed", Some("2024-05-06".into())),
            session("garbled", Some("last tuesday".into())),
            session("slashed", Some("01/06/2024".into())),
        ];

        sort_by_date_desc(&mut sessions);

        let order: Vec<_> = sessions.iter().map(|s| s.id.to_string()).collect();
        assert_eq!(order, vec!["slashed", "typed", "old", "none", "garbled"]);
        assert_eq!(sessions[3].date_display(), NO_DATE);
    }

    #[tokio::test]
    async fn results_stay_empty_without_search_text() {
        let store = MemoryStore::new();
        let client = client(&store);
        let data = ClinicData::mount(&client);
        store
            .add(&CollectionPath::patients(), NewDocument::default().with_field("nombre", "Ana Pérez"))
            .await
            .unwrap();

        let mut panel = HistoryPanel::new(client);
        assert!(panel.results(&data).is_empty());

        panel.set_search("pér");
        assert_eq!(panel.results(&data).len(), 1);
    }

    #[tokio::test]
    async fn selecting_shows_only_that_patients_sessions() {
        let store = MemoryStore::new();
        add_session(&store, "ana", "2024-01-10").await;
        add_session(&store, "ana", "2024-03-02").await;
        add_session(&store, "luis", "2024-02-01").await;

        let mut panel = HistoryPanel::new(client(&store));
        panel.set_search("an");
        panel.select(patient("ana", "Ana Pérez", "Ingeniera"));

        assert_eq!(panel.search(), "");
        let dates: Vec<_> = panel.sessions().iter().map(|s| s.date_display()).collect();
        assert_eq!(dates, vec!["2024-03-02", "2024-01-10"]);

        add_session(&store, "ana", "2024-04-20").await;
        assert_eq!(panel.sessions()[0].date_display(), "2024-04-20");
    }

    #[test]
    fn sessions_without_creation_time_are_listed() {
        let store = MemoryStore::new();
        let path = CollectionPath::patient_sessions(&DocumentId::new("ana"));
        store.put(
            &path,
            &DocumentId::new("imported"),
            json!({ "fecha": "2023-11-02" }).as_object().unwrap().clone(),
        );

        let mut panel = HistoryPanel::new(client(&store));
        panel.select(patient("ana", "Ana Pérez", ""));

        let sessions = panel.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, DocumentId::new("imported"));
    }

    #[tokio::test]
    async fn watched_snapshots_arrive_sorted() {
        let store = MemoryStore::new();
        let mut panel = HistoryPanel::new(client(&store));
        panel.select(patient("ana", "Ana Pérez", ""));
        let sessions = panel.watch_sessions().unwrap();

        add_session(&store, "ana", "2024-01-10").await;
        add_session(&store, "ana", "2024-03-02").await;
        store.put(
            &CollectionPath::patient_sessions(&DocumentId::new("ana")),
            &DocumentId::new("legacy"),
            json!({ "fecha": "2024-02-15" }).as_object().unwrap().clone(),
        );

        let dates: Vec<_> = sessions.borrow().iter().map(|s| s.date_display()).collect();
        assert_eq!(dates, vec!["2024-03-02", "2024-02-15", "2024-01-10"]);
    }

    #[tokio::test]
    async fn reselecting_keeps_a_single_subscription() {
        let store = MemoryStore::new();
        let ana = CollectionPath::patient_sessions(&DocumentId::new("ana"));
        let luis = CollectionPath::patient_sessions(&DocumentId::new("luis"));
        let mut panel = HistoryPanel::new(client(&store));

        panel.select(patient("ana", "Ana Pérez", ""));
        panel.select(patient("luis", "Luis Gómez", ""));
        assert_eq!(store.active_listeners(&ana), 0);
        assert_eq!(store.active_listeners(&luis), 1);

        panel.deselect();
        assert_eq!(store.active_listeners(&luis), 0);
        assert!(panel.sessions().is_empty());
        assert!(panel.selected().is_none());
    }

    #[test]
    fn intake_summary_toggles_and_resets_on_select() {
        let store = MemoryStore::new();
        let mut panel = HistoryPanel::new(client(&store));
        panel.select(patient("ana", "Ana Pérez", "Ingeniera"));
        assert!(panel.intake().is_none());

        panel.toggle_intake();
        let intake = panel.intake().unwrap();
        assert_eq!(intake.profession, "Ingeniera");
        assert_eq!(intake.registered, NO_DATE);

        panel.select(patient("luis", "Luis Gómez", "Médico"));
        assert!(panel.intake().is_none());
    }

    #[tokio::test]
    async fn reviews_read_back_for_the_selected_patient() {
        let store = MemoryStore::new();
        let client = client(&store);
        let data = ClinicData::mount(&client);
        for (patient_id, diagnosis) in [("ana", "Improving"), ("luis", "Stable")] {
            store
                .add(
                    &CollectionPath::reviews(),
                    NewDocument::default()
                        .with_field("pacienteId", patient_id)
                        .with_field("diagnostico", diagnosis)
                        .with_server_timestamp(CREATED_AT),
                )
                .await
                .unwrap();
        }

        let mut panel = HistoryPanel::new(client);
        assert!(panel.reviews(&data).is_empty());

        panel.select(patient("ana", "Ana Pérez", ""));
        let reviews = panel.reviews(&data);
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].diagnosis, "Improving");
    }
}
