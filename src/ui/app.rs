use tracing::{debug, warn};

use crate::{
    core::{
        auth::GateState,
        forms::{Notice, PatientDraft, PatientForm, ReviewDraft, ReviewForm, SessionDraft, SessionForm},
        history::HistoryPanel,
        live::ClinicData,
        timer::SessionTimer,
        ClinicClient,
    },
    db::DocumentId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Registration,
    Session,
    History,
    Timer,
}

impl Section {
    pub const ALL: [Section; 4] = [Section::Registration, Section::Session, Section::History, Section::Timer];

    pub fn title(&self) -> &'static str {
        match self {
            Section::Registration => "Patient registration",
            Section::Session => "Session",
            Section::History => "History",
            Section::Timer => "Timer",
        }
    }
}

/// The mounted content of the selected section.
pub enum Panel {
    Registration(PatientForm),
    Session(SessionForm),
    History { lookup: HistoryPanel, review: ReviewForm },
    Timer,
}

impl Panel {
    fn mount(section: Section, client: &ClinicClient) -> Self {
        match section {
            Section::Registration => Panel::Registration(PatientForm::new()),
            Section::Session => Panel::Session(SessionForm::new()),
            Section::History => Panel::History {
                lookup: HistoryPanel::new(client.clone()),
                review: ReviewForm::new(),
            },
            Section::Timer => Panel::Timer,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Message {
    SectionSelected(Section),
    PatientDraftChanged(PatientDraft),
    SessionDraftChanged(SessionDraft),
    ReviewDraftChanged(ReviewDraft),
    SubmitPatient,
    SubmitSession,
    SubmitReview,
    SearchChanged(String),
    PatientSelected(DocumentId),
    PatientDeselected,
    IntakeToggled,
    TimerStarted,
    TimerPaused,
    TimerReset,
}

/// Signed-in shell: the application-wide subscriptions, the timer and one panel.
pub struct ClinicApp {
    client: ClinicClient,
    data: ClinicData,
    timer: SessionTimer,
    section: Section,
    panel: Panel,
}

impl ClinicApp {
    /// Mounts the shell behind the authorization gate. Nothing is subscribed or
    /// mounted unless `gate` is [`GateState::Authorized`].
    pub fn new(client: ClinicClient, gate: &GateState) -> Option<Self> {
        if !gate.is_authorized() {
            debug!("Gate closed, shell not mounted");
            return None;
        }

        let data = ClinicData::mount(&client);
        let section = Section::Registration;
        let panel = Panel::mount(section, &client);

        Some(Self {
            client,
            data,
            timer: SessionTimer::new(),
            section,
            panel,
        })
    }

    pub fn section(&self) -> Section {
        self.section
    }

    pub fn panel(&self) -> &Panel {
        &self.panel
    }

    pub fn data(&self) -> &ClinicData {
        &self.data
    }

    pub fn timer(&self) -> &SessionTimer {
        &self.timer
    }

    /// Applies one message. Submissions return the resulting acknowledgement.
    pub async fn update(&mut self, message: Message) -> Option<Notice> {
        match message {
            Message::SectionSelected(section) => {
                if section != self.section {
                    debug!("Switching to {}", section.title());
                    self.section = section;
                    // Replacing the panel drops the previous one and its subscriptions
                    self.panel = Panel::mount(section, &self.client);
                }
                None
            }
            Message::PatientDraftChanged(draft) => {
                if let Panel::Registration(form) = &mut self.panel {
                    form.draft = draft;
                }
                None
            }
            Message::SessionDraftChanged(draft) => {
                if let Panel::Session(form) = &mut self.panel {
                    form.draft = draft;
                }
                None
            }
            Message::ReviewDraftChanged(draft) => {
                if let Panel::History { review, .. } = &mut self.panel {
                    review.draft = draft;
                }
                None
            }
            Message::SubmitPatient => match &mut self.panel {
                Panel::Registration(form) => Some(form.submit(&self.client).await),
                _ => None,
            },
            Message::SubmitSession => match &mut self.panel {
                Panel::Session(form) => Some(form.submit(&self.client).await),
                _ => None,
            },
            Message::SubmitReview => match &mut self.panel {
                Panel::History { lookup, review } => Some(review.submit(&self.client, lookup.selected()).await),
                _ => None,
            },
            Message::SearchChanged(text) => {
                if let Panel::History { lookup, .. } = &mut self.panel {
                    lookup.set_search(text);
                }
                None
            }
            Message::PatientSelected(id) => {
                if let Panel::History { lookup, .. } = &mut self.panel {
                    match self.data.patient(&id) {
                        Some(patient) => lookup.select(patient),
                        None => warn!("Unknown patient {}", id),
                    }
                }
                None
            }
            Message::PatientDeselected => {
                if let Panel::History { lookup, .. } = &mut self.panel {
                    lookup.deselect();
                }
                None
            }
            Message::IntakeToggled => {
                if let Panel::History { lookup, .. } = &mut self.panel {
                    lookup.toggle_intake();
                }
                None
            }
            Message::TimerStarted => {
                self.timer.start();
                None
            }
            Message::TimerPaused => {
                self.timer.pause();
                None
            }
            Message::TimerReset => {
                self.timer.reset();
                None
            }
        }
    }
}
