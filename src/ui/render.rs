//! Plain-text views of the shell, used by the command line client.

use std::fmt::Write;

use super::app::{ClinicApp, Panel, Section};
use crate::core::{
    auth::GateState,
    forms::{Notice, NoticeKind, SessionForm},
    history::IntakeSummary,
    live::{PatientEntry, ReviewEntry, SessionEntry},
};

pub fn render_notice(notice: &Notice) -> String {
    let marker = match notice.kind {
        NoticeKind::Success => "ok",
        NoticeKind::Failure => "error",
        NoticeKind::Prompt => "!",
    };
    format!("[{}] {}", marker, notice.message)
}

/// One line per outcome of the authorization gate.
pub fn render_gate(state: &GateState) -> String {
    match state {
        GateState::Loading => "Loading...".to_string(),
        GateState::SignedOut => "Signed out.".to_string(),
        GateState::Denied { identity, reason } => format!(
            "Access denied for {}: {}",
            identity.email.as_deref().unwrap_or("unknown account"),
            reason.message()
        ),
        GateState::Authorized { identity, record } => format!(
            "Welcome, {} ({})",
            record.name,
            identity.email.as_deref().unwrap_or_default()
        ),
    }
}

pub fn render_patients(patients: &[PatientEntry]) -> String {
    if patients.is_empty() {
        return "No patients.\n".to_string();
    }

    let mut out = String::new();
    for patient in patients {
        let _ = writeln!(
            out,
            "{}  {} ({}), {} - registered {}",
            patient.id,
            patient.name,
            patient.age,
            patient.profession,
            patient.registered_display()
        );
    }
    out
}

pub fn render_sessions(sessions: &[SessionEntry]) -> String {
    if sessions.is_empty() {
        return "No sessions recorded.\n".to_string();
    }

    let mut out = String::new();
    for session in sessions {
        let _ = writeln!(out, "{} {}", session.date_display(), session.time);
        for (label, value) in [
            ("Reason", &session.reason),
            ("Symptoms", &session.symptoms),
            ("Diagnosis", &session.diagnosis),
            ("Treatment", &session.treatment),
            ("Points", &session.points),
            ("Tongue body", &session.tongue_body),
            ("Tongue coating", &session.tongue_coating),
            ("Left pulse", &session.pulse_left),
            ("Right pulse", &session.pulse_right),
            ("Notes", &session.notes),
        ] {
            if !value.is_empty() {
                let _ = writeln!(out, "  {}: {}", label, value);
            }
        }
    }
    out
}

pub fn render_reviews(reviews: &[ReviewEntry]) -> String {
    let mut out = String::new();
    for review in reviews {
        let _ = writeln!(
            out,
            "{} {}  {}: {}",
            review.date, review.time, review.patient_name, review.diagnosis
        );
    }
    out
}

fn render_intake(intake: &IntakeSummary) -> String {
    format!(
        "Age: {}\nProfession: {}\nConsultation reason: {}\nMedical history: {}\nRegistered: {}\n",
        intake.age, intake.profession, intake.consultation_reason, intake.medical_history, intake.registered
    )
}

/// Tab bar, current panel and timer.
pub fn render_app(app: &ClinicApp) -> String {
    let mut out = String::new();

    let tabs: Vec<String> = Section::ALL
        .iter()
        .map(|s| {
            if *s == app.section() {
                format!("[{}]", s.title())
            } else {
                s.title().to_string()
            }
        })
        .collect();
    let _ = writeln!(out, "{}", tabs.join(" | "));

    match app.panel() {
        Panel::Registration(form) => {
            if let Some(notice) = form.notice() {
                let _ = writeln!(out, "{}", render_notice(notice));
            }
            let _ = writeln!(out, "Name: {}\nAge: {}", form.draft.name, form.draft.age);
        }
        Panel::Session(form) => {
            for (id, name) in SessionForm::patient_options(app.data()) {
                let _ = writeln!(out, "  {}  {}", id, name);
            }
            if let Some(notice) = form.notice() {
                let _ = writeln!(out, "{}", render_notice(notice));
            }
        }
        Panel::History { lookup, review } => match lookup.selected() {
            None => out.push_str(&render_patients(&lookup.results(app.data()))),
            Some(patient) => {
                let _ = writeln!(out, "{}", patient.name);
                if let Some(intake) = lookup.intake() {
                    out.push_str(&render_intake(&intake));
                }
                out.push_str(&render_sessions(&lookup.sessions()));
                out.push_str(&render_reviews(&lookup.reviews(app.data())));
                if let Some(notice) = review.notice() {
                    let _ = writeln!(out, "{}", render_notice(notice));
                }
            }
        },
        Panel::Timer => {}
    }

    let _ = writeln!(
        out,
        "Timer {} ({})",
        app.timer().display(),
        if app.timer().is_running() { "running" } else { "stopped" }
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::auth::{DenialReason, Identity},
        db::DocumentId,
        models::{DateField, SessionRecord, Stored},
    };

    #[test]
    fn sessions_list_only_filled_fields() {
        let sessions = vec![Stored::new(
            DocumentId::new("s1"),
            SessionRecord {
                date: Some(DateField::Text("2024-05-06".into())),
                time: "10:30".into(),
                points: "IG4, H3".into(),
                ..SessionRecord::default()
            },
        )];

        assert_eq!(render_sessions(&sessions), "2024-05-06 10:30\n  Points: IG4, H3\n");
    }

    #[test]
    fn denied_gate_shows_the_reason() {
        let state = GateState::Denied {
            identity: Identity::new("ana@example.com", "Ana"),
            reason: DenialReason::PendingApproval,
        };

        assert_eq!(
            render_gate(&state),
            "Access denied for ana@example.com: Your account has been registered and is pending authorization."
        );
    }
}
