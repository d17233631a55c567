//! Lianyi clinic command line client.

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tokio::{sync::watch, time::timeout};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lianyi::{
    config::{load_config, Config},
    core::{
        auth::{AuthGate, Identity, LocalIdentityProvider},
        forms::{PatientDraft, ReviewDraft, SessionDraft},
    },
    db::{firestore::FirestoreStore, DocumentId},
    ui::{
        render::{render_app, render_gate, render_notice, render_patients, render_reviews, render_sessions},
        ClinicApp, Message, Panel, Section,
    },
    ClinicClient,
};

const FIRST_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(name = "lianyi", about = "Acupuncture clinic records")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the signed-in account and its authorization
    Whoami,
    /// List every patient
    Patients,
    /// Register a new patient
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        age: String,
        #[arg(long, default_value = "")]
        profession: String,
        #[arg(long, default_value = "")]
        reason: String,
        #[arg(long, default_value = "")]
        history: String,
    },
    /// Record a session for a patient
    Session {
        patient_id: String,
        /// Defaults to today
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        time: Option<String>,
        #[arg(long, default_value = "")]
        reason: String,
        #[arg(long, default_value = "")]
        symptoms: String,
        #[arg(long, default_value = "")]
        diagnosis: String,
        #[arg(long, default_value = "")]
        treatment: String,
        #[arg(long, default_value = "")]
        points: String,
        #[arg(long, default_value = "")]
        tongue_body: String,
        #[arg(long, default_value = "")]
        tongue_coating: String,
        #[arg(long, default_value = "")]
        pulse_left: String,
        #[arg(long, default_value = "")]
        pulse_right: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Search patients by name or profession
    Search { text: String },
    /// Show a patient's session history
    History {
        patient_id: String,
        /// Include the intake summary
        #[arg(long)]
        intake: bool,
    },
    /// Add a review for a patient
    Review {
        patient_id: String,
        #[arg(long)]
        diagnosis: String,
        #[arg(long, default_value = "")]
        treatment: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Run the session timer until interrupted
    Timer,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_client(config: &Config) -> ClinicClient {
    let api_key = Some(config.firebase.api_key.clone()).filter(|k| !k.is_empty());
    let store = FirestoreStore::new(&config.firebase.project_id, api_key, config.listen.poll_interval())
        .with_id_token(config.identity.id_token.clone());

    let account = config.identity.email.as_ref().map(|email| Identity {
        email: Some(email.clone()),
        display_name: config.identity.display_name.clone(),
        id_token: config.identity.id_token.clone(),
    });

    ClinicClient::new(Arc::new(store), Arc::new(LocalIdentityProvider::new(account)))
}

/// Waits for the first emission of a live collection.
async fn first_snapshot<T>(mut snapshot: watch::Receiver<T>, what: &str) -> Result<()> {
    timeout(FIRST_SNAPSHOT_TIMEOUT, snapshot.changed())
        .await
        .with_context(|| format!("Timed out waiting for {what}"))?
        .with_context(|| format!("Subscription to {what} closed"))
}

async fn open_history(app: &mut ClinicApp, patient_id: &str) -> Result<()> {
    first_snapshot(app.data().patients.watch(), "patients").await?;

    let id = DocumentId::new(patient_id);
    if app.data().patient(&id).is_none() {
        bail!("No patient with id {}", patient_id);
    }

    app.update(Message::SectionSelected(Section::History)).await;
    app.update(Message::PatientSelected(id)).await;
    Ok(())
}

async fn run(command: Commands, mut app: ClinicApp) -> Result<()> {
    match command {
        Commands::Whoami => {}
        Commands::Patients => {
            first_snapshot(app.data().patients.watch(), "patients").await?;
            print!("{}", render_patients(&app.data().patients.current()));
        }
        Commands::Register {
            name,
            age,
            profession,
            reason,
            history,
        } => {
            let draft = PatientDraft {
                name,
                age,
                profession,
                consultation_reason: reason,
                medical_history: history,
            };
            app.update(Message::PatientDraftChanged(draft)).await;
            if let Some(notice) = app.update(Message::SubmitPatient).await {
                println!("{}", render_notice(&notice));
            }
        }
        Commands::Session {
            patient_id,
            date,
            time,
            reason,
            symptoms,
            diagnosis,
            treatment,
            points,
            tongue_body,
            tongue_coating,
            pulse_left,
            pulse_right,
            notes,
        } => {
            let defaults = SessionDraft::default();
            let draft = SessionDraft {
                patient_id,
                date: date.unwrap_or(defaults.date),
                time: time.unwrap_or(defaults.time),
                reason,
                symptoms,
                diagnosis,
                treatment,
                points,
                tongue_body,
                tongue_coating,
                pulse_left,
                pulse_right,
                notes,
            };

            app.update(Message::SectionSelected(Section::Session)).await;
            app.update(Message::SessionDraftChanged(draft)).await;
            if let Some(notice) = app.update(Message::SubmitSession).await {
                println!("{}", render_notice(&notice));
            }
        }
        Commands::Search { text } => {
            first_snapshot(app.data().patients.watch(), "patients").await?;
            app.update(Message::SectionSelected(Section::History)).await;
            app.update(Message::SearchChanged(text)).await;
            print!("{}", render_app(&app));
        }
        Commands::History { patient_id, intake } => {
            open_history(&mut app, &patient_id).await?;
            if intake {
                app.update(Message::IntakeToggled).await;
            }

            if let Panel::History { lookup, .. } = app.panel() {
                if let Some(sessions) = lookup.watch_sessions() {
                    first_snapshot(sessions, "sessions").await?;
                }
            }
            print!("{}", render_app(&app));
        }
        Commands::Review {
            patient_id,
            diagnosis,
            treatment,
            notes,
        } => {
            open_history(&mut app, &patient_id).await?;
            let draft = ReviewDraft {
                diagnosis,
                treatment,
                notes,
            };
            app.update(Message::ReviewDraftChanged(draft)).await;
            if let Some(notice) = app.update(Message::SubmitReview).await {
                println!("{}", render_notice(&notice));
            }

            if let Panel::History { lookup, .. } = app.panel() {
                print!("{}", render_reviews(&lookup.reviews(app.data())));
                print!("{}", render_sessions(&lookup.sessions()));
            }
        }
        Commands::Timer => {
            app.update(Message::SectionSelected(Section::Timer)).await;
            app.update(Message::TimerStarted).await;
            let mut ticks = app.timer().subscribe();

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = ticks.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let display = ticks.borrow_and_update().display();
                        eprint!("\r{display}");
                    }
                }
            }

            app.update(Message::TimerPaused).await;
            println!("\nSession lasted {}", app.timer().display());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config().context("Failed to load configuration")?;
    let client = build_client(&config);
    info!("Using project {}", config.firebase.project_id);

    let gate = AuthGate::new(client.clone());
    if gate.sign_in().await.is_none() {
        bail!("Sign-in failed; set LIANYI__IDENTITY__EMAIL");
    }
    let _watcher = gate.start();
    let state = gate.settled().await;
    println!("{}", render_gate(&state));

    if matches!(cli.command, Commands::Whoami) {
        return Ok(());
    }
    let Some(app) = ClinicApp::new(client, &state) else {
        warn!("Refusing to continue without authorization");
        bail!("Not authorized");
    };

    run(cli.command, app).await
}
