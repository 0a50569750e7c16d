//! `recruit-assessment` -- headless terminal runner for skill assessments.
//!
//! Prints each question, reads the answer from stdin and submits it.
//! Every non-empty line is added to the current draft (auto-saved after
//! the debounce window); an empty line submits. Multiple-choice answers
//! are 1-based choice numbers separated by commas.
//!
//! # Environment variables
//!
//! | Variable                | Required | Default | Description                  |
//! |-------------------------|----------|---------|------------------------------|
//! | `SESSION_ID`            | yes      | --      | Session to run               |
//! | `ASSESSMENT_ID`         | yes      | --      | Assessment the questions belong to |
//! | `SESSION_DURATION_SECS` | no       | `1800`  | Time budget                  |
//!
//! Backend settings are read by [`SessionConfig::from_env`].

use std::sync::Arc;

use anyhow::{bail, Context};
use recruit_core::question::{Answer, Question, QuestionKind};
use recruit_core::sequencer::Submission;
use recruit_core::types::DbId;
use recruit_events::{EventBus, EventEnvelope, EventLogger, SessionEvent};
use recruit_session::controller::TICK_INTERVAL;
use recruit_session::{
    Collaborators, HttpBackend, SessionConfig, SessionContext, SessionController, SessionMode,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_DURATION_SECS: u64 = 1800;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recruit_session=info,recruit_assessment=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = SessionConfig::from_env()?;
    let session_id: DbId = required_var("SESSION_ID")?;
    let assessment_id: DbId = required_var("ASSESSMENT_ID")?;
    let duration_secs: u64 = match std::env::var("SESSION_DURATION_SECS") {
        Ok(raw) => raw
            .parse()
            .context("SESSION_DURATION_SECS must be a valid u64")?,
        Err(_) => DEFAULT_DURATION_SECS,
    };

    tracing::info!(
        session_id,
        assessment_id,
        duration_secs,
        backend_url = %config.backend_url,
        "Starting recruit-assessment",
    );

    let bus = Arc::new(EventBus::default());
    tokio::spawn(EventLogger::run(bus.subscribe()));
    tokio::spawn(print_notices(bus.subscribe()));

    let backend = Arc::new(HttpBackend::new(&config)?);
    let collaborators = Collaborators {
        backend: backend.clone(),
        drafts: backend,
        media: None,
        relay: None,
        speech: None,
    };
    let context = SessionContext {
        session_id,
        assessment_id,
        duration_secs,
        mode: SessionMode::Assessment,
    };

    let mut controller = SessionController::new(context, &config, collaborators, bus);
    controller.start().await?;
    print_current(&controller);

    let result = drive(&mut controller).await;
    controller.teardown().await;
    result?;

    let progress = controller.progress();
    println!(
        "\nSession {}: {} of {} answered.",
        controller.phase().name(),
        progress.map_or(0, |p| p.answered),
        progress.map_or(0, |p| p.total),
    );
    Ok(())
}

async fn drive(controller: &mut SessionController) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
    let mut draft: Vec<String> = Vec::new();

    while !controller.phase().is_terminal() {
        tokio::select! {
            _ = ticker.tick() => controller.tick().await?,
            line = lines.next_line() => {
                let Some(line) = line? else {
                    controller.end().await?;
                    break;
                };
                let Some(question) = controller.current_question().cloned() else {
                    break;
                };

                if !line.trim().is_empty() {
                    draft.push(line);
                    if let Ok(answer) = parse_answer(&question, &draft) {
                        controller.record_draft(question.id, answer).await?;
                    }
                    continue;
                }

                match parse_answer(&question, &draft) {
                    Ok(answer) => {
                        draft.clear();
                        let submission = Submission { question_id: question.id, answer };
                        if controller.submit(submission).await?.is_some() {
                            print_current(controller);
                        }
                    }
                    Err(e) => println!("{e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, saving draft");
                controller.save_now().await?;
                break;
            }
        }
    }
    Ok(())
}

fn parse_answer(question: &Question, lines: &[String]) -> anyhow::Result<Answer> {
    let joined = lines.join("\n");
    match question.kind {
        QuestionKind::Text => Ok(Answer::Text { text: joined }),
        QuestionKind::Coding => Ok(Answer::Coding {
            language: None,
            source: joined,
        }),
        QuestionKind::MultipleChoice => {
            let mut selected = Vec::new();
            for part in joined.split([',', '\n']).map(str::trim).filter(|p| !p.is_empty()) {
                let number: usize = part
                    .parse()
                    .with_context(|| format!("{part:?} is not a choice number"))?;
                if number == 0 || number > question.choice_count() {
                    bail!("Choose between 1 and {}", question.choice_count());
                }
                selected.push(number - 1);
            }
            if selected.is_empty() {
                bail!("Enter at least one choice number");
            }
            Ok(Answer::MultipleChoice { selected })
        }
    }
}

fn print_current(controller: &SessionController) {
    let (Some(question), Some(progress)) = (controller.current_question(), controller.progress())
    else {
        return;
    };

    let remaining = controller.remaining_secs();
    println!(
        "\nQuestion {} of {} ({}:{:02} left)\n{}",
        progress.answered + 1,
        progress.total,
        remaining / 60,
        remaining % 60,
        question.prompt,
    );
    for (i, choice) in question.choices.iter().flatten().enumerate() {
        println!("  {}. {}", i + 1, choice);
    }
    if let Some(starter) = &question.starter_code {
        println!("{starter}");
    }
}

async fn print_notices(mut events: broadcast::Receiver<EventEnvelope>) {
    loop {
        let envelope = match events.recv().await {
            Ok(envelope) => envelope,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match envelope.event {
            SessionEvent::TimeWarning { remaining_secs, .. } => {
                println!("\n*** {} minute(s) remaining ***", remaining_secs / 60);
            }
            SessionEvent::TimeExpired => println!("\n*** Time is up ***"),
            SessionEvent::DraftSaveFailed { .. } => println!("(draft not saved, will retry)"),
            _ => {}
        }
    }
}

fn required_var<T: std::str::FromStr>(name: &str) -> anyhow::Result<T> {
    let raw =
        std::env::var(name).with_context(|| format!("{name} environment variable is required"))?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("{name} must be a valid integer"))
}
