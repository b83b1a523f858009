//! Scripted in-process game: one host, three players, in-memory store.
//!
//! Runs the full choreography (join → start → timed questions → reveal →
//! leaderboard → game end) against the in-memory backend and logs what each
//! party observes. Useful for eyeballing the protocol without a UI.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use quiz_pulse_core::{
    bus::EventBus,
    config::EngineConfig,
    dto::{
        events::{EVENT_GAME_ENDED, EVENT_GAME_STARTED, EVENT_NEXT_QUESTION},
        game::JoinRequest,
    },
    host::HostController,
    player::{PlayerClient, precheck_join},
    quiz::{QuestionDefinition, QuizDefinition, build_quiz},
    store::{QuizStore, memory::MemoryQuizStore},
};
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Keep the reveal short so the scripted run stays snappy.
    let mut config = EngineConfig::load();
    config.reveal_hold = Duration::from_secs(1);

    let memory = MemoryQuizStore::new();
    let host_id = Uuid::new_v4();
    let (quiz, questions) = build_quiz(host_id, demo_quiz()).context("building demo quiz")?;
    let quiz_id = quiz.id;
    memory.seed_quiz(quiz, questions);

    let store: Arc<dyn QuizStore> = Arc::new(memory);
    let bus = EventBus::new(config.bus_capacity);

    let host =
        HostController::create_or_resume(store.clone(), bus.clone(), config, quiz_id, host_id)
            .await
            .context("bootstrapping session")?;
    let summary = host.summary().await?;
    info!(pin = %summary.pin, quiz = %summary.quiz_title, "session ready; players joining");

    let mut host_events = host.events();

    // Authoritative roster feed, the same way a host screen tallies joins
    // and score changes without trusting broadcasts.
    let mut roster = host.watch_players().await?;
    tokio::spawn(async move {
        while let Ok(change) = roster.recv().await {
            info!(
                nickname = %change.player.nickname,
                total = change.player.total_score,
                "roster change"
            );
        }
    });

    // (nickname, thinking delay, whether they pick the right answer)
    let scripts = [
        ("ada", 200u64, true),
        ("grace", 900u64, true),
        ("edsger", 500u64, false),
    ];

    let mut tasks = Vec::new();
    for (nickname, delay_ms, plays_well) in scripts {
        let request = JoinRequest {
            pin: host.pin().to_string(),
            nickname: nickname.to_string(),
        };
        precheck_join(&store, &request)
            .await
            .with_context(|| format!("prechecking {nickname}"))?;
        let player = PlayerClient::join(store.clone(), bus.clone(), request)
            .await
            .with_context(|| format!("joining as {nickname}"))?;

        tasks.push(tokio::spawn(play_script(player, delay_ms, plays_well)));
    }

    host.start().await.context("starting game")?;

    // The countdown drives the session to completion on its own.
    loop {
        match host_events.recv().await {
            Ok(message) if message.event == EVENT_GAME_ENDED => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    for task in tasks {
        task.await??;
    }

    for entry in host.standings().await? {
        info!(
            rank = entry.rank,
            nickname = %entry.nickname,
            score = entry.total_score,
            "final standing"
        );
    }

    Ok(())
}

/// Answer every question after a fixed thinking delay.
async fn play_script(
    mut player: PlayerClient,
    delay_ms: u64,
    plays_well: bool,
) -> anyhow::Result<()> {
    while !player.is_game_over() {
        let Some(message) = player.next_message().await? else {
            continue;
        };

        if message.event == EVENT_GAME_STARTED || message.event == EVENT_NEXT_QUESTION {
            let Some(question) = player.current_question().cloned() else {
                continue;
            };
            let pick = if plays_well {
                question.correct_answer.clone()
            } else {
                question
                    .options
                    .iter()
                    .find(|option| **option != question.correct_answer)
                    .cloned()
                    .unwrap_or_else(|| question.correct_answer.clone())
            };

            sleep(Duration::from_millis(delay_ms)).await;
            if let Some(receipt) = player.submit_answer(&pick).await? {
                info!(
                    nickname = %player.player().nickname,
                    question = question.index + 1,
                    correct = receipt.is_correct,
                    score = receipt.score,
                    "answer submitted"
                );
            }
        }
    }

    info!(
        nickname = %player.player().nickname,
        total = player.total_score(),
        "game over for player"
    );
    Ok(())
}

fn demo_quiz() -> QuizDefinition {
    QuizDefinition {
        title: "Systems pot-pourri".into(),
        has_timer: true,
        question_timer_seconds: 3,
        questions: vec![
            QuestionDefinition {
                text: "Which consistency does the session bus provide?".into(),
                options: vec![
                    "Exactly-once, ordered".into(),
                    "At-most-once, best-effort".into(),
                ],
                correct_answer: "At-most-once, best-effort".into(),
                explanation: "Missed broadcasts are recovered from the store.".into(),
            },
            QuestionDefinition {
                text: "Who owns the session status?".into(),
                options: vec!["Any player".into(), "The host".into(), "The bus".into()],
                correct_answer: "The host".into(),
                explanation: "A single writer avoids write-write conflicts.".into(),
            },
            QuestionDefinition {
                text: "What does an instantaneous correct answer score?".into(),
                options: vec!["100".into(), "550".into(), "1000".into()],
                correct_answer: "1000".into(),
                explanation: "Scores decay linearly from 1000 to 100.".into(),
            },
        ],
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
