//! Quiz ingestion and loading.
//!
//! Builders validate author input into store entities; [`LoadedQuiz`] is the
//! runtime aggregate hosts drive a session from. A quiz is immutable while a
//! session of it is running.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::{
    error::GameError,
    store::{
        QuizStore,
        models::{QuestionEntity, QuizEntity},
    },
};

const MIN_OPTIONS: usize = 2;
const MAX_OPTIONS: usize = 6;

/// Author-side definition of a question.
#[derive(Debug, Clone)]
pub struct QuestionDefinition {
    /// Question text.
    pub text: String,
    /// Answer options in display order.
    pub options: Vec<String>,
    /// The correct option; must be one of `options`.
    pub correct_answer: String,
    /// Explanation revealed after the question closes.
    pub explanation: String,
}

/// Author-side definition of a quiz.
#[derive(Debug, Clone)]
pub struct QuizDefinition {
    /// Display title.
    pub title: String,
    /// Whether questions run against a countdown.
    pub has_timer: bool,
    /// Per-question budget in seconds when the timer is enabled.
    pub question_timer_seconds: u32,
    /// Questions in play order.
    pub questions: Vec<QuestionDefinition>,
}

/// Validate a definition and build the rows to persist. Question order is
/// assigned densely from the input sequence.
pub fn build_quiz(
    host_id: Uuid,
    definition: QuizDefinition,
) -> Result<(QuizEntity, Vec<QuestionEntity>), GameError> {
    let QuizDefinition {
        title,
        has_timer,
        question_timer_seconds,
        questions,
    } = definition;

    if title.trim().is_empty() {
        return Err(GameError::InvalidInput("quiz title must not be empty".into()));
    }

    if questions.is_empty() {
        return Err(GameError::InvalidInput(
            "a quiz requires at least one question".into(),
        ));
    }

    if has_timer && question_timer_seconds == 0 {
        return Err(GameError::InvalidInput(
            "question timer must be strictly positive".into(),
        ));
    }

    let quiz_id = Uuid::new_v4();
    let questions = questions
        .into_iter()
        .enumerate()
        .map(|(index, question)| build_question(quiz_id, index, question))
        .collect::<Result<Vec<_>, _>>()?;

    let quiz = QuizEntity {
        id: quiz_id,
        host_id,
        title,
        has_timer,
        question_timer_seconds,
        completed: false,
    };

    Ok((quiz, questions))
}

fn build_question(
    quiz_id: Uuid,
    index: usize,
    question: QuestionDefinition,
) -> Result<QuestionEntity, GameError> {
    let QuestionDefinition {
        text,
        options,
        correct_answer,
        explanation,
    } = question;

    if text.trim().is_empty() {
        return Err(GameError::InvalidInput(format!(
            "question {index} has no text"
        )));
    }

    if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&options.len()) {
        return Err(GameError::InvalidInput(format!(
            "question {index} must offer between {MIN_OPTIONS} and {MAX_OPTIONS} options"
        )));
    }

    let mut seen = HashSet::new();
    for option in &options {
        if !seen.insert(option.as_str()) {
            return Err(GameError::InvalidInput(format!(
                "question {index} has duplicate option `{option}`"
            )));
        }
    }

    if !options.contains(&correct_answer) {
        return Err(GameError::InvalidInput(format!(
            "question {index} correct answer is not among its options"
        )));
    }

    Ok(QuestionEntity {
        id: Uuid::new_v4(),
        quiz_id,
        text,
        options,
        correct_answer,
        explanation,
        order: index as u32,
    })
}

/// A quiz and its questions, loaded once at session bootstrap.
#[derive(Debug, Clone)]
pub struct LoadedQuiz {
    /// The quiz row.
    pub quiz: QuizEntity,
    /// Questions ordered by their `order` column.
    pub questions: Vec<QuestionEntity>,
}

impl LoadedQuiz {
    /// Fetch a quiz and its questions, failing with `NotFound` when the quiz
    /// is missing or has no questions to serve.
    pub async fn load(store: &Arc<dyn QuizStore>, quiz_id: Uuid) -> Result<Self, GameError> {
        let Some(quiz) = store.find_quiz(quiz_id).await? else {
            return Err(GameError::NotFound(format!("quiz `{quiz_id}` not found")));
        };

        let questions = store.find_questions(quiz_id).await?;
        if questions.is_empty() {
            return Err(GameError::NotFound(format!(
                "quiz `{quiz_id}` has no questions"
            )));
        }

        Ok(Self { quiz, questions })
    }

    /// Time budget in seconds broadcast with each question, when timed.
    pub fn time_budget_seconds(&self) -> Option<u32> {
        self.quiz
            .has_timer
            .then_some(self.quiz.question_timer_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> QuizDefinition {
        QuizDefinition {
            title: "Capitals".into(),
            has_timer: true,
            question_timer_seconds: 20,
            questions: vec![QuestionDefinition {
                text: "Capital of France?".into(),
                options: vec!["Paris".into(), "Lyon".into()],
                correct_answer: "Paris".into(),
                explanation: "Paris has been the capital since 508.".into(),
            }],
        }
    }

    #[test]
    fn builds_entities_with_dense_order() {
        let mut def = definition();
        def.questions.push(QuestionDefinition {
            text: "Capital of Japan?".into(),
            options: vec!["Kyoto".into(), "Tokyo".into(), "Osaka".into()],
            correct_answer: "Tokyo".into(),
            explanation: String::new(),
        });

        let (quiz, questions) = build_quiz(Uuid::new_v4(), def).unwrap();
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].order, 0);
        assert_eq!(questions[1].order, 1);
        assert!(questions.iter().all(|q| q.quiz_id == quiz.id));
    }

    #[test]
    fn rejects_correct_answer_outside_options() {
        let mut def = definition();
        def.questions[0].correct_answer = "Marseille".into();
        assert!(matches!(
            build_quiz(Uuid::new_v4(), def),
            Err(GameError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_duplicate_options() {
        let mut def = definition();
        def.questions[0].options = vec!["Paris".into(), "Paris".into()];
        assert!(build_quiz(Uuid::new_v4(), def).is_err());
    }

    #[test]
    fn rejects_single_option_questions() {
        let mut def = definition();
        def.questions[0].options = vec!["Paris".into()];
        def.questions[0].correct_answer = "Paris".into();
        assert!(build_quiz(Uuid::new_v4(), def).is_err());
    }

    #[test]
    fn rejects_empty_quizzes_and_zero_timers() {
        let mut def = definition();
        def.questions.clear();
        assert!(build_quiz(Uuid::new_v4(), def).is_err());

        let mut def = definition();
        def.question_timer_seconds = 0;
        assert!(build_quiz(Uuid::new_v4(), def).is_err());
    }
}
