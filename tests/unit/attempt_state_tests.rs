//! Attempt state transitions.

use artemis_bot::orchestrator::attempt::score_from_frame;
use artemis_bot::orchestrator::{Action, AttemptState, RESULT_TOPIC};
use artemis_bot::sockjs::{Command, Frame};
use artemis_bot::AppError;

fn result_frame(body: serde_json::Value) -> Frame {
    let mut frame = Frame::new(Command::Message, [("destination", RESULT_TOPIC)]);
    frame.body = body.as_object().cloned();
    frame
}

#[test]
fn fresh_state_expects_nothing() {
    let state = AttemptState::new(100, 40);
    assert!(!state.expecting_result);
    assert!(!state.is_exiting);
    assert_eq!(state.current_percentage, 40);
}

#[test]
fn first_submission_starts_waiting_for_a_result() {
    let mut state = AttemptState::new(100, 0);
    assert_eq!(state.on_submission(), Action::Wait);
    assert!(state.expecting_result);
}

#[test]
fn second_submission_without_result_retriggers() {
    let mut state = AttemptState::new(100, 0);
    state.on_submission();
    assert_eq!(state.on_submission(), Action::RetriggerNow);
    assert!(state.expecting_result, "still waiting for a result");
}

#[test]
fn result_below_target_retriggers_after_delay() {
    let mut state = AttemptState::new(100, 0);
    state.on_submission();
    assert_eq!(state.on_result(60), Action::RetriggerLater);
    assert!(!state.expecting_result);
    assert!(!state.is_exiting);
    assert_eq!(state.current_percentage, 60);
}

#[test]
fn result_at_target_exits() {
    let mut state = AttemptState::new(100, 0);
    state.on_submission();
    assert_eq!(state.on_result(100), Action::Exit);
    assert!(state.is_exiting);
    assert_eq!(state.current_percentage, 100);
}

#[test]
fn result_above_target_exits() {
    let mut state = AttemptState::new(80, 0);
    assert_eq!(state.on_result(95), Action::Exit);
    assert!(state.is_exiting);
}

#[test]
fn submission_after_result_is_a_new_build() {
    let mut state = AttemptState::new(100, 0);
    state.on_submission();
    state.on_result(10);
    assert_eq!(state.on_submission(), Action::Wait);
}

#[test]
fn unreadable_result_clears_expectation() {
    let mut state = AttemptState::new(100, 30);
    state.on_submission();
    assert_eq!(state.on_unreadable_result(), Action::RetriggerLater);
    assert!(!state.expecting_result);
    assert_eq!(state.current_percentage, 30);
}

#[test]
fn is_satisfied_compares_current_with_desired() {
    assert!(AttemptState::new(80, 80).is_satisfied());
    assert!(!AttemptState::new(80, 79).is_satisfied());
}

#[test]
fn score_is_truncated_toward_zero() {
    assert_eq!(score_from_frame(&result_frame(serde_json::json!({"score": 79.99}))).ok(), Some(79));
    assert_eq!(score_from_frame(&result_frame(serde_json::json!({"score": 100}))).ok(), Some(100));
    assert_eq!(score_from_frame(&result_frame(serde_json::json!({"score": -3.5}))).ok(), Some(0));
}

#[test]
fn missing_or_non_numeric_score_is_a_parse_error() {
    let missing = result_frame(serde_json::json!({"successful": true}));
    let text = result_frame(serde_json::json!({"score": "80"}));
    let no_body = Frame::new(Command::Message, [("destination", RESULT_TOPIC)]);

    for frame in [missing, text, no_body] {
        assert!(matches!(score_from_frame(&frame), Err(AppError::Parse(_))));
    }
}
