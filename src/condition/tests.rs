use std::{sync::Arc, time::Duration};

use rstest::{fixture, rstest};
use tokio::io::duplex;

use super::*;
use crate::{codec::MessageCodec, connection::Connection, message::Message, session::Session};

#[fixture]
fn session() -> Session {
    let (a, _b) = duplex(64);
    Session::new(
        Connection::from_stream(a, None, MessageCodec::default()),
        Arc::default(),
        Arc::default(),
    )
}

#[rstest]
#[tokio::test]
async fn empty_open_set_allows_start(session: Session) {
    assert!(OpenConditions::new().evaluate(&session).await);
}

#[rstest]
#[tokio::test]
async fn open_set_requires_every_predicate(session: Session) {
    let conditions = OpenConditions::new();
    conditions.add_fn(|_| true);
    assert!(conditions.evaluate(&session).await);
    conditions.add_fn(|_| false);
    assert!(!conditions.evaluate(&session).await);
}

#[rstest]
#[case(EmptySet::Unsatisfied, false)]
#[case(EmptySet::Satisfied, true)]
#[tokio::test]
async fn empty_close_set_follows_policy(
    session: Session,
    #[case] policy: EmptySet,
    #[case] closes: bool,
) {
    assert_eq!(
        CloseConditions::with_empty_set(policy)
            .evaluate(&session)
            .await,
        closes
    );
}

#[rstest]
#[tokio::test]
async fn default_close_policy_keeps_session_open(session: Session) {
    let conditions = CloseConditions::new();
    assert_eq!(conditions.empty_set_policy(), EmptySet::Unsatisfied);
    assert!(!conditions.evaluate(&session).await);
}

#[rstest]
#[tokio::test]
async fn close_set_needs_any_predicate(session: Session) {
    let conditions = CloseConditions::new()
        .with(FnCondition::new(|_: &Session| false))
        .with(FnCondition::new(|_: &Session| true));
    assert!(conditions.evaluate(&session).await);
}

#[rstest]
#[tokio::test]
async fn populated_close_set_ignores_empty_policy(session: Session) {
    let conditions = CloseConditions::with_empty_set(EmptySet::Satisfied);
    conditions.add_fn(|_| false);
    assert!(!conditions.evaluate(&session).await);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn idle_timeout_fires_after_silence(session: Session) {
    let condition = IdleTimeout(Duration::from_secs(5));
    assert!(!condition.check(&session).await);
    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(condition.check(&session).await);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn max_age_fires_once_exceeded(session: Session) {
    let condition = MaxSessionAge(Duration::from_secs(60));
    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(!condition.check(&session).await);
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(condition.check(&session).await);
}

#[rstest]
#[case(0, true)]
#[case(1, false)]
#[tokio::test]
async fn message_limit_compares_processed_total(
    session: Session,
    #[case] limit: u64,
    #[case] closes: bool,
) {
    assert_eq!(MessageLimit(limit).check(&session).await, closes);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn message_rate_trips_on_burst(session: Session) {
    let condition = MessageRate::new(2);
    let message = Message::new("Text", "");
    condition.on_message(&session, &message);
    condition.on_message(&session, &message);
    assert!(!condition.check(&session).await);
    condition.on_message(&session, &message);
    assert!(condition.check(&session).await);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn message_rate_checks_take_no_tokens(session: Session) {
    let condition = MessageRate::new(1);
    for _ in 0..10 {
        assert!(!condition.check(&session).await);
    }
    condition.on_message(&session, &Message::new("Text", ""));
    assert!(!condition.check(&session).await);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn message_rate_refills_each_second(session: Session) {
    let condition = MessageRate::new(1);
    let message = Message::new("Text", "");
    condition.on_message(&session, &message);
    tokio::time::advance(Duration::from_millis(1100)).await;
    condition.on_message(&session, &message);
    assert!(!condition.check(&session).await);
}

#[rstest]
#[tokio::test]
async fn close_set_forwards_messages_to_predicates(session: Session) {
    let conditions = CloseConditions::new().with(MessageRate::new(1));
    let message = Message::new("Text", "");
    conditions.record(&session, &message);
    assert!(!conditions.evaluate(&session).await);
    conditions.record(&session, &message);
    assert!(conditions.evaluate(&session).await);
    assert!(conditions.evaluate(&session).await);
}
