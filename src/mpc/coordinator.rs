//! Threshold signing coordinator
//!
//! Drives one signing session per raw transaction:
//! `Idle -> Submitted -> Polling -> {Accepted, Rejected, TimedOut, Disagreed}`.
//! Polling runs on a fixed interval under an overall deadline; a session is
//! consumed when it reaches a terminal state and never reused.

use super::client::MpcApi;
use super::types::{SignContext, SignRequest, SignStatus, SUCCESS_STATUS};
use crate::config::MpcConfig;
use crate::error::{RouterError, RouterResult};
use crate::metrics;
use crate::swap::{BuildTxArgs, RawTx};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Lifecycle of a signing session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Submitted,
    Polling,
    Accepted,
    Rejected,
    TimedOut,
    Disagreed,
}

const VALID_TRANSITIONS: &[(SessionState, SessionState)] = &[
    (SessionState::Idle, SessionState::Submitted),
    (SessionState::Submitted, SessionState::Polling),
    (SessionState::Polling, SessionState::Accepted),
    (SessionState::Polling, SessionState::Rejected),
    (SessionState::Polling, SessionState::TimedOut),
    (SessionState::Polling, SessionState::Disagreed),
];

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Accepted
                | SessionState::Rejected
                | SessionState::TimedOut
                | SessionState::Disagreed
        )
    }

    fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Submitted => "submitted",
            SessionState::Polling => "polling",
            SessionState::Accepted => "accepted",
            SessionState::Rejected => "rejected",
            SessionState::TimedOut => "timed_out",
            SessionState::Disagreed => "disagreed",
        }
    }
}

/// One submitted raw transaction and its session key
#[derive(Debug)]
pub struct SigningSession {
    key: String,
    state: SessionState,
    started: Instant,
}

impl SigningSession {
    fn new() -> Self {
        Self {
            key: String::new(),
            state: SessionState::Idle,
            started: Instant::now(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, to: SessionState) -> RouterResult<()> {
        if !VALID_TRANSITIONS.contains(&(self.state, to)) {
            return Err(RouterError::InvalidStateTransition {
                from: format!("{:?}", self.state),
                to: format!("{:?}", to),
            });
        }
        debug!(key = %self.key, from = ?self.state, to = ?to, "Signing session transition");
        self.state = to;
        Ok(())
    }
}

/// Interpretation of one poll
#[derive(Debug, PartialEq, Eq)]
enum PollOutcome {
    Pending,
    Done(SessionState, RouterResult<Vec<String>>),
}

fn classify(status: SignStatus) -> PollOutcome {
    let name = status.status.clone();
    match name.as_str() {
        "Pending" => PollOutcome::Pending,
        SUCCESS_STATUS if status.rsv.is_empty() => PollOutcome::Done(
            SessionState::Rejected,
            Err(RouterError::SignStatusWrong {
                status: status.status,
                error: "success without signatures".into(),
            }),
        ),
        SUCCESS_STATUS => PollOutcome::Done(SessionState::Accepted, Ok(status.rsv)),
        "Failure" if status.has_disagree() => PollOutcome::Done(
            SessionState::Disagreed,
            Err(RouterError::SignStatusHasDisagree),
        ),
        "Failure" => PollOutcome::Done(SessionState::Rejected, Err(RouterError::SignStatusFailed)),
        "Timeout" => PollOutcome::Done(SessionState::TimedOut, Err(RouterError::SignStatusTimeout)),
        _ => PollOutcome::Done(
            SessionState::Rejected,
            Err(RouterError::SignStatusWrong {
                status: status.status,
                error: status.error,
            }),
        ),
    }
}

pub struct SigningCoordinator {
    api: Arc<dyn MpcApi>,
    group_id: String,
    threshold: String,
    mode: String,
    poll_interval: Duration,
    deadline: Duration,
}

impl SigningCoordinator {
    pub fn new(api: Arc<dyn MpcApi>, config: &MpcConfig) -> Self {
        Self {
            api,
            group_id: config.group_id.clone(),
            threshold: config.threshold.clone(),
            mode: config.mode.clone(),
            poll_interval: Duration::from_millis(config.sign_poll_interval_ms),
            deadline: Duration::from_secs(config.sign_deadline_secs),
        }
    }

    /// Sign request for a raw transaction; the context lets co-signers re-verify it
    pub fn sign_request(
        &self,
        raw: &RawTx,
        args: &BuildTxArgs,
        pub_key: &str,
    ) -> RouterResult<SignRequest> {
        let context = SignContext {
            args: args.clone(),
            raw: raw.clone(),
        };
        let context = serde_json::to_string(&context)
            .map_err(|e| RouterError::Internal(format!("encode sign context: {}", e)))?;
        Ok(SignRequest {
            key_type: raw.key_type.as_str().to_string(),
            group_id: self.group_id.clone(),
            thres_hold: self.threshold.clone(),
            mode: self.mode.clone(),
            pub_key: pub_key.to_string(),
            msg_hash: vec![raw.msg_hash_hex()],
            msg_context: vec![context],
            time_stamp: chrono::Utc::now().timestamp_millis().to_string(),
        })
    }

    /// Submit a raw transaction and wait for the quorum's signatures
    pub async fn sign_raw(
        &self,
        raw: &RawTx,
        args: &BuildTxArgs,
        pub_key: &str,
    ) -> RouterResult<Vec<String>> {
        let request = self.sign_request(raw, args, pub_key)?;
        self.sign(&request).await
    }

    /// Submit and poll to a terminal state
    pub async fn sign(&self, request: &SignRequest) -> RouterResult<Vec<String>> {
        let mut session = SigningSession::new();
        session.key = self.api.sign(request).await?;
        session.transition(SessionState::Submitted)?;
        info!(key = %session.key, msg_hash = ?request.msg_hash, "Sign request submitted");
        self.poll(session).await
    }

    /// Poll a submitted session; consumes it
    pub async fn poll(&self, mut session: SigningSession) -> RouterResult<Vec<String>> {
        session.transition(SessionState::Polling)?;

        let api = self.api.clone();
        let key = session.key.clone();
        let poll_interval = self.poll_interval;
        let polling = async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match api.get_sign_status(&key).await {
                    Ok(status) => match classify(status) {
                        PollOutcome::Pending => continue,
                        PollOutcome::Done(state, result) => return (state, result),
                    },
                    Err(e) => warn!(key = %key, error = %e, "Get sign status failed, retrying"),
                }
            }
        };

        let (state, result) = match tokio::time::timeout(self.deadline, polling).await {
            Ok(outcome) => outcome,
            Err(_) => (
                SessionState::TimedOut,
                Err(RouterError::SignDeadlineExceeded {
                    key: session.key.clone(),
                }),
            ),
        };

        session.transition(state)?;
        let elapsed = session.started.elapsed();
        metrics::record_sign_outcome(state.label(), elapsed.as_secs_f64());
        match &result {
            Ok(_) => info!(key = %session.key, ?elapsed, "Sign request accepted"),
            Err(e) => warn!(key = %session.key, state = state.label(), error = %e, "Sign request ended"),
        }
        result
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{status, FakeMpc};
    use super::*;
    use crate::mpc::types::SignReply;
    use crate::testing::settings;

    fn coordinator(api: FakeMpc, deadline_ms: u64) -> SigningCoordinator {
        let mut config = settings().mpc;
        config.sign_poll_interval_ms = 2;
        let mut coordinator = SigningCoordinator::new(Arc::new(api), &config);
        coordinator.deadline = Duration::from_millis(deadline_ms);
        coordinator
    }

    fn request() -> SignRequest {
        SignRequest {
            key_type: "EC256K1".into(),
            group_id: "group".into(),
            thres_hold: "2/3".into(),
            mode: String::new(),
            pub_key: "04ab".into(),
            msg_hash: vec!["0x01".into()],
            msg_context: vec!["{}".into()],
            time_stamp: "0".into(),
        }
    }

    #[test]
    fn test_transitions() {
        let mut session = SigningSession::new();
        assert!(session.transition(SessionState::Polling).is_err());
        session.transition(SessionState::Submitted).unwrap();
        session.transition(SessionState::Polling).unwrap();
        session.transition(SessionState::Disagreed).unwrap();
        assert!(session.state().is_terminal());
        assert!(session.transition(SessionState::Accepted).is_err());
    }

    #[tokio::test]
    async fn test_pending_then_success() {
        let api = FakeMpc::with_statuses(vec![
            Ok(status("Pending")),
            Err(RouterError::Mpc("connection reset".into())),
            Ok(SignStatus {
                status: "Success".into(),
                rsv: vec!["aa".into()],
                ..Default::default()
            }),
        ]);
        let rsv = coordinator(api, 1_000).sign(&request()).await.unwrap();
        assert_eq!(rsv, vec!["aa".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_with_disagree() {
        let api = FakeMpc::with_statuses(vec![Ok(SignStatus {
            status: "Failure".into(),
            all_reply: vec![
                SignReply {
                    status: "AGREE".into(),
                    ..Default::default()
                },
                SignReply {
                    status: "DISAGREE".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        })]);
        assert_eq!(
            coordinator(api, 1_000).sign(&request()).await,
            Err(RouterError::SignStatusHasDisagree)
        );
    }

    #[tokio::test]
    async fn test_plain_failure_and_timeout() {
        let api = FakeMpc::with_statuses(vec![Ok(status("Failure"))]);
        assert_eq!(
            coordinator(api, 1_000).sign(&request()).await,
            Err(RouterError::SignStatusFailed)
        );

        let api = FakeMpc::with_statuses(vec![Ok(status("Timeout"))]);
        let err = coordinator(api, 1_000).sign(&request()).await.unwrap_err();
        assert_eq!(err, RouterError::SignStatusTimeout);
        assert!(err.is_sign_timeout());
    }

    #[tokio::test]
    async fn test_unknown_status_preserved() {
        let api = FakeMpc::with_statuses(vec![Ok(SignStatus {
            status: "Weird".into(),
            error: "boom".into(),
            ..Default::default()
        })]);
        assert_eq!(
            coordinator(api, 1_000).sign(&request()).await,
            Err(RouterError::SignStatusWrong {
                status: "Weird".into(),
                error: "boom".into()
            })
        );
    }

    #[tokio::test]
    async fn test_local_deadline() {
        // Pending forever
        let err = coordinator(FakeMpc::default(), 30)
            .sign(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::SignDeadlineExceeded { .. }));
        assert!(err.is_sign_timeout());
    }
}
