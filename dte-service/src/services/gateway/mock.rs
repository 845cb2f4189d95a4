//! Scriptable in-process gateway for tests and local runs.

use super::{AuthorityOutcome, GatewayError, SignedPayload, Submission, TaxAuthorityGateway};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Accepts everything unless outcomes are queued with [`push_outcome`].
///
/// [`push_outcome`]: MockTaxAuthorityGateway::push_outcome
#[derive(Default)]
pub struct MockTaxAuthorityGateway {
    outcomes: Mutex<VecDeque<AuthorityOutcome>>,
    signing_failure: Mutex<Option<String>>,
    submissions: Mutex<Vec<Submission>>,
    signed: Mutex<Vec<serde_json::Value>>,
    delay_ms: AtomicU64,
    sign_delay_ms: AtomicU64,
    sign_count: AtomicU64,
    transmit_count: AtomicU64,
}

impl MockTaxAuthorityGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next transmission.
    pub fn push_outcome(&self, outcome: AuthorityOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(outcome);
    }

    pub fn reject_next(&self, reasons: &[&str]) {
        self.push_outcome(AuthorityOutcome::Rejected {
            reasons: reasons.iter().map(|r| r.to_string()).collect(),
        });
    }

    pub fn fail_next(&self, message: &str) {
        self.push_outcome(AuthorityOutcome::TransportError(message.to_string()));
    }

    /// Make every subsequent `sign` call fail (or succeed again with `None`).
    pub fn set_signing_failure(&self, message: Option<&str>) {
        *self
            .signing_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = message.map(str::to_string);
    }

    /// Delay every transmission, to exercise timeouts and cancellation.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delay every signing call.
    pub fn set_sign_delay(&self, delay: Duration) {
        self.sign_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Payloads handed to `sign`, in call order.
    pub fn signed_payloads(&self) -> Vec<serde_json::Value> {
        self.signed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn sign_count(&self) -> u64 {
        self.sign_count.load(Ordering::SeqCst)
    }

    pub fn transmit_count(&self) -> u64 {
        self.transmit_count.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_outcome(&self, submission: &Submission) -> AuthorityOutcome {
        let queued = self
            .outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        queued.unwrap_or_else(|| AuthorityOutcome::Accepted {
            reception_stamp: format!(
                "MOCK{}",
                submission.generation_code.simple().to_string().to_uppercase()
            ),
            processed_at: Utc::now(),
            observations: Vec::new(),
        })
    }
}

#[async_trait]
impl TaxAuthorityGateway for MockTaxAuthorityGateway {
    async fn sign(&self, payload: &serde_json::Value) -> Result<SignedPayload, GatewayError> {
        let count = self.sign_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.signed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(payload.clone());

        let delay = self.sign_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let failure = self
            .signing_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(message) = failure {
            return Err(GatewayError::Signing(message));
        }

        tracing::info!(count, "[MOCK] Payload would be signed");

        Ok(SignedPayload(format!(
            "mock.{}.{}",
            payload.as_object().map(|o| o.len()).unwrap_or(0),
            count
        )))
    }

    async fn transmit(&self, submission: &Submission) -> AuthorityOutcome {
        self.transmit_count.fetch_add(1, Ordering::SeqCst);
        self.submissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(submission.clone());
        let outcome = self.next_outcome(submission);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        tracing::info!(
            generation_code = %submission.generation_code,
            outcome = outcome.label(),
            "[MOCK] Submission resolved"
        );
        outcome
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        Ok(())
    }
}
