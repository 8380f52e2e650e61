use futures::future::BoxFuture;
use seatflow_core::{PublishError, PublishPort};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// `(topic, key, payload)` of one publish call.
pub type Publication = (String, String, Vec<u8>);

#[derive(Debug, Default)]
struct Script {
    outcomes: VecDeque<Result<(), PublishError>>,
    attempts: Vec<Publication>,
    published: Vec<Publication>,
}

/// Publish target double.
///
/// Scripted outcomes are consumed in order; afterwards every publish
/// succeeds.
#[derive(Debug, Default)]
pub struct ScriptedPublishPort {
    script: Mutex<Script>,
}

impl ScriptedPublishPort {
    /// A target that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next unscripted publish.
    pub fn script(&self, outcome: Result<(), PublishError>) {
        self.with(|s| s.outcomes.push_back(outcome));
    }

    /// Fail the next `n` publishes transiently.
    pub fn fail_transiently(&self, n: usize) {
        self.with(|s| {
            s.outcomes.extend(
                std::iter::repeat_with(|| {
                    Err(PublishError::TransientFailure("broker unavailable".to_string()))
                })
                .take(n),
            );
        });
    }

    /// Successful publications, in delivery order.
    #[must_use]
    pub fn published(&self) -> Vec<Publication> {
        self.with(|s| s.published.clone())
    }

    /// Number of publish calls, successful or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.with(|s| s.attempts.len())
    }

    fn with<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut script)
    }
}

impl PublishPort for ScriptedPublishPort {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), PublishError>> {
        let publication = (topic.to_string(), key.to_string(), payload);
        let outcome = self.with(|s| {
            s.attempts.push(publication.clone());
            let outcome = s.outcomes.pop_front().unwrap_or(Ok(()));
            if outcome.is_ok() {
                s.published.push(publication);
            }
            outcome
        });
        Box::pin(async move { outcome })
    }
}
