//! Admission-time validation.
//!
//! Validators look at request attributes and either admit or deny. The two
//! composition pieces here mirror how an admission chain is wired: a
//! [`ReadyGate`] in front of a policy evaluator holds early requests until
//! the evaluator's mirror has synced, and a [`MultiValidator`] folds several
//! validators into one.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{sleep, Instant};

/// How often [`ReadyGate`] re-checks an unsynced evaluator.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long a request may wait for the evaluator's initial sync.
const READY_WINDOW: Duration = Duration::from_secs(1);

/// The request verb a validator is asked about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

/// A validator rejected the request.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("denied: {reason}")]
pub struct Denial {
    pub reason: String,
}

impl Denial {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Validates admission requests carrying attributes of type `A`.
#[async_trait]
pub trait Validator<A>: Send + Sync {
    /// Whether this validator wants to see requests with this verb.
    fn handles(&self, operation: Operation) -> bool;

    async fn validate(&self, operation: Operation, attributes: &A) -> Result<(), Denial>;
}

/// Evaluates requests against policy mirrored from the cluster.
#[async_trait]
pub trait PolicyEvaluator<A>: Send + Sync {
    /// Whether the initial policy listing has been mirrored.
    fn has_synced(&self) -> bool;

    async fn evaluate(&self, attributes: &A) -> Result<(), Denial>;
}

/// Holds requests briefly while the policy evaluator finishes its initial
/// sync, then denies if it still is not ready.
///
/// An unsynced evaluator is never consulted: judging a request against a
/// half-mirrored policy set could admit what the full set would reject.
pub struct ReadyGate<P> {
    evaluator: P,
    poll_interval: Duration,
    ready_window: Duration,
}

impl<P> ReadyGate<P> {
    pub fn new(evaluator: P) -> Self {
        Self {
            evaluator,
            poll_interval: READY_POLL_INTERVAL,
            ready_window: READY_WINDOW,
        }
    }
}

#[async_trait]
impl<A, P> Validator<A> for ReadyGate<P>
where
    A: Send + Sync,
    P: PolicyEvaluator<A>,
{
    fn handles(&self, _operation: Operation) -> bool {
        true
    }

    async fn validate(&self, _operation: Operation, attributes: &A) -> Result<(), Denial> {
        let deadline = Instant::now() + self.ready_window;
        while !self.evaluator.has_synced() {
            if Instant::now() >= deadline {
                return Err(Denial::new("not yet ready to handle request"));
            }
            sleep(self.poll_interval).await;
        }
        self.evaluator.evaluate(attributes).await
    }
}

/// Runs several validators as one.
///
/// `handles` is satisfied if any member handles the verb; `validate`
/// consults only the members that do, in order, with the first denial
/// winning.
pub struct MultiValidator<A> {
    validators: Vec<Box<dyn Validator<A>>>,
}

impl<A> MultiValidator<A> {
    pub fn new() -> Self {
        Self {
            validators: Vec::new(),
        }
    }

    pub fn with(mut self, validator: impl Validator<A> + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }
}

impl<A> Default for MultiValidator<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<A: Send + Sync> Validator<A> for MultiValidator<A> {
    fn handles(&self, operation: Operation) -> bool {
        self.validators
            .iter()
            .any(|validator| validator.handles(operation))
    }

    async fn validate(&self, operation: Operation, attributes: &A) -> Result<(), Denial> {
        for validator in &self.validators {
            if !validator.handles(operation) {
                continue;
            }
            validator.validate(operation, attributes).await?;
        }
        Ok(())
    }
}
