//! The relayer.
//!
//! Drives ready attestations onto their destination chains. Every cycle it
//! fetches the ready list, skips messages the destination already reports
//! received, and submits the rest. A rejection with `AlreadyProcessed` means
//! another relayer won the race and counts as success, so any number of
//! relayers can share one attestation pool without coordinating.
//!
//! Failed submissions are retried with exponential backoff up to
//! [`RelayerConfig::max_attempts`]; after that the message is parked in
//! [`Relayer::failures`] until an operator calls [`Relayer::retry_failed`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use alloy_primitives::FixedBytes;
use bon::bon;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::RelayerConfig;
use crate::error::{BridgeError, Result};
use crate::protocol::{Attestation, Domain};
use crate::providers::TokioClock;
use crate::spans;
use crate::traits::{AttestationSource, Clock, DestinationChain, SubmissionReceipt};

/// How a relayed attestation ended up applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// This relayer's submission minted the funds
    Submitted(SubmissionReceipt),
    /// The destination already reported the message received
    AlreadyReceived,
    /// The submission lost a race and was rejected with `AlreadyProcessed`
    AlreadyProcessed,
}

/// A message that exhausted its retry budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayFailure {
    pub message_hash: FixedBytes<32>,
    pub source_domain: Domain,
    pub destination_domain: Domain,
    pub nonce: u64,
    pub attempts: u32,
    pub last_error: String,
}

/// Relayer counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayerStats {
    pub cycles: u64,
    pub submitted: u64,
    pub already_received: u64,
    pub already_processed: u64,
    pub failed: u64,
    pub attempts: u64,
    pub source_failures: u64,
    /// Messages currently parked after exhausting their retries
    pub parked: usize,
}

#[derive(Debug, Default)]
struct Counters {
    cycles: AtomicU64,
    submitted: AtomicU64,
    already_received: AtomicU64,
    already_processed: AtomicU64,
    failed: AtomicU64,
    attempts: AtomicU64,
    source_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Summary of one relay cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub ready: usize,
    pub relayed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Submits ready attestations to destination chains.
pub struct Relayer {
    source: Arc<dyn AttestationSource>,
    destinations: HashMap<Domain, Arc<dyn DestinationChain>>,
    config: RelayerConfig,
    clock: Arc<dyn Clock>,
    failures: Mutex<HashMap<FixedBytes<32>, RelayFailure>>,
    counters: Counters,
}

impl std::fmt::Debug for Relayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut domains: Vec<&Domain> = self.destinations.keys().collect();
        domains.sort();
        f.debug_struct("Relayer")
            .field("destinations", &domains)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[bon]
impl Relayer {
    #[builder]
    pub fn new(
        source: Arc<dyn AttestationSource>,
        destinations: HashMap<Domain, Arc<dyn DestinationChain>>,
        #[builder(default)] config: RelayerConfig,
        clock: Option<Arc<dyn Clock>>,
    ) -> Self {
        Self {
            source,
            destinations,
            config,
            clock: clock.unwrap_or_else(|| Arc::new(TokioClock::new())),
            failures: Mutex::default(),
            counters: Counters::default(),
        }
    }
}

impl Relayer {
    pub fn config(&self) -> &RelayerConfig {
        &self.config
    }

    async fn with_timeout<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        let limit = self.config.call_timeout();
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| BridgeError::Timeout {
                seconds: limit.as_secs(),
            })?
    }

    fn is_parked(&self, message_hash: &FixedBytes<32>) -> bool {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(message_hash)
    }

    /// One submission attempt: check, then submit.
    async fn try_relay(
        &self,
        destination: &dyn DestinationChain,
        attestation: &Attestation,
    ) -> Result<RelayOutcome> {
        if self
            .with_timeout(destination.is_message_received(attestation.message_hash))
            .await?
        {
            return Ok(RelayOutcome::AlreadyReceived);
        }

        let signatures = attestation.signature_bytes();
        match self
            .with_timeout(destination.receive_message(&attestation.message, &signatures))
            .await
        {
            Ok(receipt) => Ok(RelayOutcome::Submitted(receipt)),
            Err(BridgeError::AlreadyProcessed { .. }) => Ok(RelayOutcome::AlreadyProcessed),
            Err(e) => Err(e),
        }
    }

    /// Relays one attestation, retrying with backoff.
    ///
    /// # Errors
    ///
    /// `UnknownDomain` when no destination chain is configured for the
    /// message, `RelayFailed` once every attempt failed. Either way the
    /// message is parked.
    pub async fn relay(&self, attestation: &Attestation) -> Result<RelayOutcome> {
        let destination_domain = attestation.destination_domain();
        let Some(destination) = self.destinations.get(&destination_domain) else {
            let err = BridgeError::UnknownDomain(destination_domain);
            self.park(attestation, 0, &err);
            return Err(err);
        };

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            let span = spans::relay_attestation(
                &attestation.message_hash,
                attestation.source_domain(),
                destination_domain,
                attempt,
            );
            bump(&self.counters.attempts);

            let result = self
                .try_relay(destination.as_ref(), attestation)
                .instrument(span.clone())
                .await;
            match result {
                Ok(outcome) => {
                    self.record_success(attestation, &outcome, attempt);
                    return Ok(outcome);
                }
                Err(e) => {
                    span.in_scope(|| spans::record_error(&e));
                    warn!(
                        message_hash = %attestation.message_hash,
                        nonce = attestation.nonce(),
                        attempt = attempt,
                        max_attempts = max_attempts,
                        retryable = e.is_retryable(),
                        error = %e,
                        event = "relay_attempt_failed"
                    );
                    last_error = Some(e);
                }
            }

            if attempt < max_attempts {
                self.clock.sleep(self.config.backoff_delay(attempt)).await;
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        let err = BridgeError::RelayFailed {
            attempts: max_attempts,
            reason,
        };
        self.park(attestation, max_attempts, &err);
        Err(err)
    }

    fn record_success(&self, attestation: &Attestation, outcome: &RelayOutcome, attempt: u32) {
        let (counter, kind) = match outcome {
            RelayOutcome::Submitted(_) => (&self.counters.submitted, "submitted"),
            RelayOutcome::AlreadyReceived => (&self.counters.already_received, "already_received"),
            RelayOutcome::AlreadyProcessed => {
                (&self.counters.already_processed, "already_processed")
            }
        };
        bump(counter);
        info!(
            message_hash = %attestation.message_hash,
            source_domain = %attestation.source_domain(),
            destination_domain = %attestation.destination_domain(),
            nonce = attestation.nonce(),
            attempt = attempt,
            outcome = kind,
            event = "attestation_relayed"
        );
    }

    fn park(&self, attestation: &Attestation, attempts: u32, err: &BridgeError) {
        bump(&self.counters.failed);
        error!(
            message_hash = %attestation.message_hash,
            source_domain = %attestation.source_domain(),
            destination_domain = %attestation.destination_domain(),
            nonce = attestation.nonce(),
            attempts = attempts,
            error = %err,
            event = "relay_failed_permanently"
        );
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                attestation.message_hash,
                RelayFailure {
                    message_hash: attestation.message_hash,
                    source_domain: attestation.source_domain(),
                    destination_domain: attestation.destination_domain(),
                    nonce: attestation.nonce(),
                    attempts,
                    last_error: err.to_string(),
                },
            );
    }

    /// Fetches the ready list once and relays everything not parked.
    pub async fn relay_once(&self) -> Result<CycleReport> {
        bump(&self.counters.cycles);
        let ready = match self.with_timeout(self.source.ready_attestations()).await {
            Ok(ready) => ready,
            Err(e) => {
                bump(&self.counters.source_failures);
                warn!(error = %e, event = "ready_list_fetch_failed");
                return Err(e);
            }
        };

        let mut report = CycleReport {
            ready: ready.len(),
            ..CycleReport::default()
        };
        for attestation in &ready {
            if !attestation.status.is_relayable() || self.is_parked(&attestation.message_hash) {
                report.skipped += 1;
                continue;
            }
            match self.relay(attestation).await {
                Ok(_) => report.relayed += 1,
                Err(_) => report.failed += 1,
            }
        }

        debug!(
            ready = report.ready,
            relayed = report.relayed,
            failed = report.failed,
            skipped = report.skipped,
            event = "relay_cycle_complete"
        );
        Ok(report)
    }

    /// Relays on every poll interval until `shutdown` flips to `true`.
    ///
    /// Shutdown cancels an in-flight cycle. Its message was not recorded as
    /// relayed or failed, so the next run picks it up again.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            destinations = self.destinations.len(),
            poll_interval_secs = self.config.poll_interval_secs,
            max_attempts = self.config.max_attempts,
            event = "relayer_started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = self.relay_once() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(event = "relay_cycle_cancelled");
                        break;
                    }
                }
            }
            tokio::select! {
                _ = self.clock.sleep(self.config.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(event = "relayer_stopped");
    }

    /// Messages parked after exhausting their retries, by source and nonce
    pub fn failures(&self) -> Vec<RelayFailure> {
        let mut failures: Vec<RelayFailure> = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        failures.sort_by_key(|f| (f.source_domain, f.nonce));
        failures
    }

    /// Unparks a failed message so the next cycle tries it again.
    /// Returns whether it was parked.
    pub fn retry_failed(&self, message_hash: FixedBytes<32>) -> bool {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&message_hash)
            .is_some()
    }

    pub fn stats(&self) -> RelayerStats {
        let c = &self.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        RelayerStats {
            cycles: load(&c.cycles),
            submitted: load(&c.submitted),
            already_received: load(&c.already_received),
            already_processed: load(&c.already_processed),
            failed: load(&c.failed),
            attempts: load(&c.attempts),
            source_failures: load(&c.source_failures),
            parked: self
                .failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalChain;
    use crate::protocol::{AttestationStatus, AttesterSignature, Message};
    use crate::testing::{AttesterKeys, FakeAttestationSource, FakeClock, FlakyDestination};
    use alloy_primitives::{Address, U256};
    use rstest::rstest;
    use std::time::Duration;

    const A: Domain = Domain::new(0);
    const B: Domain = Domain::new(1);

    fn owner() -> Address {
        Address::repeat_byte(0xee)
    }

    async fn destination(keys: &AttesterKeys, threshold: u32) -> Arc<LocalChain> {
        let chain = Arc::new(LocalChain::new(B, owner()));
        for identity in keys.identities() {
            chain.add_attester(owner(), B, identity).await.unwrap();
        }
        chain.set_threshold(owner(), B, threshold).await.unwrap();
        chain
    }

    fn ready_attestation(keys: &AttesterKeys, nonce: u64, signers: &[usize]) -> Attestation {
        let message = Message::new(A, B, nonce, vec![1u8; 20], vec![2u8; 20], U256::from(25u64));
        let mut attestation = Attestation::new(message, signers.len() as u32, 1);
        for &i in signers {
            attestation.signatures.push(AttesterSignature {
                attester: keys.identity(i),
                signature: keys.sign_one(attestation.message_hash, i),
            });
        }
        attestation.status = AttestationStatus::Ready;
        attestation
    }

    fn relayer(
        source: &FakeAttestationSource,
        destination: Arc<dyn DestinationChain>,
        clock: &FakeClock,
    ) -> Relayer {
        Relayer::builder()
            .source(Arc::new(source.clone()) as Arc<dyn AttestationSource>)
            .destinations(HashMap::from([(B, destination)]))
            .config(RelayerConfig::default().with_call_timeout_secs(1))
            .clock(Arc::new(clock.clone()) as Arc<dyn Clock>)
            .build()
    }

    #[tokio::test]
    async fn test_relays_and_mints() {
        let keys = AttesterKeys::generate(2);
        let chain = destination(&keys, 2).await;
        let source = FakeAttestationSource::new();
        source.push(ready_attestation(&keys, 0, &[0, 1]));
        let relayer = relayer(&source, chain.clone(), &FakeClock::new());

        let report = relayer.relay_once().await.unwrap();
        assert_eq!(report.relayed, 1);
        assert_eq!(chain.balance_of(&[2u8; 20]).await, U256::from(25u64));

        // The service has not reconciled yet; the next cycle just reads
        relayer.relay_once().await.unwrap();
        let stats = relayer.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.already_received, 1);
        assert_eq!(chain.received_events().await.len(), 1);
    }

    #[rstest]
    #[case::one_failure(1, 2, vec![Duration::from_secs(1)])]
    #[case::three_failures(3, 4, vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)])]
    #[tokio::test]
    async fn test_transient_failures_back_off_then_succeed(
        #[case] failures: u32,
        #[case] expected_attempts: usize,
        #[case] expected_sleeps: Vec<Duration>,
    ) {
        let keys = AttesterKeys::generate(1);
        let chain = destination(&keys, 1).await;
        let flaky = Arc::new(FlakyDestination::new(chain.clone()));
        flaky.fail_next_submissions(failures);
        let clock = FakeClock::new();
        let relayer = relayer(&FakeAttestationSource::new(), flaky.clone(), &clock);

        let outcome = relayer.relay(&ready_attestation(&keys, 0, &[0])).await.unwrap();
        assert!(matches!(outcome, RelayOutcome::Submitted(_)));
        assert_eq!(flaky.attempts(), expected_attempts);
        assert_eq!(clock.sleeps(), expected_sleeps);
        assert_eq!(chain.received_events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_park_the_message() {
        let keys = AttesterKeys::generate(1);
        let chain = destination(&keys, 1).await;
        let flaky = Arc::new(FlakyDestination::new(chain.clone()));
        flaky.fail_next_submissions(100);
        let clock = FakeClock::new();
        let source = FakeAttestationSource::new();
        let attestation = ready_attestation(&keys, 0, &[0]);
        source.push(attestation.clone());
        let relayer = relayer(&source, flaky.clone(), &clock);

        let report = relayer.relay_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(flaky.attempts(), 5);
        assert_eq!(clock.sleep_count(), 4);

        let failures = relayer.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].attempts, 5);
        assert!(failures[0].last_error.contains("Simulated RPC error"));

        // Parked messages are skipped until an operator retries them
        let report = relayer.relay_once().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(flaky.attempts(), 5);

        flaky.fail_next_submissions(0);
        assert!(relayer.retry_failed(attestation.message_hash));
        let report = relayer.relay_once().await.unwrap();
        assert_eq!(report.relayed, 1);
        assert_eq!(relayer.stats().parked, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_submission_times_out_and_retries() {
        let keys = AttesterKeys::generate(1);
        let chain = destination(&keys, 1).await;
        let flaky = Arc::new(FlakyDestination::new(chain.clone()));
        flaky.hang_next_submissions(1);
        let relayer = relayer(&FakeAttestationSource::new(), flaky.clone(), &FakeClock::new());

        let outcome = relayer.relay(&ready_attestation(&keys, 0, &[0])).await.unwrap();
        assert!(matches!(outcome, RelayOutcome::Submitted(_)));
        assert_eq!(flaky.attempts(), 2);
    }

    #[tokio::test]
    async fn test_already_processed_is_success() {
        let keys = AttesterKeys::generate(1);
        let chain = destination(&keys, 1).await;
        let attestation = ready_attestation(&keys, 0, &[0]);
        chain
            .receive_message(&attestation.message, &attestation.signature_bytes())
            .await
            .unwrap();

        // Stale read: the check says not received, the submission loses the race
        let stale = Arc::new(StaleReads(chain.clone()));
        let relayer = relayer(&FakeAttestationSource::new(), stale, &FakeClock::new());

        let outcome = relayer.relay(&attestation).await.unwrap();
        assert_eq!(outcome, RelayOutcome::AlreadyProcessed);
        assert_eq!(relayer.stats().already_processed, 1);
        assert_eq!(chain.received_events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_destination_is_parked() {
        let keys = AttesterKeys::generate(1);
        let chain = destination(&keys, 1).await;
        let relayer = relayer(&FakeAttestationSource::new(), chain, &FakeClock::new());

        let mut attestation = ready_attestation(&keys, 0, &[0]);
        attestation.message.destination_domain = Domain::new(9);
        let err = relayer.relay(&attestation).await.unwrap_err();
        assert!(matches!(err, BridgeError::UnknownDomain(_)));
        assert_eq!(relayer.failures().len(), 1);
    }

    #[tokio::test]
    async fn test_source_failure_is_reported() {
        let keys = AttesterKeys::generate(1);
        let chain = destination(&keys, 1).await;
        let source = FakeAttestationSource::new();
        source.fail_next(1);
        let relayer = relayer(&source, chain, &FakeClock::new());

        assert!(relayer.relay_once().await.is_err());
        assert_eq!(relayer.stats().source_failures, 1);
        assert!(relayer.relay_once().await.is_ok());
    }

    /// Always claims the message was not received yet
    struct StaleReads(Arc<LocalChain>);

    #[async_trait::async_trait]
    impl DestinationChain for StaleReads {
        fn domain(&self) -> Domain {
            B
        }

        async fn is_message_received(&self, _message_hash: FixedBytes<32>) -> Result<bool> {
            Ok(false)
        }

        async fn receive_message(
            &self,
            message: &Message,
            signatures: &[alloy_primitives::Bytes],
        ) -> Result<SubmissionReceipt> {
            self.0.receive_message(message, signatures).await
        }
    }
}
