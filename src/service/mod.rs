//! The attestation service.
//!
//! Observes `MessageSent` events on every source chain, collects attester
//! signatures per message until the destination's quorum is met, and serves
//! the result to relayers. Each message moves through
//! `pending -> ready -> relayed`, or `pending -> expired` when the quorum
//! window closes first.
//!
//! Aggregation state for one message lives behind its own async mutex, so
//! signatures for different messages never contend and concurrent
//! signatures for the same message are counted one at a time.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use attestation_bridge::service::AttestationService;
//! use attestation_bridge::{AttesterSetProvider, Domain, LocalChain, ServiceConfig, SourceChain};
//! use alloy_primitives::Address;
//!
//! # async fn example() -> Result<(), attestation_bridge::BridgeError> {
//! let source = Arc::new(LocalChain::new(Domain::new(0), Address::ZERO));
//! let destination = Arc::new(LocalChain::new(Domain::new(1), Address::ZERO));
//!
//! let service = AttestationService::builder()
//!     .attester_sets(HashMap::from([(
//!         Domain::new(1),
//!         destination.clone() as Arc<dyn AttesterSetProvider>,
//!     )]))
//!     .config(ServiceConfig::default())
//!     .build();
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let sources: Vec<Arc<dyn SourceChain>> = vec![source];
//! let handle = tokio::spawn({
//!     let service = service.clone();
//!     async move { service.run(sources, shutdown_rx).await }
//! });
//!
//! shutdown_tx.send(true).ok();
//! handle.await.ok();
//! # Ok(())
//! # }
//! ```

mod aggregator;
pub mod http;
mod store;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use alloy_primitives::{Bytes, FixedBytes};
use bon::bon;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::ServiceConfig;
use crate::contracts::AttesterSet;
use crate::error::{BridgeError, Result};
use crate::protocol::{
    Attestation, AttestationStatus, Domain, HealthResponse, MessageSent, ServiceStats,
    SignatureOutcome,
};
use crate::providers::TokioClock;
use crate::spans;
use crate::traits::{
    AttestationSource, AttesterSetProvider, AttesterSigner, Clock, DestinationChain, SourceChain,
};

use self::aggregator::Aggregation;
pub use self::aggregator::StoredAggregation;
pub use self::http::{router, serve, ApiError, SubmitSignatureRequest};
pub use self::store::{JsonFileStore, Snapshot, SourceCursor, SNAPSHOT_VERSION};

/// Poll delay never grows past this multiple of the configured interval
const MAX_POLL_BACKOFF_FACTOR: u32 = 8;

#[derive(Debug, Default)]
struct Counters {
    messages_observed: AtomicU64,
    signatures_accepted: AtomicU64,
    signatures_rejected: AtomicU64,
    attestations_relayed: AtomicU64,
    attestations_expired: AtomicU64,
    source_poll_failures: AtomicU64,
    messages_unobservable: AtomicU64,
    reconcile_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

type Entry = Arc<Mutex<Aggregation>>;

struct Inner {
    config: ServiceConfig,
    attester_sets: HashMap<Domain, Arc<dyn AttesterSetProvider>>,
    destinations: HashMap<Domain, Arc<dyn DestinationChain>>,
    signers: Vec<Arc<dyn AttesterSigner>>,
    clock: Arc<dyn Clock>,
    store: Option<JsonFileStore>,
    entries: RwLock<HashMap<FixedBytes<32>, Entry>>,
    by_nonce: RwLock<HashMap<(Domain, u64), FixedBytes<32>>>,
    cursors: StdMutex<HashMap<Domain, u64>>,
    counters: Counters,
    last_error: StdMutex<Option<String>>,
    started_at: Instant,
}

/// Handle to a running attestation service. Cheap to clone.
#[derive(Clone)]
pub struct AttestationService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AttestationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationService")
            .field("config", &self.inner.config)
            .field("signers", &self.inner.signers.len())
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}

#[bon]
impl AttestationService {
    /// Creates a service.
    ///
    /// `attester_sets` maps each destination domain to the registry its
    /// MessageTransmitter verifies against. `destinations` is only used for
    /// reconciliation; a domain missing there is never marked relayed.
    #[builder]
    pub fn new(
        attester_sets: HashMap<Domain, Arc<dyn AttesterSetProvider>>,
        #[builder(default)] destinations: HashMap<Domain, Arc<dyn DestinationChain>>,
        #[builder(default)] signers: Vec<Arc<dyn AttesterSigner>>,
        #[builder(default)] config: ServiceConfig,
        clock: Option<Arc<dyn Clock>>,
        store: Option<JsonFileStore>,
    ) -> Self {
        let clock = clock.unwrap_or_else(|| Arc::new(TokioClock::new()));
        let started_at = clock.now();
        Self {
            inner: Arc::new(Inner {
                config,
                attester_sets,
                destinations,
                signers,
                clock,
                store,
                entries: RwLock::default(),
                by_nonce: RwLock::default(),
                cursors: StdMutex::default(),
                counters: Counters::default(),
                last_error: StdMutex::default(),
                started_at,
            }),
        }
    }
}

impl AttestationService {
    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    async fn entry(&self, message_hash: &FixedBytes<32>) -> Option<Entry> {
        self.inner.entries.read().await.get(message_hash).cloned()
    }

    async fn all_entries(&self) -> Vec<Entry> {
        self.inner.entries.read().await.values().cloned().collect()
    }

    fn record_failure(&self, err: &BridgeError) {
        *self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        let limit = self.inner.config.call_timeout();
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| BridgeError::Timeout {
                seconds: limit.as_secs(),
            })?
    }

    async fn attester_set(&self, destination: Domain) -> Result<AttesterSet> {
        let provider = self
            .inner
            .attester_sets
            .get(&destination)
            .ok_or(BridgeError::UnknownDomain(destination))?;
        self.with_timeout(provider.attester_set(destination)).await
    }

    /// Starts tracking the message of a `MessageSent` event.
    ///
    /// Idempotent: observing the same message again returns the existing
    /// attestation unchanged. The destination's attester set and threshold
    /// are snapshotted here and never refreshed. Co-hosted signers sign
    /// right away.
    pub async fn observe(&self, event: &MessageSent) -> Result<Attestation> {
        let message = &event.message;
        let message_hash = message.hash();
        let span = spans::observe_message(
            &message_hash,
            message.source_domain,
            message.destination_domain,
            message.nonce,
        );

        async {
            if let Some(entry) = self.entry(&message_hash).await {
                debug!(event = "message_already_observed");
                return Ok(entry.lock().await.attestation().clone());
            }

            message.validate()?;
            let set = self.attester_set(message.destination_domain).await.map_err(|e| {
                spans::record_error(&e);
                e
            })?;
            let deadline = self.inner.clock.now() + self.inner.config.expiry_window();

            {
                let mut entries = self.inner.entries.write().await;
                if let Some(entry) = entries.get(&message_hash) {
                    // Lost a race with another observer of the same event
                    let entry = entry.clone();
                    drop(entries);
                    return Ok(entry.lock().await.attestation().clone());
                }
                entries.insert(
                    message_hash,
                    Arc::new(Mutex::new(Aggregation::new(message.clone(), &set, deadline))),
                );
            }
            self.index_nonce(message.source_domain, message.nonce, message_hash)
                .await;
            Counters::bump(&self.inner.counters.messages_observed);

            info!(
                block_number = event.block_number,
                amount = %message.amount,
                threshold = set.threshold,
                attester_set_version = set.version,
                event = "message_observed"
            );

            for signer in &self.inner.signers {
                let identity = signer.identity();
                match self.with_timeout(signer.sign(message_hash)).await {
                    Ok(signature) => {
                        self.submit_signature(message_hash, signature).await?;
                    }
                    Err(e) => {
                        self.record_failure(&e);
                        warn!(
                            attester = %identity,
                            error = %e,
                            event = "local_signing_failed"
                        );
                    }
                }
            }

            self.get(message_hash)
                .await
                .ok_or(BridgeError::AttestationNotFound(message_hash))
        }
        .instrument(span)
        .await
    }

    async fn index_nonce(&self, source: Domain, nonce: u64, message_hash: FixedBytes<32>) {
        let mut by_nonce = self.inner.by_nonce.write().await;
        match by_nonce.get(&(source, nonce)) {
            Some(existing) if *existing != message_hash => {
                error!(
                    source_domain = %source,
                    nonce = nonce,
                    existing = %existing,
                    conflicting = %message_hash,
                    event = "conflicting_message_for_nonce"
                );
            }
            Some(_) => {}
            None => {
                by_nonce.insert((source, nonce), message_hash);
            }
        }
    }

    /// Offers one attester signature for `message_hash`.
    ///
    /// Invalid signatures come back as [`SignatureOutcome::Rejected`] and
    /// leave the aggregation untouched.
    ///
    /// # Errors
    ///
    /// `AttestationNotFound` if the message was never observed.
    pub async fn submit_signature(
        &self,
        message_hash: FixedBytes<32>,
        signature: Bytes,
    ) -> Result<SignatureOutcome> {
        let span = spans::submit_signature(&message_hash);
        async {
            let entry = self
                .entry(&message_hash)
                .await
                .ok_or(BridgeError::AttestationNotFound(message_hash))?;
            let outcome = entry.lock().await.offer(signature);

            match &outcome {
                SignatureOutcome::Accepted { attester, .. } => {
                    tracing::Span::current().record("attester", tracing::field::display(attester));
                    Counters::bump(&self.inner.counters.signatures_accepted);
                }
                SignatureOutcome::Rejected { reason } => {
                    Counters::bump(&self.inner.counters.signatures_rejected);
                    warn!(reason = %reason, event = "signature_rejected");
                }
                SignatureOutcome::Duplicate { .. } | SignatureOutcome::NotPending { .. } => {}
            }
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Expires pending attestations whose quorum window has closed.
    ///
    /// Returns how many expired in this sweep.
    pub async fn expire_stale(&self) -> usize {
        let now = self.inner.clock.now();
        let mut expired = 0;
        for entry in self.all_entries().await {
            if entry.lock().await.expire_if_due(now) {
                expired += 1;
            }
        }
        for _ in 0..expired {
            Counters::bump(&self.inner.counters.attestations_expired);
        }
        expired
    }

    /// Asks each destination chain whether its ready (or expired)
    /// attestations were received, and marks those as relayed.
    ///
    /// Read failures are counted and retried on the next sweep.
    pub async fn reconcile(&self) -> usize {
        let mut candidates = Vec::new();
        for entry in self.all_entries().await {
            let guard = entry.lock().await;
            if matches!(
                guard.status(),
                AttestationStatus::Ready | AttestationStatus::Expired
            ) {
                let attestation = guard.attestation();
                candidates.push((
                    entry.clone(),
                    attestation.message_hash,
                    attestation.destination_domain(),
                ));
            }
        }

        let span = spans::reconcile(candidates.len());
        async {
            let mut relayed = 0;
            for (entry, message_hash, destination) in candidates {
                let Some(chain) = self.inner.destinations.get(&destination) else {
                    continue;
                };
                match self
                    .with_timeout(chain.is_message_received(message_hash))
                    .await
                {
                    Ok(true) => {
                        if entry.lock().await.mark_relayed() {
                            Counters::bump(&self.inner.counters.attestations_relayed);
                            relayed += 1;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        Counters::bump(&self.inner.counters.reconcile_failures);
                        self.record_failure(&e);
                        spans::record_error(&e);
                        warn!(
                            message_hash = %message_hash,
                            destination_domain = %destination,
                            error = %e,
                            event = "reconcile_read_failed"
                        );
                    }
                }
            }
            relayed
        }
        .instrument(span)
        .await
    }

    pub async fn get(&self, message_hash: FixedBytes<32>) -> Option<Attestation> {
        let entry = self.entry(&message_hash).await?;
        let attestation = entry.lock().await.attestation().clone();
        Some(attestation)
    }

    pub async fn get_by_nonce(&self, source_domain: Domain, nonce: u64) -> Option<Attestation> {
        let message_hash = *self
            .inner
            .by_nonce
            .read()
            .await
            .get(&(source_domain, nonce))?;
        self.get(message_hash).await
    }

    /// Ready attestations ordered by source domain and nonce
    pub async fn ready(&self) -> Vec<Attestation> {
        let mut ready = Vec::new();
        for entry in self.all_entries().await {
            let guard = entry.lock().await;
            if guard.status().is_relayable() {
                ready.push(guard.attestation().clone());
            }
        }
        ready.sort_by_key(|a| (a.source_domain(), a.nonce()));
        ready
    }

    pub fn uptime(&self) -> Duration {
        self.inner
            .clock
            .now()
            .saturating_duration_since(self.inner.started_at)
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            uptime: self.uptime().as_secs(),
        }
    }

    pub async fn stats(&self) -> ServiceStats {
        let mut per_status: HashMap<String, u64> = AttestationStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        let entries = self.all_entries().await;
        for entry in &entries {
            let status = entry.lock().await.status();
            *per_status.entry(status.as_str().to_string()).or_default() += 1;
        }

        let c = &self.inner.counters;
        ServiceStats {
            attestations: per_status,
            total: entries.len() as u64,
            messages_observed: Counters::get(&c.messages_observed),
            signatures_accepted: Counters::get(&c.signatures_accepted),
            signatures_rejected: Counters::get(&c.signatures_rejected),
            attestations_relayed: Counters::get(&c.attestations_relayed),
            attestations_expired: Counters::get(&c.attestations_expired),
            source_poll_failures: Counters::get(&c.source_poll_failures),
            messages_unobservable: Counters::get(&c.messages_unobservable),
            reconcile_failures: Counters::get(&c.reconcile_failures),
            last_error: self
                .inner
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            uptime: self.uptime().as_secs(),
        }
    }

    /// Polls `source` once from its stored cursor and observes every event.
    ///
    /// A source without a stored cursor starts at its
    /// [`SourceChain::start_cursor`]. The cursor only advances when no event
    /// of the batch hit a retryable failure, so a transient error never skips
    /// a message. Events that can never be observed, such as one targeting a
    /// domain without an attester set, are counted and skipped.
    ///
    /// Returns the number of events observed.
    pub async fn poll_source(&self, source: &dyn SourceChain) -> Result<usize> {
        let domain = source.domain();
        let cursor = self
            .cursor(domain)
            .unwrap_or_else(|| source.start_cursor());
        let span = spans::poll_source(domain, cursor);

        async {
            let (events, next) = self
                .with_timeout(source.poll_message_sent(cursor))
                .await?;
            let mut observed = 0;
            for event in &events {
                if event.message.source_domain != domain {
                    spans::record_error_with_context(
                        "ForeignMessage",
                        "source emitted a message for another domain",
                        Some(&event.message.source_domain.to_string()),
                    );
                    warn!(
                        nonce = event.message.nonce,
                        claimed_domain = %event.message.source_domain,
                        event = "foreign_message_skipped"
                    );
                    continue;
                }
                match self.observe(event).await {
                    Ok(_) => observed += 1,
                    Err(e) if e.is_retryable() => return Err(e),
                    Err(e) => {
                        Counters::bump(&self.inner.counters.messages_unobservable);
                        self.record_failure(&e);
                        error!(
                            nonce = event.message.nonce,
                            destination_domain = %event.message.destination_domain,
                            error = %e,
                            event = "message_unobservable"
                        );
                    }
                }
            }
            self.inner
                .cursors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(domain, next);
            Ok::<_, BridgeError>(observed)
        }
        .instrument(span)
        .await
        .map_err(|e| {
            Counters::bump(&self.inner.counters.source_poll_failures);
            self.record_failure(&e);
            e
        })
    }

    fn cursor(&self, domain: Domain) -> Option<u64> {
        self.inner
            .cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&domain)
            .copied()
    }

    /// Runs the source subscriptions and the maintenance loop until
    /// `shutdown` flips to `true`, then writes a final snapshot.
    ///
    /// Shutdown stops new polls; an observation already underway completes.
    pub async fn run(
        &self,
        sources: Vec<Arc<dyn SourceChain>>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!(
            sources = sources.len(),
            signers = self.inner.signers.len(),
            expiry_window_secs = self.inner.config.expiry_window_secs,
            event = "attestation_service_started"
        );

        let mut tasks = JoinSet::new();
        for source in sources {
            let service = self.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move { service.subscribe(source, shutdown).await });
        }
        {
            let service = self.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move { service.maintain(shutdown).await });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, event = "service_task_panicked");
            }
        }

        self.persist().await?;
        info!(event = "attestation_service_stopped");
        Ok(())
    }

    async fn subscribe(&self, source: Arc<dyn SourceChain>, mut shutdown: watch::Receiver<bool>) {
        let domain = source.domain();
        let interval = self.inner.config.source_poll_interval();
        let mut failures = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.poll_source(source.as_ref()).await {
                Ok(count) => {
                    failures = 0;
                    if count > 0 {
                        debug!(domain = %domain, count = count, event = "source_polled");
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(
                        domain = %domain,
                        consecutive_failures = failures,
                        error = %e,
                        event = "source_poll_failed"
                    );
                }
            }

            let factor = 1u32
                .checked_shl(failures.min(31))
                .unwrap_or(u32::MAX)
                .min(MAX_POLL_BACKOFF_FACTOR);
            tokio::select! {
                _ = self.inner.clock.sleep(interval * factor) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(domain = %domain, event = "source_subscription_stopped");
    }

    async fn maintain(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.inner.config.maintenance_interval();
        loop {
            tokio::select! {
                _ = self.inner.clock.sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }

            self.expire_stale().await;
            self.reconcile().await;
            if let Err(e) = self.persist().await {
                self.record_failure(&e);
                warn!(error = %e, event = "snapshot_save_failed");
            }
        }
    }

    /// Captures the aggregation state and source cursors.
    pub async fn snapshot(&self) -> Snapshot {
        let mut entries = Vec::new();
        for entry in self.all_entries().await {
            entries.push(entry.lock().await.to_stored());
        }
        entries.sort_by_key(|e| (e.attestation.source_domain(), e.attestation.nonce()));

        let mut cursors: Vec<SourceCursor> = self
            .inner
            .cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(&domain, &cursor)| SourceCursor { domain, cursor })
            .collect();
        cursors.sort_by_key(|c| c.domain);

        Snapshot {
            version: SNAPSHOT_VERSION,
            cursors,
            entries,
        }
    }

    /// Writes a snapshot if a store is configured.
    pub async fn persist(&self) -> Result<()> {
        match &self.inner.store {
            Some(store) => store.save(&self.snapshot().await).await,
            None => Ok(()),
        }
    }

    /// Loads the stored snapshot, if any, into an empty service.
    ///
    /// Pending attestations get a fresh quorum window. Returns the number of
    /// restored attestations.
    pub async fn restore(&self) -> Result<usize> {
        let Some(store) = &self.inner.store else {
            return Ok(0);
        };
        let Some(snapshot) = store.load().await? else {
            return Ok(0);
        };
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(BridgeError::InvalidConfig(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let deadline = self.inner.clock.now() + self.inner.config.expiry_window();
        let mut restored = 0;
        for stored in snapshot.entries {
            let message_hash = stored.attestation.message_hash;
            if stored.attestation.message.hash() != message_hash {
                warn!(message_hash = %message_hash, event = "snapshot_entry_hash_mismatch");
                continue;
            }
            let (source, nonce) = (stored.attestation.source_domain(), stored.attestation.nonce());
            self.inner.entries.write().await.insert(
                message_hash,
                Arc::new(Mutex::new(Aggregation::restore(stored, deadline))),
            );
            self.index_nonce(source, nonce, message_hash).await;
            restored += 1;
        }
        {
            let mut cursors = self
                .inner
                .cursors
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for SourceCursor { domain, cursor } in snapshot.cursors {
                cursors.insert(domain, cursor);
            }
        }

        info!(restored = restored, event = "attestation_state_restored");
        Ok(restored)
    }
}

#[async_trait::async_trait]
impl AttestationSource for AttestationService {
    async fn ready_attestations(&self) -> Result<Vec<Attestation>> {
        Ok(self.ready().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalChain;
    use crate::contracts::DestinationConfig;
    use crate::protocol::Message;
    use crate::testing::{AttesterKeys, FakeClock, FakeSourceChain, StaticAttesterSets};
    use alloy_primitives::{Address, U256};

    const A: Domain = Domain::new(0);
    const B: Domain = Domain::new(1);

    fn message(nonce: u64) -> Message {
        Message::new(A, B, nonce, vec![1u8; 20], vec![2u8; 20], U256::from(10u64))
    }

    fn sent(nonce: u64) -> MessageSent {
        MessageSent {
            message: message(nonce),
            block_number: nonce,
        }
    }

    fn service_with(sets: &StaticAttesterSets, clock: &FakeClock) -> AttestationService {
        AttestationService::builder()
            .attester_sets(HashMap::from([(
                B,
                Arc::new(sets.clone()) as Arc<dyn AttesterSetProvider>,
            )]))
            .config(ServiceConfig::default().with_expiry_window_secs(60))
            .clock(Arc::new(clock.clone()) as Arc<dyn Clock>)
            .build()
    }

    #[tokio::test]
    async fn test_observe_is_idempotent_and_indexed() {
        let keys = AttesterKeys::generate(3);
        let sets = StaticAttesterSets::new();
        sets.set(B, keys.identities(), 2);
        let service = service_with(&sets, &FakeClock::new());

        let first = service.observe(&sent(0)).await.unwrap();
        let again = service.observe(&sent(0)).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(first.status, AttestationStatus::Pending);
        assert_eq!(first.threshold, 2);

        assert_eq!(service.get_by_nonce(A, 0).await, Some(first.clone()));
        assert!(service.get_by_nonce(A, 1).await.is_none());
        assert_eq!(service.stats().await.messages_observed, 1);
    }

    #[tokio::test]
    async fn test_observe_unknown_destination_fails() {
        let sets = StaticAttesterSets::new();
        let service = service_with(&sets, &FakeClock::new());
        let err = service.observe(&sent(0)).await.unwrap_err();
        assert!(matches!(err, BridgeError::UnknownDomain(d) if d == B));
        assert!(service.get(message(0).hash()).await.is_none());
    }

    #[tokio::test]
    async fn test_threshold_is_frozen_at_observation() {
        let keys = AttesterKeys::generate(3);
        let sets = StaticAttesterSets::new();
        sets.set(B, keys.identities(), 2);
        let service = service_with(&sets, &FakeClock::new());

        let hash = service.observe(&sent(0)).await.unwrap().message_hash;
        sets.set(B, keys.identities(), 3);

        service.submit_signature(hash, keys.sign_one(hash, 0)).await.unwrap();
        service.submit_signature(hash, keys.sign_one(hash, 1)).await.unwrap();
        let attestation = service.get(hash).await.unwrap();
        assert_eq!(attestation.status, AttestationStatus::Ready);
        assert_eq!(attestation.threshold, 2);
        assert_eq!(attestation.attester_set_version, 1);

        // A message observed after the change uses the new threshold
        let later = service.observe(&sent(1)).await.unwrap();
        assert_eq!(later.threshold, 3);
    }

    #[tokio::test]
    async fn test_concurrent_signatures_count_once_each() {
        let keys = AttesterKeys::generate(5);
        let sets = StaticAttesterSets::new();
        sets.set(B, keys.identities(), 5);
        let service = service_with(&sets, &FakeClock::new());
        let hash = service.observe(&sent(0)).await.unwrap().message_hash;

        let mut tasks = JoinSet::new();
        for _ in 0..3 {
            for i in 0..5 {
                let service = service.clone();
                let signature = keys.sign_one(hash, i);
                tasks.spawn(async move { service.submit_signature(hash, signature).await.unwrap() });
            }
        }
        let mut accepted = 0;
        while let Some(outcome) = tasks.join_next().await {
            if matches!(outcome.unwrap(), SignatureOutcome::Accepted { .. }) {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 5);
        let attestation = service.get(hash).await.unwrap();
        assert_eq!(attestation.signature_count(), 5);
        assert_eq!(attestation.status, AttestationStatus::Ready);
    }

    #[tokio::test]
    async fn test_unknown_hash_signature_is_not_found() {
        let service = service_with(&StaticAttesterSets::new(), &FakeClock::new());
        let err = service
            .submit_signature(FixedBytes::ZERO, Bytes::from(vec![0u8; 65]))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::AttestationNotFound(_)));
    }

    #[tokio::test]
    async fn test_expiry_window() {
        let keys = AttesterKeys::generate(2);
        let sets = StaticAttesterSets::new();
        sets.set(B, keys.identities(), 2);
        let clock = FakeClock::new();
        let service = service_with(&sets, &clock);

        let hash = service.observe(&sent(0)).await.unwrap().message_hash;
        service.submit_signature(hash, keys.sign_one(hash, 0)).await.unwrap();

        clock.advance(Duration::from_secs(59));
        assert_eq!(service.expire_stale().await, 0);
        clock.advance(Duration::from_secs(1));
        assert_eq!(service.expire_stale().await, 1);
        assert_eq!(service.expire_stale().await, 0);

        let attestation = service.get(hash).await.unwrap();
        assert_eq!(attestation.status, AttestationStatus::Expired);
        assert_eq!(attestation.signature_count(), 1);
        assert!(service.ready().await.is_empty());

        let stats = service.stats().await;
        assert_eq!(stats.attestations_expired, 1);
        assert_eq!(stats.attestations["expired"], 1);
        assert_eq!(stats.attestations["pending"], 0);
    }

    #[tokio::test]
    async fn test_local_signers_sign_on_observation() {
        let keys = AttesterKeys::generate(2);
        let sets = StaticAttesterSets::new();
        sets.set(B, keys.identities(), 2);
        let service = AttestationService::builder()
            .attester_sets(HashMap::from([(
                B,
                Arc::new(sets) as Arc<dyn AttesterSetProvider>,
            )]))
            .signers(vec![
                Arc::new(keys.signer(0)) as Arc<dyn AttesterSigner>,
                Arc::new(keys.signer(1)) as Arc<dyn AttesterSigner>,
            ])
            .build();

        let attestation = service.observe(&sent(0)).await.unwrap();
        assert_eq!(attestation.status, AttestationStatus::Ready);
        assert_eq!(service.ready().await, vec![attestation]);
    }

    #[tokio::test]
    async fn test_poll_source_keeps_cursor_on_failure() {
        let keys = AttesterKeys::generate(1);
        let sets = StaticAttesterSets::new();
        sets.set(B, keys.identities(), 1);
        let service = service_with(&sets, &FakeClock::new());
        let source = FakeSourceChain::new(A);
        source.emit(message(0));
        source.emit(message(1));

        source.fail_next_polls(1);
        assert!(service.poll_source(&source).await.is_err());
        assert_eq!(service.stats().await.source_poll_failures, 1);

        assert_eq!(service.poll_source(&source).await.unwrap(), 2);
        assert_eq!(service.poll_source(&source).await.unwrap(), 0);
        assert!(service.get_by_nonce(A, 1).await.is_some());
        assert!(service.stats().await.last_error.is_some());
    }

    #[tokio::test]
    async fn test_unobservable_event_does_not_stall_source() {
        let keys = AttesterKeys::generate(1);
        let sets = StaticAttesterSets::new();
        sets.set(B, keys.identities(), 1);
        let service = service_with(&sets, &FakeClock::new());
        let source = FakeSourceChain::new(A);
        // No attester set for domain 9
        source.emit(Message::new(
            A,
            Domain::new(9),
            0,
            vec![1u8; 20],
            vec![2u8; 20],
            U256::from(10u64),
        ));
        source.emit(message(1));
        source.emit(Message::new(
            A,
            B,
            2,
            vec![1u8; 20],
            Vec::<u8>::new(),
            U256::from(10u64),
        ));
        source.emit(message(3));

        assert_eq!(service.poll_source(&source).await.unwrap(), 2);
        assert!(service.get_by_nonce(A, 0).await.is_none());
        assert!(service.get_by_nonce(A, 1).await.is_some());
        assert!(service.get_by_nonce(A, 2).await.is_none());
        assert!(service.get_by_nonce(A, 3).await.is_some());

        let stats = service.stats().await;
        assert_eq!(stats.messages_unobservable, 2);
        assert_eq!(stats.source_poll_failures, 0);
        assert!(stats.last_error.is_some());

        // The cursor moved past the skipped events
        assert_eq!(service.poll_source(&source).await.unwrap(), 0);
        assert_eq!(service.stats().await.messages_unobservable, 2);
    }

    #[tokio::test]
    async fn test_transient_observe_failure_keeps_cursor() {
        let service = AttestationService::builder()
            .attester_sets(HashMap::from([(
                B,
                Arc::new(FailingSets) as Arc<dyn AttesterSetProvider>,
            )]))
            .clock(Arc::new(FakeClock::new()) as Arc<dyn Clock>)
            .build();
        let source = FakeSourceChain::new(A);
        source.emit(message(0));

        assert!(service.poll_source(&source).await.is_err());
        assert!(service.poll_source(&source).await.is_err());
        assert_eq!(service.stats().await.source_poll_failures, 2);
        assert_eq!(service.stats().await.messages_unobservable, 0);
    }

    struct FailingSets;

    #[async_trait::async_trait]
    impl AttesterSetProvider for FailingSets {
        async fn attester_set(&self, _domain: Domain) -> Result<AttesterSet> {
            Err(BridgeError::Provider("registry unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_fresh_source_starts_at_its_start_cursor() {
        let keys = AttesterKeys::generate(1);
        let sets = StaticAttesterSets::new();
        sets.set(B, keys.identities(), 1);
        let service = service_with(&sets, &FakeClock::new());
        let source = FakeSourceChain::new(A).starting_at(2);
        for nonce in 0..4 {
            source.emit(message(nonce));
        }

        assert_eq!(service.poll_source(&source).await.unwrap(), 2);
        assert!(service.get_by_nonce(A, 1).await.is_none());
        assert!(service.get_by_nonce(A, 2).await.is_some());
        assert_eq!(service.snapshot().await.cursors[0].cursor, 4);
    }

    #[tokio::test]
    async fn test_restored_cursor_wins_over_start_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let keys = AttesterKeys::generate(1);
        let sets = StaticAttesterSets::new();
        sets.set(B, keys.identities(), 1);
        let source = FakeSourceChain::new(A);
        for nonce in 0..3 {
            source.emit(message(nonce));
        }

        let first = AttestationService::builder()
            .attester_sets(HashMap::from([(
                B,
                Arc::new(sets.clone()) as Arc<dyn AttesterSetProvider>,
            )]))
            .store(JsonFileStore::new(path.clone()))
            .build();
        assert_eq!(first.poll_source(&source).await.unwrap(), 3);
        first.persist().await.unwrap();

        source.emit(message(3));
        let second = AttestationService::builder()
            .attester_sets(HashMap::from([(
                B,
                Arc::new(sets.clone()) as Arc<dyn AttesterSetProvider>,
            )]))
            .store(JsonFileStore::new(path))
            .build();
        second.restore().await.unwrap();
        let restarted = source.clone().starting_at(0);
        assert_eq!(second.poll_source(&restarted).await.unwrap(), 1);
        assert!(second.get_by_nonce(A, 3).await.is_some());
    }

    #[tokio::test]
    async fn test_reconcile_marks_relayed() {
        let owner = Address::repeat_byte(0xee);
        let keys = AttesterKeys::generate(1);
        let source = Arc::new(LocalChain::new(A, owner));
        let destination = Arc::new(LocalChain::new(B, owner));
        source
            .set_destination(owner, B, DestinationConfig::default())
            .await
            .unwrap();
        destination.add_attester(owner, B, keys.identity(0)).await.unwrap();
        destination.set_threshold(owner, B, 1).await.unwrap();

        let service = AttestationService::builder()
            .attester_sets(HashMap::from([(
                B,
                destination.clone() as Arc<dyn AttesterSetProvider>,
            )]))
            .destinations(HashMap::from([(
                B,
                destination.clone() as Arc<dyn DestinationChain>,
            )]))
            .signers(vec![Arc::new(keys.signer(0)) as Arc<dyn AttesterSigner>])
            .build();

        let sender = Address::repeat_byte(1);
        source.fund(sender.as_slice(), U256::from(50u64)).await.unwrap();
        source
            .burn_and_send(sender, B, vec![9u8; 20], U256::from(50u64))
            .await
            .unwrap();
        service.poll_source(source.as_ref()).await.unwrap();

        let ready = service.ready().await;
        assert_eq!(ready.len(), 1);
        assert_eq!(service.reconcile().await, 0);

        destination
            .receive_message(&ready[0].message, &ready[0].signature_bytes())
            .await
            .unwrap();
        assert_eq!(service.reconcile().await, 1);
        assert_eq!(
            service.get(ready[0].message_hash).await.unwrap().status,
            AttestationStatus::Relayed
        );
        assert!(service.ready().await.is_empty());
    }

    #[tokio::test]
    async fn test_restore_gives_pending_a_fresh_window() {
        let dir = tempfile::tempdir().unwrap();
        let keys = AttesterKeys::generate(2);
        let sets = StaticAttesterSets::new();
        sets.set(B, keys.identities(), 2);
        let clock = FakeClock::new();
        let build = || {
            AttestationService::builder()
                .attester_sets(HashMap::from([(
                    B,
                    Arc::new(sets.clone()) as Arc<dyn AttesterSetProvider>,
                )]))
                .config(ServiceConfig::default().with_expiry_window_secs(60))
                .clock(Arc::new(clock.clone()) as Arc<dyn Clock>)
                .store(JsonFileStore::new(dir.path().join("state.json")))
                .build()
        };

        let first = build();
        let hash = first.observe(&sent(0)).await.unwrap().message_hash;
        first.submit_signature(hash, keys.sign_one(hash, 0)).await.unwrap();
        first.persist().await.unwrap();

        clock.advance(Duration::from_secs(50));
        let second = build();
        assert_eq!(second.restore().await.unwrap(), 1);

        clock.advance(Duration::from_secs(30));
        assert_eq!(second.expire_stale().await, 0);

        // Frozen attester set survives the restart
        let outcome = second.submit_signature(hash, keys.sign_one(hash, 1)).await.unwrap();
        assert!(matches!(
            outcome,
            SignatureOutcome::Accepted { status: AttestationStatus::Ready, .. }
        ));
        assert!(second.get_by_nonce(A, 0).await.is_some());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let keys = AttesterKeys::generate(1);
        let sets = StaticAttesterSets::new();
        sets.set(B, keys.identities(), 1);
        let clock = FakeClock::new();
        let service = service_with(&sets, &clock);
        let source = FakeSourceChain::new(A);
        source.emit(message(0));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let service = service.clone();
            let sources: Vec<Arc<dyn SourceChain>> = vec![Arc::new(source.clone())];
            async move { service.run(sources, rx).await }
        });

        while service.get_by_nonce(A, 0).await.is_none() {
            tokio::task::yield_now().await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        assert!(source.poll_count() >= 1);
    }
}
