//! Test utilities and fake implementations for the bridge's seams
//!
//! This module provides fake implementations of the traits in
//! [`crate::traits`] plus a bundle of throwaway attester keys. Together with
//! [`LocalChain`](crate::LocalChain) they let integration tests drive the
//! attestation service and relayers through adversarial scenarios without a
//! real chain: RPC failures, unresponsive endpoints, racing relayers and
//! attesters that never show up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use alloy_primitives::{Address, Bytes, FixedBytes};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;

use crate::contracts::AttesterSet;
use crate::error::{BridgeError, Result};
use crate::protocol::{Attestation, Domain, Message, MessageSent};
use crate::providers::LocalKeySigner;
use crate::traits::{
    AttestationSource, AttesterSetProvider, Clock, DestinationChain, SourceChain,
    SubmissionReceipt,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Attester keys
// ============================================================================

/// A set of random attester keys, addressed by index
#[derive(Clone, Debug)]
pub struct AttesterKeys {
    signers: Vec<PrivateKeySigner>,
}

impl AttesterKeys {
    pub fn generate(count: usize) -> Self {
        Self {
            signers: (0..count).map(|_| PrivateKeySigner::random()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    pub fn identity(&self, index: usize) -> Address {
        self.signers[index].address()
    }

    pub fn identities(&self) -> Vec<Address> {
        self.signers.iter().map(|s| s.address()).collect()
    }

    /// Signatures over `message_hash` from the attesters at `indices`, in order.
    /// Repeating an index repeats the signature.
    pub fn sign(&self, message_hash: FixedBytes<32>, indices: &[usize]) -> Vec<Bytes> {
        indices
            .iter()
            .map(|&i| self.sign_one(message_hash, i))
            .collect()
    }

    pub fn sign_one(&self, message_hash: FixedBytes<32>, index: usize) -> Bytes {
        LocalKeySigner::new(self.signers[index].clone())
            .sign_sync(message_hash)
            .expect("local keys always sign")
    }

    /// The attester at `index` as a service-side signer
    pub fn signer(&self, index: usize) -> LocalKeySigner {
        LocalKeySigner::new(self.signers[index].clone())
    }
}

// ============================================================================
// Fake Source Chain
// ============================================================================

/// A source chain whose events are pushed by the test.
///
/// Cursors are indices into the pushed event list. Queued failures are
/// returned before any events.
#[derive(Clone, Debug)]
pub struct FakeSourceChain {
    domain: Domain,
    events: Arc<Mutex<Vec<MessageSent>>>,
    failures: Arc<AtomicU32>,
    polls: Arc<AtomicUsize>,
    start: u64,
}

impl FakeSourceChain {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            events: Arc::default(),
            failures: Arc::default(),
            polls: Arc::default(),
            start: 0,
        }
    }

    /// Fresh pollers start at event index `cursor`
    pub fn starting_at(mut self, cursor: u64) -> Self {
        self.start = cursor;
        self
    }

    /// Appends a `MessageSent` event for `message`
    pub fn emit(&self, message: Message) {
        let mut events = lock(&self.events);
        let block_number = events.len() as u64;
        events.push(MessageSent {
            message,
            block_number,
        });
    }

    /// Makes the next `count` polls fail with a provider error
    pub fn fail_next_polls(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceChain for FakeSourceChain {
    fn domain(&self) -> Domain {
        self.domain
    }

    async fn poll_message_sent(&self, cursor: u64) -> Result<(Vec<MessageSent>, u64)> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BridgeError::Provider("Simulated RPC error".to_string()));
        }

        let events = lock(&self.events);
        let start = (cursor as usize).min(events.len());
        Ok((events[start..].to_vec(), events.len() as u64))
    }

    fn start_cursor(&self) -> u64 {
        self.start
    }
}

// ============================================================================
// Flaky Destination Chain
// ============================================================================

/// Wraps a destination chain and injects failures into `receive_message`.
///
/// This allows testing scenarios like:
/// - Transient RPC errors followed by success
/// - An endpoint that hangs until the caller's timeout fires
/// - Counting how many submissions actually reached the chain
#[derive(Clone)]
pub struct FlakyDestination {
    inner: Arc<dyn DestinationChain>,
    failures: Arc<AtomicU32>,
    hangs: Arc<AtomicU32>,
    read_failures: Arc<AtomicU32>,
    submissions: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl std::fmt::Debug for FlakyDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyDestination")
            .field("domain", &self.inner.domain())
            .field("submissions", &self.submissions.load(Ordering::SeqCst))
            .finish()
    }
}

impl FlakyDestination {
    pub fn new(inner: Arc<dyn DestinationChain>) -> Self {
        Self {
            inner,
            failures: Arc::default(),
            hangs: Arc::default(),
            read_failures: Arc::default(),
            submissions: Arc::default(),
            attempts: Arc::default(),
        }
    }

    /// The next `count` submissions fail with a provider error
    pub fn fail_next_submissions(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// The next `count` submissions never complete
    pub fn hang_next_submissions(&self, count: u32) {
        self.hangs.store(count, Ordering::SeqCst);
    }

    /// The next `count` `is_message_received` reads fail
    pub fn fail_next_reads(&self, count: u32) {
        self.read_failures.store(count, Ordering::SeqCst);
    }

    /// Submissions forwarded to the wrapped chain
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Every `receive_message` call, including injected failures
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl DestinationChain for FlakyDestination {
    fn domain(&self) -> Domain {
        self.inner.domain()
    }

    async fn is_message_received(&self, message_hash: FixedBytes<32>) -> Result<bool> {
        if take_one(&self.read_failures) {
            return Err(BridgeError::Provider("Simulated RPC error".to_string()));
        }
        self.inner.is_message_received(message_hash).await
    }

    async fn receive_message(
        &self,
        message: &Message,
        signatures: &[Bytes],
    ) -> Result<SubmissionReceipt> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.hangs) {
            std::future::pending::<()>().await;
        }
        if take_one(&self.failures) {
            return Err(BridgeError::Provider("Simulated RPC error".to_string()));
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.inner.receive_message(message, signatures).await
    }
}

// ============================================================================
// Static attester sets and attestation source
// ============================================================================

/// Attester sets configured directly by the test
#[derive(Clone, Debug, Default)]
pub struct StaticAttesterSets {
    sets: Arc<Mutex<HashMap<Domain, AttesterSet>>>,
}

impl StaticAttesterSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the set for `domain`, bumping its version
    pub fn set(&self, domain: Domain, attesters: Vec<Address>, threshold: u32) {
        let mut sets = lock(&self.sets);
        let version = sets.get(&domain).map(|s| s.version + 1).unwrap_or(1);
        sets.insert(
            domain,
            AttesterSet {
                domain,
                attesters,
                threshold,
                version,
            },
        );
    }
}

#[async_trait]
impl AttesterSetProvider for StaticAttesterSets {
    async fn attester_set(&self, domain: Domain) -> Result<AttesterSet> {
        lock(&self.sets)
            .get(&domain)
            .cloned()
            .ok_or(BridgeError::UnknownDomain(domain))
    }
}

/// An attestation source returning whatever the test put in it
#[derive(Clone, Debug, Default)]
pub struct FakeAttestationSource {
    ready: Arc<Mutex<Vec<Attestation>>>,
    failures: Arc<AtomicU32>,
}

impl FakeAttestationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, attestation: Attestation) {
        lock(&self.ready).push(attestation);
    }

    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl AttestationSource for FakeAttestationSource {
    async fn ready_attestations(&self) -> Result<Vec<Attestation>> {
        if take_one(&self.failures) {
            return Err(BridgeError::Provider("Simulated API error".to_string()));
        }
        Ok(lock(&self.ready).clone())
    }
}

// ============================================================================
// Fake Clock
// ============================================================================

/// A fake clock that allows fast-forwarding time in tests.
///
/// This enables testing expiry and backoff behavior without actually waiting.
#[derive(Clone, Debug)]
pub struct FakeClock {
    current_time: Arc<Mutex<Instant>>,
    sleep_log: Arc<Mutex<Vec<Duration>>>,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self {
            current_time: Arc::new(Mutex::new(Instant::now())),
            sleep_log: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fast-forward the clock by the given duration
    pub fn advance(&self, duration: Duration) {
        let mut time = lock(&self.current_time);
        *time += duration;
    }

    /// Get the total time "slept" by this clock
    pub fn total_sleep_time(&self) -> Duration {
        lock(&self.sleep_log).iter().sum()
    }

    /// Get the number of times sleep was called
    pub fn sleep_count(&self) -> usize {
        lock(&self.sleep_log).len()
    }

    /// Every duration passed to `sleep`, in call order
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleep_log).clone()
    }
}

#[async_trait]
impl Clock for FakeClock {
    async fn sleep(&self, duration: Duration) {
        lock(&self.sleep_log).push(duration);
        self.advance(duration);
        // Let other tasks observe the new time
        tokio::task::yield_now().await;
    }

    fn now(&self) -> Instant {
        *lock(&self.current_time)
    }
}
