//! Per-message signature aggregation.

use std::time::Instant;

use alloy_primitives::{Address, Bytes};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::contracts::AttesterSet;
use crate::protocol::{
    recover_attester, Attestation, AttestationStatus, AttesterSignature, Message,
    SignatureOutcome,
};

/// Aggregation state for one message hash.
///
/// Holds the attester set frozen at observation time. Callers serialize
/// access per message; nothing in here is shared.
#[derive(Debug, Clone)]
pub(crate) struct Aggregation {
    attestation: Attestation,
    attesters: Vec<Address>,
    deadline: Instant,
}

/// Aggregation state as written to the snapshot file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAggregation {
    pub attestation: Attestation,
    /// Attester identities frozen at observation
    pub attesters: Vec<Address>,
}

impl Aggregation {
    pub(crate) fn new(message: Message, set: &AttesterSet, deadline: Instant) -> Self {
        if set.threshold == 0 || set.attesters.is_empty() {
            warn!(
                destination_domain = %set.domain,
                threshold = set.threshold,
                attesters = set.attesters.len(),
                event = "attester_set_unconfigured"
            );
        }
        Self {
            attestation: Attestation::new(message, set.threshold, set.version),
            attesters: set.attesters.clone(),
            deadline,
        }
    }

    /// Restores a stored aggregation. Pending entries get `deadline` as a
    /// fresh quorum window.
    pub(crate) fn restore(stored: StoredAggregation, deadline: Instant) -> Self {
        Self {
            attestation: stored.attestation,
            attesters: stored.attesters,
            deadline,
        }
    }

    pub(crate) fn to_stored(&self) -> StoredAggregation {
        StoredAggregation {
            attestation: self.attestation.clone(),
            attesters: self.attesters.clone(),
        }
    }

    pub(crate) fn attestation(&self) -> &Attestation {
        &self.attestation
    }

    pub(crate) fn status(&self) -> AttestationStatus {
        self.attestation.status
    }

    /// Validates `signature` against the frozen set and counts it.
    ///
    /// Signatures keep being accepted while `Ready` so late arrivals still
    /// add margin over the threshold.
    pub(crate) fn offer(&mut self, signature: Bytes) -> SignatureOutcome {
        let status = self.attestation.status;
        if !matches!(status, AttestationStatus::Pending | AttestationStatus::Ready) {
            return SignatureOutcome::NotPending { status };
        }

        let attester = match recover_attester(self.attestation.message_hash, &signature) {
            Ok(attester) => attester,
            Err(e) => {
                return SignatureOutcome::Rejected {
                    reason: e.to_string(),
                }
            }
        };
        if !self.attesters.contains(&attester) {
            return SignatureOutcome::Rejected {
                reason: format!("{attester} is not in the attester set"),
            };
        }
        if self.attestation.has_signed(&attester) {
            debug!(attester = %attester, event = "duplicate_signature");
            return SignatureOutcome::Duplicate { attester };
        }

        self.attestation.signatures.push(AttesterSignature {
            attester,
            signature,
        });
        if status == AttestationStatus::Pending && self.attestation.is_quorum_met() {
            self.attestation.status = AttestationStatus::Ready;
            info!(
                message_hash = %self.attestation.message_hash,
                source_domain = %self.attestation.source_domain(),
                nonce = self.attestation.nonce(),
                signatures = self.attestation.signature_count(),
                threshold = self.attestation.threshold,
                event = "attestation_ready"
            );
        }

        SignatureOutcome::Accepted {
            attester,
            signatures: self.attestation.signature_count(),
            threshold: self.attestation.threshold,
            status: self.attestation.status,
        }
    }

    /// Moves a pending attestation past its deadline to `Expired`
    pub(crate) fn expire_if_due(&mut self, now: Instant) -> bool {
        if self.attestation.status != AttestationStatus::Pending || now < self.deadline {
            return false;
        }
        self.attestation.status = AttestationStatus::Expired;
        warn!(
            message_hash = %self.attestation.message_hash,
            source_domain = %self.attestation.source_domain(),
            nonce = self.attestation.nonce(),
            signatures = self.attestation.signature_count(),
            threshold = self.attestation.threshold,
            event = "attestation_expired"
        );
        true
    }

    /// Records that the destination chain reports the message received.
    ///
    /// Expired attestations may be completed too, since the nonce stays
    /// valid on chain.
    pub(crate) fn mark_relayed(&mut self) -> bool {
        match self.attestation.status {
            AttestationStatus::Ready | AttestationStatus::Expired => {
                self.attestation.status = AttestationStatus::Relayed;
                info!(
                    message_hash = %self.attestation.message_hash,
                    destination_domain = %self.attestation.destination_domain(),
                    nonce = self.attestation.nonce(),
                    event = "attestation_relayed"
                );
                true
            }
            AttestationStatus::Pending | AttestationStatus::Relayed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Domain;
    use crate::testing::AttesterKeys;
    use alloy_primitives::U256;
    use std::time::Duration;

    fn message() -> Message {
        Message::new(
            Domain::new(0),
            Domain::new(1),
            7,
            vec![1u8; 20],
            vec![2u8; 20],
            U256::from(100u64),
        )
    }

    fn aggregation(keys: &AttesterKeys, members: usize, threshold: u32) -> Aggregation {
        let set = AttesterSet {
            domain: Domain::new(1),
            attesters: keys.identities()[..members].to_vec(),
            threshold,
            version: 4,
        };
        Aggregation::new(message(), &set, Instant::now() + Duration::from_secs(60))
    }

    #[test]
    fn test_three_of_five_with_duplicate() {
        let keys = AttesterKeys::generate(5);
        let mut agg = aggregation(&keys, 5, 3);
        let hash = message().hash();

        assert!(matches!(
            agg.offer(keys.sign_one(hash, 0)),
            SignatureOutcome::Accepted { signatures: 1, status: AttestationStatus::Pending, .. }
        ));
        assert_eq!(
            agg.offer(keys.sign_one(hash, 0)),
            SignatureOutcome::Duplicate {
                attester: keys.identity(0)
            }
        );
        agg.offer(keys.sign_one(hash, 1));
        assert!(matches!(
            agg.offer(keys.sign_one(hash, 2)),
            SignatureOutcome::Accepted { signatures: 3, status: AttestationStatus::Ready, .. }
        ));
        assert_eq!(agg.status(), AttestationStatus::Ready);
        assert_eq!(agg.attestation().attester_set_version, 4);

        // Extra signatures still count after the quorum
        assert!(matches!(
            agg.offer(keys.sign_one(hash, 3)),
            SignatureOutcome::Accepted { signatures: 4, status: AttestationStatus::Ready, .. }
        ));
    }

    #[test]
    fn test_rejects_outsiders_and_garbage() {
        let keys = AttesterKeys::generate(3);
        let mut agg = aggregation(&keys, 2, 2);
        let hash = message().hash();

        let outsider = agg.offer(keys.sign_one(hash, 2));
        assert!(matches!(outsider, SignatureOutcome::Rejected { .. }));

        let garbage = agg.offer(Bytes::from(vec![0u8; 10]));
        assert!(matches!(garbage, SignatureOutcome::Rejected { .. }));

        // Signature over a different hash recovers to someone else
        let wrong_hash = agg.offer(keys.sign_one([9u8; 32].into(), 0));
        assert!(matches!(wrong_hash, SignatureOutcome::Rejected { .. }));

        assert_eq!(agg.attestation().signature_count(), 0);
        assert_eq!(agg.status(), AttestationStatus::Pending);
    }

    #[test]
    fn test_zero_threshold_never_becomes_ready() {
        let keys = AttesterKeys::generate(1);
        let mut agg = aggregation(&keys, 1, 0);
        agg.offer(keys.sign_one(message().hash(), 0));
        assert_eq!(agg.status(), AttestationStatus::Pending);
    }

    #[test]
    fn test_expiry_and_late_relay() {
        let keys = AttesterKeys::generate(2);
        let mut agg = aggregation(&keys, 2, 2);
        let hash = message().hash();

        assert!(!agg.expire_if_due(Instant::now()));
        assert!(agg.expire_if_due(Instant::now() + Duration::from_secs(61)));
        assert_eq!(agg.status(), AttestationStatus::Expired);

        assert_eq!(
            agg.offer(keys.sign_one(hash, 0)),
            SignatureOutcome::NotPending {
                status: AttestationStatus::Expired
            }
        );

        assert!(agg.mark_relayed());
        assert_eq!(agg.status(), AttestationStatus::Relayed);
        assert!(!agg.mark_relayed());
    }

    #[test]
    fn test_pending_is_not_marked_relayed() {
        let keys = AttesterKeys::generate(1);
        let mut agg = aggregation(&keys, 1, 1);
        assert!(!agg.mark_relayed());
        assert_eq!(agg.status(), AttestationStatus::Pending);
    }
}
