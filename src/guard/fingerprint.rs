//! Fingerprint generation
//!
//! SHA-256 over a canonical encoding of every transaction field plus the
//! check context. Fixed-width fields are written big-endian at their natural
//! width and the calldata is length-prefixed, so no two distinct field sets
//! share an encoding.

use sha2::{Digest, Sha256};

use super::types::{CheckContext, Fingerprint, SafeTransaction};

/// Domain separation tag, bumped if the encoding ever changes
const DOMAIN_TAG: &[u8] = b"safe-delay-guard/v1";

/// Compute the fingerprint of a transaction in the given context
pub fn fingerprint(tx: &SafeTransaction, context: CheckContext) -> Fingerprint {
    let mut hasher = Sha256::new();

    hasher.update(DOMAIN_TAG);
    hasher.update([context.discriminant()]);

    hasher.update(tx.to.as_bytes());
    hasher.update(tx.value.to_be_bytes());
    hasher.update((tx.data.len() as u64).to_be_bytes());
    hasher.update(&tx.data);
    hasher.update([tx.operation.as_u8()]);
    hasher.update(tx.safe_tx_gas.to_be_bytes());
    hasher.update(tx.base_gas.to_be_bytes());
    hasher.update(tx.gas_price.to_be_bytes());
    hasher.update(tx.gas_token.as_bytes());
    hasher.update(tx.refund_receiver.as_bytes());

    Fingerprint::from_bytes(hasher.finalize().into())
}

impl SafeTransaction {
    pub fn fingerprint(&self, context: CheckContext) -> Fingerprint {
        fingerprint(self, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::types::{Address, Operation};
    use proptest::prelude::*;

    fn sample_tx() -> SafeTransaction {
        SafeTransaction {
            to: Address::from_bytes([0x11; 20]),
            value: 5,
            data: vec![0xa9, 0x05, 0x9c, 0xbb],
            operation: Operation::Call,
            safe_tx_gas: 21_000,
            base_gas: 0,
            gas_price: 0,
            gas_token: Address::ZERO,
            refund_receiver: Address::ZERO,
        }
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let tx = sample_tx();
        assert_eq!(
            fingerprint(&tx, CheckContext::Pending),
            fingerprint(&tx.clone(), CheckContext::Pending)
        );
    }

    #[test]
    fn test_contexts_never_alias() {
        let tx = sample_tx();
        assert_ne!(
            tx.fingerprint(CheckContext::Pending),
            tx.fingerprint(CheckContext::AfterExecution)
        );
    }

    #[test]
    fn test_every_field_changes_fingerprint() {
        let base = sample_tx();
        let base_fp = base.fingerprint(CheckContext::Pending);

        let mut variants = Vec::new();

        let mut tx = base.clone();
        tx.to = Address::from_bytes([0x12; 20]);
        variants.push(tx);

        let mut tx = base.clone();
        tx.value += 1;
        variants.push(tx);

        let mut tx = base.clone();
        tx.data.push(0x00);
        variants.push(tx);

        let mut tx = base.clone();
        tx.operation = Operation::DelegateCall;
        variants.push(tx);

        let mut tx = base.clone();
        tx.safe_tx_gas += 1;
        variants.push(tx);

        let mut tx = base.clone();
        tx.base_gas = 1;
        variants.push(tx);

        let mut tx = base.clone();
        tx.gas_price = 1;
        variants.push(tx);

        let mut tx = base.clone();
        tx.gas_token = Address::from_bytes([0x01; 20]);
        variants.push(tx);

        let mut tx = base.clone();
        tx.refund_receiver = Address::from_bytes([0x02; 20]);
        variants.push(tx);

        for variant in variants {
            assert_ne!(variant.fingerprint(CheckContext::Pending), base_fp, "{:?}", variant);
        }
    }

    #[test]
    fn test_payload_boundary_does_not_shift() {
        // Moving a byte from calldata into the gas field must not collide
        let mut a = sample_tx();
        a.data = vec![0x01];
        a.safe_tx_gas = 0;

        let mut b = sample_tx();
        b.data = vec![];
        b.safe_tx_gas = 0x0100_0000_0000_0000;

        assert_ne!(
            a.fingerprint(CheckContext::Pending),
            b.fingerprint(CheckContext::Pending)
        );
    }

    proptest! {
        #[test]
        fn test_distinct_payloads_distinct_fingerprints(
            left in proptest::collection::vec(any::<u8>(), 0..64),
            right in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let mut a = sample_tx();
            a.data = left.clone();
            let mut b = sample_tx();
            b.data = right.clone();

            let same = a.fingerprint(CheckContext::Pending) == b.fingerprint(CheckContext::Pending);
            prop_assert_eq!(same, left == right);
        }
    }
}
