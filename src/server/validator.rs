//! Validate records received in `PUT_VALUE` requests

use crate::common::{publisher_from_key, IpnsRecord, PeerId, Record, RecordError};

/// Checks a record before it is stored.
pub trait RecordValidator: std::fmt::Debug + Send + Sync {
    /// Validate `record` received under `key`, returning the publisher and
    /// the decoded record to store.
    fn validate(&self, key: &[u8], record: &Record) -> Result<(PeerId, IpnsRecord), RecordError>;
}

#[derive(Debug, Default, Clone, Copy)]
/// Validates signed name records stored under `/ipns/<publisher>` keys.
pub struct IpnsValidator;

impl RecordValidator for IpnsValidator {
    fn validate(&self, key: &[u8], record: &Record) -> Result<(PeerId, IpnsRecord), RecordError> {
        if record.key != key {
            return Err(RecordError::KeyMismatch);
        }

        let publisher = publisher_from_key(key).ok_or(RecordError::KeyMismatch)?;
        let decoded = IpnsRecord::from_bytes(&record.value)?;

        if decoded.publisher() != publisher {
            return Err(RecordError::PublisherMismatch);
        }

        decoded.verify()?;

        Ok((publisher, decoded))
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use bytes::Bytes;
    use ed25519_dalek::SigningKey;

    use super::*;
    use crate::common::ipns_key;

    fn signed(signer: &SigningKey) -> (Bytes, Record) {
        let publisher = PeerId::from_public_key(&signer.verifying_key());
        let key = ipns_key(&publisher);
        let record = IpnsRecord::new(signer, b"/ipfs/bafy", 1, Duration::from_secs(60));

        (
            key.clone(),
            Record {
                key,
                value: record.to_bytes().unwrap().into(),
            },
        )
    }

    #[test]
    fn valid() {
        let signer = SigningKey::from_bytes(&rand::random());
        let (key, record) = signed(&signer);

        let (publisher, decoded) = IpnsValidator.validate(&key, &record).unwrap();

        assert_eq!(publisher, PeerId::from_public_key(&signer.verifying_key()));
        assert_eq!(decoded.value(), &Bytes::from_static(b"/ipfs/bafy"));
    }

    #[test]
    fn signed_by_someone_else() {
        let signer = SigningKey::from_bytes(&rand::random());
        let (_, record) = signed(&signer);

        let other = PeerId::from_public_key(&SigningKey::from_bytes(&rand::random()).verifying_key());
        let key = ipns_key(&other);
        let record = Record { key: key.clone(), ..record };

        assert_eq!(
            IpnsValidator.validate(&key, &record),
            Err(RecordError::PublisherMismatch)
        );
    }

    #[test]
    fn key_mismatch() {
        let signer = SigningKey::from_bytes(&rand::random());
        let (_, record) = signed(&signer);

        assert_eq!(
            IpnsValidator.validate(b"/ipns/other", &record),
            Err(RecordError::KeyMismatch)
        );

        let not_ipns = Record {
            key: Bytes::from_static(b"/pk/abc"),
            value: record.value,
        };
        assert_eq!(
            IpnsValidator.validate(b"/pk/abc", &not_ipns),
            Err(RecordError::KeyMismatch)
        );
    }

    #[test]
    fn garbage() {
        let key = ipns_key(&PeerId::random());
        let record = Record {
            key: key.clone(),
            value: Bytes::from_static(b"not a record"),
        };

        assert_eq!(
            IpnsValidator.validate(&key, &record),
            Err(RecordError::Malformed)
        );
    }
}
