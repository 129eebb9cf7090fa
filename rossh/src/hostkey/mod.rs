//! Host keys and the trust-on-first-use key cache.
//!
//! A [`HostKey`] is the public key a device presented the first time we
//! spoke to it. Keys are kept in known_hosts text form
//! (`"<algorithm> <base64>"`) at the edges and as raw SSH wire bytes inside
//! [`HostKeyRecord`]s.

mod json;
mod store;

pub use json::JsonFileRepository;
pub use store::{HostKeyFetcher, HostKeyRepository, HostKeyStore, MemoryRepository};

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use russh::keys::PublicKey;
use russh::keys::ssh_key::{Algorithm, EcdsaCurve, HashAlg};
use serde::{Deserialize, Serialize};

use crate::error::HostKeyError;

/// Host key algorithms the session layer can verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "ssh-rsa")]
    Rsa,
    #[serde(rename = "ecdsa-sha2-nistp256")]
    EcdsaP256,
    #[serde(rename = "ecdsa-sha2-nistp384")]
    EcdsaP384,
    #[serde(rename = "ecdsa-sha2-nistp521")]
    EcdsaP521,
}

impl KeyType {
    /// Every supported key type, in negotiation preference order.
    pub const ALL: [KeyType; 4] = [
        KeyType::EcdsaP256,
        KeyType::EcdsaP384,
        KeyType::EcdsaP521,
        KeyType::Rsa,
    ];

    /// The SSH algorithm name, as written in known_hosts.
    pub fn name(self) -> &'static str {
        match self {
            KeyType::Rsa => "ssh-rsa",
            KeyType::EcdsaP256 => "ecdsa-sha2-nistp256",
            KeyType::EcdsaP384 => "ecdsa-sha2-nistp384",
            KeyType::EcdsaP521 => "ecdsa-sha2-nistp521",
        }
    }

    /// Map a negotiated algorithm to a key type, if it is one we accept.
    pub fn from_algorithm(algorithm: &Algorithm) -> Option<Self> {
        match algorithm {
            Algorithm::Rsa { .. } => Some(KeyType::Rsa),
            Algorithm::Ecdsa {
                curve: EcdsaCurve::NistP256,
            } => Some(KeyType::EcdsaP256),
            Algorithm::Ecdsa {
                curve: EcdsaCurve::NistP384,
            } => Some(KeyType::EcdsaP384),
            Algorithm::Ecdsa {
                curve: EcdsaCurve::NistP521,
            } => Some(KeyType::EcdsaP521),
            _ => None,
        }
    }

    /// Host key algorithms to offer during key exchange.
    ///
    /// An RSA host key may sign with SHA-2 or SHA-1; all three signature
    /// variants verify the same `ssh-rsa` key.
    pub(crate) fn negotiable_algorithms() -> Vec<Algorithm> {
        vec![
            Algorithm::Ecdsa {
                curve: EcdsaCurve::NistP256,
            },
            Algorithm::Ecdsa {
                curve: EcdsaCurve::NistP384,
            },
            Algorithm::Ecdsa {
                curve: EcdsaCurve::NistP521,
            },
            Algorithm::Rsa {
                hash: Some(HashAlg::Sha512),
            },
            Algorithm::Rsa {
                hash: Some(HashAlg::Sha256),
            },
            Algorithm::Rsa { hash: None },
        ]
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KeyType {
    type Err = HostKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyType::ALL
            .into_iter()
            .find(|kt| kt.name() == s)
            .ok_or_else(|| HostKeyError::UnsupportedAlgorithm(s.to_string()))
    }
}

/// A server public key in one of the supported algorithms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKey {
    key_type: KeyType,
    material: Vec<u8>,
}

impl HostKey {
    /// Create a host key from its type and SSH wire encoding.
    pub fn new(key_type: KeyType, material: impl Into<Vec<u8>>) -> Self {
        Self {
            key_type,
            material: material.into(),
        }
    }

    /// Capture a key presented by a server.
    pub fn from_public_key(key: &PublicKey) -> Result<Self, HostKeyError> {
        let algorithm = key.algorithm();
        let key_type = KeyType::from_algorithm(&algorithm)
            .ok_or_else(|| HostKeyError::UnsupportedAlgorithm(algorithm.as_str().to_string()))?;
        let material = key
            .to_bytes()
            .map_err(|e| HostKeyError::InvalidKey(e.to_string()))?;
        Ok(Self { key_type, material })
    }

    /// Decode into the key type russh verifies against.
    ///
    /// Fails if the material is not a valid key or its embedded algorithm
    /// disagrees with the declared type.
    pub fn to_public_key(&self) -> Result<PublicKey, HostKeyError> {
        let key = PublicKey::from_bytes(&self.material)
            .map_err(|e| HostKeyError::InvalidKey(e.to_string()))?;
        match KeyType::from_algorithm(&key.algorithm()) {
            Some(kt) if kt == self.key_type => Ok(key),
            _ => Err(HostKeyError::InvalidKey(format!(
                "declared {} but material encodes {}",
                self.key_type,
                key.algorithm().as_str()
            ))),
        }
    }

    /// Key algorithm.
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// SSH wire encoding of the key.
    pub fn material(&self) -> &[u8] {
        &self.material
    }

    /// OpenSSH-style SHA256 fingerprint, or `"unknown"` for undecodable keys.
    pub fn fingerprint(&self) -> String {
        self.to_public_key()
            .map(|key| key.fingerprint(HashAlg::Sha256).to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key_type, BASE64.encode(&self.material))
    }
}

impl FromStr for HostKey {
    type Err = HostKeyError;

    /// Parse `"<algorithm> <base64> [comment]"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(name), Some(data)) = (parts.next(), parts.next()) else {
            return Err(HostKeyError::InvalidKey(format!(
                "expected '<algorithm> <base64>', got '{}'",
                s.trim()
            )));
        };

        let key_type = name.parse()?;
        let material = BASE64
            .decode(data)
            .map_err(|e| HostKeyError::InvalidKey(e.to_string()))?;
        if material.is_empty() {
            return Err(HostKeyError::InvalidKey("empty key material".to_string()));
        }

        Ok(Self { key_type, material })
    }
}

/// Persisted host key for one device.
///
/// At most one record exists per hostname. A record is either absent or
/// carries complete key material; records are never deleted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostKeyRecord {
    pub hostname: String,
    pub key_type: KeyType,
    #[serde(with = "base64_material")]
    pub key_material: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl HostKeyRecord {
    /// Record a freshly fetched key.
    pub fn new(hostname: impl Into<String>, key: HostKey) -> Self {
        Self {
            hostname: hostname.into(),
            key_type: key.key_type,
            key_material: key.material,
            fetched_at: Utc::now(),
        }
    }

    /// Whether the record holds usable key material.
    pub fn has_key(&self) -> bool {
        !self.key_material.is_empty()
    }

    /// The stored key, if any.
    pub fn host_key(&self) -> Option<HostKey> {
        self.has_key()
            .then(|| HostKey::new(self.key_type, self.key_material.clone()))
    }
}

mod base64_material {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const P256_KEY: &str = "ecdsa-sha2-nistp256 AAAAE2VjZHNhLXNoYTItbmlzdHAyNTYAAAAIbmlzdHAyNTYAAABBBM2qkHPo2Z5KtBuhwxm21PX1kbnnhB0GYz55lpuNjNhZRKcpo2Hyt8rUTe/0ZHquJib0LhnNbrS8v/8PV++QnTA=";
    pub(crate) const OTHER_P256_KEY: &str = "ecdsa-sha2-nistp256 AAAAE2VjZHNhLXNoYTItbmlzdHAyNTYAAAAIbmlzdHAyNTYAAABBBNBHimzwqjH5t+2JY1q/1XaUYtzMF+g+Iw5xqX82XqGqHeHyrE6aiuXfbWiNkNpC0/55yY3SvTPXPWMrJzVDuTM=";
    const ED25519_KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIKgLgU2voOLKs+5PvH3BNsF7QSE6aXOMglvZug5WyA1e";

    #[test]
    fn test_parse_and_display() {
        let key: HostKey = P256_KEY.parse().unwrap();
        assert_eq!(key.key_type(), KeyType::EcdsaP256);
        assert_eq!(key.to_string(), P256_KEY);
    }

    #[test]
    fn test_parse_ignores_comment() {
        let key: HostKey = format!("{P256_KEY} admin@router1").parse().unwrap();
        assert_eq!(key.to_string(), P256_KEY);
    }

    #[test]
    fn test_decodes_to_matching_public_key() {
        let key: HostKey = P256_KEY.parse().unwrap();
        let public = key.to_public_key().unwrap();
        assert_eq!(
            KeyType::from_algorithm(&public.algorithm()),
            Some(KeyType::EcdsaP256)
        );
        assert_eq!(HostKey::from_public_key(&public).unwrap(), key);
        assert!(key.fingerprint().starts_with("SHA256:"));
    }

    #[test]
    fn test_rejects_unsupported_algorithm() {
        let err = ED25519_KEY.parse::<HostKey>().unwrap_err();
        assert!(matches!(err, HostKeyError::UnsupportedAlgorithm(name) if name == "ssh-ed25519"));
    }

    #[test]
    fn test_rejects_malformed_text() {
        assert!(matches!(
            "ecdsa-sha2-nistp256".parse::<HostKey>(),
            Err(HostKeyError::InvalidKey(_))
        ));
        assert!(matches!(
            "ecdsa-sha2-nistp256 !!!not-base64!!!".parse::<HostKey>(),
            Err(HostKeyError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_declared_type_must_match_material() {
        let p256: HostKey = P256_KEY.parse().unwrap();
        let lying = HostKey::new(KeyType::Rsa, p256.material().to_vec());
        assert!(matches!(
            lying.to_public_key(),
            Err(HostKeyError::InvalidKey(_))
        ));
        assert_eq!(lying.fingerprint(), "unknown");
    }

    #[test]
    fn test_record_serializes_material_as_base64() {
        let key: HostKey = P256_KEY.parse().unwrap();
        let record = HostKeyRecord::new("router1", key.clone());
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["key_type"], "ecdsa-sha2-nistp256");
        assert_eq!(
            json["key_material"].as_str().unwrap(),
            P256_KEY.split_once(' ').unwrap().1
        );

        let back: HostKeyRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.host_key(), Some(key));
    }

    #[test]
    fn test_empty_record_has_no_key() {
        let mut record = HostKeyRecord::new("router1", P256_KEY.parse().unwrap());
        record.key_material.clear();
        assert!(!record.has_key());
        assert!(record.host_key().is_none());
    }
}
