use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

use super::Serializer;
use crate::errors::BoxError;

/// Compress the wrapped serializer's output with gzip.
pub struct GzipSerializer<S> {
    inner: S,
    level: Compression,
}

impl<S> std::fmt::Debug for GzipSerializer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipSerializer")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

impl<S> GzipSerializer<S> {
    /// Wrap `inner` with the strongest compression level.
    pub fn new(inner: S) -> Self {
        Self::with_level(inner, 9)
    }

    /// Wrap `inner` with an explicit compression level (0-9).
    pub fn with_level(inner: S, level: u32) -> Self {
        Self {
            inner,
            level: Compression::new(level),
        }
    }
}

impl<T, S> Serializer<T> for GzipSerializer<S>
where
    S: Serializer<T>,
{
    fn encode(&self, message: &T) -> Result<Bytes, BoxError> {
        let data = self.inner.encode(message)?;
        let mut encoder = GzEncoder::new(Vec::new(), self.level);
        encoder.write_all(&data)?;
        Ok(encoder.finish()?.into())
    }

    fn decode(&self, data: &[u8]) -> Result<T, BoxError> {
        let mut decoder = GzDecoder::new(data);
        let mut plain = Vec::new();
        decoder.read_to_end(&mut plain)?;
        self.inner.decode(&plain)
    }
}

#[derive(Debug, Clone, Copy)]
enum HmacAlgorithm {
    Sha256,
    Sha512,
}

impl HmacAlgorithm {
    fn digest_size(self) -> usize {
        match self {
            HmacAlgorithm::Sha256 => 32,
            HmacAlgorithm::Sha512 => 64,
        }
    }
}

/// Sign the wrapped serializer's output with HMAC.
///
/// The binary digest is prepended to the payload. Verification uses a
/// constant-time comparison and fails decoding when the digest does not
/// match.
pub struct HmacSerializer<S> {
    inner: S,
    key: Vec<u8>,
    algorithm: HmacAlgorithm,
}

impl<S> std::fmt::Debug for HmacSerializer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSerializer")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl<S> HmacSerializer<S> {
    /// Sign with HMAC-SHA512 (the default).
    pub fn sha512(inner: S, key: impl Into<Vec<u8>>) -> Self {
        Self {
            inner,
            key: key.into(),
            algorithm: HmacAlgorithm::Sha512,
        }
    }

    /// Sign with HMAC-SHA256.
    pub fn sha256(inner: S, key: impl Into<Vec<u8>>) -> Self {
        Self {
            inner,
            key: key.into(),
            algorithm: HmacAlgorithm::Sha256,
        }
    }

    fn digest(&self, data: &[u8]) -> Result<Vec<u8>, BoxError> {
        Ok(match self.algorithm {
            HmacAlgorithm::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(&self.key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            HmacAlgorithm::Sha512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(&self.key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        })
    }

    fn verify(&self, data: &[u8], digest: &[u8]) -> Result<(), BoxError> {
        let corrupted = || BoxError::from("the message is corrupted or altered");
        match self.algorithm {
            HmacAlgorithm::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(&self.key)?;
                mac.update(data);
                mac.verify_slice(digest).map_err(|_| corrupted())
            }
            HmacAlgorithm::Sha512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(&self.key)?;
                mac.update(data);
                mac.verify_slice(digest).map_err(|_| corrupted())
            }
        }
    }
}

impl<T, S> Serializer<T> for HmacSerializer<S>
where
    S: Serializer<T>,
{
    fn encode(&self, message: &T) -> Result<Bytes, BoxError> {
        let data = self.inner.encode(message)?;
        let mut signed = self.digest(&data)?;
        signed.extend_from_slice(&data);
        Ok(signed.into())
    }

    fn decode(&self, data: &[u8]) -> Result<T, BoxError> {
        let size = self.algorithm.digest_size();
        if data.len() < size {
            return Err("the message is corrupted or altered".into());
        }
        let (digest, payload) = data.split_at(size);
        self.verify(payload, digest)?;
        self.inner.decode(payload)
    }
}

/// Sign and encrypt the wrapped serializer's output with Fernet.
pub struct FernetSerializer<S> {
    inner: S,
    fernet: fernet::Fernet,
}

impl<S> std::fmt::Debug for FernetSerializer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FernetSerializer")
    }
}

impl<S> FernetSerializer<S> {
    /// Wrap `inner` with the given url-safe base64 key.
    ///
    /// Returns `None` when the key is not a valid Fernet key. Use
    /// [`fernet::Fernet::generate_key`] to produce one.
    pub fn new(inner: S, key: &str) -> Option<Self> {
        Some(Self {
            inner,
            fernet: fernet::Fernet::new(key)?,
        })
    }
}

impl<T, S> Serializer<T> for FernetSerializer<S>
where
    S: Serializer<T>,
{
    fn encode(&self, message: &T) -> Result<Bytes, BoxError> {
        let data = self.inner.encode(message)?;
        Ok(self.fernet.encrypt(&data).into_bytes().into())
    }

    fn decode(&self, data: &[u8]) -> Result<T, BoxError> {
        let token = std::str::from_utf8(data)?;
        let plain = self.fernet.decrypt(token)?;
        self.inner.decode(&plain)
    }
}

#[cfg(test)]
mod tests {
    use super::super::JsonSerializer;
    use super::*;

    #[test]
    fn gzip_roundtrip() {
        let ser = GzipSerializer::new(JsonSerializer::<String>::default());
        let msg = "a".repeat(4096);
        let data = ser.encode(&msg).unwrap();
        assert!(data.len() < msg.len());
        assert_eq!(ser.decode(&data).unwrap(), msg);
    }

    #[test]
    fn hmac_roundtrip() {
        let ser = HmacSerializer::sha512(JsonSerializer::<String>::default(), b"secret".to_vec());
        let data = ser.encode(&"hello".to_string()).unwrap();
        assert_eq!(ser.decode(&data).unwrap(), "hello");
    }

    #[test]
    fn hmac_detects_tampering() {
        let ser = HmacSerializer::sha256(JsonSerializer::<String>::default(), b"secret".to_vec());
        let mut data = ser.encode(&"hello".to_string()).unwrap().to_vec();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        let err = ser.decode(&data).unwrap_err();
        assert_eq!(err.to_string(), "the message is corrupted or altered");
    }

    #[test]
    fn hmac_rejects_wrong_key() {
        let signer = HmacSerializer::sha512(JsonSerializer::<String>::default(), b"one".to_vec());
        let verifier = HmacSerializer::sha512(JsonSerializer::<String>::default(), b"two".to_vec());
        let data = signer.encode(&"hello".to_string()).unwrap();
        assert!(verifier.decode(&data).is_err());
    }

    #[test]
    fn hmac_rejects_truncated_payload() {
        let ser = HmacSerializer::sha512(JsonSerializer::<String>::default(), b"secret".to_vec());
        assert!(ser.decode(b"short").is_err());
    }

    #[test]
    fn fernet_roundtrip() {
        let key = fernet::Fernet::generate_key();
        let ser = FernetSerializer::new(JsonSerializer::<String>::default(), &key).unwrap();
        let data = ser.encode(&"hello".to_string()).unwrap();
        assert!(!data.windows(5).any(|w| w == b"hello"));
        assert_eq!(ser.decode(&data).unwrap(), "hello");
    }

    #[test]
    fn fernet_rejects_bad_key() {
        assert!(FernetSerializer::new(JsonSerializer::<String>::default(), "not a key").is_none());
    }
}
