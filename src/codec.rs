//! Payload codec
//!
//! Values are serialized with msgpack and wrapped in a self-describing byte
//! format: `body ‖ flag`, where the one-byte trailer flag records whether the
//! body is compressed. Bodies at or above a 64-byte threshold are zstd
//! compressed; smaller ones are stored as-is, paying a single byte of
//! overhead.
//!
//! Raw `Vec<u8>` and `String` values bypass the format entirely and round-trip
//! verbatim, so callers can pass through already-encoded payloads without
//! framing. A raw write can therefore not be read back through the structured
//! path.

use std::any::{Any, TypeId};
use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CacheError;

/// Bodies shorter than this are stored uncompressed.
pub(crate) const COMPRESSION_THRESHOLD: usize = 64;

pub(crate) const NO_COMPRESSION: u8 = 0x0;
pub(crate) const ZSTD_COMPRESSION: u8 = 0x1;

const ZSTD_LEVEL: i32 = 3;

/// Serialize `value` into the cache payload format.
///
/// A `Vec<u8>` or `String` is returned as its bytes with no trailer.
pub(crate) fn marshal<T>(value: &T) -> Result<Vec<u8>, CacheError>
where
    T: Serialize + Any,
{
    let any = value as &dyn Any;
    if let Some(bytes) = any.downcast_ref::<Vec<u8>>() {
        return Ok(bytes.clone());
    }
    if let Some(s) = any.downcast_ref::<String>() {
        return Ok(s.clone().into_bytes());
    }

    let mut body = PooledBuf::acquire();
    let mut ser = rmp_serde::Serializer::new(&mut *body);
    value.serialize(&mut ser).map_err(CacheError::encode)?;

    if body.len() < COMPRESSION_THRESHOLD {
        let mut out = Vec::with_capacity(body.len() + 1);
        out.extend_from_slice(&body);
        out.push(NO_COMPRESSION);
        return Ok(out);
    }

    let mut out = zstd::stream::encode_all(&body[..], ZSTD_LEVEL).map_err(CacheError::compression)?;
    out.push(ZSTD_COMPRESSION);
    Ok(out)
}

/// Decode a cache payload produced by [`marshal`].
///
/// `Vec<u8>` and `String` destinations receive the bytes verbatim, symmetric
/// with the marshal fast path. The engine short-circuits empty payloads
/// before calling this.
pub(crate) fn unmarshal<T>(bytes: &[u8]) -> Result<T, CacheError>
where
    T: DeserializeOwned + Any,
{
    if TypeId::of::<T>() == TypeId::of::<Vec<u8>>() {
        return Ok(relabel(bytes.to_vec()));
    }
    if TypeId::of::<T>() == TypeId::of::<String>() {
        let s = String::from_utf8(bytes.to_vec()).map_err(CacheError::decode)?;
        return Ok(relabel(s));
    }

    let (flag, body) = match bytes.split_last() {
        Some((&flag, body)) => (flag, body),
        // Empty input; let the decoder report it.
        None => return rmp_serde::from_slice(bytes).map_err(CacheError::decode),
    };

    match flag {
        NO_COMPRESSION => rmp_serde::from_slice(body).map_err(CacheError::decode),
        ZSTD_COMPRESSION => {
            let mut scratch = PooledBuf::acquire();
            zstd::stream::copy_decode(body, &mut *scratch).map_err(CacheError::compression)?;
            rmp_serde::from_slice(&scratch).map_err(CacheError::decode)
        }
        other => Err(CacheError::UnknownCompression(other)),
    }
}

/// Re-types a value whose concrete type was already verified via `TypeId`.
fn relabel<T: Any>(value: impl Any) -> T {
    *(Box::new(value) as Box<dyn Any>)
        .downcast::<T>()
        .expect("caller verified the TypeId")
}

const POOL_MAX_BUFS: usize = 16;
const POOL_MAX_BUF_CAPACITY: usize = 1 << 20;

static BUF_POOL: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());

/// Scratch buffer borrowed from a process-wide pool.
///
/// Returned to the pool on drop, so every exit path of the codec, including
/// errors, recycles its buffer.
struct PooledBuf {
    buf: Vec<u8>,
}

impl PooledBuf {
    fn acquire() -> Self {
        let buf = BUF_POOL.lock().pop().unwrap_or_default();
        Self { buf }
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if self.buf.capacity() > POOL_MAX_BUF_CAPACITY {
            return;
        }
        self.buf.clear();
        let mut pool = BUF_POOL.lock();
        if pool.len() < POOL_MAX_BUFS {
            pool.push(std::mem::take(&mut self.buf));
        }
    }
}

impl Deref for PooledBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        text: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Object {
        str: String,
        num: i64,
    }

    #[test]
    fn struct_round_trip() {
        let value = Object {
            str: "hi".to_owned(),
            num: 42,
        };
        let bytes = marshal(&value).unwrap();
        let decoded: Object = unmarshal(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn raw_bytes_round_trip_verbatim() {
        let value = vec![0u8, 1, 2, 0xff];
        let bytes = marshal(&value).unwrap();
        assert_eq!(bytes, value);
        let decoded: Vec<u8> = unmarshal(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn string_round_trip_verbatim() {
        let value = "already encoded".to_owned();
        let bytes = marshal(&value).unwrap();
        assert_eq!(bytes, value.as_bytes());
        let decoded: String = unmarshal(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn small_body_stays_uncompressed() {
        // msgpack of a single-field struct: fixarray header + str8 header + text.
        let value = Payload {
            text: "x".repeat(60),
        };
        let body = rmp_serde::to_vec(&value).unwrap();
        assert_eq!(body.len(), 63);

        let bytes = marshal(&value).unwrap();
        assert_eq!(bytes.len(), body.len() + 1);
        assert_eq!(*bytes.last().unwrap(), NO_COMPRESSION);

        let decoded: Payload = unmarshal(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn large_body_is_compressed() {
        let value = Payload {
            text: "y".repeat(200),
        };
        let body = rmp_serde::to_vec(&value).unwrap();
        assert!(body.len() >= COMPRESSION_THRESHOLD);

        let bytes = marshal(&value).unwrap();
        assert_eq!(*bytes.last().unwrap(), ZSTD_COMPRESSION);

        let decoded: Payload = unmarshal(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn threshold_body_is_compressed() {
        let value = Payload {
            text: "z".repeat(61),
        };
        assert_eq!(rmp_serde::to_vec(&value).unwrap().len(), COMPRESSION_THRESHOLD);

        let bytes = marshal(&value).unwrap();
        assert_eq!(*bytes.last().unwrap(), ZSTD_COMPRESSION);
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let err = unmarshal::<Payload>(&[0x91, 0xa1, 0x61, 0x7f]).unwrap_err();
        assert!(matches!(err, CacheError::UnknownCompression(0x7f)));
    }

    #[test]
    fn invalid_utf8_string_is_a_decode_error() {
        let err = unmarshal::<String>(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, CacheError::Decode(_)));
    }
}
