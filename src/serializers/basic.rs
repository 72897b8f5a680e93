use std::marker::PhantomData;

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Serializer;
use crate::errors::BoxError;

/// Serialize any serde type as compact JSON.
///
/// This is the default serializer: it covers typed structs, plain
/// primitives (strings, numbers, vectors, maps, booleans) and chrono types
/// through their serde representations.
pub struct JsonSerializer<T> {
    _schema: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for JsonSerializer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonSerializer")
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self {
            _schema: PhantomData,
        }
    }
}

impl<T> Serializer<T> for JsonSerializer<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn encode(&self, message: &T) -> Result<Bytes, BoxError> {
        Ok(serde_json::to_vec(message)?.into())
    }

    fn decode(&self, data: &[u8]) -> Result<T, BoxError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Serialize protobuf messages in their wire format.
pub struct ProtobufSerializer<T> {
    _schema: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for ProtobufSerializer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProtobufSerializer")
    }
}

impl<T> Default for ProtobufSerializer<T> {
    fn default() -> Self {
        Self {
            _schema: PhantomData,
        }
    }
}

impl<T> Serializer<T> for ProtobufSerializer<T>
where
    T: prost::Message + Default,
{
    fn encode(&self, message: &T) -> Result<Bytes, BoxError> {
        Ok(message.encode_to_vec().into())
    }

    fn decode(&self, data: &[u8]) -> Result<T, BoxError> {
        Ok(T::decode(data)?)
    }
}

/// Assume the payload is already serialized and pass it through as is.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawSerializer;

impl Serializer<Bytes> for RawSerializer {
    fn encode(&self, message: &Bytes) -> Result<Bytes, BoxError> {
        Ok(message.clone())
    }

    fn decode(&self, data: &[u8]) -> Result<Bytes, BoxError> {
        Ok(Bytes::copy_from_slice(data))
    }
}

impl Serializer<Vec<u8>> for RawSerializer {
    fn encode(&self, message: &Vec<u8>) -> Result<Bytes, BoxError> {
        Ok(Bytes::copy_from_slice(message))
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, BoxError> {
        Ok(data.to_vec())
    }
}

/// Serialize timestamps and dates as bare ISO-8601 strings.
///
/// Unlike the JSON default, the payload carries no quotes: `2022-12-01` or
/// `2022-12-01T10:22:33+00:00`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DatetimeSerializer;

impl Serializer<DateTime<Utc>> for DatetimeSerializer {
    fn encode(&self, message: &DateTime<Utc>) -> Result<Bytes, BoxError> {
        Ok(message.to_rfc3339().into_bytes().into())
    }

    fn decode(&self, data: &[u8]) -> Result<DateTime<Utc>, BoxError> {
        let text = std::str::from_utf8(data)?;
        Ok(DateTime::parse_from_rfc3339(text)?.with_timezone(&Utc))
    }
}

impl Serializer<NaiveDate> for DatetimeSerializer {
    fn encode(&self, message: &NaiveDate) -> Result<Bytes, BoxError> {
        Ok(message.format("%Y-%m-%d").to_string().into_bytes().into())
    }

    fn decode(&self, data: &[u8]) -> Result<NaiveDate, BoxError> {
        let text = std::str::from_utf8(data)?;
        Ok(NaiveDate::parse_from_str(text, "%Y-%m-%d")?)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Parcel {
        id: u64,
        status: String,
    }

    #[test]
    fn json_roundtrip_struct() {
        let ser = JsonSerializer::<Parcel>::default();
        let msg = Parcel {
            id: 13,
            status: "shipped".to_string(),
        };
        let data = ser.encode(&msg).unwrap();
        assert_eq!(&data[..], br#"{"id":13,"status":"shipped"}"#);
        assert_eq!(ser.decode(&data).unwrap(), msg);
    }

    #[test]
    fn json_roundtrip_primitives() {
        let ser = JsonSerializer::<String>::default();
        let data = ser.encode(&"hello".to_string()).unwrap();
        assert_eq!(ser.decode(&data).unwrap(), "hello");

        let ser = JsonSerializer::<Vec<i64>>::default();
        let data = ser.encode(&vec![1, 2, 3]).unwrap();
        assert_eq!(ser.decode(&data).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn raw_passthrough() {
        let ser = RawSerializer;
        let msg = Bytes::from_static(b"\x00\x01\x02");
        assert_eq!(ser.encode(&msg).unwrap(), msg);
        assert_eq!(Serializer::<Bytes>::decode(&ser, &msg).unwrap(), msg);
    }

    #[test]
    fn datetime_iso_roundtrip() {
        let ser = DatetimeSerializer;
        let now: DateTime<Utc> = "2022-12-01T10:22:33Z".parse().unwrap();
        let data = Serializer::<DateTime<Utc>>::encode(&ser, &now).unwrap();
        assert!(data.starts_with(b"2022-12-01T10:22:33"));
        assert_eq!(Serializer::<DateTime<Utc>>::decode(&ser, &data).unwrap(), now);
    }

    #[test]
    fn date_iso_roundtrip() {
        let ser = DatetimeSerializer;
        let day = NaiveDate::from_ymd_opt(2022, 12, 1).unwrap();
        let data = Serializer::<NaiveDate>::encode(&ser, &day).unwrap();
        assert_eq!(&data[..], b"2022-12-01");
        assert_eq!(Serializer::<NaiveDate>::decode(&ser, &data).unwrap(), day);
    }

    #[test]
    fn decode_error_is_reported() {
        let ser = JsonSerializer::<Parcel>::default();
        assert!(ser.decode(b"not json").is_err());
    }
}
