use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{DeserializeAs, SerializeAs};

/// Conda repodata stores timestamps as integers. Older indices used seconds
/// since the epoch, newer ones use milliseconds. Values larger than what fits
/// in seconds until the year 9999 are interpreted as milliseconds.
pub(crate) struct Timestamp;

const MAX_SECONDS_TIMESTAMP: i64 = 253_402_300_799;

impl<'de> DeserializeAs<'de, DateTime<Utc>> for Timestamp {
    fn deserialize_as<D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let timestamp = i64::deserialize(deserializer)?;

        let (secs, millis) = if timestamp > MAX_SECONDS_TIMESTAMP {
            (timestamp / 1000, timestamp % 1000)
        } else {
            (timestamp, 0)
        };

        Utc.timestamp_opt(secs, millis as u32 * 1_000_000)
            .single()
            .ok_or_else(|| serde::de::Error::custom("timestamp out of range"))
    }
}

impl SerializeAs<DateTime<Utc>> for Timestamp {
    fn serialize_as<S>(source: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        source.timestamp_millis().serialize(serializer)
    }
}

/// Serializes a map with its keys in alphabetical order so output files are
/// deterministic.
pub(crate) fn sort_map_alphabetically<K: Ord + Serialize, V: Serialize, S: Serializer>(
    value: &fxhash::FxHashMap<K, V>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    value
        .iter()
        .collect::<BTreeMap<_, _>>()
        .serialize(serializer)
}
