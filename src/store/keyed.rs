// =============================================================================
// Ordered numeric-keyed maps for JSON result documents
// =============================================================================
//
// Result maps (horizon -> correlation, threshold -> accuracy, lag -> VR) are
// held as ordered `Vec<(K, f64)>` and written as JSON objects whose keys are
// the numbers rendered as text, in tested order. JSON has no NaN/inf, so
// undefined values are written as `null` and read back as NaN.

use std::fmt::{self, Display};
use std::marker::PhantomData;
use std::str::FromStr;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

fn defined(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

#[allow(clippy::ptr_arg)]
pub fn serialize<K, S>(entries: &Vec<(K, f64)>, serializer: S) -> Result<S::Ok, S::Error>
where
    K: Display,
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (key, value) in entries {
        map.serialize_entry(&key.to_string(), &defined(*value))?;
    }
    map.end()
}

pub fn deserialize<'de, K, D>(deserializer: D) -> Result<Vec<(K, f64)>, D::Error>
where
    K: FromStr,
    K::Err: Display,
    D: Deserializer<'de>,
{
    deserializer.deserialize_map(KeyedVisitor(PhantomData))
}

struct KeyedVisitor<K>(PhantomData<K>);

impl<'de, K> Visitor<'de> for KeyedVisitor<K>
where
    K: FromStr,
    K::Err: Display,
{
    type Value = Vec<(K, f64)>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of numeric keys to numbers or null")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<String, Option<f64>>()? {
            let parsed = key
                .parse::<K>()
                .map_err(|e| de::Error::custom(format!("invalid key '{key}': {e}")))?;
            entries.push((parsed, value.unwrap_or(f64::NAN)));
        }
        Ok(entries)
    }
}

/// A single `f64` written as `null` when undefined.
pub mod nullable {
    use super::*;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        defined(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Doc {
        #[serde(with = "super")]
        by_lag: Vec<(usize, f64)>,
        #[serde(with = "super")]
        by_threshold: Vec<(f64, f64)>,
        #[serde(with = "super::nullable")]
        average: f64,
    }

    #[test]
    fn keys_are_text_in_tested_order() {
        let doc = Doc {
            by_lag: vec![(10, 1.5), (2, f64::NAN), (5, 0.25)],
            by_threshold: vec![(0.3, 0.5)],
            average: f64::NAN,
        };
        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(
            json,
            r#"{"by_lag":{"10":1.5,"2":null,"5":0.25},"by_threshold":{"0.3":0.5},"average":null}"#
        );

        let back: Doc = serde_json::from_str(&json).unwrap();
        assert_eq!(back.by_lag[0], (10, 1.5));
        assert_eq!(back.by_lag[1].0, 2);
        assert!(back.by_lag[1].1.is_nan());
        assert_eq!(back.by_threshold, vec![(0.3, 0.5)]);
        assert!(back.average.is_nan());
    }

    #[test]
    fn non_numeric_key_is_rejected() {
        let json = r#"{"by_lag":{"two":1.0},"by_threshold":{},"average":1.0}"#;
        assert!(serde_json::from_str::<Doc>(json).is_err());
    }
}
