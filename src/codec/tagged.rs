//! JSON extension for values outside plain JSON types.
//!
//! Non-JSON values travel as tagged objects:
//!
//! ```text
//! { "__type": "datetime", "value": "2026-10-16T08:30:00Z" }
//! { "__type": "set",      "value": [1, 2, 3] }
//! { "__type": "file",     "value": "<base64>", "name": "a.png", "mime": "image/png" }
//! ```
//!
//! Widget state fields opt in with `#[serde(with = "wirestate::codec::tagged::datetime")]`
//! or `#[serde(with = "wirestate::codec::tagged::set")]`. The client runtime works on
//! untyped values and uses [`Tagged`] to recognise and restore them.

use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Tag key used by every extension object.
pub const TYPE_KEY: &str = "__type";

/// A recognised tagged value.
#[derive(Debug, Clone, PartialEq)]
pub enum Tagged {
    DateTime(DateTime<Utc>),
    Set(Vec<Value>),
    File(FileUpload),
}

/// Binary upload carried as a public field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Tagged {
    /// Recognise a tagged object. Plain values return `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let kind = obj.get(TYPE_KEY)?.as_str()?;
        let inner = obj.get("value")?;
        match kind {
            "datetime" => {
                let parsed = DateTime::parse_from_rfc3339(inner.as_str()?).ok()?;
                Some(Self::DateTime(parsed.with_timezone(&Utc)))
            }
            "set" => {
                let mut items = inner.as_array()?.clone();
                dedup_values(&mut items);
                Some(Self::Set(items))
            }
            "file" => {
                let bytes = general_purpose::STANDARD.decode(inner.as_str()?).ok()?;
                Some(Self::File(FileUpload {
                    name: str_field(obj, "name"),
                    mime: str_field(obj, "mime"),
                    bytes,
                }))
            }
            _ => None,
        }
    }

    /// Encode back into the tagged object form.
    pub fn to_value(&self) -> Value {
        match self {
            Self::DateTime(dt) => json!({ TYPE_KEY: "datetime", "value": dt.to_rfc3339() }),
            Self::Set(items) => json!({ TYPE_KEY: "set", "value": items }),
            Self::File(file) => json!({
                TYPE_KEY: "file",
                "value": general_purpose::STANDARD.encode(&file.bytes),
                "name": file.name,
                "mime": file.mime,
            }),
        }
    }
}

/// Whether a value is a binary upload (sent as a form part, not JSON).
pub fn is_file(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|o| o.get(TYPE_KEY))
        .and_then(Value::as_str)
        == Some("file")
}

fn str_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Sets carry no order guarantee but must not repeat members.
fn dedup_values(items: &mut Vec<Value>) {
    let mut seen: Vec<Value> = Vec::with_capacity(items.len());
    items.retain(|v| {
        if seen.contains(v) {
            false
        } else {
            seen.push(v.clone());
            true
        }
    });
}

#[derive(Serialize)]
struct TaggedRef<'a, T: ?Sized> {
    #[serde(rename = "__type")]
    kind: &'static str,
    value: &'a T,
}

#[derive(Deserialize)]
struct TaggedOwned<T> {
    #[serde(rename = "__type")]
    kind: String,
    value: T,
}

/// Accept both the tagged form and the bare inner value.
#[derive(Deserialize)]
#[serde(untagged)]
enum MaybeTagged<T> {
    Tagged(TaggedOwned<T>),
    Plain(T),
}

impl<T> MaybeTagged<T> {
    fn into_inner<E: serde::de::Error>(self, expected: &str) -> Result<T, E> {
        match self {
            Self::Tagged(t) if t.kind == expected => Ok(t.value),
            Self::Tagged(t) => Err(E::custom(format!(
                "expected tagged `{expected}`, found `{}`",
                t.kind
            ))),
            Self::Plain(v) => Ok(v),
        }
    }
}

/// `#[serde(with = "...")]` adapter for `DateTime<Utc>`.
pub mod datetime {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        TaggedRef {
            kind: "datetime",
            value: &value.to_rfc3339(),
        }
        .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw: String = MaybeTagged::deserialize(d)?.into_inner("datetime")?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// `#[serde(with = "...")]` adapter for `BTreeSet<T>`.
pub mod set {
    use super::*;
    use serde::{Deserializer, Serializer, de::DeserializeOwned};
    use std::collections::BTreeSet;

    pub fn serialize<S, T>(value: &BTreeSet<T>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        TaggedRef { kind: "set", value }.serialize(s)
    }

    pub fn deserialize<'de, D, T>(d: D) -> Result<BTreeSet<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Ord,
    {
        let items: Vec<T> = MaybeTagged::deserialize(d)?.into_inner("set")?;
        Ok(items.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Event {
        #[serde(with = "crate::codec::tagged::datetime")]
        at: DateTime<Utc>,
        #[serde(with = "crate::codec::tagged::set")]
        tags: BTreeSet<String>,
    }

    #[test]
    fn test_serde_adapters_emit_tagged_objects() {
        let event = Event {
            at: DateTime::parse_from_rfc3339("2026-10-16T08:30:00Z")
                .unwrap()
                .with_timezone(&Utc),
            tags: ["b", "a"].iter().map(|s| s.to_string()).collect(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["at"][TYPE_KEY], "datetime");
        assert_eq!(value["tags"][TYPE_KEY], "set");
        assert_eq!(value["tags"]["value"], json!(["a", "b"]));

        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_adapters_accept_plain_values() {
        let value = json!({ "at": "2026-01-01T00:00:00+02:00", "tags": ["x"] });
        let event: Event = serde_json::from_value(value).unwrap();
        assert_eq!(event.at.to_rfc3339(), "2025-12-31T22:00:00+00:00");
        assert!(event.tags.contains("x"));
    }

    #[test]
    fn test_adapter_rejects_wrong_tag() {
        let value = json!({ "at": { "__type": "set", "value": "2026-01-01T00:00:00Z" }, "tags": [] });
        assert!(serde_json::from_value::<Event>(value).is_err());
    }

    #[test]
    fn test_untyped_recognition() {
        let set = json!({ "__type": "set", "value": [1, 2, 2, 3] });
        assert_eq!(
            Tagged::from_value(&set),
            Some(Tagged::Set(vec![json!(1), json!(2), json!(3)]))
        );
        assert_eq!(Tagged::from_value(&json!({ "value": 1 })), None);
        assert_eq!(Tagged::from_value(&json!("plain")), None);
    }

    #[test]
    fn test_file_roundtrip_and_detection() {
        let file = Tagged::File(FileUpload {
            name: "a.txt".into(),
            mime: "text/plain".into(),
            bytes: b"hello".to_vec(),
        });
        let value = file.to_value();
        assert!(is_file(&value));
        assert_eq!(Tagged::from_value(&value), Some(file));
        assert!(!is_file(&json!({ "__type": "set", "value": [] })));
    }
}
