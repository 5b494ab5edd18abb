/*!
 * Serde utilities for loosely typed invocation events and configuration.
 *
 * Dispatch events arrive from heterogeneous callers (consoles, schedulers, other
 * dispatchers) and configuration can come from environment variables, so integer
 * fields may be encoded either as JSON numbers or as numeric strings. These helpers
 * accept both, and reject anything that is not a whole number.
 */

use serde::{Deserialize, Deserializer};
use serde_json::Value;

fn integer_from_value<E: serde::de::Error>(value: Value) -> std::result::Result<u64, E> {
    match value {
        Value::Number(n) => n.as_u64().ok_or_else(|| {
            E::custom(format!("Expected a non-negative integer, found: {n}"))
        }),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| E::custom(format!("Cannot parse '{s}' as a non-negative integer"))),
        other => Err(E::custom(format!(
            "Expected integer value, found: {other}"
        ))),
    }
}

/// Deserialize a required integer encoded as a number or a numeric string.
///
/// ```rust
/// use serde::Deserialize;
/// use tasker_fanout::utils::serde::deserialize_integer;
///
/// #[derive(Deserialize)]
/// struct Event {
///     #[serde(deserialize_with = "deserialize_integer")]
///     batch_size: u64,
/// }
///
/// let event: Event = serde_json::from_str(r#"{"batch_size": "50"}"#).unwrap();
/// assert_eq!(event.batch_size, 50);
/// ```
pub fn deserialize_integer<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    integer_from_value(value)
}

/// Deserialize an optional integer; `null` and a missing field both yield `None`.
///
/// Use together with `#[serde(default)]` so an absent field is accepted.
pub fn deserialize_optional_integer<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => integer_from_value(value).map(Some),
    }
}

/// Required `u32` variant used for tree levels.
pub fn deserialize_level<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let n = deserialize_integer(deserializer)?;
    u32::try_from(n).map_err(|_| D::Error::custom(format!("Level value {n} exceeds u32::MAX")))
}

/// Optional `u32` variant used for tree levels.
pub fn deserialize_optional_level<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    match deserialize_optional_integer(deserializer)? {
        None => Ok(None),
        Some(n) => u32::try_from(n)
            .map(Some)
            .map_err(|_| D::Error::custom(format!("Level value {n} exceeds u32::MAX"))),
    }
}
