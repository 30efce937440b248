//! Serde helper for presence-indicating patch fields.

use serde::{Deserialize, Deserializer};

/// Deserializes a field so that an absent key stays `None` (via
/// `#[serde(default)]`) while an explicit `null` becomes `Some(None)`,
/// letting patches distinguish "leave alone" from "clear".
pub(crate) fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}
