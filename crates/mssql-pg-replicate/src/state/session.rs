//! On-disk shape of a progress file.

use super::PhaseRecord;
use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Format version written by this build.
pub const PROGRESS_FILE_VERSION: u32 = 1;

/// Files written before versioning was introduced carry no `version` field.
pub const LEGACY_VERSION: u32 = 0;

fn legacy_version() -> u32 {
    LEGACY_VERSION
}

/// Per-table, per-phase progress of one run kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSession {
    /// File format version.
    #[serde(default = "legacy_version")]
    pub version: u32,

    /// When this session was created.
    #[serde(default = "Utc::now", with = "timestamp")]
    pub session_start: DateTime<Utc>,

    /// Time of the last persisted mutation.
    #[serde(default = "Utc::now", with = "timestamp")]
    pub last_updated: DateTime<Utc>,

    /// Table name -> phase name -> record, in insertion order.
    #[serde(default)]
    pub tables: TableEntries,
}

impl ProgressSession {
    /// Create an empty session stamped with the current time.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            version: PROGRESS_FILE_VERSION,
            session_start: now,
            last_updated: now,
            tables: TableEntries::default(),
        }
    }

    /// Whether the file was written before versioning.
    pub fn is_legacy(&self) -> bool {
        self.version == LEGACY_VERSION
    }
}

impl Default for ProgressSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Table entries that keep the order in which tables were first recorded.
///
/// Serialized as a JSON object; the order of keys in the file is the
/// iteration order after loading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableEntries(Vec<(String, BTreeMap<String, PhaseRecord>)>);

impl TableEntries {
    pub fn get(&self, table: &str) -> Option<&BTreeMap<String, PhaseRecord>> {
        self.0.iter().find(|(name, _)| name == table).map(|(_, phases)| phases)
    }

    /// Phases of `table`, appending an empty entry if the table is new.
    pub fn entry(&mut self, table: &str) -> &mut BTreeMap<String, PhaseRecord> {
        let idx = match self.0.iter().position(|(name, _)| name == table) {
            Some(idx) => idx,
            None => {
                self.0.push((table.to_string(), BTreeMap::new()));
                self.0.len() - 1
            }
        };
        &mut self.0[idx].1
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, PhaseRecord>)> {
        self.0.iter().map(|(name, phases)| (name.as_str(), phases))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for TableEntries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, phases) in &self.0 {
            map.serialize_entry(name, phases)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TableEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = TableEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of table names to phase records")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = TableEntries::default();
                while let Some((name, phases)) =
                    access.next_entry::<String, BTreeMap<String, PhaseRecord>>()?
                {
                    // A repeated key replaces the earlier value in place.
                    *entries.entry(&name) = phases;
                }
                Ok(entries)
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// RFC 3339 timestamps; offset-less values are read as UTC.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn format(value: &DateTime<Utc>) -> String {
        value.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    }

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(dt) => serializer.serialize_str(&super::format(dt)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", raw))),
                None => Ok(None),
            }
        }
    }
}
