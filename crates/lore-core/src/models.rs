//! Domain models for the activity journal: events, subjects, time ranges,
//! result types and the plain-string wire shape.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Leading operator negating a template field.
pub const NEGATION_OPERATOR: char = '!';

/// Trailing operator requesting a prefix match on a template field.
pub const WILDCARD: char = '*';

/// Subject URIs longer than this are rejected at insert time.
pub const MAX_URI_BYTES: usize = 2000;

/// A record of one user activity, with one or more subjects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    /// Store-assigned id. Zero on events that have not been inserted yet.
    pub id: u32,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    /// What happened, as a symbol URI (e.g. an access or create event).
    pub interpretation: String,
    /// How it happened (user activity, scheduled, ...).
    pub manifestation: String,
    /// URI of the agent, typically an application descriptor URI.
    pub actor: String,
    /// URI of the context the event happened in.
    pub origin: String,
    /// Opaque binary payload.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
    pub subjects: Vec<Subject>,
}

/// A thing an event is about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Subject {
    pub uri: String,
    /// URI after any later rename/move; equals `uri` until then.
    pub current_uri: String,
    pub interpretation: String,
    pub manifestation: String,
    /// Containing location (parent directory, site, ...).
    pub origin: String,
    pub mimetype: String,
    /// Free-text label, usually a display name.
    pub text: String,
    /// Identifier of the storage medium the subject resides on.
    pub storage: String,
}

impl Event {
    /// True when the event's timestamp lies within `range`.
    pub fn in_time_range(&self, range: TimeRange) -> bool {
        range.contains(self.timestamp)
    }
}

/// Current wall-clock time in milliseconds since the epoch.
pub fn timestamp_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Half-open time interval `[begin, end)` in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub begin: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(begin: i64, end: i64) -> Self {
        Self { begin, end }
    }

    /// The range covering all representable timestamps.
    pub fn always() -> Self {
        Self { begin: 0, end: i64::MAX }
    }

    pub fn is_always(self) -> bool {
        self == Self::always()
    }

    pub fn contains(self, timestamp: i64) -> bool {
        timestamp >= self.begin && timestamp < self.end
    }

    /// Intersection of two ranges; `None` when they do not overlap.
    pub fn intersect(self, other: Self) -> Option<Self> {
        let begin = self.begin.max(other.begin);
        let end = self.end.min(other.end);
        (begin < end).then_some(Self { begin, end })
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::always()
    }
}

/// Availability of the storage medium backing a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageState {
    NotAvailable = 0,
    Available = 1,
    Any = 2,
}

impl StorageState {
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::NotAvailable),
            1 => Ok(Self::Available),
            2 => Ok(Self::Any),
            other => Err(Error::InvalidArgument(format!(
                "unknown storage state '{other}'"
            ))),
        }
    }
}

/// Ordering-and-grouping selector applied to query results.
///
/// Discriminants are the wire values; [`ResultType::Relevancy`] is only
/// meaningful for full-text searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultType {
    MostRecentEvents = 0,
    LeastRecentEvents = 1,
    MostRecentSubjects = 2,
    LeastRecentSubjects = 3,
    MostPopularSubjects = 4,
    LeastPopularSubjects = 5,
    MostPopularActor = 6,
    LeastPopularActor = 7,
    MostRecentActor = 8,
    LeastRecentActor = 9,
    MostRecentOrigin = 10,
    LeastRecentOrigin = 11,
    MostPopularOrigin = 12,
    LeastPopularOrigin = 13,
    OldestActor = 14,
    MostRecentSubjectInterpretation = 15,
    LeastRecentSubjectInterpretation = 16,
    MostPopularSubjectInterpretation = 17,
    LeastPopularSubjectInterpretation = 18,
    MostRecentMimeType = 19,
    LeastRecentMimeType = 20,
    MostPopularMimeType = 21,
    LeastPopularMimeType = 22,
    MostRecentCurrentUri = 23,
    LeastRecentCurrentUri = 24,
    MostPopularCurrentUri = 25,
    LeastPopularCurrentUri = 26,
    MostRecentEventOrigin = 27,
    LeastRecentEventOrigin = 28,
    MostPopularEventOrigin = 29,
    LeastPopularEventOrigin = 30,
    Relevancy = 100,
}

/// Column a coalescing result type groups candidate rows by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupColumn {
    SubjectUri,
    Actor,
    SubjectOrigin,
    SubjectInterpretation,
    MimeType,
    CurrentUri,
    EventOrigin,
}

impl GroupColumn {
    /// Name of the id-valued column in `event_view`.
    pub fn view_column(self) -> &'static str {
        match self {
            Self::SubjectUri => "subj_id",
            Self::Actor => "actor",
            Self::SubjectOrigin => "subj_origin",
            Self::SubjectInterpretation => "subj_interpretation",
            Self::MimeType => "subj_mimetype",
            Self::CurrentUri => "subj_id_current",
            Self::EventOrigin => "origin",
        }
    }
}

impl ResultType {
    pub fn from_u32(value: u32) -> Result<Self> {
        use ResultType::*;
        Ok(match value {
            0 => MostRecentEvents,
            1 => LeastRecentEvents,
            2 => MostRecentSubjects,
            3 => LeastRecentSubjects,
            4 => MostPopularSubjects,
            5 => LeastPopularSubjects,
            6 => MostPopularActor,
            7 => LeastPopularActor,
            8 => MostRecentActor,
            9 => LeastRecentActor,
            10 => MostRecentOrigin,
            11 => LeastRecentOrigin,
            12 => MostPopularOrigin,
            13 => LeastPopularOrigin,
            14 => OldestActor,
            15 => MostRecentSubjectInterpretation,
            16 => LeastRecentSubjectInterpretation,
            17 => MostPopularSubjectInterpretation,
            18 => LeastPopularSubjectInterpretation,
            19 => MostRecentMimeType,
            20 => LeastRecentMimeType,
            21 => MostPopularMimeType,
            22 => LeastPopularMimeType,
            23 => MostRecentCurrentUri,
            24 => LeastRecentCurrentUri,
            25 => MostPopularCurrentUri,
            26 => LeastPopularCurrentUri,
            27 => MostRecentEventOrigin,
            28 => LeastRecentEventOrigin,
            29 => MostPopularEventOrigin,
            30 => LeastPopularEventOrigin,
            100 => Relevancy,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown result type '{other}'"
                )));
            }
        })
    }

    /// Column this result type groups by, or `None` for plain event lists.
    pub fn group_column(self) -> Option<GroupColumn> {
        use ResultType::*;
        match self {
            MostRecentSubjects | LeastRecentSubjects | MostPopularSubjects
            | LeastPopularSubjects => Some(GroupColumn::SubjectUri),
            MostPopularActor | LeastPopularActor | MostRecentActor | LeastRecentActor
            | OldestActor => Some(GroupColumn::Actor),
            MostRecentOrigin | LeastRecentOrigin | MostPopularOrigin | LeastPopularOrigin => {
                Some(GroupColumn::SubjectOrigin)
            }
            MostRecentSubjectInterpretation
            | LeastRecentSubjectInterpretation
            | MostPopularSubjectInterpretation
            | LeastPopularSubjectInterpretation => Some(GroupColumn::SubjectInterpretation),
            MostRecentMimeType | LeastRecentMimeType | MostPopularMimeType
            | LeastPopularMimeType => Some(GroupColumn::MimeType),
            MostRecentCurrentUri | LeastRecentCurrentUri | MostPopularCurrentUri
            | LeastPopularCurrentUri => Some(GroupColumn::CurrentUri),
            MostRecentEventOrigin | LeastRecentEventOrigin | MostPopularEventOrigin
            | LeastPopularEventOrigin => Some(GroupColumn::EventOrigin),
            MostRecentEvents | LeastRecentEvents | Relevancy => None,
        }
    }

    /// True when candidate rows must be coalesced by the result shaper.
    pub fn is_coalescing(self) -> bool {
        self.group_column().is_some()
    }

    /// True when groups are ranked by how often the key occurs rather than
    /// by the representative timestamp. The payload is the ascending flag.
    pub fn popularity(self) -> Option<bool> {
        use ResultType::*;
        match self {
            MostPopularSubjects | MostPopularActor | MostPopularOrigin
            | MostPopularSubjectInterpretation | MostPopularMimeType | MostPopularCurrentUri
            | MostPopularEventOrigin => Some(false),
            LeastPopularSubjects | LeastPopularActor | LeastPopularOrigin
            | LeastPopularSubjectInterpretation | LeastPopularMimeType
            | LeastPopularCurrentUri | LeastPopularEventOrigin => Some(true),
            _ => None,
        }
    }

    /// True when timestamps sort ascending (least-recent and oldest tags).
    pub fn time_ascending(self) -> bool {
        use ResultType::*;
        matches!(
            self,
            LeastRecentEvents
                | LeastRecentSubjects
                | LeastPopularSubjects
                | LeastPopularActor
                | LeastRecentActor
                | LeastRecentOrigin
                | LeastPopularOrigin
                | OldestActor
                | LeastRecentSubjectInterpretation
                | LeastPopularSubjectInterpretation
                | LeastRecentMimeType
                | LeastPopularMimeType
                | LeastRecentCurrentUri
                | LeastPopularCurrentUri
                | LeastRecentEventOrigin
                | LeastPopularEventOrigin
        )
    }

    /// True when the group representative carries the minimum timestamp of
    /// its group instead of the maximum.
    pub fn aggregates_min(self) -> bool {
        self == Self::OldestActor || (self.is_coalescing() && self.time_ascending())
    }
}

/// Event as it crosses the process boundary: a metadata string vector, one
/// string vector per subject, and the payload bytes. Unset fields are empty
/// strings, never null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent(pub Vec<String>, pub Vec<Vec<String>>, pub Vec<u8>);

impl WireEvent {
    /// Metadata vector layout.
    const METADATA_LEN: usize = 6;
    /// Subject vector layout.
    const SUBJECT_LEN: usize = 8;
}

impl From<&Event> for WireEvent {
    fn from(event: &Event) -> Self {
        let id = if event.id == 0 { String::new() } else { event.id.to_string() };
        let metadata = vec![
            id,
            event.timestamp.to_string(),
            event.interpretation.clone(),
            event.manifestation.clone(),
            event.actor.clone(),
            event.origin.clone(),
        ];
        let subjects = event
            .subjects
            .iter()
            .map(|s| {
                vec![
                    s.uri.clone(),
                    s.current_uri.clone(),
                    s.interpretation.clone(),
                    s.manifestation.clone(),
                    s.origin.clone(),
                    s.mimetype.clone(),
                    s.text.clone(),
                    s.storage.clone(),
                ]
            })
            .collect();
        WireEvent(metadata, subjects, event.payload.clone())
    }
}

impl TryFrom<WireEvent> for Event {
    type Error = Error;

    fn try_from(wire: WireEvent) -> Result<Event> {
        let WireEvent(metadata, subjects, payload) = wire;
        if metadata.len() != WireEvent::METADATA_LEN {
            return Err(Error::InvalidArgument(format!(
                "event metadata must have {} fields, got {}",
                WireEvent::METADATA_LEN,
                metadata.len()
            )));
        }
        let parse_number = |value: &str, what: &str| -> Result<i64> {
            if value.is_empty() {
                return Ok(0);
            }
            value
                .parse::<i64>()
                .map_err(|_| Error::InvalidArgument(format!("non-integer {what} '{value}'")))
        };
        let id = u32::try_from(parse_number(&metadata[0], "event id")?)
            .map_err(|_| Error::InvalidArgument("event id out of range".into()))?;
        let timestamp = parse_number(&metadata[1], "timestamp")?;

        let mut parsed_subjects = Vec::with_capacity(subjects.len());
        for subject in subjects {
            if subject.len() != WireEvent::SUBJECT_LEN {
                return Err(Error::InvalidArgument(format!(
                    "subject must have {} fields, got {}",
                    WireEvent::SUBJECT_LEN,
                    subject.len()
                )));
            }
            let mut fields = subject.into_iter();
            // Order fixed by the wire contract; next() cannot fail after the
            // length check above.
            parsed_subjects.push(Subject {
                uri: fields.next().unwrap_or_default(),
                current_uri: fields.next().unwrap_or_default(),
                interpretation: fields.next().unwrap_or_default(),
                manifestation: fields.next().unwrap_or_default(),
                origin: fields.next().unwrap_or_default(),
                mimetype: fields.next().unwrap_or_default(),
                text: fields.next().unwrap_or_default(),
                storage: fields.next().unwrap_or_default(),
            });
        }

        Ok(Event {
            id,
            timestamp,
            interpretation: metadata[2].clone(),
            manifestation: metadata[3].clone(),
            actor: metadata[4].clone(),
            origin: metadata[5].clone(),
            payload,
            subjects: parsed_subjects,
        })
    }
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
