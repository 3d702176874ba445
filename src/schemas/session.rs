use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use time::{
    format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime,
    PrimitiveDateTime,
};
use validator::Validate;

pub type ItemId = String;
pub type WarningId = String;
pub type AnswerValue = serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Item {
    #[validate(length(min = 1, message = "item id must not be empty"))]
    pub id: ItemId,
    #[serde(default)]
    pub title: Option<String>,
    /// Overrides the engine-wide reveal delay for this item.
    #[serde(default, alias = "revealAfterSeconds")]
    pub reveal_after_seconds: Option<u64>,
}

impl Item {
    pub fn new(id: impl Into<ItemId>) -> Self {
        Self { id: id.into(), title: None, reveal_after_seconds: None }
    }
}

/// Read-only session description served by the backend.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SessionDescriptor {
    #[serde(alias = "sessionId")]
    #[validate(length(min = 1, message = "session_id must not be empty"))]
    pub session_id: String,
    #[serde(alias = "userId")]
    #[validate(length(min = 1, message = "user_id must not be empty"))]
    pub user_id: String,
    #[serde(
        default,
        alias = "startTime",
        deserialize_with = "deserialize_option_offset_datetime_flexible"
    )]
    pub start_time: Option<OffsetDateTime>,
    #[serde(
        default,
        alias = "endTime",
        deserialize_with = "deserialize_option_offset_datetime_flexible"
    )]
    pub end_time: Option<OffsetDateTime>,
    #[serde(default, alias = "durationSeconds")]
    #[validate(range(
        min = 1,
        max = 31_536_000,
        message = "duration_seconds must be between one second and one year"
    ))]
    pub duration_seconds: Option<i64>,
    #[validate(length(min = 1, message = "session must contain at least one item"))]
    #[validate(nested)]
    pub items: Vec<Item>,
}

impl SessionDescriptor {
    pub fn has_item(&self, item_id: &str) -> bool {
        self.items.iter().any(|item| item.id == item_id)
    }

    pub fn item(&self, item_id: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub(crate) fn duplicate_item_id(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.items.iter().map(|item| item.id.as_str()).find(|id| !seen.insert(*id))
    }
}

/// Absolute deadline of a session. Fixed once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlineState {
    pub start_epoch_ms: i64,
    pub end_epoch_ms: i64,
}

impl DeadlineState {
    pub fn duration_ms(&self) -> i64 {
        self.end_epoch_ms.saturating_sub(self.start_epoch_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedAnswer {
    pub value: AnswerValue,
    #[serde(default)]
    pub is_correct: Option<bool>,
    #[serde(default)]
    pub score: Option<f64>,
    pub confirmed_at_epoch_ms: i64,
}

/// Backend acknowledgement of a single item answer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Confirmation {
    #[serde(default, alias = "isCorrect")]
    pub is_correct: Option<bool>,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Active,
    Submitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Unanswered,
    Draft,
    Confirmed,
}

/// Durable per-session, per-user record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub session_id: String,
    pub user_id: String,
    pub current_item_index: usize,
    #[serde(default)]
    pub draft_answers: BTreeMap<ItemId, AnswerValue>,
    #[serde(default)]
    pub confirmed_answers: BTreeMap<ItemId, ConfirmedAnswer>,
    #[serde(default)]
    pub warnings_fired: BTreeSet<WarningId>,
    #[serde(default)]
    pub reveal_consumed: BTreeSet<ItemId>,
    pub deadline: DeadlineState,
    #[serde(default)]
    pub last_persisted_at_epoch_ms: i64,
    /// Set once the backend confirmed the final submit. A record carrying it
    /// only survives when removing it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at_epoch_ms: Option<i64>,
}

impl PersistedSession {
    pub fn new(session_id: &str, user_id: &str, deadline: DeadlineState) -> Self {
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            current_item_index: 0,
            draft_answers: BTreeMap::new(),
            confirmed_answers: BTreeMap::new(),
            warnings_fired: BTreeSet::new(),
            reveal_consumed: BTreeSet::new(),
            deadline,
            last_persisted_at_epoch_ms: 0,
            submitted_at_epoch_ms: None,
        }
    }

    pub fn item_status(&self, item_id: &str) -> ItemStatus {
        if self.confirmed_answers.contains_key(item_id) {
            ItemStatus::Confirmed
        } else if self.draft_answers.contains_key(item_id) {
            ItemStatus::Draft
        } else {
            ItemStatus::Unanswered
        }
    }

    /// Drops entries that no longer belong to the descriptor and restores the
    /// draft/confirmed exclusivity. Returns how many entries were dropped.
    pub(crate) fn sanitize(&mut self, descriptor: &SessionDescriptor) -> usize {
        let before = self.draft_answers.len() + self.confirmed_answers.len();

        self.confirmed_answers.retain(|item_id, _| descriptor.has_item(item_id));
        let confirmed = &self.confirmed_answers;
        self.draft_answers
            .retain(|item_id, _| descriptor.has_item(item_id) && !confirmed.contains_key(item_id));

        if self.current_item_index >= descriptor.items.len() {
            self.current_item_index = descriptor.items.len().saturating_sub(1);
        }

        before - (self.draft_answers.len() + self.confirmed_answers.len())
    }

    /// Shallow merge. Append-only sets are unioned and confirmed answers are
    /// never overwritten, so a patch can only grow them.
    pub(crate) fn apply(&mut self, patch: SessionPatch) {
        if let Some(index) = patch.current_item_index {
            self.current_item_index = index;
        }
        if let Some(drafts) = patch.draft_answers {
            self.draft_answers = drafts;
        }
        if let Some(confirmed) = patch.confirmed_answers {
            for (item_id, answer) in confirmed {
                self.confirmed_answers.entry(item_id).or_insert(answer);
            }
        }
        let confirmed = &self.confirmed_answers;
        self.draft_answers.retain(|item_id, _| !confirmed.contains_key(item_id));
        if let Some(warnings) = patch.warnings_fired {
            self.warnings_fired.extend(warnings);
        }
        if let Some(revealed) = patch.reveal_consumed {
            self.reveal_consumed.extend(revealed);
        }
    }
}

/// Partial update for [`PersistedSession`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub current_item_index: Option<usize>,
    pub draft_answers: Option<BTreeMap<ItemId, AnswerValue>>,
    pub confirmed_answers: Option<BTreeMap<ItemId, ConfirmedAnswer>>,
    pub warnings_fired: Option<BTreeSet<WarningId>>,
    pub reveal_consumed: Option<BTreeSet<ItemId>>,
}

fn parse_offset_datetime_flexible(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(value) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(value);
    }

    // Naive timestamps are treated as UTC.
    if let Ok(value) = PrimitiveDateTime::parse(
        raw,
        &format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    ) {
        return Some(value.assume_utc());
    }
    if let Ok(value) =
        PrimitiveDateTime::parse(raw, &format_description!("[year]-[month]-[day]T[hour]:[minute]"))
    {
        return Some(value.assume_utc());
    }

    None
}

fn deserialize_option_offset_datetime_flexible<'de, D>(
    deserializer: D,
) -> Result<Option<OffsetDateTime>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        Some(value) => parse_offset_datetime_flexible(&value)
            .ok_or_else(|| D::Error::custom(format!("invalid datetime: {value}")))
            .map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn descriptor(items: &[&str]) -> SessionDescriptor {
        SessionDescriptor {
            session_id: "s-1".to_string(),
            user_id: "u-1".to_string(),
            start_time: None,
            end_time: None,
            duration_seconds: Some(600),
            items: items.iter().map(|id| Item::new(*id)).collect(),
        }
    }

    #[test]
    fn descriptor_deserializes_camel_case_and_naive_times() {
        let raw = json!({
            "sessionId": "s-1",
            "userId": "u-1",
            "startTime": "2025-01-02T10:00",
            "endTime": "2025-01-02T11:00:00+00:00",
            "items": [{ "id": "q1", "revealAfterSeconds": 30 }, { "id": "q2" }]
        });
        let parsed: SessionDescriptor = serde_json::from_value(raw).expect("descriptor");

        assert_eq!(parsed.start_time, Some(datetime!(2025-01-02 10:00 UTC)));
        assert_eq!(parsed.end_time, Some(datetime!(2025-01-02 11:00 UTC)));
        assert_eq!(parsed.items[0].reveal_after_seconds, Some(30));
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn descriptor_validation_rejects_empty_and_duplicate_items() {
        assert!(descriptor(&[]).validate().is_err());
        assert_eq!(descriptor(&["q1", "q2", "q1"]).duplicate_item_id(), Some("q1"));
        assert_eq!(descriptor(&["q1", "q2"]).duplicate_item_id(), None);

        let mut negative = descriptor(&["q1"]);
        negative.duration_seconds = Some(0);
        assert!(negative.validate().is_err());

        let mut endless = descriptor(&["q1"]);
        endless.duration_seconds = Some(i64::MAX / 100);
        let errors = endless.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("duration_seconds"));

        let mut blank = descriptor(&["q1"]);
        blank.items.push(Item::new(""));
        assert!(blank.validate().is_err());
    }

    #[test]
    fn apply_unions_append_only_sets() {
        let deadline = DeadlineState { start_epoch_ms: 0, end_epoch_ms: 600_000 };
        let mut record = PersistedSession::new("s-1", "u-1", deadline);
        record.warnings_fired.insert("300".to_string());
        record.reveal_consumed.insert("q1".to_string());

        record.apply(SessionPatch {
            warnings_fired: Some(BTreeSet::from(["60".to_string()])),
            reveal_consumed: Some(BTreeSet::new()),
            ..SessionPatch::default()
        });

        assert!(record.warnings_fired.contains("300"));
        assert!(record.warnings_fired.contains("60"));
        assert!(record.reveal_consumed.contains("q1"));
    }

    #[test]
    fn apply_never_overwrites_confirmed_answers_or_revives_drafts() {
        let deadline = DeadlineState { start_epoch_ms: 0, end_epoch_ms: 600_000 };
        let mut record = PersistedSession::new("s-1", "u-1", deadline);
        let original = ConfirmedAnswer {
            value: json!("a"),
            is_correct: Some(true),
            score: Some(1.0),
            confirmed_at_epoch_ms: 10,
        };
        record.confirmed_answers.insert("q1".to_string(), original.clone());

        let mut replacement = original.clone();
        replacement.value = json!("b");
        record.apply(SessionPatch {
            draft_answers: Some(BTreeMap::from([("q1".to_string(), json!("c"))])),
            confirmed_answers: Some(BTreeMap::from([("q1".to_string(), replacement)])),
            ..SessionPatch::default()
        });

        assert_eq!(record.confirmed_answers["q1"], original);
        assert!(record.draft_answers.is_empty());
        assert_eq!(record.item_status("q1"), ItemStatus::Confirmed);
    }

    #[test]
    fn sanitize_drops_foreign_items_and_clamps_navigation() {
        let deadline = DeadlineState { start_epoch_ms: 0, end_epoch_ms: 600_000 };
        let mut record = PersistedSession::new("s-1", "u-1", deadline);
        record.current_item_index = 7;
        record.draft_answers.insert("gone".to_string(), json!(1));
        record.draft_answers.insert("q1".to_string(), json!(1));
        record.draft_answers.insert("q2".to_string(), json!(2));
        record.confirmed_answers.insert(
            "q2".to_string(),
            ConfirmedAnswer {
                value: json!(2),
                is_correct: None,
                score: None,
                confirmed_at_epoch_ms: 1,
            },
        );

        let dropped = record.sanitize(&descriptor(&["q1", "q2"]));

        assert_eq!(dropped, 2);
        assert_eq!(record.current_item_index, 1);
        assert_eq!(record.item_status("q1"), ItemStatus::Draft);
        assert_eq!(record.item_status("q2"), ItemStatus::Confirmed);
    }
}
