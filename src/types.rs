//! Core types for hn-dl

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::time::Duration;

/// Identifier of an upstream item (story, comment, job, poll, poll option)
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl ItemId {
    /// Create a new ItemId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }

    /// IDs start at 1; zero means "no reference" in parent/poll fields
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

impl From<i64> for ItemId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<ItemId> for i64 {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

impl PartialEq<i64> for ItemId {
    fn eq(&self, other: &i64) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ItemId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl sqlx::Type<sqlx::Sqlite> for ItemId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ItemId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ItemId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Deserialize an explicit `null` as the type's zero value
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Discriminant of an item's free-text `type` tag
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemType {
    /// A submitted link or text post
    Story,
    /// A reply to a story or another comment
    Comment,
    /// A job posting
    Job,
    /// A poll
    Poll,
    /// One option of a poll
    PollOpt,
    /// Anything else the API may return, including an absent tag
    Other(String),
}

impl ItemType {
    /// Classify a raw `type` tag
    pub fn parse(tag: &str) -> Self {
        match tag {
            "story" => ItemType::Story,
            "comment" => ItemType::Comment,
            "job" => ItemType::Job,
            "poll" => ItemType::Poll,
            "pollopt" => ItemType::PollOpt,
            other => ItemType::Other(other.to_string()),
        }
    }

    /// The tag as stored in the `items.type` column
    pub fn as_str(&self) -> &str {
        match self {
            ItemType::Story => "story",
            ItemType::Comment => "comment",
            ItemType::Job => "job",
            ItemType::Poll => "poll",
            ItemType::PollOpt => "pollopt",
            ItemType::Other(tag) => tag,
        }
    }
}

/// One item document as served by `GET <base>/item/<id>.json`
///
/// Documents are sparse: a comment has no title, a story has no parent. Every
/// absent or `null` field decodes to its zero value (0, empty string, empty list,
/// false).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    /// Unique item ID
    #[serde(deserialize_with = "null_as_default")]
    pub id: ItemId,
    /// True if the item was deleted
    #[serde(deserialize_with = "null_as_default")]
    pub deleted: bool,
    /// Free-text type tag ("story", "comment", "job", "poll", "pollopt")
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub kind: String,
    /// Author handle
    #[serde(deserialize_with = "null_as_default")]
    pub by: String,
    /// Creation time (Unix seconds)
    #[serde(deserialize_with = "null_as_default")]
    pub time: i64,
    /// Comment, story or poll text (HTML)
    #[serde(deserialize_with = "null_as_default")]
    pub text: String,
    /// True if the item is dead
    #[serde(deserialize_with = "null_as_default")]
    pub dead: bool,
    /// Parent comment or story (0 = none)
    #[serde(deserialize_with = "null_as_default")]
    pub parent: i64,
    /// Poll this option belongs to (0 = none)
    #[serde(deserialize_with = "null_as_default")]
    pub poll: i64,
    /// Story URL
    #[serde(deserialize_with = "null_as_default")]
    pub url: String,
    /// Story score or poll option votes
    #[serde(deserialize_with = "null_as_default")]
    pub score: i64,
    /// Story, poll or job title
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    /// Poll options, in display order
    #[serde(deserialize_with = "null_as_default")]
    pub parts: Vec<i64>,
    /// Total comment count for stories and polls
    #[serde(deserialize_with = "null_as_default")]
    pub descendants: i64,
    /// Child comments, in ranked display order
    #[serde(deserialize_with = "null_as_default")]
    pub kids: Vec<i64>,
}

impl Item {
    /// Classified type tag
    pub fn item_type(&self) -> ItemType {
        ItemType::parse(&self.kind)
    }

    /// Creation time as a UTC timestamp, if `time` is set and representable
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        if self.time == 0 {
            return None;
        }
        Utc.timestamp_opt(self.time, 0).single()
    }

    /// Child-reference rows derived from `kids`, positions starting at 0
    pub fn child_refs(&self) -> Vec<ChildRef> {
        self.kids
            .iter()
            .enumerate()
            .map(|(position, kid)| ChildRef {
                item: self.id,
                kid: ItemId(*kid),
                display_order: position as i64,
            })
            .collect()
    }
}

/// One row of the `kids` relation
#[derive(Clone, Debug, PartialEq, Eq, FromRow)]
pub struct ChildRef {
    /// Parent item
    pub item: ItemId,
    /// Child item
    pub kid: ItemId,
    /// Zero-based position in the parent's `kids` list
    pub display_order: i64,
}

/// Row read back from the `items` table
#[derive(Clone, Debug, PartialEq, Eq, FromRow)]
pub struct StoredItem {
    /// Unique item ID
    pub id: ItemId,
    /// Deletion flag
    pub deleted: Option<bool>,
    /// Type tag
    #[sqlx(rename = "type")]
    pub kind: Option<String>,
    /// Author handle
    pub by: Option<String>,
    /// Creation time (Unix seconds)
    pub time: Option<i64>,
    /// Text body
    pub text: Option<String>,
    /// Dead flag
    pub dead: Option<bool>,
    /// Parent reference
    pub parent: Option<i64>,
    /// Poll reference
    pub poll: Option<i64>,
    /// Story URL
    pub url: Option<String>,
    /// Score
    pub score: Option<i64>,
    /// Title
    pub title: Option<String>,
    /// Comma-joined poll option IDs
    pub parts: Option<String>,
    /// Descendant count
    pub descendants: Option<i64>,
}

/// Counters describing a finished (or cancelled) run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Batches whose barrier was reached
    pub batches: u64,
    /// Items scheduled (one fetch each)
    pub attempted: u64,
    /// Items written as new rows
    pub inserted: u64,
    /// Items fetched whose row already existed
    pub already_present: u64,
    /// Items skipped because the fetch failed
    pub fetch_failed: u64,
    /// Fetch failures where the upstream has no such item, recorded so gap
    /// fills skip them (a subset of `fetch_failed`)
    pub missing: u64,
    /// Items whose write failed (fully or partially)
    pub write_failed: u64,
    /// True if the run stopped early at a batch boundary
    pub cancelled: bool,
    /// Lowest ID of the last batch that completed, if any
    pub lowest_completed: Option<ItemId>,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

impl RunSummary {
    /// Items that did not make it into the store this run
    pub fn skipped(&self) -> u64 {
        self.fetch_failed + self.write_failed
    }
}

/// Event emitted while a run progresses
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run has been planned and is about to start
    RunStarted {
        /// Number of items the run will attempt
        total_items: u64,
        /// Number of batches in the plan
        total_batches: u64,
    },

    /// A batch is about to be scheduled
    BatchStarted {
        /// Highest ID in the batch
        high: ItemId,
        /// Lowest ID in the batch
        low: ItemId,
        /// Number of items in the batch
        size: u64,
    },

    /// One fetch+write task finished, successfully or not
    ItemCompleted {
        /// The item the task was for
        id: ItemId,
    },

    /// Every task of a batch has finished and its writes are durable
    BatchCompleted {
        /// Highest ID in the batch
        high: ItemId,
        /// Lowest ID in the batch
        low: ItemId,
    },

    /// The run is over
    RunCompleted {
        /// Final counters
        summary: RunSummary,
    },
}
