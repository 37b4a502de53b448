//! Tagged decode step: wire `ContentItem`s become a closed set of typed
//! variants before any handler sees them. Every legacy-shape heuristic lives
//! in this module.

use crate::source::{ContentItem, TypeUrl};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Syncing,
    Synced,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Syncing => "syncing",
            ContentStatus::Synced => "synced",
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw == "syncing" {
            ContentStatus::Syncing
        } else {
            ContentStatus::Synced
        }
    }
}

/// Log metadata shared by every typed variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub trx_id: String,
    pub group_id: String,
    pub publisher: String,
    pub timestamp: i64,
    pub status: ContentStatus,
    pub body: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostContent {
    pub id: String,
    pub title: Option<String>,
    pub content: String,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentContent {
    pub id: String,
    pub content: String,
    /// Id of the post or comment this replies to.
    pub parent_id: String,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileContent {
    pub name: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterKind {
    Like,
    Dislike,
    UndoLike,
    UndoDislike,
}

impl CounterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterKind::Like => "Like",
            CounterKind::Dislike => "Dislike",
            CounterKind::UndoLike => "UndoLike",
            CounterKind::UndoDislike => "UndoDislike",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Like" => Some(CounterKind::Like),
            "Dislike" => Some(CounterKind::Dislike),
            "UndoLike" => Some(CounterKind::UndoLike),
            "UndoDislike" => Some(CounterKind::UndoDislike),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterContent {
    pub object_id: String,
    pub kind: CounterKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    Follow,
    Block,
    UndoFollow,
    UndoBlock,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Follow => "Follow",
            RelationKind::Block => "Block",
            RelationKind::UndoFollow => "UndoFollow",
            RelationKind::UndoBlock => "UndoBlock",
        }
    }

    /// The relation this event acts on and the value it leaves behind.
    pub fn resolve(&self) -> (&'static str, bool) {
        match self {
            RelationKind::Follow => ("follow", true),
            RelationKind::UndoFollow => ("follow", false),
            RelationKind::Block => ("block", true),
            RelationKind::UndoBlock => ("block", false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationContent {
    pub to: String,
    pub kind: RelationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageContent {
    pub object_id: Option<String>,
    pub name: Option<String>,
    pub media_type: String,
    pub size_bytes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedContent {
    Post(Envelope<PostContent>),
    Comment(Envelope<CommentContent>),
    Profile(Envelope<ProfileContent>),
    Counter(Envelope<CounterContent>),
    Relation(Envelope<RelationContent>),
    Image(Envelope<ImageContent>),
}

impl TypedContent {
    pub fn trx_id(&self) -> &str {
        match self {
            TypedContent::Post(e) => &e.trx_id,
            TypedContent::Comment(e) => &e.trx_id,
            TypedContent::Profile(e) => &e.trx_id,
            TypedContent::Counter(e) => &e.trx_id,
            TypedContent::Relation(e) => &e.trx_id,
            TypedContent::Image(e) => &e.trx_id,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("trx {trx_id}: payload is not an object")]
    NotAnObject { trx_id: String },
    #[error("trx {trx_id}: missing field `{field}`")]
    MissingField { trx_id: String, field: &'static str },
    #[error("trx {trx_id}: unsupported value `{value}` for `{field}`")]
    Unsupported {
        trx_id: String,
        field: &'static str,
        value: String,
    },
    #[error("trx {trx_id}: cannot classify payload")]
    Unclassified { trx_id: String },
}

pub fn decode(item: &ContentItem, status: ContentStatus) -> Result<TypedContent, DecodeError> {
    let payload = item
        .payload
        .as_object()
        .ok_or_else(|| DecodeError::NotAnObject {
            trx_id: item.trx_id.clone(),
        })?;

    let type_url = match item.type_url {
        TypeUrl::Unknown => infer_type(payload).ok_or_else(|| DecodeError::Unclassified {
            trx_id: item.trx_id.clone(),
        })?,
        TypeUrl::Post if legacy_reply_target(payload).is_some() => TypeUrl::Comment,
        other => other,
    };

    let fields = Fields {
        trx_id: &item.trx_id,
        payload,
    };

    let typed = match type_url {
        TypeUrl::Post => TypedContent::Post(envelope(
            item,
            status,
            PostContent {
                id: fields.string("id").unwrap_or_else(|| item.trx_id.clone()),
                title: fields.string("title"),
                content: fields.string("content").unwrap_or_default(),
                deleted: fields.flag("deleted"),
            },
        )),
        TypeUrl::Comment => {
            let parent_id = fields
                .string("replyTo")
                .or_else(|| legacy_reply_target(payload))
                .or_else(|| fields.string("objectId"))
                .ok_or(DecodeError::MissingField {
                    trx_id: item.trx_id.clone(),
                    field: "replyTo",
                })?;
            TypedContent::Comment(envelope(
                item,
                status,
                CommentContent {
                    id: fields.string("id").unwrap_or_else(|| item.trx_id.clone()),
                    content: fields.string("content").unwrap_or_default(),
                    parent_id,
                    deleted: fields.flag("deleted"),
                },
            ))
        }
        TypeUrl::Profile => TypedContent::Profile(envelope(
            item,
            status,
            ProfileContent {
                name: fields.required("name")?,
                avatar: fields.string("avatar"),
            },
        )),
        TypeUrl::Counter => {
            let raw_kind = fields.required("kind")?;
            let kind = CounterKind::parse(&raw_kind).ok_or(DecodeError::Unsupported {
                trx_id: item.trx_id.clone(),
                field: "kind",
                value: raw_kind,
            })?;
            TypedContent::Counter(envelope(
                item,
                status,
                CounterContent {
                    object_id: fields.required("objectId")?,
                    kind,
                },
            ))
        }
        TypeUrl::Relation => {
            let raw_kind = fields.required("kind")?;
            let kind = match raw_kind.as_str() {
                "Follow" => RelationKind::Follow,
                "Block" => RelationKind::Block,
                "UndoFollow" => RelationKind::UndoFollow,
                "UndoBlock" => RelationKind::UndoBlock,
                _ => {
                    return Err(DecodeError::Unsupported {
                        trx_id: item.trx_id.clone(),
                        field: "kind",
                        value: raw_kind,
                    })
                }
            };
            TypedContent::Relation(envelope(
                item,
                status,
                RelationContent {
                    to: fields.required("to")?,
                    kind,
                },
            ))
        }
        TypeUrl::Image => TypedContent::Image(envelope(
            item,
            status,
            ImageContent {
                object_id: fields.string("objectId"),
                name: fields.string("name"),
                media_type: fields.required("mediaType")?,
                size_bytes: payload.get("size").and_then(Value::as_i64),
            },
        )),
        TypeUrl::Unknown => {
            return Err(DecodeError::Unclassified {
                trx_id: item.trx_id.clone(),
            })
        }
    };
    Ok(typed)
}

fn envelope<T>(item: &ContentItem, status: ContentStatus, body: T) -> Envelope<T> {
    Envelope {
        trx_id: item.trx_id.clone(),
        group_id: item.group_id.clone(),
        publisher: item.publisher.clone(),
        timestamp: item.timestamp,
        status,
        body,
    }
}

/// Old clients published replies as posts carrying an `inreplyto` field,
/// either a bare trx id or `{ "trxId": ... }`.
fn legacy_reply_target(payload: &serde_json::Map<String, Value>) -> Option<String> {
    let raw = payload.get("inreplyto")?;
    let target = match raw {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj.get("trxId")?.as_str()?.to_string(),
        _ => return None,
    };
    if target.trim().is_empty() {
        None
    } else {
        Some(target)
    }
}

fn infer_type(payload: &serde_json::Map<String, Value>) -> Option<TypeUrl> {
    let has = |key: &str| payload.contains_key(key);
    if legacy_reply_target(payload).is_some() || has("replyTo") {
        Some(TypeUrl::Comment)
    } else if has("kind") && has("objectId") {
        Some(TypeUrl::Counter)
    } else if has("kind") && has("to") {
        Some(TypeUrl::Relation)
    } else if has("mediaType") {
        Some(TypeUrl::Image)
    } else if has("content") {
        Some(TypeUrl::Post)
    } else if has("name") {
        Some(TypeUrl::Profile)
    } else {
        None
    }
}

struct Fields<'a> {
    trx_id: &'a str,
    payload: &'a serde_json::Map<String, Value>,
}

impl Fields<'_> {
    fn string(&self, key: &str) -> Option<String> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn required(&self, key: &'static str) -> Result<String, DecodeError> {
        self.string(key).ok_or_else(|| DecodeError::MissingField {
            trx_id: self.trx_id.to_string(),
            field: key,
        })
    }

    fn flag(&self, key: &str) -> bool {
        self.payload
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
