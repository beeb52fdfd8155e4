use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::schema::messages;

/// A durably recorded chat message. Never mutated after insert.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, ToSchema)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: i32,
    pub content: String,
    pub sender_id: i32,
    pub channel: String,
    pub group_id: Option<i32>,
    /// Assigned by the store at insert time.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage<'a> {
    pub content: &'a str,
    pub sender_id: i32,
    pub channel: &'a str,
    pub group_id: Option<i32>,
}

/// A stored message joined with its sender's username, as read back for
/// history endpoints.
#[derive(Debug, Clone, Queryable)]
pub struct HistoryEntry {
    pub id: i32,
    pub content: String,
    pub sender: String,
    pub channel: String,
    pub group_id: Option<i32>,
    pub timestamp: DateTime<Utc>,
}
