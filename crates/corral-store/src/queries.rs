use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use corral_types::error::ChatError;
use corral_types::models::{Conversation, Message};

use crate::Store;
use crate::models::{ConversationRow, MessageRow};
use crate::store_err;

impl Store {
    /// Active conversations the user participates in, most recent
    /// activity first, message logs populated. Empty result is not an
    /// error.
    pub fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>, ChatError> {
        let conn = self.lock()?;
        let uid = user_id.to_string();

        let rows = {
            let mut stmt = conn
                .prepare(
                    "SELECT id, participant_a, participant_b, listing_id,
                            last_activity, active, created_at
                     FROM conversations
                     WHERE active = 1 AND (participant_a = ?1 OR participant_b = ?1)
                     ORDER BY last_activity DESC",
                )
                .map_err(store_err)?;

            stmt.query_map([&uid], map_conversation_row)
                .map_err(store_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(store_err)?
        };

        rows.into_iter().map(|row| hydrate(&conn, row)).collect()
    }

    /// Look up the active conversation for the unordered participant
    /// pair (and listing, when given), creating it with an empty
    /// message log if absent.
    ///
    /// A lookup without a listing matches any active conversation for
    /// the pair, including listing-scoped ones; a lookup with a listing
    /// only matches that listing.
    pub fn get_or_create(
        &self,
        user_id: Uuid,
        other_user_id: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<Conversation, ChatError> {
        if user_id == other_user_id {
            return Err(ChatError::InvalidArgument(
                "cannot open a conversation with yourself".into(),
            ));
        }

        let conn = self.lock()?;

        if let Some(row) = query_pair(&conn, user_id, other_user_id, listing_id)? {
            return hydrate(&conn, row);
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO conversations
                (id, participant_a, participant_b, listing_id, last_activity, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?5)",
            params![
                id.to_string(),
                user_id.to_string(),
                other_user_id.to_string(),
                listing_id.map(|l| l.to_string()),
                fmt_ts(now),
            ],
        )
        .map_err(store_err)?;

        Ok(Conversation {
            id,
            participants: [user_id, other_user_id],
            listing_id,
            messages: Vec::new(),
            last_activity: now,
            active: true,
            created_at: now,
        })
    }

    /// Append a message. This is the single durable write path; the
    /// gateway broadcast is a notification layered on top of it.
    ///
    /// Appending to an archived conversation is allowed: archiving only
    /// removes the conversation from listings and pair lookups.
    pub fn append_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
        attachments: &[String],
    ) -> Result<Message, ChatError> {
        if content.is_empty() && attachments.is_empty() {
            return Err(ChatError::InvalidArgument(
                "message content or attachments required".into(),
            ));
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err)?;

        let row = query_conversation(&tx, conversation_id)?.ok_or(ChatError::NotFound)?;
        let sender = sender_id.to_string();
        if !row.has_participant(&sender) {
            return Err(ChatError::Forbidden);
        }

        // Sequence number continues the append order; sent_at is
        // clamped so timestamps never decrease within a conversation.
        let (seq, last_sent): (i64, Option<String>) = tx
            .query_row(
                "SELECT COALESCE(MAX(seq), -1) + 1, MAX(sent_at)
                 FROM messages WHERE conversation_id = ?1",
                [&row.id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .map_err(store_err)?;

        let mut sent_at = Utc::now();
        if let Some(raw) = &last_sent {
            sent_at = sent_at.max(parse_ts("sent_at", raw)?);
        }

        let attachments_json = serde_json::to_string(attachments)
            .map_err(|e| ChatError::Store(format!("attachment encoding failed: {}", e)))?;

        tx.execute(
            "INSERT INTO messages
                (conversation_id, seq, sender_id, content, attachments, sent_at, read, read_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, NULL)",
            params![row.id, seq, sender, content, attachments_json, fmt_ts(sent_at)],
        )
        .map_err(store_err)?;

        tx.execute(
            "UPDATE conversations SET last_activity = ?2 WHERE id = ?1",
            params![row.id, fmt_ts(sent_at)],
        )
        .map_err(store_err)?;

        tx.commit().map_err(store_err)?;

        Ok(Message {
            sender_id,
            content: content.to_string(),
            attachments: attachments.to_vec(),
            sent_at,
            read: false,
            read_at: None,
        })
    }

    /// Mark every unread message from the other participant as read.
    /// Idempotent: repeat calls update nothing and return 0.
    pub fn mark_read(&self, conversation_id: Uuid, reader_id: Uuid) -> Result<usize, ChatError> {
        let conn = self.lock()?;

        let row = query_conversation(&conn, conversation_id)?.ok_or(ChatError::NotFound)?;
        let reader = reader_id.to_string();
        if !row.has_participant(&reader) {
            return Err(ChatError::Forbidden);
        }

        // read_at is written exactly once: the read = 0 filter keeps
        // already-read messages untouched.
        let updated = conn
            .execute(
                "UPDATE messages SET read = 1, read_at = ?3
                 WHERE conversation_id = ?1 AND sender_id != ?2 AND read = 0",
                params![row.id, reader, fmt_ts(Utc::now())],
            )
            .map_err(store_err)?;

        Ok(updated)
    }

    /// Archive a conversation. Messages are kept; there is no path out
    /// of the archived state.
    pub fn archive(&self, conversation_id: Uuid, requester_id: Uuid) -> Result<(), ChatError> {
        let conn = self.lock()?;

        let row = query_conversation(&conn, conversation_id)?.ok_or(ChatError::NotFound)?;
        if !row.has_participant(&requester_id.to_string()) {
            return Err(ChatError::Forbidden);
        }

        conn.execute(
            "UPDATE conversations SET active = 0 WHERE id = ?1",
            [&row.id],
        )
        .map_err(store_err)?;

        Ok(())
    }
}

fn query_conversation(
    conn: &Connection,
    id: Uuid,
) -> Result<Option<ConversationRow>, ChatError> {
    conn.query_row(
        "SELECT id, participant_a, participant_b, listing_id,
                last_activity, active, created_at
         FROM conversations WHERE id = ?1",
        [id.to_string()],
        map_conversation_row,
    )
    .optional()
    .map_err(store_err)
}

fn query_pair(
    conn: &Connection,
    a: Uuid,
    b: Uuid,
    listing_id: Option<Uuid>,
) -> Result<Option<ConversationRow>, ChatError> {
    let a = a.to_string();
    let b = b.to_string();

    let row = match listing_id {
        Some(listing) => conn
            .query_row(
                "SELECT id, participant_a, participant_b, listing_id,
                        last_activity, active, created_at
                 FROM conversations
                 WHERE active = 1
                   AND ((participant_a = ?1 AND participant_b = ?2)
                     OR (participant_a = ?2 AND participant_b = ?1))
                   AND listing_id = ?3
                 ORDER BY last_activity DESC
                 LIMIT 1",
                params![a, b, listing.to_string()],
                map_conversation_row,
            )
            .optional(),
        None => conn
            .query_row(
                "SELECT id, participant_a, participant_b, listing_id,
                        last_activity, active, created_at
                 FROM conversations
                 WHERE active = 1
                   AND ((participant_a = ?1 AND participant_b = ?2)
                     OR (participant_a = ?2 AND participant_b = ?1))
                 ORDER BY last_activity DESC
                 LIMIT 1",
                params![a, b],
                map_conversation_row,
            )
            .optional(),
    };

    row.map_err(store_err)
}

fn query_messages(conn: &Connection, conversation_id: &str) -> Result<Vec<MessageRow>, ChatError> {
    let mut stmt = conn
        .prepare(
            "SELECT sender_id, content, attachments, sent_at, read, read_at
             FROM messages WHERE conversation_id = ?1
             ORDER BY seq",
        )
        .map_err(store_err)?;

    let rows = stmt
        .query_map([conversation_id], |row| {
            Ok(MessageRow {
                sender_id: row.get(0)?,
                content: row.get(1)?,
                attachments: row.get(2)?,
                sent_at: row.get(3)?,
                read: row.get(4)?,
                read_at: row.get(5)?,
            })
        })
        .map_err(store_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(store_err)?;

    Ok(rows)
}

fn map_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        participant_a: row.get(1)?,
        participant_b: row.get(2)?,
        listing_id: row.get(3)?,
        last_activity: row.get(4)?,
        active: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Attach the message log and convert to the domain model.
fn hydrate(conn: &Connection, row: ConversationRow) -> Result<Conversation, ChatError> {
    let messages = query_messages(conn, &row.id)?
        .into_iter()
        .map(to_message)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Conversation {
        id: parse_uuid("conversation id", &row.id)?,
        participants: [
            parse_uuid("participant_a", &row.participant_a)?,
            parse_uuid("participant_b", &row.participant_b)?,
        ],
        listing_id: row
            .listing_id
            .as_deref()
            .map(|l| parse_uuid("listing_id", l))
            .transpose()?,
        messages,
        last_activity: parse_ts("last_activity", &row.last_activity)?,
        active: row.active,
        created_at: parse_ts("created_at", &row.created_at)?,
    })
}

fn to_message(row: MessageRow) -> Result<Message, ChatError> {
    Ok(Message {
        sender_id: parse_uuid("sender_id", &row.sender_id)?,
        content: row.content,
        attachments: serde_json::from_str(&row.attachments)
            .map_err(|e| ChatError::Store(format!("corrupt attachments: {}", e)))?,
        sent_at: parse_ts("sent_at", &row.sent_at)?,
        read: row.read,
        read_at: row
            .read_at
            .as_deref()
            .map(|ts| parse_ts("read_at", ts))
            .transpose()?,
    })
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as TEXT.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(field: &str, raw: &str) -> Result<DateTime<Utc>, ChatError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ChatError::Store(format!("corrupt {} '{}': {}", field, raw, e)))
}

fn parse_uuid(field: &str, raw: &str) -> Result<Uuid, ChatError> {
    raw.parse()
        .map_err(|e| ChatError::Store(format!("corrupt {} '{}': {}", field, raw, e)))
}
