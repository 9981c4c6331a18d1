use rusqlite::Connection;
use tracing::info;

use corral_types::error::ChatError;

use crate::store_err;

pub fn run(conn: &Connection) -> Result<(), ChatError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversations (
            id             TEXT PRIMARY KEY,
            participant_a  TEXT NOT NULL,
            participant_b  TEXT NOT NULL,
            listing_id     TEXT,
            last_activity  TEXT NOT NULL,
            active         INTEGER NOT NULL DEFAULT 1,
            created_at     TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_pair
            ON conversations(participant_a, participant_b, active);

        CREATE INDEX IF NOT EXISTS idx_conversations_activity
            ON conversations(active, last_activity);

        -- Messages are an embedded sub-sequence of their parent
        -- conversation: keyed by (conversation_id, seq), never
        -- addressed as a top-level collection.
        CREATE TABLE IF NOT EXISTS messages (
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            seq              INTEGER NOT NULL,
            sender_id        TEXT NOT NULL,
            content          TEXT NOT NULL,
            attachments      TEXT NOT NULL DEFAULT '[]',
            sent_at          TEXT NOT NULL,
            read             INTEGER NOT NULL DEFAULT 0,
            read_at          TEXT,
            PRIMARY KEY (conversation_id, seq)
        );
        ",
    )
    .map_err(store_err)?;

    info!("Store migrations complete");
    Ok(())
}
