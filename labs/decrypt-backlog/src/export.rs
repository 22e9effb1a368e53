use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;
use tracing::{debug, warn};
use vaulter_backup::store::DecryptedEvent;

/// The Markdown transcript of a single room.
#[derive(Debug)]
pub struct RoomExport {
    pub room_id: String,
    pub file_name: String,
    pub message_count: usize,
    pub markdown: String,
}

/// Render the transcripts of every room, `events` must be grouped by room and
/// sorted by timestamp within a room.
pub fn render_rooms(events: &[DecryptedEvent]) -> Vec<RoomExport> {
    events
        .chunk_by(|a, b| a.room_id == b.room_id)
        .map(|room_events| render_room(&room_events[0].room_id, room_events))
        .collect()
}

fn render_room(room_id: &str, events: &[DecryptedEvent]) -> RoomExport {
    let mut markdown = String::new();

    // Writing into a `String` can't fail.
    let _ = writeln!(markdown, "# {room_id}\n");
    let _ = writeln!(markdown, "**Room ID:** {room_id}");
    let _ = writeln!(markdown, "**Message Count:** {}\n", events.len());
    markdown.push_str("---\n");

    let mut current_date: Option<NaiveDate> = None;

    for event in events {
        let timestamp = timestamp_to_datetime(event.origin_server_ts);
        let date = timestamp.date_naive();

        if current_date != Some(date) {
            current_date = Some(date);
            let _ = writeln!(markdown, "\n## {}\n", date.format("%A, %B %d, %Y"));
        }

        let _ = writeln!(
            markdown,
            "**{}** *{}*\n\n{}\n",
            event.sender,
            timestamp.format("%Y-%m-%d %H:%M:%S"),
            format_message(event)
        );
    }

    RoomExport {
        room_id: room_id.to_owned(),
        file_name: format!("{}.md", sanitize_file_name(room_id)),
        message_count: events.len(),
        markdown,
    }
}

/// Render the index linking to every exported room.
pub fn render_index(rooms: &[RoomExport]) -> String {
    let mut index = String::from("# Decrypted Matrix history\n\n");

    let _ = writeln!(index, "Total rooms exported: {}\n", rooms.len());
    index.push_str("## Rooms\n\n");

    for room in rooms {
        let _ = writeln!(
            index,
            "- [{}]({}) ({} messages)",
            room.room_id, room.file_name, room.message_count
        );
    }

    index
}

/// Write the transcript of every room and the index into `output_dir`.
///
/// Returns the paths of the written files, the index comes last.
pub async fn write_export(output_dir: &Path, events: &[DecryptedEvent]) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("Couldn't create {}", output_dir.display()))?;

    let rooms = render_rooms(events);
    let mut written = Vec::with_capacity(rooms.len() + 1);

    for room in &rooms {
        let path = output_dir.join(&room.file_name);
        tokio::fs::write(&path, &room.markdown)
            .await
            .with_context(|| format!("Couldn't write {}", path.display()))?;

        debug!(room_id = %room.room_id, path = %path.display(), "Exported a room");
        written.push(path);
    }

    let index_path = output_dir.join("index.md");
    tokio::fs::write(&index_path, render_index(&rooms))
        .await
        .with_context(|| format!("Couldn't write {}", index_path.display()))?;
    written.push(index_path);

    Ok(written)
}

fn timestamp_to_datetime(origin_server_ts: u64) -> DateTime<Utc> {
    i64::try_from(origin_server_ts)
        .ok()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn format_message(event: &DecryptedEvent) -> String {
    let payload: Value = match serde_json::from_str(&event.plaintext_json) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(event_id = %event.event_id, %error, "The stored plaintext isn't valid JSON");
            return "[Unreadable message]".to_owned();
        }
    };

    let event_type = payload["type"].as_str().unwrap_or_default();
    let content = &payload["content"];
    let body = content["body"].as_str().unwrap_or_default();

    if event_type == "m.sticker" {
        return format!("[Sticker: {body}]");
    }

    if event_type != "m.room.message" {
        return format!("[{event_type} event]");
    }

    match content["msgtype"].as_str().unwrap_or("m.text") {
        "m.text" | "m.notice" => body.to_owned(),
        "m.emote" => format!("\\* {} {body}", event.sender),
        "m.image" => format!("[Image: {}]", or_default(body, "image")),
        "m.file" => format!("[File: {}]", or_default(body, "file")),
        "m.audio" => format!("[Audio: {}]", or_default(body, "audio message")),
        "m.video" => format!("[Video: {}]", or_default(body, "video message")),
        msgtype if body.is_empty() => format!("[{msgtype} message]"),
        _ => body.to_owned(),
    }
}

fn or_default<'a>(body: &'a str, default: &'a str) -> &'a str {
    if body.is_empty() {
        default
    } else {
        body
    }
}

/// Turn a room ID into a file name, `!abc:example.org` becomes
/// `abc_example.org`.
fn sanitize_file_name(room_id: &str) -> String {
    room_id
        .trim_start_matches('!')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use vaulter_backup::store::DecryptedEvent;

    use super::{render_index, render_rooms, sanitize_file_name, write_export};

    // 2024-03-01 12:00:00 UTC
    const MARCH_FIRST: u64 = 1_709_294_400_000;
    const DAY: u64 = 24 * 60 * 60 * 1000;

    fn decrypted(
        event_id: &str,
        room_id: &str,
        origin_server_ts: u64,
        payload: serde_json::Value,
    ) -> DecryptedEvent {
        DecryptedEvent {
            event_id: event_id.to_owned(),
            room_id: room_id.to_owned(),
            sender: "@alice:example.org".to_owned(),
            origin_server_ts,
            plaintext_json: payload.to_string(),
        }
    }

    fn text(body: &str) -> serde_json::Value {
        json!({
            "type": "m.room.message",
            "content": { "msgtype": "m.text", "body": body },
        })
    }

    #[test]
    fn rooms_get_a_transcript_each() {
        let events = [
            decrypted("$1", "!a:example.org", MARCH_FIRST, text("Hello")),
            decrypted("$2", "!a:example.org", MARCH_FIRST + DAY, text("Next day")),
            decrypted(
                "$3",
                "!a:example.org",
                MARCH_FIRST + DAY + 1,
                json!({
                    "type": "m.room.message",
                    "content": { "msgtype": "m.image", "body": "cat.png" },
                }),
            ),
            decrypted("$4", "!b:example.org", MARCH_FIRST, json!({ "type": "m.reaction" })),
        ];

        let rooms = render_rooms(&events);

        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].file_name, "a_example.org.md");
        assert_eq!(rooms[0].message_count, 3);

        let markdown = &rooms[0].markdown;
        assert!(markdown.starts_with("# !a:example.org\n"));
        assert!(markdown.contains("## Friday, March 01, 2024"));
        assert!(markdown.contains("## Saturday, March 02, 2024"));
        assert!(markdown.contains("**@alice:example.org** *2024-03-01 12:00:00*\n\nHello\n"));
        assert!(markdown.contains("[Image: cat.png]"));
        assert_eq!(markdown.matches("## Saturday").count(), 1);

        assert!(rooms[1].markdown.contains("[m.reaction event]"));
    }

    #[test]
    fn the_index_links_every_room() {
        let events = [
            decrypted("$1", "!a:example.org", MARCH_FIRST, text("Hello")),
            decrypted("$2", "!b:example.org", MARCH_FIRST, text("Hi")),
        ];

        let index = render_index(&render_rooms(&events));

        assert!(index.contains("Total rooms exported: 2"));
        assert!(index.contains("- [!a:example.org](a_example.org.md) (1 messages)"));
        assert!(index.contains("- [!b:example.org](b_example.org.md) (1 messages)"));
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("!abc:example.org"), "abc_example.org");
        assert_eq!(sanitize_file_name("!a/b:ex ample.org"), "a_b_ex_ample.org");
    }

    #[tokio::test]
    async fn exports_are_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("export");
        let events = [decrypted("$1", "!a:example.org", MARCH_FIRST, text("Hello"))];

        let written = write_export(&output, &events).await.unwrap();

        assert_eq!(written, [output.join("a_example.org.md"), output.join("index.md")]);

        let room = std::fs::read_to_string(&written[0]).unwrap();
        assert!(room.contains("Hello"));
        let index = std::fs::read_to_string(&written[1]).unwrap();
        assert!(index.contains("a_example.org.md"));
    }

    #[test]
    fn nothing_to_export_gives_an_empty_index() {
        let rooms = render_rooms(&[]);

        assert!(rooms.is_empty());
        assert!(render_index(&rooms).contains("Total rooms exported: 0"));
    }
}
