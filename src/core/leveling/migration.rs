// Upgrades stored user documents to the current `UserRecord` shape.
//
// Version 1 documents were free-form: ids stored as strings, timestamps as
// float unix seconds (0 meaning "never"), optional fields simply absent and
// badges sometimes kept as a plain list of names. Anything missing falls back
// to the defaults a brand new record would get.

use super::leveling_models::{
    BadgeRecord, GuildBadge, GuildProgress, UserRecord, DEFAULT_INFO, USER_RECORD_VERSION,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("User document is not an object")]
    NotAnObject,

    #[error("User document has no usable user_id")]
    MissingUserId,

    #[error("Unknown user document version {0}")]
    UnknownVersion(u64),

    #[error("Malformed user document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Turn any known stored shape into a current [`UserRecord`].
pub fn migrate_user_document(document: Value) -> Result<UserRecord, MigrationError> {
    let version = document
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(1);

    match version {
        1 => migrate_v1(&document),
        v if v == u64::from(USER_RECORD_VERSION) => Ok(serde_json::from_value(document)?),
        other => Err(MigrationError::UnknownVersion(other)),
    }
}

fn migrate_v1(document: &Value) -> Result<UserRecord, MigrationError> {
    let fields = document.as_object().ok_or(MigrationError::NotAnObject)?;
    let user_id = fields
        .get("user_id")
        .and_then(as_u64_lenient)
        .ok_or(MigrationError::MissingUserId)?;

    let mut record = UserRecord::new(user_id, string_field(fields, "username"));
    record.total_exp = fields.get("total_exp").and_then(as_u64_lenient).unwrap_or(0);
    record.rep = fields
        .get("rep")
        .and_then(as_u64_lenient)
        .map(|rep| u32::try_from(rep).unwrap_or(u32::MAX))
        .unwrap_or(0);
    record.chat_block = fields.get("chat_block").and_then(as_timestamp);
    record.rep_block = fields.get("rep_block").and_then(as_timestamp);
    record.last_message = string_field(fields, "last_message");
    record.title = string_field(fields, "title");
    record.info = match string_field(fields, "info") {
        info if info.is_empty() => DEFAULT_INFO.to_string(),
        info => info,
    };

    if let Some(Value::Object(servers)) = fields.get("servers") {
        record.servers = servers
            .iter()
            .filter_map(|(guild, progress)| {
                let guild_id = guild.parse::<u64>().ok()?;
                let level = progress.get("level").and_then(as_u64_lenient).unwrap_or(0);
                let current_exp = progress
                    .get("current_exp")
                    .and_then(as_u64_lenient)
                    .unwrap_or(0);
                Some((
                    guild_id,
                    GuildProgress {
                        level: u32::try_from(level).unwrap_or(u32::MAX),
                        current_exp,
                    },
                ))
            })
            .collect();
    }

    record.badges = match fields.get("badges") {
        Some(Value::Object(badges)) => badges
            .iter()
            .map(|(key, badge)| (key.clone(), legacy_badge(key, badge)))
            .collect(),
        // Oldest documents only kept the badge names.
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .map(|key| (key.to_string(), legacy_badge(key, &Value::Null)))
            .collect(),
        _ => BTreeMap::new(),
    };

    Ok(record)
}

fn legacy_badge(key: &str, badge: &Value) -> BadgeRecord {
    let (fallback_name, fallback_guild) = match key.rsplit_once('_') {
        Some((name, guild)) => (name.to_string(), guild.parse::<u64>().unwrap_or(0)),
        None => (key.to_string(), 0),
    };
    let text = |field: &str| {
        badge
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let name = match text("badge_name") {
        name if name.is_empty() => fallback_name,
        name => name,
    };

    BadgeRecord {
        badge: GuildBadge {
            guild_id: badge
                .get("server_id")
                .and_then(as_u64_lenient)
                .unwrap_or(fallback_guild),
            name,
            description: text("description"),
            bg_img: text("bg_img"),
            border_color: text("border_color"),
            price: badge.get("price").and_then(Value::as_i64).unwrap_or(0),
        },
        priority_num: badge
            .get("priority_num")
            .and_then(Value::as_i64)
            .map(|n| n as i32)
            .unwrap_or(0),
    }
}

fn string_field(fields: &Map<String, Value>, name: &str) -> String {
    fields
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn as_u64_lenient(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let seconds = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if seconds <= 0.0 {
        return None;
    }
    let whole = seconds.trunc() as i64;
    let nanos = ((seconds - seconds.trunc()) * 1e9) as u32;
    Utc.timestamp_opt(whole, nanos).single()
}
