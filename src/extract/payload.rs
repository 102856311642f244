//! Reading post metadata from captured `TweetResultByRestId` responses.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::parse_timestamp;

/// Fields read from a captured post payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct PayloadPost {
    pub text: String,
    pub screen_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reply_count: u64,
    pub like_count: u64,
    pub retweet_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum PayloadOutcome {
    Post(PayloadPost),
    /// The API answered but the post is gone or hidden.
    Unavailable(String),
}

/// Walk a dot-separated path through objects and arrays.
fn value_at<'a>(data: &'a Value, path: &str) -> &'a Value {
    let mut current = data;
    for key in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(key).unwrap_or(&Value::Null),
            Value::Array(arr) => match key.parse::<usize>() {
                Ok(idx) => arr.get(idx).unwrap_or(&Value::Null),
                Err(_) => &Value::Null,
            },
            _ => &Value::Null,
        };
    }
    current
}

fn str_at<'a>(data: &'a Value, path: &str) -> Option<&'a str> {
    value_at(data, path).as_str().filter(|s| !s.is_empty())
}

fn count_at(data: &Value, path: &str) -> u64 {
    match value_at(data, path) {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

/// Find the payload describing post `id`, if any was captured.
pub(super) fn find(payloads: &[Value], id: u64) -> Option<PayloadOutcome> {
    payloads.iter().find_map(|payload| read(payload, id))
}

fn read(payload: &Value, id: u64) -> Option<PayloadOutcome> {
    let tweet_result = value_at(payload, "data.tweetResult");
    if tweet_result.is_null() {
        return None;
    }

    let mut result = value_at(tweet_result, "result");
    if result.is_null() || result.as_object().is_some_and(|m| m.is_empty()) {
        return Some(PayloadOutcome::Unavailable(
            "post result is empty".to_string(),
        ));
    }

    match str_at(result, "__typename") {
        Some("TweetWithVisibilityResults") => result = value_at(result, "tweet"),
        Some("TweetUnavailable") => {
            let reason = str_at(result, "reason").unwrap_or("unavailable");
            return Some(PayloadOutcome::Unavailable(format!("post {}", reason)));
        }
        Some("TweetTombstone") => {
            let reason = str_at(result, "tombstone.text.text").unwrap_or("post was removed");
            return Some(PayloadOutcome::Unavailable(reason.to_string()));
        }
        _ => {}
    }

    // Quoted or related posts can arrive on the same page
    if let Some(rest_id) = str_at(result, "rest_id") {
        if rest_id.parse::<u64>().ok() != Some(id) {
            return None;
        }
    }

    let legacy = value_at(result, "legacy");
    let created_at = str_at(legacy, "created_at").and_then(parse_timestamp)?;

    let text = str_at(result, "note_tweet.note_tweet_results.result.text")
        .or_else(|| str_at(legacy, "full_text"))
        .map(decode_entities)
        .unwrap_or_default();

    let screen_name = str_at(result, "core.user_results.result.legacy.screen_name")
        .or_else(|| str_at(result, "core.user_results.result.core.screen_name"))
        .map(str::to_string);

    Some(PayloadOutcome::Post(PayloadPost {
        text,
        screen_name,
        created_at,
        reply_count: count_at(legacy, "reply_count"),
        like_count: count_at(legacy, "favorite_count"),
        retweet_count: count_at(legacy, "retweet_count"),
    }))
}

/// The API escapes these three in post text.
fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}
