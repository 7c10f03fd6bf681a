//! Boundary with the natural-language assistant: the catalog goes out as
//! JSON and replies come back as text or a list of ids to show.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::records::Record;
use crate::AppResult;

const SHOW_IDS_DIRECTIVE: &str = "show_ids:";

/// The whole catalog as a JSON array, one object per record.
pub fn snapshot_json(records: &[Record]) -> AppResult<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AssistantReply {
    Text(String),
    ShowIds(Vec<String>),
}

/// Read an assistant reply. A `show_ids: [..]` directive becomes
/// [`AssistantReply::ShowIds`]; the list is parsed as JSON and numeric ids
/// are taken as their decimal text. Anything else, including a directive
/// whose list does not parse, is plain text.
pub fn parse_reply(reply: &str) -> AssistantReply {
    let Some(at) = reply.find(SHOW_IDS_DIRECTIVE) else {
        return AssistantReply::Text(reply.to_string());
    };
    let rest = &reply[at + SHOW_IDS_DIRECTIVE.len()..];
    match parse_id_list(rest) {
        Some(ids) => AssistantReply::ShowIds(ids),
        None => {
            warn!(
                target: "shelfkeep",
                event = "assistant_reply_unparsed",
                reply_len = reply.len()
            );
            AssistantReply::Text(reply.to_string())
        }
    }
}

fn parse_id_list(rest: &str) -> Option<Vec<String>> {
    let rest = rest.trim_start();
    if !rest.starts_with('[') {
        return None;
    }
    let end = rest.find(']')?;
    let items: Vec<Value> = serde_json::from_str(&rest[..=end]).ok()?;
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Some(s),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::FieldValue;

    #[test]
    fn directive_yields_ids() {
        assert_eq!(
            parse_reply("Sure! show_ids: [1, 15]"),
            AssistantReply::ShowIds(vec!["1".into(), "15".into()])
        );
        assert_eq!(
            parse_reply("show_ids: [\"A-1\"] and that is all"),
            AssistantReply::ShowIds(vec!["A-1".into()])
        );
        assert_eq!(parse_reply("show_ids: []"), AssistantReply::ShowIds(vec![]));
    }

    #[test]
    fn anything_else_is_text() {
        assert_eq!(
            parse_reply("You have 3 hammers."),
            AssistantReply::Text("You have 3 hammers.".into())
        );
        // Never evaluated, only parsed.
        assert!(matches!(
            parse_reply("show_ids: __import__('os')"),
            AssistantReply::Text(_)
        ));
        assert!(matches!(parse_reply("show_ids: [1.5]"), AssistantReply::Text(_)));
    }

    #[test]
    fn snapshot_is_a_json_array() {
        let records = vec![Record::new(vec![
            ("id".into(), "A-1".into()),
            ("quantity".into(), FieldValue::Int(3)),
        ])];
        let json = snapshot_json(&records).unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["id"], "A-1");
        assert_eq!(parsed[0]["quantity"], 3);
    }
}
