//! Message resource format.
//!
//! Every message is one Turtle document with a single `schema:Message`
//! subject carrying sender, text and send time.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use thiserror::Error;

use dechat_types::models::{RawMessage, WebId};

use crate::turtle::{self, Graph, Term, TurtleError};

pub const SCHEMA: &str = "http://schema.org/";

const MESSAGE_FRAGMENT: &str = "#message";
/// Predicate used by resources written before `dateSent` was adopted.
const LEGACY_DATE: &str = "dateSend";
/// Timestamp layout of those older resources, always UTC.
const LEGACY_DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Syntax(#[from] TurtleError),

    #[error("message is missing {0}")]
    MissingField(&'static str),

    #[error("unparsable timestamp {0:?}")]
    BadTimestamp(String),
}

/// Render a message resource body.
pub fn encode(message: &RawMessage) -> String {
    format!(
        "@prefix schema: <{SCHEMA}>.\n\
         @prefix xsd: <{xsd}>.\n\
         \n\
         <{MESSAGE_FRAGMENT}>\n    \
             a schema:Message;\n    \
             schema:sender <{sender}>;\n    \
             schema:text \"{text}\";\n    \
             schema:dateSent \"{sent}\"^^xsd:dateTime.\n",
        xsd = turtle::XSD,
        sender = message.sender,
        text = turtle::escape_literal(&message.text),
        sent = message.sent_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

/// Parse a message resource fetched from `resource_url`.
pub fn decode(body: &str, resource_url: &str) -> Result<RawMessage, DecodeError> {
    let graph = Graph::parse(body, resource_url)?;

    let message_type = format!("{SCHEMA}Message");
    let fallback = format!("{resource_url}{MESSAGE_FRAGMENT}");
    let subject = graph
        .subjects_of_type(&message_type)
        .next()
        .unwrap_or(fallback.as_str())
        .to_string();

    let field = |name: &str| -> Option<String> {
        graph
            .object(&subject, &format!("{SCHEMA}{name}"))
            .and_then(Term::value)
            .map(str::to_string)
    };

    let sender = field("sender").ok_or(DecodeError::MissingField("sender"))?;
    let text = field("text").ok_or(DecodeError::MissingField("text"))?;
    let sent = field("dateSent")
        .or_else(|| field(LEGACY_DATE))
        .ok_or(DecodeError::MissingField("dateSent"))?;

    Ok(RawMessage {
        sender: WebId::new(sender),
        text,
        sent_at: parse_timestamp(&sent)?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, LEGACY_DATE_FORMAT).map(|ndt| ndt.and_utc())
        })
        .map_err(|_| DecodeError::BadTimestamp(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const URL: &str = "https://alice.pod.example/private/dechat/chat_bob/1.ttl";

    fn sample(text: &str) -> RawMessage {
        RawMessage {
            sender: WebId::new("https://alice.pod.example/profile/card#me"),
            text: text.to_string(),
            sent_at: Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn encoded_message_decodes_back() {
        let message = sample("hello \"bob\"\nsecond line \\ done");
        let body = encode(&message);
        assert!(body.contains("schema:dateSent \"2026-10-19T09:30:00.000Z\"^^xsd:dateTime"));
        assert_eq!(decode(&body, URL).unwrap(), message);
    }

    #[test]
    fn missing_text_is_a_decode_error() {
        let body = "@prefix schema: <http://schema.org/>.\n\
                    <#message> a schema:Message;\n\
                    schema:sender <https://bob.pod.example/profile/card#me>;\n\
                    schema:dateSent \"2026-10-19T09:30:00Z\".";
        assert_eq!(decode(body, URL), Err(DecodeError::MissingField("text")));
    }

    #[test]
    fn legacy_resources_are_readable() {
        let body = "@prefix schema: <http://schema.org/>.\n\
                    <#message> schema:sender <https://bob.pod.example/profile/card#me>;\n\
                    schema:text \"hi\";\n\
                    schema:dateSend \"2019/3/4 10:02:03\".";
        let raw = decode(body, URL).unwrap();
        assert_eq!(raw.text, "hi");
        assert_eq!(raw.sent_at, Utc.with_ymd_and_hms(2019, 3, 4, 10, 2, 3).unwrap());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            decode("this is not turtle", URL),
            Err(DecodeError::Syntax(_))
        ));
        let body = "@prefix schema: <http://schema.org/>.\n\
                    <#message> schema:sender <https://bob.pod.example/profile/card#me>;\n\
                    schema:text \"hi\"; schema:dateSent \"yesterday\".";
        assert_eq!(
            decode(body, URL),
            Err(DecodeError::BadTimestamp("yesterday".into()))
        );
    }
}
