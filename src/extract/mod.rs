//! Page extractors for the timing vendor's two page layouts.
//!
//! The vendor markup carries no semantic structure, only CSS classes and
//! ids, so both extractors are finite-state machines fed a flat stream of
//! open-tag / close-tag / text events produced from the parsed document.
//! The dispatch scaffolding lives here; each grammar supplies its own
//! transition table.

mod heat;
mod history;

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use scraper::node::Element;
use scraper::{Html, Node};
use thiserror::Error;

pub use heat::HeatPageExtractor;
pub use history::HistoryPageExtractor;

/// Format the vendor prints local timestamps in (e.g. "09/05/2021 07:10 PM").
pub const VENDOR_TIME_FORMAT: &str = "%m/%d/%Y %I:%M %p";

/// Ways a page can fail to match its grammar.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unknown race type: {0:?}")]
    UnknownRaceType(String),

    #[error("unknown win condition: {0:?}")]
    UnknownWinCondition(String),

    #[error("invalid {field}: {text:?}")]
    InvalidNumber { field: &'static str, text: String },

    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    #[error("timestamp {0:?} does not exist in the venue timezone")]
    NonexistentLocalTime(String),

    #[error("invalid racer id link: {0:?}")]
    InvalidRacerId(String),

    #[error("invalid lap entry: {0:?}")]
    InvalidLapEntry(String),

    #[error("lap table for unknown racer {0:?}")]
    UnknownLapOwner(String),

    #[error("missing {0}")]
    MissingField(&'static str),
}

/// One step of the flattened document.
#[derive(Debug, Clone, Copy)]
pub enum TagEvent<'a> {
    Open(&'a Element),
    Close(&'a str),
    /// Non-blank text, trimmed
    Text(&'a str),
}

/// A state machine that consumes tag events and produces a record.
pub trait TagGrammar {
    type Output;

    fn on_event(&mut self, event: TagEvent<'_>) -> Result<(), ParseError>;

    fn finish(self) -> Result<Self::Output, ParseError>;
}

/// Pure conversion from raw page text to a typed record.
pub trait PageExtractor: Send + Sync {
    type Record: Send;

    fn extract(&self, html: &str) -> Result<Self::Record, ParseError>;
}

/// Parse `html` and feed its events, in document order, into `grammar`.
pub fn drive<G: TagGrammar>(html: &str, mut grammar: G) -> Result<G::Output, ParseError> {
    let document = Html::parse_document(html);

    // (node, closing) pairs; children are pushed in reverse so they pop in order.
    let mut stack = vec![(document.tree.root(), false)];
    while let Some((node, closing)) = stack.pop() {
        match node.value() {
            Node::Element(element) if closing => grammar.on_event(TagEvent::Close(element.name()))?,
            Node::Element(element) => {
                grammar.on_event(TagEvent::Open(element))?;
                stack.push((node, true));
                stack.extend(node.children().rev().map(|child| (child, false)));
            }
            Node::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    grammar.on_event(TagEvent::Text(trimmed))?;
                }
            }
            Node::Document | Node::Fragment => {
                stack.extend(node.children().rev().map(|child| (child, false)));
            }
            _ => {}
        }
    }

    grammar.finish()
}

/// True when `element` is a `<tag>` whose class attribute is one of `classes`.
pub(crate) fn has_class(element: &Element, tag: &str, classes: &[&str]) -> bool {
    element.name() == tag
        && element
            .attr("class")
            .is_some_and(|class| classes.contains(&class.trim()))
}

/// True when `element` is a `<tag>` with the given id.
pub(crate) fn has_id(element: &Element, tag: &str, id: &str) -> bool {
    element.name() == tag && element.attr("id") == Some(id)
}

pub(crate) fn parse_number<T: std::str::FromStr>(field: &'static str, text: &str) -> Result<T, ParseError> {
    text.trim().parse().map_err(|_| ParseError::InvalidNumber {
        field,
        text: text.to_string(),
    })
}

/// Parse a vendor-local timestamp and normalize it to UTC.
///
/// Ambiguous wall-clock times (the repeated hour when DST ends) resolve to
/// the standard-time reading.
pub fn parse_local_time(text: &str, tz: Tz) -> Result<DateTime<Utc>, ParseError> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), VENDOR_TIME_FORMAT)
        .map_err(|_| ParseError::InvalidTimestamp(text.to_string()))?;

    match tz.from_local_datetime(&naive) {
        LocalResult::Single(local) => Ok(local.with_timezone(&Utc)),
        LocalResult::Ambiguous(_, standard) => Ok(standard.with_timezone(&Utc)),
        LocalResult::None => Err(ParseError::NonexistentLocalTime(text.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Records every event as a string for inspection.
    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl TagGrammar for Recorder {
        type Output = Vec<String>;

        fn on_event(&mut self, event: TagEvent<'_>) -> Result<(), ParseError> {
            self.0.push(match event {
                TagEvent::Open(el) => format!("<{}>", el.name()),
                TagEvent::Close(name) => format!("</{name}>"),
                TagEvent::Text(text) => text.to_string(),
            });
            Ok(())
        }

        fn finish(self) -> Result<Vec<String>, ParseError> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_drive_emits_document_order() {
        let events = drive(
            "<html><body><span id=\"x\"> hello </span><p>a<b>b</b>c</p></body></html>",
            Recorder::default(),
        )
        .unwrap();

        let body = events.iter().position(|e| e == "<body>").unwrap();
        assert_eq!(
            &events[body..],
            &["<body>", "<span>", "hello", "</span>", "<p>", "a", "<b>", "b", "</b>", "c", "</p>", "</body>", "</html>"]
        );
    }

    #[test]
    fn test_drive_skips_blank_text() {
        let events = drive("<div>\n   \n</div>", Recorder::default()).unwrap();
        assert!(events.iter().all(|e| !e.trim().is_empty()));
    }

    #[test]
    fn test_parse_local_time_eastern() {
        let utc = parse_local_time("09/05/2021 07:10 PM", chrono_tz::US::Eastern).unwrap();
        assert_eq!(utc, Utc.with_ymd_and_hms(2021, 9, 5, 23, 10, 0).unwrap());
    }

    #[test]
    fn test_parse_local_time_winter_offset() {
        let utc = parse_local_time("01/15/2022 10:00 AM", chrono_tz::US::Eastern).unwrap();
        assert_eq!(utc, Utc.with_ymd_and_hms(2022, 1, 15, 15, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_local_time_ambiguous_uses_standard_time() {
        // 1:30 AM happens twice on 2021-11-07 in US/Eastern.
        let utc = parse_local_time("11/07/2021 01:30 AM", chrono_tz::US::Eastern).unwrap();
        assert_eq!(utc, Utc.with_ymd_and_hms(2021, 11, 7, 6, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_local_time_rejects_garbage() {
        assert!(matches!(
            parse_local_time("yesterday", chrono_tz::US::Eastern),
            Err(ParseError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            parse_local_time("03/14/2021 02:30 AM", chrono_tz::US::Eastern),
            Err(ParseError::NonexistentLocalTime(_))
        ));
    }
}
