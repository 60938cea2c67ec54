//! Racer history page grammar.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use super::{PageExtractor, ParseError, TagEvent, TagGrammar, drive, has_class, has_id, parse_local_time, parse_number};
use crate::models::{HeatId, HistoryEntry, RacerHistoryPage, Venue};
use crate::utils::url::last_query_value;

/// Extracts the racer's name and heat listing from a `RacerHistory.aspx` page.
#[derive(Debug, Clone)]
pub struct HistoryPageExtractor {
    venue: String,
    tz: Tz,
}

impl HistoryPageExtractor {
    pub fn new(venue: &Venue) -> Self {
        Self {
            venue: venue.name.clone(),
            tz: venue.timezone,
        }
    }
}

impl PageExtractor for HistoryPageExtractor {
    type Record = RacerHistoryPage;

    fn extract(&self, html: &str) -> Result<RacerHistoryPage, ParseError> {
        drive(html, HistoryGrammar::new(&self.venue, self.tz))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoryState {
    Idle,
    NameLabel,
    /// Inside a `Normal` row; `cell` counts the `<td>`s opened so far
    Row { cell: usize },
}

struct HistoryGrammar<'a> {
    venue: &'a str,
    tz: Tz,
    state: HistoryState,
    /// Set once the racer name label has been seen
    named: bool,
    display_name: String,
    entries: Vec<HistoryEntry>,

    kart: Option<u32>,
    time: Option<DateTime<Utc>>,
    heat_id: Option<HeatId>,
}

impl<'a> HistoryGrammar<'a> {
    fn new(venue: &'a str, tz: Tz) -> Self {
        Self {
            venue,
            tz,
            state: HistoryState::Idle,
            named: false,
            display_name: String::new(),
            entries: Vec::new(),
            kart: None,
            time: None,
            heat_id: None,
        }
    }

    fn cell_text(&mut self, cell: usize, text: &str) -> Result<(), ParseError> {
        match cell {
            1 => {
                let suffix = text.split_whitespace().last().unwrap_or(text);
                self.kart = Some(parse_number("kart", suffix)?);
            }
            2 => self.time = Some(parse_local_time(text, self.tz)?),
            _ => {}
        }
        Ok(())
    }

    fn close_row(&mut self) {
        if let (Some(heat_id), Some(kart), Some(time)) =
            (self.heat_id.take(), self.kart.take(), self.time.take())
        {
            self.entries.push(HistoryEntry {
                venue: self.venue.to_string(),
                heat_id,
                kart,
                time,
            });
        }
    }
}

impl TagGrammar for HistoryGrammar<'_> {
    type Output = RacerHistoryPage;

    fn on_event(&mut self, event: TagEvent<'_>) -> Result<(), ParseError> {
        use HistoryState::*;
        use TagEvent::*;

        self.state = match (self.state, event) {
            (Idle, Open(element)) if has_id(element, "span", "lblRacerName") => {
                self.named = true;
                NameLabel
            }
            (Idle, Open(element)) if has_class(element, "tr", &["Normal"]) => {
                self.kart = None;
                self.time = None;
                self.heat_id = None;
                Row { cell: 0 }
            }

            (NameLabel, Text(text)) => {
                self.display_name = text.to_string();
                NameLabel
            }
            (NameLabel, Close("span")) => Idle,

            (Row { cell }, Open(element)) if element.name() == "td" => Row { cell: cell + 1 },
            (Row { cell }, Open(element)) if element.name() == "a" => {
                if let Some(value) = element.attr("href").and_then(last_query_value) {
                    self.heat_id = Some(parse_number("heat id", value)?);
                }
                Row { cell }
            }
            (Row { cell }, Text(text)) => {
                self.cell_text(cell, text)?;
                Row { cell }
            }
            (Row { .. }, Close("tr")) => {
                self.close_row();
                Idle
            }

            (state, _) => state,
        };
        Ok(())
    }

    fn finish(self) -> Result<RacerHistoryPage, ParseError> {
        if !self.named {
            return Err(ParseError::MissingField("racer name"));
        }
        Ok(RacerHistoryPage {
            display_name: self.display_name,
            entries: self.entries,
        })
    }
}
