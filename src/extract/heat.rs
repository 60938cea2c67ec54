//! Heat detail page grammar.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use regex::Regex;

use super::{PageExtractor, ParseError, TagEvent, TagGrammar, drive, has_class, has_id, parse_local_time, parse_number};
use crate::models::{HeatId, HeatRecord, LapEntry, RaceType, RacerId, RacerSession, Venue, WinCondition};
use crate::utils::url::{decode_racer_id, last_query_value, query_value};

/// Track reported for heat pages; the vendor page never names one.
const DEFAULT_TRACK: u32 = 1;

/// Lap cells this short are lap numbers or padding, not lap entries.
const MAX_DECORATIVE_LEN: usize = 3;

static LAP_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)?)\s*\((\d+)\)$").expect("lap entry pattern is valid")
});

enum LabelRule {
    Exact(&'static str),
    Suffix(&'static str),
}

/// Race type labels, checked in order.
const RACE_TYPE_RULES: &[(LabelRule, RaceType)] = &[
    (LabelRule::Exact(".STANDARD Race."), RaceType::Standard),
    (LabelRule::Exact(".JUNIOR Race."), RaceType::Junior),
    (LabelRule::Exact("DRIFT Race"), RaceType::Drift),
    (LabelRule::Exact("BALL CHALLENGE"), RaceType::BallChallenge),
    (LabelRule::Exact("GRID Race"), RaceType::GridRace),
    (LabelRule::Suffix("Practice"), RaceType::Practice),
    (LabelRule::Suffix("Qualifier"), RaceType::Qualifier),
    (LabelRule::Suffix("Final"), RaceType::Final),
];

/// Map a race type label to its enum value.
pub fn race_type_from_label(text: &str) -> Result<RaceType, ParseError> {
    RACE_TYPE_RULES
        .iter()
        .find(|(rule, _)| match rule {
            LabelRule::Exact(label) => text == *label,
            LabelRule::Suffix(suffix) => text.ends_with(suffix),
        })
        .map(|(_, race_type)| *race_type)
        .ok_or_else(|| ParseError::UnknownRaceType(text.to_string()))
}

/// Map a "winner by" label to its enum value.
pub fn win_condition_from_label(text: &str) -> Result<WinCondition, ParseError> {
    match text {
        "Best Lap" => Ok(WinCondition::BestLap),
        "Position" => Ok(WinCondition::Position),
        _ => Err(ParseError::UnknownWinCondition(text.to_string())),
    }
}

/// Top-three rows print a label instead of a number.
pub fn position_from_label(text: &str) -> Result<u32, ParseError> {
    match text {
        "Heat Winner:" => Ok(1),
        "2nd Place:" => Ok(2),
        "3rd Place:" => Ok(3),
        other => parse_number("position", other),
    }
}

/// Parse a lap cell of the form `"25.123 (2)"`.
pub fn parse_lap_entry(text: &str) -> Result<LapEntry, ParseError> {
    let invalid = || ParseError::InvalidLapEntry(text.to_string());
    let caps = LAP_ENTRY.captures(text).ok_or_else(invalid)?;
    let lap_time: f64 = caps[1].parse().map_err(|_| invalid())?;
    let position: u32 = caps[2].parse().map_err(|_| invalid())?;
    if lap_time <= 0.0 || position == 0 {
        return Err(invalid());
    }
    Ok(LapEntry { lap_time, position })
}

/// Extracts a [`HeatRecord`] from a `HeatDetails.aspx` page.
#[derive(Debug, Clone)]
pub struct HeatPageExtractor {
    tz: Tz,
    track: u32,
}

impl HeatPageExtractor {
    pub fn new(venue: &Venue) -> Self {
        Self {
            tz: venue.timezone,
            track: DEFAULT_TRACK,
        }
    }
}

impl PageExtractor for HeatPageExtractor {
    type Record = HeatRecord;

    fn extract(&self, html: &str) -> Result<HeatRecord, ParseError> {
        drive(html, HeatGrammar::new(self.tz, self.track))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowMode {
    Fields,
    Name,
    ScoreCell,
    Score,
    Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LapMode {
    Table,
    Header,
    Row,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeatState {
    Idle,
    TypeLabel,
    WinCondLabel,
    TimeLabel,
    RacerRow(RowMode),
    LapTable(LapMode),
}

/// Per-racer fields gathered while inside a racer row.
#[derive(Debug, Default)]
struct RacerFields {
    name: Option<String>,
    racer_id: Option<RacerId>,
    position: Option<u32>,
    score: Option<i32>,
}

struct HeatGrammar {
    tz: Tz,
    track: u32,
    state: HeatState,

    heat_id: Option<HeatId>,
    race_type: Option<RaceType>,
    win_condition: Option<WinCondition>,
    start_time: Option<DateTime<Utc>>,

    racer: RacerFields,
    /// Cycles 1, 2, 0 across the three stacked rows of a top-three entrant
    top_three_row: u8,

    sessions: Vec<RacerSession>,
    by_name: HashMap<String, usize>,
    lap_owner: Option<usize>,
}

impl HeatGrammar {
    fn new(tz: Tz, track: u32) -> Self {
        Self {
            tz,
            track,
            state: HeatState::Idle,
            heat_id: None,
            race_type: None,
            win_condition: None,
            start_time: None,
            racer: RacerFields::default(),
            top_three_row: 0,
            sessions: Vec::new(),
            by_name: HashMap::new(),
            lap_owner: None,
        }
    }

    fn open_idle(&mut self, element: &scraper::node::Element) -> HeatState {
        if has_id(element, "span", "lblRaceType") {
            HeatState::TypeLabel
        } else if has_id(element, "span", "lblWinnerBy") {
            HeatState::WinCondLabel
        } else if has_id(element, "span", "lblDate") {
            HeatState::TimeLabel
        } else if has_class(element, "tr", &["RegularRow", "RegularRowAlt"]) {
            HeatState::RacerRow(RowMode::Fields)
        } else if has_class(element, "tr", &["Top3WinnersRow", "Top3WinnersRowAlt"]) {
            self.top_three_row = (self.top_three_row + 1) % 3;
            HeatState::RacerRow(RowMode::Fields)
        } else if has_class(element, "table", &["LapTimes"]) {
            self.lap_owner = None;
            HeatState::LapTable(LapMode::Table)
        } else {
            HeatState::Idle
        }
    }

    fn open_racer_field(&mut self, element: &scraper::node::Element) -> Result<HeatState, ParseError> {
        let next = if has_class(element, "td", &["RPM"]) {
            HeatState::RacerRow(RowMode::ScoreCell)
        } else if has_class(element, "td", &["Position"]) {
            HeatState::RacerRow(RowMode::Position)
        } else if element.name() == "a" {
            let href = element.attr("href").unwrap_or_default();
            let racer_id = query_value(href)
                .and_then(decode_racer_id)
                .ok_or_else(|| ParseError::InvalidRacerId(href.to_string()))?;
            self.racer.racer_id.get_or_insert(racer_id);
            HeatState::RacerRow(RowMode::Name)
        } else {
            HeatState::RacerRow(RowMode::Fields)
        };
        Ok(next)
    }

    /// Closing `</tr>` of a racer row; only the last row of a top-three triple commits.
    fn close_racer_row(&mut self) -> HeatState {
        if self.top_three_row != 0 {
            return HeatState::Idle;
        }

        let racer = std::mem::take(&mut self.racer);
        let heat_ready =
            self.heat_id.is_some() && self.race_type.is_some() && self.win_condition.is_some();

        if let (true, Some(name), Some(racer_id), Some(position), Some(score)) =
            (heat_ready, racer.name, racer.racer_id, racer.position, racer.score)
        {
            let session = RacerSession {
                name: name.clone(),
                racer_id,
                position,
                score,
                laps: Vec::new(),
            };
            match self.by_name.get(&name) {
                Some(&index) => self.sessions[index] = session,
                None => {
                    self.by_name.insert(name, self.sessions.len());
                    self.sessions.push(session);
                }
            }
        }
        HeatState::Idle
    }

    fn push_lap(&mut self, text: &str) -> Result<(), ParseError> {
        if text.chars().count() <= MAX_DECORATIVE_LEN {
            return Ok(());
        }
        let lap = parse_lap_entry(text)?;
        if let Some(index) = self.lap_owner {
            self.sessions[index].laps.push(lap);
        }
        Ok(())
    }
}

impl TagGrammar for HeatGrammar {
    type Output = HeatRecord;

    fn on_event(&mut self, event: TagEvent<'_>) -> Result<(), ParseError> {
        use HeatState::*;
        use TagEvent::*;

        if let Open(element) = event {
            if element.name() == "form" {
                if let Some(value) = element.attr("action").and_then(last_query_value) {
                    self.heat_id = Some(parse_number("heat id", value)?);
                }
                return Ok(());
            }
        }

        self.state = match (self.state, event) {
            (Idle, Open(element)) => self.open_idle(element),

            (TypeLabel, Text(text)) => {
                self.race_type = Some(race_type_from_label(text)?);
                Idle
            }
            (WinCondLabel, Text(text)) => {
                self.win_condition = Some(win_condition_from_label(text)?);
                Idle
            }
            (TimeLabel, Text(text)) => {
                self.start_time = Some(parse_local_time(text, self.tz)?);
                Idle
            }
            (TypeLabel | WinCondLabel | TimeLabel, Close("span")) => Idle,

            (RacerRow(_), Close("tr")) => self.close_racer_row(),
            (RacerRow(RowMode::Fields), Open(element)) => self.open_racer_field(element)?,
            (RacerRow(RowMode::Name), Text(text)) => {
                self.racer.name.get_or_insert_with(|| text.to_string());
                RacerRow(RowMode::Name)
            }
            (RacerRow(RowMode::Name), Close("a")) => RacerRow(RowMode::Fields),
            (RacerRow(RowMode::ScoreCell), Open(element)) if element.name() == "span" => {
                RacerRow(RowMode::Score)
            }
            (RacerRow(RowMode::ScoreCell), Close("td")) => RacerRow(RowMode::Fields),
            (RacerRow(RowMode::Score), Text(text)) => {
                let score = parse_number("score", text)?;
                self.racer.score.get_or_insert(score);
                RacerRow(RowMode::Score)
            }
            (RacerRow(RowMode::Score), Close("span")) => RacerRow(RowMode::ScoreCell),
            (RacerRow(RowMode::Position), Text(text)) => {
                let position = position_from_label(text)?;
                self.racer.position.get_or_insert(position);
                RacerRow(RowMode::Position)
            }
            (RacerRow(RowMode::Position), Close("td")) => RacerRow(RowMode::Fields),

            (LapTable(_), Close("table")) => {
                self.lap_owner = None;
                Idle
            }
            (LapTable(LapMode::Table), Open(element)) if element.name() == "thead" => {
                LapTable(LapMode::Header)
            }
            (LapTable(LapMode::Table), Open(element))
                if has_class(element, "tr", &["LapTimesRow", "LapTimesRowAlt"]) =>
            {
                LapTable(LapMode::Row)
            }
            (LapTable(LapMode::Header), Text(text)) => {
                if self.lap_owner.is_none() {
                    let index = self
                        .by_name
                        .get(text)
                        .copied()
                        .ok_or_else(|| ParseError::UnknownLapOwner(text.to_string()))?;
                    self.lap_owner = Some(index);
                }
                LapTable(LapMode::Header)
            }
            (LapTable(LapMode::Header), Close("thead")) => LapTable(LapMode::Table),
            (LapTable(LapMode::Row), Text(text)) => {
                self.push_lap(text)?;
                LapTable(LapMode::Row)
            }
            (LapTable(LapMode::Row), Close("tr")) => LapTable(LapMode::Table),

            (state, _) => state,
        };
        Ok(())
    }

    fn finish(self) -> Result<HeatRecord, ParseError> {
        let heat_id = self.heat_id.ok_or(ParseError::MissingField("heat id"))?;
        let race_type = self.race_type.ok_or(ParseError::MissingField("race type"))?;
        let win_condition = self
            .win_condition
            .ok_or(ParseError::MissingField("win condition"))?;
        let start_time = self.start_time.ok_or(ParseError::MissingField("heat time"))?;

        let mut sessions: Vec<RacerSession> = Vec::with_capacity(self.sessions.len());
        for session in self.sessions {
            if !sessions.iter().any(|s| s.racer_id == session.racer_id) {
                sessions.push(session);
            }
        }

        Ok(HeatRecord {
            heat_id,
            race_type,
            win_condition,
            start_time,
            track: self.track,
            sessions,
        })
    }
}
