//! Extractor behavior against full vendor-shaped pages.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use heatwatch::extract::{HeatPageExtractor, HistoryPageExtractor, PageExtractor};
use heatwatch::models::{RaceType, Venue, WinCondition};

const QUALIFIER: &str = include_str!("fixtures/qualifier.html");

fn atlanta() -> Venue {
    Venue::new("Atlanta", "k1atlanta", 1, chrono_tz::US::Eastern)
}

#[test]
fn qualifier_heat_page() {
    let heat = HeatPageExtractor::new(&atlanta()).extract(QUALIFIER).unwrap();

    assert_eq!(heat.heat_id, 147204);
    assert_eq!(heat.race_type, RaceType::Qualifier);
    assert_eq!(heat.win_condition, WinCondition::BestLap);
    assert_eq!(heat.start_time, Utc.with_ymd_and_hms(2021, 9, 5, 23, 10, 0).unwrap());
    assert_eq!(heat.track, 1);
    assert_eq!(heat.sessions.len(), 5);

    let positions: Vec<u32> = heat.sessions.iter().map(|s| s.position).collect();
    assert_eq!(positions, vec![1, 2, 3, 4, 5]);

    let winner = heat.session_for(1008641).unwrap();
    assert_eq!(winner.name, "Jeremy Brown");
    assert_eq!(winner.score, 1402);
    assert_eq!(winner.laps.len(), 4);
    assert_eq!(winner.laps[2].lap_time, 25.487);
    assert_eq!(winner.laps[0].position, 3);

    let fifth = heat.session_for(1301877).unwrap();
    assert_eq!(fifth.name, "Luis Carvalho");
    assert_eq!(fifth.score, 1240);
    assert_eq!(fifth.laps.len(), 3);
}

/// A history page shaped like the vendor's, `rows` entries long, newest first.
fn long_history_page(rows: usize) -> String {
    let first = NaiveDate::from_ymd_opt(2022, 4, 27)
        .and_then(|d| d.and_hms_opt(21, 30, 0))
        .unwrap();
    let body: String = (0..rows)
        .map(|i| {
            let local = first - Duration::days(i as i64);
            format!(
                r#"<tr class="Normal">
                    <td>Kart {kart}</td>
                    <td>{time}</td>
                    <td><a href="HeatDetails.aspx?HeatNo={heat}">{heat}</a></td>
                    <td>1,{score}</td>
                </tr>"#,
                kart = 25 + (i % 20),
                time = local.format("%m/%d/%Y %I:%M %p"),
                heat = 159218 - i,
                score = 200 + i % 100,
            )
        })
        .collect();

    format!(
        r#"<html><body><form method="post" action="./RacerHistory.aspx?CustID=MTAwODY0MQ%3d%3d">
        <span id="lblRacerName">Jeremy Brown</span>
        <table class="SessionTable">
            <tr class="Header"><td>Kart</td><td>Date</td><td>Heat</td><td>Score</td></tr>
            {body}
        </table></form></body></html>"#
    )
}

#[test]
fn long_racer_history_page() {
    let page = HistoryPageExtractor::new(&atlanta())
        .extract(&long_history_page(451))
        .unwrap();

    assert_eq!(page.display_name, "Jeremy Brown");
    assert_eq!(page.entries.len(), 451);

    let first = &page.entries[0];
    assert_eq!(first.venue, "Atlanta");
    assert_eq!(first.heat_id, 159218);
    assert_eq!(first.kart, 25);
    assert_eq!(first.time, Utc.with_ymd_and_hms(2022, 4, 28, 1, 30, 0).unwrap());

    assert_eq!(page.entries[450].heat_id, 159218 - 450);
}
