//! Validation of raw oracle output. Nothing in a candidate is trusted: every field is
//! re-checked and coerced, and anything unusable is dropped or rejected here.

use chrono::{NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{Floor, Party, VenueType, Workshop};

pub const DANCE_STYLES: &[&str] = &[
    "Salsa",
    "Bachata",
    "Kizomba",
    "Zouk",
    "Merengue",
    "Cha Cha",
    "Mambo",
    "Reggaeton",
    "Son",
    "Rueda",
    "Timba",
    "Cumbia",
    "Tango",
    "Milonga",
    "Vals",
    "Swing",
    "Lindy Hop",
    "West Coast Swing",
    "East Coast Swing",
    "Jive",
    "Boogie Woogie",
    "Blues",
    "Forró",
    "Samba",
    "Bolero",
    "Discofox",
    "Hustle",
    "Paso Doble",
    "Quickstep",
    "Foxtrot",
    "Waltz",
    "Rumba",
    "Cha-Cha-Cha",
];

/// Sent to the oracle and stored whenever a candidate carries no usable time.
pub const DEFAULT_EVENT_TIME: &str = "20:00";

static STYLE_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("Salsa", r"(?i)\b(salsa|salsatanz)\b"),
        ("Bachata", r"(?i)\b(bachata|bachatanz)\b"),
        ("Kizomba", r"(?i)\b(kizomba|kizombatanz)\b"),
        ("Zouk", r"(?i)\b(zouk|zouktanz)\b"),
        ("Merengue", r"(?i)\bmerengue\b"),
        ("Cha Cha", r"(?i)\bcha[- ]cha\b"),
        ("Mambo", r"(?i)\bmambo\b"),
        ("Reggaeton", r"(?i)\breggaeton\b"),
        ("Son", r"(?i)\bson( cubano)?\b"),
        ("Rueda", r"(?i)\brueda( de casino)?\b"),
        ("Timba", r"(?i)\btimba\b"),
        ("Cumbia", r"(?i)\bcumbia\b"),
        ("Tango", r"(?i)\b(tango|tangotanz)\b"),
        ("Milonga", r"(?i)\bmilonga\b"),
        ("Vals", r"(?i)\bvals\b"),
        ("Swing", r"(?i)\bswing\b"),
        ("Lindy Hop", r"(?i)\blindy ?hop\b"),
        ("West Coast Swing", r"(?i)\b(west coast swing|wcs)\b"),
        ("East Coast Swing", r"(?i)\b(east coast swing|ecs)\b"),
        ("Jive", r"(?i)\bjive\b"),
        ("Boogie Woogie", r"(?i)\bboogie[- ]?woogie\b"),
        ("Blues", r"(?i)\bblues\b"),
        ("Forró", r"(?i)\bforr[oó]\b"),
        ("Samba", r"(?i)\bsamba\b"),
        ("Bolero", r"(?i)\bbolero\b"),
        ("Discofox", r"(?i)\bdisco ?fox\b"),
        ("Hustle", r"(?i)\bhustle\b"),
        ("Paso Doble", r"(?i)\bpaso ?doble\b"),
        ("Quickstep", r"(?i)\bquick ?step\b"),
        ("Foxtrot", r"(?i)\bfoxtrott?\b"),
        ("Waltz", r"(?i)\b(waltz|walzer)\b"),
        ("Rumba", r"(?i)\brumba\b"),
        ("Cha-Cha-Cha", r"(?i)\bcha[- ]?cha[- ]?cha\b"),
    ]
    .into_iter()
    .map(|(style, pattern)| (style, Regex::new(pattern).expect("valid style regex")))
    .collect()
});

const OUTDOOR_TERMS: &[&str] = &[
    "open air",
    "draußen",
    "outdoor",
    "garten",
    "terrasse",
    "bei gutem wetter",
    "innenhof",
    "park",
    "strand",
];

const INDOOR_TERMS: &[&str] = &[
    "indoor",
    "drinnen",
    "saal",
    "club",
    "bar",
    "restaurant",
    "studio",
    "tanzschule",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("candidate is not a JSON object")]
    NotAnObject,
    #[error("candidate has no title")]
    MissingTitle,
}

/// A candidate that passed validation; dates and recurrence are still unresolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub title: String,
    pub dance_styles: Vec<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
    pub venue_name: Option<String>,
    pub venue_address: Option<String>,
    pub venue_type: VenueType,
    pub workshop_date: Option<NaiveDate>,
    pub workshop_time: Option<String>,
    pub party_date: Option<NaiveDate>,
    pub party_time: Option<String>,
    pub workshops: Vec<Workshop>,
    pub party: Option<Party>,
    pub description: Option<String>,
    pub recurrence: Option<String>,
    pub recurring_pattern: Option<String>,
    pub multiple_dates: Vec<NaiveDate>,
}

impl Candidate {
    pub fn from_value(value: &Value) -> Result<Self, Rejection> {
        let obj = value.as_object().ok_or(Rejection::NotAnObject)?;
        let title = text_field(obj, "title").ok_or(Rejection::MissingTitle)?;
        let description = text_field(obj, "description");

        let mut dance_styles = allowed_styles(obj.get("dance_styles"));
        if dance_styles.is_empty() {
            let haystack = format!("{title} {}", description.as_deref().unwrap_or(""));
            dance_styles = detect_styles(&haystack);
        }

        let venue_type = text_field(obj, "venue_type")
            .as_deref()
            .and_then(VenueType::parse)
            .filter(|kind| *kind != VenueType::Unspecified)
            .unwrap_or_else(|| detect_venue_type(description.as_deref()));

        let mut multiple_dates: Vec<NaiveDate> = match obj.get("multiple_dates") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().and_then(parse_date))
                .collect(),
            _ => Vec::new(),
        };
        multiple_dates.dedup();

        Ok(Self {
            title,
            dance_styles,
            date: date_field(obj, "date"),
            time: time_field(obj, "time"),
            venue_name: text_field(obj, "venue_name"),
            venue_address: text_field(obj, "venue_address").or_else(|| text_field(obj, "address")),
            venue_type,
            workshop_date: date_field(obj, "workshop_date"),
            workshop_time: time_field(obj, "workshop_time"),
            party_date: date_field(obj, "party_date"),
            party_time: time_field(obj, "party_time"),
            workshops: workshops(obj.get("workshops")),
            party: party(obj.get("party")),
            description,
            recurrence: text_field(obj, "recurrence"),
            recurring_pattern: text_field(obj, "recurring_pattern").map(|p| p.to_lowercase()),
            multiple_dates,
        })
    }
}

/// Trimmed string (or number rendered as text); placeholders like `"null"` count as absent.
fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    coerce_text(obj.get(key)?)
}

fn coerce_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    match text.to_ascii_lowercase().as_str() {
        "" | "null" | "undefined" | "none" | "n/a" => None,
        _ => Some(text),
    }
}

fn date_field(obj: &Map<String, Value>, key: &str) -> Option<NaiveDate> {
    text_field(obj, key).as_deref().and_then(parse_date)
}

fn time_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    text_field(obj, key).as_deref().and_then(parse_time)
}

/// ISO dates, or German day-first dates with a four- or two-digit year (`20.08.2025`, `20.08.25`).
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let trimmed = input.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    // Datetime strings such as 2025-07-11T21:00:00.000Z
    if let Some(date) = trimmed
        .get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
    {
        return Some(date);
    }
    // %Y would happily read "25" as the year 25.
    let fmt = match trimmed.rsplit_once('.')?.1.len() {
        4 => "%d.%m.%Y",
        2 => "%d.%m.%y",
        _ => return None,
    };
    NaiveDate::parse_from_str(trimmed, fmt).ok()
}

/// Normalizes `21:00`, `21.00`, `21:00:00` or `21 Uhr` to `HH:MM`.
pub fn parse_time(input: &str) -> Option<String> {
    let trimmed = input.trim().trim_end_matches("Uhr").trim();
    ["%H:%M", "%H:%M:%S", "%H.%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            trimmed
                .parse::<u32>()
                .ok()
                .and_then(|hour| NaiveTime::from_hms_opt(hour, 0, 0))
        })
        .map(|time| time.format("%H:%M").to_string())
}

fn allowed_styles(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    let mut out: Vec<String> = Vec::new();
    for item in items.iter().filter_map(coerce_text) {
        let wanted = item.to_lowercase();
        let canonical = DANCE_STYLES
            .iter()
            .find(|style| style.to_lowercase() == wanted);
        if let Some(style) = canonical {
            if !out.iter().any(|existing| existing == style) {
                out.push(style.to_string());
            }
        }
    }
    out
}

pub fn detect_styles(text: &str) -> Vec<String> {
    let mut styles: Vec<&str> = STYLE_PATTERNS
        .iter()
        .filter(|(_, pattern)| pattern.is_match(text))
        .map(|(style, _)| *style)
        .collect();
    if styles.contains(&"Cha-Cha-Cha") {
        styles.retain(|style| *style != "Cha Cha");
    }
    if styles.is_empty() {
        vec!["Salsa".to_string()]
    } else {
        styles.into_iter().map(str::to_string).collect()
    }
}

pub fn detect_venue_type(description: Option<&str>) -> VenueType {
    let Some(text) = description else {
        return VenueType::Unspecified;
    };
    let lower = text.to_lowercase();
    if OUTDOOR_TERMS.iter().any(|term| lower.contains(term)) {
        VenueType::Outdoor
    } else if INDOOR_TERMS.iter().any(|term| lower.contains(term)) {
        VenueType::Indoor
    } else {
        VenueType::Unspecified
    }
}

fn workshops(value: Option<&Value>) -> Vec<Workshop> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|obj| Workshop {
            style: text_field(obj, "style"),
            level: text_field(obj, "level"),
            start: time_field(obj, "start"),
            end: time_field(obj, "end"),
            instructors: match obj.get("instructors") {
                Some(Value::Array(names)) => names.iter().filter_map(coerce_text).collect(),
                Some(other) => coerce_text(other).into_iter().collect(),
                None => Vec::new(),
            },
        })
        .filter(|workshop| *workshop != Workshop::default())
        .collect()
}

fn party(value: Option<&Value>) -> Option<Party> {
    let obj = value?.as_object()?;
    let floors = match obj.get("floors") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|floor| {
                Some(Floor {
                    floor: text_field(floor, "floor")?,
                    distribution: text_field(floor, "distribution"),
                })
            })
            .collect(),
        _ => Vec::new(),
    };
    let party = Party {
        start: time_field(obj, "start"),
        end: time_field(obj, "end"),
        floors,
    };
    (party != Party::default()).then_some(party)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn well_formed_candidate_is_kept() {
        let raw = json!({
            "title": " Salsa Night ",
            "dance_styles": ["salsa", "Bachata", "Polka", "SALSA"],
            "date": "2025-07-11",
            "time": "21:00",
            "venue_name": "Havanna",
            "venue_address": "Hauptstraße 30, 10827 Berlin",
            "venue_type": "Indoor",
            "workshops": [{"style": "Salsa", "level": "Beginner", "start": "20:00", "end": "21:00", "instructors": ["Ana", "Luis"]}],
            "party": {"start": "21:00", "end": null, "floors": [{"floor": "1", "distribution": "70% Salsa"}]},
            "recurring_pattern": "Weekly_Friday",
            "multiple_dates": null
        });
        let candidate = Candidate::from_value(&raw).unwrap();
        assert_eq!(candidate.title, "Salsa Night");
        assert_eq!(candidate.dance_styles, vec!["Salsa", "Bachata"]);
        assert_eq!(candidate.date, NaiveDate::from_ymd_opt(2025, 7, 11));
        assert_eq!(candidate.time.as_deref(), Some("21:00"));
        assert_eq!(candidate.venue_type, VenueType::Indoor);
        assert_eq!(candidate.workshops[0].instructors, vec!["Ana", "Luis"]);
        let party = candidate.party.unwrap();
        assert_eq!(party.end, None);
        assert_eq!(party.floors[0].distribution.as_deref(), Some("70% Salsa"));
        assert_eq!(candidate.recurring_pattern.as_deref(), Some("weekly_friday"));
        assert!(candidate.multiple_dates.is_empty());
    }

    #[test]
    fn wrong_types_are_coerced_or_dropped() {
        let raw = json!({
            "title": 2025,
            "dance_styles": "Salsa",
            "date": "undefined",
            "time": 21,
            "venue_type": "garage",
            "description": "Open Air im Park",
            "workshops": ["not an object", {}],
            "party": {},
            "multiple_dates": ["2025-07-18", 5, "bald", "01.08.2025"]
        });
        let candidate = Candidate::from_value(&raw).unwrap();
        assert_eq!(candidate.title, "2025");
        assert_eq!(candidate.dance_styles, vec!["Salsa"]);
        assert_eq!(candidate.date, None);
        assert_eq!(candidate.time.as_deref(), Some("21:00"));
        assert_eq!(candidate.venue_type, VenueType::Outdoor);
        assert!(candidate.workshops.is_empty());
        assert_eq!(candidate.party, None);
        assert_eq!(
            candidate.multiple_dates,
            vec![
                NaiveDate::from_ymd_opt(2025, 7, 18).unwrap(),
                NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()
            ]
        );
    }

    #[test]
    fn missing_title_or_non_object_is_rejected() {
        assert_eq!(
            Candidate::from_value(&json!({"title": "null"})),
            Err(Rejection::MissingTitle)
        );
        assert_eq!(
            Candidate::from_value(&json!(["Salsa"])),
            Err(Rejection::NotAnObject)
        );
    }

    #[test]
    fn styles_are_detected_from_text_when_missing() {
        let raw = json!({"title": "Bachata & Kizomba Social", "dance_styles": ["Polka"]});
        let candidate = Candidate::from_value(&raw).unwrap();
        assert_eq!(candidate.dance_styles, vec!["Bachata", "Kizomba"]);
        assert_eq!(detect_styles("Tanzabend"), vec!["Salsa"]);
    }

    #[test]
    fn every_listed_style_and_its_aliases_are_detected() {
        assert_eq!(
            detect_styles("Rumba, Bolero und Cha Cha Abend mit Blues"),
            vec!["Cha Cha", "Blues", "Bolero", "Rumba"]
        );
        assert_eq!(
            detect_styles("WCS Social, danach Walzer und Foxtrott"),
            vec!["West Coast Swing", "Foxtrot", "Waltz"]
        );
        assert_eq!(detect_styles("ECS & Jive"), vec!["East Coast Swing", "Jive"]);
        assert_eq!(detect_styles("Cha-Cha-Cha Kurs"), vec!["Cha-Cha-Cha"]);
        assert_eq!(
            detect_styles("Paso Doble, Quickstep, Hustle, Boogie Woogie"),
            vec!["Boogie Woogie", "Hustle", "Paso Doble", "Quickstep"]
        );
    }

    #[test]
    fn dates_are_day_first() {
        assert_eq!(parse_date("05.11.2025"), NaiveDate::from_ymd_opt(2025, 11, 5));
        assert_eq!(parse_date("2025-07-11T21:00:00"), NaiveDate::from_ymd_opt(2025, 7, 11));
        assert_eq!(parse_date("2025-07-11T21:00:00.000Z"), NaiveDate::from_ymd_opt(2025, 7, 11));
        assert_eq!(parse_date("31.02.2025"), None);
        assert_eq!(parse_date("05.11.25"), NaiveDate::from_ymd_opt(2025, 11, 5));
        assert_eq!(parse_date("05.11.025"), None);
        assert_eq!(parse_time("21.30"), Some("21:30".to_string()));
        assert_eq!(parse_time("20 Uhr"), Some("20:00".to_string()));
        assert_eq!(parse_time("late"), None);
    }

    #[test]
    fn venue_type_detection_prefers_outdoor_vocabulary() {
        assert_eq!(
            detect_venue_type(Some("Im Club, bei gutem Wetter auf der Terrasse")),
            VenueType::Outdoor
        );
        assert_eq!(detect_venue_type(Some("Tanzschule Mitte")), VenueType::Indoor);
        assert_eq!(detect_venue_type(Some("Salsa")), VenueType::Unspecified);
        assert_eq!(detect_venue_type(None), VenueType::Unspecified);
    }
}
