//! Core domain model for FOF: search hits, enriched opportunities, score
//! breakdowns and the flattened export row.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "fof-core";

/// Display value for optional export fields that could not be resolved.
pub const NOT_SPECIFIED: &str = "Not specified";

/// Title used when a search hit carries none.
pub const UNTITLED: &str = "(no title)";

/// Eligibility text is clipped to this many characters in exports.
pub const ELIGIBILITY_EXPORT_CHARS: usize = 240;

/// Close-date formats, tried in order.
pub const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%Y-%m-%d"];

/// Prioritised list of candidate keys for one logical field.
///
/// Payload field names drift between API versions; the first key holding a
/// non-empty value wins. Supporting a new schema version means appending a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldKeys(pub &'static [&'static str]);

impl FieldKeys {
    pub const HIT_TITLE: Self = Self(&["title", "OpportunityTitle"]);
    pub const HIT_AGENCY: Self = Self(&["agency", "AgencyName"]);
    pub const HIT_CLOSE_DATE: Self = Self(&["closeDate", "CloseDate"]);
    pub const HIT_NUMBER: Self = Self(&["number", "OpportunityNumber"]);
    pub const HIT_URL: Self = Self(&["url", "OpportunityURL"]);

    pub const DETAIL_ELIGIBILITY: Self =
        Self(&["EligibilityCategory", "Eligibility", "EligibleApplicants"]);
    pub const DETAIL_SYNOPSIS: Self = Self(&["SynopsisText", "Description", "Synopsis"]);
    pub const DETAIL_CATEGORY: Self = Self(&["CategoryOfFundingActivity", "FundingCategories"]);
    pub const DETAIL_URL: Self = Self(&["OpportunityURL", "SynopsisURL", "opportunitySynopsisURL"]);

    /// First non-empty value under any of the keys, rendered as text.
    pub fn resolve(&self, record: &JsonValue) -> Option<String> {
        self.0
            .iter()
            .filter_map(|key| record.get(*key))
            .find_map(value_text)
    }

    pub fn resolve_or(&self, record: &JsonValue, default: &str) -> String {
        self.resolve(record).unwrap_or_else(|| default.to_string())
    }
}

fn value_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Array(items) => {
            let parts = items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        _ => None,
    }
}

/// One raw search-result record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunityHit {
    pub title: String,
    pub agency: String,
    pub close_date: String,
    pub number: String,
    pub url: Option<String>,
}

impl OpportunityHit {
    pub fn from_json(raw: &JsonValue) -> Self {
        Self {
            title: FieldKeys::HIT_TITLE.resolve_or(raw, UNTITLED),
            agency: FieldKeys::HIT_AGENCY.resolve_or(raw, ""),
            close_date: FieldKeys::HIT_CLOSE_DATE.resolve_or(raw, ""),
            number: FieldKeys::HIT_NUMBER.resolve_or(raw, ""),
            url: FieldKeys::HIT_URL.resolve(raw),
        }
    }

    pub fn has_number(&self) -> bool {
        !self.number.trim().is_empty()
    }
}

/// A hit plus whatever text the detail record contributed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedOpportunity {
    pub hit: OpportunityHit,
    pub synopsis: String,
    pub eligibility: String,
    pub category: String,
    pub url: String,
}

impl EnrichedOpportunity {
    /// Enrichment skipped or failed: empty texts, the hit's own URL.
    pub fn unenriched(hit: OpportunityHit) -> Self {
        let url = hit.url.clone().unwrap_or_default();
        Self {
            hit,
            synopsis: String::new(),
            eligibility: String::new(),
            category: String::new(),
            url,
        }
    }

    pub fn score_input(&self) -> ScoreInput<'_> {
        ScoreInput {
            title: &self.hit.title,
            agency: &self.hit.agency,
            synopsis: &self.synopsis,
            eligibility: &self.eligibility,
            category: &self.category,
        }
    }
}

/// Free-text fields the scorer reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreInput<'a> {
    pub title: &'a str,
    pub agency: &'a str,
    pub synopsis: &'a str,
    pub eligibility: &'a str,
    pub category: &'a str,
}

impl ScoreInput<'_> {
    pub fn blob(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.title, self.agency, self.synopsis, self.eligibility, self.category
        )
        .to_lowercase()
    }
}

/// Per-bucket hit counts and (capped) points behind a total score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScoreBreakdown {
    pub mission_hits: u32,
    pub program_hits: u32,
    pub tech_hits: u32,
    pub mission_pts: u32,
    pub program_pts: u32,
    pub tech_pts: u32,
}

impl ScoreBreakdown {
    pub const MAX_TOTAL: u32 = 100;

    pub fn total(&self) -> u32 {
        self.fit().min(Self::MAX_TOTAL)
    }

    pub fn total_hits(&self) -> u32 {
        self.mission_hits
            .saturating_add(self.program_hits)
            .saturating_add(self.tech_hits)
    }

    /// Uncapped sum of bucket points.
    pub fn fit(&self) -> u32 {
        self.mission_pts
            .saturating_add(self.program_pts)
            .saturating_add(self.tech_pts)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Mission / programs / technology keyword lists.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeywordTaxonomy {
    #[serde(default)]
    pub mission: Vec<String>,
    #[serde(default)]
    pub programs: Vec<String>,
    #[serde(default)]
    pub technology: Vec<String>,
}

impl KeywordTaxonomy {
    /// Lowercases and trims every keyword, dropping blanks.
    pub fn normalized(self) -> Self {
        fn clean(list: Vec<String>) -> Vec<String> {
            list.into_iter()
                .map(|kw| kw.trim().to_lowercase())
                .filter(|kw| !kw.is_empty())
                .collect()
        }
        Self {
            mission: clean(self.mission),
            programs: clean(self.programs),
            technology: clean(self.technology),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mission.is_empty() && self.programs.is_empty() && self.technology.is_empty()
    }
}

/// Column order shared by every export table.
pub const EXPORT_COLUMNS: [&str; 16] = [
    "Score",
    "Title",
    "Agency",
    "CloseDate",
    "DaysLeft",
    "OppNumber",
    "Category",
    "Eligibility",
    "URL",
    "MissionHits",
    "ProgramHits",
    "TechHits",
    "MissionPts",
    "ProgramPts",
    "TechPts",
    "ScoreBreakdown",
];

/// Flattened, display-ready row written to every export table.
///
/// Field order matches [`EXPORT_COLUMNS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExportRow {
    pub score: u32,
    pub title: String,
    pub agency: String,
    pub close_date: String,
    pub days_left: Option<i64>,
    pub opp_number: String,
    pub category: String,
    pub eligibility: String,
    #[serde(rename = "URL")]
    pub url: String,
    pub mission_hits: u32,
    pub program_hits: u32,
    pub tech_hits: u32,
    pub mission_pts: u32,
    pub program_pts: u32,
    pub tech_pts: u32,
    pub score_breakdown: String,
}

impl ExportRow {
    /// Clean/derive step: defaults display fields and computes `DaysLeft`.
    pub fn derive(opp: &EnrichedOpportunity, breakdown: &ScoreBreakdown, today: NaiveDate) -> Self {
        let eligibility = truncate_chars(&opp.eligibility, ELIGIBILITY_EXPORT_CHARS);
        Self {
            score: breakdown.total(),
            title: opp.hit.title.clone(),
            agency: opp.hit.agency.clone(),
            close_date: opp.hit.close_date.clone(),
            days_left: days_left(&opp.hit.close_date, today),
            opp_number: opp.hit.number.clone(),
            category: or_not_specified(&opp.category),
            eligibility: or_not_specified(&eligibility),
            url: or_not_specified(&opp.url),
            mission_hits: breakdown.mission_hits,
            program_hits: breakdown.program_hits,
            tech_hits: breakdown.tech_hits,
            mission_pts: breakdown.mission_pts,
            program_pts: breakdown.program_pts,
            tech_pts: breakdown.tech_pts,
            score_breakdown: breakdown.to_json(),
        }
    }

    pub fn breakdown(&self) -> ScoreBreakdown {
        ScoreBreakdown {
            mission_hits: self.mission_hits,
            program_hits: self.program_hits,
            tech_hits: self.tech_hits,
            mission_pts: self.mission_pts,
            program_pts: self.program_pts,
            tech_pts: self.tech_pts,
        }
    }

    pub fn parsed_close_date(&self) -> Option<NaiveDate> {
        parse_close_date(&self.close_date)
    }
}

fn or_not_specified(value: &str) -> String {
    if value.trim().is_empty() {
        NOT_SPECIFIED.to_string()
    } else {
        value.to_string()
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

/// Parses a close date with [`DATE_FORMATS`]; `None` means "no deadline known".
pub fn parse_close_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

pub fn days_left(close_date: &str, today: NaiveDate) -> Option<i64> {
    parse_close_date(close_date).map(|d| (d - today).num_days())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    #[test]
    fn field_keys_take_first_non_empty_candidate() {
        let payload = json!({
            "EligibilityCategory": "",
            "Eligibility": null,
            "EligibleApplicants": "Nonprofits with 501(c)(3) status",
        });
        assert_eq!(
            FieldKeys::DETAIL_ELIGIBILITY.resolve(&payload).as_deref(),
            Some("Nonprofits with 501(c)(3) status")
        );
        assert_eq!(FieldKeys::DETAIL_CATEGORY.resolve(&payload), None);
    }

    #[test]
    fn field_keys_render_string_arrays_and_numbers() {
        let payload = json!({ "FundingCategories": ["Education", " ", "Health"], "number": 42 });
        assert_eq!(
            FieldKeys::DETAIL_CATEGORY.resolve(&payload).as_deref(),
            Some("Education; Health")
        );
        assert_eq!(FieldKeys::HIT_NUMBER.resolve(&payload).as_deref(), Some("42"));
    }

    #[test]
    fn hit_from_json_defaults_missing_fields() {
        let hit = OpportunityHit::from_json(&json!({ "AgencyName": "Dept of Education" }));
        assert_eq!(hit.title, UNTITLED);
        assert_eq!(hit.agency, "Dept of Education");
        assert_eq!(hit.close_date, "");
        assert!(!hit.has_number());
        assert_eq!(hit.url, None);
    }

    #[test]
    fn close_dates_parse_in_both_formats() {
        assert_eq!(
            parse_close_date("03/15/2026"),
            NaiveDate::from_ymd_opt(2026, 3, 15)
        );
        assert_eq!(
            parse_close_date("2026-03-15"),
            NaiveDate::from_ymd_opt(2026, 3, 15)
        );
        assert_eq!(parse_close_date("March 15"), None);
        assert_eq!(parse_close_date(""), None);
        assert_eq!(days_left("03/11/2026", today()), Some(10));
        assert_eq!(days_left("soon", today()), None);
    }

    #[test]
    fn derive_defaults_display_fields_and_keeps_days_left_null() {
        let opp = EnrichedOpportunity::unenriched(OpportunityHit {
            title: "Youth STEM Pathways".into(),
            agency: "NSF".into(),
            close_date: String::new(),
            number: "NSF-26-001".into(),
            url: None,
        });
        let breakdown = ScoreBreakdown {
            mission_hits: 2,
            mission_pts: 16,
            ..Default::default()
        };
        let row = ExportRow::derive(&opp, &breakdown, today());
        assert_eq!(row.score, 16);
        assert_eq!(row.category, NOT_SPECIFIED);
        assert_eq!(row.eligibility, NOT_SPECIFIED);
        assert_eq!(row.url, NOT_SPECIFIED);
        assert_eq!(row.days_left, None);
        assert_eq!(row.breakdown(), breakdown);
        assert!(row.score_breakdown.contains("\"MissionPts\":16"));
    }

    #[test]
    fn breakdown_sums_saturate_instead_of_overflowing() {
        let breakdown = ScoreBreakdown {
            mission_hits: u32::MAX,
            program_hits: 1,
            tech_hits: 1,
            mission_pts: u32::MAX,
            program_pts: 24,
            tech_pts: 16,
        };
        assert_eq!(breakdown.fit(), u32::MAX);
        assert_eq!(breakdown.total(), ScoreBreakdown::MAX_TOTAL);
        assert_eq!(breakdown.total_hits(), u32::MAX);
    }

    #[test]
    fn eligibility_is_clipped_on_char_boundaries() {
        let mut opp = EnrichedOpportunity::unenriched(OpportunityHit {
            title: "t".into(),
            agency: String::new(),
            close_date: String::new(),
            number: String::new(),
            url: None,
        });
        opp.eligibility = "é".repeat(300);
        let row = ExportRow::derive(&opp, &ScoreBreakdown::default(), today());
        assert_eq!(row.eligibility.chars().count(), ELIGIBILITY_EXPORT_CHARS);
    }

    #[test]
    fn taxonomy_normalization_lowercases_and_drops_blanks() {
        let taxonomy = KeywordTaxonomy {
            mission: vec!["  Youth ".into(), "".into()],
            programs: vec!["Mentoring".into()],
            technology: vec![],
        }
        .normalized();
        assert_eq!(taxonomy.mission, vec!["youth".to_string()]);
        assert_eq!(taxonomy.programs, vec!["mentoring".to_string()]);
        assert!(!taxonomy.is_empty());
    }
}
