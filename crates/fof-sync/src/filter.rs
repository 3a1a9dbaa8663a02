//! Deadline screening and relevance selection over scored rows.

use std::cmp::Ordering;

use chrono::NaiveDate;
use fof_core::{days_left, ExportRow};

pub const DEFAULT_MIN_DAYS_TO_DEADLINE: i64 = 10;

/// Drops opportunities whose known close date is fewer than `min_days` away.
/// An empty or unparseable close date always passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineFilter {
    pub min_days: i64,
}

impl Default for DeadlineFilter {
    fn default() -> Self {
        Self {
            min_days: DEFAULT_MIN_DAYS_TO_DEADLINE,
        }
    }
}

impl DeadlineFilter {
    pub fn new(min_days: i64) -> Self {
        Self { min_days }
    }

    pub fn passes(&self, close_date: &str, today: NaiveDate) -> bool {
        passes_deadline(close_date, today, self.min_days)
    }
}

pub fn passes_deadline(close_date: &str, today: NaiveDate, min_days: i64) -> bool {
    match days_left(close_date, today) {
        Some(days) => days >= min_days,
        None => true,
    }
}

/// Fixed cutoff + "at least one keyword hit" + eligibility denylist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdPolicy {
    pub score_threshold: u32,
    pub require_any_alignment: bool,
    pub excluded_eligibility: Vec<String>,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            score_threshold: 40,
            require_any_alignment: true,
            excluded_eligibility: vec!["for-profit only".into(), "small business only".into()],
        }
    }
}

impl ThresholdPolicy {
    pub fn is_relevant(&self, row: &ExportRow) -> bool {
        if row.score < self.score_threshold {
            return false;
        }
        if self.require_any_alignment && row.breakdown().total_hits() == 0 {
            return false;
        }
        let eligibility = row.eligibility.to_lowercase();
        !self
            .excluded_eligibility
            .iter()
            .any(|phrase| eligibility.contains(&phrase.to_lowercase()))
    }

    /// Relevant rows, Score descending.
    pub fn apply(&self, rows: &[ExportRow]) -> Vec<ExportRow> {
        let mut kept = rows
            .iter()
            .filter(|row| self.is_relevant(row))
            .cloned()
            .collect::<Vec<_>>();
        sort_by_score_desc(&mut kept);
        kept
    }
}

/// Keeps the top fraction of the score distribution, relaxing the quantile
/// when too few rows survive.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantilePolicy {
    pub q_target: f64,
    pub relax_quantiles: Vec<f64>,
    pub min_rows: usize,
    pub hard_floor: Option<u32>,
    /// Case-insensitive title terms pruned regardless of score.
    pub title_denylist: Vec<String>,
}

impl Default for QuantilePolicy {
    fn default() -> Self {
        Self {
            q_target: 0.90,
            relax_quantiles: vec![0.80, 0.70],
            min_rows: 40,
            hard_floor: Some(18),
            title_denylist: vec!["Biennale".into(), "2018".into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuantileSelection {
    pub rows: Vec<ExportRow>,
    /// Quantile whose cut produced `rows` before the floor and pruning.
    pub quantile: f64,
    pub threshold: Option<f64>,
}

impl QuantilePolicy {
    pub fn apply(&self, rows: &[ExportRow]) -> QuantileSelection {
        let mut scores = rows.iter().map(|r| f64::from(r.score)).collect::<Vec<_>>();
        scores.sort_by(f64::total_cmp);

        let cut = |q: f64| -> (Option<f64>, Vec<&ExportRow>) {
            let threshold = quantile(&scores, q);
            let kept = match threshold {
                Some(t) => rows.iter().filter(|r| f64::from(r.score) >= t).collect(),
                None => Vec::new(),
            };
            (threshold, kept)
        };

        let mut used = self.q_target;
        let (mut threshold, mut kept) = cut(used);

        // Each relaxation re-cuts the full distribution and replaces the kept
        // set; nothing accumulates across steps.
        for &q in &self.relax_quantiles {
            if kept.len() < self.min_rows {
                used = q;
                (threshold, kept) = cut(q);
            }
        }

        if let Some(floor) = self.hard_floor {
            kept.retain(|r| r.score >= floor);
        }

        let denylist = self
            .title_denylist
            .iter()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>();
        kept.retain(|r| {
            let title = r.title.to_lowercase();
            !denylist.iter().any(|w| title.contains(w.as_str()))
        });

        let mut out = kept.into_iter().cloned().collect::<Vec<_>>();
        out.sort_by(adaptive_order);
        QuantileSelection {
            rows: out,
            quantile: used,
            threshold,
        }
    }
}

/// Linear-interpolated quantile of ascending `sorted` values.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Score descending, then close date ascending (unknown dates last), then title.
fn adaptive_order(a: &ExportRow, b: &ExportRow) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| match (a.parsed_close_date(), b.parsed_close_date()) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.title.cmp(&b.title))
}

/// Stable sort, Score descending.
pub fn sort_by_score_desc(rows: &mut [ExportRow]) {
    rows.sort_by(|a, b| b.score.cmp(&a.score));
}

/// Flat top-K by Score; no quantile logic, so non-empty whenever `rows` is.
pub fn top_k(rows: &[ExportRow], k: usize) -> Vec<ExportRow> {
    let mut ranked = rows.to_vec();
    sort_by_score_desc(&mut ranked);
    ranked.truncate(k);
    ranked
}

/// Ranks by `2 * Score + Fit` (Fit = sum of bucket points), then Score.
pub fn fit_weighted(rows: &[ExportRow], k: usize) -> Vec<ExportRow> {
    let weight = |r: &ExportRow| r.score.saturating_mul(2).saturating_add(r.breakdown().fit());
    let mut ranked = rows.to_vec();
    ranked.sort_by(|a, b| weight(b).cmp(&weight(a)).then_with(|| b.score.cmp(&a.score)));
    ranked.truncate(k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use fof_core::NOT_SPECIFIED;
    use proptest::prelude::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn row(score: u32, title: &str, close_date: &str, hits: u32) -> ExportRow {
        ExportRow {
            score,
            title: title.to_string(),
            agency: "Agency".into(),
            close_date: close_date.to_string(),
            days_left: None,
            opp_number: format!("N-{title}"),
            category: NOT_SPECIFIED.into(),
            eligibility: NOT_SPECIFIED.into(),
            url: NOT_SPECIFIED.into(),
            mission_hits: hits,
            program_hits: 0,
            tech_hits: 0,
            mission_pts: score,
            program_pts: 0,
            tech_pts: 0,
            score_breakdown: "{}".into(),
        }
    }

    #[test]
    fn deadline_boundary_is_inclusive() {
        let filter = DeadlineFilter::new(10);
        assert!(filter.passes("03/11/2026", today()));
        assert!(!filter.passes("03/10/2026", today()));
        assert!(!filter.passes("2026-02-01", today()));
    }

    #[test]
    fn unknown_deadline_always_passes() {
        let filter = DeadlineFilter::new(10);
        assert!(filter.passes("", today()));
        assert!(filter.passes("TBD", today()));
        assert!(filter.passes("31.12.2026", today()));
    }

    #[test]
    fn threshold_excludes_low_scores_even_with_hits() {
        let policy = ThresholdPolicy::default();
        assert!(!policy.is_relevant(&row(39, "low", "", 4)));
        assert!(policy.is_relevant(&row(40, "edge", "", 1)));
    }

    #[test]
    fn threshold_requires_some_alignment_when_enabled() {
        let mut r = row(60, "bonus only", "", 0);
        r.mission_pts = 10;
        let policy = ThresholdPolicy::default();
        assert!(!policy.is_relevant(&r));

        let relaxed = ThresholdPolicy {
            require_any_alignment: false,
            ..ThresholdPolicy::default()
        };
        assert!(relaxed.is_relevant(&r));
    }

    #[test]
    fn threshold_drops_excluded_eligibility_case_insensitively() {
        let mut r = row(80, "for profits", "", 3);
        r.eligibility = "Eligible: Small Business ONLY".into();
        assert!(!ThresholdPolicy::default().is_relevant(&r));
    }

    #[test]
    fn threshold_sorts_descending() {
        let rows = vec![row(45, "b", "", 1), row(10, "c", "", 1), row(55, "a", "", 1)];
        let kept = ThresholdPolicy::default().apply(&rows);
        assert_eq!(kept.iter().map(|r| r.score).collect::<Vec<_>>(), vec![55, 45]);
    }

    #[test]
    fn quantile_interpolates_linearly() {
        let values = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(quantile(&values, 0.0), Some(10.0));
        assert_eq!(quantile(&values, 1.0), Some(40.0));
        let q = quantile(&values, 0.5).unwrap();
        assert!((q - 25.0).abs() < 1e-9);
        assert_eq!(quantile(&[], 0.9), None);
    }

    #[test]
    fn quantile_policy_relaxes_to_reach_min_rows() {
        let rows = (0..200).map(|i| row(i % 100, &format!("t{i}"), "", 1)).collect::<Vec<_>>();
        let selection = QuantilePolicy::default().apply(&rows);
        assert_eq!(selection.quantile, 0.80);
        assert_eq!(selection.rows.len(), 40);
        assert!(selection.rows.iter().all(|r| r.score >= 80));
    }

    #[test]
    fn quantile_policy_applies_floor_and_title_denylist() {
        let mut rows = (0..50).map(|i| row(i % 20, &format!("t{i}"), "", 1)).collect::<Vec<_>>();
        rows.push(row(19, "Venice BIENNALE pavilion", "", 1));
        rows.push(row(19, "FY2018 legacy program", "", 1));
        let selection = QuantilePolicy::default().apply(&rows);
        assert!(!selection.rows.is_empty());
        assert!(selection.rows.iter().all(|r| r.score >= 18));
        assert!(selection
            .rows
            .iter()
            .all(|r| !r.title.to_lowercase().contains("biennale") && !r.title.contains("2018")));
    }

    #[test]
    fn adaptive_sort_breaks_ties_by_date_then_title() {
        let rows = vec![
            row(50, "zeta", "", 1),
            row(50, "beta", "05/01/2026", 1),
            row(50, "alpha", "05/01/2026", 1),
            row(50, "gamma", "2026-04-01", 1),
            row(70, "top", "", 1),
        ];
        let policy = QuantilePolicy {
            q_target: 0.0,
            relax_quantiles: vec![],
            min_rows: 0,
            hard_floor: None,
            title_denylist: vec![],
        };
        let titles = policy
            .apply(&rows)
            .rows
            .into_iter()
            .map(|r| r.title)
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["top", "gamma", "alpha", "beta", "zeta"]);
    }

    #[test]
    fn top_k_and_fit_weighted_are_bounded() {
        let rows = (0..10).map(|i| row(i * 10, &format!("t{i}"), "", 1)).collect::<Vec<_>>();
        let top = top_k(&rows, 3);
        assert_eq!(top.iter().map(|r| r.score).collect::<Vec<_>>(), vec![90, 80, 70]);

        let mut boosted = row(60, "fit", "", 3);
        boosted.program_pts = 24;
        boosted.tech_pts = 16;
        let fit = fit_weighted(&[row(70, "plain", "", 1), boosted], 1);
        assert_eq!(fit[0].title, "fit");
    }

    #[test]
    fn fit_weighted_saturates_out_of_range_rows() {
        let mut huge = row(u32::MAX, "huge", "", 1);
        huge.mission_pts = u32::MAX;
        huge.program_pts = u32::MAX;
        let ranked = fit_weighted(&[row(90, "normal", "", 1), huge], 2);
        assert_eq!(ranked[0].title, "huge");
        assert_eq!(ranked[1].title, "normal");
    }

    proptest! {
        #[test]
        fn quantile_policy_meets_min_rows_and_floor(
            scores in prop::collection::vec(0u32..=100, 200)
        ) {
            let rows = scores
                .iter()
                .enumerate()
                .map(|(i, s)| row(*s, &format!("t{i}"), "", 1))
                .collect::<Vec<_>>();
            let policy = QuantilePolicy { min_rows: 40, ..QuantilePolicy::default() };
            let floor = policy.hard_floor.unwrap_or(0);

            let mut sorted = scores.iter().map(|s| f64::from(*s)).collect::<Vec<_>>();
            sorted.sort_by(f64::total_cmp);
            let q70 = quantile(&sorted, 0.70).unwrap();
            let cut70 = scores.iter().filter(|s| f64::from(**s) >= q70 && **s >= floor).count();

            let selection = policy.apply(&rows);
            prop_assert!(selection.rows.iter().all(|r| r.score >= floor));
            if cut70 >= 40 {
                prop_assert!(selection.rows.len() >= 40);
            }
        }
    }
}
