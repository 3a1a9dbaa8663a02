//! Keyword-taxonomy relevance scoring.

use fof_core::{EnrichedOpportunity, KeywordTaxonomy, ScoreBreakdown, ScoreInput};

/// Points per keyword hit and the bucket's ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketWeight {
    pub per_hit: u32,
    pub cap: u32,
}

impl BucketWeight {
    pub const fn new(per_hit: u32, cap: u32) -> Self {
        Self { per_hit, cap }
    }

    pub fn points(&self, hits: u32) -> u32 {
        hits.saturating_mul(self.per_hit).min(self.cap)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringPolicy {
    pub mission: BucketWeight,
    pub programs: BucketWeight,
    pub technology: BucketWeight,
    /// Added to mission points after the mission cap; the total cap still applies.
    pub alignment_bonus: u32,
    pub alignment_phrases: Vec<String>,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            mission: BucketWeight::new(8, 40),
            programs: BucketWeight::new(6, 24),
            technology: BucketWeight::new(4, 16),
            alignment_bonus: 10,
            alignment_phrases: ["youth", "bipoc", "education", "workforce", "community"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl ScoringPolicy {
    pub fn breakdown(
        &self,
        mission_hits: u32,
        program_hits: u32,
        tech_hits: u32,
        aligned: bool,
    ) -> ScoreBreakdown {
        let bonus = if aligned { self.alignment_bonus } else { 0 };
        ScoreBreakdown {
            mission_hits,
            program_hits,
            tech_hits,
            mission_pts: self.mission.points(mission_hits).saturating_add(bonus),
            program_pts: self.programs.points(program_hits),
            tech_pts: self.technology.points(tech_hits),
        }
    }
}

/// Pure scorer: the same text always yields the same breakdown.
#[derive(Debug, Clone)]
pub struct Scorer {
    taxonomy: KeywordTaxonomy,
    policy: ScoringPolicy,
}

impl Scorer {
    pub fn new(taxonomy: KeywordTaxonomy, mut policy: ScoringPolicy) -> Self {
        policy.alignment_phrases = policy
            .alignment_phrases
            .into_iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self {
            taxonomy: taxonomy.normalized(),
            policy,
        }
    }

    pub fn taxonomy(&self) -> &KeywordTaxonomy {
        &self.taxonomy
    }

    /// Each configured keyword counts once if it occurs anywhere in the
    /// lowercased title/agency/synopsis/eligibility/category blob.
    pub fn score(&self, input: &ScoreInput<'_>) -> (u32, ScoreBreakdown) {
        let blob = input.blob();
        let aligned = self
            .policy
            .alignment_phrases
            .iter()
            .any(|phrase| blob.contains(phrase.as_str()));
        let breakdown = self.policy.breakdown(
            count_hits(&self.taxonomy.mission, &blob),
            count_hits(&self.taxonomy.programs, &blob),
            count_hits(&self.taxonomy.technology, &blob),
            aligned,
        );
        (breakdown.total(), breakdown)
    }

    pub fn score_opportunity(&self, opp: &EnrichedOpportunity) -> ScoreBreakdown {
        self.score(&opp.score_input()).1
    }
}

fn count_hits(keywords: &[String], blob: &str) -> u32 {
    keywords.iter().filter(|kw| blob.contains(kw.as_str())).count() as u32
}
