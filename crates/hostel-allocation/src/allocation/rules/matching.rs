use serde::Serialize;

use super::domain::{ApplicantProfile, EligibilityCriteria};

/// One eligibility dimension an applicant can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Year,
    Category,
    DomicileState,
    Program,
    SeniorityScore,
    KycStatus,
}

impl Criterion {
    pub const fn label(self) -> &'static str {
        match self {
            Criterion::Year => "year",
            Criterion::Category => "category",
            Criterion::DomicileState => "domicile state",
            Criterion::Program => "program",
            Criterion::SeniorityScore => "seniority score",
            Criterion::KycStatus => "kyc status",
        }
    }
}

fn listed(allowed: &[String], value: &str) -> bool {
    allowed.is_empty() || allowed.iter().any(|entry| entry.eq_ignore_ascii_case(value))
}

/// Every present criterion the profile fails. An empty result means the
/// profile matches: criteria combine with AND and absent ones are wildcards.
pub fn unmet_criteria(criteria: &EligibilityCriteria, profile: &ApplicantProfile) -> Vec<Criterion> {
    let mut unmet = Vec::new();

    if let Some(range) = criteria.year_range {
        if !range.contains(profile.year) {
            unmet.push(Criterion::Year);
        }
    }
    if !listed(&criteria.categories, &profile.category) {
        unmet.push(Criterion::Category);
    }
    if !listed(&criteria.domicile_states, &profile.domicile_state) {
        unmet.push(Criterion::DomicileState);
    }
    if !listed(&criteria.programs, &profile.program) {
        unmet.push(Criterion::Program);
    }
    if let Some(range) = criteria.seniority_score_range {
        // a missing score cannot satisfy an explicit range
        if !profile.seniority_score.is_some_and(|score| range.contains(score)) {
            unmet.push(Criterion::SeniorityScore);
        }
    }
    if !criteria.kyc_statuses.is_empty() && !criteria.kyc_statuses.contains(&profile.kyc_status) {
        unmet.push(Criterion::KycStatus);
    }

    unmet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::rules::{KycStatus, ScoreRange, StudentId, YearRange};

    fn profile(year: u8, category: &str) -> ApplicantProfile {
        ApplicantProfile {
            student_id: StudentId("stu-1".to_string()),
            year,
            category: category.to_string(),
            domicile_state: "Kerala".to_string(),
            program: "BTech".to_string(),
            seniority_score: Some(72.5),
            kyc_status: KycStatus::Verified,
            gender: None,
        }
    }

    fn year_and_categories(categories: &[&str]) -> EligibilityCriteria {
        EligibilityCriteria {
            year_range: Some(YearRange { min: 1, max: 3 }),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            ..EligibilityCriteria::default()
        }
    }

    #[test]
    fn second_year_obc_matches_general_and_obc_rule() {
        let criteria = year_and_categories(&["GEN", "OBC"]);
        assert!(unmet_criteria(&criteria, &profile(2, "OBC")).is_empty());
    }

    #[test]
    fn second_year_obc_fails_sc_st_rule() {
        let criteria = year_and_categories(&["SC", "ST"]);
        assert_eq!(
            unmet_criteria(&criteria, &profile(2, "OBC")),
            vec![Criterion::Category]
        );
    }

    #[test]
    fn empty_criteria_admit_everyone() {
        assert!(unmet_criteria(&EligibilityCriteria::default(), &profile(5, "ANY")).is_empty());
    }

    #[test]
    fn every_present_criterion_must_hold() {
        let criteria = EligibilityCriteria {
            year_range: Some(YearRange { min: 3, max: 4 }),
            seniority_score_range: Some(ScoreRange {
                min: 80.0,
                max: 100.0,
            }),
            kyc_statuses: vec![KycStatus::Verified],
            ..EligibilityCriteria::default()
        };
        assert_eq!(
            unmet_criteria(&criteria, &profile(2, "GEN")),
            vec![Criterion::Year, Criterion::SeniorityScore]
        );

        let mut unscored = profile(3, "GEN");
        unscored.seniority_score = None;
        assert_eq!(
            unmet_criteria(&criteria, &unscored),
            vec![Criterion::SeniorityScore]
        );
    }
}
