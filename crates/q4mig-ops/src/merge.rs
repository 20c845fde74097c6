//! Attach curated committee roles to scraped persons by reconciling their names.

use std::collections::HashSet;

use q4mig_core::{
    name_tokens, normalize_name, AnalystCommitteeLlm, CommitteeAssignment, ContentKind,
    MatchKind, MergedDepartment, MergedPerson, NameMatch, PersonsMergedSnapshot, PersonsSnapshot,
    SiteEntry,
};
use strsim::normalized_levenshtein;
use tracing::{debug, info};

use crate::{mark_captured, site_key, MatchConfig, OpContext, Operation, OperationError, OperationReport};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matched {
    pub candidate: usize,
    pub kind: MatchKind,
    pub confidence: f64,
}

/// Pair every name in `people` with at most one name in `candidates`.
///
/// Passes run globally in order: exact, normalized, fuzzy at the strict threshold, fuzzy at
/// the loose threshold, then ordered tokens. A pair matched by one pass is removed from both
/// pools before the next pass. Fuzzy passes only compare names with the same token count.
pub fn match_names(people: &[String], candidates: &[String], config: &MatchConfig) -> Vec<Option<Matched>> {
    let people_norm = people.iter().map(|p| name_tokens(p)).collect::<Vec<_>>();
    let cand_norm = candidates.iter().map(|c| name_tokens(c)).collect::<Vec<_>>();
    let mut matched: Vec<Option<Matched>> = vec![None; people.len()];
    let mut taken = vec![false; candidates.len()];

    let mut pass = |kind: MatchKind, score: &dyn Fn(usize, usize) -> Option<f64>| {
        for person in 0..people.len() {
            if matched[person].is_some() {
                continue;
            }
            let mut best: Option<(usize, f64)> = None;
            for candidate in (0..candidates.len()).filter(|c| !taken[*c]) {
                if let Some(s) = score(person, candidate) {
                    if best.map_or(true, |(_, b)| s > b) {
                        best = Some((candidate, s));
                    }
                }
            }
            if let Some((candidate, confidence)) = best {
                taken[candidate] = true;
                matched[person] = Some(Matched {
                    candidate,
                    kind,
                    confidence,
                });
            }
        }
    };

    pass(MatchKind::Exact, &|p: usize, c: usize| {
        (people[p].trim() == candidates[c].trim() && !people[p].trim().is_empty()).then_some(1.0)
    });
    pass(MatchKind::Normalized, &|p: usize, c: usize| {
        (!people_norm[p].is_empty() && people_norm[p] == cand_norm[c])
            .then_some(config.normalized_confidence)
    });
    for threshold in [config.strict_fuzzy, config.loose_fuzzy] {
        pass(MatchKind::Fuzzy, &|p: usize, c: usize| {
            if people_norm[p].len() != cand_norm[c].len() || people_norm[p].is_empty() {
                return None;
            }
            let s = normalized_levenshtein(&people_norm[p].join(" "), &cand_norm[c].join(" "));
            (s >= threshold).then_some(s)
        });
    }
    pass(MatchKind::OrderedTokens, &|p: usize, c: usize| {
        let common = ordered_common_tokens(&people_norm[p], &cand_norm[c]);
        (common >= config.ordered_token_min).then_some(common as f64)
    });

    // Ordered-token scores rank candidates by common tokens; report the fixed confidence.
    for m in matched.iter_mut().flatten() {
        if m.kind == MatchKind::OrderedTokens {
            m.confidence = config.ordered_token_confidence;
        }
    }
    matched
}

/// Length of the longest common subsequence of two token lists.
fn ordered_common_tokens(a: &[String], b: &[String]) -> usize {
    let mut row = vec![0usize; b.len() + 1];
    for token in a {
        let mut diagonal = 0;
        for (j, other) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if token == other {
                diagonal + 1
            } else {
                above.max(row[j])
            };
            diagonal = above;
        }
    }
    row[b.len()]
}

/// Curated members with all their assignments, in first-seen order.
fn curated_members(llm: &AnalystCommitteeLlm) -> Vec<(String, Vec<CommitteeAssignment>)> {
    let mut members: Vec<(String, Vec<CommitteeAssignment>)> = Vec::new();
    for committee in &llm.committees {
        for member in &committee.members {
            let assignment = CommitteeAssignment {
                committee: committee.name.clone(),
                role: member.role,
            };
            match members.iter_mut().find(|(name, _)| normalize_name(name) == normalize_name(&member.name)) {
                Some((_, assignments)) => assignments.push(assignment),
                None => members.push((member.name.clone(), vec![assignment])),
            }
        }
    }
    members
}

pub fn merge_person_data(
    persons: &PersonsSnapshot,
    llm: &AnalystCommitteeLlm,
    config: &MatchConfig,
) -> PersonsMergedSnapshot {
    let members = curated_members(llm);
    let candidates = members.iter().map(|(name, _)| name.clone()).collect::<Vec<_>>();
    let people = persons
        .departments
        .iter()
        .flat_map(|d| d.persons.iter().map(|p| p.full_name()))
        .collect::<Vec<_>>();
    let mut matches = match_names(&people, &candidates, config).into_iter();

    let departments = persons
        .departments
        .iter()
        .map(|department| MergedDepartment {
            name: department.name.clone(),
            persons: department
                .persons
                .iter()
                .map(|person| {
                    let found = matches.next().flatten();
                    MergedPerson {
                        person: person.clone(),
                        committees: found
                            .map(|m| members[m.candidate].1.clone())
                            .unwrap_or_default(),
                        name_match: found.map(|m| NameMatch {
                            llm_name: members[m.candidate].0.clone(),
                            kind: m.kind,
                            confidence: m.confidence,
                        }),
                    }
                })
                .collect(),
        })
        .collect::<Vec<_>>();

    let used = departments
        .iter()
        .flat_map(|d| d.persons.iter())
        .filter_map(|p| p.name_match.as_ref().map(|m| m.llm_name.clone()))
        .collect::<HashSet<_>>();
    PersonsMergedSnapshot {
        departments,
        unmatched_llm_names: candidates.into_iter().filter(|c| !used.contains(c)).collect(),
    }
}

pub async fn run(ctx: &OpContext, site: &SiteEntry) -> Result<OperationReport, OperationError> {
    let key = site_key(site);
    let persons = ctx.snapshots.read::<PersonsSnapshot>(key).await?;
    let llm = ctx.snapshots.read::<AnalystCommitteeLlm>(key).await?;
    mark_captured(ctx, site, ContentKind::AnalystCommitteeLlm).await?;

    let merged = merge_person_data(&persons.payload, &llm.payload, &ctx.matching);
    let mut report = OperationReport::new(Operation::MergePersonData, site);
    for person in merged.departments.iter().flat_map(|d| d.persons.iter()) {
        match &person.name_match {
            Some(m) => {
                report.created += 1;
                debug!(person = %person.person.full_name(), llm = %m.llm_name, kind = ?m.kind, "matched");
            }
            None => report.skipped += 1,
        }
    }
    for name in &merged.unmatched_llm_names {
        report.note(format!("no scraped person matches {name}"));
    }

    ctx.snapshots.write(key, merged).await?;
    mark_captured(ctx, site, ContentKind::PersonsMerged).await?;
    info!(matched = report.created, unmatched = report.skipped, "persons merged");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use q4mig_core::{CommitteeRole, Department, LlmCommittee, LlmMember, Person};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn kinds(people: &[&str], candidates: &[&str]) -> Vec<Option<(usize, MatchKind)>> {
        match_names(&names(people), &names(candidates), &MatchConfig::default())
            .into_iter()
            .map(|m| m.map(|m| (m.candidate, m.kind)))
            .collect()
    }

    #[test]
    fn middle_initial_matches_by_ordered_tokens() {
        let result = match_names(
            &names(&["John A. Smith"]),
            &names(&["John Smith"]),
            &MatchConfig::default(),
        );
        let m = result[0].unwrap();
        assert_eq!(m.kind, MatchKind::OrderedTokens);
        assert_eq!(m.confidence, 0.9);
    }

    #[test]
    fn stricter_passes_win_over_earlier_candidates() {
        assert_eq!(
            kinds(&["John Smith"], &["Jon Smith", "John Smith"]),
            vec![Some((1, MatchKind::Exact))]
        );
        assert_eq!(
            kinds(&["Dr. Jane Doe"], &["Jane Dow", "jane doe"]),
            vec![Some((1, MatchKind::Normalized))]
        );
    }

    #[test]
    fn fuzzy_thresholds_apply_in_order() {
        let config = MatchConfig::default();
        let strict = match_names(&names(&["Jon Smith"]), &names(&["John Smith"]), &config)[0].unwrap();
        assert_eq!(strict.kind, MatchKind::Fuzzy);
        assert!(strict.confidence >= config.strict_fuzzy);

        let loose = match_names(&names(&["Jon Smyth"]), &names(&["John Smith"]), &config)[0].unwrap();
        assert_eq!(loose.kind, MatchKind::Fuzzy);
        assert!(loose.confidence >= config.loose_fuzzy && loose.confidence < config.strict_fuzzy);
    }

    #[test]
    fn a_matched_candidate_is_not_reused() {
        assert_eq!(
            kinds(&["John Smith", "Jon Smith"], &["John Smith"]),
            vec![Some((0, MatchKind::Exact)), None]
        );
        // An exact match later in the list still beats a fuzzy match earlier in the list.
        assert_eq!(
            kinds(&["Jon Smith", "John Smith"], &["John Smith"]),
            vec![None, Some((0, MatchKind::Exact))]
        );
    }

    #[test]
    fn unrelated_names_stay_unmatched() {
        assert_eq!(kinds(&["Maria Garcia"], &["Wei Chen"]), vec![None]);
        assert_eq!(ordered_common_tokens(&names(&["a", "b", "c"]), &names(&["c", "a", "c"])), 2);
    }

    #[test]
    fn merge_attaches_every_assignment_and_lists_leftovers() {
        let persons = PersonsSnapshot {
            departments: vec![Department {
                name: "Board of Directors".into(),
                persons: vec![
                    Person {
                        first_name: "John A.".into(),
                        last_name: "Smith".into(),
                        ..Person::default()
                    },
                    Person {
                        first_name: "Ann".into(),
                        last_name: "Lee".into(),
                        ..Person::default()
                    },
                ],
            }],
        };
        let llm = AnalystCommitteeLlm {
            committees: vec![
                LlmCommittee {
                    name: "Audit".into(),
                    description: String::new(),
                    members: vec![
                        LlmMember { name: "John Smith".into(), role: CommitteeRole::Chair },
                        LlmMember { name: "Paul Novak".into(), role: CommitteeRole::Member },
                    ],
                },
                LlmCommittee {
                    name: "Nominating".into(),
                    description: String::new(),
                    members: vec![LlmMember { name: "John Smith".into(), role: CommitteeRole::Member }],
                },
            ],
            analysts: vec![],
        };
        let merged = merge_person_data(&persons, &llm, &MatchConfig::default());
        let john = &merged.departments[0].persons[0];
        assert_eq!(john.committees.len(), 2);
        assert_eq!(john.committees[1].committee, "Nominating");
        assert_eq!(john.name_match.as_ref().unwrap().llm_name, "John Smith");
        assert!(merged.departments[0].persons[1].name_match.is_none());
        assert_eq!(merged.unmatched_llm_names, vec!["Paul Novak".to_string()]);
    }

    #[test]
    fn leftovers_keep_curated_order_on_a_large_roster() {
        let persons = PersonsSnapshot {
            departments: vec![Department {
                name: "Board of Directors".into(),
                persons: (0..200)
                    .step_by(2)
                    .map(|i| Person {
                        first_name: format!("Director{i}"),
                        last_name: "Holt".into(),
                        ..Person::default()
                    })
                    .collect(),
            }],
        };
        let llm = AnalystCommitteeLlm {
            committees: vec![LlmCommittee {
                name: "Audit".into(),
                description: String::new(),
                members: (0..200)
                    .map(|i| LlmMember {
                        name: format!("Director{i} Holt"),
                        role: CommitteeRole::Member,
                    })
                    .collect(),
            }],
            analysts: vec![],
        };
        let merged = merge_person_data(&persons, &llm, &MatchConfig::default());
        assert!(merged.departments[0]
            .persons
            .iter()
            .all(|p| p.name_match.as_ref().map(|m| m.kind) == Some(MatchKind::Exact)));
        let expected = (0..200)
            .skip(1)
            .step_by(2)
            .map(|i| format!("Director{i} Holt"))
            .collect::<Vec<_>>();
        assert_eq!(merged.unmatched_llm_names, expected);
    }
}
