//! Deterministic seed data for offline demos and tests.
//!
//! The expense-code table carries the three ambiguous department/activity pairs:
//! (110, 770), (620, 700) and (175, 710). Department 300 has no wellness account so the
//! no-match path can be exercised.

use rust_decimal::Decimal;

use crate::memory::InMemoryBackend;

pub const SIGNED_IN_EMAIL: &str = "pat.lee@example.coop";

const DEPARTMENTS: &[(&str, &str)] = &[
    ("110", "EXECUTIVE OFFICE"),
    ("175", "MEMBER SERVICES"),
    ("300", "OPERATIONS"),
    ("620", "INFORMATION TECHNOLOGY"),
];

const ACTIVITIES: &[u16] = &[700, 710, 730, 740, 770, 790];

const AMBIGUOUS: &[(&str, u16, &[(&str, &str)])] = &[
    ("110", 770, &[("110770", "Training - Directors"), ("110771", "Training - Staff")]),
    ("620", 700, &[("620700", "Travel - IT Projects"), ("620705", "Travel - IT Support")]),
    ("175", 710, &[("175710", "Meals - Member Events"), ("175715", "Meals - Staff")]),
];

const EMPTY: &[(&str, u16)] = &[("300", 790)];

const PER_DIEM_RATES: &[(&str, i64)] = &[("80128", 7900), ("80202", 9200), ("82001", 6800)];

fn activity_label(activity: u16) -> &'static str {
    match activity {
        700 => "Travel",
        710 => "Meals",
        730 => "Supplies",
        740 => "Dues & Subscriptions",
        770 => "Training",
        790 => "Wellness",
        _ => "Other",
    }
}

/// Builds a fresh backend populated with the fixture tables.
pub async fn seeded_backend() -> InMemoryBackend {
    let backend = InMemoryBackend::default();
    seed(&backend).await;
    backend
}

pub async fn seed(backend: &InMemoryBackend) {
    for (department, name) in DEPARTMENTS {
        for activity in ACTIVITIES {
            if EMPTY.contains(&(*department, *activity)) {
                continue;
            }
            if let Some((_, _, candidates)) =
                AMBIGUOUS.iter().find(|(dept, act, _)| dept == department && act == activity)
            {
                for (account, description) in candidates.iter() {
                    backend.expense_codes.insert(department, *activity, account, description).await;
                }
                continue;
            }
            let account = format!("{department}{activity}");
            let description = format!("{} - {}", activity_label(*activity), title_case(name));
            backend.expense_codes.insert(department, *activity, &account, &description).await;
        }
    }

    backend.org_chart.insert_exact(SIGNED_IN_EMAIL, "620", "INFORMATION TECHNOLOGY").await;
    backend.org_chart.insert_exact("jordan.kim@example.coop", "300", "OPERATIONS").await;
    backend
        .org_chart
        .insert(
            "sam.ortiz@example.coop",
            expensecart_core::lookup::OrgChartRecord {
                found: true,
                department_code: Some("175".to_string()),
                department_name: Some("MEMBER SERVICES".to_string()),
                match_type: Some("fuzzy".to_string()),
            },
        )
        .await;

    for (zip_code, cents) in PER_DIEM_RATES {
        backend.per_diem.insert(zip_code, Decimal::new(*cents, 2)).await;
    }
}

fn title_case(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let lower = word.to_ascii_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use expensecart_core::coding::{
        ActivityCode, CodingFlags, CodingOutcome, CodingRequest, GlCodingResolver,
    };
    use expensecart_core::domain::identity::DepartmentCode;
    use expensecart_core::domain::item::ZipCode;
    use expensecart_core::lookup::PerDiemRateLookup;

    use super::{seeded_backend, title_case};

    fn department(code: &str) -> DepartmentCode {
        DepartmentCode::parse(code).expect("department")
    }

    #[tokio::test]
    async fn ambiguous_pairs_surface_the_documented_candidates() {
        let backend = seeded_backend().await;
        let resolver = GlCodingResolver::new(backend.expense_codes.clone());

        let cases = [
            (
                CodingRequest::explicit(department("110"), ActivityCode::TRAINING, CodingFlags::default()),
                [("110770", "Training - Directors"), ("110771", "Training - Staff")],
            ),
            (
                CodingRequest::inferred(department("110"), "conference registration", CodingFlags::default()),
                [("110770", "Training - Directors"), ("110771", "Training - Staff")],
            ),
            (
                CodingRequest::explicit(department("620"), ActivityCode::BUSINESS_TRAVEL, CodingFlags::default()),
                [("620700", "Travel - IT Projects"), ("620705", "Travel - IT Support")],
            ),
            (
                CodingRequest::inferred(department("620"), "airfare", CodingFlags::default()),
                [("620700", "Travel - IT Projects"), ("620705", "Travel - IT Support")],
            ),
            (
                CodingRequest::explicit(department("175"), ActivityCode::MEALS, CodingFlags::default()),
                [("175710", "Meals - Member Events"), ("175715", "Meals - Staff")],
            ),
        ];
        for (request, expected) in cases {
            match resolver.resolve(&request).await.expect("lookup") {
                CodingOutcome::Ambiguous(set) => {
                    assert_eq!(set.department(), &request.department);
                    let expected_activity = resolver.activity_for(&request.category);
                    assert_eq!(set.activity(), expected_activity);
                    let candidates = set
                        .candidates()
                        .iter()
                        .map(|candidate| (candidate.account().to_string(), candidate.description()))
                        .collect::<Vec<_>>();
                    let expected = expected
                        .iter()
                        .map(|(code, description)| (code.to_string(), *description))
                        .collect::<Vec<_>>();
                    assert_eq!(candidates, expected, "{request:?}");
                    assert!(set.select_index(2).is_none());
                }
                other => panic!("expected ambiguity for {request:?}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn single_matches_resolve_without_prompting() {
        let backend = seeded_backend().await;
        let resolver = GlCodingResolver::new(backend.expense_codes.clone());

        for (dept, activity) in
            [("300", ActivityCode::MEALS), ("620", ActivityCode::WELLNESS), ("110", ActivityCode::BUSINESS_TRAVEL)]
        {
            let request = CodingRequest::explicit(department(dept), activity, CodingFlags::default());
            let first = resolver.resolve(&request).await.expect("lookup");
            let second = resolver.resolve(&request).await.expect("lookup");
            match (first, second) {
                (CodingOutcome::Resolved(a), CodingOutcome::Resolved(b)) => {
                    assert_eq!(a, b);
                    assert_eq!(a.account().as_str(), format!("{dept}{}", activity.value()));
                }
                other => panic!("expected a single match, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn operations_has_no_wellness_account() {
        let backend = seeded_backend().await;
        let resolver = GlCodingResolver::new(backend.expense_codes.clone());

        for request in [
            CodingRequest::explicit(department("300"), ActivityCode::WELLNESS, CodingFlags::default()),
            CodingRequest::inferred(department("300"), "wellness fair", CodingFlags::default()),
        ] {
            let outcome = resolver.resolve(&request).await.expect("lookup");
            assert_eq!(
                outcome,
                CodingOutcome::NoAccountMatch {
                    department_code: department("300"),
                    activity_code: ActivityCode::WELLNESS,
                },
                "{request:?}"
            );
        }
    }

    #[tokio::test]
    async fn per_diem_fixture_rates_are_loaded() {
        let backend = seeded_backend().await;
        let date = NaiveDate::from_ymd_opt(2026, 2, 17).expect("date");
        let rate = backend
            .per_diem
            .daily_rate(&ZipCode::parse("80128").expect("zip"), date)
            .await
            .expect("rate");
        assert_eq!(rate.daily_rate, Decimal::new(7900, 2));
    }

    #[test]
    fn title_case_normalizes_department_names() {
        assert_eq!(title_case("INFORMATION TECHNOLOGY"), "Information Technology");
    }
}
