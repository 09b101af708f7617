use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::coding::rules::{ActivityCode, ActivityRuleTable};
use crate::domain::identity::DepartmentCode;
use crate::lookup::{AccountMatch, ExpenseCodeLookup, LookupError};

/// Clearing account every capital or work-order expense posts to.
pub const CAPITAL_CLEARING_ACCOUNT: &str = "107200";

/// A GL account code that came back from the expense-code lookup.
///
/// There is no public constructor: the only way to obtain one is through
/// [`GlCodingResolver::resolve`] or by selecting from an [`AccountMatchSet`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct AccountCode(String);

impl AccountCode {
    fn from_lookup(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<AccountCode> for String {
    fn from(value: AccountCode) -> Self {
        value.0
    }
}

impl fmt::Display for AccountCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capital and work-order markers picked up from the item text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CodingFlags {
    pub is_capital: bool,
    pub work_order: Option<String>,
}

impl CodingFlags {
    pub fn new(is_capital: bool, work_order: Option<String>) -> Self {
        let work_order = work_order.map(|id| id.trim().to_string()).filter(|id| !id.is_empty());
        Self { is_capital, work_order }
    }

    /// Recognizes `capital`, `work order <id>`, `wo <id>` and `wo#<id>`.
    pub fn detect(text: &str) -> Self {
        let lowered = text.to_ascii_lowercase();
        let tokens = lowered
            .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
            .filter(|token| !token.is_empty())
            .collect::<Vec<_>>();

        let is_capital = lowered.contains("capital");
        let mut work_order = None;
        for (position, token) in tokens.iter().enumerate() {
            let candidate = if let Some(rest) = token.strip_prefix("wo#") {
                if rest.is_empty() {
                    tokens.get(position + 1).copied()
                } else {
                    Some(rest)
                }
            } else if *token == "wo" {
                tokens.get(position + 1).copied()
            } else if *token == "work" && tokens.get(position + 1) == Some(&"order") {
                tokens.get(position + 2).copied()
            } else {
                None
            };

            if let Some(id) = candidate.map(|id| id.trim_start_matches('#')).filter(|id| {
                !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            }) {
                work_order = Some(id.to_ascii_uppercase());
                break;
            }
        }

        Self { is_capital, work_order }
    }

    pub fn merge(&mut self, other: CodingFlags) {
        self.is_capital |= other.is_capital;
        if self.work_order.is_none() {
            self.work_order = other.work_order;
        }
    }

    pub fn requires_override(&self) -> bool {
        self.is_capital || self.work_order.is_some()
    }

    fn gl_override(&self) -> Option<String> {
        self.requires_override().then(|| CAPITAL_CLEARING_ACCOUNT.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CategorySelection {
    /// Free text run through the keyword rule table.
    Inferred(String),
    /// A code the user picked directly; keyword inference is skipped.
    Explicit(ActivityCode),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CodingRequest {
    pub department: DepartmentCode,
    pub category: CategorySelection,
    pub flags: CodingFlags,
}

impl CodingRequest {
    pub fn inferred(
        department: DepartmentCode,
        category: impl Into<String>,
        flags: CodingFlags,
    ) -> Self {
        Self { department, category: CategorySelection::Inferred(category.into()), flags }
    }

    pub fn explicit(department: DepartmentCode, activity: ActivityCode, flags: CodingFlags) -> Self {
        Self { department, category: CategorySelection::Explicit(activity), flags }
    }
}

/// Fully resolved coding for one line item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedCoding {
    department_code: DepartmentCode,
    activity_code: ActivityCode,
    account_code: AccountCode,
    gl_account_override: Option<String>,
}

impl ResolvedCoding {
    pub fn department(&self) -> &DepartmentCode {
        &self.department_code
    }

    pub fn activity(&self) -> ActivityCode {
        self.activity_code
    }

    pub fn account(&self) -> &AccountCode {
        &self.account_code
    }

    pub fn gl_override(&self) -> Option<&str> {
        self.gl_account_override.as_deref()
    }
}

#[cfg(test)]
impl ResolvedCoding {
    pub(crate) fn for_tests(
        department: DepartmentCode,
        activity: ActivityCode,
        account: &str,
        flags: &CodingFlags,
    ) -> Self {
        Self {
            department_code: department,
            activity_code: activity,
            account_code: AccountCode(account.to_string()),
            gl_account_override: flags.gl_override(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCandidate {
    account_code: AccountCode,
    description: String,
}

impl AccountCandidate {
    pub fn account(&self) -> &AccountCode {
        &self.account_code
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Several accounts matched one (department, activity) pair. The user has to pick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMatchSet {
    department_code: DepartmentCode,
    activity_code: ActivityCode,
    gl_account_override: Option<String>,
    candidates: Vec<AccountCandidate>,
}

impl AccountMatchSet {
    pub fn department(&self) -> &DepartmentCode {
        &self.department_code
    }

    pub fn activity(&self) -> ActivityCode {
        self.activity_code
    }

    pub fn candidates(&self) -> &[AccountCandidate] {
        &self.candidates
    }

    pub fn select_index(&self, index: usize) -> Option<ResolvedCoding> {
        self.candidates.get(index).map(|candidate| self.resolve_with(candidate))
    }

    /// Only codes already present in the candidate list are accepted.
    pub fn select_account(&self, raw: &str) -> Option<ResolvedCoding> {
        let wanted = raw.trim();
        self.candidates
            .iter()
            .find(|candidate| candidate.account_code.as_str() == wanted)
            .map(|candidate| self.resolve_with(candidate))
    }

    /// Accepts a letter (`A`, `b`), a 1-based number, or a literal candidate code.
    pub fn select(&self, reply: &str) -> Option<ResolvedCoding> {
        let trimmed = reply.trim().trim_end_matches(['.', ')']);
        let mut chars = trimmed.chars();
        if let (Some(letter), None) = (chars.next(), chars.next()) {
            if letter.is_ascii_alphabetic() {
                let index = (letter.to_ascii_uppercase() as u8 - b'A') as usize;
                return self.select_index(index);
            }
        }
        if let Some(resolved) = self.select_account(trimmed) {
            return Some(resolved);
        }
        match trimmed.parse::<usize>() {
            Ok(position) if position >= 1 => self.select_index(position - 1),
            _ => None,
        }
    }

    pub fn choice_lines(&self) -> Vec<String> {
        self.candidates
            .iter()
            .zip('A'..='Z')
            .map(|(candidate, letter)| {
                if candidate.description.is_empty() {
                    format!("{letter}) {}", candidate.account_code)
                } else {
                    format!("{letter}) {} {}", candidate.account_code, candidate.description)
                }
            })
            .collect()
    }

    fn resolve_with(&self, candidate: &AccountCandidate) -> ResolvedCoding {
        ResolvedCoding {
            department_code: self.department_code.clone(),
            activity_code: self.activity_code,
            account_code: candidate.account_code.clone(),
            gl_account_override: self.gl_account_override.clone(),
        }
    }
}

/// Coding attached to a cart item: either a resolved account or an acknowledged
/// hand-off to finance with no account at all.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemCoding {
    Resolved(ResolvedCoding),
    #[serde(rename_all = "camelCase")]
    FinanceReview {
        department_code: DepartmentCode,
        activity_code: ActivityCode,
        gl_account_override: Option<String>,
    },
}

impl ItemCoding {
    pub fn finance_review(
        department: DepartmentCode,
        activity: ActivityCode,
        flags: &CodingFlags,
    ) -> Self {
        Self::FinanceReview {
            department_code: department,
            activity_code: activity,
            gl_account_override: flags.gl_override(),
        }
    }

    pub fn department(&self) -> &DepartmentCode {
        match self {
            Self::Resolved(coding) => coding.department(),
            Self::FinanceReview { department_code, .. } => department_code,
        }
    }

    pub fn activity(&self) -> ActivityCode {
        match self {
            Self::Resolved(coding) => coding.activity(),
            Self::FinanceReview { activity_code, .. } => *activity_code,
        }
    }

    pub fn account(&self) -> Option<&AccountCode> {
        match self {
            Self::Resolved(coding) => Some(coding.account()),
            Self::FinanceReview { .. } => None,
        }
    }

    pub fn gl_override(&self) -> Option<&str> {
        match self {
            Self::Resolved(coding) => coding.gl_override(),
            Self::FinanceReview { gl_account_override, .. } => gl_account_override.as_deref(),
        }
    }

    pub fn needs_finance_review(&self) -> bool {
        matches!(self, Self::FinanceReview { .. })
    }
}

impl From<ResolvedCoding> for ItemCoding {
    fn from(value: ResolvedCoding) -> Self {
        Self::Resolved(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CodingOutcome {
    Resolved(ResolvedCoding),
    Ambiguous(AccountMatchSet),
    #[serde(rename_all = "camelCase")]
    NoAccountMatch { department_code: DepartmentCode, activity_code: ActivityCode },
}

/// Department + category → activity → account.
///
/// Each call performs exactly one lookup; results are never cached between calls and
/// failures are returned to the caller untouched.
pub struct GlCodingResolver<L> {
    lookup: L,
    rules: ActivityRuleTable,
}

impl<L> GlCodingResolver<L>
where
    L: ExpenseCodeLookup,
{
    pub fn new(lookup: L) -> Self {
        Self::with_rules(lookup, ActivityRuleTable::standard())
    }

    pub fn with_rules(lookup: L, rules: ActivityRuleTable) -> Self {
        Self { lookup, rules }
    }

    pub fn rules(&self) -> &ActivityRuleTable {
        &self.rules
    }

    pub fn activity_for(&self, category: &CategorySelection) -> ActivityCode {
        match category {
            CategorySelection::Explicit(activity) => *activity,
            CategorySelection::Inferred(text) => self.rules.classify(text),
        }
    }

    pub async fn resolve(&self, request: &CodingRequest) -> Result<CodingOutcome, LookupError> {
        let activity = self.activity_for(&request.category);
        debug!(
            event_name = "coding.activity_selected",
            department_code = %request.department,
            activity_code = %activity,
            "activity code selected"
        );

        let matches = self.lookup.lookup_accounts(&request.department, activity).await?;
        let candidates = dedupe(matches);
        let gl_account_override = request.flags.gl_override();

        let set = AccountMatchSet {
            department_code: request.department.clone(),
            activity_code: activity,
            gl_account_override,
            candidates,
        };
        let outcome = match set.candidates.len() {
            0 => CodingOutcome::NoAccountMatch {
                department_code: request.department.clone(),
                activity_code: activity,
            },
            1 => match set.select_index(0) {
                Some(resolved) => CodingOutcome::Resolved(resolved),
                None => CodingOutcome::Ambiguous(set),
            },
            _ => CodingOutcome::Ambiguous(set),
        };

        info!(
            event_name = "coding.lookup_completed",
            department_code = %request.department,
            activity_code = %activity,
            outcome = outcome_label(&outcome),
            "expense code lookup completed"
        );
        Ok(outcome)
    }
}

fn outcome_label(outcome: &CodingOutcome) -> &'static str {
    match outcome {
        CodingOutcome::Resolved(_) => "resolved",
        CodingOutcome::Ambiguous(_) => "ambiguous",
        CodingOutcome::NoAccountMatch { .. } => "no_account_match",
    }
}

fn dedupe(matches: Vec<AccountMatch>) -> Vec<AccountCandidate> {
    let mut candidates: Vec<AccountCandidate> = Vec::with_capacity(matches.len());
    for entry in matches {
        let Some(account_code) = AccountCode::from_lookup(&entry.account_code) else {
            continue;
        };
        if candidates.iter().any(|existing| existing.account_code == account_code) {
            continue;
        }
        candidates.push(AccountCandidate {
            account_code,
            description: entry.description.trim().to_string(),
        });
    }
    candidates
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::{
        CodingFlags, CodingOutcome, CodingRequest, GlCodingResolver, ItemCoding,
        CAPITAL_CLEARING_ACCOUNT,
    };
    use crate::coding::rules::ActivityCode;
    use crate::domain::identity::DepartmentCode;
    use crate::lookup::{AccountMatch, Capability, ExpenseCodeLookup, LookupError};

    #[derive(Default)]
    struct TableLookup {
        rows: HashMap<(String, u16), Vec<(&'static str, &'static str)>>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl TableLookup {
        fn with(
            mut self,
            department: &str,
            activity: u16,
            rows: Vec<(&'static str, &'static str)>,
        ) -> Self {
            self.rows.insert((department.to_string(), activity), rows);
            self
        }
    }

    #[async_trait]
    impl ExpenseCodeLookup for TableLookup {
        async fn lookup_accounts(
            &self,
            department: &DepartmentCode,
            activity: ActivityCode,
        ) -> Result<Vec<AccountMatch>, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LookupError::Unavailable {
                    capability: Capability::ExpenseCodes,
                    message: "connection refused".to_string(),
                });
            }
            Ok(self
                .rows
                .get(&(department.to_string(), activity.value()))
                .map(|rows| {
                    rows.iter()
                        .map(|(code, description)| AccountMatch {
                            account_code: code.to_string(),
                            description: description.to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    fn dept(code: &str) -> DepartmentCode {
        DepartmentCode::parse(code).expect("department code")
    }

    #[tokio::test]
    async fn single_candidate_is_selected_without_prompting() {
        let lookup = TableLookup::default().with("620", 710, vec![("620710", "IT meals")]);
        let resolver = GlCodingResolver::new(lookup);

        let request = CodingRequest::inferred(dept("620"), "team meal", CodingFlags::default());
        let first = resolver.resolve(&request).await.expect("lookup");
        let second = resolver.resolve(&request).await.expect("lookup");

        assert_eq!(first, second);
        let CodingOutcome::Resolved(coding) = first else {
            panic!("expected a resolved coding, got {first:?}");
        };
        assert_eq!(coding.account().as_str(), "620710");
        assert_eq!(coding.activity(), ActivityCode::MEALS);
        assert!(coding.gl_override().is_none());
    }

    #[tokio::test]
    async fn ambiguous_pairs_surface_every_candidate_and_never_auto_select() {
        let lookup = TableLookup::default().with(
            "110",
            770,
            vec![("110770", "Training - Board"), ("110771", "Training - Staff")],
        );
        let resolver = GlCodingResolver::new(lookup);

        let outcome = resolver
            .resolve(&CodingRequest::inferred(dept("110"), "conference", CodingFlags::default()))
            .await
            .expect("lookup");

        let CodingOutcome::Ambiguous(set) = outcome else {
            panic!("expected ambiguity");
        };
        let codes = set.candidates().iter().map(|c| c.account().as_str()).collect::<Vec<_>>();
        assert_eq!(codes, vec!["110770", "110771"]);
        assert_eq!(set.choice_lines()[1], "B) 110771 Training - Staff");

        assert_eq!(set.select("b").map(|c| c.account().to_string()), Some("110771".into()));
        assert_eq!(set.select("110770").map(|c| c.account().to_string()), Some("110770".into()));
        assert_eq!(set.select("2").map(|c| c.account().to_string()), Some("110771".into()));
        assert!(set.select("999999").is_none());
        assert!(set.select("C").is_none());
    }

    #[tokio::test]
    async fn zero_candidates_is_a_no_account_match() {
        let resolver = GlCodingResolver::new(TableLookup::default());
        let outcome = resolver
            .resolve(&CodingRequest::inferred(dept("300"), "wellness", CodingFlags::default()))
            .await
            .expect("lookup");

        assert_eq!(
            outcome,
            CodingOutcome::NoAccountMatch {
                department_code: dept("300"),
                activity_code: ActivityCode::WELLNESS
            }
        );
    }

    #[tokio::test]
    async fn capital_items_keep_the_looked_up_account_and_add_the_override() {
        let lookup = TableLookup::default().with("300", 700, vec![("300700", "Travel")]);
        let resolver = GlCodingResolver::new(lookup);

        let flags = CodingFlags::detect("truck parts capital WO#4471");
        assert!(flags.is_capital);
        assert_eq!(flags.work_order.as_deref(), Some("4471"));

        let outcome = resolver
            .resolve(&CodingRequest::inferred(dept("300"), "parking", flags))
            .await
            .expect("lookup");
        let CodingOutcome::Resolved(coding) = outcome else {
            panic!("expected resolved coding");
        };
        assert_eq!(coding.account().as_str(), "300700");
        assert_eq!(coding.gl_override(), Some(CAPITAL_CLEARING_ACCOUNT));
    }

    #[tokio::test]
    async fn explicit_selection_skips_keyword_inference() {
        let lookup = TableLookup::default().with("300", 740, vec![("300740", "Supplies")]);
        let resolver = GlCodingResolver::new(lookup);

        let outcome = resolver
            .resolve(&CodingRequest::explicit(
                dept("300"),
                ActivityCode::from_selection("740").expect("code"),
                CodingFlags::default(),
            ))
            .await
            .expect("lookup");
        assert!(matches!(outcome, CodingOutcome::Resolved(ref c) if c.account().as_str() == "300740"));
    }

    #[tokio::test]
    async fn duplicate_and_blank_codes_are_dropped() {
        let lookup = TableLookup::default().with(
            "300",
            700,
            vec![("300700", "Travel"), ("", "blank"), ("300700", "Travel again")],
        );
        let resolver = GlCodingResolver::new(lookup);
        let outcome = resolver
            .resolve(&CodingRequest::inferred(dept("300"), "taxi", CodingFlags::default()))
            .await
            .expect("lookup");
        assert!(matches!(outcome, CodingOutcome::Resolved(_)));
    }

    #[tokio::test]
    async fn lookup_failures_are_returned_without_retrying() {
        let lookup = TableLookup { fail: true, ..TableLookup::default() };
        let resolver = GlCodingResolver::new(lookup);
        let error = resolver
            .resolve(&CodingRequest::inferred(dept("300"), "taxi", CodingFlags::default()))
            .await
            .expect_err("lookup should fail");

        assert!(error.is_transient());
        assert_eq!(resolver.lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn work_order_markers_are_detected() {
        assert_eq!(
            CodingFlags::detect("work order 88-12 hotel").work_order.as_deref(),
            Some("88-12")
        );
        assert_eq!(CodingFlags::detect("WO 5521").work_order.as_deref(), Some("5521"));
        assert_eq!(CodingFlags::detect("wo# 77").work_order.as_deref(), Some("77"));
        assert!(CodingFlags::detect("worked overtime").work_order.is_none());
        assert!(!CodingFlags::detect("lodging").requires_override());
    }

    #[test]
    fn finance_review_carries_no_account() {
        let coding = ItemCoding::finance_review(
            dept("620"),
            ActivityCode::BUSINESS_TRAVEL,
            &CodingFlags::new(true, None),
        );
        assert!(coding.needs_finance_review());
        assert!(coding.account().is_none());
        assert_eq!(coding.gl_override(), Some(CAPITAL_CLEARING_ACCOUNT));
    }
}
