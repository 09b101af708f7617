use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActivityCode(u16);

impl ActivityCode {
    pub const BUSINESS_TRAVEL: Self = Self(700);
    pub const MEALS: Self = Self(710);
    pub const TRAINING: Self = Self(770);
    pub const WELLNESS: Self = Self(790);

    /// Every code a user may pick explicitly. 730 and 740 are only reachable this way.
    pub const SELECTABLE: [u16; 6] = [700, 710, 730, 740, 770, 790];

    pub fn from_selection(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        trimmed
            .parse::<u16>()
            .ok()
            .filter(|code| Self::SELECTABLE.contains(code))
            .map(Self)
            .ok_or_else(|| DomainError::UnknownActivityCode(trimmed.to_string()))
    }

    pub fn value(self) -> u16 {
        self.0
    }
}

impl TryFrom<String> for ActivityCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_selection(&value)
    }
}

impl From<ActivityCode> for String {
    fn from(value: ActivityCode) -> Self {
        value.0.to_string()
    }
}

impl fmt::Display for ActivityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivityRule {
    pub activity: ActivityCode,
    pub keywords: Vec<String>,
}

impl ActivityRule {
    pub fn new<I, S>(activity: ActivityCode, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keywords =
            keywords.into_iter().map(|keyword| keyword.into().to_ascii_lowercase()).collect();
        Self { activity, keywords }
    }

    fn matching_keyword(&self, normalized_text: &str) -> Option<&str> {
        self.keywords
            .iter()
            .find(|keyword| normalized_text.contains(keyword.as_str()))
            .map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification<'a> {
    pub activity: ActivityCode,
    pub matched_keyword: Option<&'a str>,
}

/// Ordered keyword table. Rules are checked top to bottom and the first rule with a
/// keyword contained in the text wins; text matching nothing gets the fallback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivityRuleTable {
    rules: Vec<ActivityRule>,
    fallback: ActivityCode,
}

impl Default for ActivityRuleTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl ActivityRuleTable {
    pub fn new(rules: Vec<ActivityRule>, fallback: ActivityCode) -> Self {
        Self { rules, fallback }
    }

    pub fn standard() -> Self {
        Self::new(
            vec![
                ActivityRule::new(ActivityCode::MEALS, ["meal", "catering", "event food"]),
                ActivityRule::new(
                    ActivityCode::TRAINING,
                    ["conference", "training", "seminar", "certification"],
                ),
                ActivityRule::new(ActivityCode::WELLNESS, ["wellness"]),
            ],
            ActivityCode::BUSINESS_TRAVEL,
        )
    }

    pub fn with_rule(mut self, rule: ActivityRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[ActivityRule] {
        &self.rules
    }

    pub fn fallback(&self) -> ActivityCode {
        self.fallback
    }

    pub fn classify(&self, category: &str) -> ActivityCode {
        self.explain(category).activity
    }

    pub fn explain(&self, category: &str) -> Classification<'_> {
        let normalized = category.to_ascii_lowercase();
        self.rules
            .iter()
            .find_map(|rule| {
                rule.matching_keyword(&normalized).map(|keyword| Classification {
                    activity: rule.activity,
                    matched_keyword: Some(keyword),
                })
            })
            .unwrap_or(Classification { activity: self.fallback, matched_keyword: None })
    }
}
