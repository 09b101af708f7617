//! GL coding: keyword classification into activity codes and account resolution.

pub mod resolver;
pub mod rules;

pub use resolver::{
    AccountCandidate, AccountCode, AccountMatchSet, CategorySelection, CodingFlags,
    CodingOutcome, CodingRequest, GlCodingResolver, ItemCoding, ResolvedCoding,
    CAPITAL_CLEARING_ACCOUNT,
};
pub use rules::{ActivityCode, ActivityRule, ActivityRuleTable, Classification};
