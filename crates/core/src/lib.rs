pub mod amounts;
pub mod audit;
pub mod coding;
pub mod config;
pub mod dates;
pub mod domain;
pub mod errors;
pub mod lookup;

pub use coding::{
    AccountCode, AccountMatchSet, ActivityCode, ActivityRuleTable, CodingFlags, CodingOutcome,
    CodingRequest, GlCodingResolver, ItemCoding, ResolvedCoding,
};
pub use domain::cart::{Cart, CartSummary, SubmissionPayload, SubmissionSettings};
pub use domain::identity::{Department, DepartmentCode, Email, RequesterIdentity};
pub use domain::item::{DraftItem, ExpenseMode, ItemDetails, ItemId, ZipCode};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use lookup::{
    Capability, ExpenseCodeLookup, HealthProbe, LookupError, OrgChartLookup, PerDiemRateLookup,
    ReportSubmitter, RetryPolicy,
};
