//! One conversation: sticky identity, the cart, and at most one item being filled.
//!
//! Every turn goes through [`ConversationSession::handle`]. Control utterances are
//! recognized first; anything else answers the pending question. After each change the
//! session advances as far as it can without user input (identity, pricing, coding) and
//! stops at the next single question.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use expensecart_core::amounts::{
    mileage_amount, parse_decimal, per_diem_total, DEFAULT_MILEAGE_RATE, MAX_DAILY_RATE,
};
use expensecart_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, TracingAuditSink};
use expensecart_core::coding::{
    AccountMatchSet, ActivityCode, ActivityRuleTable, CategorySelection, CodingFlags,
    CodingOutcome, CodingRequest, GlCodingResolver, ItemCoding,
};
use expensecart_core::config::{AppConfig, ConfigError};
use expensecart_core::dates::{Clock, SystemClock, DEFAULT_UTC_OFFSET_MINUTES};
use expensecart_core::domain::cart::{Cart, SubmissionSettings};
use expensecart_core::domain::identity::{DepartmentCode, Email, RequesterIdentity};
use expensecart_core::domain::item::{DraftItem, ExpenseMode, ItemDetails};
use expensecart_core::errors::{ApplicationError, DomainError};
use expensecart_core::lookup::{
    Capability, ExpenseCodeLookup, OrgChartLookup, PerDiemRateLookup, ReportSubmitter,
    RetryPolicy,
};

use crate::control::{self, ControlIntent};
use crate::identity::{DepartmentResolution, DepartmentSource, IdentityResolver};
use crate::slots::{CompletedSlots, SlotField, SlotFiller, SlotValues, StructuredSlots};

/// The external capabilities a session calls.
#[derive(Clone)]
pub struct Backends {
    pub expense_codes: Arc<dyn ExpenseCodeLookup>,
    pub org_chart: Arc<dyn OrgChartLookup>,
    pub per_diem: Arc<dyn PerDiemRateLookup>,
    pub submitter: Arc<dyn ReportSubmitter>,
}

impl Backends {
    /// One adapter serving every capability.
    pub fn shared<B>(backend: Arc<B>) -> Self
    where
        B: ExpenseCodeLookup + OrgChartLookup + PerDiemRateLookup + ReportSubmitter + 'static,
    {
        Self {
            expense_codes: backend.clone(),
            org_chart: backend.clone(),
            per_diem: backend.clone(),
            submitter: backend,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub submission: SubmissionSettings,
    pub mileage_rate: Decimal,
    pub currency: String,
    /// Offset used for "today" when no clock is injected.
    pub utc_offset_minutes: i32,
    pub signed_in_email: Option<Email>,
    pub department_overrides: BTreeMap<Email, DepartmentCode>,
    pub retry: RetryPolicy,
    pub rules: ActivityRuleTable,
}

impl SessionSettings {
    pub fn new(submission: SubmissionSettings) -> Self {
        Self {
            submission,
            mileage_rate: DEFAULT_MILEAGE_RATE,
            currency: "USD".to_string(),
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            signed_in_email: None,
            department_overrides: BTreeMap::new(),
            retry: RetryPolicy::single(),
            rules: ActivityRuleTable::standard(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            submission: config.submission_settings()?,
            mileage_rate: config.travel.mileage_rate,
            currency: config.travel.currency.clone(),
            utc_offset_minutes: config.travel.utc_offset_minutes,
            signed_in_email: config.signed_in_email(),
            department_overrides: config.department_overrides(),
            retry: RetryPolicy::new(config.backend.max_retries),
            rules: ActivityRuleTable::standard(),
        })
    }

    pub fn with_signed_in_email(mut self, email: Option<Email>) -> Self {
        self.signed_in_email = email;
        self
    }
}

/// Conditions a host may want to react to. Every one of them is recovered inside the
/// conversation; the reply text already carries the corrective question.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnIssue {
    Validation { message: String },
    AmbiguousMatch,
    NoAccountMatch,
    LookupUnavailable { capability: Capability },
    EmptyCartSubmission,
    SubmissionNotConfirmed { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub message: String,
    pub issue: Option<TurnIssue>,
    pub correlation_id: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "question", content = "field")]
pub enum PendingQuestion {
    #[default]
    None,
    Email,
    Department,
    Slot(SlotField),
    DailyRate,
    AccountChoice,
    NoAccountMatch,
    CodingUnavailable,
}

impl PendingQuestion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Email => "email",
            Self::Department => "department",
            Self::Slot(_) => "slot",
            Self::DailyRate => "daily_rate",
            Self::AccountChoice => "account_choice",
            Self::NoAccountMatch => "no_account_match",
            Self::CodingUnavailable => "coding_unavailable",
        }
    }
}

#[derive(Clone, Debug)]
struct PricedItem {
    slots: CompletedSlots,
    amount: Decimal,
    details: ItemDetails,
    flags: CodingFlags,
}

/// Why pricing stopped short of a priced item.
enum PricingStop {
    /// The rate lookup failed; the user supplies a daily rate.
    RateUnavailable { slots: CompletedSlots, reply: Reply },
    /// The computed total is unusable; the field behind it is asked again.
    Unusable { slots: CompletedSlots, error: DomainError },
}

#[derive(Clone, Debug)]
enum ItemStage {
    Filling,
    AwaitingRate { slots: CompletedSlots },
    Ready { priced: PricedItem, selection: CategorySelection },
    Choosing { priced: PricedItem, matches: AccountMatchSet },
    NoMatch { priced: PricedItem, activity: ActivityCode },
    CodingUnavailable { priced: PricedItem, selection: CategorySelection },
}

#[derive(Clone, Debug)]
struct ActiveItem {
    filler: SlotFiller,
    stage: ItemStage,
}

/// Per-conversation state. Created empty and cleared by `reset`.
#[derive(Clone, Debug, Default)]
pub struct ConversationContext {
    identity: RequesterIdentity,
    cart: Cart,
    active: Option<ActiveItem>,
    pending: PendingQuestion,
    manual_department: bool,
}

impl ConversationContext {
    pub fn identity(&self) -> &RequesterIdentity {
        &self.identity
    }

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn pending(&self) -> PendingQuestion {
        self.pending
    }

    pub fn active_mode(&self) -> Option<ExpenseMode> {
        self.active.as_ref().map(|active| active.filler.mode())
    }

    pub fn active_values(&self) -> Option<&SlotValues> {
        self.active.as_ref().map(|active| active.filler.values())
    }
}

pub struct ConversationSession {
    conversation_id: String,
    turn_id: String,
    context: ConversationContext,
    settings: SessionSettings,
    backends: Backends,
    resolver: GlCodingResolver<Arc<dyn ExpenseCodeLookup>>,
    identity_resolver: IdentityResolver,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

impl ConversationSession {
    pub fn new(backends: Backends, settings: SessionSettings) -> Self {
        let resolver =
            GlCodingResolver::with_rules(backends.expense_codes.clone(), settings.rules.clone());
        let identity_resolver = IdentityResolver::new(backends.org_chart.clone())
            .with_overrides(settings.department_overrides.clone())
            .with_retry(settings.retry);
        let clock = SystemClock::from_offset_minutes(settings.utc_offset_minutes);
        Self {
            conversation_id: Uuid::new_v4().to_string(),
            turn_id: String::new(),
            context: ConversationContext::default(),
            settings,
            backends,
            resolver,
            identity_resolver,
            clock: Arc::new(clock),
            audit: Arc::new(TracingAuditSink),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = conversation_id.into();
        self
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn greeting(&self) -> String {
        "Hi! I can build your travel expense report. Say \"add receipt\", \"add per diem\" or \
         \"add mileage\" to start, \"show cart\" to review, or \"submit\" when you're done."
            .to_string()
    }

    pub async fn handle(&mut self, text: &str) -> Reply {
        self.turn_id = Uuid::new_v4().to_string();
        let intent = control::recognize(text);
        info!(
            event_name = "conversation.turn",
            conversation_id = %self.conversation_id,
            correlation_id = %self.turn_id,
            intent = intent.as_ref().map(ControlIntent::action_key).unwrap_or("answer"),
            pending = self.context.pending.as_str(),
            "conversation turn"
        );

        match intent {
            Some(intent) => self.control(intent).await,
            None => self.answer(text.trim()).await,
        }
    }

    /// Typed values for the item in progress, validated like free text.
    pub async fn handle_structured(&mut self, input: StructuredSlots) -> Reply {
        self.turn_id = Uuid::new_v4().to_string();
        let Some(active) = self.context.active.as_mut() else {
            return self.validation("There's no item in progress. Start one with \"add receipt\", \"add per diem\" or \"add mileage\".");
        };
        active.stage = ItemStage::Filling;
        let outcome = active.filler.ingest_structured(input);
        if let Some(issue) = &outcome.issue {
            let prompt = active.filler.next_prompt(&outcome).unwrap_or_default();
            self.context.pending = PendingQuestion::Slot(issue.field());
            return self.reply(prompt, Some(TurnIssue::Validation { message: issue.to_string() }));
        }
        self.advance().await
    }

    async fn control(&mut self, intent: ControlIntent) -> Reply {
        match intent {
            ControlIntent::Reset => self.reset(),
            ControlIntent::ChangeUser => {
                self.context.identity.change_user();
                self.context.manual_department = false;
                self.context.pending = PendingQuestion::Email;
                self.reply(format!("OK, let's switch users. {}", self.email_question()), None)
            }
            ControlIntent::ChangeDepartment => {
                self.context.identity.change_department();
                self.context.manual_department = true;
                self.context.pending = PendingQuestion::Department;
                self.reply("What is your 3-digit department code?", None)
            }
            ControlIntent::ChangeField(field) => self.change_field(field),
            ControlIntent::Debug => {
                let message = self.debug_summary();
                self.with_current_question(message)
            }
            ControlIntent::Help => self.with_current_question(self.greeting()),
            ControlIntent::ShowCart => {
                let message = self.cart_summary();
                self.with_current_question(message)
            }
            ControlIntent::StartItem { mode, remainder } => self.start_item(mode, &remainder).await,
            ControlIntent::RemoveItem { position } => self.remove_item(position),
            ControlIntent::ClearCart => {
                let removed = self.context.cart.clear();
                self.audit_event(
                    "cart.cleared",
                    AuditCategory::Cart,
                    AuditOutcome::Success,
                    &[("removed", removed.to_string())],
                );
                self.with_current_question(format!("Cleared {removed} item(s) from your cart."))
            }
            ControlIntent::Submit => self.submit().await,
            ControlIntent::Cancel => match self.context.active.take() {
                Some(active) => {
                    self.context.pending = PendingQuestion::None;
                    self.reply(
                        format!("Cancelled the {} item. Your cart is unchanged.", active.filler.mode()),
                        None,
                    )
                }
                None => self.reply("There's no item in progress to cancel.", None),
            },
            ControlIntent::SendToFinance => self.send_to_finance(),
            ControlIntent::Retry => {
                let Some(active) = self.context.active.as_mut() else {
                    return self.validation("There's nothing to retry.");
                };
                match std::mem::replace(&mut active.stage, ItemStage::Filling) {
                    ItemStage::CodingUnavailable { priced, selection } => {
                        active.stage = ItemStage::Ready { priced, selection };
                        self.advance().await
                    }
                    other => {
                        active.stage = other;
                        self.validation("There's nothing to retry.")
                    }
                }
            }
        }
    }

    async fn answer(&mut self, text: &str) -> Reply {
        match self.context.pending {
            PendingQuestion::Email => {
                let signed_in = self.settings.signed_in_email.clone();
                match self.identity_resolver.resolve_identity(text, signed_in.as_ref()) {
                    Ok(email) => {
                        self.context.identity.assign_email(email);
                        self.audit_event(
                            "identity.resolved",
                            AuditCategory::Identity,
                            AuditOutcome::Success,
                            &[],
                        );
                        self.advance().await
                    }
                    Err(error) => self.validation(error.to_string()),
                }
            }
            PendingQuestion::Department => match self.identity_resolver.parse_manual_department(text) {
                Ok(department) => {
                    let code = department.code.to_string();
                    self.context.identity.assign_department(department);
                    self.context.manual_department = false;
                    self.audit_event(
                        "department.resolved",
                        AuditCategory::Identity,
                        AuditOutcome::Success,
                        &[("department_code", code), ("source", DepartmentSource::Manual.as_str().to_string())],
                    );
                    self.advance().await
                }
                Err(error) => self.validation(error.to_string()),
            },
            PendingQuestion::Slot(_) => {
                let today = self.clock.today();
                let Some(active) = self.context.active.as_mut() else {
                    return self.idle();
                };
                let outcome = active.filler.ingest_text(text, today);
                if let Some(issue) = &outcome.issue {
                    let prompt = active.filler.next_prompt(&outcome).unwrap_or_default();
                    self.context.pending = PendingQuestion::Slot(issue.field());
                    return self.reply(prompt, Some(TurnIssue::Validation { message: issue.to_string() }));
                }
                self.advance().await
            }
            PendingQuestion::DailyRate => self.answer_daily_rate(text).await,
            PendingQuestion::AccountChoice => self.answer_account_choice(text),
            PendingQuestion::NoAccountMatch => self.answer_no_match(text).await,
            PendingQuestion::CodingUnavailable => self.validation(
                "Say \"retry\" to look the account up again or \"send to finance\" to file the item for finance review.",
            ),
            PendingQuestion::None => self.idle(),
        }
    }

    async fn start_item(&mut self, mode: ExpenseMode, remainder: &str) -> Reply {
        let mut preface = String::new();
        if let Some(previous) = self.context.active.take() {
            preface = format!("Discarded the unfinished {} item. ", previous.filler.mode());
        }

        let mut filler = SlotFiller::new(mode);
        let outcome = filler.ingest_text(remainder, self.clock.today());
        let issue = outcome.issue.clone();
        let prompt = filler.next_prompt(&outcome);
        self.context.active = Some(ActiveItem { filler, stage: ItemStage::Filling });

        if let Some(issue) = issue {
            self.context.pending = PendingQuestion::Slot(issue.field());
            return self.reply(
                format!("{preface}{}", prompt.unwrap_or_default()),
                Some(TurnIssue::Validation { message: issue.to_string() }),
            );
        }

        let mut reply = self.advance().await;
        reply.message = format!("{preface}{}", reply.message);
        reply
    }

    /// Moves the active item forward until it needs the user or lands in the cart.
    async fn advance(&mut self) -> Reply {
        loop {
            if self.context.active.is_none() {
                return self.idle();
            }

            let Some(email) = self.context.identity.email().cloned() else {
                self.context.pending = PendingQuestion::Email;
                return self.reply(self.email_question(), None);
            };

            if self.context.identity.department().is_none() {
                if self.context.manual_department {
                    self.context.pending = PendingQuestion::Department;
                    return self.reply("What is your 3-digit department code?", None);
                }
                match self.identity_resolver.resolve_department(&email).await {
                    DepartmentResolution::Found { department, source } => {
                        let code = department.code.to_string();
                        self.context.identity.assign_department(department);
                        self.audit_event(
                            "department.resolved",
                            AuditCategory::Identity,
                            AuditOutcome::Success,
                            &[("department_code", code), ("source", source.as_str().to_string())],
                        );
                        continue;
                    }
                    DepartmentResolution::NotFound => {
                        self.context.manual_department = true;
                        self.context.pending = PendingQuestion::Department;
                        return self.reply(
                            format!(
                                "I couldn't find an exact department match for {email}. What is your 3-digit department code?"
                            ),
                            None,
                        );
                    }
                    DepartmentResolution::Unavailable(_) => {
                        self.context.manual_department = true;
                        self.context.pending = PendingQuestion::Department;
                        return self.reply(
                            "The directory is unavailable right now. What is your 3-digit department code?",
                            Some(TurnIssue::LookupUnavailable { capability: Capability::OrgChart }),
                        );
                    }
                }
            }

            let Some(mut active) = self.context.active.take() else {
                return self.idle();
            };
            match active.stage {
                ItemStage::Filling => {
                    let today = self.clock.today();
                    let Some(slots) = active.filler.complete(today) else {
                        let field = active.filler.missing().first().copied();
                        let question = field.map(|field| active.filler.question(field));
                        self.context.pending =
                            field.map(PendingQuestion::Slot).unwrap_or(PendingQuestion::None);
                        self.context.active = Some(active);
                        return self.reply(question.unwrap_or_default(), None);
                    };
                    let flags = active.filler.flags().clone();
                    match self.price(slots, flags).await {
                        Ok(stage) => {
                            active.stage = stage;
                            self.context.active = Some(active);
                        }
                        Err(PricingStop::RateUnavailable { slots, reply }) => {
                            active.stage = ItemStage::AwaitingRate { slots };
                            self.context.active = Some(active);
                            self.context.pending = PendingQuestion::DailyRate;
                            return reply;
                        }
                        Err(PricingStop::Unusable { slots, error }) => {
                            return self.reask_amount(active.filler, slots, &error);
                        }
                    }
                }
                ItemStage::Ready { priced, selection } => {
                    return self.code(active.filler, priced, selection).await;
                }
                stage => {
                    active.stage = stage;
                    self.context.active = Some(active);
                    return match self.current_question() {
                        Some(question) => self.reply(question, None),
                        None => self.idle(),
                    };
                }
            }
        }
    }

    /// `Ok` carries the stage to continue with.
    async fn price(&self, slots: CompletedSlots, flags: CodingFlags) -> Result<ItemStage, PricingStop> {
        let (amount, details) = match &slots {
            CompletedSlots::Receipt { category, amount, attachment, .. } => (
                *amount,
                ItemDetails::Receipt { category: category.clone(), attachment: attachment.clone() },
            ),
            CompletedSlots::Mileage { miles, .. } => {
                let rate = self.settings.mileage_rate;
                match mileage_amount(*miles, rate) {
                    Ok(amount) => (amount, ItemDetails::Mileage { miles: *miles, rate }),
                    Err(error) => return Err(PricingStop::Unusable { slots: slots.clone(), error }),
                }
            }
            CompletedSlots::PerDiem { travel_date, zip_code, days, travelers, .. } => {
                let per_diem = &self.backends.per_diem;
                let lookup = self
                    .settings
                    .retry
                    .call(Capability::PerDiemRate, move || async move {
                        per_diem.daily_rate(zip_code, *travel_date).await
                    })
                    .await;
                match lookup {
                    Ok(rate) => match per_diem_total(rate.daily_rate, *days, *travelers) {
                        Ok(amount) => (
                            amount,
                            ItemDetails::PerDiem {
                                zip_code: zip_code.clone(),
                                days: *days,
                                travelers: *travelers,
                                daily_rate: rate.daily_rate,
                                manual_rate: false,
                            },
                        ),
                        Err(error) => return Err(PricingStop::Unusable { slots: slots.clone(), error }),
                    },
                    Err(error) => {
                        warn!(
                            event_name = "per_diem.lookup_failed",
                            correlation_id = %self.turn_id,
                            error = %error,
                            "per diem rate unavailable, asking for a manual rate"
                        );
                        let reply = self.reply(
                            format!(
                                "I couldn't get the per diem rate for ZIP {zip_code}. What daily rate should I use? (for example 79.00)"
                            ),
                            Some(TurnIssue::LookupUnavailable { capability: Capability::PerDiemRate }),
                        );
                        return Err(PricingStop::RateUnavailable { slots: slots.clone(), reply });
                    }
                }
            }
        };

        let selection = CategorySelection::Inferred(slots.category_text());
        Ok(ItemStage::Ready { priced: PricedItem { slots, amount, details, flags }, selection })
    }

    async fn answer_daily_rate(&mut self, text: &str) -> Reply {
        let rate = parse_decimal(text).filter(|rate| *rate > Decimal::ZERO);
        let Some(rate) = rate else {
            return self.validation(format!(
                "`{text}` isn't a daily rate. Please enter a positive amount, for example 79.00."
            ));
        };
        if rate > MAX_DAILY_RATE {
            return self.validation(format!(
                "A daily rate of {} is above the {} limit. Please enter the daily rate again.",
                money(rate),
                money(MAX_DAILY_RATE)
            ));
        }

        let parked = self.context.active.as_ref().map(|active| match &active.stage {
            ItemStage::AwaitingRate {
                slots: CompletedSlots::PerDiem { zip_code, days, travelers, .. },
            } => Some((zip_code.clone(), *days, *travelers)),
            _ => None,
        });
        let (zip_code, days, travelers) = match parked {
            Some(Some(parked)) => parked,
            Some(None) => return self.advance().await,
            None => return self.idle(),
        };
        let amount = match per_diem_total(rate, days, travelers) {
            Ok(amount) => amount,
            Err(error) => {
                return self.validation(format!("{error}. Please enter the daily rate again."));
            }
        };

        let Some(active) = self.context.active.as_mut() else {
            return self.idle();
        };
        let flags = active.filler.flags().clone();
        if let ItemStage::AwaitingRate { slots } = std::mem::replace(&mut active.stage, ItemStage::Filling) {
            let details =
                ItemDetails::PerDiem { zip_code, days, travelers, daily_rate: rate, manual_rate: true };
            let selection = CategorySelection::Inferred(slots.category_text());
            active.stage =
                ItemStage::Ready { priced: PricedItem { slots, amount, details, flags }, selection };
        }
        self.advance().await
    }

    /// Parks the item back on the question whose answer produced an unusable amount.
    fn reask_amount(
        &mut self,
        mut filler: SlotFiller,
        slots: CompletedSlots,
        error: &DomainError,
    ) -> Reply {
        let message = format!("{error}.");
        let question = if matches!(slots, CompletedSlots::PerDiem { .. }) {
            self.context.active = Some(ActiveItem { filler, stage: ItemStage::AwaitingRate { slots } });
            self.context.pending = PendingQuestion::DailyRate;
            "What daily rate should I use? (for example 79.00)".to_string()
        } else {
            let field =
                if filler.mode() == ExpenseMode::Mileage { SlotField::Miles } else { SlotField::Amount };
            filler.change(field);
            let question = filler.question(field);
            self.context.active = Some(ActiveItem { filler, stage: ItemStage::Filling });
            self.context.pending = PendingQuestion::Slot(field);
            question
        };
        self.reply(format!("{message} {question}"), Some(TurnIssue::Validation { message }))
    }

    async fn code(&mut self, filler: SlotFiller, priced: PricedItem, selection: CategorySelection) -> Reply {
        let Some(department) = self.context.identity.department_code().cloned() else {
            self.context.active = Some(ActiveItem { filler, stage: ItemStage::Ready { priced, selection } });
            self.context.pending = PendingQuestion::Department;
            return self.reply("What is your 3-digit department code?", None);
        };

        let request = CodingRequest { department, category: selection.clone(), flags: priced.flags.clone() };
        let resolver = &self.resolver;
        let request_ref = &request;
        let outcome = self
            .settings
            .retry
            .call(Capability::ExpenseCodes, move || async move { resolver.resolve(request_ref).await })
            .await;

        match outcome {
            Ok(CodingOutcome::Resolved(resolved)) => self.add_item(filler, priced, resolved.into()),
            Ok(CodingOutcome::Ambiguous(matches)) => {
                let message = ambiguous_prompt(&matches);
                self.context.active = Some(ActiveItem { filler, stage: ItemStage::Choosing { priced, matches } });
                self.context.pending = PendingQuestion::AccountChoice;
                self.reply(message, Some(TurnIssue::AmbiguousMatch))
            }
            Ok(CodingOutcome::NoAccountMatch { department_code, activity_code }) => {
                let message = no_match_prompt(&department_code, activity_code);
                self.context.active = Some(ActiveItem {
                    filler,
                    stage: ItemStage::NoMatch { priced, activity: activity_code },
                });
                self.context.pending = PendingQuestion::NoAccountMatch;
                self.reply(message, Some(TurnIssue::NoAccountMatch))
            }
            Err(error) => {
                warn!(
                    event_name = "coding.lookup_failed",
                    correlation_id = %self.turn_id,
                    error = %error,
                    "expense code lookup failed after retry"
                );
                self.context.active =
                    Some(ActiveItem { filler, stage: ItemStage::CodingUnavailable { priced, selection } });
                self.context.pending = PendingQuestion::CodingUnavailable;
                self.reply(
                    "Expense codes are unavailable right now. Say \"retry\" to try again or \"send to finance\" to file the item for finance review.",
                    Some(TurnIssue::LookupUnavailable { capability: Capability::ExpenseCodes }),
                )
            }
        }
    }

    fn answer_account_choice(&mut self, text: &str) -> Reply {
        let Some(active) = self.context.active.take() else {
            return self.idle();
        };
        match active.stage {
            ItemStage::Choosing { priced, matches } => match matches.select(text) {
                Some(resolved) => self.add_item(active.filler, priced, resolved.into()),
                None => {
                    let message = format!("`{text}` isn't one of the listed accounts.");
                    let prompt = ambiguous_prompt(&matches);
                    self.context.active =
                        Some(ActiveItem { filler: active.filler, stage: ItemStage::Choosing { priced, matches } });
                    self.reply(
                        format!("{message} {prompt}"),
                        Some(TurnIssue::Validation { message }),
                    )
                }
            },
            stage => {
                self.context.active = Some(ActiveItem { filler: active.filler, stage });
                self.idle()
            }
        }
    }

    async fn answer_no_match(&mut self, text: &str) -> Reply {
        let activity = match ActivityCode::from_selection(text) {
            Ok(activity) => activity,
            Err(error) => {
                return self.validation(format!(
                    "{error}. Reply with an activity code or say \"send to finance\"."
                ))
            }
        };
        let Some(active) = self.context.active.as_mut() else {
            return self.idle();
        };
        match std::mem::replace(&mut active.stage, ItemStage::Filling) {
            ItemStage::NoMatch { priced, .. } => {
                active.stage =
                    ItemStage::Ready { priced, selection: CategorySelection::Explicit(activity) };
            }
            other => active.stage = other,
        }
        self.advance().await
    }

    fn send_to_finance(&mut self) -> Reply {
        let Some(department) = self.context.identity.department_code().cloned() else {
            return self.validation("\"send to finance\" is only available when no account matches.");
        };
        let Some(active) = self.context.active.take() else {
            return self.validation("\"send to finance\" is only available when no account matches.");
        };
        let (priced, activity) = match active.stage {
            ItemStage::NoMatch { priced, activity } => (priced, activity),
            ItemStage::CodingUnavailable { priced, selection } => {
                let activity = self.resolver.activity_for(&selection);
                (priced, activity)
            }
            stage => {
                self.context.active = Some(ActiveItem { filler: active.filler, stage });
                return self.validation("\"send to finance\" is only available when no account matches.");
            }
        };
        let coding = ItemCoding::finance_review(department, activity, &priced.flags);
        self.add_item(active.filler, priced, coding)
    }

    fn add_item(&mut self, filler: SlotFiller, priced: PricedItem, coding: ItemCoding) -> Reply {
        let PricedItem { slots, amount, details, .. } = priced;
        let item = match DraftItem::new(
            coding,
            slots.travel_date(),
            slots.reference(),
            amount,
            self.settings.currency.clone(),
            details,
        ) {
            Ok(item) => item,
            Err(error) => return self.reask_amount(filler, slots, &error),
        };

        let coding_summary = describe_coding(item.coding());
        let line = format!(
            "Added {}: {}, {} on {}, {coding_summary}.",
            item.mode(),
            item.reference(),
            money(item.amount_total()),
            item.travel_date().format("%m/%d/%Y"),
        );
        let mut metadata = vec![
            ("mode", item.mode().label().to_string()),
            ("department_code", item.coding().department().to_string()),
            ("activity_code", item.coding().activity().to_string()),
            ("finance_review", item.coding().needs_finance_review().to_string()),
        ];
        if let Some(account) = item.coding().account() {
            metadata.push(("account_code", account.to_string()));
        }
        if let Some(gl_override) = item.coding().gl_override() {
            metadata.push(("gl_account_override", gl_override.to_string()));
        }
        self.audit_event("coding.resolved", AuditCategory::Coding, AuditOutcome::Success, &metadata);

        let position = self.context.cart.add(item);
        self.context.active = None;
        self.context.pending = PendingQuestion::None;
        self.audit_event(
            "cart.item_added",
            AuditCategory::Cart,
            AuditOutcome::Success,
            &[("position", (position + 1).to_string())],
        );

        let totals = match self.context.cart.summary() {
            Ok(summary) => format!("{} item(s), {} total", summary.item_count, money(summary.grand_total)),
            Err(error) => format!("{} item(s), {error}", self.context.cart.len()),
        };
        self.reply(format!("{line} Cart: {totals}. Add another item or say \"submit\"."), None)
    }

    fn change_field(&mut self, field: SlotField) -> Reply {
        let Some(active) = self.context.active.as_mut() else {
            return self.validation(
                "There's no item in progress. Cart items can't be edited; remove the item and add it again.",
            );
        };
        if !active.filler.change(field) {
            let mode = active.filler.mode();
            return self.validation(format!("A {mode} item has no {field}."));
        }
        active.stage = ItemStage::Filling;
        let question = active.filler.question(field);
        self.context.pending = PendingQuestion::Slot(field);
        self.reply(question, None)
    }

    fn remove_item(&mut self, position: Option<usize>) -> Reply {
        let Some(position) = position else {
            return self.validation("Which item? Say \"remove <number>\" (see \"show cart\").");
        };
        let result = match position.checked_sub(1) {
            Some(index) => self.context.cart.remove(index),
            None => Err(DomainError::ItemIndexOutOfRange { index: 0, len: self.context.cart.len() }),
        };
        match result {
            Ok(item) => {
                self.audit_event(
                    "cart.item_removed",
                    AuditCategory::Cart,
                    AuditOutcome::Success,
                    &[("position", position.to_string()), ("mode", item.mode().label().to_string())],
                );
                self.with_current_question(format!(
                    "Removed item {position} ({} {}). {} item(s) left.",
                    item.mode(),
                    money(item.amount_total()),
                    self.context.cart.len()
                ))
            }
            Err(_) => self.validation(format!(
                "There is no item {position}; the cart has {} item(s).",
                self.context.cart.len()
            )),
        }
    }

    async fn submit(&mut self) -> Reply {
        let today = self.clock.today();
        let payload = match self.context.cart.to_submission_payload(
            &self.context.identity,
            &self.settings.submission,
            today,
        ) {
            Ok(payload) => payload,
            Err(DomainError::EmptyCartSubmission) => {
                self.audit_event(
                    "submission.rejected",
                    AuditCategory::Submission,
                    AuditOutcome::Rejected,
                    &[("reason", "empty_cart".to_string())],
                );
                return self.reply(
                    "Your cart is empty, so there's nothing to submit.",
                    Some(TurnIssue::EmptyCartSubmission),
                );
            }
            Err(error) => {
                self.context.pending = PendingQuestion::Email;
                return self.reply(
                    format!("I need your email before submitting. {}", self.email_question()),
                    Some(TurnIssue::Validation { message: error.to_string() }),
                );
            }
        };

        let submitter = &self.backends.submitter;
        let payload_ref = &payload;
        let result = self
            .settings
            .retry
            .call(Capability::ReportSubmission, move || async move {
                submitter.submit(payload_ref).await
            })
            .await;

        match result {
            Ok(receipt) if receipt.is_confirmed() => {
                let lines = self.context.cart.clear();
                self.audit_event(
                    "submission.sent",
                    AuditCategory::Submission,
                    AuditOutcome::Success,
                    &[("lines", lines.to_string()), ("amount_total", payload.amount_total().to_string())],
                );
                self.reply(
                    format!(
                        "Submitted {lines} line(s) totaling {} to {}. Your cart is now empty.",
                        money(payload.amount_total()),
                        payload.to_email
                    ),
                    None,
                )
            }
            Ok(receipt) => {
                let reason = receipt.failure_reason();
                let error = ApplicationError::SubmissionNotConfirmed(reason.clone());
                warn!(
                    event_name = "submission.not_confirmed",
                    correlation_id = %self.turn_id,
                    error = %error,
                    "report submission was not confirmed"
                );
                self.audit_event(
                    "submission.not_confirmed",
                    AuditCategory::Submission,
                    AuditOutcome::Failed,
                    &[("reason", reason.clone())],
                );
                self.reply(
                    format!(
                        "The report was not confirmed as sent ({reason}). Your cart is unchanged; say \"submit\" to try again."
                    ),
                    Some(TurnIssue::SubmissionNotConfirmed { reason }),
                )
            }
            Err(error) => {
                warn!(
                    event_name = "submission.failed",
                    correlation_id = %self.turn_id,
                    error = %error,
                    "report submission failed after retry"
                );
                self.audit_event(
                    "submission.not_confirmed",
                    AuditCategory::Submission,
                    AuditOutcome::Failed,
                    &[("reason", error.to_string())],
                );
                self.reply(
                    "The report service is unavailable right now. Your cart is unchanged; please try again later.",
                    Some(TurnIssue::LookupUnavailable { capability: error.capability() }),
                )
            }
        }
    }

    fn reset(&mut self) -> Reply {
        let dropped = self.context.cart.len();
        self.audit_event(
            "conversation.reset",
            AuditCategory::Conversation,
            AuditOutcome::Success,
            &[("dropped_items", dropped.to_string())],
        );
        self.context = ConversationContext::default();
        self.reply(format!("Starting over. Your identity and cart have been cleared. {}", self.greeting()), None)
    }

    fn idle(&mut self) -> Reply {
        self.context.pending = PendingQuestion::None;
        let count = self.context.cart.len();
        if count == 0 {
            return self.reply(self.greeting(), None);
        }
        self.reply(
            format!(
                "Your cart has {count} item(s). Add another item, say \"show cart\", or \"submit\" to send the report."
            ),
            None,
        )
    }

    fn email_question(&self) -> String {
        if self.settings.signed_in_email.is_some() {
            "What's your email address? (You can say \"me\".)".to_string()
        } else {
            "What's your email address?".to_string()
        }
    }

    /// Re-renders the question currently waiting for an answer.
    fn current_question(&self) -> Option<String> {
        let active = self.context.active.as_ref();
        match self.context.pending {
            PendingQuestion::None => None,
            PendingQuestion::Email => Some(self.email_question()),
            PendingQuestion::Department => Some("What is your 3-digit department code?".to_string()),
            PendingQuestion::Slot(field) => active.map(|active| active.filler.question(field)),
            PendingQuestion::DailyRate => Some("What daily rate should I use? (for example 79.00)".to_string()),
            PendingQuestion::AccountChoice => match active.map(|active| &active.stage) {
                Some(ItemStage::Choosing { matches, .. }) => Some(ambiguous_prompt(matches)),
                _ => None,
            },
            PendingQuestion::NoAccountMatch => match active.map(|active| &active.stage) {
                Some(ItemStage::NoMatch { activity, .. }) => self
                    .context
                    .identity
                    .department_code()
                    .map(|department| no_match_prompt(department, *activity)),
                _ => None,
            },
            PendingQuestion::CodingUnavailable => Some(
                "Say \"retry\" to look the account up again or \"send to finance\" to file the item for finance review."
                    .to_string(),
            ),
        }
    }

    fn with_current_question(&self, message: String) -> Reply {
        match self.current_question() {
            Some(question) => self.reply(format!("{message}\n\n{question}"), None),
            None => self.reply(message, None),
        }
    }

    fn debug_summary(&self) -> String {
        let identity = &self.context.identity;
        format!(
            "Debug: email {}, department {}, cart items {}, item in progress {}, waiting for {}.",
            if identity.email().is_some() { "set" } else { "not set" },
            identity.department_code().map(ToString::to_string).unwrap_or_else(|| "not set".to_string()),
            self.context.cart.len(),
            self.context.active_mode().map(|mode| mode.label()).unwrap_or("none"),
            self.context.pending.as_str(),
        )
    }

    fn cart_summary(&self) -> String {
        let cart = &self.context.cart;
        if cart.is_empty() {
            return "Your cart is empty.".to_string();
        }
        let mut lines = vec![format!("Your cart ({} item(s)):", cart.len())];
        for (index, item) in cart.items().iter().enumerate() {
            lines.push(format!(
                "{}) {} {} {} {} [{}]",
                index + 1,
                item.mode(),
                item.travel_date().format("%m/%d/%Y"),
                item.reference(),
                money(item.amount_total()),
                describe_coding(item.coding()),
            ));
        }
        let summary = match cart.summary() {
            Ok(summary) => summary,
            Err(error) => {
                lines.push(format!("Total: {error}"));
                return lines.join("\n");
            }
        };
        for (mode, total) in &summary.total_by_mode {
            let count = summary.count_by_mode.get(mode).copied().unwrap_or_default();
            lines.push(format!("{mode}: {count} item(s), {}", money(*total)));
        }
        lines.push(format!("Total: {}", money(summary.grand_total)));
        lines.join("\n")
    }

    fn validation(&self, message: impl Into<String>) -> Reply {
        let message = message.into();
        self.reply(message.clone(), Some(TurnIssue::Validation { message }))
    }

    fn reply(&self, message: impl Into<String>, issue: Option<TurnIssue>) -> Reply {
        Reply { message: message.into(), issue, correlation_id: self.turn_id.clone() }
    }

    fn audit_event(
        &self,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
        metadata: &[(&str, String)],
    ) {
        let actor = self
            .context
            .identity
            .email()
            .map(ToString::to_string)
            .unwrap_or_else(|| "anonymous".to_string());
        let context = AuditContext::new(self.conversation_id.clone(), self.turn_id.clone(), actor);
        let event = metadata
            .iter()
            .fold(context.event(event_type, category, outcome), |event, (key, value)| {
                event.with_metadata(*key, value.clone())
            });
        self.audit.emit(event);
    }
}

fn money(amount: Decimal) -> String {
    format!("${:.2}", amount)
}

fn describe_coding(coding: &ItemCoding) -> String {
    let base = match coding.account() {
        Some(account) => format!("coded {}-{}-{account}", coding.department(), coding.activity()),
        None => format!(
            "coded {}-{} for finance review (no account)",
            coding.department(),
            coding.activity()
        ),
    };
    match coding.gl_override() {
        Some(gl_override) => format!("{base}, posting to {gl_override}"),
        None => base,
    }
}

fn ambiguous_prompt(matches: &AccountMatchSet) -> String {
    format!(
        "Several accounts match department {} and activity {}. Reply with a letter or the account code:\n{}",
        matches.department(),
        matches.activity(),
        matches.choice_lines().join("\n")
    )
}

fn no_match_prompt(department: &DepartmentCode, activity: ActivityCode) -> String {
    let options =
        ActivityCode::SELECTABLE.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
    format!(
        "No account matches department {department} and activity {activity}. Reply with another activity code ({options}) or say \"send to finance\"."
    )
}
