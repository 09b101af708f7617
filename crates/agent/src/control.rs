use expensecart_core::domain::item::ExpenseMode;

use crate::slots::SlotField;

/// Utterances that steer the conversation instead of answering a question.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlIntent {
    Reset,
    ChangeDepartment,
    ChangeUser,
    ChangeField(SlotField),
    Debug,
    Help,
    StartItem { mode: ExpenseMode, remainder: String },
    ShowCart,
    RemoveItem { position: Option<usize> },
    ClearCart,
    Submit,
    Cancel,
    SendToFinance,
    Retry,
}

impl ControlIntent {
    pub fn action_key(&self) -> &'static str {
        match self {
            Self::Reset => "conversation.reset",
            Self::ChangeDepartment => "identity.change_department",
            Self::ChangeUser => "identity.change_user",
            Self::ChangeField(_) => "item.change_field",
            Self::Debug => "conversation.debug",
            Self::Help => "conversation.help",
            Self::StartItem { .. } => "item.start",
            Self::ShowCart => "cart.show",
            Self::RemoveItem { .. } => "cart.remove",
            Self::ClearCart => "cart.clear",
            Self::Submit => "cart.submit",
            Self::Cancel => "item.cancel",
            Self::SendToFinance => "coding.send_to_finance",
            Self::Retry => "lookup.retry",
        }
    }
}

const MODE_WORDS: &[(&str, ExpenseMode)] = &[
    ("per diem", ExpenseMode::PerDiem),
    ("per-diem", ExpenseMode::PerDiem),
    ("perdiem", ExpenseMode::PerDiem),
    ("receipt", ExpenseMode::Receipt),
    ("expense", ExpenseMode::Receipt),
    ("mileage", ExpenseMode::Mileage),
];

pub fn recognize(text: &str) -> Option<ControlIntent> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let collapsed = collapsed.trim_end_matches(['.', '!', '?']).trim();
    let lowered = collapsed.to_ascii_lowercase();

    let intent = match lowered.as_str() {
        "reset" | "start over" | "restart" => ControlIntent::Reset,
        "change department" | "change dept" | "change my department" => {
            ControlIntent::ChangeDepartment
        }
        "change user" | "change email" | "change my email" | "switch user" => {
            ControlIntent::ChangeUser
        }
        "debug" => ControlIntent::Debug,
        "help" => ControlIntent::Help,
        "show cart" | "cart" | "view cart" | "summary" => ControlIntent::ShowCart,
        "clear cart" | "empty cart" => ControlIntent::ClearCart,
        "submit" | "submit report" | "send report" => ControlIntent::Submit,
        "cancel" | "cancel item" => ControlIntent::Cancel,
        "send to finance" | "finance review" | "send it to finance" => ControlIntent::SendToFinance,
        "retry" | "try again" => ControlIntent::Retry,
        "remove" | "delete" => ControlIntent::RemoveItem { position: None },
        _ => return recognize_with_argument(collapsed, &lowered),
    };
    Some(intent)
}

fn recognize_with_argument(original: &str, lowered: &str) -> Option<ControlIntent> {
    for verb in ["add ", "new "] {
        let Some(rest) = lowered.strip_prefix(verb) else {
            continue;
        };
        for (word, mode) in MODE_WORDS {
            if rest == *word || rest.starts_with(&format!("{word} ")) {
                // ASCII lowering keeps byte offsets, so the original casing can be sliced.
                let offset = verb.len() + word.len();
                let remainder = original.get(offset..).unwrap_or("").trim().to_string();
                return Some(ControlIntent::StartItem { mode: *mode, remainder });
            }
        }
    }

    for verb in ["remove ", "delete "] {
        if let Some(rest) = lowered.strip_prefix(verb) {
            let rest = rest.trim_start_matches("item ").trim_start_matches('#');
            let position = rest.parse::<usize>().ok()?;
            return Some(ControlIntent::RemoveItem { position: Some(position) });
        }
    }

    if let Some(rest) = lowered.strip_prefix("change ") {
        let rest = rest.trim_start_matches("the ").trim_start_matches("my ");
        return SlotField::parse(rest).map(ControlIntent::ChangeField);
    }
    None
}
