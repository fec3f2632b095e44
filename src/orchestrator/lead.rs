//! Lead intake slots and their validation

use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// Fixed lead intake sequence: name, then email, then phone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadSlot {
    Name,
    Email,
    Phone,
}

impl LeadSlot {
    pub fn as_str(self) -> &'static str {
        match self {
            LeadSlot::Name => "name",
            LeadSlot::Email => "email",
            LeadSlot::Phone => "phone",
        }
    }

    /// Slot asked after this one, `None` after phone
    pub fn next(self) -> Option<LeadSlot> {
        match self {
            LeadSlot::Name => Some(LeadSlot::Email),
            LeadSlot::Email => Some(LeadSlot::Phone),
            LeadSlot::Phone => None,
        }
    }
}

impl fmt::Display for LeadSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(LeadSlot::Name),
            "email" => Ok(LeadSlot::Email),
            "phone" => Ok(LeadSlot::Phone),
            other => Err(format!("unknown lead slot: {other}")),
        }
    }
}

const PHONE_MIN_DIGITS: usize = 7;
const PHONE_MAX_DIGITS: usize = 15;

pub struct LeadValidator {
    email: Regex,
}

impl LeadValidator {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            email: Regex::new(
                r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(?:\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$",
            )?,
        })
    }

    /// Normalized answer for `slot`, or `None` if the input is not acceptable
    pub fn normalize(&self, slot: LeadSlot, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        match slot {
            LeadSlot::Name => {
                let name = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
                (!name.is_empty()).then_some(name)
            }
            LeadSlot::Email => self
                .email
                .is_match(trimmed)
                .then(|| trimmed.to_lowercase()),
            LeadSlot::Phone => normalize_phone(trimmed),
        }
    }
}

/// Digits only; separators like spaces, dashes, dots, parentheses and a
/// leading `+` are dropped. Anything else rejects the number.
fn normalize_phone(raw: &str) -> Option<String> {
    let allowed = |c: char| c.is_ascii_digit() || matches!(c, ' ' | '-' | '.' | '(' | ')' | '+');
    if !raw.chars().all(allowed) {
        return None;
    }
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    (PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS)
        .contains(&digits.len())
        .then_some(digits)
}
