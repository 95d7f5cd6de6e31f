//! Worker eligibility rules such as `approval_rate >= 95`.

use crate::error::{Result, ScribepoolError};
use std::fmt;
use std::str::FromStr;

/// Worker attribute a qualification tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    ApprovalRate,
    SubmissionRate,
    AbandonedRate,
    ReturnRate,
    RejectionRate,
    HitsApproved,
    Adult,
    Country,
    IsGranted,
}

impl Attribute {
    pub const ALL: &'static [Attribute] = &[
        Self::ApprovalRate,
        Self::SubmissionRate,
        Self::AbandonedRate,
        Self::ReturnRate,
        Self::RejectionRate,
        Self::HitsApproved,
        Self::Adult,
        Self::Country,
        Self::IsGranted,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ApprovalRate => "approval_rate",
            Self::SubmissionRate => "submission_rate",
            Self::AbandonedRate => "abandoned_rate",
            Self::ReturnRate => "return_rate",
            Self::RejectionRate => "rejection_rate",
            Self::HitsApproved => "hits_approved",
            Self::Adult => "adult",
            Self::Country => "country",
            Self::IsGranted => "is_granted",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.name() == name)
    }
}

/// Comparison applied to the attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    Gt,
    Lt,
    Gte,
    Lte,
    Eql,
    Not,
    Exists,
    True,
}

impl Comparator {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            ">" => Some(Self::Gt),
            "<" => Some(Self::Lt),
            ">=" => Some(Self::Gte),
            "<=" => Some(Self::Lte),
            "==" => Some(Self::Eql),
            "!=" => Some(Self::Not),
            "exists" => Some(Self::Exists),
            "true" => Some(Self::True),
            _ => None,
        }
    }

    /// Token as written in config files and on the command line.
    pub fn token(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Eql => "==",
            Self::Not => "!=",
            Self::Exists => "exists",
            Self::True => "true",
        }
    }

    /// Marketplace-side name (`gte`, `eql`, ...).
    pub fn name(self) -> &'static str {
        match self {
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::Gte => "gte",
            Self::Lte => "lte",
            Self::Eql => "eql",
            Self::Not => "not",
            Self::Exists => "exists",
            Self::True => "true",
        }
    }

    /// `exists` and `true` stand alone; everything else compares against a value.
    pub fn needs_value(self) -> bool {
        !matches!(self, Self::Exists | Self::True)
    }
}

/// One eligibility predicate: `(attribute, comparator, value)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qualification {
    pub attribute: Attribute,
    pub comparator: Comparator,
    pub value: Option<String>,
}

impl FromStr for Qualification {
    type Err = ScribepoolError;

    /// Comparator is checked before attribute, so `fake_rate &= 8` reports
    /// the comparator.
    fn from_str(text: &str) -> Result<Self> {
        let mut tokens = text.split_whitespace();
        let (Some(attribute), Some(comparator)) = (tokens.next(), tokens.next()) else {
            return Err(ScribepoolError::format(format!(
                "expected '<type> <comparator> [value]', got '{text}'"
            )));
        };
        let value = tokens.next();
        if tokens.next().is_some() {
            return Err(ScribepoolError::format(format!(
                "too many words in qualification '{text}'"
            )));
        }

        let comparator = Comparator::from_token(comparator).ok_or_else(|| {
            ScribepoolError::argument(format!("Unknown comparator '{comparator}'"))
        })?;
        let attribute = Attribute::from_name(attribute)
            .ok_or_else(|| ScribepoolError::argument(format!("Unknown type '{attribute}'")))?;

        if comparator.needs_value() && value.is_none() {
            return Err(ScribepoolError::format(format!(
                "comparator '{}' needs a value in '{text}'",
                comparator.token()
            )));
        }

        Ok(Self {
            attribute,
            comparator,
            value: value.map(str::to_string),
        })
    }
}

impl fmt::Display for Qualification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.attribute.name(), self.comparator.token())?;
        if let Some(value) = &self.value {
            write!(f, " {value}")?;
        }
        Ok(())
    }
}
