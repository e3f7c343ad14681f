//! # Constraint Validator
//!
//! Evaluates one field value against a list of declarative [`Constraint`]s.
//! Unlike the request validator, this never stops at the first failure: every
//! violated constraint contributes its message, with `{0}`/`{1}` replaced by
//! the declared bounds, so a caller sees all problems with a field at once.
//!
//! A constraint list that contains any bound (length or numeric) marks the
//! field as required. Empty or missing values are skipped only for fields
//! that are not required.

use once_cell::sync::Lazy;
use regex::Regex;

/// local@domain.tld, with no whitespace and a single `@`.
static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s.]+(\.[^@\s.]+)+$").expect("e-mail regex should be valid")
});

/// The predicate half of a [`Constraint`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstraintKind {
    MinLength(usize),
    MaxLength(usize),
    Min(i64),
    Max(i64),
    IsEmail,
}

impl ConstraintKind {
    fn is_bound(&self) -> bool {
        !matches!(self, ConstraintKind::IsEmail)
    }

    fn is_lower(&self) -> bool {
        matches!(self, ConstraintKind::MinLength(_) | ConstraintKind::Min(_))
    }

    fn is_upper(&self) -> bool {
        matches!(self, ConstraintKind::MaxLength(_) | ConstraintKind::Max(_))
    }

    fn bound(&self) -> Option<String> {
        match self {
            ConstraintKind::MinLength(n) | ConstraintKind::MaxLength(n) => Some(n.to_string()),
            ConstraintKind::Min(n) | ConstraintKind::Max(n) => Some(n.to_string()),
            ConstraintKind::IsEmail => None,
        }
    }

    fn holds(&self, value: &str) -> bool {
        match self {
            ConstraintKind::MinLength(n) => value.chars().count() >= *n,
            ConstraintKind::MaxLength(n) => value.chars().count() <= *n,
            ConstraintKind::Min(n) => parse_number(value).is_some_and(|v| v >= *n as f64),
            ConstraintKind::Max(n) => parse_number(value).is_some_and(|v| v <= *n as f64),
            ConstraintKind::IsEmail => EMAIL_REGEX.is_match(value),
        }
    }
}

/// A single declarative rule with its message template.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub message: String,
}

impl Constraint {
    pub fn new(kind: ConstraintKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn min_length(n: usize, message: impl Into<String>) -> Self {
        Self::new(ConstraintKind::MinLength(n), message)
    }

    pub fn max_length(n: usize, message: impl Into<String>) -> Self {
        Self::new(ConstraintKind::MaxLength(n), message)
    }

    pub fn min(n: i64, message: impl Into<String>) -> Self {
        Self::new(ConstraintKind::Min(n), message)
    }

    pub fn max(n: i64, message: impl Into<String>) -> Self {
        Self::new(ConstraintKind::Max(n), message)
    }

    pub fn email(message: impl Into<String>) -> Self {
        Self::new(ConstraintKind::IsEmail, message)
    }

    /// A `MinLength`/`MaxLength` pair sharing one "between {0} and {1}" message.
    pub fn length_between(min: usize, max: usize, message: impl Into<String>) -> [Self; 2] {
        let message = message.into();
        [Self::min_length(min, message.clone()), Self::max_length(max, message)]
    }
}

/// Constraints attached to one named request field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub field_name: String,
    pub constraints: Vec<Constraint>,
}

impl FieldRule {
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            constraints: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    #[must_use]
    pub fn with_all(mut self, constraints: impl IntoIterator<Item = Constraint>) -> Self {
        self.constraints.extend(constraints);
        self
    }

    /// Validate this rule's field value.
    #[must_use]
    pub fn validate(&self, value: Option<&str>) -> Vec<String> {
        validate(value, &self.constraints)
    }
}

/// Evaluate `value` against every constraint and return all violation messages.
///
/// Never panics: numeric constraints on a non-numeric value yield that
/// constraint's message.
#[must_use]
pub fn validate(value: Option<&str>, constraints: &[Constraint]) -> Vec<String> {
    let value = value.map(str::trim).unwrap_or_default();
    let required = constraints.iter().any(|c| c.kind.is_bound());

    if value.is_empty() && !required {
        return Vec::new();
    }

    let lower = constraints
        .iter()
        .find(|c| c.kind.is_lower())
        .and_then(|c| c.kind.bound());
    let upper = constraints
        .iter()
        .find(|c| c.kind.is_upper())
        .and_then(|c| c.kind.bound());

    constraints
        .iter()
        .filter(|c| !c.kind.holds(value))
        .map(|c| {
            let own = c.kind.bound().unwrap_or_default();
            let first = lower.clone().unwrap_or_else(|| own.clone());
            let second = upper.clone().unwrap_or(own);
            c.message.replace("{0}", &first).replace("{1}", &second)
        })
        .collect()
}

fn parse_number(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}
