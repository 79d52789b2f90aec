use serde::{Deserialize, Serialize};

/// A stored setting that distinguishes "never set" from "explicitly none".
///
/// `Inherit` means the record carries no value and the legacy default applies,
/// `Cleared` means the user explicitly chose no value, and `Value` carries one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Assignment<T> {
    #[default]
    Inherit,
    Cleared,
    Value(T),
}

impl<T> Assignment<T> {
    pub fn is_inherit(&self) -> bool {
        matches!(self, Assignment::Inherit)
    }

    pub fn as_value(&self) -> Option<&T> {
        match self {
            Assignment::Value(value) => Some(value),
            Assignment::Inherit | Assignment::Cleared => None,
        }
    }

    /// Resolve against a default: `Inherit` falls back to `default`,
    /// `Cleared` resolves to nothing.
    pub fn resolve<'a>(&'a self, default: &'a T) -> Option<&'a T> {
        match self {
            Assignment::Inherit => Some(default),
            Assignment::Cleared => None,
            Assignment::Value(value) => Some(value),
        }
    }
}

impl<T> From<Option<T>> for Assignment<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Assignment::Value(value),
            None => Assignment::Cleared,
        }
    }
}
