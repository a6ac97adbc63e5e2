//! Full-text predicates handed to the text index.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which indexed field a term is matched against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextField {
    /// Any field.
    #[default]
    All,
    Content,
    Subject,
    From,
    To,
    Cc,
    Filename,
}

impl TextField {
    pub fn as_str(self) -> &'static str {
        match self {
            TextField::All => "all",
            TextField::Content => "content",
            TextField::Subject => "subject",
            TextField::From => "from",
            TextField::To => "to",
            TextField::Cc => "cc",
            TextField::Filename => "filename",
        }
    }
}

/// A single word (or `prefix*` wildcard) in one field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextTerm {
    #[serde(default)]
    pub field: TextField,
    pub text: String,
}

impl TextTerm {
    pub fn new(field: TextField, text: impl Into<String>) -> Self {
        Self {
            field,
            text: text.into(),
        }
    }

    /// The prefix of a trailing-`*` wildcard term.
    pub fn wildcard_prefix(&self) -> Option<&str> {
        self.text.strip_suffix('*')
    }
}

impl fmt::Display for TextTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field.as_str(), self.text)
    }
}

/// A boolean combination of text terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextPredicate {
    Term(TextTerm),
    All(Vec<TextPredicate>),
    Any(Vec<TextPredicate>),
    Not(Box<TextPredicate>),
}

impl TextPredicate {
    pub fn term(field: TextField, text: impl Into<String>) -> Self {
        TextPredicate::Term(TextTerm::new(field, text))
    }

    pub fn and(self, other: TextPredicate) -> TextPredicate {
        let mut parts = match self {
            TextPredicate::All(parts) => parts,
            p => vec![p],
        };
        match other {
            TextPredicate::All(more) => parts.extend(more),
            p => parts.push(p),
        }
        TextPredicate::All(parts)
    }

    pub fn or(self, other: TextPredicate) -> TextPredicate {
        let mut parts = match self {
            TextPredicate::Any(parts) => parts,
            p => vec![p],
        };
        match other {
            TextPredicate::Any(more) => parts.extend(more),
            p => parts.push(p),
        }
        TextPredicate::Any(parts)
    }

    pub fn negate(self) -> TextPredicate {
        match self {
            TextPredicate::Not(inner) => *inner,
            p => TextPredicate::Not(Box::new(p)),
        }
    }

    /// The term, when the predicate is a single positive term.
    pub fn single_term(&self) -> Option<&TextTerm> {
        match self {
            TextPredicate::Term(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for TextPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (parts, op) = match self {
            TextPredicate::Term(t) => return write!(f, "{t}"),
            TextPredicate::Not(inner) => return write!(f, "-{inner}"),
            TextPredicate::All(parts) => (parts, " AND "),
            TextPredicate::Any(parts) => (parts, " OR "),
        };
        f.write_str("(")?;
        for (i, p) in parts.iter().enumerate() {
            if i > 0 {
                f.write_str(op)?;
            }
            write!(f, "{p}")?;
        }
        f.write_str(")")
    }
}
