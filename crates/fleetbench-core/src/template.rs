//! Command templates with `{{ name }}` placeholders.
//!
//! Substitution is purely textual. A placeholder is either `{{ name }}` or
//! `{{ name | default(value) }}`; anything else between the braces is
//! rejected when the template is parsed.

use crate::vars::{VarScope, render_value};
use std::collections::HashSet;
use thiserror::Error;

/// Errors produced while parsing or rendering a template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// A placeholder references a variable that no scope defines.
    #[error("Unresolved variable '{name}' in template '{template}'")]
    UnresolvedVariable {
        /// Variable name.
        name: String,
        /// Template source.
        template: String,
    },

    /// The template text is not well formed.
    #[error("Malformed template '{template}': {reason}")]
    Malformed {
        /// Template source.
        template: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// A single `{{ ... }}` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Variable name.
    pub name: String,
    /// Literal used when the variable is undefined.
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// A parsed command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parses a template string.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| TemplateError::Malformed {
                template: source.to_string(),
                reason: "unterminated '{{'".to_string(),
            })?;
            let placeholder = parse_placeholder(after[..end].trim()).map_err(|reason| {
                TemplateError::Malformed {
                    template: source.to_string(),
                    reason,
                }
            })?;
            segments.push(Segment::Placeholder(placeholder));
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Template source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Iterates over the placeholders in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &Placeholder> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Placeholder(p) => Some(p),
            Segment::Literal(_) => None,
        })
    }

    /// Checks that every placeholder can be resolved.
    ///
    /// `pending` holds names that are not in `scope` yet but will be defined
    /// before the template is rendered (for example registered task output).
    pub fn check(&self, scope: &VarScope, pending: &HashSet<String>) -> Result<(), TemplateError> {
        for placeholder in self.placeholders() {
            if placeholder.default.is_none()
                && !scope.contains(&placeholder.name)
                && !pending.contains(&placeholder.name)
            {
                return Err(self.unresolved(&placeholder.name));
            }
        }
        Ok(())
    }

    /// Renders the template against `scope`.
    pub fn render(&self, scope: &VarScope) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(p) => match (scope.get(&p.name), &p.default) {
                    (Some(value), _) => out.push_str(&render_value(value)),
                    (None, Some(default)) => out.push_str(default),
                    (None, None) => return Err(self.unresolved(&p.name)),
                },
            }
        }
        Ok(out)
    }

    fn unresolved(&self, name: &str) -> TemplateError {
        TemplateError::UnresolvedVariable {
            name: name.to_string(),
            template: self.source.clone(),
        }
    }
}

/// Parses and renders `source` in one go.
pub fn render(source: &str, scope: &VarScope) -> Result<String, TemplateError> {
    Template::parse(source)?.render(scope)
}

/// Returns `true` if `name` is a valid variable identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_placeholder(expr: &str) -> Result<Placeholder, String> {
    let (name, filter) = match expr.split_once('|') {
        Some((name, filter)) => (name.trim(), Some(filter.trim())),
        None => (expr, None),
    };
    if !is_identifier(name) {
        return Err(format!("'{}' is not a variable name", name));
    }

    let default = match filter {
        None => None,
        Some(filter) => {
            let arg = filter
                .strip_prefix("default(")
                .and_then(|s| s.strip_suffix(')'))
                .ok_or_else(|| format!("unsupported filter '{}'", filter))?;
            Some(unquote(arg.trim()).to_string())
        }
    };

    Ok(Placeholder {
        name: name.to_string(),
        default,
    })
}

/// Strips one pair of matching single or double quotes.
pub(crate) fn unquote(s: &str) -> &str {
    for quote in ['\'', '"'] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}
