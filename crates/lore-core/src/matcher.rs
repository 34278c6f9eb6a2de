//! Template field grammar and the in-memory matching predicate.
//!
//! The same template semantics exist three times in this crate: compiled to
//! SQL (`query`), compiled to a text-engine boolean filter (`fts`), and
//! evaluated directly against events here, for the monitor bus. The field
//! grammar lives in this module so the three stay in agreement: a leading
//! `!` negates a field, a leading `*` (after any `!`) turns URI-like fields
//! into prefix matches, anything else matches exactly or, for hierarchical
//! vocabulary fields, by subtree.

use crate::error::{Error, Result};
use crate::models::{Event, NEGATION_OPERATOR, Subject, WILDCARD};
use crate::ontology::SymbolRegistry;

/// A template field value with its modifiers stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldModifiers<'a> {
    pub value: &'a str,
    pub negated: bool,
    pub prefix: bool,
}

/// Split the modifiers off a template field value, rejecting modifiers the
/// field does not support.
pub fn parse_operators(
    mut value: &str,
    supports_negation: bool,
    supports_wildcard: bool,
) -> Result<FieldModifiers<'_>> {
    let mut negated = false;
    if let Some(rest) = value.strip_prefix(NEGATION_OPERATOR) {
        if !supports_negation {
            return Err(Error::InvalidArgument(
                "this field does not support negation".into(),
            ));
        }
        negated = true;
        value = rest;
    }
    let mut prefix = false;
    if let Some(rest) = value.strip_prefix(WILDCARD) {
        if !supports_wildcard {
            return Err(Error::InvalidArgument(
                "this field does not support prefix matching".into(),
            ));
        }
        prefix = true;
        value = rest;
    }
    Ok(FieldModifiers { value, negated, prefix })
}

fn matches_plain(event_value: &str, field: FieldModifiers<'_>) -> bool {
    let hit = if field.prefix {
        event_value.starts_with(field.value)
    } else {
        event_value == field.value
    };
    hit != field.negated
}

fn matches_subtree(registry: &SymbolRegistry, event_value: &str, field: FieldModifiers<'_>) -> bool {
    registry.is_a(event_value, field.value) != field.negated
}

fn subject_matches(
    registry: &SymbolRegistry,
    subject: &Subject,
    template: &Subject,
) -> Result<bool> {
    if !template.interpretation.is_empty() {
        let field = parse_operators(&template.interpretation, true, false)?;
        if !matches_subtree(registry, &subject.interpretation, field) {
            return Ok(false);
        }
    }
    if !template.manifestation.is_empty() {
        let field = parse_operators(&template.manifestation, true, false)?;
        if !matches_subtree(registry, &subject.manifestation, field) {
            return Ok(false);
        }
    }
    if !template.mimetype.is_empty() {
        let field = parse_operators(&template.mimetype, true, true)?;
        if !matches_plain(&subject.mimetype, field) {
            return Ok(false);
        }
    }
    if !template.uri.is_empty() {
        let field = parse_operators(&template.uri, true, true)?;
        if !matches_plain(&subject.uri, field) {
            return Ok(false);
        }
    }
    if !template.current_uri.is_empty() {
        let field = parse_operators(&template.current_uri, true, true)?;
        if !matches_plain(&subject.current_uri, field) {
            return Ok(false);
        }
    }
    if !template.origin.is_empty() {
        let field = parse_operators(&template.origin, true, true)?;
        if !matches_plain(&subject.origin, field) {
            return Ok(false);
        }
    }
    // Operators in the text field are plain characters.
    if !template.text.is_empty() && subject.text != template.text {
        return Ok(false);
    }
    if !template.storage.is_empty() && subject.storage != template.storage {
        return Ok(false);
    }
    Ok(true)
}

/// True when `event` matches `template`. Unset template fields are
/// wildcards; an event matches when every set event-level field matches and
/// any of its subjects matches any of the template's subjects.
pub fn event_matches_template(
    registry: &SymbolRegistry,
    event: &Event,
    template: &Event,
) -> Result<bool> {
    if template.id != 0 && event.id != template.id {
        return Ok(false);
    }
    if !template.interpretation.is_empty() {
        let field = parse_operators(&template.interpretation, true, false)?;
        if !matches_subtree(registry, &event.interpretation, field) {
            return Ok(false);
        }
    }
    if !template.manifestation.is_empty() {
        let field = parse_operators(&template.manifestation, true, false)?;
        if !matches_subtree(registry, &event.manifestation, field) {
            return Ok(false);
        }
    }
    if !template.actor.is_empty() {
        let field = parse_operators(&template.actor, true, true)?;
        if !matches_plain(&event.actor, field) {
            return Ok(false);
        }
    }
    if !template.origin.is_empty() {
        let field = parse_operators(&template.origin, true, true)?;
        if !matches_plain(&event.origin, field) {
            return Ok(false);
        }
    }
    if template.subjects.is_empty() {
        return Ok(true);
    }
    for template_subject in &template.subjects {
        for subject in &event.subjects {
            if subject_matches(registry, subject, template_subject)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// True when `event` matches any template; an empty template list matches
/// everything.
pub fn event_matches_any(
    registry: &SymbolRegistry,
    event: &Event,
    templates: &[Event],
) -> Result<bool> {
    if templates.is_empty() {
        return Ok(true);
    }
    for template in templates {
        if event_matches_template(registry, event, template)? {
            return Ok(true);
        }
    }
    Ok(false)
}
