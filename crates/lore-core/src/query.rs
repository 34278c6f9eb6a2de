//! Query compiler: structured event templates, a time range, a storage-state
//! predicate and a result type go in; parameterised SQL against `event_view`
//! comes out.
//!
//! Multiple fields within one template are AND-combined, templates are
//! OR-combined, and a template's subject templates are OR-combined (an event
//! matches when any of its subjects matches any subject template).

use crate::matcher::{FieldModifiers, parse_operators};
use crate::models::{Event, GroupColumn, ResultType, StorageState, TimeRange};
use crate::ontology::SymbolRegistry;
use crate::error::{Error, Result};

/// Intern tables the compiler resolves through the in-memory caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VocabTable {
    Interpretation,
    Manifestation,
    Mimetype,
    Actor,
}

impl VocabTable {
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Interpretation => "interpretation",
            Self::Manifestation => "manifestation",
            Self::Mimetype => "mimetype",
            Self::Actor => "actor",
        }
    }
}

/// Read-only view of the intern caches. Lookups never create rows; a miss
/// means no event references the value.
pub trait VocabIds {
    fn existing_id(&self, table: VocabTable, value: &str) -> Option<i64>;
}

/// A positional SQL argument.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryArg {
    Int(i64),
    Text(String),
}

impl From<i64> for QueryArg {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for QueryArg {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for QueryArg {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    And,
    Or,
}

impl Relation {
    fn joiner(self) -> &'static str {
        match self {
            Self::And => " AND ",
            Self::Or => " OR ",
        }
    }
}

/// A composable SQL `WHERE` clause: a set of conditions joined by one
/// relation, with their positional arguments. Complex clauses are built by
/// nesting instances through [`WhereClause::extend`].
#[derive(Debug)]
pub struct WhereClause {
    relation: Relation,
    conditions: Vec<String>,
    arguments: Vec<QueryArg>,
    no_result_member: bool,
}

impl WhereClause {
    pub fn and() -> Self {
        Self::new(Relation::And)
    }

    pub fn or() -> Self {
        Self::new(Relation::Or)
    }

    fn new(relation: Relation) -> Self {
        Self {
            relation,
            conditions: Vec::new(),
            arguments: Vec::new(),
            no_result_member: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn add(&mut self, condition: impl Into<String>, args: impl IntoIterator<Item = QueryArg>) {
        let condition = condition.into();
        if condition.is_empty() {
            return;
        }
        self.conditions.push(condition);
        self.arguments.extend(args);
    }

    /// Merge `other` in as a single parenthesised condition.
    pub fn extend(&mut self, other: WhereClause) {
        let other_may_have_results = other.may_have_results();
        if let Some(sql) = other.sql() {
            self.conditions.push(sql);
            self.arguments.extend(other.arguments);
        }
        if !other_may_have_results {
            if self.relation == Relation::And {
                self.clear();
            }
            self.register_no_result();
        }
    }

    /// Mark that a member of this clause is known (from cached vocabulary
    /// data) to produce no rows.
    pub fn register_no_result(&mut self) {
        self.no_result_member = true;
    }

    /// False when cached data already proves the query returns nothing.
    pub fn may_have_results(&self) -> bool {
        !self.conditions.is_empty() || !self.no_result_member
    }

    fn clear(&mut self) {
        self.conditions.clear();
        self.arguments.clear();
        self.no_result_member = false;
    }

    /// Rendered SQL, or `None` when there are no conditions.
    pub fn sql(&self) -> Option<String> {
        if self.conditions.is_empty() {
            return None;
        }
        let body = self.conditions.join(self.relation.joiner());
        Some(format!("({body})"))
    }

    pub fn arguments(&self) -> &[QueryArg] {
        &self.arguments
    }

    fn into_arguments(self) -> Vec<QueryArg> {
        self.arguments
    }
}

/// Smallest string strictly greater than every string with prefix `text`,
/// or `None` when no such boundary exists (empty or all-U+10FFFF prefixes).
pub fn right_boundary(text: &str) -> Option<String> {
    let mut chars: Vec<char> = text.chars().collect();
    while let Some(&last) = chars.last() {
        if last == char::MAX {
            chars.pop();
            continue;
        }
        // The successor scalar value, stepping over the surrogate gap.
        let mut next = last as u32 + 1;
        let succ = loop {
            match char::from_u32(next) {
                Some(c) => break c,
                None => next += 1,
            }
        };
        let idx = chars.len() - 1;
        chars[idx] = succ;
        return Some(chars.into_iter().collect());
    }
    None
}

/// `SELECT id FROM <table>` restricted to values with the given prefix,
/// compiled as a range predicate so SQLite can use the value index.
fn prefix_select(table: &str, prefix: &str) -> (String, Vec<QueryArg>) {
    if prefix.is_empty() {
        // Empty prefix selects the whole value range.
        return (format!("SELECT id FROM {table}"), Vec::new());
    }
    match right_boundary(prefix) {
        Some(boundary) => (
            format!("SELECT id FROM {table} WHERE (value >= ? AND value < ?)"),
            vec![prefix.into(), boundary.into()],
        ),
        None => (
            format!("SELECT id FROM {table} WHERE value >= ?"),
            vec![prefix.into()],
        ),
    }
}

/// Add `id_column IN (prefix subselect)` (or NOT IN, with unset columns
/// matching) to `clause`.
fn add_prefix_condition(
    clause: &mut WhereClause,
    id_column: &str,
    table: &str,
    prefix: &str,
    negated: bool,
) {
    let (subselect, args) = prefix_select(table, prefix);
    if negated {
        clause.add(
            format!("({id_column} NOT IN ({subselect}) OR {id_column} IS NULL)"),
            args,
        );
    } else {
        clause.add(format!("{id_column} IN ({subselect})"), args);
    }
}

/// Add an exact match against a string-valued `event_view` column. Unset
/// columns are NULL and count as not-equal under negation.
fn add_string_condition(clause: &mut WhereClause, column: &str, value: &str, negated: bool) {
    if negated {
        clause.add(
            format!("({column} != ? OR {column} IS NULL)"),
            [value.into()],
        );
    } else {
        clause.add(format!("{column} = ?"), [value.into()]);
    }
}

/// Add an exact match against an interned id column, resolving the value
/// through the cache. Unknown values mean no event references them: a
/// positive match can never succeed, a negated one never excludes anything.
fn add_interned_condition(
    clause: &mut WhereClause,
    vocab: &dyn VocabIds,
    table: VocabTable,
    column: &str,
    value: &str,
    negated: bool,
) {
    match vocab.existing_id(table, value) {
        Some(id) => {
            if negated {
                clause.add(
                    format!("({column} != ? OR {column} IS NULL)"),
                    [id.into()],
                );
            } else {
                clause.add(format!("{column} = ?"), [id.into()]);
            }
        }
        None if negated => {}
        None => clause.register_no_result(),
    }
}

/// Add a subtree match on a hierarchical vocabulary column: the value and
/// all its descendant symbols, OR-combined, optionally negated as a whole.
fn add_subtree_condition(
    clause: &mut WhereClause,
    registry: &SymbolRegistry,
    vocab: &dyn VocabIds,
    table: VocabTable,
    column: &str,
    value: &str,
    negated: bool,
) {
    let mut ids = Vec::new();
    for symbol in registry.children_extended(value) {
        if let Some(id) = vocab.existing_id(table, &symbol) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        if !negated {
            clause.register_no_result();
        }
        return;
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    let args = ids.into_iter().map(QueryArg::from);
    if negated {
        clause.add(
            format!("({column} NOT IN ({placeholders}) OR {column} IS NULL)"),
            args,
        );
    } else {
        clause.add(format!("{column} IN ({placeholders})"), args);
    }
}

fn parse_field(value: &str, negation: bool, wildcard: bool) -> Result<FieldModifiers<'_>> {
    parse_operators(value, negation, wildcard)
}

fn compile_subject_template(
    registry: &SymbolRegistry,
    vocab: &dyn VocabIds,
    subject: &crate::models::Subject,
) -> Result<WhereClause> {
    let mut clause = WhereClause::and();

    if !subject.interpretation.is_empty() {
        let field = parse_field(&subject.interpretation, true, false)?;
        add_subtree_condition(
            &mut clause,
            registry,
            vocab,
            VocabTable::Interpretation,
            "subj_interpretation",
            field.value,
            field.negated,
        );
    }
    if !subject.manifestation.is_empty() {
        let field = parse_field(&subject.manifestation, true, false)?;
        add_subtree_condition(
            &mut clause,
            registry,
            vocab,
            VocabTable::Manifestation,
            "subj_manifestation",
            field.value,
            field.negated,
        );
    }
    if !subject.mimetype.is_empty() {
        let field = parse_field(&subject.mimetype, true, true)?;
        if field.prefix {
            add_prefix_condition(
                &mut clause,
                "subj_mimetype",
                "mimetype",
                field.value,
                field.negated,
            );
        } else {
            add_interned_condition(
                &mut clause,
                vocab,
                VocabTable::Mimetype,
                "subj_mimetype",
                field.value,
                field.negated,
            );
        }
    }
    if !subject.uri.is_empty() {
        let field = parse_field(&subject.uri, true, true)?;
        if field.prefix {
            add_prefix_condition(&mut clause, "subj_id", "uri", field.value, field.negated);
        } else {
            add_string_condition(&mut clause, "subj_uri", field.value, field.negated);
        }
    }
    if !subject.current_uri.is_empty() {
        let field = parse_field(&subject.current_uri, true, true)?;
        if field.prefix {
            add_prefix_condition(
                &mut clause,
                "subj_id_current",
                "uri",
                field.value,
                field.negated,
            );
        } else {
            add_string_condition(&mut clause, "subj_current_uri", field.value, field.negated);
        }
    }
    if !subject.origin.is_empty() {
        let field = parse_field(&subject.origin, true, true)?;
        if field.prefix {
            add_prefix_condition(
                &mut clause,
                "subj_origin",
                "uri",
                field.value,
                field.negated,
            );
        } else {
            add_string_condition(&mut clause, "subj_origin_uri", field.value, field.negated);
        }
    }
    if !subject.text.is_empty() {
        // Operators in the text field are plain characters.
        add_string_condition(&mut clause, "subj_text", &subject.text, false);
    }
    if !subject.storage.is_empty() {
        add_string_condition(&mut clause, "subj_storage", &subject.storage, false);
    }

    Ok(clause)
}

fn compile_template(
    registry: &SymbolRegistry,
    vocab: &dyn VocabIds,
    template: &Event,
) -> Result<WhereClause> {
    let mut clause = WhereClause::and();

    if template.id != 0 {
        clause.add("id = ?", [i64::from(template.id).into()]);
    }

    if !template.interpretation.is_empty() {
        let field = parse_field(&template.interpretation, true, false)?;
        add_subtree_condition(
            &mut clause,
            registry,
            vocab,
            VocabTable::Interpretation,
            "interpretation",
            field.value,
            field.negated,
        );
    }
    if !template.manifestation.is_empty() {
        let field = parse_field(&template.manifestation, true, false)?;
        add_subtree_condition(
            &mut clause,
            registry,
            vocab,
            VocabTable::Manifestation,
            "manifestation",
            field.value,
            field.negated,
        );
    }
    if !template.actor.is_empty() {
        let field = parse_field(&template.actor, true, true)?;
        if field.prefix {
            add_prefix_condition(&mut clause, "actor", "actor", field.value, field.negated);
        } else {
            add_interned_condition(
                &mut clause,
                vocab,
                VocabTable::Actor,
                "actor",
                field.value,
                field.negated,
            );
        }
    }
    if !template.origin.is_empty() {
        let field = parse_field(&template.origin, true, true)?;
        if field.prefix {
            add_prefix_condition(&mut clause, "origin", "uri", field.value, field.negated);
        } else {
            add_string_condition(&mut clause, "event_origin_uri", field.value, field.negated);
        }
    }

    if !template.subjects.is_empty() {
        let mut subjects_or = WhereClause::or();
        for subject in &template.subjects {
            let subject_clause = compile_subject_template(registry, vocab, subject)?;
            subjects_or.extend(subject_clause);
        }
        clause.extend(subjects_or);
    }

    Ok(clause)
}

/// Build the complete filter clause for a find query.
pub fn build_event_filter(
    registry: &SymbolRegistry,
    vocab: &dyn VocabIds,
    time_range: TimeRange,
    templates: &[Event],
    storage_state: StorageState,
) -> Result<WhereClause> {
    let mut clause = WhereClause::and();

    // The unary + keeps SQLite from planning the query around the
    // timestamp index, which loses against the filter indexes here.
    if time_range.begin != 0 {
        clause.add("+timestamp >= ?", [time_range.begin.into()]);
    }
    if time_range.end != i64::MAX {
        clause.add("+timestamp < ?", [time_range.end.into()]);
    }

    match storage_state {
        StorageState::Available | StorageState::NotAvailable => {
            clause.add(
                "(subj_storage_state = ? OR subj_storage_state IS NULL)",
                [(storage_state as i64).into()],
            );
        }
        StorageState::Any => {}
    }

    let mut templates_or = WhereClause::or();
    for template in templates {
        let template_clause = compile_template(registry, vocab, template)?;
        templates_or.extend(template_clause);
    }
    clause.extend(templates_or);

    Ok(clause)
}

/// Candidate multiplier for coalescing result types: the shaper collapses
/// rows per group key, so the store hands over extra rows to keep the
/// caller's limit reachable.
pub const COALESCE_OVER_FETCH: u32 = 3;

/// A ready-to-run find statement.
#[derive(Debug)]
pub struct FindQuery {
    pub sql: String,
    pub args: Vec<QueryArg>,
    /// Grouping column selected as `group_key`, present for coalescing
    /// result types.
    pub group_column: Option<GroupColumn>,
}

/// Compile the full find statement for the given result type. Returns
/// `None` when cached vocabulary data proves the result is empty.
pub fn build_find_query(
    filter: WhereClause,
    result_type: ResultType,
    limit: u32,
) -> Result<Option<FindQuery>> {
    if result_type == ResultType::Relevancy {
        return Err(Error::InvalidArgument(
            "relevancy ordering requires a full-text search".into(),
        ));
    }
    if !filter.may_have_results() {
        return Ok(None);
    }

    let group_column = result_type.group_column();
    let mut sql = match group_column {
        Some(column) => format!(
            "SELECT id, timestamp, {} AS group_key FROM event_view",
            column.view_column()
        ),
        None => "SELECT DISTINCT id, timestamp FROM event_view".to_string(),
    };

    if let Some(where_sql) = filter.sql() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }

    sql.push_str(if result_type.time_ascending() {
        " ORDER BY timestamp ASC"
    } else {
        " ORDER BY timestamp DESC"
    });

    if limit > 0 {
        let fetch = if group_column.is_some() {
            limit.saturating_mul(COALESCE_OVER_FETCH)
        } else {
            limit
        };
        sql.push_str(&format!(" LIMIT {fetch}"));
    }

    Ok(Some(FindQuery {
        sql,
        args: filter.into_arguments(),
        group_column,
    }))
}
