//! Filtered queries with nested sub-queries
//!
//! A [`Query`] wraps a source cursor and a [`FilterConfig`]. For every root
//! element accepted by the filter it yields the root (unless sub-queries
//! exist without `select`) followed by each sub-query's flattened stream,
//! driven by a four-state machine so evaluation stays lazy.

use std::fmt;
use std::rc::Rc;

use regex::Regex;
use serde_json::Value;

use super::{ArrayCursor, Cursor};
use crate::domain::{Domain, ModelElement};
use crate::errors::{HyperstoreError, Result};
use crate::value_objects::ElementId;

/// How a property condition matches
#[derive(Clone)]
pub enum PropertyMatch {
    /// Exact equality on the property value
    Eq(Value),
    /// Regex test on a string-valued property
    Pattern(Regex),
    /// Nested filter evaluated against the element the property points at
    Nested(Box<FilterConfig>),
}

impl fmt::Debug for PropertyMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyMatch::Eq(v) => write!(f, "Eq({v})"),
            PropertyMatch::Pattern(re) => write!(f, "Pattern({re})"),
            PropertyMatch::Nested(_) => f.write_str("Nested(..)"),
        }
    }
}

/// Declarative filter over elements.
///
/// All conditions are AND-combined; an `or` branch passes when at least one
/// of its conditions holds (evaluated by re-entering the filter with an
/// inverted truth flag). `skip`/`take` page over accepted roots after
/// filtering; `select` forces emission of the root alongside sub-queries.
#[derive(Clone, Default)]
pub struct FilterConfig {
    matches: Vec<(String, PropertyMatch)>,
    id: Option<ElementId>,
    schema: Option<String>,
    predicate: Option<Rc<dyn Fn(&ModelElement) -> bool>>,
    or: Option<Box<FilterConfig>>,
    skip: usize,
    take: Option<usize>,
    select: bool,
    sub_queries: Vec<(String, FilterConfig)>,
}

impl FilterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact-equality condition on a property
    pub fn matching(mut self, property: impl Into<String>, value: Value) -> Self {
        self.matches.push((property.into(), PropertyMatch::Eq(value)));
        self
    }

    /// Regex condition on a string-valued property
    pub fn matching_pattern(mut self, property: impl Into<String>, pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| HyperstoreError::InvalidArgument(format!("invalid pattern: {e}")))?;
        self.matches.push((property.into(), PropertyMatch::Pattern(re)));
        Ok(self)
    }

    /// Nested condition on the element a property points at (by id)
    pub fn matching_expr(mut self, property: impl Into<String>, config: FilterConfig) -> Self {
        self.matches.push((property.into(), PropertyMatch::Nested(Box::new(config))));
        self
    }

    /// Element-id condition
    pub fn with_id(mut self, id: ElementId) -> Self {
        self.id = Some(id);
        self
    }

    /// Exact schema condition, by id or unambiguous simple name
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Opaque user predicate
    pub fn filter(mut self, predicate: impl Fn(&ModelElement) -> bool + 'static) -> Self {
        self.predicate = Some(Rc::new(predicate));
        self
    }

    /// OR-combined branch
    pub fn or(mut self, config: FilterConfig) -> Self {
        self.or = Some(Box::new(config));
        self
    }

    /// Skip the first `n` accepted roots
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    /// Stop after `n` accepted roots
    pub fn take(mut self, n: usize) -> Self {
        self.take = Some(n);
        self
    }

    /// Emit the root even when sub-queries are present
    pub fn select(mut self) -> Self {
        self.select = true;
        self
    }

    /// Follow a reference of the root schema and stream the nested query's
    /// results after the root
    pub fn sub_query(mut self, reference: impl Into<String>, config: FilterConfig) -> Self {
        self.sub_queries.push((reference.into(), config));
        self
    }

    pub(crate) fn schema_name(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}

impl fmt::Debug for FilterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterConfig")
            .field("matches", &self.matches)
            .field("id", &self.id)
            .field("schema", &self.schema)
            .field("skip", &self.skip)
            .field("take", &self.take)
            .field("select", &self.select)
            .field("sub_queries", &self.sub_queries.len())
            .finish_non_exhaustive()
    }
}

/// Evaluate a config against an element. With `truth == true` this is the
/// AND of all conditions; the `or` branch re-enters with the flag inverted,
/// so that "not all inverted conditions hold" reads as OR.
fn eval(domain: &Domain, config: &FilterConfig, element: &ModelElement, truth: bool) -> bool {
    for (name, m) in &config.matches {
        let value = element.get_property_value(name).ok().and_then(|p| p.value);
        let holds = match m {
            PropertyMatch::Eq(expected) => value.as_ref() == Some(expected),
            PropertyMatch::Pattern(re) => {
                value.as_ref().and_then(Value::as_str).map(|s| re.is_match(s)).unwrap_or(false)
            }
            PropertyMatch::Nested(nested) => value
                .as_ref()
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<ElementId>().ok())
                .and_then(|id| domain.get(&id))
                .map(|child| eval(domain, nested, &child, true))
                .unwrap_or(false),
        };
        if holds != truth {
            return false;
        }
    }
    if let Some(id) = &config.id {
        if (element.id() == id) != truth {
            return false;
        }
    }
    if let Some(schema) = &config.schema {
        let holds = domain
            .inner
            .store()
            .ok()
            .and_then(|store| store.schemas.borrow().try_get_schema_info(schema))
            .map(|el| element.schema_id().eq_ignore_case(el.id()))
            .unwrap_or(false);
        if holds != truth {
            return false;
        }
    }
    if let Some(predicate) = &config.predicate {
        if predicate(element) != truth {
            return false;
        }
    }
    if let Some(or) = &config.or {
        let holds = !eval(domain, or, element, !truth);
        if holds != truth {
            return false;
        }
    }
    true
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum QueryState {
    SeekRoot,
    IterSubqueries,
    PumpSubquery,
    Done,
}

/// Lazy filtered cursor over a domain, with nested sub-queries
pub struct Query {
    domain: Domain,
    source: Box<dyn Cursor<Item = ModelElement>>,
    config: FilterConfig,
    state: QueryState,
    accepted: usize,
    skipped: usize,
    root: Option<ModelElement>,
    sub_index: usize,
    active: Option<Box<Query>>,
    current: Option<ModelElement>,
}

impl Query {
    pub(crate) fn new(
        domain: Domain,
        source: Box<dyn Cursor<Item = ModelElement>>,
        config: FilterConfig,
    ) -> Self {
        Self {
            domain,
            source,
            config,
            state: QueryState::SeekRoot,
            accepted: 0,
            skipped: 0,
            root: None,
            sub_index: 0,
            active: None,
            current: None,
        }
    }
}

impl Cursor for Query {
    type Item = ModelElement;

    fn has_next(&mut self) -> bool {
        loop {
            match self.state {
                QueryState::Done => {
                    self.current = None;
                    return false;
                }
                QueryState::SeekRoot => {
                    if self.config.take.is_some_and(|take| self.accepted >= take) {
                        self.state = QueryState::Done;
                        continue;
                    }
                    if !self.source.has_next() {
                        self.state = QueryState::Done;
                        continue;
                    }
                    let element = match self.source.next() {
                        Some(e) => e,
                        None => {
                            self.state = QueryState::Done;
                            continue;
                        }
                    };
                    if !eval(&self.domain, &self.config, &element, true) {
                        continue;
                    }
                    if self.skipped < self.config.skip {
                        self.skipped += 1;
                        continue;
                    }
                    self.accepted += 1;
                    let has_subs = !self.config.sub_queries.is_empty();
                    if has_subs {
                        self.root = Some(element.clone());
                        self.sub_index = 0;
                        self.state = QueryState::IterSubqueries;
                    }
                    if !has_subs || self.config.select {
                        self.current = Some(element);
                        return true;
                    }
                }
                QueryState::IterSubqueries => {
                    if self.sub_index >= self.config.sub_queries.len() {
                        self.root = None;
                        self.state = QueryState::SeekRoot;
                        continue;
                    }
                    let root = match &self.root {
                        Some(r) => r.clone(),
                        None => {
                            self.state = QueryState::SeekRoot;
                            continue;
                        }
                    };
                    let (reference, sub_config) = self.config.sub_queries[self.sub_index].clone();
                    let elements = root.related(&reference).unwrap_or_default();
                    self.active = Some(Box::new(Query::new(
                        self.domain.clone(),
                        Box::new(ArrayCursor::new(elements)),
                        sub_config,
                    )));
                    self.state = QueryState::PumpSubquery;
                }
                QueryState::PumpSubquery => {
                    if let Some(active) = self.active.as_mut() {
                        if active.has_next() {
                            self.current = active.next();
                            return true;
                        }
                    }
                    self.active = None;
                    self.sub_index += 1;
                    self.state = QueryState::IterSubqueries;
                }
            }
        }
    }

    fn next(&mut self) -> Option<ModelElement> {
        self.current.clone()
    }

    fn reset(&mut self) {
        self.source.reset();
        self.state = QueryState::SeekRoot;
        self.accepted = 0;
        self.skipped = 0;
        self.root = None;
        self.sub_index = 0;
        self.active = None;
        self.current = None;
    }
}
