//! Schema constraints and validation diagnostics
//!
//! Constraints are opaque predicates attached to schema elements or to
//! individual properties. `Check` constraints run when a property is set and
//! again at session commit; `Validate` constraints run only at commit and
//! never abort.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::ModelElement;
use crate::value_objects::ElementId;

/// When a constraint is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Evaluated on property set and on session commit
    Check,
    /// Evaluated on session commit only; violations are reported, not fatal
    Validate,
}

/// Severity of a reported diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticSeverity {
    Warning,
    Error,
}

/// A violation or validation message collected during a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticMessage {
    pub severity: DiagnosticSeverity,
    pub message: String,
    pub element_id: ElementId,
    pub property_name: Option<String>,
}

impl fmt::Display for DiagnosticMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property_name {
            Some(p) => write!(f, "[{:?}] {} ({}.{})", self.severity, self.message, self.element_id, p),
            None => write!(f, "[{:?}] {} ({})", self.severity, self.message, self.element_id),
        }
    }
}

/// Evaluation context handed to a constraint predicate
pub struct ConstraintContext<'a> {
    /// The element under validation
    pub element: &'a ModelElement,
    /// The property under validation, when the constraint is property-scoped
    pub property_name: Option<&'a str>,
}

impl ConstraintContext<'_> {
    /// Current value of the property under validation, defaults included
    pub fn value(&self) -> Option<Value> {
        let name = self.property_name?;
        self.element.get_property_value(name).ok().and_then(|p| p.value)
    }
}

type Condition = Rc<dyn Fn(&ConstraintContext<'_>) -> bool>;

/// A named predicate over a [`ConstraintContext`].
///
/// The predicate returns `true` when the constraint holds. A failing `Check`
/// with `as_error` set aborts the enclosing session.
#[derive(Clone)]
pub struct Constraint {
    kind: ConstraintKind,
    message: String,
    as_error: bool,
    condition: Condition,
}

impl Constraint {
    /// A check constraint that aborts the session on failure
    pub fn check(
        message: impl Into<String>,
        condition: impl Fn(&ConstraintContext<'_>) -> bool + 'static,
    ) -> Self {
        Self {
            kind: ConstraintKind::Check,
            message: message.into(),
            as_error: true,
            condition: Rc::new(condition),
        }
    }

    /// A check constraint that only reports a warning on failure
    pub fn check_warning(
        message: impl Into<String>,
        condition: impl Fn(&ConstraintContext<'_>) -> bool + 'static,
    ) -> Self {
        Self {
            kind: ConstraintKind::Check,
            message: message.into(),
            as_error: false,
            condition: Rc::new(condition),
        }
    }

    /// A validation constraint, reported at commit without aborting
    pub fn validate(
        message: impl Into<String>,
        condition: impl Fn(&ConstraintContext<'_>) -> bool + 'static,
    ) -> Self {
        Self {
            kind: ConstraintKind::Validate,
            message: message.into(),
            as_error: false,
            condition: Rc::new(condition),
        }
    }

    pub fn kind(&self) -> ConstraintKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn as_error(&self) -> bool {
        self.as_error
    }

    /// Run the predicate; `true` means the constraint holds
    pub fn evaluate(&self, ctx: &ConstraintContext<'_>) -> bool {
        (self.condition)(ctx)
    }

    /// Build the diagnostic reported when this constraint fails
    pub(crate) fn diagnostic(&self, element_id: ElementId, property: Option<&str>) -> DiagnosticMessage {
        DiagnosticMessage {
            severity: if self.as_error && self.kind == ConstraintKind::Check {
                DiagnosticSeverity::Error
            } else {
                DiagnosticSeverity::Warning
            },
            message: self.message.clone(),
            element_id,
            property_name: property.map(str::to_owned),
        }
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constraint")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("as_error", &self.as_error)
            .finish_non_exhaustive()
    }
}
