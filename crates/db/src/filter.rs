//! Predicate trees over generation records.
//!
//! A [`GenerationFilter`] is evaluated two ways: rendered into a SQL
//! `WHERE` clause for PostgreSQL, or matched directly against records held
//! in memory. Both renderings share document-store semantics: equality never
//! matches a missing value, while inequality does.

use charforge_core::tracking::TrackingState;
use charforge_core::types::DbId;
use sqlx::{Postgres, QueryBuilder};

use crate::models::generation::GenerationRecord;

/// Columns a filter may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationField {
    CharacterId,
    ExternalJobId,
    TrackingState,
    IsPolling,
}

impl GenerationField {
    fn column(self) -> &'static str {
        match self {
            Self::CharacterId => "character_id",
            Self::ExternalJobId => "external_job_id",
            Self::TrackingState => "tracking_state",
            Self::IsPolling => "is_polling",
        }
    }

    /// Current value of this field on a record, `None` when unset.
    fn value_of(self, record: &GenerationRecord) -> Option<FieldValue> {
        match self {
            Self::CharacterId => record.character_id.map(FieldValue::Id),
            Self::ExternalJobId => record.external_job_id.clone().map(FieldValue::Text),
            Self::TrackingState => Some(FieldValue::State(record.tracking_state)),
            Self::IsPolling => record.is_polling.map(FieldValue::Bool),
        }
    }
}

/// A literal compared against a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Id(DbId),
    Text(String),
    State(TrackingState),
    Bool(bool),
}

/// Boolean predicate over [`GenerationField`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationFilter {
    /// Field is set and equal to the value.
    Eq(GenerationField, FieldValue),
    /// Field is unset or differs from the value.
    NotEq(GenerationField, FieldValue),
    /// Field is set.
    Exists(GenerationField),
    /// Every child matches. An empty list matches everything.
    And(Vec<GenerationFilter>),
    /// At least one child matches. An empty list matches nothing.
    Or(Vec<GenerationFilter>),
}

impl GenerationFilter {
    /// Records the tracker must poll this cycle.
    ///
    /// `is_polling = true`, or a submitted job that is still processing and
    /// whose flag was never explicitly cleared. The second branch recovers
    /// records where a partial write left `is_polling` unset.
    pub fn trackable() -> Self {
        Self::Or(vec![
            Self::Eq(GenerationField::IsPolling, FieldValue::Bool(true)),
            Self::And(vec![
                Self::Exists(GenerationField::ExternalJobId),
                Self::Eq(
                    GenerationField::TrackingState,
                    FieldValue::State(TrackingState::Processing),
                ),
                Self::NotEq(GenerationField::IsPolling, FieldValue::Bool(false)),
            ]),
        ])
    }

    /// Records a new 3D job may be submitted for: anything not currently
    /// processing with polling enabled.
    pub fn untracked() -> Self {
        Self::Or(vec![
            Self::NotEq(
                GenerationField::TrackingState,
                FieldValue::State(TrackingState::Processing),
            ),
            Self::Eq(GenerationField::IsPolling, FieldValue::Bool(false)),
        ])
    }

    /// Records still in `state` and, when given, still bound to `job_id`.
    ///
    /// Guards a write computed from an earlier read against a resubmission
    /// that happened in between.
    pub fn unchanged(state: TrackingState, job_id: Option<&str>) -> Self {
        let mut clauses = vec![Self::Eq(
            GenerationField::TrackingState,
            FieldValue::State(state),
        )];
        if let Some(job_id) = job_id {
            clauses.push(Self::by_external_job_id(job_id));
        }
        Self::And(clauses)
    }

    /// Records carrying the given provider job id.
    pub fn by_external_job_id(job_id: impl Into<String>) -> Self {
        Self::Eq(
            GenerationField::ExternalJobId,
            FieldValue::Text(job_id.into()),
        )
    }

    /// Evaluate against an in-memory record.
    pub fn matches(&self, record: &GenerationRecord) -> bool {
        match self {
            Self::Eq(field, value) => field.value_of(record).as_ref() == Some(value),
            Self::NotEq(field, value) => field.value_of(record).as_ref() != Some(value),
            Self::Exists(field) => field.value_of(record).is_some(),
            Self::And(children) => children.iter().all(|c| c.matches(record)),
            Self::Or(children) => children.iter().any(|c| c.matches(record)),
        }
    }

    /// Append this predicate as SQL, binding every literal.
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Self::Eq(field, value) => {
                qb.push(field.column()).push(" = ");
                push_value(qb, value);
            }
            Self::NotEq(field, value) => {
                qb.push(field.column()).push(" IS DISTINCT FROM ");
                push_value(qb, value);
            }
            Self::Exists(field) => {
                qb.push(field.column()).push(" IS NOT NULL");
            }
            Self::And(children) => push_group(qb, children, " AND ", "TRUE"),
            Self::Or(children) => push_group(qb, children, " OR ", "FALSE"),
        }
    }
}

fn push_group(
    qb: &mut QueryBuilder<'_, Postgres>,
    children: &[GenerationFilter],
    joiner: &str,
    empty: &str,
) {
    if children.is_empty() {
        qb.push(empty);
        return;
    }
    qb.push("(");
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            qb.push(joiner);
        }
        child.push_sql(qb);
    }
    qb.push(")");
}

fn push_value(qb: &mut QueryBuilder<'_, Postgres>, value: &FieldValue) {
    match value {
        FieldValue::Id(id) => qb.push_bind(*id),
        FieldValue::Text(text) => qb.push_bind(text.clone()),
        FieldValue::State(state) => qb.push_bind(state.as_str()),
        FieldValue::Bool(flag) => qb.push_bind(*flag),
    };
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
