//! Per-unit outcomes and how they combine into one logical result.

use shardline_common::error::{ShardlineError, ShardlineResult};

use crate::unit::GeneratedKeys;

/// Declared shape of the logical statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlShape {
    Query,
    Update,
}

impl std::fmt::Display for SqlShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlShape::Query => write!(f, "query"),
            SqlShape::Update => write!(f, "update"),
        }
    }
}

/// Which native entry point a call drives, fixed once per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementOperation {
    Query,
    Update(GeneratedKeys),
    Execute(GeneratedKeys),
}

impl StatementOperation {
    pub fn label(&self) -> &'static str {
        match self {
            StatementOperation::Query => "query",
            StatementOperation::Update(_) => "update",
            StatementOperation::Execute(_) => "execute",
        }
    }

    /// Outcome recorded for a unit whose failure was absorbed.
    pub fn degraded<H>(&self) -> UnitOutcome<H> {
        match self {
            StatementOperation::Query => UnitOutcome::Query(None),
            StatementOperation::Update(_) => UnitOutcome::Update(0),
            StatementOperation::Execute(_) => UnitOutcome::Execute(false),
        }
    }
}

/// One unit's outcome.
#[derive(Debug)]
pub enum UnitOutcome<H> {
    /// `None` when the unit failed and the failure was absorbed.
    Query(Option<H>),
    Update(u64),
    /// Whether the unit produced a result set.
    Execute(bool),
}

/// The logical outcome of a call.
#[derive(Debug)]
pub enum AggregatedResult<H> {
    /// One slot per unit, in unit order; never compacted.
    Query(Vec<Option<H>>),
    Update(u64),
    Execute(bool),
}

impl<H> AggregatedResult<H> {
    pub fn into_query(self) -> Option<Vec<Option<H>>> {
        match self {
            AggregatedResult::Query(v) => Some(v),
            _ => None,
        }
    }

    pub fn update_count(&self) -> Option<u64> {
        match self {
            AggregatedResult::Update(n) => Some(*n),
            _ => None,
        }
    }

    pub fn has_result_set(&self) -> Option<bool> {
        match self {
            AggregatedResult::Execute(b) => Some(*b),
            _ => None,
        }
    }
}

/// Sum update counts, reporting overflow instead of wrapping.
pub fn sum_update_counts<I>(counts: I) -> ShardlineResult<u64>
where
    I: IntoIterator<Item = u64>,
{
    let mut total = 0u64;
    let mut units = 0usize;
    for c in counts {
        units += 1;
        total = total
            .checked_add(c)
            .ok_or(ShardlineError::UpdateCountOverflow { units })?;
    }
    Ok(total)
}

/// True if any unit produced a result set.
pub fn any_result_set<I>(flags: I) -> bool
where
    I: IntoIterator<Item = bool>,
{
    flags.into_iter().fold(false, |acc, b| acc | b)
}

/// Combine outcomes according to `operation`.
pub fn aggregate<H>(
    operation: &StatementOperation,
    outcomes: Vec<UnitOutcome<H>>,
) -> ShardlineResult<AggregatedResult<H>> {
    let units = outcomes.len();
    let mismatch = |got: &str| {
        ShardlineError::internal_bug(
            "E-AGG-001",
            format!("{} outcome in a {} call", got, operation.label()),
            format!("units={}", units),
        )
    };
    match operation {
        StatementOperation::Query => {
            let mut handles = Vec::with_capacity(outcomes.len());
            for o in outcomes {
                match o {
                    UnitOutcome::Query(h) => handles.push(h),
                    UnitOutcome::Update(_) => return Err(mismatch("update")),
                    UnitOutcome::Execute(_) => return Err(mismatch("execute")),
                }
            }
            Ok(AggregatedResult::Query(handles))
        }
        StatementOperation::Update(_) => {
            let mut counts = Vec::with_capacity(outcomes.len());
            for o in outcomes {
                match o {
                    UnitOutcome::Update(n) => counts.push(n),
                    UnitOutcome::Query(_) => return Err(mismatch("query")),
                    UnitOutcome::Execute(_) => return Err(mismatch("execute")),
                }
            }
            sum_update_counts(counts).map(AggregatedResult::Update)
        }
        StatementOperation::Execute(_) => {
            let mut flags = Vec::with_capacity(outcomes.len());
            for o in outcomes {
                match o {
                    UnitOutcome::Execute(b) => flags.push(b),
                    UnitOutcome::Query(_) => return Err(mismatch("query")),
                    UnitOutcome::Update(_) => return Err(mismatch("update")),
                }
            }
            Ok(AggregatedResult::Execute(any_result_set(flags)))
        }
    }
}
