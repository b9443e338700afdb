//! Execute units: one routed, rewritten statement bound to one shard's
//! opened statement handle.

use std::sync::Arc;

use parking_lot::Mutex;
use shardline_common::error::ShardError;
use shardline_common::value::ParamValue;

/// Routing/rewriting output for one shard. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteUnit {
    /// Shard (data source) identifier, e.g. `ds_0`.
    pub shard: String,
    /// SQL rewritten for this shard.
    pub sql: String,
    pub parameters: Vec<ParamValue>,
}

impl RouteUnit {
    pub fn new(shard: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            shard: shard.into(),
            sql: sql.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<ParamValue>) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Key retrieval mode for update/execute calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeysMode {
    Return,
    NoReturn,
}

/// Generated-keys request forwarded verbatim to the shard's handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GeneratedKeys {
    /// Plain call; the driver's own default applies.
    #[default]
    Unspecified,
    Mode(KeysMode),
    ColumnIndexes(Vec<usize>),
    ColumnNames(Vec<String>),
}

/// An opened statement on one physical shard.
///
/// Supplied by the connection layer; the executor only calls it, never
/// opens or closes it.
pub trait ShardStatement: Send + 'static {
    /// Handle to the shard's query result.
    type ResultSet: Send + 'static;

    fn execute_query(
        &mut self,
        sql: &str,
        params: &[ParamValue],
    ) -> Result<Self::ResultSet, ShardError>;

    /// Returns the number of affected rows.
    fn execute_update(
        &mut self,
        sql: &str,
        params: &[ParamValue],
        keys: &GeneratedKeys,
    ) -> Result<u64, ShardError>;

    /// Returns true if the statement produced a result set.
    fn execute(
        &mut self,
        sql: &str,
        params: &[ParamValue],
        keys: &GeneratedKeys,
    ) -> Result<bool, ShardError>;
}

/// A route unit plus the statement handle it runs on.
///
/// Cloning is cheap (two `Arc` bumps). The handle stays locked for the whole
/// native call, so two units can never drive one handle at the same time.
pub struct ExecuteUnit<S> {
    route: Arc<RouteUnit>,
    statement: Arc<Mutex<S>>,
}

impl<S> ExecuteUnit<S> {
    pub fn new(route: RouteUnit, statement: Arc<Mutex<S>>) -> Self {
        Self {
            route: Arc::new(route),
            statement,
        }
    }

    pub fn shard(&self) -> &str {
        &self.route.shard
    }

    pub fn sql(&self) -> &str {
        &self.route.sql
    }

    pub fn parameters(&self) -> &[ParamValue] {
        &self.route.parameters
    }

    pub fn statement(&self) -> &Arc<Mutex<S>> {
        &self.statement
    }
}

impl<S> Clone for ExecuteUnit<S> {
    fn clone(&self) -> Self {
        Self {
            route: Arc::clone(&self.route),
            statement: Arc::clone(&self.statement),
        }
    }
}

impl<S> std::fmt::Debug for ExecuteUnit<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteUnit")
            .field("shard", &self.route.shard)
            .field("sql", &self.route.sql)
            .field("parameters", &self.route.parameters.len())
            .finish()
    }
}
