//! Declarative metadata attached to DAO interfaces and their methods.
//!
//! An `InterfaceDecl` is the sidecar table describing what each method means:
//! its parameters and return shape, the SQL it runs (or the SQL id to look up),
//! and which cross-cutting behaviours wrap it. The planner turns these into
//! `QueryDescriptor`s and method plans once, at bind time.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::call::Arg;
use crate::error::Result;
use crate::naming::NamingPolicy;
use crate::shape::TypeShape;
use crate::sql::ParsedSql;
use crate::value::Value;

/// SQL statement family of a declarative operation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    Select,
    Insert,
    Update,
    Delete,
    Call,
}

impl Verb {
    pub fn is_write(self) -> bool {
        matches!(self, Verb::Insert | Verb::Update | Verb::Delete)
    }
}

/// Resolved category of a data-access method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Decide from the method shape.
    #[default]
    Default,
    Exists,
    /// At most one row; more is a `DuplicatedResult` error.
    Get,
    FindFirst,
    List,
    /// Whole row set.
    Query,
    Stream,
    /// First column of the first row.
    QueryForSingle,
    Update,
    LargeUpdate,
    Call,
}

/// Declarative operation tag of one method (Select/NamedSelect/Insert/...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpTag {
    pub verb: Verb,
    /// Named query: bound by parameter name rather than position.
    #[serde(default)]
    pub named: bool,
    /// Inline SQL text.
    #[serde(default)]
    pub sql: Option<String>,
    /// Id looked up in the external SQL mapper.
    #[serde(default)]
    pub id: Option<String>,
    /// Query timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u32>,
    /// Select family only.
    #[serde(default)]
    pub fetch_size: Option<u32>,
    /// Write family only.
    #[serde(default)]
    pub batch: bool,
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Treat a collection argument as one value instead of spreading it.
    #[serde(default)]
    pub single_parameter: bool,
    #[serde(default)]
    pub kind: OperationKind,
}

impl OpTag {
    fn new(verb: Verb, named: bool, sql: impl Into<String>) -> Self {
        Self {
            verb,
            named,
            sql: Some(sql.into()),
            id: None,
            timeout: None,
            fetch_size: None,
            batch: false,
            batch_size: None,
            single_parameter: false,
            kind: OperationKind::Default,
        }
    }

    pub fn select(sql: impl Into<String>) -> Self {
        Self::new(Verb::Select, false, sql)
    }

    pub fn named_select(sql: impl Into<String>) -> Self {
        Self::new(Verb::Select, true, sql)
    }

    pub fn insert(sql: impl Into<String>) -> Self {
        Self::new(Verb::Insert, false, sql)
    }

    pub fn named_insert(sql: impl Into<String>) -> Self {
        Self::new(Verb::Insert, true, sql)
    }

    pub fn update(sql: impl Into<String>) -> Self {
        Self::new(Verb::Update, false, sql)
    }

    pub fn named_update(sql: impl Into<String>) -> Self {
        Self::new(Verb::Update, true, sql)
    }

    pub fn delete(sql: impl Into<String>) -> Self {
        Self::new(Verb::Delete, false, sql)
    }

    pub fn named_delete(sql: impl Into<String>) -> Self {
        Self::new(Verb::Delete, true, sql)
    }

    pub fn call(sql: impl Into<String>) -> Self {
        Self::new(Verb::Call, false, sql)
    }

    /// Reference SQL by mapper id instead of inline text.
    pub fn by_id(verb: Verb, named: bool, id: impl Into<String>) -> Self {
        Self {
            sql: None,
            id: Some(id.into()),
            ..Self::new(verb, named, String::new())
        }
    }

    pub fn kind(mut self, kind: OperationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn timeout(mut self, secs: u32) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn fetch_size(mut self, n: u32) -> Self {
        self.fetch_size = Some(n);
        self
    }

    pub fn batch(mut self, size: usize) -> Self {
        self.batch = true;
        self.batch_size = Some(size);
        self
    }

    pub fn single_parameter(mut self) -> Self {
        self.single_parameter = true;
        self
    }
}

/// Normalized, immutable description of the query a method runs.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    pub sql: ParsedSql,
    pub query_timeout: Option<u32>,
    pub fetch_size: Option<u32>,
    pub is_batch: bool,
    pub batch_size: usize,
    pub verb: Verb,
    pub kind: OperationKind,
    pub named: bool,
    pub single_parameter: bool,
}

impl QueryDescriptor {
    pub fn text(&self) -> &str {
        self.sql.original()
    }
}

/// Transaction propagation of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Propagation {
    /// Use the ambient transaction if any, else run standalone.
    #[default]
    Supports,
    /// Join the ambient transaction, or begin one around the call.
    Required,
    /// Suspend the ambient transaction and run in a fresh one.
    RequiresNew,
    /// Run with no ambient transaction visible.
    NotSupported,
}

/// How cached snapshots are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transfer {
    #[default]
    PassThrough,
    /// Defensive deep copy on both put and hit.
    Copy,
}

/// Per-method result caching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheResult {
    #[serde(default)]
    pub live_time_ms: Option<u64>,
    #[serde(default)]
    pub idle_time_ms: Option<u64>,
    #[serde(default)]
    pub min_size: usize,
    #[serde(default = "unbounded")]
    pub max_size: usize,
    #[serde(default)]
    pub transfer: Transfer,
}

fn unbounded() -> usize {
    usize::MAX
}

impl Default for CacheResult {
    fn default() -> Self {
        Self {
            live_time_ms: None,
            idle_time_ms: None,
            min_size: 0,
            max_size: usize::MAX,
            transfer: Transfer::PassThrough,
        }
    }
}

impl CacheResult {
    pub fn sized(min_size: usize, max_size: usize) -> Self {
        Self {
            min_size,
            max_size,
            ..Self::default()
        }
    }
}

/// Interface-level cache store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub capacity: usize,
    pub evict_delay_ms: u64,
}

/// Performance sampling thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerfLog {
    #[serde(default)]
    pub min_operation_ms: u64,
    #[serde(default)]
    pub min_sql_ms: u64,
}

/// Glob-style method name filter; empty matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodFilter(pub Vec<String>);

impl MethodFilter {
    pub fn all() -> Self {
        Self(Vec::new())
    }

    pub fn of(patterns: &[&str]) -> Self {
        Self(patterns.iter().map(|p| p.to_string()).collect())
    }

    pub fn matches(&self, name: &str) -> bool {
        self.0.is_empty() || self.0.iter().any(|p| glob_match(p, name))
    }
}

fn glob_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }
    let mut rest = name;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

/// Accessor invoked in place of a plan for non-database methods.
#[derive(Clone)]
pub struct AccessorFn(pub Arc<dyn Fn(&[Arg]) -> Result<Value> + Send + Sync>);

impl fmt::Debug for AccessorFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessorFn(..)")
    }
}

impl PartialEq for AccessorFn {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Response of a method that never touches the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonDb {
    Constant(Value),
    EntityName,
    TableName,
    DataSourceId,
    #[serde(skip)]
    Accessor(AccessorFn),
}

impl NonDb {
    pub fn accessor(f: impl Fn(&[Arg]) -> Result<Value> + Send + Sync + 'static) -> Self {
        NonDb::Accessor(AccessorFn(Arc::new(f)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub shape: TypeShape,
    /// Binding-name tag for named queries.
    #[serde(default)]
    pub bind: Option<String>,
    /// Template tag: substitutes `{name}` in the SQL text at call time.
    #[serde(default)]
    pub define: Option<String>,
}

impl ParamDecl {
    pub fn new(shape: TypeShape) -> Self {
        Self {
            shape,
            bind: None,
            define: None,
        }
    }

    pub fn bind(mut self, name: impl Into<String>) -> Self {
        self.bind = Some(name.into());
        self
    }

    pub fn define(mut self, name: impl Into<String>) -> Self {
        self.define = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDecl {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
    #[serde(default = "unit_shape")]
    pub returns: TypeShape,
    #[serde(default)]
    pub op: Option<OpTag>,
    #[serde(default)]
    pub transactional: Option<Propagation>,
    #[serde(default)]
    pub cache: Option<CacheResult>,
    #[serde(default)]
    pub refresh_cache: bool,
    #[serde(default)]
    pub hooks: Vec<String>,
    #[serde(default)]
    pub perf_log: Option<PerfLog>,
    #[serde(default)]
    pub sql_log: Option<bool>,
    #[serde(default)]
    pub non_db: Option<NonDb>,
}

fn unit_shape() -> TypeShape {
    TypeShape::Unit
}

impl MethodDecl {
    pub fn new(name: impl Into<String>, returns: TypeShape) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns,
            op: None,
            transactional: None,
            cache: None,
            refresh_cache: false,
            hooks: Vec::new(),
            perf_log: None,
            sql_log: None,
            non_db: None,
        }
    }

    pub fn param(mut self, p: ParamDecl) -> Self {
        self.params.push(p);
        self
    }

    /// Positional (untagged) parameter.
    pub fn arg(self, shape: TypeShape) -> Self {
        self.param(ParamDecl::new(shape))
    }

    /// Parameter carrying a binding-name tag.
    pub fn named_arg(self, name: impl Into<String>, shape: TypeShape) -> Self {
        self.param(ParamDecl::new(shape).bind(name))
    }

    pub fn op(mut self, tag: OpTag) -> Self {
        self.op = Some(tag);
        self
    }

    pub fn transactional(mut self, p: Propagation) -> Self {
        self.transactional = Some(p);
        self
    }

    pub fn cached(mut self, c: CacheResult) -> Self {
        self.cache = Some(c);
        self
    }

    pub fn refresh_cache(mut self) -> Self {
        self.refresh_cache = true;
        self
    }

    pub fn hook(mut self, name: impl Into<String>) -> Self {
        self.hooks.push(name.into());
        self
    }

    pub fn perf_log(mut self, p: PerfLog) -> Self {
        self.perf_log = Some(p);
        self
    }

    pub fn sql_log(mut self, on: bool) -> Self {
        self.sql_log = Some(on);
        self
    }

    pub fn non_db(mut self, n: NonDb) -> Self {
        self.non_db = Some(n);
        self
    }

    pub fn last_param(&self) -> Option<&ParamDecl> {
        self.params.last()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDecl {
    pub name: String,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default = "any_shape")]
    pub shape: TypeShape,
    #[serde(default = "yes")]
    pub insertable: bool,
    #[serde(default = "yes")]
    pub updatable: bool,
}

fn any_shape() -> TypeShape {
    TypeShape::Any
}

fn yes() -> bool {
    true
}

impl PropertyDecl {
    pub fn new(name: impl Into<String>, shape: TypeShape) -> Self {
        Self {
            name: name.into(),
            column: None,
            shape,
            insertable: true,
            updatable: true,
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.insertable = false;
        self.updatable = false;
        self
    }

    pub fn column_name(&self, naming: NamingPolicy) -> String {
        self.column
            .clone()
            .unwrap_or_else(|| naming.apply(&self.name))
    }
}

/// Entity metadata: table, properties, and identifier property names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    pub properties: Vec<PropertyDecl>,
    #[serde(default)]
    pub id: Vec<String>,
    /// Whether generated ids can be written back onto instances.
    #[serde(default = "yes")]
    pub id_writable: bool,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            properties: Vec::new(),
            id: Vec::new(),
            id_writable: true,
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn property(mut self, p: PropertyDecl) -> Self {
        self.properties.push(p);
        self
    }

    pub fn id_property(mut self, name: impl Into<String>) -> Self {
        self.id.push(name.into());
        self
    }

    pub fn id_read_only(mut self) -> Self {
        self.id_writable = false;
        self
    }

    pub fn table_name(&self, naming: NamingPolicy) -> String {
        self.table.clone().unwrap_or_else(|| naming.apply(&self.name))
    }

    pub fn find(&self, name: &str) -> Option<&PropertyDecl> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn is_keyless(&self) -> bool {
        self.id.is_empty()
    }

    pub fn id_properties(&self) -> impl Iterator<Item = &PropertyDecl> {
        self.id.iter().filter_map(move |n| self.find(n))
    }

    /// Property a result column maps onto, if any.
    pub fn property_for_column(&self, column: &str, naming: NamingPolicy) -> Option<&PropertyDecl> {
        self.properties
            .iter()
            .find(|p| p.column_name(naming).eq_ignore_ascii_case(column))
            .or_else(|| {
                self.properties
                    .iter()
                    .find(|p| crate::naming::loosely_equal(&p.name, column))
            })
    }
}

/// Reference to a registered hook, attached at interface granularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookRef {
    pub name: String,
    #[serde(default)]
    pub methods: MethodFilter,
}

/// The full declaration of one data-access interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDecl {
    pub name: String,
    #[serde(default)]
    pub entity: Option<EntityDescriptor>,
    /// Declared identifier type of the CRUD operations.
    #[serde(default)]
    pub id_shape: Option<TypeShape>,
    #[serde(default)]
    pub naming: NamingPolicy,
    /// Synthesize the CRUD convenience operations for the entity.
    #[serde(default)]
    pub crud: bool,
    #[serde(default)]
    pub cache: Option<CacheSettings>,
    /// Interface-level invalidation; applies to matching write methods.
    #[serde(default)]
    pub refresh_cache: Option<MethodFilter>,
    #[serde(default)]
    pub perf_log: Option<PerfLog>,
    #[serde(default)]
    pub sql_log: bool,
    #[serde(default)]
    pub hooks: Vec<HookRef>,
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
}

impl InterfaceDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity: None,
            id_shape: None,
            naming: NamingPolicy::default(),
            crud: false,
            cache: None,
            refresh_cache: None,
            perf_log: None,
            sql_log: false,
            hooks: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn entity(mut self, entity: EntityDescriptor) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Enable CRUD synthesis with the given identifier type.
    pub fn crud(mut self, id_shape: TypeShape) -> Self {
        self.crud = true;
        self.id_shape = Some(id_shape);
        self
    }

    pub fn naming(mut self, naming: NamingPolicy) -> Self {
        self.naming = naming;
        self
    }

    pub fn cache(mut self, settings: CacheSettings) -> Self {
        self.cache = Some(settings);
        self
    }

    pub fn refresh_cache(mut self, filter: MethodFilter) -> Self {
        self.refresh_cache = Some(filter);
        self
    }

    pub fn perf_log(mut self, p: PerfLog) -> Self {
        self.perf_log = Some(p);
        self
    }

    pub fn sql_log(mut self, on: bool) -> Self {
        self.sql_log = on;
        self
    }

    pub fn hook(mut self, name: impl Into<String>, methods: MethodFilter) -> Self {
        self.hooks.push(HookRef {
            name: name.into(),
            methods,
        });
        self
    }

    pub fn method(mut self, m: MethodDecl) -> Self {
        self.methods.push(m);
        self
    }

    pub fn find_method(&self, name: &str) -> Option<&MethodDecl> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_filters_use_simple_globs() {
        let f = MethodFilter::of(&["find*", "*ById", "exact"]);
        assert!(f.matches("findAll"));
        assert!(f.matches("deleteById"));
        assert!(f.matches("exact"));
        assert!(!f.matches("exactly"));
        assert!(MethodFilter::all().matches("anything"));
        assert!(MethodFilter::of(&["a*b*c"]).matches("aXbYc"));
        assert!(!MethodFilter::of(&["a*b*c"]).matches("aXcYb"));
    }

    #[test]
    fn columns_map_back_to_properties() {
        let e = EntityDescriptor::new("Account")
            .property(PropertyDecl::new("id", TypeShape::i64()))
            .property(PropertyDecl::new("firstName", TypeShape::Str))
            .property(PropertyDecl::new("email", TypeShape::Str).column("mail"))
            .id_property("id");
        let naming = NamingPolicy::default();
        assert_eq!(e.table_name(naming), "account");
        assert_eq!(
            e.property_for_column("FIRST_NAME", naming).map(|p| p.name.as_str()),
            Some("firstName")
        );
        assert_eq!(
            e.property_for_column("mail", naming).map(|p| p.name.as_str()),
            Some("email")
        );
        assert!(!e.is_keyless());
    }
}
