//! YAML -> `InterfaceDecl` (+ SQL mapper) loader.
//!
//! Example:
//! ```yaml
//! interface: AccountDao
//! entity:
//!   name: Account
//!   id: [id]
//!   properties:
//!     - { name: id, type: i64 }
//!     - { name: firstName, type: String }
//! crud: i64
//! methods:
//!   - name: findByFirstName
//!     returns: Vec<Account>
//!     params: [ { type: String, bind: firstName } ]
//!     select: "SELECT * FROM account WHERE first_name = :firstName"
//!     named: true
//!   - name: rename
//!     returns: bool
//!     params: [ { type: String }, { type: i64 } ]
//!     sql_id: account.rename
//!     verb: update
//! sql:
//!   account.rename: { sql: "UPDATE account SET first_name = ? WHERE id = ?" }
//! ```
//!
//! Types are written the way they print: `i64`, `Option<Account>`,
//! `Vec<String>`, `RowMapper<String>`, `[i64]`. Any other identifier names an
//! entity.

use serde::{Deserialize, Serialize};

use daoplan_core::decl::{
    CacheResult, CacheSettings, EntityDescriptor, HookRef, InterfaceDecl, MethodDecl,
    MethodFilter, NonDb, OpTag, OperationKind, ParamDecl, PerfLog, Propagation, PropertyDecl,
    Verb,
};
use daoplan_core::error::{Error, Result};
use daoplan_core::mapper::SqlMapper;
use daoplan_core::naming::NamingPolicy;
use daoplan_core::shape::{IntWidth, TypeShape};
use daoplan_core::value::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceDef {
    pub interface: String,
    #[serde(default)]
    pub entity: Option<EntityDef>,
    /// Id type; enables CRUD synthesis.
    #[serde(default)]
    pub crud: Option<String>,
    #[serde(default)]
    pub naming: NamingPolicy,
    #[serde(default)]
    pub sql_log: bool,
    #[serde(default)]
    pub perf_log: Option<PerfLog>,
    #[serde(default)]
    pub cache: Option<CacheSettings>,
    #[serde(default)]
    pub refresh_cache: Option<Vec<String>>,
    #[serde(default)]
    pub hooks: Vec<HookRef>,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
    #[serde(default)]
    pub sql: SqlMapper,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub id: Vec<String>,
    #[serde(default = "yes")]
    pub id_writable: bool,
    pub properties: Vec<PropertyDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    #[serde(rename = "type", default = "any")]
    pub ty: String,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub bind: Option<String>,
    #[serde(default)]
    pub define: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    #[serde(default = "unit")]
    pub returns: String,
    #[serde(default)]
    pub params: Vec<ParamDef>,

    #[serde(default)]
    pub select: Option<String>,
    #[serde(default)]
    pub insert: Option<String>,
    #[serde(default)]
    pub update: Option<String>,
    #[serde(default)]
    pub delete: Option<String>,
    #[serde(default)]
    pub call: Option<String>,
    /// Mapper id; requires `verb`.
    #[serde(default)]
    pub sql_id: Option<String>,
    #[serde(default)]
    pub verb: Option<Verb>,

    #[serde(default)]
    pub named: bool,
    #[serde(default)]
    pub kind: OperationKind,
    #[serde(default)]
    pub timeout: Option<u32>,
    #[serde(default)]
    pub fetch_size: Option<u32>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub single_parameter: bool,

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

    /// `entity_name`, `table_name`, or `data_source_id`.
    #[serde(default)]
    pub non_db: Option<String>,
    /// Constant response of a non-database method.
    #[serde(default)]
    pub constant: Option<serde_json::Value>,
}

fn yes() -> bool {
    true
}

fn any() -> String {
    "Value".into()
}

fn unit() -> String {
    "()".into()
}

/// Parsed YAML file: the interface plus its inline SQL table.
#[derive(Debug, Clone, PartialEq)]
pub struct DaoFile {
    pub interface: InterfaceDecl,
    pub sql: SqlMapper,
}

pub fn parse_dao_yaml(text: &str) -> Result<DaoFile> {
    let def: InterfaceDef =
        serde_yaml::from_str(text).map_err(|e| Error::Parse(format!("interface YAML: {e}")))?;
    lower_interface(def)
}

/// Standalone SQL mapper file: `id: { sql: ..., timeout: ... }` entries.
pub fn parse_mapper_yaml(text: &str) -> Result<SqlMapper> {
    serde_yaml::from_str(text).map_err(|e| Error::Parse(format!("SQL mapper YAML: {e}")))
}

fn lower_interface(def: InterfaceDef) -> Result<DaoFile> {
    let mut decl = InterfaceDecl::new(def.interface).naming(def.naming).sql_log(def.sql_log);
    if let Some(e) = def.entity {
        decl = decl.entity(lower_entity(e)?);
    }
    if let Some(id) = def.crud {
        decl = decl.crud(parse_shape(&id)?);
    }
    decl.perf_log = def.perf_log;
    decl.cache = def.cache;
    decl.refresh_cache = def.refresh_cache.map(MethodFilter);
    decl.hooks = def.hooks;
    for m in def.methods {
        decl = decl.method(lower_method(m)?);
    }
    Ok(DaoFile {
        interface: decl,
        sql: def.sql,
    })
}

fn lower_entity(e: EntityDef) -> Result<EntityDescriptor> {
    let mut out = EntityDescriptor::new(e.name);
    out.table = e.table;
    out.id = e.id;
    out.id_writable = e.id_writable;
    for p in e.properties {
        let mut prop = PropertyDecl::new(p.name, parse_shape(&p.ty)?);
        prop.column = p.column;
        if p.read_only {
            prop = prop.read_only();
        }
        out = out.property(prop);
    }
    Ok(out)
}

fn lower_method(m: MethodDef) -> Result<MethodDecl> {
    let mut decl = MethodDecl::new(&m.name, parse_shape(&m.returns)?);
    for p in &m.params {
        decl = decl.param(ParamDecl {
            shape: parse_shape(&p.ty)?,
            bind: p.bind.clone(),
            define: p.define.clone(),
        });
    }

    let inline: Vec<(Verb, &String)> = [
        (Verb::Select, &m.select),
        (Verb::Insert, &m.insert),
        (Verb::Update, &m.update),
        (Verb::Delete, &m.delete),
        (Verb::Call, &m.call),
    ]
    .into_iter()
    .filter_map(|(v, s)| s.as_ref().map(|s| (v, s)))
    .collect();

    let tag = match (inline.as_slice(), &m.sql_id) {
        ([], None) => None,
        ([(verb, sql)], None) => Some(OpTag {
            verb: *verb,
            named: m.named,
            sql: Some((*sql).clone()),
            id: None,
            timeout: m.timeout,
            fetch_size: m.fetch_size,
            batch: m.batch_size.is_some(),
            batch_size: m.batch_size,
            single_parameter: m.single_parameter,
            kind: m.kind,
        }),
        ([], Some(id)) => {
            let verb = m.verb.ok_or_else(|| {
                Error::Parse(format!("method '{}': sql_id needs a verb", m.name))
            })?;
            let mut tag = OpTag::by_id(verb, m.named, id).kind(m.kind);
            tag.timeout = m.timeout;
            tag.fetch_size = m.fetch_size;
            tag.batch = m.batch_size.is_some();
            tag.batch_size = m.batch_size;
            tag.single_parameter = m.single_parameter;
            Some(tag)
        }
        _ => {
            return Err(Error::Parse(format!(
                "method '{}' must declare exactly one of select/insert/update/delete/call/sql_id",
                m.name
            )))
        }
    };
    decl.op = tag;

    decl.non_db = match (m.non_db.as_deref(), m.constant) {
        (None, None) => None,
        (None, Some(c)) => Some(NonDb::Constant(Value::from(c))),
        (Some("entity_name"), None) => Some(NonDb::EntityName),
        (Some("table_name"), None) => Some(NonDb::TableName),
        (Some("data_source_id"), None) => Some(NonDb::DataSourceId),
        (Some(other), _) => {
            return Err(Error::Parse(format!(
                "method '{}': unknown non_db response '{other}'",
                m.name
            )))
        }
    };

    decl.transactional = m.transactional;
    decl.cache = m.cache;
    decl.refresh_cache = m.refresh_cache;
    decl.hooks = m.hooks;
    decl.perf_log = m.perf_log;
    decl.sql_log = m.sql_log;
    Ok(decl)
}

/// Parse a compact type string such as `Option<Vec<i64>>`.
pub fn parse_shape(s: &str) -> Result<TypeShape> {
    let s = s.trim();
    let bad = || Error::Parse(format!("cannot parse type '{s}'"));

    if let Some(inner) = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        return Ok(TypeShape::slice(parse_shape(inner)?));
    }
    if let Some(open) = s.find('<') {
        let inner = s[open + 1..].strip_suffix('>').ok_or_else(bad)?;
        if inner.trim().is_empty() {
            return Err(bad());
        }
        let outer = s[..open].trim();
        if outer == "Vec" && inner.trim() == "u8" {
            return Ok(TypeShape::Bytes);
        }
        let inner = parse_shape(inner)?;
        return match outer {
            "Option" => Ok(TypeShape::optional(inner)),
            "Vec" | "List" => Ok(TypeShape::list(inner)),
            "Set" => Ok(TypeShape::set(inner)),
            "Stream" => Ok(TypeShape::stream(inner)),
            "RowMapper" => Ok(TypeShape::row_mapper(inner)),
            "ResultExtractor" => Ok(TypeShape::result_extractor(inner)),
            _ => Err(bad()),
        };
    }

    Ok(match s {
        "()" | "unit" => TypeShape::Unit,
        "bool" => TypeShape::Bool,
        "i8" => TypeShape::Int(IntWidth::I8),
        "i16" => TypeShape::Int(IntWidth::I16),
        "i32" => TypeShape::Int(IntWidth::I32),
        "i64" => TypeShape::Int(IntWidth::I64),
        "f64" | "float" => TypeShape::Float,
        "String" | "str" => TypeShape::Str,
        "bytes" => TypeShape::Bytes,
        "Value" | "any" => TypeShape::Any,
        "Map" => TypeShape::Map,
        "EntityId" => TypeShape::EntityId,
        "RowSet" => TypeShape::RowSet,
        "RowFilter" => TypeShape::RowFilter,
        name if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && name.starts_with(|c: char| c.is_ascii_uppercase()) =>
        {
            TypeShape::entity(name)
        }
        _ => return Err(bad()),
    })
}
