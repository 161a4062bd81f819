//! Process-wide table of bound interfaces.
//!
//! One `Dao` per (interface, data source, mapper, executor). Binding runs
//! outside the lock; when two threads race on the same key the first table
//! inserted wins and both callers get it. Declarations holding accessor
//! closures have no fingerprint and are bound fresh on every request.

use std::collections::HashMap;
use std::sync::Arc;

use daoplan_core::error::{Error, Result};
use daoplan_core::hash::{fingerprint, Hash256};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::dao::{Dao, DaoBuilder};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryKey {
    pub interface: String,
    pub declaration: Hash256,
    pub datasource: String,
    /// Address of the data source instance. Registered tables keep their
    /// data source alive, so an address is never reused while keyed.
    pub datasource_addr: usize,
    pub mapper: Option<Hash256>,
    pub executor: String,
}

impl RegistryKey {
    /// `None` when the declaration cannot be fingerprinted.
    pub fn of(builder: &DaoBuilder) -> Result<Option<Self>> {
        let decl = builder.interface();
        let datasource = builder.datasource_ref().ok_or_else(|| {
            Error::config(format!("interface '{}' has no data source", decl.name))
        })?;
        let Ok(declaration) = fingerprint(decl) else {
            return Ok(None);
        };
        Ok(Some(Self {
            interface: decl.name.clone(),
            declaration,
            datasource: datasource.id().to_string(),
            datasource_addr: Arc::as_ptr(datasource) as *const () as usize,
            mapper: builder.mapper_ref().map(|m| m.fingerprint()),
            executor: builder.executor_ref().name().to_string(),
        }))
    }
}

#[derive(Default)]
pub struct DaoRegistry {
    tables: RwLock<HashMap<RegistryKey, Arc<Dao>>>,
}

impl DaoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bound interface for `builder`'s identity, binding it on first use.
    pub fn get_or_bind(&self, builder: DaoBuilder) -> Result<Arc<Dao>> {
        let Some(key) = RegistryKey::of(&builder)? else {
            tracing::debug!(interface = %builder.interface().name, "declaration has no fingerprint; binding unshared");
            return Ok(Arc::new(builder.bind()?));
        };
        if let Some(dao) = self.tables.read().get(&key) {
            return Ok(dao.clone());
        }
        let fresh = Arc::new(builder.bind()?);
        let mut tables = self.tables.write();
        let dao = tables.entry(key).or_insert(fresh);
        Ok(dao.clone())
    }

    pub fn get(&self, key: &RegistryKey) -> Option<Arc<Dao>> {
        self.tables.read().get(key).cloned()
    }

    pub fn remove(&self, key: &RegistryKey) -> Option<Arc<Dao>> {
        self.tables.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }

    pub fn clear(&self) {
        self.tables.write().clear();
    }
}

impl std::fmt::Debug for DaoRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaoRegistry").field("len", &self.len()).finish()
    }
}

static GLOBAL: Lazy<DaoRegistry> = Lazy::new(DaoRegistry::new);

/// The registry shared by the whole process.
pub fn global() -> &'static DaoRegistry {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use daoplan_core::decl::{InterfaceDecl, MethodDecl, OpTag, Verb};
    use daoplan_core::mapper::{SqlEntry, SqlMapper};
    use daoplan_core::shape::TypeShape;
    use daoplan_io::memory::{MemoryDataSource, TableDef};

    fn ds(id: &str) -> Arc<MemoryDataSource> {
        Arc::new(
            MemoryDataSource::new(id)
                .with_table(TableDef::new("item").auto_increment("id"))
                .expect("table"),
        )
    }

    fn builder(ds: &Arc<MemoryDataSource>) -> DaoBuilder {
        let decl = InterfaceDecl::new("ItemDao").method(
            MethodDecl::new("count", TypeShape::i64()).op(OpTag::by_id(Verb::Select, false, "count-items")),
        );
        let mapper = SqlMapper::new().add("count-items", SqlEntry::new("SELECT count(*) FROM item"));
        Dao::builder(decl).data_source(ds.clone()).mapper(Arc::new(mapper))
    }

    #[test]
    fn one_table_per_identity() {
        let reg = DaoRegistry::new();
        let a = ds("reg-a");
        let first = reg.get_or_bind(builder(&a)).expect("bind");
        let again = reg.get_or_bind(builder(&a)).expect("bind");
        assert!(Arc::ptr_eq(&first, &again));

        let other = reg.get_or_bind(builder(&ds("reg-b"))).expect("bind");
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(reg.len(), 2);

        reg.clear();
        assert!(reg.is_empty());
    }

    #[test]
    fn concurrent_binds_agree() {
        let reg = Arc::new(DaoRegistry::new());
        let a = ds("reg-race");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                let a = a.clone();
                std::thread::spawn(move || reg.get_or_bind(builder(&a)).expect("bind"))
            })
            .collect();
        let daos: Vec<Arc<Dao>> = handles.into_iter().map(|h| h.join().expect("thread")).collect();
        assert!(daos.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn same_id_different_instance_is_a_different_table() {
        let reg = DaoRegistry::new();
        let first = reg.get_or_bind(builder(&ds("reg-twin"))).expect("bind");
        let second = reg.get_or_bind(builder(&ds("reg-twin"))).expect("bind");
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn accessor_declarations_are_never_shared() {
        use daoplan_core::decl::NonDb;
        use daoplan_core::value::Value;

        let reg = DaoRegistry::new();
        let a = ds("reg-accessor");
        let with = |name: &str| {
            let decl = InterfaceDecl::new("X").method(
                MethodDecl::new(name, TypeShape::i64()).non_db(NonDb::accessor(|_| Ok(Value::Int(1)))),
            );
            Dao::builder(decl).data_source(a.clone())
        };
        let one = reg.get_or_bind(with("one")).expect("bind");
        let two = reg.get_or_bind(with("two")).expect("bind");
        assert!(!Arc::ptr_eq(&one, &two));
        assert!(two.call("two", &[]).is_ok());
        assert!(reg.is_empty());
    }

    #[test]
    fn global_registry_is_shared() {
        assert!(std::ptr::eq(global(), global()));
    }
}
