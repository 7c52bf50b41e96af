//! Entity metadata and the process-wide metadata registry.

use crate::codec::{ScalarKind, Value};
use crate::entity::{Entity, EntityDescriptor, Getter, Identity, Setter};
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use parking_lot::{ReentrantMutex, RwLock};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Registry = RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>;

static REGISTRY: Lazy<Registry> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Serialises metadata builds. Re-entrant so that a `describe` may resolve
/// the metadata of other entities on the same thread.
static BUILDING: Lazy<ReentrantMutex<()>> = Lazy::new(|| ReentrantMutex::new(()));

/// Column constraints declared on a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnConstraints {
    pub nullable: bool,
    pub unique: bool,
    pub length: u32,
}

/// Accessor for one mapped field of `E`.
pub struct FieldRef<E> {
    field: &'static str,
    column: Arc<str>,
    kind: ScalarKind,
    constraints: ColumnConstraints,
    entity: &'static str,
    get: Getter<E>,
    set: Setter<E>,
}

impl<E> FieldRef<E> {
    /// Name of the Rust field.
    pub fn field(&self) -> &'static str {
        self.field
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    pub fn constraints(&self) -> ColumnConstraints {
        self.constraints
    }

    pub fn get(&self, entity: &E) -> Value {
        (self.get)(entity)
    }

    /// Writes `value` into the field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] if the value cannot be converted to the
    /// field's type.
    pub fn set(&self, entity: &mut E, value: Value) -> Result<()> {
        (self.set)(entity, value).map_err(|e| {
            Error::mapping(self.entity, format!("field `{}`: {}", self.field, e))
        })
    }
}

impl<E> Clone for FieldRef<E> {
    fn clone(&self) -> Self {
        Self {
            field: self.field,
            column: Arc::clone(&self.column),
            kind: self.kind,
            constraints: self.constraints,
            entity: self.entity,
            get: Arc::clone(&self.get),
            set: Arc::clone(&self.set),
        }
    }
}

impl<E> fmt::Debug for FieldRef<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRef")
            .field("field", &self.field)
            .field("column", &self.column)
            .field("kind", &self.kind)
            .field("constraints", &self.constraints)
            .finish()
    }
}

/// Table mapping of an entity type, resolved from its descriptor.
///
/// Immutable once built. Obtain it through [`EntityMetadata::of`], which
/// builds it at most once per type and hands out shared references.
pub struct EntityMetadata<E> {
    type_name: &'static str,
    table_name: String,
    id: FieldRef<E>,
    auto_increment: bool,
    columns: Vec<FieldRef<E>>,
    primary_keys: Vec<String>,
}

impl<E: Entity> EntityMetadata<E> {
    /// Returns the cached metadata for `E`, building it on first use.
    ///
    /// Concurrent first calls build the metadata exactly once; a failed
    /// build is not cached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] if the descriptor of `E` is invalid.
    pub fn of() -> Result<Arc<Self>> {
        let key = TypeId::of::<E>();
        if let Some(found) = REGISTRY.read().get(&key) {
            return Self::downcast(Arc::clone(found));
        }

        // `describe` runs with no registry lock held.
        let _building = BUILDING.lock();
        if let Some(found) = REGISTRY.read().get(&key) {
            return Self::downcast(Arc::clone(found));
        }
        let metadata = Arc::new(Self::from_descriptor(E::describe())?);
        tracing::debug!(
            entity = metadata.type_name,
            table = %metadata.table_name,
            columns = metadata.columns.len(),
            "entity metadata cached"
        );
        REGISTRY.write().insert(key, metadata.clone());
        Ok(metadata)
    }

    fn downcast(found: Arc<dyn Any + Send + Sync>) -> Result<Arc<Self>> {
        found
            .downcast::<Self>()
            .map_err(|_| Error::mapping(short_type_name::<E>(), "metadata registry type mismatch"))
    }
}

impl<E: 'static> EntityMetadata<E> {
    /// Resolves a descriptor without touching the registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] when no field is marked as identity, two
    /// fields resolve to the same column, or the auto-increment identity is
    /// not a single integer key.
    pub fn from_descriptor(descriptor: EntityDescriptor<E>) -> Result<Self> {
        let type_name = short_type_name::<E>();
        let table_name = descriptor
            .table
            .unwrap_or_else(|| type_name.to_lowercase());

        let mut columns: Vec<FieldRef<E>> = Vec::new();
        let mut identity: Option<(usize, Identity)> = None;
        let mut extra_keys = Vec::new();

        for def in descriptor.fields {
            if def.transient {
                continue;
            }
            let column = def.column.unwrap_or_else(|| def.name.to_string());
            if let Some(existing) = columns
                .iter()
                .find(|c| c.column().eq_ignore_ascii_case(&column))
            {
                return Err(Error::mapping(
                    type_name,
                    format!(
                        "fields `{}` and `{}` both map to column `{}`",
                        existing.field, def.name, column
                    ),
                ));
            }

            if let (Some(marker), None) = (def.identity, identity) {
                identity = Some((columns.len(), marker));
            } else if def.primary_key {
                extra_keys.push(column.clone());
            }

            columns.push(FieldRef {
                field: def.name,
                column: column.into(),
                kind: def.kind,
                constraints: ColumnConstraints {
                    nullable: def.nullable,
                    unique: def.unique,
                    length: def.length,
                },
                entity: type_name,
                get: def.get,
                set: def.set,
            });
        }

        let (index, marker) = identity
            .ok_or_else(|| Error::mapping(type_name, "no field is marked as identity"))?;
        let id = columns[index].clone();

        if marker.auto_increment {
            if !id.kind().is_integer() {
                return Err(Error::mapping(
                    type_name,
                    format!(
                        "auto-increment identity `{}` must be an integer field, found {}",
                        id.field,
                        id.kind()
                    ),
                ));
            }
            if !extra_keys.is_empty() {
                return Err(Error::mapping(
                    type_name,
                    "auto-increment identity cannot be part of a composite primary key",
                ));
            }
        }

        let mut primary_keys = vec![id.column().to_string()];
        primary_keys.extend(extra_keys);

        Ok(Self {
            type_name,
            table_name,
            id,
            auto_increment: marker.auto_increment,
            columns,
            primary_keys,
        })
    }
}

impl<E> EntityMetadata<E> {
    /// Short name of the entity type, used in errors and logs.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn id(&self) -> &FieldRef<E> {
        &self.id
    }

    pub fn is_auto_increment(&self) -> bool {
        self.auto_increment
    }

    /// Mapped columns in declaration order.
    pub fn columns(&self) -> &[FieldRef<E>] {
        &self.columns
    }

    /// Looks a column up by exact name.
    pub fn column(&self, name: &str) -> Option<&FieldRef<E>> {
        self.columns.iter().find(|c| c.column() == name)
    }

    /// Primary-key columns, identity first.
    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    pub fn is_id(&self, field: &FieldRef<E>) -> bool {
        field.column() == self.id.column()
    }

    /// Whether `field` is written by INSERT; the auto-increment identity is
    /// assigned by the database instead.
    pub fn is_insertable(&self, field: &FieldRef<E>) -> bool {
        !(self.auto_increment && self.is_id(field))
    }
}

impl<E> fmt::Debug for EntityMetadata<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMetadata")
            .field("type_name", &self.type_name)
            .field("table_name", &self.table_name)
            .field("id", &self.id.column())
            .field("auto_increment", &self.auto_increment)
            .field("columns", &self.columns)
            .field("primary_keys", &self.primary_keys)
            .finish()
    }
}

fn short_type_name<E>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::FieldDef;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Account {
        id: i64,
        email: String,
        display_name: Option<String>,
        balance: f64,
        session: String,
    }

    fn account_fields() -> EntityDescriptor<Account> {
        EntityDescriptor::new()
            .field(FieldDef::new("id", |a: &Account| a.id, |a: &mut Account, v| a.id = v).auto_increment())
            .field(
                FieldDef::new("email", |a: &Account| a.email.clone(), |a: &mut Account, v| a.email = v)
                    .unique()
                    .not_null(),
            )
            .field(
                FieldDef::new(
                    "display_name",
                    |a: &Account| a.display_name.clone(),
                    |a: &mut Account, v| a.display_name = v,
                )
                .column("name"),
            )
            .field(FieldDef::new("balance", |a: &Account| a.balance, |a: &mut Account, v| a.balance = v))
            .field(
                FieldDef::new("session", |a: &Account| a.session.clone(), |a: &mut Account, v| a.session = v)
                    .transient(),
            )
    }

    #[test]
    fn resolves_columns_in_declaration_order() {
        let metadata = EntityMetadata::from_descriptor(account_fields()).unwrap();
        assert_eq!(metadata.type_name(), "Account");
        assert_eq!(metadata.table_name(), "account");
        assert!(metadata.is_auto_increment());
        assert_eq!(metadata.id().column(), "id");
        assert_eq!(metadata.primary_keys(), ["id".to_string()]);

        let columns: Vec<_> = metadata.columns().iter().map(|c| c.column()).collect();
        assert_eq!(columns, ["id", "email", "name", "balance"]);

        let email = metadata.column("email").unwrap();
        assert!(!email.constraints().nullable);
        assert!(email.constraints().unique);
        assert_eq!(metadata.column("name").unwrap().field(), "display_name");
        assert!(metadata.column("session").is_none());
    }

    #[test]
    fn table_override_wins() {
        let metadata = EntityMetadata::from_descriptor(account_fields().table("accounts")).unwrap();
        assert_eq!(metadata.table_name(), "accounts");
    }

    #[test]
    fn missing_identity_is_rejected() {
        let descriptor = EntityDescriptor::new()
            .field(FieldDef::new("email", |a: &Account| a.email.clone(), |a: &mut Account, v| a.email = v));
        let err = EntityMetadata::from_descriptor(descriptor).unwrap_err();
        assert!(matches!(err, Error::Mapping { ref reason, .. } if reason.contains("identity")));
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let descriptor = account_fields().field(
            FieldDef::new("alias", |a: &Account| a.email.clone(), |a: &mut Account, v| a.email = v)
                .column("EMAIL"),
        );
        let err = EntityMetadata::from_descriptor(descriptor).unwrap_err();
        assert!(matches!(err, Error::Mapping { ref reason, .. } if reason.contains("email")));
    }

    #[test]
    fn first_identity_marker_wins() {
        let descriptor = EntityDescriptor::new()
            .field(FieldDef::new("email", |a: &Account| a.email.clone(), |a: &mut Account, v| a.email = v).id())
            .field(FieldDef::new("id", |a: &Account| a.id, |a: &mut Account, v| a.id = v).auto_increment());
        let metadata = EntityMetadata::from_descriptor(descriptor).unwrap();
        assert_eq!(metadata.id().column(), "email");
        assert!(!metadata.is_auto_increment());
    }

    #[test]
    fn auto_increment_requires_integer_identity() {
        let descriptor = EntityDescriptor::new().field(
            FieldDef::new("email", |a: &Account| a.email.clone(), |a: &mut Account, v| a.email = v)
                .auto_increment(),
        );
        assert!(EntityMetadata::from_descriptor(descriptor).is_err());
    }

    #[test]
    fn composite_keys_keep_identity_first() {
        let descriptor = EntityDescriptor::new()
            .field(
                FieldDef::new("email", |a: &Account| a.email.clone(), |a: &mut Account, v| a.email = v)
                    .primary_key(),
            )
            .field(FieldDef::new("id", |a: &Account| a.id, |a: &mut Account, v| a.id = v).id());
        let metadata = EntityMetadata::from_descriptor(descriptor).unwrap();
        assert_eq!(metadata.primary_keys(), ["id".to_string(), "email".to_string()]);

        let descriptor = account_fields().field(
            FieldDef::new("balance_key", |a: &Account| a.balance, |a: &mut Account, v| a.balance = v)
                .primary_key(),
        );
        assert!(EntityMetadata::from_descriptor(descriptor).is_err());
    }

    #[test]
    fn set_reports_field_on_conversion_failure() {
        let metadata = EntityMetadata::from_descriptor(account_fields()).unwrap();
        let mut account = Account::default();
        let err = metadata
            .column("balance")
            .unwrap()
            .set(&mut account, Value::Text("lots".into()))
            .unwrap_err();
        assert!(matches!(err, Error::Mapping { ref reason, .. } if reason.contains("balance")));
    }

    static DESCRIBE_CALLS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Default)]
    struct Counted {
        id: i64,
    }

    impl Entity for Counted {
        fn describe() -> EntityDescriptor<Self> {
            DESCRIBE_CALLS.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            EntityDescriptor::new()
                .field(FieldDef::new("id", |c: &Counted| c.id, |c: &mut Counted, v| c.id = v).id())
        }
    }

    #[test]
    fn concurrent_first_access_builds_once() {
        let built: Vec<Arc<EntityMetadata<Counted>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| EntityMetadata::<Counted>::of().unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(DESCRIBE_CALLS.load(Ordering::SeqCst), 1);
        for metadata in &built[1..] {
            assert!(Arc::ptr_eq(metadata, &built[0]));
        }
    }

    #[derive(Debug, Default)]
    struct Parent {
        id: i64,
    }

    impl Entity for Parent {
        fn describe() -> EntityDescriptor<Self> {
            EntityDescriptor::new()
                .table("parents")
                .field(FieldDef::new("id", |p: &Parent| p.id, |p: &mut Parent, v| p.id = v).auto_increment())
        }
    }

    #[derive(Debug, Default)]
    struct Child {
        id: i64,
        parent_id: i64,
    }

    impl Entity for Child {
        fn describe() -> EntityDescriptor<Self> {
            // Borrows the parent's table name for its foreign-key column.
            let parent = EntityMetadata::<Parent>::of().unwrap();
            let column = format!("{}_id", parent.table_name().trim_end_matches('s'));
            EntityDescriptor::new()
                .field(FieldDef::new("id", |c: &Child| c.id, |c: &mut Child, v| c.id = v).auto_increment())
                .field(
                    FieldDef::new("parent_id", |c: &Child| c.parent_id, |c: &mut Child, v| c.parent_id = v)
                        .column(&column),
                )
        }
    }

    #[test]
    fn describe_may_resolve_other_entities() {
        let child = EntityMetadata::<Child>::of().unwrap();
        assert!(child.column("parent_id").is_some());
        assert!(EntityMetadata::<Parent>::of().is_ok());
    }
}
