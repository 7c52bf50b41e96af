//! Entity descriptors: how a Rust type declares its table mapping.
//!
//! There is no runtime reflection; each entity type implements [`Entity`]
//! and lists its fields once, together with a typed getter and setter for
//! each. The accessors are erased into [`Value`]-based closures when the
//! descriptor is built, so the rest of the crate never needs to know the
//! concrete field types.
//!
//! # Examples
//!
//! ```rust
//! use sqlx_entity_manager::{Entity, EntityDescriptor, FieldDef};
//!
//! #[derive(Debug, Default)]
//! struct User {
//!     id: i64,
//!     name: String,
//!     age: i32,
//!     cached_score: u64,
//! }
//!
//! impl Entity for User {
//!     fn describe() -> EntityDescriptor<Self> {
//!         EntityDescriptor::new()
//!             .table("users")
//!             .field(FieldDef::new("id", |u: &User| u.id, |u: &mut User, v| u.id = v).auto_increment())
//!             .field(FieldDef::new("name", |u: &User| u.name.clone(), |u: &mut User, v| u.name = v).unique())
//!             .field(FieldDef::new("age", |u: &User| u.age, |u: &mut User, v| u.age = v))
//!             .field(FieldDef::skipped("cached_score"))
//!     }
//! }
//! ```

use crate::codec::{ConversionError, Scalar, ScalarKind, Value};
use std::sync::Arc;

pub(crate) type Getter<E> = Arc<dyn Fn(&E) -> Value + Send + Sync>;
pub(crate) type Setter<E> = Arc<dyn Fn(&mut E, Value) -> Result<(), ConversionError> + Send + Sync>;

/// Default `VARCHAR` length for string columns.
pub const DEFAULT_LENGTH: u32 = 255;

/// A Rust type mapped onto exactly one table.
///
/// `Default` supplies the blank instance that rows are mapped into; fields
/// whose column is `NULL` keep their default value.
pub trait Entity: Default + Send + Sync + 'static {
    /// Describes the table mapping. Called at most once per type and process;
    /// the result is cached by the metadata registry.
    ///
    /// Builds are serialised process-wide. `describe` may look up the
    /// metadata of other entity types, but must not look up its own, and
    /// must not wait on another thread that is resolving metadata.
    fn describe() -> EntityDescriptor<Self>;
}

/// Identity marker of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub auto_increment: bool,
}

/// Table-level description of an entity type.
pub struct EntityDescriptor<E> {
    pub(crate) table: Option<String>,
    pub(crate) fields: Vec<FieldDef<E>>,
}

impl<E> EntityDescriptor<E> {
    pub fn new() -> Self {
        Self {
            table: None,
            fields: Vec::new(),
        }
    }

    /// Overrides the table name, which otherwise is the lower-cased type name.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = Some(name.into());
        self
    }

    /// Appends a field. Declaration order is column order.
    pub fn field(mut self, field: FieldDef<E>) -> Self {
        self.fields.push(field);
        self
    }
}

impl<E> Default for EntityDescriptor<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Declaration of one entity field and its column markers.
pub struct FieldDef<E> {
    pub(crate) name: &'static str,
    pub(crate) column: Option<String>,
    pub(crate) kind: ScalarKind,
    pub(crate) identity: Option<Identity>,
    pub(crate) nullable: bool,
    pub(crate) unique: bool,
    pub(crate) length: u32,
    pub(crate) primary_key: bool,
    pub(crate) transient: bool,
    pub(crate) get: Getter<E>,
    pub(crate) set: Setter<E>,
}

impl<E: 'static> FieldDef<E> {
    /// Declares a mapped field with typed accessors.
    ///
    /// Columns are nullable unless [`not_null`](Self::not_null) is called.
    pub fn new<T: Scalar>(name: &'static str, get: fn(&E) -> T, set: fn(&mut E, T)) -> Self {
        Self {
            name,
            column: None,
            kind: T::KIND,
            identity: None,
            nullable: true,
            unique: false,
            length: DEFAULT_LENGTH,
            primary_key: false,
            transient: false,
            get: Arc::new(move |entity: &E| get(entity).into_value()),
            set: Arc::new(move |entity: &mut E, value: Value| {
                set(entity, T::from_value(value)?);
                Ok(())
            }),
        }
    }

    /// Declares a field that is never persisted.
    pub fn skipped(name: &'static str) -> Self {
        Self {
            name,
            column: None,
            kind: ScalarKind::Text,
            identity: None,
            nullable: true,
            unique: false,
            length: DEFAULT_LENGTH,
            primary_key: false,
            transient: true,
            get: Arc::new(|_: &E| Value::Null),
            set: Arc::new(|_: &mut E, _: Value| Ok(())),
        }
    }
}

impl<E> FieldDef<E> {
    /// Marks the field as the caller-assigned identity.
    pub fn id(mut self) -> Self {
        self.identity = Some(Identity {
            auto_increment: false,
        });
        self
    }

    /// Marks the field as the identity, assigned by the database on insert.
    pub fn auto_increment(mut self) -> Self {
        self.identity = Some(Identity {
            auto_increment: true,
        });
        self
    }

    /// Overrides the column name, which otherwise is the field name.
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.column = Some(name.into());
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Declared `VARCHAR` length of a string column.
    pub fn length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    /// Stores a string field as unbounded `TEXT` instead of `VARCHAR`.
    pub fn unbounded(mut self) -> Self {
        if self.kind == ScalarKind::String {
            self.kind = ScalarKind::Text;
        }
        self
    }

    /// Adds the column to the table's composite primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Excludes the field from the mapping.
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Note {
        body: String,
        pinned: bool,
    }

    #[test]
    fn accessors_are_erased_to_values() {
        let body = FieldDef::new(
            "body",
            |n: &Note| n.body.clone(),
            |n: &mut Note, v| n.body = v,
        );
        let mut note = Note {
            body: "draft".into(),
            pinned: false,
        };
        assert_eq!((body.get)(&note), Value::Text("draft".into()));
        (body.set)(&mut note, Value::Text("final".into())).unwrap();
        assert_eq!(note.body, "final");
        assert_eq!(body.kind, ScalarKind::String);
    }

    #[test]
    fn setter_rejects_values_of_another_kind() {
        let pinned = FieldDef::new("pinned", |n: &Note| n.pinned, |n: &mut Note, v| n.pinned = v);
        let mut note = Note::default();
        assert!((pinned.set)(&mut note, Value::Text("yes".into())).is_err());
        assert!(!note.pinned);
    }

    #[test]
    fn unbounded_only_applies_to_strings() {
        let body = FieldDef::new("body", |n: &Note| n.body.clone(), |n: &mut Note, v| n.body = v)
            .unbounded();
        assert_eq!(body.kind, ScalarKind::Text);

        let pinned = FieldDef::new("pinned", |n: &Note| n.pinned, |n: &mut Note, v| n.pinned = v)
            .unbounded();
        assert_eq!(pinned.kind, ScalarKind::Boolean);
    }
}
