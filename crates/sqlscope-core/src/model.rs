//! Model trait for ORM-style struct mapping.
//!
//! The `Model` trait defines the contract for structs that can be mapped to
//! database tables. It is typically derived using `#[derive(Model)]` from
//! `sqlscope-macros`.
//!
//! The pipeline itself works on the object-safe [`Record`] and [`RecordSet`]
//! views so that callback steps can be stored as plain function values.

use crate::Result;
use crate::error::{ConfigErrorKind, Error};
use crate::field::FieldInfo;
use crate::relationship::RelationshipInfo;
use crate::row::Row;
use crate::value::Value;
use std::any::TypeId;
use std::fmt;

/// Lifecycle points at which a model can run its own code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelEvent {
    BeforeSave,
    BeforeCreate,
    AfterCreate,
    AfterSave,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    AfterFind,
}

/// Trait for types that can be mapped to database tables.
///
/// # Example
///
/// ```ignore
/// use sqlscope::Model;
///
/// #[derive(Model, Debug, Clone, Default)]
/// struct User {
///     #[sqlscope(primary_key)]
///     id: i64,
///     name: String,
///     age: i32,
///     #[sqlscope(has_many)]
///     emails: Vec<Email>,
/// }
/// ```
pub trait Model: Sized + Send + 'static {
    /// The Rust struct name, used to derive table and key names.
    const MODEL_NAME: &'static str;

    /// Explicit table name; when `None` the registry derives one from
    /// `MODEL_NAME` honouring the singular-table setting.
    const TABLE_NAME: Option<&'static str> = None;

    /// Relationship declarations for this model.
    const RELATIONSHIPS: &'static [RelationshipInfo] = &[];

    /// Get field metadata for all persisted columns.
    fn fields() -> &'static [FieldInfo];

    /// Convert this model instance to `(column, value)` pairs.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Construct a model instance from a database row.
    ///
    /// Columns missing from the row leave the field at its default.
    fn from_row(row: &Row) -> Result<Self>;

    /// Assign one column. Returns `Ok(false)` when the model has no such column.
    fn set_column(&mut self, column: &str, value: Value) -> Result<bool>;

    /// Replace a relationship field with models built from `rows`.
    fn set_related(&mut self, field: &str, rows: &[Row]) -> Result<()> {
        let _ = rows;
        Err(Error::config(
            ConfigErrorKind::MissingRelationship,
            format!("{} has no relationship {}", Self::MODEL_NAME, field),
        ))
    }

    /// Borrow the values held by a relationship field.
    fn related_mut(&mut self, field: &str) -> Vec<&mut dyn Record> {
        let _ = field;
        Vec::new()
    }

    /// Run a lifecycle hook. The derive forwards to [`ModelEvents`] when the
    /// struct is marked `#[sqlscope(events)]`.
    fn run_event(&mut self, event: ModelEvent) -> Result<()> {
        let _ = event;
        Ok(())
    }
}

/// Lifecycle hooks for models.
///
/// Implement the methods you need and mark the struct `#[sqlscope(events)]`.
/// Returning an error records it on the running operation; steps after the
/// hook that depend on success are skipped.
pub trait ModelEvents: Model {
    fn before_save(&mut self) -> Result<()> {
        Ok(())
    }

    fn before_create(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_create(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_save(&mut self) -> Result<()> {
        Ok(())
    }

    fn before_update(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_update(&mut self) -> Result<()> {
        Ok(())
    }

    fn before_delete(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_delete(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_find(&mut self) -> Result<()> {
        Ok(())
    }

    /// Route an event to the matching hook.
    fn dispatch(&mut self, event: ModelEvent) -> Result<()> {
        match event {
            ModelEvent::BeforeSave => self.before_save(),
            ModelEvent::BeforeCreate => self.before_create(),
            ModelEvent::AfterCreate => self.after_create(),
            ModelEvent::AfterSave => self.after_save(),
            ModelEvent::BeforeUpdate => self.before_update(),
            ModelEvent::AfterUpdate => self.after_update(),
            ModelEvent::BeforeDelete => self.before_delete(),
            ModelEvent::AfterDelete => self.after_delete(),
            ModelEvent::AfterFind => self.after_find(),
        }
    }
}

/// Static metadata of a model type, usable without the type parameter.
#[derive(Clone, Copy)]
pub struct ModelDescriptor {
    pub type_id: TypeId,
    pub name: &'static str,
    pub table_name: Option<&'static str>,
    pub fields: &'static [FieldInfo],
    pub relationships: &'static [RelationshipInfo],
}

impl ModelDescriptor {
    /// Describe the model type `M`.
    pub fn of<M: Model>() -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            name: M::MODEL_NAME,
            table_name: M::TABLE_NAME,
            fields: M::fields(),
            relationships: M::RELATIONSHIPS,
        }
    }

    /// Look up a field by column name.
    pub fn field(&self, column: &str) -> Option<&'static FieldInfo> {
        self.fields.iter().find(|f| f.column_name == column)
    }

    /// Look up a field by column name or Rust field name.
    pub fn field_by_name(&self, name: &str) -> Option<&'static FieldInfo> {
        self.fields
            .iter()
            .find(|f| f.column_name == name || f.name == name)
    }
}

impl fmt::Debug for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDescriptor")
            .field("name", &self.name)
            .field("table_name", &self.table_name)
            .field("fields", &self.fields.len())
            .field("relationships", &self.relationships.len())
            .finish()
    }
}

impl PartialEq for ModelDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

/// Object-safe view of a single model value.
pub trait Record: Send {
    fn descriptor(&self) -> ModelDescriptor;
    fn values(&self) -> Vec<(&'static str, Value)>;
    fn set_column(&mut self, column: &str, value: Value) -> Result<bool>;
    /// Overwrite the columns present in `row`.
    fn load_row(&mut self, row: &Row) -> Result<()>;
    fn set_related(&mut self, field: &str, rows: &[Row]) -> Result<()>;
    fn related_mut(&mut self, field: &str) -> Vec<&mut dyn Record>;
    fn run_event(&mut self, event: ModelEvent) -> Result<()>;

    /// Value of one column, if the record has it.
    fn value_of(&self, column: &str) -> Option<Value> {
        self.values()
            .into_iter()
            .find(|(c, _)| *c == column)
            .map(|(_, v)| v)
    }

    /// Whether every column holds its zero value.
    fn is_blank(&self) -> bool {
        self.values().iter().all(|(_, v)| v.is_zero())
    }
}

impl<M: Model> Record for M {
    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor::of::<M>()
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        self.to_row()
    }

    fn set_column(&mut self, column: &str, value: Value) -> Result<bool> {
        Model::set_column(self, column, value)
    }

    fn load_row(&mut self, row: &Row) -> Result<()> {
        for (column, value) in row.iter() {
            Model::set_column(self, column, value.clone())?;
        }
        Ok(())
    }

    fn set_related(&mut self, field: &str, rows: &[Row]) -> Result<()> {
        Model::set_related(self, field, rows)
    }

    fn related_mut(&mut self, field: &str) -> Vec<&mut dyn Record> {
        Model::related_mut(self, field)
    }

    fn run_event(&mut self, event: ModelEvent) -> Result<()> {
        Model::run_event(self, event)
    }
}

/// Object-safe view of a collection of model values.
pub trait RecordSet: Send {
    fn descriptor(&self) -> ModelDescriptor;
    fn clear(&mut self);
    fn push_row(&mut self, row: &Row) -> Result<()>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn record_mut(&mut self, index: usize) -> Option<&mut dyn Record>;
    fn records_mut(&mut self) -> Vec<&mut dyn Record>;
}

impl<M: Model> RecordSet for Vec<M> {
    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor::of::<M>()
    }

    fn clear(&mut self) {
        Vec::clear(self);
    }

    fn push_row(&mut self, row: &Row) -> Result<()> {
        self.push(M::from_row(row)?);
        Ok(())
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn record_mut(&mut self, index: usize) -> Option<&mut dyn Record> {
        self.get_mut(index).map(|m| m as &mut dyn Record)
    }

    fn records_mut(&mut self) -> Vec<&mut dyn Record> {
        self.iter_mut().map(|m| m as &mut dyn Record).collect()
    }
}

/// An owned snapshot of a record: its descriptor plus column values.
///
/// Handles keep one of these as their target value, so a `Db` never borrows
/// the caller's struct.
#[derive(Debug, Clone)]
pub struct ModelValue {
    descriptor: ModelDescriptor,
    values: Vec<(&'static str, Value)>,
}

impl ModelValue {
    /// Snapshot an existing record.
    pub fn of(record: &dyn Record) -> Self {
        Self {
            descriptor: record.descriptor(),
            values: record.values(),
        }
    }

    /// A value carrying only the type, with every column unset.
    pub fn empty(descriptor: ModelDescriptor) -> Self {
        Self {
            descriptor,
            values: Vec::new(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, v)| v)
    }
}

impl Record for ModelValue {
    fn descriptor(&self) -> ModelDescriptor {
        self.descriptor
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        self.values.clone()
    }

    fn set_column(&mut self, column: &str, value: Value) -> Result<bool> {
        let Some(field) = self.descriptor.field(column) else {
            return Ok(false);
        };
        match self.values.iter_mut().find(|(c, _)| *c == field.column_name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((field.column_name, value)),
        }
        Ok(true)
    }

    fn load_row(&mut self, row: &Row) -> Result<()> {
        for (column, value) in row.iter() {
            Record::set_column(self, column, value.clone())?;
        }
        Ok(())
    }

    fn set_related(&mut self, _field: &str, _rows: &[Row]) -> Result<()> {
        Ok(())
    }

    fn related_mut(&mut self, _field: &str) -> Vec<&mut dyn Record> {
        Vec::new()
    }

    fn run_event(&mut self, _event: ModelEvent) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::FromValue;
    use crate::types::SqlType;

    #[derive(Debug, Default, PartialEq)]
    struct Note {
        id: i64,
        body: String,
        hooks: Vec<ModelEvent>,
    }

    impl Model for Note {
        const MODEL_NAME: &'static str = "Note";

        fn fields() -> &'static [FieldInfo] {
            static FIELDS: &[FieldInfo] = &[
                FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
                FieldInfo::new("body", "body", SqlType::Text),
            ];
            FIELDS
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![("id", Value::from(self.id)), ("body", Value::from(&self.body))]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_named_or_default("id")?,
                body: row.get_named_or_default("body")?,
                hooks: Vec::new(),
            })
        }

        fn set_column(&mut self, column: &str, value: Value) -> Result<bool> {
            match column {
                "id" => self.id = FromValue::from_value(&value)?,
                "body" => self.body = FromValue::from_value(&value)?,
                _ => return Ok(false),
            }
            Ok(true)
        }

        fn run_event(&mut self, event: ModelEvent) -> Result<()> {
            ModelEvents::dispatch(self, event)
        }
    }

    impl ModelEvents for Note {
        fn before_create(&mut self) -> Result<()> {
            self.hooks.push(ModelEvent::BeforeCreate);
            Ok(())
        }
    }

    #[test]
    fn record_view_reads_and_writes_columns() {
        let mut note = Note::default();
        let record: &mut dyn Record = &mut note;
        assert!(record.is_blank());
        assert!(record.set_column("body", Value::from("hi")).unwrap());
        assert!(!record.set_column("missing", Value::Null).unwrap());
        assert_eq!(record.value_of("body"), Some(Value::from("hi")));
        assert!(!record.is_blank());
    }

    #[test]
    fn load_row_keeps_absent_columns() {
        let mut note = Note {
            id: 4,
            body: "keep".into(),
            hooks: Vec::new(),
        };
        let row = Row::new(vec!["id".into()], vec![Value::BigInt(9)]);
        Record::load_row(&mut note, &row).unwrap();
        assert_eq!(note.id, 9);
        assert_eq!(note.body, "keep");
    }

    #[test]
    fn record_set_pushes_rows() {
        let mut notes: Vec<Note> = Vec::new();
        let set: &mut dyn RecordSet = &mut notes;
        set.push_row(&Row::new(
            vec!["id".into(), "body".into()],
            vec![Value::BigInt(1), Value::from("a")],
        ))
        .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.descriptor().name, "Note");
        assert_eq!(notes[0].body, "a");
    }

    #[test]
    fn events_dispatch_to_hooks() {
        let mut note = Note::default();
        Record::run_event(&mut note, ModelEvent::BeforeCreate).unwrap();
        Record::run_event(&mut note, ModelEvent::AfterFind).unwrap();
        assert_eq!(note.hooks, vec![ModelEvent::BeforeCreate]);
    }

    #[test]
    fn model_value_snapshot_tracks_known_columns() {
        let note = Note {
            id: 2,
            body: "x".into(),
            hooks: Vec::new(),
        };
        let mut snapshot = ModelValue::of(&note);
        assert_eq!(snapshot.get("id"), Some(&Value::BigInt(2)));
        assert!(Record::set_column(&mut snapshot, "body", Value::from("y")).unwrap());
        assert!(!Record::set_column(&mut snapshot, "nope", Value::Null).unwrap());
        assert_eq!(snapshot.get("body"), Some(&Value::from("y")));
        assert_eq!(note.body, "x");
    }
}
