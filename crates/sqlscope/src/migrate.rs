//! Schema operations on a handle.
//!
//! Table-level calls take the model as a type parameter. Column, index and
//! foreign key calls act on the handle's model or table:
//!
//! ```ignore
//! db.auto_migrate::<User>();
//! db.model_type::<User>().add_index("idx_user_name", &["name"]);
//! ```

use crate::db::Db;
use crate::registry::ModelStruct;
use sqlscope_core::{Error, Model, Record, ReferentialAction, SchemaErrorKind, SqlType};
use sqlscope_schema::{
    ColumnDef, ForeignKeyDef, IndexDef, IntrospectQuery, SchemaOperation, TableDef,
    foreign_key_name, generator_for_dialect, has_column, has_index, has_table,
};

impl Db {
    /// CREATE TABLE for `M`, with its declared indexes and many-to-many link
    /// tables.
    pub fn create_table<M: Model>(&self) -> Db {
        let model = self.model_struct_of::<M>();
        let mut db = self.clone();
        db.create_table_for(&model);
        db
    }

    pub fn drop_table<M: Model>(&self) -> Db {
        self.drop_table_named(self.table_name_of::<M>())
    }

    pub fn drop_table_named(&self, name: impl Into<String>) -> Db {
        let mut db = self.clone();
        db.run_schema(&[SchemaOperation::DropTable {
            name: name.into(),
            if_exists: false,
        }]);
        db
    }

    pub fn drop_table_if_exists<M: Model>(&self) -> Db {
        let mut db = self.clone();
        db.run_schema(&[SchemaOperation::DropTable {
            name: self.table_name_of::<M>(),
            if_exists: true,
        }]);
        db
    }

    pub fn has_table<M: Model>(&self) -> bool {
        self.has_table_named(&self.table_name_of::<M>())
    }

    pub fn has_table_named(&self, name: &str) -> bool {
        self.exists(has_table(self.dialect, name))
    }

    /// Create the table of `M`, or add whatever columns, indexes and link
    /// tables it lacks. Nothing is changed or dropped.
    pub fn auto_migrate<M: Model>(&self) -> Db {
        let model = self.model_struct_of::<M>();
        let mut db = self.clone();
        if !db.has_table_named(&model.table_name) {
            db.create_table_for(&model);
            return db;
        }

        let mut ops = Vec::new();
        for field in model.fields {
            if !db.exists(has_column(db.dialect, &model.table_name, field.column_name)) {
                ops.push(SchemaOperation::AddColumn {
                    table: model.table_name.clone(),
                    column: ColumnDef::from(field),
                });
            }
        }
        for index in IndexDef::declared(&model.table_name, model.fields) {
            if !db.exists(has_index(db.dialect, &model.table_name, &index.name)) {
                ops.push(SchemaOperation::CreateIndex(index));
            }
        }
        db.run_schema(&ops);
        db.create_join_tables(&model);
        db
    }

    /// Change a column's type, spelled for the database.
    pub fn modify_column(&self, column: &str, sql_type: &str) -> Db {
        self.on_scoped_table(|table| SchemaOperation::ModifyColumn {
            table,
            column: column.to_string(),
            sql_type: sql_type.to_string(),
        })
    }

    pub fn drop_column(&self, column: &str) -> Db {
        self.on_scoped_table(|table| SchemaOperation::DropColumn {
            table,
            column: column.to_string(),
        })
    }

    pub fn add_index(&self, name: &str, columns: &[&str]) -> Db {
        self.on_scoped_table(|table| {
            SchemaOperation::CreateIndex(IndexDef::new(table, name, columns.iter().copied()))
        })
    }

    pub fn add_unique_index(&self, name: &str, columns: &[&str]) -> Db {
        self.on_scoped_table(|table| {
            SchemaOperation::CreateIndex(
                IndexDef::new(table, name, columns.iter().copied()).unique(true),
            )
        })
    }

    pub fn remove_index(&self, name: &str) -> Db {
        self.on_scoped_table(|table| SchemaOperation::DropIndex {
            table,
            name: name.to_string(),
        })
    }

    /// Add a foreign key from `column` to `references`, e.g. `users(id)`.
    pub fn add_foreign_key(
        &self,
        column: &str,
        references: &str,
        on_delete: ReferentialAction,
        on_update: ReferentialAction,
    ) -> Db {
        self.on_scoped_table(|table| {
            SchemaOperation::AddForeignKey(
                ForeignKeyDef::new(&table, column, references).actions(on_delete, on_update),
            )
        })
    }

    pub fn remove_foreign_key(&self, column: &str, references: &str) -> Db {
        self.on_scoped_table(|table| SchemaOperation::DropForeignKey {
            name: foreign_key_name(&table, column, references),
            table,
        })
    }

    fn on_scoped_table(&self, op: impl FnOnce(String) -> SchemaOperation) -> Db {
        let mut db = self.clone();
        let table = match (self.search.table_name(), &self.value) {
            (Some(table), _) => table.to_string(),
            (None, Some(value)) => self.model_struct(&value.descriptor()).table_name.clone(),
            (None, None) => {
                db.add_error(Error::schema(
                    SchemaErrorKind::Invalid,
                    "no model or table to change",
                ));
                return db;
            }
        };
        db.run_schema(&[op(table)]);
        db
    }

    fn create_table_for(&mut self, model: &ModelStruct) {
        let mut ops = vec![SchemaOperation::CreateTable(TableDef::from_fields(
            model.table_name.clone(),
            model.fields,
        ))];
        ops.extend(
            IndexDef::declared(&model.table_name, model.fields)
                .into_iter()
                .map(SchemaOperation::CreateIndex),
        );
        self.run_schema(&ops);
        self.create_join_tables(model);
    }

    fn create_join_tables(&mut self, model: &ModelStruct) {
        let mut ops = Vec::new();
        for relationship in &model.relationships {
            let Some(join) = &relationship.join_table else {
                continue;
            };
            if self.has_table_named(&join.table) {
                continue;
            }
            let owner_type = model
                .descriptor
                .field(&relationship.foreign_key)
                .map_or(SqlType::BigInt, |f| f.sql_type);
            let related_type = relationship
                .related
                .field(&relationship.association_foreign_key)
                .map_or(SqlType::BigInt, |f| f.sql_type);
            ops.push(SchemaOperation::CreateTable(TableDef::join_table(
                join.table.clone(),
                [
                    (join.foreign_key.as_str(), owner_type),
                    (join.association_foreign_key.as_str(), related_type),
                ],
            )));
        }
        self.run_schema(&ops);
    }

    /// Render and execute each operation, recording failures on the handle.
    fn run_schema(&mut self, ops: &[SchemaOperation]) {
        let generator = generator_for_dialect(self.dialect);
        for op in ops {
            let statements = match generator.generate(op) {
                Ok(statements) => statements,
                Err(e) => {
                    self.add_error(e);
                    continue;
                }
            };
            for sql in statements {
                match self.exec_logged(&sql, &[]) {
                    Ok(_) => {
                        tracing::debug!(
                            target: "sqlscope",
                            op = op.name(),
                            table = op.table(),
                            "schema change applied"
                        );
                    }
                    Err(e) => self.add_error(e),
                }
            }
        }
    }

    fn exists(&self, query: IntrospectQuery) -> bool {
        match self.query_logged(&query.sql, &query.params) {
            Ok(rows) => rows
                .first()
                .and_then(|row| row.get(0))
                .and_then(|v| v.as_i64())
                .is_some_and(|n| n > 0),
            Err(e) => {
                tracing::warn!(target: "sqlscope", error = %e, "introspection failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{Person, memory_db};
    use sqlscope_schema::has_index;

    #[test]
    fn create_and_drop_table() {
        let db = memory_db();
        assert!(!db.has_table::<Person>());
        assert!(db.create_table::<Person>().error().is_none());
        assert!(db.has_table::<Person>());
        assert!(db.has_table_named("people"));
        assert!(db.drop_table::<Person>().error().is_none());
        assert!(!db.has_table::<Person>());
        assert!(db.drop_table_if_exists::<Person>().error().is_none());
        assert!(db.drop_table::<Person>().error().is_some());
    }

    #[test]
    fn scoped_operations_need_a_table() {
        let db = memory_db();
        assert!(db.add_index("idx_x", &["x"]).error().is_some());
        db.create_table::<Person>();
        let scoped = db.model_type::<Person>();
        assert!(scoped.add_index("idx_people_name", &["name"]).error().is_none());
        assert!(db.exists(has_index(db.dialect, "people", "idx_people_name")));
        assert!(scoped.remove_index("idx_people_name").error().is_none());
        assert!(!db.exists(has_index(db.dialect, "people", "idx_people_name")));
        assert!(scoped.drop_column("age").error().is_none());
        assert!(scoped.modify_column("name", "TEXT").error().is_some());
    }
}
