//! Schema storage: declare and load the property types of a database.

use crate::model::{PropertyType, Schema};

use super::{Result, Storage, StorageError};

impl Storage {
    /// Declares the schema of `database`, replacing any previous declaration.
    ///
    /// Existing documents are left as they are; properties dropped from the
    /// schema simply stop being written.
    pub fn declare_schema(&self, database: &str, schema: &Schema) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM schema_property WHERE database = ?1",
            rusqlite::params![database],
        )?;
        for (position, (name, ty)) in schema.iter().enumerate() {
            tx.execute(
                "INSERT INTO schema_property (database, name, type, position)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![database, name, ty.as_str(), position as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Loads the declared schema of `database`. Undeclared databases have an
    /// empty schema.
    pub fn load_schema(&self, database: &str) -> Result<Schema> {
        let mut stmt = self.conn.prepare(
            "SELECT name, type FROM schema_property WHERE database = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(rusqlite::params![database], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut schema = Schema::new();
        for row in rows {
            let (name, ty) = row?;
            let ty = ty
                .parse::<PropertyType>()
                .map_err(|e| StorageError::Corrupt(format!("{database}.{name}: {e}")))?;
            schema.insert(name, ty);
        }
        Ok(schema)
    }

    /// Names of all databases with a declared schema.
    pub fn list_databases(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT database FROM schema_property ORDER BY database")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps_schema() -> Schema {
        Schema::new()
            .with("Activity Type", PropertyType::Title)
            .with("Date", PropertyType::Date)
            .with("Total Steps", PropertyType::Number)
    }

    #[test]
    fn declare_and_load_schema() {
        let storage = Storage::open_in_memory().unwrap();
        storage.declare_schema("steps", &steps_schema()).unwrap();

        let loaded = storage.load_schema("steps").unwrap();
        assert_eq!(loaded, steps_schema());
    }

    #[test]
    fn redeclare_replaces_schema() {
        let storage = Storage::open_in_memory().unwrap();
        storage.declare_schema("steps", &steps_schema()).unwrap();
        storage
            .declare_schema("steps", &Schema::new().with("Date", PropertyType::Date))
            .unwrap();

        let loaded = storage.load_schema("steps").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("Total Steps"), None);
    }

    #[test]
    fn undeclared_database_has_empty_schema() {
        let storage = Storage::open_in_memory().unwrap();
        assert!(storage.load_schema("nothing").unwrap().is_empty());
    }

    #[test]
    fn lists_declared_databases() {
        let storage = Storage::open_in_memory().unwrap();
        storage.declare_schema("sleep", &steps_schema()).unwrap();
        storage.declare_schema("daily", &steps_schema()).unwrap();

        assert_eq!(storage.list_databases().unwrap(), ["daily", "sleep"]);
    }
}
