//! In-process entity store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{sort_rows, EntityStore};
use crate::error::FabricResult;
use crate::fields::{FieldValues, FieldValuesExt, Filter};

#[derive(Default)]
struct Table {
    rows: HashMap<String, FieldValues>,
    next_id: u64,
}

/// Entity store kept in process memory. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in `table`.
    pub fn len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.rows.len())
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn insert(
        &self,
        table: &str,
        key: Option<&str>,
        fields: FieldValues,
    ) -> FabricResult<String> {
        let mut tables = self.tables.write();
        let table = tables.entry(table.to_string()).or_default();
        let key = match key {
            Some(key) => key.to_string(),
            None => {
                table.next_id += 1;
                table.next_id.to_string()
            }
        };
        table.rows.insert(key.clone(), fields);
        Ok(key)
    }

    async fn get(&self, table: &str, key: &str) -> FabricResult<Option<FieldValues>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .and_then(|t| t.rows.get(key).cloned()))
    }

    async fn find(&self, table: &str, filter: &Filter) -> FabricResult<Vec<(String, FieldValues)>> {
        let tables = self.tables.read();
        let mut rows: Vec<(String, FieldValues)> = tables
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|(_, fields)| fields.matches(filter))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        sort_rows(&mut rows);
        Ok(rows)
    }

    async fn delete(&self, table: &str, filter: &Filter) -> FabricResult<u64> {
        let mut tables = self.tables.write();
        let Some(table) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = table.rows.len();
        table.rows.retain(|_, fields| !fields.matches(filter));
        Ok((before - table.rows.len()) as u64)
    }

    async fn update_all(
        &self,
        table: &str,
        filter: &Filter,
        fields: &FieldValues,
    ) -> FabricResult<u64> {
        let mut tables = self.tables.write();
        let Some(table) = tables.get_mut(table) else {
            return Ok(0);
        };
        let mut updated = 0;
        for row in table.rows.values_mut().filter(|row| row.matches(filter)) {
            for (field, value) in fields {
                row.set_field(field, value.clone());
            }
            updated += 1;
        }
        Ok(updated)
    }

    async fn ping(&self) -> FabricResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_values;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_surrogate_ids_are_sequential() {
        let store = MemoryStore::new();
        for i in 0..11 {
            let key = store
                .insert("T", None, field_values! { "n" => i })
                .await
                .unwrap();
            assert_eq!(key, (i + 1).to_string());
        }
        let keys: Vec<String> = store
            .find("T", &Filter::new())
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys.first().map(String::as_str), Some("1"));
        assert_eq!(keys.last().map(String::as_str), Some("11"));
    }

    #[tokio::test]
    async fn test_natural_key_upserts() {
        let store = MemoryStore::new();
        store.insert("T", Some("k"), field_values! { "v" => 1 }).await.unwrap();
        store.insert("T", Some("k"), field_values! { "v" => 2 }).await.unwrap();
        assert_eq!(store.len("T"), 1);
        assert_eq!(
            store.get("T", "k").await.unwrap(),
            Some(field_values! { "v" => 2 })
        );
    }

    #[tokio::test]
    async fn test_update_all_counts_matches() {
        let store = MemoryStore::new();
        store.insert("T", None, field_values! { "s" => "a", "x" => 0 }).await.unwrap();
        store.insert("T", None, field_values! { "s" => "a", "x" => 0 }).await.unwrap();
        store.insert("T", None, field_values! { "s" => "b", "x" => 0 }).await.unwrap();

        let n = store
            .update_all("T", &field_values! { "s" => "a" }, &field_values! { "x" => 1 })
            .await
            .unwrap();
        assert_eq!(n, 2);
        let updated = store.find("T", &field_values! { "x" => 1 }).await.unwrap();
        assert_eq!(updated.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_table_is_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.delete("NOPE", &Filter::new()).await.unwrap(), 0);
        assert!(store.get("NOPE", "k").await.unwrap().is_none());
        assert!(store.is_empty("NOPE"));
    }
}
