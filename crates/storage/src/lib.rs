use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use pantry_core::{NewNutritionLog, NewPantryItem, NutritionLog, PantryItem, PantryItemUpdate};
use parking_lot::RwLock;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::warn;

pub trait PantryRepository: Send + Sync {
    async fn list_pantry(&self) -> Result<Vec<PantryItem>>;
    async fn create_pantry_item(&self, item: NewPantryItem) -> Result<PantryItem>;
    async fn update_pantry_item(
        &self,
        id: i64,
        update: PantryItemUpdate,
    ) -> Result<Option<PantryItem>>;
    async fn delete_pantry_item(&self, id: i64) -> Result<bool>;
}

pub trait NutritionRepository: Send + Sync {
    async fn list_nutrition_logs(&self) -> Result<Vec<NutritionLog>>;
    async fn get_nutrition_log(&self, id: i64) -> Result<Option<NutritionLog>>;
    async fn create_nutrition_log(&self, log: NewNutritionLog) -> Result<NutritionLog>;
    async fn delete_nutrition_log(&self, id: i64) -> Result<bool>;
}

#[derive(Default)]
struct MemoryTables {
    next_pantry_id: i64,
    next_log_id: i64,
    pantry: BTreeMap<i64, PantryItem>,
    logs: BTreeMap<i64, NutritionLog>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<MemoryTables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PantryRepository for MemoryStore {
    async fn list_pantry(&self) -> Result<Vec<PantryItem>> {
        Ok(self.tables.read().pantry.values().cloned().collect())
    }

    async fn create_pantry_item(&self, item: NewPantryItem) -> Result<PantryItem> {
        let mut tables = self.tables.write();
        tables.next_pantry_id += 1;
        let stored = PantryItem {
            id: tables.next_pantry_id,
            name: item.name,
            quantity: item.quantity,
            unit: item.unit,
            expiry_date: item.expiry_date,
            date_added: Utc::now(),
        };
        tables.pantry.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_pantry_item(
        &self,
        id: i64,
        update: PantryItemUpdate,
    ) -> Result<Option<PantryItem>> {
        let mut tables = self.tables.write();
        let Some(item) = tables.pantry.get_mut(&id) else {
            return Ok(None);
        };
        update.apply_to(item);
        Ok(Some(item.clone()))
    }

    async fn delete_pantry_item(&self, id: i64) -> Result<bool> {
        Ok(self.tables.write().pantry.remove(&id).is_some())
    }
}

impl NutritionRepository for MemoryStore {
    async fn list_nutrition_logs(&self) -> Result<Vec<NutritionLog>> {
        Ok(self.tables.read().logs.values().cloned().collect())
    }

    async fn get_nutrition_log(&self, id: i64) -> Result<Option<NutritionLog>> {
        Ok(self.tables.read().logs.get(&id).cloned())
    }

    async fn create_nutrition_log(&self, log: NewNutritionLog) -> Result<NutritionLog> {
        let mut tables = self.tables.write();
        tables.next_log_id += 1;
        let stored = NutritionLog {
            id: tables.next_log_id,
            date: log.resolved_date(),
            meal_name: log.meal_name,
            calories: log.calories,
            protein: log.protein,
            carbs: log.carbs,
            fat: log.fat,
        };
        tables.logs.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn delete_nutrition_log(&self, id: i64) -> Result<bool> {
        Ok(self.tables.write().logs.remove(&id).is_some())
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        // Every connection to an in-memory database sees its own empty schema,
        // and the data is gone once that connection closes.
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = options
            .connect(database_url)
            .await
            .with_context(|| format!("failed connecting to sqlite at {}", database_url))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pantry (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL,
              quantity REAL NOT NULL,
              unit TEXT NOT NULL,
              expiry_date TEXT,
              date_added TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nutrition_log (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              date TEXT NOT NULL,
              meal_name TEXT NOT NULL,
              calories REAL NOT NULL,
              protein REAL NOT NULL,
              carbs REAL NOT NULL,
              fat REAL NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_pantry_item(&self, id: i64) -> Result<Option<PantryItem>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, quantity, unit, expiry_date, date_added
            FROM pantry
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| pantry_item_from_row(&row)))
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";

fn pantry_item_from_row(row: &SqliteRow) -> PantryItem {
    let id: i64 = row.get("id");
    PantryItem {
        id,
        name: row.get("name"),
        quantity: row.get("quantity"),
        unit: row.get("unit"),
        expiry_date: row
            .get::<Option<String>, _>("expiry_date")
            .and_then(|raw| stored_expiry(id, &raw)),
        date_added: stored_timestamp(id, &row.get::<String, _>("date_added")),
    }
}

fn nutrition_log_from_row(row: &SqliteRow) -> NutritionLog {
    let id: i64 = row.get("id");
    NutritionLog {
        id,
        date: stored_date(id, &row.get::<String, _>("date")),
        meal_name: row.get("meal_name"),
        calories: row.get("calories"),
        protein: row.get("protein"),
        carbs: row.get("carbs"),
        fat: row.get("fat"),
    }
}

fn stored_expiry(id: i64, raw: &str) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(raw, DATE_FORMAT) {
        Ok(date) => Some(date),
        Err(err) => {
            warn!(
                table = "pantry",
                id,
                value = %raw,
                error = %err,
                "unparseable expiry_date, dropping it"
            );
            None
        }
    }
}

fn stored_timestamp(id: i64, raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>().unwrap_or_else(|err| {
        warn!(
            table = "pantry",
            id,
            value = %raw,
            error = %err,
            "unparseable date_added, using now"
        );
        Utc::now()
    })
}

fn stored_date(id: i64, raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).unwrap_or_else(|err| {
        warn!(
            table = "nutrition_log",
            id,
            value = %raw,
            error = %err,
            "unparseable date, using today"
        );
        Utc::now().date_naive()
    })
}

fn date_column(date: Option<NaiveDate>) -> Option<String> {
    date.map(|value| value.format(DATE_FORMAT).to_string())
}

impl PantryRepository for SqliteStore {
    async fn list_pantry(&self) -> Result<Vec<PantryItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, quantity, unit, expiry_date, date_added
            FROM pantry
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(pantry_item_from_row).collect())
    }

    async fn create_pantry_item(&self, item: NewPantryItem) -> Result<PantryItem> {
        let date_added = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO pantry (name, quantity, unit, expiry_date, date_added)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&item.name)
        .bind(item.quantity)
        .bind(&item.unit)
        .bind(date_column(item.expiry_date))
        .bind(date_added.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(PantryItem {
            id: result.last_insert_rowid(),
            name: item.name,
            quantity: item.quantity,
            unit: item.unit,
            expiry_date: item.expiry_date,
            date_added,
        })
    }

    async fn update_pantry_item(
        &self,
        id: i64,
        update: PantryItemUpdate,
    ) -> Result<Option<PantryItem>> {
        let Some(mut item) = self.fetch_pantry_item(id).await? else {
            return Ok(None);
        };
        update.apply_to(&mut item);

        sqlx::query(
            r#"
            UPDATE pantry
            SET name = ?2, quantity = ?3, unit = ?4, expiry_date = ?5
            WHERE id = ?1
            "#,
        )
        .bind(item.id)
        .bind(&item.name)
        .bind(item.quantity)
        .bind(&item.unit)
        .bind(date_column(item.expiry_date))
        .execute(&self.pool)
        .await?;

        Ok(Some(item))
    }

    async fn delete_pantry_item(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pantry WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl NutritionRepository for SqliteStore {
    async fn list_nutrition_logs(&self) -> Result<Vec<NutritionLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, date, meal_name, calories, protein, carbs, fat
            FROM nutrition_log
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(nutrition_log_from_row).collect())
    }

    async fn get_nutrition_log(&self, id: i64) -> Result<Option<NutritionLog>> {
        let row = sqlx::query(
            r#"
            SELECT id, date, meal_name, calories, protein, carbs, fat
            FROM nutrition_log
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| nutrition_log_from_row(&row)))
    }

    async fn create_nutrition_log(&self, log: NewNutritionLog) -> Result<NutritionLog> {
        let date = log.resolved_date();
        let result = sqlx::query(
            r#"
            INSERT INTO nutrition_log (date, meal_name, calories, protein, carbs, fat)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(date.format(DATE_FORMAT).to_string())
        .bind(&log.meal_name)
        .bind(log.calories)
        .bind(log.protein)
        .bind(log.carbs)
        .bind(log.fat)
        .execute(&self.pool)
        .await?;

        Ok(NutritionLog {
            id: result.last_insert_rowid(),
            date,
            meal_name: log.meal_name,
            calories: log.calories,
            protein: log.protein,
            carbs: log.carbs,
            fat: log.fat,
        })
    }

    async fn delete_nutrition_log(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM nutrition_log WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    pub async fn sqlite(database_url: &str) -> Result<Self> {
        let sqlite = SqliteStore::connect(database_url).await?;
        Ok(Self::Sqlite(sqlite))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Store::Memory(_) => "memory",
            Store::Sqlite(_) => "sqlite",
        }
    }
}

impl PantryRepository for Store {
    async fn list_pantry(&self) -> Result<Vec<PantryItem>> {
        match self {
            Store::Memory(store) => store.list_pantry().await,
            Store::Sqlite(store) => store.list_pantry().await,
        }
    }

    async fn create_pantry_item(&self, item: NewPantryItem) -> Result<PantryItem> {
        match self {
            Store::Memory(store) => store.create_pantry_item(item).await,
            Store::Sqlite(store) => store.create_pantry_item(item).await,
        }
    }

    async fn update_pantry_item(
        &self,
        id: i64,
        update: PantryItemUpdate,
    ) -> Result<Option<PantryItem>> {
        match self {
            Store::Memory(store) => store.update_pantry_item(id, update).await,
            Store::Sqlite(store) => store.update_pantry_item(id, update).await,
        }
    }

    async fn delete_pantry_item(&self, id: i64) -> Result<bool> {
        match self {
            Store::Memory(store) => store.delete_pantry_item(id).await,
            Store::Sqlite(store) => store.delete_pantry_item(id).await,
        }
    }
}

impl NutritionRepository for Store {
    async fn list_nutrition_logs(&self) -> Result<Vec<NutritionLog>> {
        match self {
            Store::Memory(store) => store.list_nutrition_logs().await,
            Store::Sqlite(store) => store.list_nutrition_logs().await,
        }
    }

    async fn get_nutrition_log(&self, id: i64) -> Result<Option<NutritionLog>> {
        match self {
            Store::Memory(store) => store.get_nutrition_log(id).await,
            Store::Sqlite(store) => store.get_nutrition_log(id).await,
        }
    }

    async fn create_nutrition_log(&self, log: NewNutritionLog) -> Result<NutritionLog> {
        match self {
            Store::Memory(store) => store.create_nutrition_log(log).await,
            Store::Sqlite(store) => store.create_nutrition_log(log).await,
        }
    }

    async fn delete_nutrition_log(&self, id: i64) -> Result<bool> {
        match self {
            Store::Memory(store) => store.delete_nutrition_log(id).await,
            Store::Sqlite(store) => store.delete_nutrition_log(id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn milk() -> NewPantryItem {
        NewPantryItem {
            name: "Milk".to_string(),
            quantity: 1.0,
            unit: "liters".to_string(),
            expiry_date: NaiveDate::from_ymd_opt(2026, 10, 20),
        }
    }

    fn oatmeal() -> NewNutritionLog {
        NewNutritionLog {
            meal_name: "Oatmeal".to_string(),
            calories: 350.0,
            protein: 12.0,
            carbs: 60.0,
            fat: 6.0,
            date: NaiveDate::from_ymd_opt(2026, 10, 1),
        }
    }

    async fn exercise_pantry(store: &Store) {
        let created = store.create_pantry_item(milk()).await.unwrap();
        assert_eq!(store.list_pantry().await.unwrap().len(), 1);

        let updated = store
            .update_pantry_item(
                created.id,
                PantryItemUpdate {
                    quantity: Some(0.25),
                    ..PantryItemUpdate::default()
                },
            )
            .await
            .unwrap()
            .expect("item should exist");
        assert_eq!(updated.quantity, 0.25);
        assert_eq!(updated.name, "Milk");
        assert_eq!(updated.expiry_date, NaiveDate::from_ymd_opt(2026, 10, 20));

        assert!(store
            .update_pantry_item(created.id + 100, PantryItemUpdate::default())
            .await
            .unwrap()
            .is_none());

        assert!(store.delete_pantry_item(created.id).await.unwrap());
        assert!(!store.delete_pantry_item(created.id).await.unwrap());
        assert!(store.list_pantry().await.unwrap().is_empty());
    }

    async fn exercise_nutrition(store: &Store) {
        let created = store.create_nutrition_log(oatmeal()).await.unwrap();
        let fetched = store
            .get_nutrition_log(created.id)
            .await
            .unwrap()
            .expect("log should exist");
        assert_eq!(fetched, created);

        let undated = NewNutritionLog {
            date: None,
            ..oatmeal()
        };
        let today = store.create_nutrition_log(undated).await.unwrap();
        assert_eq!(today.date, Utc::now().date_naive());
        assert_eq!(store.list_nutrition_logs().await.unwrap().len(), 2);

        assert!(store.delete_nutrition_log(created.id).await.unwrap());
        assert!(store.get_nutrition_log(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = Store::memory();
        exercise_pantry(&store).await;
        exercise_nutrition(&store).await;
    }

    #[tokio::test]
    async fn corrupt_stored_dates_fall_back_instead_of_failing() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            "INSERT INTO pantry (name, quantity, unit, expiry_date, date_added) VALUES ('Rice', 1.0, 'kg', 'someday', 'yesterday')",
        )
        .execute(store.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO nutrition_log (date, meal_name, calories, protein, carbs, fat) VALUES ('not-a-date', 'Soup', 120.0, 4.0, 15.0, 3.0)",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let items = store.list_pantry().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].expiry_date, None);

        let logs = store.list_nutrition_logs().await.unwrap();
        assert_eq!(logs[0].meal_name, "Soup");
        assert_eq!(logs[0].date, Utc::now().date_naive());
    }

    #[tokio::test]
    async fn sqlite_store_round_trips() {
        let store = Store::sqlite("sqlite::memory:").await.unwrap();
        exercise_pantry(&store).await;
        exercise_nutrition(&store).await;
    }
}
