//! SQLite order store.
//!
//! Every operation opens its own connection on a blocking thread, so no
//! transaction or lock outlives a single call. Decimals are stored as text
//! and timestamps as RFC 3339.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rust_decimal::Decimal;

use crate::application::ports::{OrderStore, StoreError};
use crate::domain::order::{Broker, NewOrder, Order, OrderId, OrderStatus};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    broker_order_id TEXT,
    broker TEXT NOT NULL,
    instrument_key TEXT NOT NULL,
    symbol TEXT NOT NULL,
    exchange TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    side TEXT NOT NULL,
    product TEXT NOT NULL,
    entry_price TEXT NOT NULL,
    stoploss_percent TEXT NOT NULL,
    current_stop_price TEXT,
    potential_profit TEXT,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_orders_open
    ON orders(broker, status, instrument_key);

CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_one_active
    ON orders(broker, instrument_key)
    WHERE status IN ('OPEN', 'TRIGGERED');
";

const COLUMNS: &str = "id, broker_order_id, broker, instrument_key, symbol, exchange, quantity, \
     side, product, entry_price, stoploss_percent, current_stop_price, potential_profit, \
     status, created_at, updated_at";

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// SQLite-backed `OrderStore`.
#[derive(Debug, Clone)]
pub struct SqliteOrderStore {
    path: PathBuf,
}

impl SqliteOrderStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the file cannot be opened or the
    /// schema cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store
            .with_connection(|conn| {
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;

        tracing::info!(path = %store.path.display(), "Order store initialized");
        Ok(store)
    }

    /// Database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("store task failed: {e}")))?
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

/// Raw column values, decoded into an [`Order`] outside the rusqlite closure.
struct OrderRow {
    id: i64,
    broker_order_id: Option<String>,
    broker: String,
    instrument_key: String,
    symbol: String,
    exchange: String,
    quantity: u32,
    side: String,
    product: String,
    entry_price: String,
    stoploss_percent: String,
    current_stop_price: Option<String>,
    potential_profit: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
}

impl OrderRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            broker_order_id: row.get(1)?,
            broker: row.get(2)?,
            instrument_key: row.get(3)?,
            symbol: row.get(4)?,
            exchange: row.get(5)?,
            quantity: row.get(6)?,
            side: row.get(7)?,
            product: row.get(8)?,
            entry_price: row.get(9)?,
            stoploss_percent: row.get(10)?,
            current_stop_price: row.get(11)?,
            potential_profit: row.get(12)?,
            status: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }

    fn into_order(self) -> Result<Order, StoreError> {
        let id = self.id;
        let corrupt = |message: String| StoreError::Corrupt { id, message };

        let decimal = |value: &str| Decimal::from_str(value).map_err(|e| corrupt(e.to_string()));
        let optional_decimal = |value: Option<&str>| value.map(decimal).transpose();
        let timestamp = |value: &str| {
            DateTime::parse_from_rfc3339(value)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| corrupt(e.to_string()))
        };

        Ok(Order {
            id: OrderId(id),
            broker_order_id: self.broker_order_id,
            broker: self.broker.parse().map_err(|e| corrupt(format!("{e}")))?,
            instrument_key: self.instrument_key,
            symbol: self.symbol,
            exchange: self.exchange,
            quantity: self.quantity,
            side: self.side.parse().map_err(|e| corrupt(format!("{e}")))?,
            product: self.product.parse().map_err(|e| corrupt(format!("{e}")))?,
            entry_price: decimal(&self.entry_price)?,
            stoploss_percent: decimal(&self.stoploss_percent)?,
            current_stop_price: optional_decimal(self.current_stop_price.as_deref())?,
            potential_profit: optional_decimal(self.potential_profit.as_deref())?,
            status: self.status.parse().map_err(|e| corrupt(format!("{e}")))?,
            created_at: timestamp(&self.created_at)?,
            updated_at: timestamp(&self.updated_at)?,
        })
    }
}

fn query_orders(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Order>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM orders WHERE {filter}"))?;
    let rows = stmt
        .query_map(params, OrderRow::read)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(OrderRow::into_order).collect()
}

fn query_order(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Option<Order>, StoreError> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM orders WHERE {filter}"),
        params,
        OrderRow::read,
    )
    .optional()?
    .map(OrderRow::into_order)
    .transpose()
}

fn expect_one(id: OrderId, affected: usize) -> Result<(), StoreError> {
    if affected == 0 {
        Err(StoreError::NotFound(id))
    } else {
        Ok(())
    }
}

// =============================================================================
// OrderStore
// =============================================================================

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn insert(&self, order: NewOrder) -> Result<Order, StoreError> {
        self.with_connection(move |conn| {
            let now = Utc::now();
            let stored = Order::from_new(OrderId(0), order, now);
            conn.execute(
                "INSERT INTO orders (broker_order_id, broker, instrument_key, symbol, exchange, \
                 quantity, side, product, entry_price, stoploss_percent, current_stop_price, \
                 potential_profit, status, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    stored.broker_order_id,
                    stored.broker.as_str(),
                    stored.instrument_key,
                    stored.symbol,
                    stored.exchange,
                    stored.quantity,
                    stored.side.as_str(),
                    stored.product.as_str(),
                    stored.entry_price.to_string(),
                    stored.stoploss_percent.to_string(),
                    stored.current_stop_price.map(|p| p.to_string()),
                    stored.potential_profit.map(|p| p.to_string()),
                    stored.status.as_str(),
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(failure, _)
                    if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    StoreError::ActiveOrderExists {
                        broker: stored.broker,
                        instrument_key: stored.instrument_key.clone(),
                    }
                }
                other => other.into(),
            })?;
            Ok(Order {
                id: OrderId(conn.last_insert_rowid()),
                ..stored
            })
        })
        .await
    }

    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<(), StoreError> {
        self.with_connection(move |conn| {
            let affected = conn.execute(
                "UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), id.value()],
            )?;
            expect_one(id, affected)
        })
        .await
    }

    async fn transition_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        self.with_connection(move |conn| {
            let affected = conn.execute(
                "UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![to.as_str(), Utc::now().to_rfc3339(), id.value(), from.as_str()],
            )?;
            if affected > 0 {
                return Ok(true);
            }
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM orders WHERE id = ?1)",
                params![id.value()],
                |row| row.get(0),
            )?;
            if exists {
                Ok(false)
            } else {
                Err(StoreError::NotFound(id))
            }
        })
        .await
    }

    async fn update_trailing_state(
        &self,
        id: OrderId,
        stop_price: Decimal,
        profit_pct: Decimal,
    ) -> Result<(), StoreError> {
        self.with_connection(move |conn| {
            let affected = conn.execute(
                "UPDATE orders SET current_stop_price = ?1, potential_profit = ?2, \
                 updated_at = ?3 WHERE id = ?4",
                params![
                    stop_price.to_string(),
                    profit_pct.to_string(),
                    Utc::now().to_rfc3339(),
                    id.value()
                ],
            )?;
            expect_one(id, affected)
        })
        .await
    }

    async fn find_open_by_instrument(
        &self,
        broker: Broker,
        instrument_key: &str,
    ) -> Result<Option<Order>, StoreError> {
        let instrument_key = instrument_key.to_string();
        self.with_connection(move |conn| {
            query_order(
                conn,
                "broker = ?1 AND instrument_key = ?2 AND status = ?3 ORDER BY id LIMIT 1",
                params![broker.as_str(), instrument_key, OrderStatus::Open.as_str()],
            )
        })
        .await
    }

    async fn find_open(&self, broker: Broker) -> Result<Vec<Order>, StoreError> {
        self.with_connection(move |conn| {
            query_orders(
                conn,
                "broker = ?1 AND status = ?2 ORDER BY id",
                params![broker.as_str(), OrderStatus::Open.as_str()],
            )
        })
        .await
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        self.with_connection(move |conn| query_order(conn, "id = ?1", params![id.value()]))
            .await
    }
}
