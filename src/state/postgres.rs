//! PostgreSQL record store

use super::models::{
    opt_hash, parse_address, parse_h256, parse_u256, BlockLog, EventQuery, EventTxLog,
    RetrySwap, RollbackSummary, StoreStats, Swap, SwapDirection, SwapPair, SwapPairSm, TxKind,
    TxRecord, TxStatus,
};
use super::store::{Mutation, RecordStore};
use crate::chain::Chain;
use crate::config::DatabaseConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::swap::SwapStatus;
use crate::swap_pair::SwapPairStatus;

use async_trait::async_trait;
use ethers::types::{Address, H256};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{PgConnection, Row};
use tracing::{debug, info};

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS block_log (
        id BIGSERIAL PRIMARY KEY,
        chain VARCHAR(8) NOT NULL,
        height BIGINT NOT NULL,
        block_hash VARCHAR(66) NOT NULL,
        parent_hash VARCHAR(66) NOT NULL,
        block_time BIGINT NOT NULL,
        create_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (chain, height)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS event_tx_log (
        id BIGSERIAL PRIMARY KEY,
        kind VARCHAR(32) NOT NULL,
        chain VARCHAR(8) NOT NULL,
        token_addr VARCHAR(42) NOT NULL,
        peer_token_addr VARCHAR(42),
        participant VARCHAR(42) NOT NULL,
        amount TEXT NOT NULL,
        fee_amount TEXT NOT NULL,
        name TEXT NOT NULL,
        symbol TEXT NOT NULL,
        decimals SMALLINT NOT NULL,
        tx_hash VARCHAR(66) NOT NULL,
        log_index BIGINT NOT NULL,
        block_hash VARCHAR(66) NOT NULL,
        height BIGINT NOT NULL,
        confirmed_num BIGINT NOT NULL DEFAULT 0,
        status VARCHAR(16) NOT NULL,
        phase VARCHAR(16) NOT NULL,
        update_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (chain, tx_hash, log_index)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_event_kind_phase ON event_tx_log (kind, phase, height)",
    "CREATE INDEX IF NOT EXISTS idx_event_chain_status ON event_tx_log (chain, status)",
    r#"
    CREATE TABLE IF NOT EXISTS swap (
        id BIGSERIAL PRIMARY KEY,
        status VARCHAR(20) NOT NULL,
        direction VARCHAR(16) NOT NULL,
        sponsor VARCHAR(42) NOT NULL,
        erc20_addr VARCHAR(42) NOT NULL,
        bep20_addr VARCHAR(42) NOT NULL,
        symbol TEXT NOT NULL,
        decimals SMALLINT NOT NULL,
        amount TEXT NOT NULL,
        start_tx_hash VARCHAR(66) NOT NULL,
        fill_tx_hash VARCHAR(66) NOT NULL DEFAULT '',
        log TEXT NOT NULL DEFAULT '',
        record_hash VARCHAR(64) NOT NULL,
        create_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        update_time TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_swap_status ON swap (status)",
    "CREATE INDEX IF NOT EXISTS idx_swap_start_tx ON swap (start_tx_hash)",
    r#"
    CREATE TABLE IF NOT EXISTS swap_pair_sm (
        id BIGSERIAL PRIMARY KEY,
        status VARCHAR(20) NOT NULL,
        sponsor VARCHAR(42) NOT NULL,
        erc20_addr VARCHAR(42) NOT NULL,
        bep20_addr VARCHAR(42) NOT NULL DEFAULT '',
        name TEXT NOT NULL,
        symbol TEXT NOT NULL,
        decimals SMALLINT NOT NULL,
        register_tx_hash VARCHAR(66) NOT NULL,
        create_tx_hash VARCHAR(66) NOT NULL DEFAULT '',
        log TEXT NOT NULL DEFAULT '',
        record_hash VARCHAR(64) NOT NULL,
        create_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        update_time TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_swap_pair_sm_status ON swap_pair_sm (status)",
    r#"
    CREATE TABLE IF NOT EXISTS swap_pair (
        id BIGSERIAL PRIMARY KEY,
        symbol TEXT NOT NULL,
        name TEXT NOT NULL,
        decimals SMALLINT NOT NULL,
        erc20_addr VARCHAR(42) NOT NULL UNIQUE,
        bep20_addr VARCHAR(42) NOT NULL UNIQUE,
        low_bound TEXT NOT NULL,
        upper_bound TEXT NOT NULL,
        available BOOLEAN NOT NULL,
        create_time TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS retry_swap (
        id BIGSERIAL PRIMARY KEY,
        swap_id BIGINT NOT NULL REFERENCES swap (id),
        direction VARCHAR(16) NOT NULL,
        sponsor VARCHAR(42) NOT NULL,
        erc20_addr VARCHAR(42) NOT NULL,
        bep20_addr VARCHAR(42) NOT NULL,
        symbol TEXT NOT NULL,
        decimals SMALLINT NOT NULL,
        amount TEXT NOT NULL,
        start_tx_hash VARCHAR(66) NOT NULL,
        retry_tx_hash VARCHAR(66) NOT NULL DEFAULT '',
        done BOOLEAN NOT NULL DEFAULT FALSE,
        error_msg TEXT NOT NULL DEFAULT '',
        record_hash VARCHAR(64) NOT NULL,
        create_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        update_time TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Tracking tables share one layout
fn tx_table(kind: TxKind) -> &'static str {
    match kind {
        TxKind::SwapFill => "swap_fill_tx",
        TxKind::SwapPairCreate => "swap_pair_create_tx",
        TxKind::RetrySwap => "retry_swap_tx",
    }
}

fn tx_table_ddl(kind: TxKind) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id BIGSERIAL PRIMARY KEY,
            owner_id BIGINT NOT NULL,
            chain VARCHAR(8) NOT NULL,
            tx_hash VARCHAR(66) NOT NULL UNIQUE,
            nonce BIGINT NOT NULL,
            gas_price TEXT NOT NULL,
            consumed_fee TEXT,
            height BIGINT,
            status VARCHAR(16) NOT NULL,
            track_retry_counter INTEGER NOT NULL DEFAULT 0,
            error_msg TEXT NOT NULL DEFAULT '',
            create_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            update_time TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        table = tx_table(kind)
    )
}

const TX_KINDS: [TxKind; 3] = [TxKind::SwapFill, TxKind::SwapPairCreate, TxKind::RetrySwap];

/// Record store backed by PostgreSQL
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect the pool
    pub async fn new(config: &DatabaseConfig) -> RelayerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Create tables and indexes; safe to run on every start
    pub async fn run_migrations(&self) -> RelayerResult<()> {
        for ddl in MIGRATIONS {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        for kind in TX_KINDS {
            sqlx::query(&tx_table_ddl(kind)).execute(&self.pool).await?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_status ON {table} (status)",
                table = tx_table(kind)
            ))
            .execute(&self.pool)
            .await?;
        }

        info!("Database migrations complete");
        Ok(())
    }

    async fn apply_one(conn: &mut PgConnection, mutation: Mutation) -> RelayerResult<Option<i64>> {
        match mutation {
            Mutation::InsertBlock(block) => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO block_log (chain, height, block_hash, parent_hash, block_time)
                    VALUES ($1, $2, $3, $4, $5)
                    RETURNING id
                    "#,
                )
                .bind(block.chain.as_str())
                .bind(block.height as i64)
                .bind(format!("{:?}", block.block_hash))
                .bind(format!("{:?}", block.parent_hash))
                .bind(block.block_time as i64)
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| insert_error(e, "block_log"))?;
                Ok(Some(row.try_get("id")?))
            }
            Mutation::InsertEvent(event) => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO event_tx_log (kind, chain, token_addr, peer_token_addr,
                        participant, amount, fee_amount, name, symbol, decimals, tx_hash,
                        log_index, block_hash, height, confirmed_num, status, phase)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                        $15, $16, $17)
                    ON CONFLICT (chain, tx_hash, log_index) DO UPDATE
                        SET block_hash = EXCLUDED.block_hash, height = EXCLUDED.height,
                            update_time = NOW()
                    RETURNING id
                    "#,
                )
                .bind(event.kind.as_str())
                .bind(event.chain.as_str())
                .bind(format!("{:?}", event.token_addr))
                .bind(event.peer_token_addr.map(|a| format!("{:?}", a)))
                .bind(format!("{:?}", event.participant))
                .bind(&event.amount)
                .bind(&event.fee_amount)
                .bind(&event.name)
                .bind(&event.symbol)
                .bind(event.decimals as i16)
                .bind(format!("{:?}", event.tx_hash))
                .bind(event.log_index as i64)
                .bind(format!("{:?}", event.block_hash))
                .bind(event.height as i64)
                .bind(event.confirmed_num as i64)
                .bind(event.status.as_str())
                .bind(event.phase.as_str())
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| insert_error(e, "event_tx_log"))?;
                Ok(Some(row.try_get("id")?))
            }
            Mutation::SetEventPhase { id, from, to } => {
                let result = sqlx::query(
                    "UPDATE event_tx_log SET phase = $1, update_time = NOW() WHERE id = $2 AND phase = $3",
                )
                .bind(to.as_str())
                .bind(id)
                .bind(from.as_str())
                .execute(&mut *conn)
                .await?;
                expect_one(result.rows_affected(), || {
                    format!("event {} not in phase {}", id, from)
                })?;
                Ok(None)
            }
            Mutation::InsertSwap(swap) => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO swap (status, direction, sponsor, erc20_addr, bep20_addr, symbol,
                        decimals, amount, start_tx_hash, fill_tx_hash, log, record_hash)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                    RETURNING id
                    "#,
                )
                .bind(swap.status.as_str())
                .bind(swap.direction.as_str())
                .bind(format!("{:?}", swap.sponsor))
                .bind(format!("{:?}", swap.erc20_addr))
                .bind(format!("{:?}", swap.bep20_addr))
                .bind(&swap.symbol)
                .bind(swap.decimals as i16)
                .bind(&swap.amount)
                .bind(format!("{:?}", swap.start_tx_hash))
                .bind(opt_hash(&swap.fill_tx_hash))
                .bind(&swap.log)
                .bind(&swap.record_hash)
                .fetch_one(&mut *conn)
                .await?;
                Ok(Some(row.try_get("id")?))
            }
            Mutation::UpdateSwap { swap, expected } => {
                let result = sqlx::query(
                    r#"
                    UPDATE swap SET status = $1, direction = $2, sponsor = $3, erc20_addr = $4,
                        bep20_addr = $5, symbol = $6, decimals = $7, amount = $8,
                        start_tx_hash = $9, fill_tx_hash = $10, log = $11, record_hash = $12,
                        update_time = NOW()
                    WHERE id = $13 AND status = $14
                    "#,
                )
                .bind(swap.status.as_str())
                .bind(swap.direction.as_str())
                .bind(format!("{:?}", swap.sponsor))
                .bind(format!("{:?}", swap.erc20_addr))
                .bind(format!("{:?}", swap.bep20_addr))
                .bind(&swap.symbol)
                .bind(swap.decimals as i16)
                .bind(&swap.amount)
                .bind(format!("{:?}", swap.start_tx_hash))
                .bind(opt_hash(&swap.fill_tx_hash))
                .bind(&swap.log)
                .bind(&swap.record_hash)
                .bind(swap.id)
                .bind(expected.as_str())
                .execute(&mut *conn)
                .await?;
                expect_one(result.rows_affected(), || {
                    format!("swap {} is no longer {}", swap.id, expected)
                })?;
                Ok(None)
            }
            Mutation::InsertSwapPairSm(record) => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO swap_pair_sm (status, sponsor, erc20_addr, bep20_addr, name,
                        symbol, decimals, register_tx_hash, create_tx_hash, log, record_hash)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    RETURNING id
                    "#,
                )
                .bind(record.status.as_str())
                .bind(format!("{:?}", record.sponsor))
                .bind(format!("{:?}", record.erc20_addr))
                .bind(opt_address(&record.bep20_addr))
                .bind(&record.name)
                .bind(&record.symbol)
                .bind(record.decimals as i16)
                .bind(format!("{:?}", record.register_tx_hash))
                .bind(opt_hash(&record.create_tx_hash))
                .bind(&record.log)
                .bind(&record.record_hash)
                .fetch_one(&mut *conn)
                .await?;
                Ok(Some(row.try_get("id")?))
            }
            Mutation::UpdateSwapPairSm { record, expected } => {
                let result = sqlx::query(
                    r#"
                    UPDATE swap_pair_sm SET status = $1, sponsor = $2, erc20_addr = $3,
                        bep20_addr = $4, name = $5, symbol = $6, decimals = $7,
                        register_tx_hash = $8, create_tx_hash = $9, log = $10,
                        record_hash = $11, update_time = NOW()
                    WHERE id = $12 AND status = $13
                    "#,
                )
                .bind(record.status.as_str())
                .bind(format!("{:?}", record.sponsor))
                .bind(format!("{:?}", record.erc20_addr))
                .bind(opt_address(&record.bep20_addr))
                .bind(&record.name)
                .bind(&record.symbol)
                .bind(record.decimals as i16)
                .bind(format!("{:?}", record.register_tx_hash))
                .bind(opt_hash(&record.create_tx_hash))
                .bind(&record.log)
                .bind(&record.record_hash)
                .bind(record.id)
                .bind(expected.as_str())
                .execute(&mut *conn)
                .await?;
                expect_one(result.rows_affected(), || {
                    format!("swap pair sm {} is no longer {}", record.id, expected)
                })?;
                Ok(None)
            }
            Mutation::InsertSwapPair(pair) => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO swap_pair (symbol, name, decimals, erc20_addr, bep20_addr,
                        low_bound, upper_bound, available)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    RETURNING id
                    "#,
                )
                .bind(&pair.symbol)
                .bind(&pair.name)
                .bind(pair.decimals as i16)
                .bind(format!("{:?}", pair.erc20_addr))
                .bind(format!("{:?}", pair.bep20_addr))
                .bind(&pair.low_bound)
                .bind(&pair.upper_bound)
                .bind(pair.available)
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| insert_error(e, "swap_pair"))?;
                Ok(Some(row.try_get("id")?))
            }
            Mutation::InsertTx(tx) => {
                let row = sqlx::query(&format!(
                    r#"
                    INSERT INTO {} (owner_id, chain, tx_hash, nonce, gas_price, consumed_fee,
                        height, status, track_retry_counter, error_msg)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    RETURNING id
                    "#,
                    tx_table(tx.kind)
                ))
                .bind(tx.owner_id)
                .bind(tx.chain.as_str())
                .bind(format!("{:?}", tx.tx_hash))
                .bind(tx.nonce as i64)
                .bind(tx.gas_price.to_string())
                .bind(tx.consumed_fee.map(|f| f.to_string()))
                .bind(tx.height.map(|h| h as i64))
                .bind(tx.status.as_str())
                .bind(tx.track_retry_counter as i32)
                .bind(&tx.error_msg)
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| insert_error(e, tx_table(tx.kind)))?;
                Ok(Some(row.try_get("id")?))
            }
            Mutation::UpdateTx { tx, expected } => {
                let result = sqlx::query(&format!(
                    r#"
                    UPDATE {} SET status = $1, consumed_fee = $2, height = $3,
                        track_retry_counter = $4, error_msg = $5, update_time = NOW()
                    WHERE id = $6 AND status = $7
                    "#,
                    tx_table(tx.kind)
                ))
                .bind(tx.status.as_str())
                .bind(tx.consumed_fee.map(|f| f.to_string()))
                .bind(tx.height.map(|h| h as i64))
                .bind(tx.track_retry_counter as i32)
                .bind(&tx.error_msg)
                .bind(tx.id)
                .bind(expected.as_str())
                .execute(&mut *conn)
                .await?;
                expect_one(result.rows_affected(), || {
                    format!("{} row {} is no longer {}", tx_table(tx.kind), tx.id, expected)
                })?;
                Ok(None)
            }
            Mutation::InsertRetrySwap(retry) => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO retry_swap (swap_id, direction, sponsor, erc20_addr, bep20_addr,
                        symbol, decimals, amount, start_tx_hash, retry_tx_hash, done, error_msg,
                        record_hash)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    RETURNING id
                    "#,
                )
                .bind(retry.swap_id)
                .bind(retry.direction.as_str())
                .bind(format!("{:?}", retry.sponsor))
                .bind(format!("{:?}", retry.erc20_addr))
                .bind(format!("{:?}", retry.bep20_addr))
                .bind(&retry.symbol)
                .bind(retry.decimals as i16)
                .bind(&retry.amount)
                .bind(format!("{:?}", retry.start_tx_hash))
                .bind(opt_hash(&retry.retry_tx_hash))
                .bind(retry.done)
                .bind(&retry.error_msg)
                .bind(&retry.record_hash)
                .fetch_one(&mut *conn)
                .await?;
                Ok(Some(row.try_get("id")?))
            }
            Mutation::UpdateRetrySwap {
                retry,
                expected_done,
            } => {
                let result = sqlx::query(
                    r#"
                    UPDATE retry_swap SET swap_id = $1, direction = $2, sponsor = $3,
                        erc20_addr = $4, bep20_addr = $5, symbol = $6, decimals = $7,
                        amount = $8, start_tx_hash = $9, retry_tx_hash = $10, done = $11,
                        error_msg = $12, record_hash = $13, update_time = NOW()
                    WHERE id = $14 AND done = $15
                    "#,
                )
                .bind(retry.swap_id)
                .bind(retry.direction.as_str())
                .bind(format!("{:?}", retry.sponsor))
                .bind(format!("{:?}", retry.erc20_addr))
                .bind(format!("{:?}", retry.bep20_addr))
                .bind(&retry.symbol)
                .bind(retry.decimals as i16)
                .bind(&retry.amount)
                .bind(format!("{:?}", retry.start_tx_hash))
                .bind(opt_hash(&retry.retry_tx_hash))
                .bind(retry.done)
                .bind(&retry.error_msg)
                .bind(&retry.record_hash)
                .bind(retry.id)
                .bind(expected_done)
                .execute(&mut *conn)
                .await?;
                expect_one(result.rows_affected(), || {
                    format!("retry swap {} changed underneath", retry.id)
                })?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn apply(&self, batch: Vec<Mutation>) -> RelayerResult<Vec<i64>> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::new();

        for mutation in batch {
            // dropping `tx` on error rolls the whole batch back
            if let Some(id) = Self::apply_one(&mut *tx, mutation).await? {
                ids.push(id);
            }
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn tip(&self, chain: Chain) -> RelayerResult<Option<BlockLog>> {
        let row = sqlx::query(
            "SELECT * FROM block_log WHERE chain = $1 ORDER BY height DESC LIMIT 1",
        )
        .bind(chain.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(block_from_row).transpose()
    }

    async fn blocks(&self, chain: Chain) -> RelayerResult<Vec<BlockLog>> {
        let rows = sqlx::query("SELECT * FROM block_log WHERE chain = $1 ORDER BY height ASC")
            .bind(chain.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(block_from_row).collect()
    }

    async fn events(&self, query: &EventQuery) -> RelayerResult<Vec<EventTxLog>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM event_tx_log
            WHERE kind = $1 AND phase = $2 AND ($3::VARCHAR IS NULL OR status = $3)
            ORDER BY height ASC, id ASC
            LIMIT $4
            "#,
        )
        .bind(query.kind.as_str())
        .bind(query.phase.as_str())
        .bind(query.status.map(|s| s.as_str()))
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }

    async fn rollback_block(&self, chain: Chain, height: u64) -> RelayerResult<RollbackSummary> {
        let mut tx = self.pool.begin().await?;

        let blocks = sqlx::query("DELETE FROM block_log WHERE chain = $1 AND height = $2")
            .bind(chain.as_str())
            .bind(height as i64)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let orphaned: Vec<String> = sqlx::query(
            r#"
            DELETE FROM event_tx_log
            WHERE chain = $1 AND height = $2 AND status = 'init'
            RETURNING tx_hash
            "#,
        )
        .bind(chain.as_str())
        .bind(height as i64)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|r| r.try_get("tx_hash"))
        .collect::<Result<_, _>>()?;

        let swaps = sqlx::query(
            r#"
            DELETE FROM swap
            WHERE direction = $1 AND status = $2 AND start_tx_hash = ANY($3)
            "#,
        )
        .bind(SwapDirection::from_source(chain).as_str())
        .bind(SwapStatus::Received.as_str())
        .bind(&orphaned)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let swap_pairs = if chain == Chain::Eth {
            sqlx::query(
                "DELETE FROM swap_pair_sm WHERE status = $1 AND register_tx_hash = ANY($2)",
            )
            .bind(SwapPairStatus::Received.as_str())
            .bind(&orphaned)
            .execute(&mut *tx)
            .await?
            .rows_affected()
        } else {
            0
        };

        tx.commit().await?;

        Ok(RollbackSummary {
            blocks,
            events: orphaned.len() as u64,
            swaps,
            swap_pairs,
        })
    }

    async fn refresh_confirmations(
        &self,
        chain: Chain,
        current_height: u64,
        required: u64,
    ) -> RelayerResult<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE event_tx_log
            SET confirmed_num = GREATEST(confirmed_num, $1 + 1 - height), update_time = NOW()
            WHERE chain = $2 AND status = 'init' AND height <= $1 + 1
            "#,
        )
        .bind(current_height as i64)
        .bind(chain.as_str())
        .execute(&mut *tx)
        .await?;

        let confirmed = sqlx::query(
            r#"
            UPDATE event_tx_log SET status = 'confirmed', update_time = NOW()
            WHERE chain = $1 AND status = 'init' AND confirmed_num >= $2
            "#,
        )
        .bind(chain.as_str())
        .bind(required as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(confirmed)
    }

    async fn prune_blocks(&self, chain: Chain, below_height: u64) -> RelayerResult<u64> {
        let result = sqlx::query("DELETE FROM block_log WHERE chain = $1 AND height < $2")
            .bind(chain.as_str())
            .bind(below_height as i64)
            .execute(&self.pool)
            .await?;

        debug!(
            "Pruned {} blocks below {} on {}",
            result.rows_affected(),
            below_height,
            chain
        );
        Ok(result.rows_affected())
    }

    async fn swap(&self, id: i64) -> RelayerResult<Option<Swap>> {
        let row = sqlx::query("SELECT * FROM swap WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(swap_from_row).transpose()
    }

    async fn swap_by_start_tx(
        &self,
        direction: SwapDirection,
        start_tx_hash: H256,
    ) -> RelayerResult<Option<Swap>> {
        let row = sqlx::query(
            "SELECT * FROM swap WHERE direction = $1 AND start_tx_hash = $2 ORDER BY id LIMIT 1",
        )
        .bind(direction.as_str())
        .bind(format!("{:?}", start_tx_hash))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(swap_from_row).transpose()
    }

    async fn swaps_with_status(
        &self,
        statuses: &[SwapStatus],
        limit: usize,
    ) -> RelayerResult<Vec<Swap>> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let rows = sqlx::query("SELECT * FROM swap WHERE status = ANY($1) ORDER BY id LIMIT $2")
            .bind(&statuses)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(swap_from_row).collect()
    }

    async fn swap_pair_sm(&self, id: i64) -> RelayerResult<Option<SwapPairSm>> {
        let row = sqlx::query("SELECT * FROM swap_pair_sm WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(swap_pair_sm_from_row).transpose()
    }

    async fn swap_pair_sm_by_register_tx(
        &self,
        register_tx_hash: H256,
    ) -> RelayerResult<Option<SwapPairSm>> {
        let row =
            sqlx::query("SELECT * FROM swap_pair_sm WHERE register_tx_hash = $1 ORDER BY id LIMIT 1")
                .bind(format!("{:?}", register_tx_hash))
                .fetch_optional(&self.pool)
                .await?;
        row.as_ref().map(swap_pair_sm_from_row).transpose()
    }

    async fn swap_pair_sms_with_status(
        &self,
        statuses: &[SwapPairStatus],
        limit: usize,
    ) -> RelayerResult<Vec<SwapPairSm>> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let rows =
            sqlx::query("SELECT * FROM swap_pair_sm WHERE status = ANY($1) ORDER BY id LIMIT $2")
                .bind(&statuses)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(swap_pair_sm_from_row).collect()
    }

    async fn swap_pairs(&self) -> RelayerResult<Vec<SwapPair>> {
        let rows = sqlx::query("SELECT * FROM swap_pair ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(swap_pair_from_row).collect()
    }

    async fn swap_pair_by_erc20(&self, erc20: Address) -> RelayerResult<Option<SwapPair>> {
        let row = sqlx::query("SELECT * FROM swap_pair WHERE erc20_addr = $1")
            .bind(format!("{:?}", erc20))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(swap_pair_from_row).transpose()
    }

    async fn txs_with_status(
        &self,
        kind: TxKind,
        status: TxStatus,
        limit: usize,
    ) -> RelayerResult<Vec<TxRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM {} WHERE status = $1 ORDER BY id LIMIT $2",
            tx_table(kind)
        ))
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| tx_from_row(r, kind)).collect()
    }

    async fn active_tx_for_owner(
        &self,
        kind: TxKind,
        owner_id: i64,
    ) -> RelayerResult<Option<TxRecord>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT * FROM {} WHERE owner_id = $1 AND status IN ('created', 'sent', 'success')
            ORDER BY id DESC LIMIT 1
            "#,
            tx_table(kind)
        ))
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(|r| tx_from_row(r, kind)).transpose()
    }

    async fn retry_swap(&self, id: i64) -> RelayerResult<Option<RetrySwap>> {
        let row = sqlx::query("SELECT * FROM retry_swap WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(retry_swap_from_row).transpose()
    }

    async fn retry_swaps_pending(&self, limit: usize) -> RelayerResult<Vec<RetrySwap>> {
        let rows = sqlx::query("SELECT * FROM retry_swap WHERE done = FALSE ORDER BY id LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(retry_swap_from_row).collect()
    }

    async fn has_pending_retry(&self, swap_id: i64) -> RelayerResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM retry_swap r
                WHERE r.swap_id = $1 AND (
                    r.done = FALSE OR EXISTS (
                        SELECT 1 FROM retry_swap_tx t
                        WHERE t.owner_id = r.id AND t.status IN ('created', 'sent')
                    )
                )
            ) AS pending
            "#,
        )
        .bind(swap_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("pending")?)
    }

    async fn stats(&self) -> RelayerResult<StoreStats> {
        let mut stats = StoreStats::default();

        for row in sqlx::query("SELECT status, COUNT(*) AS n FROM swap GROUP BY status")
            .fetch_all(&self.pool)
            .await?
        {
            stats
                .swaps
                .insert(row.try_get("status")?, row.try_get::<i64, _>("n")? as u64);
        }

        for row in sqlx::query("SELECT status, COUNT(*) AS n FROM swap_pair_sm GROUP BY status")
            .fetch_all(&self.pool)
            .await?
        {
            stats
                .swap_pairs
                .insert(row.try_get("status")?, row.try_get::<i64, _>("n")? as u64);
        }

        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM retry_swap WHERE done = FALSE) AS pending_retries,
                (SELECT COUNT(*) FROM swap_pair) AS published_pairs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        stats.pending_retries = row.try_get::<i64, _>("pending_retries")? as u64;
        stats.published_pairs = row.try_get::<i64, _>("published_pairs")? as u64;

        Ok(stats)
    }

    async fn health_check(&self) -> RelayerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn expect_one(rows_affected: u64, describe: impl FnOnce() -> String) -> RelayerResult<()> {
    if rows_affected == 1 {
        Ok(())
    } else {
        Err(RelayerError::Conflict(describe()))
    }
}

/// Unique violations are conflicts, everything else a database error
fn insert_error(e: sqlx::Error, table: &str) -> RelayerError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("23505") {
            return RelayerError::Conflict(format!("duplicate row in {}: {}", table, db.message()));
        }
    }
    RelayerError::Database(e)
}

fn opt_address(addr: &Option<Address>) -> String {
    addr.map(|a| format!("{:?}", a)).unwrap_or_default()
}

fn get_str(row: &PgRow, column: &str) -> RelayerResult<String> {
    Ok(row.try_get::<String, _>(column)?)
}

fn get_u64(row: &PgRow, column: &str) -> RelayerResult<u64> {
    Ok(row.try_get::<i64, _>(column)? as u64)
}

fn get_u8(row: &PgRow, column: &str) -> RelayerResult<u8> {
    Ok(row.try_get::<i16, _>(column)? as u8)
}

fn get_hash(row: &PgRow, column: &str) -> RelayerResult<H256> {
    parse_h256(&get_str(row, column)?)
}

/// Empty string is how a not-yet-known hash is persisted
fn get_opt_hash(row: &PgRow, column: &str) -> RelayerResult<Option<H256>> {
    let raw = get_str(row, column)?;
    if raw.is_empty() {
        Ok(None)
    } else {
        parse_h256(&raw).map(Some)
    }
}

fn get_address(row: &PgRow, column: &str) -> RelayerResult<Address> {
    parse_address(&get_str(row, column)?)
}

fn get_opt_address(row: &PgRow, column: &str) -> RelayerResult<Option<Address>> {
    match row.try_get::<Option<String>, _>(column)? {
        Some(raw) if !raw.is_empty() => parse_address(&raw).map(Some),
        _ => Ok(None),
    }
}

fn block_from_row(row: &PgRow) -> RelayerResult<BlockLog> {
    Ok(BlockLog {
        id: row.try_get("id")?,
        chain: get_str(row, "chain")?.parse()?,
        height: get_u64(row, "height")?,
        block_hash: get_hash(row, "block_hash")?,
        parent_hash: get_hash(row, "parent_hash")?,
        block_time: get_u64(row, "block_time")?,
        create_time: row.try_get("create_time")?,
    })
}

fn event_from_row(row: &PgRow) -> RelayerResult<EventTxLog> {
    Ok(EventTxLog {
        id: row.try_get("id")?,
        kind: get_str(row, "kind")?.parse()?,
        chain: get_str(row, "chain")?.parse()?,
        token_addr: get_address(row, "token_addr")?,
        peer_token_addr: get_opt_address(row, "peer_token_addr")?,
        participant: get_address(row, "participant")?,
        amount: get_str(row, "amount")?,
        fee_amount: get_str(row, "fee_amount")?,
        name: get_str(row, "name")?,
        symbol: get_str(row, "symbol")?,
        decimals: get_u8(row, "decimals")?,
        tx_hash: get_hash(row, "tx_hash")?,
        log_index: get_u64(row, "log_index")?,
        block_hash: get_hash(row, "block_hash")?,
        height: get_u64(row, "height")?,
        confirmed_num: get_u64(row, "confirmed_num")?,
        status: get_str(row, "status")?.parse()?,
        phase: get_str(row, "phase")?.parse()?,
        update_time: row.try_get("update_time")?,
    })
}

fn swap_from_row(row: &PgRow) -> RelayerResult<Swap> {
    Ok(Swap {
        id: row.try_get("id")?,
        status: get_str(row, "status")?.parse()?,
        direction: get_str(row, "direction")?.parse()?,
        sponsor: get_address(row, "sponsor")?,
        erc20_addr: get_address(row, "erc20_addr")?,
        bep20_addr: get_address(row, "bep20_addr")?,
        symbol: get_str(row, "symbol")?,
        decimals: get_u8(row, "decimals")?,
        amount: get_str(row, "amount")?,
        start_tx_hash: get_hash(row, "start_tx_hash")?,
        fill_tx_hash: get_opt_hash(row, "fill_tx_hash")?,
        log: get_str(row, "log")?,
        record_hash: get_str(row, "record_hash")?,
        create_time: row.try_get("create_time")?,
        update_time: row.try_get("update_time")?,
    })
}

fn swap_pair_sm_from_row(row: &PgRow) -> RelayerResult<SwapPairSm> {
    Ok(SwapPairSm {
        id: row.try_get("id")?,
        status: get_str(row, "status")?.parse()?,
        sponsor: get_address(row, "sponsor")?,
        erc20_addr: get_address(row, "erc20_addr")?,
        bep20_addr: get_opt_address(row, "bep20_addr")?,
        name: get_str(row, "name")?,
        symbol: get_str(row, "symbol")?,
        decimals: get_u8(row, "decimals")?,
        register_tx_hash: get_hash(row, "register_tx_hash")?,
        create_tx_hash: get_opt_hash(row, "create_tx_hash")?,
        log: get_str(row, "log")?,
        record_hash: get_str(row, "record_hash")?,
        create_time: row.try_get("create_time")?,
        update_time: row.try_get("update_time")?,
    })
}

fn swap_pair_from_row(row: &PgRow) -> RelayerResult<SwapPair> {
    Ok(SwapPair {
        id: row.try_get("id")?,
        symbol: get_str(row, "symbol")?,
        name: get_str(row, "name")?,
        decimals: get_u8(row, "decimals")?,
        erc20_addr: get_address(row, "erc20_addr")?,
        bep20_addr: get_address(row, "bep20_addr")?,
        low_bound: get_str(row, "low_bound")?,
        upper_bound: get_str(row, "upper_bound")?,
        available: row.try_get("available")?,
        create_time: row.try_get("create_time")?,
    })
}

fn tx_from_row(row: &PgRow, kind: TxKind) -> RelayerResult<TxRecord> {
    Ok(TxRecord {
        id: row.try_get("id")?,
        kind,
        owner_id: row.try_get("owner_id")?,
        chain: get_str(row, "chain")?.parse()?,
        tx_hash: get_hash(row, "tx_hash")?,
        nonce: get_u64(row, "nonce")?,
        gas_price: parse_u256(&get_str(row, "gas_price")?)?,
        consumed_fee: row
            .try_get::<Option<String>, _>("consumed_fee")?
            .map(|f| parse_u256(&f))
            .transpose()?,
        height: row.try_get::<Option<i64>, _>("height")?.map(|h| h as u64),
        status: get_str(row, "status")?.parse()?,
        track_retry_counter: row.try_get::<i32, _>("track_retry_counter")? as u32,
        error_msg: get_str(row, "error_msg")?,
        create_time: row.try_get("create_time")?,
        update_time: row.try_get("update_time")?,
    })
}

fn retry_swap_from_row(row: &PgRow) -> RelayerResult<RetrySwap> {
    Ok(RetrySwap {
        id: row.try_get("id")?,
        swap_id: row.try_get("swap_id")?,
        direction: get_str(row, "direction")?.parse()?,
        sponsor: get_address(row, "sponsor")?,
        erc20_addr: get_address(row, "erc20_addr")?,
        bep20_addr: get_address(row, "bep20_addr")?,
        symbol: get_str(row, "symbol")?,
        decimals: get_u8(row, "decimals")?,
        amount: get_str(row, "amount")?,
        start_tx_hash: get_hash(row, "start_tx_hash")?,
        retry_tx_hash: get_opt_hash(row, "retry_tx_hash")?,
        done: row.try_get("done")?,
        error_msg: get_str(row, "error_msg")?,
        record_hash: get_str(row, "record_hash")?,
        create_time: row.try_get("create_time")?,
        update_time: row.try_get("update_time")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::RecordHasher;
    use crate::state::models::{EventKind, EventPhase, EventStatus};
    use crate::test_utils::{addr, hash, sample_block, sample_event, sample_swap, sample_tx};
    use chrono::Utc;

    // Database tests run against TEST_DATABASE_URL, each in a schema of its own:
    // TEST_DATABASE_URL=postgres://... cargo test -- --ignored
    async fn fresh_store(name: &str) -> PgStore {
        let url = std::env::var("TEST_DATABASE_URL")
            .expect("TEST_DATABASE_URL environment variable must be set");
        let schema = format!(
            "relayer_{}_{}",
            name,
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );

        let admin = PgPool::connect(&url).await.unwrap();
        sqlx::query(&format!("CREATE SCHEMA {}", schema))
            .execute(&admin)
            .await
            .unwrap();

        let search_path = format!("SET search_path TO {}", schema);
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .after_connect(move |conn, _meta| {
                let sql = search_path.clone();
                Box::pin(async move {
                    sqlx::query(&sql).execute(conn).await?;
                    Ok(())
                })
            })
            .connect(&url)
            .await
            .unwrap();

        let store = PgStore { pool };
        store.run_migrations().await.unwrap();
        store
    }

    fn sample_pair_sm(hasher: &RecordHasher) -> SwapPairSm {
        let now = Utc::now();
        let mut record = SwapPairSm {
            id: 0,
            status: SwapPairStatus::Received,
            sponsor: addr(0x01),
            erc20_addr: addr(0x11),
            bep20_addr: None,
            name: "Test Token".to_string(),
            symbol: "TT".to_string(),
            decimals: 18,
            register_tx_hash: hash(0xc0),
            create_tx_hash: None,
            log: String::new(),
            record_hash: String::new(),
            create_time: now,
            update_time: now,
        };
        hasher.seal(&mut record);
        record
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL
    async fn test_swap_update_persists_every_sealed_field() {
        let store = fresh_store("swap_update").await;
        let hasher = RecordHasher::new("test-key");

        // a start seen before its pair was published
        let mut swap = sample_swap(0);
        swap.bep20_addr = Address::zero();
        swap.decimals = 0;
        hasher.seal(&mut swap);
        let ids = store.apply(vec![Mutation::InsertSwap(swap)]).await.unwrap();

        let mut quoted = store.swap(ids[0]).await.unwrap().unwrap();
        assert!(hasher.verify(&quoted));
        quoted.status = SwapStatus::QuoteConfirmed;
        quoted.bep20_addr = addr(0x22);
        quoted.decimals = 18;
        quoted.symbol = "TT2".to_string();
        quoted.log = "routed".to_string();
        hasher.seal(&mut quoted);
        store
            .apply(vec![Mutation::UpdateSwap {
                swap: quoted.clone(),
                expected: SwapStatus::Received,
            }])
            .await
            .unwrap();

        let reloaded = store.swap(ids[0]).await.unwrap().unwrap();
        assert_eq!(reloaded.bep20_addr, addr(0x22));
        assert_eq!(reloaded.decimals, 18);
        assert_eq!(reloaded.symbol, "TT2");
        assert_eq!(reloaded.log, "routed");
        assert!(hasher.verify(&reloaded));

        // a writer still expecting Received loses
        let stale = store
            .apply(vec![Mutation::UpdateSwap {
                swap: quoted,
                expected: SwapStatus::Received,
            }])
            .await;
        assert!(matches!(stale, Err(RelayerError::Conflict(_))));
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL
    async fn test_swap_pair_sm_update_persists_every_sealed_field() {
        let store = fresh_store("pair_update").await;
        let hasher = RecordHasher::new("test-key");
        let ids = store
            .apply(vec![Mutation::InsertSwapPairSm(sample_pair_sm(&hasher))])
            .await
            .unwrap();

        let mut record = store.swap_pair_sm(ids[0]).await.unwrap().unwrap();
        assert!(hasher.verify(&record));
        record.status = SwapPairStatus::Confirmed;
        record.bep20_addr = Some(addr(0x22));
        record.create_tx_hash = Some(hash(0xc1));
        hasher.seal(&mut record);
        store
            .apply(vec![Mutation::UpdateSwapPairSm {
                record,
                expected: SwapPairStatus::Received,
            }])
            .await
            .unwrap();

        let reloaded = store
            .swap_pair_sm_by_register_tx(hash(0xc0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.status, SwapPairStatus::Confirmed);
        assert_eq!(reloaded.bep20_addr, Some(addr(0x22)));
        assert_eq!(reloaded.create_tx_hash, Some(hash(0xc1)));
        assert!(hasher.verify(&reloaded));
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL
    async fn test_retry_lifecycle_and_pending_check() {
        let store = fresh_store("retry").await;
        let hasher = RecordHasher::new("test-key");

        let mut swap = sample_swap(0);
        swap.status = SwapStatus::SendFailed;
        hasher.seal(&mut swap);
        let swap_id = store.apply(vec![Mutation::InsertSwap(swap.clone())]).await.unwrap()[0];
        assert!(!store.has_pending_retry(swap_id).await.unwrap());

        let now = Utc::now();
        let mut retry = RetrySwap {
            id: 0,
            swap_id,
            direction: swap.direction,
            sponsor: swap.sponsor,
            erc20_addr: swap.erc20_addr,
            bep20_addr: swap.bep20_addr,
            symbol: swap.symbol.clone(),
            decimals: swap.decimals,
            amount: swap.amount.clone(),
            start_tx_hash: swap.start_tx_hash,
            retry_tx_hash: None,
            done: false,
            error_msg: String::new(),
            record_hash: String::new(),
            create_time: now,
            update_time: now,
        };
        hasher.seal(&mut retry);
        let retry_id = store.apply(vec![Mutation::InsertRetrySwap(retry)]).await.unwrap()[0];
        assert!(store.has_pending_retry(swap_id).await.unwrap());

        // done, but its transaction is still in flight
        let mut tx = sample_tx(Chain::Bsc, hash(0xd0));
        tx.kind = TxKind::RetrySwap;
        tx.owner_id = retry_id;
        let mut retry = store.retry_swap(retry_id).await.unwrap().unwrap();
        retry.done = true;
        retry.retry_tx_hash = Some(hash(0xd0));
        hasher.seal(&mut retry);
        store
            .apply(vec![
                Mutation::InsertTx(tx),
                Mutation::UpdateRetrySwap {
                    retry,
                    expected_done: false,
                },
            ])
            .await
            .unwrap();

        let reloaded = store.retry_swap(retry_id).await.unwrap().unwrap();
        assert_eq!(reloaded.retry_tx_hash, Some(hash(0xd0)));
        assert!(hasher.verify(&reloaded));
        assert!(store.has_pending_retry(swap_id).await.unwrap());
        assert!(store.retry_swaps_pending(10).await.unwrap().is_empty());

        let mut settled = store
            .active_tx_for_owner(TxKind::RetrySwap, retry_id)
            .await
            .unwrap()
            .unwrap();
        settled.status = TxStatus::Success;
        settled.height = Some(7);
        store
            .apply(vec![Mutation::UpdateTx {
                tx: settled.clone(),
                expected: TxStatus::Sent,
            }])
            .await
            .unwrap();
        assert!(!store.has_pending_retry(swap_id).await.unwrap());

        let again = store
            .apply(vec![Mutation::UpdateTx {
                tx: settled,
                expected: TxStatus::Sent,
            }])
            .await;
        assert!(matches!(again, Err(RelayerError::Conflict(_))));
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL
    async fn test_rollback_and_confirmation_accounting() {
        let store = fresh_store("rollback").await;
        let hasher = RecordHasher::new("test-key");

        store
            .apply(vec![
                Mutation::InsertBlock(sample_block(Chain::Eth, 100, 0x10, 0x09)),
                Mutation::InsertBlock(sample_block(Chain::Eth, 101, 0x11, 0x10)),
                Mutation::InsertEvent(sample_event(Chain::Eth, 100, hash(0x40))),
                Mutation::InsertEvent(sample_event(Chain::Eth, 101, hash(0x41))),
            ])
            .await
            .unwrap();
        assert_eq!(store.refresh_confirmations(Chain::Eth, 101, 2).await.unwrap(), 1);

        let mut orphan = sample_swap(0);
        orphan.start_tx_hash = hash(0x41);
        hasher.seal(&mut orphan);
        store.apply(vec![Mutation::InsertSwap(orphan)]).await.unwrap();

        let summary = store.rollback_block(Chain::Eth, 101).await.unwrap();
        assert_eq!(
            summary,
            RollbackSummary {
                blocks: 1,
                events: 1,
                swaps: 1,
                swap_pairs: 0
            }
        );
        assert_eq!(store.tip(Chain::Eth).await.unwrap().unwrap().height, 100);

        // a confirmed event re-included by a fork block is re-anchored, not duplicated
        let mut reincluded = sample_event(Chain::Eth, 101, hash(0x40));
        reincluded.block_hash = hash(0x99);
        store
            .apply(vec![
                Mutation::InsertBlock(sample_block(Chain::Eth, 101, 0x99, 0x10)),
                Mutation::InsertEvent(reincluded),
            ])
            .await
            .unwrap();

        let events = store
            .events(&EventQuery {
                kind: EventKind::SwapStart,
                phase: EventPhase::Seen,
                status: None,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tx_hash, hash(0x40));
        assert_eq!(events[0].height, 101);
        assert_eq!(events[0].block_hash, hash(0x99));
        assert_eq!(events[0].status, EventStatus::Confirmed);

        assert_eq!(store.prune_blocks(Chain::Eth, 101).await.unwrap(), 1);
    }

    #[test]
    fn test_each_tx_kind_has_its_own_table() {
        assert_eq!(tx_table(TxKind::SwapFill), "swap_fill_tx");
        assert_eq!(tx_table(TxKind::SwapPairCreate), "swap_pair_create_tx");
        assert_eq!(tx_table(TxKind::RetrySwap), "retry_swap_tx");
        assert!(tx_table_ddl(TxKind::RetrySwap).contains("retry_swap_tx"));
    }

    #[test]
    fn test_only_single_row_updates_pass() {
        assert!(expect_one(1, || "x".to_string()).is_ok());
        assert!(matches!(
            expect_one(0, || "gone".to_string()),
            Err(RelayerError::Conflict(msg)) if msg == "gone"
        ));
    }
}
