use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

use rifa_core::repository::TicketRepository;
use rifa_core::{Occupancy, PendingClaim, PromoteOutcome, Sale, StoreError, StoreResult, TicketNumber};

use crate::database::{backend, is_unique_violation};

/// Postgres-backed claims and sales.
///
/// `ticket_numbers` is the single constrained collection of unavailable
/// numbers: its primary key turns the reserve race into a write-time conflict
/// and its foreign keys free the numbers whenever a claim or sale is deleted.
pub struct PostgresTicketRepository {
    pool: PgPool,
}

impl PostgresTicketRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const CLAIM_COLUMNS: &str =
    "id, reference, buyer_name, buyer_email, buyer_phone, numbers, amount, created_at";

const SALE_COLUMNS: &str = "id, reference, external_payment_id, buyer_name, buyer_email, buyer_phone, numbers, amount_paid, payment_method, paid_at, created_at";

#[derive(sqlx::FromRow)]
struct ClaimRow {
    id: Uuid,
    reference: String,
    buyer_name: String,
    buyer_email: String,
    buyer_phone: String,
    numbers: Vec<String>,
    amount: i64,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct SaleRow {
    id: Uuid,
    reference: String,
    external_payment_id: String,
    buyer_name: String,
    buyer_email: String,
    buyer_phone: String,
    numbers: Vec<String>,
    amount_paid: i64,
    payment_method: String,
    paid_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

fn parse_numbers(raw: Vec<String>) -> StoreResult<BTreeSet<TicketNumber>> {
    raw.iter()
        .map(|n| {
            n.parse::<TicketNumber>()
                .map_err(|e| StoreError::Corrupt(format!("stored ticket number {:?}: {}", n, e)))
        })
        .collect()
}

fn to_strings(numbers: &BTreeSet<TicketNumber>) -> Vec<String> {
    numbers.iter().map(|n| n.to_string()).collect()
}

impl TryFrom<ClaimRow> for PendingClaim {
    type Error = StoreError;

    fn try_from(row: ClaimRow) -> StoreResult<Self> {
        Ok(PendingClaim {
            id: row.id,
            reference: row.reference,
            buyer_name: row.buyer_name,
            buyer_email: row.buyer_email,
            buyer_phone: row.buyer_phone,
            numbers: parse_numbers(row.numbers)?,
            amount: row.amount,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<SaleRow> for Sale {
    type Error = StoreError;

    fn try_from(row: SaleRow) -> StoreResult<Self> {
        Ok(Sale {
            id: row.id,
            reference: row.reference,
            buyer_name: row.buyer_name,
            buyer_email: row.buyer_email,
            buyer_phone: row.buyer_phone,
            numbers: parse_numbers(row.numbers)?,
            amount_paid: row.amount_paid,
            payment_method: row.payment_method,
            paid_at: row.paid_at,
            external_payment_id: row.external_payment_id,
            created_at: row.created_at,
        })
    }
}

fn claims_from(rows: Vec<ClaimRow>) -> StoreResult<Vec<PendingClaim>> {
    rows.into_iter().map(PendingClaim::try_from).collect()
}

#[async_trait]
impl TicketRepository for PostgresTicketRepository {
    async fn occupied_numbers(&self) -> StoreResult<Vec<(TicketNumber, Occupancy)>> {
        let rows: Vec<(String, bool)> = sqlx::query_as(
            "SELECT number, sale_id IS NOT NULL AS sold FROM ticket_numbers ORDER BY number",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|(number, sold)| {
                let number = number
                    .parse::<TicketNumber>()
                    .map_err(|e| StoreError::Corrupt(format!("stored ticket number {:?}: {}", number, e)))?;
                let occupancy = if sold { Occupancy::Sold } else { Occupancy::Reserved };
                Ok((number, occupancy))
            })
            .collect()
    }

    async fn insert_claim(&self, claim: &PendingClaim) -> StoreResult<()> {
        let numbers = to_strings(&claim.numbers);
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO pending_claims (id, reference, buyer_name, buyer_email, buyer_phone, numbers, amount, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(claim.id)
        .bind(&claim.reference)
        .bind(&claim.buyer_name)
        .bind(&claim.buyer_email)
        .bind(&claim.buyer_phone)
        .bind(&numbers)
        .bind(claim.amount)
        .bind(claim.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            return Err(if is_unique_violation(&err) {
                StoreError::DuplicateReference(claim.reference.clone())
            } else {
                backend(err)
            });
        }

        // Concurrent writers of the same number block on the primary key until
        // the first commits, then fall into DO NOTHING.
        let acquired: Vec<String> = sqlx::query_scalar(
            r#"
            INSERT INTO ticket_numbers (number, claim_id)
            SELECT n, $2 FROM UNNEST($1::text[]) AS n
            ON CONFLICT (number) DO NOTHING
            RETURNING number
            "#,
        )
        .bind(&numbers)
        .bind(claim.id)
        .fetch_all(&mut *tx)
        .await
        .map_err(backend)?;

        if acquired.len() != numbers.len() {
            tx.rollback().await.map_err(backend)?;
            let acquired: BTreeSet<String> = acquired.into_iter().collect();
            let lost: Vec<TicketNumber> = claim
                .numbers
                .iter()
                .filter(|n| !acquired.contains(&n.to_string()))
                .copied()
                .collect();
            debug!(reference = %claim.reference, lost = lost.len(), "Claim lost numbers at write time");
            return Err(StoreError::NumbersTaken(lost));
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn find_claim(&self, reference: &str) -> StoreResult<Option<PendingClaim>> {
        let row: Option<ClaimRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pending_claims WHERE reference = $1",
            CLAIM_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(PendingClaim::try_from).transpose()
    }

    async fn find_sale(&self, external_payment_id: Option<&str>, reference: &str) -> StoreResult<Option<Sale>> {
        let row: Option<SaleRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sales WHERE external_payment_id = $1 OR reference = $2 LIMIT 1",
            SALE_COLUMNS
        ))
        .bind(external_payment_id)
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(Sale::try_from).transpose()
    }

    async fn promote_claim(&self, sale: &Sale) -> StoreResult<PromoteOutcome> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        // A second promotion of the same reference waits here and then finds the row gone.
        let claim_id: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM pending_claims WHERE reference = $1 FOR UPDATE")
                .bind(&sale.reference)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?;

        let Some(claim_id) = claim_id else {
            let recorded: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM sales WHERE external_payment_id = $1 OR reference = $2)",
            )
            .bind(&sale.external_payment_id)
            .bind(&sale.reference)
            .fetch_one(&mut *tx)
            .await
            .map_err(backend)?;
            tx.rollback().await.map_err(backend)?;

            return Ok(if recorded { PromoteOutcome::AlreadyRecorded } else { PromoteOutcome::ClaimMissing });
        };

        let created: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO sales (id, reference, external_payment_id, buyer_name, buyer_email, buyer_phone, numbers, amount_paid, payment_method, paid_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(sale.id)
        .bind(&sale.reference)
        .bind(&sale.external_payment_id)
        .bind(&sale.buyer_name)
        .bind(&sale.buyer_email)
        .bind(&sale.buyer_phone)
        .bind(to_strings(&sale.numbers))
        .bind(sale.amount_paid)
        .bind(&sale.payment_method)
        .bind(sale.paid_at)
        .bind(sale.created_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        if created.is_none() {
            tx.rollback().await.map_err(backend)?;
            return Ok(PromoteOutcome::AlreadyRecorded);
        }

        sqlx::query("UPDATE ticket_numbers SET sale_id = $1, claim_id = NULL WHERE claim_id = $2")
            .bind(sale.id)
            .bind(claim_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        sqlx::query("DELETE FROM pending_claims WHERE id = $1")
            .bind(claim_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;

        info!(reference = %sale.reference, sale_id = %sale.id, "Claim promoted to sale");
        Ok(PromoteOutcome::Created(sale.clone()))
    }

    async fn discard_claim(&self, reference: &str) -> StoreResult<Option<PendingClaim>> {
        let row: Option<ClaimRow> = sqlx::query_as(&format!(
            "DELETE FROM pending_claims WHERE reference = $1 RETURNING {}",
            CLAIM_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(PendingClaim::try_from).transpose()
    }

    async fn expire_claims(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<PendingClaim>> {
        let rows: Vec<ClaimRow> = sqlx::query_as(&format!(
            "DELETE FROM pending_claims WHERE created_at < $1 RETURNING {}",
            CLAIM_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        claims_from(rows)
    }

    async fn list_claims(&self) -> StoreResult<Vec<PendingClaim>> {
        let rows: Vec<ClaimRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pending_claims ORDER BY created_at DESC",
            CLAIM_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        claims_from(rows)
    }

    async fn list_sales(&self) -> StoreResult<Vec<Sale>> {
        let rows: Vec<SaleRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sales ORDER BY created_at DESC",
            SALE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(Sale::try_from).collect()
    }

    async fn delete_record(&self, id: Uuid) -> StoreResult<bool> {
        let sales = sqlx::query("DELETE FROM sales WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if sales.rows_affected() > 0 {
            return Ok(true);
        }

        let claims = sqlx::query("DELETE FROM pending_claims WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(claims.rows_affected() > 0)
    }
}
