//! PostgreSQL-backed store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::error::AppError;
use crate::models::service_request::{
    NewServiceRequest, RequestId, RequestStatus, ServiceRequest, StatusCounts, TruckId,
};
use crate::store::{ClaimOutcome, RequestStore, StatusUpdate};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS service_requests (
        id BIGSERIAL PRIMARY KEY,
        drop_off_location TEXT NOT NULL,
        shipment_metadata TEXT NOT NULL,
        truck_id BIGINT,
        status TEXT NOT NULL DEFAULT 'Opened',
        created_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        routing_pending BOOLEAN NOT NULL DEFAULT FALSE
    )
"#;

const ADD_ROUTING_PENDING: &str = r#"
    ALTER TABLE service_requests
    ADD COLUMN IF NOT EXISTS routing_pending BOOLEAN NOT NULL DEFAULT FALSE
"#;

const COLUMNS: &str = "id, drop_off_location, shipment_metadata, truck_id, status, created_time";

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct ServiceRequestRow {
    id: i64,
    drop_off_location: String,
    shipment_metadata: String,
    truck_id: Option<i64>,
    status: String,
    created_time: DateTime<Utc>,
}

impl TryFrom<ServiceRequestRow> for ServiceRequest {
    type Error = AppError;

    fn try_from(row: ServiceRequestRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<RequestStatus>().map_err(|_| {
            AppError::Storage(format!(
                "request {} has unknown status {:?}",
                row.id, row.status
            ))
        })?;
        let shipment_metadata = serde_json::from_str(&row.shipment_metadata).map_err(|err| {
            AppError::Storage(format!(
                "request {} has unreadable shipment_metadata: {err}",
                row.id
            ))
        })?;

        Ok(ServiceRequest {
            id: row.id,
            drop_off_location: row.drop_off_location,
            shipment_metadata,
            truck_id: row.truck_id,
            status,
            created_time: row.created_time,
        })
    }
}

impl PostgresStore {
    /// Connects and creates the `service_requests` table if it does not exist.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|err| AppError::Storage(format!("failed to connect to postgres: {err}")))?;

        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        sqlx::query(ADD_ROUTING_PENDING).execute(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl RequestStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn insert(&self, request: NewServiceRequest) -> Result<ServiceRequest, AppError> {
        let metadata = serde_json::to_string(&request.shipment_metadata)
            .map_err(|err| AppError::Internal(format!("failed to encode shipment_metadata: {err}")))?;

        let row = sqlx::query_as::<_, ServiceRequestRow>(&format!(
            r#"
            INSERT INTO service_requests (drop_off_location, shipment_metadata, status)
            VALUES ($1, $2, $3)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(&request.drop_off_location)
        .bind(metadata)
        .bind(RequestStatus::Opened.as_str())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get(&self, id: RequestId) -> Result<Option<ServiceRequest>, AppError> {
        let row = sqlx::query_as::<_, ServiceRequestRow>(&format!(
            "SELECT {COLUMNS} FROM service_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ServiceRequest::try_from).transpose()
    }

    async fn list(&self) -> Result<Vec<ServiceRequest>, AppError> {
        let rows = sqlx::query_as::<_, ServiceRequestRow>(&format!(
            "SELECT {COLUMNS} FROM service_requests ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ServiceRequest::try_from).collect()
    }

    async fn claim_for_assignment(
        &self,
        id: RequestId,
        truck_id: TruckId,
    ) -> Result<ClaimOutcome, AppError> {
        let claimed = sqlx::query_as::<_, ServiceRequestRow>(&format!(
            r#"
            UPDATE service_requests
            SET truck_id = $2, status = $3, routing_pending = TRUE
            WHERE id = $1 AND status = $4 AND truck_id IS NULL
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(truck_id)
        .bind(RequestStatus::Assigned.as_str())
        .bind(RequestStatus::Opened.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = claimed {
            return Ok(ClaimOutcome::Claimed(row.try_into()?));
        }

        match self.get(id).await? {
            Some(current) => match current.truck_id {
                Some(owner) => Ok(ClaimOutcome::Owned(owner)),
                None => Ok(ClaimOutcome::NotOpened(current.status)),
            },
            None => Ok(ClaimOutcome::Missing),
        }
    }

    async fn confirm_assignment(
        &self,
        id: RequestId,
        truck_id: TruckId,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE service_requests
            SET routing_pending = FALSE
            WHERE id = $1 AND truck_id = $2 AND routing_pending
            "#,
        )
        .bind(id)
        .bind(truck_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_assignment(
        &self,
        id: RequestId,
        truck_id: TruckId,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE service_requests
            SET truck_id = NULL, status = $3, routing_pending = FALSE
            WHERE id = $1 AND truck_id = $2 AND routing_pending
            "#,
        )
        .bind(id)
        .bind(truck_id)
        .bind(RequestStatus::Opened.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_status(
        &self,
        ids: &[RequestId],
        status: RequestStatus,
    ) -> Result<StatusUpdate, AppError> {
        let result = sqlx::query(
            "UPDATE service_requests SET status = $2 WHERE id = ANY($1) AND NOT routing_pending",
        )
        .bind(ids)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        let updated = result.rows_affected();
        let routing = if updated < ids.len() as u64 {
            sqlx::query_scalar::<_, i64>(
                "SELECT id FROM service_requests WHERE id = ANY($1) AND routing_pending ORDER BY id",
            )
            .bind(ids)
            .fetch_all(&self.pool)
            .await?
        } else {
            Vec::new()
        };

        Ok(StatusUpdate { updated, routing })
    }

    async fn delete(&self, id: RequestId) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM service_requests WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn status_counts(&self) -> Result<StatusCounts, AppError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = $1) AS open,
                COUNT(*) FILTER (WHERE status = $2) AS assigned,
                COUNT(*) FILTER (WHERE status = $3) AS completed,
                COUNT(*) AS total
            FROM service_requests
            "#,
        )
        .bind(RequestStatus::Opened.as_str())
        .bind(RequestStatus::Assigned.as_str())
        .bind(RequestStatus::Complete.as_str())
        .fetch_one(&self.pool)
        .await?;

        let count = |column: &str| -> Result<u64, AppError> {
            let value: i64 = row.try_get(column)?;
            Ok(value.max(0) as u64)
        };

        Ok(StatusCounts {
            open: count("open")?,
            assigned: count("assigned")?,
            completed: count("completed")?,
            total: count("total")?,
        })
    }
}
