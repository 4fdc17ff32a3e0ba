use async_trait::async_trait;
use common::clickhouse::ClickHouseClient;
use flywheel_domain::{PipelineError, PipelineResult, TelemetryRepository, ValidatedReading};
use tracing::{debug, error};

use crate::models::TelemetryRow;

/// ClickHouse implementation of the telemetry write path
#[derive(Clone)]
pub struct ClickHouseTelemetryRepository {
    client: ClickHouseClient,
    table: String,
}

impl ClickHouseTelemetryRepository {
    pub fn new(client: ClickHouseClient, table: String) -> Self {
        Self { client, table }
    }
}

#[async_trait]
impl TelemetryRepository for ClickHouseTelemetryRepository {
    async fn insert_reading(&self, reading: &ValidatedReading) -> PipelineResult<()> {
        debug!(
            message_id = %reading.message_id,
            device_id = %reading.device_id,
            table = %self.table,
            "inserting telemetry reading"
        );

        let row = TelemetryRow::from(reading);

        let mut insert = self
            .client
            .get_client()
            .insert::<TelemetryRow>(&self.table)
            .map_err(|e| {
                error!(error = %e, "failed to create inserter");
                PipelineError::Repository(e.into())
            })?;

        insert.write(&row).await.map_err(|e| {
            error!(error = %e, "failed to write telemetry row");
            PipelineError::Repository(e.into())
        })?;

        insert.end().await.map_err(|e| {
            error!(error = %e, "failed to finalize insert");
            PipelineError::Repository(e.into())
        })?;

        debug!(message_id = %reading.message_id, "telemetry reading stored");

        Ok(())
    }
}
