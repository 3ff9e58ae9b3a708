//! ESS poller (C6, §4.5): every `TARGET_PERIOD`, read each active ESS's
//! battery state and insert one telemetry row per cycle.

use std::sync::Arc;
use std::time::Instant;

use chrono::{SubsecRound, Utc};
use tokio::sync::Semaphore;

use crate::context::AppContext;
use crate::error::DeviceId;
use crate::fieldbus::Endpoint;
use crate::register_map::DeviceClass;
use crate::store::{EssTelemetryRow, EssUnit};
use crate::ticker::run_cadenced;

use super::common::{average, read_point, read_vector};

const CELL_COUNT: u16 = 5;
const DEFAULT_MIN_SOC: f64 = 0.0;
const DEFAULT_MAX_SOC: f64 = 100.0;

pub async fn run(ctx: AppContext, units: Arc<Vec<EssUnit>>) {
    let period = ctx.config.ess_target_period();
    let cancel = ctx.cancel.clone();
    run_cadenced(period, cancel, "ess-poller", move |cycle_start| {
        let ctx = ctx.clone();
        let units = units.clone();
        async move { poll_once(ctx, units, cycle_start).await }
    })
    .await;
}

async fn poll_once(ctx: AppContext, units: Arc<Vec<EssUnit>>, _cycle_start: Instant) {
    let semaphore = Arc::new(Semaphore::new(ctx.config.max_parallel_polls));
    let mut tasks = Vec::with_capacity(units.len());

    for unit in units.iter() {
        if ctx.breaker.should_skip(&DeviceId::Ess(unit.ess_id)) {
            continue;
        }
        let semaphore = semaphore.clone();
        let ctx = ctx.clone();
        let unit = unit.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            poll_unit(&ctx, &unit).await
        }));
    }

    for task in tasks {
        match task.await {
            Ok(Some(row)) => {
                if let Err(e) = ctx.store.insert_ess_telemetry(&row).await {
                    log::error!("[ess-poller] insert failed for plant {}: {e}", row.plant_id);
                }
            }
            Ok(None) => {}
            Err(e) => log::error!("[ess-poller] poll task panicked: {e}"),
        }
    }
}

async fn poll_unit(ctx: &AppContext, unit: &EssUnit) -> Option<EssTelemetryRow> {
    let device = DeviceId::Ess(unit.ess_id);
    let endpoint = Endpoint {
        ip: unit.ip.clone(),
        port: unit.port,
        slave: unit.slave_id,
    };

    let result: anyhow::Result<EssTelemetryRow> = async {
        let soc = read_point(
            &ctx.catalog,
            DeviceClass::Ess,
            unit.vendor,
            "averageCurrentSOC",
            device.clone(),
            &endpoint,
        )
        .await?;
        let total_capacity = read_point(
            &ctx.catalog,
            DeviceClass::Ess,
            unit.vendor,
            "totalCapacity",
            device.clone(),
            &endpoint,
        )
        .await?;
        let cell_avg = read_vector(
            &ctx.catalog,
            DeviceClass::Ess,
            unit.vendor,
            "batteryCellTempAvgBase",
            CELL_COUNT,
            device.clone(),
            &endpoint,
        )
        .await?;
        let cell_min = read_vector(
            &ctx.catalog,
            DeviceClass::Ess,
            unit.vendor,
            "batteryCellTempMinBase",
            CELL_COUNT,
            device.clone(),
            &endpoint,
        )
        .await?;
        let cell_max = read_vector(
            &ctx.catalog,
            DeviceClass::Ess,
            unit.vendor,
            "batteryCellTempMaxBase",
            CELL_COUNT,
            device.clone(),
            &endpoint,
        )
        .await?;
        let container = read_vector(
            &ctx.catalog,
            DeviceClass::Ess,
            unit.vendor,
            "containerInsideTempBase",
            CELL_COUNT,
            device.clone(),
            &endpoint,
        )
        .await?;

        Ok(build_row(
            unit.plant_id,
            soc,
            total_capacity,
            &cell_avg,
            &cell_min,
            &cell_max,
            &container,
        ))
    }
    .await;

    match result {
        Ok(row) => {
            ctx.breaker.on_success(&device);
            Some(row)
        }
        Err(e) => {
            log::warn!("[ess-poller] {device} poll failed: {e}");
            ctx.breaker.on_failure(device);
            None
        }
    }
}

/// Derivations from §4.5: the two temperature triples are averages of the
/// five-cell vectors (not per-cell extremes); available charge/discharge are
/// floored at 0 and fall back to the 0/100 SOC bound default when the device
/// exposes no allowed-SOC registers.
fn build_row(
    plant_id: i64,
    soc: f64,
    total_capacity: f64,
    cell_avg: &[f64],
    cell_min: &[f64],
    cell_max: &[f64],
    container: &[f64],
) -> EssTelemetryRow {
    let min_soc = DEFAULT_MIN_SOC;
    let max_soc = DEFAULT_MAX_SOC;

    let available_charge = (total_capacity * (max_soc - soc) / 100.0).max(0.0);
    let available_discharge = (total_capacity * (soc - min_soc) / 100.0).max(0.0);

    let container_min = container.iter().cloned().fold(f64::INFINITY, f64::min);
    let container_max = container.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    EssTelemetryRow {
        plant_id,
        measured_at: Utc::now().trunc_subsecs(0),
        avg_battery_cell_temp: Some(average(cell_avg)),
        min_battery_cell_temp: Some(average(cell_min)),
        max_battery_cell_temp: Some(average(cell_max)),
        avg_container_temp: Some(average(container)),
        min_container_temp: Some(container_min),
        max_container_temp: Some(container_max),
        available_capacity_charge: available_charge,
        available_capacity_discharge: available_discharge,
        current_soc: soc,
        allowed_min_soc: min_soc,
        allowed_max_soc: max_soc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_capacity_never_exceeds_total_and_is_nonnegative() {
        for soc in [0.0, 10.0, 50.0, 90.0, 100.0] {
            let row = build_row(1, soc, 200.0, &[25.0; 5], &[20.0; 5], &[30.0; 5], &[22.0; 5]);
            assert!(row.available_capacity_charge >= 0.0);
            assert!(row.available_capacity_discharge >= 0.0);
            assert!(row.available_capacity_charge + row.available_capacity_discharge <= 200.0 + 1e-9);
        }
    }

    #[test]
    fn temperature_triples_average_the_cell_vectors() {
        let row = build_row(1, 50.0, 200.0, &[10.0, 20.0, 30.0, 40.0, 50.0], &[5.0; 5], &[60.0; 5], &[15.0, 25.0, 15.0, 25.0, 15.0]);
        assert_eq!(row.avg_battery_cell_temp, Some(30.0));
        assert_eq!(row.min_battery_cell_temp, Some(5.0));
        assert_eq!(row.max_battery_cell_temp, Some(60.0));
        assert_eq!(row.min_container_temp, Some(15.0));
        assert_eq!(row.max_container_temp, Some(25.0));
    }
}
