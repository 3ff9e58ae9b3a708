//! Meter poller (C5, §4.4): every `CYCLE_TIME`, read each active plant's PCC
//! meter and batch-insert one telemetry row per plant.

use std::sync::Arc;
use std::time::Instant;

use chrono::{SubsecRound, Utc};
use tokio::sync::Semaphore;

use crate::context::AppContext;
use crate::error::DeviceId;
use crate::fieldbus::Endpoint;
use crate::register_map::DeviceClass;
use crate::store::{Plant, PccTelemetryRow};
use crate::ticker::run_cadenced;
use crate::vendor::normalise_cos_phi;

use super::common::read_point;

pub async fn run(ctx: AppContext, plants: Arc<Vec<Plant>>) {
    let period = ctx.config.cycle_time();
    let cancel = ctx.cancel.clone();
    run_cadenced(period, cancel, "meter-poller", move |cycle_start| {
        let ctx = ctx.clone();
        let plants = plants.clone();
        async move { poll_once(ctx, plants, cycle_start).await }
    })
    .await;
}

async fn poll_once(ctx: AppContext, plants: Arc<Vec<Plant>>, _cycle_start: Instant) {
    let semaphore = Arc::new(Semaphore::new(ctx.config.max_parallel_polls));
    let mut tasks = Vec::with_capacity(plants.len());

    for plant in plants.iter() {
        if ctx.breaker.should_skip(&DeviceId::Logger(plant.plant_id)) {
            continue;
        }
        let semaphore = semaphore.clone();
        let ctx = ctx.clone();
        let plant = plant.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            poll_plant(&ctx, &plant).await
        }));
    }

    let mut rows = Vec::with_capacity(tasks.len());
    for task in tasks {
        match task.await {
            Ok(Some(row)) => rows.push(row),
            Ok(None) => {}
            Err(e) => log::error!("[meter-poller] poll task panicked: {e}"),
        }
    }

    if let Err(e) = ctx.store.insert_pcc_telemetry_batch(&rows).await {
        log::error!("[meter-poller] batch insert failed: {e}");
    }
}

async fn poll_plant(ctx: &AppContext, plant: &Plant) -> Option<PccTelemetryRow> {
    let device = DeviceId::Logger(plant.plant_id);
    let endpoint = Endpoint {
        ip: plant.ip.clone(),
        port: plant.port,
        slave: plant.logger_slave_id,
    };

    let power = read_point(
        &ctx.catalog,
        DeviceClass::Logger,
        plant.vendor,
        "sum_active_power",
        device.clone(),
        &endpoint,
    )
    .await;
    let phi = read_point(
        &ctx.catalog,
        DeviceClass::Logger,
        plant.vendor,
        "cos_phi",
        device.clone(),
        &endpoint,
    )
    .await;

    let (sum_active_power, cos_phi) = match (power, phi) {
        (Ok(p), Ok(c)) => (p, c),
        (Err(e), _) | (_, Err(e)) => {
            log::warn!("[meter-poller] {device} poll failed: {e}");
            ctx.breaker.on_failure(device);
            return None;
        }
    };

    ctx.breaker.on_success(&device);
    let cos_phi = normalise_cos_phi(plant.vendor, cos_phi).clamp(-1.0, 1.0);
    let measured_at = Utc::now().trunc_subsecs(0);

    Some(PccTelemetryRow {
        plant_id: plant.plant_id,
        pod_id: plant.pod_id.clone(),
        measured_at,
        sum_active_power: Some(sum_active_power),
        cos_phi: Some(cos_phi),
        available_power_min: Some(0.0),
        available_power_max: Some(sum_active_power.abs()),
        reference_power: Some(sum_active_power.abs()),
        ghi: None,
        panel_temp: None,
    })
}
