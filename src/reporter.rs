//! Upstream reporter (C7, §4.6): every `CYCLE_TIME`, POST one telemetry
//! report per POD to the grid operator API, mirror the last known heartbeat,
//! and upsert whatever setpoint comes back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::context::AppContext;
use crate::store::Plant;
use crate::ticker::run_cadenced;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct Measurement<'a> {
    measurement: &'a str,
    #[serde(rename = "measuredAt")]
    measured_at: String,
    value: Option<f64>,
    quality: u8,
}

#[derive(Serialize)]
struct PodReport<'a> {
    pod: &'a str,
    values: Vec<Measurement<'a>>,
}

#[derive(Debug, Deserialize)]
struct UpstreamResponse {
    #[serde(default)]
    controls: Vec<ControlEntry>,
}

#[derive(Debug, Deserialize)]
struct ControlEntry {
    #[allow(dead_code)]
    pod: Option<String>,
    heartbeat: i64,
    #[serde(rename = "sumSetPoint")]
    sum_set_point: f64,
    #[serde(rename = "scheduledReference")]
    scheduled_reference: Option<f64>,
    #[serde(rename = "useSetPoint", default)]
    use_set_point: i32,
}

pub async fn run(ctx: AppContext, plants: Arc<Vec<Plant>>) {
    let period = ctx.config.cycle_time();
    let cancel = ctx.cancel.clone();
    run_cadenced(period, cancel, "upstream-reporter", move |cycle_start| {
        let ctx = ctx.clone();
        let plants = plants.clone();
        async move { report_once(ctx, plants, cycle_start).await }
    })
    .await;
}

async fn report_once(ctx: AppContext, plants: Arc<Vec<Plant>>, _cycle_start: Instant) {
    let mut tasks = Vec::with_capacity(plants.len());
    for plant in plants.iter() {
        let ctx = ctx.clone();
        let plant = plant.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = report_pod(&ctx, &plant).await {
                log::error!("[upstream-reporter] pod {} failed: {e}", plant.pod_id);
            }
        }));
    }
    for task in tasks {
        if let Err(e) = task.await {
            log::error!("[upstream-reporter] report task panicked: {e}");
        }
    }
}

async fn report_pod(ctx: &AppContext, plant: &Plant) -> anyhow::Result<()> {
    let measured_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

    let pcc = ctx.store.latest_pcc_telemetry(plant.plant_id).await?;
    let Some(pcc) = pcc else {
        log::debug!(
            "[upstream-reporter] no PCC telemetry yet for pod {}, skipping this cycle",
            plant.pod_id
        );
        return Ok(());
    };

    let heartbeat_mirrored = ctx
        .store
        .last_heartbeat(&plant.pod_id)
        .await?
        .unwrap_or(1);

    let mut values = vec![
        measurement("heartbeatMirrored", Some(heartbeat_mirrored as f64), &measured_at),
        measurement("availablePowerMin", pcc.available_power_min, &measured_at),
        measurement("availablePowerMax", pcc.available_power_max, &measured_at),
        measurement("sumActivePower", pcc.sum_active_power.map(f64::abs), &measured_at),
        measurement("cosPhi", pcc.cos_phi.map(|c| c.clamp(-1.0, 1.0)), &measured_at),
        measurement("referencePower", pcc.reference_power, &measured_at),
    ];

    if let Some(ess) = ctx.store.latest_ess_telemetry(plant.plant_id).await? {
        values.push(measurement(
            "availableCapacityCharge",
            Some(ess.available_capacity_charge),
            &measured_at,
        ));
        values.push(measurement(
            "availableCapacityDischarge",
            Some(ess.available_capacity_discharge),
            &measured_at,
        ));
        values.push(measurement("averageBatterycellTemp", ess.avg_battery_cell_temp, &measured_at));
        values.push(measurement("averageBatterycellTempMIN", ess.min_battery_cell_temp, &measured_at));
        values.push(measurement("averageBatterycellTempMAX", ess.max_battery_cell_temp, &measured_at));
        values.push(measurement("averageContainerInsideTemp", ess.avg_container_temp, &measured_at));
        values.push(measurement("averageContainerInsideTempMIN", ess.min_container_temp, &measured_at));
        values.push(measurement("averageContainerInsideTempMAX", ess.max_container_temp, &measured_at));
        values.push(measurement("averageCurrentSOC", Some(ess.current_soc), &measured_at));
        values.push(measurement("allowedMinSOC", Some(ess.allowed_min_soc), &measured_at));
        values.push(measurement("allowedMaxSOC", Some(ess.allowed_max_soc), &measured_at));
    }

    if let Some(env) = ctx
        .store
        .environment_aggregate_last_5_minutes(plant.plant_id)
        .await?
    {
        values.push(measurement("averageEnvironmentTemp", Some(env.avg), &measured_at));
        values.push(measurement("averageEnvironmentTempMIN", Some(env.min), &measured_at));
        values.push(measurement("averageEnvironmentTempMAX", Some(env.max), &measured_at));
    }

    let body = vec![PodReport {
        pod: &plant.pod_id,
        values,
    }];
    let request_json = serde_json::to_value(&body)?;

    let send_result = ctx
        .http
        .post(&ctx.config.upstream_url)
        .header("Content-Type", "application/json")
        .header("Ocp-Apim-Subscription-Key", ctx.api_key.as_ref())
        .timeout(HTTP_TIMEOUT)
        .json(&body)
        .send()
        .await;

    let (status, response_body) = match send_result {
        Ok(response) => {
            let status = response.status().as_u16() as i32;
            let text = response.text().await.unwrap_or_default();
            let parsed: Value =
                serde_json::from_str(&text).unwrap_or_else(|_| json!({"raw_text": text}));
            (Some(status), parsed)
        }
        Err(e) => {
            log::warn!("[upstream-reporter] transport error for pod {}: {e}", plant.pod_id);
            (None, json!({"raw_text": e.to_string()}))
        }
    };

    ctx.store
        .insert_send_log(&crate::store::SendLogRow {
            pod: plant.pod_id.clone(),
            request_body: request_json,
            response_body: response_body.clone(),
            status_code: status,
            sent_at: Utc::now(),
        })
        .await?;

    if status == Some(200) {
        if let Ok(parsed) = serde_json::from_value::<UpstreamResponse>(response_body) {
            if let Some(control) = parsed.controls.into_iter().next() {
                ctx.store
                    .upsert_inbox_if_heartbeat_advanced(
                        &plant.pod_id,
                        control.heartbeat,
                        control.sum_set_point,
                        control.scheduled_reference,
                        control.use_set_point != 0,
                    )
                    .await?;
            }
        }
    }

    Ok(())
}

fn measurement<'a>(name: &'a str, value: Option<f64>, measured_at: &str) -> Measurement<'a> {
    Measurement {
        measurement: name,
        measured_at: measured_at.to_string(),
        value,
        quality: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_response_tolerates_extra_fields() {
        let raw = r#"{"controls":[{"pod":"POD1","heartbeat":8,"sumSetPoint":120.5,"scheduledReference":110.0,"useSetPoint":1,"extra":"ignored"}]}"#;
        let parsed: UpstreamResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.controls.len(), 1);
        assert_eq!(parsed.controls[0].heartbeat, 8);
        assert_eq!(parsed.controls[0].sum_set_point, 120.5);
    }

    #[test]
    fn missing_controls_array_defaults_empty() {
        let parsed: UpstreamResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(parsed.controls.is_empty());
    }
}
