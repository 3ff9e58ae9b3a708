//! Control executor (C8, §4.7): one long-lived regulator per POD, deciding
//! each cycle whether to dispatch battery power, curtail PV, or do nothing.

use std::time::Instant;

use crate::context::AppContext;
use crate::error::DeviceId;
use crate::fieldbus::{self, Endpoint};
use crate::register_map::{encode_registers, DeviceClass};
use crate::store::{EssUnit, Plant, PlantType};
use crate::ticker::run_cadenced;
use crate::vendor::Vendor;

/// Per-POD state machine (§4.7). `Suppressed` is re-entered every cycle the
/// breaker is tripped; there is no terminal state - only a process restart
/// reboots a regulator back to `Bootstrapping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Bootstrapping,
    Steady,
    Suppressed,
}

struct Regulator {
    plant: Plant,
    ess: Option<EssUnit>,
    state: State,
    last_cmd_kw: Option<f64>,
    last_write_ts: Option<Instant>,
}

impl Regulator {
    fn new(plant: Plant, ess: Option<EssUnit>) -> Self {
        Self {
            plant,
            ess,
            state: State::Bootstrapping,
            last_cmd_kw: None,
            last_write_ts: None,
        }
    }

    async fn step(&mut self, ctx: &AppContext) {
        let device = DeviceId::Logger(self.plant.plant_id);
        if ctx.breaker.should_skip(&device) {
            self.transition(State::Suppressed);
            return;
        }

        let inbox = match ctx.store.latest_inbox(&self.plant.pod_id).await {
            Ok(v) => v,
            Err(e) => {
                log::error!(
                    "[control-executor] pod {} inbox read failed: {e}",
                    self.plant.pod_id
                );
                return;
            }
        };
        let Some(inbox) = inbox else {
            log::debug!(
                "[control-executor] pod {} has no inbox row yet, skipping cycle",
                self.plant.pod_id
            );
            return;
        };

        let pcc = match ctx.store.latest_pcc_telemetry(self.plant.plant_id).await {
            Ok(v) => v,
            Err(e) => {
                log::error!(
                    "[control-executor] pod {} PCC read failed: {e}",
                    self.plant.pod_id
                );
                return;
            }
        };
        let Some(pcc_kw) = pcc.and_then(|row| row.sum_active_power).map(f64::abs) else {
            log::debug!(
                "[control-executor] pod {} has no PCC telemetry yet, skipping cycle",
                self.plant.pod_id
            );
            return;
        };

        if self.last_cmd_kw.is_none() {
            self.last_cmd_kw = Some(pcc_kw);
            self.transition(State::Steady);
        } else if self.state == State::Suppressed {
            self.transition(State::Steady);
        }
        let last_cmd_kw = self.last_cmd_kw.expect("just initialised above");

        let target_kw = inbox.sum_setpoint;
        let error = target_kw - pcc_kw;
        if error.abs() < ctx.config.deadband_kw {
            return;
        }

        let lock = match ctx.store.try_advisory_lock(&self.plant.pod_id).await {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                log::debug!(
                    "[control-executor] pod {} advisory lock not granted, skipping cycle",
                    self.plant.pod_id
                );
                return;
            }
            Err(e) => {
                log::error!(
                    "[control-executor] pod {} advisory lock request failed: {e}",
                    self.plant.pod_id
                );
                return;
            }
        };

        let result = self.act(ctx, error, target_kw, last_cmd_kw).await;
        if let Err(e) = lock.release().await {
            log::error!(
                "[control-executor] pod {} advisory lock release failed: {e}",
                self.plant.pod_id
            );
        }

        match result {
            Ok(()) => ctx.breaker.on_success(&device),
            Err(e) => {
                log::warn!("[control-executor] pod {} actuation failed: {e}", self.plant.pod_id);
                ctx.breaker.on_failure(device);
            }
        }
    }

    fn transition(&mut self, next: State) {
        if self.state != next {
            log::info!(
                "[control-executor] pod {} {:?} -> {:?}",
                self.plant.pod_id,
                self.state,
                next
            );
            self.state = next;
        }
    }

    /// §4.7 step 8: branch on plant type, enforcing the deadband-passed
    /// error against available ESS capacity or the plant's rated power.
    async fn act(
        &mut self,
        ctx: &AppContext,
        error: f64,
        target_kw: f64,
        last_cmd_kw: f64,
    ) -> anyhow::Result<()> {
        match self.plant.plant_type {
            PlantType::PvEss => {
                let ess_row = ctx.store.latest_ess_telemetry(self.plant.plant_id).await?;
                let (available_charge, available_discharge) = ess_row
                    .map(|row| (row.available_capacity_charge, row.available_capacity_discharge))
                    .unwrap_or((0.0, 0.0));

                let discharge_ok = error > 0.0 && available_discharge > 0.0;
                let charge_ok = error < 0.0 && available_charge > 0.0;

                if discharge_ok || charge_ok {
                    let now = Instant::now();
                    let interval_elapsed = match self.last_write_ts {
                        Some(ts) => now.duration_since(ts) >= ctx.config.min_write_interval(),
                        None => true,
                    };
                    if !interval_elapsed {
                        log::debug!(
                            "[control-executor] pod {} within MIN_WRITE_INTERVAL, skipping ESS write",
                            self.plant.pod_id
                        );
                        return Ok(());
                    }
                    let ess = self.ess.as_ref().ok_or_else(|| {
                        anyhow::anyhow!(
                            "PV_ESS plant {} has no active ESS unit",
                            self.plant.plant_id
                        )
                    })?;
                    let new_cmd = last_cmd_kw + ctx.config.kp * error;
                    write_ess_setpoint(ctx, ess, new_cmd).await?;
                    self.last_cmd_kw = Some(new_cmd);
                    self.last_write_ts = Some(now);
                } else if error < 0.0 {
                    apply_pv_limit(ctx, &self.plant, target_kw).await?;
                }
                Ok(())
            }
            PlantType::PvOnly => {
                let unclamped = last_cmd_kw + ctx.config.kp * error;
                let new_limit = unclamped.clamp(0.0, self.plant.normal_power_kw);
                if unclamped > self.plant.normal_power_kw {
                    log::info!(
                        "[control-executor] pod {} PV limit saturates at rated power {} kW",
                        self.plant.pod_id,
                        self.plant.normal_power_kw
                    );
                }
                apply_pv_limit(ctx, &self.plant, new_limit).await?;
                self.last_cmd_kw = Some(new_limit);
                Ok(())
            }
        }
    }
}

async fn write_ess_setpoint(ctx: &AppContext, ess: &EssUnit, value_kw: f64) -> anyhow::Result<()> {
    let descriptor = ctx
        .catalog
        .get(DeviceClass::Ess, ess.vendor, "activePowerAdjustment")?;
    let registers = encode_registers(value_kw, descriptor);
    let endpoint = Endpoint {
        ip: ess.ip.clone(),
        port: ess.port,
        slave: ess.slave_id,
    };
    let device = DeviceId::Ess(ess.ess_id);
    match registers.len() {
        1 => fieldbus::write_single(device, &endpoint, descriptor.address, registers[0]).await?,
        _ => fieldbus::write_multi(device, &endpoint, descriptor.address, &registers).await?,
    }
    Ok(())
}

/// Vendor PV-limit actuators (§4.7): Huawei writes a signed 32-bit limit
/// directly; Fronius writes an enable flag then a clamped integer percent.
async fn apply_pv_limit(ctx: &AppContext, plant: &Plant, value_kw: f64) -> anyhow::Result<()> {
    let endpoint = Endpoint {
        ip: plant.ip.clone(),
        port: plant.port,
        slave: plant.logger_slave_id,
    };
    let device = DeviceId::Logger(plant.plant_id);

    match plant.vendor {
        Vendor::Huawei => {
            let descriptor =
                ctx.catalog
                    .get(DeviceClass::Logger, Vendor::Huawei, "activePowerAdjustment")?;
            let registers = encode_registers(value_kw, descriptor);
            fieldbus::write_multi(device, &endpoint, descriptor.address, &registers).await?;
        }
        Vendor::Fronius => {
            let descriptor = ctx.catalog.get(
                DeviceClass::Logger,
                Vendor::Fronius,
                "activePowerLimitPercent",
            )?;
            if let Some(enable) = descriptor.enable_register {
                fieldbus::write_single(device.clone(), &endpoint, enable.address, enable.value)
                    .await?;
            }
            let percent = (value_kw / plant.normal_power_kw * 100.0).clamp(0.0, 100.0);
            fieldbus::write_single(device, &endpoint, descriptor.address, percent as u16).await?;
        }
        Vendor::Hithium => anyhow::bail!("hithium has no PV-limit actuator (ESS-only vendor)"),
    }
    Ok(())
}

/// Run one regulator for `plant` until cancellation (§4.7, §5: "the
/// control-executor regulator is a blocking loop per POD and runs on its own
/// worker").
pub async fn run(ctx: AppContext, plant: Plant, ess: Option<EssUnit>) {
    let mut regulator = Regulator::new(plant, ess);
    let period = ctx.config.control_interval();
    let cancel = ctx.cancel.clone();
    run_cadenced(period, cancel, "control-executor", move |_cycle_start| {
        let ctx = ctx.clone();
        async move { regulator.step(&ctx).await }
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plant(plant_type: PlantType, normal_power_kw: f64) -> Plant {
        Plant {
            plant_id: 1,
            pod_id: "POD1".to_string(),
            ip: "127.0.0.1".to_string(),
            port: 502,
            logger_slave_id: 1,
            vendor: Vendor::Huawei,
            plant_type,
            normal_power_kw,
            control_enabled: true,
        }
    }

    #[test]
    fn pv_only_saturation_clamps_to_rated_power() {
        // §8 scenario 3: rated 250kW, last_cmd=260, error=40, KP=0.3 -> 272 clamped to 250.
        let last_cmd_kw = 260.0;
        let error = 40.0;
        let kp = 0.3;
        let p = plant(PlantType::PvOnly, 250.0);
        let unclamped = last_cmd_kw + kp * error;
        let new_limit = unclamped.clamp(0.0, p.normal_power_kw);
        assert_eq!(unclamped, 272.0);
        assert_eq!(new_limit, 250.0);
    }

    #[test]
    fn pv_ess_happy_path_command_matches_scenario() {
        // §8 scenario 1: target=200, pcc=170, KP=0.3 -> last_cmd + 9 kW.
        let last_cmd_kw = 170.0;
        let error = 200.0 - 170.0;
        let new_cmd = last_cmd_kw + 0.3 * error;
        assert!((new_cmd - (last_cmd_kw + 9.0)).abs() < 1e-9);
    }

    #[test]
    fn deadband_leaves_last_cmd_untouched() {
        let target = 100.5;
        let pcc = 100.0;
        let deadband = 1.0;
        assert!((target - pcc).abs() < deadband);
    }
}
