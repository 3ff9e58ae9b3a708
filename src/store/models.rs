//! Data model (§3). These mirror the `plants` / `ess_units` / ... tables
//! directly; field names match the columns so the query layer can map rows
//! with minimal translation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::vendor::Vendor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlantType {
    PvOnly,
    PvEss,
}

/// §3 "Plant". Loaded at process start; a snapshot may be refreshed lazily
/// but the core never mutates it mid-run.
#[derive(Debug, Clone)]
pub struct Plant {
    pub plant_id: i64,
    pub pod_id: String,
    pub ip: String,
    pub port: u16,
    pub logger_slave_id: u8,
    pub vendor: Vendor,
    pub plant_type: PlantType,
    pub normal_power_kw: f64,
    pub control_enabled: bool,
}

/// §3 "ESS unit", owned by a plant. A plant may have more than one row in
/// schema but the core treats the first active one as canonical (§3).
#[derive(Debug, Clone)]
pub struct EssUnit {
    pub ess_id: i64,
    pub plant_id: i64,
    pub ip: String,
    pub port: u16,
    pub slave_id: u8,
    pub vendor: Vendor,
    pub active: bool,
}

/// §3 "Environment sensor".
#[derive(Debug, Clone)]
pub struct EnvironmentSensor {
    pub sensor_id: i64,
    pub ip: String,
    pub port: u16,
    pub slave_id: u8,
    pub active: bool,
}

/// §3 "PCC telemetry row", keyed `(plant_id, measured_at)`.
#[derive(Debug, Clone)]
pub struct PccTelemetryRow {
    pub plant_id: i64,
    pub pod_id: String,
    pub measured_at: DateTime<Utc>,
    pub sum_active_power: Option<f64>,
    pub cos_phi: Option<f64>,
    pub available_power_min: Option<f64>,
    pub available_power_max: Option<f64>,
    pub reference_power: Option<f64>,
    pub ghi: Option<f64>,
    pub panel_temp: Option<f64>,
}

/// §3 "ESS telemetry row", keyed `(plant_id, measured_at)`.
#[derive(Debug, Clone)]
pub struct EssTelemetryRow {
    pub plant_id: i64,
    pub measured_at: DateTime<Utc>,
    pub avg_battery_cell_temp: Option<f64>,
    pub min_battery_cell_temp: Option<f64>,
    pub max_battery_cell_temp: Option<f64>,
    pub avg_container_temp: Option<f64>,
    pub min_container_temp: Option<f64>,
    pub max_container_temp: Option<f64>,
    pub available_capacity_charge: f64,
    pub available_capacity_discharge: f64,
    pub current_soc: f64,
    pub allowed_min_soc: f64,
    pub allowed_max_soc: f64,
}

/// §3 "Environment-sensor telemetry row", keyed `(sensor_id, measured_at)`.
#[derive(Debug, Clone)]
pub struct EnvironmentTelemetryRow {
    pub sensor_id: i64,
    pub measured_at: DateTime<Utc>,
    pub temperature: f64,
}

/// §3 aggregate read back by the upstream reporter (§4.6, §4.9).
#[derive(Debug, Clone, Copy)]
pub struct EnvironmentAggregate {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

/// §3 "Control inbox row", keyed uniquely on `pod`.
#[derive(Debug, Clone)]
pub struct ControlInboxRow {
    pub pod: String,
    pub heartbeat: i64,
    pub sum_setpoint: f64,
    pub scheduled_reference: Option<f64>,
    pub use_setpoint: bool,
    pub received_at: DateTime<Utc>,
}

/// §3 "Send log row". Append-only.
#[derive(Debug, Clone)]
pub struct SendLogRow {
    pub pod: String,
    pub request_body: serde_json::Value,
    pub response_body: serde_json::Value,
    pub status_code: Option<i32>,
    pub sent_at: DateTime<Utc>,
}
