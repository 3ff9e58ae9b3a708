//! Store gateway (§4.8, C4): typed queries over the tables named in §6.
//! Every function here acquires a connection from the pool for exactly the
//! duration of its query and returns it on every exit path - `sqlx::PgPool`
//! gives us that for free via RAII, so there is no explicit
//! acquire/release pair to get wrong (§4.8's "connections must be returned
//! on all exit paths" is satisfied structurally rather than by convention).

use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row};
use std::time::Duration;

use crate::vendor::Vendor;

use super::models::*;

/// A held session-level advisory lock (§4.7, §4.8). Postgres ties
/// `pg_advisory_unlock` to the exact backend connection that acquired the
/// lock, not just the key - releasing through a different pooled connection
/// silently fails and leaks the lock for the lifetime of that connection. We
/// therefore pin the one `PoolConnection` we locked on and unlock through the
/// same handle, instead of routing lock/unlock through `&PgPool` separately.
pub struct AdvisoryLock {
    conn: PoolConnection<Postgres>,
    pod: String,
}

impl AdvisoryLock {
    /// Release the lock and return the connection to the pool. Consumes
    /// `self` so a regulator cannot accidentally act after releasing.
    pub async fn release(mut self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT pg_advisory_unlock(hashtext($1)::bigint)")
            .bind(&self.pod)
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(())
    }
}

/// Thin wrapper around `sqlx::PgPool`. Cloning is cheap (it's a handle to the
/// underlying pool) so every pipeline holds its own `Store` built from the
/// one pool created at startup.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(5)
            .acquire_timeout(Duration::from_secs(8))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ---- plants / ess / environment sensors (loaded at startup, §3) ----

    pub async fn load_plants(&self) -> Result<Vec<Plant>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT plant_id, pod_id, ip_address, port, logger_slave_id,
                   logger_manufacturer, plant_type, normal_power_kw, alteo_api_control
            FROM plants
            WHERE alteo_api_control = TRUE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut plants = Vec::with_capacity(rows.len());
        for row in rows {
            let vendor_raw: String = row.try_get("logger_manufacturer")?;
            let vendor = Vendor::parse(&vendor_raw)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
            let plant_type_raw: String = row.try_get("plant_type")?;
            let plant_type = if plant_type_raw.eq_ignore_ascii_case("PV_ESS") {
                PlantType::PvEss
            } else {
                PlantType::PvOnly
            };
            plants.push(Plant {
                plant_id: row.try_get("plant_id")?,
                pod_id: row.try_get("pod_id")?,
                ip: row.try_get("ip_address")?,
                port: row.try_get::<i32, _>("port")? as u16,
                logger_slave_id: row.try_get::<i32, _>("logger_slave_id")? as u8,
                vendor,
                plant_type,
                normal_power_kw: row.try_get("normal_power_kw")?,
                control_enabled: row.try_get("alteo_api_control")?,
            });
        }
        Ok(plants)
    }

    pub async fn load_active_ess_units(&self) -> Result<Vec<EssUnit>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT ess_id, plant_id, ip_address, port, slave_id, manufacturer, active
            FROM ess_units
            WHERE active = TRUE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut units = Vec::with_capacity(rows.len());
        for row in rows {
            let vendor_raw: String = row.try_get("manufacturer")?;
            let vendor = Vendor::parse(&vendor_raw)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
            units.push(EssUnit {
                ess_id: row.try_get("ess_id")?,
                plant_id: row.try_get("plant_id")?,
                ip: row.try_get("ip_address")?,
                port: row.try_get::<i32, _>("port")? as u16,
                slave_id: row.try_get::<i32, _>("slave_id")? as u8,
                vendor,
                active: row.try_get("active")?,
            });
        }
        Ok(units)
    }

    pub async fn load_active_environment_sensors(
        &self,
    ) -> Result<Vec<EnvironmentSensor>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, ip_address, port, slave_id, active
            FROM environment_sensors
            WHERE active = TRUE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(EnvironmentSensor {
                    sensor_id: row.try_get("id")?,
                    ip: row.try_get("ip_address")?,
                    port: row.try_get::<i32, _>("port")? as u16,
                    slave_id: row.try_get::<i32, _>("slave_id")? as u8,
                    active: row.try_get("active")?,
                })
            })
            .collect()
    }

    // ---- telemetry writes (§4.4, §4.5, §4.9) ----

    /// Batch-insert PCC telemetry rows in one transaction, ignoring
    /// conflicts on `(plant_id, measured_at)` (§4.4).
    pub async fn insert_pcc_telemetry_batch(
        &self,
        rows: &[PccTelemetryRow],
    ) -> Result<(), sqlx::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO plant_data_term1 (
                    plant_id, pod_id, measured_at, sum_active_power, cos_phi,
                    available_power_min, available_power_max, reference_power,
                    ghi, panel_temp
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (plant_id, measured_at) DO NOTHING
                "#,
            )
            .bind(row.plant_id)
            .bind(&row.pod_id)
            .bind(row.measured_at)
            .bind(row.sum_active_power)
            .bind(row.cos_phi)
            .bind(row.available_power_min)
            .bind(row.available_power_max)
            .bind(row.reference_power)
            .bind(row.ghi)
            .bind(row.panel_temp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await
    }

    pub async fn insert_ess_telemetry(&self, row: &EssTelemetryRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO ess_data_term1 (
                plant_id, measured_at,
                avg_batt_temp, min_batt_temp, max_batt_temp,
                avg_container_temp, min_container_temp, max_container_temp,
                available_capacity_charge, available_capacity_discharge,
                average_current_soc, allowed_min_soc, allowed_max_soc
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (plant_id, measured_at) DO NOTHING
            "#,
        )
        .bind(row.plant_id)
        .bind(row.measured_at)
        .bind(row.avg_battery_cell_temp)
        .bind(row.min_battery_cell_temp)
        .bind(row.max_battery_cell_temp)
        .bind(row.avg_container_temp)
        .bind(row.min_container_temp)
        .bind(row.max_container_temp)
        .bind(row.available_capacity_charge)
        .bind(row.available_capacity_discharge)
        .bind(row.current_soc)
        .bind(row.allowed_min_soc)
        .bind(row.allowed_max_soc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_environment_telemetry(
        &self,
        row: &EnvironmentTelemetryRow,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO environment_data_term1 (sensor_id, measured_at, temperature)
            VALUES ($1, $2, $3)
            ON CONFLICT (sensor_id, measured_at) DO NOTHING
            "#,
        )
        .bind(row.sensor_id)
        .bind(row.measured_at)
        .bind(row.temperature)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- telemetry reads (§4.6, §4.7) ----

    pub async fn latest_pcc_telemetry(
        &self,
        plant_id: i64,
    ) -> Result<Option<PccTelemetryRow>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT plant_id, pod_id, measured_at, sum_active_power, cos_phi,
                   available_power_min, available_power_max, reference_power,
                   ghi, panel_temp
            FROM plant_data_term1
            WHERE plant_id = $1
            ORDER BY measured_at DESC
            LIMIT 1
            "#,
        )
        .bind(plant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(PccTelemetryRow {
                plant_id: row.try_get("plant_id")?,
                pod_id: row.try_get("pod_id")?,
                measured_at: row.try_get("measured_at")?,
                sum_active_power: row.try_get("sum_active_power")?,
                cos_phi: row.try_get("cos_phi")?,
                available_power_min: row.try_get("available_power_min")?,
                available_power_max: row.try_get("available_power_max")?,
                reference_power: row.try_get("reference_power")?,
                ghi: row.try_get("ghi")?,
                panel_temp: row.try_get("panel_temp")?,
            })
        })
        .transpose()
    }

    pub async fn latest_ess_telemetry(
        &self,
        plant_id: i64,
    ) -> Result<Option<EssTelemetryRow>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT plant_id, measured_at, avg_batt_temp, min_batt_temp, max_batt_temp,
                   avg_container_temp, min_container_temp, max_container_temp,
                   available_capacity_charge, available_capacity_discharge,
                   average_current_soc, allowed_min_soc, allowed_max_soc
            FROM ess_data_term1
            WHERE plant_id = $1
            ORDER BY measured_at DESC
            LIMIT 1
            "#,
        )
        .bind(plant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(EssTelemetryRow {
                plant_id: row.try_get("plant_id")?,
                measured_at: row.try_get("measured_at")?,
                avg_battery_cell_temp: row.try_get("avg_batt_temp")?,
                min_battery_cell_temp: row.try_get("min_batt_temp")?,
                max_battery_cell_temp: row.try_get("max_batt_temp")?,
                avg_container_temp: row.try_get("avg_container_temp")?,
                min_container_temp: row.try_get("min_container_temp")?,
                max_container_temp: row.try_get("max_container_temp")?,
                available_capacity_charge: row.try_get("available_capacity_charge")?,
                available_capacity_discharge: row.try_get("available_capacity_discharge")?,
                current_soc: row.try_get("average_current_soc")?,
                allowed_min_soc: row.try_get("allowed_min_soc")?,
                allowed_max_soc: row.try_get("allowed_max_soc")?,
            })
        })
        .transpose()
    }

    /// 5-minute avg/min/max aggregate for the environment sensor(s) attached
    /// to `plant_id` (§4.6, §4.9). `None` when no row falls in the window.
    pub async fn environment_aggregate_last_5_minutes(
        &self,
        plant_id: i64,
    ) -> Result<Option<EnvironmentAggregate>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT AVG(e.temperature) AS avg_temp,
                   MIN(e.temperature) AS min_temp,
                   MAX(e.temperature) AS max_temp
            FROM environment_data_term1 e
            JOIN plant_environment_sensors pes ON pes.sensor_id = e.sensor_id
            WHERE pes.plant_id = $1
              AND e.measured_at >= NOW() - INTERVAL '5 minutes'
            "#,
        )
        .bind(plant_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let avg: Option<f64> = row.try_get("avg_temp")?;
                let min: Option<f64> = row.try_get("min_temp")?;
                let max: Option<f64> = row.try_get("max_temp")?;
                Ok(match (avg, min, max) {
                    (Some(avg), Some(min), Some(max)) => Some(EnvironmentAggregate { avg, min, max }),
                    _ => None,
                })
            }
            None => Ok(None),
        }
    }

    // ---- control inbox (§3, §4.6, §4.7) ----

    pub async fn latest_inbox(&self, pod: &str) -> Result<Option<ControlInboxRow>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT pod, heartbeat, sum_setpoint, scheduled_reference, use_setpoint, received_at
            FROM alteo_controls_inbox
            WHERE pod = $1
            "#,
        )
        .bind(pod)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ControlInboxRow {
                pod: row.try_get("pod")?,
                heartbeat: row.try_get("heartbeat")?,
                sum_setpoint: row.try_get("sum_setpoint")?,
                scheduled_reference: row.try_get("scheduled_reference")?,
                use_setpoint: row.try_get("use_setpoint")?,
                received_at: row.try_get("received_at")?,
            })
        })
        .transpose()
    }

    /// Last heartbeat known for `pod`, or `None` if this POD has never
    /// received a control reply (§4.6: the caller substitutes 1 in that case).
    pub async fn last_heartbeat(&self, pod: &str) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query("SELECT heartbeat FROM alteo_controls_inbox WHERE pod = $1")
            .bind(pod)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row.try_get("heartbeat")).transpose()
    }

    /// Upsert the inbox row, enforcing the monotonic-heartbeat rule (§3) in
    /// the `WHERE` clause of the `ON CONFLICT` update rather than via a
    /// separate read-then-compare round trip: the update is skipped entirely
    /// when the incoming heartbeat does not exceed the stored one.
    pub async fn upsert_inbox_if_heartbeat_advanced(
        &self,
        pod: &str,
        heartbeat: i64,
        sum_setpoint: f64,
        scheduled_reference: Option<f64>,
        use_setpoint: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO alteo_controls_inbox (
                pod, heartbeat, sum_setpoint, scheduled_reference, use_setpoint, received_at
            ) VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (pod) DO UPDATE SET
                heartbeat = EXCLUDED.heartbeat,
                sum_setpoint = EXCLUDED.sum_setpoint,
                scheduled_reference = EXCLUDED.scheduled_reference,
                use_setpoint = EXCLUDED.use_setpoint,
                received_at = NOW()
            WHERE EXCLUDED.heartbeat > alteo_controls_inbox.heartbeat
            "#,
        )
        .bind(pod)
        .bind(heartbeat)
        .bind(sum_setpoint)
        .bind(scheduled_reference)
        .bind(use_setpoint)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_send_log(&self, row: &SendLogRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO alteo_send_log (pod, request_json, response_json, status_code, sent_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&row.pod)
        .bind(&row.request_body)
        .bind(&row.response_body)
        .bind(row.status_code)
        .bind(row.sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- advisory lock (§4.7, §4.8) ----

    /// Try to acquire a session-scoped advisory lock keyed on a hash of
    /// `pod`. Returns `None` immediately (never blocks) if another
    /// process/connection holds it, in which case the caller must skip the
    /// cycle for that POD (§4.7). On success, the returned [`AdvisoryLock`]
    /// pins the connection that acquired it so [`AdvisoryLock::release`] can
    /// unlock on the same session.
    pub async fn try_advisory_lock(&self, pod: &str) -> Result<Option<AdvisoryLock>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query("SELECT pg_try_advisory_lock(hashtext($1)::bigint) AS locked")
            .bind(pod)
            .fetch_one(&mut *conn)
            .await?;
        let locked: bool = row.try_get("locked")?;
        if locked {
            Ok(Some(AdvisoryLock {
                conn,
                pod: pod.to_string(),
            }))
        } else {
            Ok(None)
        }
    }
}

