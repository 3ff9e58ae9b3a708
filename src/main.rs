use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::LevelFilter;
use tokio_util::sync::CancellationToken;

mod breaker;
mod configuration;
mod context;
mod control;
mod error;
mod fieldbus;
mod pollers;
mod register_map;
mod reporter;
mod store;
mod ticker;
mod vendor;

use breaker::Breaker;
use configuration::config::{load_config, Secrets};
use context::AppContext;
use error::ConfigError;
use register_map::{DeviceClass, RegisterCatalog};
use store::{EssUnit, Plant, PlantType, Store};
use vendor::Vendor;

const CONFIG_PATH: &str = "config.json";

#[tokio::main]
async fn main() {
    let config = load_config(CONFIG_PATH).unwrap_or_else(|e| {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    });

    env_logger::Builder::new()
        .filter_level(config.log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info))
        .init();

    log::info!("=== site controller starting ===");

    let secrets = Secrets::from_env().unwrap_or_else(|e| {
        log::error!("fatal: {e}");
        std::process::exit(1);
    });

    let catalog = RegisterCatalog::load(&config.register_map_dir).unwrap_or_else(|e| {
        log::error!("fatal: {e}");
        std::process::exit(1);
    });

    let store = Store::connect(&secrets.database_url()).await.unwrap_or_else(|e| {
        log::error!("fatal: failed to connect to store: {e}");
        std::process::exit(1);
    });

    let plants = store.load_plants().await.unwrap_or_else(|e| {
        log::error!("fatal: failed to load plants: {e}");
        std::process::exit(1);
    });
    let ess_units = store.load_active_ess_units().await.unwrap_or_else(|e| {
        log::error!("fatal: failed to load ESS units: {e}");
        std::process::exit(1);
    });
    let environment_sensors = store.load_active_environment_sensors().await.unwrap_or_else(|e| {
        log::error!("fatal: failed to load environment sensors: {e}");
        std::process::exit(1);
    });

    log::info!(
        "loaded {} plants, {} ESS units, {} environment sensors",
        plants.len(),
        ess_units.len(),
        environment_sensors.len()
    );

    // §7 taxonomy 4: a missing register descriptor is a fatal startup error,
    // not something a poller discovers mid-cycle. Resolve every point each
    // loaded plant/ESS will actually need now, while we can still refuse to
    // start, instead of letting the first poll of a misconfigured device
    // trip the breaker forever.
    if let Err(e) = validate_register_coverage(&catalog, &plants, &ess_units) {
        log::error!("fatal: {e}");
        std::process::exit(1);
    }

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("failed to build HTTP client");

    let cancel = CancellationToken::new();
    let breaker_cooldown = Duration::from_secs(config.breaker_cooldown_secs);
    let ctx = AppContext {
        config: Arc::new(config),
        store,
        catalog: Arc::new(catalog),
        breaker: Arc::new(Breaker::new(breaker_cooldown)),
        http,
        api_key: Arc::from(secrets.alteo_api_key.as_str()),
        cancel: cancel.clone(),
    };

    let plants = Arc::new(plants);
    let ess_units = Arc::new(ess_units);
    let environment_sensors = Arc::new(environment_sensors);

    let mut handles = Vec::new();

    handles.push(tokio::spawn(pollers::meter::run(ctx.clone(), plants.clone())));
    handles.push(tokio::spawn(pollers::ess::run(ctx.clone(), ess_units.clone())));
    handles.push(tokio::spawn(pollers::environment::run(
        ctx.clone(),
        environment_sensors.clone(),
    )));
    handles.push(tokio::spawn(reporter::run(ctx.clone(), plants.clone())));

    // One regulator task per controlled POD (§4.7, §5): each owns its state
    // exclusively, so no sharing beyond the common `AppContext` handles.
    for plant in plants.iter() {
        let owning_ess = ess_units
            .iter()
            .find(|u| u.plant_id == plant.plant_id && u.active)
            .cloned();
        if plant.plant_type == PlantType::PvEss && owning_ess.is_none() {
            log::warn!(
                "pod {} is PV_ESS but has no active ESS unit; the regulator will curtail via the inverter only",
                plant.pod_id
            );
        }
        handles.push(tokio::spawn(control::run(ctx.clone(), plant.clone(), owning_ess)));
    }

    shutdown_on_signal(cancel).await;

    for handle in handles {
        if let Err(e) = handle.await {
            log::error!("pipeline task panicked: {e}");
        }
    }

    log::info!("=== site controller stopped ===");
}

/// §4.1/§7 taxonomy 4: resolve every symbolic register point a poller or the
/// control executor will need, for every vendor actually present among the
/// loaded plants/ESS units, while we can still refuse to start. Without this,
/// a missing descriptor only surfaces the first time some poller happens to
/// read it, where it is indistinguishable from a transient device failure
/// and gets tripped into the breaker instead of aborting startup.
fn validate_register_coverage(
    catalog: &RegisterCatalog,
    plants: &[Plant],
    ess_units: &[EssUnit],
) -> Result<(), ConfigError> {
    let logger_vendors: HashSet<Vendor> = plants.iter().map(|p| p.vendor).collect();
    for vendor in logger_vendors {
        catalog.get(DeviceClass::Logger, vendor, "sum_active_power")?;
        catalog.get(DeviceClass::Logger, vendor, "cos_phi")?;
        let pv_limit_point = match vendor {
            Vendor::Huawei => "activePowerAdjustment",
            Vendor::Fronius => "activePowerLimitPercent",
            // Hithium is an ESS-only vendor tag in this data model (§3); no
            // plant actually carries it as a logger vendor.
            Vendor::Hithium => continue,
        };
        catalog.get(DeviceClass::Logger, vendor, pv_limit_point)?;
    }

    let ess_vendors: HashSet<Vendor> = ess_units.iter().map(|u| u.vendor).collect();
    for vendor in ess_vendors {
        for point in [
            "averageCurrentSOC",
            "totalCapacity",
            "batteryCellTempAvgBase",
            "batteryCellTempMinBase",
            "batteryCellTempMaxBase",
            "containerInsideTempBase",
            "activePowerAdjustment",
        ] {
            catalog.get(DeviceClass::Ess, vendor, point)?;
        }
    }

    Ok(())
}

/// Observe SIGINT/SIGTERM and fire the shared cancellation token (§5); every
/// pipeline's ticker checks it at the top of its next cycle or pad-sleep, so
/// shutdown completes within one cycle per pipeline.
#[cfg(unix)]
async fn shutdown_on_signal(cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => log::info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => log::info!("received SIGTERM, shutting down"),
    }
    cancel.cancel();
}

#[cfg(not(unix))]
async fn shutdown_on_signal(cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    log::info!("received ctrl-c, shutting down");
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plant(vendor: Vendor) -> Plant {
        Plant {
            plant_id: 1,
            pod_id: "POD1".to_string(),
            ip: "127.0.0.1".to_string(),
            port: 502,
            logger_slave_id: 1,
            vendor,
            plant_type: PlantType::PvOnly,
            normal_power_kw: 100.0,
            control_enabled: true,
        }
    }

    fn ess(vendor: Vendor) -> EssUnit {
        EssUnit {
            ess_id: 1,
            plant_id: 1,
            ip: "127.0.0.1".to_string(),
            port: 502,
            slave_id: 1,
            vendor,
            active: true,
        }
    }

    #[test]
    fn shipped_register_maps_cover_every_plant_and_ess_vendor_in_use() {
        // The committed `register_maps/` tree only ships descriptors for the
        // vendor combinations the data model actually uses (Huawei/Fronius
        // loggers, Hithium ESS, §3) - this is the startup check that would
        // have caught a gap before any poller did.
        let catalog = RegisterCatalog::load("register_maps").unwrap();
        let plants = vec![plant(Vendor::Huawei), plant(Vendor::Fronius)];
        let ess_units = vec![ess(Vendor::Hithium)];
        assert!(validate_register_coverage(&catalog, &plants, &ess_units).is_ok());
    }

    #[test]
    fn missing_vendor_descriptor_is_a_fatal_config_error() {
        let catalog = RegisterCatalog::load("register_maps").unwrap();
        // No ess/huawei.json is shipped; an ESS unit claiming that vendor
        // must fail validation rather than surface later as a breaker trip.
        let ess_units = vec![ess(Vendor::Huawei)];
        let err = validate_register_coverage(&catalog, &[], &ess_units).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDescriptor(_)));
    }
}
