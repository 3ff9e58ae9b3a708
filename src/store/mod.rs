//! Store gateway (§4.8, C4) and the data model it serves (§3).

mod models;
mod queries;

pub use models::{
    ControlInboxRow, EnvironmentAggregate, EnvironmentSensor, EnvironmentTelemetryRow, EssTelemetryRow,
    EssUnit, Plant, PlantType, PccTelemetryRow, SendLogRow,
};
pub use queries::{AdvisoryLock, Store};
