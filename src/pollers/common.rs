//! Shared register-read helpers used by all three pollers (§4.1, §4.2).
//! Pure plumbing over [`crate::register_map`] and [`crate::fieldbus`] so each
//! poller only has to name the symbolic point it wants.

use crate::error::DeviceId;
use crate::fieldbus::{self, Endpoint};
use crate::register_map::{decode_registers, DeviceClass, PointDescriptor, RegisterCatalog};
use crate::vendor::Vendor;

/// Read and decode one symbolic point for `device` at `endpoint`.
pub async fn read_point(
    catalog: &RegisterCatalog,
    class: DeviceClass,
    vendor: Vendor,
    point: &str,
    device: DeviceId,
    endpoint: &Endpoint,
) -> anyhow::Result<f64> {
    let descriptor = catalog.get(class, vendor, point)?;
    let registers = fieldbus::read(
        device,
        endpoint,
        descriptor.address,
        descriptor.quantity as u16,
        descriptor.function_code,
    )
    .await?;
    decode_registers(&registers, descriptor)
        .ok_or_else(|| anyhow::anyhow!("short read decoding '{point}'"))
}

/// Read `count` consecutive single-register points starting at the
/// descriptor's base address (§4.5's battery-cell and container-temperature
/// vectors): each cell/sensor slot is its own register at `base + i`, sharing
/// the base descriptor's signedness, gain and function code.
pub async fn read_vector(
    catalog: &RegisterCatalog,
    class: DeviceClass,
    vendor: Vendor,
    base_point: &str,
    count: u16,
    device: DeviceId,
    endpoint: &Endpoint,
) -> anyhow::Result<Vec<f64>> {
    let base = catalog.get(class, vendor, base_point)?.clone();
    let mut values = Vec::with_capacity(count as usize);
    for i in 0..count {
        let registers = fieldbus::read(
            device.clone(),
            endpoint,
            base.address + i,
            1,
            base.function_code,
        )
        .await?;
        let slot = PointDescriptor {
            address: base.address + i,
            quantity: 1,
            ..base
        };
        let value = decode_registers(&registers, &slot)
            .ok_or_else(|| anyhow::anyhow!("short read decoding '{base_point}[{i}]'"))?;
        values.push(value);
    }
    Ok(values)
}

pub fn average(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
