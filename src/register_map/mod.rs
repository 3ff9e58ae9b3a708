//! Register-map catalog and decoding rules (§4.1, C1).

mod catalog;
mod decode;
mod descriptor;

pub use catalog::{DeviceClass, RegisterCatalog};
pub use decode::{decode_registers, encode_registers};
pub use descriptor::{EnableRegister, Encoding, FunctionCode, PointDescriptor};
