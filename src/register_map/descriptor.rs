use serde::Deserialize;

/// Modbus function code a point is read through (§6). Holding registers (03)
/// are the common case; a few vendor quirks live on input registers (04).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionCode {
    Holding,
    Input,
}

/// How the raw register words decode into a value (§4.1). `Integer` covers
/// both the 1-register and 2-register signed/unsigned cases - signedness and
/// width are carried separately on the descriptor. `Float32` and `FroniusPf`
/// are the two special 2-register cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    Integer,
    Float32,
    FroniusPf,
}

/// A register to write before a control point takes effect (e.g. Fronius'
/// inverter power-limit enable flag, §4.7).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EnableRegister {
    pub address: u16,
    pub value: u16,
}

/// One entry of a register-map descriptor file: a symbolic point name
/// (`sum_active_power`, `activePowerAdjustment`, ...) mapped to everything
/// needed to read or write it (§4.1).
#[derive(Debug, Clone, Deserialize)]
pub struct PointDescriptor {
    pub address: u16,
    /// Register count: 1 or 2. Validated against `encoding` at load time by
    /// [`super::catalog::RegisterCatalog`].
    pub quantity: u8,
    pub function_code: FunctionCode,
    #[serde(default)]
    pub signed: bool,
    #[serde(default = "default_gain")]
    pub gain: f64,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default)]
    pub enable_register: Option<EnableRegister>,
}

fn default_gain() -> f64 {
    1.0
}
