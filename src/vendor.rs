//! Tagged vendor dispatch (§4.11, C11). Replaces the source's runtime
//! `manufacturer.lower() == "fronius"` string checks with a closed enum and
//! `match`-dispatched free functions, one per vendor-specific behaviour.

use crate::error::ConfigError;

/// The three device families this controller speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Huawei,
    Fronius,
    Hithium,
}

impl Vendor {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.to_ascii_lowercase().as_str() {
            "huawei" => Ok(Vendor::Huawei),
            "fronius" => Ok(Vendor::Fronius),
            "hithium" => Ok(Vendor::Hithium),
            other => Err(ConfigError::UnknownVendor(other.to_string())),
        }
    }

    pub fn descriptor_file_stem(&self) -> &'static str {
        match self {
            Vendor::Huawei => "huawei",
            Vendor::Fronius => "fronius",
            Vendor::Hithium => "hithium",
        }
    }
}

/// cosφ normalisation per §4.1: Fronius reports magnitude only (sign
/// discarded, treated as inductive/positive); Huawei and Hithium pass
/// through unchanged. The result is always clamped to [-1, 1] by the caller.
pub fn normalise_cos_phi(vendor: Vendor, raw: f64) -> f64 {
    let value = match vendor {
        Vendor::Fronius => raw.abs(),
        Vendor::Huawei | Vendor::Hithium => raw,
    };
    value.clamp(-1.0, 1.0)
}

/// φ in degrees from a normalised cosφ, per §4.1's secondary transform:
/// φ = arccos(|cosφ|), sign carried from Huawei's cosφ, unconditionally
/// positive for Fronius (it is already sign-free after normalisation).
pub fn cos_phi_to_phi_degrees(vendor: Vendor, cos_phi: f64) -> f64 {
    let clamped = cos_phi.clamp(-1.0, 1.0);
    let magnitude_deg = clamped.abs().acos().to_degrees();
    match vendor {
        Vendor::Huawei | Vendor::Hithium => {
            if clamped < 0.0 {
                -magnitude_deg
            } else {
                magnitude_deg
            }
        }
        Vendor::Fronius => magnitude_deg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_vendors_case_insensitively() {
        assert_eq!(Vendor::parse("Huawei").unwrap(), Vendor::Huawei);
        assert_eq!(Vendor::parse("FRONIUS").unwrap(), Vendor::Fronius);
        assert_eq!(Vendor::parse("hithium").unwrap(), Vendor::Hithium);
    }

    #[test]
    fn rejects_unknown_vendor() {
        assert!(Vendor::parse("acme").is_err());
    }

    #[test]
    fn fronius_cos_phi_drops_sign() {
        assert_eq!(normalise_cos_phi(Vendor::Fronius, -0.95), 0.95);
        assert_eq!(normalise_cos_phi(Vendor::Huawei, -0.95), -0.95);
    }

    #[test]
    fn cos_phi_normalisation_always_clamped() {
        assert_eq!(normalise_cos_phi(Vendor::Huawei, 1.4), 1.0);
        assert_eq!(normalise_cos_phi(Vendor::Huawei, -1.4), -1.0);
    }

    #[test]
    fn phi_degrees_carries_huawei_sign_but_not_fronius() {
        let huawei = cos_phi_to_phi_degrees(Vendor::Huawei, -0.5);
        let fronius = cos_phi_to_phi_degrees(Vendor::Fronius, 0.5);
        assert!(huawei < 0.0);
        assert!(fronius > 0.0);
        assert!((huawei.abs() - fronius).abs() < 1e-9);
    }
}
