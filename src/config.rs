//! Hardware resource configuration for the SMV accelerator model.
//!
//! # TOML Format
//! ```toml
//! num_pes = 8
//! num_maccs_per_pe = 32
//! spad_bytes = 32768
//! alignment = 8
//! backend = "smv"
//! kernel_library = "./libsmv_kernels.so"
//! ```

use std::path::{Path, PathBuf};

use crate::error::{Result, TileError};

/// Processing elements on the SMV accelerator.
pub const NUM_PES: usize = 8;

/// Multiply-accumulate units per processing element.
pub const NUM_MACCS_PER_PE: usize = 32;

/// Bytes per input, weight or output scratchpad.
pub const SPAD_BYTES: usize = 32 * 1024;

/// Channel alignment required by the vector datapath.
pub const CHANNEL_ALIGNMENT: usize = 8;

/// Which convolution implementation services an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Tiled execution on the fixed-function kernel.
    #[default]
    Smv,
    /// Untiled direct convolution.
    Reference,
}

/// Read-only hardware constants consumed by the tiling optimizer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub num_pes: usize,
    pub num_maccs_per_pe: usize,
    pub spad_bytes: usize,
    pub alignment: usize,
    pub backend: BackendKind,
    /// Shared library exporting the convolution kernel. The software
    /// reference kernel is used when unset.
    pub kernel_library: Option<PathBuf>,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            num_pes: NUM_PES,
            num_maccs_per_pe: NUM_MACCS_PER_PE,
            spad_bytes: SPAD_BYTES,
            alignment: CHANNEL_ALIGNMENT,
            backend: BackendKind::Smv,
            kernel_library: None,
        }
    }
}

impl HardwareConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TileError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(toml_str)
            .map_err(|e| TileError::Config(format!("TOML parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TileError::Config(format!("TOML serialise error: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_pes == 0 || self.num_maccs_per_pe == 0 {
            return Err(TileError::Config(
                "num_pes and num_maccs_per_pe must be positive".into(),
            ));
        }
        if self.alignment == 0 {
            return Err(TileError::Config("alignment must be positive".into()));
        }
        if self.spad_elems() == 0 {
            return Err(TileError::Config("scratchpad holds no elements".into()));
        }
        Ok(())
    }

    /// MACs the array retires per cycle; bounds weight tile filters x channels.
    pub fn compute_budget(&self) -> usize {
        self.num_pes * self.num_maccs_per_pe
    }

    /// Scratchpad capacity in f32 elements.
    pub fn spad_elems(&self) -> usize {
        self.spad_bytes / std::mem::size_of::<f32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_smv() {
        let hw = HardwareConfig::default();
        assert_eq!(hw.num_pes, 8);
        assert_eq!(hw.num_maccs_per_pe, 32);
        assert_eq!(hw.compute_budget(), 256);
        assert_eq!(hw.spad_elems(), 8192);
        assert!(hw.validate().is_ok());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let hw = HardwareConfig::from_toml("num_pes = 4\nbackend = \"reference\"\n").unwrap();
        assert_eq!(hw.num_pes, 4);
        assert_eq!(hw.num_maccs_per_pe, NUM_MACCS_PER_PE);
        assert_eq!(hw.backend, BackendKind::Reference);
        assert!(hw.kernel_library.is_none());
    }

    #[test]
    fn toml_roundtrip() {
        let hw = HardwareConfig {
            spad_bytes: 4096,
            kernel_library: Some(PathBuf::from("/opt/smv/libkernels.so")),
            ..HardwareConfig::default()
        };
        let text = hw.to_toml().unwrap();
        assert_eq!(HardwareConfig::from_toml(&text).unwrap(), hw);
    }

    #[test]
    fn rejects_zero_resources() {
        assert!(matches!(
            HardwareConfig::from_toml("num_maccs_per_pe = 0"),
            Err(TileError::Config(_))
        ));
        assert!(HardwareConfig::from_toml("spad_bytes = 2").is_err());
        assert!(HardwareConfig::from_toml("num_pes = \"many\"").is_err());
    }
}
