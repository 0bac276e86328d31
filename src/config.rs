use offc_dcbm::{DcbmConfig, MAX_DMA_CHANNELS};
use offc_mtcopy::MtConfig;
use offc_registry::config::{env_in_range, process_env};
use offc_registry::ConfigError;

const DEFAULT_NR_FRAMES: u64 = 1024;
const MAX_NR_FRAMES: u64 = 1 << 18;
const DEFAULT_SOFT_DMA_CHANNELS: u64 = 4;

/// Startup configuration for an [`OffloadSystem`](crate::OffloadSystem).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffcConfig {
    /// Page frames of host memory.
    pub nr_frames: u64,
    /// Channels the software DMA controller exposes. Zero leaves DCBM with nothing to use.
    pub soft_dma_channels: usize,
    pub mt: MtConfig,
    pub dcbm: DcbmConfig,
}

impl Default for OffcConfig {
    fn default() -> Self {
        Self {
            nr_frames: DEFAULT_NR_FRAMES,
            soft_dma_channels: DEFAULT_SOFT_DMA_CHANNELS as usize,
            mt: MtConfig::default(),
            dcbm: DcbmConfig::default(),
        }
    }
}

impl OffcConfig {
    /// Reads `OFFC_NR_FRAMES`, `OFFC_SOFT_DMA_CHANNELS` and the per-engine variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let nr_frames =
            env_in_range(&lookup, "OFFC_NR_FRAMES", DEFAULT_NR_FRAMES, 1..=MAX_NR_FRAMES)?;
        let soft_dma_channels = env_in_range(
            &lookup,
            "OFFC_SOFT_DMA_CHANNELS",
            DEFAULT_SOFT_DMA_CHANNELS,
            0..=MAX_DMA_CHANNELS as u64,
        )?;
        Ok(Self {
            nr_frames,
            soft_dma_channels: soft_dma_channels as usize,
            mt: MtConfig::from_lookup(&lookup)?,
            dcbm: DcbmConfig::from_lookup(&lookup)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn from(vars: &[(&str, &str)]) -> Result<OffcConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OffcConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let config = from(&[]).unwrap();
        assert_eq!(config.nr_frames, 1024);
        assert_eq!(config.soft_dma_channels, 4);
        assert_eq!(config.mt.threads, 4);
        assert_eq!(config.dcbm.nr_dma_chan, 1);
    }

    #[test]
    fn engine_variables_pass_through() {
        let config = from(&[
            ("OFFC_NR_FRAMES", "64"),
            ("OFFC_SOFT_DMA_CHANNELS", "0"),
            ("OFFC_MT_THREADS", "8"),
            ("OFFC_DCBM_NR_DMA_CHAN", "16"),
        ])
        .unwrap();
        assert_eq!(config.nr_frames, 64);
        assert_eq!(config.soft_dma_channels, 0);
        assert_eq!(config.mt.threads, 8);
        assert_eq!(config.dcbm.nr_dma_chan, 16);
    }

    #[test]
    fn malformed_values_name_the_variable() {
        assert_eq!(
            from(&[("OFFC_NR_FRAMES", "0")]),
            Err(ConfigError::InvalidEnv {
                var: "OFFC_NR_FRAMES",
                value: "0".into()
            })
        );
        assert!(from(&[("OFFC_SOFT_DMA_CHANNELS", "17")]).is_err());
        assert!(from(&[("OFFC_DCBM_NR_DMA_CHAN", "17")]).is_err());
    }
}
