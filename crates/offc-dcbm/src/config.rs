use offc_registry::config::{env_in_range, process_env};
use offc_registry::ConfigError;

use crate::{DEFAULT_DMA_CHANNELS, MAX_DMA_CHANNELS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcbmConfig {
    /// Channels requested per batch.
    pub nr_dma_chan: usize,
}

impl Default for DcbmConfig {
    fn default() -> Self {
        Self {
            nr_dma_chan: DEFAULT_DMA_CHANNELS,
        }
    }
}

impl DcbmConfig {
    /// Reads `OFFC_DCBM_NR_DMA_CHAN`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let nr_dma_chan = env_in_range(
            &lookup,
            "OFFC_DCBM_NR_DMA_CHAN",
            DEFAULT_DMA_CHANNELS as u64,
            1..=MAX_DMA_CHANNELS as u64,
        )?;
        Ok(Self {
            nr_dma_chan: nr_dma_chan as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_count_from_env() {
        assert_eq!(DcbmConfig::from_lookup(|_| None).unwrap().nr_dma_chan, 1);
        assert_eq!(
            DcbmConfig::from_lookup(|_| Some("8".into())).unwrap().nr_dma_chan,
            8
        );
        assert!(DcbmConfig::from_lookup(|_| Some("32".into())).is_err());
    }
}
