//! Simulation configuration.
//!
//! Read once from a JSON file and immutable afterwards. Components receive
//! the pieces they need at construction instead of looking them up globally.

use crate::memory::{AddressMapping, MappingError};
use crate::tensor::TensorGeometry;
use crate::util::{CL_SIZE, MAX_BANKS};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur when loading or validating a configuration.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Named address layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingPreset {
    /// [`AddressMapping::newton`]
    Newton,
    /// [`AddressMapping::wide_row`]
    WideRow,
}

/// Address layout, either by preset name or spelled out field by field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MappingDef {
    /// One of the built-in layouts
    Preset(MappingPreset),
    /// Explicit shift and field positions
    Custom(AddressMapping),
}

impl Default for MappingDef {
    fn default() -> Self {
        MappingDef::Preset(MappingPreset::Newton)
    }
}

impl MappingDef {
    /// Resolves the definition to a concrete mapping.
    pub fn resolve(&self) -> AddressMapping {
        match self {
            MappingDef::Preset(MappingPreset::Newton) => AddressMapping::newton(),
            MappingDef::Preset(MappingPreset::WideRow) => AddressMapping::wide_row(),
            MappingDef::Custom(mapping) => *mapping,
        }
    }
}

fn default_burst_cycles() -> u64 {
    2
}

fn default_stat_interval() -> u64 {
    1000
}

fn default_addr_align() -> u64 {
    CL_SIZE
}

/// Simulation configuration specifying model shape and DRAM geometry.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// Bytes per cached element
    pub precision: u64,
    /// Embedding width `E`
    pub model_n_embd: u32,
    /// Number of DRAM channels
    pub n_channels: usize,
    /// Banks a tensor spreads over within one channel
    pub bank_per_channel: u32,
    /// Bytes per DRAM row
    pub dram_page_size: u64,
    /// Cycles one request occupies the data bus
    #[serde(default = "default_burst_cycles")]
    pub burst_cycles: u64,
    /// Cycles per I/O statistics interval
    #[serde(default = "default_stat_interval")]
    pub stat_interval: u64,
    /// Request address alignment in bytes
    #[serde(default = "default_addr_align")]
    pub addr_align: u64,
    /// Physical address layout
    #[serde(default)]
    pub address_mapping: MappingDef,
    /// Backend-specific timing engine parameters, passed through untouched
    #[serde(default)]
    pub engine: Option<serde_json::Value>,
}

impl SimulationConfig {
    /// Loads configuration from a JSON file and validates it.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or if the geometry is invalid.
    pub fn from_jsonfile(filepath: impl AsRef<Path>) -> Result<SimulationConfig> {
        let mut file = File::open(filepath.as_ref())?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Self::from_json(&contents)
    }

    /// Parses configuration from a JSON string and validates it.
    ///
    /// # Errors
    ///
    /// Returns error if the string cannot be parsed or the geometry is invalid.
    pub fn from_json(json: &str) -> Result<SimulationConfig> {
        let config: SimulationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// The resolved address mapping.
    pub fn mapping(&self) -> AddressMapping {
        self.address_mapping.resolve()
    }

    /// Elements of `precision` bytes that fit into one DRAM row.
    pub fn elements_per_row(&self) -> u32 {
        (self.dram_page_size / self.precision) as u32
    }

    /// Geometry constants used by tensor placement.
    pub fn tensor_geometry(&self) -> TensorGeometry {
        TensorGeometry {
            precision: self.precision,
            embedding_width: self.model_n_embd,
            bank_per_channel: self.bank_per_channel,
            elements_per_row: self.elements_per_row(),
        }
    }

    /// Deserializes the `engine` section into a backend's own config type.
    ///
    /// A missing section yields `T::default()`.
    ///
    /// # Errors
    ///
    /// Returns error if the section does not match `T`.
    pub fn engine_config<T: DeserializeOwned + Default>(&self) -> Result<T> {
        match &self.engine {
            Some(value) => Ok(T::deserialize(value)?),
            None => Ok(T::default()),
        }
    }

    /// Checks that the placement formulas are well-defined for this geometry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] for a broken address layout and
    /// [`Error::InvalidGeometry`] for inconsistent sizes.
    pub fn validate(&self) -> Result<()> {
        let mapping = self.mapping();
        mapping.validate()?;
        let invalid = |msg: String| Err(Error::InvalidGeometry(msg));
        if self.precision == 0 || self.model_n_embd == 0 || self.bank_per_channel == 0 {
            return invalid("precision, model_n_embd and bank_per_channel must be non-zero".into());
        }
        if self.stat_interval == 0 || self.burst_cycles == 0 {
            return invalid("stat_interval and burst_cycles must be non-zero".into());
        }
        if self.n_channels == 0 || self.n_channels > mapping.channel_count() {
            return invalid(format!(
                "n_channels {} outside 1..={}",
                self.n_channels,
                mapping.channel_count()
            ));
        }
        if self.dram_page_size % self.precision != 0 || self.elements_per_row() == 0 {
            return invalid(format!(
                "page size {} is not a positive multiple of precision {}",
                self.dram_page_size, self.precision
            ));
        }
        if self.dram_page_size > 1 << mapping.in_row_bits() {
            return invalid(format!(
                "page size {} exceeds the {} in-row address bits",
                self.dram_page_size,
                mapping.in_row_bits()
            ));
        }
        if mapping.bank_count() > MAX_BANKS {
            return invalid(format!(
                "{} banks per channel, at most {} are supported",
                mapping.bank_count(),
                MAX_BANKS
            ));
        }
        if self.bank_per_channel as usize > mapping.banks_per_group() {
            return invalid(format!(
                "bank_per_channel {} does not fit the {}-bit bank field",
                self.bank_per_channel, mapping.bank.width
            ));
        }
        if self.model_n_embd % self.bank_per_channel != 0 {
            return invalid(format!(
                "model_n_embd {} is not a multiple of bank_per_channel {}",
                self.model_n_embd, self.bank_per_channel
            ));
        }
        Ok(())
    }
}
