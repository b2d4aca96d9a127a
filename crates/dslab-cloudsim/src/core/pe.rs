//! Processing element (a single core) model.

use serde::Serialize;

use crate::core::common::PeId;
use crate::core::error::ConfigError;

/// Status of processing element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PeStatus {
    Free,
    Busy,
}

/// Unit of physical compute capacity with a fixed rating in MIPS.
#[derive(Clone, Debug, Serialize)]
pub struct ProcessingElement {
    id: PeId,
    mips: f64,
    status: PeStatus,
}

impl ProcessingElement {
    /// Creates free processing element with the given capacity.
    pub fn new(id: PeId, mips: f64) -> Result<Self, ConfigError> {
        if !(mips > 0.) {
            return Err(ConfigError::InvalidPeCapacity { pe: id, mips });
        }
        Ok(Self {
            id,
            mips,
            status: PeStatus::Free,
        })
    }

    pub fn id(&self) -> PeId {
        self.id
    }

    /// Returns the capacity of processing element in MIPS.
    pub fn mips(&self) -> f64 {
        self.mips
    }

    pub fn status(&self) -> PeStatus {
        self.status
    }

    pub fn is_free(&self) -> bool {
        self.status == PeStatus::Free
    }

    pub(crate) fn set_status(&mut self, status: PeStatus) {
        self.status = status;
    }
}

/// Creates `count` identical processing elements numbered from zero.
pub fn pe_list(count: u32, mips: f64) -> Result<Vec<ProcessingElement>, ConfigError> {
    (0..count).map(|i| ProcessingElement::new(PeId(i), mips)).collect()
}

/// Returns the total capacity of processing elements.
pub fn total_mips(pes: &[ProcessingElement]) -> f64 {
    pes.iter().map(|pe| pe.mips()).sum()
}

/// Returns the number of free processing elements.
pub fn free_pe_count(pes: &[ProcessingElement]) -> usize {
    pes.iter().filter(|pe| pe.is_free()).count()
}
