//! Per-(instrument, group) merge strategies.

use std::fmt;
use std::str::FromStr;

use super::CombineError;

/// Echosounder family a store was converted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SonarModel {
    /// Simrad EK60
    Ek60,
    /// Simrad EK80
    Ek80,
    /// ASL AZFP
    Azfp,
}

impl SonarModel {
    /// Value of the root `sonar_model` attribute for this model
    pub fn as_str(&self) -> &'static str {
        match self {
            SonarModel::Ek60 => "EK60",
            SonarModel::Ek80 => "EK80",
            SonarModel::Azfp => "AZFP",
        }
    }
}

impl fmt::Display for SonarModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SonarModel {
    type Err = CombineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EK60" => Ok(SonarModel::Ek60),
            "EK80" => Ok(SonarModel::Ek80),
            "AZFP" => Ok(SonarModel::Azfp),
            _ => Err(CombineError::UnknownSonarModel(s.to_string())),
        }
    }
}

/// Logical group of a converted store, in combine write order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupSlot {
    /// Root group attributes and arrays
    TopLevel,
    /// Conversion provenance
    Provenance,
    /// Instrument description
    Sonar,
    /// Backscatter and per-ping beam data
    Beam,
    /// Environmental parameters
    Environment,
    /// Platform motion and position
    Platform,
    /// Vendor-specific data
    Vendor,
    /// Raw NMEA sentences
    PlatformNmea,
    /// Vendor filter coefficients (compound complex arrays)
    FilterCoefficients,
}

impl GroupSlot {
    /// Every slot, in the order groups are written to a combined store
    pub const ORDER: [GroupSlot; 9] = [
        GroupSlot::TopLevel,
        GroupSlot::Provenance,
        GroupSlot::Sonar,
        GroupSlot::Beam,
        GroupSlot::Environment,
        GroupSlot::Platform,
        GroupSlot::Vendor,
        GroupSlot::PlatformNmea,
        GroupSlot::FilterCoefficients,
    ];

    /// Store path of the group backing this slot
    pub fn path(&self) -> &'static str {
        match self {
            GroupSlot::TopLevel => "",
            GroupSlot::Provenance => "Provenance",
            GroupSlot::Sonar => "Sonar",
            GroupSlot::Beam => "Beam",
            GroupSlot::Environment => "Environment",
            GroupSlot::Platform => "Platform",
            GroupSlot::Vendor | GroupSlot::FilterCoefficients => "Vendor",
            GroupSlot::PlatformNmea => "Platform/NMEA",
        }
    }
}

impl fmt::Display for GroupSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupSlot::TopLevel => f.write_str("top-level"),
            GroupSlot::FilterCoefficients => f.write_str("Vendor (filter coefficients)"),
            other => f.write_str(other.path()),
        }
    }
}

/// How sources are lined up for concatenation
///
/// `ByCoords` and `Nested` both keep source order along time; they differ
/// on the other axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatOrder {
    /// Source order; non-time axes are outer-joined and padded
    ByCoords,
    /// Source order; non-time axes must agree across sources
    Nested,
    /// Sorted by the first value of the group's time coordinate, then
    /// outer-joined like `ByCoords`. Never a default.
    ByTime,
}

/// How one group of N sources becomes one group of the combined store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Copy the first source's group byte for byte
    CopyFirst,
    /// Concatenate time-indexed arrays; copy the rest from the first source
    ConcatTime(ConcatOrder),
    /// Copy the first source's compound filter-coefficient arrays
    CopyBinaryBlock,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStrategy::CopyFirst => f.write_str("copy-first"),
            MergeStrategy::ConcatTime(ConcatOrder::ByCoords) => f.write_str("concat-time (by coords)"),
            MergeStrategy::ConcatTime(ConcatOrder::Nested) => f.write_str("concat-time (nested)"),
            MergeStrategy::ConcatTime(ConcatOrder::ByTime) => f.write_str("concat-time (by time)"),
            MergeStrategy::CopyBinaryBlock => f.write_str("copy-binary-block"),
        }
    }
}

/// Lookup table from (model, slot) to merge strategy
///
/// A slot with no entry for a model is not written for that model.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTable {
    entries: Vec<(SonarModel, GroupSlot, MergeStrategy)>,
}

impl PolicyTable {
    /// An empty table
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Strategy for a slot of a model, if the slot is written at all
    pub fn strategy(&self, model: SonarModel, slot: GroupSlot) -> Option<MergeStrategy> {
        self.entries
            .iter()
            .find(|(m, s, _)| *m == model && *s == slot)
            .map(|(_, _, strategy)| *strategy)
    }

    /// Set (or replace) the strategy for a slot of a model
    pub fn set(&mut self, model: SonarModel, slot: GroupSlot, strategy: MergeStrategy) {
        self.remove(model, slot);
        self.entries.push((model, slot, strategy));
    }

    /// Stop writing a slot for a model
    pub fn remove(&mut self, model: SonarModel, slot: GroupSlot) {
        self.entries.retain(|(m, s, _)| !(*m == model && *s == slot));
    }

    /// Slots written for a model, with their strategies, in write order
    pub fn plan(&self, model: SonarModel) -> Vec<(GroupSlot, MergeStrategy)> {
        GroupSlot::ORDER
            .iter()
            .filter_map(|&slot| self.strategy(model, slot).map(|s| (slot, s)))
            .collect()
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        use ConcatOrder::{ByCoords, Nested};
        use GroupSlot::*;
        use MergeStrategy::*;
        use SonarModel::*;

        let mut table = Self::empty();
        for model in [Ek60, Ek80, Azfp] {
            table.set(model, TopLevel, CopyFirst);
            table.set(model, Provenance, CopyFirst);
            table.set(model, Sonar, CopyFirst);
            table.set(model, Beam, ConcatTime(ByCoords));
        }

        for model in [Ek60, Ek80] {
            table.set(model, Environment, CopyFirst);
            table.set(model, Platform, ConcatTime(ByCoords));
            table.set(model, PlatformNmea, ConcatTime(Nested));
        }
        table.set(Ek80, FilterCoefficients, CopyBinaryBlock);

        // AZFP environment varies with ping time; its platform has no coordinates
        table.set(Azfp, Environment, ConcatTime(ByCoords));
        table.set(Azfp, Platform, CopyFirst);
        table.set(Azfp, Vendor, ConcatTime(ByCoords));

        table
    }
}
