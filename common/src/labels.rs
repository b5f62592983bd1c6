//! Label schema of the growth-stage classifier.
//!
//! The order of [`LABELS`] is the order of the model's output layer and of the
//! category axis of the probability chart. All three must stay index-aligned.
use serde::{Deserialize, Serialize};

/// Number of classes the model distinguishes.
pub const NUM_CLASSES: usize = 6;

/// Display names of the classes, in model output order.
pub const LABELS: [&str; NUM_CLASSES] = [
    "Soil", "1 month", "2 month", "3 month", "4 month", "harvest",
];

/// Growth stage of a plant.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum GrowthStage {
    Soil,
    OneMonth,
    TwoMonths,
    ThreeMonths,
    FourMonths,
    Harvest,
}

impl GrowthStage {
    /// All stages in model output order.
    pub const ALL: [GrowthStage; NUM_CLASSES] = [
        GrowthStage::Soil,
        GrowthStage::OneMonth,
        GrowthStage::TwoMonths,
        GrowthStage::ThreeMonths,
        GrowthStage::FourMonths,
        GrowthStage::Harvest,
    ];

    /// Map an output index of the model to a stage.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        LABELS[self.index()]
    }
}

impl std::fmt::Display for GrowthStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn stages_align_with_labels() {
        for (index, label) in LABELS.iter().enumerate() {
            let stage = GrowthStage::from_index(index).expect("stage for every label");
            assert_eq!(stage.index(), index);
            assert_eq!(stage.label(), *label);
        }
        assert_eq!(GrowthStage::from_index(NUM_CLASSES), None);
    }

    #[test]
    fn display_uses_label() {
        assert_eq!(GrowthStage::Soil.to_string(), "Soil");
        assert_eq!(GrowthStage::Harvest.to_string(), "harvest");
        assert_eq!(GrowthStage::TwoMonths.to_string(), "2 month");
    }
}
