use serde::{Deserialize, Serialize};

/// One of the two independent modulation slots carried by every mechanism
/// and receptor, so that two neuromodulators can be active at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModulationSlot {
    /// `max` / `level`
    Primary,
    /// `max2` / `lev2`
    Secondary,
}

impl ModulationSlot {
    fn index(self) -> usize {
        match self {
            ModulationSlot::Primary => 0,
            ModulationSlot::Secondary => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScaleState {
    pub enabled: bool,
    pub max: f64,
    pub level: f64,
}

impl Default for ScaleState {
    fn default() -> Self {
        Self {
            enabled: false,
            max: 1.0,
            level: 0.0,
        }
    }
}

impl ScaleState {
    /// 1 when unmodulated, `max` at full level.
    pub fn factor(&self) -> f64 {
        if self.enabled {
            1.0 + (self.max - 1.0) * self.level
        } else {
            1.0
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ModulationSlots([ScaleState; 2]);

impl ModulationSlots {
    #[cfg(test)]
    pub fn get(&self, slot: ModulationSlot) -> &ScaleState {
        &self.0[slot.index()]
    }

    pub fn get_mut(&mut self, slot: ModulationSlot) -> &mut ScaleState {
        &mut self.0[slot.index()]
    }

    /// Slots compose as independent multiplicative factors.
    pub fn factor(&self) -> f64 {
        self.0.iter().map(ScaleState::factor).product()
    }
}
