use rustc_hash::FxHashMap;

use crate::constants::fluid::{LAVA, WATER};
use crate::error::{EngineError, EngineResult};

/// Registry of fluid types known to a world.
///
/// A fluid is named by its viscosity tag; the label is for diagnostics
/// and tooling only. The first registered fluid is the default used by
/// the two-argument `modify_fluid` façade call. Persistence stores the
/// raw (viscosity, label) pairs and rebuilds the table on load.
#[derive(Debug, Clone)]
pub struct FluidTable {
    entries: Vec<(u8, String)>,
    by_viscosity: FxHashMap<u8, usize>,
}

impl FluidTable {
    pub fn new(entries: Vec<(u8, String)>) -> EngineResult<Self> {
        if entries.is_empty() {
            return Err(EngineError::invalid_config("no fluid types registered"));
        }
        let mut by_viscosity = FxHashMap::default();
        for (i, (viscosity, label)) in entries.iter().enumerate() {
            if *viscosity == 0 {
                return Err(EngineError::invalid_config(format!(
                    "fluid '{}' uses viscosity 0, which is reserved for \"no fluid\"",
                    label
                )));
            }
            if by_viscosity.insert(*viscosity, i).is_some() {
                return Err(EngineError::invalid_config(format!(
                    "duplicate viscosity tag {}",
                    viscosity
                )));
            }
        }
        Ok(Self {
            entries,
            by_viscosity,
        })
    }

    /// Water and lava, the built-in pair
    pub fn default_fluids() -> Self {
        Self::new(vec![
            (WATER, "water".to_string()),
            (LAVA, "lava".to_string()),
        ])
        .expect("built-in fluid table is valid")
    }

    pub fn contains(&self, viscosity: u8) -> bool {
        self.by_viscosity.contains_key(&viscosity)
    }

    pub fn label(&self, viscosity: u8) -> Option<&str> {
        self.by_viscosity
            .get(&viscosity)
            .map(|&i| self.entries[i].1.as_str())
    }

    /// Viscosity of the default fluid (the first registered entry)
    pub fn default_viscosity(&self) -> u8 {
        self.entries[0].0
    }

    pub fn entries(&self) -> &[(u8, String)] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table() {
        let t = FluidTable::default_fluids();
        assert_eq!(t.default_viscosity(), WATER);
        assert!(t.contains(LAVA));
        assert_eq!(t.label(WATER), Some("water"));
        assert_eq!(t.label(7), None);
    }

    #[test]
    fn rejects_zero_and_duplicates() {
        assert!(FluidTable::new(vec![(0, "void".into())]).is_err());
        assert!(FluidTable::new(vec![(9, "a".into()), (9, "b".into())]).is_err());
        assert!(FluidTable::new(vec![]).is_err());
    }
}
