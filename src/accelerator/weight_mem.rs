use super::{
    fabric::Payload,
    metrics::{EnergyCounter, Metered, StageKind},
};
use crate::models::{Cost, MemoryType, TechModel};

/// # Description
/// the kernel memory of a convolution class layer
///
/// one word holds the `Pout * Pin * Kh * Kw` weights of an (input group, output group) pair,
/// word `o + i * out_groups` belongs to input group `i` and output group `o`.
/// the contents are all ones unless loaded.
#[derive(Debug)]
pub struct WeightMem {
    width: usize,
    depth: usize,
    contents: Option<Vec<Payload>>,
    memory: Cost,
    energy: EnergyCounter,
}

impl WeightMem {
    pub fn new(
        width: usize,
        depth: usize,
        memory_type: MemoryType,
        model: &TechModel,
    ) -> Self {
        WeightMem {
            width,
            depth,
            contents: None,
            memory: model.memory(memory_type, width * depth * model.bit_width()),
            energy: EnergyCounter::default(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// replace the contents, `weights` holds `width * depth` values word by word
    pub fn load(&mut self, weights: Vec<Payload>) -> Result<(), String> {
        if weights.len() != self.width * self.depth {
            return Err(format!(
                "expected {} weights, found {}",
                self.width * self.depth,
                weights.len()
            ));
        }
        self.contents = Some(weights);
        Ok(())
    }

    /// read the word at `addr` into `out`
    pub fn read(&mut self, addr: usize, functional: bool, out: &mut Vec<Payload>) {
        self.energy.record(self.memory.dynamic_energy, 1);
        out.clear();
        if !functional {
            return;
        }
        match &self.contents {
            Some(contents) => {
                let start = (addr % self.depth.max(1)) * self.width;
                out.extend_from_slice(&contents[start..start + self.width]);
            }
            None => out.resize(self.width, 1.),
        }
    }

    pub fn reset(&mut self) {
        self.energy.reset();
    }
}

impl Metered for WeightMem {
    fn kind(&self) -> StageKind {
        StageKind::WeightMem
    }

    fn area(&self) -> f64 {
        self.memory.area
    }

    fn static_power(&self) -> f64 {
        self.memory.static_power
    }

    fn energy(&self) -> &EnergyCounter {
        &self.energy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read() -> Result<(), Box<dyn std::error::Error>> {
        let model = TechModel::new(28, 8, 1.0)?;
        let mut mem = WeightMem::new(2, 3, MemoryType::Rom, &model);
        let mut word = Vec::new();
        mem.read(1, true, &mut word);
        assert_eq!(word, vec![1., 1.]);
        mem.load((0..6).map(|x| x as f64).collect())?;
        mem.read(2, true, &mut word);
        assert_eq!(word, vec![4., 5.]);
        mem.read(2, false, &mut word);
        assert!(word.is_empty());
        assert_eq!(mem.energy().ops, 3);
        assert!(mem.load(vec![0.; 5]).is_err());
        let rom = model.memory(MemoryType::Rom, 2 * 3 * 8);
        assert_eq!(mem.area(), rom.area);
        Ok(())
    }
}
