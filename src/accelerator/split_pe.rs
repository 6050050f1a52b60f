use super::{
    component::Component,
    fabric::{ChannelId, Fabric},
};
use crate::error::AccError;

/// # Description
/// broadcast one channel to several branches
/// * the upstream sees `ready` only when every branch is ready
/// * a branch sees `valid` only when the upstream is valid and every branch is ready, so all
///   branches take the element in the same cycle
#[derive(Debug)]
pub struct SplitPe {
    pub name: String,
    prev: ChannelId,
    nexts: Vec<ChannelId>,
    pub transferred: u64,
}

impl SplitPe {
    pub fn new(name: &str, prev: ChannelId, nexts: Vec<ChannelId>) -> Result<Self, AccError> {
        if nexts.len() < 2 {
            return Err(AccError::invalid_layer(name, "a split needs at least two branches"));
        }
        Ok(SplitPe {
            name: name.to_string(),
            prev,
            nexts,
            transferred: 0,
        })
    }
}

impl Component for SplitPe {
    fn drive(&self, fabric: &mut Fabric) {
        let all_ready = self.nexts.iter().all(|n| fabric.ready(*n));
        let valid = fabric.valid(self.prev) && all_ready;
        fabric.set_ready(self.prev, all_ready);
        for next in self.nexts.iter() {
            fabric.set_valid(*next, valid);
            fabric.forward_data(self.prev, *next, 0);
        }
    }

    fn cycle(&mut self, fabric: &Fabric) -> Result<(), AccError> {
        if fabric.fire(self.prev) {
            self.transferred += 1;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.transferred = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_ready() -> Result<(), Box<dyn std::error::Error>> {
        let mut fabric = Fabric::new();
        let prev = fabric.allocate("in", 2)?;
        let nexts = (0..3)
            .map(|i| fabric.allocate(&format!("out_{}", i), 2))
            .collect::<Result<Vec<_>, _>>()?;
        let split = SplitPe::new("split", prev, nexts.clone())?;
        fabric.set_valid(prev, true);
        fabric.set_data(prev, 0, &[7., 8.]);
        fabric.set_ready(nexts[0], true);
        fabric.set_ready(nexts[2], true);
        split.drive(&mut fabric);
        // branch 1 stalls everybody
        assert!(!fabric.ready(prev));
        assert!(nexts.iter().all(|n| !fabric.valid(*n)));

        fabric.set_ready(nexts[1], true);
        split.drive(&mut fabric);
        assert!(fabric.ready(prev));
        for n in nexts.iter() {
            assert!(fabric.fire(*n));
            assert_eq!(fabric.data(*n), &[7., 8.]);
        }
        Ok(())
    }

    #[test]
    fn test_single_branch_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let mut fabric = Fabric::new();
        let prev = fabric.allocate("in", 2)?;
        let next = fabric.allocate("out", 2)?;
        assert!(SplitPe::new("split", prev, vec![next]).is_err());
        Ok(())
    }
}
