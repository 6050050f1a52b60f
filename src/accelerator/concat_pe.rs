use super::{
    component::Component,
    fabric::{ChannelId, Fabric},
};
use crate::error::AccError;

/// # Description
/// merge several branches into one channel along the channel depth
/// * downstream `valid` only when every branch is valid
/// * every branch sees the same `ready`, and only when all of them are valid
/// * data of the branches is laid out in source order
#[derive(Debug)]
pub struct ConcatPe {
    pub name: String,
    prevs: Vec<ChannelId>,
    next: ChannelId,
    pub transferred: u64,
}

impl ConcatPe {
    pub fn new(name: &str, prevs: Vec<ChannelId>, next: ChannelId) -> Result<Self, AccError> {
        if prevs.is_empty() {
            return Err(AccError::invalid_layer(name, "a concat needs at least one branch"));
        }
        Ok(ConcatPe {
            name: name.to_string(),
            prevs,
            next,
            transferred: 0,
        })
    }
}

impl Component for ConcatPe {
    fn drive(&self, fabric: &mut Fabric) {
        let all_valid = self.prevs.iter().all(|p| fabric.valid(*p));
        let ready = all_valid && fabric.ready(self.next);
        fabric.set_valid(self.next, all_valid);
        let mut offset = 0;
        for prev in self.prevs.iter() {
            fabric.set_ready(*prev, ready);
            fabric.forward_data(*prev, self.next, offset);
            offset += fabric.channel(*prev).depth();
        }
    }

    fn cycle(&mut self, fabric: &Fabric) -> Result<(), AccError> {
        if fabric.fire(self.next) {
            self.transferred += 1;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.transferred = 0;
    }
}
