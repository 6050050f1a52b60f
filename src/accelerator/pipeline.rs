use serde::Serialize;

/// the channel groups one pipeline slot works on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GroupLocation {
    pub in_group: usize,
    pub out_group: usize,
}

/// # Description
/// the shift register of stage activity flags of one layer
///
/// slot 0 is the stage the controller issues into, the last slot is the write back. every clock
/// edge each slot takes the content its upstream slot held in the previous cycle.
///
/// # Example
/// ```
/// use convnet_acc::accelerator::pipeline::{GroupLocation, PipelineRegister};
/// let mut pipeline = PipelineRegister::new(3);
/// let loc = GroupLocation { in_group: 0, out_group: 1 };
/// pipeline.advance(Some(loc));
/// pipeline.advance(None);
/// pipeline.advance(None);
/// assert_eq!(pipeline.writeback(), Some(loc));
/// pipeline.advance(None);
/// assert!(pipeline.is_idle());
/// ```
#[derive(Debug, Clone)]
pub struct PipelineRegister {
    slots: Vec<Option<GroupLocation>>,
}

impl PipelineRegister {
    pub fn new(depth: usize) -> Self {
        PipelineRegister {
            slots: vec![None; depth.max(1)],
        }
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// shift by one stage and put `issue` into slot 0
    pub fn advance(&mut self, issue: Option<GroupLocation>) {
        self.slots.rotate_right(1);
        self.slots[0] = issue;
    }

    pub fn stage(&self, index: usize) -> Option<GroupLocation> {
        self.slots.get(index).copied().flatten()
    }

    pub fn writeback(&self) -> Option<GroupLocation> {
        self.slots.last().copied().flatten()
    }

    pub fn is_idle(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }
}
