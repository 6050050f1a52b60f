use std::collections::VecDeque;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use super::{
    component::Component,
    fabric::{ChannelId, Fabric, Payload},
    metrics::{EnergyCounter, Metered, StageKind},
};
use crate::{
    error::AccError,
    models::{MemoryType, TechModel},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capacity {
    Bounded(usize),
    Unbounded,
}

impl Capacity {
    /// whether one more element fits next to `occupancy`
    pub fn admits(&self, occupancy: usize) -> bool {
        match self {
            Capacity::Bounded(cap) => occupancy < *cap,
            Capacity::Unbounded => true,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, Capacity::Bounded(0))
    }
}

impl From<Option<usize>> for Capacity {
    fn from(capacity: Option<usize>) -> Self {
        capacity.map_or(Capacity::Unbounded, Capacity::Bounded)
    }
}

/// # Description
/// an elastic fifo between two channels
/// * receive side: `ready` while the occupancy is below the capacity
/// * transmit side: `valid` with the front element while not empty
/// * `cut_through`: an empty buffer forwards the upstream element in the same cycle, such an
///   element is never stored and does not count toward the occupancy
/// * capacity 0: no storage, valid, ready and data are wired through
///
/// the maximum occupancy over the whole run sizes the memory in the area report
#[derive(Debug)]
pub struct ChannelBuffer {
    pub name: String,
    prev: ChannelId,
    next: ChannelId,
    depth: usize,
    capacity: Capacity,
    cut_through: bool,
    queue: VecDeque<Vec<Payload>>,
    max_occupancy: usize,
    /// elements forwarded without being stored
    pub bypassed: u64,
    /// elements that left the buffer
    pub transferred: u64,
    model: TechModel,
    energy: EnergyCounter,
}

impl ChannelBuffer {
    pub fn new(
        name: &str,
        prev: ChannelId,
        next: ChannelId,
        depth: usize,
        capacity: Capacity,
        cut_through: bool,
        model: TechModel,
    ) -> Self {
        debug!(
            "channel buffer {}: depth {}, capacity {:?}",
            name, depth, capacity
        );
        ChannelBuffer {
            name: name.to_string(),
            prev,
            next,
            depth,
            capacity,
            cut_through,
            queue: VecDeque::new(),
            max_occupancy: 0,
            bypassed: 0,
            transferred: 0,
            model,
            energy: EnergyCounter::default(),
        }
    }

    pub fn occupancy(&self) -> usize {
        self.queue.len()
    }

    pub fn max_occupancy(&self) -> usize {
        self.max_occupancy
    }

    /// bits of the storage sized by the maximum occupancy
    pub fn storage_bits(&self) -> usize {
        self.depth * self.max_occupancy * self.model.bit_width()
    }

    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    pub fn input(&self) -> ChannelId {
        self.prev
    }

    pub fn output(&self) -> ChannelId {
        self.next
    }
}

impl Component for ChannelBuffer {
    fn drive(&self, fabric: &mut Fabric) {
        if self.capacity.is_passthrough() {
            fabric.set_valid(self.next, fabric.valid(self.prev));
            fabric.set_ready(self.prev, fabric.ready(self.next));
            fabric.forward_data(self.prev, self.next, 0);
            return;
        }
        match self.queue.front() {
            Some(front) => {
                fabric.set_valid(self.next, true);
                fabric.set_data(self.next, 0, front);
            }
            None if self.cut_through => {
                fabric.set_valid(self.next, fabric.valid(self.prev));
                fabric.forward_data(self.prev, self.next, 0);
            }
            None => fabric.set_valid(self.next, false),
        }
        fabric.set_ready(self.prev, self.capacity.admits(self.queue.len()));
    }

    fn cycle(&mut self, fabric: &Fabric) -> Result<(), AccError> {
        let received = fabric.fire(self.prev);
        let sent = fabric.fire(self.next);
        if sent {
            self.transferred += 1;
        }
        if self.capacity.is_passthrough() {
            return Ok(());
        }
        if self.queue.is_empty() && self.cut_through && received && sent {
            self.bypassed += 1;
            trace!("{}: cut through", self.name);
            return Ok(());
        }
        if sent {
            self.queue.pop_front();
        }
        if received {
            self.queue.push_back(fabric.data(self.prev).to_vec());
            self.max_occupancy = self.max_occupancy.max(self.queue.len());
        }
        let accesses = received as usize + sent as usize;
        let per_access = self
            .model
            .memory(MemoryType::Ram, self.storage_bits())
            .dynamic_energy;
        self.energy.record(per_access, accesses);
        Ok(())
    }

    fn reset(&mut self) {
        self.queue.clear();
        self.max_occupancy = 0;
        self.bypassed = 0;
        self.transferred = 0;
        self.energy.reset();
    }
}

impl Metered for ChannelBuffer {
    fn kind(&self) -> StageKind {
        StageKind::ChannelBuffer
    }

    /// the storage actually used during the run
    fn area(&self) -> f64 {
        if self.capacity.is_passthrough() || self.max_occupancy == 0 {
            return 0.;
        }
        self.model.memory(MemoryType::Ram, self.storage_bits()).area
    }

    fn static_power(&self) -> f64 {
        0.
    }

    fn energy(&self) -> &EnergyCounter {
        &self.energy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(
        capacity: Capacity,
        cut_through: bool,
    ) -> Result<(Fabric, ChannelBuffer), Box<dyn std::error::Error>> {
        let mut fabric = Fabric::new();
        let prev = fabric.allocate("prev", 2)?;
        let next = fabric.allocate("next", 2)?;
        let model = TechModel::new(28, 16, 1.0)?;
        let buffer = ChannelBuffer::new("buf", prev, next, 2, capacity, cut_through, model);
        Ok((fabric, buffer))
    }

    /// settle the buffer, set the external signals, settle again and clock
    fn step(
        fabric: &mut Fabric,
        buffer: &mut ChannelBuffer,
        prev_valid: bool,
        value: Payload,
        next_ready: bool,
    ) -> Result<(bool, bool), Box<dyn std::error::Error>> {
        let (prev, next) = (buffer.input(), buffer.output());
        fabric.set_valid(prev, prev_valid);
        fabric.set_data(prev, 0, &[value, value]);
        fabric.set_ready(next, next_ready);
        buffer.drive(fabric);
        let fired = (fabric.fire(prev), fabric.fire(next));
        buffer.cycle(fabric)?;
        Ok(fired)
    }

    #[test]
    fn test_occupancy_bound() -> Result<(), Box<dyn std::error::Error>> {
        simple_logger::init_with_level(log::Level::Warn).unwrap_or(());
        let (mut fabric, mut buffer) = setup(Capacity::Bounded(3), false)?;
        let prev = buffer.input();
        // fed every cycle, drained every third cycle
        for cycle in 0..60 {
            let drain = cycle % 3 == 0;
            step(&mut fabric, &mut buffer, true, cycle as f64, drain)?;
            assert!(buffer.occupancy() <= 3);
            buffer.drive(&mut fabric);
            assert_eq!(fabric.ready(prev), buffer.occupancy() < 3);
        }
        assert_eq!(buffer.max_occupancy(), 3);
        // two lanes of three 16 bit entries
        assert_eq!(buffer.storage_bits(), 2 * 3 * 16);
        let model = TechModel::new(28, 16, 1.0)?;
        let sized = model.memory(MemoryType::Ram, 2 * 3 * 16);
        assert!((buffer.area() - sized.area).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_order_preserved() -> Result<(), Box<dyn std::error::Error>> {
        let (mut fabric, mut buffer) = setup(Capacity::Unbounded, false)?;
        let next = buffer.output();
        let mut sent = 0.;
        let mut received = Vec::new();
        for cycle in 0..40 {
            let (fired_in, _) = step(&mut fabric, &mut buffer, cycle < 20, sent, cycle >= 10)?;
            if fired_in {
                sent += 1.;
            }
            buffer.drive(&mut fabric);
            if fabric.valid(next) && cycle + 1 >= 10 {
                received.push(fabric.data(next)[0]);
            }
        }
        // every element arrives once and in order
        received.dedup();
        assert_eq!(received, (0..20).map(|x| x as f64).collect::<Vec<_>>());
        assert_eq!(buffer.max_occupancy(), 10);
        Ok(())
    }

    #[test]
    fn test_cut_through_not_counted() -> Result<(), Box<dyn std::error::Error>> {
        let (mut fabric, mut buffer) = setup(Capacity::Bounded(2), true)?;
        for cycle in 0..10 {
            let (fired_in, fired_out) = step(&mut fabric, &mut buffer, true, cycle as f64, true)?;
            assert!(fired_in && fired_out);
        }
        assert_eq!(buffer.bypassed, 10);
        assert_eq!(buffer.max_occupancy(), 0);
        assert_eq!(buffer.area(), 0.);

        // a stalled consumer makes the buffer store again
        step(&mut fabric, &mut buffer, true, 10., false)?;
        assert_eq!(buffer.max_occupancy(), 1);
        assert!(buffer.area() > 0.);
        Ok(())
    }

    #[test]
    fn test_passthrough() -> Result<(), Box<dyn std::error::Error>> {
        let (mut fabric, mut buffer) = setup(Capacity::Bounded(0), false)?;
        let (prev, next) = (buffer.input(), buffer.output());
        fabric.set_valid(prev, true);
        fabric.set_data(prev, 0, &[3., 4.]);
        fabric.set_ready(next, false);
        buffer.drive(&mut fabric);
        assert!(fabric.valid(next));
        assert!(!fabric.ready(prev));
        assert_eq!(fabric.data(next), &[3., 4.]);
        fabric.set_ready(next, true);
        buffer.drive(&mut fabric);
        assert!(fabric.ready(prev));
        buffer.cycle(&fabric)?;
        assert_eq!(buffer.max_occupancy(), 0);
        assert_eq!(buffer.transferred, 1);
        Ok(())
    }
}
