//! # Description
//! - the arena of valid/ready handshake channels of one accelerator
//! - channels are addressed by `ChannelId`, logical blob names map to ids through the registry
//! - every signal has exactly one writer, writers report changes so the combinational logic
//!   can be settled to a fixpoint before each clock edge

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::AccError;

/// the value carried by one channel lane
pub type Payload = f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ChannelId(usize);

impl ChannelId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// # Description
/// one handshake bus: `valid` and `data` are driven by the producer, `ready` by the consumer
#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    pub valid: bool,
    pub ready: bool,
    pub data: Vec<Payload>,
}

impl Channel {
    /// the number of lanes, i.e. the channel depth of the feature map
    pub fn depth(&self) -> usize {
        self.data.len()
    }

    pub fn fire(&self) -> bool {
        self.valid && self.ready
    }
}

#[derive(Debug, Default)]
pub struct Fabric {
    channels: Vec<Channel>,
    registry: BTreeMap<String, ChannelId>,
    changed: bool,
}

impl Fabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// allocate a fresh channel of `depth` lanes and register it under `name`
    pub fn allocate(&mut self, name: &str, depth: usize) -> Result<ChannelId, AccError> {
        if self.registry.contains_key(name) {
            return Err(AccError::DuplicateConnection(name.to_string()));
        }
        let id = ChannelId(self.channels.len());
        self.channels.push(Channel {
            name: name.to_string(),
            valid: false,
            ready: false,
            data: vec![0.; depth],
        });
        self.registry.insert(name.to_string(), id);
        Ok(id)
    }

    /// make `name` refer to an existing channel
    pub fn alias(&mut self, name: &str, id: ChannelId) {
        self.registry.insert(name.to_string(), id);
    }

    pub fn lookup(&self, name: &str) -> Option<ChannelId> {
        self.registry.get(name).copied()
    }

    /// the name to channel map, ordered by name
    pub fn registry(&self) -> &BTreeMap<String, ChannelId> {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel(&self, id: ChannelId) -> &Channel {
        &self.channels[id.0]
    }

    pub fn valid(&self, id: ChannelId) -> bool {
        self.channels[id.0].valid
    }

    pub fn ready(&self, id: ChannelId) -> bool {
        self.channels[id.0].ready
    }

    pub fn data(&self, id: ChannelId) -> &[Payload] {
        &self.channels[id.0].data
    }

    /// a transfer happens on this edge
    pub fn fire(&self, id: ChannelId) -> bool {
        self.channels[id.0].fire()
    }

    pub fn set_valid(&mut self, id: ChannelId, valid: bool) {
        let channel = &mut self.channels[id.0];
        if channel.valid != valid {
            channel.valid = valid;
            self.changed = true;
        }
    }

    pub fn set_ready(&mut self, id: ChannelId, ready: bool) {
        let channel = &mut self.channels[id.0];
        if channel.ready != ready {
            channel.ready = ready;
            self.changed = true;
        }
    }

    /// write `data` into the lanes starting at `offset`, extra values are dropped
    pub fn set_data(&mut self, id: ChannelId, offset: usize, data: &[Payload]) {
        let lanes = &mut self.channels[id.0].data;
        let end = lanes.len().min(offset + data.len());
        if offset >= end {
            return;
        }
        let src = &data[..end - offset];
        if lanes[offset..end] != *src {
            lanes[offset..end].copy_from_slice(src);
            self.changed = true;
        }
    }

    /// copy the lanes of `from` into `to` starting at lane `offset`
    pub fn forward_data(&mut self, from: ChannelId, to: ChannelId, offset: usize) {
        if from == to {
            return;
        }
        let (src, dst) = if from.0 < to.0 {
            let (head, tail) = self.channels.split_at_mut(to.0);
            (&head[from.0], &mut tail[0])
        } else {
            let (head, tail) = self.channels.split_at_mut(from.0);
            (&tail[0], &mut head[to.0])
        };
        let end = dst.data.len().min(offset + src.data.len());
        if offset >= end {
            return;
        }
        let src = &src.data[..end - offset];
        if dst.data[offset..end] != *src {
            dst.data[offset..end].copy_from_slice(src);
            self.changed = true;
        }
    }

    /// return whether any signal changed since the last call
    pub fn take_changed(&mut self) -> bool {
        std::mem::replace(&mut self.changed, false)
    }

    /// drop every handshake, used by the global reset
    pub fn reset(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.valid = false;
            channel.ready = false;
            channel.data.iter_mut().for_each(|d| *d = 0.);
        }
        self.changed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry() -> Result<(), Box<dyn std::error::Error>> {
        let mut fabric = Fabric::new();
        let a = fabric.allocate("a", 2)?;
        let b = fabric.allocate("b", 3)?;
        fabric.alias("relu_a", a);
        assert_eq!(fabric.lookup("relu_a"), Some(a));
        assert_eq!(fabric.lookup("c"), None);
        assert_eq!(fabric.channel(b).depth(), 3);
        assert_eq!(fabric.len(), 2);
        assert!(matches!(
            fabric.allocate("a", 1),
            Err(AccError::DuplicateConnection(_))
        ));
        Ok(())
    }

    #[test]
    fn test_change_tracking() -> Result<(), Box<dyn std::error::Error>> {
        let mut fabric = Fabric::new();
        let a = fabric.allocate("a", 2)?;
        let b = fabric.allocate("b", 4)?;
        fabric.take_changed();
        fabric.set_valid(a, false);
        assert!(!fabric.take_changed());
        fabric.set_valid(a, true);
        assert!(fabric.take_changed());
        fabric.set_data(a, 0, &[1., 2.]);
        fabric.forward_data(a, b, 2);
        assert_eq!(fabric.data(b), &[0., 0., 1., 2.]);
        assert!(fabric.take_changed());
        fabric.forward_data(a, b, 2);
        assert!(!fabric.take_changed());
        // the lanes beyond the destination are dropped
        fabric.forward_data(b, a, 0);
        assert_eq!(fabric.data(a), &[0., 0.]);
        Ok(())
    }
}
