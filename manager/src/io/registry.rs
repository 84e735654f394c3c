//! Per-instance pipe pairs.
//!
//! The registry owns every instance channel. Problem logic only borrows an
//! [`Instance`] for message exchange; opening and closing is reserved for
//! `io::lifecycle`, which knows the ordering the orchestrator expects.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::wire::MAX_INSTANCES;
use crate::error::{ChannelError, ConfigError, SessionError};
use crate::io::channel::{ChannelOpener, Direction, InboundPipe, OutboundPipe};

/// Order in which instance indices are visited when opening pipes.
///
/// Must mirror the order in which the orchestrator starts instances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenOrder {
    #[default]
    Ascending,
    Descending,
}

/// Pipe paths of one instance, as handed out by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePaths {
    /// Pipe the instance writes and the manager reads.
    pub inbound: String,
    /// Pipe the manager writes and the instance reads.
    pub outbound: String,
}

impl InstancePaths {
    pub fn new(inbound: impl Into<String>, outbound: impl Into<String>) -> Self {
        Self {
            inbound: inbound.into(),
            outbound: outbound.into(),
        }
    }

    /// Pair up a flat `(in_0, out_0, in_1, out_1, ...)` list.
    pub fn from_flat(paths: &[String]) -> Result<Vec<Self>, ConfigError> {
        if paths.is_empty() || paths.len() % 2 != 0 {
            return Err(ConfigError::UnpairedPaths(paths.len()));
        }
        Ok(paths
            .chunks(2)
            .map(|pair| InstancePaths::new(pair[0].clone(), pair[1].clone()))
            .collect())
    }
}

/// One submission instance slot.
pub struct Instance {
    index: usize,
    paths: InstancePaths,
    inbound: Option<InboundPipe>,
    outbound: Option<OutboundPipe>,
}

impl Instance {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn paths(&self) -> &InstancePaths {
        &self.paths
    }

    fn is_fully_open(&self) -> bool {
        self.outbound.as_ref().is_some_and(OutboundPipe::is_open)
            && self.inbound.as_ref().is_some_and(InboundPipe::is_open)
    }

    fn has_open_channel(&self) -> bool {
        self.outbound.is_some() || self.inbound.is_some()
    }

    pub fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        match self.outbound.as_mut() {
            Some(pipe) => pipe.write(bytes),
            None => Err(ChannelError::Closed(self.paths.outbound.clone())),
        }
    }

    pub fn send_line(&mut self, text: &str) -> Result<(), ChannelError> {
        match self.outbound.as_mut() {
            Some(pipe) => pipe.write_line(text),
            None => Err(ChannelError::Closed(self.paths.outbound.clone())),
        }
    }

    pub fn read_line(&mut self) -> Result<String, ChannelError> {
        match self.inbound.as_mut() {
            Some(pipe) => pipe.read_line(),
            None => Err(ChannelError::Closed(self.paths.inbound.clone())),
        }
    }

    fn close(&mut self, direction: Direction) {
        match direction {
            Direction::Write => {
                if let Some(mut pipe) = self.outbound.take() {
                    pipe.close();
                }
            }
            Direction::Read => {
                if let Some(mut pipe) = self.inbound.take() {
                    pipe.close();
                }
            }
        }
    }

    /// Best-effort write to a still-open outbound pipe.
    pub(crate) fn outbound_mut(&mut self) -> Option<&mut OutboundPipe> {
        self.outbound.as_mut()
    }
}

#[derive(Default)]
pub struct InstanceRegistry {
    instances: Vec<Instance>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `paths[i]` registered under index `i`.
    pub fn from_paths(paths: Vec<InstancePaths>) -> Result<Self, SessionError> {
        let mut registry = Self::new();
        for (index, pair) in paths.into_iter().enumerate() {
            registry.register(index, pair.inbound, pair.outbound)?;
        }
        Ok(registry)
    }

    /// Record the paths of instance `index`. Indices must arrive in order.
    pub fn register(
        &mut self,
        index: usize,
        inbound_path: impl Into<String>,
        outbound_path: impl Into<String>,
    ) -> Result<(), SessionError> {
        if index != self.instances.len() {
            return Err(SessionError::InvalidState(
                "instances must be registered in index order",
            ));
        }
        if index >= MAX_INSTANCES {
            return Err(ConfigError::InstanceCount(index + 1).into());
        }
        self.instances.push(Instance {
            index,
            paths: InstancePaths::new(inbound_path, outbound_path),
            inbound: None,
            outbound: None,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &InstancePaths> {
        self.instances.iter().map(Instance::paths)
    }

    pub fn any_open(&self) -> bool {
        self.instances.iter().any(Instance::has_open_channel)
    }

    pub fn all_open(&self) -> bool {
        !self.instances.is_empty() && self.instances.iter().all(Instance::is_fully_open)
    }

    /// Open every instance, write end before read end, visiting indices in `order`.
    ///
    /// If a read end fails to open, the instance's write end is closed again
    /// before the error is returned.
    #[instrument(skip_all, fields(instances = self.instances.len(), ?order))]
    pub fn open_all<O: ChannelOpener + ?Sized>(
        &mut self,
        opener: &O,
        order: OpenOrder,
    ) -> Result<(), SessionError> {
        if self.any_open() {
            return Err(SessionError::InvalidState(
                "cannot open instances while channels are still open",
            ));
        }
        let indices: Vec<usize> = match order {
            OpenOrder::Ascending => (0..self.instances.len()).collect(),
            OpenOrder::Descending => (0..self.instances.len()).rev().collect(),
        };
        for index in indices {
            let instance = &mut self.instances[index];
            let mut outbound = OutboundPipe::open(opener, &instance.paths.outbound)?;
            let inbound = match InboundPipe::open(opener, &instance.paths.inbound) {
                Ok(pipe) => pipe,
                Err(err) => {
                    outbound.close();
                    return Err(err.into());
                }
            };
            instance.outbound = Some(outbound);
            instance.inbound = Some(inbound);
            debug!(index, "instance pipes open");
        }
        Ok(())
    }

    /// Close one direction across all instances, leaving the other untouched.
    pub fn close_all(&mut self, direction: Direction) {
        for instance in &mut self.instances {
            instance.close(direction);
        }
        debug!(%direction, "closed instance channels");
    }

    /// Borrow a fully open instance.
    pub fn get(&mut self, index: usize) -> Result<&mut Instance, SessionError> {
        let instance = self
            .instances
            .get_mut(index)
            .ok_or(SessionError::InvalidState("instance index out of range"))?;
        if !instance.is_fully_open() {
            let path = if instance.outbound.is_none() {
                instance.paths.outbound.clone()
            } else {
                instance.paths.inbound.clone()
            };
            return Err(ChannelError::Closed(path).into());
        }
        Ok(instance)
    }

    pub(crate) fn instances_mut(&mut self) -> impl Iterator<Item = &mut Instance> {
        self.instances.iter_mut()
    }

    /// Swap in a freshly negotiated instance set. All channels must be closed.
    pub fn replace(&mut self, paths: Vec<InstancePaths>) -> Result<(), SessionError> {
        if self.any_open() {
            return Err(SessionError::InvalidState(
                "cannot replace instances while channels are still open",
            ));
        }
        *self = Self::from_paths(paths)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ChannelEvent, ChannelLog, ScriptedOpener};

    fn two_instances() -> InstanceRegistry {
        InstanceRegistry::from_paths(vec![
            InstancePaths::new("/fifo/u0", "/fifo/m0"),
            InstancePaths::new("/fifo/u1", "/fifo/m1"),
        ])
        .expect("registry")
    }

    #[test]
    fn register_requires_sequential_indices() {
        let mut registry = InstanceRegistry::new();
        registry.register(0, "/a", "/b").expect("first");
        assert!(registry.register(2, "/c", "/d").is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn register_caps_instance_count() {
        let mut registry = InstanceRegistry::new();
        for index in 0..MAX_INSTANCES {
            registry
                .register(index, format!("/u{index}"), format!("/m{index}"))
                .expect("register");
        }
        let err = registry.register(MAX_INSTANCES, "/u", "/m").unwrap_err();
        assert!(matches!(err, SessionError::Config(ConfigError::InstanceCount(43))));
    }

    #[test]
    fn flat_paths_pair_up() {
        let flat: Vec<String> = ["/u0", "/m0", "/u1", "/m1"].map(String::from).to_vec();
        let pairs = InstancePaths::from_flat(&flat).expect("pairs");
        assert_eq!(pairs[1], InstancePaths::new("/u1", "/m1"));
        assert!(InstancePaths::from_flat(&flat[..3]).is_err());
        assert!(InstancePaths::from_flat(&[]).is_err());
    }

    #[test]
    fn open_all_writes_before_reads() {
        let log = ChannelLog::default();
        let opener = ScriptedOpener::new(log.clone());
        let mut registry = two_instances();

        registry.open_all(&opener, OpenOrder::Ascending).expect("open");

        assert!(registry.all_open());
        assert_eq!(
            log.opened_paths(),
            vec!["/fifo/m0", "/fifo/u0", "/fifo/m1", "/fifo/u1"]
        );
    }

    #[test]
    fn descending_order_opens_last_instance_first() {
        let log = ChannelLog::default();
        let opener = ScriptedOpener::new(log.clone());
        let mut registry = two_instances();

        registry.open_all(&opener, OpenOrder::Descending).expect("open");

        assert_eq!(
            log.opened_paths(),
            vec!["/fifo/m1", "/fifo/u1", "/fifo/m0", "/fifo/u0"]
        );
    }

    #[test]
    fn failed_read_end_leaves_instance_closed() {
        let log = ChannelLog::default();
        let opener = ScriptedOpener::new(log.clone()).missing("/fifo/u0");
        let mut registry = two_instances();

        let err = registry.open_all(&opener, OpenOrder::Ascending).unwrap_err();

        assert!(matches!(err, SessionError::Channel(ChannelError::Open { .. })));
        assert!(!registry.any_open());
        assert!(log.events().contains(&ChannelEvent::Close {
            path: "/fifo/m0".to_string(),
            direction: Direction::Write,
        }));
        assert!(registry.get(0).is_err());
    }

    #[test]
    fn close_all_touches_one_direction() {
        let log = ChannelLog::default();
        let opener = ScriptedOpener::new(log.clone());
        let mut registry = two_instances();
        registry.open_all(&opener, OpenOrder::Ascending).expect("open");

        registry.close_all(Direction::Write);

        assert!(registry.any_open());
        assert!(!registry.all_open());
        let err = registry.get(1).err().expect("half-open instance hidden");
        assert!(matches!(err, SessionError::Channel(ChannelError::Closed(p)) if p == "/fifo/m1"));
        assert!(registry.open_all(&opener, OpenOrder::Ascending).is_err());

        registry.close_all(Direction::Read);
        assert!(!registry.any_open());
    }

    #[test]
    fn instance_exchange_goes_through_its_pipes() {
        let log = ChannelLog::default();
        let opener = ScriptedOpener::new(log.clone()).script("/fifo/u0", "pong\n");
        let mut registry = two_instances();
        registry.open_all(&opener, OpenOrder::Ascending).expect("open");

        let instance = registry.get(0).expect("instance");
        instance.send_line("ping").expect("send");
        assert_eq!(instance.read_line().expect("reply"), "pong");
        assert_eq!(log.written("/fifo/m0"), b"ping\n");
    }

    #[test]
    fn replace_requires_closed_channels() {
        let log = ChannelLog::default();
        let opener = ScriptedOpener::new(log);
        let mut registry = two_instances();
        registry.open_all(&opener, OpenOrder::Ascending).expect("open");
        assert!(registry.replace(vec![InstancePaths::new("/x", "/y")]).is_err());

        registry.close_all(Direction::Write);
        registry.close_all(Direction::Read);
        registry
            .replace(vec![InstancePaths::new("/x", "/y")])
            .expect("replace");
        assert_eq!(registry.len(), 1);
    }
}
