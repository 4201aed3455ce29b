use std::collections::HashMap;
use std::sync::Arc;

use super::ChannelAdapter;
use crate::message::ChannelType;

/// Closed set of channel adapters, selected by the event's declared
/// channel (or a resolved identity's platform). No runtime type
/// inspection: an unknown channel simply has no entry.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ChannelType, Arc<dyn ChannelAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, channel: ChannelType, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(channel, adapter);
    }

    pub fn get(&self, channel: ChannelType) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel).cloned()
    }

    pub fn channels(&self) -> Vec<ChannelType> {
        self.adapters.keys().copied().collect()
    }
}
