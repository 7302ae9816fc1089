use std::collections::{BTreeMap, HashMap};

use tokio::sync::oneshot;

use crate::frame::{AmqpChannelId, Frame, MethodHeader, CONN_DEFAULT_CHANNEL};

use super::{channel_id_repo::ChannelIdRepository, ChannelResource, IncomingMessage};

type Responders = HashMap<&'static MethodHeader, oneshot::Sender<IncomingMessage>>;

/// Channel resources of one connection, owned by its reader task.
pub(crate) struct ChannelManager {
    channel_id_repo: ChannelIdRepository,
    resources: BTreeMap<AmqpChannelId, ChannelResource>,
    responders: BTreeMap<AmqpChannelId, Responders>,
}

impl ChannelManager {
    pub fn new(channel_max: u16) -> Self {
        Self {
            channel_id_repo: ChannelIdRepository::new(channel_max),
            resources: BTreeMap::new(),
            responders: BTreeMap::new(),
        }
    }

    pub fn channel_max(&self) -> u16 {
        self.channel_id_repo.channel_max()
    }

    /// Insert resource, allocating the lowest free id when `channel_id` is `None`.
    ///
    /// Return the channel id, or `None` if no id is available.
    pub fn insert_resource(
        &mut self,
        channel_id: Option<AmqpChannelId>,
        resource: ChannelResource,
    ) -> Option<AmqpChannelId> {
        let id = match channel_id {
            Some(CONN_DEFAULT_CHANNEL) => CONN_DEFAULT_CHANNEL,
            Some(id) => {
                if !self.channel_id_repo.reserve(id) {
                    return None;
                }
                id
            }
            None => self.channel_id_repo.allocate()?,
        };
        self.resources.insert(id, resource);
        Some(id)
    }

    /// Remove the resource and release its id for reuse.
    pub fn remove_resource(&mut self, channel_id: &AmqpChannelId) -> Option<ChannelResource> {
        self.responders.remove(channel_id);
        let resource = self.resources.remove(channel_id)?;
        if *channel_id != CONN_DEFAULT_CHANNEL {
            self.channel_id_repo.release(*channel_id);
        }
        Some(resource)
    }

    pub fn get_dispatcher(
        &self,
        channel_id: &AmqpChannelId,
    ) -> Option<&tokio::sync::mpsc::UnboundedSender<Frame>> {
        self.resources.get(channel_id)?.dispatcher_tx.as_ref()
    }

    /// Channel ids that have a dispatcher.
    pub fn dispatched_channels(&self) -> impl Iterator<Item = (&AmqpChannelId, &ChannelResource)> {
        self.resources
            .iter()
            .filter(|(_, resource)| resource.dispatcher_tx.is_some())
    }

    pub fn insert_responder(
        &mut self,
        channel_id: &AmqpChannelId,
        method_header: &'static MethodHeader,
        responder: oneshot::Sender<IncomingMessage>,
    ) -> Option<oneshot::Sender<IncomingMessage>> {
        self.responders
            .entry(*channel_id)
            .or_default()
            .insert(method_header, responder)
    }

    pub fn remove_responder(
        &mut self,
        channel_id: &AmqpChannelId,
        method_header: &'static MethodHeader,
    ) -> Option<oneshot::Sender<IncomingMessage>> {
        self.responders.get_mut(channel_id)?.remove(method_header)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.resources.len()
    }
}
