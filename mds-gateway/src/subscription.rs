//! Bidirectional subscription index: channel → clients and client →
//! channels, kept consistent under one lock. Channel keys with no
//! subscribers are removed.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::hub::ClientId;

#[derive(Default)]
struct Index {
    channel_subscribers: HashMap<String, HashSet<ClientId>>,
    client_subscriptions: HashMap<ClientId, HashSet<String>>,
}

#[derive(Default)]
pub struct SubscriptionManager {
    index: Mutex<Index>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, client: ClientId, channel: &str) {
        let mut index = self.index.lock().unwrap();
        index
            .channel_subscribers
            .entry(channel.to_string())
            .or_default()
            .insert(client);
        index
            .client_subscriptions
            .entry(client)
            .or_default()
            .insert(channel.to_string());
    }

    pub fn unsubscribe(&self, client: ClientId, channel: &str) {
        let mut index = self.index.lock().unwrap();
        if let Some(subscribers) = index.channel_subscribers.get_mut(channel) {
            subscribers.remove(&client);
            if subscribers.is_empty() {
                index.channel_subscribers.remove(channel);
            }
        }
        if let Some(channels) = index.client_subscriptions.get_mut(&client) {
            channels.remove(channel);
            if channels.is_empty() {
                index.client_subscriptions.remove(&client);
            }
        }
    }

    pub fn unsubscribe_all(&self, client: ClientId) {
        let mut index = self.index.lock().unwrap();
        let Some(channels) = index.client_subscriptions.remove(&client) else {
            return;
        };
        for channel in channels {
            if let Some(subscribers) = index.channel_subscribers.get_mut(&channel) {
                subscribers.remove(&client);
                if subscribers.is_empty() {
                    index.channel_subscribers.remove(&channel);
                }
            }
        }
    }

    pub fn subscribers(&self, channel: &str) -> Vec<ClientId> {
        let index = self.index.lock().unwrap();
        index
            .channel_subscribers
            .get(channel)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn client_channels(&self, client: ClientId) -> Vec<String> {
        let index = self.index.lock().unwrap();
        index
            .client_subscriptions
            .get(&client)
            .map(|channels| channels.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscription_count(&self, client: ClientId) -> usize {
        let index = self.index.lock().unwrap();
        index
            .client_subscriptions
            .get(&client)
            .map_or(0, HashSet::len)
    }

    pub fn channel_count(&self) -> usize {
        self.index.lock().unwrap().channel_subscribers.len()
    }

    pub fn is_subscribed(&self, client: ClientId, channel: &str) -> bool {
        let index = self.index.lock().unwrap();
        index
            .client_subscriptions
            .get(&client)
            .is_some_and(|channels| channels.contains(channel))
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.index
            .lock()
            .unwrap()
            .channel_subscribers
            .contains_key(channel)
    }
}
