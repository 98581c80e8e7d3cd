use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;

use crate::utils::Result;

pub type SubscriberId = String;

/// One live subscription on a channel.
///
/// Subscribers without a group each see every item; subscribers sharing a
/// group compete for items, each item going to one member of the group.
#[derive(Debug)]
pub struct Subscriber<T> {
    pub id: SubscriberId,
    pub client_id: String,
    pub group: Option<String>,
    pub(crate) sender: UnboundedSender<Result<T>>,
}

/// Represents a channel in the broker together with its subscribers.
#[derive(Debug)]
pub struct Topic<T> {
    pub name: String,
    pub subscribers: Vec<Subscriber<T>>,
    cursors: HashMap<String, usize>,
}

impl<T: Clone> Topic<T> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: Vec::new(),
            cursors: HashMap::new(),
        }
    }

    pub fn subscribe(&mut self, subscriber: Subscriber<T>) {
        self.subscribers.push(subscriber);
    }

    pub fn unsubscribe(&mut self, id: &str) {
        self.subscribers.retain(|s| s.id != id);
    }

    pub fn remove_client(&mut self, client_id: &str) {
        self.subscribers.retain(|s| s.client_id != client_id);
    }

    pub fn has_group_members(&self, group: &str) -> bool {
        self.subscribers
            .iter()
            .any(|s| s.group.as_deref() == Some(group))
    }

    /// Delivers `item` to every ungrouped subscriber and to one member of
    /// each group. Returns how many subscribers received it.
    pub fn fan_out(&mut self, item: &T) -> usize {
        self.prune();

        let mut delivered = 0;
        let mut groups: Vec<&str> = Vec::new();
        for subscriber in &self.subscribers {
            match subscriber.group.as_deref() {
                None => {
                    if subscriber.sender.send(Ok(item.clone())).is_ok() {
                        delivered += 1;
                    }
                }
                Some(group) if !groups.contains(&group) => groups.push(group),
                Some(_) => {}
            }
        }

        let groups: Vec<String> = groups.into_iter().map(str::to_string).collect();
        for group in groups {
            if let Some(index) = self.next_in(Some(&group)) {
                if self.subscribers[index].sender.send(Ok(item.clone())).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Delivers `item` to exactly one subscriber, rotating over all of them.
    pub fn route_one(&mut self, item: T) -> Option<&Subscriber<T>> {
        self.prune();
        let index = self.next_in(None)?;
        let subscriber = &self.subscribers[index];
        subscriber.sender.send(Ok(item)).ok()?;
        Some(subscriber)
    }

    fn next_in(&mut self, group: Option<&str>) -> Option<usize> {
        let members: Vec<usize> = self
            .subscribers
            .iter()
            .enumerate()
            .filter(|(_, s)| group.is_none() || s.group.as_deref() == group)
            .map(|(i, _)| i)
            .collect();
        if members.is_empty() {
            return None;
        }
        let cursor = self
            .cursors
            .entry(group.unwrap_or_default().to_string())
            .or_insert(0);
        let index = members[*cursor % members.len()];
        *cursor = cursor.wrapping_add(1);
        Some(index)
    }

    fn prune(&mut self) {
        self.subscribers.retain(|s| !s.sender.is_closed());
    }
}
