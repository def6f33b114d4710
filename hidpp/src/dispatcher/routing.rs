//! Maps feature calls and register accesses to queues.

use std::collections::HashMap;

use crate::{message::Family, nibble::U4};

/// Identifies the reports routed to a queue.
///
/// `None` for the function index or software ID matches every value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RoutingKey {
    pub family: Family,

    /// The sub ID (HID++1.0) or feature index (HID++2.0, VLP).
    pub index: u8,
    pub function: Option<U4>,
    pub software_id: Option<U4>,
}

impl RoutingKey {
    /// Matches every report of a feature or sub ID.
    pub const fn feature(family: Family, index: u8) -> Self {
        Self {
            family,
            index,
            function: None,
            software_id: None,
        }
    }

    /// Matches every report of one function of a feature.
    pub const fn function(family: Family, index: u8, function: U4) -> Self {
        Self {
            family,
            index,
            function: Some(function),
            software_id: None,
        }
    }

    /// Matches exactly one function and software ID.
    pub const fn call(family: Family, index: u8, function: U4, software_id: U4) -> Self {
        Self {
            family,
            index,
            function: Some(function),
            software_id: Some(software_id),
        }
    }
}

/// The routing table of a dispatcher.
#[derive(Clone, Default, Debug)]
pub struct RoutingTable {
    routes: HashMap<RoutingKey, &'static str>,
}

impl RoutingTable {
    /// Routes reports matching `key` to `queue`, replacing a previous
    /// binding of the same key.
    pub fn bind(&mut self, key: RoutingKey, queue: &'static str) {
        self.routes.insert(key, queue);
    }

    pub fn unbind(&mut self, key: &RoutingKey) -> Option<&'static str> {
        self.routes.remove(key)
    }

    /// Finds the most specific binding for a report, trying the exact call
    /// first and falling back to wildcards.
    pub fn lookup(&self, family: Family, index: u8, function: U4, software_id: U4) -> Option<&'static str> {
        [
            RoutingKey::call(family, index, function, software_id),
            RoutingKey::function(family, index, function),
            RoutingKey {
                family,
                index,
                function: None,
                software_id: Some(software_id),
            },
            RoutingKey::feature(family, index),
        ]
        .iter()
        .find_map(|key| self.routes.get(key).copied())
    }

    /// Like [`Self::lookup`], but only considers bindings naming
    /// `software_id` explicitly.
    pub fn lookup_explicit(
        &self,
        family: Family,
        index: u8,
        function: U4,
        software_id: U4,
    ) -> Option<&'static str> {
        [
            RoutingKey::call(family, index, function, software_id),
            RoutingKey {
                family,
                index,
                function: None,
                software_id: Some(software_id),
            },
        ]
        .iter()
        .find_map(|key| self.routes.get(key).copied())
    }

    /// Removes every binding of `family`.
    pub fn clear_family(&mut self, family: Family) {
        self.routes.retain(|key, _| key.family != family);
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
