//! Immutable service registry snapshots.
//!
//! A snapshot is built completely, then published through [`SharedRegistry`];
//! readers always see either the previous or the next registry, never a mix.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::record::ServiceRecord;

#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: Vec<Arc<ServiceRecord>>,
    index: HashMap<String, usize>,
}

impl ServiceRegistry {
    /// Records keep their declaration order.
    pub fn from_records(records: Vec<ServiceRecord>) -> Self {
        let mut registry = Self::default();
        for record in records {
            registry.index.insert(record.name().to_string(), registry.services.len());
            registry.services.push(Arc::new(record));
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ServiceRecord>> {
        self.index.get(name).map(|i| &self.services[*i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ServiceRecord>> {
        self.services.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn len(&self) -> usize { self.services.len() }

    pub fn is_empty(&self) -> bool { self.services.is_empty() }

    pub fn any_url(&self) -> bool { self.services.iter().any(|s| s.url.is_some()) }

    /// A new snapshot with `record` replacing the entry of the same name.
    pub fn with_record(&self, record: ServiceRecord) -> Self {
        let mut next = self.clone();
        match next.index.get(record.name()) {
            Some(i) => next.services[*i] = Arc::new(record),
            None => {
                next.index.insert(record.name().to_string(), next.services.len());
                next.services.push(Arc::new(record));
            }
        }
        next
    }
}

/// The published registry, swapped wholesale on every reconciliation.
#[derive(Debug)]
pub struct SharedRegistry {
    current: ArcSwap<ServiceRegistry>,
}

impl Default for SharedRegistry {
    fn default() -> Self {
        Self { current: ArcSwap::from_pointee(ServiceRegistry::default()) }
    }
}

impl SharedRegistry {
    pub fn load(&self) -> Arc<ServiceRegistry> { self.current.load_full() }

    pub fn publish(&self, registry: ServiceRegistry) {
        self.current.store(Arc::new(registry));
    }

    pub fn replace_record(&self, record: ServiceRecord) {
        let next = self.load().with_record(record);
        self.publish(next);
    }

    pub fn clear(&self) { self.publish(ServiceRegistry::default()); }
}
