use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;
use tracing::{debug, warn};

use super::{ChannelLink, PvError, PvSystem};
use crate::channel::{BufferError, PvMeta, TypedBuffer};

#[derive(Debug)]
struct Record {
    value: TypedBuffer,
    meta: PvMeta,
    links: Vec<ChannelLink>,
}

/// An in-memory data source.
///
/// Records are defined by name; channels connecting to a record that does not exist yet stay
/// pending until it is [`define`](Self::define)d. Every [`set`](Self::set), including puts
/// from programs, is posted to all monitoring links.
#[derive(Debug)]
pub struct LocalPvSystem {
    records: DashMap<Arc<str>, Record, ahash::RandomState>,
    pending: DashMap<Arc<str>, Vec<ChannelLink>, ahash::RandomState>,
    defined: bool,
    flushes: AtomicUsize,
}

impl LocalPvSystem {
    pub fn new() -> Self {
        Self {
            records: DashMap::default(),
            pending: DashMap::default(),
            defined: true,
            flushes: AtomicUsize::new(0),
        }
    }

    /// A data source whose handle could not be created. Programs using it never start.
    pub fn undefined() -> Self {
        Self {
            defined: false,
            ..Self::new()
        }
    }

    /// Create or replace the record `name`, connecting any channel waiting for it.
    pub fn define(&self, name: &str, value: TypedBuffer) {
        let name: Arc<str> = Arc::from(name);
        let meta = PvMeta::at(SystemTime::now());
        let waiting = self
            .pending
            .remove(&name)
            .map(|(_, links)| links)
            .unwrap_or_default();

        let mut links = self
            .records
            .remove(&name)
            .map(|(_, record)| record.links)
            .unwrap_or_default();
        links.extend(waiting.iter().cloned());

        self.records.insert(
            Arc::clone(&name),
            Record {
                value: value.clone(),
                meta: meta.clone(),
                links,
            },
        );

        for link in &waiting {
            deliver_connect(link, &value, &meta);
        }
    }

    /// Update the record `name` and post the new value to every monitoring link.
    pub fn set(&self, name: &str, value: TypedBuffer) -> Result<(), PvError> {
        self.set_with_meta(name, value, PvMeta::at(SystemTime::now()))
    }

    pub fn set_with_meta(&self, name: &str, value: TypedBuffer, meta: PvMeta) -> Result<(), PvError> {
        let links = {
            let mut record = self
                .records
                .get_mut(name)
                .ok_or_else(|| PvError::NotFound(name.to_string()))?;
            if record.value.element() != value.element() {
                return Err(PvError::Buffer {
                    pv: name.to_string(),
                    source: BufferError::TypeMismatch {
                        expected: record.value.element(),
                        found: value.element(),
                    },
                });
            }
            record.value = value.clone();
            record.meta = meta.clone();
            record.links.retain(ChannelLink::is_open);
            record.links.clone()
        };

        for link in links.iter().filter(|link| link.wants_monitor()) {
            if let Err(e) = link.post(&value, &meta) {
                warn!(pv = %name, error = %e, "Failed to post monitor update");
            }
        }
        Ok(())
    }

    /// Current value of the record `name`.
    pub fn value(&self, name: &str) -> Option<TypedBuffer> {
        self.records.get(name).map(|record| record.value.clone())
    }

    /// Number of open links attached to the record `name`.
    pub fn link_count(&self, name: &str) -> usize {
        self.records
            .get(name)
            .map(|record| record.links.iter().filter(|l| l.is_open()).count())
            .unwrap_or(0)
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }
}

impl Default for LocalPvSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver_connect(link: &ChannelLink, value: &TypedBuffer, meta: &PvMeta) {
    if let Err(e) = link.connected(value.count()) {
        debug!(pv = %link.pv_name(), error = %e, "Dropping connect for closed link");
        return;
    }
    if !link.wants_monitor() {
        return;
    }
    if let Err(e) = link.post(value, meta) {
        warn!(pv = %link.pv_name(), error = %e, "Failed to post initial monitor update");
    }
}

impl PvSystem for LocalPvSystem {
    fn is_defined(&self) -> bool {
        self.defined
    }

    fn connect(&self, link: ChannelLink) -> Result<(), PvError> {
        let initial = match self.records.get_mut(link.pv_name()) {
            Some(mut record) => {
                record.links.push(link.clone());
                Some((record.value.clone(), record.meta.clone()))
            }
            None => None,
        };

        match initial {
            Some((value, meta)) => deliver_connect(&link, &value, &meta),
            None => {
                debug!(pv = %link.pv_name(), "Record not defined yet, connection pending");
                self.pending
                    .entry(Arc::from(link.pv_name()))
                    .or_default()
                    .push(link);
            }
        }
        Ok(())
    }

    fn disconnect(&self, link: &ChannelLink) {
        if let Some(mut record) = self.records.get_mut(link.pv_name()) {
            record.links.retain(|l| !l.is_same(link));
        }
        if let Some(mut waiting) = self.pending.get_mut(link.pv_name()) {
            waiting.retain(|l| !l.is_same(link));
        }
    }

    fn put(&self, pv_name: &str, value: &TypedBuffer) -> Result<(), PvError> {
        self.set(pv_name, value.clone())
    }

    fn get(&self, pv_name: &str) -> Result<(TypedBuffer, PvMeta), PvError> {
        self.records
            .get(pv_name)
            .map(|record| (record.value.clone(), record.meta.clone()))
            .ok_or_else(|| PvError::NotFound(pv_name.to_string()))
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_get() {
        let pv = LocalPvSystem::new();
        pv.define("tank:level", TypedBuffer::scalar(1.0f64));

        let (value, meta) = pv.get("tank:level").unwrap();
        assert_eq!(value.get::<f64>(0), Ok(1.0));
        assert!(meta.timestamp.is_some());
    }

    #[test]
    fn test_get_unknown_record() {
        let pv = LocalPvSystem::new();
        assert!(matches!(pv.get("nope"), Err(PvError::NotFound(_))));
        assert!(matches!(
            pv.set("nope", TypedBuffer::scalar(1i32)),
            Err(PvError::NotFound(_))
        ));
    }

    #[test]
    fn test_set_rejects_other_element_type() {
        let pv = LocalPvSystem::new();
        pv.define("pump", TypedBuffer::scalar(0i32));

        let result = pv.set("pump", TypedBuffer::scalar(1.0f64));
        assert!(matches!(result, Err(PvError::Buffer { .. })));
        assert_eq!(pv.value("pump").unwrap().get::<i32>(0), Ok(0));
    }

    #[test]
    fn test_put_updates_record() {
        let pv = LocalPvSystem::new();
        pv.define("pump", TypedBuffer::scalar(0i32));

        pv.put("pump", &TypedBuffer::scalar(1i32)).unwrap();
        assert_eq!(pv.value("pump").unwrap().get::<i32>(0), Ok(1));
    }

    #[test]
    fn test_flush_is_counted() {
        let pv = LocalPvSystem::new();
        pv.flush();
        pv.flush();
        assert_eq!(pv.flush_count(), 2);
    }

    #[test]
    fn test_undefined() {
        assert!(!LocalPvSystem::undefined().is_defined());
        assert!(LocalPvSystem::new().is_defined());
    }
}
