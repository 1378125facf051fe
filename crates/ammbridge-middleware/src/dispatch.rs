//! [`DispatchTable`] – one handler per [`RecordKind`].
//!
//! Callers register a closure per kind they care about, then call
//! [`DispatchTable::spawn`] to attach one pump task per registered kind to a
//! [`BusParticipant`].  Each pump awaits its lane and invokes the handler for
//! every foreign event, so handlers for different kinds run concurrently on
//! the runtime's worker threads.

use std::collections::BTreeMap;
use std::sync::Arc;

use ammbridge_types::{BridgeError, Record, RecordKind};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::bus::BusParticipant;

/// A record handler. Must be cheap and non-blocking; it runs on a runtime
/// worker thread.
pub type Handler = Arc<dyn Fn(Record) + Send + Sync>;

/// Table mapping each [`RecordKind`] to at most one [`Handler`].
#[derive(Default, Clone)]
pub struct DispatchTable {
    handlers: BTreeMap<RecordKind, Handler>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`.  A previously registered handler for the
    /// same kind is replaced.
    pub fn register<F>(&mut self, kind: RecordKind, handler: F)
    where
        F: Fn(Record) + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
    }

    /// Kinds that currently have a handler, in a stable order.
    pub fn kinds(&self) -> Vec<RecordKind> {
        self.handlers.keys().copied().collect()
    }

    /// Invoke the handler registered for `record`'s kind.
    ///
    /// Returns `false` when no handler is registered for that kind.
    pub fn dispatch(&self, record: Record) -> bool {
        match self.handlers.get(&record.kind()) {
            Some(handler) => {
                handler(record);
                true
            }
            None => false,
        }
    }

    /// Subscribe `participant` to every registered kind and spawn one pump
    /// task per kind on `runtime`.
    ///
    /// Subscriptions are created before this call returns, so no event
    /// published afterwards is missed.
    pub fn spawn(
        &self,
        participant: &BusParticipant,
        runtime: &Handle,
    ) -> Result<Vec<JoinHandle<()>>, BridgeError> {
        let mut tasks = Vec::with_capacity(self.handlers.len());
        for (kind, handler) in &self.handlers {
            let mut subscription = participant.subscribe(*kind)?;
            let handler = Arc::clone(handler);
            tasks.push(runtime.spawn(async move {
                while let Some(event) = subscription.recv().await {
                    handler(event.payload);
                }
                debug!(kind = ?subscription.kind(), "bus lane closed; pump exiting");
            }));
        }
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EventBus, MessageBus};
    use ammbridge_types::{Command, PhysiologyValue};
    use std::sync::Mutex;

    #[test]
    fn dispatch_calls_matching_handler_only() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut table = DispatchTable::new();
        let sink = Arc::clone(&seen);
        table.register(RecordKind::Command, move |record| {
            sink.lock().unwrap().push(record);
        });

        assert!(table.dispatch(Record::Command(Command {
            message: "START_SIM".into()
        })));
        assert!(!table.dispatch(Record::PhysiologyValue(PhysiologyValue {
            name: "HR".into(),
            value: 1.0
        })));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn register_replaces_existing_handler() {
        let hits = Arc::new(Mutex::new(Vec::<&'static str>::new()));
        let mut table = DispatchTable::new();
        let first = Arc::clone(&hits);
        table.register(RecordKind::Command, move |_| first.lock().unwrap().push("first"));
        let second = Arc::clone(&hits);
        table.register(RecordKind::Command, move |_| second.lock().unwrap().push("second"));

        table.dispatch(Record::Command(Command {
            message: "x".into(),
        }));
        assert_eq!(*hits.lock().unwrap(), vec!["second"]);
        assert_eq!(table.kinds(), vec![RecordKind::Command]);
    }

    #[tokio::test]
    async fn spawned_pumps_deliver_foreign_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = Arc::new(EventBus::default());
        let bridge = BusParticipant::new(Arc::clone(&bus), "bridge");
        let engine = BusParticipant::new(Arc::clone(&bus), "engine");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut table = DispatchTable::new();
        table.register(RecordKind::PhysiologyValue, move |record| {
            let _ = tx.send(record);
        });
        let _tasks = table.spawn(&bridge, &Handle::current())?;

        engine.write(Record::PhysiologyValue(PhysiologyValue {
            name: "Cardiovascular_HeartRate".into(),
            value: 80.0,
        }))?;

        let record = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await?
            .ok_or("handler channel closed")?;
        assert_eq!(record.kind(), RecordKind::PhysiologyValue);
        Ok(())
    }
}
