//! Demo objects: the `demo.Counter` provider served by `objectlink serve`
//! and a channel-backed observer used by the client commands.

use async_trait::async_trait;
use objectlink_wire::{
    Args, ConsumerNode, ObjectObserver, ObjectProvider, Props, ProviderRegistry, Value,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::info;

pub const COUNTER_ID: &str = "demo.Counter";

/// A shared counter with property `count`, methods `increment(step)`,
/// `decrement(step)` and `reset()`, and a `changed` signal.
pub struct DemoCounter {
    count: Mutex<i64>,
    registry: ProviderRegistry,
}

impl DemoCounter {
    pub fn new(registry: ProviderRegistry) -> Arc<Self> {
        Arc::new(Self {
            count: Mutex::new(0),
            registry,
        })
    }

    pub fn count(&self) -> i64 {
        *self.count.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, f: impl FnOnce(i64) -> i64) -> i64 {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count = f(*count);
        *count
    }

    async fn publish(&self, count: i64) {
        let mut props = Props::new();
        props.insert("count".to_string(), json!(count));
        self.registry.notify_property_change(COUNTER_ID, props).await;
        self.registry
            .notify_signal(COUNTER_ID, "changed", vec![json!(count)])
            .await;
    }
}

fn step_arg(args: &[Value]) -> Result<i64, String> {
    match args.first() {
        None => Ok(1),
        Some(v) => v
            .as_i64()
            .ok_or_else(|| format!("step must be an integer, got {v}")),
    }
}

#[async_trait]
impl ObjectProvider for DemoCounter {
    fn object_id(&self) -> &str {
        COUNTER_ID
    }

    async fn invoke(&self, member: &str, args: Args) -> Result<Value, String> {
        let count = match member {
            "increment" => {
                let step = step_arg(&args)?;
                self.update(|c| c.saturating_add(step))
            }
            "decrement" => {
                let step = step_arg(&args)?;
                self.update(|c| c.saturating_sub(step))
            }
            "reset" => self.update(|_| 0),
            other => return Err(format!("unknown method {COUNTER_ID}/{other}")),
        };
        info!(method = member, count, "Counter updated");
        self.publish(count).await;
        Ok(json!(count))
    }

    async fn set_property(&self, member: &str, value: Value) -> Result<(), String> {
        if member != "count" {
            return Err(format!("unknown property {COUNTER_ID}/{member}"));
        }
        let new = value
            .as_i64()
            .ok_or_else(|| format!("count must be an integer, got {value}"))?;
        self.update(|_| new);
        self.registry
            .notify_signal(COUNTER_ID, "changed", vec![json!(new)])
            .await;
        Ok(())
    }

    async fn collect_properties(&self) -> Result<Props, String> {
        let mut props = Props::new();
        props.insert("count".to_string(), json!(self.count()));
        Ok(props)
    }
}

/// Something an observer saw.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    Init(String, Props),
    Change(String, Value),
    Signal(String, Args),
}

/// Forwards every observed event into a channel.
pub struct ChannelObserver {
    object_id: String,
    events: mpsc::UnboundedSender<ObserverEvent>,
}

impl ChannelObserver {
    pub fn new(object_id: &str, events: mpsc::UnboundedSender<ObserverEvent>) -> Arc<Self> {
        Arc::new(Self {
            object_id: object_id.to_string(),
            events,
        })
    }
}

impl ObjectObserver for ChannelObserver {
    fn object_id(&self) -> &str {
        &self.object_id
    }

    fn on_init(&self, object_id: &str, props: Props, _node: &Arc<ConsumerNode>) {
        let _ = self
            .events
            .send(ObserverEvent::Init(object_id.to_string(), props));
    }

    fn on_property_change(&self, symbol_id: &str, value: Value) {
        let _ = self
            .events
            .send(ObserverEvent::Change(symbol_id.to_string(), value));
    }

    fn on_signal(&self, symbol_id: &str, args: Args) {
        let _ = self
            .events
            .send(ObserverEvent::Signal(symbol_id.to_string(), args));
    }

    fn on_release(&self) {}
}
