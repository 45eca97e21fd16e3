//! Subcommand implementations.

use crate::demo::{ChannelObserver, DemoCounter, ObserverEvent};
use anyhow::{bail, Context};
use objectlink_wire::{
    connect, Args, ConnectionHub, ConsumerLink, ConsumerRegistry, LinkConfig, ObjectObserver,
    ProviderRegistry, Value,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Host `demo.Counter` until Ctrl+C.
pub async fn cmd_serve(config: LinkConfig) -> anyhow::Result<()> {
    let registry = ProviderRegistry::new();
    registry.add_provider(DemoCounter::new(registry.clone()))?;

    let (hub, accept) = ConnectionHub::start(config, registry)
        .await
        .context("failed to start hub")?;
    if let Some(addr) = hub.local_addr() {
        println!("Serving demo.Counter on {addr} (Ctrl+C to stop)");
    }

    tokio::signal::ctrl_c().await?;
    info!(connections = hub.connection_count(), "Interrupted");
    hub.shutdown();
    let _ = accept.await;
    Ok(())
}

/// Print the property snapshot of `object_id`.
pub async fn cmd_get(config: LinkConfig, object_id: &str) -> anyhow::Result<()> {
    let (link, mut events) = open(&config).await?;
    link.node.link_remote_node(object_id).await?;

    let props = tokio::time::timeout(config.invoke_timeout(), async {
        while let Some(event) = events.recv().await {
            if let ObserverEvent::Init(id, props) = event {
                if id == object_id {
                    return Some(props);
                }
            }
        }
        None
    })
    .await
    .ok()
    .flatten();
    link.close();

    let Some(props) = props else {
        bail!("no snapshot for {object_id}; is it served by this hub?");
    };
    println!("{}", serde_json::to_string_pretty(&props)?);
    Ok(())
}

/// Invoke `symbol_id` and print the result.
pub async fn cmd_invoke(config: LinkConfig, symbol_id: &str, args: Option<&str>) -> anyhow::Result<()> {
    let args = parse_args(args)?;
    let (link, _events) = open(&config).await?;
    info!(symbol_id, args = args.len(), "Invoking");
    let result = link
        .node
        .call(symbol_id, args, config.invoke_timeout())
        .await;
    link.close();
    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

/// Set `symbol_id` to `value` and wait for the provider's acknowledgement.
pub async fn cmd_set(config: LinkConfig, symbol_id: &str, value: &str) -> anyhow::Result<()> {
    let value: Value =
        serde_json::from_str(value).with_context(|| format!("invalid JSON value: {value}"))?;
    let (link, mut events) = open(&config).await?;
    link.node.set_remote_property(symbol_id, value).await?;

    let acked = tokio::time::timeout(config.invoke_timeout(), async {
        while let Some(event) = events.recv().await {
            if let ObserverEvent::Change(id, value) = event {
                if id == symbol_id {
                    return Some(value);
                }
            }
        }
        None
    })
    .await
    .ok()
    .flatten();
    link.close();

    match acked {
        Some(value) => {
            println!("{symbol_id} = {value}");
            Ok(())
        }
        None => bail!("{symbol_id} was not acknowledged; check the hub log"),
    }
}

/// Print every change and signal of `object_id` until Ctrl+C.
pub async fn cmd_watch(config: LinkConfig, object_id: &str) -> anyhow::Result<()> {
    let (link, mut events) = open(&config).await?;
    link.node.link_remote_node(object_id).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(ObserverEvent::Init(id, props)) => {
                    println!("init   {id} {}", Value::Object(props));
                }
                Some(ObserverEvent::Change(symbol, value)) => println!("change {symbol} {value}"),
                Some(ObserverEvent::Signal(symbol, args)) => {
                    println!("signal {symbol} {}", Value::Array(args));
                }
                None => break,
            },
        }
        if link.connection.is_closed() {
            bail!("connection to hub lost");
        }
    }

    let _ = link.node.unlink_remote_node(object_id).await;
    link.close();
    Ok(())
}

/// Dial the hub with a registry that creates a channel observer per object.
async fn open(
    config: &LinkConfig,
) -> anyhow::Result<(ConsumerLink, mpsc::UnboundedReceiver<ObserverEvent>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let registry = ConsumerRegistry::new();
    registry.set_observer_factory(Some(Arc::new(move |object_id: &str| {
        Some(ChannelObserver::new(object_id, tx.clone()) as Arc<dyn ObjectObserver>)
    })));

    let link = connect(config.listen_addr, &registry, config)
        .await
        .with_context(|| format!("cannot reach hub at {}", config.listen_addr))?;
    Ok((link, rx))
}

/// JSON arguments: an array is positional, anything else is one argument.
fn parse_args(raw: Option<&str>) -> anyhow::Result<Args> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let value: Value =
        serde_json::from_str(raw).with_context(|| format!("invalid JSON arguments: {raw}"))?;
    Ok(match value {
        Value::Array(args) => args,
        other => vec![other],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_args() {
        assert_eq!(parse_args(None).unwrap(), Vec::<Value>::new());
        assert_eq!(parse_args(Some("[1, \"a\"]")).unwrap(), vec![json!(1), json!("a")]);
        assert_eq!(parse_args(Some("5")).unwrap(), vec![json!(5)]);
        assert!(parse_args(Some("[1,")).is_err());
    }

    #[tokio::test]
    async fn test_commands_against_local_hub() {
        let registry = ProviderRegistry::new();
        registry
            .add_provider(DemoCounter::new(registry.clone()))
            .unwrap();
        let config = LinkConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            invoke_timeout_ms: 2000,
            ..LinkConfig::default()
        };
        let (hub, _accept) = ConnectionHub::start(config.clone(), registry)
            .await
            .unwrap();
        let config = LinkConfig {
            listen_addr: hub.local_addr().unwrap(),
            ..config
        };

        cmd_invoke(config.clone(), "demo.Counter/increment", Some("3"))
            .await
            .unwrap();
        cmd_set(config.clone(), "demo.Counter/count", "10")
            .await
            .unwrap();
        cmd_get(config.clone(), "demo.Counter").await.unwrap();
        assert!(cmd_invoke(config.clone(), "demo.Counter/explode", None)
            .await
            .is_err());
        assert!(cmd_get(config, "nobody.Home").await.is_err());
        hub.shutdown();
    }
}
