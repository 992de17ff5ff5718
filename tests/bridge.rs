//! Channel bridges against in-process execution contexts.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::json;
use uuid::Uuid;

use httpl_mesh::bridge::envelope::{self, Control, Envelope, ProtocolMessage};
use httpl_mesh::bridge::{ChannelBridge, Endpoint, Lifecycle, LocalContextHost, ScriptRegistry};
use httpl_mesh::config::BridgeConfig;
use httpl_mesh::mediator::{DispatchError, Mediator};
use httpl_mesh::message::{Request, Response};

fn worker(domain: &str, src: &str) -> BridgeConfig {
    BridgeConfig {
        domain: Some(domain.into()),
        ..BridgeConfig::new(src)
    }
}

fn host() -> (LocalContextHost, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let scripts = ScriptRegistry::new();

    let log = seen.clone();
    scripts.register("scripts/echo", move |scope| {
        let log = log.clone();
        scope.log("info", "echo ready");
        scope.serve(move |request: Request| {
            log.lock().unwrap().push(request.target().remainder());
            async move { Response::ok().with_body(request.body) }
        });
        Ok(())
    });
    scripts.register("scripts/slow", |scope| {
        scope.serve(|request: Request| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Response::ok().with_body(request.target().remainder())
        });
        Ok(())
    });
    scripts.register("scripts/silent", |scope| {
        scope.serve(|_| std::future::pending::<Response>());
        Ok(())
    });
    scripts.register("scripts/capabilities", |scope| {
        let fetch = scope.has_capability("fetch");
        let domain = scope.config()["domain"].as_str().unwrap_or_default().to_string();
        scope.serve(move |_| {
            let body = json!({ "fetch": fetch, "domain": domain });
            async move { Response::ok().with_body(body) }
        });
        Ok(())
    });
    scripts.register("scripts/broken", |_| Err("syntax error".to_string()));

    (LocalContextHost::new(scripts), seen)
}

fn mediator_with(bridge: &ChannelBridge) -> Mediator {
    let mediator = Mediator::new("test");
    mediator
        .register(bridge.label(), Arc::new(bridge.clone()))
        .unwrap();
    mediator
}

async fn wait_for(bridge: &ChannelBridge, state: Lifecycle) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while bridge.lifecycle() != state {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("bridge did not reach expected state");
}

#[tokio::test]
async fn requests_before_activation_flush_in_order() {
    let (host, seen) = host();
    let bridge = ChannelBridge::builder(worker("worker.local", "scripts/echo"))
        .spawn(&host)
        .unwrap();
    let mediator = mediator_with(&bridge);

    let paths = ["/one", "/two", "/three"];
    let responses = join_all(paths.iter().map(|path| {
        mediator.dispatch(Request::post(&format!("httpl://worker.local{}", path)).with_body(*path))
    }))
    .await;

    for (response, path) in responses.into_iter().zip(paths) {
        assert_eq!(response.unwrap().body, json!(path));
    }
    assert_eq!(*seen.lock().unwrap(), vec!["/one", "/two", "/three"]);
    assert_eq!(bridge.lifecycle(), Lifecycle::Active);
    assert!(bridge.has_host_privileges());
}

#[tokio::test]
async fn nullified_capabilities_are_gone_before_the_script_runs() {
    let (host, _) = host();
    let config = BridgeConfig {
        nullify: vec!["fetch".into()],
        ..worker("caps.local", "scripts/capabilities")
    };
    let bridge = ChannelBridge::builder(config).spawn(&host).unwrap();

    let response = mediator_with(&bridge)
        .dispatch(Request::get("httpl://caps.local/"))
        .await
        .unwrap();
    assert_eq!(response.body, json!({ "fetch": false, "domain": "caps.local" }));
}

#[tokio::test]
async fn inline_sources_load_by_name() {
    let (host, _) = host();
    let bridge = ChannelBridge::builder(worker("inline.local", "data:application/javascript,scripts/echo"))
        .spawn(&host)
        .unwrap();
    let response = mediator_with(&bridge)
        .dispatch(Request::post("httpl://inline.local/").with_body("hi"))
        .await
        .unwrap();
    assert_eq!(response.body_text(), "hi");
}

#[tokio::test]
async fn terminate_twice_fails_pending_once() {
    let (host, _) = host();
    let bridge = ChannelBridge::builder(worker("silent.local", "scripts/silent"))
        .spawn(&host)
        .unwrap();
    wait_for(&bridge, Lifecycle::Active).await;
    let mediator = mediator_with(&bridge);

    let pending = tokio::spawn({
        let mediator = mediator.clone();
        async move { mediator.dispatch(Request::get("httpl://silent.local/")).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    bridge.terminate();
    bridge.terminate();
    assert!(matches!(pending.await.unwrap(), Err(DispatchError::Terminated)));
    assert_eq!(bridge.lifecycle(), Lifecycle::Terminated);

    let after = mediator.fetch(Request::get("httpl://silent.local/")).await;
    assert_eq!(after.status, 503);
    assert_eq!(after.reason.as_deref(), Some("service unavailable"));
}

#[tokio::test]
async fn failed_script_load_terminates_the_bridge() {
    let (host, _) = host();
    let loaded = Arc::new(Mutex::new(None));
    let bridge = ChannelBridge::builder(worker("broken.local", "scripts/broken"))
        .on_load({
            let loaded = loaded.clone();
            move |payload| *loaded.lock().unwrap() = payload.cloned()
        })
        .spawn(&host)
        .unwrap();
    let mediator = mediator_with(&bridge);

    let response = mediator.fetch(Request::get("httpl://broken.local/")).await;
    assert_eq!(response.status, 503);
    wait_for(&bridge, Lifecycle::Terminated).await;
    assert_eq!(*loaded.lock().unwrap(), Some(json!({ "error": "syntax error" })));
}

#[tokio::test]
async fn unknown_script_terminates_the_bridge() {
    let (host, _) = host();
    let bridge = ChannelBridge::builder(worker("missing.local", "scripts/missing"))
        .spawn(&host)
        .unwrap();
    wait_for(&bridge, Lifecycle::Terminated).await;
}

#[tokio::test]
async fn shared_context_privileges_only_the_first_bridge() {
    let (host, seen) = host();
    let config = BridgeConfig {
        shared: true,
        namespace: Some("echo-pool".into()),
        ..worker("first.local", "scripts/echo")
    };
    let first = ChannelBridge::builder(config.clone()).spawn(&host).unwrap();
    let response = mediator_with(&first)
        .dispatch(Request::post("httpl://first.local/a").with_body("a"))
        .await
        .unwrap();
    assert_eq!(response.body_text(), "a");

    let second = ChannelBridge::builder(BridgeConfig {
        domain: Some("second.local".into()),
        ..config
    })
    .spawn(&host)
    .unwrap();
    let response = mediator_with(&second)
        .dispatch(Request::post("httpl://second.local/b").with_body("b"))
        .await
        .unwrap();
    assert_eq!(response.body_text(), "b");

    assert!(first.has_host_privileges());
    assert!(!second.has_host_privileges());
    assert_eq!(*seen.lock().unwrap(), vec!["/a", "/b"]);
}

#[tokio::test(start_paused = true)]
async fn late_responses_after_timeout_are_discarded() {
    let (host, _) = host();
    let bridge = ChannelBridge::builder(worker("slow.local", "scripts/slow"))
        .spawn(&host)
        .unwrap();
    let mediator = mediator_with(&bridge);

    let timed_out = mediator
        .fetch(Request::get("httpl://slow.local/first").with_timeout(Duration::from_millis(10)))
        .await;
    assert_eq!(timed_out, Response::default());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let response = mediator
        .dispatch(Request::get("httpl://slow.local/second"))
        .await
        .unwrap();
    assert_eq!(response.body_text(), "/second");
    assert_eq!(bridge.lifecycle(), Lifecycle::Active);
}

#[tokio::test]
async fn context_requests_reach_the_server_function() {
    let (ours, mut context) = Endpoint::pair();
    let bridge = ChannelBridge::builder(BridgeConfig::new("remote"))
        .serve(|request: Request| async move {
            Response::ok().with_body(format!("{} {}", request.method, request.target().remainder()))
        })
        .connect(ours)
        .unwrap();

    let ready = envelope::encode(&Control::Ready { body: Default::default() }.into()).unwrap();
    context.tx.send(ready).unwrap();

    let id = Uuid::new_v4();
    let message = ProtocolMessage {
        id,
        method: Some("PUT".into()),
        uri: Some("/settings".into()),
        status: None,
        reason: None,
        headers: Default::default(),
        body: json!(null),
    };
    context.tx.send(envelope::encode(&message.into()).unwrap()).unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(1), context.rx.recv())
        .await
        .unwrap()
        .unwrap();
    match envelope::decode(&reply).unwrap() {
        Envelope::Protocol(message) => {
            assert_eq!(message.id, id);
            assert_eq!(message.into_response().body_text(), "PUT /settings");
        }
        other => panic!("expected response, got {:?}", other),
    }
    assert!(bridge.is_active());
}

#[tokio::test]
async fn malformed_context_messages_are_dropped() {
    let (ours, context) = Endpoint::pair();
    let bridge = ChannelBridge::builder(BridgeConfig::new("logger")).connect(ours).unwrap();
    for raw in [
        r#"{"op":"log","body":["error","something",{"code":1}]}"#,
        r#"{"op":"log","body":"not an array"}"#,
        r#"{"id":"not-a-uuid"}"#,
        r#"{"op":"ready","body":{"hostPrivileges":false}}"#,
    ] {
        context.tx.send(raw.to_string()).unwrap();
    }
    wait_for(&bridge, Lifecycle::Active).await;
}
