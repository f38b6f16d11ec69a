//! One control-plane connection (spec §6): handles both node and client
//! traffic over the same upgraded socket, following the teacher's
//! split-sender/forwarding-task shape
//! (`dchrnv-neurograph-os-mvp/src/core_rust/src/api/websocket.rs`).

use crate::core::AppState;
use crate::messages::{InboundMessage, OutboundMessage};
use autarch_nodes::auth;
use autarch_tools::ToolFault;
use autarch_types::{ErrorKind, EventType, TypeFilter};
use axum::extract::ws::{Message, WebSocket};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub async fn handle_socket(socket: WebSocket, state: AppState, peer_addr: SocketAddr) {
    let core = state.core;
    let orchestrator = state.orchestrator;
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut node_id: Option<String> = None;
    let mut subscriptions: HashMap<String, (autarch_broker::SubscriptionHandle, tokio::task::JoinHandle<()>)> =
        HashMap::new();

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let parsed: Result<InboundMessage, _> = serde_json::from_str(&text);
                match parsed {
                    Ok(inbound) => {
                        if !handle_message(
                            inbound,
                            &core,
                            &orchestrator,
                            &tx,
                            peer_addr,
                            &mut node_id,
                            &mut subscriptions,
                        )
                        .await
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        send(&tx, OutboundMessage::Error {
                            kind: ErrorKind::ProtocolError,
                            message: format!("malformed frame: {e}"),
                        });
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    for (_, (handle, task)) in subscriptions {
        let _ = core.broker.unsubscribe(&handle);
        task.abort();
    }

    if let Some(id) = node_id {
        core.nodes.disconnect(&id);
        core.node_senders.remove(&id);
        core.broker.publish(
            EventType::NodeDisconnected,
            serde_json::json!({ "node_id": id }),
            EventType::NodeDisconnected.default_priority(),
        );
        info!(node_id = %id, "node connection closed");
    }

    send_task.abort();
}

fn send(tx: &mpsc::UnboundedSender<String>, message: OutboundMessage) {
    if let Ok(text) = serde_json::to_string(&message) {
        let _ = tx.send(text);
    }
}

/// Returns `false` when the connection should be torn down (e.g. after an
/// `AuthFailed` rejection, per spec §7).
async fn handle_message(
    inbound: InboundMessage,
    core: &std::sync::Arc<crate::core::Core>,
    orchestrator: &std::sync::Arc<autarch_orchestrator::Orchestrator>,
    tx: &mpsc::UnboundedSender<String>,
    peer_addr: SocketAddr,
    node_id: &mut Option<String>,
    subscriptions: &mut HashMap<String, (autarch_broker::SubscriptionHandle, tokio::task::JoinHandle<()>)>,
) -> bool {
    match inbound {
        InboundMessage::Register {
            node_type,
            resources,
            capabilities,
            nonce,
            timestamp,
            signature,
        } => {
            let peer_ip = peer_addr.ip();
            if !core.registration_limiter.is_allowed(peer_ip) {
                warn!(%peer_ip, "registration rejected: peer is rate-limited");
                send(tx, OutboundMessage::Error {
                    kind: ErrorKind::AuthFailed,
                    message: "too many failed registration attempts; try again later".to_string(),
                });
                return false;
            }

            let signature_bytes = match base64::engine::general_purpose::STANDARD.decode(&signature) {
                Ok(b) => b,
                Err(_) => {
                    send(tx, OutboundMessage::Error {
                        kind: ErrorKind::ProtocolError,
                        message: "signature is not valid base64".to_string(),
                    });
                    return true;
                }
            };
            let payload = serde_json::json!({
                "node_type": node_type,
                "resources": resources,
                "capabilities": capabilities,
            });
            let authenticated = auth::authenticate(
                &core.registration_secret,
                &core.replay_guard,
                &payload,
                &nonce,
                timestamp,
                &signature_bytes,
            );
            if !authenticated {
                core.registration_limiter.record_failure(peer_ip);
                warn!(node_type = %node_type, %peer_ip, "node registration rejected");
                send(tx, OutboundMessage::Error {
                    kind: ErrorKind::AuthFailed,
                    message: "invalid signature or replayed nonce".to_string(),
                });
                return false;
            }
            core.registration_limiter.record_success(peer_ip);

            let assigned = core.nodes.register(node_type, capabilities, resources);
            *node_id = Some(assigned.clone());
            core.node_senders.insert(assigned.clone(), tx.clone());
            send(tx, OutboundMessage::Registered { node_id: assigned });
            true
        }

        InboundMessage::Heartbeat {
            node_id: hb_node_id,
            resources,
            signature,
        } => {
            let signature_bytes = match base64::engine::general_purpose::STANDARD.decode(&signature) {
                Ok(b) => b,
                Err(_) => {
                    send(tx, OutboundMessage::Error {
                        kind: ErrorKind::ProtocolError,
                        message: "signature is not valid base64".to_string(),
                    });
                    return true;
                }
            };
            if !auth::verify_heartbeat(&core.registration_secret, &hb_node_id, &resources, &signature_bytes) {
                send(tx, OutboundMessage::Error {
                    kind: ErrorKind::AuthFailed,
                    message: "invalid heartbeat signature".to_string(),
                });
                return false;
            }
            let was_new = core
                .nodes
                .get(&hb_node_id)
                .map(|n| n.status != autarch_types::NodeStatus::Healthy)
                .unwrap_or(false);
            if core.nodes.heartbeat(&hb_node_id, resources).is_ok() && was_new {
                core.broker.publish(
                    EventType::NodeRegistered,
                    serde_json::json!({ "node_id": hb_node_id }),
                    EventType::NodeRegistered.default_priority(),
                );
            }
            true
        }

        InboundMessage::Intent { intent } => {
            match orchestrator.handle_intent(&intent).await {
                Ok(result) => send(tx, OutboundMessage::IntentResult { result }),
                Err(wire_error) => send(tx, OutboundMessage::Error {
                    kind: wire_error.kind,
                    message: wire_error.message,
                }),
            }
            true
        }

        InboundMessage::Result {
            task_id,
            ok,
            data,
            error,
            ..
        } => {
            if let Some((_, pending)) = core.pending_results.remove(&task_id) {
                let outcome = if ok {
                    Ok(data.unwrap_or(serde_json::Value::Null))
                } else {
                    let kind = error
                        .as_ref()
                        .and_then(|e| e.get("kind"))
                        .and_then(|k| serde_json::from_value::<ErrorKind>(k.clone()).ok())
                        .unwrap_or(ErrorKind::RemoteCrashed);
                    let message = error
                        .as_ref()
                        .and_then(|e| e.get("message"))
                        .and_then(|m| m.as_str())
                        .unwrap_or("remote task failed")
                        .to_string();
                    Err(ToolFault::new(kind, message))
                };
                let _ = pending.send(outcome);
            }
            true
        }

        InboundMessage::SubscribeEvents { client_id, event_type } => {
            let filter = match TypeFilter::parse(&event_type) {
                Some(f) => f,
                None => {
                    send(tx, OutboundMessage::Error {
                        kind: ErrorKind::ProtocolError,
                        message: format!("unknown event_type '{event_type}'"),
                    });
                    return true;
                }
            };
            let handle = core.broker.subscribe(client_id.clone(), filter);
            let subscriber = core.broker.subscriber(&handle).expect("just subscribed");
            let pump_tx = tx.clone();
            let task = tokio::spawn(async move {
                loop {
                    let event = subscriber.recv().await;
                    if let Ok(text) = serde_json::to_string(&OutboundMessage::Event { event }) {
                        if pump_tx.send(text).is_err() {
                            break;
                        }
                    }
                }
            });
            subscriptions.insert(client_id, (handle, task));
            true
        }

        InboundMessage::UnsubscribeEvents { client_id } => {
            if let Some((handle, task)) = subscriptions.remove(&client_id) {
                let _ = core.broker.unsubscribe(&handle);
                task.abort();
            }
            true
        }
    }
}
