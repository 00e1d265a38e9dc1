//! Side-effect bus and its background workers.
//!
//! Exchange handlers publish a [`SideEffect`] once their synchronous work
//! is done and never wait for its consumers. Two workers subscribe:
//!
//! - the audit worker writes every effect to the exchange event log and
//!   forwards confirmed agreements to the clearing house, if one is
//!   configured;
//! - the subscriber worker posts updated resources to the locations
//!   registered for them.
//!
//! The bus is bounded. A worker that falls behind loses the oldest
//! effects; the loss is logged and the worker carries on.

use dsc_message::MessageKind;
use dsc_negotiation::{subscriptions_for, Subscription};
use dsc_observe::EventPayload;
use dsc_types::{Claims, ContractAgreement, RejectionReason, ResourceDescription};
use futures_util::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{record_event, AppState};

/// Something that happened during an exchange and is handled off the
/// request path.
#[derive(Debug, Clone)]
pub enum SideEffect {
    /// An agreement was stored unconfirmed.
    AgreementPersisted { agreement: ContractAgreement },
    /// An agreement was confirmed by both parties.
    AgreementConfirmed {
        agreement: ContractAgreement,
        /// Verified claims of the peer whose message completed the
        /// confirmation. `None` when this connector initiated the
        /// negotiation and the confirmation came back as an acknowledgement.
        requester: Option<Claims>,
    },
    ArtifactsLinked { agreement: String, linked: usize },
    ArtifactDelivered {
        artifact: String,
        agreement: String,
        consumer: String,
        byte_size: usize,
    },
    /// An inbound exchange was answered with a rejection.
    ExchangeRejected {
        /// Id of the rejection message.
        message_id: String,
        /// Kind of the rejected message, if its header could be decoded.
        message_kind: Option<MessageKind>,
        reason: RejectionReason,
        issuer_connector: Option<String>,
    },
    /// The local copy of a remote resource was updated.
    ResourceUpdated {
        local_uri: String,
        resource: ResourceDescription,
        issuer_connector: String,
    },
}

impl SideEffect {
    /// Short name used in log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AgreementPersisted { .. } => "agreement_persisted",
            Self::AgreementConfirmed { .. } => "agreement_confirmed",
            Self::ArtifactsLinked { .. } => "artifacts_linked",
            Self::ArtifactDelivered { .. } => "artifact_delivered",
            Self::ExchangeRejected { .. } => "exchange_rejected",
            Self::ResourceUpdated { .. } => "resource_updated",
        }
    }

    /// The event log entry for this effect: entity id and payload.
    pub fn to_event(&self) -> (String, EventPayload) {
        match self {
            Self::AgreementPersisted { agreement } => (
                agreement.id.clone(),
                EventPayload::AgreementPersisted {
                    agreement: agreement.id.clone(),
                    consumer: agreement.consumer.clone(),
                    provider: agreement.provider.clone(),
                },
            ),
            Self::AgreementConfirmed {
                agreement,
                requester,
            } => (
                agreement.id.clone(),
                EventPayload::AgreementConfirmed {
                    agreement: agreement.id.clone(),
                    consumer: agreement.consumer.clone(),
                    provider: agreement.provider.clone(),
                    issuer_connector: requester.as_ref().map(|c| c.issuer_connector.clone()),
                },
            ),
            Self::ArtifactsLinked { agreement, linked } => (
                agreement.clone(),
                EventPayload::ArtifactsLinked {
                    agreement: agreement.clone(),
                    linked: *linked,
                },
            ),
            Self::ArtifactDelivered {
                artifact,
                agreement,
                consumer,
                byte_size,
            } => (
                artifact.clone(),
                EventPayload::ArtifactDelivered {
                    artifact: artifact.clone(),
                    agreement: agreement.clone(),
                    consumer: consumer.clone(),
                    byte_size: *byte_size,
                },
            ),
            Self::ExchangeRejected {
                message_id,
                message_kind,
                reason,
                issuer_connector,
            } => (
                message_id.clone(),
                EventPayload::ExchangeRejected {
                    message_kind: message_kind
                        .map(|k| k.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                    reason: reason.as_str().to_string(),
                    issuer_connector: issuer_connector.clone(),
                },
            ),
            Self::ResourceUpdated {
                local_uri,
                issuer_connector,
                ..
            } => (
                local_uri.clone(),
                EventPayload::ResourceUpdated {
                    resource: local_uri.clone(),
                    issuer_connector: issuer_connector.clone(),
                },
            ),
        }
    }
}

/// Subscribes both workers to the bus and starts them.
///
/// Subscriptions are taken before this returns, so effects published
/// afterwards are never missed.
///
/// # Errors
///
/// Returns the `reqwest::Error` if the workers' HTTP client cannot be set
/// up; no worker is started then.
pub fn spawn_workers(state: Arc<AppState>) -> Result<(), reqwest::Error> {
    let client = reqwest::Client::builder()
        .timeout(state.outbound_timeout)
        .build()?;

    let audit_rx = state.bus.subscribe();
    let subscriber_rx = state.bus.subscribe();
    tokio::spawn(run_audit_worker(state.clone(), client.clone(), audit_rx));
    tokio::spawn(run_subscriber_worker(state, client, subscriber_rx));
    Ok(())
}

/// Receives the next effect, skipping over lost ones. `None` once the bus
/// is closed.
async fn next_effect(rx: &mut broadcast::Receiver<SideEffect>, worker: &str) -> Option<SideEffect> {
    loop {
        match rx.recv().await {
            Ok(effect) => return Some(effect),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(worker, skipped, "side-effect worker fell behind, effects dropped");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

/// Writes every effect to the event log.
pub async fn run_audit_worker(
    state: Arc<AppState>,
    client: reqwest::Client,
    mut rx: broadcast::Receiver<SideEffect>,
) {
    tracing::info!("audit worker started");

    while let Some(effect) = next_effect(&mut rx, "audit").await {
        let (entity_id, payload) = effect.to_event();
        let pool = state.pool.clone();
        let connector_id = state.connector_id().to_string();

        let res = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| e.to_string())?;
            record_event(&conn, &connector_id, &entity_id, &payload);
            Ok::<(), String>(())
        })
        .await;

        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("audit worker could not reach the database: {}", e),
            Err(e) => tracing::error!("audit worker join error: {}", e),
        }

        if let (
            SideEffect::AgreementConfirmed {
                agreement,
                requester,
            },
            Some(url),
        ) = (&effect, state.profile.clearing_house_url.as_deref())
        {
            forward_to_clearing_house(&client, url, agreement, requester.as_ref());
        }
    }

    tracing::info!("audit worker stopped");
}

/// Posts a confirmed agreement to the clearing house without waiting for
/// the answer.
fn forward_to_clearing_house(
    client: &reqwest::Client,
    url: &str,
    agreement: &ContractAgreement,
    requester: Option<&Claims>,
) {
    let client = client.clone();
    let url = url.to_string();
    let agreement_id = agreement.id.clone();
    let body = clearing_house_body(agreement, requester);

    tokio::spawn(async move {
        match client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(agreement = %agreement_id, "agreement logged at clearing house");
            }
            Ok(resp) => tracing::warn!(
                agreement = %agreement_id,
                status = %resp.status(),
                "clearing house refused agreement"
            ),
            Err(e) => tracing::warn!(
                agreement = %agreement_id,
                "failed to reach clearing house: {}",
                e
            ),
        }
    });
}

/// Clearing-house record for a confirmed agreement. `claims` is null for
/// agreements this connector negotiated itself.
fn clearing_house_body(agreement: &ContractAgreement, requester: Option<&Claims>) -> serde_json::Value {
    json!({ "agreement": agreement, "claims": requester })
}

/// Posts updated resources to their subscribers.
pub async fn run_subscriber_worker(
    state: Arc<AppState>,
    client: reqwest::Client,
    mut rx: broadcast::Receiver<SideEffect>,
) {
    tracing::info!("subscriber worker started");

    while let Some(effect) = next_effect(&mut rx, "subscribers").await {
        let SideEffect::ResourceUpdated {
            local_uri,
            resource,
            ..
        } = effect
        else {
            continue;
        };

        let subscriptions = match load_subscriptions(&state, &local_uri, &resource.id).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(resource = %local_uri, "failed to load subscriptions: {}", e);
                continue;
            }
        };
        if subscriptions.is_empty() {
            continue;
        }

        let (delivered, failed) =
            notify_subscribers(&client, &subscriptions, &resource, state.outbound_timeout).await;
        tracing::info!(resource = %local_uri, delivered, failed, "subscribers notified");

        let pool = state.pool.clone();
        let connector_id = state.connector_id().to_string();
        let payload = EventPayload::SubscribersNotified {
            resource: local_uri.clone(),
            delivered,
            failed,
        };
        let res = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| e.to_string())?;
            record_event(&conn, &connector_id, &local_uri, &payload);
            Ok::<(), String>(())
        })
        .await;
        if let Err(e) = res.map_err(|e| e.to_string()).and_then(|r| r) {
            tracing::error!("subscriber worker could not record notification: {}", e);
        }
    }

    tracing::info!("subscriber worker stopped");
}

/// Subscriptions registered under the local URI or the remote id of a
/// resource.
async fn load_subscriptions(
    state: &AppState,
    local_uri: &str,
    remote_id: &str,
) -> Result<Vec<Subscription>, String> {
    let pool = state.pool.clone();
    let local_uri = local_uri.to_string();
    let remote_id = remote_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let mut all = subscriptions_for(&conn, &local_uri).map_err(|e| e.to_string())?;
        for s in subscriptions_for(&conn, &remote_id).map_err(|e| e.to_string())? {
            if !all.iter().any(|known| known.location == s.location) {
                all.push(s);
            }
        }
        Ok(all)
    })
    .await
    .map_err(|e| format!("task join error: {}", e))?
}

/// Posts `resource` to every subscription. Returns delivered and failed
/// counts.
async fn notify_subscribers(
    client: &reqwest::Client,
    subscriptions: &[Subscription],
    resource: &ResourceDescription,
    timeout: Duration,
) -> (usize, usize) {
    let posts = subscriptions.iter().map(|s| async move {
        let result = client
            .post(&s.location)
            .timeout(timeout)
            .json(resource)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match result {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(location = %s.location, subscriber = %s.subscriber, "subscriber notification failed: {}", e);
                false
            }
        }
    });

    let outcomes = join_all(posts).await;
    let delivered = outcomes.iter().filter(|ok| **ok).count();
    (delivered, outcomes.len() - delivered)
}
