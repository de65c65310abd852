//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "async-opcua backed session and connector."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meterlink_common::OpcUaConfig;
use opcua::client::{ClientBuilder, IdentityToken, Password, Session};
use opcua::crypto::SecurityPolicy;
use opcua::types::{
    BrowseDescription, BrowseDirection, BrowseResult, ByteString, MessageSecurityMode, NodeId,
    ReferenceTypeId, StatusCode, Variant, WriteValue,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::{ChildRef, SessionConnector, SessionError, UaSession};

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Return every field of each reference description.
const BROWSE_RESULT_MASK_ALL: u32 = 0x3f;

/// Opens anonymous or user-name sessions on the `None` security endpoint.
#[derive(Debug, Clone)]
pub struct OpcUaConnector {
    config: OpcUaConfig,
}

impl OpcUaConnector {
    pub fn new(config: OpcUaConfig) -> Self {
        Self { config }
    }

    fn identity(&self) -> IdentityToken {
        match (&self.config.username, &self.config.password) {
            (Some(user), Some(password)) => {
                IdentityToken::UserName(user.clone(), Password::new(password.clone()))
            }
            _ => IdentityToken::Anonymous,
        }
    }

    async fn open(&self) -> Result<OpcUaSession, SessionError> {
        let mut client = ClientBuilder::new()
            .application_name(&self.config.application_name)
            .application_uri(&self.config.application_uri)
            .pki_dir("./pki")
            .session_retry_limit(0)
            .trust_server_certs(false)
            .create_sample_keypair(false)
            .client()
            .map_err(|err| SessionError::Connect(format!("client configuration: {err:?}")))?;

        let url = self.config.server_url.trim();
        let endpoints = client
            .get_server_endpoints_from_url(url)
            .await
            .map_err(|status| {
                SessionError::Connect(format!("endpoint discovery at {url}: {status}"))
            })?;

        let mut endpoint = endpoints
            .into_iter()
            .find(|ep| {
                ep.security_mode == MessageSecurityMode::None
                    && SecurityPolicy::from_uri(ep.security_policy_uri.as_ref())
                        == SecurityPolicy::None
            })
            .ok_or_else(|| {
                SessionError::Connect(format!("{url} offers no endpoint without security"))
            })?;
        // Servers often advertise a host name the client cannot resolve.
        debug!(advertised = %endpoint.endpoint_url, configured = %url, "endpoint selected");
        endpoint.endpoint_url = url.into();

        let (session, event_loop) = client
            .connect_to_endpoint_directly(endpoint, self.identity())
            .map_err(|err| SessionError::Connect(err.to_string()))?;
        let opened = OpcUaSession {
            session,
            event_loop: AbortOnDrop(event_loop.spawn()),
        };

        let connected = tokio::time::timeout(
            self.config.connect_timeout,
            opened.session.wait_for_connection(),
        )
        .await
        .unwrap_or(false);
        if !connected {
            opened.disconnect().await;
            return Err(SessionError::Connect(format!(
                "no session with {url} within {:?}",
                self.config.connect_timeout
            )));
        }
        info!(endpoint = %url, "session activated");
        Ok(opened)
    }
}

#[async_trait]
impl SessionConnector for OpcUaConnector {
    async fn connect(&self) -> Result<Arc<dyn UaSession>, SessionError> {
        let session: Arc<dyn UaSession> = Arc::new(self.open().await?);
        Ok(session)
    }

    fn endpoint(&self) -> &str {
        &self.config.server_url
    }
}

/// Aborts the wrapped task when dropped, including when a pending connect
/// is cancelled before the session is handed out.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    fn abort(&self) {
        self.0.abort();
    }

    fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A live async-opcua session plus the task driving its event loop.
pub struct OpcUaSession {
    session: Arc<Session>,
    event_loop: AbortOnDrop<StatusCode>,
}

impl OpcUaSession {
    fn browse_error(node: &NodeId, reason: impl ToString) -> SessionError {
        SessionError::Browse {
            node: node.to_string(),
            reason: reason.to_string(),
        }
    }

    fn single(node: &NodeId, mut results: Vec<BrowseResult>) -> Result<BrowseResult, SessionError> {
        results
            .pop()
            .ok_or_else(|| Self::browse_error(node, "empty browse response"))
    }
}

#[async_trait]
impl UaSession for OpcUaSession {
    async fn browse_children(&self, node: &NodeId) -> Result<Vec<ChildRef>, SessionError> {
        let description = BrowseDescription {
            node_id: node.clone(),
            browse_direction: BrowseDirection::Forward,
            reference_type_id: ReferenceTypeId::HierarchicalReferences.into(),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: BROWSE_RESULT_MASK_ALL,
        };
        let results = self
            .session
            .browse(&[description], 0, None)
            .await
            .map_err(|status| Self::browse_error(node, status))?;
        let mut result = Self::single(node, results)?;

        let mut children = Vec::new();
        loop {
            if !result.status_code.is_good() {
                return Err(Self::browse_error(node, result.status_code));
            }
            children.extend(result.references.take().unwrap_or_default().into_iter().map(
                |reference| {
                    ChildRef::new(
                        reference.browse_name.name.as_ref(),
                        reference.node_id.node_id,
                    )
                },
            ));
            if result.continuation_point.is_null() {
                break;
            }
            let continuation: ByteString = result.continuation_point.clone();
            let next = self
                .session
                .browse_next(false, &[continuation])
                .await
                .map_err(|status| Self::browse_error(node, status))?;
            result = Self::single(node, next)?;
        }
        debug!(node = %node, children = children.len(), "browsed");
        Ok(children)
    }

    async fn write_double(&self, node: &NodeId, value: f64) -> Result<(), SessionError> {
        let write = WriteValue::value_attr(node.clone(), Variant::Double(value));
        let statuses = self
            .session
            .write(&[write])
            .await
            .map_err(|status| SessionError::Write(status.to_string()))?;
        match statuses.first() {
            Some(status) if status.is_good() => Ok(()),
            Some(status) => Err(SessionError::Write(status.to_string())),
            None => Err(SessionError::Write("empty write response".to_owned())),
        }
    }

    async fn disconnect(&self) {
        self.session.disable_reconnects();
        match tokio::time::timeout(DISCONNECT_TIMEOUT, self.session.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(status)) => debug!(status = %status, "disconnect returned an error"),
            Err(_) => warn!("disconnect timed out"),
        }
        self.event_loop.abort();
    }

    fn is_alive(&self) -> bool {
        !self.event_loop.is_finished()
    }
}
