use std::net::IpAddr;
use std::sync::Arc;

use tracing::warn;

use crate::decode::TransportSegment;
use crate::dns::DnsMessage;
use crate::store::{EndpointKind, EndpointRow, EndpointStore, StoreError};

/// The transport 4-tuple normalized into (server, client) roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointRoles {
    pub server_ip: IpAddr,
    pub server_port: u16,
    pub client_ip: IpAddr,
    pub client_port: u16,
}

impl EndpointRoles {
    /// Derive roles from the segment direction and the QR bit: an answer
    /// travels server → client, a question client → server.
    pub fn from_segment(segment: &TransportSegment, message: &DnsMessage) -> Self {
        if message.is_answer() {
            EndpointRoles {
                server_ip: segment.src_ip,
                server_port: segment.src_port,
                client_ip: segment.dst_ip,
                client_port: segment.dst_port,
            }
        } else {
            EndpointRoles {
                server_ip: segment.dst_ip,
                server_port: segment.dst_port,
                client_ip: segment.src_ip,
                client_port: segment.src_port,
            }
        }
    }
}

/// Looks up or creates the persisted rows for both roles of an event.
pub struct EndpointResolver {
    store: Arc<dyn EndpointStore>,
}

impl EndpointResolver {
    pub fn new(store: Arc<dyn EndpointStore>) -> Self {
        EndpointResolver { store }
    }

    /// Find-or-create the server and client rows for an event.
    ///
    /// A store failure is retried once; a second failure bubbles up and the
    /// caller drops the event. Ports are never persisted here.
    pub fn resolve(&self, roles: &EndpointRoles) -> Result<(EndpointRow, EndpointRow), StoreError> {
        let server = self.find_or_create_with_retry(EndpointKind::Server, roles.server_ip)?;
        let client = self.find_or_create_with_retry(EndpointKind::Client, roles.client_ip)?;
        Ok((server, client))
    }

    fn find_or_create_with_retry(
        &self,
        kind: EndpointKind,
        ip: IpAddr,
    ) -> Result<EndpointRow, StoreError> {
        match self.store.find_or_create(kind, ip) {
            Ok(row) => Ok(row),
            Err(first) => {
                warn!("endpoint find-or-create failed for {ip}: {first}; retrying once");
                self.store.find_or_create(kind, ip)
            }
        }
    }
}
