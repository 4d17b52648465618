//! Wire messages exchanged between a node and a service directory, and the
//! length-prefixed framing they travel over.
//!
//! The underlying transport in the original system is a socket library with
//! REQ/REP, PUB/SUB and XPUB/XSUB patterns; this crate treats that transport
//! as out of scope and instead realizes the same frame shapes directly on
//! `tokio`'s TCP streams, using a 4-byte big-endian length prefix around a
//! `serde_json`-encoded body (see [`crate::transport`]).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which kind of thing a registration/lookup concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationKind {
    Data,
    Service,
}

/// Whether a directory mutation added or removed a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Add,
    Remove,
}

/// Return code carried on `ServiceDirectoryResponse`. Distinct from
/// [`crate::error::GravityReturnCode`], which is the facade-level code
/// returned to an application; this is the wire-level code the directory
/// itself emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DirectoryReturnCode {
    Success,
    RegistrationConflict,
    /// Defined for wire compatibility; this directory never emits it — a
    /// duplicate registration of the same (id, url) is reported `Success`.
    /// See DESIGN.md.
    DuplicateRegistration,
    NotRegistered,
}

/// A change to one product's location list, attached to a domain-details
/// snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductChange {
    pub product_id: String,
    pub url: String,
    pub component_id: String,
    pub change_type: ChangeType,
    pub registration_type: RegistrationKind,
}

/// Full snapshot of one domain's registrations, optionally annotated with
/// the change that produced this snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDirectoryMap {
    pub domain: String,
    pub service_providers: Vec<(String, String)>,
    pub data_providers: Vec<(String, Vec<String>)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<ProductChange>,
}

/// Top-level wire message kind exchanged over a directory REQ/REP round trip
/// or a domain-details publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DirectoryMessage {
    ComponentLookupRequest {
        lookup_id: String,
        kind: RegistrationKind,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        domain: Option<String>,
    },
    ComponentDataLookupResponse {
        lookup_id: String,
        domain: String,
        urls: Vec<String>,
    },
    ComponentServiceLookupResponse {
        lookup_id: String,
        domain: String,
        url: Option<String>,
    },
    ServiceDirectoryRegistration {
        id: String,
        url: String,
        kind: RegistrationKind,
        component_id: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        domain: Option<String>,
    },
    ServiceDirectoryUnregistration {
        id: String,
        url: String,
        kind: RegistrationKind,
    },
    ServiceDirectoryResponse {
        id: String,
        return_code: DirectoryReturnCode,
    },
    ServiceDirectoryDomainDetails(ServiceDirectoryMap),
    GetDomainRequest,
    GetDomainResponse {
        domain: String,
    },
    GetProvidersRequest,
    GetProvidersResponse {
        domains: Vec<ServiceDirectoryMap>,
    },
}

impl fmt::Display for DirectoryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ComponentLookupRequest { lookup_id, .. } => {
                write!(f, "ComponentLookupRequest({lookup_id})")
            }
            Self::ComponentDataLookupResponse { lookup_id, .. } => {
                write!(f, "ComponentDataLookupResponse({lookup_id})")
            }
            Self::ComponentServiceLookupResponse { lookup_id, .. } => {
                write!(f, "ComponentServiceLookupResponse({lookup_id})")
            }
            Self::ServiceDirectoryRegistration { id, .. } => {
                write!(f, "ServiceDirectoryRegistration({id})")
            }
            Self::ServiceDirectoryUnregistration { id, .. } => {
                write!(f, "ServiceDirectoryUnregistration({id})")
            }
            Self::ServiceDirectoryResponse { id, return_code } => {
                write!(f, "ServiceDirectoryResponse({id}, {return_code:?})")
            }
            Self::ServiceDirectoryDomainDetails(map) => {
                write!(f, "ServiceDirectoryDomainDetails({})", map.domain)
            }
            Self::GetDomainRequest => write!(f, "GetDomainRequest"),
            Self::GetDomainResponse { domain } => write!(f, "GetDomainResponse({domain})"),
            Self::GetProvidersRequest => write!(f, "DirectoryService:GetProviders"),
            Self::GetProvidersResponse { .. } => write!(f, "GetProvidersResponse"),
        }
    }
}

/// A data product envelope: a named, timestamped binary payload.
///
/// This is what travels as frame 2 of a publish, and as the single-frame
/// payload of a service request/reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataProduct {
    pub data_product_id: String,
    /// Microseconds since the Unix epoch, stamped by `publish`.
    pub timestamp_micros: u64,
    pub body: Vec<u8>,
}

impl DataProduct {
    pub fn new(data_product_id: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            data_product_id: data_product_id.into(),
            timestamp_micros: current_micros(),
            body,
        }
    }
}

pub(crate) fn current_micros() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_request_round_trips() {
        let msg = DirectoryMessage::ComponentLookupRequest {
            lookup_id: "tick".into(),
            kind: RegistrationKind::Data,
            domain: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: DirectoryMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn registration_round_trips_with_domain() {
        let msg = DirectoryMessage::ServiceDirectoryRegistration {
            id: "x".into(),
            url: "tcp://127.0.0.1:6000".into(),
            kind: RegistrationKind::Data,
            component_id: "node-a".into(),
            domain: Some("Lab1".into()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: DirectoryMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn data_product_serializes_body_as_bytes() {
        let dp = DataProduct::new("tick", vec![1, 2, 3]);
        let json = serde_json::to_vec(&dp).unwrap();
        let back: DataProduct = serde_json::from_slice(&json).unwrap();
        assert_eq!(dp, back);
    }
}
