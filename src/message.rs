//! Message model and wire types
//!
//! Status values are a strict enumeration: the v2 protocol serves
//! lower-case values, and anything unrecognized is a protocol error
//! rather than a permissively-matched string.

use crate::error::{MeshboxError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Accepted by the service, awaiting download
    Accepted,
    /// Acknowledged by the recipient
    Acknowledged,
    /// Could not be delivered
    Undeliverable,
    /// Transfer still in progress (intermediate state)
    Uploading,
}

impl Status {
    /// Strict parser for v2 status values (lower-case only).
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "accepted" => Ok(Status::Accepted),
            "acknowledged" => Ok(Status::Acknowledged),
            "undeliverable" => Ok(Status::Undeliverable),
            "uploading" => Ok(Status::Uploading),
            other => Err(MeshboxError::Protocol(format!(
                "unrecognized message status: {other:?}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Accepted => "accepted",
            Status::Acknowledged => "acknowledged",
            Status::Undeliverable => "undeliverable",
            Status::Uploading => "uploading",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional send-time properties, mapped to `mex-*` headers.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub workflow_id: Option<String>,
    pub subject: Option<String>,
    pub filename: Option<String>,
    pub local_id: Option<String>,
    pub checksum: Option<String>,
    /// Payload was encrypted by the caller (passthrough flag)
    pub encrypted: bool,
    /// Payload was compressed by the caller (passthrough flag, distinct
    /// from transparent compression)
    pub pre_compressed: bool,
    /// Per-message override of the client's `transparent_compress` setting
    pub compress: Option<bool>,
    /// Retry the initial send request under the session retry policy.
    /// Off by default: a retried initial send can create a duplicate
    /// message on the server.
    pub retry_initial: bool,
}

impl SendOptions {
    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_local_id(mut self, local_id: impl Into<String>) -> Self {
        self.local_id = Some(local_id.into());
        self
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }

    pub fn with_retry_initial(mut self, retry_initial: bool) -> Self {
        self.retry_initial = retry_initial;
        self
    }
}

/// Pagination and filter parameters for inbox listing.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub max_results: Option<u32>,
    pub workflow_filter: Option<String>,
    pub continue_from: Option<String>,
}

/// One page of inbox listing results.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<String>,
    /// Continuation token for the next page. `None` is the explicit
    /// end-of-results signal; a short page alone is not.
    pub continue_from: Option<String>,
    pub approx_inbox_count: Option<u64>,
}

/// A received message: metadata from response headers plus the fully
/// reassembled payload.
#[derive(Debug, Clone)]
pub struct Message {
    id: String,
    sender: Option<String>,
    recipient: Option<String>,
    workflow_id: Option<String>,
    subject: Option<String>,
    filename: Option<String>,
    local_id: Option<String>,
    status: Option<Status>,
    body: Vec<u8>,
    headers: HashMap<String, String>,
}

/// Legacy header-name aliases honored when reading responses. Outbound
/// requests always use the first (canonical) name.
const WORKFLOW_ID_HEADERS: &[&str] = &["mex-workflowid", "mex-workflow-id"];
const LOCAL_ID_HEADERS: &[&str] = &["mex-localid", "mex-local-id"];
const SUBJECT_HEADERS: &[&str] = &["mex-subject"];
const FILENAME_HEADERS: &[&str] = &["mex-filename"];
const SENDER_HEADERS: &[&str] = &["mex-from"];
const RECIPIENT_HEADERS: &[&str] = &["mex-to"];
const STATUS_HEADERS: &[&str] = &["mex-status"];

fn header_any<'a>(headers: &'a HashMap<String, String>, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| headers.get(*name))
        .map(String::as_str)
}

impl Message {
    /// Build a message from the first-chunk response headers and the
    /// reassembled payload. Header names must already be lower-case.
    pub(crate) fn from_parts(
        id: impl Into<String>,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    ) -> Result<Self> {
        let status = match header_any(&headers, STATUS_HEADERS) {
            Some(value) => Some(Status::parse(value)?),
            None => None,
        };
        Ok(Self {
            id: id.into(),
            sender: header_any(&headers, SENDER_HEADERS).map(String::from),
            recipient: header_any(&headers, RECIPIENT_HEADERS).map(String::from),
            workflow_id: header_any(&headers, WORKFLOW_ID_HEADERS).map(String::from),
            subject: header_any(&headers, SUBJECT_HEADERS).map(String::from),
            filename: header_any(&headers, FILENAME_HEADERS).map(String::from),
            local_id: header_any(&headers, LOCAL_ID_HEADERS).map(String::from),
            status,
            body,
            headers,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    pub fn workflow_id(&self) -> Option<&str> {
        self.workflow_id.as_deref()
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn status(&self) -> Option<Status> {
        self.status
    }

    /// The reassembled payload.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consume the message, returning the payload without copying.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Raw `mex-*` response header lookup (lower-case name, without the
    /// `mex-` prefix).
    pub fn mex_header(&self, name: &str) -> Option<&str> {
        self.headers.get(&format!("mex-{name}")).map(String::as_str)
    }
}

/// Delivery status history for a sent message, queried by message id.
#[derive(Debug, Clone)]
pub struct TrackingRecord {
    pub message_id: String,
    pub status: Status,
    pub workflow_id: Option<String>,
    pub local_id: Option<String>,
    pub recipient: Option<String>,
    pub recipient_name: Option<String>,
    pub upload_timestamp: Option<String>,
    pub status_event: Option<String>,
    pub status_timestamp: Option<String>,
    pub status_description: Option<String>,
}

/// Wire form of the v2 tracking response.
#[derive(Debug, Deserialize)]
pub(crate) struct TrackingWire {
    #[serde(alias = "messageId", alias = "messageID")]
    pub message_id: String,
    pub status: String,
    #[serde(default, alias = "workflowId")]
    pub workflow_id: Option<String>,
    #[serde(default, alias = "localId")]
    pub local_id: Option<String>,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default, alias = "recipientName")]
    pub recipient_name: Option<String>,
    #[serde(default, alias = "uploadTimestamp")]
    pub upload_timestamp: Option<String>,
    #[serde(default, alias = "statusEvent")]
    pub status_event: Option<String>,
    #[serde(default, alias = "statusTimestamp")]
    pub status_timestamp: Option<String>,
    #[serde(default, alias = "statusDescription")]
    pub status_description: Option<String>,
}

impl TrackingWire {
    pub fn into_record(self) -> Result<TrackingRecord> {
        Ok(TrackingRecord {
            status: Status::parse(&self.status)?,
            message_id: self.message_id,
            workflow_id: self.workflow_id,
            local_id: self.local_id,
            recipient: self.recipient,
            recipient_name: self.recipient_name,
            upload_timestamp: self.upload_timestamp,
            status_event: self.status_event,
            status_timestamp: self.status_timestamp,
            status_description: self.status_description,
        })
    }
}

/// Wire form of the v2 inbox listing response.
#[derive(Debug, Deserialize)]
pub(crate) struct ListMessagesWire {
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub links: Option<PageLinks>,
    #[serde(default)]
    pub approx_inbox_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PageLinks {
    #[serde(default)]
    pub next: Option<String>,
}

/// Wire form of the send response. The legacy `messageID` key is
/// accepted as an alias.
#[derive(Debug, Deserialize)]
pub(crate) struct SendMessageWire {
    #[serde(alias = "messageID")]
    pub message_id: String,
}

/// Wire form of the inbox count response.
#[derive(Debug, Deserialize)]
pub(crate) struct CountMessagesWire {
    pub count: u64,
}

/// One receiving mailbox from an endpoint lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointMatch {
    #[serde(alias = "mailboxId", alias = "address")]
    pub mailbox_id: String,
    #[serde(default, alias = "mailboxName", alias = "description")]
    pub mailbox_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EndpointLookupWire {
    #[serde(default)]
    pub results: Vec<EndpointMatch>,
}
