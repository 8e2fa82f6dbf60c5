//! Mailbox session
//!
//! Maps the high-level mailbox operations (handshake, send, list,
//! retrieve, acknowledge, track) onto transport calls, translating
//! wire-level status fields into typed results. Chunking and transparent
//! compression are handled here via the chunk codec.

use crate::chunk::{self, Chunk};
use crate::config::MailboxConfig;
use crate::error::{MeshboxError, Result};
use crate::inbox::MessageStream;
use crate::message::{
    CountMessagesWire, EndpointLookupWire, EndpointMatch, ListMessagesWire, ListOptions, Message,
    MessagePage, SendMessageWire, SendOptions, TrackingRecord, TrackingWire,
};
use crate::retry::RetryPolicy;
use crate::transport::{self, HttpTransport, Transport, TransportRequest, TransportResponse};
use reqwest::Method;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CONTENT_OCTET_STREAM: &str = "application/octet-stream";

/// A session against one mailbox on one endpoint.
///
/// Holds no cross-operation mutable state beyond the connection pool and
/// credentials; concurrent independent operations on one session are
/// safe. Chunked sends are strictly ordered within a single operation.
pub struct MailboxSession {
    config: MailboxConfig,
    transport: Arc<dyn Transport>,
}

impl MailboxSession {
    /// Open a session over the reqwest-backed transport.
    pub fn connect(config: MailboxConfig) -> Result<Self> {
        config.validate()?;
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config)?);
        Ok(Self { config, transport })
    }

    /// Open a session over a caller-supplied transport. The seam for
    /// tests and for wrapping the transport with custom behavior.
    pub fn with_transport(config: MailboxConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, transport })
    }

    pub fn mailbox_id(&self) -> &str {
        &self.config.mailbox_id
    }

    pub fn config(&self) -> &MailboxConfig {
        &self.config
    }

    fn mailbox_path(&self, suffix: &str) -> String {
        format!("/messageexchange/{}{}", self.config.mailbox_id, suffix)
    }

    async fn request(&self, request: TransportRequest) -> Result<TransportResponse> {
        transport::send(self.transport.as_ref(), &self.config.retry_policy, request).await
    }

    /// Optional compatibility call announcing the client to the service.
    ///
    /// Failure is reported but never invalidates the session: core
    /// operations do not depend on a successful handshake.
    pub async fn handshake(&self) -> Result<()> {
        let request = TransportRequest::new(Method::POST, self.mailbox_path(""));
        match self.request(request).await {
            Ok(_) => {
                debug!(mailbox = %self.config.mailbox_id, "Handshake complete");
                Ok(())
            }
            Err(e) => {
                warn!(mailbox = %self.config.mailbox_id, error = %e, "Handshake failed (non-fatal)");
                Err(e)
            }
        }
    }

    /// Approximate number of messages waiting in the inbox.
    pub async fn count_messages(&self) -> Result<u64> {
        let request = TransportRequest::new(Method::GET, self.mailbox_path("/count"));
        let response = self.request(request).await?;
        let wire: CountMessagesWire = response.json()?;
        Ok(wire.count)
    }

    /// Single-page inbox listing with pagination passthrough.
    ///
    /// The returned page's `continue_from` is the explicit continuation
    /// marker; its absence, not a short page, signals the end of results.
    pub async fn list_messages(&self, options: &ListOptions) -> Result<MessagePage> {
        let mut request = TransportRequest::new(Method::GET, self.mailbox_path("/inbox"));
        if let Some(max_results) = options.max_results {
            request = request.query("max_results", max_results.to_string());
        }
        if let Some(workflow_filter) = &options.workflow_filter {
            request = request.query("workflow_filter", workflow_filter.clone());
        }
        if let Some(continue_from) = &options.continue_from {
            request = request.query("continue_from", continue_from.clone());
        }

        let response = self.request(request).await?;
        let wire: ListMessagesWire = response.json()?;

        let continue_from = match wire.links.and_then(|links| links.next) {
            Some(next) => {
                let token = extract_continue_from(&next);
                if token.is_none() {
                    warn!(next = %next, "Continuation link without continue_from parameter");
                }
                token
            }
            None => None,
        };

        debug!(
            mailbox = %self.config.mailbox_id,
            returned = wire.messages.len(),
            has_more = continue_from.is_some(),
            "Listed inbox page"
        );

        Ok(MessagePage {
            messages: wire.messages,
            continue_from,
            approx_inbox_count: wire.approx_inbox_count,
        })
    }

    /// Lazy iteration over all inbox message ids (and messages),
    /// following continuation markers across pages.
    pub fn stream_inbox(&self, options: ListOptions) -> MessageStream<'_> {
        MessageStream::new(self, options)
    }

    /// Send a message, chunking payloads larger than the configured
    /// threshold. Returns the server-issued message id.
    ///
    /// The initial request is not retried unless `options.retry_initial`
    /// is set; chunk continuation requests retry under the session
    /// policy. A failure after the first chunk was accepted surfaces as
    /// `PartialSend` carrying the message id.
    pub async fn send_message(
        &self,
        recipient: &str,
        payload: &[u8],
        options: &SendOptions,
    ) -> Result<String> {
        let compress = options.compress.unwrap_or(self.config.transparent_compress);
        let chunks = chunk::split(payload, self.config.max_chunk_size, compress)?;
        let total = chunks.len() as u32;
        let correlation_id = Uuid::new_v4().to_string();

        debug!(
            mailbox = %self.config.mailbox_id,
            recipient,
            bytes = payload.len(),
            chunks = total,
            compress,
            "Sending message"
        );

        let mut chunk_iter = chunks.into_iter();
        let first = chunk_iter.next().ok_or_else(|| {
            MeshboxError::Protocol("chunk codec produced no chunks".to_string())
        })?;

        let mut request = TransportRequest::new(Method::POST, self.mailbox_path("/outbox"))
            .header("mex-from", self.config.mailbox_id.clone())
            .header("mex-to", recipient)
            .header("mex-messagetype", "DATA")
            .header("mex-chunk-range", first.range_header())
            .header("x-correlation-id", correlation_id.clone())
            .header("content-type", CONTENT_OCTET_STREAM);
        request = apply_send_headers(request, options);
        if first.gzipped {
            request = request.header("content-encoding", "gzip");
        }
        request = request.body(first.body);

        let initial_policy = if options.retry_initial {
            self.config.retry_policy.clone()
        } else {
            RetryPolicy::none()
        };
        let response =
            transport::send(self.transport.as_ref(), &initial_policy, request).await?;
        let wire: SendMessageWire = response.json()?;
        let message_id = wire.message_id;

        let mut sent: u32 = 1;
        for chunk in chunk_iter {
            self.post_chunk(&message_id, &chunk, &correlation_id)
                .await
                .map_err(|e| MeshboxError::PartialSend {
                    message_id: message_id.clone(),
                    chunks_sent: sent,
                    total_chunks: total,
                    source: Box::new(e),
                })?;
            sent += 1;
        }

        info!(
            mailbox = %self.config.mailbox_id,
            message_id = %message_id,
            chunks = total,
            "Message sent"
        );
        Ok(message_id)
    }

    /// Low-level chunk upload for an already-established message.
    /// Returns the raw transport response; retried under the session
    /// policy.
    pub async fn send_chunk(
        &self,
        message_id: &str,
        chunk: &Chunk,
    ) -> Result<TransportResponse> {
        self.post_chunk(message_id, chunk, &Uuid::new_v4().to_string())
            .await
    }

    async fn post_chunk(
        &self,
        message_id: &str,
        chunk: &Chunk,
        correlation_id: &str,
    ) -> Result<TransportResponse> {
        let path = self.mailbox_path(&format!("/outbox/{}/{}", message_id, chunk.index));
        let mut request = TransportRequest::new(Method::POST, path)
            .header("mex-from", self.config.mailbox_id.clone())
            .header("mex-chunk-range", chunk.range_header())
            .header("x-correlation-id", correlation_id)
            .header("content-type", CONTENT_OCTET_STREAM);
        if chunk.gzipped {
            request = request.header("content-encoding", "gzip");
        }
        request = request.body(chunk.body.clone());

        self.request(request).await
    }

    /// Retrieve a message by id, transparently downloading and
    /// reassembling all chunks.
    pub async fn retrieve_message(&self, message_id: &str) -> Result<Message> {
        let request =
            TransportRequest::new(Method::GET, self.mailbox_path(&format!("/inbox/{message_id}")));
        let mut response = self.request(request).await?;

        let (index, total) = match response.header("mex-chunk-range") {
            Some(value) => chunk::parse_chunk_range(value).ok_or_else(|| {
                MeshboxError::Protocol(format!("unparseable mex-chunk-range: {value:?}"))
            })?,
            None => (1, 1),
        };
        if index != 1 {
            return Err(MeshboxError::Protocol(format!(
                "first retrieval returned chunk {index}, expected 1"
            )));
        }

        let gzipped = is_gzip(&response);
        let mut chunks = Vec::with_capacity(total as usize);
        chunks.push(Chunk {
            index: 1,
            total,
            body: std::mem::take(&mut response.body),
            gzipped,
        });

        for chunk_number in 2..=total {
            let chunk_response = self
                .request(TransportRequest::new(
                    Method::GET,
                    self.mailbox_path(&format!("/inbox/{message_id}/{chunk_number}")),
                ))
                .await?;
            let (got_index, got_total) = match chunk_response.header("mex-chunk-range") {
                Some(value) => chunk::parse_chunk_range(value).ok_or_else(|| {
                    MeshboxError::Protocol(format!("unparseable mex-chunk-range: {value:?}"))
                })?,
                None => (chunk_number, total),
            };
            let chunk_gzipped = is_gzip(&chunk_response);
            chunks.push(Chunk {
                index: got_index,
                total: got_total,
                body: chunk_response.body,
                gzipped: chunk_gzipped,
            });
        }

        let body = chunk::reassemble(&chunks)?;
        debug!(
            mailbox = %self.config.mailbox_id,
            message_id,
            chunks = total,
            bytes = body.len(),
            "Retrieved message"
        );
        Message::from_parts(message_id, response.headers, body)
    }

    /// Mark a message acknowledged. Idempotent at this layer: a repeat
    /// acknowledgement succeeds if the server answers success again, and
    /// a server failure on the repeat is surfaced, not suppressed.
    pub async fn acknowledge_message(&self, message_id: &str) -> Result<()> {
        let request = TransportRequest::new(
            Method::PUT,
            self.mailbox_path(&format!("/inbox/{message_id}/status/acknowledged")),
        );
        self.request(request).await?;
        debug!(mailbox = %self.config.mailbox_id, message_id, "Acknowledged message");
        Ok(())
    }

    /// Delivery status for a sent message, strictly by message id.
    pub async fn track_message(&self, message_id: &str) -> Result<TrackingRecord> {
        let request = TransportRequest::new(Method::GET, self.mailbox_path("/outbox/tracking"))
            .query("message_id", message_id);
        let response = self.request(request).await?;
        let wire: TrackingWire = response.json()?;
        wire.into_record()
    }

    /// Receiving mailboxes registered for an organisation and workflow.
    pub async fn lookup_endpoint(
        &self,
        ods_code: &str,
        workflow_id: &str,
    ) -> Result<Vec<EndpointMatch>> {
        let request = TransportRequest::new(
            Method::GET,
            format!("/messageexchange/endpointlookup/{ods_code}/{workflow_id}"),
        );
        let response = self.request(request).await?;
        let wire: EndpointLookupWire = response.json()?;
        Ok(wire.results)
    }

    /// Scoped message handling: retrieve, run the handler, acknowledge.
    ///
    /// The message is acknowledged only after the handler returns `Ok`;
    /// on error it stays in the inbox for a later attempt. This is the
    /// acknowledge-or-release guarantee for every exit path.
    pub async fn process_message<T, F, Fut>(&self, message_id: &str, handler: F) -> Result<T>
    where
        F: FnOnce(Message) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let message = self.retrieve_message(message_id).await?;
        let value = handler(message).await?;
        self.acknowledge_message(message_id).await?;
        Ok(value)
    }
}

fn is_gzip(response: &TransportResponse) -> bool {
    response
        .header("content-encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"))
}

/// Extract the `continue_from` token from a continuation link.
///
/// The link carries the token URL-encoded; it is decoded here so the
/// query serializer on the next request does not encode it twice.
fn extract_continue_from(next: &str) -> Option<String> {
    let (_, tail) = next.split_once("continue_from=")?;
    let token = tail.split('&').next().unwrap_or(tail);
    if token.is_empty() {
        return None;
    }
    match urlencoding::decode(token) {
        Ok(decoded) => Some(decoded.into_owned()),
        Err(_) => Some(token.to_string()),
    }
}

fn apply_send_headers(
    mut request: TransportRequest,
    options: &SendOptions,
) -> TransportRequest {
    if let Some(workflow_id) = &options.workflow_id {
        request = request.header("mex-workflowid", workflow_id.clone());
    }
    if let Some(subject) = &options.subject {
        request = request.header("mex-subject", subject.clone());
    }
    if let Some(filename) = &options.filename {
        request = request.header("mex-filename", filename.clone());
    }
    if let Some(local_id) = &options.local_id {
        request = request.header("mex-localid", local_id.clone());
    }
    if let Some(checksum) = &options.checksum {
        request = request.header("mex-content-checksum", checksum.clone());
    }
    if options.encrypted {
        request = request.header("mex-content-encrypted", "true");
    }
    if options.pre_compressed {
        request = request.header("mex-content-compressed", "true");
    }
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuation_token_extraction() {
        assert_eq!(
            extract_continue_from("/messageexchange/BOX1/inbox?continue_from=abc123"),
            Some("abc123".to_string())
        );
        assert_eq!(
            extract_continue_from("/inbox?max_results=10&continue_from=tok&x=1"),
            Some("tok".to_string())
        );
        assert_eq!(extract_continue_from("/inbox?max_results=10"), None);
        assert_eq!(extract_continue_from("/inbox?continue_from="), None);
    }

    #[test]
    fn continuation_token_is_percent_decoded_once() {
        // The link encodes the token; the stored form must be the raw
        // token so re-sending it does not double-encode.
        assert_eq!(
            extract_continue_from("/inbox?continue_from=a%2Fb%3D"),
            Some("a/b=".to_string())
        );
        assert_eq!(
            extract_continue_from("/inbox?continue_from=plain-token"),
            Some("plain-token".to_string())
        );
    }

    #[test]
    fn send_headers_are_canonical_lowercase() {
        let options = SendOptions::default()
            .with_workflow_id("WF001")
            .with_subject("results")
            .with_local_id("local-9");
        let request = apply_send_headers(
            TransportRequest::new(Method::POST, "/messageexchange/BOX1/outbox"),
            &options,
        );

        let names: Vec<&str> = request.headers.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"mex-workflowid"));
        assert!(names.contains(&"mex-subject"));
        assert!(names.contains(&"mex-localid"));
        assert!(names.iter().all(|n| n.chars().all(|c| !c.is_uppercase())));
    }
}
