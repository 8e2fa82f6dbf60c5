//! Lazy inbox iteration
//!
//! Pull-based pagination over the listing endpoint. A new page is
//! fetched only when the previous one is drained, and iteration ends
//! only on the explicit absence of a continuation marker; a page
//! returning fewer items than `max_results` does not end the sequence.

use crate::client::MailboxSession;
use crate::error::Result;
use crate::message::{ListOptions, Message};
use std::collections::VecDeque;
use tracing::debug;

/// Lazy, finite stream of inbox message ids.
///
/// Not restartable once exhausted; call `stream_inbox` again for a fresh
/// pass.
pub struct MessageStream<'a> {
    session: &'a MailboxSession,
    options: ListOptions,
    buffer: VecDeque<String>,
    continue_from: Option<String>,
    exhausted: bool,
}

impl<'a> MessageStream<'a> {
    pub(crate) fn new(session: &'a MailboxSession, options: ListOptions) -> Self {
        let continue_from = options.continue_from.clone();
        Self {
            session,
            options,
            buffer: VecDeque::new(),
            continue_from,
            exhausted: false,
        }
    }

    /// Next message id, fetching further pages as needed. `Ok(None)`
    /// means the server reported no further results.
    pub async fn next_id(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(id) = self.buffer.pop_front() {
                return Ok(Some(id));
            }
            if self.exhausted {
                return Ok(None);
            }
            // An empty page with a continuation marker is legal; keep
            // following markers until items arrive or the marker stops.
            self.fetch_page().await?;
        }
    }

    /// Next full message: the id stream plus retrieval and reassembly.
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        match self.next_id().await? {
            Some(id) => Ok(Some(self.session.retrieve_message(&id).await?)),
            None => Ok(None),
        }
    }

    /// Drain the remaining ids into a vector.
    pub async fn collect_ids(mut self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        while let Some(id) = self.next_id().await? {
            ids.push(id);
        }
        Ok(ids)
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let options = ListOptions {
            max_results: self.options.max_results,
            workflow_filter: self.options.workflow_filter.clone(),
            continue_from: self.continue_from.clone(),
        };

        let page = self.session.list_messages(&options).await?;
        debug!(
            items = page.messages.len(),
            has_more = page.continue_from.is_some(),
            "Fetched inbox page"
        );

        self.buffer.extend(page.messages);
        self.continue_from = page.continue_from;
        if self.continue_from.is_none() {
            self.exhausted = true;
        }
        Ok(())
    }
}
