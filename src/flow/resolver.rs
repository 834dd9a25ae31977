//! Picks the confirmation message for a completed payment from the flow.
//!
//! Resolution order:
//! 1. `success_screen_id` stored with the transaction
//! 2. an inline message carried in `remarketing_success_data`
//! 3. the `webhook` target of the screen the charge was created from
//! 4. [`DEFAULT_CONFIRMATION`]
//!
//! A candidate only counts if it has non-blank text. The last step cannot fail.

use crate::database::models::Transaction;
use crate::flow::document::{Button, FlowDocument, ScreenNode};
use crate::flow::store::FlowStore;
use crate::payments::types::format_amount;
use crate::services::ledger::{parse_extra_data, ExtraData};
use serde::Serialize;
use tracing::{debug, warn};

pub const DEFAULT_CONFIRMATION: &str =
    "✅ Pagamento confirmado! R$ {amount} foram adicionados ao seu saldo.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Vec<Button>>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image_url: None,
            video_url: None,
            buttons: Vec::new(),
        }
    }
}

/// Values substituted into `{amount}`, `{txid}` and `{first_name}`.
struct Placeholders<'a> {
    amount: String,
    txid: &'a str,
    first_name: &'a str,
}

impl Placeholders<'_> {
    fn render(&self, template: &str) -> String {
        template
            .replace("{amount}", &self.amount)
            .replace("{txid}", self.txid)
            .replace("{first_name}", self.first_name)
    }
}

#[derive(Debug, Clone)]
pub struct FlowGraphResolver {
    store: FlowStore,
}

impl FlowGraphResolver {
    pub fn new(store: FlowStore) -> Self {
        Self { store }
    }

    /// Confirmation for `transaction` using the current merged flow.
    ///
    /// A missing or unreadable flow document falls back to the default message.
    pub async fn confirmation_for(
        &self,
        transaction: &Transaction,
        first_name: Option<&str>,
    ) -> OutboundMessage {
        let document = match self.store.load_merged().await {
            Ok(document) => document,
            Err(e) => {
                warn!(
                    transaction_id = transaction.id,
                    error = %e,
                    "flow document unavailable, using default confirmation"
                );
                FlowDocument::default()
            }
        };

        Self::resolve_confirmation(&document, transaction, first_name)
    }

    pub fn resolve_confirmation(
        document: &FlowDocument,
        transaction: &Transaction,
        first_name: Option<&str>,
    ) -> OutboundMessage {
        let extra = parse_extra_data(&transaction.extra_data);
        let placeholders = Placeholders {
            amount: format_amount(&transaction.amount),
            txid: &extra.txid,
            first_name: first_name.unwrap_or_default(),
        };

        match Self::confirmation_node(document, &extra) {
            Some(node) => build_message(&node, &placeholders),
            None => {
                debug!(
                    transaction_id = transaction.id,
                    "no confirmation screen resolved, using default"
                );
                OutboundMessage::text(placeholders.render(DEFAULT_CONFIRMATION))
            }
        }
    }

    fn confirmation_node(document: &FlowDocument, extra: &ExtraData) -> Option<ScreenNode> {
        if let Some(node) = extra
            .success_screen_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .and_then(|id| text_node(document, id))
        {
            return Some(node);
        }

        if let Some(node) = extra
            .remarketing_success_data
            .as_ref()
            .and_then(|data| serde_json::from_value::<ScreenNode>(data.clone()).ok())
            .filter(ScreenNode::has_text)
        {
            return Some(node);
        }

        let origin = extra.screen_id.as_deref().filter(|id| !id.is_empty())?;
        let target = document.screen(origin)?.webhook_target()?;
        text_node(document, target)
    }
}

fn text_node(document: &FlowDocument, screen_id: &str) -> Option<ScreenNode> {
    document.screen(screen_id)?.first_text_node().cloned()
}

fn build_message(node: &ScreenNode, placeholders: &Placeholders<'_>) -> OutboundMessage {
    OutboundMessage {
        text: placeholders.render(node.text.as_deref().unwrap_or_default()),
        image_url: node.image_url.clone().filter(|url| !url.is_empty()),
        video_url: node.video_url.clone().filter(|url| !url.is_empty()),
        buttons: node
            .buttons
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|button| Button {
                        text: placeholders.render(&button.text),
                        ..button
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|row| !row.is_empty())
            .collect(),
    }
}
