//! Conversation flow document: screens keyed by id, each a node or a list of nodes.
//!
//! Documents are read schema-on-read. Missing optional fields default, and a
//! screen whose shape cannot be understood is kept as [`ScreenEntry::Other`]
//! instead of failing the whole document.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FlowDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_screen: Option<String>,
    #[serde(default)]
    pub screens: BTreeMap<String, ScreenEntry>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ScreenEntry {
    Single(ScreenNode),
    Sequence(Vec<ScreenNode>),
    Other(JsonValue),
}

/// Only JSON objects are nodes. Derived struct impls would also read arrays
/// positionally, so `["hi"]` must not become a node with text "hi".
impl<'de> Deserialize<'de> for ScreenEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = JsonValue::deserialize(deserializer)?;
        Ok(match &raw {
            JsonValue::Object(_) => match ScreenNode::deserialize(&raw) {
                Ok(node) => ScreenEntry::Single(node),
                Err(_) => ScreenEntry::Other(raw),
            },
            JsonValue::Array(items) if items.iter().all(JsonValue::is_object) => {
                match Vec::<ScreenNode>::deserialize(&raw) {
                    Ok(nodes) => ScreenEntry::Sequence(nodes),
                    Err(_) => ScreenEntry::Other(raw),
                }
            }
            _ => ScreenEntry::Other(raw),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScreenNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buttons: Option<Vec<Vec<Button>>>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// Screen shown once a payment started from this screen is confirmed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Button {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

const GOTO_PREFIX: &str = "goto_";

impl Button {
    /// Screen id named by a `goto_<screen>` callback
    pub fn target(&self) -> Option<&str> {
        self.callback
            .as_deref()
            .and_then(|callback| callback.strip_prefix(GOTO_PREFIX))
            .filter(|target| !target.is_empty())
    }
}

impl ScreenNode {
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|text| !text.trim().is_empty())
    }

    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.buttons.iter().flatten().flatten()
    }

    pub fn webhook_target(&self) -> Option<&str> {
        self.webhook.as_deref().filter(|target| !target.is_empty())
    }
}

impl ScreenEntry {
    pub fn nodes(&self) -> &[ScreenNode] {
        match self {
            ScreenEntry::Single(node) => std::slice::from_ref(node),
            ScreenEntry::Sequence(nodes) => nodes,
            ScreenEntry::Other(_) => &[],
        }
    }

    /// First node carrying non-blank text
    pub fn first_text_node(&self) -> Option<&ScreenNode> {
        self.nodes().iter().find(|node| node.has_text())
    }

    /// First `webhook` target declared by any node of the screen
    pub fn webhook_target(&self) -> Option<&str> {
        self.nodes().iter().find_map(|node| node.webhook_target())
    }
}

impl FlowDocument {
    pub fn screen(&self, id: &str) -> Option<&ScreenEntry> {
        self.screens.get(id)
    }

    /// Overlay `campaign` on top of this document; its screens win on id collisions.
    pub fn merged_with(&self, campaign: &FlowDocument) -> FlowDocument {
        let mut screens = self.screens.clone();
        screens.extend(
            campaign
                .screens
                .iter()
                .map(|(id, entry)| (id.clone(), entry.clone())),
        );

        FlowDocument {
            initial_screen: self
                .initial_screen
                .clone()
                .or_else(|| campaign.initial_screen.clone()),
            screens,
        }
    }
}
