//! Editable conversation flow: document model, storage, confirmation lookup
//! and editor layout.

pub mod document;
pub mod layout;
pub mod resolver;
pub mod store;

pub use document::{Button, FlowDocument, ScreenEntry, ScreenNode};
pub use layout::{EdgeKind, EdgeLayout, FlowLayout, FlowLayoutEngine, NodePosition};
pub use resolver::{FlowGraphResolver, OutboundMessage, DEFAULT_CONFIRMATION};
pub use store::{FlowDocumentKind, FlowError, FlowStore};
