//! Hierarchical symbol vocabularies for event and subject classification.
//!
//! Interpretations and manifestations form URI-named trees. Queries match a
//! symbol and its whole subtree, so the registry's job is expanding a node to
//! its transitive children at query-compile time and answering ancestry
//! checks for the in-memory matcher.

use std::collections::{BTreeSet, HashMap};

macro_rules! zg {
    ($frag:literal) => {
        concat!("http://www.zeitgeist-project.com/ontologies/2010/01/27/zg#", $frag)
    };
}
macro_rules! nfo {
    ($frag:literal) => {
        concat!("http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#", $frag)
    };
}
macro_rules! nmo {
    ($frag:literal) => {
        concat!("http://www.semanticdesktop.org/ontologies/2007/03/22/nmo#", $frag)
    };
}
macro_rules! nie {
    ($frag:literal) => {
        concat!("http://www.semanticdesktop.org/ontologies/2007/01/19/nie#", $frag)
    };
}

// Event interpretations.
pub const EVENT_INTERPRETATION: &str = zg!("EventInterpretation");
pub const ACCESS_EVENT: &str = zg!("AccessEvent");
pub const LEAVE_EVENT: &str = zg!("LeaveEvent");
pub const CREATE_EVENT: &str = zg!("CreateEvent");
pub const MODIFY_EVENT: &str = zg!("ModifyEvent");
pub const MOVE_EVENT: &str = zg!("MoveEvent");
pub const DELETE_EVENT: &str = zg!("DeleteEvent");
pub const RECEIVE_EVENT: &str = zg!("ReceiveEvent");
pub const SEND_EVENT: &str = zg!("SendEvent");
pub const ACCEPT_EVENT: &str = zg!("AcceptEvent");
pub const DENY_EVENT: &str = zg!("DenyEvent");
pub const EXPIRE_EVENT: &str = zg!("ExpireEvent");

// Event manifestations.
pub const EVENT_MANIFESTATION: &str = zg!("EventManifestation");
pub const USER_ACTIVITY: &str = zg!("UserActivity");
pub const HEURISTIC_ACTIVITY: &str = zg!("HeuristicActivity");
pub const SCHEDULED_ACTIVITY: &str = zg!("ScheduledActivity");
pub const SYSTEM_NOTIFICATION: &str = zg!("SystemNotification");
pub const WORLD_ACTIVITY: &str = zg!("WorldActivity");

// Subject interpretations (information element classes).
pub const INFORMATION_ELEMENT: &str = nie!("InformationElement");
pub const DOCUMENT: &str = nfo!("Document");
pub const TEXT_DOCUMENT: &str = nfo!("TextDocument");
pub const PLAIN_TEXT_DOCUMENT: &str = nfo!("PlainTextDocument");
pub const SOURCE_CODE: &str = nfo!("SourceCode");
pub const PAGINATED_TEXT_DOCUMENT: &str = nfo!("PaginatedTextDocument");
pub const SPREADSHEET: &str = nfo!("Spreadsheet");
pub const PRESENTATION: &str = nfo!("Presentation");
pub const MEDIA: &str = nfo!("Media");
pub const AUDIO: &str = nfo!("Audio");
pub const VIDEO: &str = nfo!("Video");
pub const IMAGE: &str = nfo!("Image");
pub const RASTER_IMAGE: &str = nfo!("RasterImage");
pub const VECTOR_IMAGE: &str = nfo!("VectorImage");
pub const WEBSITE: &str = nfo!("Website");
pub const SOFTWARE: &str = nfo!("Software");
pub const MESSAGE: &str = nmo!("Message");
pub const EMAIL: &str = nmo!("Email");
pub const IM_MESSAGE: &str = nmo!("IMMessage");

// Subject manifestations (data object classes).
pub const DATA_OBJECT: &str = nie!("DataObject");
pub const FILE_DATA_OBJECT: &str = nfo!("FileDataObject");
pub const DELETED_RESOURCE: &str = nfo!("DeletedResource");
pub const EMBEDDED_FILE_DATA_OBJECT: &str = nfo!("EmbeddedFileDataObject");
pub const ATTACHMENT: &str = nfo!("Attachment");
pub const ARCHIVE_ITEM: &str = nfo!("ArchiveItem");
pub const REMOTE_DATA_OBJECT: &str = nfo!("RemoteDataObject");
pub const WEB_DATA_OBJECT: &str = nfo!("WebDataObject");
pub const SOFTWARE_ITEM: &str = nfo!("SoftwareItem");

#[derive(Debug, Default)]
struct SymbolNode {
    parents: Vec<String>,
    children: BTreeSet<String>,
}

/// In-process registry of the symbol trees.
#[derive(Debug, Default)]
pub struct SymbolRegistry {
    nodes: HashMap<String, SymbolNode>,
}

impl SymbolRegistry {
    /// Registry seeded with the core event and subject vocabularies.
    pub fn core() -> Self {
        let mut registry = Self::default();

        registry.register(EVENT_INTERPRETATION, &[]);
        for child in [
            ACCESS_EVENT,
            LEAVE_EVENT,
            CREATE_EVENT,
            MODIFY_EVENT,
            MOVE_EVENT,
            DELETE_EVENT,
            RECEIVE_EVENT,
            SEND_EVENT,
            ACCEPT_EVENT,
            DENY_EVENT,
            EXPIRE_EVENT,
        ] {
            registry.register(child, &[EVENT_INTERPRETATION]);
        }

        registry.register(EVENT_MANIFESTATION, &[]);
        for child in [
            USER_ACTIVITY,
            HEURISTIC_ACTIVITY,
            SCHEDULED_ACTIVITY,
            SYSTEM_NOTIFICATION,
            WORLD_ACTIVITY,
        ] {
            registry.register(child, &[EVENT_MANIFESTATION]);
        }

        registry.register(INFORMATION_ELEMENT, &[]);
        registry.register(DOCUMENT, &[INFORMATION_ELEMENT]);
        registry.register(TEXT_DOCUMENT, &[DOCUMENT]);
        registry.register(PLAIN_TEXT_DOCUMENT, &[TEXT_DOCUMENT]);
        registry.register(SOURCE_CODE, &[PLAIN_TEXT_DOCUMENT]);
        registry.register(PAGINATED_TEXT_DOCUMENT, &[TEXT_DOCUMENT]);
        registry.register(SPREADSHEET, &[DOCUMENT]);
        registry.register(PRESENTATION, &[DOCUMENT]);
        registry.register(MEDIA, &[INFORMATION_ELEMENT]);
        registry.register(AUDIO, &[MEDIA]);
        registry.register(VIDEO, &[MEDIA]);
        registry.register(IMAGE, &[MEDIA]);
        registry.register(RASTER_IMAGE, &[IMAGE]);
        registry.register(VECTOR_IMAGE, &[IMAGE]);
        registry.register(WEBSITE, &[INFORMATION_ELEMENT]);
        registry.register(SOFTWARE, &[INFORMATION_ELEMENT]);
        registry.register(MESSAGE, &[INFORMATION_ELEMENT]);
        registry.register(EMAIL, &[MESSAGE]);
        registry.register(IM_MESSAGE, &[MESSAGE]);

        registry.register(DATA_OBJECT, &[]);
        registry.register(FILE_DATA_OBJECT, &[DATA_OBJECT]);
        registry.register(DELETED_RESOURCE, &[FILE_DATA_OBJECT]);
        registry.register(EMBEDDED_FILE_DATA_OBJECT, &[FILE_DATA_OBJECT]);
        registry.register(ATTACHMENT, &[EMBEDDED_FILE_DATA_OBJECT]);
        registry.register(ARCHIVE_ITEM, &[EMBEDDED_FILE_DATA_OBJECT]);
        registry.register(REMOTE_DATA_OBJECT, &[FILE_DATA_OBJECT]);
        registry.register(WEB_DATA_OBJECT, &[DATA_OBJECT]);
        registry.register(SOFTWARE_ITEM, &[DATA_OBJECT]);

        registry
    }

    /// Add a symbol with the given parent symbols. Unknown parents are
    /// created as roots, so vocabularies can be extended in any order.
    pub fn register(&mut self, uri: &str, parents: &[&str]) {
        for parent in parents {
            self.nodes
                .entry((*parent).to_string())
                .or_default()
                .children
                .insert(uri.to_string());
        }
        let node = self.nodes.entry(uri.to_string()).or_default();
        for parent in parents {
            if !node.parents.iter().any(|p| p == parent) {
                node.parents.push((*parent).to_string());
            }
        }
    }

    /// `uri` plus all transitive children, sorted. Symbols the registry has
    /// never seen expand to just themselves.
    pub fn children_extended(&self, uri: &str) -> Vec<String> {
        let mut result = BTreeSet::new();
        result.insert(uri.to_string());
        let mut stack = vec![uri];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(current) {
                for child in &node.children {
                    if result.insert(child.clone()) {
                        stack.push(child.as_str());
                    }
                }
            }
        }
        result.into_iter().collect()
    }

    /// True when `uri` is `ancestor` or lies in its subtree.
    pub fn is_a(&self, uri: &str, ancestor: &str) -> bool {
        if uri == ancestor {
            return true;
        }
        let mut stack = vec![uri];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(current) {
                for parent in &node.parents {
                    if parent == ancestor {
                        return true;
                    }
                    if seen.insert(parent.clone()) {
                        stack.push(parent.as_str());
                    }
                }
            }
        }
        false
    }
}
