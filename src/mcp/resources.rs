//! Static, read-only resource catalog (tutorial Prolog listings).

use serde::Serialize;

pub const MIME_TYPE: &str = "text/prolog";

#[derive(Debug, Clone, Serialize)]
pub struct Resource {
    pub uri: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "mimeType")]
    pub mime_type: &'static str,
    #[serde(skip)]
    pub text: &'static str,
}

const CATALOG: &[Resource] = &[
    Resource {
        uri: "prolog://examples/basic",
        name: "Basic Prolog Examples",
        description: "Basic Prolog predicates and examples",
        mime_type: MIME_TYPE,
        text: include_str!("../../resources/prolog/basic.pl"),
    },
    Resource {
        uri: "prolog://examples/logic-puzzles",
        name: "Logic Puzzles",
        description: "Examples of logic puzzles solved with Prolog",
        mime_type: MIME_TYPE,
        text: include_str!("../../resources/prolog/logic-puzzles.pl"),
    },
    Resource {
        uri: "prolog://examples/family-tree",
        name: "Family Tree Example",
        description: "Family relationships modeling in Prolog",
        mime_type: MIME_TYPE,
        text: include_str!("../../resources/prolog/family-tree.pl"),
    },
];

pub fn list() -> &'static [Resource] {
    CATALOG
}

pub fn read(uri: &str) -> Option<&'static Resource> {
    CATALOG.iter().find(|r| r.uri == uri)
}
