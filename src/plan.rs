use std::fmt::{self, Write as _};

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use crate::operation::OperationKind;
use crate::schema::FieldSet;

/// One step of a response path as seen by the planner.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathElement {
    Key(String),
    /// Every element of the list found at this point.
    Flatten,
}

impl Serialize for PathElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PathElement::Key(key) => serializer.serialize_str(key),
            PathElement::Flatten => serializer.serialize_str("@"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ResponsePath(pub Vec<PathElement>);

impl ResponsePath {
    pub fn join(&self, element: PathElement) -> ResponsePath {
        let mut elements = self.0.clone();
        elements.push(element);
        ResponsePath(elements)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ResponsePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_char('.')?;
            }
            match element {
                PathElement::Key(key) => f.write_str(key)?,
                PathElement::Flatten => f.write_char('@')?,
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QueryPlan {
    /// `None` when nothing has to be fetched, e.g. introspection-only operations.
    pub node: Option<PlanNode>,
}

impl QueryPlan {
    pub fn fetch_nodes(&self) -> Vec<&FetchNode> {
        let mut fetches = Vec::new();
        if let Some(node) = &self.node {
            node.collect_fetches(&mut fetches);
        }
        fetches
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum PlanNode {
    Sequence { nodes: Vec<PlanNode> },
    Parallel { nodes: Vec<PlanNode> },
    Fetch(FetchNode),
    Flatten(FlattenNode),
}

impl PlanNode {
    /// Builds a sequence, inlining nested sequences.
    pub fn sequence(nodes: Vec<PlanNode>) -> Option<PlanNode> {
        let mut flattened = Vec::new();
        for node in nodes {
            match node {
                PlanNode::Sequence { nodes } => flattened.extend(nodes),
                node => flattened.push(node),
            }
        }
        Self::collapse(flattened, |nodes| PlanNode::Sequence { nodes })
    }

    /// Builds a parallel node, inlining nested parallel nodes.
    pub fn parallel(nodes: Vec<PlanNode>) -> Option<PlanNode> {
        let mut flattened = Vec::new();
        for node in nodes {
            match node {
                PlanNode::Parallel { nodes } => flattened.extend(nodes),
                node => flattened.push(node),
            }
        }
        Self::collapse(flattened, |nodes| PlanNode::Parallel { nodes })
    }

    fn collapse(mut nodes: Vec<PlanNode>, wrap: fn(Vec<PlanNode>) -> PlanNode) -> Option<PlanNode> {
        match nodes.len() {
            0 => None,
            1 => nodes.pop(),
            _ => Some(wrap(nodes)),
        }
    }

    fn collect_fetches<'a>(&'a self, fetches: &mut Vec<&'a FetchNode>) {
        match self {
            PlanNode::Sequence { nodes } | PlanNode::Parallel { nodes } => {
                for node in nodes {
                    node.collect_fetches(fetches);
                }
            }
            PlanNode::Fetch(fetch) => fetches.push(fetch),
            PlanNode::Flatten(flatten) => flatten.node.collect_fetches(fetches),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchNode {
    pub service_name: String,
    pub operation_kind: OperationKind,
    /// Sub-query sent to the service.
    pub operation: String,
    /// Operation variables referenced by the sub-query.
    pub variable_usages: Vec<String>,
    /// Top-level response keys of the sub-query, used to scope errors.
    pub response_keys: Vec<String>,
    /// Present for entity fetches, which read representations from prior steps.
    pub requires: Option<Representation>,
}

/// Shape of the entity representations an entity fetch sends.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Representation {
    pub type_name: String,
    pub key: FieldSet,
    pub requires: FieldSet,
    /// Response keys of the key, `@requires` and `__typename` fields fetched
    /// under a reserved alias, by field name.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub aliases: IndexMap<String, String>,
}

impl Representation {
    /// Response key `field` was fetched under at the entity's position.
    pub fn response_key<'a>(&'a self, field: &'a str) -> &'a str {
        self.aliases.get(field).map_or(field, String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FlattenNode {
    pub path: ResponsePath,
    pub node: Box<PlanNode>,
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueryPlan {\n")?;
        if let Some(node) = &self.node {
            node.write_indented(f, 1)?;
        }
        f.write_str("}")
    }
}

impl PlanNode {
    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        match self {
            PlanNode::Sequence { nodes } | PlanNode::Parallel { nodes } => {
                let name = if matches!(self, PlanNode::Sequence { .. }) {
                    "Sequence"
                } else {
                    "Parallel"
                };
                writeln!(f, "{indent}{name} {{")?;
                for node in nodes {
                    node.write_indented(f, depth + 1)?;
                }
                writeln!(f, "{indent}}},")
            }
            PlanNode::Fetch(fetch) => {
                writeln!(f, "{indent}Fetch(service: \"{}\") {{", fetch.service_name)?;
                if let Some(requires) = &fetch.requires {
                    let mut fields = requires.key.to_string();
                    if !requires.requires.0.is_empty() {
                        write!(fields, " {}", requires.requires)?;
                    }
                    writeln!(f, "{indent}  {{ ... on {} {{ __typename {fields} }} }} =>", requires.type_name)?;
                }
                writeln!(f, "{indent}  {}", fetch.operation)?;
                writeln!(f, "{indent}}},")
            }
            PlanNode::Flatten(flatten) => {
                writeln!(f, "{indent}Flatten(path: \"{}\") {{", flatten.path)?;
                flatten.node.write_indented(f, depth + 1)?;
                writeln!(f, "{indent}}},")
            }
        }
    }
}
