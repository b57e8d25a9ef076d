use std::fmt;

use graphql_parser::query::{Definition, OperationDefinition, Selection, SelectionSet};
use graphql_parser::schema::Type;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

pub const BUILTIN_SCALARS: [&str; 5] = ["ID", "String", "Int", "Float", "Boolean"];

/// A backend service contributing a partial schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub url: String,
    /// Federation SDL of the service.
    pub schema: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Object,
    Interface,
    Union,
}

/// Output type of a field, reduced to what planning needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TypeRef {
    pub name: String,
    /// Whether any list wrapper appears around the named type.
    pub is_list: bool,
}

impl TypeRef {
    pub fn from_ast(ty: &Type<'_, String>) -> Self {
        match ty {
            Type::NamedType(name) => TypeRef {
                name: name.clone(),
                is_list: false,
            },
            Type::ListType(inner) => TypeRef {
                is_list: true,
                ..TypeRef::from_ast(inner)
            },
            Type::NonNullType(inner) => TypeRef::from_ast(inner),
        }
    }
}

/// One selection of a `@key` or `@requires` field set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldSetItem {
    pub name: String,
    pub selections: Vec<FieldSetItem>,
}

/// A parsed federation field set such as `"id organization { id }"`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FieldSet(pub Vec<FieldSetItem>);

impl FieldSet {
    /// Parses a field set as the selection set `{ <source> }`.
    pub fn parse(source: &str) -> Result<FieldSet, String> {
        let wrapped = format!("{{{source}}}");
        let document = graphql_parser::parse_query::<String>(&wrapped)
            .map_err(|e| format!("invalid field set \"{source}\": {e}"))?;
        let selection_set = match document.definitions.as_slice() {
            [Definition::Operation(OperationDefinition::SelectionSet(selection_set))] => selection_set,
            _ => return Err(format!("invalid field set \"{source}\"")),
        };
        let items = field_set_items(selection_set).map_err(|reason| format!("{reason} in field set \"{source}\""))?;
        if items.is_empty() {
            return Err(format!("empty field set \"{source}\""));
        }
        Ok(FieldSet(items))
    }

    pub fn top_level_names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|item| item.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.top_level_names().any(|candidate| candidate == name)
    }
}

impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_items(f: &mut fmt::Formatter<'_>, items: &[FieldSetItem]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(" ")?;
                }
                f.write_str(&item.name)?;
                if !item.selections.is_empty() {
                    f.write_str(" { ")?;
                    write_items(f, &item.selections)?;
                    f.write_str(" }")?;
                }
            }
            Ok(())
        }
        write_items(f, &self.0)
    }
}

fn field_set_items(selection_set: &SelectionSet<'_, String>) -> Result<Vec<FieldSetItem>, String> {
    selection_set
        .items
        .iter()
        .map(|selection| match selection {
            Selection::Field(field) if field.alias.is_some() => Err(format!("alias on `{}`", field.name)),
            Selection::Field(field) if !field.arguments.is_empty() => Err(format!("arguments on `{}`", field.name)),
            Selection::Field(field) => Ok(FieldSetItem {
                name: field.name.clone(),
                selections: field_set_items(&field.selection_set)?,
            }),
            Selection::FragmentSpread(_) | Selection::InlineFragment(_) => Err("fragment".to_string()),
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntityKey {
    /// Service declaring this key.
    pub service: String,
    pub fields: FieldSet,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldDefinition {
    pub name: String,
    pub ty: TypeRef,
    /// Service resolving the field. `None` for fields of value types, interfaces
    /// and unions, which are resolved by whichever service resolves the parent.
    pub service: Option<String>,
    /// Key the owning service needs to resolve this field of an extended entity.
    pub key: Option<FieldSet>,
    /// Fields from `@requires`, sent along with the key in entity representations.
    pub requires: FieldSet,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompositeType {
    pub name: String,
    pub kind: TypeKind,
    /// Service holding the originating (non-extension) definition of an entity.
    pub origin: Option<String>,
    pub keys: Vec<EntityKey>,
    pub fields: IndexMap<String, FieldDefinition>,
    /// Concrete object types of an interface or union.
    pub possible_types: Vec<String>,
}

impl CompositeType {
    pub fn is_entity(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn is_abstract(&self) -> bool {
        self.kind != TypeKind::Object
    }

    pub fn declared_by(&self, service: &str) -> bool {
        self.keys.iter().any(|key| key.service == service)
    }

    /// Can `service` return `field` for this type without an entity fetch?
    pub fn resolvable_by(&self, service: &str, field: &str) -> bool {
        match self.fields.get(field).and_then(|definition| definition.service.as_deref()) {
            Some(owner) if owner == service => true,
            Some(_) => self
                .keys
                .iter()
                .any(|key| key.service == service && key.fields.contains(field)),
            None => true,
        }
    }

    /// Picks a key of `target` whose fields `source` can provide.
    pub fn representation_key(&self, source: &str, target: &str) -> Option<&FieldSet> {
        self.keys
            .iter()
            .filter(|key| key.service == target)
            .map(|key| &key.fields)
            .find(|fields| fields.top_level_names().all(|name| self.resolvable_by(source, name)))
    }
}

/// The merged, validated type system of every service.
#[derive(Clone, Debug, Serialize)]
pub struct UnifiedSchema {
    /// Changes whenever any service name or SDL changes.
    pub version: String,
    pub services: Vec<ServiceDefinition>,
    pub types: IndexMap<String, CompositeType>,
    pub leaf_types: IndexSet<String>,
    pub query_type: String,
    pub mutation_type: Option<String>,
}

impl UnifiedSchema {
    pub fn composite(&self, name: &str) -> Option<&CompositeType> {
        self.types.get(name)
    }

    pub fn is_composite(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn is_known_type(&self, name: &str) -> bool {
        self.types.contains_key(name) || self.leaf_types.contains(name)
    }

    pub fn field(&self, type_name: &str, field: &str) -> Option<&FieldDefinition> {
        self.types.get(type_name)?.fields.get(field)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|service| service.name == name)
    }

    /// Is `object_type` the same as, or a possible type of, `type_condition`?
    pub fn type_matches(&self, object_type: &str, type_condition: &str) -> bool {
        object_type == type_condition
            || self
                .types
                .get(type_condition)
                .is_some_and(|ty| ty.possible_types.iter().any(|name| name == object_type))
    }
}
