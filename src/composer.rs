use std::collections::HashSet;

use graphql_parser::parse_schema;
use graphql_parser::schema::{Definition, Directive, Document, Field, TypeDefinition, TypeExtension, Value};
use indexmap::{IndexMap, IndexSet};

use crate::error::{CompositionError, CompositionErrors};
use crate::schema::{
    BUILTIN_SCALARS, CompositeType, EntityKey, FieldDefinition, FieldSet, ServiceDefinition, TypeKind, TypeRef,
    UnifiedSchema,
};

const QUERY: &str = "Query";
const MUTATION: &str = "Mutation";
/// Root fields every federated service exposes for the gateway's own use.
const FEDERATION_ROOT_FIELDS: [&str; 2] = ["_entities", "_service"];

struct FieldEntry {
    name: String,
    ty: TypeRef,
    external: bool,
    requires: Option<String>,
}

struct ObjectEntry {
    service: String,
    is_extension: bool,
    keys: Vec<String>,
    fields: Vec<FieldEntry>,
    interfaces: Vec<String>,
}

#[derive(Default)]
struct Collected {
    objects: IndexMap<String, Vec<ObjectEntry>>,
    interfaces: IndexMap<String, Vec<(String, Vec<FieldEntry>)>>,
    unions: IndexMap<String, IndexSet<String>>,
    leaf_types: IndexSet<String>,
}

/// Merges the partial schemas of `services` into one validated schema.
///
/// All composition errors are collected; no schema is returned if there is any.
pub fn compose(services: &[ServiceDefinition]) -> Result<UnifiedSchema, CompositionErrors> {
    let mut errors = CompositionErrors::default();

    let mut sorted: Vec<&ServiceDefinition> = services.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    for service in &sorted {
        if !seen.insert(service.name.as_str()) && reported.insert(service.name.as_str()) {
            errors.push(CompositionError::DuplicateService(service.name.clone()));
        }
    }

    let mut collected = Collected::default();
    for service in &sorted {
        match parse_schema::<String>(&service.schema) {
            Ok(document) => collected.collect(&service.name, &document),
            Err(error) => errors.push(CompositionError::InvalidSchema {
                service: service.name.clone(),
                message: error.to_string(),
            }),
        }
    }

    let mut composer = Composer {
        errors,
        types: IndexMap::new(),
        known_types: collected.known_types(),
    };
    composer.compose_objects(&collected);
    composer.compose_abstract_types(&collected);

    let has_query_fields = composer
        .types
        .get(QUERY)
        .is_some_and(|query| !query.fields.is_empty());
    if !has_query_fields {
        composer.errors.push(CompositionError::EmptyQuery);
    }

    if !composer.errors.is_empty() {
        return Err(composer.errors);
    }

    let mut hasher = blake3::Hasher::new();
    for service in &sorted {
        hasher.update(service.name.as_bytes());
        hasher.update(&[0x00]);
        hasher.update(service.schema.as_bytes());
        hasher.update(&[0x00]);
    }

    let mutation_type = composer.types.contains_key(MUTATION).then(|| MUTATION.to_string());
    let schema = UnifiedSchema {
        version: hasher.finalize().to_hex().to_string(),
        services: sorted.into_iter().cloned().collect(),
        types: composer.types,
        leaf_types: collected.leaf_types,
        query_type: QUERY.to_string(),
        mutation_type,
    };

    tracing::debug!(
        version = %schema.version,
        types = schema.types.len(),
        services = schema.services.len(),
        "composed unified schema"
    );

    Ok(schema)
}

impl Collected {
    fn collect(&mut self, service: &str, document: &Document<'_, String>) {
        for definition in &document.definitions {
            match definition {
                Definition::TypeDefinition(TypeDefinition::Object(object)) => {
                    let is_extension = has_directive(&object.directives, "extends");
                    self.push_object(
                        service,
                        &object.name,
                        is_extension,
                        &object.directives,
                        &object.fields,
                        &object.implements_interfaces,
                    );
                }
                Definition::TypeExtension(TypeExtension::Object(extension)) => {
                    self.push_object(
                        service,
                        &extension.name,
                        true,
                        &extension.directives,
                        &extension.fields,
                        &extension.implements_interfaces,
                    );
                }
                Definition::TypeDefinition(TypeDefinition::Interface(interface)) => {
                    self.interfaces
                        .entry(interface.name.clone())
                        .or_default()
                        .push((service.to_string(), field_entries(&interface.fields)));
                }
                Definition::TypeDefinition(TypeDefinition::Union(union)) => {
                    self.unions
                        .entry(union.name.clone())
                        .or_default()
                        .extend(union.types.iter().cloned());
                }
                Definition::TypeExtension(TypeExtension::Union(union)) => {
                    self.unions
                        .entry(union.name.clone())
                        .or_default()
                        .extend(union.types.iter().cloned());
                }
                Definition::TypeDefinition(TypeDefinition::Enum(ty)) => {
                    self.leaf_types.insert(ty.name.clone());
                }
                Definition::TypeDefinition(TypeDefinition::Scalar(ty)) => {
                    self.leaf_types.insert(ty.name.clone());
                }
                Definition::TypeDefinition(TypeDefinition::InputObject(ty)) => {
                    self.leaf_types.insert(ty.name.clone());
                }
                _ => {}
            }
        }
    }

    fn push_object(
        &mut self,
        service: &str,
        name: &str,
        is_extension: bool,
        directives: &[Directive<'_, String>],
        fields: &[Field<'_, String>],
        interfaces: &[String],
    ) {
        self.objects.entry(name.to_string()).or_default().push(ObjectEntry {
            service: service.to_string(),
            is_extension,
            keys: directive_arguments(directives, "key", "fields"),
            fields: field_entries(fields),
            interfaces: interfaces.to_vec(),
        });
    }

    fn known_types(&self) -> HashSet<String> {
        BUILTIN_SCALARS
            .iter()
            .map(|name| name.to_string())
            .chain(self.leaf_types.iter().cloned())
            .chain(self.objects.keys().cloned())
            .chain(self.interfaces.keys().cloned())
            .chain(self.unions.keys().cloned())
            .collect()
    }
}

struct Composer {
    errors: CompositionErrors,
    types: IndexMap<String, CompositeType>,
    known_types: HashSet<String>,
}

impl Composer {
    fn compose_objects(&mut self, collected: &Collected) {
        for (name, entries) in &collected.objects {
            let composed = if name == QUERY || name == MUTATION {
                self.compose_root(name, entries)
            } else if entries.iter().any(|entry| !entry.keys.is_empty()) {
                self.compose_entity(name, entries)
            } else {
                self.compose_value_type(name, entries)
            };
            if let Some(composed) = composed {
                self.types.insert(name.clone(), composed);
            }
        }
    }

    fn compose_root(&mut self, name: &str, entries: &[ObjectEntry]) -> Option<CompositeType> {
        let mut fields: IndexMap<String, FieldDefinition> = IndexMap::new();
        for entry in entries {
            for field in &entry.fields {
                if FEDERATION_ROOT_FIELDS.contains(&field.name.as_str()) {
                    continue;
                }
                if let Some(existing) = fields.get(&field.name) {
                    self.errors.push(CompositionError::DuplicateRootField {
                        type_name: name.to_string(),
                        field: field.name.clone(),
                        first: existing.service.clone().unwrap_or_default(),
                        second: entry.service.clone(),
                    });
                    continue;
                }
                self.check_field_type(&entry.service, name, field);
                fields.insert(field.name.clone(), owned_field(field, Some(&entry.service), None));
            }
        }
        Some(object_type(name, None, Vec::new(), fields))
    }

    fn compose_entity(&mut self, name: &str, entries: &[ObjectEntry]) -> Option<CompositeType> {
        let mut origins = entries.iter().filter(|entry| !entry.is_extension);
        let Some(origin) = origins.next() else {
            self.report_orphans(name, entries);
            return None;
        };
        for duplicate in origins {
            self.errors.push(CompositionError::DuplicateEntity {
                type_name: name.to_string(),
                first: origin.service.clone(),
                second: duplicate.service.clone(),
            });
        }

        let mut fields: IndexMap<String, FieldDefinition> = IndexMap::new();
        for field in origin.fields.iter().filter(|field| !field.external) {
            self.check_field_type(&origin.service, name, field);
            fields.insert(field.name.clone(), owned_field(field, Some(&origin.service), None));
        }

        let mut keys = Vec::new();
        for fields_argument in &origin.keys {
            if let Some(key) = self.parse_key(&origin.service, name, fields_argument, &fields) {
                keys.push(key);
            }
        }

        for extension in entries.iter().filter(|entry| entry.is_extension) {
            self.merge_extension(name, extension, &mut fields, &mut keys);
        }

        Some(object_type(name, Some(origin.service.clone()), keys, fields))
    }

    fn merge_extension(
        &mut self,
        name: &str,
        extension: &ObjectEntry,
        fields: &mut IndexMap<String, FieldDefinition>,
        keys: &mut Vec<EntityKey>,
    ) {
        let service = &extension.service;
        if extension.keys.is_empty() {
            self.errors.push(CompositionError::MissingKey {
                service: service.clone(),
                type_name: name.to_string(),
            });
            return;
        }

        let mut extension_keys = Vec::new();
        for fields_argument in &extension.keys {
            let Some(key) = self.parse_key(service, name, fields_argument, fields) else {
                continue;
            };
            if !keys.iter().any(|existing| existing.fields == key.fields) {
                self.errors.push(CompositionError::InconsistentKey {
                    service: service.clone(),
                    type_name: name.to_string(),
                    fields: fields_argument.clone(),
                });
                continue;
            }
            extension_keys.push(key);
        }

        let externals: HashSet<&str> = extension
            .fields
            .iter()
            .filter(|field| field.external)
            .map(|field| field.name.as_str())
            .collect();

        for field in &extension.fields {
            if field.external {
                if !fields.contains_key(&field.name) {
                    self.errors.push(CompositionError::UnknownExternalField {
                        service: service.clone(),
                        type_name: name.to_string(),
                        field: field.name.clone(),
                    });
                }
                continue;
            }

            if let Some(existing) = fields.get(&field.name) {
                self.errors.push(CompositionError::AmbiguousField {
                    type_name: name.to_string(),
                    field: field.name.clone(),
                    first: existing.service.clone().unwrap_or_default(),
                    second: service.clone(),
                });
                continue;
            }

            let requires = match field.requires.as_deref().map(FieldSet::parse) {
                Some(Ok(requires)) => requires,
                Some(Err(message)) => {
                    self.errors.push(CompositionError::InvalidRequires {
                        service: service.clone(),
                        type_name: name.to_string(),
                        field: field.name.clone(),
                        required: message,
                    });
                    continue;
                }
                None => FieldSet::default(),
            };
            for required in requires.top_level_names() {
                if !externals.contains(required) {
                    self.errors.push(CompositionError::InvalidRequires {
                        service: service.clone(),
                        type_name: name.to_string(),
                        field: field.name.clone(),
                        required: required.to_string(),
                    });
                }
            }

            self.check_field_type(service, name, field);
            let key = extension_keys.first().map(|key| key.fields.clone());
            let mut definition = owned_field(field, Some(service), key);
            definition.requires = requires;
            fields.insert(field.name.clone(), definition);
        }

        keys.extend(extension_keys);
    }

    fn compose_value_type(&mut self, name: &str, entries: &[ObjectEntry]) -> Option<CompositeType> {
        let mut definitions = entries.iter().filter(|entry| !entry.is_extension);
        let Some(first) = definitions.next() else {
            self.report_orphans(name, entries);
            return None;
        };

        for extension in entries.iter().filter(|entry| entry.is_extension) {
            self.errors.push(CompositionError::MissingKey {
                service: extension.service.clone(),
                type_name: name.to_string(),
            });
        }

        fn shape(entry: &ObjectEntry) -> Vec<(&str, &TypeRef)> {
            let mut shape: Vec<(&str, &TypeRef)> = entry
                .fields
                .iter()
                .map(|field| (field.name.as_str(), &field.ty))
                .collect();
            shape.sort_by_key(|(name, _)| *name);
            shape
        }
        let expected = shape(first);
        for other in definitions {
            if shape(other) != expected {
                self.errors.push(CompositionError::InconsistentValueType {
                    type_name: name.to_string(),
                    first: first.service.clone(),
                    second: other.service.clone(),
                });
            }
        }

        let mut fields = IndexMap::new();
        for field in &first.fields {
            self.check_field_type(&first.service, name, field);
            fields.insert(field.name.clone(), owned_field(field, None, None));
        }
        Some(object_type(name, None, Vec::new(), fields))
    }

    fn compose_abstract_types(&mut self, collected: &Collected) {
        for (name, definitions) in &collected.interfaces {
            let mut fields = IndexMap::new();
            for (service, entries) in definitions {
                for field in entries {
                    self.check_field_type(service, name, field);
                    fields
                        .entry(field.name.clone())
                        .or_insert_with(|| owned_field(field, None, None));
                }
            }
            let possible_types = collected
                .objects
                .iter()
                .filter(|(_, entries)| {
                    entries
                        .iter()
                        .any(|entry| entry.interfaces.iter().any(|interface| interface == name))
                })
                .map(|(object, _)| object.clone())
                .collect();
            self.types.insert(
                name.clone(),
                CompositeType {
                    name: name.clone(),
                    kind: TypeKind::Interface,
                    origin: None,
                    keys: Vec::new(),
                    fields,
                    possible_types,
                },
            );
        }

        for (name, members) in &collected.unions {
            self.types.insert(
                name.clone(),
                CompositeType {
                    name: name.clone(),
                    kind: TypeKind::Union,
                    origin: None,
                    keys: Vec::new(),
                    fields: IndexMap::new(),
                    possible_types: members.iter().cloned().collect(),
                },
            );
        }
    }

    fn parse_key(
        &mut self,
        service: &str,
        type_name: &str,
        fields_argument: &str,
        fields: &IndexMap<String, FieldDefinition>,
    ) -> Option<EntityKey> {
        let key_fields = match FieldSet::parse(fields_argument) {
            Ok(key_fields) => key_fields,
            Err(message) => {
                self.errors.push(CompositionError::UnknownKeyField {
                    service: service.to_string(),
                    type_name: type_name.to_string(),
                    field: message,
                });
                return None;
            }
        };
        let mut valid = true;
        for field in key_fields.top_level_names() {
            if !fields.contains_key(field) {
                valid = false;
                self.errors.push(CompositionError::UnknownKeyField {
                    service: service.to_string(),
                    type_name: type_name.to_string(),
                    field: field.to_string(),
                });
            }
        }
        valid.then(|| EntityKey {
            service: service.to_string(),
            fields: key_fields,
        })
    }

    fn report_orphans(&mut self, name: &str, entries: &[ObjectEntry]) {
        for entry in entries {
            self.errors.push(CompositionError::OrphanedExtension {
                service: entry.service.clone(),
                type_name: name.to_string(),
            });
        }
    }

    fn check_field_type(&mut self, service: &str, type_name: &str, field: &FieldEntry) {
        if !self.known_types.contains(&field.ty.name) {
            self.errors.push(CompositionError::UnknownType {
                service: service.to_string(),
                type_name: type_name.to_string(),
                field: field.name.clone(),
                field_type: field.ty.name.clone(),
            });
        }
    }
}

fn object_type(
    name: &str,
    origin: Option<String>,
    keys: Vec<EntityKey>,
    fields: IndexMap<String, FieldDefinition>,
) -> CompositeType {
    CompositeType {
        name: name.to_string(),
        kind: TypeKind::Object,
        origin,
        keys,
        fields,
        possible_types: Vec::new(),
    }
}

fn owned_field(field: &FieldEntry, service: Option<&String>, key: Option<FieldSet>) -> FieldDefinition {
    FieldDefinition {
        name: field.name.clone(),
        ty: field.ty.clone(),
        service: service.cloned(),
        key,
        requires: FieldSet::default(),
    }
}

fn field_entries(fields: &[Field<'_, String>]) -> Vec<FieldEntry> {
    fields
        .iter()
        .map(|field| FieldEntry {
            name: field.name.clone(),
            ty: TypeRef::from_ast(&field.field_type),
            external: has_directive(&field.directives, "external"),
            requires: directive_arguments(&field.directives, "requires", "fields")
                .into_iter()
                .next(),
        })
        .collect()
}

fn has_directive(directives: &[Directive<'_, String>], name: &str) -> bool {
    directives.iter().any(|directive| directive.name == name)
}

fn directive_arguments(directives: &[Directive<'_, String>], name: &str, argument: &str) -> Vec<String> {
    directives
        .iter()
        .filter(|directive| directive.name == name)
        .filter_map(|directive| {
            directive
                .arguments
                .iter()
                .find(|(argument_name, _)| argument_name == argument)
                .and_then(|(_, value)| match value {
                    Value::String(fields) => Some(fields.clone()),
                    _ => None,
                })
        })
        .collect()
}
