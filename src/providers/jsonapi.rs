//! JSON:API wire types for the upstream transit provider.
//!
//! The provider returns `{data: Resource|Resource[], included?: Resource[]}`
//! envelopes where relationship payloads come in three shapes (single, array,
//! null). Everything here normalizes those shapes once so the rest of the
//! crate only ever sees ids and typed attribute structs.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;

/// A JSON:API document: primary data plus optional side-loaded resources.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct JsonApiDocument<T> {
    #[serde(default)]
    pub data: Option<OneOrMany<Resource<T>>>,
    #[serde(default)]
    pub included: Vec<RawResource>,
}

impl<T> JsonApiDocument<T> {
    /// Flatten the primary data into a vector regardless of wire shape.
    pub fn into_resources(self) -> Vec<Resource<T>> {
        match self.data {
            Some(OneOrMany::Many(items)) => items,
            Some(OneOrMany::One(item)) => vec![*item],
            None => Vec::new(),
        }
    }

    /// Included resources of a given type, keyed by id.
    pub fn included_of_kind(&self, kind: &str) -> HashMap<&str, &RawResource> {
        self.included
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| (r.id.as_str(), r))
            .collect()
    }
}

/// Single-or-array payload. Arrays are tried first so a collection endpoint
/// never mis-parses as a single resource.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(Box<T>),
}

/// A typed resource: `{id, type, attributes, relationships?}`.
#[derive(Debug, Deserialize)]
pub struct Resource<T> {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub attributes: T,
    #[serde(default)]
    pub relationships: Option<HashMap<String, Relationship>>,
}

impl<T> Resource<T> {
    /// All related ids under `name`, flattened to a plain vector.
    ///
    /// `{data: {id}}` yields one element, `{data: [..]}` yields all of them,
    /// `{data: null}` and a missing relationship both yield an empty vector.
    pub fn relationship_ids(&self, name: &str) -> Vec<String> {
        let Some(rels) = &self.relationships else {
            return Vec::new();
        };
        let Some(rel) = rels.get(name) else {
            return Vec::new();
        };
        match &rel.data {
            Some(OneOrMany::Many(items)) => items.iter().map(|r| r.id.clone()).collect(),
            Some(OneOrMany::One(item)) => vec![item.id.clone()],
            None => Vec::new(),
        }
    }

    /// First related id under `name`, for to-one relationships.
    pub fn relationship_id(&self, name: &str) -> Option<String> {
        self.relationship_ids(name).into_iter().next()
    }
}

/// A relationship payload; `data` may be a single identifier, an array, or null.
#[derive(Debug, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub data: Option<OneOrMany<ResourceIdentifier>>,
}

/// Bare `{id, type}` resource linkage.
#[derive(Debug, Deserialize)]
pub struct ResourceIdentifier {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// An included resource with untyped attributes, for side-loaded lookups.
#[derive(Debug, Deserialize)]
pub struct RawResource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl RawResource {
    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_str())
    }
}

/// Decode a whole document from a JSON string.
pub fn decode_document<T: DeserializeOwned>(
    body: &str,
) -> Result<JsonApiDocument<T>, serde_json::Error> {
    serde_json::from_str(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct NameAttrs {
        name: Option<String>,
    }

    #[test]
    fn test_decode_collection_document() {
        let body = r#"{
            "data": [
                {"id": "1", "type": "stop", "attributes": {"name": "Central"}},
                {"id": "2", "type": "stop", "attributes": {"name": null}}
            ]
        }"#;
        let doc: JsonApiDocument<NameAttrs> = decode_document(body).unwrap();
        let resources = doc.into_resources();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].attributes.name.as_deref(), Some("Central"));
        assert!(resources[1].attributes.name.is_none());
    }

    #[test]
    fn test_decode_single_resource_document() {
        let body = r#"{"data": {"id": "9", "type": "stop", "attributes": {"name": "Pier"}}}"#;
        let doc: JsonApiDocument<NameAttrs> = decode_document(body).unwrap();
        let resources = doc.into_resources();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].id, "9");
    }

    #[test]
    fn test_decode_null_data_document() {
        let body = r#"{"data": null}"#;
        let doc: JsonApiDocument<NameAttrs> = decode_document(body).unwrap();
        assert!(doc.into_resources().is_empty());
    }

    #[test]
    fn test_relationship_ids_all_wire_shapes() {
        let body = r#"{
            "data": {
                "id": "p1",
                "type": "prediction",
                "attributes": {"name": null},
                "relationships": {
                    "route": {"data": {"id": "Red", "type": "route"}},
                    "alerts": {"data": [{"id": "a1", "type": "alert"}, {"id": "a2", "type": "alert"}]},
                    "vehicle": {"data": null}
                }
            }
        }"#;
        let doc: JsonApiDocument<NameAttrs> = decode_document(body).unwrap();
        let resource = doc.into_resources().pop().unwrap();

        assert_eq!(resource.relationship_ids("route"), vec!["Red".to_string()]);
        assert_eq!(
            resource.relationship_ids("alerts"),
            vec!["a1".to_string(), "a2".to_string()]
        );
        assert!(resource.relationship_ids("vehicle").is_empty());
        assert!(resource.relationship_ids("missing").is_empty());
        assert_eq!(resource.relationship_id("route").as_deref(), Some("Red"));
        assert!(resource.relationship_id("vehicle").is_none());
    }

    #[test]
    fn test_included_lookup_by_kind() {
        let body = r#"{
            "data": [],
            "included": [
                {"id": "t1", "type": "trip", "attributes": {"headsign": "Alewife"}},
                {"id": "r1", "type": "route", "attributes": {}}
            ]
        }"#;
        let doc: JsonApiDocument<NameAttrs> = decode_document(body).unwrap();
        let trips = doc.included_of_kind("trip");
        assert_eq!(trips.len(), 1);
        assert_eq!(trips["t1"].attribute_str("headsign"), Some("Alewife"));
    }
}
