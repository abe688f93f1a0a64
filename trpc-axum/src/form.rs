//! `application/x-www-form-urlencoded` serializer.
//!
//! Registered under [`serialization_type::FORM`]. Unmarshal feeds each
//! `key=value` pair through the populator, so keys are dot-separated field
//! paths and repeated keys append. Marshal flattens the message's top-level
//! JSON mapping into pairs; arrays become repeated keys and nested objects
//! are sent as JSON text.

use bytes::Bytes;
use trpc_axum_core::{Body, SerializationError, Serializer, SerializerRegistry, serialization_type};

use crate::populate::populate_pairs;

/// Form body serializer for reflected messages.
#[derive(Clone, Copy, Debug, Default)]
pub struct FormSerializer;

impl FormSerializer {
    /// Register under [`serialization_type::FORM`].
    pub fn register(registry: &mut SerializerRegistry) {
        registry.register(serialization_type::FORM, FormSerializer);
    }
}

impl Serializer for FormSerializer {
    fn marshal(&self, body: &Body) -> Result<Bytes, SerializationError> {
        let Body::Message(msg) = body else {
            return Err(unsupported(body));
        };
        let value = serde_json::to_value(msg).map_err(|e| SerializationError::Marshal(e.to_string()))?;
        let serde_json::Value::Object(fields) = value else {
            return Err(SerializationError::Marshal("message is not a JSON object".into()));
        };

        let mut pairs: Vec<(String, String)> = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            match value {
                serde_json::Value::Null => {}
                serde_json::Value::Array(items) => {
                    pairs.extend(items.into_iter().map(|item| (key.clone(), text(item))));
                }
                other => pairs.push((key, text(other))),
            }
        }
        serde_urlencoded::to_string(&pairs)
            .map(Bytes::from)
            .map_err(|e| SerializationError::Marshal(e.to_string()))
    }

    fn unmarshal(&self, data: &[u8], body: &mut Body) -> Result<(), SerializationError> {
        let Body::Message(msg) = body else {
            return Err(unsupported(body));
        };
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_bytes(data).map_err(|e| SerializationError::Unmarshal(e.to_string()))?;
        populate_pairs(msg, pairs, |_| false, false).map_err(|e| SerializationError::Unmarshal(e.to_string()))
    }
}

fn unsupported(body: &Body) -> SerializationError {
    SerializationError::UnsupportedBody {
        serializer: "form",
        body: body.kind(),
    }
}

fn text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::descriptor;
    use prost_reflect::{DynamicMessage, Value};

    fn registry() -> SerializerRegistry {
        let mut registry = SerializerRegistry::with_builtins();
        FormSerializer::register(&mut registry);
        registry
    }

    #[test]
    fn test_form_content_type_resolves_once_registered() {
        assert_eq!(
            SerializerRegistry::with_builtins()
                .code_for_content_type("application/x-www-form-urlencoded"),
            None
        );
        assert_eq!(
            registry().code_for_content_type("application/x-www-form-urlencoded; charset=UTF-8"),
            Some(serialization_type::FORM)
        );
    }

    #[test]
    fn test_unmarshal_form() {
        let mut body = Body::Message(DynamicMessage::new(descriptor("Book")));
        registry()
            .unmarshal(
                serialization_type::FORM,
                b"name=the+dune&tags=a&tags=b&author.name=frank&status=AVAILABLE",
                &mut body,
            )
            .unwrap();
        let msg = body.as_message().unwrap();
        assert_eq!(
            msg.get_field_by_name("name").unwrap().into_owned(),
            Value::String("the dune".into())
        );
        assert_eq!(
            msg.get_field_by_name("tags").unwrap().into_owned(),
            Value::List(vec![Value::String("a".into()), Value::String("b".into())])
        );
        assert_eq!(
            msg.get_field_by_name("status").unwrap().into_owned(),
            Value::EnumNumber(1)
        );
    }

    #[test]
    fn test_unmarshal_unknown_field_fails() {
        let mut body = Body::Message(DynamicMessage::new(descriptor("Book")));
        let err = registry()
            .unmarshal(serialization_type::FORM, b"missing=1", &mut body)
            .unwrap_err();
        assert!(matches!(err, SerializationError::Unmarshal(_)));
    }

    #[test]
    fn test_marshal_form() {
        let mut msg = DynamicMessage::new(descriptor("Book"));
        msg.set_field_by_name("name", Value::String("a b".into()));
        msg.set_field_by_name("id", Value::I32(4));
        msg.set_field_by_name(
            "tags",
            Value::List(vec![Value::String("x".into()), Value::String("y".into())]),
        );
        let data = registry()
            .marshal(serialization_type::FORM, &Body::Message(msg))
            .unwrap()
            .unwrap();

        let mut pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(&data).unwrap();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("id".to_string(), "4".to_string()),
                ("name".to_string(), "a b".to_string()),
                ("tags".to_string(), "x".to_string()),
                ("tags".to_string(), "y".to_string()),
            ]
        );
    }

    #[test]
    fn test_bytes_body_is_unsupported() {
        let err = FormSerializer
            .marshal(&Body::Bytes(Bytes::from_static(b"x")))
            .unwrap_err();
        assert!(matches!(err, SerializationError::UnsupportedBody { .. }));
    }
}
