//! Bindings: one HTTP rule mapped onto one RPC method.

use std::fmt;

use http::Method;
use prost_reflect::{FieldDescriptor, Kind, MessageDescriptor};

use crate::dat::{DatError, DoubleArrayTrie};
use crate::filter::Handler;
use crate::httprule::{HttpRuleError, PathTemplate};

/// Errors produced while building a [`Binding`].
#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    /// The URL template did not parse.
    #[error(transparent)]
    Template(#[from] HttpRuleError),

    /// A field path in the rule does not exist on the message.
    #[error("unknown field {field} in {message}")]
    UnknownField { field: String, message: String },

    /// A body or response-body path does not end at a singular message field.
    #[error("field {0} must be a singular message")]
    NotMessage(String),

    /// The claimed-field filter could not be built.
    #[error(transparent)]
    Filter(#[from] DatError),
}

/// Where the request body goes.
#[derive(Clone, Debug, Default)]
pub enum BodyRule {
    /// `body` unset: the request body is ignored.
    #[default]
    None,
    /// `body: "*"`: the body is the whole request message; query parameters
    /// are ignored.
    Whole,
    /// `body: "a.b"`: the body is decoded into that message field.
    Field(Vec<FieldDescriptor>),
}

/// A static route from an HTTP rule to an RPC method. Immutable once built.
#[derive(Clone)]
pub struct Binding {
    pub(crate) name: String,
    pub(crate) method: Method,
    pub(crate) template: PathTemplate,
    pub(crate) body: BodyRule,
    pub(crate) response_body: Vec<String>,
    pub(crate) input: MessageDescriptor,
    pub(crate) output: MessageDescriptor,
    pub(crate) handler: Handler,
    pub(crate) claimed: DoubleArrayTrie,
}

impl Binding {
    /// Bind `method pattern` to the RPC `name`.
    ///
    /// Every variable in `pattern` must name a field of `input`.
    pub fn new(
        name: impl Into<String>,
        method: Method,
        pattern: &str,
        input: MessageDescriptor,
        output: MessageDescriptor,
        handler: Handler,
    ) -> Result<Self, BindingError> {
        let template = PathTemplate::parse(pattern)?;
        for path in template.field_paths() {
            resolve(&input, path)?;
        }
        let mut binding = Binding {
            name: name.into(),
            method,
            template,
            body: BodyRule::None,
            response_body: Vec::new(),
            input,
            output,
            handler,
            claimed: DoubleArrayTrie::default(),
        };
        binding.claimed = binding.build_claimed()?;
        Ok(binding)
    }

    /// Set the body rule: `""` for none, `"*"` for the whole message, or a
    /// dot-separated path to a message field.
    pub fn with_body(mut self, body: &str) -> Result<Self, BindingError> {
        self.body = match body {
            "" => BodyRule::None,
            "*" => BodyRule::Whole,
            path => {
                let path: Vec<&str> = path.split('.').collect();
                let fields = resolve(&self.input, &path)?;
                require_message(&fields, &path)?;
                BodyRule::Field(fields)
            }
        };
        self.claimed = self.build_claimed()?;
        Ok(self)
    }

    /// Serialize only this field of the response message. `""` clears it.
    pub fn with_response_body(mut self, field: &str) -> Result<Self, BindingError> {
        if field.is_empty() {
            self.response_body.clear();
            return Ok(self);
        }
        let path: Vec<&str> = field.split('.').collect();
        let fields = resolve(&self.output, &path)?;
        require_message(&fields, &path)?;
        self.response_body = fields.iter().map(|fd| fd.name().to_owned()).collect();
        Ok(self)
    }

    /// The RPC name, e.g. `/library.Library/GetBook`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn template(&self) -> &PathTemplate {
        &self.template
    }

    pub fn body(&self) -> &BodyRule {
        &self.body
    }

    /// Whether a query parameter at `path` is already bound by the URL or body.
    pub fn is_claimed<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.claimed.common_prefix_search(path)
    }

    /// Field paths bound by the template and the body, spelled both with
    /// proto names and with JSON names.
    fn build_claimed(&self) -> Result<DoubleArrayTrie, BindingError> {
        let mut resolved: Vec<Vec<FieldDescriptor>> = Vec::new();
        for path in self.template.field_paths() {
            resolved.push(resolve(&self.input, path)?);
        }
        if let BodyRule::Field(fields) = &self.body {
            resolved.push(fields.clone());
        }

        let mut paths: Vec<Vec<String>> = Vec::with_capacity(resolved.len() * 2);
        for fields in resolved {
            paths.push(fields.iter().map(|fd| fd.name().to_owned()).collect());
            paths.push(fields.iter().map(|fd| fd.json_name().to_owned()).collect());
        }
        Ok(DoubleArrayTrie::build(&paths)?)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("template", &self.template.to_string())
            .field("body", &self.body)
            .field("response_body", &self.response_body)
            .field("input", &self.input.full_name())
            .field("output", &self.output.full_name())
            .finish_non_exhaustive()
    }
}

/// Resolve a field path by JSON name, then proto name.
fn resolve<S: AsRef<str>>(desc: &MessageDescriptor, path: &[S]) -> Result<Vec<FieldDescriptor>, BindingError> {
    let mut fields = Vec::with_capacity(path.len());
    let mut current = desc.clone();
    for (i, name) in path.iter().enumerate() {
        let name = name.as_ref();
        let unknown = || BindingError::UnknownField {
            field: path
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join("."),
            message: desc.full_name().to_owned(),
        };
        let fd = current
            .get_field_by_json_name(name)
            .or_else(|| current.get_field_by_name(name))
            .ok_or_else(unknown)?;
        if i + 1 < path.len() {
            match fd.kind() {
                Kind::Message(md) if !fd.is_list() && !fd.is_map() => current = md,
                _ => return Err(BindingError::NotMessage(fd.full_name().to_owned())),
            }
        }
        fields.push(fd);
    }
    Ok(fields)
}

fn require_message(fields: &[FieldDescriptor], path: &[&str]) -> Result<(), BindingError> {
    match fields.last() {
        Some(fd) if matches!(fd.kind(), Kind::Message(_)) && !fd.is_list() && !fd.is_map() => Ok(()),
        _ => Err(BindingError::NotMessage(path.join("."))),
    }
}
