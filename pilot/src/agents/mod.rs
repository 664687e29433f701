//! Planner, replanner and executor wrappers around the model and agent
//! backends.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::error::StructuredOutputError;
use crate::io::executor::{ModelRequest, StructuredModel};

pub mod executor;
pub mod planner;
pub mod replanner;

pub(crate) const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");
pub(crate) const ACTION_SCHEMA: &str = include_str!("../../schemas/action.schema.json");

static PLAN_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile(PLAN_SCHEMA));
static ACTION_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile(ACTION_SCHEMA));

fn compile(raw: &str) -> Validator {
    let schema: Value = serde_json::from_str(raw).expect("embedded schema should be valid json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("embedded schema should compile")
}

/// Which embedded schema a structured call is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputSchema {
    Plan,
    Action,
}

impl OutputSchema {
    fn raw(self) -> &'static str {
        match self {
            OutputSchema::Plan => PLAN_SCHEMA,
            OutputSchema::Action => ACTION_SCHEMA,
        }
    }

    fn validator(self) -> &'static Validator {
        match self {
            OutputSchema::Plan => &PLAN_VALIDATOR,
            OutputSchema::Action => &ACTION_VALIDATOR,
        }
    }
}

/// Run one structured call, then validate and deserialize its output.
pub(crate) fn call_structured<M, T>(
    model: &M,
    role: &'static str,
    schema: OutputSchema,
    prompt: String,
    image: Option<&crate::core::types::VisionPayload>,
) -> Result<T, StructuredOutputError>
where
    M: StructuredModel + ?Sized,
    T: DeserializeOwned,
{
    let request = ModelRequest {
        role,
        prompt,
        output_schema: schema.raw(),
        image,
    };
    let value = model
        .generate(&request)
        .map_err(|err| StructuredOutputError::Call {
            role,
            message: format!("{err:#}"),
        })?;
    parse_structured(role, schema, value)
}

pub(crate) fn parse_structured<T: DeserializeOwned>(
    role: &'static str,
    schema: OutputSchema,
    value: Value,
) -> Result<T, StructuredOutputError> {
    let violations: Vec<String> = schema
        .validator()
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !violations.is_empty() {
        return Err(StructuredOutputError::Schema { role, violations });
    }
    serde_json::from_value(value).map_err(|err| StructuredOutputError::Parse {
        role,
        message: err.to_string(),
    })
}
