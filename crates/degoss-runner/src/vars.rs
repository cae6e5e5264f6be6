use crate::error::MalformedInput;
use crate::logger::RunLogger;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const FACT_PREFIX: &str = "ansible_";

pub type VarMap = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarsInput {
    Structured(VarMap),
    Raw(String),
    Other(Value),
}

impl Default for VarsInput {
    fn default() -> Self {
        VarsInput::Structured(VarMap::new())
    }
}

impl From<VarMap> for VarsInput {
    fn from(map: VarMap) -> Self {
        VarsInput::Structured(map)
    }
}

pub fn parse_object(raw: &str) -> Result<VarMap, MalformedInput> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(MalformedInput::NotAnObject(json_type_name(&other))),
    }
}

pub fn deserialize_dict(input: &VarsInput, log: &RunLogger) -> VarMap {
    match input {
        VarsInput::Structured(map) => map.clone(),
        VarsInput::Raw(raw) => parse_object(raw).unwrap_or_else(|e| {
            log.error(format_args!(
                "Unable to deserialize value, using an empty dictionary: {}",
                e
            ));
            VarMap::new()
        }),
        VarsInput::Other(value) => {
            log.error(format_args!(
                "Input value was neither a string nor a dictionary, rather a {}",
                json_type_name(value)
            ));
            VarMap::new()
        }
    }
}

pub fn merge(facts: &VarsInput, variables: &VarsInput, log: &RunLogger) -> VarMap {
    log.debug("Deserializing facts from JSON input");
    let facts = prefix_facts(deserialize_dict(facts, log));
    log.debug("Deserializing variables from JSON input");
    let variables = deserialize_dict(variables, log);

    let mut merged = facts;
    merged.extend(variables);

    log.debug(format_args!(
        "Variable names exposed to Goss: {:?}",
        merged.keys().collect::<Vec<_>>()
    ));
    merged
}

/// Adds `FACT_PREFIX` to every fact key lacking it. A key that already carried
/// the prefix wins over a renamed one with the same final name.
pub fn prefix_facts(facts: VarMap) -> VarMap {
    let mut out = VarMap::new();
    let mut renamed = Vec::new();
    for (key, value) in facts {
        if key.starts_with(FACT_PREFIX) {
            out.insert(key, value);
        } else {
            renamed.push((format!("{}{}", FACT_PREFIX, key), value));
        }
    }
    for (key, value) in renamed {
        out.entry(key).or_insert(value);
    }
    out
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}
