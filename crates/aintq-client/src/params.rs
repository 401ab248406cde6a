//! The task parameter codec.
//!
//! Task parameters travel through the `params` BYTEA column as canonical
//! JSON. Producers and consumers must share this codec: whatever
//! [`encode_params`] wrote, [`decode_params`] reads back. Unknown fields are
//! rejected so that a payload written by anything else fails loudly at
//! decode time instead of silently misbehaving inside a task.

use serde_json::{Map, Value};

use crate::error::ErrorImpl;
use crate::AintqError;

/// Positional and keyword arguments for one task invocation.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskParams {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl TaskParams {
    /// An empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// The positional argument at `index`, if present.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// The keyword argument named `name`, if present.
    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }

    /// Deserialize the positional argument at `index` into `T`.
    pub fn arg_as<T>(&self, index: usize) -> Result<T, AintqError>
    where
        T: serde::de::DeserializeOwned,
    {
        let value = self
            .args
            .get(index)
            .ok_or(ErrorImpl::MissingArgument(index))?;

        Ok(serde_json::from_value(value.clone())?)
    }

    /// Deserialize the keyword argument named `name` into `T`.
    pub fn kwarg_as<T>(&self, name: &str) -> Result<T, AintqError>
    where
        T: serde::de::DeserializeOwned,
    {
        let value = self
            .kwargs
            .get(name)
            .ok_or_else(|| ErrorImpl::MissingKeyword(name.to_owned()))?;

        Ok(serde_json::from_value(value.clone())?)
    }
}

/// Encode parameters into the opaque byte form stored in the task row.
pub fn encode_params(params: &TaskParams) -> Result<Vec<u8>, AintqError> {
    Ok(serde_json::to_vec(params)?)
}

/// Decode the opaque byte form back into parameters.
pub fn decode_params(bytes: &[u8]) -> Result<TaskParams, AintqError> {
    Ok(serde_json::from_slice(bytes)?)
}
