use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot of the three live maps, captured by `checkpoint` and restored
/// by `rollback`. Checkpoints never contain other checkpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct ContextSnapshot {
    data: BTreeMap<String, Value>,
    arrays: BTreeMap<String, Vec<Value>>,
    counters: BTreeMap<String, i64>,
}

/// Scratch memory owned by exactly one workflow run. Created by the
/// contextual executor at workflow start and cleared when the run returns
/// or fails; never shared across runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub workflow_id: String,
    pub workflow_name: String,
    pub started_at: DateTime<Utc>,
    data: BTreeMap<String, Value>,
    arrays: BTreeMap<String, Vec<Value>>,
    counters: BTreeMap<String, i64>,
    #[serde(skip)]
    checkpoints: BTreeMap<String, ContextSnapshot>,
}

/// Portable JSON form for template seeding and debugging. Checkpoints are
/// deliberately not part of the round-trip.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextExport {
    pub workflow_id: String,
    pub workflow_name: String,
    pub started_at: DateTime<Utc>,
    pub data: BTreeMap<String, Value>,
    pub arrays: BTreeMap<String, Vec<Value>>,
    pub counters: BTreeMap<String, i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContextSummary {
    pub workflow_id: String,
    pub workflow_name: String,
    pub data_keys: usize,
    pub array_keys: usize,
    pub counter_keys: usize,
    pub checkpoint_names: Vec<String>,
}

impl WorkflowContext {
    pub fn new(workflow_id: impl Into<String>, workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            started_at: Utc::now(),
            data: BTreeMap::new(),
            arrays: BTreeMap::new(),
            counters: BTreeMap::new(),
            checkpoints: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.data.keys().map(String::as_str).collect()
    }

    /// Appends preserve insertion order; values are never deduplicated.
    pub fn append(&mut self, key: impl Into<String>, value: Value) {
        self.arrays.entry(key.into()).or_default().push(value);
    }

    pub fn get_all(&self, key: &str) -> &[Value] {
        self.arrays.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn clear_array(&mut self, key: &str) -> bool {
        self.arrays.remove(key).is_some()
    }

    pub fn increment(&mut self, key: impl Into<String>) -> i64 {
        let counter = self.counters.entry(key.into()).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn decrement(&mut self, key: impl Into<String>) -> i64 {
        let counter = self.counters.entry(key.into()).or_insert(0);
        *counter -= 1;
        *counter
    }

    pub fn get_counter(&self, key: &str) -> i64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    pub fn reset_counter(&mut self, key: &str) {
        self.counters.remove(key);
    }

    /// Merge `patch` into the object stored at `key`, creating it when
    /// absent. Merging onto a non-object existing value is an error.
    pub fn merge(
        &mut self,
        key: &str,
        patch: BTreeMap<String, Value>,
    ) -> Result<(), String> {
        match self.data.get_mut(key) {
            Some(Value::Object(existing)) => {
                for (k, v) in patch {
                    existing.insert(k, v);
                }
                Ok(())
            }
            Some(other) => Err(format!(
                "cannot merge into `{key}`: existing value is {} rather than an object",
                type_name(other)
            )),
            None => {
                let map = patch.into_iter().collect::<serde_json::Map<_, _>>();
                self.data.insert(key.to_string(), Value::Object(map));
                Ok(())
            }
        }
    }

    /// Capture a deep copy of data, arrays, and counters under `name`.
    /// Recording a checkpoint under an existing name replaces it.
    pub fn checkpoint(&mut self, name: impl Into<String>) {
        let snapshot = ContextSnapshot {
            data: self.data.clone(),
            arrays: self.arrays.clone(),
            counters: self.counters.clone(),
        };
        self.checkpoints.insert(name.into(), snapshot);
    }

    /// Restore all three maps to the checkpointed contents, discarding
    /// every intervening change. Unknown names return false and leave the
    /// context untouched. The checkpoint itself survives the rollback.
    pub fn rollback(&mut self, name: &str) -> bool {
        match self.checkpoints.get(name) {
            Some(snapshot) => {
                self.data = snapshot.data.clone();
                self.arrays = snapshot.arrays.clone();
                self.counters = snapshot.counters.clone();
                true
            }
            None => false,
        }
    }

    pub fn delete_checkpoint(&mut self, name: &str) -> bool {
        self.checkpoints.remove(name).is_some()
    }

    pub fn export(&self) -> ContextExport {
        ContextExport {
            workflow_id: self.workflow_id.clone(),
            workflow_name: self.workflow_name.clone(),
            started_at: self.started_at,
            data: self.data.clone(),
            arrays: self.arrays.clone(),
            counters: self.counters.clone(),
        }
    }

    pub fn import(export: ContextExport) -> Self {
        Self {
            workflow_id: export.workflow_id,
            workflow_name: export.workflow_name,
            started_at: export.started_at,
            data: export.data,
            arrays: export.arrays,
            counters: export.counters,
            checkpoints: BTreeMap::new(),
        }
    }

    pub fn summary(&self) -> ContextSummary {
        ContextSummary {
            workflow_id: self.workflow_id.clone(),
            workflow_name: self.workflow_name.clone(),
            data_keys: self.data.len(),
            array_keys: self.arrays.len(),
            counter_keys: self.counters.len(),
            checkpoint_names: self.checkpoints.keys().cloned().collect(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len() + self.arrays.len() + self.counters.len()
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.arrays.clear();
        self.counters.clear();
        self.checkpoints.clear();
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
