//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per-variable value writes with itemised outcomes."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use indexmap::IndexMap;
use thiserror::Error;
use tracing::trace;

use crate::resolver::ResolvedNodes;
use crate::session::UaSession;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WriteFailure {
    #[error("variable has no resolved node")]
    Unresolved,
    #[error("no value supplied")]
    MissingValue,
    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub variable: String,
    pub value: Option<f64>,
    pub result: Result<(), WriteFailure>,
}

/// Outcome of one write cycle, one item per configured variable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteResult {
    pub items: Vec<WriteOutcome>,
}

impl WriteResult {
    pub fn all_succeeded(&self) -> bool {
        self.items.iter().all(|item| item.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &WriteOutcome> {
        self.items.iter().filter(|item| item.result.is_err())
    }

    pub fn success_count(&self) -> usize {
        self.items.iter().filter(|item| item.result.is_ok()).count()
    }
}

/// Writes a fixed, ordered list of variables. A failing item never stops the
/// remaining writes.
#[derive(Debug, Clone)]
pub struct ValueWriter {
    variables: Vec<String>,
}

impl ValueWriter {
    pub fn new(variables: Vec<String>) -> Self {
        Self { variables }
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub async fn write_values(
        &self,
        session: &dyn UaSession,
        resolved: &ResolvedNodes,
        values: &IndexMap<String, f64>,
    ) -> WriteResult {
        let mut items = Vec::with_capacity(self.variables.len());
        for variable in &self.variables {
            let value = values.get(variable).copied();
            let result = match (resolved.get(variable), value) {
                (None, _) => Err(WriteFailure::Unresolved),
                (Some(_), None) => Err(WriteFailure::MissingValue),
                (Some(node), Some(value)) => session
                    .write_double(node, value)
                    .await
                    .map_err(|err| WriteFailure::Rejected(err.to_string())),
            };
            trace!(variable = %variable, ?value, ok = result.is_ok(), "variable write");
            items.push(WriteOutcome {
                variable: variable.clone(),
                value,
                result,
            });
        }
        WriteResult { items }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::NodeId;
    use crate::testing::{MockAddressSpace, MockSession};

    const VARS: [&str; 4] = [
        "AcVoltagePe",
        "AcCurrentPe",
        "AcActivePowerPe",
        "AcActiveEnergyTotalImportHp",
    ];

    fn setup() -> (MockSession, ResolvedNodes, IndexMap<String, f64>) {
        let root = NodeId::new(1, 74000u32);
        let space = MockAddressSpace::machine(&root, &["Main"], &VARS);
        let main = space.child_named(&root, "Main").unwrap();
        let mut resolved = ResolvedNodes::new();
        let mut values = IndexMap::new();
        for (idx, name) in VARS.iter().enumerate() {
            resolved.insert(name.to_string(), space.child_named(&main, name).unwrap());
            values.insert(name.to_string(), idx as f64 + 0.5);
        }
        (MockSession::new(space.into()), resolved, values)
    }

    fn writer() -> ValueWriter {
        ValueWriter::new(VARS.iter().map(|v| v.to_string()).collect())
    }

    #[tokio::test]
    async fn writes_every_variable_in_order() {
        let (session, resolved, values) = setup();
        let result = writer().write_values(&session, &resolved, &values).await;
        assert!(result.all_succeeded());
        let written: Vec<f64> = session.writes().into_iter().map(|(_, v)| v).collect();
        assert_eq!(written, vec![0.5, 1.5, 2.5, 3.5]);
    }

    #[tokio::test]
    async fn unresolved_variable_fails_alone() {
        let (session, mut resolved, values) = setup();
        resolved.shift_remove(VARS[1]);
        let result = writer().write_values(&session, &resolved, &values).await;
        assert!(!result.all_succeeded());
        assert_eq!(result.success_count(), 3);
        let failures: Vec<_> = result.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].variable, VARS[1]);
        assert_eq!(failures[0].result, Err(WriteFailure::Unresolved));
        assert_eq!(session.writes().len(), 3);
    }

    #[tokio::test]
    async fn missing_value_is_an_item_failure() {
        let (session, resolved, mut values) = setup();
        values.shift_remove(VARS[3]);
        let result = writer().write_values(&session, &resolved, &values).await;
        assert_eq!(result.items[3].result, Err(WriteFailure::MissingValue));
        assert_eq!(result.success_count(), 3);
    }

    #[tokio::test]
    async fn rejected_write_continues_batch() {
        let (session, resolved, values) = setup();
        session.reject_writes_to(resolved[VARS[0]].clone());
        let result = writer().write_values(&session, &resolved, &values).await;
        assert!(matches!(result.items[0].result, Err(WriteFailure::Rejected(_))));
        assert_eq!(result.success_count(), 3);
    }
}
