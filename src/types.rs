use serde::{Deserialize, Serialize};
use std::fmt;

/// Predicate carried by every generated edge.
pub const PREDICATE_RELATED_THROUGH: &str = "related_through";

/// Opaque identifier for a chain node or link boundary.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// One position in a generated chain. `None` marks a chain endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainNode {
    pub parent_id: Option<NodeId>,
    pub id: NodeId,
    pub child_id: Option<NodeId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeStatement {
    pub subject: NodeId,
    pub predicate: String,
    pub object: NodeId,
    pub label: Option<String>,
}

impl EdgeStatement {
    pub fn related_through(subject: NodeId, object: NodeId) -> Self {
        Self {
            subject,
            predicate: PREDICATE_RELATED_THROUGH.to_string(),
            object,
            label: None,
        }
    }
}

/// Renders the statement as a single N-Quads line with string literal terms.
impl fmt::Display for EdgeStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            Literal(self.subject.as_str()),
            Literal(&self.predicate),
            Literal(self.object.as_str())
        )?;
        if let Some(label) = &self.label {
            write!(f, " {}", Literal(label))?;
        }
        f.write_str(" .")
    }
}

struct Literal<'a>(&'a str);

impl fmt::Display for Literal<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"")?;
        for c in self.0.chars() {
            match c {
                '"' => f.write_str("\\\"")?,
                '\\' => f.write_str("\\\\")?,
                '\n' => f.write_str("\\n")?,
                '\r' => f.write_str("\\r")?,
                _ => write!(f, "{c}")?,
            }
        }
        f.write_str("\"")
    }
}

/// Statements accumulated by one worker and not yet committed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    statements: Vec<EdgeStatement>,
}

impl PendingTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            statements: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, stmt: EdgeStatement) {
        self.statements.push(stmt);
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EdgeStatement> {
        self.statements.iter()
    }

    pub fn statements(&self) -> &[EdgeStatement] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<EdgeStatement> {
        self.statements
    }

    /// Newline-terminated N-Quads document for the whole batch.
    pub fn to_nquads(&self) -> String {
        let mut out = String::with_capacity(self.statements.len() * 96);
        for stmt in &self.statements {
            out.push_str(&stmt.to_string());
            out.push('\n');
        }
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleKind {
    /// Emitted on the reporting interval while the worker is running.
    Periodic,
    /// Emitted exactly once when the worker reaches `Done`.
    Final,
}

/// Statements a worker applied since its previous sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThroughputSample {
    pub worker: WorkerId,
    pub count: u64,
    pub kind: SampleKind,
}

impl ThroughputSample {
    pub fn periodic(worker: WorkerId, count: u64) -> Self {
        Self {
            worker,
            count,
            kind: SampleKind::Periodic,
        }
    }

    pub fn final_sample(worker: WorkerId, count: u64) -> Self {
        Self {
            worker,
            count,
            kind: SampleKind::Final,
        }
    }

    pub fn is_final(&self) -> bool {
        self.kind == SampleKind::Final
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_nquad_line() {
        let stmt = EdgeStatement::related_through(NodeId("a".into()), NodeId("b".into()));
        assert_eq!(stmt.to_string(), r#""a" "related_through" "b" ."#);
    }

    #[test]
    fn escapes_literals_and_appends_label() {
        let mut stmt = EdgeStatement::related_through(NodeId("a\"x".into()), NodeId("b\\".into()));
        stmt.label = Some("g".into());
        assert_eq!(stmt.to_string(), r#""a\"x" "related_through" "b\\" "g" ."#);
    }

    #[test]
    fn batch_renders_one_line_per_statement() {
        let mut tx = PendingTransaction::new();
        tx.push(EdgeStatement::related_through(NodeId("a".into()), NodeId("b".into())));
        tx.push(EdgeStatement::related_through(NodeId("b".into()), NodeId("c".into())));
        assert_eq!(tx.to_nquads().lines().count(), 2);
        assert!(tx.to_nquads().ends_with(".\n"));
    }
}
