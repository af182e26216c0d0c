//! XPath-subset query compiler.
//!
//! The supported grammar is a location path anchored at the workspace root:
//!
//! ```text
//! query   := "/jcr:root" step* deep?
//! step    := "/" name-test
//! deep    := "//*"
//! ```
//!
//! A step matches every child carrying that name, so same-name siblings are
//! all returned. The trailing `//*` widens the result to the matched nodes
//! and every node below them.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::path::validate_query_name;

/// The root step every statement starts with.
pub const ROOT_STEP: &str = "/jcr:root";

/// Suffix selecting the matched nodes and all their descendants.
pub const DEEP_SUFFIX: &str = "//*";

/// Query languages a store may accept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryDialect {
    #[default]
    XPath,
    Sql,
}

/// A parsed, validated query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledQuery {
    pub steps: Vec<String>,
    pub deep: bool,
}

impl CompiledQuery {
    /// Compile a statement.
    ///
    /// Only [`QueryDialect::XPath`] is supported; any other dialect fails with
    /// [`StoreError::InvalidQuery`].
    pub fn compile(statement: &str, dialect: QueryDialect) -> StoreResult<Self> {
        let invalid = |reason: String| StoreError::InvalidQuery {
            statement: statement.to_string(),
            reason,
        };

        if dialect != QueryDialect::XPath {
            return Err(invalid(format!("unsupported dialect {dialect:?}")));
        }

        let rest = statement
            .strip_prefix(ROOT_STEP)
            .ok_or_else(|| invalid(format!("must start with {ROOT_STEP}")))?;
        let (rest, deep) = match rest.strip_suffix(DEEP_SUFFIX) {
            Some(r) => (r, true),
            None => (rest, false),
        };

        let mut steps = Vec::new();
        if !rest.is_empty() {
            let body = rest
                .strip_prefix('/')
                .ok_or_else(|| invalid(format!("unexpected text {rest:?}")))?;
            for step in body.split('/') {
                validate_query_name(step).map_err(invalid)?;
                steps.push(step.to_string());
            }
        }

        Ok(Self { steps, deep })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_root() {
        let q = CompiledQuery::compile("/jcr:root", QueryDialect::XPath).unwrap();
        assert!(q.steps.is_empty());
        assert!(!q.deep);
    }

    #[test]
    fn compile_root_deep() {
        let q = CompiledQuery::compile("/jcr:root//*", QueryDialect::XPath).unwrap();
        assert!(q.steps.is_empty());
        assert!(q.deep);
    }

    #[test]
    fn compile_path_steps() {
        let q = CompiledQuery::compile("/jcr:root/a/_jn_42//*", QueryDialect::XPath).unwrap();
        assert_eq!(q.steps, vec!["a", "_jn_42"]);
        assert!(q.deep);
    }

    #[test]
    fn reject_missing_root() {
        assert!(matches!(
            CompiledQuery::compile("/a/b", QueryDialect::XPath),
            Err(StoreError::InvalidQuery { .. })
        ));
    }

    #[test]
    fn reject_leading_digit() {
        assert!(CompiledQuery::compile("/jcr:root/9lives", QueryDialect::XPath).is_err());
    }

    #[test]
    fn reject_equals_and_plus() {
        assert!(CompiledQuery::compile("/jcr:root/a=b", QueryDialect::XPath).is_err());
        assert!(CompiledQuery::compile("/jcr:root/a+b", QueryDialect::XPath).is_err());
    }

    #[test]
    fn reject_empty_step() {
        assert!(CompiledQuery::compile("/jcr:root/a//b", QueryDialect::XPath).is_err());
    }

    #[test]
    fn reject_sql_dialect() {
        assert!(CompiledQuery::compile("/jcr:root", QueryDialect::Sql).is_err());
    }

    #[test]
    fn dialect_serde() {
        let json = serde_json::to_string(&QueryDialect::XPath).unwrap();
        assert_eq!(json, "\"xpath\"");
    }
}
