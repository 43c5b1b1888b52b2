//! The configuration block format used by indices and manifests.
//!
//! A block is a list of items; each item is a `key = value` pair, a nested
//! `Key { … }` block, or a named block instance `Key "label" { … }`.
//! Values are strings, integers, floats, booleans, lists, or references
//! (bare dotted paths naming another value). Keys are case-sensitive.
//!
//! ```text
//! pkg_base_url = "https://pkgs.example.org"
//! Registry {
//!     Package "snake" {
//!         Version "1.0" {
//!             manifest_url = "https://…/snake-1.0-manifest.acl"
//!             pkg_url = pkg_base_url        # reference, fixed by resolve()
//!         }
//!     }
//! }
//! ```
//!
//! Lookups use [PathExpr] path expressions; a missing key reports
//! [ConfError::NotFound], which callers distinguish from malformed values.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

mod parser;
pub mod path;

pub use path::{PathExpr, Step};

#[derive(Debug, Error)]
pub enum ConfError {
    #[error("syntax error at line {line} near {snippet:?}")]
    Syntax { line: usize, snippet: String },
    #[error("unable to read {0}: {1}")]
    Read(PathBuf, io::Error),
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("invalid path expression {0:?}: {1}")]
    BadPath(String, String),
    #[error("dangling reference {0}")]
    DanglingRef(String),
    #[error("reference cycle involving {0}")]
    RefCycle(String),
    #[error("unresolved reference {0}, resolve() the block first")]
    Unresolved(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
    Ref(PathExpr),
    Block(Block),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Bool(_) => "boolean",
            Value::List(_) => "list",
            Value::Ref(_) => "reference",
            Value::Block(_) => "block",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    pub key: String,
    pub label: Option<String>,
    pub value: Value,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Block {
    pub(crate) items: Vec<Item>,
}

/// Parse a block from a string.
pub fn parse_str(input: &str) -> Result<Block, ConfError> {
    parser::parse(input)
}

/// Parse a block from a file.
pub fn parse_file(path: &Path) -> Result<Block, ConfError> {
    let text = fs::read_to_string(path).map_err(|e| ConfError::Read(path.to_path_buf(), e))?;
    parse_str(&text)
}

impl Block {
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    fn find(&self, key: &str, label: Option<&str>) -> Option<&Value> {
        self.items
            .iter()
            .find(|it| it.key == key && it.label.as_deref() == label)
            .map(|it| &it.value)
    }

    /// A `["literal"]` selector matches an instance label first, and falls
    /// back to matching a key, so that keys containing dots can still be
    /// addressed.
    fn find_selector(&self, selector: &str) -> Option<&Value> {
        self.items
            .iter()
            .find(|it| it.label.as_deref() == Some(selector))
            .or_else(|| {
                self.items
                    .iter()
                    .find(|it| it.key == selector && it.label.is_none())
            })
            .map(|it| &it.value)
    }

    /// Look a value up by path expression. References are an error here;
    /// call [Block::resolve] first.
    pub fn get(&self, expr: &PathExpr) -> Result<&Value, ConfError> {
        match self.get_raw(expr)? {
            Value::Ref(r) => Err(ConfError::Unresolved(r.to_string())),
            v => Ok(v),
        }
    }

    fn get_raw(&self, expr: &PathExpr) -> Result<&Value, ConfError> {
        nav_block(self, expr.steps(), expr)
    }

    fn parse_path(path: &str) -> Result<PathExpr, ConfError> {
        PathExpr::parse(path).map_err(|e| ConfError::BadPath(path.to_string(), e.to_string()))
    }

    /// Look a value up by textual path expression.
    pub fn get_value(&self, path: &str) -> Result<&Value, ConfError> {
        self.get(&Self::parse_path(path)?)
    }

    pub fn get_str(&self, path: &str) -> Result<&str, ConfError> {
        self.get_str_expr(&Self::parse_path(path)?)
    }

    pub fn get_str_expr(&self, expr: &PathExpr) -> Result<&str, ConfError> {
        match self.get(expr)? {
            Value::Str(s) => Ok(s),
            v => Err(ConfError::TypeMismatch {
                path: expr.to_string(),
                expected: "string",
                found: v.type_name(),
            }),
        }
    }

    pub fn get_int(&self, path: &str) -> Result<i64, ConfError> {
        let expr = Self::parse_path(path)?;
        match self.get(&expr)? {
            Value::Int(n) => Ok(*n),
            v => Err(ConfError::TypeMismatch {
                path: expr.to_string(),
                expected: "integer",
                found: v.type_name(),
            }),
        }
    }

    pub fn get_float(&self, path: &str) -> Result<f64, ConfError> {
        let expr = Self::parse_path(path)?;
        match self.get(&expr)? {
            Value::Float(x) => Ok(*x),
            v => Err(ConfError::TypeMismatch {
                path: expr.to_string(),
                expected: "float",
                found: v.type_name(),
            }),
        }
    }

    pub fn get_bool(&self, path: &str) -> Result<bool, ConfError> {
        let expr = Self::parse_path(path)?;
        match self.get(&expr)? {
            Value::Bool(b) => Ok(*b),
            v => Err(ConfError::TypeMismatch {
                path: expr.to_string(),
                expected: "boolean",
                found: v.type_name(),
            }),
        }
    }

    /// Replace every [Value::Ref] in the tree by the scalar it names,
    /// following chains of references but rejecting cycles and dangling
    /// targets. Lookup happens against a snapshot of the unresolved tree,
    /// so the outcome does not depend on item order.
    pub fn resolve(&mut self) -> Result<(), ConfError> {
        let snapshot = self.clone();
        resolve_block(self, &snapshot)
    }
}

fn nav_block<'a>(
    block: &'a Block,
    steps: &[Step],
    full: &PathExpr,
) -> Result<&'a Value, ConfError> {
    let (value, rest) = match steps {
        [] => return Err(ConfError::NotFound(full.to_string())),
        [Step::Name(k), Step::Label(l), rest @ ..] if block.find(k, Some(l)).is_some() => (
            block.find(k, Some(l)).expect("presence checked above"),
            rest,
        ),
        [Step::Name(k), rest @ ..] => (
            block
                .find(k, None)
                .ok_or_else(|| ConfError::NotFound(full.to_string()))?,
            rest,
        ),
        [Step::Label(l), rest @ ..] => (
            block
                .find_selector(l)
                .ok_or_else(|| ConfError::NotFound(full.to_string()))?,
            rest,
        ),
        [Step::Index(_), ..] => {
            return Err(ConfError::TypeMismatch {
                path: full.to_string(),
                expected: "list",
                found: "block",
            })
        }
    };

    nav_value(value, rest, full)
}

fn nav_value<'a>(
    value: &'a Value,
    steps: &[Step],
    full: &PathExpr,
) -> Result<&'a Value, ConfError> {
    match (value, steps) {
        (v, []) => Ok(v),
        (Value::Block(b), _) => nav_block(b, steps, full),
        (Value::List(items), [Step::Index(n), rest @ ..]) => {
            let v = items
                .get(*n)
                .ok_or_else(|| ConfError::NotFound(full.to_string()))?;
            nav_value(v, rest, full)
        }
        (v, _) => Err(ConfError::TypeMismatch {
            path: full.to_string(),
            expected: "block or list",
            found: v.type_name(),
        }),
    }
}

fn resolve_block(block: &mut Block, root: &Block) -> Result<(), ConfError> {
    for item in &mut block.items {
        resolve_value(&mut item.value, root)?;
    }
    Ok(())
}

fn resolve_value(value: &mut Value, root: &Block) -> Result<(), ConfError> {
    match value {
        Value::Ref(expr) => {
            let mut seen = Vec::new();
            let resolved = deref(root, expr, &mut seen)?;
            *value = resolved;
        }
        Value::List(items) => {
            for item in items {
                resolve_value(item, root)?;
            }
        }
        Value::Block(b) => resolve_block(b, root)?,
        _ => {}
    }
    Ok(())
}

fn deref(root: &Block, expr: &PathExpr, seen: &mut Vec<String>) -> Result<Value, ConfError> {
    let key = expr.to_string();
    if seen.contains(&key) {
        return Err(ConfError::RefCycle(key));
    }
    seen.push(key.clone());

    let value = root.get_raw(expr).map_err(|e| match e {
        ConfError::NotFound(_) => ConfError::DanglingRef(key.clone()),
        other => other,
    })?;

    match value {
        Value::Ref(next) => deref(root, next, seen),
        Value::Block(_) => Err(ConfError::TypeMismatch {
            path: key,
            expected: "scalar or list",
            found: "block",
        }),
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_str, ConfError, Value};
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
# registry index for the test suite
pkg_base_url = "https://pkgs.example.org"
retries = 3
ratio = 0.5
verbose = true
mirrors = ["https://a.example.org", "https://b.example.org"]

Registry {
    Package "snake" {
        Version "1.0" {
            manifest_url = "https://pkgs.example.org/1.0/snake-1.0-manifest.acl"
            pkg_url = "https://pkgs.example.org/1.0/snake-1.0.pnd"
        }
    }
}
"#;

    #[test]
    fn scalars_parse() {
        let block = parse_str(SAMPLE).expect("must parse");
        assert_eq!(
            "https://pkgs.example.org",
            block.get_str("pkg_base_url").expect("get_str")
        );
        assert_eq!(3, block.get_int("retries").expect("get_int"));
        assert_eq!(0.5, block.get_float("ratio").expect("get_float"));
        assert!(block.get_bool("verbose").expect("get_bool"));
    }

    #[test]
    fn nested_lookup() {
        let block = parse_str(SAMPLE).expect("must parse");
        assert_eq!(
            "https://pkgs.example.org/1.0/snake-1.0.pnd",
            block
                .get_str("Registry.Package[\"snake\"].Version[\"1.0\"].pkg_url")
                .expect("nested get")
        );
    }

    #[test]
    fn list_index_lookup() {
        let block = parse_str(SAMPLE).expect("must parse");
        assert_eq!(
            "https://b.example.org",
            block.get_str("mirrors[1]").expect("index get")
        );
        assert!(matches!(
            block.get_str("mirrors[2]"),
            Err(ConfError::NotFound(_))
        ));
    }

    #[test]
    fn missing_key_is_not_found() {
        let block = parse_str(SAMPLE).expect("must parse");
        assert!(matches!(
            block.get_str("no_such_key"),
            Err(ConfError::NotFound(_))
        ));
        assert!(matches!(
            block.get_str("Registry.Package[\"python\"].Version[\"1.0\"].pkg_url"),
            Err(ConfError::NotFound(_))
        ));
    }

    #[test]
    fn wrong_type_is_type_mismatch() {
        let block = parse_str(SAMPLE).expect("must parse");
        assert!(matches!(
            block.get_str("retries"),
            Err(ConfError::TypeMismatch { .. })
        ));
        assert!(matches!(
            block.get_int("pkg_base_url"),
            Err(ConfError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn selector_falls_back_to_key_lookup() {
        let block = parse_str(
            r#"
Package "snake" {
    manifest_url_1 = "https://example.org/m"
}
"#,
        )
        .expect("must parse");
        assert_eq!(
            "https://example.org/m",
            block
                .get_str("Package[\"snake\"].[\"manifest_url_1\"]")
                .expect("selector key fallback")
        );
    }

    #[test]
    fn references_resolve() {
        let mut block = parse_str(
            r#"
base = "https://example.org"
alias = base
chain = alias
Registry {
    inner = base
}
"#,
        )
        .expect("must parse");

        // unresolved refs are an error to read
        assert!(matches!(
            block.get_str("alias"),
            Err(ConfError::Unresolved(_))
        ));

        block.resolve().expect("must resolve");
        assert_eq!("https://example.org", block.get_str("alias").expect("get"));
        assert_eq!("https://example.org", block.get_str("chain").expect("get"));
        assert_eq!(
            "https://example.org",
            block.get_str("Registry.inner").expect("get")
        );
    }

    #[test]
    fn dangling_reference_rejected() {
        let mut block = parse_str("alias = nonexistent\n").expect("must parse");
        assert!(matches!(
            block.resolve(),
            Err(ConfError::DanglingRef(_))
        ));
    }

    #[test]
    fn reference_cycle_rejected() {
        let mut block = parse_str("a = b\nb = a\n").expect("must parse");
        assert!(matches!(block.resolve(), Err(ConfError::RefCycle(_))));
    }

    #[test]
    fn syntax_error_reports_line() {
        let err = parse_str("good = 1\nbad = = 2\n").expect_err("must fail");
        match err {
            ConfError::Syntax { line, .. } => assert_eq!(2, line),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn string_escapes() {
        let block = parse_str(r#"s = "a\"b\\c\nd""#).expect("must parse");
        assert_eq!("a\"b\\c\nd", block.get_str("s").expect("get"));
    }

    #[test]
    fn empty_input_is_empty_block() {
        let block = parse_str("# nothing here\n").expect("must parse");
        assert!(block.items().is_empty());
    }

    #[test]
    fn negative_numbers() {
        let block = parse_str("n = -42\nx = -0.25\n").expect("must parse");
        assert_eq!(-42, block.get_int("n").expect("get"));
        assert_eq!(-0.25, block.get_float("x").expect("get"));
    }

    #[test]
    fn value_equality_for_lists() {
        let block = parse_str(r#"xs = [1, 2, 3]"#).expect("must parse");
        let expr = super::PathExpr::parse("xs").expect("path");
        assert_eq!(
            &Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
            block.get(&expr).expect("get")
        );
    }
}
