//! Script Functions as Base Commands
//!
//! A tool can run a function written in a scripting language instead of an
//! installed command. The caller supplies the function body and the names
//! it uses from outside (its free variables); each free variable must have
//! a definition in a [`Definitions`] list, which may in turn declare its own
//! dependencies. Nothing is captured implicitly.
//!
//! At emission time the function and the definitions it needs are rendered
//! into one script. The script parses `id=value` arguments and calls the
//! function with them.

use std::collections::HashSet;

use indexmap::IndexMap;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CwlError, Result};

static PYTHON_IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// R syntactic names, leaving out the `.2x` forms that parse as numbers
static R_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[A-Za-z]|\.[A-Za-z._]|\.$)[A-Za-z0-9._]*$").unwrap());

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue",
    "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if", "import", "in",
    "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with",
    "yield",
];

const R_KEYWORDS: &[&str] = &[
    "if", "else", "repeat", "while", "function", "for", "next", "break", "TRUE", "FALSE", "NULL",
    "Inf", "NaN", "NA", "in",
];

/// Interpreter family for generated scripts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLanguage {
    Python,
    R,
}

impl ScriptLanguage {
    /// Command used to run the script.
    pub fn interpreter(&self) -> &'static str {
        match self {
            Self::Python => "python3",
            Self::R => "Rscript",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Python => "py",
            Self::R => "R",
        }
    }

    fn is_identifier(&self, name: &str) -> bool {
        match self {
            Self::Python => PYTHON_IDENT.is_match(name) && !PYTHON_KEYWORDS.contains(&name),
            Self::R => R_IDENT.is_match(name) && !R_KEYWORDS.contains(&name),
        }
    }

    fn display_name(&self) -> &'static str {
        match self {
            Self::Python => "Python",
            Self::R => "R",
        }
    }

    /// Code turning `id=value` arguments into a name -> value map `args`.
    fn argument_prelude(&self) -> &'static str {
        match self {
            Self::Python => concat!(
                "import sys\n",
                "args = dict(a.split(\"=\", 1) for a in sys.argv[1:] if \"=\" in a)\n",
            ),
            Self::R => concat!(
                "argv <- commandArgs(trailingOnly = TRUE)\n",
                "kv <- regmatches(argv, regexpr(\"=\", argv), invert = TRUE)\n",
                "args <- setNames(lapply(kv, `[`, 2), vapply(kv, `[`, \"\", 1))\n",
            ),
        }
    }

    fn function_header(&self, name: &str, params: &[String]) -> String {
        match self {
            Self::Python => format!("def {}({}):", name, params.join(", ")),
            Self::R => format!("{} <- function({}) {{", name, params.join(", ")),
        }
    }

    fn function_footer(&self) -> Option<&'static str> {
        match self {
            Self::Python => None,
            Self::R => Some("}"),
        }
    }

    /// Call forwarding only the declared parameters out of `args`.
    fn call(&self, name: &str, params: &[String]) -> String {
        if params.is_empty() {
            return format!("{}()", name);
        }
        let quoted: Vec<String> = params.iter().map(|p| format!("\"{}\"", p)).collect();
        match self {
            Self::Python => format!(
                "{}(**{{k: v for k, v in args.items() if k in [{}]}})",
                name,
                quoted.join(", ")
            ),
            Self::R => format!(
                "do.call({}, args[intersect(c({}), names(args))])",
                name,
                quoted.join(", ")
            ),
        }
    }

    fn indent_body(&self, body: &str) -> String {
        if body.trim().is_empty() {
            return match self {
                Self::Python => "    pass".to_string(),
                Self::R => String::new(),
            };
        }
        body.lines()
            .map(|line| {
                if line.trim().is_empty() {
                    String::new()
                } else {
                    format!("    {}", line)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A named piece of source that a script function may depend on.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub source: String,

    /// Names this definition itself uses
    pub depends_on: Vec<String>,
}

/// Definitions available to script functions, keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Definitions(IndexMap<String, Definition>);

impl Definitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.0.insert(
            name.into(),
            Definition {
                source: source.into(),
                depends_on: Vec::new(),
            },
        );
        self
    }

    pub fn define_with_deps(
        mut self,
        name: impl Into<String>,
        source: impl Into<String>,
        depends_on: &[&str],
    ) -> Self {
        self.0.insert(
            name.into(),
            Definition {
                source: source.into(),
                depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            },
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<&Definition> {
        self.0.get(name)
    }
}

/// A function used as a tool's base command.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptFunction {
    pub language: ScriptLanguage,
    pub name: String,
    pub params: Vec<String>,
    pub body: String,

    /// Names the body uses that are defined elsewhere
    pub free_vars: Vec<String>,
    pub definitions: Definitions,
}

impl ScriptFunction {
    pub fn new(language: ScriptLanguage, name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            language,
            name: name.into(),
            params: Vec::new(),
            body: body.into(),
            free_vars: Vec::new(),
            definitions: Definitions::new(),
        }
    }

    pub fn params(mut self, params: &[&str]) -> Self {
        self.params = params.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn uses(mut self, names: &[&str]) -> Self {
        self.free_vars = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_definitions(mut self, definitions: Definitions) -> Self {
        self.definitions = definitions;
        self
    }

    /// File name the rendered script is staged under.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.language.extension())
    }

    /// Resolves free variables transitively, dependencies first.
    pub fn resolve(&self) -> Result<Vec<&str>> {
        let mut order = Vec::new();
        let mut done = HashSet::new();
        let mut visiting = HashSet::new();
        for name in &self.free_vars {
            self.visit(name, &mut order, &mut done, &mut visiting)?;
        }
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        order: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
        visiting: &mut HashSet<&'a str>,
    ) -> Result<()> {
        if done.contains(name) {
            return Ok(());
        }
        if !visiting.insert(name) {
            return Err(CwlError::UnsupportedCapture {
                script: self.name.clone(),
                name: name.to_string(),
                message: "definitions depend on each other in a cycle".to_string(),
            });
        }

        let definition = self.definitions.get(name).ok_or_else(|| CwlError::UnsupportedCapture {
            script: self.name.clone(),
            name: name.to_string(),
            message: "no definition supplied".to_string(),
        })?;

        for dep in &definition.depends_on {
            self.visit(dep, order, done, visiting)?;
        }

        visiting.remove(name);
        done.insert(name);
        order.push(name);
        Ok(())
    }

    /// Fails unless the function and parameter names are identifiers in
    /// the script language.
    pub fn check_names(&self) -> Result<()> {
        for name in std::iter::once(&self.name).chain(&self.params) {
            if !self.language.is_identifier(name) {
                return Err(CwlError::UnsupportedCapture {
                    script: self.name.clone(),
                    name: name.clone(),
                    message: format!("not a valid {} identifier", self.language.display_name()),
                });
            }
        }
        Ok(())
    }

    /// Renders the complete script text.
    pub fn render(&self) -> Result<String> {
        self.check_names()?;
        let deps = self.resolve()?;
        debug!(
            "Rendering script '{}' with {} definitions",
            self.file_name(),
            deps.len()
        );

        let mut script = String::new();
        for name in deps {
            if let Some(definition) = self.definitions.get(name) {
                script.push_str(definition.source.trim_end());
                script.push_str("\n\n");
            }
        }

        script.push_str(&self.language.function_header(&self.name, &self.params));
        script.push('\n');
        script.push_str(&self.language.indent_body(&self.body));
        script.push('\n');
        if let Some(footer) = self.language.function_footer() {
            script.push_str(footer);
            script.push('\n');
        }
        script.push('\n');
        script.push_str(self.language.argument_prelude());
        script.push_str(&self.language.call(&self.name, &self.params));
        script.push('\n');
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_lines() -> ScriptFunction {
        ScriptFunction::new(
            ScriptLanguage::Python,
            "count_lines",
            "n = line_count(path)\nprint(fmt(n))",
        )
        .params(&["path"])
        .uses(&["line_count", "fmt"])
    }

    #[test]
    fn test_missing_definition_fails() {
        let err = count_lines().render().unwrap_err();
        assert!(matches!(err, CwlError::UnsupportedCapture { ref name, .. } if name == "line_count"));
    }

    #[test]
    fn test_transitive_resolution_order() {
        let defs = Definitions::new()
            .define_with_deps(
                "line_count",
                "def line_count(p):\n    return len(read_all(p).splitlines())",
                &["read_all"],
            )
            .define("read_all", "def read_all(p):\n    return open(p).read()")
            .define("fmt", "def fmt(n):\n    return f\"{n} lines\"");

        let function = count_lines().with_definitions(defs);
        assert_eq!(function.resolve().unwrap(), vec!["read_all", "line_count", "fmt"]);

        let script = function.render().unwrap();
        let read_all = script.find("def read_all").unwrap();
        let line_count = script.find("def line_count").unwrap();
        let main = script.find("def count_lines(path):").unwrap();
        assert!(read_all < line_count && line_count < main);
        assert!(script.contains("    n = line_count(path)"));
        assert!(script.ends_with("count_lines(**{k: v for k, v in args.items() if k in [\"path\"]})\n"));
    }

    #[test]
    fn test_dependency_cycle_fails() {
        let defs = Definitions::new()
            .define_with_deps("a", "a = 1", &["b"])
            .define_with_deps("b", "b = 2", &["a"]);
        let function = ScriptFunction::new(ScriptLanguage::Python, "f", "pass")
            .uses(&["a"])
            .with_definitions(defs);
        assert!(matches!(function.resolve(), Err(CwlError::UnsupportedCapture { .. })));
    }

    #[test]
    fn test_empty_python_body_passes() {
        let script = ScriptFunction::new(ScriptLanguage::Python, "noop", "  \n").render().unwrap();
        assert!(script.starts_with("def noop():\n    pass\n"));
        assert!(script.ends_with("noop()\n"));
    }

    #[test]
    fn test_invalid_identifiers_rejected() {
        let dashed = ScriptFunction::new(ScriptLanguage::Python, "count-lines", "pass");
        assert!(matches!(
            dashed.render(),
            Err(CwlError::UnsupportedCapture { ref name, .. }) if name == "count-lines"
        ));

        let keyword = ScriptFunction::new(ScriptLanguage::Python, "f", "pass").params(&["lambda"]);
        assert!(matches!(keyword.render(), Err(CwlError::UnsupportedCapture { .. })));

        let dotted = ScriptFunction::new(ScriptLanguage::R, "read.counts", "x").params(&["file.path"]);
        assert!(dotted.render().is_ok());
        let numeric = ScriptFunction::new(ScriptLanguage::R, "f", "x").params(&[".2x"]);
        assert!(numeric.render().is_err());
    }

    #[test]
    fn test_r_script_rendering() {
        let function = ScriptFunction::new(ScriptLanguage::R, "greet", "cat(paste(\"Hello\", name), \"\\n\")")
            .params(&["name"]);
        let script = function.render().unwrap();
        assert!(script.starts_with("greet <- function(name) {\n"));
        assert!(script.contains("commandArgs(trailingOnly = TRUE)"));
        assert!(script
            .trim_end()
            .ends_with("do.call(greet, args[intersect(c(\"name\"), names(args))])"));
        assert_eq!(function.file_name(), "greet.R");
        assert_eq!(function.language.interpreter(), "Rscript");
    }
}
