//! Static checks run before any custom indicator code executes.
//!
//! Two passes: a textual scan for dangerous tokens, then a walk of the
//! parsed tree that only admits allow-listed imports and known functions.

use std::collections::HashSet;

use tracing::debug;

use crate::domain::sandbox::ast::{ExprKind, ExprVisitor, Expr, Program, Stmt, walk_exprs};
use crate::domain::sandbox::builtins::{ALLOWED_MODULES, BUILTINS, DENIED_BUILTINS, module_functions};
use crate::domain::sandbox::{ValidationError, ValidationErrorKind, line_of};

/// Identifiers rejected when followed by `(`.
const DENIED_CALL_TOKENS: &[&str] = &[
    "eval",
    "exec",
    "open",
    "compile",
    "globals",
    "locals",
    "vars",
    "getattr",
    "setattr",
    "delattr",
    "input",
    "breakpoint",
    "exit",
    "quit",
    "system",
    "popen",
    "spawn",
    "fork",
    "kill",
];

/// Module names rejected after `import` or `from`.
const DENIED_MODULE_TOKENS: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "socket",
    "shutil",
    "pathlib",
    "ctypes",
    "pickle",
    "importlib",
    "builtins",
    "threading",
    "multiprocessing",
    "requests",
    "urllib",
    "http",
];

/// Parameters the entry function must declare: the data table and the
/// parameter mapping.
pub const ENTRY_ARITY: usize = 2;

fn reject(kind: ValidationErrorKind, message: String) -> ValidationError {
    debug!(?kind, %message, "custom indicator rejected");
    ValidationError { kind, message }
}

/// The part of a line before any `#` comment outside a string literal.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                '#' => return &line[..i],
                _ => {}
            },
        }
    }
    line
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Identifier runs of a line as (start, end) byte offsets.
fn identifiers(line: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in line.char_indices() {
        match (start, is_ident_char(c)) {
            (None, true) => start = Some(i),
            (Some(s), false) => {
                out.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((s, line.len()));
    }
    out
}

/// Reject sources containing denylisted tokens.
pub fn check_text(source: &str) -> Result<(), ValidationError> {
    for (n, raw) in source.lines().enumerate() {
        let line = strip_comment(raw);
        let idents = identifiers(line);
        for (k, &(s, e)) in idents.iter().enumerate() {
            let word = &line[s..e];
            if word.contains("__") {
                return Err(reject(
                    ValidationErrorKind::ForbiddenPattern,
                    format!("forbidden pattern '__' at line {}", n + 1),
                ));
            }
            if DENIED_CALL_TOKENS.contains(&word) && line[e..].trim_start().starts_with('(') {
                return Err(reject(
                    ValidationErrorKind::ForbiddenPattern,
                    format!("forbidden pattern '{}(' at line {}", word, n + 1),
                ));
            }
            if word == "import" || word == "from" {
                if let Some(&(ns, ne)) = idents.get(k + 1) {
                    let module = &line[ns..ne];
                    let adjacent = line[e..ns].trim().is_empty();
                    if adjacent && DENIED_MODULE_TOKENS.contains(&module) {
                        return Err(reject(
                            ValidationErrorKind::ForbiddenPattern,
                            format!("forbidden pattern '{} {}' at line {}", word, module, n + 1),
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

struct StructureCheck<'a> {
    source: &'a str,
    imports: HashSet<&'a str>,
    functions: HashSet<&'a str>,
}

impl<'a> StructureCheck<'a> {
    fn check_call(&self, callee: &'a Expr) -> Result<(), ValidationError> {
        let line = line_of(self.source, callee.position);
        match &callee.kind {
            ExprKind::Name(name) => {
                if DENIED_BUILTINS.contains(&name.as_str()) {
                    return Err(reject(
                        ValidationErrorKind::ForbiddenCall,
                        format!("call to '{}' is not allowed (line {})", name, line),
                    ));
                }
                if self.functions.contains(name.as_str()) || BUILTINS.contains(&name.as_str()) {
                    return Ok(());
                }
                Err(reject(
                    ValidationErrorKind::UnknownFunction,
                    format!("unknown function '{}' (line {})", name, line),
                ))
            }
            ExprKind::Attribute { object, name } => match &object.kind {
                ExprKind::Name(module) if ALLOWED_MODULES.contains(&module.as_str()) => {
                    if !self.imports.contains(module.as_str()) {
                        return Err(reject(
                            ValidationErrorKind::UnknownFunction,
                            format!(
                                "module '{}' is used without 'import {}' (line {})",
                                module, module, line
                            ),
                        ));
                    }
                    if module_functions(module).contains(&name.as_str()) {
                        Ok(())
                    } else {
                        Err(reject(
                            ValidationErrorKind::UnknownFunction,
                            format!("unknown function '{}.{}' (line {})", module, name, line),
                        ))
                    }
                }
                _ => Err(reject(
                    ValidationErrorKind::ForbiddenCall,
                    format!("method call '.{}()' is not allowed (line {})", name, line),
                )),
            },
            _ => Err(reject(
                ValidationErrorKind::ForbiddenCall,
                format!("only named functions can be called (line {})", line),
            )),
        }
    }
}

impl<'a> ExprVisitor<'a> for StructureCheck<'a> {
    type Error = ValidationError;

    fn visit(&mut self, expr: &'a Expr) -> Result<(), ValidationError> {
        match &expr.kind {
            ExprKind::Call { callee, .. } => self.check_call(callee),
            ExprKind::Name(name) if DENIED_BUILTINS.contains(&name.as_str()) => Err(reject(
                ValidationErrorKind::ForbiddenCall,
                format!(
                    "reference to '{}' is not allowed (line {})",
                    name,
                    line_of(self.source, expr.position)
                ),
            )),
            ExprKind::Attribute { name, .. } if name.starts_with('_') => Err(reject(
                ValidationErrorKind::ForbiddenPattern,
                format!(
                    "private attribute '{}' is not allowed (line {})",
                    name,
                    line_of(self.source, expr.position)
                ),
            )),
            _ => Ok(()),
        }
    }
}

/// Allow-list walk over imports, definitions and every call site.
pub fn check_structure(program: &Program, source: &str) -> Result<(), ValidationError> {
    let mut imports = HashSet::new();
    for (module, position) in program.imports() {
        if !ALLOWED_MODULES.contains(&module) {
            return Err(reject(
                ValidationErrorKind::ForbiddenImport,
                format!(
                    "import of module '{}' is not allowed (line {}); allowed: {}",
                    module,
                    line_of(source, position),
                    ALLOWED_MODULES.join(", ")
                ),
            ));
        }
        imports.insert(module);
    }

    let mut functions = HashSet::new();
    for def in program.functions() {
        let line = line_of(source, def.position);
        let name = def.name.as_str();
        if BUILTINS.contains(&name) || DENIED_BUILTINS.contains(&name) || ALLOWED_MODULES.contains(&name) {
            return Err(reject(
                ValidationErrorKind::ForbiddenCall,
                format!("function '{}' shadows a built-in name (line {})", name, line),
            ));
        }
        if !functions.insert(name) {
            return Err(reject(
                ValidationErrorKind::Syntax,
                format!("function '{}' is defined more than once (line {})", name, line),
            ));
        }
    }

    for stmt in &program.statements {
        if let Stmt::Assign {
            target, position, ..
        } = stmt
        {
            if imports.contains(target.as_str()) {
                return Err(reject(
                    ValidationErrorKind::Syntax,
                    format!(
                        "cannot assign to imported module '{}' (line {})",
                        target,
                        line_of(source, *position)
                    ),
                ));
            }
        }
    }

    let mut check = StructureCheck {
        source,
        imports,
        functions,
    };
    walk_exprs(&program.statements, &mut check)
}

/// The entry function must exist at top level and take exactly two parameters.
pub fn check_signature(program: &Program, function: &str) -> Result<(), ValidationError> {
    let def = program.function(function).ok_or_else(|| {
        reject(
            ValidationErrorKind::Signature,
            format!("function '{}' is not defined", function),
        )
    })?;
    if def.params.len() != ENTRY_ARITY {
        return Err(reject(
            ValidationErrorKind::Signature,
            format!(
                "function '{}' must take exactly {} parameters (data, params), found {}",
                function,
                ENTRY_ARITY,
                def.params.len()
            ),
        ));
    }
    Ok(())
}
