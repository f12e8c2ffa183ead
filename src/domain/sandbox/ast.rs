//! Syntax tree for custom indicator programs.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    /// Top-level function definition by name.
    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.statements.iter().find_map(|s| match s {
            Stmt::Def(def) if def.name == name => Some(def),
            _ => None,
        })
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDef> {
        self.statements.iter().filter_map(|s| match s {
            Stmt::Def(def) => Some(def),
            _ => None,
        })
    }

    /// Imported module names with their source positions.
    pub fn imports(&self) -> impl Iterator<Item = (&str, usize)> {
        self.statements.iter().filter_map(|s| match s {
            Stmt::Import { module, position } => Some((module.as_str(), *position)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Import {
        module: String,
        position: usize,
    },
    Def(FunctionDef),
    Assign {
        target: String,
        value: Expr,
        position: usize,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Option<Vec<Stmt>>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    For {
        var: String,
        iterable: Expr,
        body: Vec<Stmt>,
    },
    Return {
        value: Option<Expr>,
        position: usize,
    },
    Break {
        position: usize,
    },
    Continue {
        position: usize,
    },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub position: usize,
    /// Height of this node's subtree; leaves are 1.
    pub depth: usize,
}

impl Expr {
    pub fn leaf(kind: ExprKind, position: usize) -> Self {
        Expr {
            kind,
            position,
            depth: 1,
        }
    }

    pub fn new(kind: ExprKind, position: usize, depth: usize) -> Self {
        Expr {
            kind,
            position,
            depth,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(f64),
    Str(String),
    Bool(bool),
    None,
    Name(String),
    List(Vec<Expr>),
    Attribute {
        object: Box<Expr>,
        name: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        };
        f.write_str(s)
    }
}

/// Visit every expression in `stmts`, depth first, including nested blocks.
pub fn walk_exprs<'a, F>(stmts: &'a [Stmt], visit: &mut F) -> Result<(), F::Error>
where
    F: ExprVisitor<'a>,
{
    for stmt in stmts {
        match stmt {
            Stmt::Import { .. } | Stmt::Break { .. } | Stmt::Continue { .. } => {}
            Stmt::Def(def) => walk_exprs(&def.body, visit)?,
            Stmt::Assign { value, .. } => walk_expr(value, visit)?,
            Stmt::If {
                branches,
                otherwise,
            } => {
                for (cond, body) in branches {
                    walk_expr(cond, visit)?;
                    walk_exprs(body, visit)?;
                }
                if let Some(body) = otherwise {
                    walk_exprs(body, visit)?;
                }
            }
            Stmt::While { condition, body } => {
                walk_expr(condition, visit)?;
                walk_exprs(body, visit)?;
            }
            Stmt::For { iterable, body, .. } => {
                walk_expr(iterable, visit)?;
                walk_exprs(body, visit)?;
            }
            Stmt::Return { value, .. } => {
                if let Some(v) = value {
                    walk_expr(v, visit)?;
                }
            }
            Stmt::Expr(e) => walk_expr(e, visit)?,
        }
    }
    Ok(())
}

fn walk_expr<'a, F>(expr: &'a Expr, visit: &mut F) -> Result<(), F::Error>
where
    F: ExprVisitor<'a>,
{
    visit.visit(expr)?;
    match &expr.kind {
        ExprKind::Number(_)
        | ExprKind::Str(_)
        | ExprKind::Bool(_)
        | ExprKind::None
        | ExprKind::Name(_) => {}
        ExprKind::List(items) => {
            for item in items {
                walk_expr(item, visit)?;
            }
        }
        ExprKind::Attribute { object, .. } => walk_expr(object, visit)?,
        ExprKind::Index { object, index } => {
            walk_expr(object, visit)?;
            walk_expr(index, visit)?;
        }
        ExprKind::Call { callee, args } => {
            walk_expr(callee, visit)?;
            for arg in args {
                walk_expr(arg, visit)?;
            }
        }
        ExprKind::Unary { operand, .. } => walk_expr(operand, visit)?,
        ExprKind::Binary { left, right, .. } => {
            walk_expr(left, visit)?;
            walk_expr(right, visit)?;
        }
    }
    Ok(())
}

pub trait ExprVisitor<'a> {
    type Error;
    fn visit(&mut self, expr: &'a Expr) -> Result<(), Self::Error>;
}
