//! Rewrite rules applied while the parser assembles the tree.
//!
//! Everything here must preserve the left-to-right short-circuit
//! semantics: a subtree with effects is only dropped when evaluation
//! could never have reached it, or when it is provably pure.

use crate::expr::node::{Expr, ExprKind};

/// Bottom-up simplifier, gated by the `-O` level.
///
/// - level 1: constant folding around `!`, double negation, De Morgan
///   toward the leaves, and/or identity and short-circuit elimination
/// - level 2: purity-based elimination and top-level operand stripping
/// - level 4: a fully pure expression becomes `-false`
#[derive(Debug, Clone, Copy)]
pub struct Optimizer {
    level: u8,
    trace: bool,
}

impl Optimizer {
    #[must_use]
    pub const fn new(level: u8) -> Self {
        Self {
            level,
            trace: false,
        }
    }

    #[must_use]
    pub const fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    #[must_use]
    pub const fn level(&self) -> u8 {
        self.level
    }

    #[must_use]
    pub fn not(&self, expr: Expr) -> Expr {
        if self.level == 0 {
            return Expr::not(expr);
        }
        match expr.kind {
            ExprKind::True => self.traced("!true", Expr::truth(false)),
            ExprKind::False => self.traced("!false", Expr::truth(true)),
            ExprKind::Not(inner) => self.traced("!!x", *inner),
            ExprKind::And(l, r) if inverts_cheaply(&l) || inverts_cheaply(&r) => {
                let rewritten = self.or(self.not(*l), self.not(*r));
                self.traced("de-morgan", rewritten)
            }
            ExprKind::Or(l, r) if inverts_cheaply(&l) || inverts_cheaply(&r) => {
                let rewritten = self.and(self.not(*l), self.not(*r));
                self.traced("de-morgan", rewritten)
            }
            other => Expr::not(Expr::new(other)),
        }
    }

    #[must_use]
    pub fn and(&self, lhs: Expr, rhs: Expr) -> Expr {
        if self.level >= 1 {
            // a false lhs short-circuits, so the rhs is unreachable
            if lhs.always_false() {
                return self.traced("false-a-x", lhs);
            }
            if matches!(lhs.kind, ExprKind::True) {
                return self.traced("true-a-x", rhs);
            }
            if matches!(rhs.kind, ExprKind::True) {
                return self.traced("x-a-true", lhs);
            }
            if self.level >= 2 && lhs.is_pure() && rhs.is_pure() && rhs.always_false() {
                return self.traced("pure-a-false", Expr::truth(false));
            }
        }
        Expr::and(lhs, rhs)
    }

    #[must_use]
    pub fn or(&self, lhs: Expr, rhs: Expr) -> Expr {
        if self.level >= 1 {
            if lhs.always_true() {
                return self.traced("true-o-x", lhs);
            }
            if matches!(lhs.kind, ExprKind::False) {
                return self.traced("false-o-x", rhs);
            }
            if matches!(rhs.kind, ExprKind::False) {
                return self.traced("x-o-false", lhs);
            }
            if self.level >= 2 && lhs.is_pure() && rhs.is_pure() && rhs.always_true() {
                return self.traced("pure-o-true", Expr::truth(true));
            }
        }
        Expr::or(lhs, rhs)
    }

    #[must_use]
    pub fn comma(&self, lhs: Expr, rhs: Expr) -> Expr {
        if self.level >= 2 && lhs.is_pure() {
            return self.traced("pure-comma", rhs);
        }
        Expr::comma(lhs, rhs)
    }

    /// The top-level pass: wrap with the implicit print when the caller
    /// asks for one, then peel operands whose value nobody observes.
    #[must_use]
    pub fn finish(&self, expr: Expr, implicit_print: Option<Expr>) -> Expr {
        let mut expr = match implicit_print {
            Some(print) => self.and(expr, print),
            None => expr,
        };
        if self.level >= 2 {
            // the whole-expression value is discarded, so a pure rhs of a
            // top-level operator contributes nothing
            loop {
                match expr.kind {
                    ExprKind::And(l, r) | ExprKind::Or(l, r) | ExprKind::Comma(l, r)
                        if r.is_pure() =>
                    {
                        expr = self.traced("strip-rhs", *l);
                    }
                    other => {
                        expr = Expr::new(other);
                        break;
                    }
                }
            }
        }
        if self.level >= 4 && expr.is_pure() {
            expr = self.traced("pure-tree", Expr::truth(false));
        }
        expr
    }

    fn traced(&self, rule: &str, result: Expr) -> Expr {
        if self.trace {
            eprintln!("-O{}: {rule}: {result}", self.level);
        }
        result
    }
}

/// Negating these gets strictly simpler, which is when De Morgan pays.
fn inverts_cheaply(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Not(_) | ExprKind::True | ExprKind::False
    )
}
