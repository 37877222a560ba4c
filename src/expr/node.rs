use core::cell::Cell;
use core::fmt;
use core::time::Duration;
use std::io::{self, Write};

use regex::bytes::Regex;

use crate::expr::exec::ExecSpec;
use crate::fmt::FormatProgram;
use crate::util::{Diagnostics, SinkRef};

/// How a numeric test argument compares: `N`, `+N` or `-N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumCmp {
    Exact,
    Greater,
    Less,
}

impl NumCmp {
    #[must_use]
    pub fn matches(self, value: i64, n: i64) -> bool {
        match self {
            Self::Exact => value == n,
            Self::Greater => value > n,
            Self::Less => value < n,
        }
    }

    const fn prefix(self) -> &'static str {
        match self {
            Self::Exact => "",
            Self::Greater => "+",
            Self::Less => "-",
        }
    }
}

/// `-perm` comparison shapes: exact, all bits (`-`), any bit (`/`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeCmp {
    Exact,
    AllBits,
    AnyBits,
}

/// Which stat timestamp a time test or directive reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeField {
    Accessed,
    Changed,
    Modified,
}

impl TimeField {
    #[must_use]
    pub const fn letter(self) -> char {
        match self {
            Self::Accessed => 'a',
            Self::Changed => 'c',
            Self::Modified => 'm',
        }
    }

    /// Seconds and nanoseconds of this field from a stat buffer.
    #[must_use]
    pub fn of(self, st: &libc::stat) -> (i64, i64) {
        match self {
            Self::Accessed => (st.st_atime, st.st_atime_nsec),
            Self::Changed => (st.st_ctime, st.st_ctime_nsec),
            Self::Modified => (st.st_mtime, st.st_mtime_nsec),
        }
    }
}

/// `-size` units; sizes round up to the unit before comparing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    Blocks,
    Bytes,
    Words,
    Kib,
    Mib,
    Gib,
    Tib,
    Pib,
}

impl SizeUnit {
    #[must_use]
    pub const fn bytes(self) -> u64 {
        match self {
            Self::Blocks => 512,
            Self::Bytes => 1,
            Self::Words => 2,
            Self::Kib => 1 << 10,
            Self::Mib => 1 << 20,
            Self::Gib => 1 << 30,
            Self::Tib => 1 << 40,
            Self::Pib => 1 << 50,
        }
    }

    #[must_use]
    pub const fn suffix(self) -> char {
        match self {
            Self::Blocks => 'b',
            Self::Bytes => 'c',
            Self::Words => 'w',
            Self::Kib => 'k',
            Self::Mib => 'M',
            Self::Gib => 'G',
            Self::Tib => 'T',
            Self::Pib => 'P',
        }
    }

    #[must_use]
    pub const fn from_suffix(suffix: u8) -> Option<Self> {
        match suffix {
            b'b' => Some(Self::Blocks),
            b'c' => Some(Self::Bytes),
            b'w' => Some(Self::Words),
            b'k' => Some(Self::Kib),
            b'M' => Some(Self::Mib),
            b'G' => Some(Self::Gib),
            b'T' => Some(Self::Tib),
            b'P' => Some(Self::Pib),
            _ => None,
        }
    }
}

/// Pure, side-effect-free predicates.
#[derive(Debug)]
pub enum Test {
    Name { pattern: Box<str>, re: Regex, ci: bool },
    Path { pattern: Box<str>, re: Regex, ci: bool },
    LinkName { pattern: Box<str>, re: Regex, ci: bool },
    RegexMatch { pattern: Box<str>, re: Regex, ci: bool },
    Kind { mask: u16, spelled: Box<str> },
    XKind { mask: u16, spelled: Box<str> },
    FsType { name: Box<str> },
    Perm { mode: u32, how: ModeCmp },
    Size { n: u64, cmp: NumCmp, unit: SizeUnit },
    Links { n: u64, cmp: NumCmp },
    Inode { n: u64, cmp: NumCmp },
    Uid { n: u32, cmp: NumCmp },
    Gid { n: u32, cmp: NumCmp },
    NoUser,
    NoGroup,
    Hidden,
    /// Zero-byte regular file or directory with no entries. The size
    /// check can misreport for special files whose size is synthesised by
    /// the kernel; those never match here since only regular files and
    /// directories are considered.
    Empty,
    TimeCount {
        field: TimeField,
        unit_secs: i64,
        n: i64,
        cmp: NumCmp,
        reference: i64,
    },
    NewerThan { field: TimeField, secs: i64, nanos: i64, spelled: Box<str> },
    SameFile { dev: u64, ino: u64, spelled: Box<str> },
    Sparse,
    Access { mode: i32, spelled: Box<str> },
}

/// Predicates with observable effects.
#[derive(Debug)]
pub enum Action {
    Print { sink: SinkRef, null: bool },
    Printf { sink: SinkRef, program: FormatProgram },
    Delete,
    Exec(ExecSpec),
    Prune,
    Quit,
    NoHidden,
}

/// The tagged variants of one expression node. Operands are exclusively
/// owned, which is what lets the optimizer rewrite by moving children
/// around instead of cloning.
#[derive(Debug)]
pub enum ExprKind {
    True,
    False,
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Comma(Box<Expr>, Box<Expr>),
    Test(Test),
    Act(Action),
}

/// One expression node plus its evaluation statistics.
#[derive(Debug)]
pub struct Expr {
    pub(crate) kind: ExprKind,
    pub(crate) evals: Cell<u64>,
    pub(crate) hits: Cell<u64>,
    pub(crate) elapsed: Cell<Duration>,
}

impl Expr {
    #[must_use]
    pub fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            evals: Cell::new(0),
            hits: Cell::new(0),
            elapsed: Cell::new(Duration::ZERO),
        }
    }

    #[must_use]
    pub fn truth(value: bool) -> Self {
        Self::new(if value { ExprKind::True } else { ExprKind::False })
    }

    #[must_use]
    pub fn not(expr: Self) -> Self {
        Self::new(ExprKind::Not(Box::new(expr)))
    }

    #[must_use]
    pub fn and(lhs: Self, rhs: Self) -> Self {
        Self::new(ExprKind::And(Box::new(lhs), Box::new(rhs)))
    }

    #[must_use]
    pub fn or(lhs: Self, rhs: Self) -> Self {
        Self::new(ExprKind::Or(Box::new(lhs), Box::new(rhs)))
    }

    #[must_use]
    pub fn comma(lhs: Self, rhs: Self) -> Self {
        Self::new(ExprKind::Comma(Box::new(lhs), Box::new(rhs)))
    }

    #[must_use]
    pub const fn kind(&self) -> &ExprKind {
        &self.kind
    }

    /// No observable effect when evaluated.
    #[must_use]
    pub fn is_pure(&self) -> bool {
        match self.kind {
            ExprKind::True | ExprKind::False | ExprKind::Test(_) => true,
            ExprKind::Act(_) => false,
            ExprKind::Not(ref x) => x.is_pure(),
            ExprKind::And(ref l, ref r)
            | ExprKind::Or(ref l, ref r)
            | ExprKind::Comma(ref l, ref r) => l.is_pure() && r.is_pure(),
        }
    }

    /// Evaluates true on every input, independent of the file.
    #[must_use]
    pub fn always_true(&self) -> bool {
        match self.kind {
            ExprKind::True => true,
            ExprKind::False | ExprKind::Test(_) => false,
            ExprKind::Act(ref act) => match *act {
                Action::Print { .. } | Action::Printf { .. } | Action::Prune | Action::Quit => {
                    true
                }
                Action::Exec(ref spec) => spec.batched(),
                Action::Delete | Action::NoHidden => false,
            },
            ExprKind::Not(ref x) => x.always_false(),
            ExprKind::And(ref l, ref r) => l.always_true() && r.always_true(),
            ExprKind::Or(ref l, ref r) => l.always_true() || r.always_true(),
            ExprKind::Comma(_, ref r) => r.always_true(),
        }
    }

    /// Evaluates false on every input.
    #[must_use]
    pub fn always_false(&self) -> bool {
        match self.kind {
            ExprKind::False => true,
            ExprKind::True | ExprKind::Test(_) | ExprKind::Act(_) => false,
            ExprKind::Not(ref x) => x.always_true(),
            ExprKind::And(ref l, ref r) => l.always_false() || r.always_false(),
            ExprKind::Or(ref l, ref r) => l.always_false() && r.always_false(),
            ExprKind::Comma(_, ref r) => r.always_false(),
        }
    }

    /// Whether any leaf produces user-visible output; decides the
    /// implicit `-print` wrapper.
    #[must_use]
    pub fn has_output_action(&self) -> bool {
        match self.kind {
            ExprKind::Act(ref act) => matches!(
                *act,
                Action::Print { .. } | Action::Printf { .. } | Action::Delete | Action::Exec(_)
            ),
            ExprKind::True | ExprKind::False | ExprKind::Test(_) => false,
            ExprKind::Not(ref x) => x.has_output_action(),
            ExprKind::And(ref l, ref r)
            | ExprKind::Or(ref l, ref r)
            | ExprKind::Comma(ref l, ref r) => l.has_output_action() || r.has_output_action(),
        }
    }

    pub(crate) fn record(&self, result: bool, elapsed: Option<Duration>) {
        self.evals.set(self.evals.get() + 1);
        if result {
            self.hits.set(self.hits.get() + 1);
        }
        if let Some(dt) = elapsed {
            self.elapsed.set(self.elapsed.get() + dt);
        }
    }

    /// Run the end-of-walk duties of the tree: spawn what the batched
    /// exec specs still hold.
    pub fn finish(&self, diag: &Diagnostics) {
        match self.kind {
            ExprKind::Act(Action::Exec(ref spec)) if spec.batched() => spec.flush(diag),
            ExprKind::Not(ref x) => x.finish(diag),
            ExprKind::And(ref l, ref r)
            | ExprKind::Or(ref l, ref r)
            | ExprKind::Comma(ref l, ref r) => {
                l.finish(diag);
                r.finish(diag);
            }
            _ => {}
        }
    }

    /// Per-node statistics dump for `-D rates`.
    pub fn dump_rates(&self, out: &mut dyn Write, indent: usize) -> io::Result<()> {
        let evals = self.evals.get();
        let hits = self.hits.get();
        let rate = if evals == 0 {
            0.0
        } else {
            hits as f64 * 100.0 / evals as f64
        };
        writeln!(
            out,
            "{:indent$}{:<24} evals {:>8}  true {:>8} ({rate:5.1}%)  {:?}",
            "",
            self.head(),
            evals,
            hits,
            self.elapsed.get(),
            indent = indent
        )?;
        match self.kind {
            ExprKind::Not(ref x) => x.dump_rates(out, indent + 2),
            ExprKind::And(ref l, ref r)
            | ExprKind::Or(ref l, ref r)
            | ExprKind::Comma(ref l, ref r) => {
                l.dump_rates(out, indent + 2)?;
                r.dump_rates(out, indent + 2)
            }
            _ => Ok(()),
        }
    }

    fn head(&self) -> String {
        match self.kind {
            ExprKind::True => "-true".into(),
            ExprKind::False => "-false".into(),
            ExprKind::Not(_) => "!".into(),
            ExprKind::And(..) => "-a".into(),
            ExprKind::Or(..) => "-o".into(),
            ExprKind::Comma(..) => ",".into(),
            ExprKind::Test(ref test) => test.to_string(),
            ExprKind::Act(ref act) => act.to_string(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ExprKind::True => f.write_str("-true"),
            ExprKind::False => f.write_str("-false"),
            ExprKind::Not(ref x) => write!(f, "( ! {x} )"),
            ExprKind::And(ref l, ref r) => write!(f, "( {l} -a {r} )"),
            ExprKind::Or(ref l, ref r) => write!(f, "( {l} -o {r} )"),
            ExprKind::Comma(ref l, ref r) => write!(f, "( {l} , {r} )"),
            ExprKind::Test(ref test) => test.fmt(f),
            ExprKind::Act(ref act) => act.fmt(f),
        }
    }
}

impl fmt::Display for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Name { ref pattern, ci, .. } => {
                write!(f, "{} {pattern}", if ci { "-iname" } else { "-name" })
            }
            Self::Path { ref pattern, ci, .. } => {
                write!(f, "{} {pattern}", if ci { "-ipath" } else { "-path" })
            }
            Self::LinkName { ref pattern, ci, .. } => {
                write!(f, "{} {pattern}", if ci { "-ilname" } else { "-lname" })
            }
            Self::RegexMatch { ref pattern, ci, .. } => {
                write!(f, "{} {pattern}", if ci { "-iregex" } else { "-regex" })
            }
            Self::Kind { ref spelled, .. } => write!(f, "-type {spelled}"),
            Self::XKind { ref spelled, .. } => write!(f, "-xtype {spelled}"),
            Self::FsType { ref name } => write!(f, "-fstype {name}"),
            Self::Perm { mode, how } => {
                let prefix = match how {
                    ModeCmp::Exact => "",
                    ModeCmp::AllBits => "-",
                    ModeCmp::AnyBits => "/",
                };
                write!(f, "-perm {prefix}{mode:o}")
            }
            Self::Size { n, cmp, unit } => {
                write!(f, "-size {}{n}{}", cmp.prefix(), unit.suffix())
            }
            Self::Links { n, cmp } => write!(f, "-links {}{n}", cmp.prefix()),
            Self::Inode { n, cmp } => write!(f, "-inum {}{n}", cmp.prefix()),
            Self::Uid { n, cmp } => write!(f, "-uid {}{n}", cmp.prefix()),
            Self::Gid { n, cmp } => write!(f, "-gid {}{n}", cmp.prefix()),
            Self::NoUser => f.write_str("-nouser"),
            Self::NoGroup => f.write_str("-nogroup"),
            Self::Hidden => f.write_str("-hidden"),
            Self::Empty => f.write_str("-empty"),
            Self::TimeCount {
                field,
                unit_secs,
                n,
                cmp,
                ..
            } => {
                let suffix = if unit_secs == 60 { "min" } else { "time" };
                write!(f, "-{}{suffix} {}{n}", field.letter(), cmp.prefix())
            }
            Self::NewerThan { ref spelled, .. } => f.write_str(spelled),
            Self::SameFile { ref spelled, .. } => write!(f, "-samefile {spelled}"),
            Self::Sparse => f.write_str("-sparse"),
            Self::Access { ref spelled, .. } => f.write_str(spelled),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Print { null: false, .. } => f.write_str("-print"),
            Self::Print { null: true, .. } => f.write_str("-print0"),
            Self::Printf { ref program, .. } => write!(f, "-printf {}", program.source()),
            Self::Delete => f.write_str("-delete"),
            Self::Exec(ref spec) => write!(
                f,
                "-exec {} {}",
                spec.spelled(),
                if spec.batched() { "+" } else { ";" }
            ),
            Self::Prune => f.write_str("-prune"),
            Self::Quit => f.write_str("-quit"),
            Self::NoHidden => f.write_str("-nohidden"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::buffer_sink;

    #[test]
    fn purity_and_constant_flags() {
        let name = Expr::new(ExprKind::Test(Test::Hidden));
        assert!(name.is_pure());
        assert!(!name.always_true());

        let print = Expr::new(ExprKind::Act(Action::Print {
            sink: buffer_sink(),
            null: false,
        }));
        assert!(!print.is_pure());
        assert!(print.always_true());

        let both = Expr::and(Expr::truth(true), print);
        assert!(both.always_true());
        assert!(!both.is_pure());

        let neg = Expr::not(Expr::truth(true));
        assert!(neg.always_false());
    }

    #[test]
    fn comma_takes_rhs_flags() {
        let e = Expr::comma(Expr::truth(true), Expr::truth(false));
        assert!(e.always_false());
        assert!(!e.always_true());
    }

    #[test]
    fn display_round_trip_shape() {
        let e = Expr::and(
            Expr::new(ExprKind::Test(Test::Hidden)),
            Expr::not(Expr::truth(false)),
        );
        assert_eq!(e.to_string(), "( -hidden -a ( ! -false ) )");
    }
}
