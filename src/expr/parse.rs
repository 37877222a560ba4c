//! Turns argv into roots, walk flags and an optimized expression tree.
//!
//! The find grammar is position-sensitive: global flags first, then start
//! paths, then the expression, whose predicates are tokens of their own
//! little language. Precedence is the classic `!` over juxtaposition/`-a`
//! over `-o` over `,`. Every error here is a protocol error: reported
//! before the first directory is opened, exit 2.

use std::ffi::OsString;
use std::os::unix::ffi::OsStrExt as _;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone as _};
use regex::bytes::RegexBuilder;

use crate::error::ParseError;
use crate::expr::exec::ExecSpec;
use crate::expr::glob::glob_to_regex;
use crate::expr::node::{Action, Expr, ExprKind, ModeCmp, NumCmp, SizeUnit, Test, TimeField};
use crate::expr::optimize::Optimizer;
use crate::fmt::FormatProgram;
use crate::fs::{self, AT_CWD, FileKind};
use crate::util::{Sinks, group_id, user_id};
use crate::walk::Follow;

/// `-D` debug switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugFlags {
    pub tree: bool,
    pub rates: bool,
    pub opt: bool,
    pub search: bool,
}

/// Everything the driver needs out of argv.
#[derive(Debug)]
pub struct Cmdline {
    pub roots: Vec<Vec<u8>>,
    pub expr: Expr,
    pub follow: Follow,
    pub min_depth: usize,
    pub max_depth: Option<usize>,
    pub post_order: bool,
    pub same_device: bool,
    pub ignore_races: bool,
    /// Some `-printf` program reads stat data, so the walker should stat
    /// eagerly while the cheap relative path is at hand.
    pub stat_all: bool,
    pub opt_level: u8,
    pub debug: DebugFlags,
}

/// Parse the arguments after argv[0].
pub fn parse(args: &[OsString], sinks: &mut Sinks) -> Result<Cmdline, ParseError> {
    let mut pos = 0;
    let mut follow = Follow::Never;
    let mut opt_level: u8 = 2;
    let mut debug = DebugFlags::default();

    while let Some(tok) = args.get(pos).and_then(|t| t.to_str()) {
        match tok {
            "-H" => follow = Follow::Roots,
            "-L" => follow = Follow::Always,
            "-P" => follow = Follow::Never,
            "-D" => {
                pos += 1;
                let Some(flags) = args.get(pos).and_then(|t| t.to_str()) else {
                    return Err(ParseError::MissingArgument("-D"));
                };
                for flag in flags.split(',') {
                    match flag {
                        "tree" => debug.tree = true,
                        "rates" => debug.rates = true,
                        "opt" => debug.opt = true,
                        "search" => debug.search = true,
                        other => {
                            return Err(ParseError::UnknownPredicate(format!("-D {other}")));
                        }
                    }
                }
            }
            _ if tok.starts_with("-O") && tok.len() > 2 => {
                opt_level = tok[2..]
                    .parse()
                    .ok()
                    .filter(|&level| level <= 4)
                    .ok_or_else(|| ParseError::InvalidInteger(tok.into()))?;
            }
            _ => break,
        }
        pos += 1;
    }

    let mut roots: Vec<Vec<u8>> = Vec::new();
    while let Some(tok) = args.get(pos) {
        if is_expression_token(tok.as_bytes()) {
            break;
        }
        roots.push(tok.as_bytes().to_vec());
        pos += 1;
    }
    if roots.is_empty() {
        roots.push(b".".to_vec());
    }

    let mut parser = Parser {
        tokens: args,
        pos,
        opt: Optimizer::new(opt_level).with_trace(debug.opt),
        sinks,
        follow,
        min_depth: 0,
        max_depth: None,
        post_order: false,
        same_device: false,
        ignore_races: false,
        daystart: false,
        stat_all: false,
        now: epoch_now(),
    };

    let expr = if parser.pos < parser.tokens.len() {
        parser.parse_expr()?
    } else {
        Expr::truth(true)
    };
    if let Some(extra) = parser.tokens.get(parser.pos) {
        if extra.to_str() == Some(")") {
            return Err(ParseError::UnmatchedParen);
        }
        return Err(ParseError::ExtraOperand(
            extra.to_string_lossy().into_owned(),
        ));
    }

    let implicit = (!expr.has_output_action()).then(|| {
        Expr::new(ExprKind::Act(Action::Print {
            sink: parser.sinks.stdout(),
            null: false,
        }))
    });
    let expr = parser.opt.finish(expr, implicit);

    Ok(Cmdline {
        roots,
        expr,
        follow: parser.follow,
        min_depth: parser.min_depth,
        max_depth: parser.max_depth,
        post_order: parser.post_order,
        same_device: parser.same_device,
        ignore_races: parser.ignore_races,
        stat_all: parser.stat_all,
        opt_level,
        debug,
    })
}

/// Expression tokens open with a dash, a paren, a bang or a comma;
/// anything else this early is a start path.
fn is_expression_token(bytes: &[u8]) -> bool {
    matches!(bytes, b"(" | b")" | b"!" | b",") || (bytes.len() > 1 && bytes[0] == b'-')
}

struct Parser<'a> {
    tokens: &'a [OsString],
    pos: usize,
    opt: Optimizer,
    sinks: &'a mut Sinks,
    follow: Follow,
    min_depth: usize,
    max_depth: Option<usize>,
    post_order: bool,
    same_device: bool,
    ignore_races: bool,
    daystart: bool,
    stat_all: bool,
    now: i64,
}

impl Parser<'_> {
    fn peek_str(&self) -> Option<&str> {
        self.tokens.get(self.pos).and_then(|t| t.to_str())
    }

    fn next_raw(&mut self) -> Option<OsString> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn take_arg(&mut self, pred: &'static str) -> Result<OsString, ParseError> {
        self.next_raw().ok_or(ParseError::MissingArgument(pred))
    }

    fn take_str_arg(&mut self, pred: &'static str) -> Result<String, ParseError> {
        let arg = self.take_arg(pred)?;
        arg.to_str()
            .map(str::to_owned)
            .ok_or_else(|| ParseError::InvalidInteger(arg.to_string_lossy().into_owned()))
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_or()?;
        while self.peek_str() == Some(",") {
            self.pos += 1;
            if !self.factor_follows() {
                return Err(ParseError::DanglingOperator(","));
            }
            let rhs = self.parse_or()?;
            lhs = self.opt.comma(lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek_str(), Some("-o" | "-or")) {
            self.pos += 1;
            if !self.factor_follows() {
                return Err(ParseError::DanglingOperator("-o"));
            }
            let rhs = self.parse_and()?;
            lhs = self.opt.or(lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            match self.peek_str() {
                Some("-a" | "-and") => {
                    self.pos += 1;
                    if !self.factor_follows() {
                        return Err(ParseError::DanglingOperator("-a"));
                    }
                    let rhs = self.parse_unary()?;
                    lhs = self.opt.and(lhs, rhs);
                }
                Some("-o" | "-or" | "," | ")") | None => break,
                _ => {
                    // juxtaposition is conjunction
                    let rhs = self.parse_unary()?;
                    lhs = self.opt.and(lhs, rhs);
                }
            }
        }
        Ok(lhs)
    }

    fn factor_follows(&self) -> bool {
        match self.tokens.get(self.pos) {
            None => false,
            Some(tok) => tok.to_str() != Some(")"),
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek_str() {
            Some("!" | "-not") => {
                self.pos += 1;
                if !self.factor_follows() {
                    return Err(ParseError::DanglingOperator("!"));
                }
                let inner = self.parse_unary()?;
                Ok(self.opt.not(inner))
            }
            Some("(") => {
                self.pos += 1;
                if self.peek_str() == Some(")") {
                    return Err(ParseError::EmptyParens);
                }
                let inner = self.parse_expr()?;
                if self.peek_str() == Some(")") {
                    self.pos += 1;
                    Ok(inner)
                } else {
                    Err(ParseError::UnmatchedParen)
                }
            }
            Some(")") => Err(ParseError::UnmatchedParen),
            Some("-a" | "-and") => Err(ParseError::DanglingOperator("-a")),
            Some("-o" | "-or") => Err(ParseError::DanglingOperator("-o")),
            Some(",") => Err(ParseError::DanglingOperator(",")),
            _ => self.parse_primary(),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let Some(raw) = self.next_raw() else {
            return Err(ParseError::MissingArgument("expression"));
        };
        let Some(tok) = raw.to_str() else {
            return Err(ParseError::UnknownPredicate(
                raw.to_string_lossy().into_owned(),
            ));
        };
        if !is_expression_token(raw.as_bytes()) {
            return Err(ParseError::ExtraOperand(tok.to_owned()));
        }

        let expr = match tok {
            "-true" => Expr::truth(true),
            "-false" => Expr::truth(false),

            "-name" | "-iname" => self.glob_test(tok, "-name", Kind::Name)?,
            "-path" | "-ipath" | "-wholename" | "-iwholename" => {
                self.glob_test(tok, "-path", Kind::Path)?
            }
            "-lname" | "-ilname" => self.glob_test(tok, "-lname", Kind::LinkName)?,

            "-regex" | "-iregex" => {
                let ci = tok.starts_with("-i");
                let pattern = self.take_str_arg("-regex")?;
                let re = RegexBuilder::new(&format!("(?s)\\A(?:{pattern})\\z"))
                    .case_insensitive(ci)
                    .unicode(false)
                    .build()
                    .map_err(|err| ParseError::InvalidRegex(err.to_string()))?;
                self.test(Test::RegexMatch {
                    pattern: pattern.into_boxed_str(),
                    re,
                    ci,
                })
            }

            "-type" | "-xtype" => {
                let spelled = self.take_str_arg("-type")?;
                let mask = parse_type_mask(&spelled)?;
                let spelled = spelled.into_boxed_str();
                if tok == "-type" {
                    self.test(Test::Kind { mask, spelled })
                } else {
                    self.test(Test::XKind { mask, spelled })
                }
            }

            "-perm" => {
                let arg = self.take_str_arg("-perm")?;
                let (mode, how) = parse_mode(&arg)?;
                self.test(Test::Perm { mode, how })
            }

            "-size" => {
                let arg = self.take_str_arg("-size")?;
                let (cmp, n, unit) = parse_size(&arg)?;
                self.test(Test::Size { n, cmp, unit })
            }

            "-links" => {
                let (cmp, n) = parse_num(&self.take_str_arg("-links")?)?;
                self.test(Test::Links { n, cmp })
            }
            "-inum" => {
                let (cmp, n) = parse_num(&self.take_str_arg("-inum")?)?;
                self.test(Test::Inode { n, cmp })
            }
            "-uid" => {
                let (cmp, n) = parse_num(&self.take_str_arg("-uid")?)?;
                self.test(Test::Uid { n: n as u32, cmp })
            }
            "-gid" => {
                let (cmp, n) = parse_num(&self.take_str_arg("-gid")?)?;
                self.test(Test::Gid { n: n as u32, cmp })
            }

            "-user" => {
                let name = self.take_str_arg("-user")?;
                let uid = user_id(&name)
                    .or_else(|| name.parse().ok())
                    .ok_or(ParseError::UnknownUser(name))?;
                self.test(Test::Uid {
                    n: uid,
                    cmp: NumCmp::Exact,
                })
            }
            "-group" => {
                let name = self.take_str_arg("-group")?;
                let gid = group_id(&name)
                    .or_else(|| name.parse().ok())
                    .ok_or(ParseError::UnknownGroup(name))?;
                self.test(Test::Gid {
                    n: gid,
                    cmp: NumCmp::Exact,
                })
            }

            "-fstype" => {
                let name = self.take_str_arg("-fstype")?;
                self.test(Test::FsType {
                    name: name.into_boxed_str(),
                })
            }

            "-nouser" => self.test(Test::NoUser),
            "-nogroup" => self.test(Test::NoGroup),
            "-hidden" => self.test(Test::Hidden),
            "-empty" => self.test(Test::Empty),
            "-sparse" => self.test(Test::Sparse),
            "-readable" => self.test(Test::Access {
                mode: libc::R_OK,
                spelled: "-readable".into(),
            }),
            "-writable" => self.test(Test::Access {
                mode: libc::W_OK,
                spelled: "-writable".into(),
            }),
            "-executable" => self.test(Test::Access {
                mode: libc::X_OK,
                spelled: "-executable".into(),
            }),

            "-amin" | "-cmin" | "-mmin" => self.time_count(tok, 60)?,
            "-atime" | "-ctime" | "-mtime" => self.time_count(tok, 86_400)?,

            "-newer" => self.newer_than(TimeField::Modified, TimeField::Modified, tok)?,
            "-anewer" => self.newer_than(TimeField::Accessed, TimeField::Modified, tok)?,
            "-cnewer" => self.newer_than(TimeField::Changed, TimeField::Modified, tok)?,
            _ if tok.len() == 8 && tok.starts_with("-newer") => {
                let mut letters = tok[6..].chars();
                let x = time_field(letters.next())
                    .ok_or_else(|| ParseError::UnknownPredicate(tok.into()))?;
                match letters.next() {
                    Some('t') => {
                        let stamp = self.take_str_arg("-newerXt")?;
                        let (secs, nanos) = parse_timestamp(&stamp)?;
                        self.test(Test::NewerThan {
                            field: x,
                            secs,
                            nanos,
                            spelled: format!("{tok} {stamp}").into_boxed_str(),
                        })
                    }
                    other => {
                        let y = time_field(other)
                            .ok_or_else(|| ParseError::UnknownPredicate(tok.into()))?;
                        self.newer_than(x, y, tok)?
                    }
                }
            }

            "-samefile" => {
                let arg = self.take_arg("-samefile")?;
                let st = self.stat_reference(arg.as_bytes())?;
                self.test(Test::SameFile {
                    dev: st.st_dev,
                    ino: st.st_ino,
                    spelled: arg.to_string_lossy().into_owned().into_boxed_str(),
                })
            }

            "-print" => self.action(Action::Print {
                sink: self.sinks.stdout(),
                null: false,
            }),
            "-print0" => self.action(Action::Print {
                sink: self.sinks.stdout(),
                null: true,
            }),
            "-fprint" | "-fprint0" => {
                let file = self.take_arg("-fprint")?;
                let sink = self
                    .sinks
                    .open(&file)
                    .map_err(|_| ParseError::SinkOpen(file.to_string_lossy().into_owned()))?;
                self.action(Action::Print {
                    sink,
                    null: tok.ends_with('0'),
                })
            }
            "-printf" => {
                let format = self.take_arg("-printf")?;
                let program = FormatProgram::compile(format.as_bytes())?;
                self.stat_all |= program.needs_stat();
                self.action(Action::Printf {
                    sink: self.sinks.stdout(),
                    program,
                })
            }
            "-fprintf" => {
                let file = self.take_arg("-fprintf")?;
                let format = self.take_arg("-fprintf")?;
                let program = FormatProgram::compile(format.as_bytes())?;
                self.stat_all |= program.needs_stat();
                let sink = self
                    .sinks
                    .open(&file)
                    .map_err(|_| ParseError::SinkOpen(file.to_string_lossy().into_owned()))?;
                self.action(Action::Printf { sink, program })
            }

            "-delete" => {
                // deleting children before parents needs post-order
                self.post_order = true;
                self.action(Action::Delete)
            }

            "-exec" => {
                let mut template: Vec<OsString> = Vec::new();
                let mut batch = false;
                let mut terminated = false;
                while let Some(arg) = self.next_raw() {
                    if arg.to_str() == Some(";") {
                        terminated = true;
                        break;
                    }
                    if arg.to_str() == Some("+") && template.last().map(|t| t.to_str()) == Some(Some("{}"))
                    {
                        template.pop();
                        batch = true;
                        terminated = true;
                        break;
                    }
                    template.push(arg);
                }
                if !terminated {
                    return Err(ParseError::UnterminatedExec);
                }
                if template.is_empty() {
                    return Err(ParseError::MissingArgument("-exec"));
                }
                self.action(Action::Exec(ExecSpec::new(template, batch)))
            }

            "-prune" => self.action(Action::Prune),
            "-quit" => self.action(Action::Quit),
            "-nohidden" => self.action(Action::NoHidden),

            // positional options: always true, effect is on the walk
            "-depth" => {
                self.post_order = true;
                Expr::truth(true)
            }
            "-maxdepth" => {
                let n = parse_plain_num(&self.take_str_arg("-maxdepth")?)?;
                self.max_depth = Some(n as usize);
                Expr::truth(true)
            }
            "-mindepth" => {
                let n = parse_plain_num(&self.take_str_arg("-mindepth")?)?;
                self.min_depth = n as usize;
                Expr::truth(true)
            }
            "-xdev" | "-mount" => {
                self.same_device = true;
                Expr::truth(true)
            }
            "-follow" => {
                self.follow = Follow::Always;
                Expr::truth(true)
            }
            "-ignore_readdir_race" => {
                self.ignore_races = true;
                Expr::truth(true)
            }
            "-noignore_readdir_race" => {
                self.ignore_races = false;
                Expr::truth(true)
            }
            "-daystart" => {
                self.daystart = true;
                Expr::truth(true)
            }
            "-noleaf" => Expr::truth(true),

            other => return Err(ParseError::UnknownPredicate(other.to_owned())),
        };
        Ok(expr)
    }

    fn test(&self, test: Test) -> Expr {
        Expr::new(ExprKind::Test(test))
    }

    fn action(&self, action: Action) -> Expr {
        Expr::new(ExprKind::Act(action))
    }

    fn glob_test(
        &mut self,
        tok: &str,
        pred: &'static str,
        kind: Kind,
    ) -> Result<Expr, ParseError> {
        let ci = tok.starts_with("-i");
        let pattern = self.take_arg(pred)?;
        let re = glob_to_regex(pattern.as_bytes(), ci)?;
        let pattern = pattern.to_string_lossy().into_owned().into_boxed_str();
        let test = match kind {
            Kind::Name => Test::Name { pattern, re, ci },
            Kind::Path => Test::Path { pattern, re, ci },
            Kind::LinkName => Test::LinkName { pattern, re, ci },
        };
        Ok(self.test(test))
    }

    fn time_count(&mut self, tok: &str, unit_secs: i64) -> Result<Expr, ParseError> {
        let field = match tok.as_bytes()[1] {
            b'a' => TimeField::Accessed,
            b'c' => TimeField::Changed,
            _ => TimeField::Modified,
        };
        let (cmp, n) = parse_num(&self.take_str_arg("-mtime")?)?;
        Ok(self.test(Test::TimeCount {
            field,
            unit_secs,
            n: n as i64,
            cmp,
            reference: self.reference(),
        }))
    }

    fn newer_than(
        &mut self,
        field: TimeField,
        ref_field: TimeField,
        tok: &str,
    ) -> Result<Expr, ParseError> {
        let arg = self.take_arg("-newer")?;
        let st = self.stat_reference(arg.as_bytes())?;
        let (secs, nanos) = ref_field.of(&st);
        Ok(self.test(Test::NewerThan {
            field,
            secs,
            nanos,
            spelled: format!("{tok} {}", arg.to_string_lossy()).into_boxed_str(),
        }))
    }

    fn stat_reference(&self, path: &[u8]) -> Result<libc::stat, ParseError> {
        fs::stat_at(AT_CWD, path, self.follow != Follow::Never)
            .map_err(|_| ParseError::StatReference(String::from_utf8_lossy(path).into_owned()))
    }

    /// Reference point for the `-Xtime`/`-Xmin` age computation: now, or
    /// the start of today under `-daystart`.
    fn reference(&self) -> i64 {
        if !self.daystart {
            return self.now;
        }
        let today = Local::now().date_naive();
        today
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
            .map_or(self.now, |dt| dt.timestamp())
    }
}

enum Kind {
    Name,
    Path,
    LinkName,
}

fn epoch_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

fn time_field(letter: Option<char>) -> Option<TimeField> {
    match letter {
        Some('a') => Some(TimeField::Accessed),
        Some('c') => Some(TimeField::Changed),
        Some('m') => Some(TimeField::Modified),
        _ => None,
    }
}

fn parse_type_mask(arg: &str) -> Result<u16, ParseError> {
    let mut mask = 0;
    for letter in arg.split(',') {
        let kind = match letter.as_bytes() {
            [b] => FileKind::from_letter(*b),
            _ => None,
        };
        let kind = kind.ok_or_else(|| ParseError::InvalidType(arg.to_owned()))?;
        mask |= kind.mask_bit();
    }
    if mask == 0 {
        return Err(ParseError::InvalidType(arg.to_owned()));
    }
    Ok(mask)
}

fn parse_num(arg: &str) -> Result<(NumCmp, u64), ParseError> {
    let (cmp, rest) = match arg.as_bytes().first() {
        Some(b'+') => (NumCmp::Greater, &arg[1..]),
        Some(b'-') => (NumCmp::Less, &arg[1..]),
        _ => (NumCmp::Exact, arg),
    };
    rest.parse()
        .map(|n| (cmp, n))
        .map_err(|_| ParseError::InvalidInteger(arg.to_owned()))
}

fn parse_plain_num(arg: &str) -> Result<u64, ParseError> {
    arg.parse()
        .map_err(|_| ParseError::InvalidInteger(arg.to_owned()))
}

fn parse_size(arg: &str) -> Result<(NumCmp, u64, SizeUnit), ParseError> {
    let (cmp, rest) = match arg.as_bytes().first() {
        Some(b'+') => (NumCmp::Greater, &arg[1..]),
        Some(b'-') => (NumCmp::Less, &arg[1..]),
        _ => (NumCmp::Exact, arg),
    };
    let bytes = rest.as_bytes();
    let (digits, unit) = match bytes.last() {
        Some(b) if !b.is_ascii_digit() => (
            &rest[..rest.len() - 1],
            SizeUnit::from_suffix(*b).ok_or_else(|| ParseError::InvalidInteger(arg.to_owned()))?,
        ),
        _ => (rest, SizeUnit::Blocks),
    };
    let n = digits
        .parse()
        .map_err(|_| ParseError::InvalidInteger(arg.to_owned()))?;
    Ok((cmp, n, unit))
}

fn parse_mode(arg: &str) -> Result<(u32, ModeCmp), ParseError> {
    let (how, rest) = match arg.as_bytes().first() {
        Some(b'-') => (ModeCmp::AllBits, &arg[1..]),
        Some(b'/') => (ModeCmp::AnyBits, &arg[1..]),
        _ => (ModeCmp::Exact, arg),
    };
    if rest.is_empty() {
        return Err(ParseError::InvalidMode(arg.to_owned()));
    }
    if rest.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        let mode =
            u32::from_str_radix(rest, 8).map_err(|_| ParseError::InvalidMode(arg.to_owned()))?;
        if mode > 0o7777 {
            return Err(ParseError::InvalidMode(arg.to_owned()));
        }
        return Ok((mode, how));
    }
    symbolic_mode_bits(rest)
        .map(|mode| (mode, how))
        .ok_or_else(|| ParseError::InvalidMode(arg.to_owned()))
}

/// `u+rwx,g+s` style clauses, resolved against a zero base the way the
/// `-perm` argument is defined.
fn symbolic_mode_bits(input: &str) -> Option<u32> {
    let mut mode = 0_u32;
    for clause in input.split(',') {
        let bytes = clause.as_bytes();
        let mut i = 0;
        let mut who = 0_u32;
        while i < bytes.len() {
            match bytes[i] {
                b'u' => who |= 4,
                b'g' => who |= 2,
                b'o' => who |= 1,
                b'a' => who |= 7,
                _ => break,
            }
            i += 1;
        }
        if who == 0 {
            who = 7;
        }
        let mut saw_op = false;
        while i < bytes.len() {
            let op = bytes[i];
            if !matches!(op, b'+' | b'-' | b'=') {
                return None;
            }
            saw_op = true;
            i += 1;
            let mut perms = 0_u32;
            let mut special = 0_u32;
            while i < bytes.len() && !matches!(bytes[i], b'+' | b'-' | b'=') {
                match bytes[i] {
                    b'r' => perms |= 4,
                    b'w' => perms |= 2,
                    b'x' => perms |= 1,
                    b's' => {
                        if who & 4 != 0 {
                            special |= 0o4000;
                        }
                        if who & 2 != 0 {
                            special |= 0o2000;
                        }
                    }
                    b't' => special |= 0o1000,
                    _ => return None,
                }
                i += 1;
            }
            let bits = spread(perms, who) | special;
            match op {
                b'+' => mode |= bits,
                b'-' => mode &= !bits,
                _ => {
                    mode &= !(spread(7, who) | 0o7000);
                    mode |= bits;
                }
            }
        }
        if !saw_op {
            return None;
        }
    }
    Some(mode)
}

fn spread(perms: u32, who: u32) -> u32 {
    let mut mode = 0;
    if who & 4 != 0 {
        mode |= perms << 6;
    }
    if who & 2 != 0 {
        mode |= perms << 3;
    }
    if who & 1 != 0 {
        mode |= perms;
    }
    mode
}

/// `-newerXt` reference stamps: `@epoch`, RFC 3339, or a bare local
/// date/date-time.
fn parse_timestamp(arg: &str) -> Result<(i64, i64), ParseError> {
    if let Some(epoch) = arg.strip_prefix('@') {
        if let Ok(secs) = epoch.parse::<i64>() {
            return Ok((secs, 0));
        }
        return Err(ParseError::InvalidTimestamp(arg.to_owned()));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(arg) {
        return Ok((dt.timestamp(), i64::from(dt.timestamp_subsec_nanos())));
    }
    for pattern in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(arg, pattern)
            && let Some(dt) = naive.and_local_timezone(Local).earliest()
        {
            return Ok((dt.timestamp(), 0));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(arg, "%Y-%m-%d")
        && let Some(naive) = date.and_hms_opt(0, 0, 0)
        && let Some(dt) = naive.and_local_timezone(Local).earliest()
    {
        return Ok((dt.timestamp(), 0));
    }
    Err(ParseError::InvalidTimestamp(arg.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    fn parse_ok(list: &[&str]) -> Cmdline {
        let mut sinks = Sinks::new();
        parse(&args(list), &mut sinks).unwrap()
    }

    fn parse_err(list: &[&str]) -> ParseError {
        let mut sinks = Sinks::new();
        parse(&args(list), &mut sinks).unwrap_err()
    }

    #[test]
    fn roots_default_to_dot() {
        let cmd = parse_ok(&[]);
        assert_eq!(cmd.roots, vec![b".".to_vec()]);
        // -true -a -print folds to the print alone at the default level
        assert_eq!(cmd.expr.to_string(), "-print");
    }

    #[test]
    fn paths_then_expression() {
        let cmd = parse_ok(&["a", "b", "-type", "f", "-print"]);
        assert_eq!(cmd.roots, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(cmd.expr.to_string(), "( -type f -a -print )");
    }

    #[test]
    fn implicit_print_not_duplicated() {
        let cmd = parse_ok(&["(", "-name", "a", "-or", "-name", "b", ")", "-and", "-print"]);
        assert_eq!(
            cmd.expr.to_string(),
            "( ( -name a -o -name b ) -a -print )"
        );
    }

    #[test]
    fn precedence_bang_and_or() {
        let cmd = parse_ok(&["!", "-name", "x", "-o", "-name", "y", "-name", "z", "-print"]);
        // ((!x) -o (y -a z)) -a print after the implicit wrap? print is
        // explicit here, so: (!x) -o ((y -a z) -a -print)
        assert_eq!(
            cmd.expr.to_string(),
            "( ( ! -name x ) -o ( ( -name y -a -name z ) -a -print ) )"
        );
    }

    #[test]
    fn global_flags() {
        let cmd = parse_ok(&["-L", "-O1", "."]);
        assert_eq!(cmd.follow, Follow::Always);
        assert_eq!(cmd.opt_level, 1);
        let cmd = parse_ok(&["-H", "-D", "tree,rates", "."]);
        assert_eq!(cmd.follow, Follow::Roots);
        assert!(cmd.debug.tree && cmd.debug.rates);
    }

    #[test]
    fn positional_options_are_true_and_sticky() {
        let cmd = parse_ok(&[".", "-maxdepth", "3", "-mindepth", "1", "-xdev", "-type", "d"]);
        assert_eq!(cmd.max_depth, Some(3));
        assert_eq!(cmd.min_depth, 1);
        assert!(cmd.same_device);
        // the option tokens optimized away as -true operands
        assert_eq!(cmd.expr.to_string(), "( -type d -a -print )");
    }

    #[test]
    fn delete_implies_depth() {
        let cmd = parse_ok(&[".", "-name", "*.tmp", "-delete"]);
        assert!(cmd.post_order);
        assert_eq!(cmd.expr.to_string(), "( -name *.tmp -a -delete )");
    }

    #[test]
    fn exec_forms() {
        let cmd = parse_ok(&[".", "-exec", "echo", "{}", ";"]);
        assert_eq!(cmd.expr.to_string(), "-exec echo {} ;");
        let cmd = parse_ok(&[".", "-exec", "echo", "{}", "+"]);
        assert_eq!(cmd.expr.to_string(), "-exec echo +");
        assert!(matches!(
            parse_err(&[".", "-exec", "echo"]),
            ParseError::UnterminatedExec
        ));
    }

    #[test]
    fn size_and_perm_arguments() {
        let cmd = parse_ok(&[".", "-size", "+10M"]);
        assert_eq!(cmd.expr.to_string(), "( -size +10M -a -print )");
        let cmd = parse_ok(&[".", "-perm", "-644"]);
        assert_eq!(cmd.expr.to_string(), "( -perm -644 -a -print )");
        let cmd = parse_ok(&[".", "-perm", "/u+w"]);
        assert_eq!(cmd.expr.to_string(), "( -perm /200 -a -print )");
        assert!(matches!(
            parse_err(&[".", "-perm", "99"]),
            ParseError::InvalidMode(_)
        ));
        assert!(matches!(
            parse_err(&[".", "-size", "10Q"]),
            ParseError::InvalidInteger(_)
        ));
    }

    #[test]
    fn type_letters() {
        let cmd = parse_ok(&[".", "-type", "f,d"]);
        assert_eq!(cmd.expr.to_string(), "( -type f,d -a -print )");
        assert!(matches!(
            parse_err(&[".", "-type", "q"]),
            ParseError::InvalidType(_)
        ));
    }

    #[test]
    fn grammar_errors() {
        assert!(matches!(
            parse_err(&[".", "(", "-name", "x"]),
            ParseError::UnmatchedParen
        ));
        assert!(matches!(
            parse_err(&[".", "-name", "x", ")"]),
            ParseError::UnmatchedParen
        ));
        assert!(matches!(
            parse_err(&[".", "(", ")"]),
            ParseError::EmptyParens
        ));
        assert!(matches!(
            parse_err(&[".", "-name", "x", "-a"]),
            ParseError::DanglingOperator("-a")
        ));
        assert!(matches!(
            parse_err(&[".", "-o", "-name", "x"]),
            ParseError::DanglingOperator("-o")
        ));
        assert!(matches!(
            parse_err(&[".", "-frobnicate"]),
            ParseError::UnknownPredicate(_)
        ));
        assert!(matches!(
            parse_err(&[".", "-name"]),
            ParseError::MissingArgument("-name")
        ));
        assert!(matches!(
            parse_err(&[".", "-type", "f", "stray"]),
            ParseError::ExtraOperand(_)
        ));
    }

    #[test]
    fn symbolic_modes_resolve() {
        assert_eq!(symbolic_mode_bits("u+rwx"), Some(0o700));
        assert_eq!(symbolic_mode_bits("u+rwx,g+rx,o+r"), Some(0o754));
        assert_eq!(symbolic_mode_bits("a+r"), Some(0o444));
        assert_eq!(symbolic_mode_bits("+x"), Some(0o111));
        assert_eq!(symbolic_mode_bits("u+s"), Some(0o4000));
        assert_eq!(symbolic_mode_bits("g+s"), Some(0o2000));
        assert_eq!(symbolic_mode_bits("+t"), Some(0o1000));
        assert_eq!(symbolic_mode_bits("u=rw"), Some(0o600));
        assert_eq!(symbolic_mode_bits("u+q"), None);
        assert_eq!(symbolic_mode_bits("u"), None);
    }

    #[test]
    fn timestamps() {
        assert_eq!(parse_timestamp("@1700000000").unwrap(), (1_700_000_000, 0));
        assert!(parse_timestamp("2024-01-02").is_ok());
        assert!(parse_timestamp("not-a-time").is_err());
        let (secs, nanos) = parse_timestamp("2024-01-02T03:04:05+00:00").unwrap();
        assert_eq!(secs, 1_704_164_645);
        assert_eq!(nanos, 0);
    }

    #[test]
    fn optimizer_level_gates_rewrites() {
        let cmd = parse_ok(&["-O0", ".", "-true", "-type", "f"]);
        assert_eq!(cmd.expr.to_string(), "( ( -true -a -type f ) -a -print )");
        let cmd = parse_ok(&["-O1", ".", "-true", "-type", "f"]);
        assert_eq!(cmd.expr.to_string(), "( -type f -a -print )");
    }
}
