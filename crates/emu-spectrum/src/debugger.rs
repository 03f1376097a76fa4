//! Debugger core: breakpoints, run-mode state machine, and a small
//! conditional-expression language evaluated against an [`Observable`].
//!
//! This module owns no emulation state itself — it decides, given the
//! current register/memory/port activity a host reports to it, whether
//! execution should stop. The host (the MCP server, or a future
//! interactive frontend) owns the actual pause/resume loop.

use std::collections::HashMap;
use std::fmt;

use emu_core::{Observable, Value};

/// The debugger's run-mode state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// No breakpoints are armed; the debugger never inspects activity.
    Inactive,
    /// Breakpoints are armed and checked on every matching event.
    Active,
    /// A breakpoint has fired; the host has stopped ticking the machine.
    Halted,
}

/// What kind of activity a breakpoint watches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    Execute,
    MemoryRead,
    MemoryWrite,
    PortRead,
    PortWrite,
    /// Fires once the global T-state cursor reaches `tstate`. The host
    /// also schedules a `BREAKPOINT` scheduler event at that deadline so
    /// the check happens even if no instruction touches memory/ports at
    /// that exact moment (§4.8).
    Time,
    /// Fires on string-equality of a peripheral-registered (type, detail)
    /// pair, e.g. an FDC raising `("fdc", "index")`.
    Event,
}

/// Whether a breakpoint persists after it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Life {
    Permanent,
    /// Removed automatically the first time it fires.
    OneShot,
}

/// A single breakpoint.
pub struct Breakpoint {
    pub id: u32,
    pub kind: BreakpointKind,
    /// Address (memory kinds) or port number (port kinds). Unused by
    /// `Time`/`Event`.
    pub value: u16,
    /// T-state deadline, meaningful only when `kind == Time`.
    pub tstate: u32,
    /// (event type, event detail) pair, meaningful only when
    /// `kind == Event`.
    pub event: (String, String),
    /// Optional guard expression; the breakpoint only fires when this
    /// evaluates true against the current machine state.
    pub condition: Option<Expr>,
    /// Number of matching hits to skip before actually firing.
    pub ignore_count: u32,
    pub life: Life,
    pub enabled: bool,
}

/// Callback surface the memory-paging code uses to notify the debugger
/// of ROMCS page/unpage events, independent of any particular breakpoint
/// kind (paging changes what "the same address" actually reads as).
pub trait PagingObserver {
    fn on_page(&mut self, slot: usize, source: &str);
    fn on_unpage(&mut self, slot: usize);
}

/// Breakpoint registry and expression evaluator.
pub struct Debugger {
    mode: Mode,
    breakpoints: Vec<Breakpoint>,
    next_id: u32,
    halted_breakpoint: Option<u32>,
    /// Events recorded through the `PagingObserver` impl below, queued up
    /// for the host to replay through `check_event` once it has an
    /// `Observable` to evaluate conditions against (paging callbacks get
    /// neither, since the memory layer doesn't hold one).
    pending_events: Vec<(String, String)>,
}

impl Debugger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: Mode::Inactive,
            breakpoints: Vec::new(),
            next_id: 1,
            halted_breakpoint: None,
            pending_events: Vec::new(),
        }
    }

    /// Queue an event for later `check_event` evaluation. Used directly by
    /// peripherals that can reach a `Debugger` (e.g. none yet); paging
    /// events arrive via the `PagingObserver` impl instead.
    pub fn record_event(&mut self, event_type: impl Into<String>, event_detail: impl Into<String>) {
        self.pending_events.push((event_type.into(), event_detail.into()));
    }

    /// Drain events queued since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.pending_events)
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Add a breakpoint, returning its assigned id.
    pub fn add_breakpoint(
        &mut self,
        kind: BreakpointKind,
        value: u16,
        condition: Option<Expr>,
        life: Life,
    ) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.breakpoints.push(Breakpoint {
            id,
            kind,
            value,
            tstate: 0,
            event: (String::new(), String::new()),
            condition,
            ignore_count: 0,
            life,
            enabled: true,
        });
        self.mode = Mode::Active;
        id
    }

    /// Add a time breakpoint firing once `tstate` (the global, non-wrapping
    /// T-state cursor) is reached. The caller is responsible for also
    /// scheduling a matching `BREAKPOINT` event so the check happens even
    /// absent other traced activity.
    pub fn add_time_breakpoint(&mut self, tstate: u32, condition: Option<Expr>, life: Life) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.breakpoints.push(Breakpoint {
            id,
            kind: BreakpointKind::Time,
            value: 0,
            tstate,
            event: (String::new(), String::new()),
            condition,
            ignore_count: 0,
            life,
            enabled: true,
        });
        self.mode = Mode::Active;
        id
    }

    /// Add an event breakpoint firing on string-equality of a
    /// peripheral-registered `(event_type, event_detail)` pair.
    pub fn add_event_breakpoint(
        &mut self,
        event_type: impl Into<String>,
        event_detail: impl Into<String>,
        condition: Option<Expr>,
        life: Life,
    ) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.breakpoints.push(Breakpoint {
            id,
            kind: BreakpointKind::Event,
            value: 0,
            tstate: 0,
            event: (event_type.into(), event_detail.into()),
            condition,
            ignore_count: 0,
            life,
            enabled: true,
        });
        self.mode = Mode::Active;
        id
    }

    /// Remove a breakpoint by id, returning its kind and (if `Time`) the
    /// T-state deadline, so the caller can also cancel the matching
    /// scheduler `BREAKPOINT` event.
    pub fn remove_breakpoint(&mut self, id: u32) -> Option<(BreakpointKind, u32)> {
        let removed = self
            .breakpoints
            .iter()
            .position(|b| b.id == id)
            .map(|i| self.breakpoints.remove(i))
            .map(|b| (b.kind, b.tstate));
        if self.breakpoints.is_empty() {
            self.mode = Mode::Inactive;
        }
        removed
    }

    /// Remove every breakpoint, returning to `Inactive`.
    pub fn remove_all(&mut self) {
        self.breakpoints.clear();
        self.mode = Mode::Inactive;
        self.halted_breakpoint = None;
    }

    pub fn set_enabled(&mut self, id: u32, enabled: bool) {
        if let Some(b) = self.breakpoints.iter_mut().find(|b| b.id == id) {
            b.enabled = enabled;
        }
    }

    #[must_use]
    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Resume from `Halted` back to `Active` (or `Inactive` if the list is
    /// now empty because the firing breakpoint was one-shot).
    pub fn resume(&mut self) {
        self.halted_breakpoint = None;
        self.mode = if self.breakpoints.is_empty() {
            Mode::Inactive
        } else {
            Mode::Active
        };
    }

    #[must_use]
    pub fn halted_breakpoint(&self) -> Option<u32> {
        self.halted_breakpoint
    }

    /// Check whether `kind`/`value` activity should halt execution, given
    /// the current machine state exposed through `observable`. Returns the
    /// id of the breakpoint that fired, if any.
    pub fn check(
        &mut self,
        kind: BreakpointKind,
        value: u16,
        observable: &dyn Observable,
    ) -> Option<u32> {
        if self.mode != Mode::Active {
            return None;
        }

        let mut fired = None;
        for bp in &mut self.breakpoints {
            if !bp.enabled || bp.kind != kind || bp.value != value {
                continue;
            }
            let condition_met = bp
                .condition
                .as_ref()
                .is_none_or(|expr| expr.eval(observable).unwrap_or(false));
            if !condition_met {
                continue;
            }
            if bp.ignore_count > 0 {
                bp.ignore_count -= 1;
                continue;
            }
            fired = Some(bp.id);
            break;
        }

        if let Some(id) = fired {
            let one_shot = self
                .breakpoints
                .iter()
                .find(|b| b.id == id)
                .is_some_and(|b| b.life == Life::OneShot);
            self.mode = Mode::Halted;
            self.halted_breakpoint = Some(id);
            if one_shot {
                self.breakpoints.retain(|b| b.id != id);
            }
        }
        fired
    }

    /// Check time breakpoints against the current T-state cursor. Per §4.8,
    /// `tstate >= recorded_tstate` triggers, not strict equality — a
    /// scheduled `BREAKPOINT` event guarantees this is called at least once
    /// at or after the deadline even if nothing else traces that instant.
    pub fn check_time(&mut self, tstate: u32, observable: &dyn Observable) -> Option<u32> {
        self.check_matching(observable, |b| {
            b.kind == BreakpointKind::Time && tstate >= b.tstate
        })
    }

    /// Check event breakpoints by string-equality of `(event_type,
    /// event_detail)`, as registered by a peripheral (e.g. FDC index pulse,
    /// ROMCS page/unpage).
    pub fn check_event(
        &mut self,
        event_type: &str,
        event_detail: &str,
        observable: &dyn Observable,
    ) -> Option<u32> {
        self.check_matching(observable, |b| {
            b.kind == BreakpointKind::Event
                && b.event.0 == event_type
                && b.event.1 == event_detail
        })
    }

    fn check_matching(
        &mut self,
        observable: &dyn Observable,
        matches: impl Fn(&Breakpoint) -> bool,
    ) -> Option<u32> {
        if self.mode != Mode::Active {
            return None;
        }

        let mut fired = None;
        for bp in &mut self.breakpoints {
            if !bp.enabled || !matches(bp) {
                continue;
            }
            let condition_met = bp
                .condition
                .as_ref()
                .is_none_or(|expr| expr.eval(observable).unwrap_or(false));
            if !condition_met {
                continue;
            }
            if bp.ignore_count > 0 {
                bp.ignore_count -= 1;
                continue;
            }
            fired = Some(bp.id);
            break;
        }

        if let Some(id) = fired {
            let one_shot = self
                .breakpoints
                .iter()
                .find(|b| b.id == id)
                .is_some_and(|b| b.life == Life::OneShot);
            self.mode = Mode::Halted;
            self.halted_breakpoint = Some(id);
            if one_shot {
                self.breakpoints.retain(|b| b.id != id);
            }
        }
        fired
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

impl PagingObserver for Debugger {
    fn on_page(&mut self, slot: usize, source: &str) {
        self.record_event("paging", format!("page:{slot}:{source}"));
    }

    fn on_unpage(&mut self, slot: usize) {
        self.record_event("paging", format!("unpage:{slot}"));
    }
}

// -- Conditional expression language -----------------------------------------

/// A parsed breakpoint condition: comparisons over register/flag/memory
/// query paths (the same paths [`Observable::query`] accepts) joined by
/// `&&`/`||`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Compare(Box<Expr>, CompareOp, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Path(String),
    Literal(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Expr {
    /// Parse a condition such as `"a == 0x10 && pc > 0x8000"`.
    ///
    /// # Errors
    ///
    /// Returns a description of the syntax error.
    pub fn parse(source: &str) -> Result<Expr, String> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens: &tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(format!("unexpected trailing input at token {}", parser.pos));
        }
        Ok(expr)
    }

    /// Evaluate against `observable`'s query surface. Returns `None` if a
    /// referenced path doesn't resolve (treated as "condition not met").
    #[must_use]
    pub fn eval(&self, observable: &dyn Observable) -> Option<bool> {
        match self {
            Expr::Compare(lhs, op, rhs) => {
                let l = lhs.eval_numeric(observable)?;
                let r = rhs.eval_numeric(observable)?;
                Some(match op {
                    CompareOp::Eq => l == r,
                    CompareOp::Ne => l != r,
                    CompareOp::Lt => l < r,
                    CompareOp::Le => l <= r,
                    CompareOp::Gt => l > r,
                    CompareOp::Ge => l >= r,
                })
            }
            Expr::And(lhs, rhs) => Some(lhs.eval(observable)? && rhs.eval(observable)?),
            Expr::Or(lhs, rhs) => Some(lhs.eval(observable)? || rhs.eval(observable)?),
            Expr::Path(_) | Expr::Literal(_) => {
                self.eval_numeric(observable).map(|n| n != 0)
            }
        }
    }

    fn eval_numeric(&self, observable: &dyn Observable) -> Option<i64> {
        match self {
            Expr::Literal(n) => Some(*n),
            Expr::Path(path) => value_to_i64(&observable.query(path)?),
            _ => None,
        }
    }
}

fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(b) => Some(i64::from(*b)),
        Value::U8(v) => Some(i64::from(*v)),
        Value::U16(v) => Some(i64::from(*v)),
        Value::U32(v) => Some(i64::from(*v)),
        Value::U64(v) => Some(i64::try_from(*v).ok()?),
        Value::I8(v) => Some(i64::from(*v)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(i64),
    Op(&'static str),
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            if c == '0' && chars.get(i + 1) == Some(&'x') {
                i += 2;
                while i < chars.len() && chars[i].is_ascii_hexdigit() {
                    i += 1;
                }
                let text: String = chars[start + 2..i].iter().collect();
                let n = i64::from_str_radix(&text, 16)
                    .map_err(|e| format!("bad hex literal: {e}"))?;
                tokens.push(Token::Number(n));
            } else {
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: i64 = text.parse().map_err(|e| format!("bad number: {e}"))?;
                tokens.push(Token::Number(n));
            }
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        let op = match two.as_str() {
            "==" => Some("=="),
            "!=" => Some("!="),
            ">=" => Some(">="),
            "<=" => Some("<="),
            "&&" => Some("&&"),
            "||" => Some("||"),
            _ => None,
        };
        if let Some(op) = op {
            tokens.push(Token::Op(op));
            i += 2;
            continue;
        }
        let op = match c {
            '>' => ">",
            '<' => "<",
            _ => return Err(format!("unexpected character '{c}' at offset {i}")),
        };
        tokens.push(Token::Op(op));
        i += 1;
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Op("||"))) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_comparison()?;
        while matches!(self.peek(), Some(Token::Op("&&"))) {
            self.pos += 1;
            let rhs = self.parse_comparison()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let lhs = self.parse_operand()?;
        let op = match self.peek() {
            Some(Token::Op("==")) => CompareOp::Eq,
            Some(Token::Op("!=")) => CompareOp::Ne,
            Some(Token::Op("<")) => CompareOp::Lt,
            Some(Token::Op("<=")) => CompareOp::Le,
            Some(Token::Op(">")) => CompareOp::Gt,
            Some(Token::Op(">=")) => CompareOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_operand()?;
        Ok(Expr::Compare(Box::new(lhs), op, Box::new(rhs)))
    }

    fn parse_operand(&mut self) -> Result<Expr, String> {
        match self.tokens.get(self.pos) {
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Ok(Expr::Path(name.clone()))
            }
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Literal(*n))
            }
            other => Err(format!("expected operand, found {other:?}")),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        };
        write!(f, "{s}")
    }
}

struct FakeObservable(HashMap<&'static str, Value>);

impl Observable for FakeObservable {
    fn query(&self, path: &str) -> Option<Value> {
        self.0.get(path).cloned()
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observable_with(a: u8, pc: u16) -> FakeObservable {
        let mut map = HashMap::new();
        map.insert("a", Value::U8(a));
        map.insert("pc", Value::U16(pc));
        FakeObservable(map)
    }

    #[test]
    fn parses_and_evaluates_simple_comparison() {
        let expr = Expr::parse("a == 0x10").unwrap();
        assert_eq!(expr.eval(&observable_with(0x10, 0)), Some(true));
        assert_eq!(expr.eval(&observable_with(0x11, 0)), Some(false));
    }

    #[test]
    fn parses_and_evaluates_conjunction() {
        let expr = Expr::parse("a == 0x10 && pc > 0x8000").unwrap();
        assert_eq!(expr.eval(&observable_with(0x10, 0x9000)), Some(true));
        assert_eq!(expr.eval(&observable_with(0x10, 0x1000)), Some(false));
    }

    #[test]
    fn parses_disjunction() {
        let expr = Expr::parse("a == 1 || a == 2").unwrap();
        assert_eq!(expr.eval(&observable_with(2, 0)), Some(true));
        assert_eq!(expr.eval(&observable_with(3, 0)), Some(false));
    }

    #[test]
    fn unresolved_path_yields_none() {
        let expr = Expr::parse("missing == 1").unwrap();
        assert_eq!(expr.eval(&observable_with(0, 0)), None);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Expr::parse("a == ").is_err());
        assert!(Expr::parse("a !! 1").is_err());
    }

    #[test]
    fn breakpoint_fires_on_matching_execute_address() {
        let mut dbg = Debugger::new();
        let id = dbg.add_breakpoint(BreakpointKind::Execute, 0x8000, None, Life::Permanent);
        let observable = observable_with(0, 0x8000);
        let fired = dbg.check(BreakpointKind::Execute, 0x8000, &observable);
        assert_eq!(fired, Some(id));
        assert_eq!(dbg.mode(), Mode::Halted);
    }

    #[test]
    fn breakpoint_respects_condition() {
        let mut dbg = Debugger::new();
        let cond = Expr::parse("a == 0x42").unwrap();
        dbg.add_breakpoint(BreakpointKind::Execute, 0x8000, Some(cond), Life::Permanent);

        let observable_no_match = observable_with(0, 0x8000);
        assert_eq!(
            dbg.check(BreakpointKind::Execute, 0x8000, &observable_no_match),
            None
        );

        let observable_match = observable_with(0x42, 0x8000);
        assert!(dbg
            .check(BreakpointKind::Execute, 0x8000, &observable_match)
            .is_some());
    }

    #[test]
    fn one_shot_breakpoint_is_removed_after_firing() {
        let mut dbg = Debugger::new();
        let id = dbg.add_breakpoint(BreakpointKind::Execute, 0x8000, None, Life::OneShot);
        let observable = observable_with(0, 0x8000);
        dbg.check(BreakpointKind::Execute, 0x8000, &observable);
        dbg.resume();
        assert!(dbg.breakpoints().iter().all(|b| b.id != id));
        assert_eq!(dbg.mode(), Mode::Inactive);
    }

    #[test]
    fn time_breakpoint_fires_at_or_after_deadline() {
        let mut dbg = Debugger::new();
        dbg.add_time_breakpoint(1000, None, Life::Permanent);
        let observable = observable_with(0, 0);
        assert_eq!(dbg.check_time(999, &observable), None);
        assert!(dbg.check_time(1000, &observable).is_some());
    }

    #[test]
    fn event_breakpoint_matches_type_and_detail() {
        let mut dbg = Debugger::new();
        dbg.add_event_breakpoint("fdc", "index", None, Life::Permanent);
        let observable = observable_with(0, 0);
        assert_eq!(dbg.check_event("fdc", "step", &observable), None);
        assert!(dbg.check_event("fdc", "index", &observable).is_some());
    }

    #[test]
    fn remove_breakpoint_returns_kind_and_tstate_for_time_kind() {
        let mut dbg = Debugger::new();
        let id = dbg.add_time_breakpoint(4242, None, Life::Permanent);
        let removed = dbg.remove_breakpoint(id);
        assert_eq!(removed, Some((BreakpointKind::Time, 4242)));
        assert_eq!(dbg.mode(), Mode::Inactive);
    }

    #[test]
    fn paging_observer_queues_page_and_unpage_events() {
        let mut dbg = Debugger::new();
        dbg.on_page(0, "beta128");
        dbg.on_page(1, "beta128");
        dbg.on_unpage(0);
        let events = dbg.drain_events();
        assert_eq!(
            events,
            vec![
                ("paging".to_string(), "page:0:beta128".to_string()),
                ("paging".to_string(), "page:1:beta128".to_string()),
                ("paging".to_string(), "unpage:0".to_string()),
            ]
        );
        assert!(dbg.drain_events().is_empty());
    }

    #[test]
    fn event_breakpoint_fires_on_drained_paging_event() {
        let mut dbg = Debugger::new();
        dbg.add_event_breakpoint("paging", "page:0:beta128", None, Life::Permanent);
        dbg.on_page(0, "beta128");
        let observable = observable_with(0, 0);
        let mut fired = None;
        for (event_type, detail) in dbg.drain_events() {
            fired = dbg.check_event(&event_type, &detail, &observable);
        }
        assert!(fired.is_some());
        assert_eq!(dbg.mode(), Mode::Halted);
    }

    #[test]
    fn disabled_breakpoint_never_fires() {
        let mut dbg = Debugger::new();
        let id = dbg.add_breakpoint(BreakpointKind::Execute, 0x8000, None, Life::Permanent);
        dbg.set_enabled(id, false);
        let observable = observable_with(0, 0x8000);
        assert_eq!(dbg.check(BreakpointKind::Execute, 0x8000, &observable), None);
    }
}
