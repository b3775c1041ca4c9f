//! The console's fixed command grammar (spec.md §4.9).
//!
//! Deliberately not a general expression grammar: the set of commands is
//! small and fixed, so a hand-rolled tokenizer reads better here than the
//! `chumsky` combinator grammar the teacher's full command language needs
//! (`src/ui/command/parser`) for its much larger surface.

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Break(BreakLocation),
    Watch { var: String, condition: Option<String> },
    Continue,
    Next,
    StepBack,
    ReverseContinue,
    Print(String),
    Set { var: String, value: i64 },
    List { location: Option<BreakLocation>, count: Option<u64> },
    Info(InfoTarget),
    Thread(u64),
    Condition { id: u32, expr: String },
    Go(u64),
    Clear(Option<BreakLocation>),
    Delete(u32),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakLocation {
    pub file: String,
    pub line: Option<u64>,
    pub column: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoTarget {
    Breakpoint,
    Watchpoint,
    Threads,
    Time,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse one line of console input, per spec.md §4.9's command table. Blank
/// lines parse to `None` (re-prompt, no request sent).
pub fn parse(line: &str) -> Result<Option<Command>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let command = match head {
        "b" | "break" => Command::Break(parse_location(rest)?),
        "w" | "watch" => parse_watch(rest)?,
        "c" | "continue" => Command::Continue,
        "n" | "next" => Command::Next,
        "step-back" => Command::StepBack,
        "rc" => Command::ReverseContinue,
        "p" | "print" => Command::Print(rest.to_string()),
        "set" => parse_set(rest)?,
        "l" | "list" => parse_list(rest)?,
        "info" => Command::Info(parse_info_target(rest)?),
        "thread" => Command::Thread(
            rest.parse()
                .map_err(|_| ParseError(format!("expected an instance id, got `{rest}`")))?,
        ),
        "condition" => parse_condition(rest)?,
        "go" => Command::Go(
            rest.parse()
                .map_err(|_| ParseError(format!("expected a simulation time, got `{rest}`")))?,
        ),
        "clear" => Command::Clear(if rest.is_empty() { None } else { Some(parse_location(rest)?) }),
        "d" | "delete" => Command::Delete(
            rest.parse()
                .map_err(|_| ParseError(format!("expected a breakpoint id, got `{rest}`")))?,
        ),
        "help" | "h" | "?" => Command::Help,
        "q" | "quit" => Command::Quit,
        other => return Err(ParseError(format!("unknown command `{other}`, try `help`"))),
    };
    Ok(Some(command))
}

/// `file[:line[:col]]`.
fn parse_location(spec: &str) -> Result<BreakLocation, ParseError> {
    if spec.is_empty() {
        return Err(ParseError("expected a file[:line[:col]] location".into()));
    }
    let mut parts = spec.split(':');
    let file = parts.next().unwrap_or_default().to_string();
    let line = parts
        .next()
        .map(|s| s.parse::<u64>().map_err(|_| ParseError(format!("bad line number `{s}`"))))
        .transpose()?;
    let column = parts
        .next()
        .map(|s| s.parse::<u64>().map_err(|_| ParseError(format!("bad column number `{s}`"))))
        .transpose()?;
    Ok(BreakLocation { file, line, column })
}

/// `var [--cond EXPR...]`.
fn parse_watch(rest: &str) -> Result<Command, ParseError> {
    let mut tokens = rest.split_whitespace();
    let var = tokens
        .next()
        .ok_or_else(|| ParseError("expected a variable name".into()))?
        .to_string();
    let condition = match tokens.next() {
        Some("--cond") => {
            let expr: Vec<&str> = tokens.collect();
            if expr.is_empty() {
                return Err(ParseError("--cond needs a condition expression".into()));
            }
            Some(expr.join(" "))
        }
        Some(other) => return Err(ParseError(format!("unexpected token `{other}`"))),
        None => None,
    };
    Ok(Command::Watch { var, condition })
}

/// `var=intval`.
fn parse_set(rest: &str) -> Result<Command, ParseError> {
    let (var, value) = rest
        .split_once('=')
        .ok_or_else(|| ParseError("expected `var=intval`".into()))?;
    let var = var.trim().to_string();
    let value: i64 = value
        .trim()
        .parse()
        .map_err(|_| ParseError(format!("`{value}` is not an integer")))?;
    Ok(Command::Set { var, value })
}

/// `[file:line] [-n k]`.
fn parse_list(rest: &str) -> Result<Command, ParseError> {
    let mut location = None;
    let mut count = None;
    let mut tokens = rest.split_whitespace().peekable();
    while let Some(tok) = tokens.next() {
        if tok == "-n" {
            let n = tokens
                .next()
                .ok_or_else(|| ParseError("-n needs a line count".into()))?;
            count = Some(
                n.parse()
                    .map_err(|_| ParseError(format!("bad line count `{n}`")))?,
            );
        } else {
            location = Some(parse_location(tok)?);
        }
    }
    Ok(Command::List { location, count })
}

fn parse_info_target(rest: &str) -> Result<InfoTarget, ParseError> {
    match rest {
        "breakpoint" | "breakpoints" => Ok(InfoTarget::Breakpoint),
        "watchpoint" | "watchpoints" => Ok(InfoTarget::Watchpoint),
        "threads" => Ok(InfoTarget::Threads),
        "time" => Ok(InfoTarget::Time),
        other => Err(ParseError(format!(
            "unknown `info` target `{other}` (expected breakpoint|watchpoint|threads|time)"
        ))),
    }
}

/// `<bp_id> <expr…>`.
fn parse_condition(rest: &str) -> Result<Command, ParseError> {
    let (id, expr) = rest
        .split_once(char::is_whitespace)
        .ok_or_else(|| ParseError("expected `condition <bp_id> <expr>`".into()))?;
    let id: u32 = id
        .parse()
        .map_err(|_| ParseError(format!("expected a breakpoint id, got `{id}`")))?;
    Ok(Command::Condition { id, expr: expr.trim().to_string() })
}

/// Whether `cmd`, once dispatched, must wait for the next server-initiated
/// break event before returning control to the prompt (spec.md §4.9 group
/// "b" = {continue, step-over, step-back, reverse-continue, go}).
pub fn awaits_break_event(cmd: &Command) -> bool {
    matches!(
        cmd,
        Command::Continue | Command::Next | Command::StepBack | Command::ReverseContinue | Command::Go(_)
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_break_with_file_only() {
        let cmd = parse("b top.sv").unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Break(BreakLocation { file: "top.sv".into(), line: None, column: None })
        );
    }

    #[test]
    fn parses_break_with_file_line_col() {
        let cmd = parse("b top.sv:10:2").unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Break(BreakLocation {
                file: "top.sv".into(),
                line: Some(10),
                column: Some(2),
            })
        );
    }

    #[test]
    fn parses_watch_with_condition() {
        let cmd = parse("w a.b --cond a.b > 2").unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Watch { var: "a.b".into(), condition: Some("a.b > 2".into()) }
        );
    }

    #[test]
    fn parses_set() {
        let cmd = parse("set a=42").unwrap().unwrap();
        assert_eq!(cmd, Command::Set { var: "a".into(), value: 42 });
    }

    #[test]
    fn rejects_non_integer_set_value() {
        assert!(parse("set a=foo").is_err());
    }

    #[test]
    fn parses_list_with_count() {
        let cmd = parse("l top.sv:5 -n 3").unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::List {
                location: Some(BreakLocation { file: "top.sv".into(), line: Some(5), column: None }),
                count: Some(3),
            }
        );
    }

    #[test]
    fn blank_line_is_none() {
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn flow_commands_await_break_event() {
        assert!(awaits_break_event(&Command::Continue));
        assert!(awaits_break_event(&Command::Go(5)));
        assert!(!awaits_break_event(&Command::Print("a".into())));
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(parse("frobnicate").is_err());
    }
}
