//! The console front end (spec.md §2 "Console surface", §4.9).
//!
//! A line-oriented REPL built on the same `Adapter` the DAP binary drives.
//! Grounded in the teacher's `ui/console` (the `rustyline` editor/history
//! setup, `ui/console/file.rs`'s cached+highlighted source view) but with
//! the teacher's `chumsky`-driven open grammar replaced by the small,
//! fixed command set spec.md §4.9 names (see `command.rs`).

pub mod command;
pub mod source_view;

use crate::adapter::{Adapter, AdapterEvent};
use crate::console::command::{BreakLocation, Command, InfoTarget};
use crate::console::source_view::SourceView;
use crate::variable::{self, VarNode};
use rustyline::error::ReadlineError;
use rustyline::history::FileHistory;
use rustyline::{Config, Editor};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const PROMPT: &str = "(hgdb) ";
const HISTORY_FILE: &str = ".hgdb";

/// Two pseudo-values `p` recognizes without forwarding to the server
/// (spec.md §4.9, §9 Open Question 2).
const PSEUDO_BREAKPOINT_ID: &str = "breakpoint-id";
const PSEUDO_NAMESPACE_ID: &str = "namespace-id";

pub struct ConsoleApp {
    adapter: Adapter,
    editor: Editor<(), FileHistory>,
    source: SourceView,
    workspace: Option<PathBuf>,
}

/// What the REPL does after one line has been dispatched.
pub enum Turn {
    Continue,
    AwaitBreak,
    Quit,
}

impl ConsoleApp {
    pub fn new(adapter: Adapter, workspace: Option<PathBuf>) -> anyhow::Result<Self> {
        let config = Config::builder().auto_add_history(true).build();
        let mut editor = Editor::<(), FileHistory>::with_history(config, FileHistory::new())?;
        if let Some(path) = history_path() {
            let _ = editor.load_history(&path);
        }
        Ok(Self { adapter, editor, source: SourceView::new(), workspace })
    }

    /// The `hgdb` binary's main loop: read one line, dispatch it, and, for
    /// flow commands, block on the next break event before re-prompting
    /// (spec.md §4.9).
    pub async fn run(&mut self) -> anyhow::Result<()> {
        println!("hgdb connected. Type `help` for a list of commands.");
        loop {
            let line = match self.read_line().await {
                Ok(line) => line,
                Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
                Err(err) => return Err(err.into()),
            };

            let command = match command::parse(&line) {
                Ok(Some(cmd)) => cmd,
                Ok(None) => continue,
                Err(err) => {
                    println!("error: {err}");
                    continue;
                }
            };

            match self.dispatch(command).await {
                Turn::Continue => {}
                Turn::AwaitBreak => self.await_break_event().await,
                Turn::Quit => break,
            }
        }
        if let Some(path) = history_path() {
            let _ = self.editor.save_history(&path);
        }
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, ReadlineError> {
        // rustyline's `readline` is blocking; on the multi-thread runtime
        // this binary runs under, that only parks the worker thread calling
        // it, not the whole runtime, so the adapter's transport task keeps
        // making progress on another worker.
        let prompt = PROMPT;
        let mut editor = std::mem::replace(
            &mut self.editor,
            Editor::<(), FileHistory>::with_history(Config::default(), FileHistory::new())?,
        );
        let (result, editor) = tokio::task::spawn_blocking(move || {
            let result = editor.readline(prompt);
            (result, editor)
        })
        .await
        .expect("readline task panicked");
        self.editor = editor;
        result
    }

    /// The underlying adapter, for inspection after a line has been
    /// dispatched (the break context, the instance table, ...).
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Drive one line already parsed into a [`Command`]: flow commands await
    /// the next break event, everything else resolves immediately. Exposed
    /// so a driver that already owns the input loop (or a test) can push
    /// commands without going through `readline`.
    pub async fn dispatch_line(&mut self, command: Command) -> Turn {
        match self.dispatch(command).await {
            Turn::AwaitBreak => {
                self.await_break_event().await;
                Turn::Continue
            }
            other => other,
        }
    }

    async fn await_break_event(&mut self) {
        loop {
            match self.adapter.poll_event().await {
                Some(AdapterEvent::Stopped { instance_ids, reason }) => {
                    let ctx = self.adapter.break_context();
                    if let Some(ctx) = ctx {
                        println!(
                            "stopped ({reason}) at {}:{}:{}, {} instance(s): {instance_ids:?}",
                            ctx.filename, ctx.line_num, ctx.column_num, instance_ids.len()
                        );
                    }
                    return;
                }
                Some(AdapterEvent::SessionEnded(reason)) => {
                    println!("session ended: {reason}");
                    return;
                }
                None => return,
            }
        }
    }

    async fn dispatch(&mut self, command: Command) -> Turn {
        if command::awaits_break_event(&command) {
            if let Err(err) = self.dispatch_flow(&command).await {
                println!("error: {err}");
                return Turn::Continue;
            }
            return Turn::AwaitBreak;
        }

        match command {
            Command::Break(loc) => self.cmd_break(loc).await,
            Command::Watch { var, condition } => self.cmd_watch(var, condition).await,
            Command::Print(expr) => self.cmd_print(expr).await,
            Command::Set { var, value } => self.cmd_set(var, value).await,
            Command::List { location, count } => self.cmd_list(location, count),
            Command::Info(target) => self.cmd_info(target),
            Command::Thread(iid) => self.cmd_thread(iid),
            Command::Condition { id, expr } => self.cmd_condition(id, expr).await,
            Command::Clear(loc) => self.cmd_clear(loc).await,
            Command::Delete(id) => self.cmd_delete(id).await,
            Command::Help => {
                println!("{HELP_TEXT}");
                Turn::Continue
            }
            Command::Quit => Turn::Quit,
            // Handled above via `awaits_break_event`.
            Command::Continue | Command::Next | Command::StepBack | Command::ReverseContinue | Command::Go(_) => {
                Turn::Continue
            }
        }
    }

    async fn dispatch_flow(&mut self, command: &Command) -> crate::error::Result<()> {
        match command {
            Command::Continue => self.adapter.continue_().await,
            Command::Next => self.adapter.next().await,
            Command::StepBack => self.adapter.step_back().await,
            Command::ReverseContinue => self.adapter.reverse_continue().await,
            Command::Go(time) => self.adapter.go_to_time(*time).await,
            _ => unreachable!("only flow commands reach dispatch_flow"),
        }
    }

    async fn cmd_break(&mut self, loc: BreakLocation) -> Turn {
        let file = self.resolve_file(&loc.file);
        let line = loc.line.unwrap_or(1);
        let verified = self.adapter.verify_breakpoint(&file, line, loc.column).await;
        let reported = self.adapter.breakpoints.select_reported(&verified, loc.column);
        let ids: Vec<u32> = reported.iter().map(|r| r.id).collect();
        for id in &ids {
            if let Err(err) = self.adapter.commit_breakpoint(*id, None).await {
                println!("error: {err}");
                return Turn::Continue;
            }
        }
        if ids.is_empty() {
            println!("no breakpoint location matched {file}:{line}");
        } else {
            println!("breakpoint(s) set: {ids:?}");
        }
        Turn::Continue
    }

    async fn cmd_watch(&mut self, var: String, condition: Option<String>) -> Turn {
        let Some(instance_id) = self.adapter.session.current_instance_id() else {
            println!("error: no active instance to watch on");
            return Turn::Continue;
        };
        match self.adapter.add_data_breakpoint(instance_id, var, condition).await {
            Ok(true) => println!("watchpoint set"),
            Ok(false) => println!("error: no breakpoint id known for the current instance"),
            Err(err) => println!("error: {err}"),
        }
        Turn::Continue
    }

    async fn cmd_print(&mut self, expr: String) -> Turn {
        let trimmed = expr.trim();
        if trimmed == PSEUDO_BREAKPOINT_ID {
            if let Some(ctx) = self.adapter.break_context() {
                println!("{}", ctx.current_scope_breakpoint_id);
            }
            return Turn::Continue;
        }
        if trimmed == PSEUDO_NAMESPACE_ID {
            if let Some(ctx) = self.adapter.break_context() {
                println!("{}", ctx.namespace_id);
            }
            return Turn::Continue;
        }

        let overridden = self
            .adapter
            .break_context()
            .map(|ctx| ctx.set_values.contains(trimmed))
            .unwrap_or(false);

        if !overridden {
            if let Some(value) = self.lookup_cached_local(trimmed) {
                println!("{value}");
                return Turn::Continue;
            }
        }

        let (breakpoint_id, namespace_id) = match self.adapter.current_scope_ids() {
            Ok(ids) => ids,
            Err(err) => {
                println!("error: {err}");
                return Turn::Continue;
            }
        };
        match self.adapter.evaluate(expr, breakpoint_id, Some(namespace_id)).await {
            Ok(result) => println!("{result}"),
            Err(err) => println!("error: {err}"),
        }
        Turn::Continue
    }

    async fn cmd_set(&mut self, var: String, value: i64) -> Turn {
        let (breakpoint_id, namespace_id) = match self.adapter.current_scope_ids() {
            Ok(ids) => ids,
            Err(err) => {
                println!("error: {err}");
                return Turn::Continue;
            }
        };
        let result = self
            .adapter
            .set_value(var.clone(), value, Some(breakpoint_id), None, Some(namespace_id))
            .await;
        match result {
            Ok(()) => {
                if let Some(ctx) = &mut self.adapter.session.break_context {
                    ctx.set_values.insert(var);
                }
            }
            Err(err) => println!("error: {err}"),
        }
        Turn::Continue
    }

    fn cmd_list(&mut self, location: Option<BreakLocation>, count: Option<u64>) -> Turn {
        let (file, line) = match (&location, self.adapter.break_context()) {
            (Some(loc), _) => (loc.file.clone(), loc.line.unwrap_or(1)),
            (None, Some(ctx)) => (ctx.filename.clone(), ctx.line_num),
            (None, None) => {
                println!("error: no active break and no location given");
                return Turn::Continue;
            }
        };
        let resolved = self.resolve_for_listing(&file);
        match self.source.render(&resolved, line, count) {
            Ok(text) => print!("{text}"),
            Err(err) => println!("error: could not read {}: {err}", resolved.display()),
        }
        Turn::Continue
    }

    fn cmd_info(&mut self, target: InfoTarget) -> Turn {
        match target {
            InfoTarget::Breakpoint => {
                for record in self.adapter.breakpoints.list_normal() {
                    println!(
                        "#{} {}:{}:{} condition={:?}",
                        record.id, record.filename, record.line_num, record.column_num, record.condition
                    );
                }
            }
            InfoTarget::Watchpoint => {
                for record in self.adapter.breakpoints.list_data() {
                    println!(
                        "instance={} var={} condition={:?}",
                        record.instance_id, record.var_name, record.condition
                    );
                }
            }
            InfoTarget::Threads => {
                for iid in self.adapter.session.instance_ids_in_order() {
                    if let Some(set) = self.adapter.session.instance(iid) {
                        println!("[{iid}] {}", set.instance_name);
                    }
                }
            }
            InfoTarget::Time => {
                if let Some(ctx) = self.adapter.break_context() {
                    println!("{}", ctx.time);
                }
            }
        }
        Turn::Continue
    }

    fn cmd_thread(&mut self, iid: u64) -> Turn {
        let exists = self.adapter.session.instance(iid).is_some();
        if !exists {
            println!("error: no such instance {iid} in the current break");
            return Turn::Continue;
        }
        let position = self
            .adapter
            .session
            .instance_ids_in_order()
            .iter()
            .position(|&id| id == iid);
        if let (Some(ctx), Some(idx)) = (&mut self.adapter.session.break_context, position) {
            ctx.current_instance_index = idx;
        }
        self.adapter.session.sync_current_scope_ids();
        Turn::Continue
    }

    async fn cmd_condition(&mut self, id: u32, expr: String) -> Turn {
        match self.adapter.commit_breakpoint(id, Some(expr)).await {
            Ok(()) => println!("condition set on breakpoint {id}"),
            Err(err) => println!("error: {err}"),
        }
        Turn::Continue
    }

    async fn cmd_clear(&mut self, location: Option<BreakLocation>) -> Turn {
        match location {
            None => println!("not implemented"),
            Some(loc) => {
                let file = self.resolve_file(&loc.file);
                match self.adapter.clear_breakpoints_in_file(&file).await {
                    Ok(ids) => println!("cleared: {ids:?}"),
                    Err(err) => println!("error: {err}"),
                }
            }
        }
        Turn::Continue
    }

    async fn cmd_delete(&mut self, id: u32) -> Turn {
        if let Err(err) = self.adapter.remove_breakpoint(id).await {
            println!("error: {err}");
        }
        Turn::Continue
    }

    // ---------------------------------------------------------------- helpers

    /// Bare basenames are expanded via the server's filename index (spec.md
    /// §4.9 "Filename resolution").
    fn resolve_file(&self, name: &str) -> String {
        self.adapter
            .filenames
            .resolve(name)
            .map(str::to_string)
            .unwrap_or_else(|| name.to_string())
    }

    /// For `l`: if still relative after the filename index and a workspace
    /// is configured, fall back to a recursive directory walk for the first
    /// matching basename (spec.md §4.9).
    fn resolve_for_listing(&self, name: &str) -> PathBuf {
        let resolved = self.resolve_file(name);
        let path = PathBuf::from(&resolved);
        if path.is_absolute() {
            return path;
        }
        if let Some(workspace) = &self.workspace {
            for entry in WalkDir::new(workspace).into_iter().filter_map(Result::ok) {
                if entry.file_name().to_string_lossy() == resolved {
                    return entry.into_path();
                }
            }
        }
        path
    }

    /// Resolve `expr` (a dot/bracket path) against the cached local
    /// variable tree of the current instance's innermost scope, without
    /// going to the server (spec.md §4.9 `p`).
    fn lookup_cached_local(&self, expr: &str) -> Option<String> {
        let instance_id = self.adapter.session.current_instance_id()?;
        let set = self.adapter.session.instance(instance_id)?;
        let scope = set.scopes.last()?;
        let path = variable::normalize_key(expr);
        match variable::navigate(&scope.local, &path)? {
            VarNode::Leaf(value) => Some(value.display()),
            _ => None,
        }
    }
}

fn history_path() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(HISTORY_FILE))
}

pub fn default_workspace(dir: Option<&str>) -> Option<PathBuf> {
    dir.map(|d| Path::new(d).to_path_buf())
}

const HELP_TEXT: &str = r#"
b file[:line[:col]]      set a breakpoint
w var [--cond EXPR]      set a data (write) breakpoint on the current instance
c                        continue
n                        step over
step-back                step back
rc                       reverse-continue
p expr                   evaluate or print a cached local variable
set var=intval           set a variable in the current scope
l [file:line] [-n k]     list source around a location
info breakpoint|watchpoint|threads|time
thread iid               switch the console's current instance
condition bp_id expr     set a condition on an existing breakpoint
go time                  jump to a simulation time (replay mode only)
clear [file:line[:col]]  clear breakpoints in a file
d id                     remove a breakpoint by id
q                        quit
"#;
