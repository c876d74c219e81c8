//! Debug session: breakpoints, single stepping and the JSON command channel.
//!
//! The session is owned by the engine. Hooks run only while a debugger is
//! attached, except for the pending-breakpoint hook which the interpreter
//! calls on every entry.

use serde::Serialize;
use serde_json::Value;

use crate::runner::ds::value::JsValue;

pub const PROTOCOL_VERSION: i32 = 1;

pub const ERR_VERSION_MISMATCH: i32 = -1;
pub const ERR_UNKNOWN_COMMAND: i32 = -2;
pub const ERR_NO_SUCH_BREAKPOINT: i32 = -3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub handle: i32,
    pub full_name: String,
    pub line: usize,
    /// Name the engine knows the file by; matched instead of `full_name`
    /// when not empty.
    pub engine_name: String,
    /// Recorded and reported, not evaluated.
    pub condition: String,
}

impl Breakpoint {
    fn matches(&self, file: &str, line: usize) -> bool {
        let name = if self.engine_name.is_empty() {
            &self.full_name
        } else {
            &self.engine_name
        };
        self.line == line && name == file
    }
}

/// Reported to the breakpoint callback. `handle` is 0 for a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointHit {
    pub handle: i32,
    pub file: String,
    pub line: usize,
    pub function: String,
    pub condition: String,
    pub step: bool,
}

type HitCallback = Box<dyn FnMut(&BreakpointHit)>;
type ResolveCallback = Box<dyn FnMut()>;
type EnterCallback = Box<dyn FnMut(&str)>;
type LeaveCallback = Box<dyn FnMut(&str, &JsValue)>;

#[derive(Default)]
pub struct DebugSession {
    pub attached: bool,
    breakpoints: Vec<Breakpoint>,
    stepping: bool,
    last_stop: Option<(usize, String)>,
    counter: i32,
    /// Set by the host; the next `debugger` statement stops.
    pub pause_at_next_opportunity: bool,
    on_breakpoint: Option<HitCallback>,
    on_resolve_pending: Option<ResolveCallback>,
    on_entering_function: Option<EnterCallback>,
    on_leaving_function: Option<LeaveCallback>,
}

impl DebugSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self) {
        self.attached = true;
    }

    pub fn detach(&mut self) {
        self.attached = false;
        self.stepping = false;
    }

    pub fn on_breakpoint(&mut self, f: impl FnMut(&BreakpointHit) + 'static) {
        self.on_breakpoint = Some(Box::new(f));
    }

    pub fn on_resolve_pending(&mut self, f: impl FnMut() + 'static) {
        self.on_resolve_pending = Some(Box::new(f));
    }

    pub fn on_entering_function(&mut self, f: impl FnMut(&str) + 'static) {
        self.on_entering_function = Some(Box::new(f));
    }

    pub fn on_leaving_function(&mut self, f: impl FnMut(&str, &JsValue) + 'static) {
        self.on_leaving_function = Some(Box::new(f));
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    pub fn is_stepping(&self) -> bool {
        self.stepping
    }

    /// Runs a JSON command and returns its status code or breakpoint handle.
    pub fn handle_command(&mut self, json: &str) -> i32 {
        let request: Value = match serde_json::from_str(json) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("malformed debugger command: {}", e);
                return ERR_UNKNOWN_COMMAND;
            }
        };
        let command = request.get("command").and_then(Value::as_str).unwrap_or("");
        if command == "protocolVersion" {
            return PROTOCOL_VERSION;
        }
        let version = request.get("version").and_then(as_int);
        if version != Some(PROTOCOL_VERSION as i64) {
            tracing::warn!("debugger protocol version mismatch: {:?}", request.get("version"));
            return ERR_VERSION_MISMATCH;
        }
        match command {
            "insertBreakpoint" => {
                let bp = Breakpoint {
                    handle: self.counter + 1,
                    full_name: string_field(&request, "fullName"),
                    line: request.get("lineNumber").and_then(as_int).unwrap_or(0).max(0) as usize,
                    engine_name: string_field(&request, "engineName"),
                    condition: string_field(&request, "condition"),
                };
                self.counter += 1;
                tracing::debug!("breakpoint {} at {}:{}", bp.handle, bp.full_name, bp.line);
                self.breakpoints.push(bp);
                self.counter
            }
            "removeBreakpoint" => {
                let file = string_field(&request, "fullName");
                let line = request.get("lineNumber").and_then(as_int).unwrap_or(0).max(0) as usize;
                self.remove_breakpoint(&file, line)
            }
            "prepareStep" => {
                self.stepping = true;
                tracing::debug!("stepping armed");
                0
            }
            other => {
                tracing::warn!("unknown debugger command '{}'", other);
                ERR_UNKNOWN_COMMAND
            }
        }
    }

    /// Removes the newest entry for (file, line); any match is removed by
    /// moving the last entry into its place.
    fn remove_breakpoint(&mut self, file: &str, line: usize) -> i32 {
        let matches = |bp: &Breakpoint| bp.full_name == file && bp.line == line;
        if self.breakpoints.last().map(matches).unwrap_or(false) {
            self.breakpoints.pop();
            return 0;
        }
        match self.breakpoints.iter().position(matches) {
            Some(i) => {
                self.breakpoints.swap_remove(i);
                0
            }
            None => {
                tracing::warn!("no breakpoint at {}:{}", file, line);
                ERR_NO_SUCH_BREAKPOINT
            }
        }
    }

    pub fn resolve_pending(&mut self) {
        if let Some(f) = self.on_resolve_pending.as_mut() {
            f();
        }
    }

    pub fn entering_function(&mut self, name: &str) {
        tracing::debug!("entering {}", name);
        if let Some(f) = self.on_entering_function.as_mut() {
            f(name);
        }
    }

    pub fn leaving_function(&mut self, name: &str, result: &JsValue) {
        tracing::debug!("leaving {}", name);
        if let Some(f) = self.on_leaving_function.as_mut() {
            f(name, result);
        }
    }

    /// Line hook. A pending step wins over breakpoints.
    pub fn check_for_break(&mut self, file: &str, line: usize, function: &str) {
        if !self.stepping && self.breakpoints.is_empty() {
            return;
        }
        if file.is_empty() {
            return;
        }
        if self.stepping {
            let here = (line, file.to_string());
            if self.last_stop.as_ref() != Some(&here) {
                self.stepping = false;
                self.last_stop = Some(here);
                self.trigger(BreakpointHit {
                    handle: 0,
                    file: file.to_string(),
                    line,
                    function: function.to_string(),
                    condition: String::new(),
                    step: true,
                });
                return;
            }
        }
        let hits: Vec<BreakpointHit> = self
            .breakpoints
            .iter()
            .rev()
            .filter(|bp| bp.matches(file, line))
            .map(|bp| BreakpointHit {
                handle: bp.handle,
                file: file.to_string(),
                line,
                function: function.to_string(),
                condition: bp.condition.to_string(),
                step: false,
            })
            .collect();
        for hit in hits {
            self.last_stop = Some((line, file.to_string()));
            self.trigger(hit);
        }
    }

    /// Stops at a `debugger` statement the host asked to pause at.
    pub fn pause(&mut self, file: &str, line: usize, function: &str) {
        self.last_stop = Some((line, file.to_string()));
        self.trigger(BreakpointHit {
            handle: 0,
            file: file.to_string(),
            line,
            function: function.to_string(),
            condition: String::new(),
            step: false,
        });
    }

    fn trigger(&mut self, hit: BreakpointHit) {
        tracing::debug!(
            "break at {}:{} in {} (handle {})",
            hit.file,
            hit.line,
            hit.function,
            hit.handle
        );
        if let Some(f) = self.on_breakpoint.as_mut() {
            f(&hit);
        }
    }
}

fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_field(request: &Value, name: &str) -> String {
    request
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}
