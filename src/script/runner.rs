//! In-process script harness.
//!
//! Runs every selected script of one module against one binary. Each script
//! gets its own work directory, `<workdir root>/script-<name>`, whose `repo`
//! subdirectory must already hold the module's working copy. Archive files
//! are written into the work directory and commands start in
//! `repo/<module path>`.
//!
//! ## Commands
//!
//! | Command | Meaning |
//! |---|---|
//! | `exec prog args...` | run a program |
//! | `<binary> args...` | run the binary under test |
//! | `stdout re` / `stderr re` | last command's output matches `re` |
//! | `cmp a b` | files equal; `a` may be `stdout` or `stderr` |
//! | `exists path...` | paths exist |
//! | `cd dir` | change directory |
//! | `env K=V...` | set environment variables |
//! | `skip [msg]` / `stop [msg]` | end the script early |
//!
//! A leading `!` inverts `exec`, the binary, `stdout`, `stderr`, `cmp` and
//! `exists`. Arguments may be single-quoted (`''` is a literal quote) and
//! `$NAME` or `${NAME}` expand from the script environment.
//!
//! With update enabled, a failing `cmp stdout <file>` or `cmp stderr <file>`
//! whose file came from the archive rewrites that archive section instead of
//! failing.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;
use regex::Regex;

use super::{check_file_names, clean_path, list_scripts, normalize, script_name, select, Archive, REPO_DIR};
use crate::error::{Error, Result};

/// Everything one run of a module's scripts needs.
#[derive(Debug, Clone, Copy)]
pub struct RunParams<'a> {
    pub manifest_dir: &'a Path,
    pub workdir_root: &'a Path,
    /// Module path relative to its source control root.
    pub rel_path: &'a Path,
    /// Module path shown in logs.
    pub tester_rel: &'a str,
    pub binary: &'a Path,
    pub version: &'a str,
    pub update: bool,
    pub verbose: bool,
    pub pattern: Option<&'a Regex>,
}

/// Combined verdict and log of one module run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteOutcome {
    pub passed: bool,
    pub log: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Status {
    Passed,
    Skipped(String),
    Failed,
}

/// Work directory of the script called `name`.
pub fn script_workdir(workdir_root: &Path, name: &str) -> PathBuf {
    workdir_root.join(format!("script-{name}"))
}

/// `<tester rel>/<script>/<version>`, without the first element for a
/// module at the discovery root.
fn script_id(tester_rel: &str, name: &str, version: &str) -> String {
    match tester_rel {
        "" | "." => format!("{name}/{version}"),
        rel => format!("{rel}/{name}/{version}"),
    }
}

fn indent(log: &str) -> String {
    log.lines().map(|l| format!("\t{l}\n")).collect()
}

/// Runs the selected scripts in name order.
pub fn run_suite(params: &RunParams<'_>) -> Result<SuiteOutcome> {
    let scripts = list_scripts(params.manifest_dir)?;
    let mut passed = true;
    let mut log = String::new();
    for path in select(&scripts, params.pattern) {
        let name = script_name(path);
        let (status, script_log) = run_script(params, path, &name)?;
        let id = script_id(params.tester_rel, &name, params.version);
        match status {
            Status::Failed => {
                passed = false;
                let _ = writeln!(log, "--- FAIL: {id}");
                log.push_str(&indent(&script_log));
            }
            Status::Skipped(reason) if params.verbose => {
                let _ = writeln!(log, "--- SKIP: {id} ({reason})");
                log.push_str(&indent(&script_log));
            }
            Status::Passed if params.verbose => {
                let _ = writeln!(log, "--- PASS: {id}");
                log.push_str(&indent(&script_log));
            }
            _ => {}
        }
    }
    Ok(SuiteOutcome { passed, log })
}

fn run_script(params: &RunParams<'_>, path: &Path, name: &str) -> Result<(Status, String)> {
    let work = script_workdir(params.workdir_root, name);
    let archive = Archive::load(path)?;
    check_file_names(path, &archive)?;
    for file in &archive.files {
        let dest = work.join(clean_path(&file.name));
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&dest, &file.data)?;
    }
    let tmp = work.join(".tmp");
    fs::create_dir_all(&tmp)?;
    let cwd = work.join(REPO_DIR).join(params.rel_path);
    if !cwd.is_dir() {
        return Err(Error::Script {
            script: name.to_string(),
            message: format!("working copy {} does not exist", cwd.display()),
        });
    }

    let mut env = BTreeMap::new();
    let bin_dir = params.binary.parent().unwrap_or(Path::new("/"));
    let mut search = vec![bin_dir.to_path_buf()];
    if let Some(host) = std::env::var_os("PATH") {
        search.extend(std::env::split_paths(&host));
    }
    let joined = std::env::join_paths(search).map_err(|e| Error::Script {
        script: name.to_string(),
        message: e.to_string(),
    })?;
    env.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
    env.insert("WORK".to_string(), work.to_string_lossy().into_owned());
    env.insert("HOME".to_string(), "/no-home".to_string());
    env.insert("TMPDIR".to_string(), tmp.to_string_lossy().into_owned());

    let binary_name = params
        .binary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut state = State {
        work,
        cwd,
        env,
        binary: params.binary.to_path_buf(),
        binary_name,
        stdout: String::new(),
        stderr: String::new(),
        log: String::new(),
        archive,
        archive_changed: false,
        update: params.update,
    };
    let status = state.run();
    if state.archive_changed {
        debug!("updating {}", path.display());
        state.archive.save(path)?;
    }
    Ok((status, state.log))
}

enum Flow {
    Continue,
    Stop,
    Skip(String),
}

struct State {
    work: PathBuf,
    cwd: PathBuf,
    env: BTreeMap<String, String>,
    binary: PathBuf,
    binary_name: String,
    stdout: String,
    stderr: String,
    log: String,
    archive: Archive,
    archive_changed: bool,
    update: bool,
}

type Step = std::result::Result<Flow, String>;

impl State {
    fn run(&mut self) -> Status {
        let script = self.archive.comment.clone();
        for (i, raw) in script.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let _ = writeln!(self.log, "> {line}");
            let outcome = tokenize(line, &self.env).and_then(|words| self.step(words));
            match outcome {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => return Status::Passed,
                Ok(Flow::Skip(reason)) => return Status::Skipped(reason),
                Err(message) => {
                    let _ = writeln!(self.log, "FAIL: script:{}: {}", i + 1, message);
                    return Status::Failed;
                }
            }
        }
        Status::Passed
    }

    fn step(&mut self, mut words: Vec<String>) -> Step {
        let negate = words.first().is_some_and(|w| w == "!");
        if negate {
            words.remove(0);
        }
        let Some((cmd, args)) = words.split_first() else {
            return Err("missing command".to_string());
        };
        let negatable = matches!(cmd.as_str(), "exec" | "stdout" | "stderr" | "cmp" | "exists")
            || *cmd == self.binary_name;
        if negate && !negatable {
            return Err(format!("unsupported: ! {cmd}"));
        }
        match cmd.as_str() {
            "exec" => {
                let (program, rest) = args
                    .split_first()
                    .ok_or_else(|| "usage: exec program [args...]".to_string())?;
                self.exec(Path::new(program), rest, negate)
            }
            "stdout" => self.match_output(true, args, negate),
            "stderr" => self.match_output(false, args, negate),
            "cmp" => self.cmp(args, negate),
            "exists" => self.exists(args, negate),
            "cd" => self.cd(args),
            "env" => self.set_env(args),
            "skip" => Ok(Flow::Skip(args.join(" "))),
            "stop" => Ok(Flow::Stop),
            _ if *cmd == self.binary_name => {
                let binary = self.binary.clone();
                self.exec(&binary, args, negate)
            }
            other => Err(format!("unknown command {other:?}")),
        }
    }

    fn exec(&mut self, program: &Path, args: &[String], negate: bool) -> Step {
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.cwd)
            .env_clear()
            .envs(&self.env)
            .output()
            .map_err(|e| format!("{}: {}", program.display(), e))?;
        self.stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        self.stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !self.stdout.is_empty() {
            let _ = write!(self.log, "[stdout]\n{}", self.stdout);
            if !self.stdout.ends_with('\n') {
                self.log.push('\n');
            }
        }
        if !self.stderr.is_empty() {
            let _ = write!(self.log, "[stderr]\n{}", self.stderr);
            if !self.stderr.ends_with('\n') {
                self.log.push('\n');
            }
        }
        match (output.status.success(), negate) {
            (true, false) | (false, true) => Ok(Flow::Continue),
            (false, false) => Err(format!("unexpected command failure ({})", output.status)),
            (true, true) => Err("unexpected command success".to_string()),
        }
    }

    fn match_output(&mut self, stdout: bool, args: &[String], negate: bool) -> Step {
        let [pattern] = args else {
            return Err("usage: stdout|stderr pattern".to_string());
        };
        let name = if stdout { "stdout" } else { "stderr" };
        let text = if stdout { &self.stdout } else { &self.stderr };
        let re = Regex::new(&format!("(?m){pattern}")).map_err(|e| e.to_string())?;
        match (re.is_match(text), negate) {
            (true, false) | (false, true) => Ok(Flow::Continue),
            (false, false) => Err(format!("no match for `{pattern}` found in {name}")),
            (true, true) => Err(format!("unexpected match for `{pattern}` found in {name}")),
        }
    }

    fn read(&self, name: &str) -> std::result::Result<String, String> {
        match name {
            "stdout" => Ok(self.stdout.clone()),
            "stderr" => Ok(self.stderr.clone()),
            path => fs::read_to_string(normalize(&self.cwd, Path::new(path)))
                .map_err(|e| format!("{path}: {e}")),
        }
    }

    /// Archive section that `path` was written from, if any.
    fn archive_section(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.work).ok()?;
        let rel = clean_path(&rel.to_string_lossy());
        self.archive
            .files
            .iter()
            .find(|f| clean_path(&f.name) == rel)
            .map(|f| f.name.clone())
    }

    fn cmp(&mut self, args: &[String], negate: bool) -> Step {
        let [got_name, want_name] = args else {
            return Err("usage: cmp a b".to_string());
        };
        let got = self.read(got_name)?;
        let want = self.read(want_name)?;
        if negate {
            return if got == want {
                Err(format!("{got_name} and {want_name} do not differ"))
            } else {
                Ok(Flow::Continue)
            };
        }
        if got == want {
            return Ok(Flow::Continue);
        }
        let want_path = normalize(&self.cwd, Path::new(want_name));
        if self.update && matches!(got_name.as_str(), "stdout" | "stderr") {
            if let Some(section) = self.archive_section(&want_path) {
                self.archive.set_file(&section, &got);
                self.archive_changed = true;
                fs::write(&want_path, &got).map_err(|e| e.to_string())?;
                let _ = writeln!(self.log, "updated {section}");
                return Ok(Flow::Continue);
            }
        }
        Err(format!(
            "{got_name} and {want_name} differ\n--- {want_name}\n{want}+++ {got_name}\n{got}"
        ))
    }

    fn exists(&mut self, args: &[String], negate: bool) -> Step {
        if args.is_empty() {
            return Err("usage: exists path...".to_string());
        }
        for arg in args {
            let present = normalize(&self.cwd, Path::new(arg)).exists();
            if present == negate {
                return Err(if negate {
                    format!("{arg} unexpectedly exists")
                } else {
                    format!("{arg} does not exist")
                });
            }
        }
        Ok(Flow::Continue)
    }

    fn cd(&mut self, args: &[String]) -> Step {
        let [dir] = args else {
            return Err("usage: cd dir".to_string());
        };
        let next = normalize(&self.cwd, Path::new(dir));
        if !next.is_dir() {
            return Err(format!("{dir} is not a directory"));
        }
        self.cwd = next;
        Ok(Flow::Continue)
    }

    fn set_env(&mut self, args: &[String]) -> Step {
        for arg in args {
            match arg.split_once('=') {
                Some((k, v)) => {
                    self.env.insert(k.to_string(), v.to_string());
                }
                None => {
                    let value = self.env.get(arg).cloned().unwrap_or_default();
                    let _ = writeln!(self.log, "{arg}={value}");
                }
            }
        }
        Ok(Flow::Continue)
    }
}

/// Splits a script line into words.
fn tokenize(line: &str, env: &BTreeMap<String, String>) -> std::result::Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            word.push('\'');
                        }
                        Some('\'') => break,
                        Some(ch) => word.push(ch),
                        None => return Err("unterminated quoted argument".to_string()),
                    }
                }
            }
            '$' => {
                in_word = true;
                let mut name = String::new();
                if chars.peek() == Some(&'{') {
                    chars.next();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => name.push(ch),
                            None => return Err("unterminated ${".to_string()),
                        }
                    }
                } else {
                    while let Some(&ch) = chars.peek() {
                        if ch.is_ascii_alphanumeric() || ch == '_' {
                            name.push(ch);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
                if name.is_empty() {
                    word.push('$');
                } else {
                    word.push_str(env.get(&name).map(String::as_str).unwrap_or(""));
                }
            }
            '#' if !in_word => break,
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            other => {
                in_word = true;
                word.push(other);
            }
        }
    }
    if in_word {
        words.push(word);
    }
    Ok(words)
}
