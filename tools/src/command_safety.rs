//! Destructive-command classifier for shell invocations.
//!
//! Heuristic and pure: a command string goes in, a [`SafetyVerdict`] comes out.
//! Detectors run in a fixed order and the first block wins:
//!
//! 1. inline scripts (`bash -c`, `python -c`, `eval`, command substitution)
//! 2. heredoc and here-string bodies
//! 3. destructive version-control operations
//! 4. recursive force deletes outside temporary directories
//! 5. the catastrophic-pattern blacklist
//!
//! Payloads found by 1 and 2 are classified again, up to [`MAX_DEPTH`] levels.
//! The classifier does not evaluate the shell: a command assembled at runtime
//! (`$cmd`, `eval "$(base64 -d …)"`) is not seen through.

use std::path::{Path, PathBuf};

use regex::RegexSet;

use super::ToolError;
use crate::sandbox::normalize_lexically;

/// Nesting bound for re-classified payloads.
pub const MAX_DEPTH: usize = 4;

/// Default command blacklist patterns.
///
/// Each tuple: `(regex_pattern, human_readable_reason)`
///
/// Patterns are case-sensitive on Unix. Use `(?i)` prefix for case-insensitive
/// matching (e.g., Windows commands).
pub const DEFAULT_PATTERNS: &[(&str, &str)] = &[
    // Unix: rm -r / (root filesystem wipe), with or without -f
    (
        r"(?i)\brm\s+(?:(?:--recursive|-[^\s-]*[rR][^\s-]*)(?:\s+(?:--[\w-]+|-[^\s]+))*|(?:--[\w-]+|-[^\s]+)\s+(?:--recursive|-[^\s-]*[rR][^\s-]*)(?:\s+(?:--[\w-]+|-[^\s]+))*)\s+(?:--\s+)?(?:/+|/\*|/\.\*(?:/+)?|/(?:\.{1,2})(?:/\.{1,2})*(?:/+)?|/(?:\.{1,2})(?:/\.{1,2})*/+\*)(?:\s|$|[&|;])",
        "Attempting to delete root filesystem",
    ),
    // Unix: rm -r ~ or $HOME (home directory wipe)
    (
        r"(?i)\brm\s+(?:(?:--recursive|-[^\s-]*[rR][^\s-]*)(?:\s+(?:--[\w-]+|-[^\s]+))*|(?:--[\w-]+|-[^\s]+)\s+(?:--recursive|-[^\s-]*[rR][^\s-]*)(?:\s+(?:--[\w-]+|-[^\s]+))*)\s+(?:--\s+)?(?:~|\$HOME|\$\{HOME\})(?:\s|$|[&|;/])",
        "Attempting to delete home directory",
    ),
    // Fork bomb (bash)
    (r":\(\)\s*\{\s*:\|:&\s*\}\s*;:", "Fork bomb detected"),
    // dd overwriting disk devices
    (
        r"(?i)dd\s+.*of=/dev/(?:sd|hd|nvme|vd|xvd|loop)\w*",
        "Attempting to overwrite disk device",
    ),
    // mkfs on disk devices (formatting)
    (
        r"(?i)mkfs(?:\.\w+)?\s+/dev/(?:sd|hd|nvme|vd|xvd)\w*",
        "Attempting to format disk device",
    ),
    // chmod -R on root
    (
        r"(?i)chmod\s+-R\s+\d+\s+/(?:\s|$|[&|;])",
        "Recursive permission change on root filesystem",
    ),
    // Windows: Remove-Item with path first, then both -Recurse and -Force
    (
        r"(?i)Remove-Item\s+(?:C:\\|~)\s+-(?:Recurse|Force)\s+-(?:Recurse|Force)",
        "Attempting to delete system drive or home directory",
    ),
    // Windows: Remove-Item with flags first, then C:\ or ~
    (
        r"(?i)Remove-Item\s+-(?:Recurse|Force)\s+-(?:Recurse|Force)\s+(?:C:\\|~)(?:\s|$)",
        "Attempting to delete system drive or home directory",
    ),
    // Windows: rd (rmdir) with /s /q on drive root
    (
        r"(?i)rd\s+/[sq]\s+/[sq]\s+[A-Z]:\\(?:\s|$)",
        "Attempting to recursively delete drive via rd",
    ),
];

const SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh", "fish"];

/// Prefix commands that run their arguments as a command.
const WRAPPERS: &[&str] = &[
    "sudo", "doas", "env", "command", "builtin", "nohup", "time", "nice", "exec", "timeout",
    "xargs",
];

/// Wrapper flags that consume the following word.
const WRAPPER_VALUE_FLAGS: &[&str] = &["-u", "-g"];

/// Git global options that consume the following word.
const GIT_VALUE_OPTIONS: &[&str] = &["-C", "-c", "--git-dir", "--work-tree", "--namespace"];

/// Fixed temp roots; `$TMPDIR` and the platform temp dir are added at construction.
const TEMP_ROOTS: &[&str] = &["/tmp", "/var/tmp", "/private/tmp", "/private/var/tmp"];

/// Which stage produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detector {
    None,
    InlineScript,
    Heredoc,
    VersionControl,
    RecursiveDelete,
    Blacklist,
    NestingLimit,
}

impl Detector {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::InlineScript => "inline_script",
            Self::Heredoc => "heredoc",
            Self::VersionControl => "version_control",
            Self::RecursiveDelete => "recursive_delete",
            Self::Blacklist => "blacklist",
            Self::NestingLimit => "nesting_limit",
        }
    }
}

/// Outcome of classifying one command string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyVerdict {
    /// The command as submitted.
    pub input: String,
    pub blocked: bool,
    pub reason: String,
    /// Remediation for the model, when there is a safer alternative.
    pub tip: Option<String>,
    pub detector: Detector,
}

impl SafetyVerdict {
    fn allow(input: &str) -> Self {
        Self {
            input: input.to_string(),
            blocked: false,
            reason: "no destructive pattern found".to_string(),
            tip: None,
            detector: Detector::None,
        }
    }

    fn block(input: &str, finding: Finding) -> Self {
        Self {
            input: input.to_string(),
            blocked: true,
            reason: finding.reason,
            tip: finding.tip,
            detector: finding.detector,
        }
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }
}

impl std::fmt::Display for SafetyVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.blocked {
            return write!(f, "Command allowed");
        }
        write!(
            f,
            "Command blocked: {} (command: {})",
            self.reason,
            truncate_command(&self.input, 100)
        )?;
        if let Some(tip) = &self.tip {
            write!(f, ". Tip: {tip}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Finding {
    detector: Detector,
    reason: String,
    tip: Option<String>,
}

impl Finding {
    fn new(detector: Detector, reason: impl Into<String>, tip: Option<&str>) -> Self {
        Self {
            detector,
            reason: reason.into(),
            tip: tip.map(str::to_string),
        }
    }

    /// Attribute a finding from a re-classified payload to the stage that found the payload.
    fn nested(self, detector: Detector, context: &str) -> Self {
        if self.detector == Detector::NestingLimit {
            return self;
        }
        Self {
            detector,
            reason: format!("{} (inside {context})", self.reason),
            tip: self.tip,
        }
    }
}

/// Command safety classifier.
///
/// Construction captures the temp-directory allow-list and compiles the
/// blacklist; [`CommandSafetyClassifier::classify`] is pure afterwards.
#[derive(Debug, Clone)]
pub struct CommandSafetyClassifier {
    regex_set: RegexSet,
    /// Human-readable reasons for each pattern (parallel to `regex_set` patterns).
    reasons: Vec<String>,
    temp_roots: Vec<PathBuf>,
    tmpdir: Option<String>,
}

impl CommandSafetyClassifier {
    /// Build a classifier with the default blacklist plus `extra_patterns`.
    pub fn new(extra_patterns: &[(String, String)]) -> Result<Self, ToolError> {
        let mut reasons = Vec::with_capacity(DEFAULT_PATTERNS.len() + extra_patterns.len());
        let mut pattern_strs = Vec::with_capacity(reasons.capacity());

        for (pattern, reason) in DEFAULT_PATTERNS {
            pattern_strs.push((*pattern).to_string());
            reasons.push((*reason).to_string());
        }
        for (pattern, reason) in extra_patterns {
            pattern_strs.push(pattern.clone());
            reasons.push(reason.clone());
        }

        let regex_set = RegexSet::new(&pattern_strs).map_err(|e| ToolError::BadArgs {
            message: format!("Failed to compile blacklist patterns: {e}"),
        })?;

        let tmpdir = std::env::var("TMPDIR").ok().filter(|t| !t.is_empty());
        Ok(Self {
            regex_set,
            reasons,
            temp_roots: temp_roots(tmpdir.as_deref()),
            tmpdir,
        })
    }

    pub fn with_defaults() -> Result<Self, ToolError> {
        Self::new(&[])
    }

    /// Classify a shell command string.
    #[must_use]
    pub fn classify(&self, command: &str) -> SafetyVerdict {
        match self.scan(command, 0) {
            Some(finding) => SafetyVerdict::block(command, finding),
            None => SafetyVerdict::allow(command),
        }
    }

    fn scan(&self, text: &str, depth: usize) -> Option<Finding> {
        if depth > MAX_DEPTH {
            return Some(Finding::new(
                Detector::NestingLimit,
                format!("command nesting deeper than {MAX_DEPTH} levels"),
                Some("Run the inner command directly instead of wrapping it"),
            ));
        }

        let stripped = extract_heredocs(text);
        let parsed: Vec<Vec<String>> = split_segments(&stripped.text)
            .iter()
            .map(|segment| tokenize(segment))
            .collect();

        for tokens in &parsed {
            if let Some(finding) = self.scan_inline(command_words(tokens), depth) {
                return Some(finding);
            }
        }
        for inner in command_substitutions(&stripped.text) {
            if let Some(finding) = self.scan(&inner, depth + 1) {
                return Some(finding.nested(Detector::InlineScript, "command substitution"));
            }
        }
        for body in &stripped.bodies {
            if let Some(finding) = self.scan(body, depth + 1) {
                return Some(finding.nested(Detector::Heredoc, "heredoc body"));
            }
        }
        for tokens in &parsed {
            let words = command_words(tokens);
            if let Some(finding) = check_git(words) {
                return Some(finding);
            }
            if let Some(finding) = self.check_rm(words) {
                return Some(finding);
            }
        }
        if let Some(idx) = self.regex_set.matches(&stripped.text).iter().next() {
            return Some(Finding::new(
                Detector::Blacklist,
                self.reasons[idx].clone(),
                Some("This command is never run by the agent; do it by hand if it is intended"),
            ));
        }
        None
    }

    fn scan_inline(&self, words: &[String], depth: usize) -> Option<Finding> {
        let (program, args) = words.split_first()?;
        let program = program_name(program);

        if program == "eval" {
            let payload = args.join(" ");
            return self
                .scan(&payload, depth + 1)
                .map(|f| f.nested(Detector::InlineScript, "eval"));
        }
        if SHELLS.contains(&program) {
            let payload = shell_payload(args)?;
            return self
                .scan(payload, depth + 1)
                .map(|f| f.nested(Detector::InlineScript, &format!("{program} -c")));
        }
        let flags = interpreter_eval_flags(program)?;
        let code = args
            .iter()
            .position(|a| flags.contains(&a.as_str()))
            .and_then(|i| args.get(i + 1))?;
        // Interpreter code is not shell; the commands it shells out to live in string literals.
        string_literals(code).iter().find_map(|literal| {
            self.scan(literal, depth + 1)
                .map(|f| f.nested(Detector::InlineScript, &format!("{program} inline code")))
        })
    }

    fn check_rm(&self, words: &[String]) -> Option<Finding> {
        let (program, args) = words.split_first()?;
        if program_name(program) != "rm" {
            return None;
        }

        let mut recursive = false;
        let mut force = false;
        let mut end_of_options = false;
        let mut targets = Vec::new();
        for arg in args {
            if end_of_options {
                targets.push(arg.as_str());
            } else if arg == "--" {
                end_of_options = true;
            } else if let Some(long) = arg.strip_prefix("--") {
                recursive |= long == "recursive";
                force |= long == "force";
            } else if arg.len() > 1 && arg.starts_with('-') {
                recursive |= arg.chars().any(|c| matches!(c, 'r' | 'R'));
                force |= arg.contains('f');
            } else {
                targets.push(arg.as_str());
            }
        }
        if !(recursive && force) {
            return None;
        }

        let outside = targets.iter().find(|t| !self.is_temp_confined(t))?;
        Some(Finding::new(
            Detector::RecursiveDelete,
            format!("recursive force delete outside temporary directories: {outside}"),
            Some("Remove specific files without -rf, or confine the delete to a temp directory"),
        ))
    }

    /// Whether an `rm` target provably stays inside a temp root after `..` folding.
    fn is_temp_confined(&self, target: &str) -> bool {
        let Some(expanded) = self.expand_tmpdir(target) else {
            return false;
        };
        if expanded.contains('$') || expanded.starts_with('~') {
            return false;
        }
        let path = Path::new(&expanded);
        if !path.is_absolute() {
            return false;
        }
        let normalized = normalize_lexically(path);
        self.temp_roots.iter().any(|root| normalized.starts_with(root))
    }

    fn expand_tmpdir(&self, target: &str) -> Option<String> {
        let rest = target.strip_prefix("${TMPDIR}").or_else(|| {
            target
                .strip_prefix("$TMPDIR")
                .filter(|rest| rest.is_empty() || rest.starts_with('/'))
        });
        match rest {
            Some(rest) => self.tmpdir.as_ref().map(|tmp| format!("{tmp}{rest}")),
            None => Some(target.to_string()),
        }
    }
}

fn temp_roots(tmpdir: Option<&str>) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = TEMP_ROOTS.iter().map(PathBuf::from).collect();
    if let Some(tmp) = tmpdir {
        roots.push(PathBuf::from(tmp));
    }
    roots.push(std::env::temp_dir());

    let mut normalized: Vec<PathBuf> = Vec::with_capacity(roots.len());
    for root in roots {
        // Never let a misconfigured TMPDIR=/ turn every path into a temp path.
        if !root.is_absolute() || root.components().count() < 2 {
            continue;
        }
        let root = normalize_lexically(&root);
        if !normalized.contains(&root) {
            normalized.push(root);
        }
    }
    normalized
}

fn check_git(words: &[String]) -> Option<Finding> {
    let (program, rest) = words.split_first()?;
    if program_name(program) != "git" {
        return None;
    }
    let mut i = 0;
    while let Some(arg) = rest.get(i) {
        if !arg.starts_with('-') {
            break;
        }
        i += if GIT_VALUE_OPTIONS.contains(&arg.as_str()) {
            2
        } else {
            1
        };
    }
    let (subcommand, args) = rest.get(i..)?.split_first()?;
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let block = |reason: &str, tip: &str| {
        Some(Finding::new(Detector::VersionControl, reason, Some(tip)))
    };

    match subcommand.as_str() {
        "reset" if has_flag(&args, Some("--hard"), None) => block(
            "git reset --hard discards uncommitted changes",
            "Use `git stash` first, or `git reset --soft`/`--mixed` to keep the changes",
        ),
        "checkout" if has_flag(&args, Some("--force"), Some('f')) => block(
            "git checkout --force discards local modifications",
            "Commit or `git stash` your changes before switching",
        ),
        "checkout"
            if args.contains(&".")
                || args
                    .iter()
                    .position(|a| *a == "--")
                    .is_some_and(|p| p + 1 < args.len()) =>
        {
            block(
                "git checkout of paths overwrites working-tree changes",
                "Inspect with `git diff` and `git stash` the changes before restoring files",
            )
        }
        "switch" if has_flag(&args, Some("--discard-changes"), None)
            || has_flag(&args, Some("--force"), Some('f')) =>
        {
            block(
                "git switch --discard-changes throws away local modifications",
                "Commit or `git stash` your changes before switching",
            )
        }
        "restore"
            if !has_flag(&args, Some("--staged"), Some('S'))
                || has_flag(&args, Some("--worktree"), Some('W')) =>
        {
            block(
                "git restore overwrites working-tree changes",
                "Use `git restore --staged <path>` to unstage without touching the file",
            )
        }
        "clean"
            if has_flag(&args, Some("--force"), Some('f'))
                && !has_flag(&args, Some("--dry-run"), Some('n')) =>
        {
            block(
                "git clean --force deletes untracked files permanently",
                "Preview with `git clean -n` first",
            )
        }
        "push"
            if has_flag(&args, Some("--force"), Some('f'))
                || (args.iter().any(|a| a.len() > 1 && a.starts_with('+'))
                    && !args.iter().any(|a| a.starts_with("--force-with-lease"))) =>
        {
            block(
                "git push --force can overwrite remote history",
                "Use `git push --force-with-lease` instead",
            )
        }
        "branch"
            if has_flag(&args, None, Some('D'))
                || (has_flag(&args, Some("--delete"), Some('d'))
                    && has_flag(&args, Some("--force"), Some('f'))) =>
        {
            block(
                "git branch -D deletes a branch even if it is unmerged",
                "Use `git branch -d`, which refuses to delete unmerged work",
            )
        }
        "stash" if matches!(args.first(), Some(&("drop" | "clear"))) => block(
            "git stash drop/clear permanently discards stashed changes",
            "Apply the stash with `git stash pop`, or inspect it with `git stash show -p`",
        ),
        _ => None,
    }
}

/// Whether `args` contains `long` exactly, or a short-option cluster containing `short`.
fn has_flag(args: &[&str], long: Option<&str>, short: Option<char>) -> bool {
    args.iter().any(|arg| {
        if long.is_some_and(|l| *arg == l) {
            return true;
        }
        match short {
            Some(c) if arg.len() > 1 && arg.starts_with('-') && !arg.starts_with("--") => {
                arg[1..].contains(c)
            }
            _ => false,
        }
    })
}

/// The `-c` payload of a shell invocation, if any.
fn shell_payload(args: &[String]) -> Option<&str> {
    let mut i = 0;
    while let Some(arg) = args.get(i) {
        if arg == "-o" || arg == "+o" {
            i += 2;
            continue;
        }
        if arg == "--" || !arg.starts_with(['-', '+']) {
            return None;
        }
        if !arg.starts_with("--") && arg[1..].contains('c') {
            return args.get(i + 1).map(String::as_str);
        }
        i += 1;
    }
    None
}

fn interpreter_eval_flags(program: &str) -> Option<&'static [&'static str]> {
    match program {
        p if p.starts_with("python") => Some(&["-c"]),
        "node" | "nodejs" => Some(&["-e", "--eval", "-p", "--print"]),
        "ruby" => Some(&["-e"]),
        "perl" => Some(&["-e", "-E"]),
        "php" => Some(&["-r"]),
        _ => None,
    }
}

fn program_name(word: &str) -> &str {
    word.rsplit('/').next().unwrap_or(word)
}

fn is_env_assignment(word: &str) -> bool {
    let Some((name, _)) = word.split_once('=') else {
        return false;
    };
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Skip leading assignments and wrapper commands down to the real program.
fn command_words(tokens: &[String]) -> &[String] {
    let mut i = 0;
    let mut in_wrapper = false;
    while let Some(token) = tokens.get(i) {
        let tok = token.as_str();
        if is_env_assignment(tok) || matches!(tok, "{" | "!" | "then" | "do" | "else") {
            i += 1;
        } else if in_wrapper && WRAPPER_VALUE_FLAGS.contains(&tok) {
            i += 2;
        } else if in_wrapper && (tok.starts_with('-') || tok.starts_with(|c: char| c.is_ascii_digit()))
        {
            i += 1;
        } else if WRAPPERS.contains(&program_name(tok)) {
            in_wrapper = true;
            i += 1;
        } else {
            break;
        }
    }
    tokens.get(i..).unwrap_or_default()
}

/// Split on unquoted command separators: `;`, `&`, `|`, newline, `(`, `)`, backtick.
fn split_segments(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == '\\' && q == '"' {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                '\\' => {
                    current.push(c);
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                ';' | '&' | '|' | '\n' | '(' | ')' | '`' => {
                    if !current.trim().is_empty() {
                        segments.push(std::mem::take(&mut current));
                    }
                    current.clear();
                }
                _ => current.push(c),
            },
        }
    }
    if !current.trim().is_empty() {
        segments.push(current);
    }
    segments
}

/// Split one segment into words, removing quotes and backslash escapes.
fn tokenize(segment: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = segment.chars().peekable();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') => match chars.peek() {
                Some(&next @ ('"' | '\\' | '$' | '`')) => {
                    current.push(next);
                    chars.next();
                }
                _ => current.push('\\'),
            },
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_token = true;
            }
            (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    in_token = true;
                }
            }
            (None, c) if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

/// Bodies of `$( … )` and `` ` … ` `` outside single quotes.
fn command_substitutions(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut found = Vec::new();
    let mut in_single = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_single {
            in_single = c != '\'';
            i += 1;
            continue;
        }
        match c {
            '\'' => in_single = true,
            '\\' => i += 1,
            '$' if chars.get(i + 1) == Some(&'(') => {
                let start = i + 2;
                let mut depth = 1usize;
                let mut j = start;
                while j < chars.len() && depth > 0 {
                    match chars[j] {
                        '(' => depth += 1,
                        ')' => depth -= 1,
                        _ => {}
                    }
                    j += 1;
                }
                let end = if depth == 0 { j - 1 } else { j };
                found.push(chars[start..end].iter().collect());
                i = j;
                continue;
            }
            '`' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&c| c == '`')
                    .map_or(chars.len(), |p| start + p);
                found.push(chars[start..end].iter().collect());
                i = end + 1;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    found
}

/// Contents of single- and double-quoted literals in interpreter code.
fn string_literals(code: &str) -> Vec<String> {
    let mut literals = Vec::new();
    let mut chars = code.chars();
    while let Some(c) = chars.next() {
        if c != '\'' && c != '"' {
            continue;
        }
        let mut literal = String::new();
        while let Some(inner) = chars.next() {
            if inner == '\\' {
                if let Some(next) = chars.next() {
                    literal.push(next);
                }
            } else if inner == c {
                break;
            } else {
                literal.push(inner);
            }
        }
        if !literal.trim().is_empty() {
            literals.push(literal);
        }
    }
    literals
}

struct Stripped {
    /// Input with heredoc bodies and here-string words removed.
    text: String,
    bodies: Vec<String>,
}

/// Pull heredoc bodies (`<<DELIM`, `<<-DELIM`, quoted delimiters) and here-string
/// words (`<<<word`) out of `input`.
fn extract_heredocs(input: &str) -> Stripped {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut bodies = Vec::new();
    let mut pending: Vec<(String, bool)> = Vec::new();
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' && q == '"' {
                if let Some(&next) = chars.get(i + 1) {
                    out.push(next);
                }
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
                i += 1;
            }
            '\\' => {
                out.push(c);
                if let Some(&next) = chars.get(i + 1) {
                    out.push(next);
                }
                i += 2;
            }
            '<' if starts_with(&chars, i, "<<<") => {
                let (word, next) = read_word(&chars, skip_blanks(&chars, i + 3));
                if !word.is_empty() {
                    bodies.push(word);
                }
                out.push(' ');
                i = next;
            }
            '<' if starts_with(&chars, i, "<<") => {
                let mut j = i + 2;
                let strip_tabs = chars.get(j) == Some(&'-');
                if strip_tabs {
                    j += 1;
                }
                let (delimiter, next) = read_word(&chars, skip_blanks(&chars, j));
                if delimiter.is_empty() {
                    out.push_str("<<");
                    i += 2;
                } else {
                    pending.push((delimiter, strip_tabs));
                    out.push(' ');
                    i = next;
                }
            }
            '\n' if !pending.is_empty() => {
                out.push('\n');
                i += 1;
                for (delimiter, strip_tabs) in pending.drain(..) {
                    let (body, next) = read_heredoc_body(&chars, i, &delimiter, strip_tabs);
                    bodies.push(body);
                    i = next;
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Stripped { text: out, bodies }
}

fn starts_with(chars: &[char], at: usize, needle: &str) -> bool {
    let mut idx = at;
    for expected in needle.chars() {
        if chars.get(idx) != Some(&expected) {
            return false;
        }
        idx += 1;
    }
    true
}

fn skip_blanks(chars: &[char], mut at: usize) -> usize {
    while chars.get(at).is_some_and(|c| *c == ' ' || *c == '\t') {
        at += 1;
    }
    at
}

/// Read one shell word starting at `at`; returns the unquoted word and the index after it.
fn read_word(chars: &[char], at: usize) -> (String, usize) {
    let mut word = String::new();
    let mut i = at;
    match chars.get(i) {
        Some(&q @ ('\'' | '"')) => {
            i += 1;
            while let Some(&c) = chars.get(i) {
                i += 1;
                if c == q {
                    break;
                }
                if c == '\\' && q == '"' {
                    if let Some(&next) = chars.get(i) {
                        word.push(next);
                        i += 1;
                    }
                    continue;
                }
                word.push(c);
            }
        }
        _ => {
            while let Some(&c) = chars.get(i) {
                if c.is_whitespace() || matches!(c, ';' | '|' | '&' | '<' | '>' | '(' | ')') {
                    break;
                }
                i += 1;
                if c == '\\' {
                    if let Some(&next) = chars.get(i) {
                        word.push(next);
                        i += 1;
                    }
                    continue;
                }
                if c != '\'' && c != '"' {
                    word.push(c);
                }
            }
        }
    }
    (word, i)
}

/// Collect heredoc lines from `start` up to the delimiter line.
///
/// An unterminated heredoc runs to the end of the input.
fn read_heredoc_body(chars: &[char], start: usize, delimiter: &str, strip_tabs: bool) -> (String, usize) {
    let mut lines: Vec<String> = Vec::new();
    let mut i = start;
    while i < chars.len() {
        let end = chars[i..]
            .iter()
            .position(|&c| c == '\n')
            .map_or(chars.len(), |p| i + p);
        let line: String = chars[i..end].iter().collect();
        let candidate = if strip_tabs {
            line.trim_start_matches('\t')
        } else {
            line.as_str()
        };
        if candidate == delimiter {
            return (lines.join("\n"), (end + 1).min(chars.len()));
        }
        lines.push(line);
        i = end + 1;
    }
    (lines.join("\n"), chars.len())
}

/// Truncate command for error messages (avoid giant output).
fn truncate_command(cmd: &str, max_len: usize) -> String {
    if cmd.len() <= max_len {
        cmd.to_string()
    } else {
        let end = warden_types::floor_char_boundary(cmd, max_len);
        format!("{}...", &cmd[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> CommandSafetyClassifier {
        CommandSafetyClassifier::with_defaults().unwrap()
    }

    fn blocked_by(cmd: &str) -> Detector {
        let verdict = classifier().classify(cmd);
        assert!(verdict.blocked, "expected block: {cmd}");
        verdict.detector
    }

    fn assert_allowed(cmd: &str) {
        let verdict = classifier().classify(cmd);
        assert!(!verdict.blocked, "expected allow: {cmd} ({})", verdict.reason);
    }

    #[test]
    fn ordinary_commands_are_allowed() {
        for cmd in [
            "ls -la",
            "cargo test --workspace",
            "git status && git diff --stat",
            "grep -rn 'TODO' src | head -20",
            "rm build.log",
            "rm -r target/debug/incremental",
            "echo \"rm -rf /\"",
        ] {
            assert_allowed(cmd);
        }
    }

    #[test]
    fn git_safe_variants_are_allowed() {
        for cmd in [
            "git reset --soft HEAD~1",
            "git reset HEAD file.txt",
            "git push --force-with-lease origin feature",
            "git push -u origin main",
            "git restore --staged src/lib.rs",
            "git clean -n",
            "git clean -fdn",
            "git branch -d merged-feature",
            "git checkout -b new-feature",
            "git checkout main",
            "git stash",
            "git stash pop",
            "git -C repo --no-pager log --oneline",
        ] {
            assert_allowed(cmd);
        }
    }

    #[test]
    fn git_destructive_variants_are_blocked() {
        for cmd in [
            "git reset --hard",
            "git reset --hard origin/main",
            "git checkout -f main",
            "git checkout -- src/lib.rs",
            "git checkout .",
            "git restore src/lib.rs",
            "git restore --staged --worktree src/lib.rs",
            "git clean -fd",
            "git clean --force",
            "git push --force origin main",
            "git push -f",
            "git push origin +main",
            "git push --force --force-with-lease origin main",
            "git branch -D feature",
            "git branch --delete --force feature",
            "git stash drop",
            "git stash clear",
            "git -C /repo reset --hard",
            "git -c core.pager=cat reset --hard",
            "/usr/bin/git reset --hard",
            "sudo -u deploy git reset --hard",
        ] {
            assert_eq!(blocked_by(cmd), Detector::VersionControl, "{cmd}");
        }
    }

    #[test]
    fn blocked_verdict_carries_tip() {
        let verdict = classifier().classify("git push --force origin main");
        assert!(verdict.tip.unwrap().contains("--force-with-lease"));
    }

    #[test]
    fn rm_rf_in_temp_is_allowed() {
        for cmd in [
            "rm -rf /tmp/build-cache",
            "rm -rf /tmp",
            "rm -fr /var/tmp/x /tmp/y",
            "rm -rf -- /tmp/dir",
            "rm --recursive --force /tmp/a",
            "rm -rf",
        ] {
            assert_allowed(cmd);
        }
    }

    #[test]
    fn rm_rf_outside_temp_is_blocked() {
        for cmd in [
            "rm -rf /",
            "rm -rf ~",
            "rm -rf node_modules",
            "rm -rf /tmp/../etc",
            "rm -rf /tmp/ok /home/user",
            "rm -Rf $HOME/project",
            "rm -rf /tmpfoo",
            "sudo rm -rf /var/lib",
        ] {
            assert_eq!(blocked_by(cmd), Detector::RecursiveDelete, "{cmd}");
        }
    }

    #[test]
    fn rm_recursive_root_without_force_hits_blacklist() {
        assert_eq!(blocked_by("rm -r /"), Detector::Blacklist);
    }

    #[test]
    fn blacklist_patterns_are_blocked() {
        for cmd in [
            ":(){ :|:& };:",
            "dd if=/dev/zero of=/dev/sda bs=1M",
            "mkfs.ext4 /dev/sdb1",
            "chmod -R 777 /",
            "Remove-Item C:\\ -Recurse -Force",
        ] {
            assert!(classifier().classify(cmd).blocked, "{cmd}");
        }
    }

    #[test]
    fn extra_patterns_are_applied() {
        let classifier = CommandSafetyClassifier::new(&[(
            r"\bshutdown\b".to_string(),
            "Shutting down the host".to_string(),
        )])
        .unwrap();
        let verdict = classifier.classify("sudo shutdown -h now");
        assert!(verdict.blocked);
        assert_eq!(verdict.reason, "Shutting down the host");
    }

    #[test]
    fn invalid_extra_pattern_fails() {
        assert!(CommandSafetyClassifier::new(&[("(".to_string(), "x".to_string())]).is_err());
    }

    #[test]
    fn inline_shell_payload_is_classified() {
        for cmd in [
            "bash -c \"git push --force origin main\"",
            "sh -c 'rm -rf ~'",
            "bash -lc 'git reset --hard'",
            "zsh -o errexit -c 'git clean -fd'",
            "eval git reset --hard",
            "xargs sh -c 'rm -rf /'",
        ] {
            assert_eq!(blocked_by(cmd), Detector::InlineScript, "{cmd}");
        }
        assert_allowed("bash -c 'cargo build'");
        assert_allowed("bash scripts/release.sh");
    }

    #[test]
    fn interpreter_string_literals_are_classified() {
        assert_eq!(
            blocked_by("python3 -c \"import os; os.system('rm -rf ~')\""),
            Detector::InlineScript
        );
        assert_eq!(
            blocked_by("node -e \"require('child_process').execSync('git reset --hard')\""),
            Detector::InlineScript
        );
        assert_allowed("python3 -c \"print('hello')\"");
    }

    #[test]
    fn command_substitution_is_classified() {
        assert_eq!(blocked_by("echo \"$(git reset --hard)\""), Detector::InlineScript);
        assert_eq!(blocked_by("echo `rm -rf ~`"), Detector::InlineScript);
    }

    #[test]
    fn heredoc_body_is_classified() {
        for cmd in [
            "bash <<EOF\ngit reset --hard\nEOF",
            "sh <<'EOF'\nrm -rf ~\nEOF",
            "bash <<-END\n\tgit push -f\n\tEND",
            "bash <<< 'git reset --hard'",
            "bash <<<\"rm -rf /\"",
        ] {
            assert_eq!(blocked_by(cmd), Detector::Heredoc, "{cmd}");
        }
        assert_allowed("cat <<EOF > notes.txt\nhello\nEOF\necho done");
    }

    #[test]
    fn heredoc_body_does_not_leak_into_outer_command() {
        let stripped = extract_heredocs("cat <<EOF\nline one\nEOF\nls");
        assert_eq!(stripped.bodies, vec!["line one".to_string()]);
        assert!(stripped.text.contains("ls"));
        assert!(!stripped.text.contains("line one"));
    }

    #[test]
    fn deep_nesting_is_blocked() {
        let cmd = "bash -c \"bash -c 'eval eval eval eval ls'\"";
        assert_eq!(blocked_by(cmd), Detector::NestingLimit);
    }

    #[test]
    fn known_false_positive_heredoc_documentation() {
        // Writing documentation that mentions a destructive command still blocks:
        // heredoc bodies are classified regardless of the consuming program.
        assert!(
            classifier()
                .classify("cat <<EOF > RECOVERY.md\ngit reset --hard origin/main\nEOF")
                .blocked
        );
    }

    #[test]
    fn known_false_negative_runtime_assembly() {
        // Commands built at runtime are not evaluated.
        assert!(!classifier().classify("c=reset; git $c --hard").blocked);
    }

    #[test]
    fn display_includes_reason_and_tip() {
        let verdict = classifier().classify("git reset --hard");
        let text = verdict.to_string();
        assert!(text.starts_with("Command blocked: git reset --hard"));
        assert!(text.contains("Tip:"));
        assert_eq!(classifier().classify("ls").to_string(), "Command allowed");
    }

    #[test]
    fn verdict_keeps_original_input() {
        let input = "bash -c 'git reset --hard'";
        assert_eq!(classifier().classify(input).input, input);
    }

    #[test]
    fn truncate_command_respects_char_boundaries() {
        let long = "é".repeat(80);
        let truncated = truncate_command(&long, 100);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 103);
    }

    #[test]
    fn tokenizer_handles_quotes_and_escapes() {
        assert_eq!(
            tokenize(r#"echo "a b" 'c d' e\ f"#),
            vec!["echo", "a b", "c d", "e f"]
        );
    }

    #[test]
    fn segments_split_on_unquoted_operators_only() {
        let segments = split_segments("a && b; c | d 'e; f'");
        let trimmed: Vec<&str> = segments.iter().map(|s| s.trim()).collect();
        assert_eq!(trimmed, vec!["a", "b", "c", "d 'e; f'"]);
    }
}
