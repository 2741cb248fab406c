//! Dynamic tool manifests: what a script prints in describe mode.
//!
//! Two encodings are accepted. JSON, when the output starts with `{`:
//!
//! ```json
//! {"name": "deploy", "description": "Deploy", "parameters": [
//!   {"name": "target", "type": "string", "required": true}
//! ]}
//! ```
//!
//! Otherwise the line format:
//!
//! ```text
//! name: deploy
//! description: Deploy the current branch
//! param: target string required "Environment to deploy to"
//! param: dry_run boolean optional default=false
//! interaction: interactive
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use warden_types::InteractionClass;

use crate::executor::{EnvMode, ProcessSpec};
use crate::is_valid_tool_name;

/// Where a script was found. Project tools override user tools of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOrigin {
    User,
    Project,
}

impl ToolOrigin {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Project => "project",
        }
    }
}

/// Declared parameter type. Unknown types are kept so they can be reported, then dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    Unsupported(String),
}

impl ParamKind {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "string" | "str" => Self::String,
            "number" | "int" | "integer" | "float" => Self::Number,
            "boolean" | "bool" => Self::Boolean,
            other => Self::Unsupported(other.to_string()),
        }
    }

    /// JSON Schema `type` keyword.
    #[must_use]
    pub fn json_type(&self) -> Option<&'static str> {
        match self {
            Self::String => Some("string"),
            Self::Number => Some("number"),
            Self::Boolean => Some("boolean"),
            Self::Unsupported(_) => None,
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Unsupported(_) => false,
        }
    }

    /// Parse a line-format `default=` literal for this kind.
    fn parse_default(&self, raw: &str) -> Option<Value> {
        match self {
            Self::String => Some(Value::String(raw.to_string())),
            Self::Number => raw
                .parse::<i64>()
                .map(Value::from)
                .ok()
                .or_else(|| {
                    raw.parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map(Value::Number)
                }),
            Self::Boolean => match raw {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            Self::Unsupported(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DynamicParam {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

/// How a script is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launcher {
    /// Executable file; its shebang decides.
    Direct,
    Interpreter {
        program: String,
        args: Vec<String>,
    },
}

impl Launcher {
    /// Pick a launcher for `path`, or `None` if it is not a runnable script.
    #[must_use]
    pub fn for_script(path: &Path) -> Option<Self> {
        if is_executable(path) {
            return Some(Self::Direct);
        }
        let interpreter = |program: &str, args: &[&str]| Self::Interpreter {
            program: program.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
        };
        match path.extension()?.to_str()? {
            "sh" => Some(interpreter("sh", &[])),
            "py" => Some(interpreter("python3", &[])),
            "js" | "mjs" => Some(interpreter("node", &[])),
            "ts" => Some(interpreter("deno", &["run", "--no-prompt"])),
            _ => None,
        }
    }

    #[must_use]
    pub fn spec(&self, script: &Path) -> ProcessSpec {
        match self {
            Self::Direct => ProcessSpec::new(script, Vec::new(), EnvMode::Sanitized),
            Self::Interpreter { program, args } => {
                let mut args = args.clone();
                args.push(script.display().to_string());
                ProcessSpec::new(program.as_str(), args, EnvMode::Sanitized)
            }
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}

/// A discovered, parsed dynamic tool.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicToolManifest {
    pub name: String,
    pub description: String,
    pub parameters: Vec<DynamicParam>,
    pub script_path: PathBuf,
    pub origin: ToolOrigin,
    pub interaction: InteractionClass,
    pub launcher: Launcher,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("describe output is empty")]
    Empty,
    #[error("invalid JSON manifest: {0}")]
    Json(String),
    #[error("manifest is missing `{0}`")]
    MissingField(&'static str),
    #[error("invalid tool name '{0}'")]
    InvalidName(String),
    #[error("line {line}: {message}")]
    InvalidLine { line: usize, message: String },
    #[error("duplicate parameter '{0}'")]
    DuplicateParam(String),
}

#[derive(Deserialize)]
struct RawManifest {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    parameters: Vec<RawParam>,
    interaction: Option<InteractionClass>,
}

#[derive(Deserialize)]
struct RawParam {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    required: bool,
    default: Option<Value>,
    description: Option<String>,
}

/// Parse describe-mode stdout into a manifest for `script_path`.
pub fn parse_manifest(
    output: &str,
    script_path: &Path,
    origin: ToolOrigin,
    launcher: Launcher,
) -> Result<DynamicToolManifest, ManifestError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(ManifestError::Empty);
    }
    let raw = if trimmed.starts_with('{') {
        serde_json::from_str::<RawManifest>(trimmed).map_err(|e| ManifestError::Json(e.to_string()))?
    } else {
        parse_line_format(trimmed)?
    };

    let name = raw
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or(ManifestError::MissingField("name"))?;
    if !is_valid_tool_name(&name) {
        return Err(ManifestError::InvalidName(name));
    }
    let description = raw
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or(ManifestError::MissingField("description"))?;

    let mut parameters: Vec<DynamicParam> = Vec::with_capacity(raw.parameters.len());
    for param in raw.parameters {
        if parameters.iter().any(|p| p.name == param.name) {
            return Err(ManifestError::DuplicateParam(param.name));
        }
        let kind = ParamKind::parse(&param.kind);
        let default = param.default.filter(|value| {
            let ok = kind.accepts(value);
            if !ok {
                tracing::warn!(
                    tool = %name,
                    param = %param.name,
                    %value,
                    "Dropping default that does not match the declared type"
                );
            }
            ok
        });
        parameters.push(DynamicParam {
            name: param.name,
            kind,
            required: param.required,
            default,
            description: param.description.filter(|d| !d.trim().is_empty()),
        });
    }

    Ok(DynamicToolManifest {
        name,
        description,
        parameters,
        script_path: script_path.to_path_buf(),
        origin,
        interaction: raw.interaction.unwrap_or(InteractionClass::Mutating),
        launcher,
    })
}

fn parse_line_format(text: &str) -> Result<RawManifest, ManifestError> {
    let mut manifest = RawManifest {
        name: None,
        description: None,
        parameters: Vec::new(),
        interaction: None,
    };

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(ManifestError::InvalidLine {
                line: line_no,
                message: "expected `key: value`".to_string(),
            });
        };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => manifest.name = Some(value.to_string()),
            "description" => manifest.description = Some(value.to_string()),
            "param" => manifest.parameters.push(parse_param_line(value, line_no)?),
            "interaction" => {
                let class = serde_json::from_value(Value::String(value.replace('-', "_")))
                    .map_err(|_| ManifestError::InvalidLine {
                        line: line_no,
                        message: format!("unknown interaction class '{value}'"),
                    })?;
                manifest.interaction = Some(class);
            }
            other => tracing::debug!(key = other, "Ignoring unknown manifest key"),
        }
    }
    Ok(manifest)
}

/// `<name> <type> required|optional [default=<v>] ["description"]`
fn parse_param_line(value: &str, line: usize) -> Result<RawParam, ManifestError> {
    let invalid = |message: String| ManifestError::InvalidLine { line, message };
    let words = split_quoted(value);
    let mut words = words.into_iter();
    let name = words
        .next()
        .ok_or_else(|| invalid("param needs a name".to_string()))?;
    let kind = words
        .next()
        .ok_or_else(|| invalid(format!("param '{name}' needs a type")))?;

    let mut required = None;
    let mut default_literal = None;
    let mut description = Vec::new();
    for word in words {
        match word.as_str() {
            "required" if required.is_none() => required = Some(true),
            "optional" if required.is_none() => required = Some(false),
            w => match w.strip_prefix("default=") {
                Some(literal) => default_literal = Some(literal.to_string()),
                None => description.push(word),
            },
        }
    }

    let param_kind = ParamKind::parse(&kind);
    let default = default_literal.and_then(|literal| {
        let parsed = param_kind.parse_default(&literal);
        if parsed.is_none() && !matches!(param_kind, ParamKind::Unsupported(_)) {
            tracing::warn!(param = %name, %literal, "Dropping default that does not parse as {kind}");
        }
        parsed
    });

    Ok(RawParam {
        name,
        kind,
        required: required.unwrap_or(false),
        default,
        description: (!description.is_empty()).then(|| description.join(" ")),
    })
}

/// Whitespace split where double quotes group words; quotes are removed.
fn split_quoted(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_word = false;
    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                in_word = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(output: &str) -> Result<DynamicToolManifest, ManifestError> {
        parse_manifest(
            output,
            Path::new("/tools/deploy.sh"),
            ToolOrigin::Project,
            Launcher::Direct,
        )
    }

    #[test]
    fn line_format_manifest() {
        let manifest = parse(
            "# deploy helper\n\
             name: deploy\n\
             description: Deploy the current branch\n\
             param: target string required \"Environment to deploy to\"\n\
             param: dry_run boolean optional default=false\n\
             param: replicas int optional default=3\n",
        )
        .unwrap();

        assert_eq!(manifest.name, "deploy");
        assert_eq!(manifest.description, "Deploy the current branch");
        assert_eq!(manifest.interaction, InteractionClass::Mutating);
        assert_eq!(manifest.parameters.len(), 3);

        let target = &manifest.parameters[0];
        assert_eq!(target.kind, ParamKind::String);
        assert!(target.required);
        assert_eq!(target.description.as_deref(), Some("Environment to deploy to"));

        let dry_run = &manifest.parameters[1];
        assert!(!dry_run.required);
        assert_eq!(dry_run.default, Some(json!(false)));

        assert_eq!(manifest.parameters[2].kind, ParamKind::Number);
        assert_eq!(manifest.parameters[2].default, Some(json!(3)));
    }

    #[test]
    fn json_manifest() {
        let manifest = parse(
            r#"{"name":"lint","description":"Run the linter","interaction":"read_only",
                "parameters":[{"name":"path","type":"str","required":true},
                              {"name":"fix","type":"bool","default":true}]}"#,
        )
        .unwrap();
        assert_eq!(manifest.name, "lint");
        assert_eq!(manifest.interaction, InteractionClass::ReadOnly);
        assert_eq!(manifest.parameters[0].kind, ParamKind::String);
        assert_eq!(manifest.parameters[1].default, Some(json!(true)));
        assert!(!manifest.parameters[1].required);
    }

    #[test]
    fn mismatched_defaults_are_dropped() {
        let manifest = parse(
            "name: t\ndescription: d\nparam: n number optional default=lots\n",
        )
        .unwrap();
        assert_eq!(manifest.parameters[0].default, None);

        let manifest = parse(
            r#"{"name":"t","description":"d","parameters":[{"name":"n","type":"number","default":"x"}]}"#,
        )
        .unwrap();
        assert_eq!(manifest.parameters[0].default, None);
    }

    #[test]
    fn unsupported_types_are_kept_for_reporting() {
        let manifest = parse("name: t\ndescription: d\nparam: items array optional\n").unwrap();
        assert_eq!(
            manifest.parameters[0].kind,
            ParamKind::Unsupported("array".to_string())
        );
    }

    #[test]
    fn type_aliases() {
        assert_eq!(ParamKind::parse("str"), ParamKind::String);
        assert_eq!(ParamKind::parse("INTEGER"), ParamKind::Number);
        assert_eq!(ParamKind::parse("float"), ParamKind::Number);
        assert_eq!(ParamKind::parse("bool"), ParamKind::Boolean);
    }

    #[test]
    fn interaction_line() {
        let manifest = parse("name: t\ndescription: d\ninteraction: read-only\n").unwrap();
        assert_eq!(manifest.interaction, InteractionClass::ReadOnly);
        assert!(parse("name: t\ndescription: d\ninteraction: sometimes\n").is_err());
    }

    #[test]
    fn interaction_spellings_agree_across_formats() {
        let line = parse("name: t\ndescription: d\ninteraction: read-only\n").unwrap();
        let json =
            parse(r#"{"name":"t","description":"d","interaction":"read-only"}"#).unwrap();
        assert_eq!(line.interaction, InteractionClass::ReadOnly);
        assert_eq!(json.interaction, line.interaction);

        let json = parse(r#"{"name":"t","description":"d","interaction":"read_only"}"#).unwrap();
        assert_eq!(json.interaction, InteractionClass::ReadOnly);
    }

    #[test]
    fn invalid_manifests_are_rejected() {
        assert_eq!(parse("   \n"), Err(ManifestError::Empty));
        assert_eq!(
            parse("description: d\n"),
            Err(ManifestError::MissingField("name"))
        );
        assert_eq!(
            parse("name: t\n"),
            Err(ManifestError::MissingField("description"))
        );
        assert!(matches!(
            parse("name: ../evil\ndescription: d\n"),
            Err(ManifestError::InvalidName(_))
        ));
        assert!(matches!(
            parse("name: t\ndescription: d\nthis line has no colon\n"),
            Err(ManifestError::InvalidLine { line: 3, .. })
        ));
        assert!(matches!(
            parse("name: t\ndescription: d\nparam: a string\nparam: a number\n"),
            Err(ManifestError::DuplicateParam(_))
        ));
        assert!(matches!(parse("{not json"), Err(ManifestError::Json(_))));
    }

    #[test]
    fn quoted_default_keeps_spaces() {
        let manifest =
            parse("name: t\ndescription: d\nparam: msg string optional default=\"hello world\"\n")
                .unwrap();
        assert_eq!(manifest.parameters[0].default, Some(json!("hello world")));
    }

    #[test]
    fn launcher_by_extension() {
        let temp = tempfile::tempdir().unwrap();
        let py = temp.path().join("tool.py");
        std::fs::write(&py, "print()").unwrap();
        assert_eq!(
            Launcher::for_script(&py),
            Some(Launcher::Interpreter {
                program: "python3".to_string(),
                args: Vec::new()
            })
        );
        let txt = temp.path().join("notes.txt");
        std::fs::write(&txt, "x").unwrap();
        assert_eq!(Launcher::for_script(&txt), None);

        let spec = Launcher::for_script(&temp.path().join("t.ts"))
            .unwrap()
            .spec(Path::new("/x/t.ts"));
        assert_eq!(spec.program, PathBuf::from("deno"));
        assert_eq!(spec.args, vec!["run", "--no-prompt", "/x/t.ts"]);
    }

    #[cfg(unix)]
    #[test]
    fn executable_scripts_launch_directly() {
        use std::os::unix::fs::PermissionsExt;
        let temp = tempfile::tempdir().unwrap();
        let script = temp.path().join("tool");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(Launcher::for_script(&script), Some(Launcher::Direct));
    }
}
