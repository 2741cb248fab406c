//! JSON Schema synthesis and the stdin payload for dynamic tools.

use serde_json::{Map, Value, json};

use super::manifest::{DynamicToolManifest, ParamKind};

/// Schema advertised to the model plus the defaults to pre-fill before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedSchema {
    pub schema: Value,
    pub defaults: Map<String, Value>,
}

/// Build an object schema from a manifest's parameters.
///
/// Parameters of unsupported types are dropped with a warning; the tool still
/// registers with the remaining ones.
#[must_use]
pub fn synthesize_schema(manifest: &DynamicToolManifest) -> SynthesizedSchema {
    let mut properties = Map::new();
    let mut required = Vec::new();
    let mut defaults = Map::new();

    for param in &manifest.parameters {
        let Some(json_type) = param.kind.json_type() else {
            if let ParamKind::Unsupported(kind) = &param.kind {
                tracing::warn!(
                    tool = %manifest.name,
                    param = %param.name,
                    kind = %kind,
                    "Dropping parameter with unsupported type"
                );
            }
            continue;
        };

        let mut property = Map::new();
        property.insert("type".to_string(), json!(json_type));
        if let Some(description) = &param.description {
            property.insert("description".to_string(), json!(description));
        }
        if let Some(default) = &param.default {
            property.insert("default".to_string(), default.clone());
            defaults.insert(param.name.clone(), default.clone());
        }
        properties.insert(param.name.clone(), Value::Object(property));
        if param.required {
            required.push(json!(param.name));
        }
    }

    SynthesizedSchema {
        schema: json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        }),
        defaults,
    }
}

/// Insert defaults for keys the caller left out. Non-object args are left alone
/// so validation can report them.
pub fn apply_defaults(args: &mut Value, defaults: &Map<String, Value>) {
    let Value::Object(map) = args else {
        return;
    };
    for (name, value) in defaults {
        map.entry(name.clone()).or_insert_with(|| value.clone());
    }
}

/// The execute-mode stdin line: `[{"name":..,"value":..}]` in manifest order.
///
/// Optional parameters without a value are omitted.
#[must_use]
pub fn stdin_payload(manifest: &DynamicToolManifest, args: &Value) -> String {
    let entries: Vec<Value> = manifest
        .parameters
        .iter()
        .filter_map(|param| {
            args.get(&param.name)
                .map(|value| json!({ "name": param.name, "value": value }))
        })
        .collect();
    let mut line = Value::Array(entries).to_string();
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::manifest::{DynamicParam, Launcher, ToolOrigin};
    use crate::validate_args;
    use std::path::PathBuf;
    use warden_types::InteractionClass;

    fn param(name: &str, kind: ParamKind, required: bool, default: Option<Value>) -> DynamicParam {
        DynamicParam {
            name: name.to_string(),
            kind,
            required,
            default,
            description: None,
        }
    }

    fn manifest(parameters: Vec<DynamicParam>) -> DynamicToolManifest {
        DynamicToolManifest {
            name: "deploy".to_string(),
            description: "Deploy".to_string(),
            parameters,
            script_path: PathBuf::from("/tools/deploy"),
            origin: ToolOrigin::User,
            interaction: InteractionClass::Mutating,
            launcher: Launcher::Direct,
        }
    }

    #[test]
    fn schema_types_and_required() {
        let m = manifest(vec![
            param("target", ParamKind::String, true, None),
            param("replicas", ParamKind::Number, false, Some(json!(2))),
            param("dry_run", ParamKind::Boolean, false, None),
        ]);
        let synthesized = synthesize_schema(&m);
        let schema = &synthesized.schema;

        assert_eq!(schema["properties"]["target"]["type"], "string");
        assert_eq!(schema["properties"]["replicas"]["type"], "number");
        assert_eq!(schema["properties"]["dry_run"]["type"], "boolean");
        assert_eq!(schema["required"], json!(["target"]));
        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(synthesized.defaults.get("replicas"), Some(&json!(2)));
    }

    #[test]
    fn unsupported_params_are_dropped() {
        let m = manifest(vec![
            param("items", ParamKind::Unsupported("array".into()), true, None),
            param("name", ParamKind::String, false, None),
        ]);
        let schema = synthesize_schema(&m).schema;
        assert!(schema["properties"].get("items").is_none());
        assert_eq!(schema["required"], json!([]));
    }

    #[test]
    fn defaults_prefill_then_validate() {
        let m = manifest(vec![
            param("target", ParamKind::String, true, None),
            param("replicas", ParamKind::Number, false, Some(json!(2))),
        ]);
        let synthesized = synthesize_schema(&m);

        let mut args = json!({"target": "prod"});
        apply_defaults(&mut args, &synthesized.defaults);
        assert_eq!(args, json!({"target": "prod", "replicas": 2}));
        assert!(validate_args(&synthesized.schema, &args).is_ok());

        let mut explicit = json!({"target": "prod", "replicas": 5});
        apply_defaults(&mut explicit, &synthesized.defaults);
        assert_eq!(explicit["replicas"], 5);

        let mut missing = json!({});
        apply_defaults(&mut missing, &synthesized.defaults);
        assert!(validate_args(&synthesized.schema, &missing).is_err());

        assert!(validate_args(&synthesized.schema, &json!({"target": "x", "extra": 1})).is_err());
    }

    #[test]
    fn payload_follows_manifest_order() {
        let m = manifest(vec![
            param("target", ParamKind::String, true, None),
            param("force", ParamKind::Boolean, false, None),
            param("replicas", ParamKind::Number, false, None),
        ]);
        let payload = stdin_payload(&m, &json!({"replicas": 3, "target": "prod"}));
        assert_eq!(
            payload,
            "[{\"name\":\"target\",\"value\":\"prod\"},{\"name\":\"replicas\",\"value\":3}]\n"
        );
    }
}
