//! Post-fold optimization: hoist settings shared by every serverless
//! function into the `Globals.Function` section.

use samify_template::{TemplateDocument, TemplateValue, ValueMap};

const HOISTED_PROPS: [&str; 3] = ["Runtime", "MemorySize", "Timeout"];

/// Move `Runtime`/`MemorySize`/`Timeout` and environment variables shared by
/// every serverless function into `Globals.Function`. A no-op below two
/// functions; a global section for one function just moves text around.
pub fn apply_function_globals(doc: &mut TemplateDocument) {
    let function_ids: Vec<String> = doc.resources_of_type("AWS::Serverless::Function");
    if function_ids.len() < 2 {
        return;
    }

    let mut function_globals = ValueMap::new();

    for prop in HOISTED_PROPS {
        let Some(shared) = shared_value(doc, &function_ids, prop) else {
            continue;
        };
        function_globals.insert(prop.to_string(), shared);
        for id in &function_ids {
            if let Some(resource) = doc.resource_mut(id) {
                resource.properties.shift_remove(prop);
            }
        }
    }

    let shared_env = shared_environment(doc, &function_ids);
    if !shared_env.is_empty() {
        for id in &function_ids {
            if let Some(resource) = doc.resource_mut(id) {
                remove_env_keys(resource.properties.get_mut("Environment"), &shared_env);
                if let Some(env) = resource.properties.get("Environment") {
                    if env.as_mapping().map_or(false, ValueMap::is_empty) {
                        resource.properties.shift_remove("Environment");
                    }
                }
            }
        }
        let mut variables = ValueMap::new();
        for (key, value) in shared_env {
            variables.insert(key, value);
        }
        let mut env = ValueMap::new();
        env.insert("Variables".to_string(), TemplateValue::Mapping(variables));
        function_globals.insert("Environment".to_string(), TemplateValue::Mapping(env));
    }

    if function_globals.is_empty() {
        return;
    }
    tracing::debug!(
        hoisted = function_globals.len(),
        "hoisted shared function settings into Globals"
    );
    doc.globals
        .insert("Function".to_string(), TemplateValue::Mapping(function_globals));
}

/// The value every function carries for `prop`, or `None` when any function
/// lacks it or differs.
fn shared_value(
    doc: &TemplateDocument,
    function_ids: &[String],
    prop: &str,
) -> Option<TemplateValue> {
    let mut shared: Option<&TemplateValue> = None;
    for id in function_ids {
        let value = doc.resource(id)?.prop(prop)?;
        match shared {
            None => shared = Some(value),
            Some(existing) if existing == value => {}
            Some(_) => return None,
        }
    }
    shared.cloned()
}

fn shared_environment(doc: &TemplateDocument, function_ids: &[String]) -> Vec<(String, TemplateValue)> {
    let mut shared: Option<Vec<(String, TemplateValue)>> = None;
    for id in function_ids {
        let Some(variables) = doc
            .resource(id)
            .and_then(|res| res.prop("Environment"))
            .and_then(TemplateValue::as_mapping)
            .and_then(|env| env.get("Variables"))
            .and_then(TemplateValue::as_mapping)
        else {
            return Vec::new();
        };
        shared = Some(match shared {
            None => variables
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            Some(entries) => entries
                .into_iter()
                .filter(|(key, value)| variables.get(key) == Some(value))
                .collect(),
        });
    }
    shared.unwrap_or_default()
}

fn remove_env_keys(env: Option<&mut TemplateValue>, shared: &[(String, TemplateValue)]) {
    let Some(TemplateValue::Mapping(env)) = env else {
        return;
    };
    if let Some(TemplateValue::Mapping(variables)) = env.get_mut("Variables") {
        for (key, _) in shared {
            variables.shift_remove(key);
        }
        if variables.is_empty() {
            env.shift_remove("Variables");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use samify_template::parse_str;

    const TWO_FUNCTIONS: &str = r"
Resources:
  A:
    Type: AWS::Serverless::Function
    Properties:
      Handler: a.handler
      Runtime: python3.12
      Timeout: 30
      Environment:
        Variables:
          TABLE: orders
          ONLY_A: x
  B:
    Type: AWS::Serverless::Function
    Properties:
      Handler: b.handler
      Runtime: python3.12
      Timeout: 30
      Environment:
        Variables:
          TABLE: orders
";

    #[test]
    fn shared_settings_move_into_globals() {
        let mut doc = parse_str(TWO_FUNCTIONS).unwrap();
        apply_function_globals(&mut doc);

        let globals = doc.globals.get("Function").and_then(TemplateValue::as_mapping).unwrap();
        assert_eq!(globals.get("Runtime").unwrap().as_str(), Some("python3.12"));
        assert!(globals.contains_key("Timeout"));
        let variables = globals
            .get("Environment")
            .and_then(TemplateValue::as_mapping)
            .and_then(|env| env.get("Variables"))
            .and_then(TemplateValue::as_mapping)
            .unwrap();
        assert!(variables.contains_key("TABLE"));

        let a = doc.resource("A").unwrap();
        assert!(a.prop("Runtime").is_none());
        let a_vars = a
            .prop("Environment")
            .and_then(TemplateValue::as_mapping)
            .and_then(|env| env.get("Variables"))
            .and_then(TemplateValue::as_mapping)
            .unwrap();
        assert!(a_vars.contains_key("ONLY_A"));
        assert!(!a_vars.contains_key("TABLE"));

        let b = doc.resource("B").unwrap();
        assert!(b.prop("Environment").is_none());
    }

    #[test]
    fn divergent_settings_stay_local() {
        let mut doc = parse_str(&TWO_FUNCTIONS.replace("Timeout: 30\n      Environment:\n        Variables:\n          TABLE: orders\n          ONLY_A: x", "Timeout: 60")).unwrap();
        apply_function_globals(&mut doc);
        let globals = doc.globals.get("Function").and_then(TemplateValue::as_mapping);
        if let Some(globals) = globals {
            assert!(!globals.contains_key("Timeout"));
        }
        assert!(doc.resource("A").unwrap().prop("Timeout").is_some());
    }

    #[test]
    fn single_function_is_untouched() {
        let mut doc = parse_str(
            "Resources:\n  A:\n    Type: AWS::Serverless::Function\n    Properties:\n      Runtime: python3.12\n",
        )
        .unwrap();
        apply_function_globals(&mut doc);
        assert!(doc.globals.is_empty());
        assert!(doc.resource("A").unwrap().prop("Runtime").is_some());
    }
}
