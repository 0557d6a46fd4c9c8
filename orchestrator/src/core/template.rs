//! Placeholder substitution for stage command and output templates.
//!
//! Supported placeholders: `${RUN_ID}`, `${OUT_DIR}` and `${input.<name>}`.
//! Anything else inside `${...}`, or an unterminated `${`, is a malformed
//! template.

use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use regex::Regex;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").expect("placeholder regex is valid"));

const INPUT_PREFIX: &str = "input.";

/// Values available to every template of a run.
#[derive(Debug, Clone, Copy)]
pub struct TemplateVars<'a> {
    pub run_id: &'a str,
    pub out_dir: &'a str,
}

/// Render `template`, asking `input` for the value of each `${input.<name>}`.
pub fn render<F>(template: &str, vars: TemplateVars<'_>, mut input: F) -> Result<String>
where
    F: FnMut(&str) -> String,
{
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        let key = caps.get(1).map_or("", |m| m.as_str()).trim();
        let literal = &template[last..whole.start()];
        ensure_no_dangling(literal, template)?;
        out.push_str(literal);

        match key {
            "RUN_ID" => out.push_str(vars.run_id),
            "OUT_DIR" => out.push_str(vars.out_dir),
            _ => match key.strip_prefix(INPUT_PREFIX) {
                Some(name) if !name.is_empty() => out.push_str(&input(name)),
                _ => {
                    return Err(anyhow!(
                        "unknown placeholder '${{{key}}}' in template '{template}'"
                    ));
                }
            },
        }
        last = whole.end();
    }
    let tail = &template[last..];
    ensure_no_dangling(tail, template)?;
    out.push_str(tail);
    Ok(out)
}

/// Render a template that may only use `${RUN_ID}` and `${OUT_DIR}`.
pub fn render_path(template: &str, vars: TemplateVars<'_>) -> Result<String> {
    let mut referenced = None;
    let rendered = render(template, vars, |name| {
        referenced.get_or_insert_with(|| name.to_string());
        String::new()
    })?;
    if let Some(name) = referenced {
        return Err(anyhow!(
            "input placeholder '${{input.{name}}}' is not allowed in '{template}'"
        ));
    }
    Ok(rendered)
}

/// Names referenced through `${input.<name>}`, in order of first appearance.
pub fn referenced_inputs(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let key = caps.get(1).map_or("", |m| m.as_str()).trim();
        if let Some(name) = key.strip_prefix(INPUT_PREFIX)
            && !name.is_empty()
            && !names.iter().any(|n| n == name)
        {
            names.push(name.to_string());
        }
    }
    names
}

fn ensure_no_dangling(segment: &str, template: &str) -> Result<()> {
    if segment.contains("${") {
        return Err(anyhow!("unterminated placeholder in template '{template}'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: TemplateVars<'static> = TemplateVars {
        run_id: "demo1",
        out_dir: "/tmp/out",
    };

    #[test]
    fn substitutes_run_id_out_dir_and_inputs() {
        let rendered = render(
            "--out ${OUT_DIR}/${RUN_ID}.json --region ${input.region}",
            VARS,
            |name| format!("<{name}>"),
        )
        .expect("render");
        assert_eq!(rendered, "--out /tmp/out/demo1.json --region <region>");
    }

    #[test]
    fn leaves_plain_text_untouched() {
        let rendered = render("plain $HOME text", VARS, |_| String::new()).expect("render");
        assert_eq!(rendered, "plain $HOME text");
    }

    #[test]
    fn rejects_unknown_placeholder() {
        let err = render("${HOME}", VARS, |_| String::new()).unwrap_err();
        assert!(err.to_string().contains("unknown placeholder"));
    }

    #[test]
    fn rejects_unterminated_placeholder() {
        let err = render("${OUT_DIR}/x ${input.zones", VARS, |_| String::new()).unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn rejects_empty_input_name() {
        let err = render("${input.}", VARS, |_| String::new()).unwrap_err();
        assert!(err.to_string().contains("unknown placeholder"));
    }

    #[test]
    fn render_path_refuses_inputs() {
        let err = render_path("${OUT_DIR}/${input.zones}", VARS).unwrap_err();
        assert!(err.to_string().contains("not allowed"));
        let ok = render_path("${OUT_DIR}/zones.geojson", VARS).expect("render");
        assert_eq!(ok, "/tmp/out/zones.geojson");
    }

    #[test]
    fn referenced_inputs_are_unique_and_ordered() {
        let names = referenced_inputs("${input.b} ${input.a} ${input.b} ${RUN_ID}");
        assert_eq!(names, vec!["b", "a"]);
    }
}
