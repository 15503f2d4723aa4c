//! Text rendering of delivered events shared by the print and log reporters.
use chrono::SecondsFormat;
use dbug_core::ConfigEvent;
use regex::Regex;
use std::fmt::Write as _;
use std::sync::OnceLock;

/// Event config variable holding a `${name}` template for the printed line.
pub const PRINT_VALUES: &str = "printValues";

fn reference_regex() -> &'static Regex {
    static REFERENCE_RE: OnceLock<Regex> = OnceLock::new();
    REFERENCE_RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("valid regex"))
}

fn standard_value(event: &ConfigEvent, name: &str) -> Option<String> {
    match name {
        "value" => Some(event.host().to_string()),
        "event" => Some(event.event_type().name().to_string()),
        "class" => Some(event.anchor().info().anchor_type().type_name()),
        "time" => Some(
            event
                .occurrence()
                .start()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        ),
        _ => None,
    }
}

/// Resolves `name` against everything the event carries.
///
/// Lookup order: standard names, event config values, event values, config values, dynamic
/// values, static values.
pub fn resolve(event: &ConfigEvent, name: &str) -> Option<String> {
    standard_value(event, name).or_else(|| {
        event
            .event_config_value(name)
            .or_else(|| event.event_value(name))
            .or_else(|| event.config_value(name))
            .or_else(|| event.dynamic_value(name))
            .or_else(|| event.static_value(name))
            .map(ToString::to_string)
    })
}

/// Substitutes every `${name}` in `template`. Unknown names are left as written.
pub fn render_template(template: &str, event: &ConfigEvent) -> String {
    reference_regex()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            resolve(event, &caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Every value of the event as `name=value` pairs.
pub fn render_all(event: &ConfigEvent) -> String {
    let mut out = String::new();
    for name in ["class", "time", "event"] {
        if !out.is_empty() {
            out.push(' ');
        }
        let _ = write!(out, "{name}={}", standard_value(event, name).unwrap_or_default());
    }

    let info = event.anchor().info();
    let def = info.anchor_type();
    let mut labeled = |name: &str, value: &dyn std::fmt::Display| {
        let _ = write!(out, " {name}={value}");
    };
    for (field, value) in def.static_fields().iter().zip(info.statics()) {
        labeled(field.name(), value);
    }
    for (field, value) in def.dynamic_fields().iter().zip(event.occurrence().dynamics()) {
        labeled(field.name(), value);
    }
    let config = event.config().template();
    for (variable, value) in config.variables.iter().zip(event.anchor().config_values()) {
        if let Some(value) = value {
            labeled(&variable.name, value);
        }
    }
    for ((name, _), value) in event.event_type().fields().iter().zip(event.occurrence().values()) {
        labeled(name, value);
    }
    let event_config = event.event_config().template();
    for (variable, value) in event_config.variables.iter().zip(event.event_config_values()) {
        match value {
            Some(value) if variable.name != PRINT_VALUES => labeled(&variable.name, value),
            _ => {}
        }
    }
    out
}

/// The line printed for `event`, indented `depth` times.
pub fn render_line(event: &ConfigEvent, indent: &str, depth: usize) -> String {
    let mut line = indent.repeat(depth);
    match event.event_config_value(PRINT_VALUES) {
        Some(template) => line.push_str(&render_template(&template.to_string(), event)),
        None => line.push_str(&render_all(event)),
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_are_word_characters_in_braces() {
        let found: Vec<&str> = reference_regex()
            .captures_iter("${a} $b ${b_2}${} ${c-d}")
            .map(|caps| caps.get(1).map_or("", |m| m.as_str()))
            .collect();
        assert_eq!(found, vec!["a", "b_2"]);
    }
}
