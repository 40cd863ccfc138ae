//! Command line synthesis for each backend dialect.
//!
//! All three dialects share the same semantic options. The direct dialect
//! passes them as tool flags; the Gradle and Maven plugins take them as
//! build properties (`-Pkey=value` / `-Dkey=value`) with boolean flags folded
//! into a single pass-through property.

use serde_json::Value;

use crate::{
    backend::{BackendKind, ProjectBackend},
    options::{self, RunOptions, render_value},
    target::RunTarget,
};

const GAUGE_PREAMBLE: &[&str] = &["run"];
const GRADLE_PREAMBLE: &[&str] = &["clean", "gauge"];
const MAVEN_PREAMBLE: &[&str] = &["-q", "clean", "compile", "test-compile", "gauge:execute"];

/// Argument vector for running `target` with `options` through `backend`.
///
/// `options` holds the user layers only; defaults are applied here.
#[must_use]
pub fn build(backend: &ProjectBackend, target: &RunTarget, options: &RunOptions) -> Vec<String> {
    let locator = target.locator();
    match backend.kind() {
        BackendKind::Direct => for_gauge(locator.as_deref(), options),
        BackendKind::Gradle => for_gradle(locator.as_deref(), options),
        BackendKind::Maven => for_maven(locator.as_deref(), options),
    }
}

/// Direct tool invocation: `run [--flag [value]]... [target]`.
#[must_use]
pub fn for_gauge(target: Option<&str>, options: &RunOptions) -> Vec<String> {
    let mut args = to_args(GAUGE_PREAMBLE);
    if options.failed() {
        args.push(format!("--{}", options::FAILED));
        return args;
    }
    if options.repeat() {
        args.push(format!("--{}", options::REPEAT));
        return args;
    }

    for (key, value) in options.with_defaults().iter() {
        match value {
            Value::Bool(true) => args.push(format!("--{key}")),
            Value::Bool(false) | Value::Null => {}
            other => {
                if let Some(rendered) = render_value(other) {
                    args.push(format!("--{key}"));
                    args.push(rendered);
                }
            }
        }
    }

    if let Some(target) = target {
        args.push(target.to_string());
    }
    args
}

/// Gradle plugin invocation: `clean gauge -Pkey=value...`.
#[must_use]
pub fn for_gradle(target: Option<&str>, options: &RunOptions) -> Vec<String> {
    BuildToolDialect {
        preamble: GRADLE_PREAMBLE,
        property_prefix: "-P",
        flags_property: "additionalFlags",
        flags_separator: " ",
    }
    .build(target, options)
}

/// Maven plugin invocation: `-q clean compile test-compile gauge:execute
/// -Dkey=value...`.
#[must_use]
pub fn for_maven(target: Option<&str>, options: &RunOptions) -> Vec<String> {
    BuildToolDialect {
        preamble: MAVEN_PREAMBLE,
        property_prefix: "-D",
        flags_property: "flags",
        flags_separator: ",",
    }
    .build(target, options)
}

struct BuildToolDialect {
    preamble: &'static [&'static str],
    property_prefix: &'static str,
    flags_property: &'static str,
    flags_separator: &'static str,
}

impl BuildToolDialect {
    fn property(&self, key: &str, value: &str) -> String {
        format!("{}{key}={value}", self.property_prefix)
    }

    fn build(&self, target: Option<&str>, options: &RunOptions) -> Vec<String> {
        let mut args = to_args(self.preamble);
        if options.failed() {
            args.push(self.property(self.flags_property, &format!("--{}", options::FAILED)));
            return args;
        }
        if options.repeat() {
            args.push(self.property(self.flags_property, &format!("--{}", options::REPEAT)));
            return args;
        }

        let mut in_parallel = false;
        let mut nodes = None;
        let mut tags = None;
        let mut env = None;
        let mut flags = Vec::new();
        for (key, value) in options.with_defaults().iter() {
            match key {
                options::PARALLEL => in_parallel = options::is_truthy(value),
                options::NODES => nodes = render_value(value),
                options::TAGS => tags = render_value(value),
                options::ENV => env = render_value(value),
                _ => match value {
                    Value::Bool(true) => flags.push(format!("--{key}")),
                    Value::Bool(false) | Value::Null => {}
                    other => {
                        if let Some(rendered) = render_value(other) {
                            flags.push(format!("--{key}={rendered}"));
                        }
                    }
                },
            }
        }

        if in_parallel {
            args.push(self.property("inParallel", "true"));
        }
        if let Some(nodes) = nodes {
            args.push(self.property("nodes", &nodes));
        }
        if let Some(tags) = tags {
            args.push(self.property("tags", &tags));
        }
        if let Some(env) = env {
            args.push(self.property("env", &env));
        }
        if !flags.is_empty() {
            args.push(self.property(self.flags_property, &flags.join(self.flags_separator)));
        }
        if let Some(target) = target {
            args.push(self.property("specsDir", target));
        }
        args
    }
}

fn to_args(preamble: &[&str]) -> Vec<String> {
    preamble.iter().map(ToString::to_string).collect()
}
