//! Compile request schema and boundary validation.
//!
//! [`CompileRequest`] is the loosely-shaped JSON body as it arrives.
//! [`CompileRequest::validate`] turns it into a [`CompilationRequest`] whose
//! names are normalized, unique and safe to use as file names. Nothing past
//! this module ever sees an unvalidated name.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{CompilerConfig, Limits};

/// A request shape violation. Reported before any compilation starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Body is not valid JSON or does not match the schema.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// `plugins` is empty.
    #[error("at least one plugin is required")]
    NoPlugins,

    /// Too many plugins.
    #[error("maximum {max} plugins per request, got {count}")]
    TooManyPlugins { count: usize, max: usize },

    /// Too many includes, either shared or for one plugin.
    #[error("maximum {max} {scope} includes per request, got {count}")]
    TooManyIncludes {
        scope: String,
        count: usize,
        max: usize,
    },

    /// A plugin or include name is not a safe file name.
    #[error("unsafe {kind} name '{name}': {reason}")]
    UnsafeName {
        kind: NameKind,
        name: String,
        reason: &'static str,
    },

    /// Two plugins, or two includes in one scope, share a name.
    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: NameKind, name: String },
}

/// What a validated name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Plugin,
    Include,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameKind::Plugin => f.write_str("plugin"),
            NameKind::Include => f.write_str("include"),
        }
    }
}

/// Raw `POST /compile` body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompileRequest {
    /// Includes shared by every plugin in the batch.
    #[serde(default)]
    pub includes: BTreeMap<String, String>,

    /// Plugins to compile, in submission order.
    pub plugins: Vec<PluginSource>,
}

/// One plugin as submitted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginSource {
    /// Plugin name. Defaults to `plugin_<n>`.
    #[serde(default)]
    pub name: Option<String>,

    /// Source text.
    #[serde(default)]
    pub code: String,

    /// Includes visible to this plugin only.
    #[serde(default)]
    pub includes: BTreeMap<String, String>,
}

/// Identifier of one accepted request, namespacing its build directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// A named text file to materialize next to the sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeFile {
    /// Normalized file name, always carrying the include extension.
    pub name: String,
    pub text: String,
}

/// A validated plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plugin {
    /// Normalized name without the source extension.
    pub name: String,
    pub source: String,
    pub includes: Vec<IncludeFile>,
}

/// A validated batch, ready for orchestration.
#[derive(Debug, Clone)]
pub struct CompilationRequest {
    pub id: RequestId,
    pub plugins: Vec<Plugin>,
    pub includes: Vec<IncludeFile>,
}

impl CompileRequest {
    /// Parse a JSON body.
    pub fn from_json(body: &[u8]) -> Result<Self, ValidationError> {
        serde_json::from_slice(body).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    /// Check the batch shape and normalize every name.
    pub fn validate(
        self,
        limits: &Limits,
        compiler: &CompilerConfig,
    ) -> Result<CompilationRequest, ValidationError> {
        if self.plugins.is_empty() {
            return Err(ValidationError::NoPlugins);
        }
        if self.plugins.len() > limits.max_plugins {
            return Err(ValidationError::TooManyPlugins {
                count: self.plugins.len(),
                max: limits.max_plugins,
            });
        }

        let includes = validate_includes(self.includes, "shared", limits, compiler)?;

        let mut seen = HashSet::new();
        let mut plugins = Vec::with_capacity(self.plugins.len());
        for (idx, plugin) in self.plugins.into_iter().enumerate() {
            let raw = plugin
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("plugin_{}", idx + 1));
            let name = normalize_plugin_name(&raw, limits, compiler)?;
            if !seen.insert(name.clone()) {
                return Err(ValidationError::DuplicateName {
                    kind: NameKind::Plugin,
                    name,
                });
            }

            let scope = format!("plugin '{name}'");
            let includes = validate_includes(plugin.includes, &scope, limits, compiler)?;
            plugins.push(Plugin {
                name,
                source: plugin.code,
                includes,
            });
        }

        Ok(CompilationRequest {
            id: RequestId::new(),
            plugins,
            includes,
        })
    }
}

fn validate_includes(
    includes: BTreeMap<String, String>,
    scope: &str,
    limits: &Limits,
    compiler: &CompilerConfig,
) -> Result<Vec<IncludeFile>, ValidationError> {
    if includes.len() > limits.max_includes {
        return Err(ValidationError::TooManyIncludes {
            scope: scope.to_string(),
            count: includes.len(),
            max: limits.max_includes,
        });
    }

    let mut seen = HashSet::new();
    let mut files = Vec::with_capacity(includes.len());
    for (raw, text) in includes {
        check_safe_name(&raw, NameKind::Include, limits)?;
        let suffix = format!(".{}", compiler.include_extension);
        let name = if raw.ends_with(&suffix) {
            raw
        } else {
            format!("{raw}{suffix}")
        };
        if !seen.insert(name.clone()) {
            return Err(ValidationError::DuplicateName {
                kind: NameKind::Include,
                name,
            });
        }
        files.push(IncludeFile { name, text });
    }
    Ok(files)
}

fn normalize_plugin_name(
    raw: &str,
    limits: &Limits,
    compiler: &CompilerConfig,
) -> Result<String, ValidationError> {
    check_safe_name(raw, NameKind::Plugin, limits)?;
    let suffix = format!(".{}", compiler.source_extension);
    let stem = raw.strip_suffix(&suffix).unwrap_or(raw);
    if stem.is_empty() {
        return Err(ValidationError::UnsafeName {
            kind: NameKind::Plugin,
            name: raw.to_string(),
            reason: "name is only an extension",
        });
    }
    Ok(stem.to_string())
}

/// Names become file names: `[A-Za-z0-9_.-]+`, no traversal, no dotfiles.
fn check_safe_name(name: &str, kind: NameKind, limits: &Limits) -> Result<(), ValidationError> {
    let reject = |reason| {
        Err(ValidationError::UnsafeName {
            kind,
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return reject("name is empty");
    }
    if name.len() > limits.max_name_len {
        return reject("name is too long");
    }
    if name.contains("..") {
        return reject("name contains a traversal sequence");
    }
    if name.starts_with('.') {
        return reject("name starts with a dot");
    }
    // Would reach the compiler as an option
    if name.starts_with('-') {
        return reject("name starts with a dash");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return reject("name may only contain letters, digits, '_', '-' and '.'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(name: &str) -> PluginSource {
        PluginSource {
            name: Some(name.to_string()),
            code: "public plugin_init() {}".to_string(),
            includes: BTreeMap::new(),
        }
    }

    fn validate(request: CompileRequest) -> Result<CompilationRequest, ValidationError> {
        request.validate(&Limits::default(), &CompilerConfig::default())
    }

    #[test]
    fn test_parse_body() {
        let body = br#"{"includes": {"util": "stock x;"}, "plugins": [{"name": "a", "code": "x"}]}"#;
        let request = CompileRequest::from_json(body).unwrap();
        assert_eq!(request.plugins.len(), 1);
        assert_eq!(request.includes.get("util").map(String::as_str), Some("stock x;"));
    }

    #[test]
    fn test_malformed_body_names_field() {
        let err = CompileRequest::from_json(br#"{"plugins": {"name": "a"}}"#).unwrap_err();
        match err {
            ValidationError::Malformed(msg) => assert!(msg.contains("invalid type"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = CompileRequest::from_json(b"{}").unwrap_err();
        assert!(err.to_string().contains("plugins"));
    }

    #[test]
    fn test_plugin_count_bounds() {
        assert_eq!(
            validate(CompileRequest::default()).unwrap_err(),
            ValidationError::NoPlugins
        );

        let request = CompileRequest {
            plugins: (0..11).map(|i| plugin(&format!("p{i}"))).collect(),
            ..Default::default()
        };
        assert_eq!(
            validate(request).unwrap_err(),
            ValidationError::TooManyPlugins { count: 11, max: 10 }
        );

        let request = CompileRequest {
            plugins: (0..10).map(|i| plugin(&format!("p{i}"))).collect(),
            ..Default::default()
        };
        assert_eq!(validate(request).unwrap().plugins.len(), 10);
    }

    #[test]
    fn test_too_many_includes() {
        let includes = (0..11).map(|i| (format!("inc{i}"), String::new())).collect();
        let request = CompileRequest {
            includes,
            plugins: vec![plugin("a")],
        };
        assert!(matches!(
            validate(request).unwrap_err(),
            ValidationError::TooManyIncludes { count: 11, .. }
        ));
    }

    #[test]
    fn test_unsafe_names_rejected() {
        for bad in ["../etc", "a/b", "a\\b", ".hidden", "sp ace", "a..b"] {
            let request = CompileRequest {
                plugins: vec![plugin(bad)],
                ..Default::default()
            };
            assert!(
                matches!(validate(request), Err(ValidationError::UnsafeName { .. })),
                "{bad} should be rejected"
            );
        }

        let long = "x".repeat(65);
        let request = CompileRequest {
            plugins: vec![plugin(&long)],
            ..Default::default()
        };
        assert!(matches!(
            validate(request),
            Err(ValidationError::UnsafeName { reason: "name is too long", .. })
        ));
    }

    #[test]
    fn test_leading_dash_rejected() {
        let request = CompileRequest {
            plugins: vec![plugin("-oevil")],
            ..Default::default()
        };
        assert!(matches!(
            validate(request),
            Err(ValidationError::UnsafeName { reason: "name starts with a dash", .. })
        ));

        let mut includes = BTreeMap::new();
        includes.insert("-iinc".to_string(), String::new());
        let request = CompileRequest {
            plugins: vec![plugin("admin")],
            includes,
        };
        assert!(matches!(
            validate(request),
            Err(ValidationError::UnsafeName { kind: NameKind::Include, .. })
        ));

        // Dashes elsewhere are fine
        let request = CompileRequest {
            plugins: vec![plugin("admin-tools")],
            ..Default::default()
        };
        assert!(validate(request).is_ok());
    }

    #[test]
    fn test_names_normalized() {
        let mut shared = BTreeMap::new();
        shared.insert("colors".to_string(), "a".to_string());
        shared.insert("util.inc".to_string(), "b".to_string());
        let request = CompileRequest {
            includes: shared,
            plugins: vec![
                plugin("admin.sma"),
                PluginSource {
                    name: None,
                    ..Default::default()
                },
            ],
        };

        let validated = validate(request).unwrap();
        let names: Vec<_> = validated.plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["admin", "plugin_2"]);
        let includes: Vec<_> = validated.includes.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(includes, ["colors.inc", "util.inc"]);
    }

    #[test]
    fn test_duplicates_after_normalization() {
        let request = CompileRequest {
            plugins: vec![plugin("admin"), plugin("admin.sma")],
            ..Default::default()
        };
        assert_eq!(
            validate(request).unwrap_err(),
            ValidationError::DuplicateName {
                kind: NameKind::Plugin,
                name: "admin".to_string()
            }
        );

        let mut includes = BTreeMap::new();
        includes.insert("util".to_string(), String::new());
        includes.insert("util.inc".to_string(), String::new());
        let request = CompileRequest {
            includes,
            plugins: vec![plugin("a")],
        };
        assert!(matches!(
            validate(request),
            Err(ValidationError::DuplicateName { kind: NameKind::Include, .. })
        ));
    }

    #[test]
    fn test_per_plugin_includes() {
        let mut own = BTreeMap::new();
        own.insert("private".to_string(), "stock y;".to_string());
        let request = CompileRequest {
            plugins: vec![PluginSource {
                name: Some("a".to_string()),
                code: String::new(),
                includes: own,
            }],
            ..Default::default()
        };
        let validated = validate(request).unwrap();
        assert_eq!(validated.plugins[0].includes[0].name, "private.inc");
    }
}
