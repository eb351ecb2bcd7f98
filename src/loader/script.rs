//! Declarative rule scripts: the gateway's built-in filter compiler.
//!
//! A script is a TOML document:
//!
//! ```toml
//! [filter]
//! order = 10
//! disable_property = "auth.disable"
//!
//! [when]
//! path_prefix = "/api"
//!
//! [[actions]]
//! action = "require_header"
//! name = "x-api-key"
//! status = 401
//!
//! [[actions]]
//! action = "route"
//! url = "http://127.0.0.1:3000"
//! ```

use serde::Deserialize;
use std::sync::Arc;

use crate::chain::RequestContext;
use crate::loader::compiler::{Declared, ExecutableFilter, FilterCompiler, FilterFailure};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Header {
    order: Option<i32>,
    disable_property: Option<String>,
}

/// Conditions that must all hold for the script to run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct When {
    method: Option<String>,
    path_prefix: Option<String>,
    header: Option<String>,
}

impl When {
    fn matches(&self, ctx: &RequestContext) -> bool {
        let method_ok = self
            .method
            .as_ref()
            .map_or(true, |m| m.eq_ignore_ascii_case(&ctx.method));
        let path_ok = self
            .path_prefix
            .as_ref()
            .map_or(true, |p| ctx.path.starts_with(p.as_str()));
        let header_ok = self
            .header
            .as_ref()
            .map_or(true, |h| ctx.request_header(h).is_some());
        method_ok && path_ok && header_ok
    }
}

fn default_reject_status() -> u16 {
    401
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Action {
    SetRequestHeader { name: String, value: String },
    SetResponseHeader { name: String, value: String },
    SetAttribute { key: String, value: String },
    /// Short-circuit with `status` when the header is absent.
    RequireHeader {
        name: String,
        #[serde(default = "default_reject_status")]
        status: u16,
    },
    Route { url: String },
    Respond {
        status: u16,
        #[serde(default)]
        body: String,
    },
    Fail {
        message: String,
        #[serde(default)]
        fatal: bool,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct Document {
    #[serde(default)]
    filter: Header,
    #[serde(default)]
    when: When,
    #[serde(default)]
    actions: Vec<Action>,
}

/// A compiled rule script.
#[derive(Debug)]
pub struct ScriptFilter {
    header: Header,
    when: When,
    actions: Vec<Action>,
}

impl ExecutableFilter for ScriptFilter {
    fn should_filter(&self, ctx: &RequestContext) -> bool {
        self.when.matches(ctx)
    }

    fn run(&self, ctx: &mut RequestContext) -> Result<(), FilterFailure> {
        for action in &self.actions {
            match action {
                Action::SetRequestHeader { name, value } => ctx.set_request_header(name, value.clone()),
                Action::SetResponseHeader { name, value } => ctx.set_response_header(name, value.clone()),
                Action::SetAttribute { key, value } => ctx.set_attribute(key.clone(), value.clone()),
                Action::RequireHeader { name, status } => {
                    if ctx.request_header(name).is_none() {
                        ctx.respond(*status, format!("missing required header {name}"));
                        return Ok(());
                    }
                }
                Action::Route { url } => ctx.route = Some(url.clone()),
                Action::Respond { status, body } => {
                    ctx.respond(*status, body.clone());
                    return Ok(());
                }
                Action::Fail { message, fatal } => {
                    return Err(FilterFailure {
                        message: message.clone(),
                        fatal: *fatal,
                    })
                }
            }
        }
        Ok(())
    }

    fn declared(&self) -> Declared {
        Declared {
            order: self.header.order,
            disable_property: self.header.disable_property.clone(),
        }
    }
}

fn valid_status(status: u16) -> Result<(), String> {
    if (100..=599).contains(&status) {
        Ok(())
    } else {
        Err(format!("status {status} is not a valid HTTP status"))
    }
}

/// Compiles TOML rule scripts into [`ScriptFilter`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptCompiler;

impl ScriptCompiler {
    pub fn new() -> Self {
        Self
    }

    fn parse(source: &str) -> Result<ScriptFilter, String> {
        let doc: Document = toml::from_str(source).map_err(|e| e.to_string())?;

        for action in &doc.actions {
            match action {
                Action::Route { url } if !(url.starts_with("http://") || url.starts_with("https://")) => {
                    return Err(format!("route url '{url}' must be http(s)"));
                }
                Action::RequireHeader { status, .. } | Action::Respond { status, .. } => {
                    valid_status(*status)?;
                }
                _ => {}
            }
        }

        Ok(ScriptFilter {
            header: doc.filter,
            when: doc.when,
            actions: doc.actions,
        })
    }
}

impl FilterCompiler for ScriptCompiler {
    fn compile(&self, source: &str) -> Result<Arc<dyn ExecutableFilter>, String> {
        Ok(Arc::new(Self::parse(source)?))
    }
}
