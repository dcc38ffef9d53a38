//! Declarative parameter validation.
//!
//! Each command parameter carries an ordered rule chain written as short
//! strings (`"required"`, `"integer"`, `"min:1"`, `"player:map"`...). Rules
//! run left to right; coercing rules (`integer`, `float`, `direction`,
//! `options`, and the resolvers) replace the value they are handed, so later
//! rules see the coerced form. Running a chain over its own output yields the
//! same output.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::game::types::{Direction, EntityKind, EntityRef};

/// Looks up live objects for the resolving rules.
pub trait Resolver {
    /// Entity by name, scoped to the invoker's cell or (`map_wide`) map.
    fn entity(&self, query: &str, kind: Option<EntityKind>, map_wide: bool) -> Option<EntityRef>;
    /// Faction id by id, name or tag.
    fn faction(&self, query: &str) -> Option<String>;
    fn game_map(&self, query: &str) -> Option<String>;
    /// Item template id by id or name.
    fn item(&self, query: &str) -> Option<String>;
    /// Whether the invoker has something in inventory slot `slot`.
    fn slot(&self, slot: usize) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(i64),
    Float(f64),
    Entity(EntityRef),
    Faction(String),
    Map(String),
    Item(String),
    Slot(usize),
}

impl Value {
    fn raw(&self) -> String {
        match self {
            Value::Text(s) | Value::Faction(s) | Value::Map(s) | Value::Item(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Entity(e) => e.name.clone(),
            Value::Slot(s) => s.to_string(),
        }
    }

    fn number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Slot(s) => Some(*s as f64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Required,
    Integer,
    Float,
    Min(f64),
    Max(f64),
    MinLen(usize),
    MaxLen(usize),
    Alphanum,
    Direction,
    Options(Vec<String>),
    Faction,
    GameMap,
    Item,
    Slot,
    Entity { kind: Option<EntityKind>, map_wide: bool },
}

impl Rule {
    /// Parses one rule string. Panics are avoided: unknown rules are an
    /// `Err` so the command table can be checked in tests.
    pub fn parse(spec: &str) -> Result<Rule, String> {
        let (name, arg) = match spec.split_once(':') {
            Some((n, a)) => (n, Some(a)),
            None => (spec, None),
        };
        let number = |a: Option<&str>| -> Result<f64, String> {
            a.and_then(|v| v.parse().ok())
                .ok_or_else(|| format!("rule {} needs a numeric argument", spec))
        };
        let entity = |kind| match arg {
            None => Ok(Rule::Entity { kind, map_wide: false }),
            Some("map") => Ok(Rule::Entity { kind, map_wide: true }),
            Some(other) => Err(format!("unknown scope {}", other)),
        };
        match name {
            "required" => Ok(Rule::Required),
            "integer" => Ok(Rule::Integer),
            "float" => Ok(Rule::Float),
            "min" => number(arg).map(Rule::Min),
            "max" => number(arg).map(Rule::Max),
            "minlen" => number(arg).map(|n| Rule::MinLen(n as usize)),
            "maxlen" => number(arg).map(|n| Rule::MaxLen(n as usize)),
            "alphanum" => Ok(Rule::Alphanum),
            "direction" => Ok(Rule::Direction),
            "options" => {
                let opts: Vec<String> = arg
                    .unwrap_or("")
                    .split(',')
                    .map(|o| o.trim().to_lowercase())
                    .filter(|o| !o.is_empty())
                    .collect();
                if opts.is_empty() {
                    return Err("options rule needs at least one option".to_string());
                }
                Ok(Rule::Options(opts))
            }
            "faction" => Ok(Rule::Faction),
            "gamemap" => Ok(Rule::GameMap),
            "item" => Ok(Rule::Item),
            "slot" => Ok(Rule::Slot),
            "player" => entity(Some(EntityKind::Player)),
            "npc" => entity(Some(EntityKind::Npc)),
            "target" => entity(None),
            other => Err(format!("unknown rule {}", other)),
        }
    }
}

/// A declared command parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub display: &'static str,
    pub rules: Vec<Rule>,
    /// Swallows every remaining token, joined by spaces.
    pub rest: bool,
}

impl ParamSpec {
    /// Builds a parameter from rule strings. Rule strings are static tables
    /// written in this crate; a typo is caught by the registry tests.
    pub fn new(name: &'static str, display: &'static str, rules: &[&str]) -> Self {
        let rules = rules
            .iter()
            .filter_map(|r| match Rule::parse(r) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    log::error!("parameter {}: {}", name, e);
                    None
                }
            })
            .collect();
        Self {
            name,
            display,
            rules,
            rest: false,
        }
    }

    pub fn rest(mut self) -> Self {
        self.rest = true;
        self
    }

    pub fn is_required(&self) -> bool {
        self.rules.contains(&Rule::Required)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub param: String,
    pub message: String,
}

impl ValidationError {
    fn new(param: &ParamSpec, message: impl Into<String>) -> Self {
        Self {
            param: param.name.to_string(),
            message: message.into(),
        }
    }
}

/// Validated parameters by name. Absent optional parameters are missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(HashMap<&'static str, Value>);

impl Params {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.get(name).map(Value::raw)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Value::Int(i) => Some(*i),
            Value::Slot(s) => Some(*s as i64),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::number)
    }

    pub fn entity(&self, name: &str) -> Option<&EntityRef> {
        match self.get(name)? {
            Value::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Resolved id of a faction, map or item parameter.
    pub fn id(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            Value::Faction(id) | Value::Map(id) | Value::Item(id) => Some(id),
            _ => None,
        }
    }

    pub fn slot(&self, name: &str) -> Option<usize> {
        match self.get(name)? {
            Value::Slot(s) => Some(*s),
            Value::Int(i) if *i >= 0 => Some(*i as usize),
            _ => None,
        }
    }

    pub fn direction(&self, name: &str) -> Option<Direction> {
        self.text(name).and_then(|d| Direction::parse(&d))
    }

    /// `amount`-style parameter with a default.
    pub fn count(&self, name: &str, default: u32) -> u32 {
        self.int(name)
            .map(|n| n.clamp(0, u32::MAX as i64) as u32)
            .unwrap_or(default)
    }

    pub fn values(&self) -> Vec<Value> {
        let mut keys: Vec<&&str> = self.0.keys().collect();
        keys.sort();
        keys.into_iter().map(|k| self.0[*k].clone()).collect()
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&&str> = self.0.keys().collect();
        keys.sort();
        let parts: Vec<String> = keys
            .into_iter()
            .map(|k| format!("{}={}", k, self.0[*k].raw()))
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

fn apply(
    rule: &Rule,
    param: &ParamSpec,
    value: Value,
    resolver: &dyn Resolver,
) -> Result<Value, ValidationError> {
    let shown = param.display;
    match rule {
        Rule::Required => Ok(value),
        Rule::Integer => match &value {
            Value::Int(_) => Ok(value),
            Value::Slot(s) => Ok(Value::Int(*s as i64)),
            other => other
                .raw()
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| ValidationError::new(param, format!("{} must be a whole number.", shown))),
        },
        Rule::Float => match &value {
            Value::Float(_) => Ok(value),
            Value::Int(i) => Ok(Value::Float(*i as f64)),
            other => other
                .raw()
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::Float)
                .ok_or_else(|| ValidationError::new(param, format!("{} must be a number.", shown))),
        },
        Rule::Min(min) => match value.number() {
            Some(n) if n >= *min => Ok(value),
            Some(_) => Err(ValidationError::new(param, format!("{} must be at least {}.", shown, min))),
            None => Err(ValidationError::new(param, format!("{} must be a number.", shown))),
        },
        Rule::Max(max) => match value.number() {
            Some(n) if n <= *max => Ok(value),
            Some(_) => Err(ValidationError::new(param, format!("{} must be at most {}.", shown, max))),
            None => Err(ValidationError::new(param, format!("{} must be a number.", shown))),
        },
        Rule::MinLen(len) => {
            if value.raw().chars().count() >= *len {
                Ok(value)
            } else {
                Err(ValidationError::new(param, format!("{} must be at least {} characters.", shown, len)))
            }
        }
        Rule::MaxLen(len) => {
            if value.raw().chars().count() <= *len {
                Ok(value)
            } else {
                Err(ValidationError::new(param, format!("{} must be at most {} characters.", shown, len)))
            }
        }
        Rule::Alphanum => {
            let raw = value.raw();
            let cleaned: String = raw.chars().filter(|c| c.is_alphanumeric()).collect();
            if cleaned == raw {
                Ok(value)
            } else {
                Err(ValidationError::new(param, format!("{} may only contain letters and numbers.", shown)))
            }
        }
        Rule::Direction => Direction::parse(&value.raw())
            .map(|d| Value::Text(d.as_str().to_string()))
            .ok_or_else(|| ValidationError::new(param, format!("{} must be north, south, east or west.", shown))),
        Rule::Options(options) => {
            let raw = value.raw().to_lowercase();
            if options.contains(&raw) {
                Ok(Value::Text(raw))
            } else {
                Err(ValidationError::new(
                    param,
                    format!("{} must be one of: {}.", shown, options.join(", ")),
                ))
            }
        }
        Rule::Faction => match value {
            Value::Faction(_) => Ok(value),
            other => resolver
                .faction(&other.raw())
                .map(Value::Faction)
                .ok_or_else(|| ValidationError::new(param, "There is no faction by that name.")),
        },
        Rule::GameMap => match value {
            Value::Map(_) => Ok(value),
            other => resolver
                .game_map(&other.raw())
                .map(Value::Map)
                .ok_or_else(|| ValidationError::new(param, "There is no such place.")),
        },
        Rule::Item => match value {
            Value::Item(_) => Ok(value),
            other => resolver
                .item(&other.raw())
                .map(Value::Item)
                .ok_or_else(|| ValidationError::new(param, "There is no such item.")),
        },
        Rule::Slot => {
            let slot = match &value {
                Value::Slot(s) => Some(*s),
                Value::Int(i) if *i >= 0 => Some(*i as usize),
                Value::Text(t) => t.trim().parse::<usize>().ok(),
                _ => None,
            };
            match slot {
                Some(s) if resolver.slot(s) => Ok(Value::Slot(s)),
                _ => Err(ValidationError::new(param, "There is nothing in that slot.")),
            }
        }
        Rule::Entity { kind, map_wide } => match value {
            Value::Entity(e) if kind.map_or(true, |k| k == e.kind) => Ok(Value::Entity(e)),
            other => resolver
                .entity(&other.raw(), *kind, *map_wide)
                .map(Value::Entity)
                .ok_or_else(|| ValidationError::new(param, "There is nobody around by that name.")),
        },
    }
}

/// Runs one parameter's chain over a value.
pub fn validate_value(
    param: &ParamSpec,
    value: Value,
    resolver: &dyn Resolver,
) -> Result<Value, ValidationError> {
    param
        .rules
        .iter()
        .try_fold(value, |v, rule| apply(rule, param, v, resolver))
}

/// Validates raw argument tokens against a parameter list.
pub fn validate(
    params: &[ParamSpec],
    args: &[String],
    resolver: &dyn Resolver,
) -> Result<Params, ValidationError> {
    let mut out = Params::default();
    for (i, param) in params.iter().enumerate() {
        let raw = if param.rest {
            let rest = args.get(i..).map(|r| r.join(" ")).unwrap_or_default();
            Some(rest).filter(|r| !r.trim().is_empty())
        } else {
            args.get(i).cloned().filter(|a| !a.is_empty())
        };
        let Some(raw) = raw else {
            if param.is_required() {
                return Err(ValidationError::new(param, format!("{} is required.", param.display)));
            }
            continue;
        };
        let value = validate_value(param, Value::Text(raw), resolver)?;
        out.0.insert(param.name, value);
    }
    Ok(out)
}
