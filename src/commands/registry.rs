//! Command table: names, aliases, parameter declarations and handlers.

use std::collections::{BTreeMap, HashMap};

use crate::commands::handlers;
use crate::commands::rules::ParamSpec;
use crate::commands::CommandContext;
use crate::game::errors::GameResult;

pub type Handler = fn(&CommandContext<'_>) -> GameResult<()>;

#[derive(Clone)]
pub struct CommandSpec {
    pub name: &'static str,
    pub help: &'static str,
    pub params: Vec<ParamSpec>,
    /// Cooldown action checked before the handler and started after it
    /// succeeds.
    pub cooldown: Option<&'static str>,
    pub handler: Handler,
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

impl CommandSpec {
    pub fn new(name: &'static str, help: &'static str, handler: Handler) -> Self {
        Self {
            name,
            help,
            params: Vec::new(),
            cooldown: None,
            handler,
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn cooldown(mut self, action: &'static str) -> Self {
        self.cooldown = Some(action);
        self
    }

    /// `/give <player> <item> [amount]`
    pub fn usage(&self) -> String {
        let mut usage = self.name.to_string();
        for p in &self.params {
            let name = p.name.replace('_', " ");
            if p.is_required() {
                usage.push_str(&format!(" <{}>", name));
            } else {
                usage.push_str(&format!(" [{}]", name));
            }
        }
        usage
    }
}

#[derive(Debug, Clone)]
struct Alias {
    target: &'static str,
    args: Vec<&'static str>,
}

#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<&'static str, CommandSpec>,
    aliases: HashMap<&'static str, Alias>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every game command.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        handlers::register_all(&mut registry);
        registry
    }

    pub fn add(&mut self, spec: CommandSpec) {
        self.commands.insert(spec.name, spec);
    }

    /// `/n` runs `/move north`.
    pub fn alias(&mut self, alias: &'static str, target: &'static str, args: &[&'static str]) {
        self.aliases.insert(
            alias,
            Alias {
                target,
                args: args.to_vec(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn specs(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.values()
    }

    /// Canonical name for a typed command word; the leading slash is
    /// optional.
    pub fn canonical(&self, word: &str) -> Option<&'static str> {
        let word = word.to_lowercase();
        let word = if word.starts_with('/') {
            word
        } else {
            format!("/{}", word)
        };
        if let Some(alias) = self.aliases.get(word.as_str()) {
            return Some(alias.target);
        }
        self.commands.get_key_value(word.as_str()).map(|(k, _)| *k)
    }

    /// Splits tokens into the command and its arguments, expanding aliases.
    pub fn resolve(&self, tokens: &[String]) -> Option<(&CommandSpec, Vec<String>)> {
        let (first, rest) = tokens.split_first()?;
        let word = first.to_lowercase();
        let word = if word.starts_with('/') {
            word
        } else {
            format!("/{}", word)
        };
        if let Some(alias) = self.aliases.get(word.as_str()) {
            let spec = self.commands.get(alias.target)?;
            let mut args: Vec<String> = alias.args.iter().map(|a| a.to_string()).collect();
            args.extend(rest.iter().cloned());
            return Some((spec, args));
        }
        let spec = self.commands.get(word.as_str())?;
        Some((spec, rest.to_vec()))
    }

    /// Aliases pointing at `name`, sorted.
    pub fn aliases_of(&self, name: &str) -> Vec<&'static str> {
        let mut out: Vec<&'static str> = self
            .aliases
            .iter()
            .filter(|(_, a)| a.target == name)
            .map(|(k, _)| *k)
            .collect();
        out.sort();
        out
    }
}
