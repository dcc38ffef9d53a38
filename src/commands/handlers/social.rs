use crate::commands::registry::{CommandRegistry, CommandSpec};
use crate::commands::rules::ParamSpec;
use crate::commands::CommandContext;
use crate::game::combatant::ACCURACY;
use crate::game::errors::{GameError, GameResult};
use crate::game::registry::lock;
use crate::game::types::GAME_ROOM;
use crate::logutil::escaped;
use crate::server::messages;

const MAX_CHAT: &str = "maxlen:280";

pub fn register(registry: &mut CommandRegistry) {
    registry.add(
        CommandSpec::new("/say", "Talk to everyone in your cell.", say)
            .param(ParamSpec::new("message", "Message", &["required", MAX_CHAT]).rest())
            .cooldown("chat"),
    );
    registry.add(
        CommandSpec::new("/global", "Talk to everyone in the game.", global)
            .param(ParamSpec::new("message", "Message", &["required", MAX_CHAT]).rest())
            .cooldown("chat"),
    );
    registry.add(
        CommandSpec::new("/whisper", "Message a player on your map privately.", whisper)
            .param(ParamSpec::new("player", "Player", &["required", "player:map"]))
            .param(ParamSpec::new("message", "Message", &["required", MAX_CHAT]).rest())
            .cooldown("chat"),
    );
    registry.alias("/tell", "/whisper", &[]);
    registry.add(CommandSpec::new("/who", "List players in the game.", who));
    registry.add(CommandSpec::new("/stats", "Show your character.", stats));
    registry.add(
        CommandSpec::new("/help", "List commands, or explain one.", help)
            .param(ParamSpec::new("command", "Command", &["maxlen:20"])),
    );
}

fn speaker(ctx: &CommandContext<'_>) -> GameResult<(String, crate::game::types::Location)> {
    let handle = ctx.handle()?;
    let entity = lock(&handle);
    Ok((entity.state.name.clone(), entity.state.location.clone()))
}

fn say(ctx: &CommandContext<'_>) -> GameResult<()> {
    let message = ctx.text("message")?;
    let (name, here) = speaker(ctx)?;
    log::debug!("say {} @{}: {}", name, here.room_key(), escaped(&message));
    ctx.world.to_cell(&here, messages::chat("say", &name, &message));
    Ok(())
}

fn global(ctx: &CommandContext<'_>) -> GameResult<()> {
    let message = ctx.text("message")?;
    let (name, _) = speaker(ctx)?;
    ctx.world
        .router
        .to_room(GAME_ROOM, messages::chat("global", &name, &message));
    Ok(())
}

fn whisper(ctx: &CommandContext<'_>) -> GameResult<()> {
    let target = ctx.entity("player")?.clone();
    let message = ctx.text("message")?;
    let (name, _) = speaker(ctx)?;
    let envelope = messages::chat("whisper", &name, &message);
    ctx.world.send_to_id(&target.id, envelope.clone());
    ctx.send(envelope);
    Ok(())
}

fn who(ctx: &CommandContext<'_>) -> GameResult<()> {
    let mut players = ctx.world.entities.players();
    players.sort_by(|a, b| a.name.cmp(&b.name));
    let mut lines = vec![format!("{} online:", players.len())];
    for p in players {
        let map = ctx
            .world
            .entities
            .location_of(&p.id)
            .and_then(|l| ctx.world.maps.get(&l.map_id).map(|m| m.name.clone()))
            .unwrap_or_default();
        lines.push(format!("  {} ({})", p.name, map));
    }
    ctx.reply_lines(&lines);
    Ok(())
}

fn stats(ctx: &CommandContext<'_>) -> GameResult<()> {
    let handle = ctx.handle()?;
    let entity = lock(&handle);
    let s = &entity.state;
    let mut lines = vec![
        s.name.clone(),
        format!("Health {}/{}  Cash ${}  Bank ${}", s.health, s.health_max, s.cash, s.bank),
        format!("Experience {}  Accuracy {:.1}", s.experience, s.skill(ACCURACY)),
    ];
    if let Some(target) = &s.target {
        lines.push(format!("Aiming at {}", target.name));
    }
    if !s.targeted_by.is_empty() {
        let names: Vec<&str> = s.targeted_by.iter().map(|r| r.name.as_str()).collect();
        lines.push(format!("Aimed at by {}", names.join(", ")));
    }
    if let Some(fid) = entity.faction_id() {
        if let Some(f) = ctx.world.factions.snapshot(fid) {
            lines.push(format!("Faction [{}] {}", f.tag, f.name));
        }
    }
    ctx.send(messages::character(s));
    ctx.reply_lines(&lines);
    Ok(())
}

fn help(ctx: &CommandContext<'_>) -> GameResult<()> {
    let registry = ctx.registry;
    if let Some(word) = ctx.params.text("command") {
        let name = registry
            .canonical(&word)
            .ok_or_else(|| GameError::not_found(format!("No command named {}.", word)))?;
        let spec = registry
            .get(name)
            .ok_or_else(|| GameError::not_found(format!("No command named {}.", word)))?;
        let mut lines = vec![spec.usage(), format!("  {}", spec.help)];
        let aliases = registry.aliases_of(spec.name);
        if !aliases.is_empty() {
            lines.push(format!("  Aliases: {}", aliases.join(" ")));
        }
        ctx.reply_lines(&lines);
        return Ok(());
    }
    let names: Vec<&str> = registry.specs().map(|s| s.name).collect();
    ctx.reply_lines(&[
        "Commands:".to_string(),
        names.join(" "),
        "Type /help <command> for details.".to_string(),
    ]);
    Ok(())
}
