use crate::commands::registry::{CommandRegistry, CommandSpec};
use crate::commands::rules::ParamSpec;
use crate::commands::CommandContext;
use crate::game::errors::{GameError, GameResult};
use crate::game::registry::lock;
use crate::server::messages;

pub fn register(registry: &mut CommandRegistry) {
    registry.add(
        CommandSpec::new("/move", "Walk one cell north, south, east or west.", move_cmd)
            .param(ParamSpec::new("direction", "Direction", &["required", "direction"]))
            .cooldown("move"),
    );
    for (alias, dir) in [
        ("/north", "north"),
        ("/n", "north"),
        ("/south", "south"),
        ("/s", "south"),
        ("/east", "east"),
        ("/e", "east"),
        ("/west", "west"),
        ("/w", "west"),
    ] {
        registry.alias(alias, "/move", &[dir]);
    }
    registry.add(
        CommandSpec::new("/travel", "Take the terminal to another map.", travel)
            .param(ParamSpec::new("map", "Destination", &["required", "gamemap"]))
            .cooldown("travel"),
    );
    registry.add(
        CommandSpec::new("/flee", "Break out of combat, dropping some gear.", flee)
            .param(ParamSpec::new("direction", "Direction", &["direction"]))
            .cooldown("flee"),
    );
    registry.add(CommandSpec::new("/hide", "Vanish from sight.", hide).cooldown("skill"));
    registry.add(CommandSpec::new("/unhide", "Step out of hiding.", unhide));
    registry.add(CommandSpec::new("/look", "Describe your surroundings.", look));
}

fn move_cmd(ctx: &CommandContext<'_>) -> GameResult<()> {
    let direction = ctx
        .params
        .direction("direction")
        .ok_or_else(|| GameError::invalid(format!("Usage: {}", ctx.spec.usage())))?;
    ctx.world.move_entity(ctx.actor, direction)?;
    Ok(())
}

fn travel(ctx: &CommandContext<'_>) -> GameResult<()> {
    let map = ctx.id("map")?;
    ctx.world.travel(ctx.actor, map)?;
    Ok(())
}

fn flee(ctx: &CommandContext<'_>) -> GameResult<()> {
    let direction = ctx.params.direction("direction");
    let name = lock(&ctx.handle()?).state.name.clone();
    let outcome = ctx.world.flee(ctx.actor, direction)?;
    ctx.world
        .to_cell(&outcome.from, messages::combat_log(format!("{} flees!", name)));

    let mut line = if outcome.from == outcome.to {
        "You break free but find nowhere to run.".to_string()
    } else if outcome.reversed {
        "That way is blocked. You scramble off another way.".to_string()
    } else {
        "You flee!".to_string()
    };
    if !outcome.dropped.is_empty() {
        let names: Vec<&str> = outcome.dropped.iter().map(|i| i.name.as_str()).collect();
        line.push_str(&format!(" You drop {} in the panic.", names.join(", ")));
    }
    if outcome.experience_lost > 0 {
        line.push_str(&format!(" (-{} xp)", outcome.experience_lost));
    }
    ctx.reply(line);
    Ok(())
}

fn hide(ctx: &CommandContext<'_>) -> GameResult<()> {
    ctx.world.set_hidden(ctx.actor, true)?;
    ctx.reply("You slip out of sight.");
    Ok(())
}

fn unhide(ctx: &CommandContext<'_>) -> GameResult<()> {
    ctx.world.set_hidden(ctx.actor, false)?;
    ctx.reply("You step out of hiding.");
    Ok(())
}

fn look(ctx: &CommandContext<'_>) -> GameResult<()> {
    let here = ctx.location()?;
    let world = ctx.world;
    let map_name = world
        .maps
        .get(&here.map_id)
        .map(|m| m.name.clone())
        .unwrap_or_else(|| here.map_id.clone());

    let mut lines = vec![format!("{} ({}, {})", map_name, here.x, here.y)];
    for s in world.maps.structures_at(&here) {
        let mut line = format!("  {}", s.name);
        if !s.description.is_empty() {
            line.push_str(&format!(": {}", s.description));
        }
        if !s.commands.is_empty() {
            let offers: Vec<String> = s.commands.iter().map(|c| format!("/{}", c)).collect();
            line.push_str(&format!(" [{}]", offers.join(" ")));
        }
        lines.push(line);
    }
    let others: Vec<String> = world
        .entities
        .visible_in_cell(&here)
        .into_iter()
        .filter(|r| r.id != ctx.actor)
        .map(|r| r.name)
        .collect();
    if !others.is_empty() {
        lines.push(format!("Here: {}", others.join(", ")));
    }
    let ground = world.ground.list(&here);
    if !ground.is_empty() {
        let items: Vec<String> = ground
            .iter()
            .map(|i| {
                if i.stackable && i.quantity() > 1 {
                    format!("{} x{}", i.name, i.quantity())
                } else {
                    i.name.clone()
                }
            })
            .collect();
        lines.push(format!("On the ground: {}", items.join(", ")));
    }
    ctx.send(world.location_snapshot(&here, ctx.actor));
    ctx.reply_lines(&lines);
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::commands::handlers::testutil::Harness;
    use crate::game::types::Location;
    use crate::server::messages;

    #[test]
    fn alias_moves_and_bounds_are_reported() {
        let h = Harness::new();
        h.join("c1", "Ash", Location::new("town", 0, 1));
        h.run("c1", "/n");
        assert_eq!(h.world.entities.location_of("c1"), Some(Location::new("town", 0, 0)));
        h.run("c1", "/west");
        assert_eq!(h.errors("c1"), vec!["You can't go that way.".to_string()]);
    }

    #[test]
    fn look_lists_structures_and_people() {
        let h = Harness::new();
        h.join("c2", "Bo", Location::new("town", 5, 5));
        h.join("c1", "Ash", Location::new("town", 5, 5));
        h.transport.take();
        h.run("c1", "/look");
        let text = h.feed("c1").join("\n");
        assert!(text.contains("First Bank"));
        assert!(text.contains("Here: Bo"));
        assert_eq!(h.transport.to("conn-c1", messages::UPDATE_LOCATION).len(), 1);
    }

    #[test]
    fn travel_needs_a_terminal() {
        let h = Harness::new();
        h.join("c1", "Ash", Location::new("town", 1, 1));
        h.run("c1", "/travel wastes");
        assert_eq!(h.errors("c1"), vec!["There is no way to travel from here.".to_string()]);
        h.edit("c1", |e| e.state.cash = 50);
        h.world.teleport("c1", Location::new("town", 5, 4)).unwrap();
        h.run("c1", "/travel wastes");
        assert_eq!(h.world.entities.location_of("c1"), Some(Location::new("wastes", 0, 0)));
        assert_eq!(h.edit("c1", |e| e.state.cash), 30);
    }

    #[test]
    fn flee_without_a_fight_costs_nothing() {
        let h = Harness::new();
        h.join("c1", "Ash", Location::new("town", 1, 1));
        let knife = h.world.catalog.instantiate("knife", 1).unwrap();
        h.edit("c1", |e| {
            e.state.experience = 100;
            e.state.inventory.add(knife).unwrap();
        });
        h.run("c1", "/flee north");
        assert!(h.errors("c1").is_empty());
        assert_eq!(h.world.entities.location_of("c1"), Some(Location::new("town", 1, 0)));
        assert_eq!(h.edit("c1", |e| (e.state.experience, e.state.inventory.len())), (100, 1));
    }
}
